/// Dimension registry for the ADHD medication fetcher.
///
/// Defines the medications (ATC codes) this service tracks and the label
/// tables Socialstyrelsen uses for regions, sexes and age groups. The
/// static tables are the defaults; `Dimensions` is the lookup value that
/// is actually handed to the flattening transform, so a config file can
/// swap the medication list without touching global state.

use std::collections::BTreeMap;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Medication metadata
// ---------------------------------------------------------------------------

/// A tracked medication substance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Medication {
    /// Anatomical Therapeutic Chemical classification code, e.g. "N06BA04".
    pub atc_code: String,
    /// Swedish substance name as used by the publisher.
    pub name: String,
}

impl Medication {
    pub fn new(atc_code: &str, name: &str) -> Self {
        Self {
            atc_code: atc_code.to_string(),
            name: name.to_string(),
        }
    }

    /// Display label used in the CSV, e.g. "N06BA04 Metylfenidat".
    pub fn label(&self) -> String {
        format!("{} {}", self.atc_code, self.name)
    }
}

/// ADHD medications approved in Sweden, in output order.
pub static MEDICATION_REGISTRY: &[(&str, &str)] = &[
    ("C02AC02", "Guanfacin"),
    ("N06BA12", "Lisdexamfetamin"),
    ("N06BA09", "Atomoxetin"),
    ("N06BA04", "Metylfenidat"),
    ("N06BA02", "Dexamfetamin"),
];

// ---------------------------------------------------------------------------
// Label tables (Socialstyrelsen metadata)
// ---------------------------------------------------------------------------

/// Region codes. 0 is the national total; the rest are the 21 regions
/// under their historical county numbers (2, 11, 15 and 16 are retired).
pub static REGION_LABELS: &[(u32, &str)] = &[
    (0, "Riket"),
    (1, "Stockholm"),
    (3, "Uppsala"),
    (4, "Södermanland"),
    (5, "Östergötland"),
    (6, "Jönköping"),
    (7, "Kronoberg"),
    (8, "Kalmar"),
    (9, "Gotland"),
    (10, "Blekinge"),
    (12, "Skåne"),
    (13, "Halland"),
    (14, "Västra Götaland"),
    (17, "Värmland"),
    (18, "Örebro"),
    (19, "Västmanland"),
    (20, "Dalarna"),
    (21, "Gävleborg"),
    (22, "Västernorrland"),
    (23, "Jämtland Härjedalen"),
    (24, "Västerbotten"),
    (25, "Norrbotten"),
];

pub static SEX_LABELS: &[(u32, &str)] = &[(1, "Män"), (2, "Kvinnor"), (3, "Båda könen")];

/// Age groups covering ages 0-19.
pub static AGE_GROUP_LABELS: &[(u32, &str)] =
    &[(1, "0-4"), (2, "5-9"), (3, "10-14"), (4, "15-19")];

pub const DEFAULT_FIRST_YEAR: i32 = 2006;
pub const DEFAULT_LAST_YEAR: i32 = 2024;

/// Returns the default medication list as owned values.
pub fn default_medications() -> Vec<Medication> {
    MEDICATION_REGISTRY
        .iter()
        .map(|(code, name)| Medication::new(code, name))
        .collect()
}

fn label_map(table: &[(u32, &str)]) -> BTreeMap<u32, String> {
    table
        .iter()
        .map(|(code, label)| (*code, label.to_string()))
        .collect()
}

/// Checks the shape of an ATC level-5 code: letter, two digits, two
/// letters, two digits (e.g. "N06BA04").
pub fn is_valid_atc_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 7
        && bytes[0].is_ascii_uppercase()
        && bytes[1..3].iter().all(u8::is_ascii_digit)
        && bytes[3..5].iter().all(u8::is_ascii_uppercase)
        && bytes[5..7].iter().all(u8::is_ascii_digit)
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Code-to-label lookup for every dimension of a leaf.
///
/// Medication order is significant: it is the secondary sort key of the
/// flattened output.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimensions {
    pub medications: Vec<Medication>,
    pub regions: BTreeMap<u32, String>,
    pub sexes: BTreeMap<u32, String>,
    pub age_groups: BTreeMap<u32, String>,
}

impl Dimensions {
    /// Lookup built from the static registry tables.
    pub fn defaults() -> Self {
        Self::with_medications(default_medications())
    }

    /// Default label tables with a custom medication list.
    pub fn with_medications(medications: Vec<Medication>) -> Self {
        Self {
            medications,
            regions: label_map(REGION_LABELS),
            sexes: label_map(SEX_LABELS),
            age_groups: label_map(AGE_GROUP_LABELS),
        }
    }

    /// Looks up a medication by ATC code, returning its position in the
    /// configured list alongside it.
    pub fn medication(&self, atc_code: &str) -> Option<(usize, &Medication)> {
        self.medications
            .iter()
            .enumerate()
            .find(|(_, m)| m.atc_code == atc_code)
    }

    /// Looks up a medication by its display name, ignoring case. Older
    /// snapshots are keyed by name rather than ATC code.
    pub fn medication_by_name(&self, name: &str) -> Option<(usize, &Medication)> {
        let wanted = name.trim().to_lowercase();
        self.medications
            .iter()
            .enumerate()
            .find(|(_, m)| m.name.to_lowercase() == wanted)
    }

    pub fn region_label(&self, code: u32) -> Option<&str> {
        self.regions.get(&code).map(String::as_str)
    }

    pub fn sex_label(&self, code: u32) -> Option<&str> {
        self.sexes.get(&code).map(String::as_str)
    }

    pub fn age_group_label(&self, code: u32) -> Option<&str> {
        self.age_groups.get(&code).map(String::as_str)
    }

    pub fn region_codes(&self) -> Vec<u32> {
        self.regions.keys().copied().collect()
    }

    pub fn sex_codes(&self) -> Vec<u32> {
        self.sexes.keys().copied().collect()
    }

    pub fn age_group_codes(&self) -> Vec<u32> {
        self.age_groups.keys().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_all_atc_codes_are_valid_format() {
        // A malformed code is silently answered with an empty data set
        // by the API, so catch it here instead.
        for (code, name) in MEDICATION_REGISTRY {
            assert!(
                is_valid_atc_code(code),
                "ATC code for '{}' should look like N06BA04, got '{}'",
                name,
                code
            );
        }
    }

    #[test]
    fn test_no_duplicate_codes_in_any_table() {
        let mut seen = HashSet::new();
        for (code, _) in MEDICATION_REGISTRY {
            assert!(seen.insert(*code), "duplicate ATC code '{}'", code);
        }
        for table in [REGION_LABELS, SEX_LABELS, AGE_GROUP_LABELS] {
            let mut seen = HashSet::new();
            for (code, label) in table {
                assert!(seen.insert(*code), "duplicate code {} ('{}')", code, label);
            }
        }
    }

    #[test]
    fn test_registry_contains_all_expected_medications() {
        let expected = ["C02AC02", "N06BA12", "N06BA09", "N06BA04", "N06BA02"];
        let codes: Vec<_> = MEDICATION_REGISTRY.iter().map(|(c, _)| *c).collect();
        for code in &expected {
            assert!(codes.contains(code), "registry missing '{}'", code);
        }
    }

    #[test]
    fn test_is_valid_atc_code_rejects_bad_shapes() {
        assert!(is_valid_atc_code("N06BA04"));
        assert!(!is_valid_atc_code("N06BA4"));
        assert!(!is_valid_atc_code("n06ba04"));
        assert!(!is_valid_atc_code("N06BA04X"));
        assert!(!is_valid_atc_code("106BA04"));
        assert!(!is_valid_atc_code(""));
    }

    #[test]
    fn test_medication_lookup_returns_rank() {
        let dims = Dimensions::defaults();
        let (rank, med) = dims.medication("N06BA04").expect("Metylfenidat should be registered");
        assert_eq!(rank, 3);
        assert_eq!(med.label(), "N06BA04 Metylfenidat");
        assert!(dims.medication("A10BA02").is_none());
    }

    #[test]
    fn test_medication_lookup_by_name() {
        let dims = Dimensions::defaults();
        assert_eq!(dims.medication_by_name("Metylfenidat").map(|(rank, _)| rank), Some(3));
        assert_eq!(
            dims.medication_by_name(" lisdexamfetamin ").map(|(_, m)| m.atc_code.as_str()),
            Some("N06BA12")
        );
        assert!(dims.medication_by_name("Metformin").is_none());
    }

    #[test]
    fn test_label_lookups() {
        let dims = Dimensions::defaults();
        assert_eq!(dims.region_label(0), Some("Riket"));
        assert_eq!(dims.region_label(1), Some("Stockholm"));
        assert_eq!(dims.region_label(2), None);
        assert_eq!(dims.sex_label(1), Some("Män"));
        assert_eq!(dims.sex_label(3), Some("Båda könen"));
        assert_eq!(dims.age_group_label(4), Some("15-19"));
        assert_eq!(dims.age_group_label(5), None);
    }

    #[test]
    fn test_code_helpers_match_tables() {
        let dims = Dimensions::defaults();
        assert_eq!(dims.region_codes().len(), REGION_LABELS.len());
        assert_eq!(dims.sex_codes(), vec![1, 2, 3]);
        assert_eq!(dims.age_group_codes(), vec![1, 2, 3, 4]);
        // BTreeMap keys come back ascending.
        assert_eq!(dims.region_codes()[0], 0);
    }

    #[test]
    fn test_custom_medication_list_keeps_order() {
        let dims = Dimensions::with_medications(vec![
            Medication::new("N06BA02", "Dexamfetamin"),
            Medication::new("C02AC02", "Guanfacin"),
        ]);
        assert_eq!(dims.medication("N06BA02").map(|(rank, _)| rank), Some(0));
        assert_eq!(dims.medication("C02AC02").map(|(rank, _)| rank), Some(1));
        assert!(dims.medication("N06BA04").is_none());
    }
}
