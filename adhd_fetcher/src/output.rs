//! Output files: the raw JSON snapshot and the flattened CSV.
//!
//! Both files are written to a sibling `*.tmp` path first and renamed into
//! place, so an interrupted run leaves the previous file untouched.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::config::CsvSettings;
use crate::logging::OUTPUT;
use crate::model::{CSV_HEADER, FlatRow, OutputError, RawResult};

fn io_error(path: &Path, source: std::io::Error) -> OutputError {
    OutputError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write through `fill` into the temporary sibling of `path`. The
/// temporary file is removed again if anything fails.
fn write_tmp<F>(path: &Path, fill: F) -> Result<PathBuf, OutputError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), OutputError>,
{
    let tmp = tmp_path(path);
    let result = File::create(&tmp)
        .map_err(|e| io_error(&tmp, e))
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            fill(&mut writer)?;
            writer.flush().map_err(|e| io_error(&tmp, e))
        });

    match result {
        Ok(()) => Ok(tmp),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Rename a staged temporary file over `path`.
fn commit(tmp: &Path, path: &Path) -> Result<(), OutputError> {
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        io_error(path, e)
    })
}

/// Write through `fill` into a temporary file, then rename it over `path`.
fn write_atomically<F>(path: &Path, fill: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), OutputError>,
{
    let tmp = write_tmp(path, fill)?;
    commit(&tmp, path)
}

// ---------------------------------------------------------------------------
// JSON snapshot
// ---------------------------------------------------------------------------

fn fill_json(raw: &RawResult, path: &Path, writer: &mut BufWriter<File>) -> Result<(), OutputError> {
    serde_json::to_writer_pretty(&mut *writer, raw).map_err(|source| OutputError::Json {
        path: path.display().to_string(),
        source,
    })?;
    writer.write_all(b"\n").map_err(|e| io_error(path, e))
}

/// Save the raw result as pretty-printed UTF-8 JSON.
pub fn write_json_snapshot(raw: &RawResult, path: &Path) -> Result<(), OutputError> {
    write_atomically(path, |writer| fill_json(raw, path, writer))?;

    info!(
        target: OUTPUT,
        "JSON saved: {} ({} records)",
        path.display(),
        raw.leaf_count()
    );
    Ok(())
}

/// Load a snapshot written by `write_json_snapshot`.
pub fn read_json_snapshot(path: &Path) -> Result<RawResult, OutputError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let raw: RawResult =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| OutputError::Json {
            path: path.display().to_string(),
            source,
        })?;

    info!(
        target: OUTPUT,
        "Loaded {} medications ({} records) from {}",
        raw.medications.len(),
        raw.leaf_count(),
        path.display()
    );
    Ok(raw)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Write the header and one record per row. Returns the number of data rows.
pub fn write_csv<W: Write>(
    rows: &[FlatRow],
    writer: W,
    settings: &CsvSettings,
) -> Result<usize, OutputError> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(settings.delimiter)
        .from_writer(writer);

    wtr.write_record(CSV_HEADER)?;

    for row in rows {
        let year = row.year.to_string();
        let value = row.measurement.render(&settings.missing_marker);
        wtr.write_record([
            year.as_str(),
            row.medication.as_str(),
            row.region.as_str(),
            row.sex.as_str(),
            row.age_group.as_str(),
            value.as_str(),
        ])?;
    }

    wtr.flush().map_err(|e| OutputError::Csv(e.into()))?;
    Ok(rows.len())
}

/// Write the CSV file at `path`.
pub fn write_csv_file(
    rows: &[FlatRow],
    path: &Path,
    settings: &CsvSettings,
) -> Result<usize, OutputError> {
    let mut written = 0;
    write_atomically(path, |writer| {
        written = write_csv(rows, writer, settings)?;
        Ok(())
    })?;

    info!(target: OUTPUT, "CSV saved: {} ({} rows)", path.display(), written);
    Ok(written)
}

// ---------------------------------------------------------------------------
// Run outputs
// ---------------------------------------------------------------------------

/// Write the CSV and, when given, the JSON snapshot as one unit.
///
/// Both files are staged to their temporary siblings first and only renamed
/// into place once every staged write has succeeded, so a failure leaves
/// the previous outputs untouched. Returns the number of CSV data rows.
pub fn write_outputs(
    snapshot: Option<(&RawResult, &Path)>,
    rows: &[FlatRow],
    csv_path: &Path,
    settings: &CsvSettings,
) -> Result<usize, OutputError> {
    let staged_json = match snapshot {
        Some((raw, path)) => Some((write_tmp(path, |writer| fill_json(raw, path, writer))?, path)),
        None => None,
    };

    let mut written = 0;
    let staged_csv = write_tmp(csv_path, |writer| {
        written = write_csv(rows, writer, settings)?;
        Ok(())
    });
    let staged_csv = match staged_csv {
        Ok(tmp) => tmp,
        Err(e) => {
            if let Some((tmp, _)) = &staged_json {
                let _ = fs::remove_file(tmp);
            }
            return Err(e);
        }
    };

    if let Some((tmp, path)) = &staged_json {
        if let Err(e) = commit(tmp, path) {
            let _ = fs::remove_file(&staged_csv);
            return Err(e);
        }
    }
    commit(&staged_csv, csv_path)?;

    if let Some((raw, path)) = snapshot {
        info!(
            target: OUTPUT,
            "JSON saved: {} ({} records)",
            path.display(),
            raw.leaf_count()
        );
    }
    info!(target: OUTPUT, "CSV saved: {} ({} rows)", csv_path.display(), written);
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Measurement;
    use serde_json::json;

    fn row(year: i32, region: &str, measurement: Measurement) -> FlatRow {
        FlatRow {
            year,
            medication: "N06BA04 Metylfenidat".to_string(),
            region: region.to_string(),
            sex: "Kvinnor".to_string(),
            age_group: "15-19".to_string(),
            measurement,
        }
    }

    fn csv_string(rows: &[FlatRow], settings: &CsvSettings) -> String {
        let mut buf = Vec::new();
        write_csv(rows, &mut buf, settings).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_csv_header_only_for_no_rows() {
        let text = csv_string(&[], &CsvSettings::default());
        assert_eq!(text, "År;Läkemedel;Region;Kön;Ålder;Patienter/1000 invånare\n");
    }

    #[test]
    fn test_csv_rows_and_missing_marker() {
        let rows = vec![
            row(2023, "Stockholm", Measurement::Value(12.5)),
            row(2023, "Gotland", Measurement::Suppressed),
            row(2023, "Skåne", Measurement::Value(0.0)),
        ];
        let text = csv_string(&rows, &CsvSettings::default());
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "2023;N06BA04 Metylfenidat;Stockholm;Kvinnor;15-19;12.5");
        assert_eq!(lines[2], "2023;N06BA04 Metylfenidat;Gotland;Kvinnor;15-19;NA");
        assert_eq!(lines[3], "2023;N06BA04 Metylfenidat;Skåne;Kvinnor;15-19;0");
    }

    #[test]
    fn test_csv_custom_delimiter_quotes_when_needed() {
        let settings = CsvSettings {
            delimiter: b',',
            missing_marker: "-".to_string(),
        };
        let rows = vec![row(2010, "Jämtland, Härjedalen", Measurement::Suppressed)];
        let text = csv_string(&rows, &settings);
        assert_eq!(
            text.lines().nth(1),
            Some("2010,N06BA04 Metylfenidat,\"Jämtland, Härjedalen\",Kvinnor,15-19,-")
        );
    }

    #[test]
    fn test_json_snapshot_round_trip_keeps_non_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let mut raw = RawResult::new();
        raw.medications.insert(
            "N06BA04".to_string(),
            vec![json!({"ar": 2023, "regionId": 12, "region": "Skåne", "varde": "3,44"})],
        );
        write_json_snapshot(&raw, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Skåne"));
        assert!(!tmp_path(&path).exists());

        assert_eq!(read_json_snapshot(&path).unwrap(), raw);
    }

    #[test]
    fn test_csv_file_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.csv");
        fs::write(&path, "old contents").unwrap();

        let written = write_csv_file(
            &[row(2023, "Riket", Measurement::Value(3.44))],
            &path,
            &CsvSettings::default(),
        )
        .unwrap();

        assert_eq!(written, 1);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("2023;N06BA04 Metylfenidat;Riket;Kvinnor;15-19;3.44\n"));
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_write_into_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("flat.csv");
        let result = write_csv_file(&[], &path, &CsvSettings::default());
        assert!(matches!(result, Err(OutputError::Io { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_read_snapshot_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(read_json_snapshot(&missing), Err(OutputError::Io { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{\"N06BA04\": [").unwrap();
        assert!(matches!(read_json_snapshot(&broken), Err(OutputError::Json { .. })));
    }

    #[test]
    fn test_snapshot_keeps_record_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let mut raw = RawResult::new();
        raw.medications.insert(
            "N06BA04".to_string(),
            vec![json!({"varde": "1", "ar": 2023, "regionId": 0})],
        );
        write_json_snapshot(&raw, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let varde = text.find("\"varde\"").unwrap();
        let ar = text.find("\"ar\"").unwrap();
        let region = text.find("\"regionId\"").unwrap();
        assert!(varde < ar && ar < region, "fields were reordered:\n{}", text);
    }

    #[test]
    fn test_outputs_written_together() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("raw.json");
        let csv_path = dir.path().join("flat.csv");
        let raw = RawResult::new();

        let written = write_outputs(
            Some((&raw, json_path.as_path())),
            &[row(2023, "Riket", Measurement::Value(1.5))],
            &csv_path,
            &CsvSettings::default(),
        )
        .unwrap();

        assert_eq!(written, 1);
        assert!(json_path.exists());
        assert!(csv_path.exists());
        assert!(!tmp_path(&json_path).exists());
        assert!(!tmp_path(&csv_path).exists());
    }

    #[test]
    fn test_failed_csv_leaves_snapshot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("raw.json");
        let csv_path = dir.path().join("missing").join("flat.csv");

        let result = write_outputs(
            Some((&RawResult::new(), json_path.as_path())),
            &[],
            &csv_path,
            &CsvSettings::default(),
        );
        assert!(matches!(result, Err(OutputError::Io { .. })));
        assert!(!json_path.exists());
        assert!(!tmp_path(&json_path).exists());

        // A snapshot from an earlier run is kept as it was.
        fs::write(&json_path, "previous").unwrap();
        let result = write_outputs(
            Some((&RawResult::new(), json_path.as_path())),
            &[],
            &csv_path,
            &CsvSettings::default(),
        );
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&json_path).unwrap(), "previous");
    }

    #[test]
    fn test_tmp_path_is_sibling() {
        let p = Path::new("/data/out/flat.csv");
        assert_eq!(tmp_path(p), PathBuf::from("/data/out/flat.csv.tmp"));
    }
}
