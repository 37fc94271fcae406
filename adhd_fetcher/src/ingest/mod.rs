/// Data ingestion from upstream statistics APIs.
///
/// Submodules:
/// - `socialstyrelsen` — paginated results queries against the
///   Socialstyrelsen medicines database.

pub mod socialstyrelsen;
