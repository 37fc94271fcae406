//! Fetches ADHD medication prescription statistics for Sweden from the
//! Socialstyrelsen statistics API, keeps the raw response as a JSON
//! snapshot and flattens it into a CSV table.

pub mod config;
pub mod flatten;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod validate;
