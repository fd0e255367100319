//! Quota-aware job ingestion subsystem
//!
//! The engine probes the search API for the total result count, plans the
//! page sweep, and walks it with whichever credential currently has the most
//! remaining quota, switching credentials mid-run when one is rejected.

pub mod api;
pub mod credentials;
pub mod engine;

pub use api::{HttpSearchApi, SearchApi, SearchRequest, SearchResponse};
pub use credentials::CredentialQuotaManager;
pub use engine::{IngestReport, IngestionEngine};
