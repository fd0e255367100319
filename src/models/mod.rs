//! Domain entities shared across the proxy pool and ingestion subsystems

mod credential;
mod job;
mod proxy;

pub use credential::CredentialRecord;
pub use job::JobRecord;
pub use proxy::{parse_proxy_address, ProxyRecord, ProxyStage};
