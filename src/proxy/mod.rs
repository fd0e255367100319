//! Proxy pool subsystem
//!
//! Candidates flow from the source aggregator through two validation stages
//! into the verified pool, which the rotation policy hands out one address
//! at a time. The monitor keeps the whole pipeline running in the
//! background.

pub mod monitor;
pub mod probe;
pub mod rotation;
pub mod sources;
pub mod validator;

pub use monitor::{MonitorHandle, MonitorStats, PoolStats, ProxyMonitor};
pub use probe::{HttpProbe, ReachabilityProbe};
pub use rotation::RotationPolicy;
pub use sources::SourceAggregator;
pub use validator::ProxyValidator;
