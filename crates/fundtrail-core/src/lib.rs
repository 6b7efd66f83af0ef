pub mod activity;
pub mod aggregate;
pub mod classify;
pub mod error;
pub mod source;
pub mod trace;
pub mod types;

#[cfg(test)]
mod test_util;

pub use error::{CoreError, SourceError};
pub use types::{Address, AttributionConfig, FlowEdge, TraceLimits};
