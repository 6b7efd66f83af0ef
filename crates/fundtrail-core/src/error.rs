use crate::types::Address;

/// Why a single address lookup produced no data.
///
/// Every variant means the address is *unavailable* for this run. The
/// tracer treats that as the end of one branch; the accumulator model
/// treats it as fatal.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The service answered 429 for this attempt.
    #[error("throttled by remote service")]
    Throttled,

    /// Every attempt within the retry budget was throttled.
    #[error("still throttled after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    /// `true` for the single failure mode that is worth retrying.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("address {address} unavailable: {source}")]
    Source {
        address: Address,
        #[source]
        source: SourceError,
    },

    #[error("no outgoing flow found for address {0}")]
    NoOutgoingFlow(Address),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    pub(crate) fn unavailable(address: &Address, source: SourceError) -> Self {
        Self::Source {
            address: address.clone(),
            source,
        }
    }
}
