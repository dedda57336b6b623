use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing required parameters: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    #[error("token derivation failed: {0}")]
    Signing(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("upstream request failed: {0}")]
    UpstreamTransport(String),
}

impl ProxyError {
    pub fn missing(missing: Vec<&'static str>) -> Self {
        Self::Validation { missing }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

pub type GatewayResult<T> = Result<T, ProxyError>;
