use thiserror::Error;

/// Errors surfaced by `Gateway::fetch`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Rate limited by source {0}")]
    RateLimited(String),

    #[error("Market data unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
}

/// Errors from a single upstream request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unknown symbol: {0}")]
    InvalidSymbol(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Local rate limit exhausted")]
    RateLimited,

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl SourceError {
    /// Transient failures are worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout(_) | SourceError::Transport(_) => true,
            SourceError::Http { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            SourceError::InvalidSymbol(_)
            | SourceError::Auth(_)
            | SourceError::RateLimited
            | SourceError::Payload(_)
            | SourceError::Unsupported(_) => false,
        }
    }

    /// Map a final (post-retry) source failure onto the gateway taxonomy.
    pub fn into_gateway(self, source: &str) -> GatewayError {
        match self {
            SourceError::InvalidSymbol(symbol) => GatewayError::InvalidSymbol(symbol),
            SourceError::RateLimited => GatewayError::RateLimited(source.to_string()),
            other => GatewayError::Unavailable(format!("{source}: {other}")),
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(timeout_secs)
        } else if err.is_decode() {
            SourceError::Payload(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SourceError::Timeout(10).is_transient());
        assert!(SourceError::Transport("connection reset".into()).is_transient());
        assert!(SourceError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(SourceError::Http {
            status: 429,
            body: String::new()
        }
        .is_transient());

        assert!(!SourceError::Http {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!SourceError::InvalidSymbol("XYZ".into()).is_transient());
        assert!(!SourceError::Auth("bad key".into()).is_transient());
        assert!(!SourceError::RateLimited.is_transient());
    }

    #[test]
    fn maps_into_gateway_errors() {
        assert_eq!(
            SourceError::InvalidSymbol("XYZ".into()).into_gateway("bybit"),
            GatewayError::InvalidSymbol("XYZ".into())
        );
        assert_eq!(
            SourceError::RateLimited.into_gateway("bybit"),
            GatewayError::RateLimited("bybit".into())
        );
        assert!(matches!(
            SourceError::Timeout(5).into_gateway("coinranking"),
            GatewayError::Unavailable(msg) if msg.starts_with("coinranking")
        ));
    }
}
