use thiserror::Error;

/// Outcome of a checkout that did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("checkout closed before payment completed")]
    UserCancelled,
    #[error("payment provider failure: {0}")]
    Provider(String),
    /// Checkout finished but the backend did not confirm the payment.
    #[error("payment rejected: {0}")]
    Rejected(String),
}

/// Every failure the client core surfaces. Callers match on the variant to
/// decide how to present it; none of them are retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Not logged in, or logged in with the wrong role.
    #[error("not authorized: {0}")]
    Auth(String),
    /// The request was understood and refused (e.g. no rooms left).
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Transport failure, 5xx, or a body that does not match the contract.
    #[error("network error: {0}")]
    Network(String),
    /// Illegal state transition.
    #[error("illegal transition: {0}")]
    State(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Network(format!("malformed response: {}", e))
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Network(format!("realtime: {}", e))
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
