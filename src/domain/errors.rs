// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Unknown(s)
    }
}

/// Order lifecycle and API-boundary errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Order {0} is in a terminal state")]
    Terminal(String),

    #[error("Order store error: {0}")]
    Store(String),
}

/// Liquidity / quote computation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuoteError {
    #[error("Pool has no liquidity: {0}")]
    ZeroReserves(String),

    #[error("Input amount is zero in minimal units: {0}")]
    ZeroInput(String),

    #[error("Quote output is zero: {0}")]
    ZeroOutput(String),

    #[error("Quote arithmetic overflow: {0}")]
    Overflow(String),
}

/// Wire-format errors (addresses, cells, bags of cells)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unsupported venue: {0}")]
    UnsupportedVenue(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Cell overflow: {0}")]
    CellOverflow(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Errors surfaced by the blockchain collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Remote method call failed: {0}")]
    RemoteMethod(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl ChainError {
    /// Network-level failures are safe to retry on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Network(_) | ChainError::Timeout(_) | ChainError::RemoteMethod(_)
        )
    }
}

/// Swap orchestration failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("No signing secret configured for wallet {0}")]
    MissingCredentials(String),

    #[error("Wallet mismatch: expected {expected}, derived {derived}")]
    WalletMismatch { expected: String, derived: String },

    #[error("Unsupported venue: {0}")]
    UnsupportedVenue(String),

    #[error("Liquidity error: {0}")]
    Liquidity(#[from] QuoteError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No pool configured for {0}")]
    PoolNotFound(String),
}

impl ExecutionError {
    /// Failures that leave the order live for the next tick: network trouble
    /// and pools without usable liquidity
    pub fn is_transient(&self) -> bool {
        match self {
            ExecutionError::Chain(e) => e.is_transient(),
            ExecutionError::Liquidity(_) | ExecutionError::PoolNotFound(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for ExecutionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::UnsupportedVenue(v) => ExecutionError::UnsupportedVenue(v),
            other => ExecutionError::Protocol(other.to_string()),
        }
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type OrderResult<T> = Result<T, OrderError>;
pub type QuoteResult<T> = Result<T, QuoteError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type ChainResult<T> = Result<T, ChainError>;
pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_errors_classify_by_variant() {
        assert!(ChainError::Network("reset".into()).is_transient());
        assert!(ChainError::Timeout("30s".into()).is_transient());
        assert!(ChainError::RemoteMethod("exit code -13".into()).is_transient());
        assert!(!ChainError::InsufficientFunds("0.05".into()).is_transient());
        assert!(!ChainError::Rejected("bad seqno".into()).is_transient());
    }

    #[test]
    fn execution_errors_are_permanent_unless_retryable() {
        let transient = ExecutionError::from(ChainError::Timeout("get_balance".into()));
        assert!(transient.is_transient());

        let mismatch = ExecutionError::WalletMismatch {
            expected: "a".into(),
            derived: "b".into(),
        };
        assert!(!mismatch.is_transient());

        let drained = ExecutionError::from(QuoteError::ZeroReserves("pool".into()));
        assert!(drained.is_transient());
        assert!(ExecutionError::PoolNotFound("TON-USDT".into()).is_transient());
        assert!(!ExecutionError::InsufficientFunds("0.05".into()).is_transient());

        let venue = ExecutionError::from(ProtocolError::UnsupportedVenue("Uniswap".into()));
        assert_eq!(venue, ExecutionError::UnsupportedVenue("Uniswap".into()));
        assert!(!venue.is_transient());
    }
}
