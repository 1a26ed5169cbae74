// src/domain/mod.rs
pub mod errors;
pub mod models;
pub mod record;

// Re-export common types for convenience
pub use errors::{
    AppError, AppResult, ChainError, ChainResult, ExecutionError, ExecutionResult, OrderError,
    OrderResult, ProtocolError, ProtocolResult, QuoteError, QuoteResult,
};
pub use models::{
    Dex, ExecutionType, Order, OrderKind, OrderSide, OrderStatus, Pool, PositionPhase, Quote,
    SwapAction, SwapDirection, SwapExecutionResult, TokenInfo, TrailingConfig, TrailingType,
    WalletCredentials,
};
pub use record::OrderRecord;
