// src/trading/mod.rs
pub mod engine;
pub mod execution;
pub mod pools;
pub mod processor;
pub mod quote;
pub mod trigger;
pub mod validation;

pub use engine::OrderEngine;
pub use execution::SwapOrchestrator;
pub use pools::PoolBook;
pub use processor::{OrderExecutor, OrderProcessor};
pub use quote::QuoteEngine;
pub use validation::{NewOrder, OrderUpdate};
