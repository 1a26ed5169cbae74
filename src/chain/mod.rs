// src/chain/mod.rs
pub mod client;
pub mod paper;

pub use client::{ChainClient, OrderFilter, OrderStore, TransactionSubmitter, WalletResolver};
