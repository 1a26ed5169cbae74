// src/chain/client.rs
use crate::domain::errors::{ChainResult, OrderResult};
use crate::domain::models::{Order, OrderStatus, TransactionDescriptor, WalletCredentials};
use crate::domain::record::OrderRecord;
use async_trait::async_trait;

/// Read access to pools and balances
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Reserves of the pool's `from` and `to` sides in minimal units
    async fn get_reserves(&self, pool_address: &str) -> ChainResult<(u128, u128)>;

    /// Native balance in minimal units
    async fn get_balance(&self, address: &str) -> ChainResult<u128>;

    /// Jetton wallet address of `owner` for `jetton_master`
    async fn get_jetton_wallet(&self, owner: &str, jetton_master: &str) -> ChainResult<String>;

    /// Jetton balance of `owner` in minimal units
    async fn get_jetton_balance(&self, owner: &str, jetton_master: &str) -> ChainResult<u128>;
}

/// Persistent order records, upsert by id
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn load_orders(&self, filter: Option<&OrderFilter>) -> OrderResult<Vec<OrderRecord>>;

    async fn save_order(&self, record: &OrderRecord) -> OrderResult<bool>;
}

/// Maps an order to the signing material of its execution wallet
#[async_trait]
pub trait WalletResolver: Send + Sync {
    async fn resolve_credentials(&self, order: &Order) -> ChainResult<WalletCredentials>;
}

/// Signs and broadcasts messages
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Address of the wallet that `secret` signs for
    async fn derive_address(&self, secret: &str) -> ChainResult<String>;

    async fn submit(&self, secret: &str, transaction: &TransactionDescriptor) -> ChainResult<bool>;
}

/// Selection over stored orders; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub ids: Vec<String>,
    pub statuses: Vec<OrderStatus>,
    pub symbol: Option<String>,
    pub wallet: Option<String>,
}

impl OrderFilter {
    pub fn live() -> Self {
        Self {
            statuses: vec![OrderStatus::Pending, OrderStatus::Active],
            ..Default::default()
        }
    }

    pub fn by_id(id: &str) -> Self {
        Self {
            ids: vec![id.to_string()],
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &OrderRecord) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| *id == record.id) {
            return false;
        }
        if !self.statuses.is_empty()
            && !self
                .statuses
                .iter()
                .any(|s| s.as_str().eq_ignore_ascii_case(&record.status))
        {
            return false;
        }
        if let Some(symbol) = &self.symbol {
            if *symbol != record.symbol {
                return false;
            }
        }
        if let Some(wallet) = &self.wallet {
            if *wallet != record.user_wallet && *wallet != record.execution_wallet {
                return false;
            }
        }
        true
    }
}
