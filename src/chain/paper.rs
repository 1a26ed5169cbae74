// src/chain/paper.rs
//! Dry-run collaborators: everything is prepared and recorded, nothing is broadcast.
use crate::chain::client::{ChainClient, OrderFilter, OrderStore, TransactionSubmitter, WalletResolver};
use crate::config::PaperConfig;
use crate::domain::errors::{ChainError, ChainResult, OrderError, OrderResult};
use crate::domain::models::{Order, Pool, TransactionDescriptor, WalletCredentials};
use crate::domain::record::OrderRecord;
use crate::protocol::address::{parse_address, TonAddress};
use crate::protocol::{to_units, NATIVE_DECIMALS};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

/// Addresses compare by account, whatever form they were written in
fn account_key(address: &str) -> String {
    parse_address(address)
        .map(|a| a.to_raw())
        .unwrap_or_else(|_| address.trim().to_string())
}

#[derive(Debug, Default)]
struct ChainState {
    reserves: HashMap<String, (u128, u128)>,
    balances: HashMap<String, u128>,
    jettons: HashMap<(String, String), u128>,
    failures: VecDeque<ChainError>,
}

/// Snapshot-driven chain view
#[derive(Debug, Default)]
pub struct PaperChain {
    state: RwLock<ChainState>,
}

impl PaperChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from config; display amounts are converted with the pools' decimals
    pub fn from_config(paper: &PaperConfig, pools: &HashMap<String, Vec<Pool>>) -> Self {
        let mut state = ChainState::default();
        let all_pools: Vec<&Pool> = pools.values().flatten().collect();

        for (address, reserves) in &paper.reserves {
            let Some(pool) = all_pools.iter().find(|p| account_key(&p.address) == account_key(address)) else {
                log::warn!("Paper reserves for unknown pool {}", address);
                continue;
            };
            let from = to_units(reserves.from, pool.from_token.decimals).unwrap_or(0);
            let to = to_units(reserves.to, pool.to_token.decimals).unwrap_or(0);
            state.reserves.insert(account_key(address), (from, to));
        }

        for wallet in &paper.wallets {
            let owner = account_key(&wallet.address);
            let native = to_units(wallet.native_balance, NATIVE_DECIMALS).unwrap_or(0);
            state.balances.insert(owner.clone(), native);
            for (master, amount) in &wallet.jetton_balances {
                let decimals = all_pools
                    .iter()
                    .flat_map(|p| [&p.from_token, &p.to_token])
                    .find(|t| account_key(&t.address) == account_key(master))
                    .map(|t| t.decimals)
                    .unwrap_or(NATIVE_DECIMALS);
                let units = to_units(*amount, decimals).unwrap_or(0);
                state
                    .jettons
                    .insert((owner.clone(), account_key(master)), units);
            }
        }

        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn set_reserves(&self, pool_address: &str, from: u128, to: u128) {
        self.state
            .write()
            .await
            .reserves
            .insert(account_key(pool_address), (from, to));
    }

    pub async fn set_balance(&self, address: &str, units: u128) {
        self.state
            .write()
            .await
            .balances
            .insert(account_key(address), units);
    }

    pub async fn set_jetton_balance(&self, owner: &str, jetton_master: &str, units: u128) {
        self.state
            .write()
            .await
            .jettons
            .insert((account_key(owner), account_key(jetton_master)), units);
    }

    /// Make the next read fail with `error`
    pub async fn fail_next(&self, error: ChainError) {
        self.state.write().await.failures.push_back(error);
    }

    async fn injected_failure(&self) -> ChainResult<()> {
        match self.state.write().await.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainClient for PaperChain {
    async fn get_reserves(&self, pool_address: &str) -> ChainResult<(u128, u128)> {
        self.injected_failure().await?;
        self.state
            .read()
            .await
            .reserves
            .get(&account_key(pool_address))
            .copied()
            .ok_or_else(|| ChainError::RemoteMethod(format!("get_reserves failed for {}", pool_address)))
    }

    async fn get_balance(&self, address: &str) -> ChainResult<u128> {
        self.injected_failure().await?;
        Ok(self
            .state
            .read()
            .await
            .balances
            .get(&account_key(address))
            .copied()
            .unwrap_or(0))
    }

    async fn get_jetton_wallet(&self, owner: &str, jetton_master: &str) -> ChainResult<String> {
        self.injected_failure().await?;
        let owner = parse_address(owner).map_err(|e| ChainError::InvalidAddress(e.to_string()))?;
        let master =
            parse_address(jetton_master).map_err(|e| ChainError::InvalidAddress(e.to_string()))?;

        // Stable stand-in for the master's get_wallet_address
        let mut hash = [0u8; 32];
        for (i, byte) in hash.iter_mut().enumerate() {
            *byte = owner.hash[i] ^ master.hash[31 - i];
        }
        Ok(TonAddress::new(owner.workchain, hash).to_string())
    }

    async fn get_jetton_balance(&self, owner: &str, jetton_master: &str) -> ChainResult<u128> {
        self.injected_failure().await?;
        Ok(self
            .state
            .read()
            .await
            .jettons
            .get(&(account_key(owner), account_key(jetton_master)))
            .copied()
            .unwrap_or(0))
    }
}

/// Order records held in memory, optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    records: Mutex<HashMap<String, OrderRecord>>,
    path: Option<PathBuf>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` if it exists; saves are written back to it
    pub fn open<P: Into<PathBuf>>(path: P) -> OrderResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| OrderError::Store(format!("read {}: {}", path.display(), e)))?;
            let list: Vec<OrderRecord> = serde_json::from_str(&contents)
                .map_err(|e| OrderError::Store(format!("parse {}: {}", path.display(), e)))?;
            list.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            HashMap::new()
        };
        log::info!("Order store {} opened with {} records", path.display(), records.len());

        Ok(Self {
            records: Mutex::new(records),
            path: Some(path),
        })
    }

    async fn flush(&self, records: &HashMap<String, OrderRecord>) -> OrderResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut list: Vec<&OrderRecord> = records.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let contents = serde_json::to_string_pretty(&list)
            .map_err(|e| OrderError::Store(format!("serialize orders: {}", e)))?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| OrderError::Store(format!("write {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn load_orders(&self, filter: Option<&OrderFilter>) -> OrderResult<Vec<OrderRecord>> {
        let records = self.records.lock().await;
        let mut list: Vec<OrderRecord> = records
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn save_order(&self, record: &OrderRecord) -> OrderResult<bool> {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record.clone());
        self.flush(&records).await?;
        Ok(true)
    }
}

/// Execution wallet -> secret table
#[derive(Debug, Default)]
pub struct StaticWalletResolver {
    secrets: HashMap<String, Option<String>>,
}

impl StaticWalletResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(paper: &PaperConfig) -> Self {
        let mut resolver = Self::new();
        for wallet in &paper.wallets {
            resolver.insert(&wallet.address, wallet.secret.clone());
        }
        resolver
    }

    pub fn insert(&mut self, address: &str, secret: Option<String>) {
        self.secrets.insert(account_key(address), secret);
    }
}

#[async_trait]
impl WalletResolver for StaticWalletResolver {
    async fn resolve_credentials(&self, order: &Order) -> ChainResult<WalletCredentials> {
        let secret = self
            .secrets
            .get(&account_key(&order.execution_wallet))
            .cloned()
            .flatten();
        Ok(WalletCredentials {
            address: order.execution_wallet.clone(),
            secret,
        })
    }
}

/// Records every transaction instead of sending it
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    keys: HashMap<String, String>,
    sent: Mutex<Vec<TransactionDescriptor>>,
    failures: Mutex<VecDeque<ChainError>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(paper: &PaperConfig) -> Self {
        let mut submitter = Self::new();
        for wallet in &paper.wallets {
            if let Some(secret) = &wallet.secret {
                submitter.add_key(secret, &wallet.address);
            }
        }
        submitter
    }

    /// Declare which address a secret signs for
    pub fn add_key(&mut self, secret: &str, address: &str) {
        self.keys.insert(secret.to_string(), address.to_string());
    }

    pub async fn fail_next(&self, error: ChainError) {
        self.failures.lock().await.push_back(error);
    }

    pub async fn sent(&self) -> Vec<TransactionDescriptor> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl TransactionSubmitter for RecordingSubmitter {
    async fn derive_address(&self, secret: &str) -> ChainResult<String> {
        self.keys
            .get(secret)
            .cloned()
            .ok_or_else(|| ChainError::InvalidAddress("secret does not map to a wallet".to_string()))
    }

    async fn submit(&self, _secret: &str, transaction: &TransactionDescriptor) -> ChainResult<bool> {
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        log::info!(
            "[paper] {} units -> {} (valid until {})",
            transaction.amount_units,
            transaction.destination,
            transaction.valid_until
        );
        self.sent.lock().await.push(transaction.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PaperReserves, PaperWallet};
    use rust_decimal_macros::dec;

    const WALLET: &str = "EQDDPaGliaA_hmEsGv_gZBXqS6pk9R8_I5nZfgADYkXPYH94";
    const POOL: &str = "EQCsgKK0mn7qY30BE8ACZAlfXJ7w5DJq0r9IX49sWg-z-opY";
    const USDT: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";

    #[tokio::test]
    async fn chain_seeds_from_display_amounts() {
        let config = Config::default();
        let mut paper = PaperConfig::default();
        paper.reserves.insert(
            POOL.to_string(),
            PaperReserves {
                from: dec!(1000),
                to: dec!(1800),
            },
        );
        let mut jettons = HashMap::new();
        jettons.insert(USDT.to_string(), dec!(25.5));
        paper.wallets.push(PaperWallet {
            address: WALLET.to_string(),
            secret: Some("k1".to_string()),
            native_balance: dec!(2),
            jetton_balances: jettons,
        });

        let chain = PaperChain::from_config(&paper, &config.pools);
        assert_eq!(
            chain.get_reserves(POOL).await.unwrap(),
            (1_000_000_000_000, 1_800_000_000)
        );
        assert_eq!(chain.get_balance(WALLET).await.unwrap(), 2_000_000_000);
        assert_eq!(chain.get_jetton_balance(WALLET, USDT).await.unwrap(), 25_500_000);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let chain = PaperChain::new();
        chain.set_balance(WALLET, 5).await;
        chain.fail_next(ChainError::Timeout("rpc".into())).await;
        assert!(chain.get_balance(WALLET).await.is_err());
        assert_eq!(chain.get_balance(WALLET).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn store_upserts_and_filters() {
        let store = MemoryOrderStore::new();
        let mut record = OrderRecord {
            id: "order_1".into(),
            symbol: "TON-USDT".into(),
            status: "PENDING".into(),
            ..Default::default()
        };
        store.save_order(&record).await.unwrap();
        record.status = "FILLED".into();
        store.save_order(&record).await.unwrap();

        assert_eq!(store.load_orders(None).await.unwrap().len(), 1);
        assert!(store
            .load_orders(Some(&OrderFilter::live()))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn submitter_derives_only_known_keys() {
        let mut submitter = RecordingSubmitter::new();
        submitter.add_key("k1", WALLET);
        assert_eq!(submitter.derive_address("k1").await.unwrap(), WALLET);
        assert!(submitter.derive_address("other").await.is_err());
    }
}
