// src/trading/pools.rs
use crate::chain::ChainClient;
use crate::domain::errors::{ChainError, ExecutionError, ExecutionResult, QuoteError};
use crate::domain::models::Pool;
use crate::trading::quote::pool_price;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

/// Configured pools per trading pair
#[derive(Debug, Clone, Default)]
pub struct PoolBook {
    pools: HashMap<String, Vec<Pool>>,
}

impl PoolBook {
    pub fn new(pools: HashMap<String, Vec<Pool>>) -> Self {
        Self { pools }
    }

    pub fn pools_for(&self, symbol: &str) -> &[Pool] {
        self.pools.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Price source of the pair
    pub fn primary(&self, symbol: &str) -> ExecutionResult<&Pool> {
        self.pools_for(symbol)
            .first()
            .ok_or_else(|| ExecutionError::PoolNotFound(symbol.to_string()))
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.pools.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Reserves with a deadline
    pub async fn reserves(
        &self,
        chain: &dyn ChainClient,
        pool: &Pool,
        limit: Duration,
    ) -> ExecutionResult<(u128, u128)> {
        match timeout(limit, chain.get_reserves(&pool.address)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ChainError::Timeout(format!("get_reserves {}", pool.address)).into()),
        }
    }

    /// Current price of the pair from its primary pool
    pub async fn price(
        &self,
        chain: &dyn ChainClient,
        symbol: &str,
        limit: Duration,
    ) -> ExecutionResult<Decimal> {
        let pool = self.primary(symbol)?;
        let reserves = self.reserves(chain, pool, limit).await?;
        pool_price(pool, reserves)
            .ok_or_else(|| QuoteError::ZeroReserves(pool.address.clone()).into())
    }

    /// Pool whose price sits closest to `targets`; the first pool when
    /// nothing can be compared
    pub async fn select(
        &self,
        chain: &dyn ChainClient,
        symbol: &str,
        targets: &[Decimal],
        limit: Duration,
    ) -> ExecutionResult<Pool> {
        let candidates = self.pools_for(symbol);
        let first = self.primary(symbol)?;
        if candidates.len() == 1 || targets.is_empty() {
            return Ok(first.clone());
        }

        let mut best: Option<(Decimal, &Pool)> = None;
        for pool in candidates {
            let reserves = match self.reserves(chain, pool, limit).await {
                Ok(reserves) => reserves,
                Err(e) => {
                    log::warn!("Skipping pool {} during selection: {}", pool.address, e);
                    continue;
                }
            };
            let Some(price) = pool_price(pool, reserves) else {
                continue;
            };
            let distance: Decimal = targets.iter().map(|t| (price - *t).abs()).sum();
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, pool));
            }
        }

        let chosen = best.map(|(_, p)| p).unwrap_or(first);
        log::debug!("Selected pool {} ({}) for {}", chosen.address, chosen.dex, symbol);
        Ok(chosen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::paper::PaperChain;
    use crate::config::Config;
    use rust_decimal_macros::dec;

    const SECOND_POOL: &str = "EQDa4VOnTYlLvDJ0gZjNYm5PXfSmmtL6Vs6A_CZEtXCNICq_";

    fn book() -> (PoolBook, Pool, Pool) {
        let mut pools = Config::default().pools;
        let list = pools.get_mut("TON-USDT").unwrap();
        let mut second = list[0].clone();
        second.address = SECOND_POOL.to_string();
        second.dex = "StonFi".to_string();
        list.push(second.clone());
        let first = list[0].clone();
        (PoolBook::new(pools), first, second)
    }

    #[tokio::test]
    async fn selects_the_closest_price() {
        let (book, first, second) = book();
        let chain = PaperChain::new();
        chain.set_reserves(&first.address, 1_000_000_000_000, 1_800_000_000).await;
        chain.set_reserves(&second.address, 1_000_000_000_000, 2_100_000_000).await;

        let limit = Duration::from_secs(1);
        let picked = book.select(&chain, "TON-USDT", &[dec!(2.05)], limit).await.unwrap();
        assert_eq!(picked.address, second.address);
        let picked = book.select(&chain, "TON-USDT", &[dec!(1.7), dec!(1.9)], limit).await.unwrap();
        assert_eq!(picked.address, first.address);
        assert_eq!(book.price(&chain, "TON-USDT", limit).await.unwrap(), dec!(1.8));
    }

    #[tokio::test]
    async fn falls_back_to_the_first_pool() {
        let (book, first, _) = book();
        let chain = PaperChain::new();
        let picked = book
            .select(&chain, "TON-USDT", &[dec!(2)], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(picked.address, first.address);
        assert!(matches!(
            book.select(&chain, "BTC-USDT", &[], Duration::from_secs(1)).await,
            Err(ExecutionError::PoolNotFound(_))
        ));
    }
}
