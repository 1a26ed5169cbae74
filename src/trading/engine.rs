// src/trading/engine.rs
use crate::chain::{OrderFilter, OrderStore};
use crate::config::{Config, EngineConfig};
use crate::domain::errors::{AppError, AppResult, ExecutionResult, OrderError, OrderResult};
use crate::domain::models::{
    Order, OrderStatus, Quote, SwapDirection, TrailingConfig, TrailingType,
};
use crate::domain::record::OrderRecord;
use crate::protocol::{from_units, NATIVE_DECIMALS};
use crate::trading::execution::SwapOrchestrator;
use crate::trading::processor::OrderProcessor;
use crate::trading::validation::{apply_update, validate_trailing, NewOrder, OrderUpdate};
use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;

/// Order API plus the polling loop.
///
/// Every mutation of live orders goes through the processor mutex, so an
/// API call waits for an in-flight tick to finish before it is applied.
/// Orders whose save failed are held in `unsaved` until a cycle stores them.
pub struct OrderEngine {
    config: EngineConfig,
    processor: Mutex<OrderProcessor>,
    unsaved: Mutex<HashMap<String, Order>>,
    store: Arc<dyn OrderStore>,
    orchestrator: Arc<SwapOrchestrator>,
    stop_tx: watch::Sender<bool>,
}

impl OrderEngine {
    pub fn new(config: &Config, store: Arc<dyn OrderStore>, orchestrator: Arc<SwapOrchestrator>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config: config.engine.clone(),
            processor: Mutex::new(OrderProcessor::new()),
            unsaved: Mutex::new(HashMap::new()),
            store,
            orchestrator,
            stop_tx,
        }
    }

    fn new_order_id() -> String {
        let suffix = uuid::Uuid::new_v4().as_u128() % 10_000;
        format!("order_{}_{:04}", Utc::now().timestamp(), suffix)
    }

    async fn persist(&self, order: &Order) -> OrderResult<()> {
        let saved = self.store.save_order(&OrderRecord::from_order(order)).await?;
        if !saved {
            log::warn!("Order store declined to save {}", order.id);
        }
        Ok(())
    }

    /// Save an order; on failure keep it for the next cycle to retry
    async fn persist_or_retry(&self, order: &Order) -> OrderResult<()> {
        match self.persist(order).await {
            Ok(()) => {
                let mut unsaved = self.unsaved.lock().await;
                if unsaved.get(&order.id) == Some(order) {
                    unsaved.remove(&order.id);
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to save order {}, will retry: {}", order.id, e);
                self.unsaved
                    .lock()
                    .await
                    .insert(order.id.clone(), order.clone());
                Err(e)
            }
        }
    }

    /// Retry every save that failed earlier
    async fn flush_unsaved(&self) -> OrderResult<()> {
        let pending: Vec<Order> = self.unsaved.lock().await.values().cloned().collect();
        let mut last_error = None;
        for order in pending {
            if let Err(e) = self.persist_or_retry(&order).await {
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    async fn current_price(&self, symbol: &str) -> ExecutionResult<Decimal> {
        self.orchestrator
            .pools()
            .price(self.orchestrator.chain(), symbol, self.config.call_timeout())
            .await
    }

    /// Build a validated order; its creation price is the pair's current price
    async fn prepare(&self, new: NewOrder) -> OrderResult<Order> {
        let mut order = new.into_order(&Self::new_order_id(), self.config.default_slippage, Utc::now())?;
        if self.orchestrator.pools().pools_for(&order.symbol).is_empty() {
            return Err(OrderError::Validation(format!("no pool configured for {}", order.symbol)));
        }
        match self.current_price(&order.symbol).await {
            Ok(price) => order.price_at_creation = Some(price),
            Err(e) => log::warn!(
                "No creation price for {} ({}); the first tick will record one",
                order.id,
                e
            ),
        }
        Ok(order)
    }

    /// Store and index new orders, activating them right away when funded
    async fn admit(&self, orders: Vec<Order>) -> OrderResult<Vec<Order>> {
        for order in &orders {
            self.persist(order).await?;
            log::info!(
                "Order {} created: {} {} {} {}",
                order.id,
                order.side,
                order.kind,
                order.quantity,
                order.symbol
            );
        }
        {
            let mut processor = self.processor.lock().await;
            for order in &orders {
                processor.add_order(order.clone());
            }
        }
        self.check_funding().await;

        let processor = self.processor.lock().await;
        Ok(orders
            .iter()
            .map(|o| processor.get(&o.id).cloned().unwrap_or_else(|| o.clone()))
            .collect())
    }

    pub async fn create_order(&self, new: NewOrder) -> OrderResult<Order> {
        let order = self.prepare(new).await?;
        let mut admitted = self.admit(vec![order]).await?;
        admitted
            .pop()
            .ok_or_else(|| OrderError::Store("order was not admitted".to_string()))
    }

    /// Create a take-profit / stop-loss pair where a fill of one cancels the other
    pub async fn create_oco_pair(
        &self,
        take_profit: NewOrder,
        stop_loss: NewOrder,
    ) -> OrderResult<(Order, Order)> {
        if take_profit.symbol != stop_loss.symbol || take_profit.side != stop_loss.side {
            return Err(OrderError::Validation(
                "OCO legs must share symbol and side".to_string(),
            ));
        }
        let mut tp = self.prepare(take_profit).await?;
        let mut sl = self.prepare(stop_loss).await?;
        if tp.id == sl.id {
            sl.id = format!("{}_sl", sl.id);
        }
        let group_id = format!("oco_{}", uuid::Uuid::new_v4().simple());
        tp.oco_group_id = Some(group_id.clone());
        sl.oco_group_id = Some(group_id.clone());
        tp.oco_siblings = vec![sl.id.clone()];
        sl.oco_siblings = vec![tp.id.clone()];
        log::info!("OCO group {} links {} and {}", group_id, tp.id, sl.id);

        let mut admitted = self.admit(vec![tp, sl]).await?.into_iter();
        match (admitted.next(), admitted.next()) {
            (Some(tp), Some(sl)) => Ok((tp, sl)),
            _ => Err(OrderError::Store("OCO pair was not admitted".to_string())),
        }
    }

    /// Cancel a live order; OCO siblings stay live
    pub async fn cancel_order(&self, id: &str) -> OrderResult<Order> {
        let now = Utc::now();
        self.mutate(id, |order| order.cancel(now)).await
    }

    pub async fn update_order(&self, id: &str, update: OrderUpdate) -> OrderResult<Order> {
        self.mutate(id, |order| apply_update(order, &update)).await
    }

    pub async fn set_trailing_stop(
        &self,
        id: &str,
        trailing_type: TrailingType,
        distance: Decimal,
    ) -> OrderResult<Order> {
        validate_trailing(trailing_type, distance)?;
        self.mutate(id, |order| {
            order.trailing = Some(TrailingConfig::new(trailing_type, distance));
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, id: &str, change: F) -> OrderResult<Order>
    where
        F: FnOnce(&mut Order) -> OrderResult<()>,
    {
        let result = {
            let mut processor = self.processor.lock().await;
            processor.modify(id, change)
        };
        match result {
            Ok(order) => {
                self.persist_or_retry(&order).await?;
                log::info!("Order {} updated ({})", order.id, order.status);
                Ok(order)
            }
            Err(OrderError::NotFound(_)) => {
                // Not live: either terminal or unknown
                let stored = self.get_order(id).await?;
                Err(OrderError::Terminal(stored.id))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_order(&self, id: &str) -> OrderResult<Order> {
        if let Some(order) = self.processor.lock().await.get(id) {
            return Ok(order.clone());
        }
        if let Some(order) = self.unsaved.lock().await.get(id) {
            return Ok(order.clone());
        }
        self.store
            .load_orders(Some(&OrderFilter::by_id(id)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?
            .into_order()
    }

    /// Stored orders, with live in-memory state taking precedence
    pub async fn list_orders(&self, filter: Option<&OrderFilter>) -> OrderResult<Vec<Order>> {
        let records = self.store.load_orders(filter).await?;
        let processor = self.processor.lock().await;
        let unsaved = self.unsaved.lock().await;
        records
            .into_iter()
            .map(|record| match processor.get(&record.id).or_else(|| unsaved.get(&record.id)) {
                Some(newer) => Ok(newer.clone()),
                None => record.into_order(),
            })
            .collect()
    }

    /// Quote `amount` of the input side of `direction` on the pair's primary pool
    pub async fn compute_quote(
        &self,
        symbol: &str,
        direction: SwapDirection,
        amount: Decimal,
        slippage: Option<Decimal>,
    ) -> ExecutionResult<Quote> {
        let pools = self.orchestrator.pools();
        let pool = pools.primary(symbol)?;
        let reserves = pools
            .reserves(self.orchestrator.chain(), pool, self.config.call_timeout())
            .await?;
        let (view, view_reserves) = match direction {
            SwapDirection::BaseToQuote => (pool.clone(), reserves),
            SwapDirection::QuoteToBase => (pool.reversed(), (reserves.1, reserves.0)),
        };
        let slippage = slippage.unwrap_or(self.config.default_slippage);
        Ok(self.orchestrator.quotes().quote(&view, view_reserves, amount, slippage)?)
    }

    /// Index every PENDING and ACTIVE order from the store
    pub async fn load_live_orders(&self) -> OrderResult<usize> {
        let records = self.store.load_orders(Some(&OrderFilter::live())).await?;
        let mut processor = self.processor.lock().await;
        let mut loaded = 0;
        for record in records {
            let id = record.id.clone();
            match record.into_order() {
                Ok(order) => {
                    processor.add_order(order);
                    loaded += 1;
                }
                Err(e) => log::error!("Skipping stored order {}: {}", id, e),
            }
        }
        log::info!("Loaded {} live orders", loaded);
        Ok(loaded)
    }

    /// Move PENDING orders to ACTIVE once their execution wallet covers them.
    /// Returns the number of orders activated.
    pub async fn check_funding(&self) -> usize {
        let (pending, mut reserved) = {
            let processor = self.processor.lock().await;
            let mut pending: Vec<Order> = processor
                .orders()
                .filter(|o| o.status == OrderStatus::Pending)
                .cloned()
                .collect();
            pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            let mut reserved: HashMap<String, Decimal> = HashMap::new();
            for order in processor.orders().filter(|o| o.status == OrderStatus::Active) {
                *reserved.entry(order.execution_wallet.clone()).or_default() +=
                    order.quantity + self.config.funding_gas_reserve;
            }
            (pending, reserved)
        };
        if pending.is_empty() {
            return 0;
        }

        let mut balances: HashMap<String, Option<Decimal>> = HashMap::new();
        let mut activated = 0;
        for order in pending {
            if order.execution_wallet.is_empty() {
                log::warn!("Order {} has no execution wallet", order.id);
                continue;
            }
            let wallet = order.execution_wallet.clone();
            if !balances.contains_key(&wallet) {
                let balance = self.native_balance(&wallet).await;
                balances.insert(wallet.clone(), balance);
            }
            let Some(Some(balance)) = balances.get(&wallet).copied() else {
                continue;
            };

            let held = reserved.get(&wallet).copied().unwrap_or_default();
            let needed = order.quantity + self.config.funding_gas_reserve;
            if balance < held + needed {
                log::debug!(
                    "Order {} waits for funding: {} available, {} needed",
                    order.id,
                    balance - held,
                    needed
                );
                continue;
            }

            let now = Utc::now();
            let result = self.processor.lock().await.modify(&order.id, |o| o.activate(now));
            match result {
                Ok(active) => {
                    *reserved.entry(wallet).or_default() += needed;
                    activated += 1;
                    log::info!("Order {} funded and active", active.id);
                    // a failed save is queued for the next cycle
                    let _ = self.persist_or_retry(&active).await;
                }
                Err(e) => log::warn!("Order {} could not activate: {}", order.id, e),
            }
        }
        activated
    }

    async fn native_balance(&self, wallet: &str) -> Option<Decimal> {
        let chain = self.orchestrator.chain();
        match tokio::time::timeout(self.config.call_timeout(), chain.get_balance(wallet)).await {
            Ok(Ok(units)) => from_units(units, NATIVE_DECIMALS),
            Ok(Err(e)) => {
                log::warn!("Balance of {} unavailable: {}", wallet, e);
                None
            }
            Err(_) => {
                log::warn!("Balance of {} timed out", wallet);
                None
            }
        }
    }

    /// One polling cycle: pending saves, funding, prices, then a tick per symbol.
    /// Returns the orders that became terminal.
    ///
    /// Every symbol is ticked even when a save fails; the save error is
    /// returned once the cycle is over.
    pub async fn run_cycle(&self) -> AppResult<Vec<Order>> {
        // Step 1: saves left over from earlier cycles
        let mut save_error = self.flush_unsaved().await.err();

        // Step 2: funding
        self.check_funding().await;

        // Step 3: prices for every symbol with active orders, fetched together
        let symbols = self.processor.lock().await.active_symbols();
        if symbols.is_empty() {
            return match save_error {
                Some(e) => Err(AppError::Order(e)),
                None => Ok(Vec::new()),
            };
        }
        let prices = join_all(symbols.iter().map(|s| self.current_price(s))).await;

        // Step 4: ticks, one symbol at a time
        let mut finished = Vec::new();
        let mut last_error = None;
        let mut priced = 0;
        for (symbol, price) in symbols.iter().zip(prices) {
            let price = match price {
                Ok(price) => price,
                Err(e) => {
                    log::warn!("No price for {}: {}", symbol, e);
                    last_error = Some(e);
                    continue;
                }
            };
            priced += 1;
            log::debug!("Tick {} @ {}", symbol, price);

            let (done, changed) = {
                let mut processor = self.processor.lock().await;
                let done = processor
                    .process_tick(symbol, price, self.orchestrator.as_ref())
                    .await;
                (done, processor.take_dirty())
            };
            for order in done.iter().chain(changed.iter()) {
                if let Err(e) = self.persist_or_retry(order).await {
                    save_error = Some(e);
                }
            }
            finished.extend(done);
        }

        if priced == 0 {
            if let Some(e) = last_error {
                return Err(AppError::Execution(e));
            }
        }
        match save_error {
            Some(e) => Err(AppError::Order(e)),
            None => Ok(finished),
        }
    }

    /// Poll until `stop` is called. A failed cycle is logged and followed by
    /// a growing backoff; the loop itself never exits on an error.
    pub async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut failures: u32 = 0;
        log::info!(
            "Order engine running every {}ms",
            self.config.tick_interval_ms
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }
            let delay = match self.run_cycle().await {
                Ok(finished) => {
                    failures = 0;
                    if !finished.is_empty() {
                        log::info!("{} orders reached a final state", finished.len());
                    }
                    self.config.tick_interval()
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.backoff(failures);
                    log::error!(
                        "Polling cycle failed ({} in a row), retrying in {:?}: {}",
                        failures,
                        delay,
                        e
                    );
                    delay
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop_rx.changed() => {}
            }
        }
        log::info!("Order engine stopped");
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
