// src/trading/processor.rs
use crate::domain::errors::{OrderError, OrderResult};
use crate::domain::models::{
    ExecutionType, Order, OrderKind, OrderSide, OrderStatus, SwapAction, SwapExecutionResult,
};
use crate::trading::trigger;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// Runs the swap behind a triggered order
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute(&self, order: &Order, action: SwapAction) -> SwapExecutionResult;
}

/// Live order index plus OCO groups
#[derive(Debug, Default)]
pub struct OrderProcessor {
    orders: HashMap<String, Order>,
    oco_groups: HashMap<String, HashSet<String>>,
    dirty: HashSet<String>,
}

impl OrderProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an order and link it with the other members of its OCO group
    pub fn add_order(&mut self, mut order: Order) {
        if let Some(group_id) = order.oco_group_id.clone() {
            let members = self.oco_groups.entry(group_id).or_default();
            for member_id in members.iter() {
                if *member_id == order.id {
                    continue;
                }
                if !order.oco_siblings.contains(member_id) {
                    order.oco_siblings.push(member_id.clone());
                }
                if let Some(member) = self.orders.get_mut(member_id) {
                    if !member.oco_siblings.contains(&order.id) {
                        member.oco_siblings.push(order.id.clone());
                        self.dirty.insert(member_id.clone());
                    }
                }
            }
            members.insert(order.id.clone());
        }
        self.orders.insert(order.id.clone(), order);
    }

    /// Drop an order from both indices and from its siblings' links
    pub fn remove_order(&mut self, id: &str) -> Option<Order> {
        let order = self.orders.remove(id)?;
        for sibling_id in &order.oco_siblings {
            if let Some(sibling) = self.orders.get_mut(sibling_id) {
                sibling.oco_siblings.retain(|s| s != id);
                self.dirty.insert(sibling_id.clone());
            }
        }
        if let Some(group_id) = &order.oco_group_id {
            if let Some(members) = self.oco_groups.get_mut(group_id) {
                members.remove(id);
                if members.is_empty() {
                    self.oco_groups.remove(group_id);
                }
            }
        }
        self.dirty.remove(id);
        Some(order)
    }

    pub fn get(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn oco_group(&self, group_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .oco_groups
            .get(group_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Symbols with at least one ACTIVE order
    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Active)
            .map(|o| o.symbol.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        symbols.sort();
        symbols
    }

    /// Apply `change` to a live order; terminal results leave the index
    pub fn modify<F>(&mut self, id: &str, change: F) -> OrderResult<Order>
    where
        F: FnOnce(&mut Order) -> OrderResult<()>,
    {
        let order = self
            .orders
            .get_mut(id)
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;
        let mut updated = order.clone();
        change(&mut updated)?;
        *order = updated.clone();
        if updated.is_terminal() {
            self.remove_order(id);
        }
        Ok(updated)
    }

    /// Live orders whose state changed since the last call
    pub fn take_dirty(&mut self) -> Vec<Order> {
        let ids: Vec<String> = self.dirty.drain().collect();
        ids.iter().filter_map(|id| self.orders.get(id).cloned()).collect()
    }

    fn ids_where<F>(&self, symbol: &str, predicate: F) -> Vec<String>
    where
        F: Fn(&Order) -> bool,
    {
        let mut selected: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.symbol == symbol && predicate(o))
            .collect();
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        selected.into_iter().map(|o| o.id.clone()).collect()
    }

    /// Evaluate every ACTIVE order of `symbol` against `price`.
    /// Returns exactly the orders that became terminal during this call.
    pub async fn process_tick(
        &mut self,
        symbol: &str,
        price: Decimal,
        executor: &dyn OrderExecutor,
    ) -> Vec<Order> {
        let mut finished = Vec::new();
        let mut attempted: HashSet<String> = HashSet::new();

        // Step 1: OCO groups resolve first
        for id in self.ids_where(symbol, |o| o.oco_group_id.is_some() && o.is_opened()) {
            self.try_exit(&id, price, false, executor, &mut attempted, &mut finished)
                .await;
        }

        // Step 2: trailing stops catch up with this price
        for id in self.ids_where(symbol, |o| o.is_opened() && o.trailing.is_some()) {
            if let Some(order) = self.orders.get_mut(&id) {
                let side = order.side;
                if let Some(trailing) = order.trailing.as_mut() {
                    if trailing.update(price, side) {
                        log::debug!(
                            "Order {} trailing stop moved to {:?}",
                            id,
                            trailing.current_stop
                        );
                        self.dirty.insert(id.clone());
                    }
                }
            }
        }

        // Step 3: stop class
        for id in self.ids_where(symbol, |o| {
            o.is_opened() || (o.is_awaiting_entry() && o.kind == OrderKind::StopEntry)
        }) {
            if attempted.contains(&id) {
                continue;
            }
            let opened = match self.orders.get(&id) {
                Some(order) => order.is_opened(),
                None => continue,
            };
            if opened {
                self.try_exit(&id, price, true, executor, &mut attempted, &mut finished)
                    .await;
            } else {
                self.try_stop_entry(&id, price, executor, &mut finished).await;
            }
        }

        // Step 4: limit entries
        for id in self.ids_where(symbol, |o| o.is_awaiting_entry() && o.kind == OrderKind::Limit) {
            self.try_limit_entry(&id, price, executor, &mut finished).await;
        }

        // Step 5: market entries
        for id in self.ids_where(symbol, |o| o.is_awaiting_entry() && o.kind == OrderKind::Market) {
            self.try_market_entry(&id, price, executor, &mut finished).await;
        }

        finished
    }

    async fn try_exit(
        &mut self,
        id: &str,
        price: Decimal,
        include_trailing: bool,
        executor: &dyn OrderExecutor,
        attempted: &mut HashSet<String>,
        finished: &mut Vec<Order>,
    ) {
        let Some(order) = self.orders.get(id).cloned() else {
            return;
        };
        let Some((execution_type, level)) = trigger::exit_signal(&order, price, include_trailing)
        else {
            return;
        };
        attempted.insert(id.to_string());
        log::info!(
            "Order {} {} {} triggered at {} (level {})",
            order.id,
            order.side,
            execution_type,
            price,
            level
        );

        let result = executor.execute(&order, SwapAction::Close).await;
        if !result.success {
            self.record_failure(id, &result, finished);
            return;
        }
        let pnl = order.pnl_at(level);
        self.complete_fill(id, level, execution_type, pnl, finished);
    }

    async fn try_stop_entry(
        &mut self,
        id: &str,
        price: Decimal,
        executor: &dyn OrderExecutor,
        finished: &mut Vec<Order>,
    ) {
        let Some(order) = self.orders.get(id) else {
            return;
        };
        if !trigger::stop_entry_reached(order, price) {
            return;
        }
        let level = order.stop_price.unwrap_or(price);
        self.enter(id, level, ExecutionType::StopEntry, executor, finished)
            .await;
    }

    async fn try_limit_entry(
        &mut self,
        id: &str,
        price: Decimal,
        executor: &dyn OrderExecutor,
        finished: &mut Vec<Order>,
    ) {
        let Some(order) = self.orders.get_mut(id) else {
            return;
        };
        let Some(level) = trigger::entry_level(order) else {
            return;
        };
        let Some(created) = order.price_at_creation else {
            // Legacy record: the first observation becomes the reference
            order.price_at_creation = Some(price);
            self.dirty.insert(id.to_string());
            return;
        };
        if !trigger::entry_reached(order.side, created, level, order.max_slippage, price) {
            return;
        }
        log::info!(
            "Order {} {} entry {} reached at {}",
            order.id,
            order.side,
            level,
            price
        );
        self.enter(id, level, ExecutionType::Limit, executor, finished)
            .await;
    }

    async fn try_market_entry(
        &mut self,
        id: &str,
        price: Decimal,
        executor: &dyn OrderExecutor,
        finished: &mut Vec<Order>,
    ) {
        let Some(order) = self.orders.get_mut(id) else {
            return;
        };
        if trigger::market_slippage_exceeded(order, price) {
            let reason = format!(
                "market price {} outside {}% of limit {:?}",
                price, order.max_slippage, order.limit_price
            );
            if order.reject(&reason).is_ok() {
                log::warn!("Order {} rejected: {}", id, reason);
                self.finish(id, finished);
            }
            return;
        }
        self.enter(id, price, ExecutionType::Market, executor, finished)
            .await;
    }

    /// Entry reached. Shorts sell the base asset first; longs open at the
    /// nominal level. Orders without exit levels fill on entry.
    async fn enter(
        &mut self,
        id: &str,
        level: Decimal,
        execution_type: ExecutionType,
        executor: &dyn OrderExecutor,
        finished: &mut Vec<Order>,
    ) {
        let Some(order) = self.orders.get(id).cloned() else {
            return;
        };
        let fills_now = !order.has_exit_levels();
        let needs_swap = fills_now || order.side == OrderSide::Short;

        if needs_swap {
            let result = executor.execute(&order, SwapAction::Open).await;
            if !result.success {
                self.record_failure(id, &result, finished);
                return;
            }
        }

        if fills_now {
            self.complete_fill(id, level, execution_type, None, finished);
            return;
        }

        let now = Utc::now();
        if let Some(live) = self.orders.get_mut(id) {
            match live.open(level, now) {
                Ok(()) => {
                    log::info!("Order {} opened at {}", id, level);
                    self.dirty.insert(id.to_string());
                }
                Err(e) => log::error!("Order {} could not open: {}", id, e),
            }
        }
    }

    fn complete_fill(
        &mut self,
        id: &str,
        level: Decimal,
        execution_type: ExecutionType,
        pnl: Option<Decimal>,
        finished: &mut Vec<Order>,
    ) {
        let Some(order) = self.orders.get_mut(id) else {
            return;
        };
        match order.fill(level, execution_type, pnl, Utc::now()) {
            Ok(()) => {
                log::info!(
                    "Order {} filled by {} at {} (pnl {:?})",
                    id,
                    execution_type,
                    level,
                    pnl
                );
                self.finish(id, finished);
            }
            Err(e) => log::error!("Order {} could not fill: {}", id, e),
        }
    }

    fn record_failure(&mut self, id: &str, result: &SwapExecutionResult, finished: &mut Vec<Order>) {
        let Some(order) = self.orders.get_mut(id) else {
            return;
        };
        if result.transient {
            log::warn!("Order {} swap failed, retrying next tick: {}", id, result.message);
            order.execution_error = Some(result.message.clone());
            self.dirty.insert(id.to_string());
            return;
        }
        match order.fail(&result.message) {
            Ok(()) => {
                log::error!("Order {} execution failed: {}", id, result.message);
                self.finish(id, finished);
            }
            Err(e) => log::error!("Order {} could not be marked failed: {}", id, e),
        }
    }

    /// Move a terminal order out of the index; a fill cancels its OCO siblings
    fn finish(&mut self, id: &str, finished: &mut Vec<Order>) {
        let Some(order) = self.remove_order(id) else {
            return;
        };
        let filled = order.status == OrderStatus::Filled;
        let siblings = order.oco_siblings.clone();
        finished.push(order);

        if !filled {
            return;
        }
        let now = Utc::now();
        for sibling_id in siblings {
            let Some(mut sibling) = self.remove_order(&sibling_id) else {
                continue;
            };
            match sibling.cancel(now) {
                Ok(()) => {
                    log::info!("Order {} cancelled by OCO sibling {}", sibling_id, id);
                    finished.push(sibling);
                }
                Err(e) => log::error!("OCO sibling {} could not be cancelled: {}", sibling_id, e),
            }
        }
    }
}
