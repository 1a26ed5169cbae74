// src/trading/validation.rs
use crate::domain::errors::{OrderError, OrderResult};
use crate::domain::models::{
    Order, OrderKind, OrderSide, OrderStatus, TrailingConfig, TrailingType,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "order_type")]
    pub kind: OrderKind,
    pub quantity: Decimal,
    #[serde(default)]
    pub user_wallet: String,
    #[serde(default)]
    pub execution_wallet: String,
    #[serde(default)]
    pub wallet_secret_ref: Option<String>,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub max_slippage: Option<Decimal>,
    #[serde(default)]
    pub trailing_type: Option<TrailingType>,
    #[serde(default)]
    pub trailing_distance: Option<Decimal>,
}

impl NewOrder {
    pub fn new(symbol: &str, side: OrderSide, kind: OrderKind, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind,
            quantity,
            user_wallet: String::new(),
            execution_wallet: String::new(),
            wallet_secret_ref: None,
            limit_price: None,
            stop_price: None,
            take_profit: None,
            stop_loss: None,
            entry_price: None,
            max_slippage: None,
            trailing_type: None,
            trailing_distance: None,
        }
    }

    /// Validate and build a PENDING order
    pub fn into_order(
        self,
        id: &str,
        default_slippage: Decimal,
        now: DateTime<Utc>,
    ) -> OrderResult<Order> {
        validate_new(&self)?;
        let (stop_loss, take_profit) = exit_levels(&self);

        let mut order = Order::new(id, &self.symbol, self.side, self.kind, self.quantity);
        order.user_wallet = self.user_wallet;
        order.execution_wallet = self.execution_wallet;
        order.wallet_secret_ref = self.wallet_secret_ref;
        order.entry_price = self.entry_price;
        order.max_slippage = self.max_slippage.unwrap_or(default_slippage);
        order.created_at = now;

        // Exit-only classes may carry their level in the generic price fields
        order.stop_loss = stop_loss;
        order.take_profit = take_profit;
        order.limit_price = self.limit_price.filter(|_| {
            !(self.kind == OrderKind::TakeProfit && self.take_profit.is_none())
        });
        order.stop_price = self.stop_price.filter(|_| {
            !(self.kind == OrderKind::StopLoss && self.stop_loss.is_none())
        });

        if let (Some(trailing_type), Some(distance)) = (self.trailing_type, self.trailing_distance) {
            order.trailing = Some(TrailingConfig::new(trailing_type, distance));
        }
        Ok(order)
    }
}

/// Changes accepted on a live order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderUpdate {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub max_slippage: Option<Decimal>,
}

fn invalid<T>(message: String) -> OrderResult<T> {
    Err(OrderError::Validation(message))
}

fn positive(name: &str, value: Option<Decimal>) -> OrderResult<()> {
    match value {
        Some(v) if v <= Decimal::ZERO => invalid(format!("{} must be positive, got {}", name, v)),
        _ => Ok(()),
    }
}

pub fn validate_slippage(slippage: Decimal) -> OrderResult<()> {
    if slippage < Decimal::ZERO || slippage >= Decimal::ONE_HUNDRED {
        return invalid(format!("slippage {}% outside [0, 100)", slippage));
    }
    Ok(())
}

pub fn validate_trailing(trailing_type: TrailingType, distance: Decimal) -> OrderResult<()> {
    if distance <= Decimal::ZERO {
        return invalid(format!("trailing distance must be positive, got {}", distance));
    }
    if trailing_type == TrailingType::Percentage && distance >= Decimal::ONE_HUNDRED {
        return invalid(format!("trailing percentage {} must be below 100", distance));
    }
    Ok(())
}

/// Stop-loss and take-profit must sit on the losing and winning side of the entry
pub fn validate_levels(
    side: OrderSide,
    entry: Option<Decimal>,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
) -> OrderResult<()> {
    let below = |low: Option<Decimal>, high: Option<Decimal>| match (low, high) {
        (Some(l), Some(h)) => l < h,
        _ => true,
    };
    let ok = match side {
        OrderSide::Long => {
            below(stop_loss, entry) && below(entry, take_profit) && below(stop_loss, take_profit)
        }
        OrderSide::Short => {
            below(take_profit, entry) && below(entry, stop_loss) && below(take_profit, stop_loss)
        }
    };
    if !ok {
        return invalid(format!(
            "{} levels out of order: stop_loss={:?} entry={:?} take_profit={:?}",
            side, stop_loss, entry, take_profit
        ));
    }
    Ok(())
}

pub fn validate_new(new: &NewOrder) -> OrderResult<()> {
    if new.symbol.trim().is_empty() {
        return invalid("symbol is required".to_string());
    }
    if new.quantity <= Decimal::ZERO {
        return invalid(format!("quantity must be positive, got {}", new.quantity));
    }
    positive("limit_price", new.limit_price)?;
    positive("stop_price", new.stop_price)?;
    positive("take_profit", new.take_profit)?;
    positive("stop_loss", new.stop_loss)?;
    positive("entry_price", new.entry_price)?;
    if let Some(slippage) = new.max_slippage {
        validate_slippage(slippage)?;
    }

    match new.kind {
        OrderKind::Limit if new.entry_price.is_none() && new.limit_price.is_none() => {
            return invalid("LIMIT orders need an entry or limit price".to_string());
        }
        OrderKind::StopEntry if new.stop_price.is_none() => {
            return invalid("STOP_ENTRY orders need a stop price".to_string());
        }
        OrderKind::StopLoss if new.stop_loss.is_none() && new.stop_price.is_none() => {
            return invalid("STOP_LOSS orders need a stop-loss or stop price".to_string());
        }
        OrderKind::TakeProfit if new.take_profit.is_none() && new.limit_price.is_none() => {
            return invalid("TAKE_PROFIT orders need a take-profit or limit price".to_string());
        }
        OrderKind::Oco if new.take_profit.is_none() || new.stop_loss.is_none() => {
            return invalid("OCO orders need both take-profit and stop-loss".to_string());
        }
        _ => {}
    }

    match (new.trailing_type, new.trailing_distance) {
        (Some(trailing_type), Some(distance)) => validate_trailing(trailing_type, distance)?,
        (None, None) => {}
        _ => return invalid("trailing stop needs both type and distance".to_string()),
    }

    let entry = match new.kind {
        kind if kind.is_exit_only() => new.entry_price,
        OrderKind::StopEntry => new.entry_price.or(new.stop_price),
        _ => new.entry_price.or(new.limit_price),
    };
    let (stop_loss, take_profit) = exit_levels(new);
    validate_levels(new.side, entry, stop_loss, take_profit)
}

/// Stop-loss and take-profit levels, including those given through the
/// generic price fields of STOP_LOSS and TAKE_PROFIT orders
fn exit_levels(new: &NewOrder) -> (Option<Decimal>, Option<Decimal>) {
    let stop_loss = match new.kind {
        OrderKind::StopLoss => new.stop_loss.or(new.stop_price),
        _ => new.stop_loss,
    };
    let take_profit = match new.kind {
        OrderKind::TakeProfit => new.take_profit.or(new.limit_price),
        _ => new.take_profit,
    };
    (stop_loss, take_profit)
}

/// Apply `update` to a live order, never moving it backward
pub fn apply_update(order: &mut Order, update: &OrderUpdate) -> OrderResult<()> {
    if order.is_terminal() {
        return Err(OrderError::Terminal(order.id.clone()));
    }
    positive("stop_loss", update.stop_loss)?;
    positive("take_profit", update.take_profit)?;

    if let Some(quantity) = update.quantity {
        if quantity <= Decimal::ZERO {
            return invalid(format!("quantity must be positive, got {}", quantity));
        }
        if quantity != order.quantity && order.is_opened() {
            return invalid(format!("order {} already holds a position", order.id));
        }
        if quantity > order.quantity && order.status == OrderStatus::Active {
            return invalid(format!(
                "order {} is funded for {}; place a new order to increase it",
                order.id, order.quantity
            ));
        }
    }
    if let Some(slippage) = update.max_slippage {
        validate_slippage(slippage)?;
    }

    let stop_loss = update.stop_loss.or(order.stop_loss);
    let take_profit = update.take_profit.or(order.take_profit);
    validate_levels(order.side, order.reference_price(), stop_loss, take_profit)?;

    order.stop_loss = stop_loss;
    order.take_profit = take_profit;
    if let Some(quantity) = update.quantity {
        order.quantity = quantity;
    }
    if let Some(slippage) = update.max_slippage {
        order.max_slippage = slippage;
    }
    Ok(())
}
