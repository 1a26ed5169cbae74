// src/domain/record.rs
//! Flat storage shape of an order. The engine works on `Order`; this is only
//! what crosses the store boundary.
use crate::domain::errors::{OrderError, OrderResult};
use crate::domain::models::{
    ExecutionType, Order, OrderKind, OrderSide, OrderStatus, PositionPhase, TrailingConfig,
    TrailingType,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    pub order_type: String,
    pub status: String,
    pub position_opened: bool,

    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub price_at_creation: Option<Decimal>,
    pub max_slippage: Decimal,

    pub trailing_type: Option<String>,
    pub trailing_distance: Option<Decimal>,
    pub trailing_extreme: Option<Decimal>,
    pub trailing_current_stop: Option<Decimal>,

    pub user_wallet: String,
    pub execution_wallet: String,
    pub wallet_secret_ref: Option<String>,

    pub oco_group_id: Option<String>,
    pub oco_related_ids: Vec<String>,

    pub execution_price: Option<Decimal>,
    pub execution_type: Option<String>,
    pub filled_quantity: Decimal,
    pub pnl: Option<Decimal>,
    pub execution_error: Option<String>,

    pub created_at: Option<DateTime<Utc>>,
    pub funded_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    pub fn from_order(order: &Order) -> Self {
        let trailing = order.trailing.as_ref();
        Self {
            id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side.as_str().to_string(),
            quantity: order.quantity,
            order_type: order.kind.as_str().to_string(),
            status: order.status.as_str().to_string(),
            position_opened: order.phase == PositionPhase::Opened,
            limit_price: order.limit_price,
            stop_price: order.stop_price,
            take_profit: order.take_profit,
            stop_loss: order.stop_loss,
            entry_price: order.entry_price,
            price_at_creation: order.price_at_creation,
            max_slippage: order.max_slippage,
            trailing_type: trailing.map(|t| t.trailing_type.as_str().to_string()),
            trailing_distance: trailing.map(|t| t.distance),
            trailing_extreme: trailing.and_then(|t| t.extreme),
            trailing_current_stop: trailing.and_then(|t| t.current_stop),
            user_wallet: order.user_wallet.clone(),
            execution_wallet: order.execution_wallet.clone(),
            wallet_secret_ref: order.wallet_secret_ref.clone(),
            oco_group_id: order.oco_group_id.clone(),
            oco_related_ids: order.oco_siblings.clone(),
            execution_price: order.execution_price,
            execution_type: order.execution_type.map(|t| t.as_str().to_string()),
            filled_quantity: order.filled_quantity,
            pnl: order.pnl,
            execution_error: order.execution_error.clone(),
            created_at: Some(order.created_at),
            funded_at: order.funded_at,
            opened_at: order.opened_at,
            filled_at: order.filled_at,
            cancelled_at: order.cancelled_at,
        }
    }

    /// Parse the stored strings back into the typed order
    pub fn into_order(self) -> OrderResult<Order> {
        if self.id.is_empty() {
            return Err(OrderError::Store("record without id".to_string()));
        }
        let side: OrderSide = self.side.parse()?;
        let kind: OrderKind = self.order_type.parse()?;
        let status: OrderStatus = self.status.parse()?;

        let trailing = match (self.trailing_type.as_deref(), self.trailing_distance) {
            (Some(t), Some(distance)) => Some(TrailingConfig {
                trailing_type: t.parse::<TrailingType>()?,
                distance,
                extreme: self.trailing_extreme,
                current_stop: self.trailing_current_stop,
            }),
            _ => None,
        };

        let execution_type = match self.execution_type.as_deref() {
            Some(t) => Some(t.parse::<ExecutionType>()?),
            None => None,
        };

        let phase = if self.position_opened || kind.is_exit_only() {
            PositionPhase::Opened
        } else {
            PositionPhase::AwaitingEntry
        };

        Ok(Order {
            id: self.id,
            symbol: self.symbol,
            user_wallet: self.user_wallet,
            execution_wallet: self.execution_wallet,
            wallet_secret_ref: self.wallet_secret_ref,
            side,
            kind,
            quantity: self.quantity,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            take_profit: self.take_profit,
            stop_loss: self.stop_loss,
            entry_price: self.entry_price,
            price_at_creation: self.price_at_creation,
            max_slippage: self.max_slippage,
            trailing,
            oco_group_id: self.oco_group_id,
            oco_siblings: self.oco_related_ids,
            status,
            phase,
            execution_price: self.execution_price,
            execution_type,
            filled_quantity: self.filled_quantity,
            pnl: self.pnl,
            execution_error: self.execution_error,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            funded_at: self.funded_at,
            opened_at: self.opened_at,
            filled_at: self.filled_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

impl From<&Order> for OrderRecord {
    fn from(order: &Order) -> Self {
        OrderRecord::from_order(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn opened_trailing_order_survives_the_store_boundary() {
        let mut order = Order::new("order_1_0001", "TON-USDT", OrderSide::Short, OrderKind::Limit, dec!(3));
        order.entry_price = Some(dec!(1.8));
        order.stop_loss = Some(dec!(1.9));
        order.trailing = Some(TrailingConfig {
            trailing_type: TrailingType::Percentage,
            distance: dec!(2),
            extreme: Some(dec!(1.7)),
            current_stop: Some(dec!(1.734)),
        });
        order.oco_group_id = Some("oco_1".into());
        order.oco_siblings = vec!["order_1_0002".into()];
        order.activate(Utc::now()).unwrap();
        order.open(dec!(1.8), Utc::now()).unwrap();

        let json = serde_json::to_string(&OrderRecord::from(&order)).unwrap();
        let restored: OrderRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.into_order().unwrap(), order);
    }

    #[test]
    fn legacy_record_with_missing_fields_loads() {
        let json = r#"{"id":"order_7","symbol":"TON-USDT","side":"long","quantity":"1","order_type":"limit","status":"active"}"#;
        let order: Order = serde_json::from_str::<OrderRecord>(json)
            .unwrap()
            .into_order()
            .unwrap();
        assert_eq!(order.side, OrderSide::Long);
        assert_eq!(order.phase, PositionPhase::AwaitingEntry);
        assert!(order.price_at_creation.is_none());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let record = OrderRecord {
            id: "x".into(),
            side: "LONG".into(),
            order_type: "LIMIT".into(),
            status: "HALF_FILLED".into(),
            ..Default::default()
        };
        assert!(record.into_order().is_err());
    }
}
