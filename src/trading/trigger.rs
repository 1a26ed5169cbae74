// src/trading/trigger.rs
//! Pure trigger rules. Nothing here mutates an order.
use crate::domain::models::{ExecutionType, Order, OrderKind, OrderSide};
use rust_decimal::Decimal;

/// How an entry level relates to where price was when the order was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryBand {
    BuyStop,
    BuyLimit,
    SellStop,
    SellLimit,
}

pub fn classify_entry(side: OrderSide, price_at_creation: Decimal, entry_price: Decimal) -> EntryBand {
    match side {
        OrderSide::Long if price_at_creation < entry_price => EntryBand::BuyStop,
        OrderSide::Long => EntryBand::BuyLimit,
        OrderSide::Short if price_at_creation > entry_price => EntryBand::SellStop,
        OrderSide::Short => EntryBand::SellLimit,
    }
}

/// Band check for an entry level. A price equal to the creation price never
/// counts as a new observation.
pub fn entry_reached(
    side: OrderSide,
    price_at_creation: Decimal,
    entry_price: Decimal,
    slippage_percent: Decimal,
    price: Decimal,
) -> bool {
    if price == price_at_creation {
        return false;
    }
    let tolerance = slippage_percent / Decimal::ONE_HUNDRED;
    let floor = entry_price * (Decimal::ONE - tolerance);
    let ceiling = entry_price * (Decimal::ONE + tolerance);

    match classify_entry(side, price_at_creation, entry_price) {
        EntryBand::BuyStop => price >= floor,
        EntryBand::BuyLimit => price <= ceiling,
        EntryBand::SellStop => price <= ceiling,
        EntryBand::SellLimit => price >= floor,
    }
}

/// Entry level of a limit-class order
pub fn entry_level(order: &Order) -> Option<Decimal> {
    order.entry_price.or(order.limit_price)
}

/// Stop-entry activation: price crossed the stop in the order's direction
pub fn stop_entry_reached(order: &Order, price: Decimal) -> bool {
    if order.kind != OrderKind::StopEntry {
        return false;
    }
    match (order.stop_price, order.side) {
        (Some(stop), OrderSide::Long) => price >= stop,
        (Some(stop), OrderSide::Short) => price <= stop,
        (None, _) => false,
    }
}

/// Market entry would fill worse than the limit allows
pub fn market_slippage_exceeded(order: &Order, price: Decimal) -> bool {
    let Some(limit) = order.limit_price else {
        return false;
    };
    let tolerance = order.max_slippage / Decimal::ONE_HUNDRED;
    match order.side {
        OrderSide::Long => price > limit * (Decimal::ONE + tolerance),
        OrderSide::Short => price < limit * (Decimal::ONE - tolerance),
    }
}

/// First exit rule that fires, with the nominal level it fires at
pub fn exit_signal(order: &Order, price: Decimal, include_trailing: bool) -> Option<(ExecutionType, Decimal)> {
    let side = order.side;
    if let Some(stop) = order.stop_loss {
        let hit = match side {
            OrderSide::Long => price <= stop,
            OrderSide::Short => price >= stop,
        };
        if hit {
            return Some((ExecutionType::StopLoss, stop));
        }
    }
    if include_trailing {
        if let Some(trailing) = &order.trailing {
            if let Some(stop) = trailing.current_stop {
                if trailing.is_triggered(price, side) {
                    return Some((ExecutionType::TrailingStop, stop));
                }
            }
        }
    }
    if let Some(target) = order.take_profit {
        let hit = match side {
            OrderSide::Long => price >= target,
            OrderSide::Short => price <= target,
        };
        if hit {
            return Some((ExecutionType::TakeProfit, target));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TrailingConfig, TrailingType};
    use rust_decimal_macros::dec;

    fn order(side: OrderSide, kind: OrderKind) -> Order {
        Order::new("o", "TON-USDT", side, kind, dec!(1))
    }

    #[test]
    fn bands_follow_creation_price() {
        assert_eq!(classify_entry(OrderSide::Long, dec!(1.79), dec!(1.80)), EntryBand::BuyStop);
        assert_eq!(classify_entry(OrderSide::Long, dec!(1.80), dec!(1.80)), EntryBand::BuyLimit);
        assert_eq!(classify_entry(OrderSide::Short, dec!(1.81), dec!(1.80)), EntryBand::SellStop);
        assert_eq!(classify_entry(OrderSide::Short, dec!(1.75), dec!(1.80)), EntryBand::SellLimit);
    }

    #[test]
    fn buy_stop_with_slippage() {
        let reached = |p| entry_reached(OrderSide::Long, dec!(1.79), dec!(1.80), dec!(1), p);
        assert!(!reached(dec!(1.79)));
        assert!(!reached(dec!(1.781)));
        assert!(reached(dec!(1.782)));
        assert!(reached(dec!(1.783)));
    }

    #[test]
    fn zero_slippage_needs_the_exact_level() {
        assert!(!entry_reached(OrderSide::Short, dec!(2.0), dec!(1.8), dec!(0), dec!(1.81)));
        assert!(entry_reached(OrderSide::Short, dec!(2.0), dec!(1.8), dec!(0), dec!(1.8)));
    }

    #[test]
    fn long_exits_use_nominal_levels() {
        let mut o = order(OrderSide::Long, OrderKind::Limit);
        o.stop_loss = Some(dec!(1.70));
        o.take_profit = Some(dec!(1.84));
        assert_eq!(exit_signal(&o, dec!(1.80), true), None);
        assert_eq!(exit_signal(&o, dec!(1.85), true), Some((ExecutionType::TakeProfit, dec!(1.84))));
        assert_eq!(exit_signal(&o, dec!(1.65), true), Some((ExecutionType::StopLoss, dec!(1.70))));
    }

    #[test]
    fn short_exits_invert() {
        let mut o = order(OrderSide::Short, OrderKind::Limit);
        o.stop_loss = Some(dec!(1.86));
        o.take_profit = Some(dec!(1.70));
        assert_eq!(exit_signal(&o, dec!(1.87), true), Some((ExecutionType::StopLoss, dec!(1.86))));
        assert_eq!(exit_signal(&o, dec!(1.69), true), Some((ExecutionType::TakeProfit, dec!(1.70))));
    }

    #[test]
    fn trailing_is_only_checked_when_asked() {
        let mut o = order(OrderSide::Long, OrderKind::Limit);
        let mut trailing = TrailingConfig::new(TrailingType::Fixed, dec!(0.05));
        trailing.update(dec!(2.0), OrderSide::Long);
        o.trailing = Some(trailing);
        assert_eq!(exit_signal(&o, dec!(1.94), false), None);
        assert_eq!(
            exit_signal(&o, dec!(1.94), true),
            Some((ExecutionType::TrailingStop, dec!(1.95)))
        );
    }

    #[test]
    fn stop_entry_and_market_guards() {
        let mut stop = order(OrderSide::Long, OrderKind::StopEntry);
        stop.stop_price = Some(dec!(2.0));
        assert!(!stop_entry_reached(&stop, dec!(1.99)));
        assert!(stop_entry_reached(&stop, dec!(2.0)));

        let mut market = order(OrderSide::Long, OrderKind::Market);
        market.limit_price = Some(dec!(1.80));
        market.max_slippage = dec!(1);
        assert!(!market_slippage_exceeded(&market, dec!(1.818)));
        assert!(market_slippage_exceeded(&market, dec!(1.819)));
    }
}
