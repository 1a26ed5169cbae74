// src/domain/models.rs
use crate::domain::errors::{ExecutionError, OrderError, OrderResult, ProtocolError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Native asset marker used in token descriptors
pub const NATIVE_TOKEN: &str = "native";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Long,
    Short,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Long => "LONG",
            OrderSide::Short => "SHORT",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LONG" | "BUY" => Ok(OrderSide::Long),
            "SHORT" | "SELL" => Ok(OrderSide::Short),
            other => Err(OrderError::Validation(format!("unknown side '{}'", other))),
        }
    }
}

/// Order class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Limit,
    Market,
    StopLoss,
    TakeProfit,
    StopEntry,
    Oco,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Limit => "LIMIT",
            OrderKind::Market => "MARKET",
            OrderKind::StopLoss => "STOP_LOSS",
            OrderKind::TakeProfit => "TAKE_PROFIT",
            OrderKind::StopEntry => "STOP_ENTRY",
            OrderKind::Oco => "OCO",
        }
    }

    /// Exit-only classes protect an already held position and skip the entry phase
    pub fn is_exit_only(&self) -> bool {
        matches!(
            self,
            OrderKind::StopLoss | OrderKind::TakeProfit | OrderKind::Oco
        )
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LIMIT" => Ok(OrderKind::Limit),
            "MARKET" => Ok(OrderKind::Market),
            "STOP_LOSS" => Ok(OrderKind::StopLoss),
            "TAKE_PROFIT" => Ok(OrderKind::TakeProfit),
            "STOP_ENTRY" => Ok(OrderKind::StopEntry),
            "OCO" => Ok(OrderKind::Oco),
            other => Err(OrderError::Validation(format!("unknown order type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Active,
    Filled,
    Cancelled,
    Rejected,
    ExecutionFailed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::ExecutionFailed => "EXECUTION_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Active)
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Active => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "ACTIVE" => Ok(OrderStatus::Active),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXECUTION_FAILED" => Ok(OrderStatus::ExecutionFailed),
            other => Err(OrderError::Validation(format!("unknown status '{}'", other))),
        }
    }
}

/// Sub-state of an ACTIVE order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionPhase {
    AwaitingEntry,
    Opened,
}

/// Which rule fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Limit,
    Market,
    StopEntry,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::StopLoss => "STOP_LOSS",
            ExecutionType::TakeProfit => "TAKE_PROFIT",
            ExecutionType::TrailingStop => "TRAILING_STOP",
            ExecutionType::Limit => "LIMIT",
            ExecutionType::Market => "MARKET",
            ExecutionType::StopEntry => "STOP_ENTRY",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionType {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STOP_LOSS" => Ok(ExecutionType::StopLoss),
            "TAKE_PROFIT" => Ok(ExecutionType::TakeProfit),
            "TRAILING_STOP" => Ok(ExecutionType::TrailingStop),
            "LIMIT" => Ok(ExecutionType::Limit),
            "MARKET" => Ok(ExecutionType::Market),
            "STOP_ENTRY" => Ok(ExecutionType::StopEntry),
            other => Err(OrderError::Validation(format!(
                "unknown execution type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrailingType {
    Fixed,
    Percentage,
}

impl TrailingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrailingType::Fixed => "FIXED",
            TrailingType::Percentage => "PERCENTAGE",
        }
    }
}

impl FromStr for TrailingType {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FIXED" => Ok(TrailingType::Fixed),
            "PERCENTAGE" | "PERCENT" => Ok(TrailingType::Percentage),
            other => Err(OrderError::Validation(format!(
                "unknown trailing type '{}'",
                other
            ))),
        }
    }
}

/// Trailing stop state; `extreme` is the best price seen since the position opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    pub trailing_type: TrailingType,
    pub distance: Decimal,
    pub extreme: Option<Decimal>,
    pub current_stop: Option<Decimal>,
}

impl TrailingConfig {
    pub fn new(trailing_type: TrailingType, distance: Decimal) -> Self {
        Self {
            trailing_type,
            distance,
            extreme: None,
            current_stop: None,
        }
    }

    fn candidate(&self, extreme: Decimal, side: OrderSide) -> Decimal {
        let hundred = Decimal::ONE_HUNDRED;
        match (self.trailing_type, side) {
            (TrailingType::Fixed, OrderSide::Long) => extreme - self.distance,
            (TrailingType::Fixed, OrderSide::Short) => extreme + self.distance,
            (TrailingType::Percentage, OrderSide::Long) => {
                extreme * (Decimal::ONE - self.distance / hundred)
            }
            (TrailingType::Percentage, OrderSide::Short) => {
                extreme * (Decimal::ONE + self.distance / hundred)
            }
        }
    }

    /// Feed a new price. Returns true when the stop level moved.
    pub fn update(&mut self, price: Decimal, side: OrderSide) -> bool {
        let extreme = match (self.extreme, side) {
            (None, _) => price,
            (Some(e), OrderSide::Long) => e.max(price),
            (Some(e), OrderSide::Short) => e.min(price),
        };
        self.extreme = Some(extreme);

        let candidate = self.candidate(extreme, side);
        let improves = match (self.current_stop, side) {
            (None, _) => true,
            (Some(stop), OrderSide::Long) => candidate > stop,
            (Some(stop), OrderSide::Short) => candidate < stop,
        };
        if improves {
            self.current_stop = Some(candidate);
        }
        improves
    }

    pub fn is_triggered(&self, price: Decimal, side: OrderSide) -> bool {
        match (self.current_stop, side) {
            (Some(stop), OrderSide::Long) => price <= stop,
            (Some(stop), OrderSide::Short) => price >= stop,
            (None, _) => false,
        }
    }
}

/// A user trading intent and its execution record
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub user_wallet: String,
    pub execution_wallet: String,
    pub wallet_secret_ref: Option<String>,

    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub price_at_creation: Option<Decimal>,
    pub max_slippage: Decimal,
    pub trailing: Option<TrailingConfig>,

    pub oco_group_id: Option<String>,
    pub oco_siblings: Vec<String>,

    pub status: OrderStatus,
    pub phase: PositionPhase,

    pub execution_price: Option<Decimal>,
    pub execution_type: Option<ExecutionType>,
    pub filled_quantity: Decimal,
    pub pnl: Option<Decimal>,
    pub execution_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        id: &str,
        symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        quantity: Decimal,
    ) -> Self {
        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            user_wallet: String::new(),
            execution_wallet: String::new(),
            wallet_secret_ref: None,
            side,
            kind,
            quantity,
            limit_price: None,
            stop_price: None,
            take_profit: None,
            stop_loss: None,
            entry_price: None,
            price_at_creation: None,
            max_slippage: Decimal::ZERO,
            trailing: None,
            oco_group_id: None,
            oco_siblings: Vec::new(),
            status: OrderStatus::Pending,
            phase: if kind.is_exit_only() {
                PositionPhase::Opened
            } else {
                PositionPhase::AwaitingEntry
            },
            execution_price: None,
            execution_type: None,
            filled_quantity: Decimal::ZERO,
            pnl: None,
            execution_error: None,
            created_at: Utc::now(),
            funded_at: None,
            opened_at: None,
            filled_at: None,
            cancelled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_opened(&self) -> bool {
        self.status == OrderStatus::Active && self.phase == PositionPhase::Opened
    }

    pub fn is_awaiting_entry(&self) -> bool {
        self.status == OrderStatus::Active && self.phase == PositionPhase::AwaitingEntry
    }

    /// Whether anything will close the position once it is open
    pub fn has_exit_levels(&self) -> bool {
        self.stop_loss.is_some() || self.take_profit.is_some() || self.trailing.is_some()
    }

    /// Nominal price the position is valued from
    pub fn reference_price(&self) -> Option<Decimal> {
        self.entry_price.or(self.limit_price).or(self.stop_price)
    }

    /// Realized PnL at a nominal exit price
    pub fn pnl_at(&self, exit_price: Decimal) -> Option<Decimal> {
        let entry = self.reference_price()?;
        Some(match self.side {
            OrderSide::Long => (exit_price - entry) * self.quantity,
            OrderSide::Short => (entry - exit_price) * self.quantity,
        })
    }

    fn transition(&mut self, to: OrderStatus) -> OrderResult<()> {
        if self.is_terminal() {
            return Err(OrderError::Terminal(self.id.clone()));
        }
        if to.rank() < self.status.rank() {
            return Err(OrderError::Validation(format!(
                "order {} cannot move from {} back to {}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    /// PENDING -> ACTIVE once the execution wallet is funded
    pub fn activate(&mut self, now: DateTime<Utc>) -> OrderResult<()> {
        if self.status == OrderStatus::Active {
            return Ok(());
        }
        self.transition(OrderStatus::Active)?;
        self.funded_at = Some(now);
        if self.phase == PositionPhase::Opened && self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        Ok(())
    }

    /// Entry reached: the position is now held at `price`
    pub fn open(&mut self, price: Decimal, now: DateTime<Utc>) -> OrderResult<()> {
        if self.status != OrderStatus::Active {
            return Err(OrderError::Validation(format!(
                "order {} is {} and cannot open",
                self.id, self.status
            )));
        }
        self.phase = PositionPhase::Opened;
        self.opened_at = Some(now);
        if self.entry_price.is_none() {
            self.entry_price = Some(price);
        }
        self.execution_error = None;
        Ok(())
    }

    pub fn fill(
        &mut self,
        price: Decimal,
        execution_type: ExecutionType,
        pnl: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> OrderResult<()> {
        self.transition(OrderStatus::Filled)?;
        self.execution_price = Some(price);
        self.execution_type = Some(execution_type);
        self.filled_quantity = self.quantity;
        self.pnl = pnl;
        self.execution_error = None;
        self.filled_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> OrderResult<()> {
        self.transition(OrderStatus::Cancelled)?;
        self.cancelled_at = Some(now);
        Ok(())
    }

    pub fn reject(&mut self, reason: &str) -> OrderResult<()> {
        self.transition(OrderStatus::Rejected)?;
        self.execution_error = Some(reason.to_string());
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> OrderResult<()> {
        self.transition(OrderStatus::ExecutionFailed)?;
        self.execution_error = Some(reason.to_string());
        Ok(())
    }
}

/// Token side of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    /// Jetton master address, or `native` for the chain's own coin
    pub address: String,
    pub decimals: u32,
}

impl TokenInfo {
    pub fn is_native(&self) -> bool {
        self.address.eq_ignore_ascii_case(NATIVE_TOKEN)
    }
}

/// A liquidity pool; reserves are always fetched fresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub address: String,
    pub dex: String,
    pub from_token: TokenInfo,
    pub to_token: TokenInfo,
}

impl Pool {
    /// Same pool with the swap roles exchanged
    pub fn reversed(&self) -> Pool {
        Pool {
            address: self.address.clone(),
            dex: self.dex.clone(),
            from_token: self.to_token.clone(),
            to_token: self.from_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dex {
    DeDust,
    StonFi,
}

impl Dex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dex::DeDust => "DeDust",
            Dex::StonFi => "StonFi",
        }
    }
}

impl fmt::Display for Dex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dex {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "dedust" => Ok(Dex::DeDust),
            "stonfi" => Ok(Dex::StonFi),
            _ => Err(ProtocolError::UnsupportedVenue(s.to_string())),
        }
    }
}

/// Constant-product quote, immutable once produced
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub pool_address: String,
    pub amount_in: Decimal,
    pub amount_in_units: u128,
    pub output: Decimal,
    pub output_units: u128,
    pub min_output: Decimal,
    pub min_output_units: u128,
    pub effective_price: Decimal,
    pub slippage: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAction {
    Open,
    Close,
}

/// Base = pool `from` token, quote = pool `to` token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    BaseToQuote,
    QuoteToBase,
}

impl SwapDirection {
    pub fn resolve(side: OrderSide, action: SwapAction) -> Self {
        match (side, action) {
            (OrderSide::Long, SwapAction::Open) => SwapDirection::QuoteToBase,
            (OrderSide::Long, SwapAction::Close) => SwapDirection::BaseToQuote,
            (OrderSide::Short, SwapAction::Open) => SwapDirection::BaseToQuote,
            (OrderSide::Short, SwapAction::Close) => SwapDirection::QuoteToBase,
        }
    }
}

impl fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SwapDirection::BaseToQuote => write!(f, "base->quote"),
            SwapDirection::QuoteToBase => write!(f, "quote->base"),
        }
    }
}

/// Signing material for an execution wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletCredentials {
    pub address: String,
    pub secret: Option<String>,
}

/// Message handed to the submitter
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDescriptor {
    pub destination: String,
    pub amount: Decimal,
    pub amount_units: u128,
    /// Base64 bag of cells
    pub payload: String,
    pub valid_until: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapDetails {
    pub direction: SwapDirection,
    pub from_symbol: String,
    pub to_symbol: String,
    pub amount_in: Decimal,
    pub expected_output: Decimal,
    pub min_output: Decimal,
    pub slippage: Decimal,
    pub gas: Decimal,
    pub net_amount: Decimal,
}

/// Outcome of one orchestrated swap attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SwapExecutionResult {
    pub success: bool,
    pub transient: bool,
    pub message: String,
    pub transaction: Option<TransactionDescriptor>,
    pub details: Option<SwapDetails>,
}

impl SwapExecutionResult {
    pub fn submitted(message: String, transaction: TransactionDescriptor, details: SwapDetails) -> Self {
        Self {
            success: true,
            transient: false,
            message,
            transaction: Some(transaction),
            details: Some(details),
        }
    }

    pub fn failed(error: &ExecutionError) -> Self {
        Self {
            success: false,
            transient: error.is_transient(),
            message: error.to_string(),
            transaction: None,
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_states_are_final() {
        let mut order = Order::new("o1", "TON-USDT", OrderSide::Long, OrderKind::Limit, dec!(1));
        order.activate(Utc::now()).unwrap();
        order.cancel(Utc::now()).unwrap();

        assert!(order.activate(Utc::now()).is_err());
        assert!(order.fill(dec!(2), ExecutionType::Limit, None, Utc::now()).is_err());
        assert!(order.fail("late").is_err());
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn trailing_long_only_ratchets_up() {
        let mut trailing = TrailingConfig::new(TrailingType::Fixed, dec!(0.1));
        let mut last = None;
        for price in [dec!(2.0), dec!(2.2), dec!(2.1), dec!(1.9), dec!(2.3)] {
            trailing.update(price, OrderSide::Long);
            if let (Some(prev), Some(now)) = (last, trailing.current_stop) {
                assert!(now >= prev);
            }
            last = trailing.current_stop;
        }
        assert_eq!(trailing.current_stop, Some(dec!(2.2)));
        assert!(trailing.is_triggered(dec!(2.2), OrderSide::Long));
    }

    #[test]
    fn trailing_short_percentage_ratchets_down() {
        let mut trailing = TrailingConfig::new(TrailingType::Percentage, dec!(10));
        trailing.update(dec!(2.0), OrderSide::Short);
        assert_eq!(trailing.current_stop, Some(dec!(2.2)));
        assert!(!trailing.update(dec!(2.1), OrderSide::Short));
        assert!(trailing.update(dec!(1.5), OrderSide::Short));
        assert_eq!(trailing.current_stop, Some(dec!(1.65)));
    }

    #[test]
    fn swap_direction_table() {
        use SwapAction::*;
        assert_eq!(SwapDirection::resolve(OrderSide::Long, Open), SwapDirection::QuoteToBase);
        assert_eq!(SwapDirection::resolve(OrderSide::Long, Close), SwapDirection::BaseToQuote);
        assert_eq!(SwapDirection::resolve(OrderSide::Short, Open), SwapDirection::BaseToQuote);
        assert_eq!(SwapDirection::resolve(OrderSide::Short, Close), SwapDirection::QuoteToBase);
    }

    #[test]
    fn dex_identifiers() {
        assert_eq!("DeDust".parse::<Dex>().unwrap(), Dex::DeDust);
        assert_eq!("ston.fi".parse::<Dex>().unwrap(), Dex::StonFi);
        assert!(matches!(
            "Uniswap".parse::<Dex>(),
            Err(ProtocolError::UnsupportedVenue(_))
        ));
    }
}
