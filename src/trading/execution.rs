// src/trading/execution.rs
use crate::chain::{ChainClient, TransactionSubmitter, WalletResolver};
use crate::config::{Config, VenueConfig};
use crate::domain::errors::{ChainError, ChainResult, ExecutionError, ExecutionResult, QuoteError};
use crate::domain::models::{
    Dex, Order, Pool, SwapAction, SwapDetails, SwapDirection, SwapExecutionResult,
    TransactionDescriptor, WalletCredentials,
};
use crate::protocol::address::same_account;
use crate::protocol::{from_units, to_units, SwapEncoder, SwapSource, NATIVE_DECIMALS};
use crate::trading::pools::PoolBook;
use crate::trading::processor::OrderExecutor;
use crate::trading::quote::{pool_price, QuoteEngine};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Turns a triggered order into a signed swap transfer.
///
/// Direction table (base = pool `from` token, quote = pool `to` token):
///
/// | side  | open         | close        |
/// |-------|--------------|--------------|
/// | LONG  | quote -> base | base -> quote |
/// | SHORT | base -> quote | quote -> base |
///
/// Base-side inputs are the order quantity; quote-side inputs are the
/// quantity valued at the order's reference price.
pub struct SwapOrchestrator {
    chain: Arc<dyn ChainClient>,
    wallets: Arc<dyn WalletResolver>,
    submitter: Arc<dyn TransactionSubmitter>,
    encoder: SwapEncoder,
    quotes: QuoteEngine,
    venues: VenueConfig,
    pools: PoolBook,
    call_timeout: Duration,
}

impl SwapOrchestrator {
    pub fn new(
        config: &Config,
        chain: Arc<dyn ChainClient>,
        wallets: Arc<dyn WalletResolver>,
        submitter: Arc<dyn TransactionSubmitter>,
    ) -> Self {
        Self {
            chain,
            wallets,
            submitter,
            encoder: SwapEncoder::new(config.venues.clone(), config.engine.deadline_secs),
            quotes: QuoteEngine::from_config(&config.engine),
            venues: config.venues.clone(),
            pools: PoolBook::new(config.pools.clone()),
            call_timeout: config.engine.call_timeout(),
        }
    }

    pub fn pools(&self) -> &PoolBook {
        &self.pools
    }

    pub fn quotes(&self) -> &QuoteEngine {
        &self.quotes
    }

    pub fn chain(&self) -> &dyn ChainClient {
        self.chain.as_ref()
    }

    /// Run one external call under the per-call deadline
    async fn call<T, F>(&self, what: &str, fut: F) -> ExecutionResult<T>
    where
        F: Future<Output = ChainResult<T>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ChainError::Timeout(format!(
                "{} after {}ms",
                what,
                self.call_timeout.as_millis()
            ))
            .into()),
        }
    }

    fn venue_gas(&self, dex: Dex) -> Decimal {
        match dex {
            Dex::DeDust => self.venues.dedust_swap_gas,
            Dex::StonFi => self.venues.stonfi_swap_gas,
        }
    }

    /// Execute the swap for `order`. Never returns an error: every failure is
    /// folded into the result with its transience.
    pub async fn execute_order_swap(
        &self,
        order: &Order,
        pool: &Pool,
        credentials: &WalletCredentials,
        slippage: Decimal,
        action: SwapAction,
    ) -> SwapExecutionResult {
        match self.try_swap(order, pool, credentials, slippage, action).await {
            Ok(result) => result,
            Err(e) => {
                if e.is_transient() {
                    log::warn!("Order {} swap attempt failed: {}", order.id, e);
                } else {
                    log::error!("Order {} swap failed permanently: {}", order.id, e);
                }
                SwapExecutionResult::failed(&e)
            }
        }
    }

    async fn try_swap(
        &self,
        order: &Order,
        pool: &Pool,
        credentials: &WalletCredentials,
        slippage: Decimal,
        action: SwapAction,
    ) -> ExecutionResult<SwapExecutionResult> {
        // Step 1: direction and oriented pool view
        let direction = SwapDirection::resolve(order.side, action);
        let reserves = self.pools.reserves(self.chain.as_ref(), pool, self.call_timeout).await?;
        let (view, view_reserves) = match direction {
            SwapDirection::BaseToQuote => (pool.clone(), reserves),
            SwapDirection::QuoteToBase => (pool.reversed(), (reserves.1, reserves.0)),
        };

        // Step 2: input amount in display units
        let amount = match direction {
            SwapDirection::BaseToQuote => order.quantity,
            SwapDirection::QuoteToBase => {
                let price = order
                    .reference_price()
                    .or_else(|| pool_price(pool, reserves))
                    .ok_or_else(|| QuoteError::ZeroReserves(pool.address.clone()))?;
                order.quantity * price
            }
        };

        // Step 3: venue
        let dex: Dex = pool.dex.parse()?;
        let source = SwapSource::of(&view.from_token);
        let wallet = credentials.address.as_str();

        // Step 4: balances
        match source {
            SwapSource::Native => {
                let required = amount + self.venue_gas(dex);
                let balance = self.native_balance(wallet).await?;
                if balance < required {
                    return Err(ExecutionError::InsufficientFunds(format!(
                        "need {} {} (incl. {} gas), have {}, short by {}",
                        required,
                        view.from_token.symbol,
                        self.venue_gas(dex),
                        balance,
                        required - balance
                    )));
                }
            }
            SwapSource::Jetton => {
                let floor = self.venues.native_gas_floor;
                let native = self.native_balance(wallet).await?;
                if native < floor {
                    return Err(ExecutionError::InsufficientFunds(format!(
                        "need {} native for gas, have {}, short by {}",
                        floor,
                        native,
                        floor - native
                    )));
                }
                let units = self
                    .call(
                        "get_jetton_balance",
                        self.chain.get_jetton_balance(wallet, &view.from_token.address),
                    )
                    .await?;
                let held = from_units(units, view.from_token.decimals).ok_or_else(|| {
                    QuoteError::Overflow(format!(
                        "{} balance of {} units",
                        view.from_token.symbol, units
                    ))
                })?;
                if held < amount {
                    return Err(ExecutionError::InsufficientFunds(format!(
                        "need {} {}, have {}, short by {}",
                        amount,
                        view.from_token.symbol,
                        held,
                        amount - held
                    )));
                }
            }
        }

        // Step 5: quote
        let quote = self.quotes.quote(&view, view_reserves, amount, slippage)?;
        if quote.min_output_units == 0 {
            return Err(QuoteError::ZeroOutput(format!(
                "min output of {} {} rounds to zero",
                amount, view.from_token.symbol
            ))
            .into());
        }

        // Step 6: destination and gas
        let (destination, gas) = match (source, dex) {
            (SwapSource::Native, Dex::DeDust) => {
                (self.venues.dedust_native_vault.clone(), self.venue_gas(dex))
            }
            (SwapSource::Native, Dex::StonFi) => {
                (self.venues.stonfi_proxy_ton.clone(), self.venue_gas(dex))
            }
            (SwapSource::Jetton, _) => {
                let jetton_wallet = self
                    .call(
                        "get_jetton_wallet",
                        self.chain.get_jetton_wallet(wallet, &view.from_token.address),
                    )
                    .await?;
                (jetton_wallet, self.venues.jetton_transfer_gas)
            }
        };

        // Step 7: payload and attached value
        let encoded = self.encoder.encode_swap(
            &pool.address,
            wallet,
            quote.amount_in_units,
            quote.min_output_units,
            &pool.dex,
            source,
        )?;
        let attached = match source {
            SwapSource::Native => quote.amount_in + gas,
            SwapSource::Jetton => gas,
        };
        let attached_units = to_units(attached, NATIVE_DECIMALS)
            .ok_or_else(|| QuoteError::Overflow(format!("attached value {}", attached)))?;
        let transaction = TransactionDescriptor {
            destination,
            amount: attached,
            amount_units: attached_units,
            payload: encoded.payload_base64(),
            valid_until: i64::from(encoded.valid_until),
        };

        // Step 8: signer must be the execution wallet
        let secret = credentials
            .secret
            .as_deref()
            .ok_or_else(|| ExecutionError::MissingCredentials(credentials.address.clone()))?;
        let derived = self
            .call("derive_address", self.submitter.derive_address(secret))
            .await?;
        let expected = if order.execution_wallet.is_empty() {
            credentials.address.as_str()
        } else {
            order.execution_wallet.as_str()
        };
        if !same_account(expected, &derived) {
            return Err(ExecutionError::WalletMismatch {
                expected: expected.to_string(),
                derived,
            });
        }

        // Step 9: submit
        let accepted = self
            .call("submit", self.submitter.submit(secret, &transaction))
            .await?;
        if !accepted {
            return Err(ChainError::Network("submitter did not accept the transaction".to_string()).into());
        }

        let fee_factor = Decimal::ONE - self.quotes.fee_percent() / Decimal::ONE_HUNDRED;
        let details = SwapDetails {
            direction,
            from_symbol: view.from_token.symbol.clone(),
            to_symbol: view.to_token.symbol.clone(),
            amount_in: quote.amount_in,
            expected_output: quote.output,
            min_output: quote.min_output,
            slippage,
            gas,
            net_amount: quote.amount_in * fee_factor,
        };
        let message = format!(
            "{} {} {} -> {} {} (min {}) via {}",
            direction,
            details.amount_in,
            details.from_symbol,
            details.expected_output,
            details.to_symbol,
            details.min_output,
            dex
        );
        log::info!("Order {} swap submitted: {}", order.id, message);

        Ok(SwapExecutionResult::submitted(message, transaction, details))
    }

    async fn native_balance(&self, wallet: &str) -> ExecutionResult<Decimal> {
        let units = self.call("get_balance", self.chain.get_balance(wallet)).await?;
        let balance = from_units(units, NATIVE_DECIMALS)
            .ok_or_else(|| QuoteError::Overflow(format!("native balance of {} units", units)))?;
        Ok(balance)
    }
}

#[async_trait]
impl OrderExecutor for SwapOrchestrator {
    async fn execute(&self, order: &Order, action: SwapAction) -> SwapExecutionResult {
        let targets: Vec<Decimal> = match action {
            SwapAction::Open => order.reference_price().into_iter().collect(),
            SwapAction::Close => [order.take_profit, order.stop_loss]
                .into_iter()
                .flatten()
                .collect(),
        };
        let pool = match self
            .pools
            .select(self.chain.as_ref(), &order.symbol, &targets, self.call_timeout)
            .await
        {
            Ok(pool) => pool,
            Err(e) => return SwapExecutionResult::failed(&e),
        };
        let credentials = match self
            .call("resolve_credentials", self.wallets.resolve_credentials(order))
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => return SwapExecutionResult::failed(&e),
        };
        self.execute_order_swap(order, &pool, &credentials, order.max_slippage, action)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::paper::{PaperChain, RecordingSubmitter, StaticWalletResolver};
    use crate::domain::models::{OrderKind, OrderSide, OrderStatus};
    use crate::protocol::decode_swap;
    use crate::protocol::schema::{SwapMessage, OP_JETTON_VAULT_SWAP};
    use crate::trading::processor::OrderProcessor;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    const POOL: &str = "EQCsgKK0mn7qY30BE8ACZAlfXJ7w5DJq0r9IX49sWg-z-opY";
    const USDT: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";
    const EXEC: &str = "EQDDPaGliaA_hmEsGv_gZBXqS6pk9R8_I5nZfgADYkXPYH94";
    const OTHER: &str = "EQAYqo4u7VF0fa4DPAebk4g9lBytj2VFny7pzXR0trjtXQaO";

    struct Harness {
        chain: Arc<PaperChain>,
        submitter: Arc<RecordingSubmitter>,
        orchestrator: SwapOrchestrator,
        pool: Pool,
    }

    async fn harness(signs_for: &str, secret: Option<&str>) -> Harness {
        let mut config = Config::default();
        config.venues.dedust_swap_gas = dec!(0.15);
        let pool = config.pools["TON-USDT"][0].clone();

        let chain = Arc::new(PaperChain::new());
        chain.set_reserves(POOL, 1_000_000_000_000_000, 1_800_000_000_000).await;

        let mut resolver = StaticWalletResolver::new();
        resolver.insert(EXEC, secret.map(str::to_string));
        let mut submitter = RecordingSubmitter::new();
        submitter.add_key("k1", signs_for);
        let submitter = Arc::new(submitter);

        let orchestrator = SwapOrchestrator::new(
            &config,
            chain.clone(),
            Arc::new(resolver),
            submitter.clone(),
        );
        Harness {
            chain,
            submitter,
            orchestrator,
            pool,
        }
    }

    fn order(side: OrderSide) -> Order {
        let mut order = Order::new("order_1", "TON-USDT", side, OrderKind::Limit, dec!(1.0));
        order.execution_wallet = EXEC.to_string();
        order.entry_price = Some(dec!(1.80));
        order.max_slippage = dec!(1);
        order
    }

    fn credentials(secret: Option<&str>) -> WalletCredentials {
        WalletCredentials {
            address: EXEC.to_string(),
            secret: secret.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn short_open_sends_native_to_the_vault() {
        let h = harness(EXEC, Some("k1")).await;
        h.chain.set_balance(EXEC, 5_000_000_000).await;

        let result = h
            .orchestrator
            .execute(&order(OrderSide::Short), SwapAction::Open)
            .await;
        assert!(result.success, "{}", result.message);

        let details = result.details.unwrap();
        assert_eq!(details.direction, SwapDirection::BaseToQuote);
        assert_eq!(details.from_symbol, "TON");
        assert!(details.min_output < details.expected_output);

        let sent = h.submitter.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(same_account(&sent[0].destination, crate::protocol::dedust::DEFAULT_NATIVE_VAULT));
        assert_eq!(sent[0].amount_units, 1_150_000_000);

        let payload = BASE64.decode(&sent[0].payload).unwrap();
        let message = decode_swap(&payload).unwrap();
        assert!(matches!(message, SwapMessage::NativeSwap { .. }));
        assert_eq!(message.amount(), 1_000_000_000);
        assert_eq!(message.step().limit, to_units(details.min_output, 6).unwrap());
    }

    #[tokio::test]
    async fn long_open_transfers_the_quote_jetton() {
        let h = harness(EXEC, Some("k1")).await;
        h.chain.set_balance(EXEC, 1_000_000_000).await;
        h.chain.set_jetton_balance(EXEC, USDT, 10_000_000).await;

        let result = h
            .orchestrator
            .execute_order_swap(
                &order(OrderSide::Long),
                &h.pool,
                &credentials(Some("k1")),
                dec!(1),
                SwapAction::Open,
            )
            .await;
        assert!(result.success, "{}", result.message);

        let sent = h.submitter.sent().await;
        let jetton_wallet = h.chain.get_jetton_wallet(EXEC, USDT).await.unwrap();
        assert_eq!(sent[0].destination, jetton_wallet);
        assert_eq!(sent[0].amount_units, 200_000_000);

        let message = decode_swap(&BASE64.decode(&sent[0].payload).unwrap()).unwrap();
        assert_eq!(message.amount(), 1_800_000);
        match message {
            SwapMessage::JettonTransfer { forward, .. } => assert_eq!(forward.op, OP_JETTON_VAULT_SWAP),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn short_balance_fails_permanently_with_the_shortfall() {
        let h = harness(EXEC, Some("k1")).await;
        h.chain.set_balance(EXEC, 50_000_000).await;

        let result = h
            .orchestrator
            .execute_order_swap(
                &order(OrderSide::Short),
                &h.pool,
                &credentials(Some("k1")),
                dec!(1),
                SwapAction::Open,
            )
            .await;
        assert!(!result.success);
        assert!(!result.transient);
        assert!(result.message.contains("short by 1.1"), "{}", result.message);
        assert!(h.submitter.sent().await.is_empty());

        // the processor turns it into a terminal failure
        let mut processor = OrderProcessor::new();
        let mut short = order(OrderSide::Short);
        short.price_at_creation = Some(dec!(1.90));
        short.stop_loss = Some(dec!(1.95));
        short.activate(Utc::now()).unwrap();
        processor.add_order(short);
        let done = processor
            .process_tick("TON-USDT", dec!(1.80), &h.orchestrator)
            .await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, OrderStatus::ExecutionFailed);
        assert!(done[0].execution_error.as_deref().unwrap_or("").contains("Insufficient funds"));
    }

    #[tokio::test]
    async fn drained_pool_leaves_the_order_live() {
        let h = harness(EXEC, Some("k1")).await;
        h.chain.set_balance(EXEC, 5_000_000_000).await;
        h.chain.set_reserves(POOL, 0, 0).await;

        let mut processor = OrderProcessor::new();
        let mut short = order(OrderSide::Short);
        short.price_at_creation = Some(dec!(1.90));
        short.stop_loss = Some(dec!(1.95));
        short.activate(Utc::now()).unwrap();
        processor.add_order(short);

        let done = processor
            .process_tick("TON-USDT", dec!(1.80), &h.orchestrator)
            .await;
        assert!(done.is_empty());
        let live = processor.get("order_1").unwrap();
        assert_eq!(live.status, OrderStatus::Active);
        assert!(!live.is_opened());
        assert!(live.execution_error.as_deref().unwrap_or("").contains("liquidity"));
        assert!(h.submitter.sent().await.is_empty());

        // liquidity returns and the next tick goes through
        h.chain.set_reserves(POOL, 1_000_000_000_000_000, 1_800_000_000_000).await;
        processor
            .process_tick("TON-USDT", dec!(1.80), &h.orchestrator)
            .await;
        assert!(processor.get("order_1").unwrap().is_opened());
        assert_eq!(h.submitter.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn unrepresentable_balance_is_not_reported_as_a_shortfall() {
        let h = harness(EXEC, Some("k1")).await;
        h.chain.set_balance(EXEC, u128::MAX).await;

        let result = h
            .orchestrator
            .execute(&order(OrderSide::Short), SwapAction::Open)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("overflow"), "{}", result.message);
        assert!(!result.message.contains("Insufficient"));
        assert!(h.submitter.sent().await.is_empty());
    }

    #[tokio::test]
    async fn mismatched_signer_never_submits() {
        let h = harness(OTHER, Some("k1")).await;
        h.chain.set_balance(EXEC, 5_000_000_000).await;

        let result = h
            .orchestrator
            .execute(&order(OrderSide::Short), SwapAction::Open)
            .await;
        assert!(!result.success);
        assert!(!result.transient);
        assert!(result.message.contains("Wallet mismatch"), "{}", result.message);
        assert!(h.submitter.sent().await.is_empty());
    }

    #[tokio::test]
    async fn missing_secret_is_permanent() {
        let h = harness(EXEC, None).await;
        h.chain.set_balance(EXEC, 5_000_000_000).await;

        let result = h
            .orchestrator
            .execute(&order(OrderSide::Short), SwapAction::Open)
            .await;
        assert!(!result.success);
        assert!(!result.transient);
        assert!(result.message.contains("No signing secret"));
    }

    #[tokio::test]
    async fn network_failures_are_transient() {
        let h = harness(EXEC, Some("k1")).await;
        h.chain.set_balance(EXEC, 5_000_000_000).await;
        h.submitter
            .fail_next(ChainError::Timeout("broadcast".to_string()))
            .await;

        let result = h
            .orchestrator
            .execute(&order(OrderSide::Short), SwapAction::Open)
            .await;
        assert!(!result.success);
        assert!(result.transient);

        h.chain.fail_next(ChainError::Network("reset".to_string())).await;
        let result = h
            .orchestrator
            .execute(&order(OrderSide::Short), SwapAction::Close)
            .await;
        assert!(result.transient);
    }

    #[tokio::test]
    async fn unknown_venue_is_permanent() {
        let h = harness(EXEC, Some("k1")).await;
        h.chain.set_balance(EXEC, 5_000_000_000).await;
        let mut pool = h.pool.clone();
        pool.dex = "Uniswap".to_string();

        let result = h
            .orchestrator
            .execute_order_swap(
                &order(OrderSide::Short),
                &pool,
                &credentials(Some("k1")),
                dec!(1),
                SwapAction::Open,
            )
            .await;
        assert!(!result.success);
        assert!(!result.transient);
        assert!(result.message.contains("Unsupported venue"));
    }
}
