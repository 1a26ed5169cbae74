// src/trading/quote.rs
use crate::config::EngineConfig;
use crate::domain::errors::{QuoteError, QuoteResult};
use crate::domain::models::{Pool, Quote};
use crate::protocol::{from_units, to_units};
use primitive_types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

const PPM: u64 = 1_000_000;

/// Constant-product quotes with pool and service fees applied to the input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteEngine {
    fee_percent: Decimal,
    fee_ppm: u64,
}

impl QuoteEngine {
    /// Fees in percent; they add up
    pub fn new(pool_fee_percent: Decimal, service_fee_percent: Decimal) -> Self {
        let fee_percent = pool_fee_percent + service_fee_percent;
        let fee_ppm = percent_to_ppm(fee_percent).min(PPM);
        Self {
            fee_percent,
            fee_ppm,
        }
    }

    pub fn from_config(engine: &EngineConfig) -> Self {
        Self::new(engine.pool_fee_percent, engine.service_fee_percent)
    }

    pub fn fee_percent(&self) -> Decimal {
        self.fee_percent
    }

    /// Quote `amount` of `pool.from_token` into `pool.to_token`.
    /// `reserves` must follow the same orientation as `pool`.
    pub fn quote(
        &self,
        pool: &Pool,
        reserves: (u128, u128),
        amount: Decimal,
        slippage_percent: Decimal,
    ) -> QuoteResult<Quote> {
        let (reserve_in, reserve_out) = reserves;
        if reserve_in == 0 || reserve_out == 0 {
            return Err(QuoteError::ZeroReserves(pool.address.clone()));
        }
        if slippage_percent < Decimal::ZERO || slippage_percent >= Decimal::ONE_HUNDRED {
            return Err(QuoteError::Overflow(format!(
                "slippage {}% outside [0, 100)",
                slippage_percent
            )));
        }

        let amount_in_units = to_units(amount, pool.from_token.decimals)
            .ok_or_else(|| QuoteError::Overflow(format!("amount {}", amount)))?;
        if amount_in_units == 0 {
            return Err(QuoteError::ZeroInput(format!(
                "{} {}",
                amount, pool.from_token.symbol
            )));
        }

        // Step 1: fees come off the input
        let ppm = U256::from(PPM);
        let after_fees = U256::from(amount_in_units) * U256::from(PPM - self.fee_ppm) / ppm;

        // Step 2: x * y = k
        let r_in = U256::from(reserve_in);
        let r_out = U256::from(reserve_out);
        let output = r_out * after_fees / (r_in + after_fees);
        if output.is_zero() {
            return Err(QuoteError::ZeroOutput(format!(
                "{} {} -> {}",
                amount, pool.from_token.symbol, pool.to_token.symbol
            )));
        }

        // Step 3: slippage floor
        let keep = U256::from(PPM - percent_to_ppm(slippage_percent));
        let min_output = output * keep / ppm;

        let output_units = output.low_u128();
        let min_output_units = min_output.low_u128();
        let output_display = from_units(output_units, pool.to_token.decimals)
            .ok_or_else(|| QuoteError::Overflow(format!("output {}", output_units)))?;
        let min_output_display = from_units(min_output_units, pool.to_token.decimals)
            .ok_or_else(|| QuoteError::Overflow(format!("min output {}", min_output_units)))?;
        let amount_in = from_units(amount_in_units, pool.from_token.decimals).unwrap_or(amount);

        Ok(Quote {
            pool_address: pool.address.clone(),
            amount_in,
            amount_in_units,
            output: output_display,
            output_units,
            min_output: min_output_display,
            min_output_units,
            effective_price: output_display / amount_in,
            slippage: slippage_percent,
        })
    }
}

/// Spot price of `from_token` in `to_token`
pub fn pool_price(pool: &Pool, reserves: (u128, u128)) -> Option<Decimal> {
    let from = from_units(reserves.0, pool.from_token.decimals)?;
    let to = from_units(reserves.1, pool.to_token.decimals)?;
    if from.is_zero() {
        return None;
    }
    to.checked_div(from)
}

fn percent_to_ppm(percent: Decimal) -> u64 {
    (percent * Decimal::from(10_000))
        .trunc()
        .to_u64()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TokenInfo;
    use rust_decimal_macros::dec;

    fn ton_usdt() -> Pool {
        Pool {
            address: "EQCsgKK0mn7qY30BE8ACZAlfXJ7w5DJq0r9IX49sWg-z-opY".to_string(),
            dex: "DeDust".to_string(),
            from_token: TokenInfo {
                symbol: "TON".to_string(),
                address: "native".to_string(),
                decimals: 9,
            },
            to_token: TokenInfo {
                symbol: "USDT".to_string(),
                address: "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs".to_string(),
                decimals: 6,
            },
        }
    }

    // 1M TON against 1.8M USDT
    const RESERVES: (u128, u128) = (1_000_000_000_000_000, 1_800_000_000_000);

    fn engine() -> QuoteEngine {
        QuoteEngine::from_config(&EngineConfig::default())
    }

    #[test]
    fn fees_add_up() {
        assert_eq!(engine().fee_percent(), dec!(0.55));
    }

    #[test]
    fn small_swap_prices_near_spot_minus_fees() {
        let quote = engine().quote(&ton_usdt(), RESERVES, dec!(1), dec!(1)).unwrap();
        assert_eq!(quote.amount_in_units, 1_000_000_000);
        // 1.8 * (1 - 0.0055) = 1.7901, price impact is below a micro-unit
        assert_eq!(quote.output_units, 1_790_098);
        assert_eq!(quote.output, dec!(1.790098));
        assert!(quote.effective_price < dec!(1.8));
    }

    #[test]
    fn output_grows_with_input() {
        let engine = engine();
        let mut last = 0u128;
        for amount in [dec!(0.5), dec!(1), dec!(10), dec!(1000), dec!(250000)] {
            let quote = engine.quote(&ton_usdt(), RESERVES, amount, dec!(1)).unwrap();
            assert!(quote.output_units > last);
            last = quote.output_units;
        }
        // never more than the pool holds
        assert!(last < RESERVES.1);
    }

    #[test]
    fn min_output_matches_slippage() {
        let engine = engine();
        for slippage in [dec!(0), dec!(0.5), dec!(1), dec!(3.3)] {
            let quote = engine.quote(&ton_usdt(), RESERVES, dec!(42), slippage).unwrap();
            let output = from_units(quote.output_units, 0).unwrap();
            let min_output = from_units(quote.min_output_units, 0).unwrap();
            let expected = output * (Decimal::ONE - slippage / dec!(100));
            let diff = (min_output - expected).abs();
            assert!(diff < Decimal::ONE, "slippage {} diff {}", slippage, diff);
        }
    }

    #[test]
    fn degenerate_inputs_are_liquidity_errors() {
        let engine = engine();
        assert!(matches!(
            engine.quote(&ton_usdt(), (0, 5), dec!(1), dec!(1)),
            Err(QuoteError::ZeroReserves(_))
        ));
        assert!(matches!(
            engine.quote(&ton_usdt(), RESERVES, dec!(0.0000000001), dec!(1)),
            Err(QuoteError::ZeroInput(_))
        ));
        assert!(matches!(
            engine.quote(&ton_usdt(), (1_000_000_000_000_000, 1), dec!(1), dec!(1)),
            Err(QuoteError::ZeroOutput(_))
        ));
    }

    #[test]
    fn reversed_view_prices_the_other_way() {
        let pool = ton_usdt();
        assert_eq!(pool_price(&pool, RESERVES), Some(dec!(1.8)));
        let reversed = pool.reversed();
        let quote = engine()
            .quote(&reversed, (RESERVES.1, RESERVES.0), dec!(18), dec!(1))
            .unwrap();
        // about 10 TON minus fees
        assert!(quote.output > dec!(9.9) && quote.output < dec!(10));
    }
}
