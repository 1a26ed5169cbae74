// src/protocol/mod.rs
pub mod address;
pub mod boc;
pub mod cell;
pub mod dedust;
pub mod schema;
pub mod stonfi;

use crate::config::VenueConfig;
use crate::domain::errors::{ProtocolError, ProtocolResult};
use crate::domain::models::{Dex, TokenInfo};
use address::{parse_address, TonAddress};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use schema::{DepositMessage, SwapMessage};

/// Decimals of the chain's native coin
pub const NATIVE_DECIMALS: u32 = 9;

/// Which side of the venue the input comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapSource {
    Native,
    Jetton,
}

impl SwapSource {
    pub fn of(token: &TokenInfo) -> Self {
        if token.is_native() {
            SwapSource::Native
        } else {
            SwapSource::Jetton
        }
    }
}

/// Fully resolved inputs for one venue builder
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub pool: TonAddress,
    pub user: TonAddress,
    pub router: TonAddress,
    pub amount_in: u128,
    pub min_out: u128,
    pub source: SwapSource,
    pub query_id: u64,
    pub deadline: u32,
    pub forward_ton_amount: u128,
}

/// Encoded swap body ready to attach to a transfer
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSwap {
    pub dex: Dex,
    pub message: SwapMessage,
    pub boc: Vec<u8>,
    pub valid_until: u32,
}

impl EncodedSwap {
    pub fn payload_base64(&self) -> String {
        BASE64.encode(&self.boc)
    }
}

/// Builds venue-specific swap and deposit bodies
#[derive(Debug, Clone)]
pub struct SwapEncoder {
    venues: VenueConfig,
    deadline_secs: u32,
}

impl SwapEncoder {
    pub fn new(venues: VenueConfig, deadline_secs: u32) -> Self {
        Self {
            venues,
            deadline_secs,
        }
    }

    /// Encode a swap of `amount_in` (minimal units) with `min_out` protection
    pub fn encode_swap(
        &self,
        pool_address: &str,
        user_address: &str,
        amount_in: u128,
        min_out: u128,
        dex: &str,
        from_token: SwapSource,
    ) -> ProtocolResult<EncodedSwap> {
        let venue: Dex = dex.parse()?;
        let router = match venue {
            Dex::DeDust => &self.venues.dedust_router,
            Dex::StonFi => &self.venues.stonfi_router,
        };
        let forward_ton_amount = to_units(self.venues.forward_gas, NATIVE_DECIMALS)
            .ok_or_else(|| ProtocolError::CellOverflow("forward gas".to_string()))?;
        let deadline = (chrono::Utc::now().timestamp() as u32).saturating_add(self.deadline_secs);

        let request = SwapRequest {
            pool: parse_address(pool_address)?,
            user: parse_address(user_address)?,
            router: parse_address(router)?,
            amount_in,
            min_out,
            source: from_token,
            query_id: new_query_id(),
            deadline,
            forward_ton_amount,
        };

        let message = match venue {
            Dex::DeDust => dedust::build_swap(&request),
            Dex::StonFi => stonfi::build_swap(&request),
        };
        let boc = boc::serialize(&message.to_cell()?);

        log::debug!(
            "Encoded {} swap: query_id={} amount_in={} min_out={} ({} bytes)",
            venue,
            request.query_id,
            amount_in,
            min_out,
            boc.len()
        );

        Ok(EncodedSwap {
            dex: venue,
            message,
            boc,
            valid_until: deadline,
        })
    }
}

/// Funding transfer body: opcode 0 with a comment, or opcode 0 + query id 0
pub fn encode_deposit(comment: Option<&str>) -> ProtocolResult<Vec<u8>> {
    let message = DepositMessage {
        comment: comment.map(str::to_string),
    };
    Ok(boc::serialize(&message.to_cell()?))
}

pub fn decode_swap(bytes: &[u8]) -> ProtocolResult<SwapMessage> {
    SwapMessage::from_cell(&boc::deserialize(bytes)?)
}

pub fn decode_deposit(bytes: &[u8]) -> ProtocolResult<DepositMessage> {
    DepositMessage::from_cell(&boc::deserialize(bytes)?)
}

/// Millisecond clock in the high bits, random low 16 bits
pub fn new_query_id() -> u64 {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let random = (uuid::Uuid::new_v4().as_u128() & 0xffff) as u64;
    (millis << 16) | random
}

/// Display amount to minimal units, truncating extra precision
pub fn to_units(amount: Decimal, decimals: u32) -> Option<u128> {
    if amount.is_sign_negative() || decimals > 19 {
        return None;
    }
    let factor = Decimal::from_u64(10u64.checked_pow(decimals)?)?;
    amount.checked_mul(factor)?.trunc().to_u128()
}

/// Minimal units to display amount
pub fn from_units(units: u128, decimals: u32) -> Option<Decimal> {
    if decimals > 28 {
        return None;
    }
    let scale = 10u128.pow(decimals);
    let whole = Decimal::from_u128(units / scale)?;
    let frac = Decimal::try_from_i128_with_scale((units % scale) as i128, decimals).ok()?;
    Some((whole + frac).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::schema::{OP_JETTON_TRANSFER, OP_JETTON_VAULT_SWAP, OP_NATIVE_VAULT_SWAP, OP_ROUTER_SWAP};
    use rust_decimal_macros::dec;

    const POOL: &str = "EQCsgKK0mn7qY30BE8ACZAlfXJ7w5DJq0r9IX49sWg-z-opY";
    const USER: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";

    fn encoder() -> SwapEncoder {
        SwapEncoder::new(VenueConfig::default(), 300)
    }

    #[test]
    fn dedust_native_swap_decodes_to_the_same_fields() {
        let encoded = encoder()
            .encode_swap(POOL, USER, 1_000_000_000, 1_750_000, "DeDust", SwapSource::Native)
            .unwrap();
        let decoded = decode_swap(&encoded.boc).unwrap();

        assert_eq!(decoded, encoded.message);
        assert_eq!(decoded.opcode(), OP_NATIVE_VAULT_SWAP);
        assert_eq!(decoded.amount(), 1_000_000_000);
        assert_eq!(decoded.step().pool, parse_address(POOL).unwrap());
        assert_eq!(decoded.step().limit, 1_750_000);
        assert_eq!(decoded.params().recipient, parse_address(USER).unwrap());
        assert!(decoded.params().referral.is_none());
        assert_eq!(decoded.params().deadline, encoded.valid_until);
    }

    #[test]
    fn dedust_jetton_swap_wraps_a_transfer() {
        let encoded = encoder()
            .encode_swap(POOL, USER, 2_000_000, 1_100_000_000, "dedust", SwapSource::Jetton)
            .unwrap();
        match decode_swap(&encoded.boc).unwrap() {
            SwapMessage::JettonTransfer {
                amount,
                destination,
                response_destination,
                forward_ton_amount,
                forward,
                ..
            } => {
                assert_eq!(amount, 2_000_000);
                assert_eq!(destination, parse_address(dedust::DEFAULT_ROUTER).unwrap());
                assert_eq!(response_destination, parse_address(USER).unwrap());
                assert_eq!(forward_ton_amount, 150_000_000);
                assert_eq!(forward.op, OP_JETTON_VAULT_SWAP);
                assert_eq!(forward.step.limit, 1_100_000_000);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn stonfi_uses_its_own_router_and_opcode() {
        for source in [SwapSource::Native, SwapSource::Jetton] {
            let encoded = encoder()
                .encode_swap(POOL, USER, 5_000, 7, "StonFi", source)
                .unwrap();
            let decoded = decode_swap(&encoded.boc).unwrap();
            assert_eq!(decoded.opcode(), OP_JETTON_TRANSFER);
            if let SwapMessage::JettonTransfer { destination, forward, .. } = &decoded {
                assert_eq!(*destination, parse_address(stonfi::DEFAULT_ROUTER).unwrap());
                assert_eq!(forward.op, OP_ROUTER_SWAP);
                assert_eq!(forward.step.pool, parse_address(POOL).unwrap());
            }
            assert_eq!(decoded.amount(), 5_000);
        }
    }

    #[test]
    fn unknown_venue_is_rejected() {
        let err = encoder()
            .encode_swap(POOL, USER, 1, 1, "Uniswap", SwapSource::Native)
            .unwrap_err();
        assert_eq!(err, ProtocolError::UnsupportedVenue("Uniswap".to_string()));
    }

    #[test]
    fn deposit_body_round_trips() {
        let plain = encode_deposit(None).unwrap();
        assert_eq!(decode_deposit(&plain).unwrap().comment, None);

        let with_comment = encode_deposit(Some("order_1700000000_0042")).unwrap();
        assert_eq!(
            decode_deposit(&with_comment).unwrap().comment.as_deref(),
            Some("order_1700000000_0042")
        );
    }

    #[test]
    fn default_venue_addresses_parse() {
        for address in [
            dedust::DEFAULT_NATIVE_VAULT,
            dedust::DEFAULT_ROUTER,
            stonfi::DEFAULT_ROUTER,
            stonfi::DEFAULT_PROXY_TON,
        ] {
            let parsed = parse_address(address).unwrap();
            assert_eq!(parsed.to_friendly(true, true), address);
        }
    }

    #[test]
    fn query_ids_carry_the_clock() {
        let before = chrono::Utc::now().timestamp_millis() as u64;
        let id = new_query_id();
        assert!(id >> 16 >= before);
    }

    #[test]
    fn unit_conversion_truncates() {
        assert_eq!(to_units(dec!(1.5), 9), Some(1_500_000_000));
        assert_eq!(to_units(dec!(0.0000000019), 9), Some(1));
        assert_eq!(to_units(dec!(-1), 9), None);
        assert_eq!(from_units(1_500_000, 6), Some(dec!(1.5)));
        assert_eq!(from_units(0, 9), Some(Decimal::ZERO));
    }
}
