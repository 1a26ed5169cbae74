// src/protocol/schema.rs
//! Typed message nodes. Each node turns into a cell tree in one pass and can
//! be read back from one.
use crate::domain::errors::{ProtocolError, ProtocolResult};
use crate::protocol::address::TonAddress;
use crate::protocol::cell::{Cell, CellBuilder, CellSlice, MAX_CELL_BITS};

/// Swap through the native-asset vault
pub const OP_NATIVE_VAULT_SWAP: u32 = 0xea06_185d;
/// Standard jetton `transfer`
pub const OP_JETTON_TRANSFER: u32 = 0x0f8a_7ea5;
/// Vault-side swap carried in a jetton forward payload
pub const OP_JETTON_VAULT_SWAP: u32 = 0xe3a0_d482;
/// Router swap carried in a jetton forward payload
pub const OP_ROUTER_SWAP: u32 = 0x6664_de2a;
/// Plain transfer / text comment
pub const OP_COMMENT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    GivenIn,
    GivenOut,
}

/// One hop: pool, kind, output limit and an optional next hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStep {
    pub pool: TonAddress,
    pub kind: SwapKind,
    pub limit: u128,
    pub next: Option<Box<SwapStep>>,
}

impl SwapStep {
    pub fn given_in(pool: TonAddress, limit: u128) -> Self {
        Self {
            pool,
            kind: SwapKind::GivenIn,
            limit,
            next: None,
        }
    }

    fn store_inline(&self, builder: CellBuilder) -> ProtocolResult<CellBuilder> {
        let next = match &self.next {
            Some(step) => Some(step.to_cell()?),
            None => None,
        };
        builder
            .store_address(Some(&self.pool))?
            .store_bit(self.kind == SwapKind::GivenOut)?
            .store_coins(self.limit)?
            .store_maybe_ref(next)
    }

    fn load_inline(slice: &mut CellSlice<'_>) -> ProtocolResult<Self> {
        let pool = slice
            .load_address()?
            .ok_or_else(|| ProtocolError::Decode("swap step without pool".to_string()))?;
        let kind = if slice.load_bit()? {
            SwapKind::GivenOut
        } else {
            SwapKind::GivenIn
        };
        let limit = slice.load_coins()?;
        let next = match slice.load_maybe_ref()? {
            Some(cell) => Some(Box::new(SwapStep::from_cell(cell)?)),
            None => None,
        };
        Ok(Self {
            pool,
            kind,
            limit,
            next,
        })
    }

    pub fn to_cell(&self) -> ProtocolResult<Cell> {
        Ok(self.store_inline(CellBuilder::new())?.build())
    }

    pub fn from_cell(cell: &Cell) -> ProtocolResult<Self> {
        Self::load_inline(&mut cell.parser())
    }
}

/// Deadline, recipient and optional callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapParams {
    pub deadline: u32,
    pub recipient: TonAddress,
    pub referral: Option<TonAddress>,
    pub fulfill_payload: Option<Cell>,
    pub reject_payload: Option<Cell>,
}

impl SwapParams {
    pub fn new(deadline: u32, recipient: TonAddress) -> Self {
        Self {
            deadline,
            recipient,
            referral: None,
            fulfill_payload: None,
            reject_payload: None,
        }
    }

    pub fn to_cell(&self) -> ProtocolResult<Cell> {
        Ok(CellBuilder::new()
            .store_uint(self.deadline as u64, 32)?
            .store_address(Some(&self.recipient))?
            .store_address(self.referral.as_ref())?
            .store_maybe_ref(self.fulfill_payload.clone())?
            .store_maybe_ref(self.reject_payload.clone())?
            .build())
    }

    pub fn from_cell(cell: &Cell) -> ProtocolResult<Self> {
        let mut slice = cell.parser();
        let deadline = slice.load_uint(32)? as u32;
        let recipient = slice
            .load_address()?
            .ok_or_else(|| ProtocolError::Decode("swap params without recipient".to_string()))?;
        let referral = slice.load_address()?;
        let fulfill_payload = slice.load_maybe_ref()?.cloned();
        let reject_payload = slice.load_maybe_ref()?.cloned();
        Ok(Self {
            deadline,
            recipient,
            referral,
            fulfill_payload,
            reject_payload,
        })
    }
}

/// Body forwarded by a jetton wallet to the venue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPayload {
    pub op: u32,
    pub step: SwapStep,
    pub params: SwapParams,
}

impl ForwardPayload {
    pub fn to_cell(&self) -> ProtocolResult<Cell> {
        Ok(CellBuilder::new()
            .store_uint(self.op as u64, 32)?
            .store_ref(self.step.to_cell()?)?
            .store_ref(self.params.to_cell()?)?
            .build())
    }

    pub fn from_cell(cell: &Cell) -> ProtocolResult<Self> {
        let mut slice = cell.parser();
        let op = slice.load_uint(32)? as u32;
        if op != OP_JETTON_VAULT_SWAP && op != OP_ROUTER_SWAP {
            return Err(ProtocolError::Decode(format!(
                "unknown forward opcode {:#010x}",
                op
            )));
        }
        let step = SwapStep::from_cell(slice.load_ref()?)?;
        let params = SwapParams::from_cell(slice.load_ref()?)?;
        Ok(Self { op, step, params })
    }
}

/// A complete swap message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapMessage {
    /// Native coin sent straight to the vault
    NativeSwap {
        query_id: u64,
        amount: u128,
        step: SwapStep,
        params: SwapParams,
    },
    /// Jetton transfer whose forward payload asks the venue to swap
    JettonTransfer {
        query_id: u64,
        amount: u128,
        destination: TonAddress,
        response_destination: TonAddress,
        custom_payload: Option<Cell>,
        forward_ton_amount: u128,
        forward: ForwardPayload,
    },
}

impl SwapMessage {
    pub fn opcode(&self) -> u32 {
        match self {
            SwapMessage::NativeSwap { .. } => OP_NATIVE_VAULT_SWAP,
            SwapMessage::JettonTransfer { .. } => OP_JETTON_TRANSFER,
        }
    }

    pub fn query_id(&self) -> u64 {
        match self {
            SwapMessage::NativeSwap { query_id, .. } | SwapMessage::JettonTransfer { query_id, .. } => {
                *query_id
            }
        }
    }

    pub fn amount(&self) -> u128 {
        match self {
            SwapMessage::NativeSwap { amount, .. } | SwapMessage::JettonTransfer { amount, .. } => {
                *amount
            }
        }
    }

    pub fn step(&self) -> &SwapStep {
        match self {
            SwapMessage::NativeSwap { step, .. } => step,
            SwapMessage::JettonTransfer { forward, .. } => &forward.step,
        }
    }

    pub fn params(&self) -> &SwapParams {
        match self {
            SwapMessage::NativeSwap { params, .. } => params,
            SwapMessage::JettonTransfer { forward, .. } => &forward.params,
        }
    }

    pub fn to_cell(&self) -> ProtocolResult<Cell> {
        match self {
            SwapMessage::NativeSwap {
                query_id,
                amount,
                step,
                params,
            } => {
                let builder = CellBuilder::new()
                    .store_uint(OP_NATIVE_VAULT_SWAP as u64, 32)?
                    .store_uint(*query_id, 64)?
                    .store_coins(*amount)?;
                Ok(step
                    .store_inline(builder)?
                    .store_ref(params.to_cell()?)?
                    .build())
            }
            SwapMessage::JettonTransfer {
                query_id,
                amount,
                destination,
                response_destination,
                custom_payload,
                forward_ton_amount,
                forward,
            } => Ok(CellBuilder::new()
                .store_uint(OP_JETTON_TRANSFER as u64, 32)?
                .store_uint(*query_id, 64)?
                .store_coins(*amount)?
                .store_address(Some(destination))?
                .store_address(Some(response_destination))?
                .store_maybe_ref(custom_payload.clone())?
                .store_coins(*forward_ton_amount)?
                // forward payload kept in a reference
                .store_bit(true)?
                .store_ref(forward.to_cell()?)?
                .build()),
        }
    }

    pub fn from_cell(cell: &Cell) -> ProtocolResult<Self> {
        let mut slice = cell.parser();
        let op = slice.load_uint(32)? as u32;
        let query_id = slice.load_uint(64)?;
        let amount = slice.load_coins()?;
        match op {
            OP_NATIVE_VAULT_SWAP => {
                let step = SwapStep::load_inline(&mut slice)?;
                let params = SwapParams::from_cell(slice.load_ref()?)?;
                Ok(SwapMessage::NativeSwap {
                    query_id,
                    amount,
                    step,
                    params,
                })
            }
            OP_JETTON_TRANSFER => {
                let destination = slice
                    .load_address()?
                    .ok_or_else(|| ProtocolError::Decode("transfer without destination".to_string()))?;
                let response_destination = slice
                    .load_address()?
                    .ok_or_else(|| ProtocolError::Decode("transfer without response address".to_string()))?;
                let custom_payload = slice.load_maybe_ref()?.cloned();
                let forward_ton_amount = slice.load_coins()?;
                if !slice.load_bit()? {
                    return Err(ProtocolError::Decode(
                        "inline forward payloads are not supported".to_string(),
                    ));
                }
                let forward = ForwardPayload::from_cell(slice.load_ref()?)?;
                Ok(SwapMessage::JettonTransfer {
                    query_id,
                    amount,
                    destination,
                    response_destination,
                    custom_payload,
                    forward_ton_amount,
                    forward,
                })
            }
            other => Err(ProtocolError::Decode(format!(
                "unknown swap opcode {:#010x}",
                other
            ))),
        }
    }
}

/// Plain funding transfer, optionally carrying a text comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositMessage {
    pub comment: Option<String>,
}

impl DepositMessage {
    pub fn to_cell(&self) -> ProtocolResult<Cell> {
        let text = match &self.comment {
            None => {
                return Ok(CellBuilder::new()
                    .store_uint(OP_COMMENT as u64, 32)?
                    .store_uint(0, 64)?
                    .build())
            }
            Some(text) => text.as_bytes(),
        };

        let head_len = ((MAX_CELL_BITS - 32) / 8).min(text.len());
        let (head, mut rest) = text.split_at(head_len);
        let mut chunks = Vec::new();
        while !rest.is_empty() {
            let take = (MAX_CELL_BITS / 8).min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            chunks.push(chunk);
            rest = tail;
        }

        // Tail first so each cell can reference the next one
        let mut next: Option<Cell> = None;
        for chunk in chunks.into_iter().rev() {
            let mut builder = CellBuilder::new().store_bytes(chunk)?;
            if let Some(cell) = next.take() {
                builder = builder.store_ref(cell)?;
            }
            next = Some(builder.build());
        }

        let mut builder = CellBuilder::new()
            .store_uint(OP_COMMENT as u64, 32)?
            .store_bytes(head)?;
        if let Some(cell) = next {
            builder = builder.store_ref(cell)?;
        }
        Ok(builder.build())
    }

    pub fn from_cell(cell: &Cell) -> ProtocolResult<Self> {
        let mut slice = cell.parser();
        let op = slice.load_uint(32)? as u32;
        if op != OP_COMMENT {
            return Err(ProtocolError::Decode(format!(
                "not a plain transfer: opcode {:#010x}",
                op
            )));
        }
        if slice.remaining_bits() == 64 && slice.remaining_refs() == 0 {
            let mut peek = slice.clone();
            if peek.load_uint(64)? == 0 {
                return Ok(Self { comment: None });
            }
        }

        let mut bytes = Vec::new();
        let mut current = slice;
        loop {
            if current.remaining_bits() % 8 != 0 {
                return Err(ProtocolError::Decode("comment is not byte aligned".to_string()));
            }
            let len = current.remaining_bits() / 8;
            bytes.extend(current.load_bytes(len)?);
            if current.remaining_refs() == 0 {
                break;
            }
            current = current.load_ref()?.parser();
        }
        let text = String::from_utf8(bytes)
            .map_err(|e| ProtocolError::Decode(format!("comment is not utf-8: {}", e)))?;
        Ok(Self {
            comment: Some(text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> TonAddress {
        TonAddress::new(0, [byte; 32])
    }

    #[test]
    fn multi_hop_step_reads_back() {
        let mut step = SwapStep::given_in(addr(1), 10);
        step.next = Some(Box::new(SwapStep::given_in(addr(2), 20)));
        let cell = step.to_cell().unwrap();
        assert_eq!(cell.refs().len(), 1);
        assert_eq!(SwapStep::from_cell(&cell).unwrap(), step);
    }

    #[test]
    fn params_with_referral_read_back() {
        let mut params = SwapParams::new(1_700_000_300, addr(3));
        params.referral = Some(addr(4));
        let cell = params.to_cell().unwrap();
        // 32 + 267 + 267 + 1 + 1
        assert_eq!(cell.bit_len(), 568);
        assert_eq!(SwapParams::from_cell(&cell).unwrap(), params);
    }

    #[test]
    fn short_and_long_comments() {
        let empty = DepositMessage { comment: None };
        let cell = empty.to_cell().unwrap();
        assert_eq!(cell.bit_len(), 96);
        assert_eq!(DepositMessage::from_cell(&cell).unwrap(), empty);

        let text = "order_1700000000_0421 ".repeat(20);
        let long = DepositMessage {
            comment: Some(text.clone()),
        };
        let cell = long.to_cell().unwrap();
        assert_eq!(cell.refs().len(), 1);
        assert_eq!(
            DepositMessage::from_cell(&cell).unwrap().comment.as_deref(),
            Some(text.as_str())
        );
    }

    #[test]
    fn unknown_opcode_is_a_decode_error() {
        let cell = CellBuilder::new()
            .store_uint(0xdeadbeef, 32)
            .unwrap()
            .store_uint(0, 64)
            .unwrap()
            .store_coins(0)
            .unwrap()
            .build();
        assert!(matches!(
            SwapMessage::from_cell(&cell),
            Err(ProtocolError::Decode(_))
        ));
    }
}
