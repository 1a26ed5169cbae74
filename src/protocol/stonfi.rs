// src/protocol/stonfi.rs
//! STON.fi: every swap is a jetton transfer to the router. Native coin is
//! first wrapped by the proxy-TON wallet, which receives the same body.
use crate::protocol::schema::{ForwardPayload, SwapMessage, SwapParams, SwapStep, OP_ROUTER_SWAP};
use crate::protocol::SwapRequest;

pub const DEFAULT_ROUTER: &str = "EQB3ncyBUTjZUA5EnFKR5_EnOMI9V1tTEAAPaiU71gc4TiUt";
pub const DEFAULT_PROXY_TON: &str = "EQCM3B12QK1e4yZSf8GtBRT0aLMNyEsBc_DhVfRRtOEffLez";

pub fn build_swap(request: &SwapRequest) -> SwapMessage {
    SwapMessage::JettonTransfer {
        query_id: request.query_id,
        amount: request.amount_in,
        destination: request.router,
        response_destination: request.user,
        custom_payload: None,
        forward_ton_amount: request.forward_ton_amount,
        forward: ForwardPayload {
            op: OP_ROUTER_SWAP,
            step: SwapStep::given_in(request.pool, request.min_out),
            params: SwapParams::new(request.deadline, request.user),
        },
    }
}
