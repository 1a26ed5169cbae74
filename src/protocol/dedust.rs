// src/protocol/dedust.rs
//! DeDust: native coin goes to the native vault with an inline swap step,
//! jettons go through a transfer whose forward payload carries the step.
use crate::protocol::schema::{ForwardPayload, SwapMessage, SwapParams, SwapStep, OP_JETTON_VAULT_SWAP};
use crate::protocol::{SwapRequest, SwapSource};

pub const DEFAULT_NATIVE_VAULT: &str = "EQDa4VOnTYlLvDJ0gZjNYm5PXfSmmtL6Vs6A_CZEtXCNICq_";
pub const DEFAULT_ROUTER: &str = "EQAYqo4u7VF0fa4DPAebk4g9lBytj2VFny7pzXR0trjtXQaO";

pub fn build_swap(request: &SwapRequest) -> SwapMessage {
    let step = SwapStep::given_in(request.pool, request.min_out);
    let params = SwapParams::new(request.deadline, request.user);

    match request.source {
        SwapSource::Native => SwapMessage::NativeSwap {
            query_id: request.query_id,
            amount: request.amount_in,
            step,
            params,
        },
        SwapSource::Jetton => SwapMessage::JettonTransfer {
            query_id: request.query_id,
            amount: request.amount_in,
            destination: request.router,
            response_destination: request.user,
            custom_payload: None,
            forward_ton_amount: request.forward_ton_amount,
            forward: ForwardPayload {
                op: OP_JETTON_VAULT_SWAP,
                step,
                params,
            },
        },
    }
}
