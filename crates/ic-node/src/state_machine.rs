//! Role State Machine.
//!
//! Rank 0 is the aggregator; every other rank is a proposer. States:
//! `Init -> DatasetReady -> HandshakeInFlight -> Negotiated -> Running ->
//! Done | Refused | Failed`. The aggregator collects every proposer's
//! request (plus its own), negotiates, and broadcasts the outcome; a
//! proposer sends its request and waits for the broadcast response.

use ic_core::envelope::{HandshakeRequest, HandshakeResponse};
use ic_core::error::NegotiationError;
use ic_transport::MeshTransport;
use tracing::{debug, error, info, warn};

use crate::handlers::lr::LrHandler;
use crate::handlers::psi::PsiHandler;

const HANDSHAKE_TAG: &str = "Handshake";
const HANDSHAKE_RESPONSE_TAG: &str = "Handshake_response";

/// Observable phase of the state machine, surfaced to logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    DatasetReady,
    HandshakeInFlight,
    Negotiated,
    Running,
    Done,
    Refused,
    Failed,
}

/// Sum type over the two concrete algorithm handlers.
pub enum AlgoHandler {
    Lr(LrHandler),
    Psi(PsiHandler),
}

/// Sum type over the two negotiated contexts produced by a handler.
pub enum NegotiatedContext {
    Lr(ic_core::context::LrContext),
    Psi(ic_core::context::PsiContext),
}

impl AlgoHandler {
    fn build_request(&self) -> HandshakeRequest {
        match self {
            AlgoHandler::Lr(h) => h.build_request(),
            AlgoHandler::Psi(h) => h.build_request(),
        }
    }

    fn negotiate(&self, requests: &[HandshakeRequest]) -> Result<NegotiatedContext, NegotiationError> {
        match self {
            AlgoHandler::Lr(h) => h.negotiate(requests).map(NegotiatedContext::Lr),
            AlgoHandler::Psi(h) => h.negotiate(requests).map(NegotiatedContext::Psi),
        }
    }

    fn build_response(&self, ctx: &NegotiatedContext) -> HandshakeResponse {
        match (self, ctx) {
            (AlgoHandler::Lr(h), NegotiatedContext::Lr(c)) => h.build_response(c),
            (AlgoHandler::Psi(h), NegotiatedContext::Psi(c)) => h.build_response(c),
            _ => unreachable!("handler and context kinds always match within one run"),
        }
    }

    fn process_response(&self, resp: &HandshakeResponse) -> Result<NegotiatedContext, NegotiationError> {
        match self {
            AlgoHandler::Lr(h) => h.process_response(resp).map(NegotiatedContext::Lr),
            AlgoHandler::Psi(h) => h.process_response(resp).map(NegotiatedContext::Psi),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("transport error: {0}")]
    Transport(#[from] ic_transport::TransportError),
    #[error("codec error: {0}")]
    Codec(#[from] ic_core::error::Error),
    #[error("handshake refused: {0}")]
    Refused(String),
}

/// Drives the handshake to completion and returns the negotiated context.
/// The caller (Runtime Shim) is responsible for `Running` and beyond.
pub async fn run_handshake(
    transport: &dyn MeshTransport,
    world_size: i32,
    handler: &AlgoHandler,
) -> Result<NegotiatedContext, RunError> {
    let local_rank = transport.local_rank();
    let mut state = RunState::DatasetReady;
    debug!(rank = local_rank, ?state, "dataset ready");

    let request = handler.build_request();
    state = RunState::HandshakeInFlight;
    debug!(rank = local_rank, ?state, "entering handshake");

    let result = if local_rank == 0 {
        run_aggregator(transport, world_size, handler, request).await
    } else {
        run_proposer(transport, handler, request).await
    };

    match &result {
        Ok(_) => {
            state = RunState::Negotiated;
            info!(rank = local_rank, ?state, "handshake negotiated");
        }
        Err(RunError::Refused(msg)) => {
            state = RunState::Refused;
            warn!(rank = local_rank, ?state, %msg, "handshake refused");
        }
        Err(err) => {
            state = RunState::Failed;
            error!(rank = local_rank, ?state, %err, "handshake failed");
        }
    }

    result
}

async fn run_aggregator(
    transport: &dyn MeshTransport,
    world_size: i32,
    handler: &AlgoHandler,
    own_request: HandshakeRequest,
) -> Result<NegotiatedContext, RunError> {
    let local_version = own_request.version;

    // Sniff each incoming request's version before committing to a full v2
    // decode: a stray v1 (or otherwise-mismatched) request must still yield a
    // broadcast refusal rather than a codec error that leaves every proposer
    // blocked on `recv` forever (spec.md §4.4 item 3, §7 "no retries, no
    // partial progress").
    let mut raw_requests = Vec::with_capacity((world_size - 1).max(0) as usize);
    for rank in 1..world_size {
        let bytes = transport.recv(rank, HANDSHAKE_TAG).await?;
        let version = ic_core::codec::sniff_version(&bytes)?;
        raw_requests.push((rank, version, bytes));
    }

    let outcome = if raw_requests.iter().any(|(_, version, _)| *version != local_version) {
        Err(NegotiationError::HandshakeRefused("handshake versions inconsistent".into()))
    } else {
        let mut requests = vec![own_request];
        for (_, _, bytes) in &raw_requests {
            requests.push(ic_core::codec::decode_request_v2(bytes)?);
        }
        requests.sort_by_key(|r| r.requester_rank);
        handler.negotiate(&requests)
    };
    let response = match &outcome {
        Ok(ctx) => handler.build_response(ctx),
        Err(err) => HandshakeResponse::refused(err),
    };

    let bytes = ic_core::codec::encode(&response)?;
    for rank in 1..world_size {
        transport.send_async(rank, HANDSHAKE_RESPONSE_TAG, bytes.clone()).await?;
    }

    outcome.map_err(|e| RunError::Refused(e.message()))
}

async fn run_proposer(
    transport: &dyn MeshTransport,
    handler: &AlgoHandler,
    request: HandshakeRequest,
) -> Result<NegotiatedContext, RunError> {
    let bytes = ic_core::codec::encode(&request)?;
    transport.send(0, HANDSHAKE_TAG, bytes).await?;

    let bytes = transport.recv(0, HANDSHAKE_RESPONSE_TAG).await?;
    let response = ic_core::codec::decode_response_v2(&bytes)?;
    if !response.header.code.is_ok() {
        return Err(RunError::Refused(response.header.message));
    }

    handler.process_response(&response).map_err(|e| RunError::Refused(e.message()))
}
