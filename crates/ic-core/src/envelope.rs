//! Wire envelope for the handshake request/response pair.
//!
//! `HandshakeRequest`/`HandshakeResponse` are the v2 envelope shape. Field
//! order matters for nothing here (unlike the gossip log's canonical
//! encoding) since these are handshake-only, never hashed or signed; they
//! only need to round-trip through postcard.

use serde::{Deserialize, Serialize};

/// Algorithm family a party proposes or a response settles on.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AlgoTag {
    EcdhPsi,
    SsLr,
}

/// Operator negotiated alongside the algorithm (currently only sigmoid).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OpTag {
    Sigmoid,
}

/// Protocol family providing the cryptographic primitives for an algorithm.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProtocolFamilyTag {
    Ecc,
    Ss,
}

/// Minimal version-check helper: the only thing decoded before committing to
/// a full envelope decode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionProbe {
    pub version: u32,
}

/// Header carried on every response: negotiation outcome + message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub code: crate::error::ErrorCode,
    pub message: String,
}

impl Header {
    pub fn ok() -> Self {
        Header {
            code: crate::error::ErrorCode::Ok,
            message: String::new(),
        }
    }

    pub fn from_negotiation_error(err: &crate::error::NegotiationError) -> Self {
        Header {
            code: err.code(),
            message: err.message(),
        }
    }
}

/// One (tag, opaque param blob) pair. The blob is a postcard-encoded
/// Proposal or Result struct specific to the tag; decoding routes on the tag
/// rather than embedding a type-erased `Any`.
pub type TaggedParam<Tag> = (Tag, Vec<u8>);

/// v2 handshake request (one per proposer, sent to the aggregator).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub version: u32,
    pub requester_rank: i32,
    pub supported_algos: Vec<TaggedParam<AlgoTag>>,
    pub ops: Vec<TaggedParam<OpTag>>,
    pub protocol_families: Vec<TaggedParam<ProtocolFamilyTag>>,
    pub io_param: Vec<u8>,
}

/// v2 handshake response (sent by the aggregator to every proposer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub header: Header,
    pub algo: Option<AlgoTag>,
    pub algo_param: Vec<u8>,
    pub ops: Vec<TaggedParam<OpTag>>,
    pub protocol_families: Vec<TaggedParam<ProtocolFamilyTag>>,
    pub io_param: Vec<u8>,
}

impl HandshakeResponse {
    pub fn refused(err: &crate::error::NegotiationError) -> Self {
        HandshakeResponse {
            header: Header::from_negotiation_error(err),
            algo: None,
            algo_param: Vec::new(),
            ops: Vec::new(),
            protocol_families: Vec::new(),
            io_param: Vec::new(),
        }
    }
}

/// Extract the single param blob tagged `tag` from a repeated tagged-param
/// list, decode it as `P`. Returns `None` if the tag is absent.
pub fn find_tagged<Tag: PartialEq, P: for<'de> Deserialize<'de>>(
    items: &[TaggedParam<Tag>],
    tag: &Tag,
) -> Option<P> {
    items
        .iter()
        .find(|(t, _)| t == tag)
        .and_then(|(_, blob)| postcard::from_bytes(blob).ok())
}
