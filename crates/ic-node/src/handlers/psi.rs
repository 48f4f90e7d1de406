//! ECDH-PSI algorithm handler.

use ic_core::context::PsiContext;
use ic_core::envelope::{AlgoTag, HandshakeRequest, HandshakeResponse, Header, ProtocolFamilyTag};
use ic_core::error::NegotiationError;
use ic_core::params::psi::{EcSuite, EccProtocolProposal, EccProtocolResult, PsiDataIoProposal, PsiDataIoResult, PointOctetFormat};
use ic_core::registry::{align_scalar, extract_io_params, extract_tagged_params, intersect_repeated};

use crate::config::Config;

pub struct PsiHandler {
    pub local_rank: i32,
    pub suite: EcSuite,
    pub point_octet_format: PointOctetFormat,
    pub support_point_truncation: bool,
    pub item_num: i64,
    pub result_to_rank: Option<i32>,
}

impl PsiHandler {
    pub fn from_config(config: &Config, item_num: i64) -> Result<Self, crate::config::ConfigError> {
        Ok(Self {
            local_rank: config.rank,
            suite: EcSuite {
                curve: config.curve_type()?,
                hash: config.hash_type()?,
                hash2curve: config.hash2curve_strategy()?,
            },
            point_octet_format: config.point_octet_format()?,
            support_point_truncation: false,
            item_num,
            result_to_rank: if config.result_to_rank < 0 { None } else { Some(config.result_to_rank) },
        })
    }

    fn ecc_proposal(&self) -> EccProtocolProposal {
        EccProtocolProposal {
            suites: vec![self.suite],
            point_octet_formats: vec![self.point_octet_format],
            support_point_truncation: self.support_point_truncation,
        }
    }

    fn io_proposal(&self) -> PsiDataIoProposal {
        PsiDataIoProposal { item_num: self.item_num, result_to_rank: self.result_to_rank }
    }

    pub fn build_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            version: 2,
            requester_rank: self.local_rank,
            supported_algos: vec![(AlgoTag::EcdhPsi, Vec::new())],
            ops: vec![],
            protocol_families: vec![(
                ProtocolFamilyTag::Ecc,
                ic_core::codec::encode(&self.ecc_proposal()).expect("encode"),
            )],
            io_param: ic_core::codec::encode(&self.io_proposal()).expect("encode"),
        }
    }

    /// Aggregator-side negotiation. `requests` must include this handler's
    /// own request, so `align_scalar` on `result_to_rank` verifies agreement
    /// symmetrically rather than only among proposers.
    pub fn negotiate(&self, requests: &[HandshakeRequest]) -> Result<PsiContext, NegotiationError> {
        let agree_on_algo = requests
            .iter()
            .all(|r| r.supported_algos.iter().any(|(tag, _)| *tag == AlgoTag::EcdhPsi));
        if !agree_on_algo {
            return Err(NegotiationError::InvalidRequest("not every party proposed ECDH-PSI".into()));
        }

        let ecc_params: Vec<EccProtocolProposal> =
            extract_tagged_params(requests, |r| &r.protocol_families, &ProtocolFamilyTag::Ecc);
        if ecc_params.is_empty() {
            return Err(NegotiationError::InvalidRequest("missing ECC protocol proposal".into()));
        }
        let suites = intersect_repeated(&ecc_params, |p| p.suites.clone());
        if !suites.contains(&self.suite) {
            return Err(NegotiationError::HandshakeRefused("EC suite intersection empty".into()));
        }
        let formats = intersect_repeated(&ecc_params, |p| p.point_octet_formats.clone());
        if !formats.contains(&self.point_octet_format) {
            return Err(NegotiationError::UnsupportedArgument("point octet format not supported by all parties".into()));
        }
        let truncation_agreed = align_scalar(&ecc_params, |p| p.support_point_truncation).unwrap_or(false);
        let bit_length_after_truncated = if truncation_agreed { 0 } else { -1 };

        let io_params: Vec<PsiDataIoProposal> = extract_io_params(requests);
        if io_params.len() != requests.len() {
            return Err(NegotiationError::InvalidRequest("missing I/O parameters".into()));
        }
        let result_to_rank = align_scalar(&io_params, |p| p.result_to_rank);
        let result_to_rank = match result_to_rank {
            Some(v) if v == self.result_to_rank => v,
            _ => return Err(NegotiationError::HandshakeRefused("negotiate result_to_rank failed".into())),
        };

        Ok(PsiContext {
            suite: self.suite,
            point_octet_format: self.point_octet_format,
            bit_length_after_truncated,
            item_num: self.item_num,
            result_to_rank,
            local_rank: self.local_rank,
        })
    }

    pub fn build_response(&self, ctx: &PsiContext) -> HandshakeResponse {
        let result = EccProtocolResult {
            suite: ctx.suite,
            point_octet_format: ctx.point_octet_format,
            bit_length_after_truncated: ctx.bit_length_after_truncated,
        };
        let io = PsiDataIoResult { item_num: ctx.item_num, result_to_rank: ctx.result_to_rank };

        HandshakeResponse {
            header: Header::ok(),
            algo: Some(AlgoTag::EcdhPsi),
            algo_param: Vec::new(),
            ops: vec![],
            protocol_families: vec![(ProtocolFamilyTag::Ecc, ic_core::codec::encode(&result).expect("encode"))],
            io_param: ic_core::codec::encode(&io).expect("encode"),
        }
    }

    /// Proposer-side acceptance.
    pub fn process_response(&self, resp: &HandshakeResponse) -> Result<PsiContext, NegotiationError> {
        let result: EccProtocolResult =
            ic_core::envelope::find_tagged(&resp.protocol_families, &ProtocolFamilyTag::Ecc)
                .ok_or_else(|| NegotiationError::InvalidRequest("missing ECC protocol result".into()))?;
        if result.suite != self.suite || result.point_octet_format != self.point_octet_format {
            return Err(NegotiationError::UnsupportedArgument("negotiated EC suite/format mismatch".into()));
        }
        if result.bit_length_after_truncated != -1 && !self.support_point_truncation {
            return Err(NegotiationError::UnsupportedArgument(
                "negotiated truncation but this party never proposed support for it".into(),
            ));
        }

        let io: PsiDataIoResult = ic_core::codec::decode(&resp.io_param)
            .map_err(|e| NegotiationError::InvalidRequest(format!("bad I/O result: {e}")))?;
        if io.result_to_rank != self.result_to_rank {
            return Err(NegotiationError::HandshakeRefused("negotiate result_to_rank failed".into()));
        }

        Ok(PsiContext {
            suite: result.suite,
            point_octet_format: result.point_octet_format,
            bit_length_after_truncated: result.bit_length_after_truncated,
            item_num: io.item_num,
            result_to_rank: io.result_to_rank,
            local_rank: self.local_rank,
        })
    }
}
