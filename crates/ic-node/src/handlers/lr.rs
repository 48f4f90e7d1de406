//! SS-LR algorithm handler.

use std::collections::HashMap;

use ic_core::context::LrContext;
use ic_core::envelope::{AlgoTag, HandshakeRequest, HandshakeResponse, Header, OpTag, ProtocolFamilyTag};
use ic_core::error::NegotiationError;
use ic_core::params::lr::{
    CryptoType, FieldType, LastBatchPolicy, LrDataIoProposal, LrDataIoResult, LrHyperparamsProposal,
    LrHyperparamsResult, OptimizerKind, PrgConfigProposal, SgdParams, ShardSerializeFormat,
    SigmoidMode, SigmoidParamsProposal, SigmoidParamsResult, SsProtocolKind, SsProtocolProposal,
    SsProtocolResult, TripleConfigProposal, TruncMode, TruncModeProposal,
};
use ic_core::registry::{align_scalar, extract_io_params, extract_tagged_params, intersect_repeated, intersect_repeated_nested, use_penalty_term};

use crate::config::Config;

/// The local proposal plus the preferences a successful negotiation must
/// respect.
pub struct LrHandler {
    pub local_rank: i32,
    pub world_size: i32,
    pub sample_size: i64,
    pub feature_num: i32,
    pub has_label: bool,

    pub last_batch_policy: LastBatchPolicy,
    pub l0_norm: f64,
    pub l1_norm: f64,
    pub l2_norm: f64,
    pub learning_rate: f64,
    pub sigmoid_mode: SigmoidMode,
    pub optimizer: OptimizerKind,

    pub ss_protocol: SsProtocolKind,
    pub field_type: FieldType,
    pub fxp_bits: i32,
    pub shard_format: ShardSerializeFormat,
    pub trunc_mode: TruncMode,

    pub num_epoch: i64,
    pub batch_size: i64,

    /// Whether a trusted-third-party beaver triple provider backs this
    /// party's SS engine. Mirrors the original's local beaver-provider
    /// switch (TrustedThirdParty vs TrustedFirstParty) rather than a
    /// negotiated field — the TTP connection details below are only
    /// meaningful when this is set.
    pub use_ttp: bool,
    pub ttp_server_host: String,
    pub ttp_session_id: String,
    pub ttp_adjust_rank: i32,
}

const TRIPLE_SERVER_VERSION: i32 = 1;

impl LrHandler {
    pub fn from_config(config: &Config, sample_size: i64, feature_num: i32) -> Result<Self, crate::config::ConfigError> {
        let optimizer = config.optimizer()?;
        if optimizer != OptimizerKind::Sgd {
            return Err(crate::config::ConfigError::OptimizerNotImplemented(optimizer));
        }
        Ok(Self {
            local_rank: config.rank,
            world_size: config.world_size() as i32,
            sample_size,
            feature_num,
            has_label: config.has_label,
            last_batch_policy: config.last_batch_policy()?,
            l0_norm: config.l0_norm,
            l1_norm: config.l1_norm,
            l2_norm: config.l2_norm,
            learning_rate: config.learning_rate,
            sigmoid_mode: SigmoidMode::Real,
            optimizer,
            ss_protocol: config.ss_protocol()?,
            field_type: config.field_type()?,
            fxp_bits: config.fxp_bits,
            shard_format: ShardSerializeFormat::Raw,
            trunc_mode: config.trunc_mode()?,
            num_epoch: config.num_epoch,
            batch_size: config.batch_size,
            use_ttp: config.use_ttp,
            ttp_server_host: if config.use_ttp { config.ttp_server_host.clone() } else { String::new() },
            ttp_session_id: if config.use_ttp { config.ttp_session_id.clone() } else { String::new() },
            ttp_adjust_rank: if config.use_ttp { config.ttp_adjust_rank } else { 0 },
        })
    }

    fn algo_proposal(&self) -> LrHyperparamsProposal {
        LrHyperparamsProposal {
            optimizers: vec![self.optimizer],
            last_batch_policies: vec![self.last_batch_policy],
            use_l0_norm: use_penalty_term(self.l0_norm),
            use_l1_norm: use_penalty_term(self.l1_norm),
            use_l2_norm: use_penalty_term(self.l2_norm),
        }
    }

    fn sigmoid_proposal(&self) -> SigmoidParamsProposal {
        SigmoidParamsProposal { sigmoid_modes: vec![self.sigmoid_mode] }
    }

    fn ss_proposal(&self) -> SsProtocolProposal {
        SsProtocolProposal {
            supported_protocols: vec![self.ss_protocol],
            field_types: vec![self.field_type],
            shard_serialize_formats: vec![self.shard_format],
            trunc_modes: vec![TruncModeProposal { method: self.trunc_mode, compatible_protocols: vec![] }],
            prg_configs: vec![PrgConfigProposal { crypto_type: CryptoType::Aes128Ctr }],
            triple_configs: vec![TripleConfigProposal { server_version: TRIPLE_SERVER_VERSION }],
        }
    }

    fn io_proposal(&self) -> LrDataIoProposal {
        LrDataIoProposal { sample_size: self.sample_size, feature_num: self.feature_num, has_label: self.has_label }
    }

    pub fn build_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            version: 2,
            requester_rank: self.local_rank,
            supported_algos: vec![(AlgoTag::SsLr, ic_core::codec::encode(&self.algo_proposal()).expect("encode"))],
            ops: vec![(OpTag::Sigmoid, ic_core::codec::encode(&self.sigmoid_proposal()).expect("encode"))],
            protocol_families: vec![(ProtocolFamilyTag::Ss, ic_core::codec::encode(&self.ss_proposal()).expect("encode"))],
            io_param: ic_core::codec::encode(&self.io_proposal()).expect("encode"),
        }
    }

    /// Aggregator-side negotiation. `requests` must include this handler's
    /// own request (built via `build_request`) so that self-consistency is
    /// checked symmetrically with every proposer.
    pub fn negotiate(&self, requests: &[HandshakeRequest]) -> Result<LrContext, NegotiationError> {
        let algo_params: Vec<LrHyperparamsProposal> =
            extract_tagged_params(requests, |r| &r.supported_algos, &AlgoTag::SsLr);
        if algo_params.is_empty() {
            return Err(NegotiationError::InvalidRequest("missing SS-LR hyperparameter proposal".into()));
        }
        let optimizers = intersect_repeated(&algo_params, |p| p.optimizers.clone());
        if !optimizers.contains(&self.optimizer) {
            return Err(NegotiationError::UnsupportedArgument("SGD optimizer not supported by all parties".into()));
        }
        let last_batch_policies = intersect_repeated(&algo_params, |p| p.last_batch_policies.clone());
        if !last_batch_policies.contains(&self.last_batch_policy) {
            return Err(NegotiationError::UnsupportedArgument("last batch policy not supported by all parties".into()));
        }
        let use_l0 = align_scalar(&algo_params, |p| p.use_l0_norm).unwrap_or(false);
        let use_l1 = align_scalar(&algo_params, |p| p.use_l1_norm).unwrap_or(false);
        let use_l2 = align_scalar(&algo_params, |p| p.use_l2_norm).unwrap_or(false);
        let l0_norm = use_l0.then_some(self.l0_norm);
        let l1_norm = use_l1.then_some(self.l1_norm);
        let l2_norm = use_l2.then_some(self.l2_norm);

        let sigmoid_params: Vec<SigmoidParamsProposal> = extract_tagged_params(requests, |r| &r.ops, &OpTag::Sigmoid);
        if sigmoid_params.is_empty() {
            return Err(NegotiationError::InvalidRequest("missing sigmoid parameter proposal".into()));
        }
        let sigmoid_modes = intersect_repeated(&sigmoid_params, |p| p.sigmoid_modes.clone());
        if !sigmoid_modes.contains(&self.sigmoid_mode) {
            return Err(NegotiationError::UnsupportedArgument("sigmoid mode not supported by all parties".into()));
        }

        let ss_params: Vec<SsProtocolProposal> =
            extract_tagged_params(requests, |r| &r.protocol_families, &ProtocolFamilyTag::Ss);
        if ss_params.is_empty() {
            return Err(NegotiationError::InvalidRequest("missing SS protocol proposal".into()));
        }
        let protocols = intersect_repeated(&ss_params, |p| p.supported_protocols.clone());
        if !protocols.contains(&self.ss_protocol) {
            return Err(NegotiationError::UnsupportedArgument("SS protocol not supported by all parties".into()));
        }
        let field_types = intersect_repeated(&ss_params, |p| p.field_types.clone());
        if !field_types.contains(&self.field_type) {
            return Err(NegotiationError::UnsupportedArgument("field type not supported by all parties".into()));
        }
        let shard_formats = intersect_repeated(&ss_params, |p| p.shard_serialize_formats.clone());
        if !shard_formats.contains(&self.shard_format) {
            return Err(NegotiationError::UnsupportedArgument("shard format not supported by all parties".into()));
        }
        let trunc_modes = intersect_repeated_nested(
            &ss_params,
            |p| p.trunc_modes.as_slice(),
            |t| {
                if t.compatible_protocols.is_empty() || t.compatible_protocols.contains(&self.ss_protocol) {
                    Some(t.method)
                } else {
                    None
                }
            },
        );
        if !trunc_modes.contains(&self.trunc_mode) {
            return Err(NegotiationError::UnsupportedArgument("truncation mode not supported by all parties".into()));
        }
        let prg_types = intersect_repeated_nested(&ss_params, |p| p.prg_configs.as_slice(), |c| Some(c.crypto_type));
        if !prg_types.contains(&CryptoType::Aes128Ctr) {
            return Err(NegotiationError::UnsupportedArgument("AES128-CTR PRG not supported by all parties".into()));
        }
        let triple_versions =
            intersect_repeated_nested(&ss_params, |p| p.triple_configs.as_slice(), |c| Some(c.server_version));
        if !triple_versions.contains(&TRIPLE_SERVER_VERSION) {
            return Err(NegotiationError::UnsupportedArgument("triple server version not supported by all parties".into()));
        }

        let io_params: Vec<LrDataIoProposal> = extract_io_params(requests);
        if io_params.len() != requests.len() {
            return Err(NegotiationError::InvalidRequest("missing I/O parameters".into()));
        }
        let mut feature_nums: HashMap<i32, i32> = HashMap::new();
        let mut label_rank: Option<i32> = None;
        for (request, io) in requests.iter().zip(io_params.iter()) {
            if request.requester_rank < 0 || request.requester_rank >= self.world_size {
                return Err(NegotiationError::InvalidRequest(format!(
                    "requester_rank {} out of range for world size {}",
                    request.requester_rank, self.world_size
                )));
            }
            if io.sample_size != self.sample_size {
                return Err(NegotiationError::HandshakeRefused("sample size inconsistent".into()));
            }
            if io.feature_num <= 0 {
                return Err(NegotiationError::InvalidRequest("feature_num must be positive".into()));
            }
            if feature_nums.insert(request.requester_rank, io.feature_num).is_some() {
                return Err(NegotiationError::InvalidRequest(format!(
                    "duplicate requester_rank {}",
                    request.requester_rank
                )));
            }
            if io.has_label {
                if label_rank.is_some() {
                    return Err(NegotiationError::HandshakeRefused("more than one party reports has_label".into()));
                }
                label_rank = Some(request.requester_rank);
            }
        }
        let label_rank = label_rank.ok_or_else(|| NegotiationError::HandshakeRefused("no party reports has_label".into()))?;
        if feature_nums.len() != self.world_size as usize {
            return Err(NegotiationError::InvalidRequest("not every rank in 0..world_size reported I/O parameters".into()));
        }
        let feature_nums: Vec<i32> = (0..self.world_size)
            .map(|rank| {
                feature_nums
                    .get(&rank)
                    .copied()
                    .ok_or_else(|| NegotiationError::InvalidRequest(format!("missing feature_num for rank {rank}")))
            })
            .collect::<Result<_, _>>()?;

        Ok(LrContext {
            num_epoch: self.num_epoch,
            batch_size: self.batch_size,
            last_batch_policy: self.last_batch_policy,
            l0_norm,
            l1_norm,
            l2_norm,
            optimizer: self.optimizer,
            sgd: Some(SgdParams { learning_rate: self.learning_rate }),
            sigmoid_mode: self.sigmoid_mode,
            ss_protocol: self.ss_protocol,
            field_type: self.field_type,
            fxp_fraction_bits: self.fxp_bits,
            shard_serialize_format: self.shard_format,
            trunc_mode: self.trunc_mode,
            use_ttp: self.use_ttp,
            ttp_server_host: self.ttp_server_host.clone(),
            ttp_session_id: self.ttp_session_id.clone(),
            ttp_adjust_rank: self.ttp_adjust_rank,
            sample_size: self.sample_size,
            feature_nums,
            label_rank,
            local_rank: self.local_rank,
        })
    }

    pub fn build_response(&self, ctx: &LrContext) -> HandshakeResponse {
        let hyper = LrHyperparamsResult {
            num_epoch: ctx.num_epoch,
            batch_size: ctx.batch_size,
            last_batch_policy: ctx.last_batch_policy,
            l0_norm: ctx.l0_norm,
            l1_norm: ctx.l1_norm,
            l2_norm: ctx.l2_norm,
            optimizer: ctx.optimizer,
            sgd: ctx.sgd,
        };
        let sigmoid = SigmoidParamsResult { sigmoid_mode: ctx.sigmoid_mode };
        let ss = SsProtocolResult {
            protocol: ctx.ss_protocol,
            field_type: ctx.field_type,
            fxp_fraction_bits: ctx.fxp_fraction_bits,
            shard_serialize_format: ctx.shard_serialize_format,
            trunc_mode: ctx.trunc_mode,
            ttp_server_version: TRIPLE_SERVER_VERSION,
            ttp_server_host: ctx.ttp_server_host.clone(),
            ttp_session_id: ctx.ttp_session_id.clone(),
            ttp_adjust_rank: ctx.ttp_adjust_rank,
        };
        let io = LrDataIoResult { sample_size: ctx.sample_size, feature_nums: ctx.feature_nums.clone(), label_rank: ctx.label_rank };

        HandshakeResponse {
            header: Header::ok(),
            algo: Some(AlgoTag::SsLr),
            algo_param: ic_core::codec::encode(&hyper).expect("encode"),
            ops: vec![(OpTag::Sigmoid, ic_core::codec::encode(&sigmoid).expect("encode"))],
            protocol_families: vec![(ProtocolFamilyTag::Ss, ic_core::codec::encode(&ss).expect("encode"))],
            io_param: ic_core::codec::encode(&io).expect("encode"),
        }
    }

    /// Proposer-side acceptance.
    pub fn process_response(&self, resp: &HandshakeResponse) -> Result<LrContext, NegotiationError> {
        let hyper: LrHyperparamsResult = ic_core::codec::decode(&resp.algo_param)
            .map_err(|e| NegotiationError::InvalidRequest(format!("bad hyperparameter result: {e}")))?;
        if hyper.optimizer != self.optimizer {
            return Err(NegotiationError::UnsupportedArgument("negotiated optimizer mismatch".into()));
        }
        if hyper.last_batch_policy != self.last_batch_policy {
            return Err(NegotiationError::UnsupportedArgument("negotiated last batch policy mismatch".into()));
        }
        for (proposed, negotiated) in [(self.l0_norm, hyper.l0_norm), (self.l1_norm, hyper.l1_norm), (self.l2_norm, hyper.l2_norm)] {
            if let Some(v) = negotiated {
                if !ic_core::registry::almost_equal(v, proposed, 2) {
                    return Err(NegotiationError::UnsupportedArgument("negotiated penalty coefficient mismatch".into()));
                }
            }
        }

        let sigmoid: SigmoidParamsResult =
            ic_core::envelope::find_tagged(&resp.ops, &OpTag::Sigmoid)
                .ok_or_else(|| NegotiationError::InvalidRequest("missing sigmoid result".into()))?;
        if sigmoid.sigmoid_mode != self.sigmoid_mode {
            return Err(NegotiationError::UnsupportedArgument("negotiated sigmoid mode mismatch".into()));
        }

        let ss: SsProtocolResult =
            ic_core::envelope::find_tagged(&resp.protocol_families, &ProtocolFamilyTag::Ss)
                .ok_or_else(|| NegotiationError::InvalidRequest("missing SS protocol result".into()))?;
        if ss.protocol != self.ss_protocol || ss.field_type != self.field_type {
            return Err(NegotiationError::UnsupportedArgument("negotiated SS protocol/field mismatch".into()));
        }
        if ss.shard_serialize_format != self.shard_format || ss.trunc_mode != self.trunc_mode {
            return Err(NegotiationError::UnsupportedArgument("negotiated SS shard/trunc mismatch".into()));
        }

        let io: LrDataIoResult = ic_core::codec::decode(&resp.io_param)
            .map_err(|e| NegotiationError::InvalidRequest(format!("bad I/O result: {e}")))?;
        if io.sample_size != self.sample_size {
            return Err(NegotiationError::HandshakeRefused("sample size inconsistent".into()));
        }

        Ok(LrContext {
            num_epoch: hyper.num_epoch,
            batch_size: hyper.batch_size,
            last_batch_policy: hyper.last_batch_policy,
            l0_norm: hyper.l0_norm,
            l1_norm: hyper.l1_norm,
            l2_norm: hyper.l2_norm,
            optimizer: hyper.optimizer,
            sgd: hyper.sgd,
            sigmoid_mode: sigmoid.sigmoid_mode,
            ss_protocol: ss.protocol,
            field_type: ss.field_type,
            fxp_fraction_bits: ss.fxp_fraction_bits,
            shard_serialize_format: ss.shard_serialize_format,
            trunc_mode: ss.trunc_mode,
            use_ttp: self.use_ttp,
            ttp_server_host: ss.ttp_server_host,
            ttp_session_id: ss.ttp_session_id,
            ttp_adjust_rank: ss.ttp_adjust_rank,
            sample_size: io.sample_size,
            feature_nums: io.feature_nums,
            label_rank: io.label_rank,
            local_rank: self.local_rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::config::{Config, ConfigError};

    #[test]
    fn from_config_rejects_unimplemented_optimizer() {
        let config = Config::parse_from(["ic-node", "--optimizer", "adam"]);
        let err = LrHandler::from_config(&config, 100, 5).unwrap_err();
        assert!(matches!(err, ConfigError::OptimizerNotImplemented(OptimizerKind::Adam)));
    }

    #[test]
    fn from_config_accepts_sgd() {
        let config = Config::parse_from(["ic-node", "--optimizer", "sgd"]);
        let handler = LrHandler::from_config(&config, 100, 5).unwrap();
        assert_eq!(handler.optimizer, OptimizerKind::Sgd);
    }

    #[test]
    fn ttp_fields_are_blanked_when_use_ttp_is_unset() {
        let config = Config::parse_from([
            "ic-node",
            "--ttp_server_host",
            "ttp.example.com:9000",
            "--ttp_session_id",
            "session-1",
            "--ttp_adjust_rank",
            "1",
        ]);
        let handler = LrHandler::from_config(&config, 100, 5).unwrap();
        assert!(!handler.use_ttp);
        assert_eq!(handler.ttp_server_host, "");
        assert_eq!(handler.ttp_session_id, "");
        assert_eq!(handler.ttp_adjust_rank, 0);
    }

    #[test]
    fn ttp_fields_carry_through_when_use_ttp_is_set() {
        let config = Config::parse_from([
            "ic-node",
            "--use_ttp",
            "--ttp_server_host",
            "ttp.example.com:9000",
            "--ttp_session_id",
            "session-1",
            "--ttp_adjust_rank",
            "1",
        ]);
        let handler = LrHandler::from_config(&config, 100, 5).unwrap();
        assert!(handler.use_ttp);
        assert_eq!(handler.ttp_server_host, "ttp.example.com:9000");
        assert_eq!(handler.ttp_session_id, "session-1");
        assert_eq!(handler.ttp_adjust_rank, 1);
    }
}
