//! Negotiated contexts
//!
//! A context is the product of a successful handshake: every field here has
//! already survived intersection/alignment and is safe for a handler to act
//! on without re-checking compatibility.

use crate::params::lr::{
    FieldType, LastBatchPolicy, LrDataIoResult, OptimizerKind, SgdParams, ShardSerializeFormat,
    SigmoidMode, SsProtocolKind, TruncMode,
};
use crate::params::psi::{EcSuite, PointOctetFormat};

#[derive(Clone, Debug, PartialEq)]
pub struct LrContext {
    pub num_epoch: i64,
    pub batch_size: i64,
    pub last_batch_policy: LastBatchPolicy,
    pub l0_norm: Option<f64>,
    pub l1_norm: Option<f64>,
    pub l2_norm: Option<f64>,
    pub optimizer: OptimizerKind,
    pub sgd: Option<SgdParams>,
    pub sigmoid_mode: SigmoidMode,
    pub ss_protocol: SsProtocolKind,
    pub field_type: FieldType,
    pub fxp_fraction_bits: i32,
    pub shard_serialize_format: ShardSerializeFormat,
    pub trunc_mode: TruncMode,
    pub use_ttp: bool,
    pub ttp_server_host: String,
    pub ttp_session_id: String,
    pub ttp_adjust_rank: i32,
    pub sample_size: i64,
    pub feature_nums: Vec<i32>,
    pub label_rank: i32,
    pub local_rank: i32,
}

impl LrContext {
    pub fn is_label_owner(&self) -> bool {
        self.local_rank == self.label_rank
    }

    pub fn use_l2(&self) -> bool {
        self.l2_norm.map(crate::registry::use_penalty_term).unwrap_or(false)
    }
}

impl LrDataIoResult {
    pub fn local_feature_num(&self, local_rank: i32) -> Option<i32> {
        self.feature_nums.get(local_rank as usize).copied()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PsiContext {
    pub suite: EcSuite,
    pub point_octet_format: PointOctetFormat,
    pub bit_length_after_truncated: i32,
    pub item_num: i64,
    pub result_to_rank: Option<i32>,
    pub local_rank: i32,
}

impl PsiContext {
    /// Whether this party should receive the intersection result locally.
    /// `result_to_rank: None` broadcasts to everyone.
    pub fn receives_result(&self) -> bool {
        match self.result_to_rank {
            None => true,
            Some(rank) => rank == self.local_rank,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::psi::{CurveType, HashToCurveStrategy, HashType};

    fn suite() -> EcSuite {
        EcSuite {
            curve: CurveType::Curve25519,
            hash: HashType::Sha256,
            hash2curve: HashToCurveStrategy::DirectHashAsPointX,
        }
    }

    #[test]
    fn receives_result_broadcast_when_unset() {
        let ctx = PsiContext {
            suite: suite(),
            point_octet_format: PointOctetFormat::Uncompressed,
            bit_length_after_truncated: 12,
            item_num: 0,
            result_to_rank: None,
            local_rank: 3,
        };
        assert!(ctx.receives_result());
    }

    #[test]
    fn receives_result_only_for_target_rank() {
        let mut ctx = PsiContext {
            suite: suite(),
            point_octet_format: PointOctetFormat::Uncompressed,
            bit_length_after_truncated: 12,
            item_num: 0,
            result_to_rank: Some(0),
            local_rank: 1,
        };
        assert!(!ctx.receives_result());
        ctx.local_rank = 0;
        assert!(ctx.receives_result());
    }
}
