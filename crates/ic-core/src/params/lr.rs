//! SS-LR proposal/result wire types.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OptimizerKind {
    Sgd,
    Momentum,
    Adagrad,
    Adadelta,
    Rmsprop,
    Adam,
    Adamax,
    Nadam,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LastBatchPolicy {
    Discard,
    Pad,
    Keep,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SigmoidMode {
    Real,
    MiniMax1,
    SegmentThree,
}

/// SGD is the only optimizer with an implemented training step; the other
/// seven kinds negotiate like any other optimizer but fail loudly if chosen
/// for training.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SgdParams {
    pub learning_rate: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LrHyperparamsProposal {
    pub optimizers: Vec<OptimizerKind>,
    pub last_batch_policies: Vec<LastBatchPolicy>,
    pub use_l0_norm: bool,
    pub use_l1_norm: bool,
    pub use_l2_norm: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LrHyperparamsResult {
    pub num_epoch: i64,
    pub batch_size: i64,
    pub last_batch_policy: LastBatchPolicy,
    /// `None` when the penalty was negotiated away: disabled penalties are
    /// reset to 0 and omitted from the response.
    pub l0_norm: Option<f64>,
    pub l1_norm: Option<f64>,
    pub l2_norm: Option<f64>,
    pub optimizer: OptimizerKind,
    pub sgd: Option<SgdParams>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigmoidParamsProposal {
    pub sigmoid_modes: Vec<SigmoidMode>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigmoidParamsResult {
    pub sigmoid_mode: SigmoidMode,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SsProtocolKind {
    Semi2k,
    Aby3,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FieldType {
    Ring32,
    Ring64,
    Ring128,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ShardSerializeFormat {
    Raw,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TruncMode {
    Probabilistic,
    Deterministic,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CryptoType {
    Aes128Ctr,
}

/// A trunc-mode proposal; `compatible_protocols` empty means "applies to all
/// SS protocols".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TruncModeProposal {
    pub method: TruncMode,
    pub compatible_protocols: Vec<SsProtocolKind>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrgConfigProposal {
    pub crypto_type: CryptoType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TripleConfigProposal {
    pub server_version: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SsProtocolProposal {
    pub supported_protocols: Vec<SsProtocolKind>,
    pub field_types: Vec<FieldType>,
    pub shard_serialize_formats: Vec<ShardSerializeFormat>,
    pub trunc_modes: Vec<TruncModeProposal>,
    pub prg_configs: Vec<PrgConfigProposal>,
    pub triple_configs: Vec<TripleConfigProposal>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SsProtocolResult {
    pub protocol: SsProtocolKind,
    pub field_type: FieldType,
    pub fxp_fraction_bits: i32,
    pub shard_serialize_format: ShardSerializeFormat,
    pub trunc_mode: TruncMode,
    pub ttp_server_version: i32,
    pub ttp_server_host: String,
    pub ttp_session_id: String,
    pub ttp_adjust_rank: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LrDataIoProposal {
    pub sample_size: i64,
    pub feature_num: i32,
    pub has_label: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LrDataIoResult {
    pub sample_size: i64,
    pub feature_nums: Vec<i32>,
    pub label_rank: i32,
}
