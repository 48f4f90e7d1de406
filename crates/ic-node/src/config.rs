//! Configuration Resolver.
//!
//! Resolution order for every flag: environment variable
//! `runtime.component.parameter.<name>` if present, else the CLI flag value,
//! else the compile-time default. `clap`'s own `env` attribute gives us that
//! precedence for free — clap checks the named env var before falling back
//! to the flag's `default_value`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use ic_core::params::lr::{LastBatchPolicy, OptimizerKind};
use ic_core::params::psi::{CurveType, HashToCurveStrategy, HashType, PointOctetFormat};
use ic_core::params::lr::{FieldType, SsProtocolKind, TruncMode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown value {0:?} for {1}")]
    UnknownEnumValue(String, &'static str),
    #[error("{0} cannot be the unspecified/zero value")]
    Unspecified(&'static str),
    #[error("optimizer {0:?} is not implemented; only SGD trains")]
    OptimizerNotImplemented(OptimizerKind),
    #[error("invalid socket address {0:?}: {1}")]
    InvalidAddr(String, std::net::AddrParseError),
    #[error("malformed feature_nums JSON: {0}")]
    FeatureNums(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgoKind {
    EcdhPsi,
    SsLr,
}

/// CLI flags for one party's run.
#[derive(Parser, Debug, Clone)]
#[command(name = "ic-node")]
#[command(about = "Interconnection handshake + negotiated algorithm runtime")]
pub struct Config {
    /// Comma list of host:port, one per rank in cohort order
    #[arg(long, env = "runtime.component.parameter.parties", default_value = "127.0.0.1:9530,127.0.0.1:9531", value_delimiter = ',')]
    pub parties: Vec<String>,

    /// This party's rank
    #[arg(long, env = "runtime.component.parameter.rank", default_value_t = 0)]
    pub rank: i32,

    /// Handshake envelope version
    #[arg(long, env = "runtime.component.parameter.ic_version", default_value_t = 2)]
    pub ic_version: u32,

    /// Algorithm to run
    #[arg(long, env = "runtime.component.parameter.algo", default_value = "ECDH_PSI")]
    pub algo: String,

    /// Comma list of protocol families
    #[arg(long, env = "runtime.component.parameter.protocol_families", default_value = "ecc", value_delimiter = ',')]
    pub protocol_families: Vec<String>,

    /// Bypass negotiation; local proposals are taken as truth
    #[arg(long, env = "runtime.component.parameter.disable_handshake")]
    pub disable_handshake: bool,

    // --- PSI ---
    #[arg(long, env = "runtime.component.parameter.in_path")]
    pub in_path: Option<PathBuf>,
    #[arg(long, env = "runtime.component.parameter.field_names", value_delimiter = ',')]
    pub field_names: Vec<String>,
    #[arg(long, env = "runtime.component.parameter.out_path")]
    pub out_path: Option<PathBuf>,
    #[arg(long, env = "runtime.component.parameter.should_sort")]
    pub should_sort: bool,
    #[arg(long, env = "runtime.component.parameter.precheck_input")]
    pub precheck_input: bool,
    #[arg(long, env = "runtime.component.parameter.result_to_rank", default_value_t = -1)]
    pub result_to_rank: i32,

    // --- LR ---
    #[arg(long, env = "runtime.component.parameter.dataset")]
    pub dataset: Option<PathBuf>,
    #[arg(long, env = "runtime.component.parameter.skip_rows", default_value_t = 1)]
    pub skip_rows: usize,
    #[arg(long, env = "runtime.component.parameter.lr_output")]
    pub lr_output: Option<PathBuf>,
    #[arg(long, env = "runtime.component.parameter.has_label")]
    pub has_label: bool,
    #[arg(long, env = "runtime.component.parameter.batch_size", default_value_t = 21)]
    pub batch_size: i64,
    #[arg(long, env = "runtime.component.parameter.num_epoch", default_value_t = 1)]
    pub num_epoch: i64,
    #[arg(long, env = "runtime.component.parameter.last_batch_policy", default_value = "discard")]
    pub last_batch_policy: String,
    #[arg(long, env = "runtime.component.parameter.l0_norm", default_value_t = 0.0)]
    pub l0_norm: f64,
    #[arg(long, env = "runtime.component.parameter.l1_norm", default_value_t = 0.0)]
    pub l1_norm: f64,
    #[arg(long, env = "runtime.component.parameter.l2_norm", default_value_t = 0.5)]
    pub l2_norm: f64,
    #[arg(long, env = "runtime.component.parameter.optimizer", default_value = "sgd")]
    pub optimizer: String,
    #[arg(long, env = "runtime.component.parameter.learning_rate", default_value_t = 1e-4)]
    pub learning_rate: f64,

    // --- ECC ---
    #[arg(long, env = "runtime.component.parameter.curve_type", default_value = "curve25519")]
    pub curve_type: String,
    #[arg(long, env = "runtime.component.parameter.hash_type", default_value = "sha_256")]
    pub hash_type: String,
    #[arg(long, env = "runtime.component.parameter.hash2curve_strategy", default_value = "direct_hash_as_point_x")]
    pub hash2curve_strategy: String,
    #[arg(long, env = "runtime.component.parameter.point_octet_format", default_value = "uncompressed")]
    pub point_octet_format: String,

    // --- SS ---
    #[arg(long, env = "runtime.component.parameter.protocol", default_value = "semi2k")]
    pub protocol: String,
    #[arg(long, env = "runtime.component.parameter.field", default_value = "64")]
    pub field: String,
    #[arg(long, env = "runtime.component.parameter.fxp_bits", default_value_t = 18)]
    pub fxp_bits: i32,
    #[arg(long, env = "runtime.component.parameter.trunc_mode", default_value = "probabilistic")]
    pub trunc_mode: String,
    #[arg(long, env = "runtime.component.parameter.shard_serialize_format", default_value = "raw")]
    pub shard_serialize_format: String,
    #[arg(long, env = "runtime.component.parameter.use_ttp")]
    pub use_ttp: bool,
    #[arg(long, env = "runtime.component.parameter.ttp_server_host", default_value = "")]
    pub ttp_server_host: String,
    #[arg(long, env = "runtime.component.parameter.ttp_session_id", default_value = "")]
    pub ttp_session_id: String,
    #[arg(long, env = "runtime.component.parameter.ttp_adjust_rank", default_value_t = 0)]
    pub ttp_adjust_rank: i32,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    pub fn world_size(&self) -> usize {
        self.parties.len()
    }

    pub fn party_addrs(&self) -> Result<HashMap<i32, SocketAddr>, ConfigError> {
        self.parties
            .iter()
            .enumerate()
            .map(|(rank, addr)| {
                addr.parse::<SocketAddr>()
                    .map(|a| (rank as i32, a))
                    .map_err(|e| ConfigError::InvalidAddr(addr.clone(), e))
            })
            .collect()
    }

    pub fn algo(&self) -> Result<AlgoKind, ConfigError> {
        match self.algo.to_uppercase().as_str() {
            "ECDH_PSI" => Ok(AlgoKind::EcdhPsi),
            "SS_LR" => Ok(AlgoKind::SsLr),
            other => Err(ConfigError::UnknownEnumValue(other.to_string(), "algo")),
        }
    }

    pub fn optimizer(&self) -> Result<OptimizerKind, ConfigError> {
        resolve_enum(
            &self.optimizer,
            "optimizer",
            &[
                ("SGD", OptimizerKind::Sgd),
                ("MOMENTUM", OptimizerKind::Momentum),
                ("ADAGRAD", OptimizerKind::Adagrad),
                ("ADADELTA", OptimizerKind::Adadelta),
                ("RMSPROP", OptimizerKind::Rmsprop),
                ("ADAM", OptimizerKind::Adam),
                ("ADAMAX", OptimizerKind::Adamax),
                ("NADAM", OptimizerKind::Nadam),
            ],
        )
    }

    pub fn last_batch_policy(&self) -> Result<LastBatchPolicy, ConfigError> {
        resolve_enum(
            &self.last_batch_policy,
            "last_batch_policy",
            &[
                ("DISCARD", LastBatchPolicy::Discard),
                ("PAD", LastBatchPolicy::Pad),
                ("KEEP", LastBatchPolicy::Keep),
            ],
        )
    }

    pub fn curve_type(&self) -> Result<CurveType, ConfigError> {
        resolve_enum(
            &self.curve_type,
            "curve_type",
            &[("CURVE25519", CurveType::Curve25519), ("SM2", CurveType::Sm2)],
        )
    }

    pub fn hash_type(&self) -> Result<HashType, ConfigError> {
        resolve_enum(&self.hash_type, "hash_type", &[("SHA_256", HashType::Sha256)])
    }

    pub fn hash2curve_strategy(&self) -> Result<HashToCurveStrategy, ConfigError> {
        resolve_enum(
            &self.hash2curve_strategy,
            "hash2curve_strategy",
            &[
                ("DIRECT_HASH_AS_POINT_X", HashToCurveStrategy::DirectHashAsPointX),
                ("TRY_AND_REHASH", HashToCurveStrategy::TryAndRehash),
            ],
        )
    }

    pub fn point_octet_format(&self) -> Result<PointOctetFormat, ConfigError> {
        resolve_enum(
            &self.point_octet_format,
            "point_octet_format",
            &[
                ("UNCOMPRESSED", PointOctetFormat::Uncompressed),
                ("COMPRESSED", PointOctetFormat::Compressed),
            ],
        )
    }

    pub fn ss_protocol(&self) -> Result<SsProtocolKind, ConfigError> {
        resolve_enum(
            &self.protocol,
            "protocol",
            &[("SEMI2K", SsProtocolKind::Semi2k), ("ABY3", SsProtocolKind::Aby3)],
        )
    }

    pub fn field_type(&self) -> Result<FieldType, ConfigError> {
        resolve_enum(
            &self.field,
            "field",
            &[("32", FieldType::Ring32), ("64", FieldType::Ring64), ("128", FieldType::Ring128)],
        )
    }

    pub fn trunc_mode(&self) -> Result<TruncMode, ConfigError> {
        resolve_enum(
            &self.trunc_mode,
            "trunc_mode",
            &[("PROBABILISTIC", TruncMode::Probabilistic), ("DETERMINISTIC", TruncMode::Deterministic)],
        )
    }

    /// Sanity checks that don't depend on the negotiated outcome: malformed
    /// input here is a misconfiguration, not a handshake refusal.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parties.is_empty() {
            anyhow::bail!("parties list cannot be empty");
        }
        if self.rank < 0 || self.rank as usize >= self.parties.len() {
            anyhow::bail!("rank {} out of range for {} parties", self.rank, self.parties.len());
        }
        if self.ic_version < 2 {
            anyhow::bail!("ic_version {} is unsupported (minimum supported is 2)", self.ic_version);
        }
        if matches!(self.algo()?, AlgoKind::SsLr) && (self.batch_size <= 0 || self.num_epoch <= 0) {
            anyhow::bail!("batch_size and num_epoch must be positive for SS_LR");
        }
        Ok(())
    }

    /// Consulted only when `--disable_handshake` is set: the rank that holds
    /// the label, in place of what the handshake would have discovered via
    /// `has_label`.
    pub fn label_owner_override(&self) -> Option<i32> {
        std::env::var("runtime.component.parameter.label_owner")
            .ok()
            .and_then(|v| v.parse().ok())
    }

    /// JSON map `{"0": 5, "1": 7}` of party rank to feature count, consulted
    /// only when `--disable_handshake` is set.
    pub fn feature_nums_override(&self) -> Result<Option<HashMap<i32, i32>>, ConfigError> {
        match std::env::var("runtime.component.parameter.feature_nums") {
            Ok(raw) => {
                let parsed: HashMap<String, i32> = serde_json::from_str(&raw)?;
                Ok(Some(
                    parsed
                        .into_iter()
                        .filter_map(|(k, v)| k.parse::<i32>().ok().map(|rank| (rank, v)))
                        .collect(),
                ))
            }
            Err(_) => Ok(None),
        }
    }

    /// `system.storage[.host.url]` plus the `runtime.component.input/output.train_data`
    /// JSON descriptors. Returns the overridden path if both the storage
    /// root and a descriptor are present.
    pub fn storage_override(&self, descriptor_env: &str) -> Option<PathBuf> {
        let root = std::env::var("system.storage")
            .or_else(|_| std::env::var("system.storage.host.url"))
            .ok()?;
        let root = root.strip_prefix("file://")?;
        let descriptor_raw = std::env::var(descriptor_env).ok()?;
        let descriptor: StorageDescriptor = serde_json::from_str(&descriptor_raw).ok()?;
        Some(PathBuf::from(root).join(descriptor.namespace).join(descriptor.name))
    }
}

#[derive(serde::Deserialize)]
struct StorageDescriptor {
    namespace: String,
    name: String,
}

/// Resolves a flag's textual value against `variants` by up-casing and
/// matching against the tag (mirroring a proto enum descriptor lookup with a
/// fixed prefix). `""` and `"UNSPECIFIED"` are rejected distinctly from an
/// unrecognized value: they stand in for a proto enum's zero value, which
/// spec.md §4.7 calls out as never a valid resolution.
fn resolve_enum<T: Copy>(raw: &str, field: &'static str, variants: &[(&str, T)]) -> Result<T, ConfigError> {
    let upper = raw.to_uppercase();
    if upper.is_empty() || upper == "UNSPECIFIED" {
        return Err(ConfigError::Unspecified(field));
    }
    variants
        .iter()
        .find(|(tag, _)| *tag == upper)
        .map(|(_, value)| *value)
        .ok_or_else(|| ConfigError::UnknownEnumValue(raw.to_string(), field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_enum_is_case_insensitive() {
        let cfg = Config::parse_from(["ic-node", "--optimizer", "Sgd"]);
        assert_eq!(cfg.optimizer().unwrap(), OptimizerKind::Sgd);
    }

    #[test]
    fn resolve_enum_rejects_unknown_value() {
        let cfg = Config::parse_from(["ic-node", "--optimizer", "bogus"]);
        assert!(matches!(cfg.optimizer(), Err(ConfigError::UnknownEnumValue(_, "optimizer"))));
    }

    #[test]
    fn resolve_enum_rejects_unspecified_distinctly() {
        let cfg = Config::parse_from(["ic-node", "--optimizer", "unspecified"]);
        assert!(matches!(cfg.optimizer(), Err(ConfigError::Unspecified("optimizer"))));
    }

    #[test]
    fn party_addrs_parses_rank_order() {
        let cfg = Config::parse_from(["ic-node", "--parties", "127.0.0.1:9000,127.0.0.1:9001"]);
        let addrs = cfg.party_addrs().unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[&0].port(), 9000);
        assert_eq!(addrs[&1].port(), 9001);
    }

    #[test]
    fn optimizer_accepts_non_sgd_values_at_the_config_layer() {
        // Resolution itself succeeds for every enum tag; it's
        // `LrHandler::from_config` that rejects anything but SGD, since
        // negotiation still needs to see the requested tag to refuse loudly
        // rather than silently downgrading to SGD.
        let cfg = Config::parse_from(["ic-node", "--optimizer", "momentum"]);
        assert_eq!(cfg.optimizer().unwrap(), OptimizerKind::Momentum);
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::parse_from(["ic-node"]);
        assert_eq!(cfg.rank, 0);
        assert_eq!(cfg.ic_version, 2);
        assert_eq!(cfg.result_to_rank, -1);
        assert_eq!(cfg.batch_size, 21);
        assert_eq!(cfg.l2_norm, 0.5);
        assert!(!cfg.disable_handshake);
    }
}
