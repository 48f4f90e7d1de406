//! ECDH-PSI proposal/result wire types.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CurveType {
    Curve25519,
    Sm2,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HashType {
    Sha256,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HashToCurveStrategy {
    DirectHashAsPointX,
    TryAndRehash,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PointOctetFormat {
    Uncompressed,
    Compressed,
}

/// One candidate EC suite. Ordered lexicographically by `(curve, hash,
/// hash2curve)` so both parties pick the same suite out of an intersected
/// set without a tie-break round trip.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EcSuite {
    pub curve: CurveType,
    pub hash: HashType,
    pub hash2curve: HashToCurveStrategy,
}

impl PartialOrd for CurveType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CurveType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}
impl PartialOrd for HashType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HashType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}
impl PartialOrd for HashToCurveStrategy {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HashToCurveStrategy {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EccProtocolProposal {
    pub suites: Vec<EcSuite>,
    pub point_octet_formats: Vec<PointOctetFormat>,
    pub support_point_truncation: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EccProtocolResult {
    pub suite: EcSuite,
    pub point_octet_format: PointOctetFormat,
    /// Bit length after truncation; `-1` means truncation is disabled.
    pub bit_length_after_truncated: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PsiDataIoProposal {
    pub item_num: i64,
    /// The rank this proposer believes should receive the intersection
    /// result; `None` means "broadcast to all".
    pub result_to_rank: Option<i32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PsiDataIoResult {
    pub item_num: i64,
    pub result_to_rank: Option<i32>,
}
