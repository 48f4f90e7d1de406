//! Plaintext set-intersection stand-in for ECDH-PSI (non-goal boundary, see
//! `kernels` module docs). Identifies matches by SHA-256 of each item's raw
//! bytes rather than by the negotiated EC suite — the handshake still
//! negotiates the real suite, only the bucketing is swapped out.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

fn digest(item: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(item.as_bytes());
    hasher.finalize().into()
}

/// Local items paired with the row they came from, so the caller can
/// reconstruct whichever columns the result should carry.
pub struct PsiInput {
    pub items: Vec<String>,
}

/// Computes the intersection of this party's items against every other
/// party's digests, already exchanged out of band by the caller.
pub fn intersect(local: &PsiInput, peer_digests: &[HashSet<[u8; 32]>]) -> Vec<String> {
    local
        .items
        .iter()
        .filter(|item| {
            let d = digest(item);
            peer_digests.iter().all(|peer| peer.contains(&d))
        })
        .cloned()
        .collect()
}

pub fn digests(local: &PsiInput) -> HashSet<[u8; 32]> {
    local.items.iter().map(|item| digest(item)).collect()
}
