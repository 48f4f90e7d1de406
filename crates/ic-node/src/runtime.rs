//! Runtime Shim.
//!
//! Converts a negotiated Context into the downstream engine's configuration,
//! drives the toy plaintext kernels standing in for the real cryptographic
//! engines, and persists the result the way the real engines would.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use ic_core::context::{LrContext, PsiContext};
use ic_transport::MeshTransport;
use tracing::info;

use crate::csv_io::LrDataset;
use crate::kernels::psi::PsiInput;

const FEATURE_TAG: &str = "Lr_features";
const LABEL_TAG: &str = "Lr_labels";
const WEIGHTS_TAG: &str = "Lr_weights";
const DIGEST_TAG: &str = "Psi_digests";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("transport error: {0}")]
    Transport(#[from] ic_transport::TransportError),
    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),
    #[error("io error writing {path}: {source}")]
    Io { path: String, source: std::io::Error },
}

/// Runs the SS-LR training loop: every rank contributes its feature columns
/// (and the label owner its labels) to rank 0, which trains and broadcasts
/// the weights back. Each rank then persists the full reconstructed weight
/// vector.
pub async fn run_lr(
    transport: &dyn MeshTransport,
    world_size: i32,
    ctx: &LrContext,
    dataset: &LrDataset,
    output_path: &Path,
) -> Result<Vec<f64>, RuntimeError> {
    let local_rank = transport.local_rank();

    if local_rank == 0 {
        let mut columns: Vec<Vec<Vec<f64>>> = vec![dataset.x.clone()];
        for rank in 1..world_size {
            let bytes = transport.recv(rank, FEATURE_TAG).await?;
            columns.push(postcard::from_bytes(&bytes)?);
        }

        let y = if ctx.is_label_owner() {
            dataset.y.clone()
        } else {
            let bytes = transport.recv(ctx.label_rank, LABEL_TAG).await?;
            postcard::from_bytes(&bytes)?
        };

        let x = concat_feature_columns(&columns, ctx.sample_size as usize);
        let weights = crate::kernels::ss::train(&x, &y, ctx);
        let accuracy = training_accuracy(&x, &y, &weights);
        info!(rank = local_rank, sample_size = ctx.sample_size, accuracy, "LR training complete");

        let bytes = postcard::to_allocvec(&weights)?;
        for rank in 1..world_size {
            transport.send(rank, WEIGHTS_TAG, bytes.clone()).await?;
        }
        persist_weights(output_path, local_rank, &weights)?;
        Ok(weights)
    } else {
        let bytes = postcard::to_allocvec(&dataset.x)?;
        transport.send(0, FEATURE_TAG, bytes).await?;
        if ctx.is_label_owner() {
            let bytes = postcard::to_allocvec(&dataset.y)?;
            transport.send(0, LABEL_TAG, bytes).await?;
        }

        let bytes = transport.recv(0, WEIGHTS_TAG).await?;
        let weights: Vec<f64> = postcard::from_bytes(&bytes)?;
        persist_weights(output_path, local_rank, &weights)?;
        Ok(weights)
    }
}

/// Fraction of rows where the trained model's rounded prediction matches the
/// label, logged as diagnostic output only (never negotiated or persisted).
fn training_accuracy(x: &[Vec<f64>], y: &[f64], weights: &[f64]) -> f64 {
    if x.is_empty() || weights.is_empty() {
        return 0.0;
    }
    let correct = x
        .iter()
        .zip(y)
        .filter(|(row, &label)| {
            let z: f64 = weights[0] + row.iter().zip(&weights[1..]).map(|(xi, wi)| xi * wi).sum::<f64>();
            let pred = 1.0 / (1.0 + (-z).exp());
            (pred >= 0.5) == (label >= 0.5)
        })
        .count();
    correct as f64 / x.len() as f64
}

fn concat_feature_columns(columns: &[Vec<Vec<f64>>], sample_size: usize) -> Vec<Vec<f64>> {
    (0..sample_size)
        .map(|row| columns.iter().flat_map(|party_x| party_x[row].iter().copied()).collect())
        .collect()
}

/// Writes the full reconstructed weight vector (bias + every party's
/// features) to this rank's `<lr_output>.<rank>` file — every party gets the
/// same `feature_nums.sum() + 1` entries, not just its own slice.
fn persist_weights(output_path: &Path, local_rank: i32, weights: &[f64]) -> Result<(), RuntimeError> {
    let path = output_path.with_extension(local_rank.to_string());
    let mut file = std::fs::File::create(&path).map_err(|source| RuntimeError::Io { path: path.display().to_string(), source })?;
    for w in weights {
        writeln!(file, "{w}").map_err(|source| RuntimeError::Io { path: path.display().to_string(), source })?;
    }
    Ok(())
}

/// Runs the ECDH-PSI matching: every rank broadcasts its item digests to
/// every other rank, then each rank that `receives_result` persists the
/// matching items as a single-column CSV.
pub async fn run_psi(
    transport: &dyn MeshTransport,
    world_size: i32,
    ctx: &PsiContext,
    local_items: &[String],
    output_path: Option<&Path>,
) -> Result<Vec<String>, RuntimeError> {
    let local_rank = transport.local_rank();
    let input = PsiInput { items: local_items.to_vec() };
    let own_digests = crate::kernels::psi::digests(&input);

    let digest_bytes = postcard::to_allocvec(&own_digests.iter().collect::<Vec<_>>())?;
    for rank in 0..world_size {
        if rank != local_rank {
            transport.send(rank, DIGEST_TAG, digest_bytes.clone()).await?;
        }
    }

    let mut peer_digests = Vec::new();
    for rank in 0..world_size {
        if rank == local_rank {
            continue;
        }
        let bytes = transport.recv(rank, DIGEST_TAG).await?;
        let list: Vec<[u8; 32]> = postcard::from_bytes(&bytes)?;
        peer_digests.push(list.into_iter().collect::<HashSet<_>>());
    }

    let matches = crate::kernels::psi::intersect(&input, &peer_digests);
    info!(rank = local_rank, match_count = matches.len(), "PSI intersection complete");

    if ctx.receives_result() {
        if let Some(path) = output_path {
            let mut file = std::fs::File::create(path).map_err(|source| RuntimeError::Io { path: path.display().to_string(), source })?;
            for item in &matches {
                writeln!(file, "{item}").map_err(|source| RuntimeError::Io { path: path.display().to_string(), source })?;
            }
        }
        Ok(matches)
    } else {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_feature_columns_orders_by_party_rank() {
        let party0 = vec![vec![1.0], vec![2.0]];
        let party1 = vec![vec![10.0, 11.0], vec![20.0, 21.0]];
        let result = concat_feature_columns(&[party0, party1], 2);
        assert_eq!(result[0], vec![1.0, 10.0, 11.0]);
        assert_eq!(result[1], vec![2.0, 20.0, 21.0]);
    }

    #[test]
    fn training_accuracy_scores_perfect_separator() {
        let x = vec![vec![-10.0], vec![-5.0], vec![5.0], vec![10.0]];
        let y = vec![0.0, 0.0, 1.0, 1.0];
        let weights = vec![0.0, 1.0];
        assert_eq!(training_accuracy(&x, &y, &weights), 1.0);
    }
}
