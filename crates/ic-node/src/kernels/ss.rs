//! Plaintext SGD stand-in for the secret-shared LR training loop (non-goal
//! boundary, see `kernels` module docs). Operates on a single gathered
//! feature matrix and label vector rather than additive shares — the
//! handshake still negotiates the real SS protocol/field/truncation, only
//! the arithmetic backing the loop is swapped out.

use ic_core::context::LrContext;
use ic_core::params::lr::LastBatchPolicy;

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Splits `sample_size` rows into batches of `batch_size` according to the
/// negotiated last-batch policy.
fn batch_bounds(sample_size: usize, batch_size: usize, policy: LastBatchPolicy) -> Vec<(usize, usize)> {
    if batch_size == 0 || sample_size == 0 {
        return Vec::new();
    }
    let mut bounds = Vec::new();
    let mut start = 0;
    while start < sample_size {
        let end = (start + batch_size).min(sample_size);
        if end - start < batch_size {
            match policy {
                LastBatchPolicy::Discard => break,
                LastBatchPolicy::Keep => bounds.push((start, end)),
                LastBatchPolicy::Pad => bounds.push((start, end)),
            }
        } else {
            bounds.push((start, end));
        }
        start = end;
    }
    bounds
}

/// Trains logistic regression weights (bias folded in as `weights[0]`) via
/// plain SGD, honoring `num_epoch`, `batch_size`, `last_batch_policy` and the
/// L2 penalty coefficient negotiated into `ctx`.
pub fn train(x: &[Vec<f64>], y: &[f64], ctx: &LrContext) -> Vec<f64> {
    let sample_size = x.len();
    if sample_size == 0 {
        return Vec::new();
    }
    let feature_num = x[0].len();
    let learning_rate = ctx.sgd.as_ref().map(|s| s.learning_rate).unwrap_or(1e-4);
    let l2 = ctx.l2_norm.unwrap_or(0.0);

    // weights[0] is the bias term.
    let mut weights = vec![0.0f64; feature_num + 1];
    let batch_size = ctx.batch_size.max(1) as usize;

    for _epoch in 0..ctx.num_epoch.max(0) {
        for (start, end) in batch_bounds(sample_size, batch_size, ctx.last_batch_policy) {
            let mut grad = vec![0.0f64; feature_num + 1];
            for row in start..end {
                let mut z = weights[0];
                for (j, xj) in x[row].iter().enumerate() {
                    z += weights[j + 1] * xj;
                }
                let pred = sigmoid(z);
                let err = pred - y[row];
                grad[0] += err;
                for (j, xj) in x[row].iter().enumerate() {
                    grad[j + 1] += err * xj;
                }
            }
            let step = learning_rate / batch_size as f64;
            weights[0] -= step * grad[0];
            for j in 0..feature_num {
                let l2_term = if l2 != 0.0 { l2 * weights[j + 1] } else { 0.0 };
                weights[j + 1] -= step * (grad[j + 1] + l2_term);
            }
        }
    }

    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use ic_core::params::lr::{FieldType, OptimizerKind, SgdParams, ShardSerializeFormat, SigmoidMode, SsProtocolKind, TruncMode};

    fn ctx(l2: Option<f64>) -> LrContext {
        LrContext {
            num_epoch: 5,
            batch_size: 2,
            last_batch_policy: LastBatchPolicy::Discard,
            l0_norm: None,
            l1_norm: None,
            l2_norm: l2,
            optimizer: OptimizerKind::Sgd,
            sgd: Some(SgdParams { learning_rate: 0.1 }),
            sigmoid_mode: SigmoidMode::Real,
            ss_protocol: SsProtocolKind::Semi2k,
            field_type: FieldType::Ring64,
            fxp_fraction_bits: 18,
            shard_serialize_format: ShardSerializeFormat::Raw,
            trunc_mode: TruncMode::Probabilistic,
            use_ttp: false,
            ttp_server_host: String::new(),
            ttp_session_id: String::new(),
            ttp_adjust_rank: 0,
            sample_size: 4,
            feature_nums: vec![1],
            label_rank: 0,
            local_rank: 0,
        }
    }

    #[test]
    fn training_moves_weights_toward_separating_labels() {
        let x = vec![vec![0.0], vec![0.1], vec![5.0], vec![5.1]];
        let y = vec![0.0, 0.0, 1.0, 1.0];
        let weights = train(&x, &y, &ctx(None));
        assert_eq!(weights.len(), 2);
        assert!(weights[1] > 0.0, "weight on the separating feature should move positive, got {:?}", weights);
    }

    #[test]
    fn discard_policy_drops_trailing_partial_batch() {
        let bounds = batch_bounds(5, 2, LastBatchPolicy::Discard);
        assert_eq!(bounds, vec![(0, 2), (2, 4)]);
    }

    #[test]
    fn keep_policy_retains_trailing_partial_batch() {
        let bounds = batch_bounds(5, 2, LastBatchPolicy::Keep);
        assert_eq!(bounds, vec![(0, 2), (2, 4), (4, 5)]);
    }

    #[test]
    fn empty_dataset_yields_no_weights() {
        assert!(train(&[], &[], &ctx(None)).is_empty());
    }

    #[test]
    fn step_divides_by_negotiated_batch_size_not_short_batch_row_count() {
        // batch_size=2, sample_size=3, Keep policy: batches are (0,2) and the
        // short trailing (2,3). Every x is 0 so z stays at weights[0] and the
        // gradient reduces to a closed form we can check by hand.
        let mut c = ctx(None);
        c.batch_size = 2;
        c.sample_size = 3;
        c.last_batch_policy = LastBatchPolicy::Keep;
        c.num_epoch = 1;
        c.sgd = Some(SgdParams { learning_rate: 1.0 });

        let x = vec![vec![0.0], vec![0.0], vec![0.0]];
        let y = vec![1.0, 1.0, 1.0];
        let weights = train(&x, &y, &c);

        // Had the step divided by the short batch's actual row count (1)
        // instead of the negotiated batch_size (2), weights[0] would land
        // near 0.8775 instead.
        assert!(
            (weights[0] - 0.6887703343990727).abs() < 1e-9,
            "expected step to use negotiated batch_size as divisor, got {:?}",
            weights
        );
    }
}
