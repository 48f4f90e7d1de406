//! Parameter Registry & Intersection Algebra.
//!
//! This never reaches for reflection: each extraction is parameterized by a
//! plain getter closure instead of a field number, so the compiler enforces
//! the shapes involved.

use std::collections::HashSet;
use std::hash::Hash;

use crate::envelope::{find_tagged, HandshakeRequest, TaggedParam};

/// For each request, find the tagged param blob and decode it as `P`. If any
/// request lacks the tag, returns an empty vec.
pub fn extract_tagged_params<Tag, P>(
    requests: &[HandshakeRequest],
    tag_of: impl Fn(&HandshakeRequest) -> &[TaggedParam<Tag>],
    tag: &Tag,
) -> Vec<P>
where
    Tag: PartialEq,
    P: for<'de> serde::Deserialize<'de>,
{
    let mut params = Vec::with_capacity(requests.len());
    for request in requests {
        match find_tagged::<Tag, P>(tag_of(request), tag) {
            Some(p) => params.push(p),
            None => return Vec::new(),
        }
    }
    params
}

/// Decode the single (untagged) io_param blob on each request as `P`. If any
/// request's blob fails to decode, returns an empty vec.
pub fn extract_io_params<P>(requests: &[HandshakeRequest]) -> Vec<P>
where
    P: for<'de> serde::Deserialize<'de>,
{
    let mut params = Vec::with_capacity(requests.len());
    for request in requests {
        match postcard::from_bytes::<P>(&request.io_param) {
            Ok(p) => params.push(p),
            Err(_) => return Vec::new(),
        }
    }
    params
}

/// The set intersection of the repeated values yielded by `field` across all
/// params.
pub fn intersect_repeated<P, T, I>(params: &[P], field: impl Fn(&P) -> I) -> HashSet<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut sets = params.iter().map(|p| field(p).into_iter().collect::<HashSet<T>>());
    let Some(first) = sets.next() else {
        return HashSet::new();
    };
    sets.fold(first, |acc, s| acc.intersection(&s).cloned().collect())
}

/// Like `intersect_repeated`, but each element of the outer repeated field is
/// first projected through `project`; a `None` result drops that element
/// before intersecting. Used for trunc-mode negotiation, where a proposer's
/// mode only counts if its `compatible_protocols` is empty or contains the
/// locally chosen protocol.
pub fn intersect_repeated_nested<P, Sub, T>(
    params: &[P],
    outer_field: impl Fn(&P) -> &[Sub],
    project: impl Fn(&Sub) -> Option<T>,
) -> HashSet<T>
where
    T: Eq + Hash + Clone,
{
    let mut sets = params
        .iter()
        .map(|p| outer_field(p).iter().filter_map(&project).collect::<HashSet<T>>());
    let Some(first) = sets.next() else {
        return HashSet::new();
    };
    sets.fold(first, |acc, s| acc.intersection(&s).cloned().collect())
}

/// `Some(v)` iff every param agrees on `v` at `field`; `None` if any differ,
/// or if `params` is empty.
pub fn align_scalar<P, T>(params: &[P], field: impl Fn(&P) -> T) -> Option<T>
where
    T: PartialEq + Clone,
{
    let mut values = params.iter().map(&field);
    let first = values.next()?;
    if values.all(|v| v == first) {
        Some(first)
    } else {
        None
    }
}

/// Compares `x` and `y` within `ulp` units-in-the-last-place.
pub fn almost_equal(x: f64, y: f64, ulp: i32) -> bool {
    let diff = (x - y).abs();
    diff <= f64::EPSILON * (x + y).abs() * ulp as f64 || diff < f64::MIN_POSITIVE
}

/// `almost_equal(x, 0.0, 2)` — whether a penalty coefficient should be
/// treated as "disabled".
pub fn almost_zero(x: f64) -> bool {
    almost_equal(x, 0.0, 2)
}

/// Whether a penalty coefficient should be treated as "in use" on the wire.
pub fn use_penalty_term(x: f64) -> bool {
    !almost_zero(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_commutative_under_permutation() {
        let a = vec![vec![1, 2, 3], vec![2, 3, 4]];
        let b = vec![vec![2, 3, 4], vec![1, 2, 3]];
        let ia = intersect_repeated(&a, |v: &Vec<i32>| v.clone());
        let ib = intersect_repeated(&b, |v: &Vec<i32>| v.clone());
        assert_eq!(ia, ib);
    }

    #[test]
    fn intersect_identity_single_input() {
        let a = vec![vec![5, 6, 7]];
        let got = intersect_repeated(&a, |v: &Vec<i32>| v.clone());
        assert_eq!(got, [5, 6, 7].into_iter().collect());
    }

    #[test]
    fn intersect_empty_input_is_empty() {
        let a: Vec<Vec<i32>> = vec![];
        let got = intersect_repeated(&a, |v: &Vec<i32>| v.clone());
        assert!(got.is_empty());
    }

    #[test]
    fn align_scalar_agrees() {
        let params = vec![("a", 1), ("b", 1), ("c", 1)];
        assert_eq!(align_scalar(&params, |p: &(&str, i32)| p.1), Some(1));
    }

    #[test]
    fn align_scalar_disagrees() {
        let params = vec![("a", 1), ("b", 2)];
        assert_eq!(align_scalar(&params, |p: &(&str, i32)| p.1), None);
    }

    #[test]
    fn align_scalar_empty_is_none() {
        let params: Vec<(&str, i32)> = vec![];
        assert_eq!(align_scalar(&params, |p: &(&str, i32)| p.1), None);
    }

    #[test]
    fn almost_zero_tolerates_float_noise() {
        assert!(almost_zero(0.0));
        assert!(almost_zero(f64::EPSILON));
        assert!(!use_penalty_term(0.0));
        assert!(use_penalty_term(0.5));
    }

    #[test]
    fn nested_intersection_filters_incompatible_protocols() {
        struct TruncModeProposal {
            method: i32,
            compatible_protocols: Vec<i32>,
        }
        struct SsParam {
            trunc_modes: Vec<TruncModeProposal>,
        }
        let chosen_protocol = 1;
        let params = vec![
            SsParam {
                trunc_modes: vec![
                    TruncModeProposal { method: 10, compatible_protocols: vec![] },
                    TruncModeProposal { method: 11, compatible_protocols: vec![2] },
                ],
            },
            SsParam {
                trunc_modes: vec![TruncModeProposal { method: 10, compatible_protocols: vec![1] }],
            },
        ];
        let got = intersect_repeated_nested(
            &params,
            |p: &SsParam| p.trunc_modes.as_slice(),
            |t: &TruncModeProposal| {
                if t.compatible_protocols.is_empty() || t.compatible_protocols.contains(&chosen_protocol) {
                    Some(t.method)
                } else {
                    None
                }
            },
        );
        assert_eq!(got, [10].into_iter().collect());
    }
}
