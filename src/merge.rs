use crate::codec::PartialSum;
use crate::error::{KMeansError, Result};
use crate::vector::{l1_difference, CenterSet};
use ndarray::{Array2, ArrayView1};
use std::cmp::Ordering;

/// Result of merging one round's partial sums.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub centers: CenterSet,
    /// Number of centers whose coordinates moved in this merge.
    pub changed: usize,
    /// Global number of vectors assigned to each center this round.
    pub counts: Vec<u64>,
}

fn canonical_order(a: &PartialSum, b: &PartialSum) -> Ordering {
    a.center
        .cmp(&b.center)
        .then(a.count.cmp(&b.count))
        .then_with(|| {
            a.sum
                .iter()
                .map(|x| x.to_bits())
                .cmp(b.sum.iter().map(|x| x.to_bits()))
        })
}

/// Merges every worker's partial sums into new center means.
///
/// Messages are folded in a canonical order, so every worker that receives
/// the same multiset of messages computes bit-identical centers regardless
/// of delivery order. Centers that received no vectors are left untouched.
pub fn merge_partial_sums(
    centers: &CenterSet,
    messages: Vec<PartialSum>,
) -> Result<MergeOutcome> {
    merge_with_tolerance(centers, messages, 0.0)
}

/// Like [`merge_partial_sums`], but a center whose L1 movement is at most
/// `tolerance` is not counted as changed. It is still moved to its new mean.
pub fn merge_with_tolerance(
    centers: &CenterSet,
    mut messages: Vec<PartialSum>,
    tolerance: f64,
) -> Result<MergeOutcome> {
    let k = centers.k();
    let dim = centers.dimension();

    for m in &messages {
        if m.center >= k {
            return Err(KMeansError::parse(format!(
                "message for center {} but only {} centers exist",
                m.center, k
            )));
        }
        if m.sum.len() != dim {
            return Err(KMeansError::parse(format!(
                "message for center {} has {} components, expected {}",
                m.center,
                m.sum.len(),
                dim
            )));
        }
    }
    messages.sort_by(canonical_order);

    let mut accum = Array2::<f64>::zeros((k, dim));
    let mut counts = vec![0u64; k];
    let mut seen = vec![false; k];

    for m in &messages {
        let sum = ArrayView1::from(&m.sum[..]);
        if !seen[m.center] {
            accum.row_mut(m.center).assign(&sum);
            counts[m.center] = m.count;
            seen[m.center] = true;
        } else {
            let mut row = accum.row_mut(m.center);
            row += &sum;
            counts[m.center] += m.count;
        }
    }

    let mut next = centers.clone();
    let mut changed = 0;
    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        let n = counts[c] as f64;
        let mean: Vec<f64> = accum.row(c).iter().map(|x| x / n).collect();
        if mean.iter().any(|x| !x.is_finite()) {
            return Err(KMeansError::overflow(format!(
                "sum over {} vectors for center {} left the f64 range",
                counts[c], c
            )));
        }
        let error = l1_difference(centers.row(c), &mean);
        if error > 0.0 {
            next.set_row(c, &mean);
            if error > tolerance {
                changed += 1;
            }
        }
    }

    Ok(MergeOutcome {
        centers: next,
        changed,
        counts,
    })
}

/// Loop condition after a merge: stop once nothing moved or the superstep
/// counter has passed the iteration limit.
pub fn should_continue(changed: usize, supersteps: u64, max_iterations: u64) -> bool {
    changed > 0 && supersteps <= max_iterations
}
