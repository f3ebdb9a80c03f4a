//! Valid-length bookkeeping for temporal windows over padded batches.
//!
//! Batches carry one true (unpadded) target length per sample, sorted
//! descending. These helpers answer the two questions the window loop
//! asks at every step: which samples are still active at time `t`, and
//! how many of a window's timesteps are valid for each of them.

/// Per-sample valid lengths within the window `[t, t + l_target)`.
///
/// For each length in `t_ys` (the still-active tail of a batch's
/// length list), returns `min(t_y - t, l_target)`, saturating at zero
/// for samples that are already exhausted. The result is what loss
/// normalization divides by, so it reflects true lengths, never the
/// padded extent.
#[must_use]
pub fn clipped_lengths(t: usize, l_target: usize, t_ys: &[usize]) -> Vec<usize> {
    t_ys.iter()
        .map(|&t_y| t_y.saturating_sub(t).min(l_target))
        .collect()
}

/// Index of the first sample still active at time `t`.
///
/// `t_ys` must be sorted descending; `from` is the cursor returned by
/// the previous window (shrinkage is monotonic, so the scan never
/// restarts). Amortized O(1) per window across a batch traversal.
#[must_use]
pub fn first_active(t_ys: &[usize], t: usize, from: usize) -> usize {
    let mut i = from;
    while i < t_ys.len() && t_ys[i] <= t {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clipped_lengths_caps_at_window() {
        assert_eq!(clipped_lengths(0, 4, &[10, 4]), vec![4, 4]);
        assert_eq!(clipped_lengths(4, 4, &[10]), vec![4]);
        assert_eq!(clipped_lengths(8, 4, &[10]), vec![2]);
    }

    #[test]
    fn test_clipped_lengths_saturates_at_zero() {
        assert_eq!(clipped_lengths(6, 4, &[10, 6, 5]), vec![4, 0, 0]);
    }

    #[test]
    fn test_first_active_walkthrough() {
        // Two sequences of length 10 and 4, window size 4.
        let t_ys = [10, 4];
        assert_eq!(first_active(&t_ys, 0, 0), 0);
        // At t = 4 the second sample is exhausted (4 <= 4).
        assert_eq!(first_active(&t_ys, 4, 0), 1);
        assert_eq!(first_active(&t_ys, 8, 1), 1);
    }

    #[test]
    fn test_first_active_invariant() {
        // For every t, all samples before the cursor are exhausted and
        // all samples at or after it are still active.
        let t_ys = [12, 9, 9, 5, 3, 3, 1];
        let mut cursor = 0;
        for t in 0..13 {
            cursor = first_active(&t_ys, t, cursor);
            for (i, &t_y) in t_ys.iter().enumerate() {
                if i < cursor {
                    assert!(t_y <= t);
                } else {
                    assert!(t_y > t);
                }
            }
        }
    }

    #[test]
    fn test_first_active_can_pass_the_end() {
        let t_ys = [4, 2];
        assert_eq!(first_active(&t_ys, 4, 0), 2);
    }
}
