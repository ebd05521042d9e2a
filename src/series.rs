//! Small numeric helpers: median, sign, and a time-series peak detector.

use serde::{Deserialize, Serialize};

/// Sign of a float: -1, 0 or 1.
#[must_use]
pub fn sign(x: f64) -> i32 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Median of a sequence; the mean of the two middle values for even
/// lengths, 0.0 for an empty slice.
#[must_use]
pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// A local peak in a series: `value` is higher than both neighbours, with
/// flat tops spanning `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// First index of the peak.
    pub start: usize,
    /// Last index of the peak (equals `start` except for flat tops).
    pub end: usize,
    /// `end - start + 1`.
    pub duration: usize,
    /// The series value at the peak.
    pub value: f64,
}

/// Detect local peaks by partitioning forward differences by sign.
///
/// A sentinel negative difference is appended so a trailing ascent counts
/// as a final peak. A peak occurs where a positive-slope partition is
/// followed by a non-positive one; a zero-slope partition only counts when
/// the partition after it descends (flat top).
#[must_use]
pub fn peaks(xs: &[f64]) -> Vec<Peak> {
    if xs.len() < 2 {
        return Vec::new();
    }
    let mut diffs: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    diffs.push(-1.0);

    // Runs of equal diff sign: (sign, first diff index, last diff index).
    let mut parts: Vec<(i32, usize, usize)> = Vec::new();
    for (i, d) in diffs.iter().enumerate() {
        let s = sign(*d);
        match parts.last_mut() {
            Some(part) if part.0 == s => part.2 = i,
            _ => parts.push((s, i, i)),
        }
    }

    let mut found = Vec::new();
    for k in 1..parts.len() {
        let (prev_sign, ..) = parts[k - 1];
        let (cur_sign, cur_start, cur_end) = parts[k];
        if prev_sign <= 0 {
            continue;
        }
        if cur_sign < 0 {
            found.push(Peak {
                start: cur_start,
                end: cur_start,
                duration: 1,
                value: xs[cur_start],
            });
        } else if cur_sign == 0 && parts.get(k + 1).is_some_and(|p| p.0 < 0) {
            // diff run `cur_start..=cur_end` of zeros spans equal values
            // `xs[cur_start..=cur_end + 1]`.
            found.push(Peak {
                start: cur_start,
                end: cur_end + 1,
                duration: cur_end + 2 - cur_start,
                value: xs[cur_start],
            });
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign() {
        assert_eq!(sign(3.5), 1);
        assert_eq!(sign(-0.1), -1);
        assert_eq!(sign(0.0), 0);
    }

    #[test]
    fn test_median_odd_even_empty() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_single_interior_peak() {
        let found = peaks(&[1.0, 3.0, 2.0]);
        assert_eq!(
            found,
            vec![Peak {
                start: 1,
                end: 1,
                duration: 1,
                value: 3.0
            }]
        );
    }

    #[test]
    fn test_trailing_ascent_is_peak() {
        let found = peaks(&[1.0, 2.0, 3.0]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start, 2);
        assert_eq!(found[0].value, 3.0);
    }

    #[test]
    fn test_flat_top() {
        let found = peaks(&[1.0, 3.0, 3.0, 2.0]);
        assert_eq!(
            found,
            vec![Peak {
                start: 1,
                end: 2,
                duration: 2,
                value: 3.0
            }]
        );
    }

    #[test]
    fn test_flat_shelf_that_rises_is_not_peak() {
        let found = peaks(&[1.0, 3.0, 3.0, 4.0, 2.0]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start, 3);
        assert_eq!(found[0].value, 4.0);
    }

    #[test]
    fn test_multiple_peaks() {
        let found = peaks(&[0.0, 2.0, 1.0, 3.0, 0.5, 0.6]);
        let values: Vec<f64> = found.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 0.6]);
    }

    #[test]
    fn test_monotone_descent_has_no_peaks() {
        assert!(peaks(&[5.0, 4.0, 3.0]).is_empty());
        assert!(peaks(&[1.0]).is_empty());
        assert!(peaks(&[]).is_empty());
    }
}
