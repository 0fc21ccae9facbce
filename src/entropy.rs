//! Shannon entropy over byte ranges.
//!
//! Entropy is the packing/encryption heuristic used throughout the analysis
//! pipeline: a value in bits per byte, 0.0 for a run of identical bytes up to
//! 8.0 for a uniform distribution.

use std::ops::Range;

/// Threshold above which a byte range is treated as likely packed or
/// encrypted.
pub const PACKED_THRESHOLD: f64 = 7.0;

/// Calculates the Shannon entropy of a byte slice.
///
/// Returns a value between 0.0 and 8.0. Empty input yields 0.0.
#[inline]
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut histogram = [0usize; 256];
    for &byte in data {
        histogram[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &histogram {
        if count == 0 {
            continue;
        }
        let p = (count as f64) / len;
        entropy -= p * p.log2();
    }

    entropy
}

/// Entropy of a sub-range of a slice, clamped to the slice bounds.
#[inline]
pub fn entropy_range(data: &[u8], range: Range<usize>) -> f64 {
    let start = range.start.min(data.len());
    let end = range.end.min(data.len());
    if start >= end {
        return 0.0;
    }
    shannon_entropy(&data[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_identical_bytes_is_zero() {
        let data = vec![0x41u8; 1024];
        assert!(shannon_entropy(&data) < 1e-9);
        assert!(shannon_entropy(&[]) < 1e-9);
    }

    #[test]
    fn test_entropy_uniform_is_eight() {
        let data: Vec<u8> = (0..=255u8).cycle().take(256 * 64).collect();
        let entropy = shannon_entropy(&data);
        assert!((entropy - 8.0).abs() < 0.01);
    }

    #[test]
    fn test_entropy_bounded() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let e = shannon_entropy(&data);
        assert!((0.0..=8.0).contains(&e));
    }

    #[test]
    fn test_entropy_range_clamps() {
        let data = b"AAAABBBB";
        assert!(entropy_range(data, 0..4) < 1e-9);
        assert!((entropy_range(data, 0..8) - 1.0).abs() < 1e-9);
        assert!(entropy_range(data, 4..100) < 1e-9);
        assert_eq!(entropy_range(data, 8..4), 0.0);
    }
}
