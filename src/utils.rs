//! # Utility functions for `vantra`
//!
//! Miscellaneous helpers shared across the library: interval arithmetic for
//! mapped-read bookkeeping, DNA alphabet handling and the percentile used
//! for score calibration.
use anyhow::{bail, Result};

/// Determine the overlap between two ranges, each specified by their start
/// and end coordinates.
/// **NOTE:** start and end positions are inclusive
///
/// # Examples
///
/// ```
/// let a: Vec<i64> = vec![10, 15];
/// let b: Vec<i64> = vec![13, 25];
/// let overlap = vantra::utils::range_overlap(a[0], a[1], b[0], b[1]).unwrap();
/// assert_eq!(3, overlap);
/// ```
pub fn range_overlap(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> Result<i64> {
    if (a_start > a_end) | (b_start > b_end) {
        bail!("a or b range not correctly specified")
    }
    Ok(std::cmp::max(
        0,
        std::cmp::min(a_end, b_end) - std::cmp::max(a_start, b_start) + 1,
    ))
}

/// Map an uppercase DNA base to its index in emission tables.
pub fn base_index(base: u8) -> Option<usize> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Check that a sequence consists solely of uppercase `A`, `C`, `G`, `T`.
/// Reads failing this check (notably ones containing `N`) are skipped by
/// the callers, never decoded.
pub fn is_plain_dna(sequence: &str) -> bool {
    sequence.bytes().all(|b| base_index(b).is_some())
}

/// Reverse complement of an uppercase DNA sequence.
///
/// # Examples
///
/// ```
/// assert_eq!("ACGT", vantra::utils::reverse_complement("ACGT"));
/// assert_eq!("TTTCAG", vantra::utils::reverse_complement("CTGAAA"));
/// ```
pub fn reverse_complement(sequence: &str) -> String {
    sequence
        .bytes()
        .rev()
        .map(|b| match b {
            b'A' => 'T',
            b'C' => 'G',
            b'G' => 'C',
            b'T' => 'A',
            other => other as char,
        })
        .collect()
}

/// Percentile of a sample with linear interpolation between closest ranks,
/// matching `numpy.percentile`. `q` is given in percent.
pub fn percentile(values: &[f64], q: f64) -> Result<f64> {
    if values.is_empty() {
        bail!("cannot take percentile of an empty sample")
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let rank = q / 100. * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Ok(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Ok(sorted[lo] * (1. - frac) + sorted[hi] * frac)
}
