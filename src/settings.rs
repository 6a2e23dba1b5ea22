//! # Runtime settings for `vantra`
//!
//! Central home for the design constants that parameterize model
//! construction, null-score calibration and the worker pool. Defaults can
//! be overridden from the command line.
use std::path::PathBuf;
use std::thread;

/// Default per-base error budget used to derive insertion and deletion
/// probabilities when building profile segments.
pub const MAX_ERROR_RATE: f64 = 0.05;

/// Default fraction of mapped reads that are sampled when estimating the
/// null score distribution of a VNTR matcher.
pub const SCORE_FINDING_READS_FRACTION: f64 = 0.001;

/// Canonical contigs used for null-score sampling.
pub const CHROMOSOMES: &[&str] = &[
    "chr1", "chr2", "chr3", "chr4", "chr5", "chr6", "chr7", "chr8", "chr9", "chr10", "chr11",
    "chr12", "chr13", "chr14", "chr15", "chr16", "chr17", "chr18", "chr19", "chr20", "chr21",
    "chr22", "chrX", "chrY",
];

#[derive(Debug, Clone)]
pub struct Settings {
    /// Error budget for profile segment transitions, see [`MAX_ERROR_RATE`].
    pub max_error_rate: f64,
    /// Null-sample acceptance rate, see [`SCORE_FINDING_READS_FRACTION`].
    pub score_finding_reads_fraction: f64,
    /// Width of the worker pool. Defaults to the hardware thread count.
    pub cores: usize,
    /// Reuse trained HMMs and score thresholds cached on disk.
    pub use_trained_hmms: bool,
    /// Contigs considered during null-score sampling.
    pub chromosomes: Vec<String>,
    /// Directory holding trained HMMs and score caches.
    pub trained_hmms_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_error_rate: MAX_ERROR_RATE,
            score_finding_reads_fraction: SCORE_FINDING_READS_FRACTION,
            cores: thread::available_parallelism().map_or(1, |n| n.get()),
            use_trained_hmms: true,
            chromosomes: CHROMOSOMES.iter().map(|s| (*s).to_string()).collect(),
            trained_hmms_dir: PathBuf::from("trained_hmms"),
        }
    }
}

impl Settings {
    /// Insertion probability derived from the error budget.
    pub fn insert_error(&self) -> f64 {
        self.max_error_rate * 2. / 5.
    }
    /// Deletion probability derived from the error budget.
    pub fn delete_error(&self) -> f64 {
        self.max_error_rate / 5.
    }
    /// Check whether a contig takes part in null-score sampling. Accepts
    /// both `chr`-prefixed and bare contig names.
    pub fn is_scoring_chromosome(&self, contig: &str) -> bool {
        self.chromosomes.iter().any(|c| c == contig) || {
            let prefixed = format!("chr{contig}");
            self.chromosomes.iter().any(|c| *c == prefixed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rates_follow_budget() {
        let settings = Settings::default();
        assert!((settings.insert_error() - 0.02).abs() < 1e-12);
        assert!((settings.delete_error() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn chromosome_lookup_accepts_bare_names() {
        let settings = Settings::default();
        assert!(settings.is_scoring_chromosome("chr7"));
        assert!(settings.is_scoring_chromosome("7"));
        assert!(!settings.is_scoring_chromosome("chrM"));
    }
}
