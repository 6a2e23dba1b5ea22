//! # Persisted artifacts
//!
//! Home of the on-disk caches that make re-runs cheap: trained read
//! matchers serialized to JSON (one file per VNTR and read length) and the
//! per-VNTR score thresholds accumulated as plain text lines. Unreadable
//! cache entries are treated as misses; failed write-backs are logged and
//! never abort a run. This module also loads reference VNTR descriptions.
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::repeat::ReferenceVntr;

pub mod model;

/// Path of the trained-HMM cache entry for `(vntr_id, read_length)`.
pub fn hmm_cache_path(dir: &Path, vntr_id: u32, read_length: usize) -> PathBuf {
    dir.join(format!("{vntr_id}_{read_length}.hmm"))
}

/// Path of the score cache for `(vntr_id, read_length)`.
pub fn score_cache_path(dir: &Path, vntr_id: u32, read_length: usize) -> PathBuf {
    dir.join(format!("{vntr_id}_{read_length}.scores"))
}

/// Load reference VNTR descriptions from a JSON file holding a list of
/// records.
pub fn load_reference_vntrs<P: AsRef<Path>>(path: P) -> Result<Vec<ReferenceVntr>> {
    let file = File::open(&path)
        .with_context(|| format!("Could not read VNTR file {}", path.as_ref().display()))?;
    let reader = BufReader::new(file);
    let vntrs: Vec<ReferenceVntr> = serde_json::from_reader(reader)
        .with_context(|| format!("Could not deserialize VNTRs from {}", path.as_ref().display()))?;
    Ok(vntrs)
}

/// One line of a score cache: the sampling fraction it was computed under
/// and the resulting threshold.
#[derive(Debug, Deserialize)]
struct ScoreRecord {
    fraction: f64,
    score: f64,
}

/// Look up a previously computed threshold for the given sampling
/// fraction. Any reading problem counts as a cache miss; later lines win
/// when a fraction appears more than once.
pub fn lookup_cached_score(path: &Path, fraction: f64) -> Option<f64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .from_path(path)
        .ok()?;

    let mut found = None;
    for record in reader.deserialize() {
        let Ok(ScoreRecord { fraction: f, score }) = record else {
            debug!("Malformed line in score cache {}", path.display());
            return None;
        };
        if f == fraction {
            found = Some(score);
        }
    }
    found
}

/// Append a threshold line to the score cache, creating the cache
/// directory as needed. Lines accumulate over runs.
pub fn append_cached_score(path: &Path, fraction: f64, score: f64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create cache directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Could not open score cache {}", path.display()))?;
    writeln!(file, "{fraction} {score}")
        .with_context(|| format!("Could not write score cache {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_cache_roundtrips_and_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = score_cache_path(dir.path(), 7, 150);

        assert_eq!(None, lookup_cached_score(&path, 0.001));

        append_cached_score(&path, 0.001, -140.25).unwrap();
        append_cached_score(&path, 0.01, -120.5).unwrap();
        assert_eq!(Some(-140.25), lookup_cached_score(&path, 0.001));
        assert_eq!(Some(-120.5), lookup_cached_score(&path, 0.01));

        // A newer line for the same fraction takes precedence.
        append_cached_score(&path, 0.001, -130.75).unwrap();
        assert_eq!(Some(-130.75), lookup_cached_score(&path, 0.001));
    }

    #[test]
    fn cache_paths_follow_naming_scheme() {
        let dir = Path::new("/cache");
        assert_eq!(
            PathBuf::from("/cache/25_150.hmm"),
            hmm_cache_path(dir, 25, 150)
        );
        assert_eq!(
            PathBuf::from("/cache/25_150.scores"),
            score_cache_path(dir, 25, 150)
        );
    }

    #[test]
    fn vntr_descriptions_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vntrs.json");
        fs::write(
            &path,
            r#"[{
                "id": 3,
                "chromosome": "chr4",
                "start_point": 1000,
                "pattern": "CAG",
                "repeat_segments": ["CAG", "CAG"],
                "left_flanking_region": "AAAA",
                "right_flanking_region": "TTTT"
            }]"#,
        )
        .unwrap();
        let vntrs = load_reference_vntrs(&path).unwrap();
        assert_eq!(1, vntrs.len());
        assert_eq!("CAG", vntrs[0].pattern);
    }
}
