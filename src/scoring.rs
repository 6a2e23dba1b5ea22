//! # Score calibration
//!
//! A Viterbi score only means something relative to what unrelated reads
//! score against the same model. This module samples mapped reads from
//! across the canonical chromosomes, scores them under the matcher, and
//! takes an extreme percentile as the per-VNTR acceptance threshold.
//! Thresholds are cached on disk keyed by VNTR and read length. Strand
//! selection for candidate reads also lives here.
use anyhow::{Context, Result};
use log::{debug, warn};
use rand::Rng;
use rayon::prelude::*;
use rust_htslib::bam::{self, Read};

use crate::hmm::model::Hmm;
use crate::hmm::viterbi::VPath;
use crate::repeat::ReferenceVntr;
use crate::settings::Settings;
use crate::{io, reads, utils, VantraError};

/// Percentile of the null score distribution used as acceptance threshold.
const THRESHOLD_PERCENTILE: f64 = 100. - 1e-4;

/// A read committed to one strand: the sequence kept is whichever of the
/// forward and reverse-complement strand scored higher.
#[derive(Debug, Clone)]
pub struct SelectedRead {
    pub sequence: String,
    pub logp: f64,
    pub vpath: VPath,
}

/// Score both strands of `sequence` and keep the better one.
pub fn best_strand(hmm: &Hmm, sequence: &str) -> Result<SelectedRead, VantraError> {
    let forward = hmm.viterbi(sequence)?;
    let rc = utils::reverse_complement(sequence);
    let reverse = hmm.viterbi(&rc)?;

    if forward.logp < reverse.logp {
        Ok(SelectedRead { sequence: rc, logp: reverse.logp, vpath: reverse })
    } else {
        Ok(SelectedRead { sequence: sequence.to_string(), logp: forward.logp, vpath: forward })
    }
}

/// Threshold for accepting a read: the top `1e-4`-percent cut of the null
/// score sample.
pub fn threshold_from_scores(scores: &[f64]) -> Result<f64> {
    utils::percentile(scores, THRESHOLD_PERCENTILE)
        .context("Null score sample is empty, cannot calibrate a threshold")
}

/// Viterbi scores of a null sample of mapped reads drawn from the
/// canonical chromosomes of `alignment_path`.
///
/// Reads are accepted with probability `score_finding_reads_fraction`;
/// unmapped reads, reads containing symbols outside ACGT and reads
/// overlapping the VNTR locus itself are never sampled. Collection runs
/// one worker per chromosome, each with its own alignment reader; scoring
/// then fans out per read.
pub fn collect_null_scores(
    alignment_path: &str,
    vntr: &ReferenceVntr,
    hmm: &Hmm,
    settings: &Settings,
) -> Result<Vec<f64>> {
    let contigs = reads::scoring_contigs(alignment_path, settings)?;
    let sampled: Vec<Vec<String>> = contigs
        .par_iter()
        .map(|contig| sample_contig_reads(alignment_path, contig, vntr, settings))
        .collect::<Result<_>>()?;
    let sampled: Vec<String> = sampled.into_iter().flatten().collect();
    debug!("Sampled {} reads for null score distribution", sampled.len());

    let scores = sampled
        .par_iter()
        .map(|sequence| hmm.viterbi(sequence).map(|vpath| vpath.logp))
        .collect::<Result<Vec<f64>, VantraError>>()?;
    Ok(scores)
}

fn sample_contig_reads(
    alignment_path: &str,
    contig: &str,
    vntr: &ReferenceVntr,
    settings: &Settings,
) -> Result<Vec<String>> {
    let mut reader = bam::IndexedReader::from_path(alignment_path)
        .with_context(|| format!("Could not open alignment file {alignment_path}"))?;
    reader
        .fetch(contig)
        .with_context(|| format!("Error fetching reads of contig {contig}"))?;

    let contig_name = if contig.starts_with("chr") {
        contig.to_string()
    } else {
        format!("chr{contig}")
    };
    let vntr_start = vntr.start_point;
    let vntr_end = vntr.end_point();

    let mut rng = rand::thread_rng();
    let mut sampled = Vec::new();
    let mut record = bam::Record::new();
    while let Some(result) = reader.read(&mut record) {
        result.with_context(|| format!("Encountered faulty read on contig {contig}"))?;
        if record.is_unmapped() {
            continue;
        }
        if rng.gen::<f64>() > settings.score_finding_reads_fraction {
            continue;
        }
        let Ok(sequence) = String::from_utf8(record.seq().as_bytes()) else {
            continue;
        };
        if !utils::is_plain_dna(&sequence) || sequence.is_empty() {
            continue;
        }
        let read_start = record.pos();
        let read_end = record.cigar().end_pos();
        if contig_name == vntr.chromosome && read_start < vntr_end && read_end > vntr_start {
            continue;
        }
        sampled.push(sequence);
    }
    Ok(sampled)
}

/// The minimum Viterbi score a read must beat to be counted for this VNTR.
///
/// Cached per `(vntr_id, read_length)`; an unreadable cache recomputes,
/// and a failed write-back only logs.
pub fn min_score_to_select_a_read(
    hmm: &Hmm,
    alignment_path: &str,
    vntr: &ReferenceVntr,
    read_length: usize,
    settings: &Settings,
) -> Result<f64> {
    let cache = io::score_cache_path(&settings.trained_hmms_dir, vntr.id, read_length);
    if settings.use_trained_hmms {
        if let Some(score) = io::lookup_cached_score(&cache, settings.score_finding_reads_fraction)
        {
            return Ok(score);
        }
    }

    debug!("Minimum score is not precomputed for VNTR {}", vntr.id);
    let scores = collect_null_scores(alignment_path, vntr, hmm, settings)?;
    let score = threshold_from_scores(&scores)?;
    debug!("Computed minimum score {score} for VNTR {}", vntr.id);

    if let Err(e) = io::append_cached_score(&cache, settings.score_finding_reads_fraction, score) {
        warn!("Could not write score cache {}: {e:?}", cache.display());
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::read_matcher::{build_read_matcher, RepeatProfile};

    fn cag_matcher() -> Hmm {
        let vntr = ReferenceVntr {
            id: 1,
            chromosome: "chr4".to_string(),
            start_point: 0,
            pattern: "CAG".to_string(),
            repeat_segments: vec!["CAG".to_string(); 3],
            left_flanking_region: "AAAAAAAAAA".to_string(),
            right_flanking_region: "TTTTTTTTTT".to_string(),
        };
        build_read_matcher(&vntr, 4, 10, 0.05, RepeatProfile::FromReference).unwrap()
    }

    #[test]
    fn strand_selection_keeps_the_better_scoring_strand() {
        let hmm = cag_matcher();
        let read = "AAAAAAAAAACAGCAGCAGTTTTTTTTTT";
        let flipped = utils::reverse_complement(read);

        let from_forward = best_strand(&hmm, read).unwrap();
        let from_reverse = best_strand(&hmm, &flipped).unwrap();

        // Scoring the reverse complement recovers the forward sequence.
        assert_eq!(read, from_forward.sequence);
        assert_eq!(read, from_reverse.sequence);
        assert_eq!(from_forward.logp, from_reverse.logp);
    }

    #[test]
    fn palindromic_read_scores_identically_on_both_strands() {
        let hmm = cag_matcher();
        // This read equals its own reverse complement, so strand choice
        // cannot change its score.
        let palindrome = "ACGTACGT";
        assert_eq!(palindrome, utils::reverse_complement(palindrome));

        let forward = hmm.viterbi(palindrome).unwrap();
        let reverse = hmm.viterbi(&utils::reverse_complement(palindrome)).unwrap();
        assert!((forward.logp - reverse.logp).abs() < 1e-6);
    }

    #[test]
    fn threshold_sits_at_the_top_of_the_sample() {
        let scores: Vec<f64> = (0..500).map(|i| -200. + i as f64 * 0.1).collect();
        let threshold = threshold_from_scores(&scores).unwrap();
        let above = scores.iter().filter(|&&s| s > threshold).count();
        assert!(above <= 1, "{above} scores above the threshold");
        assert!(threshold > utils::percentile(&scores, 50.).unwrap());
    }

    #[test]
    fn empty_sample_cannot_calibrate() {
        assert!(threshold_from_scores(&[]).is_err());
    }
}
