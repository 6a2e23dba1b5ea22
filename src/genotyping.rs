//! # Estimating VNTR genotypes from recruited reads
//!
//! The driver ties the pieces together for one VNTR: recruit reads past
//! the calibrated threshold, mine their decoded paths for repeat content,
//! convert total repeat base pairs into a coverage-scaled copy number, and
//! scan the recruited paths for a recurrent frameshift indel.
use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::hmm::model::Hmm;
use crate::hmm::read_matcher::read_matcher_for_length;
use crate::hmm::state::StateKind;
use crate::io;
use crate::reads::{AlignedRead, ReadSegment};
use crate::repeat::ReferenceVntr;
use crate::scoring::{self, SelectedRead};
use crate::settings::Settings;
use crate::utils;
use crate::vpath;
use crate::VantraError;

/// Minimum repeat base pairs for a read to be retained for path mining.
pub const MIN_REPEAT_BP_TO_ADD_READ: usize = 2;
/// Minimum repeat base pairs for a read to contribute to the bp total.
pub const MIN_REPEAT_BP_TO_COUNT_REPEATS: usize = 2;

/// Mapped reads below this mapping quality must also beat the score
/// threshold to be retained.
const LOW_QUALITY_MAPQ: u8 = 30;

/// Read length assumed when no unmapped reads are available to measure it.
const DEFAULT_READ_LENGTH: usize = 150;

/// Sequencing-depth collaborator: supplies the mean coverage and the
/// GC-bias correction applied to the observed copy number.
pub trait CoverageModel: Sync {
    fn mean_coverage(&self) -> f64;
    fn gc_scale(&self, vntr: &ReferenceVntr, copy_number: f64) -> f64;
}

/// Flat coverage without GC correction.
#[derive(Debug, Clone)]
pub struct UniformCoverage {
    pub mean: f64,
}

impl CoverageModel for UniformCoverage {
    fn mean_coverage(&self) -> f64 {
        self.mean
    }
    fn gc_scale(&self, _vntr: &ReferenceVntr, copy_number: f64) -> f64 {
        copy_number
    }
}

/// A recurrent indel event aggregated over the recruited reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frameshift {
    /// Indel state label; insertions carry the emitted base, e.g. `I2A`.
    pub state: String,
    pub occurrences: usize,
}

/// Per-VNTR genotyping result.
#[derive(Debug)]
pub struct VntrGenotype {
    pub scaled_copy_number: f64,
    pub observed_copy_number: f64,
    pub frameshift: Option<Frameshift>,
    pub vntr_bp_in_mapped_reads: i64,
    pub vntr_bp_in_unmapped_reads: usize,
    /// Repeat counts of every retained read.
    pub observed_repeats: Vec<usize>,
    /// Repeat counts of the retained reads that span the locus.
    pub flanked_repeats: Vec<usize>,
}

/// Genotype one VNTR from recruited reads.
///
/// `unmapped_reads` are the candidate reads from the unmapped pool
/// (optionally narrowed by `candidate_ids`); `mapped_reads` are the reads
/// fetched over the locus. Scoring fans out one task per read; the
/// aggregation below is commutative, so worker ordering cannot change the
/// result.
pub fn genotype_reads(
    vntr: &ReferenceVntr,
    hmm: &Hmm,
    min_score: f64,
    unmapped_reads: &[ReadSegment],
    candidate_ids: Option<&HashSet<String>>,
    mapped_reads: &[AlignedRead],
    coverage: &dyn CoverageModel,
) -> Result<VntrGenotype> {
    let outcomes: Vec<(Option<SelectedRead>, usize)> = unmapped_reads
        .par_iter()
        .filter(|read| candidate_ids.map_or(true, |ids| ids.contains(&read.id)))
        .filter(|read| !read.sequence.is_empty() && utils::is_plain_dna(&read.sequence))
        .map(|read| -> Result<_, VantraError> {
            let chosen = scoring::best_strand(hmm, &read.sequence)?;
            let repeat_bp = vpath::repeat_bp_matches(&chosen.vpath);
            let mut counted_bp = 0;
            let mut selected = None;
            if chosen.logp > min_score {
                if repeat_bp > MIN_REPEAT_BP_TO_COUNT_REPEATS {
                    counted_bp = repeat_bp;
                }
                if repeat_bp > MIN_REPEAT_BP_TO_ADD_READ {
                    selected = Some(chosen);
                }
            }
            Ok((selected, counted_bp))
        })
        .collect::<Result<_, _>>()?;

    let vntr_bp_in_unmapped_reads: usize = outcomes.iter().map(|(_, bp)| bp).sum();
    let mut selected_reads: Vec<SelectedRead> =
        outcomes.into_iter().filter_map(|(selected, _)| selected).collect();

    if let Some(best) = selected_reads.iter().max_by(|a, b| a.logp.total_cmp(&b.logp)) {
        debug!("Highest logp in unmapped reads: {} ({})", best.logp, best.sequence);
    }
    info!("VNTR base pairs in unmapped reads: {vntr_bp_in_unmapped_reads}");

    let vntr_bp_in_mapped_reads =
        process_mapped_reads(vntr, hmm, min_score, mapped_reads, &mut selected_reads)?;
    info!("VNTR base pairs in mapped reads: {vntr_bp_in_mapped_reads}");

    let mut observed_repeats = Vec::with_capacity(selected_reads.len());
    let mut flanked_repeats = Vec::new();
    for read in &selected_reads {
        let repeats = vpath::repeat_count(&read.vpath);
        debug!(
            "logp {} flanking sizes {} {} repeating bp {}",
            read.logp,
            vpath::left_flank_emitted_len(&read.vpath),
            vpath::right_flank_emitted_len(&read.vpath),
            vpath::repeat_bp_matches(&read.vpath),
        );
        if vpath::is_spanning(&read.vpath) {
            flanked_repeats.push(repeats);
        }
        observed_repeats.push(repeats);
    }

    let frameshift = find_frameshift_from_selected_reads(vntr, &selected_reads);

    let total_counted_bp = vntr_bp_in_unmapped_reads as f64 + vntr_bp_in_mapped_reads as f64;
    let (observed_copy_number, scaled_copy_number) = if total_counted_bp > 0. {
        let pattern_occurrences = total_counted_bp / vntr.pattern.len() as f64;
        let observed = pattern_occurrences / coverage.mean_coverage();
        (observed, coverage.gc_scale(vntr, observed))
    } else {
        // Nothing recruited: the copy number is zero, never NaN.
        (0., 0.)
    };

    Ok(VntrGenotype {
        scaled_copy_number,
        observed_copy_number,
        frameshift,
        vntr_bp_in_mapped_reads,
        vntr_bp_in_unmapped_reads,
        observed_repeats,
        flanked_repeats,
    })
}

/// Count locus-overlap base pairs of the mapped reads and retain their
/// decoded paths. Low-quality reads must additionally beat the threshold;
/// overlap base pairs are counted for every overlapping read either way.
fn process_mapped_reads(
    vntr: &ReferenceVntr,
    hmm: &Hmm,
    min_score: f64,
    mapped_reads: &[AlignedRead],
    selected_reads: &mut Vec<SelectedRead>,
) -> Result<i64> {
    let vntr_start = vntr.start_point;
    let vntr_end = vntr.end_point();
    let mut vntr_bp = 0;

    for read in mapped_reads {
        if read.is_unmapped {
            continue;
        }
        let read_end = if read.reference_end > read.reference_start {
            read.reference_end
        } else {
            read.reference_start + read.sequence.len() as i64
        };
        if read.reference_start >= vntr_end || read_end <= vntr_start {
            continue;
        }

        if !read.sequence.is_empty() && utils::is_plain_dna(&read.sequence) {
            let chosen = scoring::best_strand(hmm, &read.sequence)?;
            if read.mapping_quality < LOW_QUALITY_MAPQ && chosen.logp < min_score {
                debug!("Rejected mapped read: {}", chosen.sequence);
            } else {
                selected_reads.push(chosen);
            }
        }
        vntr_bp += utils::range_overlap(
            read.reference_start,
            read_end - 1,
            vntr_start,
            vntr_end - 1,
        )?;
    }
    Ok(vntr_bp)
}

/// Aggregate indel events across the retained paths, restricted to repeat
/// units whose emitted length deviates from the consensus. The most
/// frequent event becomes the frameshift candidate when it clears a third
/// of the average per-bp coverage.
fn find_frameshift_from_selected_reads(
    vntr: &ReferenceVntr,
    selected_reads: &[SelectedRead],
) -> Option<Frameshift> {
    let mut mutations: HashMap<String, usize> = HashMap::new();
    let mut repeating_bps_in_data = 0usize;
    let mut repeats_lengths_distribution = Vec::new();

    for read in selected_reads {
        let states = &read.vpath.states;
        let repeats_lengths = vpath::repeating_pattern_lengths(states);
        repeating_bps_in_data += vpath::repeat_bp_matches(&read.vpath);

        let mut current_repeat: Option<usize> = None;
        for state in states {
            if state.tag().is_some_and(|t| t.is_flank()) || state.is_match() {
                continue;
            }
            if state.is_unit_start() {
                current_repeat = Some(current_repeat.map_or(0, |r| r + 1));
            }
            let Some(repeat) = current_repeat else { continue };
            if repeat >= repeats_lengths.len() {
                continue;
            }
            if !state.is_insert() && !state.is_delete() {
                continue;
            }
            if repeats_lengths[repeat] == vntr.pattern.len() {
                continue;
            }
            let label = indel_label(state, states, &read.sequence);
            *mutations.entry(label).or_insert(0) += 1;
        }
        repeats_lengths_distribution.extend(repeats_lengths);
    }

    repeats_lengths_distribution.sort_unstable();
    debug!("Observed repeat unit lengths: {repeats_lengths_distribution:?}");
    info!("Observed repeating base pairs in data: {repeating_bps_in_data}");

    let candidate = mutations
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))?;
    let avg_bp_coverage = repeating_bps_in_data as f64 / vntr.reference_length() as f64;
    info!(
        "Frameshift candidate {} occurred {} times, average bp coverage {avg_bp_coverage}",
        candidate.0, candidate.1
    );

    if candidate.1 as f64 > avg_bp_coverage / 3. {
        Some(Frameshift { state: candidate.0, occurrences: candidate.1 })
    } else {
        None
    }
}

/// Label an indel event: `D<col>` for deletions, `I<col><base>` for
/// insertions, aggregated across repeat copies.
fn indel_label(state: &StateKind, states: &[StateKind], sequence: &str) -> String {
    let col = state.column().expect("indel states carry a column");
    if state.is_insert() {
        let base = vpath::emitted_base_at(*state, states, sequence);
        match base {
            Some(base) => format!("I{col}{base}"),
            None => format!("I{col}"),
        }
    } else {
        format!("D{col}")
    }
}

/// Per-VNTR orchestration: builds (or loads) the read matcher, calibrates
/// (or loads) the acceptance threshold, and runs the genotyper.
pub struct VntrFinder<'a> {
    vntr: &'a ReferenceVntr,
    settings: &'a Settings,
}

impl<'a> VntrFinder<'a> {
    pub fn new(vntr: &'a ReferenceVntr, settings: &'a Settings) -> Result<Self, VantraError> {
        vntr.validate()?;
        Ok(VntrFinder { vntr, settings })
    }

    /// The read matcher for reads of `read_length`, loaded from the
    /// trained-model cache when possible and stored after a fresh build.
    pub fn read_matcher(&self, read_length: usize) -> Result<Hmm> {
        let path =
            io::hmm_cache_path(&self.settings.trained_hmms_dir, self.vntr.id, read_length);
        if self.settings.use_trained_hmms && path.is_file() {
            match io::model::load_hmm(&path) {
                Ok(hmm) => return Ok(hmm),
                Err(e) => debug!("Ignoring unreadable model cache {}: {e:?}", path.display()),
            }
        }

        let hmm = read_matcher_for_length(self.vntr, read_length, self.settings.max_error_rate)?;
        if let Err(e) = io::model::save_hmm(&hmm, &path) {
            warn!("Could not store trained model {}: {e:?}", path.display());
        }
        Ok(hmm)
    }

    pub fn min_score(&self, hmm: &Hmm, alignment_path: &str, read_length: usize) -> Result<f64> {
        scoring::min_score_to_select_a_read(
            hmm,
            alignment_path,
            self.vntr,
            read_length,
            self.settings,
        )
    }

    /// Full per-VNTR pipeline against an alignment file plus the unmapped
    /// read pool.
    pub fn find_repeat_count_from_alignment_file(
        &self,
        alignment_path: &str,
        unmapped_reads: &[ReadSegment],
        candidate_ids: Option<&HashSet<String>>,
        coverage: &dyn CoverageModel,
    ) -> Result<VntrGenotype> {
        debug!("Finding repeat count from alignment file for {}", self.vntr.id);
        let read_length = unmapped_reads
            .first()
            .map_or(DEFAULT_READ_LENGTH, |read| read.sequence.len());

        let hmm = self.read_matcher(read_length)?;
        let min_score = self.min_score(&hmm, alignment_path, read_length)?;
        let mapped_reads = crate::reads::fetch_locus_reads(alignment_path, self.vntr)
            .with_context(|| format!("Could not fetch reads over {}", self.vntr.get_fetch_definition_s()))?;

        let genotype = genotype_reads(
            self.vntr,
            &hmm,
            min_score,
            unmapped_reads,
            candidate_ids,
            &mapped_reads,
            coverage,
        )?;

        info!(
            "Flanked repeats: {:?}, max observed repeats: {:?}",
            genotype.flanked_repeats,
            genotype.observed_repeats.iter().max()
        );
        info!(
            "Scaled and observed copy number for {}: {} {}",
            self.vntr.id, genotype.scaled_copy_number, genotype.observed_copy_number
        );
        Ok(genotype)
    }
}
