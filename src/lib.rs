//! # vantra
//!
//! Library backbone of the `vantra` binary: a read-matching profile HMM
//! core for genotyping Variable Number Tandem Repeats. Given a reference
//! VNTR description, `vantra` assembles a matcher HMM out of a left-flank
//! suffix matcher, a variable-copy repeat matcher and a right-flank prefix
//! matcher, Viterbi-decodes sequencing reads on both strands, and mines
//! the decoded paths for repeat counts, spanning evidence and frameshift
//! indels.
pub mod cli;
pub mod genotyping;
pub mod hmm;
pub mod io;
pub mod reads;
pub mod repeat;
pub mod scoring;
pub mod settings;
pub mod utils;
pub mod vpath;

use std::collections::HashSet;

use log::{debug, info};
use thiserror::Error;

use crate::genotyping::{CoverageModel, VntrFinder, VntrGenotype};
use crate::reads::ReadSegment;
use crate::repeat::ReferenceVntr;
use crate::settings::Settings;

/// Errors of the model-construction and decoding core. The orchestration
/// layers wrap these with `anyhow` context.
#[derive(Debug, Error)]
pub enum VantraError {
    /// The reference description cannot parameterize a matcher; the VNTR
    /// is unscorable.
    #[error("reference VNTR {vntr_id} is unscorable: {reason}")]
    InvalidReference { vntr_id: u32, reason: String },

    /// A structural invariant failed while assembling or baking a model.
    /// This is an implementation bug for well-formed inputs.
    #[error("HMM construction failed: {0}")]
    HmmConstruction(String),

    /// A sequence contained symbols outside the ACGT alphabet.
    #[error("sequence contains symbols outside the ACGT alphabet")]
    InvalidSequence,
}

/// Genotype every VNTR locus against one alignment file and its unmapped
/// read pool. Loci failing (an unscorable reference, an uncalibratable
/// threshold) are logged and skipped; the remaining results are returned
/// in input order.
pub fn run(
    vntrs: &[ReferenceVntr],
    alignment_path: &str,
    unmapped_reads: &[ReadSegment],
    candidate_ids: Option<&HashSet<String>>,
    coverage: &dyn CoverageModel,
    settings: &Settings,
) -> Vec<(u32, VntrGenotype)> {
    let mut results = Vec::with_capacity(vntrs.len());
    for vntr in vntrs {
        let finder = match VntrFinder::new(vntr, settings) {
            Ok(finder) => finder,
            Err(e) => {
                debug!("Skipping locus {}: {e:?}", vntr.get_fetch_definition_s());
                continue;
            }
        };
        match finder.find_repeat_count_from_alignment_file(
            alignment_path,
            unmapped_reads,
            candidate_ids,
            coverage,
        ) {
            Ok(genotype) => {
                info!(
                    "Genotyped {}: copy number {}",
                    vntr.get_fetch_definition_s(),
                    genotype.scaled_copy_number
                );
                results.push((vntr.id, genotype));
            }
            Err(e) => {
                debug!(
                    "Could not genotype locus {}: {e:?}",
                    vntr.get_fetch_definition_s()
                );
            }
        }
    }
    results
}
