//! # Read-matcher composition
//!
//! The full read matcher concatenates a suffix matcher for the left flank,
//! a variable-copy repeat matcher, and a prefix matcher for the right
//! flank. Two edits then open the model up to reads that only partially
//! cover the locus: entry mass is split between the left flank and the
//! first column of every repeat copy, and every repeat match state gains an
//! edge to the global end so a read may stop mid-repeat.
use crate::hmm::flank::{append_prefix_matcher, append_suffix_matcher};
use crate::hmm::model::{Hmm, HmmBuilder};
use crate::hmm::profile::ProfileParams;
use crate::hmm::repeat_matcher::append_variable_repeats;
use crate::hmm::state::StateKind;
use crate::hmm::viterbi::VPath;
use crate::repeat::ReferenceVntr;
use crate::vpath;
use crate::VantraError;

/// Each reference repeat segment contributes this many observations to the
/// count-based profile build, keeping the pseudocounts marginal.
pub const SEGMENT_REPLICATION: usize = 100;

/// Share of the entry mass kept on the left-flank matcher; the rest is
/// spread over the first match column of every repeat copy.
const FLANK_ENTRY_SHARE: f64 = 0.3;
const REPEAT_ENTRY_SHARE: f64 = 0.7;

/// Source of the per-copy profile parameters.
pub enum RepeatProfile<'a> {
    /// Counts over the repeat segments observed in the reference.
    FromReference,
    /// Counts over a multiple alignment of repeat units decoded from
    /// previously recruited reads.
    FromDecoded(&'a [(String, VPath)]),
}

/// Number of repeat copies a matcher needs to cover a read of
/// `read_length` bases.
pub fn copies_for_read_length(read_length: usize, pattern_len: usize) -> usize {
    (read_length as f64 / pattern_len as f64 + 0.5).ceil() as usize
}

/// Build the read matcher for reads of a known length. Flank matchers are
/// sized to `read_length - 10` so a read can never out-run them.
pub fn read_matcher_for_length(
    vntr: &ReferenceVntr,
    read_length: usize,
    max_error_rate: f64,
) -> Result<Hmm, VantraError> {
    let copies = copies_for_read_length(read_length, vntr.pattern.len());
    let flank_size = read_length.saturating_sub(10).max(1);
    build_read_matcher(vntr, copies, flank_size, max_error_rate, RepeatProfile::FromReference)
}

pub fn build_read_matcher(
    vntr: &ReferenceVntr,
    copies: usize,
    flank_size: usize,
    max_error_rate: f64,
    profile: RepeatProfile,
) -> Result<Hmm, VantraError> {
    vntr.validate()?;
    if copies == 0 {
        return Err(VantraError::HmmConstruction(
            "read matcher needs at least one repeat copy".to_string(),
        ));
    }

    let params = match profile {
        RepeatProfile::FromReference => ProfileParams::from_repeat_segments(
            &vntr.pattern,
            &vntr.repeat_segments,
            SEGMENT_REPLICATION,
            max_error_rate,
        )?,
        RepeatProfile::FromDecoded(reads) => {
            let rows = vpath::multiple_alignment_of_repeats_from_reads(reads);
            ProfileParams::from_alignment(&rows, max_error_rate)?
        }
    };

    let mut builder = HmmBuilder::new();
    let start = builder.add_state(StateKind::Start, None);
    let end = builder.add_state(StateKind::End, None);

    let suffix = append_suffix_matcher(&mut builder, vntr.left_flank_tail(flank_size), max_error_rate);
    let repeats = append_variable_repeats(&mut builder, &params, copies);
    let prefix = append_prefix_matcher(&mut builder, vntr.right_flank_head(flank_size), max_error_rate);

    // Fuse the three sub-models with probability-1 boundary edges.
    builder.add_transition(start, suffix.entry, 1.);
    builder.add_transition(suffix.exit, repeats.entry, 1.);
    builder.add_transition(repeats.last_unit_end, prefix.entry, 0.5);
    builder.add_transition(repeats.exit, prefix.entry, 1.);
    builder.add_transition(prefix.exit, end, 1.);

    // Internal entry: a read may start inside the repeat run.
    builder.set_transition(start, suffix.entry, FLANK_ENTRY_SHARE);
    let per_copy = REPEAT_ENTRY_SHARE / copies as f64;
    for &first_match in &repeats.first_matches {
        builder.add_transition(start, first_match, per_copy);
    }

    // Early termination: any repeat match state may be the last emitting
    // state of the read. Existing out-edges shrink to keep rows stochastic.
    let to_end = REPEAT_ENTRY_SHARE / repeats.match_states.len() as f64;
    let factor = 1. / (1. + to_end);
    for &match_state in &repeats.match_states {
        builder.scale_out_edges(match_state, factor);
        builder.add_transition(match_state, end, to_end * factor);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::state::Tag;

    fn cag_vntr() -> ReferenceVntr {
        ReferenceVntr {
            id: 42,
            chromosome: "chr4".to_string(),
            start_point: 1000,
            pattern: "CAG".to_string(),
            repeat_segments: vec!["CAG".to_string(); 4],
            left_flanking_region: "AAAAAAAAAA".to_string(),
            right_flanking_region: "TTTTTTTTTT".to_string(),
        }
    }

    #[test]
    fn copies_grow_with_read_length() {
        assert_eq!(5, copies_for_read_length(12, 3));
        assert_eq!(51, copies_for_read_length(150, 3));
        assert_eq!(3, copies_for_read_length(24, 10));
    }

    #[test]
    fn composed_matcher_bakes_stochastic() {
        // build() enforces row sums, emission sums and reachability.
        let hmm = build_read_matcher(&cag_vntr(), 3, 10, 0.05, RepeatProfile::FromReference).unwrap();
        assert!(hmm.find_state(StateKind::SuffixStart).is_some());
        assert!(hmm.find_state(StateKind::RepeatEntry).is_some());
        assert!(hmm.find_state(StateKind::PrefixEnd).is_some());
    }

    #[test]
    fn spanning_read_walks_all_three_submodels() {
        let hmm = build_read_matcher(&cag_vntr(), 5, 10, 0.05, RepeatProfile::FromReference).unwrap();
        let read = "AAAAAAAAAACAGCAGCAGCAGTTTTTTTTTT";
        let vpath = hmm.viterbi(read).unwrap();
        assert!(vpath.logp.is_finite());
        assert_eq!(read.len(), vpath.emitted_len());

        let tags: Vec<Option<Tag>> = vpath.states.iter().map(|s| s.tag()).collect();
        assert!(tags.contains(&Some(Tag::Suffix)));
        assert!(tags.contains(&Some(Tag::Copy(0))));
        assert!(tags.contains(&Some(Tag::Prefix)));
        assert_eq!(4, vpath.states.iter().filter(|s| s.is_unit_end()).count());
    }

    #[test]
    fn pure_repeat_read_enters_and_exits_inside_the_run() {
        let hmm = build_read_matcher(&cag_vntr(), 5, 10, 0.05, RepeatProfile::FromReference).unwrap();
        let vpath = hmm.viterbi("CAGCAGCAGCAG").unwrap();
        assert!(vpath.logp.is_finite());

        // Entry skips the suffix matcher entirely.
        let first = vpath.states.first().unwrap();
        assert_eq!(Some(1), first.column());
        assert!(matches!(first.tag(), Some(Tag::Copy(_))));
        // The read ends on a repeat match state, not in the right flank.
        let last = vpath.states.last().unwrap();
        assert!(last.is_match());
        assert!(matches!(last.tag(), Some(Tag::Copy(_))));
    }

    #[test]
    fn decoded_units_can_rebuild_the_matcher() {
        let hmm = build_read_matcher(&cag_vntr(), 5, 10, 0.05, RepeatProfile::FromReference).unwrap();
        let read = "AAAAAAAAAACAGCAGCAGCAGTTTTTTTTTT".to_string();
        let vpath = hmm.viterbi(&read).unwrap();
        let decoded = vec![(read, vpath)];

        let rebuilt =
            build_read_matcher(&cag_vntr(), 3, 10, 0.05, RepeatProfile::FromDecoded(&decoded))
                .unwrap();
        let again = rebuilt.viterbi("AAAAAAAAAACAGCAGCAGTTTTTTTTTT").unwrap();
        assert!(again.logp.is_finite());
    }

    #[test]
    fn invalid_reference_is_rejected() {
        let mut vntr = cag_vntr();
        vntr.repeat_segments.clear();
        assert!(matches!(
            build_read_matcher(&vntr, 3, 10, 0.05, RepeatProfile::FromReference),
            Err(VantraError::InvalidReference { .. })
        ));
    }

    #[test]
    fn larger_error_budget_does_not_hurt_an_indel_read() {
        let vntr = cag_vntr();
        let strict = build_read_matcher(&vntr, 5, 10, 0.01, RepeatProfile::FromReference).unwrap();
        let lax = build_read_matcher(&vntr, 5, 10, 0.1, RepeatProfile::FromReference).unwrap();
        // One unit carries a single-base deletion.
        let read = "AAAAAAAAAACAGCACAGCAGTTTTTTTTTT";
        let strict_logp = strict.viterbi(read).unwrap().logp;
        let lax_logp = lax.viterbi(read).unwrap().logp;
        assert!(lax_logp >= strict_logp);
    }
}
