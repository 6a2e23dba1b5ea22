//! # Flank matchers
//!
//! Two specializations of a profile segment match the DNA around the
//! repeat run. The *suffix matcher* models the left flank: a read may pick
//! up the flank anywhere (entry mass is spread over all match columns) but
//! must run into the repeat at its right edge. The *prefix matcher* models
//! the right flank: a read enters at the first column but may leave early
//! through a small per-column exit probability, since the read simply ends
//! somewhere inside the flank.
use crate::hmm::model::{Hmm, HmmBuilder};
use crate::hmm::state::{StateKind, Tag};
use crate::utils;
use crate::VantraError;

/// Entry and exit boundary states of an appended flank matcher.
pub(crate) struct FlankPart {
    pub entry: usize,
    pub exit: usize,
}

/// Probability a prefix match column hands the path to the exit boundary
/// instead of the next column.
const PREFIX_EXIT_LEAK: f64 = 0.01;

struct FlankStates {
    inserts: Vec<usize>,
    matches: Vec<usize>,
    deletes: Vec<usize>,
}

fn add_flank_states(builder: &mut HmmBuilder, pattern: &str, tag: Tag) -> FlankStates {
    let columns = pattern.len();
    let inserts = (0..=columns)
        .map(|c| builder.add_state(StateKind::Insert { col: c, tag }, Some([0.25; 4])))
        .collect();
    let matches = pattern
        .bytes()
        .enumerate()
        .map(|(i, base)| {
            let mut emission = [0.01; 4];
            emission[utils::base_index(base).expect("validated flank string")] = 0.97;
            builder.add_state(StateKind::Match { col: i + 1, tag }, Some(emission))
        })
        .collect();
    let deletes = (1..=columns)
        .map(|c| builder.add_state(StateKind::Delete { col: c, tag }, None))
        .collect();
    FlankStates { inserts, matches, deletes }
}

/// Append a right-flank matcher for `pattern`: anchored at its first
/// column, free to exit early from any internal match column.
pub(crate) fn append_prefix_matcher(
    builder: &mut HmmBuilder,
    pattern: &str,
    max_error_rate: f64,
) -> FlankPart {
    let entry = builder.add_state(StateKind::PrefixStart, None);
    let exit = builder.add_state(StateKind::PrefixEnd, None);
    let states = add_flank_states(builder, pattern, Tag::Prefix);

    let insert_error = max_error_rate * 2. / 5.;
    let delete_error = max_error_rate / 5.;
    let match_p = 1. - insert_error - delete_error;

    builder.add_transition(entry, states.matches[0], match_p);
    builder.add_transition(entry, states.deletes[0], delete_error);
    builder.add_transition(entry, states.inserts[0], insert_error);

    wire_flank_columns(builder, &states, exit, insert_error, delete_error, |c, last| {
        // Internal prefix match columns leak a little probability to the
        // exit so the read may end inside the flank.
        if c < last {
            Some((match_p - PREFIX_EXIT_LEAK, PREFIX_EXIT_LEAK))
        } else {
            None
        }
    });

    FlankPart { entry, exit }
}

/// Append a left-flank matcher for `pattern`: entry mass is spread evenly
/// over all match columns, the exit is anchored at the last column.
pub(crate) fn append_suffix_matcher(
    builder: &mut HmmBuilder,
    pattern: &str,
    max_error_rate: f64,
) -> FlankPart {
    let entry = builder.add_state(StateKind::SuffixStart, None);
    let exit = builder.add_state(StateKind::SuffixEnd, None);
    let states = add_flank_states(builder, pattern, Tag::Suffix);

    let insert_error = max_error_rate * 2. / 5.;
    let delete_error = max_error_rate / 5.;
    let match_p = 1. - insert_error - delete_error;

    let spread = match_p / pattern.len() as f64;
    for &m in &states.matches {
        builder.add_transition(entry, m, spread);
    }
    builder.add_transition(entry, states.deletes[0], delete_error);
    builder.add_transition(entry, states.inserts[0], insert_error);

    wire_flank_columns(builder, &states, exit, insert_error, delete_error, |_, _| None);

    FlankPart { entry, exit }
}

/// Shared column wiring of a flank segment. `match_advance` may override
/// the `M_c -> M_{c+1}` probability and add a leak edge to the exit;
/// returning `None` keeps the standard advance probability.
fn wire_flank_columns(
    builder: &mut HmmBuilder,
    states: &FlankStates,
    exit: usize,
    insert_error: f64,
    delete_error: f64,
    match_advance: impl Fn(usize, usize) -> Option<(f64, f64)>,
) {
    let last = states.matches.len();
    let match_p = 1. - insert_error - delete_error;

    builder.add_transition(states.inserts[0], states.inserts[0], insert_error);
    builder.add_transition(states.inserts[0], states.matches[0], match_p);
    builder.add_transition(states.inserts[0], states.deletes[0], delete_error);

    for c in 1..=last {
        let m = states.matches[c - 1];
        let d = states.deletes[c - 1];
        let i = states.inserts[c];

        builder.add_transition(m, i, insert_error);
        builder.add_transition(d, i, insert_error);
        builder.add_transition(i, i, insert_error);

        if c < last {
            builder.add_transition(i, states.matches[c], match_p);
            builder.add_transition(i, states.deletes[c], delete_error);

            match match_advance(c, last) {
                Some((advance, leak)) => {
                    builder.add_transition(m, states.matches[c], advance);
                    builder.add_transition(m, exit, leak);
                }
                None => builder.add_transition(m, states.matches[c], match_p),
            }
            builder.add_transition(m, states.deletes[c], delete_error);

            builder.add_transition(d, states.matches[c], match_p);
            builder.add_transition(d, states.deletes[c], delete_error);
        } else {
            builder.add_transition(m, exit, 1. - insert_error);
            builder.add_transition(d, exit, 1. - insert_error);
            builder.add_transition(i, exit, 1. - insert_error);
        }
    }
}

/// Standalone prefix matcher model, mostly useful for tests and
/// diagnostics; composition goes through [`append_prefix_matcher`].
pub fn prefix_matcher_hmm(pattern: &str, max_error_rate: f64) -> Result<Hmm, VantraError> {
    standalone(pattern, max_error_rate, append_prefix_matcher)
}

/// Standalone suffix matcher model.
pub fn suffix_matcher_hmm(pattern: &str, max_error_rate: f64) -> Result<Hmm, VantraError> {
    standalone(pattern, max_error_rate, append_suffix_matcher)
}

fn standalone(
    pattern: &str,
    max_error_rate: f64,
    append: impl Fn(&mut HmmBuilder, &str, f64) -> FlankPart,
) -> Result<Hmm, VantraError> {
    let mut builder = HmmBuilder::new();
    let start = builder.add_state(StateKind::Start, None);
    let end = builder.add_state(StateKind::End, None);
    let part = append(&mut builder, pattern, max_error_rate);
    builder.add_transition(start, part.entry, 1.);
    builder.add_transition(part.exit, end, 1.);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matcher_bakes_stochastic() {
        // build() verifies row and emission sums.
        let hmm = prefix_matcher_hmm("ACGTT", 0.05).unwrap();
        assert!(hmm.find_state(StateKind::PrefixStart).is_some());
        assert!(hmm.find_state(StateKind::PrefixEnd).is_some());
    }

    #[test]
    fn prefix_matcher_accepts_the_head_of_its_flank() {
        let hmm = prefix_matcher_hmm("ACGTT", 0.05).unwrap();
        let full = hmm.viterbi("ACGTT").unwrap();
        let head = hmm.viterbi("ACG").unwrap();
        assert!(full.logp.is_finite());
        assert!(head.logp.is_finite());
        assert_eq!(3, head.emitted_len());
        // The early exit keeps a pure head competitive with delete chains.
        assert!(head.states.iter().filter(|s| s.is_match()).count() == 3);
    }

    #[test]
    fn suffix_matcher_accepts_the_tail_of_its_flank() {
        let hmm = suffix_matcher_hmm("ACGTT", 0.05).unwrap();
        let tail = hmm.viterbi("GTT").unwrap();
        assert!(tail.logp.is_finite());
        let columns: Vec<usize> = tail
            .states
            .iter()
            .filter(|s| s.is_match())
            .filter_map(|s| s.column())
            .collect();
        assert_eq!(vec![3, 4, 5], columns);
    }

    #[test]
    fn suffix_matcher_prefers_tail_over_head_alignment() {
        let hmm = suffix_matcher_hmm("ACGTT", 0.05).unwrap();
        let tail = hmm.viterbi("GTT").unwrap();
        let head = hmm.viterbi("ACG").unwrap();
        // The head must be dragged to the anchored right edge through
        // deletions, so the tail scores strictly better.
        assert!(tail.logp > head.logp);
    }

    #[test]
    fn single_column_flanks_build() {
        assert!(prefix_matcher_hmm("A", 0.05).is_ok());
        assert!(suffix_matcher_hmm("A", 0.05).is_ok());
    }
}
