//! # Repeat matchers
//!
//! The repeat matcher chains `copies` profile segments of the consensus
//! unit, each bracketed by silent `unit_start_k` / `unit_end_k` gateway
//! states. The constant-copy chain accepts exactly `copies` units; the
//! variable-copy wrapper adds `start_repeating_pattern_match` /
//! `end_repeating_pattern_match` gateways and splits every `unit_end`
//! fifty-fifty between its successor and the exit gateway so any number of
//! units up to `copies` is accepted.
use crate::hmm::model::{Hmm, HmmBuilder};
use crate::hmm::profile::ProfileParams;
use crate::hmm::state::{StateKind, Tag};
use crate::VantraError;

pub(crate) struct CopyStates {
    pub unit_start: usize,
    pub unit_end: usize,
    pub matches: Vec<usize>,
}

/// Handles of an appended variable-copy repeat matcher. The caller wires
/// the remaining 0.5 out of `last_unit_end` and the full mass out of
/// `exit` to whatever follows the repeat region.
pub(crate) struct RepeatPart {
    pub entry: usize,
    pub last_unit_end: usize,
    pub exit: usize,
    pub first_matches: Vec<usize>,
    pub match_states: Vec<usize>,
}

/// Append one profile segment as repeat copy `k`.
fn append_profile_copy(builder: &mut HmmBuilder, params: &ProfileParams, k: usize) -> CopyStates {
    let columns = params.columns();
    let tag = Tag::Copy(k);

    let unit_start = builder.add_state(StateKind::UnitStart(k), None);
    let unit_end = builder.add_state(StateKind::UnitEnd(k), None);
    let inserts: Vec<usize> = (0..=columns)
        .map(|c| builder.add_state(StateKind::Insert { col: c, tag }, Some(params.insert_emissions[c])))
        .collect();
    let matches: Vec<usize> = (1..=columns)
        .map(|c| builder.add_state(StateKind::Match { col: c, tag }, Some(params.match_emissions[c - 1])))
        .collect();
    let deletes: Vec<usize> = (1..=columns)
        .map(|c| builder.add_state(StateKind::Delete { col: c, tag }, None))
        .collect();

    let mut wire = |from: usize, to: usize, p: f64| {
        if p > 0. {
            builder.add_transition(from, to, p);
        }
    };

    wire(unit_start, matches[0], params.unit_start[0]);
    wire(unit_start, deletes[0], params.unit_start[1]);
    wire(unit_start, inserts[0], params.unit_start[2]);

    for c in 0..=columns {
        let i = inserts[c];
        let [advance, delete, stay] = params.insert_trans[c];
        wire(i, i, stay);
        if c < columns {
            wire(i, matches[c], advance);
            wire(i, deletes[c], delete);
        } else {
            wire(i, unit_end, advance);
        }
    }

    for c in 1..=columns {
        let m = matches[c - 1];
        let d = deletes[c - 1];
        let [m_advance, m_delete, m_insert] = params.match_trans[c - 1];
        let [d_advance, d_delete, d_insert] = params.delete_trans[c - 1];

        wire(m, inserts[c], m_insert);
        wire(d, inserts[c], d_insert);
        if c < columns {
            wire(m, matches[c], m_advance);
            wire(m, deletes[c], m_delete);
            wire(d, matches[c], d_advance);
            wire(d, deletes[c], d_delete);
        } else {
            wire(m, unit_end, m_advance);
            wire(d, unit_end, d_advance);
        }
    }

    CopyStates { unit_start, unit_end, matches }
}

/// Append a chain of `copies` profile segments with probability-1 links
/// between consecutive copies.
pub(crate) fn append_constant_repeats(
    builder: &mut HmmBuilder,
    params: &ProfileParams,
    copies: usize,
) -> Vec<CopyStates> {
    let chain: Vec<CopyStates> = (0..copies)
        .map(|k| append_profile_copy(builder, params, k))
        .collect();
    for pair in chain.windows(2) {
        builder.add_transition(pair[0].unit_end, pair[1].unit_start, 1.);
    }
    chain
}

/// Append the variable-copy wrapper: entry and exit gateways around the
/// constant chain, with every `unit_end` splitting its mass between the
/// next copy (or the caller-wired successor) and the exit gateway.
pub(crate) fn append_variable_repeats(
    builder: &mut HmmBuilder,
    params: &ProfileParams,
    copies: usize,
) -> RepeatPart {
    let entry = builder.add_state(StateKind::RepeatEntry, None);
    let exit = builder.add_state(StateKind::RepeatExit, None);

    let chain: Vec<CopyStates> = (0..copies)
        .map(|k| append_profile_copy(builder, params, k))
        .collect();

    builder.add_transition(entry, chain[0].unit_start, 1.);
    for pair in chain.windows(2) {
        builder.add_transition(pair[0].unit_end, pair[1].unit_start, 0.5);
        builder.add_transition(pair[0].unit_end, exit, 0.5);
    }
    let last_unit_end = chain[copies - 1].unit_end;
    builder.add_transition(last_unit_end, exit, 0.5);

    RepeatPart {
        entry,
        last_unit_end,
        exit,
        first_matches: chain.iter().map(|c| c.matches[0]).collect(),
        match_states: chain.iter().flat_map(|c| c.matches.iter().copied()).collect(),
    }
}

/// Standalone constant-copy matcher accepting exactly `copies` units.
pub fn constant_repeat_matcher_hmm(
    params: &ProfileParams,
    copies: usize,
) -> Result<Hmm, VantraError> {
    if copies == 0 {
        return Err(VantraError::HmmConstruction(
            "repeat matcher needs at least one copy".to_string(),
        ));
    }
    let mut builder = HmmBuilder::new();
    let start = builder.add_state(StateKind::Start, None);
    let end = builder.add_state(StateKind::End, None);
    let chain = append_constant_repeats(&mut builder, params, copies);
    builder.add_transition(start, chain[0].unit_start, 1.);
    builder.add_transition(chain[copies - 1].unit_end, end, 1.);
    builder.build()
}

/// Standalone variable-copy matcher accepting 1 to `copies` units.
pub fn variable_repeat_matcher_hmm(
    params: &ProfileParams,
    copies: usize,
) -> Result<Hmm, VantraError> {
    if copies == 0 {
        return Err(VantraError::HmmConstruction(
            "repeat matcher needs at least one copy".to_string(),
        ));
    }
    let mut builder = HmmBuilder::new();
    let start = builder.add_state(StateKind::Start, None);
    let end = builder.add_state(StateKind::End, None);
    let part = append_variable_repeats(&mut builder, params, copies);
    builder.add_transition(start, part.entry, 1.);
    builder.add_transition(part.last_unit_end, end, 0.5);
    builder.add_transition(part.exit, end, 1.);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::state::StateKind;

    fn cag_params() -> ProfileParams {
        ProfileParams::from_unit("CAG", 0.05)
    }

    #[test]
    fn constant_matcher_visits_every_gateway() {
        let hmm = constant_repeat_matcher_hmm(&cag_params(), 2).unwrap();
        let vpath = hmm.viterbi("CAGCAG").unwrap();
        assert_eq!(6, vpath.emitted_len());

        let starts: Vec<usize> = vpath
            .states
            .iter()
            .filter_map(|s| match s {
                StateKind::UnitStart(k) => Some(*k),
                _ => None,
            })
            .collect();
        assert_eq!(vec![0, 1], starts);
        let ends = vpath.states.iter().filter(|s| s.is_unit_end()).count();
        assert_eq!(2, ends);
    }

    #[test]
    fn variable_matcher_accepts_fewer_copies() {
        let hmm = variable_repeat_matcher_hmm(&cag_params(), 3).unwrap();
        for (read, units) in [("CAG", 1), ("CAGCAG", 2), ("CAGCAGCAG", 3)] {
            let vpath = hmm.viterbi(read).unwrap();
            assert!(vpath.logp.is_finite(), "{read} has no path");
            assert_eq!(read.len(), vpath.emitted_len());
            let ends = vpath.states.iter().filter(|s| s.is_unit_end()).count();
            assert_eq!(units, ends, "unexpected unit count for {read}");
        }
    }

    #[test]
    fn variable_matcher_routes_early_exit_through_gateway() {
        let hmm = variable_repeat_matcher_hmm(&cag_params(), 3).unwrap();
        let vpath = hmm.viterbi("CAG").unwrap();
        assert!(vpath.states.contains(&StateKind::RepeatEntry));
        assert!(vpath.states.contains(&StateKind::RepeatExit));
    }

    #[test]
    fn zero_copies_is_rejected() {
        assert!(constant_repeat_matcher_hmm(&cag_params(), 0).is_err());
        assert!(variable_repeat_matcher_hmm(&cag_params(), 0).is_err());
    }

    #[test]
    fn count_based_params_drive_a_matcher() {
        let segments = vec!["CAG".to_string(), "CAG".to_string(), "CAG".to_string()];
        let params = ProfileParams::from_repeat_segments("CAG", &segments, 100, 0.05).unwrap();
        let hmm = constant_repeat_matcher_hmm(&params, 2).unwrap();
        let vpath = hmm.viterbi("CAGCAG").unwrap();
        assert!(vpath.logp.is_finite());
        assert_eq!(6, vpath.states.iter().filter(|s| s.is_match()).count());
    }
}
