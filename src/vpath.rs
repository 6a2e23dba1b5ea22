//! # Decoded-path analysis
//!
//! Pure functions over Viterbi state paths. Everything the genotyper knows
//! about a read (how many repeat units it covers, how much of each flank it
//! touches, whether it spans the locus, where its indels sit) is mined from
//! the decoded path by the functions in this module.
use std::collections::HashMap;

use crate::hmm::state::{StateKind, Tag};
use crate::hmm::viterbi::VPath;

/// A `unit_start`/`unit_end` event only counts towards the repeat number
/// when at least this many read bases lie on its open side, guarding
/// against degenerate partial units at the read boundary.
const MIN_BP_IN_REPEAT: usize = 3;

/// Emitted flank size both sides must exceed for a read to span the locus.
const SPANNING_FLANK_MIN: usize = 5;

/// Flank rate assigned to a side with zero emitted bases under the
/// accuracy filter; low enough that the read is treated as non-spanning.
const ACCURACY_EPSILON: f64 = 1e-5;

/// Number of repeat units covered by the decoded path.
///
/// Counts `unit_start` events with enough unconsumed read left and
/// `unit_end` events with enough read consumed; a read anchored mid-unit
/// on both sides gets one extra unit.
pub fn repeat_count(vpath: &VPath) -> usize {
    let read_length = vpath.emitted_len();
    let mut current_bp = 0;
    let mut starts = 0;
    let mut ends = 0;
    let (mut first_start, mut last_start) = (None, None);
    let (mut first_end, mut last_end) = (None, None);

    for state in &vpath.states {
        if state.is_emitting() {
            current_bp += 1;
        }
        if state.is_unit_start() && read_length - current_bp >= MIN_BP_IN_REPEAT {
            first_start.get_or_insert(current_bp);
            last_start = Some(current_bp);
            starts += 1;
        }
        if state.is_unit_end() && current_bp >= MIN_BP_IN_REPEAT {
            first_end.get_or_insert(current_bp);
            last_end = Some(current_bp);
            ends += 1;
        }
    }

    let delta = match (first_start, last_start, first_end, last_end) {
        (Some(fs), Some(ls), Some(fe), Some(le)) if fe < fs && ls > le => 1,
        _ => 0,
    };
    starts.max(ends) + delta
}

/// Number of read bases emitted inside the repeat region (emitting states
/// not tagged with a flank).
pub fn repeat_bp_matches(vpath: &VPath) -> usize {
    vpath
        .states
        .iter()
        .filter(|s| s.is_emitting() && s.tag().is_some_and(|t| !t.is_flank()))
        .count()
}

/// Number of read bases emitted by the left-flank (suffix) matcher.
pub fn left_flank_emitted_len(vpath: &VPath) -> usize {
    flank_emitted_len(vpath, Tag::Suffix)
}

/// Number of read bases emitted by the right-flank (prefix) matcher.
pub fn right_flank_emitted_len(vpath: &VPath) -> usize {
    flank_emitted_len(vpath, Tag::Prefix)
}

fn flank_emitted_len(vpath: &VPath, tag: Tag) -> usize {
    vpath
        .states
        .iter()
        .filter(|s| s.is_emitting() && s.tag() == Some(tag))
        .count()
}

/// A read spans the locus when it emits enough bases on both flanks.
pub fn is_spanning(vpath: &VPath) -> bool {
    left_flank_emitted_len(vpath) > SPANNING_FLANK_MIN
        && right_flank_emitted_len(vpath) > SPANNING_FLANK_MIN
}

/// Fraction of flank-emitted bases agreeing with the reference flanks,
/// reported as the minimum of the two sides.
///
/// Prefix columns index the right flank from its start; suffix columns
/// index the left flank from its anchored right edge, relative to the last
/// suffix column the path visited. A side with zero emitted bases is
/// neutral (rate 1.0), or scores [`ACCURACY_EPSILON`] when the accuracy
/// filter is on so the read cannot pass as confidently spanning.
pub fn flank_match_rate(
    vpath: &VPath,
    sequence: &str,
    left_flank: &str,
    right_flank: &str,
    accuracy_filter: bool,
) -> f64 {
    let seq = sequence.as_bytes();
    let left = left_flank.as_bytes();
    let right = right_flank.as_bytes();

    // Column of the state right before the suffix exit boundary; the
    // suffix matcher is right-anchored, so left-flank offsets count back
    // from this column.
    let mut max_col = 0;
    let mut prev: Option<StateKind> = None;
    for state in &vpath.states {
        if *state == StateKind::SuffixEnd {
            max_col = prev.and_then(|p| p.column()).unwrap_or(0);
            break;
        }
        prev = Some(*state);
    }

    let (mut right_matches, mut right_bp) = (0usize, 0usize);
    let (mut left_matches, mut left_bp) = (0usize, 0usize);
    let mut seq_index = 0;

    for state in &vpath.states {
        match state.tag() {
            Some(Tag::Prefix) => {
                let col = state.column().expect("tagged states carry a column");
                if state.is_match()
                    && right.get(col - 1).is_some()
                    && seq.get(seq_index) == right.get(col - 1)
                {
                    right_matches += 1;
                }
                if state.is_emitting() {
                    right_bp += 1;
                }
            }
            Some(Tag::Suffix) => {
                let col = state.column().expect("tagged states carry a column");
                if state.is_match() && max_col >= col {
                    let offset = max_col - col + 1;
                    if offset <= left.len() && seq.get(seq_index) == Some(&left[left.len() - offset])
                    {
                        left_matches += 1;
                    }
                }
                if state.is_emitting() {
                    left_bp += 1;
                }
            }
            _ => {}
        }
        if state.is_emitting() {
            seq_index += 1;
        }
    }

    let rate = |matches: usize, bp: usize| {
        if bp != 0 {
            matches as f64 / bp as f64
        } else if accuracy_filter {
            ACCURACY_EPSILON
        } else {
            1.
        }
    };
    rate(right_matches, right_bp).min(rate(left_matches, left_bp))
}

/// Emitted length of every complete repeat unit on the path, in order.
pub fn repeating_pattern_lengths(states: &[StateKind]) -> Vec<usize> {
    let mut lengths = Vec::new();
    let mut prev_start = None;
    for (i, state) in states.iter().enumerate() {
        if state.is_unit_end() {
            if let Some(start) = prev_start {
                let emitted = states[start..i].iter().filter(|s| s.is_emitting()).count();
                lengths.push(emitted);
            }
        }
        if state.is_unit_start() {
            prev_start = Some(i);
        }
    }
    lengths
}

/// The read base emitted at the first visit of `target`, if the path
/// reaches it. Used to label insertion events with their base identity.
pub fn emitted_base_at(target: StateKind, states: &[StateKind], sequence: &str) -> Option<char> {
    let seq = sequence.as_bytes();
    let mut seq_index = 0;
    for state in states {
        if *state == target {
            return seq.get(seq_index).map(|b| *b as char);
        }
        if state.is_emitting() {
            seq_index += 1;
        }
    }
    None
}

/// Slice the read into its decoded repeat units: the emitted substring and
/// the interior state path of every `unit_start`/`unit_end` pair.
pub fn extract_repeat_segments(
    sequence: &str,
    states: &[StateKind],
) -> Vec<(String, Vec<StateKind>)> {
    let mut segments = Vec::new();
    let mut unit_seq_start = None;
    let mut unit_state_start = None;
    let mut seq_index = 0;

    for (i, state) in states.iter().enumerate() {
        if state.is_unit_end() {
            if let (Some(seq_start), Some(state_start)) = (unit_seq_start, unit_state_start) {
                segments.push((
                    sequence[seq_start..seq_index].to_string(),
                    states[state_start + 1..i].to_vec(),
                ));
            }
        }
        if state.is_unit_start() {
            unit_seq_start = Some(seq_index);
            unit_state_start = Some(i);
        }
        if state.is_emitting() {
            seq_index += 1;
        }
    }
    segments
}

/// Profile column of a state, disregarding which repeat copy it belongs
/// to; units decoded from different copies align by column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ColumnState {
    Match(usize),
    Insert(usize),
    Delete(usize),
}

impl ColumnState {
    fn of(state: &StateKind) -> Option<ColumnState> {
        let col = state.column()?;
        match state {
            StateKind::Match { .. } => Some(ColumnState::Match(col)),
            StateKind::Insert { .. } => Some(ColumnState::Insert(col)),
            StateKind::Delete { .. } => Some(ColumnState::Delete(col)),
            _ => None,
        }
    }

    fn column(&self) -> usize {
        match self {
            ColumnState::Match(c) | ColumnState::Insert(c) | ColumnState::Delete(c) => *c,
        }
    }
}

/// Multiple alignment of all repeat units decoded from the given reads.
/// The alignment allocates one column per profile column occurrence (the
/// maximum over units), then threads each unit's bases through the columns
/// its path visited; unvisited columns become gaps.
pub fn multiple_alignment_of_repeats_from_reads(reads: &[(String, VPath)]) -> Vec<String> {
    let mut units = Vec::new();
    for (sequence, vpath) in reads {
        units.extend(extract_repeat_segments(sequence, &vpath.states));
    }
    multiple_alignment_of_unit_paths(&units)
}

fn multiple_alignment_of_unit_paths(units: &[(String, Vec<StateKind>)]) -> Vec<String> {
    let mut occurrences: HashMap<ColumnState, usize> = HashMap::new();
    let mut max_column = 0;
    for (_, path) in units {
        let mut per_unit: HashMap<ColumnState, usize> = HashMap::new();
        for state in path {
            if let Some(key) = ColumnState::of(state) {
                *per_unit.entry(key).or_insert(0) += 1;
            }
        }
        for (key, count) in per_unit {
            max_column = max_column.max(key.column());
            let entry = occurrences.entry(key).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    let mut columns = Vec::new();
    for col in 0..=max_column {
        for _ in 0..occurrences.get(&ColumnState::Match(col)).copied().unwrap_or(0) {
            columns.push(ColumnState::Match(col));
        }
        for _ in 0..occurrences.get(&ColumnState::Insert(col)).copied().unwrap_or(0) {
            columns.push(ColumnState::Insert(col));
        }
    }

    let mut rows = Vec::with_capacity(units.len());
    for (sequence, path) in units {
        let seq = sequence.as_bytes();
        let mut remaining: Vec<Option<ColumnState>> =
            path.iter().map(ColumnState::of).collect();
        let mut row = String::with_capacity(columns.len());
        let mut seq_index = 0;
        for column in &columns {
            if let Some(pos) = remaining.iter().position(|c| *c == Some(*column)) {
                remaining[pos] = None;
                row.push(seq[seq_index] as char);
                seq_index += 1;
            } else {
                row.push('-');
            }
        }
        rows.push(row);
    }
    rows
}
