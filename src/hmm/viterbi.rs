//! # Log-space Viterbi decoding
//!
//! Decoding runs entirely in log space, so scores of `-inf` propagate
//! naturally and lose to any finite acceptance threshold. Silent states are
//! handled with a two-pass scheme per observation: the emitting states of a
//! layer are relaxed first, then the silent states in topological order, so
//! probability can flow through silent chains without consuming a base.
use crate::hmm::model::Hmm;
use crate::hmm::state::StateKind;
use crate::utils;
use crate::VantraError;

/// A decoded state path: the Viterbi log-probability and the interior state
/// sequence in decoding order, excluding the global start and end states.
#[derive(Debug, Clone, PartialEq)]
pub struct VPath {
    pub logp: f64,
    pub states: Vec<StateKind>,
}

impl VPath {
    /// Number of read bases consumed by the path.
    pub fn emitted_len(&self) -> usize {
        self.states.iter().filter(|s| s.is_emitting()).count()
    }
}

const NO_PARENT: u32 = u32::MAX;

impl Hmm {
    /// Viterbi-decode `sequence` against this model.
    ///
    /// Returns the most probable state path and its log-probability. A
    /// sequence no path can produce yields `logp == -inf` and an empty
    /// path. Sequences with symbols outside ACGT are rejected, never
    /// decoded.
    pub fn viterbi(&self, sequence: &str) -> Result<VPath, VantraError> {
        let bases: Vec<usize> = sequence
            .bytes()
            .map(utils::base_index)
            .collect::<Option<_>>()
            .ok_or(VantraError::InvalidSequence)?;

        let n = bases.len();
        let n_states = self.len();
        let idx = |layer: usize, state: usize| layer * n_states + state;

        let mut score = vec![f64::NEG_INFINITY; (n + 1) * n_states];
        let mut parent = vec![NO_PARENT; (n + 1) * n_states];

        score[idx(0, self.start())] = 0.;
        self.relax_silent(0, &mut score, &mut parent, idx);

        for layer in 1..=n {
            for &state in self.emitting_states() {
                let emission = self.states()[state]
                    .emission
                    .expect("emitting state carries a distribution");
                let mut best = f64::NEG_INFINITY;
                let mut best_parent = NO_PARENT;
                for &(pred, log_p) in self.predecessors(state) {
                    let cand = score[idx(layer - 1, pred)] + log_p;
                    if cand > best {
                        best = cand;
                        best_parent = pred as u32;
                    }
                }
                score[idx(layer, state)] = best + emission[bases[layer - 1]].ln();
                parent[idx(layer, state)] = best_parent;
            }
            self.relax_silent(layer, &mut score, &mut parent, idx);
        }

        let logp = score[idx(n, self.end())];
        if !logp.is_finite() {
            return Ok(VPath { logp: f64::NEG_INFINITY, states: Vec::new() });
        }

        let mut states = Vec::new();
        let mut layer = n;
        let mut state = self.end();
        while state != self.start() {
            if state != self.end() {
                states.push(self.states()[state].kind);
            }
            let pred = parent[idx(layer, state)];
            debug_assert_ne!(NO_PARENT, pred, "finite score without a parent");
            if self.states()[state].is_emitting() {
                layer -= 1;
            }
            state = pred as usize;
        }
        states.reverse();

        Ok(VPath { logp, states })
    }

    fn relax_silent(
        &self,
        layer: usize,
        score: &mut [f64],
        parent: &mut [u32],
        idx: impl Fn(usize, usize) -> usize,
    ) {
        for &state in self.silent_topological() {
            let mut best = score[idx(layer, state)];
            let mut best_parent = parent[idx(layer, state)];
            for &(pred, log_p) in self.predecessors(state) {
                let cand = score[idx(layer, pred)] + log_p;
                if cand > best {
                    best = cand;
                    best_parent = pred as u32;
                }
            }
            score[idx(layer, state)] = best;
            parent[idx(layer, state)] = best_parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::model::{Emission, HmmBuilder};
    use crate::hmm::state::Tag;
    use assert_approx_eq::assert_approx_eq;

    const UNIFORM: Emission = [0.25; 4];

    fn peaked(base: u8) -> Emission {
        let mut emission = [0.01; 4];
        emission[crate::utils::base_index(base).unwrap()] = 0.97;
        emission
    }

    /// A three-column matcher for "CAG" with a delete bypass of column 2.
    fn cag_model() -> Hmm {
        let mut b = HmmBuilder::new();
        let start = b.add_state(StateKind::Start, None);
        let m1 = b.add_state(StateKind::Match { col: 1, tag: Tag::Copy(0) }, Some(peaked(b'C')));
        let m2 = b.add_state(StateKind::Match { col: 2, tag: Tag::Copy(0) }, Some(peaked(b'A')));
        let m3 = b.add_state(StateKind::Match { col: 3, tag: Tag::Copy(0) }, Some(peaked(b'G')));
        let d2 = b.add_state(StateKind::Delete { col: 2, tag: Tag::Copy(0) }, None);
        let end = b.add_state(StateKind::End, None);
        b.add_transition(start, m1, 1.);
        b.add_transition(m1, m2, 0.9);
        b.add_transition(m1, d2, 0.1);
        b.add_transition(m2, m3, 1.);
        b.add_transition(d2, m3, 1.);
        b.add_transition(m3, end, 1.);
        b.build().unwrap()
    }

    #[test]
    fn decodes_exact_match_through_match_states() {
        let hmm = cag_model();
        let vpath = hmm.viterbi("CAG").unwrap();
        assert_eq!(3, vpath.emitted_len());
        assert!(vpath.states.iter().all(|s| s.is_match()));
        assert_approx_eq!(
            (0.97f64).ln() * 3. + (0.9f64).ln(),
            vpath.logp
        );
    }

    #[test]
    fn decodes_deletion_through_silent_state() {
        let hmm = cag_model();
        let vpath = hmm.viterbi("CG").unwrap();
        assert_eq!(2, vpath.emitted_len());
        assert!(vpath
            .states
            .iter()
            .any(|s| matches!(s, StateKind::Delete { col: 2, .. })));
    }

    #[test]
    fn emitting_state_count_equals_read_length() {
        let hmm = cag_model();
        for read in ["CAG", "CG", "TAG", "GGG"] {
            let vpath = hmm.viterbi(read).unwrap();
            assert_eq!(read.len(), vpath.emitted_len());
        }
    }

    #[test]
    fn impossible_observation_scores_minus_infinity() {
        let hmm = cag_model();
        // The model emits exactly 2 or 3 bases; a longer read has no path.
        let vpath = hmm.viterbi("CAGCAG").unwrap();
        assert_eq!(f64::NEG_INFINITY, vpath.logp);
        assert!(vpath.states.is_empty());
    }

    #[test]
    fn ambiguous_bases_are_rejected() {
        let hmm = cag_model();
        assert!(matches!(
            hmm.viterbi("CNG"),
            Err(VantraError::InvalidSequence)
        ));
    }

    #[test]
    fn self_loop_insert_consumes_extra_bases() {
        let mut b = HmmBuilder::new();
        let start = b.add_state(StateKind::Start, None);
        let m1 = b.add_state(StateKind::Match { col: 1, tag: Tag::Copy(0) }, Some(peaked(b'C')));
        let i1 = b.add_state(StateKind::Insert { col: 1, tag: Tag::Copy(0) }, Some(UNIFORM));
        let end = b.add_state(StateKind::End, None);
        b.add_transition(start, m1, 1.);
        b.add_transition(m1, i1, 0.5);
        b.add_transition(m1, end, 0.5);
        b.add_transition(i1, i1, 0.5);
        b.add_transition(i1, end, 0.5);
        let hmm = b.build().unwrap();

        let vpath = hmm.viterbi("CTTT").unwrap();
        assert_eq!(4, vpath.emitted_len());
        let inserts = vpath.states.iter().filter(|s| s.is_insert()).count();
        assert_eq!(3, inserts);
    }
}
