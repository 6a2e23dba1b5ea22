//! # HMM graph representation and baking
//!
//! A matcher HMM is a directed graph of silent and emitting states over a
//! dense transition matrix. Models are assembled through [`HmmBuilder`] and
//! turned into a decodable [`Hmm`] by [`HmmBuilder::build`], which verifies
//! the structural invariants (stochastic rows and emissions, no silent
//! cycles, start/end reachability) and precomputes the log-space tables
//! used by Viterbi decoding.
use std::collections::{HashMap, VecDeque};

use ndarray::Array2;

use crate::hmm::state::StateKind;
use crate::VantraError;

/// Categorical distribution over `A`, `C`, `G`, `T`, in that order.
pub type Emission = [f64; 4];

/// Tolerance for stochasticity checks on transition rows and emissions.
pub const PROB_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct State {
    pub kind: StateKind,
    pub emission: Option<Emission>,
}

impl State {
    pub fn is_emitting(&self) -> bool {
        self.emission.is_some()
    }
}

/// Incrementally assembled HMM. States are appended and referred to by
/// index; transitions are unique per `(from, to)` pair.
#[derive(Debug, Default)]
pub struct HmmBuilder {
    states: Vec<State>,
    edges: HashMap<(usize, usize), f64>,
}

impl HmmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self, kind: StateKind, emission: Option<Emission>) -> usize {
        self.states.push(State { kind, emission });
        self.states.len() - 1
    }

    pub fn add_transition(&mut self, from: usize, to: usize, p: f64) {
        let prev = self.edges.insert((from, to), p);
        assert!(
            prev.is_none(),
            "duplicate transition {} -> {}",
            self.states[from].kind,
            self.states[to].kind
        );
    }

    /// Replace the probability of an existing edge, or create the edge.
    pub fn set_transition(&mut self, from: usize, to: usize, p: f64) {
        self.edges.insert((from, to), p);
    }

    /// Multiply every out-edge of `from` by `factor`.
    pub fn scale_out_edges(&mut self, from: usize, factor: f64) {
        for ((f, _), p) in self.edges.iter_mut() {
            if *f == from {
                *p *= factor;
            }
        }
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn build(self) -> Result<Hmm, VantraError> {
        let edges: Vec<(usize, usize, f64)> =
            self.edges.into_iter().map(|((f, t), p)| (f, t, p)).collect();
        Hmm::from_parts(self.states, &edges)
    }
}

/// A baked matcher HMM, ready for Viterbi decoding. Read-only after
/// construction and freely shareable across worker threads.
#[derive(Debug)]
pub struct Hmm {
    states: Vec<State>,
    transitions: Array2<f64>,
    start: usize,
    end: usize,
    // Decode tables, derived at bake time.
    preds: Vec<Vec<(usize, f64)>>,
    silent_topo: Vec<usize>,
    emitting: Vec<usize>,
}

impl Hmm {
    /// Assemble and bake a model from its states and sparse transitions.
    /// This is the single entry point for both freshly built and
    /// deserialized models.
    pub fn from_parts(states: Vec<State>, edges: &[(usize, usize, f64)]) -> Result<Hmm, VantraError> {
        let start = exactly_one(&states, StateKind::Start)?;
        let end = exactly_one(&states, StateKind::End)?;

        let n = states.len();
        let mut transitions = Array2::<f64>::zeros((n, n));
        for &(from, to, p) in edges {
            if from >= n || to >= n {
                return Err(VantraError::HmmConstruction(format!(
                    "transition endpoint {from}->{to} outside state table of size {n}"
                )));
            }
            transitions[[from, to]] = p;
        }

        let hmm = Hmm {
            preds: predecessor_table(&transitions),
            silent_topo: silent_topological_order(&states, &transitions)?,
            emitting: (0..n).filter(|&s| states[s].is_emitting()).collect(),
            states,
            transitions,
            start,
            end,
        };
        hmm.validate()?;
        Ok(hmm)
    }

    fn validate(&self) -> Result<(), VantraError> {
        for (i, state) in self.states.iter().enumerate() {
            if let Some(emission) = &state.emission {
                let total: f64 = emission.iter().sum();
                if (total - 1.).abs() > PROB_TOLERANCE {
                    return Err(VantraError::HmmConstruction(format!(
                        "emission of {} sums to {total}",
                        state.kind
                    )));
                }
            }
            if i == self.end {
                continue;
            }
            let row_sum: f64 = self.transitions.row(i).sum();
            if (row_sum - 1.).abs() > PROB_TOLERANCE {
                return Err(VantraError::HmmConstruction(format!(
                    "out-edges of {} sum to {row_sum}",
                    state.kind
                )));
            }
        }
        self.check_reachability()
    }

    /// Every state must lie on at least one start -> end path.
    fn check_reachability(&self) -> Result<(), VantraError> {
        let n = self.states.len();
        let forward = reachable_from(n, self.start, |s| {
            (0..n).filter(move |&t| self.transitions[[s, t]] > 0.).collect()
        });
        let backward = reachable_from(n, self.end, |s| {
            self.preds[s].iter().map(|&(p, _)| p).collect()
        });
        for i in 0..n {
            if !forward[i] || !backward[i] {
                return Err(VantraError::HmmConstruction(format!(
                    "state {} is not on any start -> end path",
                    self.states[i].kind
                )));
            }
        }
        Ok(())
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn transitions(&self) -> &Array2<f64> {
        &self.transitions
    }

    /// Sparse edge list, the persistence form of the transition matrix.
    pub fn edges(&self) -> Vec<(usize, usize, f64)> {
        let n = self.states.len();
        let mut edges = Vec::new();
        for from in 0..n {
            for to in 0..n {
                let p = self.transitions[[from, to]];
                if p > 0. {
                    edges.push((from, to, p));
                }
            }
        }
        edges
    }

    pub fn find_state(&self, kind: StateKind) -> Option<usize> {
        self.states.iter().position(|s| s.kind == kind)
    }

    pub(crate) fn predecessors(&self, state: usize) -> &[(usize, f64)] {
        &self.preds[state]
    }

    pub(crate) fn silent_topological(&self) -> &[usize] {
        &self.silent_topo
    }

    pub(crate) fn emitting_states(&self) -> &[usize] {
        &self.emitting
    }
}

fn exactly_one(states: &[State], kind: StateKind) -> Result<usize, VantraError> {
    let mut found = states.iter().enumerate().filter(|(_, s)| s.kind == kind);
    let first = found.next();
    match (first, found.next()) {
        (Some((i, _)), None) => Ok(i),
        (None, _) => Err(VantraError::HmmConstruction(format!("no {kind} state"))),
        _ => Err(VantraError::HmmConstruction(format!(
            "more than one {kind} state"
        ))),
    }
}

fn predecessor_table(transitions: &Array2<f64>) -> Vec<Vec<(usize, f64)>> {
    let n = transitions.nrows();
    let mut preds = vec![Vec::new(); n];
    for from in 0..n {
        for to in 0..n {
            let p = transitions[[from, to]];
            if p > 0. {
                preds[to].push((from, p.ln()));
            }
        }
    }
    preds
}

/// Topological order of the silent states over silent-to-silent edges.
/// The decoder relies on this order to relax silent states after the
/// emitting states of each observation layer; a cycle would make the
/// decode ill-defined.
fn silent_topological_order(
    states: &[State],
    transitions: &Array2<f64>,
) -> Result<Vec<usize>, VantraError> {
    let n = states.len();
    let silent: Vec<usize> = (0..n).filter(|&s| !states[s].is_emitting()).collect();

    let mut indegree = vec![0usize; n];
    for &from in &silent {
        for &to in &silent {
            if transitions[[from, to]] > 0. {
                indegree[to] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = silent.iter().copied().filter(|&s| indegree[s] == 0).collect();
    let mut order = Vec::with_capacity(silent.len());
    while let Some(s) = queue.pop_front() {
        order.push(s);
        for &to in &silent {
            if transitions[[s, to]] > 0. {
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    queue.push_back(to);
                }
            }
        }
    }

    if order.len() != silent.len() {
        return Err(VantraError::HmmConstruction(
            "silent states form a cycle".to_string(),
        ));
    }
    Ok(order)
}

fn reachable_from<F>(n: usize, origin: usize, neighbours: F) -> Vec<bool>
where
    F: Fn(usize) -> Vec<usize>,
{
    let mut seen = vec![false; n];
    let mut queue = VecDeque::from([origin]);
    while let Some(s) = queue.pop_front() {
        if seen[s] {
            continue;
        }
        seen[s] = true;
        for t in neighbours(s) {
            queue.push_back(t);
        }
    }
    seen
}
