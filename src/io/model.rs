//! # Trained-model persistence
//!
//! A baked read matcher is stored as JSON: the named states with their
//! emissions plus the sparse transition list. Loading re-parses the state
//! names into their tagged kinds and re-bakes the model, so a cache entry
//! that fails any structural invariant is rejected rather than decoded
//! against.
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hmm::model::{Emission, Hmm, State};
use crate::hmm::state::StateKind;

#[derive(Debug, Serialize, Deserialize)]
struct StoredState {
    name: String,
    emission: Option<Emission>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredModel {
    states: Vec<StoredState>,
    transitions: Vec<(usize, usize, f64)>,
}

/// Serialize a baked model to `path`, creating parent directories as
/// needed.
pub fn save_hmm(hmm: &Hmm, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create cache directory {}", parent.display()))?;
    }
    let stored = StoredModel {
        states: hmm
            .states()
            .iter()
            .map(|s| StoredState { name: s.kind.to_string(), emission: s.emission })
            .collect(),
        transitions: hmm.edges(),
    };
    let file = File::create(path)
        .with_context(|| format!("Could not create model cache {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), &stored)
        .with_context(|| format!("Could not serialize model to {}", path.display()))?;
    Ok(())
}

/// Load and re-bake a model previously written by [`save_hmm`].
pub fn load_hmm(path: &Path) -> Result<Hmm> {
    let file = File::open(path)
        .with_context(|| format!("Could not open model cache {}", path.display()))?;
    let stored: StoredModel = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Could not deserialize model from {}", path.display()))?;

    let states = stored
        .states
        .into_iter()
        .map(|s| {
            let kind: StateKind = s.name.parse()?;
            Ok(State { kind, emission: s.emission })
        })
        .collect::<Result<Vec<_>, crate::VantraError>>()?;
    let hmm = Hmm::from_parts(states, &stored.transitions)?;
    Ok(hmm)
}
