//! # Matcher HMM construction and decoding
//!
//! Everything model-side lives here: the tagged state vocabulary, the
//! graph representation with its baking checks, the profile segment
//! parameter builders, the flank and repeat matchers, the read-matcher
//! composition, and log-space Viterbi decoding.
pub mod flank;
pub mod model;
pub mod profile;
pub mod read_matcher;
pub mod repeat_matcher;
pub mod state;
pub mod viterbi;

pub use model::{Emission, Hmm, HmmBuilder, State};
pub use state::{StateKind, Tag};
pub use viterbi::VPath;
