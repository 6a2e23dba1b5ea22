//! # HMM state vocabulary
//!
//! Every state in a matcher HMM carries a [`StateKind`] describing its role
//! in the model topology. Path analysis works directly on these tagged
//! variants; the string form (e.g. `M3_suffix`, `unit_start_2`) exists only
//! for persistence and debug output and round-trips through
//! `Display`/`FromStr`.
use std::fmt;
use std::str::FromStr;

use crate::VantraError;

/// Which sub-model a match/insert/delete column belongs to: the right-flank
/// prefix matcher, the left-flank suffix matcher, or repeat copy `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Prefix,
    Suffix,
    Copy(usize),
}

impl Tag {
    /// True for the flank matchers, false for repeat copies.
    pub fn is_flank(&self) -> bool {
        matches!(self, Tag::Prefix | Tag::Suffix)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Prefix => write!(f, "prefix"),
            Tag::Suffix => write!(f, "suffix"),
            Tag::Copy(k) => write!(f, "{k}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Start,
    End,
    Match { col: usize, tag: Tag },
    Insert { col: usize, tag: Tag },
    Delete { col: usize, tag: Tag },
    UnitStart(usize),
    UnitEnd(usize),
    PrefixStart,
    PrefixEnd,
    SuffixStart,
    SuffixEnd,
    RepeatEntry,
    RepeatExit,
}

impl StateKind {
    pub fn is_match(&self) -> bool {
        matches!(self, StateKind::Match { .. })
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, StateKind::Insert { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, StateKind::Delete { .. })
    }

    pub fn is_unit_start(&self) -> bool {
        matches!(self, StateKind::UnitStart(_))
    }

    pub fn is_unit_end(&self) -> bool {
        matches!(self, StateKind::UnitEnd(_))
    }

    /// Match and insert states consume a read base when visited.
    pub fn is_emitting(&self) -> bool {
        matches!(self, StateKind::Match { .. } | StateKind::Insert { .. })
    }

    /// Column index for match/insert/delete states.
    pub fn column(&self) -> Option<usize> {
        match self {
            StateKind::Match { col, .. }
            | StateKind::Insert { col, .. }
            | StateKind::Delete { col, .. } => Some(*col),
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<Tag> {
        match self {
            StateKind::Match { tag, .. }
            | StateKind::Insert { tag, .. }
            | StateKind::Delete { tag, .. } => Some(*tag),
            _ => None,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Start => write!(f, "start"),
            StateKind::End => write!(f, "end"),
            StateKind::Match { col, tag } => write!(f, "M{col}_{tag}"),
            StateKind::Insert { col, tag } => write!(f, "I{col}_{tag}"),
            StateKind::Delete { col, tag } => write!(f, "D{col}_{tag}"),
            StateKind::UnitStart(k) => write!(f, "unit_start_{k}"),
            StateKind::UnitEnd(k) => write!(f, "unit_end_{k}"),
            StateKind::PrefixStart => write!(f, "prefix_start_prefix"),
            StateKind::PrefixEnd => write!(f, "prefix_end_prefix"),
            StateKind::SuffixStart => write!(f, "suffix_start_suffix"),
            StateKind::SuffixEnd => write!(f, "suffix_end_suffix"),
            StateKind::RepeatEntry => write!(f, "start_repeating_pattern_match"),
            StateKind::RepeatExit => write!(f, "end_repeating_pattern_match"),
        }
    }
}

impl FromStr for StateKind {
    type Err = VantraError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let parse_error =
            || VantraError::HmmConstruction(format!("unrecognized state name '{name}'"));

        match name {
            "start" => return Ok(StateKind::Start),
            "end" => return Ok(StateKind::End),
            "prefix_start_prefix" => return Ok(StateKind::PrefixStart),
            "prefix_end_prefix" => return Ok(StateKind::PrefixEnd),
            "suffix_start_suffix" => return Ok(StateKind::SuffixStart),
            "suffix_end_suffix" => return Ok(StateKind::SuffixEnd),
            "start_repeating_pattern_match" => return Ok(StateKind::RepeatEntry),
            "end_repeating_pattern_match" => return Ok(StateKind::RepeatExit),
            _ => {}
        }

        if let Some(k) = name.strip_prefix("unit_start_") {
            let k = k.parse().map_err(|_| parse_error())?;
            return Ok(StateKind::UnitStart(k));
        }
        if let Some(k) = name.strip_prefix("unit_end_") {
            let k = k.parse().map_err(|_| parse_error())?;
            return Ok(StateKind::UnitEnd(k));
        }

        let mut chars = name.chars();
        let kind = chars.next().ok_or_else(parse_error)?;
        let rest = chars.as_str();
        let (col, tag) = rest.split_once('_').ok_or_else(parse_error)?;
        let col: usize = col.parse().map_err(|_| parse_error())?;
        let tag = match tag {
            "prefix" => Tag::Prefix,
            "suffix" => Tag::Suffix,
            k => Tag::Copy(k.parse().map_err(|_| parse_error())?),
        };

        match kind {
            'M' => Ok(StateKind::Match { col, tag }),
            'I' => Ok(StateKind::Insert { col, tag }),
            'D' => Ok(StateKind::Delete { col, tag }),
            _ => Err(parse_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_convention() {
        assert_eq!(
            "M3_suffix",
            StateKind::Match { col: 3, tag: Tag::Suffix }.to_string()
        );
        assert_eq!(
            "I0_2",
            StateKind::Insert { col: 0, tag: Tag::Copy(2) }.to_string()
        );
        assert_eq!("unit_start_4", StateKind::UnitStart(4).to_string());
        assert_eq!(
            "start_repeating_pattern_match",
            StateKind::RepeatEntry.to_string()
        );
    }

    #[test]
    fn names_roundtrip() {
        let kinds = [
            StateKind::Start,
            StateKind::End,
            StateKind::Match { col: 12, tag: Tag::Prefix },
            StateKind::Insert { col: 0, tag: Tag::Suffix },
            StateKind::Delete { col: 7, tag: Tag::Copy(3) },
            StateKind::UnitStart(0),
            StateKind::UnitEnd(9),
            StateKind::PrefixStart,
            StateKind::SuffixEnd,
            StateKind::RepeatEntry,
            StateKind::RepeatExit,
        ];
        for kind in kinds {
            assert_eq!(kind, kind.to_string().parse().unwrap());
        }
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!("M_suffix".parse::<StateKind>().is_err());
        assert!("X3_prefix".parse::<StateKind>().is_err());
        assert!("unit_start_x".parse::<StateKind>().is_err());
        assert!("".parse::<StateKind>().is_err());
    }

    #[test]
    fn emitting_states_are_match_and_insert() {
        assert!(StateKind::Match { col: 1, tag: Tag::Copy(0) }.is_emitting());
        assert!(StateKind::Insert { col: 1, tag: Tag::Copy(0) }.is_emitting());
        assert!(!StateKind::Delete { col: 1, tag: Tag::Copy(0) }.is_emitting());
        assert!(!StateKind::UnitStart(0).is_emitting());
    }
}
