//! # Reference VNTR descriptions
//!
//! Module containing the struct that describes how a Variable Number Tandem
//! Repeat looks in the reference genome: the consensus repeat unit, the
//! repeat unit variants observed in the reference, and the DNA immediately
//! flanking the repeat run on both sides. `vantra` matches sequencing reads
//! against a profile HMM assembled from exactly this information.
use serde::Deserialize;

use crate::{utils, VantraError};

/// `ReferenceVntr` encodes a VNTR locus in the reference genome.
/// `start_point` follows the 0-based half-open coordinate system.
/// `repeat_segments` holds the unit variants observed in the reference
/// (each usually equal or close to `pattern`); their total length is the
/// length of the repeat run in the reference.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceVntr {
    pub id: u32,
    pub chromosome: String,
    pub start_point: i64,
    pub pattern: String,
    pub repeat_segments: Vec<String>,
    pub left_flanking_region: String,
    pub right_flanking_region: String,
}

impl ReferenceVntr {
    /// Length of the repeat run in the reference genome.
    pub fn reference_length(&self) -> i64 {
        self.repeat_segments.iter().map(|s| s.len() as i64).sum()
    }

    /// End coordinate of the repeat run in the reference genome.
    pub fn end_point(&self) -> i64 {
        self.start_point + self.reference_length()
    }

    pub fn get_fetch_definition_s(&self) -> String {
        format!("{}:{}-{}", self.chromosome, self.start_point, self.end_point())
    }

    /// The tail of the left flank used to build a suffix matcher of at most
    /// `size` columns.
    pub fn left_flank_tail(&self, size: usize) -> &str {
        let flank = self.left_flanking_region.as_str();
        &flank[flank.len().saturating_sub(size)..]
    }

    /// The head of the right flank used to build a prefix matcher of at
    /// most `size` columns.
    pub fn right_flank_head(&self, size: usize) -> &str {
        let flank = self.right_flanking_region.as_str();
        &flank[..size.min(flank.len())]
    }

    /// Check that the locus description is usable for model construction.
    /// An empty pattern, empty flanks, missing repeat segments or non-ACGT
    /// symbols make the VNTR unscorable.
    pub fn validate(&self) -> Result<(), VantraError> {
        let invalid = |what: &str| VantraError::InvalidReference {
            vntr_id: self.id,
            reason: what.to_string(),
        };

        if self.pattern.is_empty() {
            return Err(invalid("empty consensus pattern"));
        }
        if self.repeat_segments.is_empty() {
            return Err(invalid("no repeat segments"));
        }
        if self.left_flanking_region.is_empty() || self.right_flanking_region.is_empty() {
            return Err(invalid("empty flanking region"));
        }
        let sequences = self
            .repeat_segments
            .iter()
            .map(String::as_str)
            .chain([
                self.pattern.as_str(),
                self.left_flanking_region.as_str(),
                self.right_flanking_region.as_str(),
            ]);
        for sequence in sequences {
            if !utils::is_plain_dna(sequence) {
                return Err(invalid("sequence contains symbols outside ACGT"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cag_vntr() -> ReferenceVntr {
        ReferenceVntr {
            id: 1,
            chromosome: "chr4".to_string(),
            start_point: 1000,
            pattern: "CAG".to_string(),
            repeat_segments: vec!["CAG".to_string(); 4],
            left_flanking_region: "AAAAAAAAAA".to_string(),
            right_flanking_region: "TTTTTTTTTT".to_string(),
        }
    }

    #[test]
    fn reference_length_sums_segments() {
        let vntr = cag_vntr();
        assert_eq!(12, vntr.reference_length());
        assert_eq!(1012, vntr.end_point());
    }

    #[test]
    fn flank_slices_clamp_to_available_sequence() {
        let vntr = cag_vntr();
        assert_eq!("AAAA", vntr.left_flank_tail(4));
        assert_eq!("TTTT", vntr.right_flank_head(4));
        assert_eq!("AAAAAAAAAA", vntr.left_flank_tail(100));
        assert_eq!("TTTTTTTTTT", vntr.right_flank_head(100));
    }

    #[test]
    fn validation_flags_unusable_references() {
        let mut vntr = cag_vntr();
        assert!(vntr.validate().is_ok());

        vntr.pattern.clear();
        assert!(matches!(
            vntr.validate(),
            Err(VantraError::InvalidReference { vntr_id: 1, .. })
        ));

        let mut vntr = cag_vntr();
        vntr.repeat_segments.clear();
        assert!(vntr.validate().is_err());

        let mut vntr = cag_vntr();
        vntr.left_flanking_region = "ANA".to_string();
        assert!(vntr.validate().is_err());
    }
}
