//! # Profile segment parameters
//!
//! A profile segment models one repeat unit as columns of match, insert and
//! delete states. [`ProfileParams`] holds the per-column emission and
//! transition probabilities and knows three ways to obtain them: fixed
//! probabilities derived from the error budget, counts over the reference
//! repeat segments, and counts over a multiple alignment of previously
//! decoded repeat units. The count-based builds start every category at a
//! pseudocount so unobserved events keep nonzero probability; callers feed
//! replicated segment lists to keep observed counts dominant.
use bio::alignment::pairwise::Aligner;
use bio::alignment::AlignmentOperation;

use crate::hmm::model::Emission;
use crate::utils;
use crate::VantraError;

/// Total prior mass distributed over the transition classes of one state
/// in the count-based builds.
const TRANSITION_PRIOR_MASS: f64 = 3.0;

/// Pseudocount per base for count-based emission estimates.
const EMISSION_PSEUDOCOUNT: f64 = 1.0;

/// Per-column parameters of a single profile segment.
///
/// Transition triples are laid out as `[advance, delete, insert]`:
/// - `match_trans[c-1]`: `M_c -> M_{c+1}` (or `unit_end` at the last
///   column), `M_c -> D_{c+1}` (zero at the last column), `M_c -> I_c`.
/// - `delete_trans` mirrors `match_trans` for `D_c`.
/// - `insert_trans[c]`: `I_c -> M_{c+1}` (or `unit_end`), `I_c -> D_{c+1}`
///   (zero at the last index), `I_c -> I_c`.
/// - `unit_start`: `unit_start -> M_1 / D_1 / I_0`.
#[derive(Debug, Clone)]
pub struct ProfileParams {
    pub match_emissions: Vec<Emission>,
    pub insert_emissions: Vec<Emission>,
    pub unit_start: [f64; 3],
    pub match_trans: Vec<[f64; 3]>,
    pub delete_trans: Vec<[f64; 3]>,
    pub insert_trans: Vec<[f64; 3]>,
}

/// One step of a repeat unit projected onto profile columns. Bases are
/// alphabet indices.
#[derive(Debug, Clone, Copy)]
enum ProfileStep {
    Match(usize, usize),
    Insert(usize, usize),
    Delete(usize),
}

impl ProfileParams {
    pub fn columns(&self) -> usize {
        self.match_emissions.len()
    }

    /// Fixed-parameter segment for a single unit string: matches peak on
    /// the unit base with 0.97, inserts emit uniformly, and transition
    /// probabilities derive from the error budget.
    pub fn from_unit(unit: &str, max_error_rate: f64) -> ProfileParams {
        let columns = unit.len();
        let insert_error = max_error_rate * 2. / 5.;
        let delete_error = max_error_rate / 5.;
        let match_p = 1. - insert_error - delete_error;

        let match_emissions = unit
            .bytes()
            .map(|base| {
                let mut emission = [0.01; 4];
                emission[utils::base_index(base).expect("validated unit string")] = 0.97;
                emission
            })
            .collect();

        let interior = [match_p, delete_error, insert_error];
        let last = [1. - insert_error, 0., insert_error];
        let column_trans = |count: usize| -> Vec<[f64; 3]> {
            (1..=count).map(|c| if c < count { interior } else { last }).collect()
        };

        ProfileParams {
            match_emissions,
            insert_emissions: vec![[0.25; 4]; columns + 1],
            unit_start: interior,
            match_trans: column_trans(columns),
            delete_trans: column_trans(columns),
            insert_trans: (0..=columns)
                .map(|c| if c < columns { interior } else { last })
                .collect(),
        }
    }

    /// Count-based segment over the observed reference repeat units. Each
    /// segment is projected onto the consensus pattern by global alignment
    /// and contributes `weight` observations per step.
    pub fn from_repeat_segments(
        pattern: &str,
        segments: &[String],
        weight: usize,
        max_error_rate: f64,
    ) -> Result<ProfileParams, VantraError> {
        let mut counts = CountTable::new(pattern.len(), max_error_rate);
        let score = |a: u8, b: u8| if a == b { 1i32 } else { -1i32 };
        let mut aligner =
            Aligner::with_capacity(pattern.len() + 8, pattern.len(), -2, -1, &score);

        for segment in segments {
            let alignment = aligner.global(segment.as_bytes(), pattern.as_bytes());
            let steps = steps_from_operations(&alignment.operations, segment)?;
            counts.record(&steps, weight as f64);
        }
        Ok(counts.normalize())
    }

    /// Count-based segment over a multiple alignment of decoded repeat
    /// units. Columns holding a residue in at least half of the rows become
    /// match columns, the rest are treated as insertions.
    pub fn from_alignment(
        rows: &[String],
        max_error_rate: f64,
    ) -> Result<ProfileParams, VantraError> {
        if rows.is_empty() {
            return Err(VantraError::HmmConstruction(
                "cannot build a profile from an empty alignment".to_string(),
            ));
        }
        let width = rows[0].len();
        if rows.iter().any(|row| row.len() != width) {
            return Err(VantraError::HmmConstruction(
                "alignment rows differ in length".to_string(),
            ));
        }

        let mut is_match_column = vec![false; width];
        for j in 0..width {
            let residues = rows.iter().filter(|row| row.as_bytes()[j] != b'-').count();
            is_match_column[j] = residues * 2 >= rows.len();
        }
        let columns = is_match_column.iter().filter(|&&m| m).count();
        if columns == 0 {
            return Err(VantraError::HmmConstruction(
                "alignment has no match columns".to_string(),
            ));
        }

        let mut counts = CountTable::new(columns, max_error_rate);
        for row in rows {
            let mut steps = Vec::new();
            let mut col = 0;
            for (j, base) in row.bytes().enumerate() {
                if is_match_column[j] {
                    col += 1;
                    if base == b'-' {
                        steps.push(ProfileStep::Delete(col));
                    } else {
                        steps.push(ProfileStep::Match(col, index_of(base)?));
                    }
                } else if base != b'-' {
                    steps.push(ProfileStep::Insert(col, index_of(base)?));
                }
            }
            counts.record(&steps, 1.);
        }
        Ok(counts.normalize())
    }
}

fn index_of(base: u8) -> Result<usize, VantraError> {
    utils::base_index(base).ok_or(VantraError::InvalidSequence)
}

fn steps_from_operations(
    operations: &[AlignmentOperation],
    segment: &str,
) -> Result<Vec<ProfileStep>, VantraError> {
    let bases = segment.as_bytes();
    let mut steps = Vec::with_capacity(operations.len());
    let mut col = 0;
    let mut consumed = 0;
    for op in operations {
        match op {
            AlignmentOperation::Match | AlignmentOperation::Subst => {
                col += 1;
                steps.push(ProfileStep::Match(col, index_of(bases[consumed])?));
                consumed += 1;
            }
            AlignmentOperation::Del => {
                col += 1;
                steps.push(ProfileStep::Delete(col));
            }
            AlignmentOperation::Ins => {
                steps.push(ProfileStep::Insert(col, index_of(bases[consumed])?));
                consumed += 1;
            }
            AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => {}
        }
    }
    Ok(steps)
}

/// Accumulates transition and emission counts in the shape of
/// [`ProfileParams`], seeded with pseudocounts.
struct CountTable {
    params: ProfileParams,
}

impl CountTable {
    fn new(columns: usize, max_error_rate: f64) -> CountTable {
        let mut params = ProfileParams::from_unit(&"A".repeat(columns), max_error_rate);
        // Turn the prior probabilities into prior counts.
        let scale = |triple: &mut [f64; 3]| triple.iter_mut().for_each(|p| *p *= TRANSITION_PRIOR_MASS);
        scale(&mut params.unit_start);
        params.match_trans.iter_mut().for_each(&scale);
        params.delete_trans.iter_mut().for_each(&scale);
        params.insert_trans.iter_mut().for_each(&scale);
        params.match_emissions = vec![[EMISSION_PSEUDOCOUNT; 4]; columns];
        params.insert_emissions = vec![[EMISSION_PSEUDOCOUNT; 4]; columns + 1];
        CountTable { params }
    }

    fn record(&mut self, steps: &[ProfileStep], weight: f64) {
        let columns = self.params.columns();
        // [advance, delete, insert] slot of the transition into `step`.
        let slot = |step: &ProfileStep| match step {
            ProfileStep::Match(..) => 0,
            ProfileStep::Delete(_) => 1,
            ProfileStep::Insert(..) => 2,
        };

        let mut previous: Option<ProfileStep> = None;
        for step in steps {
            match previous {
                None => self.params.unit_start[slot(step)] += weight,
                Some(ProfileStep::Match(c, _)) => self.params.match_trans[c - 1][slot(step)] += weight,
                Some(ProfileStep::Delete(c)) => self.params.delete_trans[c - 1][slot(step)] += weight,
                Some(ProfileStep::Insert(c, _)) => self.params.insert_trans[c][slot(step)] += weight,
            }
            match step {
                ProfileStep::Match(c, base) => self.params.match_emissions[c - 1][*base] += weight,
                ProfileStep::Insert(c, base) => self.params.insert_emissions[*c][*base] += weight,
                ProfileStep::Delete(_) => {}
            }
            previous = Some(*step);
        }
        // The segment ends by advancing into unit_end.
        match previous {
            Some(ProfileStep::Match(c, _)) if c == columns => self.params.match_trans[c - 1][0] += weight,
            Some(ProfileStep::Delete(c)) if c == columns => self.params.delete_trans[c - 1][0] += weight,
            Some(ProfileStep::Insert(c, _)) if c == columns => self.params.insert_trans[c][0] += weight,
            _ => {}
        }
    }

    fn normalize(mut self) -> ProfileParams {
        let norm3 = |triple: &mut [f64; 3]| {
            let total: f64 = triple.iter().sum();
            triple.iter_mut().for_each(|p| *p /= total);
        };
        let norm4 = |emission: &mut Emission| {
            let total: f64 = emission.iter().sum();
            emission.iter_mut().for_each(|p| *p /= total);
        };
        norm3(&mut self.params.unit_start);
        self.params.match_trans.iter_mut().for_each(&norm3);
        self.params.delete_trans.iter_mut().for_each(&norm3);
        self.params.insert_trans.iter_mut().for_each(&norm3);
        self.params.match_emissions.iter_mut().for_each(&norm4);
        self.params.insert_emissions.iter_mut().for_each(&norm4);
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn assert_stochastic(params: &ProfileParams) {
        let rows = params
            .match_trans
            .iter()
            .chain(params.delete_trans.iter())
            .chain(params.insert_trans.iter())
            .chain(std::iter::once(&params.unit_start));
        for row in rows {
            assert_approx_eq!(1., row.iter().sum::<f64>(), 1e-12);
        }
        for emission in params.match_emissions.iter().chain(params.insert_emissions.iter()) {
            assert_approx_eq!(1., emission.iter().sum::<f64>(), 1e-12);
        }
    }

    #[test]
    fn fixed_build_follows_error_budget() {
        let params = ProfileParams::from_unit("CAG", 0.05);
        assert_eq!(3, params.columns());
        assert_stochastic(&params);

        for (triple, expect) in [
            (params.match_trans[0], [0.97, 0.01, 0.02]),
            (params.match_trans[2], [0.98, 0., 0.02]),
            (params.unit_start, [0.97, 0.01, 0.02]),
        ] {
            for (got, want) in triple.iter().zip(expect) {
                assert_approx_eq!(want, *got, 1e-12);
            }
        }
        // M2 peaks on 'A'.
        assert_eq!(0.97, params.match_emissions[1][0]);
        assert_eq!(0.01, params.match_emissions[1][1]);
    }

    #[test]
    fn counts_over_identical_segments_peak_on_pattern() {
        let segments = vec!["CAG".to_string(); 3];
        let params = ProfileParams::from_repeat_segments("CAG", &segments, 100, 0.05).unwrap();
        assert_eq!(3, params.columns());
        assert_stochastic(&params);

        // Column 1 emission concentrates on 'C'.
        assert!(params.match_emissions[0][1] > 0.9);
        // All segments advance match-to-match; delete mass stays near prior.
        assert!(params.match_trans[0][0] > 0.95);
        assert!(params.match_trans[0][1] < 0.01);
        assert!(params.unit_start[0] > 0.95);
    }

    #[test]
    fn deletion_variant_shifts_transition_mass() {
        let mut segments = vec!["CAG".to_string(); 2];
        segments.push("CG".to_string());
        let params = ProfileParams::from_repeat_segments("CAG", &segments, 100, 0.05).unwrap();
        assert_stochastic(&params);

        // A third of the segments skip one column, so a sizable delete
        // probability must appear somewhere in the segment.
        let total_delete_mass: f64 = params.match_trans.iter().map(|t| t[1]).sum::<f64>()
            + params.unit_start[1];
        assert!(total_delete_mass > 0.2, "delete mass {total_delete_mass}");
    }

    #[test]
    fn alignment_build_classifies_columns() {
        let rows = vec![
            "CAG".to_string(),
            "C-G".to_string(),
            "CAG".to_string(),
            "C-G".to_string(),
        ];
        let params = ProfileParams::from_alignment(&rows, 0.05).unwrap();
        assert_eq!(3, params.columns());
        assert_stochastic(&params);
        // Half of the rows delete column 2.
        assert!(params.match_trans[0][1] > 0.25);
    }

    #[test]
    fn alignment_with_insert_column() {
        let rows = vec![
            "CA-G".to_string(),
            "CATG".to_string(),
            "CA-G".to_string(),
            "CA-G".to_string(),
        ];
        let params = ProfileParams::from_alignment(&rows, 0.05).unwrap();
        // The sparse column is an insertion, not a match column.
        assert_eq!(3, params.columns());
        assert_stochastic(&params);
        // The inserting row emits 'T' from I_2.
        assert!(params.insert_emissions[2][3] > params.insert_emissions[2][0]);
    }

    #[test]
    fn empty_alignment_is_rejected() {
        assert!(ProfileParams::from_alignment(&[], 0.05).is_err());
        let rows = vec!["--".to_string(), "--".to_string()];
        assert!(ProfileParams::from_alignment(&rows, 0.05).is_err());
    }
}
