//! # Command line interface for `vantra`
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::settings::{Settings, MAX_ERROR_RATE, SCORE_FINDING_READS_FRACTION};

#[derive(Parser)]
#[command(
    name = "vantra",
    author,
    version,
    about = "Profile-HMM genotyping of Variable Number Tandem Repeats",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Estimate VNTR copy numbers and frameshifts from an alignment file
    Genotype(GenotypeArgs),
}

#[derive(Args)]
pub struct GenotypeArgs {
    /// File describing the target VNTR loci. Expected format is JSON
    #[arg(short, long)]
    pub vntrs: String,

    /// Alignment file the null score distribution and locus-mapped reads
    /// are drawn from. Can be BAM/CRAM, index file must exist next to it
    #[arg(short, long)]
    pub alignment: String,

    /// Unmapped reads to recruit from. Expected format is FASTA
    #[arg(short, long)]
    pub unmapped: String,

    /// File with candidate read IDs from the keyword filtering step, one
    /// ID per line. All unmapped reads are considered if omitted
    #[arg(long)]
    pub candidates: Option<String>,

    /// Mean sequencing coverage used to scale repeat base pair counts
    /// into copy numbers
    #[arg(long, default_value_t = 30.0)]
    pub coverage: f64,

    /// Error budget that sets the insertion and deletion probabilities of
    /// the matcher models
    #[arg(long, default_value_t = MAX_ERROR_RATE)]
    pub max_error_rate: f64,

    /// Fraction of mapped reads sampled for the null score distribution
    #[arg(long, default_value_t = SCORE_FINDING_READS_FRACTION)]
    pub score_fraction: f64,

    /// Directory for trained models and score caches
    #[arg(long, default_value = "trained_hmms")]
    pub trained_hmms_dir: PathBuf,

    /// Rebuild models and thresholds even when cached versions exist
    #[arg(long)]
    pub ignore_trained_hmms: bool,

    /// Number of threads to use
    #[arg(long, default_value_t = 0, value_parser = threads_in_range)]
    pub threads: usize,
}

impl GenotypeArgs {
    pub fn to_settings(&self) -> Result<Settings> {
        if !(0. ..1.).contains(&self.max_error_rate) {
            bail!("--max-error-rate must lie in [0, 1)");
        }
        if !(0. ..=1.).contains(&self.score_fraction) {
            bail!("--score-fraction must lie in [0, 1]");
        }
        let defaults = Settings::default();
        Ok(Settings {
            max_error_rate: self.max_error_rate,
            score_finding_reads_fraction: self.score_fraction,
            use_trained_hmms: !self.ignore_trained_hmms,
            trained_hmms_dir: self.trained_hmms_dir.clone(),
            cores: if self.threads > 0 { self.threads } else { defaults.cores },
            ..defaults
        })
    }
}

fn threads_in_range(s: &str) -> Result<usize> {
    let threads: usize = s
        .parse()
        .context("Could not parse value passed to --threads to integer")?;
    Ok(threads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_arguments() {
        let cli = Cli::parse_from([
            "vantra",
            "genotype",
            "--vntrs",
            "vntrs.json",
            "--alignment",
            "sample.bam",
            "--unmapped",
            "unmapped.fasta",
            "--max-error-rate",
            "0.02",
            "--ignore-trained-hmms",
            "--threads",
            "4",
        ]);
        let Commands::Genotype(args) = cli.command;
        let settings = args.to_settings().unwrap();
        assert_eq!(0.02, settings.max_error_rate);
        assert!(!settings.use_trained_hmms);
        assert_eq!(4, settings.cores);
    }

    #[test]
    fn out_of_range_error_rate_is_rejected() {
        let cli = Cli::parse_from([
            "vantra",
            "genotype",
            "--vntrs",
            "vntrs.json",
            "--alignment",
            "sample.bam",
            "--unmapped",
            "unmapped.fasta",
            "--max-error-rate",
            "1.5",
        ]);
        let Commands::Genotype(args) = cli.command;
        assert!(args.to_settings().is_err());
    }
}
