use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rayon::ThreadPoolBuilder;

use vantra::cli::{Cli, Commands, GenotypeArgs};
use vantra::genotyping::UniformCoverage;
use vantra::{io, reads};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Genotype(args) => genotype(&args),
    }
}

fn genotype(args: &GenotypeArgs) -> Result<()> {
    let settings = args.to_settings()?;
    ThreadPoolBuilder::new()
        .num_threads(settings.cores)
        .build_global()
        .context("Could not initialize worker pool")?;
    info!("Running with {} worker thread(s)", settings.cores);

    let vntrs = io::load_reference_vntrs(&args.vntrs)?;
    info!("Read {} VNTR loci", vntrs.len());

    let unmapped_reads = reads::read_fasta(&args.unmapped)?;
    info!("Read {} unmapped reads", unmapped_reads.len());

    let candidate_ids = match &args.candidates {
        Some(path) => {
            let ids = reads::read_candidate_ids(path)?;
            info!("Read {} candidate read IDs", ids.len());
            Some(ids)
        }
        None => None,
    };

    let coverage = UniformCoverage { mean: args.coverage };
    let results = vantra::run(
        &vntrs,
        &args.alignment,
        &unmapped_reads,
        candidate_ids.as_ref(),
        &coverage,
        &settings,
    );

    println!("vntr_id\tcopy_number\tbp_mapped\tbp_unmapped\tspanning_reads\tframeshift");
    for (vntr_id, genotype) in &results {
        let frameshift = genotype
            .frameshift
            .as_ref()
            .map_or(".".to_string(), |f| format!("{}:{}", f.state, f.occurrences));
        println!(
            "{vntr_id}\t{:.4}\t{}\t{}\t{}\t{frameshift}",
            genotype.scaled_copy_number,
            genotype.vntr_bp_in_mapped_reads,
            genotype.vntr_bp_in_unmapped_reads,
            genotype.flanked_repeats.len(),
        );
    }

    Ok(())
}
