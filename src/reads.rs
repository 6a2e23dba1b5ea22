//! # Read records and sources
//!
//! Plain-data read records consumed by the genotyper, plus the adapters
//! that produce them: FASTA parsing for unmapped reads, indexed BAM/CRAM
//! fetches for reads mapped over the locus, and the candidate-ID filter
//! produced by the upstream keyword matching step. Workers only ever see
//! these records by value; file handles stay on the driver thread.
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use bio::io::fasta;
use log::debug;
use rust_htslib::bam::{self, ext::BamRecordExtensions, Read};

use crate::repeat::ReferenceVntr;
use crate::settings::Settings;

/// A FASTA-like unmapped read.
#[derive(Debug, Clone)]
pub struct ReadSegment {
    pub id: String,
    pub sequence: String,
}

/// A record from an alignment file, reduced to the fields the genotyper
/// needs.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    pub sequence: String,
    pub is_unmapped: bool,
    pub reference_name: String,
    pub reference_start: i64,
    pub reference_end: i64,
    pub mapping_quality: u8,
}

/// Read unmapped reads from a FASTA file.
pub fn read_fasta<P: AsRef<Path> + std::fmt::Debug>(path: P) -> Result<Vec<ReadSegment>> {
    let reader = fasta::Reader::from_file(&path)
        .with_context(|| format!("Could not open read file {}", path.as_ref().display()))?;

    let mut segments = Vec::new();
    for record in reader.records() {
        let record = record.context("Error reading FASTA record")?;
        let sequence = std::str::from_utf8(record.seq())
            .context("Read sequence is not valid UTF-8")?
            .to_uppercase();
        segments.push(ReadSegment { id: record.id().to_string(), sequence });
    }
    Ok(segments)
}

/// Read the set of candidate read IDs produced by the keyword filtering
/// step, one ID per line.
pub fn read_candidate_ids<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let file = File::open(&path)
        .with_context(|| format!("Could not open candidate file {}", path.as_ref().display()))?;
    let mut ids = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

/// Fetch the reads mapped over the VNTR locus from an indexed alignment
/// file. Contig naming differences between references are bridged by
/// retrying with the `chr` prefix stripped or added.
pub fn fetch_locus_reads(alignment_path: &str, vntr: &ReferenceVntr) -> Result<Vec<AlignedRead>> {
    let mut reader = bam::IndexedReader::from_path(alignment_path)
        .with_context(|| format!("Could not open alignment file {alignment_path}"))?;

    let contig = resolve_contig(&reader, &vntr.chromosome).with_context(|| {
        format!("Contig {} not present in {alignment_path}", vntr.chromosome)
    })?;
    reader
        .fetch((contig.as_str(), vntr.start_point, vntr.end_point()))
        .with_context(|| format!("Error fetching reads for {}", vntr.get_fetch_definition_s()))?;

    let mut reads = Vec::new();
    for record in reader.records() {
        let record = record.context("Encountered faulty read")?;
        if record.is_duplicate() || record.is_supplementary() || record.is_quality_check_failed() {
            continue;
        }
        let Ok(sequence) = String::from_utf8(record.seq().as_bytes()) else {
            debug!("Skipping read with non-UTF-8 sequence");
            continue;
        };
        reads.push(AlignedRead {
            sequence,
            is_unmapped: record.is_unmapped(),
            reference_name: contig.clone(),
            reference_start: record.pos(),
            reference_end: record.reference_end(),
            mapping_quality: record.mapq(),
        });
    }
    Ok(reads)
}

/// Contig names present in the alignment header that take part in null
/// sampling, i.e. the canonical chromosomes.
pub fn scoring_contigs(alignment_path: &str, settings: &Settings) -> Result<Vec<String>> {
    let reader = bam::Reader::from_path(alignment_path)
        .with_context(|| format!("Could not open alignment file {alignment_path}"))?;
    let header = reader.header();
    let mut contigs = Vec::new();
    for target in header.target_names() {
        let name = std::str::from_utf8(target)?.to_string();
        if settings.is_scoring_chromosome(&name) {
            contigs.push(name);
        }
    }
    Ok(contigs)
}

fn resolve_contig(reader: &bam::IndexedReader, chromosome: &str) -> Option<String> {
    let header = reader.header();
    let known = |name: &str| header.tid(name.as_bytes()).is_some();

    if known(chromosome) {
        return Some(chromosome.to_string());
    }
    if let Some(stripped) = chromosome.strip_prefix("chr") {
        if known(stripped) {
            return Some(stripped.to_string());
        }
    } else {
        let prefixed = format!("chr{chromosome}");
        if known(&prefixed) {
            return Some(prefixed);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn fasta_records_are_uppercased() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">read1\nacgtACGT\n>read2\nTTTT").unwrap();
        let reads = read_fasta(file.path()).unwrap();
        assert_eq!(2, reads.len());
        assert_eq!("read1", reads[0].id);
        assert_eq!("ACGTACGT", reads[0].sequence);
        assert_eq!("TTTT", reads[1].sequence);
    }

    #[test]
    fn candidate_ids_skip_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read1\n\n  read2  \n").unwrap();
        let ids = read_candidate_ids(file.path()).unwrap();
        assert_eq!(2, ids.len());
        assert!(ids.contains("read1"));
        assert!(ids.contains("read2"));
    }
}
