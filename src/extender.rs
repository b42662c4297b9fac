//! Contig end extension.
//!
//! Scans alignment records for reads whose soft-clipped ends dangle past a
//! contig boundary, feeds the dangling overhangs to a consensus kernel, and
//! refines: reads that fell out of consensus are re-aligned against the
//! grown contig with the external aligner and fed back in, until no further
//! progress is possible.

use anyhow::Result;
use log::{debug, info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::aligner::Aligner;
use crate::cigar;
use crate::consensus::{self, Overhang, PoaBackend};
use crate::error::ExtendError;
use crate::sam::{self, AlignmentCollection, SamRecord};
use crate::seqio::{self, ReadSet, SeqRecord};

/// Consensus kernel used to synthesize extension bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsensusMode {
    /// Majority vote with per-read realignment, run under the refinement
    /// loop.
    #[default]
    MvRealign,
    /// Plain per-position majority vote, single shot.
    MvSimple,
    /// External partial-order-alignment backend, single shot.
    Poa,
}

impl FromStr for ConsensusMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mv-realign" => Ok(ConsensusMode::MvRealign),
            "mv-simple" => Ok(ConsensusMode::MvSimple),
            "poa" => Ok(ConsensusMode::Poa),
            _ => Err(format!(
                "unknown consensus mode '{}' (expected mv-realign, mv-simple or poa)",
                s
            )),
        }
    }
}

impl fmt::Display for ConsensusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConsensusMode::MvRealign => "mv-realign",
            ConsensusMode::MvSimple => "mv-simple",
            ConsensusMode::Poa => "poa",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExtenderConfig {
    /// Upper bound on one-side extension per contig.
    pub max_ext: usize,

    /// Alignments ending closer than this to a contig boundary are used
    /// directly.
    pub inner_margin: usize,

    /// Alignments ending between the inner and this margin are kept but
    /// flagged for re-alignment.
    pub outer_margin: usize,

    /// Minimum coverage for the consensus to keep emitting.
    pub min_coverage: u32,

    /// Fraction of `min_coverage` the look-ahead vote must reach.
    pub lookahead_coverage_factor: f64,

    pub consensus_mode: ConsensusMode,

    /// Contigs shorter than this pass through unextended (0 = extend all).
    pub min_contig_len: usize,
}

impl Default for ExtenderConfig {
    fn default() -> Self {
        Self {
            max_ext: 1000,
            inner_margin: 5,
            outer_margin: 15,
            min_coverage: 5,
            lookahead_coverage_factor: 0.6,
            consensus_mode: ConsensusMode::MvRealign,
            min_contig_len: 0,
        }
    }
}

impl ExtenderConfig {
    pub fn validate(&self) -> Result<(), ExtendError> {
        if self.max_ext == 0 {
            return Err(ExtendError::InvalidConfig("max-ext must be positive".into()));
        }
        if self.min_coverage == 0 {
            return Err(ExtendError::InvalidConfig(
                "min-coverage must be positive".into(),
            ));
        }
        if self.outer_margin < self.inner_margin {
            return Err(ExtendError::InvalidConfig(format!(
                "outer margin {} smaller than inner margin {}",
                self.outer_margin, self.inner_margin
            )));
        }
        if !(self.lookahead_coverage_factor > 0.0 && self.lookahead_coverage_factor <= 1.0) {
            return Err(ExtendError::InvalidConfig(format!(
                "look-ahead coverage factor {} outside (0, 1]",
                self.lookahead_coverage_factor
            )));
        }
        Ok(())
    }
}

/// One contig after extension.
#[derive(Debug, Clone)]
pub struct ExtendedContig {
    pub name: String,

    pub seq: Vec<u8>,

    /// Bases prepended to the left end.
    pub left_ext: usize,

    /// Bases appended to the right end.
    pub right_ext: usize,
}

/// Scans alignment records for candidate extensions of one contig.
///
/// Returns the left-end and right-end overhang lists, in record order. A
/// read dangling past an end within the inner margin becomes a live
/// overhang; within the outer margin it becomes a dropped placeholder that
/// the refinement loop will schedule for re-alignment. Left overhangs are
/// stored reversed so the consensus walker always advances forward.
pub fn find_possible_extensions(
    records: &[SamRecord],
    reads: &ReadSet,
    contig_len: usize,
    cfg: &ExtenderConfig,
) -> (Vec<Overhang>, Vec<Overhang>) {
    let mut left: Vec<Overhang> = Vec::new();
    let mut right: Vec<Overhang> = Vec::new();
    let mut seen_left = FxHashSet::default();
    let mut seen_right = FxHashSet::default();

    for record in records {
        if record.is_unmapped() {
            continue;
        }
        let Some(read_id) = reads.id_of(&record.qname) else {
            warn!("read {} missing from registry, record skipped", record.qname);
            continue;
        };
        let seq = record.seq.as_bytes();

        // clipped part dangles left of the contig start:
        //   contig      ------------
        //   read   ----------
        let clip = cigar::leading_clip(&record.cigar);
        if clip > record.begin_pos && record.begin_pos < cfg.outer_margin {
            let len = clip - record.begin_pos;
            if len > seq.len() {
                warn!(
                    "clip of {} longer than its sequence, record skipped",
                    record.qname
                );
            } else if !seen_left.insert(read_id) {
                debug!("read {} already a left candidate", record.qname);
            } else if record.begin_pos < cfg.inner_margin {
                // walking the left gap goes right-to-left, so the overhang
                // is stored reversed
                let start = len.saturating_sub(cfg.max_ext);
                let mut ext = seq[start..len].to_ascii_uppercase();
                ext.reverse();
                left.push(Overhang::new(read_id, ext));
            } else {
                left.push(Overhang::placeholder(read_id));
            }
        }

        // clipped part dangles right of the contig end:
        //   contig  ------------
        //   read            ----------
        let tail = cigar::trailing_clip(&record.cigar);
        if tail > 0 {
            let used_read = cigar::used_read(&record.cigar);
            let used_ref = cigar::used_ref(&record.cigar);
            let margin = contig_len as i64 - (record.begin_pos + used_ref) as i64;

            // alignment ends too far inside the contig
            if margin > cfg.outer_margin as i64 {
                continue;
            }
            let len = tail as i64 - margin;
            if len <= 0 {
                continue;
            }
            let len = len as usize;

            if !seen_right.insert(read_id) {
                debug!("read {} already a right candidate", record.qname);
                continue;
            }

            if margin > cfg.inner_margin as i64 {
                right.push(Overhang::placeholder(read_id));
            } else {
                let start = used_read - len;
                let end = (start + len.min(cfg.max_ext)).min(seq.len());
                if start > seq.len() {
                    warn!(
                        "clip of {} outside its sequence, record skipped",
                        record.qname
                    );
                    continue;
                }
                right.push(Overhang::new(read_id, seq[start..end].to_ascii_uppercase()));
            }
        }
    }

    (left, right)
}

/// Extends both ends of one contig with the configured consensus kernel.
///
/// Temporary files live in `workdir`, which must not be shared between
/// concurrently processed contigs. External-tool failures are contained:
/// the extension grown so far is kept and returned.
pub fn extend_contig(
    name: &str,
    contig_seq: &[u8],
    records: &[SamRecord],
    reads: &ReadSet,
    aligner: &dyn Aligner,
    poa: Option<&dyn PoaBackend>,
    cfg: &ExtenderConfig,
    workdir: &Path,
) -> ExtendedContig {
    let (left, right) = find_possible_extensions(records, reads, contig_seq.len(), cfg);
    debug!(
        "{}: {} left and {} right candidates",
        name,
        left.len(),
        right.len()
    );

    match cfg.consensus_mode {
        ConsensusMode::MvRealign => {
            extend_mv_realign(name, contig_seq, left, right, reads, aligner, cfg, workdir)
        }
        ConsensusMode::MvSimple => extend_single_shot(name, contig_seq, &left, &right, |ovs| {
            consensus::simple_vote(ovs, cfg.min_coverage, cfg.max_ext)
        }),
        ConsensusMode::Poa => match poa {
            Some(backend) => extend_single_shot(name, contig_seq, &left, &right, |ovs| {
                let seqs: Vec<Vec<u8>> = ovs
                    .iter()
                    .filter(|ov| !ov.seq.is_empty())
                    .map(|ov| ov.seq[..ov.seq.len().min(cfg.max_ext)].to_vec())
                    .collect();
                backend.consensus(&seqs)
            }),
            None => {
                warn!("{}: no POA backend wired in, contig left unextended", name);
                ExtendedContig {
                    name: name.to_string(),
                    seq: contig_seq.to_vec(),
                    left_ext: 0,
                    right_ext: 0,
                }
            }
        },
    }
}

/// One consensus pass per side, no refinement.
fn extend_single_shot(
    name: &str,
    contig_seq: &[u8],
    left: &[Overhang],
    right: &[Overhang],
    kernel: impl Fn(&[Overhang]) -> Vec<u8>,
) -> ExtendedContig {
    let mut left_ext = kernel(left);
    left_ext.reverse();
    let right_ext = kernel(right);

    let mut seq = left_ext.clone();
    seq.extend_from_slice(contig_seq);
    seq.extend_from_slice(&right_ext);

    ExtendedContig {
        name: name.to_string(),
        seq,
        left_ext: left_ext.len(),
        right_ext: right_ext.len(),
    }
}

/// The refinement loop around the realigning walker.
fn extend_mv_realign(
    name: &str,
    contig_seq: &[u8],
    mut left: Vec<Overhang>,
    mut right: Vec<Overhang>,
    reads: &ReadSet,
    aligner: &dyn Aligner,
    cfg: &ExtenderConfig,
    workdir: &Path,
) -> ExtendedContig {
    let mut contig = contig_seq.to_vec();
    let mut total_left = 0usize;
    let mut total_right = 0usize;
    let mut should_ext_left = true;
    let mut should_ext_right = true;

    loop {
        let mut left_ext = Vec::new();
        if should_ext_left {
            left_ext = consensus::walk(&mut left, cfg.min_coverage, cfg.lookahead_coverage_factor);
            left_ext.reverse();
            should_ext_left = !left_ext.is_empty();
            total_left += left_ext.len();
        }

        let mut right_ext = Vec::new();
        if should_ext_right {
            right_ext =
                consensus::walk(&mut right, cfg.min_coverage, cfg.lookahead_coverage_factor);
            should_ext_right = !right_ext.is_empty();
            total_right += right_ext.len();
        }

        should_ext_left &= total_left < cfg.max_ext;
        should_ext_right &= total_right < cfg.max_ext;

        if !left_ext.is_empty() {
            left_ext.extend_from_slice(&contig);
            contig = left_ext;
        }
        contig.extend_from_slice(&right_ext);

        // keep survivors, collect dropouts once per read across both ends
        let mut seen = FxHashSet::default();
        let mut dropouts: Vec<u32> = Vec::new();
        for side in [&mut left, &mut right] {
            side.retain(|ov| {
                if ov.dropped {
                    if seen.insert(ov.read_id) {
                        dropouts.push(ov.read_id);
                    }
                    false
                } else {
                    true
                }
            });
        }

        if dropouts.is_empty() {
            break;
        }
        debug!("{}: re-aligning {} dropped reads", name, dropouts.len());

        let new_records = match realign_dropouts(name, &contig, &dropouts, reads, aligner, workdir)
        {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "{}: re-alignment failed, keeping extension grown so far: {:#}",
                    name, e
                );
                break;
            }
        };

        let (new_left, new_right) =
            find_possible_extensions(&new_records, reads, contig.len(), cfg);
        left.extend(new_left);
        right.extend(new_right);

        if (left.len() as u32) < cfg.min_coverage && (right.len() as u32) < cfg.min_coverage {
            break;
        }
        if !(should_ext_left || should_ext_right) {
            break;
        }
    }

    ExtendedContig {
        name: name.to_string(),
        seq: contig,
        left_ext: total_left,
        right_ext: total_right,
    }
}

/// Maps the dropped reads against the grown contig and returns the new
/// alignment records.
fn realign_dropouts(
    name: &str,
    contig: &[u8],
    dropouts: &[u32],
    reads: &ReadSet,
    aligner: &dyn Aligner,
    workdir: &Path,
) -> Result<Vec<SamRecord>> {
    std::fs::create_dir_all(workdir)?;
    let contig_file = workdir.join("contig.fasta");
    let reads_file = workdir.join("realign_reads.fasta");
    let sam_file = workdir.join("realign.sam");

    seqio::write_fasta(name, contig, &contig_file)?;
    seqio::write_fasta_records(
        dropouts
            .iter()
            .map(|&id| (reads.name(id), reads.seq(id).as_bytes())),
        &reads_file,
    )?;

    aligner.index(&contig_file)?;
    aligner.align(&contig_file, &reads_file, &sam_file, true)?;

    sam::read_sam(&sam_file)
}

/// Extends every contig of the assembly in parallel.
///
/// Each contig gets its own subdirectory under `workdir` for temporary
/// files, so concurrent contigs never share paths. Results come back in
/// input order.
pub fn extend_assembly(
    contigs: &[SeqRecord],
    reads: &ReadSet,
    alignments: &AlignmentCollection,
    aligner: &dyn Aligner,
    poa: Option<&dyn PoaBackend>,
    cfg: &ExtenderConfig,
    workdir: &Path,
) -> Vec<ExtendedContig> {
    contigs
        .par_iter()
        .enumerate()
        .map(|(idx, contig)| {
            let records = alignments.get(&contig.name).map(Vec::as_slice).unwrap_or(&[]);

            if contig.seq.len() < cfg.min_contig_len || records.is_empty() {
                debug!("{}: skipped ({} alignments)", contig.name, records.len());
                return ExtendedContig {
                    name: contig.name.clone(),
                    seq: contig.seq.as_bytes().to_vec(),
                    left_ext: 0,
                    right_ext: 0,
                };
            }

            let subdir = workdir.join(format!("ctg_{:05}", idx));
            let result = extend_contig(
                &contig.name,
                contig.seq.as_bytes(),
                records,
                reads,
                aligner,
                poa,
                cfg,
                &subdir,
            );
            info!(
                "{}: +{} bp left, +{} bp right",
                result.name, result.left_ext, result.right_ext
            );
            result
        })
        .collect()
}

/// Writes the extended contigs to a FASTA file.
pub fn write_extended_contigs<P: AsRef<Path>>(results: &[ExtendedContig], path: P) -> Result<()> {
    seqio::write_fasta_records(
        results.iter().map(|r| (r.name.as_str(), r.seq.as_slice())),
        path,
    )
}
