mod aligner;
mod cigar;
mod consensus;
mod error;
mod extender;
mod sam;
mod seqio;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use aligner::{AlignerKind, ReadType};
use extender::{ConsensusMode, ExtenderConfig};
use seqio::{ReadSet, SeqFile};

/// Parse and validate the look-ahead coverage factor (must be in (0, 1])
fn parse_lookahead_factor(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val > 0.0 && val <= 1.0 {
        Ok(val)
    } else {
        Err(format!(
            "Look-ahead coverage factor must be in (0, 1], got {}",
            val
        ))
    }
}

#[derive(Parser)]
#[command(name = "longext")]
#[command(version)]
#[command(about = "Extend draft-assembly contig ends using long-read overhangs")]
#[command(long_about = r#"
longext - long-read contig end extension

Extends both ends of every contig of a draft assembly into the adjacent
gaps:
  1. Maps the long reads to the draft (bwa mem or graphmap)
  2. Collects reads whose soft-clipped ends dangle past a contig boundary
  3. Synthesizes extension bases by majority-vote consensus with per-read
     realignment
  4. Re-aligns reads that fell out of consensus against the grown contig
     and repeats until no further progress is possible

EXAMPLES:
  # PacBio reads, bwa backend
  longext -d draft.fasta -r reads.fastq.gz -o extended.fasta

  # Nanopore reads, graphmap, pre-computed alignments
  longext -d draft.fasta -r reads.fa --read-type ont --aligner graphmap \
          --alignments aln.sam
"#)]
struct Args {
    // ===== INPUT =====
    /// Draft assembly contigs (FASTA)
    #[arg(short = 'd', long, value_name = "FILE", help_heading = "Input")]
    draft: PathBuf,

    /// Long reads (FASTA/FASTQ, optionally gzipped)
    #[arg(short = 'r', long, value_name = "FILE", help_heading = "Input")]
    reads: PathBuf,

    /// Alignments of the reads to the draft (SAM); skips the initial mapping
    #[arg(long, value_name = "FILE", help_heading = "Input")]
    alignments: Option<PathBuf>,

    // ===== OUTPUT =====
    /// Output FASTA with the extended contigs
    #[arg(short = 'o', long, value_name = "FILE", default_value = "extended.fasta",
          help_heading = "Output")]
    output: PathBuf,

    /// Directory for temporary files
    #[arg(long, value_name = "DIR", default_value = "longext_tmp", help_heading = "Output")]
    workdir: PathBuf,

    /// Keep temporary files (contig/read FASTAs, SAMs, index artifacts)
    #[arg(short = 'u', long, help_heading = "Output")]
    keep_temp: bool,

    /// Verbose output to stderr (per-step consensus tracing)
    #[arg(short = 'v', long, help_heading = "Output")]
    verbose: bool,

    // ===== ALIGNMENT =====
    /// Aligner backend: 'bwa' or 'graphmap'
    #[arg(long, value_name = "NAME", default_value = "bwa", help_heading = "Alignment")]
    aligner: AlignerKind,

    /// Read technology: 'pacbio' or 'ont'
    #[arg(long = "read-type", value_name = "TYPE", default_value = "pacbio",
          help_heading = "Alignment")]
    read_type: ReadType,

    // ===== EXTENSION =====
    /// Consensus kernel: 'mv-realign', 'mv-simple' or 'poa'
    #[arg(long = "consensus-mode", value_name = "MODE", default_value = "mv-realign",
          help_heading = "Extension")]
    consensus_mode: ConsensusMode,

    /// Upper bound on one-side extension per contig (bp)
    #[arg(long = "max-ext", value_name = "BP", default_value = "1000",
          help_heading = "Extension")]
    max_ext: usize,

    /// Alignments ending closer than this to a contig boundary are used directly (bp)
    #[arg(long = "inner-margin", value_name = "BP", default_value = "5",
          help_heading = "Extension")]
    inner_margin: usize,

    /// Alignments ending between the inner and this margin are kept for re-alignment (bp)
    #[arg(long = "outer-margin", value_name = "BP", default_value = "15",
          help_heading = "Extension")]
    outer_margin: usize,

    /// Minimum coverage for the consensus to keep emitting
    #[arg(long = "min-coverage", value_name = "NUM", default_value = "5",
          help_heading = "Extension")]
    min_coverage: u32,

    /// Fraction of --min-coverage the look-ahead vote must reach [0-1]
    #[arg(long = "lookahead-factor", value_name = "FLOAT", default_value = "0.6",
          value_parser = parse_lookahead_factor, help_heading = "Extension")]
    lookahead_factor: f64,

    /// Skip extension of contigs shorter than this (bp, 0 = extend all)
    #[arg(short = 'g', long = "min-contig-len", value_name = "BP", default_value = "0",
          help_heading = "Extension")]
    min_contig_len: usize,

    // ===== RUNTIME =====
    /// Number of threads [0 = auto-detect]
    #[arg(short = 't', long, value_name = "NUM", default_value = "0", help_heading = "Runtime")]
    threads: usize,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("[ERROR] {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let start_time = Instant::now();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    let cfg = ExtenderConfig {
        max_ext: args.max_ext,
        inner_margin: args.inner_margin,
        outer_margin: args.outer_margin,
        min_coverage: args.min_coverage,
        lookahead_coverage_factor: args.lookahead_factor,
        consensus_mode: args.consensus_mode,
        min_contig_len: args.min_contig_len,
    };
    cfg.validate()?;

    if cfg.consensus_mode == ConsensusMode::Poa {
        return Err(error::ExtendError::InvalidConfig(
            "consensus mode 'poa' needs an external POA backend, which this build does not bundle"
                .into(),
        )
        .into());
    }

    let threads = if args.threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        args.threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();

    let aligner = aligner::create(args.aligner, threads, args.read_type)?;

    let contigs = SeqFile::open(&args.draft)
        .and_then(|mut f| f.read_all())
        .with_context(|| format!("Failed to read draft assembly {}", args.draft.display()))?;
    if contigs.is_empty() {
        anyhow::bail!("no contigs in {}", args.draft.display());
    }
    info!("loaded {} contigs", contigs.len());

    let reads = ReadSet::from_file(&args.reads)
        .with_context(|| format!("Failed to read long reads {}", args.reads.display()))?;
    info!("loaded {} reads", reads.len());

    fs::create_dir_all(&args.workdir)
        .with_context(|| format!("Failed to create {}", args.workdir.display()))?;

    let records = match &args.alignments {
        Some(path) => sam::read_sam(path)
            .with_context(|| format!("Failed to read alignments {}", path.display()))?,
        None => {
            // map the reads against the full draft once, up front
            let reference = args.workdir.join("reference.fasta");
            let aln_file = args.workdir.join("aln.sam");
            seqio::write_fasta_records(
                contigs.iter().map(|c| (c.name.as_str(), c.seq.as_bytes())),
                &reference,
            )?;
            info!("mapping reads to the draft with {}", aligner.name());
            aligner.index(&reference)?;
            aligner.align(&reference, &args.reads, &aln_file, false)?;
            sam::read_sam(&aln_file)?
        }
    };
    info!("{} alignment records", records.len());

    let alignments = sam::group_by_contig(records);

    let results = extender::extend_assembly(
        &contigs,
        &reads,
        &alignments,
        aligner.as_ref(),
        None,
        &cfg,
        &args.workdir,
    );

    extender::write_extended_contigs(&results, &args.output)?;

    let extended = results.iter().filter(|r| r.left_ext + r.right_ext > 0).count();
    let added: usize = results.iter().map(|r| r.left_ext + r.right_ext).sum();
    info!(
        "extended {}/{} contigs, {} bp added, output in {}",
        extended,
        results.len(),
        added,
        args.output.display()
    );

    if !args.keep_temp {
        let _ = fs::remove_dir_all(&args.workdir);
    }

    info!("total time: {:.1}s", start_time.elapsed().as_secs_f64());
    Ok(())
}
