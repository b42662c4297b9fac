//! longext - Long-read contig end extension
//!
//! Extends the ends of draft-assembly contigs into their adjacent gaps by
//! building a consensus over the soft-clipped overhangs of long reads
//! aligned to the assembly.
//!
//! # Modules
//! - `seqio`: FASTA/FASTQ file I/O with gzip support, read registry
//! - `sam`: SAM alignment record parsing
//! - `cigar`: CIGAR parsing and alignment geometry
//! - `consensus`: Majority-vote consensus kernels
//! - `extender`: Overhang extraction and the refinement loop
//! - `aligner`: External long-read mapper wrappers (bwa, graphmap)
//! - `error`: Error kinds of the pipeline

pub mod aligner;
pub mod cigar;
pub mod consensus;
pub mod error;
pub mod extender;
pub mod sam;
pub mod seqio;
