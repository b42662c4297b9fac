//! SAM alignment parsing.
//!
//! Reads the subset of SAM the extension engine needs: query name, flag,
//! target contig, 0-based begin position, CIGAR and read sequence. Optional
//! columns and tags are ignored.

use anyhow::{Context, Result};
use log::warn;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::cigar::{self, Cigar};
use crate::error::ExtendError;

/// SAM flag bit marking an unmapped read; the only flag bit inspected.
pub const FLAG_UNMAPPED: u16 = 0x4;

/// Alignments clustered by the contig they reference.
pub type AlignmentCollection = FxHashMap<String, Vec<SamRecord>>;

#[derive(Debug, Clone)]
pub struct SamRecord {
    pub qname: String,

    pub flag: u16,

    pub rname: String,

    /// 0-based position of the first aligned base on the contig.
    pub begin_pos: usize,

    pub cigar: Vec<Cigar>,

    pub seq: String,
}

impl SamRecord {
    pub fn parse_line(line: &str) -> Result<Self, ExtendError> {
        let mut fields = line.split('\t');
        let mut next = |what: &str| {
            fields
                .next()
                .ok_or_else(|| ExtendError::MalformedAlignment(format!("missing {} field", what)))
        };

        let qname = next("QNAME")?.to_string();
        let flag: u16 = next("FLAG")?
            .parse()
            .map_err(|_| ExtendError::MalformedAlignment(format!("bad FLAG for {}", qname)))?;
        let rname = next("RNAME")?.to_string();
        let pos: usize = next("POS")?
            .parse()
            .map_err(|_| ExtendError::MalformedAlignment(format!("bad POS for {}", qname)))?;
        next("MAPQ")?;
        let cigar_text = next("CIGAR")?;
        next("RNEXT")?;
        next("PNEXT")?;
        next("TLEN")?;
        let seq = next("SEQ")?.to_string();

        let cigar = cigar::parse(cigar_text)?;

        // SAM POS is 1-based; 0 marks a placed-nowhere record.
        let record = SamRecord {
            qname,
            flag,
            rname,
            begin_pos: pos.saturating_sub(1),
            cigar,
            seq,
        };
        record.check_seq_len()?;
        Ok(record)
    }

    pub fn is_unmapped(&self) -> bool {
        self.flag & FLAG_UNMAPPED != 0
    }

    /// A mapped record whose sequence is shorter than its CIGAR claims
    /// cannot be used for extension.
    fn check_seq_len(&self) -> Result<(), ExtendError> {
        if self.is_unmapped() || self.seq == "*" {
            return Ok(());
        }
        let needed = cigar::used_read(&self.cigar);
        if self.seq.len() < needed {
            return Err(ExtendError::MalformedAlignment(format!(
                "sequence of {} has {} bases, CIGAR requires {}",
                self.qname,
                self.seq.len(),
                needed
            )));
        }
        Ok(())
    }
}

pub struct SamReader {
    reader: BufReader<File>,
    line_buf: String,
}

impl SamReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open SAM: {}", path.as_ref().display()))?;
        Ok(Self {
            reader: BufReader::with_capacity(1024 * 1024, file),
            line_buf: String::with_capacity(1024),
        })
    }

    /// Reads the next alignment record, skipping header lines and malformed
    /// records (the latter with a warning).
    pub fn read_next(&mut self) -> Result<Option<SamRecord>> {
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                return Ok(None);
            }

            let line = self.line_buf.trim_end();
            if line.is_empty() || line.starts_with('@') {
                continue;
            }

            match SamRecord::parse_line(line) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => warn!("skipping SAM record: {}", e),
            }
        }
    }
}

impl Iterator for SamReader {
    type Item = Result<SamRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Reads all records of a SAM file.
pub fn read_sam<P: AsRef<Path>>(path: P) -> Result<Vec<SamRecord>> {
    SamReader::open(path)?.collect()
}

/// Clusters mapped records around the contig they reference.
pub fn group_by_contig(records: Vec<SamRecord>) -> AlignmentCollection {
    let mut collection = AlignmentCollection::default();
    for record in records {
        if record.is_unmapped() || record.rname == "*" {
            continue;
        }
        collection
            .entry(record.rname.clone())
            .or_insert_with(Vec::new)
            .push(record);
    }
    collection
}
