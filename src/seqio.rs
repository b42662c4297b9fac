//! Sequence I/O Module
//!
//! Reading and writing of biological sequence files. Contigs are read from
//! FASTA; long reads from FASTA or FASTQ, plain or gzip-compressed, with the
//! format picked from the file extension. Writing is FASTA only, which is
//! all the extension pipeline produces.
//!
//! # Examples
//! ```no_run
//! use longext::seqio::{SeqFile, ReadSet};
//!
//! let mut reader = SeqFile::open("reads.fastq.gz").unwrap();
//! while let Some(record) = reader.read_next().unwrap() {
//!     println!("{}: {} bp", record.name, record.seq.len());
//! }
//!
//! let reads = ReadSet::from_file("reads.fastq.gz").unwrap();
//! println!("{} reads loaded", reads.len());
//! ```

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use log::warn;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A sequence record: identifier plus bases. Quality scores, when present
/// in the source file, are not retained.
#[derive(Debug, Clone)]
pub struct SeqRecord {
    /// Identifier (text after '>' or '@' up to the first whitespace).
    pub name: String,
    /// Nucleotide sequence.
    pub seq: String,
}

// ============================================================================
// FASTA
// ============================================================================

/// Sequential reader for FASTA data from any buffered source.
///
/// Handles multi-line sequences and strips whitespace automatically.
pub struct FastaReader<R: BufRead> {
    reader: R,
    line_buf: String,
    current_name: Option<String>,
}

impl FastaReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open FASTA: {}", path.as_ref().display()))?;
        Self::new(BufReader::with_capacity(1024 * 1024, file))
    }
}

impl<R: BufRead> FastaReader<R> {
    /// Wraps a buffered source and positions the reader on the first header.
    pub fn new(reader: R) -> Result<Self> {
        let mut r = Self {
            reader,
            line_buf: String::with_capacity(256),
            current_name: None,
        };

        r.line_buf.clear();
        if r.reader.read_line(&mut r.line_buf)? > 0 && r.line_buf.starts_with('>') {
            r.current_name = Some(header_name(&r.line_buf[1..]));
        }

        Ok(r)
    }

    /// Reads the next record.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - successfully read a record
    /// - `Ok(None)` - end of input
    /// - `Err(e)` - I/O error
    pub fn read_next(&mut self) -> Result<Option<SeqRecord>> {
        let name = match self.current_name.take() {
            Some(n) => n,
            None => return Ok(None),
        };

        let mut seq = String::with_capacity(10000);

        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                break;
            }

            if self.line_buf.starts_with('>') {
                self.current_name = Some(header_name(&self.line_buf[1..]));
                break;
            } else {
                seq.push_str(self.line_buf.trim_end());
            }
        }

        Ok(Some(SeqRecord { name, seq }))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<SeqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

// ============================================================================
// FASTQ
// ============================================================================

/// Sequential reader for FASTQ data (4 lines per record) from any buffered
/// source. The separator and quality lines are consumed and discarded.
pub struct FastqReader<R: BufRead> {
    reader: R,
    line_buf: String,
}

impl FastqReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open FASTQ: {}", path.as_ref().display()))?;
        Ok(Self::new(BufReader::with_capacity(1024 * 1024, file)))
    }
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: String::with_capacity(512),
        }
    }

    pub fn read_next(&mut self) -> Result<Option<SeqRecord>> {
        // Line 1: @name
        self.line_buf.clear();
        if self.reader.read_line(&mut self.line_buf)? == 0 {
            return Ok(None);
        }
        let name = header_name(self.line_buf.trim_start_matches('@'));
        if name.is_empty() {
            return Ok(None);
        }

        // Line 2: sequence
        self.line_buf.clear();
        self.reader.read_line(&mut self.line_buf)?;
        let seq = self.line_buf.trim_end().to_string();

        // Lines 3 and 4: separator and quality, ignored
        self.line_buf.clear();
        self.reader.read_line(&mut self.line_buf)?;
        self.line_buf.clear();
        self.reader.read_line(&mut self.line_buf)?;

        Ok(Some(SeqRecord { name, seq }))
    }
}

// ============================================================================
// Format dispatch
// ============================================================================

/// Sequence file reader with automatic format and compression detection.
///
/// `.gz` files are transparently decompressed; the remaining extension
/// picks FASTA (`.fasta`, `.fa`, `.fna`) or FASTQ (`.fastq`, `.fq`).
/// Unrecognized extensions are treated as FASTA.
pub enum SeqFile {
    Fasta(FastaReader<BufReader<File>>),
    FastaGz(FastaReader<BufReader<MultiGzDecoder<File>>>),
    Fastq(FastqReader<BufReader<File>>),
    FastqGz(FastqReader<BufReader<MultiGzDecoder<File>>>),
}

impl SeqFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let (stem, gzipped) = match name.strip_suffix(".gz") {
            Some(stem) => (stem, true),
            None => (name.as_str(), false),
        };
        let fastq = stem.ends_with(".fastq") || stem.ends_with(".fq");

        match (fastq, gzipped) {
            (false, false) => Ok(SeqFile::Fasta(FastaReader::open(path)?)),
            (false, true) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                let reader = BufReader::with_capacity(1024 * 1024, MultiGzDecoder::new(file));
                Ok(SeqFile::FastaGz(FastaReader::new(reader)?))
            }
            (true, false) => Ok(SeqFile::Fastq(FastqReader::open(path)?)),
            (true, true) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                let reader = BufReader::with_capacity(1024 * 1024, MultiGzDecoder::new(file));
                Ok(SeqFile::FastqGz(FastqReader::new(reader)))
            }
        }
    }

    pub fn read_next(&mut self) -> Result<Option<SeqRecord>> {
        match self {
            SeqFile::Fasta(r) => r.read_next(),
            SeqFile::FastaGz(r) => r.read_next(),
            SeqFile::Fastq(r) => r.read_next(),
            SeqFile::FastqGz(r) => r.read_next(),
        }
    }

    /// Reads all records of the file.
    pub fn read_all(&mut self) -> Result<Vec<SeqRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_next()? {
            records.push(record);
        }
        Ok(records)
    }
}

fn header_name(line: &str) -> String {
    line.split_whitespace().next().unwrap_or("").to_string()
}

// ============================================================================
// FASTA writing
// ============================================================================

/// Writes a single sequence to a FASTA file.
pub fn write_fasta<P: AsRef<Path>>(name: &str, seq: &[u8], path: P) -> Result<()> {
    write_fasta_records(std::iter::once((name, seq)), path)
}

/// Writes a set of sequences to a FASTA file, one entry per (name, seq)
/// pair, in iteration order.
pub fn write_fasta_records<'a, P, I, S>(entries: I, path: P) -> Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (&'a str, S)>,
    S: AsRef<[u8]>,
{
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for (name, seq) in entries {
        writeln!(writer, ">{}", name)?;
        writer.write_all(seq.as_ref())?;
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

// ============================================================================
// Read registry
// ============================================================================

/// Registry of the long reads of a run.
///
/// Owns all read names and sequences and assigns each read a dense id,
/// stable for the lifetime of the pipeline. Extension candidates refer to
/// reads by id only.
#[derive(Debug, Default)]
pub struct ReadSet {
    name_to_id: FxHashMap<String, u32>,
    names: Vec<String>,
    seqs: Vec<String>,
}

impl ReadSet {
    /// Loads all reads of a FASTA/FASTQ file. Duplicate names keep the
    /// first occurrence.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = SeqFile::open(path)?;
        let mut set = ReadSet::default();
        while let Some(record) = reader.read_next()? {
            set.insert(record.name, record.seq);
        }
        Ok(set)
    }

    /// Registers a read, returning its id. Re-registering a name returns
    /// the existing id and keeps the original sequence.
    pub fn insert(&mut self, name: String, seq: String) -> u32 {
        if let Some(&id) = self.name_to_id.get(&name) {
            warn!("duplicate read name {}, keeping first occurrence", name);
            return id;
        }
        let id = self.names.len() as u32;
        self.name_to_id.insert(name.clone(), id);
        self.names.push(name);
        self.seqs.push(seq);
        id
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    pub fn name(&self, id: u32) -> &str {
        &self.names[id as usize]
    }

    pub fn seq(&self, id: u32) -> &str {
        &self.seqs[id as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fasta_reader_multiline() {
        let data = ">ctg1 description\nACGT\nACGT\n>ctg2\nTTTT\n";
        let mut reader = FastaReader::new(Cursor::new(data)).unwrap();

        let r1 = reader.read_next().unwrap().unwrap();
        assert_eq!(r1.name, "ctg1");
        assert_eq!(r1.seq, "ACGTACGT");

        let r2 = reader.read_next().unwrap().unwrap();
        assert_eq!(r2.name, "ctg2");
        assert_eq!(r2.seq, "TTTT");

        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_fastq_reader() {
        let data = "@read1\nACGT\n+\nIIII\n@read2 extra\nGGGG\n+\nIIII\n";
        let mut reader = FastqReader::new(Cursor::new(data));

        let r1 = reader.read_next().unwrap().unwrap();
        assert_eq!(r1.name, "read1");
        assert_eq!(r1.seq, "ACGT");

        let r2 = reader.read_next().unwrap().unwrap();
        assert_eq!(r2.name, "read2");
        assert_eq!(r2.seq, "GGGG");

        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_fasta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fasta");

        write_fasta_records(
            vec![("a", b"ACGT".as_slice()), ("b", b"TTTT".as_slice())],
            &path,
        )
        .unwrap();

        let mut reader = FastaReader::open(&path).unwrap();
        let records: Vec<_> = (&mut reader).collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a");
        assert_eq!(records[0].seq, "ACGT");
        assert_eq!(records[1].name, "b");
        assert_eq!(records[1].seq, "TTTT");
    }

    #[test]
    fn test_read_set_ids() {
        let mut set = ReadSet::default();
        let a = set.insert("r1".to_string(), "ACGT".to_string());
        let b = set.insert("r2".to_string(), "TTTT".to_string());
        assert_eq!((a, b), (0, 1));
        assert_eq!(set.id_of("r2"), Some(1));
        assert_eq!(set.seq(1), "TTTT");
        assert_eq!(set.name(0), "r1");
        assert_eq!(set.id_of("missing"), None);

        // duplicate keeps the first sequence
        let c = set.insert("r1".to_string(), "GGGG".to_string());
        assert_eq!(c, 0);
        assert_eq!(set.seq(0), "ACGT");
        assert_eq!(set.len(), 2);
    }
}
