//! External aligner wrappers.
//!
//! The pipeline drives a long-read mapper through two operations: build an
//! on-disk index next to a reference FASTA, and map reads against it into a
//! SAM file. Both shell out to the actual tool with explicit argument
//! vectors and surface nonzero exits as errors.

use anyhow::Result;
use log::debug;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use crate::error::ExtendError;

const STDERR_REPORT_LIMIT: usize = 2000;

/// Sequencing technology of the input reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadType {
    #[default]
    PacBio,
    Ont,
}

impl ReadType {
    /// Preset name understood by `bwa mem -x`.
    fn bwa_preset(self) -> &'static str {
        match self {
            ReadType::PacBio => "pacbio",
            ReadType::Ont => "ont2d",
        }
    }
}

impl FromStr for ReadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pacbio" => Ok(ReadType::PacBio),
            "ont" => Ok(ReadType::Ont),
            _ => Err(format!("unknown read type '{}' (expected pacbio or ont)", s)),
        }
    }
}

/// Available aligner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignerKind {
    #[default]
    Bwa,
    GraphMap,
}

impl FromStr for AlignerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bwa" => Ok(AlignerKind::Bwa),
            "graphmap" => Ok(AlignerKind::GraphMap),
            _ => Err(format!("unknown aligner '{}' (expected bwa or graphmap)", s)),
        }
    }
}

/// Minimum interface a mapper needs to expose to the extension pipeline.
pub trait Aligner: Send + Sync {
    fn name(&self) -> &str;

    /// Builds index artifacts adjacent to the reference.
    fn index(&self, reference: &Path) -> Result<(), ExtendError>;

    /// Maps `reads` against `reference` into `sam_out`. With `only_primary`
    /// supplementary and secondary alignments are suppressed.
    fn align(
        &self,
        reference: &Path,
        reads: &Path,
        sam_out: &Path,
        only_primary: bool,
    ) -> Result<(), ExtendError>;
}

/// Resolves the requested backend, checking that its executable exists.
pub fn create(kind: AlignerKind, threads: usize, read_type: ReadType) -> Result<Box<dyn Aligner>> {
    match kind {
        AlignerKind::Bwa => Ok(Box::new(BwaMem::detect(threads, read_type)?)),
        AlignerKind::GraphMap => Ok(Box::new(GraphMap::detect(threads)?)),
    }
}

/// Finds an executable in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() && path.exists() {
        return Ok(path.to_path_buf());
    }

    if let Ok(paths) = env::var("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.exists() && full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    anyhow::bail!("{} not found in PATH. Please install it or add it to your PATH.", name)
}

fn run_tool(tool: &str, cmd: &mut Command) -> Result<(), ExtendError> {
    debug!("running {:?}", cmd);
    let output = cmd.output().map_err(|e| ExtendError::ExternalTool {
        tool: tool.to_string(),
        status: "failed to start".to_string(),
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.len() > STDERR_REPORT_LIMIT {
            stderr.truncate(STDERR_REPORT_LIMIT);
            stderr.push_str("...");
        }
        return Err(ExtendError::ExternalTool {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr,
        });
    }

    Ok(())
}

// ============================================================================
// bwa
// ============================================================================

pub struct BwaMem {
    exe: PathBuf,
    threads: usize,
    read_type: ReadType,
}

impl BwaMem {
    pub fn detect(threads: usize, read_type: ReadType) -> Result<Self> {
        Ok(BwaMem {
            exe: find_executable("bwa")?,
            threads,
            read_type,
        })
    }

    fn mem_args(&self, reference: &Path, reads: &Path, only_primary: bool) -> Vec<String> {
        let mut args = vec![
            "mem".to_string(),
            "-t".to_string(),
            self.threads.to_string(),
            "-x".to_string(),
            self.read_type.bwa_preset().to_string(),
        ];
        if !only_primary {
            args.push("-Y".to_string());
        }
        args.push(reference.display().to_string());
        args.push(reads.display().to_string());
        args
    }
}

impl Aligner for BwaMem {
    fn name(&self) -> &str {
        "bwa"
    }

    fn index(&self, reference: &Path) -> Result<(), ExtendError> {
        run_tool("bwa index", Command::new(&self.exe).arg("index").arg(reference))
    }

    fn align(
        &self,
        reference: &Path,
        reads: &Path,
        sam_out: &Path,
        only_primary: bool,
    ) -> Result<(), ExtendError> {
        // bwa mem writes the SAM to stdout
        let sam = File::create(sam_out).map_err(|e| ExtendError::io(sam_out, e))?;
        run_tool(
            "bwa mem",
            Command::new(&self.exe)
                .args(self.mem_args(reference, reads, only_primary))
                .stdout(Stdio::from(sam)),
        )
    }
}

// ============================================================================
// graphmap
// ============================================================================

pub struct GraphMap {
    exe: PathBuf,
    threads: usize,
}

impl GraphMap {
    pub fn detect(threads: usize) -> Result<Self> {
        Ok(GraphMap {
            exe: find_executable("graphmap")?,
            threads,
        })
    }
}

impl Aligner for GraphMap {
    fn name(&self) -> &str {
        "graphmap"
    }

    fn index(&self, reference: &Path) -> Result<(), ExtendError> {
        run_tool(
            "graphmap",
            Command::new(&self.exe)
                .args(["align", "-I", "-r"])
                .arg(reference),
        )
    }

    // graphmap reports primary alignments only, only_primary needs no flag
    fn align(
        &self,
        reference: &Path,
        reads: &Path,
        sam_out: &Path,
        _only_primary: bool,
    ) -> Result<(), ExtendError> {
        run_tool(
            "graphmap",
            Command::new(&self.exe)
                .arg("align")
                .arg("-r")
                .arg(reference)
                .arg("-d")
                .arg(reads)
                .arg("-o")
                .arg(sam_out)
                .args(["-t", &self.threads.to_string()]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!("bwa".parse::<AlignerKind>().unwrap(), AlignerKind::Bwa);
        assert_eq!(
            "graphmap".parse::<AlignerKind>().unwrap(),
            AlignerKind::GraphMap
        );
        assert!("minimap2".parse::<AlignerKind>().is_err());

        assert_eq!("pacbio".parse::<ReadType>().unwrap(), ReadType::PacBio);
        assert_eq!("ont".parse::<ReadType>().unwrap(), ReadType::Ont);
        assert!("illumina".parse::<ReadType>().is_err());
    }

    #[test]
    fn test_bwa_mem_args() {
        let bwa = BwaMem {
            exe: PathBuf::from("bwa"),
            threads: 4,
            read_type: ReadType::PacBio,
        };

        let args = bwa.mem_args(Path::new("ref.fa"), Path::new("reads.fa"), true);
        assert_eq!(args, vec!["mem", "-t", "4", "-x", "pacbio", "ref.fa", "reads.fa"]);

        let args = bwa.mem_args(Path::new("ref.fa"), Path::new("reads.fa"), false);
        assert!(args.contains(&"-Y".to_string()));

        let bwa = BwaMem {
            exe: PathBuf::from("bwa"),
            threads: 1,
            read_type: ReadType::Ont,
        };
        let args = bwa.mem_args(Path::new("r.fa"), Path::new("q.fa"), true);
        assert!(args.contains(&"ont2d".to_string()));
    }

    #[test]
    fn test_find_executable_missing() {
        assert!(find_executable("definitely-not-a-real-tool-xyz").is_err());
    }

    #[test]
    fn test_run_tool_reports_failure() {
        let err = run_tool("false", Command::new("false").arg("x")).unwrap_err();
        match err {
            ExtendError::ExternalTool { tool, .. } => assert_eq!(tool, "false"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
