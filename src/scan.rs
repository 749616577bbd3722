//! Hook for content scanners.
//!
//! A scanner sees one decompressed member at a time through a plain
//! [`Read`]. Signature matching itself lives outside this crate.

use std::fmt;
use std::io::Read;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::io::Source;
use crate::zip::ZipArchive;

/// Outcome of scanning one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    /// Carries the name of the matched signature.
    Infected(String),
}

impl Verdict {
    pub fn is_infected(&self) -> bool {
        matches!(self, Verdict::Infected(_))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Clean => f.write_str("OK"),
            Verdict::Infected(signature) => write!(f, "FOUND {signature}"),
        }
    }
}

pub trait ModelScanner {
    /// Inspect the member stored at `path`.
    fn scan(&mut self, path: &str, data: &mut dyn Read) -> Result<Verdict>;
}

/// Run `scanner` over every file member of `archive`, in directory order.
///
/// Directories are skipped. The first error from the archive or the scanner
/// aborts the walk.
pub fn scan_archive<R: Source>(
    archive: &ZipArchive<R>,
    scanner: &mut dyn ModelScanner,
) -> Result<Vec<(String, Verdict)>> {
    let mut verdicts = Vec::with_capacity(archive.len());
    for info in archive.infolist() {
        if info.is_dir() {
            continue;
        }
        let mut reader = archive
            .open_info(info, None)
            .with_context(|| format!("failed to open {}", info.filename))?;
        let verdict = scanner
            .scan(&info.filename, &mut reader)
            .with_context(|| format!("scanner failed on {}", info.filename))?;
        if verdict.is_infected() {
            warn!(name = %info.filename, %verdict, "infected member");
        } else {
            debug!(name = %info.filename, "member clean");
        }
        verdicts.push((info.filename.clone(), verdict));
    }
    Ok(verdicts)
}
