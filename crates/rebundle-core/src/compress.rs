//! Gzip pre-compression of the deployable tree.
//!
//! Every selected file gets a `<file>.gz` sibling so a static server can
//! serve the compressed variant directly.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::CompressError;
use crate::manifest::PathFilter;

/// Default compression level (6 = balanced speed/ratio).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Highest level gzip accepts.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

fn default_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

/// Files under `root` to compress; `!` prefix excludes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompressRule {
    pub root: PathBuf,
    #[serde(default)]
    pub globs: Vec<String>,
    #[serde(default = "default_level")]
    pub level: u32,
}

impl CompressRule {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            globs: Vec::new(),
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn glob(mut self, pattern: impl Into<String>) -> Self {
        self.globs.push(pattern.into());
        self
    }
}

/// Statistics about one compressed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressedFile {
    pub path: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
    /// SHA-256 of the compressed bytes.
    pub checksum: String,
}

impl CompressedFile {
    /// Compressed size relative to the original (0.0 for empty input).
    pub fn ratio(&self) -> f64 {
        if self.original_size > 0 {
            self.compressed_size as f64 / self.original_size as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressReport {
    pub files: Vec<CompressedFile>,
}

impl CompressReport {
    pub fn original_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.original_size).sum()
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.compressed_size).sum()
    }
}

/// Run every rule, writing `.gz` siblings. Existing `.gz` files are never recompressed.
pub fn compress(rules: &[CompressRule]) -> Result<CompressReport, CompressError> {
    let mut report = CompressReport::default();

    for (index, rule) in rules.iter().enumerate() {
        if !rule.root.is_dir() {
            return Err(CompressError::MissingRoot {
                rule: index,
                root: rule.root.clone(),
            });
        }
        let filter = PathFilter::new(&rule.globs).map_err(|e| CompressError::InvalidGlob {
            rule: index,
            pattern: e.pattern,
            reason: e.reason,
        })?;
        let files = filter
            .select(&rule.root)
            .map_err(|(path, source)| CompressError::Io {
                rule: index,
                path,
                source,
            })?;

        for relative in files {
            if relative.extension().is_some_and(|ext| ext == "gz") {
                continue;
            }
            let source = rule.root.join(&relative);
            let stats = compress_file(&source, rule.level).map_err(|e| CompressError::Io {
                rule: index,
                path: source.clone(),
                source: e,
            })?;
            report.files.push(stats);
        }
    }

    info!(
        files = report.files.len(),
        original_bytes = report.original_bytes(),
        compressed_bytes = report.compressed_bytes(),
        "compression done"
    );
    Ok(report)
}

/// Path of the gzip sibling for `source`.
pub fn gz_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Compress one file to its `.gz` sibling.
pub fn compress_file(source: &Path, level: u32) -> io::Result<CompressedFile> {
    let dest = gz_path(source);
    let mut input = File::open(source)?;

    let encoder = GzEncoder::new(File::create(&dest)?, Compression::new(level));
    let mut writer = CountingWriter::new(encoder);
    io::copy(&mut input, &mut writer)?;
    let (encoder, original_size) = writer.into_parts();
    encoder.finish()?;

    let compressed = std::fs::read(&dest)?;
    Ok(CompressedFile {
        path: dest,
        original_size,
        compressed_size: compressed.len() as u64,
        checksum: hex::encode(Sha256::digest(&compressed)),
    })
}

/// Counts bytes flowing into the encoder.
struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    fn into_parts(self) -> (W, u64) {
        (self.inner, self.written)
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
