//! Content-addressed storage for generated scripts.
//!
//! Layout: a flat directory where each revision lives at
//! `<base>_<fingerprint>.py`. Identical source under the same logical name maps
//! to the same file; any change in content gets a new file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::core::types::CodeArtifact;

pub const SCRIPT_EXTENSION: &str = ".py";

/// Hex characters of the SHA-256 digest kept in the storage key.
const FINGERPRINT_LEN: usize = 12;

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").expect("static regex"));

/// Deterministic fingerprint of script source.
pub fn content_fingerprint(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// `name` without a trailing `.py` in any letter case.
fn strip_script_extension(name: &str) -> &str {
    let cut = name.len().saturating_sub(SCRIPT_EXTENSION.len());
    match (name.get(..cut), name.get(cut..)) {
        (Some(stem), Some(ext)) if ext.eq_ignore_ascii_case(SCRIPT_EXTENSION) => stem,
        _ => name,
    }
}

/// Reduce a generated file name to a safe bare name ending in `.py`.
pub fn sanitize_logical_name(name: &str) -> String {
    let bare = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let stem = strip_script_extension(bare);
    let cleaned = UNSAFE_NAME_CHARS.replace_all(stem, "_");
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    let stem = if cleaned.is_empty() { "script" } else { cleaned };
    format!("{stem}{SCRIPT_EXTENSION}")
}

/// File name under which an artifact revision is stored.
pub fn storage_key(artifact: &CodeArtifact) -> String {
    let logical = sanitize_logical_name(&artifact.logical_name);
    let base = strip_script_extension(&logical);
    format!(
        "{base}_{}{SCRIPT_EXTENSION}",
        content_fingerprint(&artifact.source_text)
    )
}

/// Flat content-addressed artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create artifact store {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist an artifact revision and return its location.
    ///
    /// Saving identical content twice is a no-op that returns the same path.
    #[instrument(skip_all, fields(logical_name = %artifact.logical_name))]
    pub fn save(&self, artifact: &CodeArtifact) -> Result<PathBuf> {
        let path = self.dir.join(storage_key(artifact));
        if path.is_file() {
            debug!(path = %path.display(), "revision already stored");
            return Ok(path);
        }
        // Write to a unique temp file and rename so concurrent saves of the
        // same key never observe a partial file.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("create temp file in {}", self.dir.display()))?;
        tmp.write_all(artifact.source_text.as_bytes())
            .context("write artifact source")?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("store artifact {}", path.display()))?;
        debug!(path = %path.display(), "revision stored");
        Ok(path)
    }
}
