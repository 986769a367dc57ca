use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = json_pretty_bytes(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;
    write_bytes(path, &data)
}

pub fn json_pretty_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    Ok(data)
}

/// Pretty JSON on stdout, for commands whose output is meant to be piped.
pub fn print_json_pretty<T: Serialize>(value: &T) -> Result<()> {
    let mut output = BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, value).context("failed to serialize json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(data)
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

/// Publishes `data` at `path` only if nothing exists there yet.
///
/// The bytes are staged in a sibling temp file and hard-linked into place, so
/// readers never observe a partial file and a concurrent writer cannot be
/// overwritten. Returns `false` when `path` already existed.
pub fn publish_if_absent(path: &Path, data: &[u8]) -> Result<bool> {
    let staged = staging_path(path);
    write_bytes(&staged, data)?;

    let outcome = fs::hard_link(&staged, path);
    let _ = fs::remove_file(&staged);

    match outcome {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to publish {}", path.display())),
    }
}

/// Replaces `path` with `data` through a staged rename.
pub fn replace_file(path: &Path, data: &[u8]) -> Result<()> {
    let staged = staging_path(path);
    write_bytes(&staged, data)?;
    fs::rename(&staged, path)
        .with_context(|| format!("failed to replace {}", path.display()))
}

fn staging_path(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("artifact");
    path.with_file_name(format!(
        ".{name}.{}.{}.staging",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ))
}

pub fn slugify(value: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(value.len());
    for character in value.chars().flat_map(char::to_lowercase) {
        if character.is_ascii_alphanumeric() {
            slug.push(character);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }

    slug.trim_matches('_').chars().take(max_len).collect()
}
