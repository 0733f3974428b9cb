// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sync archives and merged containers.
//!
//! An archive is a zstd-compressed stream of length-prefixed entries
//! (`u32` path length + path + `u64` data length + data). The first entry is
//! always the manifest, `files_metadata.json`. Remaining entries are file
//! contents at their original relative paths.
//!
//! A merged container aggregates many small per-agent files into one
//! archive member. Each member is a header line `<len> <path> <mtime>`
//! followed by `<len>` raw bytes; unmerging yields the members lazily.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Manifest entry name inside every archive.
pub const MANIFEST_NAME: &str = "files_metadata.json";

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed archive: {0}")]
    Malformed(&'static str),

    #[error("Archive does not start with {MANIFEST_NAME}")]
    MissingManifest,
}

/// A path is only allowed to land inside the extraction root.
fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn write_entry<W: Write>(writer: &mut W, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
    writer.write_all(&(path.len() as u32).to_be_bytes())?;
    writer.write_all(path.as_bytes())?;
    writer.write_all(&(data.len() as u64).to_be_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

fn read_entry<R: Read>(reader: &mut R) -> Result<Option<(String, Vec<u8>)>, ArchiveError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let path_len = u32::from_be_bytes(len_buf) as usize;
    let mut path_buf = vec![0u8; path_len];
    reader.read_exact(&mut path_buf)?;
    let path = String::from_utf8(path_buf)
        .map_err(|_| ArchiveError::Malformed("entry path is not UTF-8"))?;

    let mut data_len_buf = [0u8; 8];
    reader.read_exact(&mut data_len_buf)?;
    let data_len = u64::from_be_bytes(data_len_buf) as usize;
    let mut data = vec![0u8; data_len];
    reader.read_exact(&mut data)?;
    Ok(Some((path, data)))
}

/// Build an archive at `archive_path` containing `manifest` plus the files
/// named in `paths`, read relative to `base_dir`. Unreadable source files
/// are logged and skipped; the sync round ships what it can.
pub fn compress_files<M: Serialize>(
    archive_path: &Path,
    base_dir: &Path,
    paths: &BTreeSet<String>,
    manifest: &M,
) -> Result<(), ArchiveError> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(archive_path)?;
    let mut encoder = zstd::stream::Encoder::new(file, COMPRESSION_LEVEL)?;

    write_entry(&mut encoder, MANIFEST_NAME, &serde_json::to_vec(manifest)?)?;
    for path in paths {
        match std::fs::read(base_dir.join(path)) {
            Ok(data) => write_entry(&mut encoder, path, &data)?,
            Err(e) => {
                warn!(path, error = %e, "skipping unreadable file while building archive");
            }
        }
    }
    encoder.finish()?.sync_all()?;
    Ok(())
}

/// Unpack an archive next to itself. Returns the parsed manifest and the
/// staging directory holding the extracted files. The caller owns the
/// staging directory and removes it on every exit path.
///
/// Worker archives carry a file tree as manifest; master archives carry the
/// four-bucket classification. The caller picks the type.
pub fn decompress_files<M: DeserializeOwned>(
    archive_path: &Path,
) -> Result<(M, PathBuf), ArchiveError> {
    let staging = PathBuf::from(format!("{}.d", archive_path.display()));
    std::fs::create_dir_all(&staging)?;

    let result = extract_into(archive_path, &staging);
    if result.is_err() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    let manifest = result?;
    Ok((manifest, staging))
}

fn extract_into<M: DeserializeOwned>(
    archive_path: &Path,
    staging: &Path,
) -> Result<M, ArchiveError> {
    let file = std::fs::File::open(archive_path)?;
    let mut decoder = zstd::stream::Decoder::new(file)?;

    let Some((first_path, first_data)) = read_entry(&mut decoder)? else {
        return Err(ArchiveError::MissingManifest);
    };
    if first_path != MANIFEST_NAME {
        return Err(ArchiveError::MissingManifest);
    }
    let manifest: M = serde_json::from_slice(&first_data)?;

    while let Some((path, data)) = read_entry(&mut decoder)? {
        if !is_safe_relative(&path) {
            return Err(ArchiveError::Malformed("entry path escapes the staging dir"));
        }
        let dest = staging.join(&path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, data)?;
    }
    Ok(manifest)
}

/// One member of a merged container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry<'a> {
    pub path: String,
    pub data: &'a [u8],
    pub mtime: String,
}

/// Lazily iterate the members of a merged container.
pub fn unmerge(data: &[u8]) -> Unmerge<'_> {
    Unmerge { data, pos: 0 }
}

/// Aggregate members into a merged container (worker side and tests).
pub fn merge(entries: &[(&str, &[u8], &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (path, data, mtime) in entries {
        out.extend_from_slice(format!("{} {} {}\n", data.len(), path, mtime).as_bytes());
        out.extend_from_slice(data);
    }
    out
}

pub struct Unmerge<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Unmerge<'a> {
    type Item = Result<MergedEntry<'a>, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            self.pos = self.data.len();
            return Some(Err(ArchiveError::Malformed("member header has no newline")));
        };
        let Ok(header) = std::str::from_utf8(&rest[..newline]) else {
            self.pos = self.data.len();
            return Some(Err(ArchiveError::Malformed("member header is not UTF-8")));
        };

        // `<len> <path> <mtime>` where the mtime itself contains one space
        let mut fields = header.splitn(3, ' ');
        let (Some(len), Some(path), Some(mtime)) = (fields.next(), fields.next(), fields.next())
        else {
            self.pos = self.data.len();
            return Some(Err(ArchiveError::Malformed("member header is incomplete")));
        };
        let Ok(len) = len.parse::<usize>() else {
            self.pos = self.data.len();
            return Some(Err(ArchiveError::Malformed("member length is not a number")));
        };

        let start = newline + 1;
        let end = start + len;
        if end > rest.len() {
            self.pos = self.data.len();
            return Some(Err(ArchiveError::Malformed("member data is truncated")));
        }
        self.pos += end;
        Some(Ok(MergedEntry {
            path: path.to_string(),
            data: &rest[start..end],
            mtime: mtime.to_string(),
        }))
    }
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
