// ─── Archive extraction ───
// Suffix-sniffed zip / tar / tar.gz / tar.xz extraction that refuses to write outside
// the destination and stops on cancellation.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xz2::read::XzDecoder;

use crate::core::error::{ModuleError, ModuleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarXz,
}

impl ArchiveKind {
    /// Detects the format from the file name suffix alone.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(ArchiveKind::TarXz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// What an extraction wrote and what it refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: usize,
    pub dirs: usize,
    /// Entry names rejected as unsafe or unsupported.
    pub skipped: Vec<String>,
}

/// Validates an archive entry name and turns it into a relative path.
///
/// Absolute paths, drive-letter paths and any `..` segment are rejected. `None` is
/// also returned for names that reduce to nothing (`./`).
pub fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return None;
    }

    let mut relative = PathBuf::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            part => relative.push(part),
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// True when `name` is exactly one plain path segment: no separators, no `.`/`..`,
/// no drive prefix. Used for folder and dependency names that become directories.
pub fn is_single_segment(name: &str) -> bool {
    match sanitize_entry_path(name) {
        Some(path) => path.components().count() == 1 && path.as_os_str() == name,
        None => false,
    }
}

/// Reader that fails as soon as the token is cancelled, tearing down every stage of
/// the decompression pipeline stacked on top of it.
struct CancelReader<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R: Read> Read for CancelReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.is_cancelled() {
            // Not `Interrupted`: `io::copy` would retry that.
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "extraction cancelled",
            ));
        }
        self.inner.read(buf)
    }
}

/// Extracts `archive` into `dest` on the blocking pool.
pub async fn extract_archive(
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> ModuleResult<ExtractReport> {
    if cancel.is_cancelled() {
        return Err(ModuleError::Cancelled);
    }
    let kind = ArchiveKind::from_path(archive)
        .ok_or_else(|| ModuleError::UnsupportedArchive(archive.to_path_buf()))?;

    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let token = cancel.clone();
    let report = tokio::task::spawn_blocking(move || extract_blocking(kind, &archive, &dest, &token))
        .await
        .map_err(|e| ModuleError::Other(format!("Task join error: {e}")))??;

    info!(
        "Extracted {} files, {} dirs ({} skipped)",
        report.files,
        report.dirs,
        report.skipped.len()
    );
    Ok(report)
}

/// Synchronous extraction. All handles are owned by this call and closed on return.
pub fn extract_blocking(
    kind: ArchiveKind,
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> ModuleResult<ExtractReport> {
    std::fs::create_dir_all(dest).map_err(|source| ModuleError::io(dest, source))?;
    let file = File::open(archive).map_err(|source| ModuleError::io(archive, source))?;

    let result = match kind {
        ArchiveKind::Zip => extract_zip(file, dest, cancel),
        ArchiveKind::Tar => extract_tar(BufReader::new(file), dest, cancel),
        ArchiveKind::TarGz => extract_tar(GzDecoder::new(BufReader::new(file)), dest, cancel),
        ArchiveKind::TarXz => extract_tar(XzDecoder::new(BufReader::new(file)), dest, cancel),
    };

    match result {
        Err(_) if cancel.is_cancelled() => Err(ModuleError::Cancelled),
        other => other,
    }
}

fn extract_zip(file: File, dest: &Path, cancel: &CancellationToken) -> ModuleResult<ExtractReport> {
    let mut archive = zip::ZipArchive::new(file)?;
    let mut report = ExtractReport::default();

    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let mut zipped = archive.by_index(index)?;
        let name = zipped.name().to_string();
        let Some(relative) = sanitize_entry_path(&name) else {
            reject(&mut report, &name);
            continue;
        };
        let out_path = dest.join(relative);

        if zipped.is_dir() {
            create_dir(&out_path)?;
            report.dirs += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            create_dir(parent)?;
        }
        let mut out = File::create(&out_path).map_err(|source| ModuleError::io(&out_path, source))?;
        let mut reader = CancelReader {
            inner: &mut zipped,
            cancel: cancel.clone(),
        };
        std::io::copy(&mut reader, &mut out).map_err(|source| ModuleError::io(&out_path, source))?;
        drop(out);

        #[cfg(unix)]
        {
            if let Some(mode) = zipped.unix_mode() {
                apply_mode(&out_path, mode);
            }
        }
        report.files += 1;
    }

    Ok(report)
}

fn extract_tar<R: Read>(
    reader: R,
    dest: &Path,
    cancel: &CancellationToken,
) -> ModuleResult<ExtractReport> {
    let mut archive = tar::Archive::new(CancelReader {
        inner: reader,
        cancel: cancel.clone(),
    });
    let mut report = ExtractReport::default();

    let entries = archive
        .entries()
        .map_err(|source| ModuleError::io(dest, source))?;
    for entry in entries {
        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let mut entry = entry.map_err(|source| ModuleError::io(dest, source))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).to_string();
        let Some(relative) = sanitize_entry_path(&name) else {
            reject(&mut report, &name);
            continue;
        };
        let out_path = dest.join(relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            create_dir(&out_path)?;
            report.dirs += 1;
            continue;
        }
        if !entry_type.is_file() {
            debug!("Skipping non-regular tar entry {} ({:?})", name, entry_type);
            report.skipped.push(name);
            continue;
        }

        if let Some(parent) = out_path.parent() {
            create_dir(parent)?;
        }
        let mut out = File::create(&out_path).map_err(|source| ModuleError::io(&out_path, source))?;
        std::io::copy(&mut entry, &mut out).map_err(|source| ModuleError::io(&out_path, source))?;
        drop(out);

        #[cfg(unix)]
        {
            if let Ok(mode) = entry.header().mode() {
                apply_mode(&out_path, mode);
            }
        }
        report.files += 1;
    }

    Ok(report)
}

fn reject(report: &mut ExtractReport, name: &str) {
    let trimmed = name.trim_matches(|c| c == '/' || c == '.');
    if !trimmed.is_empty() || name.contains("..") {
        warn!("Rejected unsafe archive entry {:?}", name);
        report.skipped.push(name.to_string());
    }
}

fn create_dir(path: &Path) -> ModuleResult<()> {
    std::fs::create_dir_all(path).map_err(|source| ModuleError::io(path, source))
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    // Keep the owner able to read and write what it extracted.
    let mode = (mode & 0o7777) | 0o600;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        debug!("Could not set mode {:o} on {:?}: {}", mode, path, e);
    }
}
