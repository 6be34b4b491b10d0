//! Archive transport: files plus a manifest of their metadata in one zip.
//!
//! The manifest travels as the reserved [`MANIFEST_ENTRY`]. Unpacking
//! refuses an archive without it and never writes it out.

use std::collections::BTreeMap;
use std::fs::{self, FileTimes};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::io::files::relative_to_root;

pub const MANIFEST_ENTRY: &str = ".__manifest__";

/// Metadata preserved for one transported file. Times are seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub mode: u32,
    pub mtime: f64,
    pub atime: f64,
}

/// Relative path (with `/` separators) to preserved metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportManifest {
    entries: BTreeMap<String, FileMetadata>,
}

impl TransportManifest {
    /// Record metadata for `files`, each relative to `root`.
    pub fn capture(root: &Path, files: &[PathBuf]) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for file in files {
            let path = root.join(file);
            let metadata =
                fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?;
            entries.insert(
                entry_name(file),
                FileMetadata {
                    mode: mode_of(&metadata),
                    mtime: to_seconds(metadata.modified().context("read mtime")?),
                    atime: to_seconds(metadata.accessed().context("read atime")?),
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&FileMetadata> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Apply the recorded times and modes to files under `dir`.
    pub fn restore(&self, dir: &Path) -> Result<()> {
        for (name, meta) in &self.entries {
            let path = dir.join(name);
            // Times first: the recorded mode may forbid opening for write.
            let file = fs::File::options()
                .write(true)
                .open(&path)
                .with_context(|| format!("open {} to restore times", path.display()))?;
            file.set_times(
                FileTimes::new()
                    .set_modified(from_seconds(meta.mtime))
                    .set_accessed(from_seconds(meta.atime)),
            )
            .with_context(|| format!("restore times of {}", path.display()))?;
            drop(file);
            set_mode(&path, meta.mode)?;
        }
        Ok(())
    }
}

/// Archive name for a relative path.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn to_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}

fn from_seconds(seconds: f64) -> SystemTime {
    if seconds >= 0.0 {
        UNIX_EPOCH + Duration::from_secs_f64(seconds)
    } else {
        UNIX_EPOCH - Duration::from_secs_f64(-seconds)
    }
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("restore mode of {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut permissions = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("restore mode of {}", path.display()))
}

/// Zip `files` (relative to `root`) together with their manifest.
#[instrument(skip_all, fields(root = %root.display(), files = files.len()))]
pub fn pack_files(root: &Path, files: &[PathBuf]) -> Result<Vec<u8>> {
    let relative: Vec<PathBuf> = files
        .iter()
        .map(|file| relative_to_root(root, file))
        .collect::<Result<_>>()?;
    let manifest = TransportManifest::capture(root, &relative)?;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for file in &relative {
        let name = entry_name(file);
        if name == MANIFEST_ENTRY {
            bail!("{MANIFEST_ENTRY} is reserved for the transport manifest");
        }
        let contents =
            fs::read(root.join(file)).with_context(|| format!("read {}", file.display()))?;
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("add {name} to archive"))?;
        writer
            .write_all(&contents)
            .with_context(|| format!("write {name} to archive"))?;
    }
    writer
        .start_file(MANIFEST_ENTRY, options)
        .context("add manifest to archive")?;
    writer
        .write_all(&serde_json::to_vec(&manifest).context("serialize manifest")?)
        .context("write manifest to archive")?;
    let bytes = writer.finish().context("finish archive")?.into_inner();
    debug!(bytes = bytes.len(), "archive packed");
    Ok(bytes)
}

/// Extract an archive made by [`pack_files`] into `dir` and restore metadata.
///
/// Returns the extracted paths relative to `dir`, excluding the manifest.
#[instrument(skip_all, fields(dir = %dir.display(), bytes = bytes.len()))]
pub fn unpack_files(bytes: &[u8], dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("open archive")?;
    let manifest: TransportManifest = {
        let mut entry = match archive.by_name(MANIFEST_ENTRY) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                bail!("archive has no {MANIFEST_ENTRY}; transfer is incomplete or corrupt")
            }
            Err(e) => return Err(e).context("read manifest entry"),
        };
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw).context("read manifest")?;
        serde_json::from_slice(&raw).context("parse manifest")?
    };

    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("read archive entry {index}"))?;
        if entry.name() == MANIFEST_ENTRY {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            bail!("archive entry {} escapes the target directory", entry.name());
        };
        let target = dir.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create directory {}", target.display()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .with_context(|| format!("extract {}", entry.name()))?;
        fs::write(&target, contents).with_context(|| format!("write {}", target.display()))?;
        extracted.push(relative);
    }

    let names: Vec<String> = extracted.iter().map(|p| entry_name(p)).collect();
    if let Some(missing) = manifest.names().find(|name| !names.iter().any(|n| n == name)) {
        bail!("manifest lists {missing} but the archive does not contain it");
    }
    manifest.restore(dir)?;
    debug!(files = extracted.len(), "archive unpacked");
    Ok(extracted)
}
