//! Streaming archive extraction
//!
//! Entries are streamed straight from the (possibly decompressing) reader into
//! the destination; the archive is never buffered whole. Recorded Unix modes
//! are collected during extraction and reapplied at the end with `chmod`, one
//! invocation per distinct mode.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{ArchiveError, Result};
use crate::format::{ArchiveFormat, ArchiveKind, Compression};

/// Entry filter: receives the entry path relative to the destination and
/// returns `false` to skip it
pub type PathFilter<'a> = &'a dyn Fn(&Path) -> bool;

/// Counts reported after a successful extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files: usize,
    pub directories: usize,
    pub links: usize,
    pub skipped: usize,
}

/// Extracts tar/zip/ar/cpio archives with optional compression
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    cancel: Option<Arc<AtomicBool>>,
}

impl ArchiveExtractor {
    /// Create a new extractor
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop with [`ArchiveError::Cancelled`] before the next entry once
    /// `flag` is set
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Extract `archive` into `destination`
    ///
    /// Partial output is not rolled back on failure; discard the whole
    /// destination instead.
    pub fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        filter: Option<PathFilter<'_>>,
    ) -> Result<ExtractionSummary> {
        let format = ArchiveFormat::from_path(archive)?;
        match fs::metadata(archive) {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(ArchiveError::NotAFile {
                    path: archive.to_path_buf(),
                })
            }
        }
        fs::create_dir_all(destination)?;

        debug!(
            archive = %archive.display(),
            destination = %destination.display(),
            %format,
            "Extracting archive"
        );

        let mut sink = Sink::new(destination, filter, self.cancel.as_deref());
        let file = File::open(archive)?;
        match format.kind {
            ArchiveKind::Zip => extract_zip(file, &mut sink)?,
            ArchiveKind::Tar => extract_tar(decompress(file, format.compression), &mut sink)?,
            ArchiveKind::Ar => extract_ar(decompress(file, format.compression), &mut sink)?,
            ArchiveKind::Cpio => extract_cpio(decompress(file, format.compression), &mut sink)?,
        }
        sink.restore_permissions()?;

        debug!(summary = ?sink.summary, "Archive extracted");
        Ok(sink.summary)
    }
}

fn decompress(file: File, compression: Compression) -> Box<dyn Read> {
    let reader = BufReader::new(file);
    match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
    }
}

fn extract_tar(reader: Box<dyn Read>, sink: &mut Sink<'_>) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.into_owned();
        let mode = entry.header().mode().ok();
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            sink.directory(&name, mode)?;
        } else if kind.is_file() {
            sink.file(&name, &mut entry, mode)?;
        } else if kind.is_symlink() || kind.is_hard_link() {
            if let Some(target) = sink.accept(&name)? {
                create_parent(&target)?;
                // unpack_in validates the link against the destination root
                entry.unpack_in(sink.destination)?;
                sink.summary.links += 1;
            }
        } else {
            trace!(entry = %name.display(), ?kind, "Ignoring tar entry");
        }
    }
    Ok(())
}

fn extract_zip(file: File, sink: &mut Sink<'_>) -> Result<()> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_error)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_error)?;
        let name = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| ArchiveError::UnsafeEntry {
                name: entry.name().to_string(),
            })?;
        let mode = entry.unix_mode();

        if entry.is_dir() {
            sink.directory(&name, mode)?;
        } else {
            sink.file(&name, &mut entry, mode)?;
        }
    }
    Ok(())
}

fn zip_error(e: zip::result::ZipError) -> ArchiveError {
    ArchiveError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
}

fn extract_ar(reader: Box<dyn Read>, sink: &mut Sink<'_>) -> Result<()> {
    let mut archive = ar::Archive::new(reader);
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        let identifier = String::from_utf8_lossy(entry.header().identifier())
            .trim_end_matches('/')
            .to_string();
        if identifier.is_empty() {
            continue;
        }
        let mode = entry.header().mode();
        sink.file(Path::new(&identifier), &mut entry, Some(mode))?;
    }
    Ok(())
}

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

fn extract_cpio(mut reader: Box<dyn Read>, sink: &mut Sink<'_>) -> Result<()> {
    loop {
        let mut entry = cpio::NewcReader::new(reader)?;
        if entry.entry().is_trailer() {
            break;
        }
        let name = PathBuf::from(entry.entry().name());
        let mode = entry.entry().mode();

        match mode & S_IFMT {
            S_IFDIR => sink.directory(&name, Some(mode))?,
            S_IFREG => sink.file(&name, &mut entry, Some(mode))?,
            S_IFLNK => {
                let mut link_target = String::new();
                entry.read_to_string(&mut link_target)?;
                sink.symlink(&name, Path::new(&link_target))?;
            }
            _ => {
                trace!(entry = %name.display(), mode, "Ignoring cpio entry");
                sink.summary.skipped += 1;
            }
        }
        reader = entry.finish()?;
    }
    Ok(())
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Destination writer shared by all container formats
struct Sink<'a> {
    destination: &'a Path,
    filter: Option<PathFilter<'a>>,
    cancel: Option<&'a AtomicBool>,
    modes: BTreeMap<u32, Vec<PathBuf>>,
    summary: ExtractionSummary,
}

impl<'a> Sink<'a> {
    fn new(
        destination: &'a Path,
        filter: Option<PathFilter<'a>>,
        cancel: Option<&'a AtomicBool>,
    ) -> Self {
        Self {
            destination,
            filter,
            cancel,
            modes: BTreeMap::new(),
            summary: ExtractionSummary::default(),
        }
    }

    /// Map an entry name to its target path, or `None` if filtered out
    fn accept(&mut self, name: &Path) -> Result<Option<PathBuf>> {
        if self.cancel.map_or(false, |flag| flag.load(Ordering::Acquire)) {
            return Err(ArchiveError::Cancelled);
        }
        let relative = sanitize(name)?;
        if relative.as_os_str().is_empty() {
            return Ok(None);
        }
        if let Some(filter) = self.filter {
            if !filter(&relative) {
                self.summary.skipped += 1;
                return Ok(None);
            }
        }
        Ok(Some(self.destination.join(relative)))
    }

    fn directory(&mut self, name: &Path, mode: Option<u32>) -> Result<()> {
        if let Some(target) = self.accept(name)? {
            fs::create_dir_all(&target)?;
            self.record_mode(target, mode);
            self.summary.directories += 1;
        }
        Ok(())
    }

    fn file(&mut self, name: &Path, contents: &mut dyn Read, mode: Option<u32>) -> Result<()> {
        if let Some(target) = self.accept(name)? {
            create_parent(&target)?;
            let mut out = File::create(&target)?;
            io::copy(contents, &mut out)?;
            self.record_mode(target, mode);
            self.summary.files += 1;
        }
        Ok(())
    }

    fn symlink(&mut self, name: &Path, link_target: &Path) -> Result<()> {
        if let Some(target) = self.accept(name)? {
            create_parent(&target)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(link_target, &target)?;
            #[cfg(not(unix))]
            trace!(link = %target.display(), to = %link_target.display(), "Skipping symlink");
            self.summary.links += 1;
        }
        Ok(())
    }

    fn record_mode(&mut self, path: PathBuf, mode: Option<u32>) {
        if let Some(mode) = mode.map(|m| m & 0o777).filter(|m| *m != 0) {
            self.modes.entry(mode).or_default().push(path);
        }
    }

    #[cfg(not(windows))]
    fn restore_permissions(&mut self) -> Result<()> {
        use std::process::Command;

        const PATHS_PER_INVOCATION: usize = 256;

        for (mode, paths) in std::mem::take(&mut self.modes) {
            for chunk in paths.chunks(PATHS_PER_INVOCATION) {
                let status = Command::new("chmod")
                    .arg(format!("{:o}", mode))
                    .args(chunk)
                    .status()
                    .map_err(|e| ArchiveError::Permissions(format!("failed to run chmod: {}", e)))?;
                if !status.success() {
                    return Err(ArchiveError::Permissions(format!(
                        "chmod {:o} exited with {}",
                        mode, status
                    )));
                }
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    fn restore_permissions(&mut self) -> Result<()> {
        self.modes.clear();
        Ok(())
    }
}

/// Strip `./` and reject absolute or parent-relative entry names
fn sanitize(name: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafeEntry {
                    name: name.display().to_string(),
                })
            }
        }
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(Path::new("./bin/cassandra")).unwrap(), PathBuf::from("bin/cassandra"));
        assert!(sanitize(Path::new("../etc/passwd")).is_err());
        assert!(sanitize(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_unsupported_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("dist.rar");
        fs::write(&archive, b"not an archive").unwrap();

        let result = ArchiveExtractor::new().extract(&archive, &temp_dir.path().join("out"), None);
        assert!(matches!(result, Err(ArchiveError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let result = ArchiveExtractor::new().extract(
            &temp_dir.path().join("missing.tar.gz"),
            &temp_dir.path().join("out"),
            None,
        );
        assert!(matches!(result, Err(ArchiveError::NotAFile { .. })));
    }

    #[test]
    fn test_cancelled_extraction_stops_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("dist.tar");
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        for name in ["bin/cassandra", "conf/cassandra.yaml"] {
            let mut header = tar::Header::new_gnu();
            header.set_size(2);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, &b"ok"[..]).unwrap();
        }
        builder.finish().unwrap();
        drop(builder);

        let flag = Arc::new(AtomicBool::new(true));
        let out = temp_dir.path().join("out");
        let result = ArchiveExtractor::new()
            .with_cancel(Arc::clone(&flag))
            .extract(&archive, &out, None);

        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(!out.join("bin/cassandra").exists());

        flag.store(false, Ordering::Release);
        let summary = ArchiveExtractor::new()
            .with_cancel(flag)
            .extract(&archive, &out, None)
            .unwrap();
        assert_eq!(summary.files, 2);
    }

    #[test]
    fn test_corrupt_archive_is_io_failure() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("dist.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let result = ArchiveExtractor::new().extract(&archive, &temp_dir.path().join("out"), None);
        assert!(matches!(result, Err(ArchiveError::Io(_))));
    }
}
