//! Archive extraction, dispatched on the file extension.
//!
//! Entry paths are stripped of the configured prefix, lexically cleaned and
//! rejected if they would land outside the destination. Symlink entries are
//! allowed but their targets must stay inside the destination as well. The
//! destination directory is cleared before extraction so a previous partial
//! attempt cannot leak stray files into the result.

use crate::FetchError;
use bzlmod_common::paths::clean_entry;
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub fn extract(archive: &Path, dest: &Path, strip_prefix: &str) -> Result<(), FetchError> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_owned();
    extract_as(archive, &name, dest, strip_prefix)
}

/// Like [`extract`], but with an explicit archive name deciding the
/// format. Downloads land in cache files named by URL hash, so the format
/// has to come from the URL rather than the on-disk name.
pub fn extract_as(
    archive: &Path,
    name: &str,
    dest: &Path,
    strip_prefix: &str,
) -> Result<(), FetchError> {
    if name.ends_with(".zip") {
        extract_zip(archive, dest, strip_prefix)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive, dest, strip_prefix)
    } else {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(name);
        Err(FetchError::UnsupportedArchive(format!(".{ext}")))
    }
}

fn extract_zip(archive: &Path, dest: &Path, strip_prefix: &str) -> Result<(), FetchError> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| FetchError::BadArchive(e.to_string()))?;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| FetchError::BadArchive(e.to_string()))?;
        let raw_name = entry.name().to_owned();
        let is_dir = raw_name.ends_with('/');

        let Some(rel) = entry_rel_path(&raw_name, strip_prefix)? else {
            continue; // the prefix directory itself
        };

        if is_dir {
            fs::create_dir_all(dest.join(&rel))?;
            continue;
        }

        let mode = entry.unix_mode();
        if is_symlink_mode(mode) {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| FetchError::BadArchive(e.to_string()))?;
            write_symlink(dest, &rel, &target, &raw_name)?;
            continue;
        }

        let out_path = dest.join(&rel);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        set_executable_bit(&out_path, mode)?;
    }
    Ok(())
}

fn extract_tar_gz(archive: &Path, dest: &Path, strip_prefix: &str) -> Result<(), FetchError> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let file = fs::File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    for entry in tar.entries().map_err(|e| FetchError::BadArchive(e.to_string()))? {
        let mut entry = entry.map_err(|e| FetchError::BadArchive(e.to_string()))?;
        let raw_name = entry
            .path()
            .map_err(|e| FetchError::BadArchive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        let Some(rel) = entry_rel_path(&raw_name, strip_prefix)? else {
            continue;
        };

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(dest.join(&rel))?;
        } else if kind.is_symlink() {
            let target = entry
                .link_name()
                .map_err(|e| FetchError::BadArchive(e.to_string()))?
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            write_symlink(dest, &rel, &target, &raw_name)?;
        } else if kind.is_file() {
            let out_path = dest.join(&rel);
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;
            set_executable_bit(&out_path, entry.header().mode().ok())?;
        }
        // Other entry kinds (devices, fifos) are not meaningful in module
        // archives and are skipped.
    }
    Ok(())
}

/// Strips the prefix and cleans the entry name. `Ok(None)` means the entry
/// is the prefix directory itself and carries no content.
fn entry_rel_path(raw_name: &str, strip_prefix: &str) -> Result<Option<PathBuf>, FetchError> {
    let stripped = raw_name.strip_prefix(strip_prefix).unwrap_or(raw_name);
    let trimmed = stripped.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(None);
    }
    match clean_entry(trimmed) {
        Some(rel) => Ok(Some(rel)),
        None => Err(FetchError::UnsafeArchivePath(raw_name.to_owned())),
    }
}

/// Creates a symlink entry after checking that its target stays inside the
/// destination.
fn write_symlink(dest: &Path, rel: &Path, target: &str, raw_name: &str) -> Result<(), FetchError> {
    if Path::new(target).is_absolute() {
        return Err(FetchError::UnsafeArchivePath(raw_name.to_owned()));
    }
    let parent_rel = rel.parent().unwrap_or(Path::new(""));
    let resolved = format!("{}/{target}", parent_rel.display());
    if clean_entry(resolved.trim_start_matches('/')).is_none() {
        return Err(FetchError::UnsafeArchivePath(raw_name.to_owned()));
    }

    let link_path = dest.join(rel);
    if let Some(parent) = link_path.parent() {
        fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, &link_path)?;
    #[cfg(not(unix))]
    fs::write(&link_path, target)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable_bit(path: &Path, mode: Option<u32>) -> Result<(), FetchError> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        if mode & 0o111 != 0 {
            fs::set_permissions(path, fs::Permissions::from_mode(0o775))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_executable_bit(_path: &Path, _mode: Option<u32>) -> Result<(), FetchError> {
    Ok(())
}

fn is_symlink_mode(mode: Option<u32>) -> bool {
    matches!(mode, Some(m) if m & 0o170000 == 0o120000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzlmod_testutil::build_zip_archive;

    fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn zip_extraction() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = build_zip_archive(&[("file1", b"file1contents"), ("dir/file2", b"file2contents")]);
        let archive = write_archive(tmp.path(), "a.zip", &bytes);
        let dest = tmp.path().join("out");

        extract(&archive, &dest, "").unwrap();
        assert_eq!(fs::read(dest.join("file1")).unwrap(), b"file1contents");
        assert_eq!(fs::read(dest.join("dir/file2")).unwrap(), b"file2contents");
    }

    #[test]
    fn zip_strip_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = build_zip_archive(&[
            ("mymod-1.0/MODULE.bazel", b"module()"),
            ("mymod-1.0/src/lib", b"lib"),
        ]);
        let archive = write_archive(tmp.path(), "a.zip", &bytes);
        let dest = tmp.path().join("out");

        extract(&archive, &dest, "mymod-1.0").unwrap();
        assert_eq!(fs::read(dest.join("MODULE.bazel")).unwrap(), b"module()");
        assert_eq!(fs::read(dest.join("src/lib")).unwrap(), b"lib");
    }

    #[test]
    fn destination_is_cleared_first() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = build_zip_archive(&[("file1", b"new")]);
        let archive = write_archive(tmp.path(), "a.zip", &bytes);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale"), b"old").unwrap();

        extract(&archive, &dest, "").unwrap();
        assert!(!dest.join("stale").exists());
        assert!(dest.join("file1").exists());
    }

    #[test]
    fn escaping_entries_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = build_zip_archive(&[("../evil", b"boom")]);
        let archive = write_archive(tmp.path(), "a.zip", &bytes);
        let dest = tmp.path().join("out");

        let err = extract(&archive, &dest, "").unwrap_err();
        assert!(matches!(err, FetchError::UnsafeArchivePath(_)));
    }

    #[test]
    fn unsupported_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = write_archive(tmp.path(), "a.rar", b"junk");
        let err = extract(&archive, &tmp.path().join("out"), "").unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedArchive(_)));
    }

    #[test]
    fn tar_gz_extraction() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let tmp = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "pkg/data.txt", &b"hello"[..])
            .unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        let archive = write_archive(tmp.path(), "a.tar.gz", &bytes);
        let dest = tmp.path().join("out");

        extract(&archive, &dest, "pkg").unwrap();
        assert_eq!(fs::read(dest.join("data.txt")).unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn executable_bit_is_preserved() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file("tool", options).unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let archive = write_archive(tmp.path(), "a.zip", &bytes);
        let dest = tmp.path().join("out");

        extract(&archive, &dest, "").unwrap();
        let mode = fs::metadata(dest.join("tool")).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }
}
