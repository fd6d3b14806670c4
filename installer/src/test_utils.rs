//! Shared test utilities for the installer crate.
//!
//! Archive builders produce in-memory `.tar`, `.tar.gz`, `.tar.zst`, and
//! `.zip` payloads, including deliberately hostile ones whose entry names
//! the `tar` builder would normally refuse.

use crate::descriptor::{Descriptor, InstallTarget};
use crate::digest::{DigestAlgorithm, to_hex};
use std::io::{Cursor, Write};

/// Mode for executable entries.
pub const EXECUTABLE: u32 = 0o755;
/// Mode for plain data entries.
pub const REGULAR: u32 = 0o644;

/// A regular file to place in a test archive.
#[derive(Debug, Clone, Copy)]
pub struct FileEntry<'a> {
    /// Archive-relative path.
    pub path: &'a str,
    /// File contents.
    pub contents: &'a [u8],
    /// Unix permission bits.
    pub mode: u32,
}

impl<'a> FileEntry<'a> {
    /// Create an entry with an explicit mode.
    #[must_use]
    pub fn new(path: &'a str, contents: &'a [u8], mode: u32) -> Self {
        Self {
            path,
            contents,
            mode,
        }
    }

    /// Create an executable entry.
    #[must_use]
    pub fn executable(path: &'a str, contents: &'a [u8]) -> Self {
        Self::new(path, contents, EXECUTABLE)
    }
}

fn file_header(entry: &FileEntry<'_>) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_size(entry.contents.len() as u64);
    header.set_mode(entry.mode);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header
}

/// Build an uncompressed tar archive holding `entries`.
#[must_use]
pub fn tar_bytes(entries: &[FileEntry<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        let mut header = file_header(entry);
        builder
            .append_data(&mut header, entry.path, entry.contents)
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar")
}

/// Build a gzip-compressed tar archive holding `entries`.
#[must_use]
pub fn tar_gz_bytes(entries: &[FileEntry<'_>]) -> Vec<u8> {
    gzip(&tar_bytes(entries))
}

/// Build a zstd-compressed tar archive holding `entries`.
#[must_use]
pub fn tar_zst_bytes(entries: &[FileEntry<'_>]) -> Vec<u8> {
    zstd::stream::encode_all(Cursor::new(tar_bytes(entries)), 0).expect("zstd encode")
}

/// Gzip-compress `bytes`.
#[must_use]
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Build a tar archive with one regular entry whose name is written
/// verbatim into the header, bypassing the builder's path checks.
///
/// Used to produce entries such as `../../etc/passwd` or `/etc/passwd`.
#[must_use]
pub fn tar_with_raw_name(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_old();
    {
        let raw = &mut header.as_old_mut().name;
        let bytes = name.as_bytes();
        assert!(bytes.len() < raw.len(), "raw tar name too long");
        raw[..bytes.len()].copy_from_slice(bytes);
    }
    header.set_size(contents.len() as u64);
    header.set_mode(REGULAR);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, contents).expect("append raw entry");
    builder.into_inner().expect("finish tar")
}

/// Build a tar archive holding `file` followed by a link at `path`
/// pointing at `target`, written verbatim so absolute and `..` targets
/// survive.
#[must_use]
pub fn tar_with_link(
    file: FileEntry<'_>,
    path: &str,
    target: &str,
    kind: tar::EntryType,
) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = file_header(&file);
    builder
        .append_data(&mut header, file.path, file.contents)
        .expect("append file");

    let mut link = tar::Header::new_gnu();
    link.set_entry_type(kind);
    link.set_size(0);
    link.set_mode(0o777);
    link.set_mtime(0);
    {
        let raw = &mut link.as_old_mut().linkname;
        let bytes = target.as_bytes();
        assert!(bytes.len() < raw.len(), "raw link target too long");
        raw[..bytes.len()].copy_from_slice(bytes);
    }
    builder
        .append_data(&mut link, path, std::io::empty())
        .expect("append link");
    builder.into_inner().expect("finish tar")
}

/// Build a tar archive holding only directories.
#[must_use]
pub fn tar_with_only_directories(paths: &[&str]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for path in paths {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(EXECUTABLE);
        header.set_mtime(0);
        builder
            .append_data(&mut header, path, std::io::empty())
            .expect("append directory");
    }
    builder.into_inner().expect("finish tar")
}

/// Build a zip archive holding `entries` with their Unix modes.
#[must_use]
pub fn zip_bytes(entries: &[FileEntry<'_>]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        let options = zip::write::SimpleFileOptions::default().unix_permissions(entry.mode);
        writer
            .start_file(entry.path, options)
            .expect("start zip entry");
        writer.write_all(entry.contents).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Build a zip archive holding a single symlink.
#[must_use]
pub fn zip_with_symlink(path: &str, target: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .add_symlink(path, target, zip::write::SimpleFileOptions::default())
        .expect("add zip symlink");
    writer.finish().expect("finish zip").into_inner()
}

/// Deterministic incompressible bytes for truncation tests.
#[must_use]
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state.to_le_bytes()[0]
        })
        .collect()
}

/// Return the SHA-256 digest of `bytes` as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&DigestAlgorithm::Sha256.compute(bytes))
}

/// A descriptor for a `tool` release served from `base_url`, expecting
/// `archive` and installing `tool` to `/usr/local/bin/tool`.
#[must_use]
pub fn tool_descriptor(base_url: &str, archive: &[u8]) -> Descriptor {
    let mut descriptor = Descriptor::new(
        "tool",
        format!("{base_url}/releases/vVERSION/tool.tar.gz"),
        "1.0.0",
        sha256_hex(archive),
        vec![InstallTarget::new("tool", "/usr/local/bin/tool")],
    );
    descriptor.placeholder = "VERSION".to_owned();
    descriptor
}
