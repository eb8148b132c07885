//! Deterministic layer archives.
//!
//! Turns a directory tree into a gzip-compressed tar blob rooted at a fixed
//! destination path inside the image. The output is byte-identical across
//! runs on identical input: every header carries fixed permission bits,
//! zeroed timestamps and ownership, and the walk order is lexical.

use crate::error::{NodekoError, Result};
use crate::types::LayerBlob;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};
use walkdir::WalkDir;

/// Fixed mode for every archive entry, so the output is not sensitive to the
/// umask or the permissions the sources happen to carry. The same bits are
/// used for directories and files.
const LAYER_MODE: u32 = 0o555;

/// Media type new layers are published under.
pub const LAYER_MEDIA_TYPE: &str = oci_distribution::manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE;

/// A compressed layer tarball plus the digest of its uncompressed stream.
#[derive(Debug, Clone)]
pub struct LayerTarball {
    /// The gzip-compressed tar bytes.
    pub data: Vec<u8>,

    /// sha256 of the uncompressed tar stream (the layer's diff-id).
    pub diff_id: String,
}

impl LayerTarball {
    /// View this tarball as a registry blob.
    pub fn into_blob(self) -> LayerBlob {
        LayerBlob { media_type: LAYER_MEDIA_TYPE.to_string(), data: self.data }
    }
}

/// Archive `source_dir` into a layer rooted at the absolute path `dest_root`.
///
/// Directory headers for every ancestor of `dest_root` come first, parent
/// before child, then `dest_root` itself, then the files of the tree in
/// lexical order. Directories below the root are implied by the file paths
/// and get no headers of their own. Symlinks are flattened: the layer
/// carries the referenced file's content under a regular-file header.
///
/// Any filesystem error aborts the archive; no partial layer is produced.
pub fn archive_dir(source_dir: &Path, dest_root: &str) -> Result<LayerTarball> {
    let meta = fs::metadata(source_dir)
        .map_err(|e| NodekoError::IoError { path: source_dir.to_path_buf(), source: e })?;
    if !meta.is_dir() {
        return Err(NodekoError::ArchiveFailed {
            path: source_dir.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let mut tar = new_layer_writer();
    let root = append_root_chain(&mut tar, dest_root)?;

    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .sort_by(|a, b| a.path().cmp(b.path()));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source_dir.to_path_buf());
            NodekoError::IoError { path, source: e.into() }
        })?;

        // Directory presence below the root is implied by the file paths.
        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();

        // Chase symlinks: a broken target or a link cycle surfaces here.
        let meta = fs::metadata(path)
            .map_err(|e| NodekoError::IoError { path: path.to_path_buf(), source: e })?;
        if meta.is_dir() {
            return Err(NodekoError::ArchiveFailed {
                path: path.to_path_buf(),
                reason: "symlink resolves to a directory".to_string(),
            });
        }
        if !meta.is_file() {
            return Err(NodekoError::ArchiveFailed {
                path: path.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        let rel = path.strip_prefix(source_dir).map_err(|_| NodekoError::ArchiveFailed {
            path: path.to_path_buf(),
            reason: "path escapes the source directory".to_string(),
        })?;
        let dest = root.join(rel);

        let file = File::open(path)
            .map_err(|e| NodekoError::IoError { path: path.to_path_buf(), source: e })?;
        let mut header = entry_header(EntryType::Regular, meta.len());
        tar.append_data(&mut header, &dest, file)
            .map_err(|e| NodekoError::IoError { path: path.to_path_buf(), source: e })?;
    }

    finish(tar)
}

/// Archive just the destination root's directory chain, with no files.
///
/// Used for the data layer when the source unit has no static-data
/// directory: the mount point still exists in the image and the output
/// stays deterministic.
pub fn archive_empty(dest_root: &str) -> Result<LayerTarball> {
    let mut tar = new_layer_writer();
    append_root_chain(&mut tar, dest_root)?;
    finish(tar)
}

type LayerWriter = tar::Builder<HashingWriter<GzEncoder<Vec<u8>>>>;

fn new_layer_writer() -> LayerWriter {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    tar::Builder::new(HashingWriter::new(encoder))
}

/// Emit directory headers for every ancestor of `dest_root` and for the root
/// itself, parent before child. Returns the root as a relative path, the
/// form layer entries are named in (`var/run/ko`, not `/var/run/ko`).
fn append_root_chain(tar: &mut LayerWriter, dest_root: &str) -> Result<PathBuf> {
    let trimmed = dest_root.trim_matches('/');
    let mut prefix = String::new();
    for part in trimmed.split('/').filter(|p| !p.is_empty()) {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        let mut header = entry_header(EntryType::Directory, 0);
        tar.append_data(&mut header, &prefix, io::empty()).map_err(|e| {
            NodekoError::Internal(format!("failed to write directory header {}: {}", prefix, e))
        })?;
    }
    Ok(PathBuf::from(trimmed))
}

fn entry_header(entry_type: EntryType, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(LAYER_MODE);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn finish(tar: LayerWriter) -> Result<LayerTarball> {
    let writer = tar
        .into_inner()
        .map_err(|e| NodekoError::Internal(format!("failed to finalize layer archive: {}", e)))?;
    let (encoder, hasher) = writer.into_parts();
    let data = encoder
        .finish()
        .map_err(|e| NodekoError::Internal(format!("failed to compress layer archive: {}", e)))?;
    Ok(LayerTarball { data, diff_id: format!("sha256:{:x}", hasher.finalize()) })
}

/// Tees everything written through it into a sha256 hasher. Sits between
/// the tar writer and the gzip encoder so the digest covers the
/// uncompressed stream.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, hasher: Sha256::new() }
    }

    fn into_parts(self) -> (W, Sha256) {
        (self.inner, self.hasher)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
