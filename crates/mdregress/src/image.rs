//! Metadata image discovery.
//!
//! A metadata image is either a raw ECMA-335 metadata blob (starting with the
//! `BSJB` signature) or a PE file whose CLI header points at one. In both
//! cases the sessions are opened over the metadata bytes only.

use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// `BSJB`, little-endian.
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
/// `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR`
const CLI_HEADER_DIRECTORY: usize = 14;
const SECTION_HEADER_SIZE: usize = 40;

/// Where the metadata was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// The whole file is a metadata blob.
    Raw,
    /// Located through a PE file's CLI header.
    PortableExecutable,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Raw => "raw",
            Self::PortableExecutable => "pe",
        })
    }
}

/// Errors raised while loading images.
#[derive(Error, Debug)]
pub enum ImageError {
    /// The file or directory could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is neither a metadata blob nor a PE file with a CLI header.
    #[error("{} carries no metadata: {reason}", path.display())]
    NoMetadata { path: PathBuf, reason: Malformed },
}

/// Why a file was not accepted as a metadata image.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    #[error("neither a PE file nor a metadata blob")]
    UnknownFormat,
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("unsupported optional header magic {0:#x}")]
    OptionalHeader(u16),
    #[error("no CLI header")]
    NoCliHeader,
    #[error("RVA {0:#x} is outside every section")]
    UnmappedRva(u32),
    #[error("metadata does not start with the BSJB signature")]
    BadSignature,
}

/// A loaded image and the byte range of its metadata.
#[derive(Clone)]
pub struct MetadataImage {
    path: PathBuf,
    kind: ImageKind,
    bytes: Vec<u8>,
    metadata: Range<usize>,
}

impl fmt::Debug for MetadataImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataImage")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl MetadataImage {
    /// Read `path` and locate its metadata.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(path, bytes)
    }

    /// Locate metadata in bytes already in memory; `path` only names them.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self, ImageError> {
        let path = path.into();
        match locate_metadata(&bytes) {
            Ok((kind, metadata)) => {
                debug!(
                    image = %path.display(),
                    %kind,
                    offset = metadata.start,
                    len = metadata.len(),
                    "metadata located"
                );
                Ok(Self {
                    path,
                    kind,
                    bytes,
                    metadata,
                })
            }
            Err(reason) => Err(ImageError::NoMetadata { path, reason }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name used in reports.
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }

    pub const fn kind(&self) -> ImageKind {
        self.kind
    }

    /// The metadata blob, starting at its `BSJB` signature.
    pub fn metadata(&self) -> &[u8] {
        &self.bytes[self.metadata.clone()]
    }
}

/// Load every metadata image directly inside `dir`, sorted by path.
///
/// Files without metadata are skipped with a warning; unreadable entries
/// are errors.
pub fn discover(dir: impl AsRef<Path>) -> Result<Vec<MetadataImage>, ImageError> {
    let dir = dir.as_ref();
    let io_err = |source| ImageError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        match MetadataImage::load(&path) {
            Ok(image) => images.push(image),
            Err(ImageError::NoMetadata { path, reason }) => {
                warn!(image = %path.display(), %reason, "skipping file without metadata");
            }
            Err(err) => return Err(err),
        }
    }
    debug!(dir = %dir.display(), images = images.len(), "images discovered");
    Ok(images)
}

/// Find the metadata range in a raw blob or a PE file.
pub fn locate_metadata(bytes: &[u8]) -> Result<(ImageKind, Range<usize>), Malformed> {
    if read_u32(bytes, 0) == Some(METADATA_SIGNATURE) {
        return Ok((ImageKind::Raw, 0..bytes.len()));
    }
    if bytes.starts_with(DOS_MAGIC) {
        return locate_in_pe(bytes).map(|range| (ImageKind::PortableExecutable, range));
    }
    Err(Malformed::UnknownFormat)
}

fn locate_in_pe(bytes: &[u8]) -> Result<Range<usize>, Malformed> {
    let pe = read_u32(bytes, 0x3c).ok_or(Malformed::Truncated("DOS header"))? as usize;
    if bytes.get(pe..pe + 4) != Some(PE_SIGNATURE.as_slice()) {
        return Err(Malformed::UnknownFormat);
    }

    let coff = pe + 4;
    let section_count = read_u16(bytes, coff + 2).ok_or(Malformed::Truncated("COFF header"))?;
    let optional_size = read_u16(bytes, coff + 16).ok_or(Malformed::Truncated("COFF header"))?;
    let optional = coff + 20;

    let magic = read_u16(bytes, optional).ok_or(Malformed::Truncated("optional header"))?;
    let (count_offset, directories) = match magic {
        PE32_MAGIC => (optional + 92, optional + 96),
        PE32_PLUS_MAGIC => (optional + 108, optional + 112),
        other => return Err(Malformed::OptionalHeader(other)),
    };
    let directory_count =
        read_u32(bytes, count_offset).ok_or(Malformed::Truncated("optional header"))? as usize;
    if directory_count <= CLI_HEADER_DIRECTORY {
        return Err(Malformed::NoCliHeader);
    }
    let entry = directories + CLI_HEADER_DIRECTORY * 8;
    let cli_rva = read_u32(bytes, entry).ok_or(Malformed::Truncated("data directories"))?;
    if cli_rva == 0 {
        return Err(Malformed::NoCliHeader);
    }

    let sections = Sections {
        bytes,
        table: optional + usize::from(optional_size),
        count: usize::from(section_count),
    };
    let cli = sections.offset_of(cli_rva)?;
    let metadata_rva = read_u32(bytes, cli + 8).ok_or(Malformed::Truncated("CLI header"))?;
    let metadata_size = read_u32(bytes, cli + 12).ok_or(Malformed::Truncated("CLI header"))? as usize;
    let start = sections.offset_of(metadata_rva)?;
    let end = start
        .checked_add(metadata_size)
        .filter(|&end| end <= bytes.len())
        .ok_or(Malformed::Truncated("metadata"))?;
    let range = start..end;

    if read_u32(bytes, start) != Some(METADATA_SIGNATURE) {
        return Err(Malformed::BadSignature);
    }
    Ok(range)
}

/// The PE section table, for RVA to file offset mapping.
struct Sections<'a> {
    bytes: &'a [u8],
    table: usize,
    count: usize,
}

impl Sections<'_> {
    fn offset_of(&self, rva: u32) -> Result<usize, Malformed> {
        for index in 0..self.count {
            let header = self.table + index * SECTION_HEADER_SIZE;
            let field = |offset| {
                read_u32(self.bytes, header + offset).ok_or(Malformed::Truncated("section table"))
            };
            let virtual_size = field(8)?;
            let virtual_address = field(12)?;
            let raw_size = field(16)?;
            let raw_pointer = field(20)?;

            let extent = virtual_size.max(raw_size);
            if rva >= virtual_address && rva - virtual_address < extent {
                return (rva - virtual_address)
                    .checked_add(raw_pointer)
                    .map(|offset| offset as usize)
                    .ok_or(Malformed::UnmappedRva(rva));
            }
        }
        Err(Malformed::UnmappedRva(rva))
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Builders for minimal images.
#[cfg(test)]
pub(crate) mod fixture {
    /// A metadata blob: signature plus `len - 4` filler bytes.
    pub fn metadata_blob(len: usize) -> Vec<u8> {
        let mut blob = b"BSJB".to_vec();
        blob.resize(len.max(4), 0xab);
        blob
    }

    fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
        bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// A PE32 file with one section holding a CLI header followed by
    /// `metadata`.
    pub fn pe_with_metadata(metadata: &[u8]) -> Vec<u8> {
        const PE: usize = 0x40;
        const OPTIONAL: usize = PE + 24;
        const OPTIONAL_SIZE: usize = 96 + 16 * 8;
        const SECTION_VA: u32 = 0x2000;
        const SECTION_RAW: usize = 0x200;
        const CLI_SIZE: u32 = 72;

        let section_len = (CLI_SIZE as usize + metadata.len()).next_multiple_of(0x200);
        let mut bytes = vec![0_u8; SECTION_RAW + section_len];

        bytes[..2].copy_from_slice(b"MZ");
        put_u32(&mut bytes, 0x3c, PE as u32);
        bytes[PE..PE + 4].copy_from_slice(b"PE\0\0");
        put_u16(&mut bytes, PE + 4, 0x14c);
        put_u16(&mut bytes, PE + 6, 1);
        put_u16(&mut bytes, PE + 20, OPTIONAL_SIZE as u16);

        put_u16(&mut bytes, OPTIONAL, super::PE32_MAGIC);
        put_u32(&mut bytes, OPTIONAL + 92, 16);
        let cli_entry = OPTIONAL + 96 + super::CLI_HEADER_DIRECTORY * 8;
        put_u32(&mut bytes, cli_entry, SECTION_VA);
        put_u32(&mut bytes, cli_entry + 4, CLI_SIZE);

        let section = OPTIONAL + OPTIONAL_SIZE;
        bytes[section..section + 5].copy_from_slice(b".text");
        put_u32(&mut bytes, section + 8, section_len as u32);
        put_u32(&mut bytes, section + 12, SECTION_VA);
        put_u32(&mut bytes, section + 16, section_len as u32);
        put_u32(&mut bytes, section + 20, SECTION_RAW as u32);

        put_u32(&mut bytes, SECTION_RAW, CLI_SIZE);
        put_u16(&mut bytes, SECTION_RAW + 4, 2);
        put_u16(&mut bytes, SECTION_RAW + 6, 5);
        put_u32(&mut bytes, SECTION_RAW + 8, SECTION_VA + CLI_SIZE);
        put_u32(&mut bytes, SECTION_RAW + 12, metadata.len() as u32);

        let start = SECTION_RAW + CLI_SIZE as usize;
        bytes[start..start + metadata.len()].copy_from_slice(metadata);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{metadata_blob, pe_with_metadata};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn raw_blob_is_whole_file() {
        let blob = metadata_blob(64);
        let (kind, range) = locate_metadata(&blob).unwrap();
        assert_eq!(kind, ImageKind::Raw);
        assert_eq!(range, 0..64);
    }

    #[test]
    fn pe_metadata_is_found_through_cli_header() {
        let blob = metadata_blob(100);
        let pe = pe_with_metadata(&blob);
        let image = MetadataImage::from_bytes("test.dll", pe).unwrap();
        assert_eq!(image.kind(), ImageKind::PortableExecutable);
        assert_eq!(image.metadata(), blob.as_slice());
    }

    #[test]
    fn pe_without_cli_header_has_no_metadata() {
        let mut pe = pe_with_metadata(&metadata_blob(16));
        let cli_entry = 0x40 + 24 + 96 + CLI_HEADER_DIRECTORY * 8;
        pe[cli_entry..cli_entry + 4].fill(0);
        assert_eq!(locate_metadata(&pe), Err(Malformed::NoCliHeader));
    }

    #[test]
    fn metadata_signature_is_checked() {
        let mut blob = metadata_blob(16);
        blob[0] = b'X';
        let pe = pe_with_metadata(&blob);
        assert_eq!(locate_metadata(&pe), Err(Malformed::BadSignature));
    }

    #[test]
    fn truncated_pe_is_rejected() {
        let pe = pe_with_metadata(&metadata_blob(16));
        assert!(matches!(
            locate_metadata(&pe[..0x50]),
            Err(Malformed::Truncated(_))
        ));
    }

    #[test]
    fn unknown_format() {
        assert_eq!(locate_metadata(b"hello world"), Err(Malformed::UnknownFormat));
        assert_eq!(locate_metadata(&[]), Err(Malformed::UnknownFormat));
    }

    #[test]
    fn discover_skips_files_without_metadata() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.dll"), pe_with_metadata(&metadata_blob(32))).unwrap();
        fs::write(dir.path().join("a.md"), metadata_blob(8)).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not metadata").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let images = discover(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|image| image.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.md", "b.dll"]);
        assert_eq!(images[0].kind(), ImageKind::Raw);
        assert_eq!(images[1].kind(), ImageKind::PortableExecutable);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = MetadataImage::load("/nonexistent/image.dll").unwrap_err();
        assert!(matches!(err, ImageError::Io { .. }));
    }

    #[test]
    fn load_reports_non_metadata_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.bin");
        fs::write(&path, b"MZ").unwrap();
        let err = MetadataImage::load(&path).unwrap_err();
        assert!(err.to_string().contains("carries no metadata"));
    }
}
