//! Tar stream production from a mounted volume root.
//!
//! The streamer walks the mount subtree and writes a tar stream to the given
//! writer, which in practice is the compressor's stdin. It does not compress,
//! hash, or split. Oversize files are excluded while their parent directories
//! are kept; descents onto other devices (pseudo-filesystems, nested mounts)
//! are pruned; files that shrink or vanish mid-read are zero-padded to their
//! declared size so the stream stays well-formed. Sparse files whose data map
//! fits the GNU base header are stored compactly as GNU sparse entries.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use tar::{Builder, EntryType, Header, HeaderMode};
use walkdir::WalkDir;

/// Data segments encodable in the base GNU header without extension blocks.
const MAX_SPARSE_SEGMENTS: usize = 4;

/// Largest value an 11-digit octal header field can carry.
const MAX_OCTAL_FIELD: u64 = 0o777_7777_7777;

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Files strictly larger than this many MiB are excluded; 0 excludes all
    /// regular files and archives directory structure only.
    pub max_file_size_mb: u64,
    pub preserve_xattrs: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TarStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub excluded: u64,
    pub padded: u64,
    /// Files stored compactly as GNU sparse entries.
    pub sparse: u64,
    pub bytes_in: u64,
}

/// Stream a tar archive of `root` into `out`. Returns per-entry statistics.
pub fn stream_tar<W: Write>(root: &Path, opts: &StreamOptions, out: W) -> Result<TarStats> {
    let root_meta = fs::metadata(root)
        .context(format!("Cannot stat archive root {}", root.display()))?;
    let root_dev = root_meta.dev();
    let max_bytes = opts.max_file_size_mb.saturating_mul(1024 * 1024);

    let mut builder = Builder::new(out);
    builder.follow_symlinks(false);
    builder.mode(HeaderMode::Complete);

    let mut stats = TarStats::default();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .metadata()
                .map(|m| m.dev() == root_dev)
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("walk produced a path outside the root")?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if opts.preserve_xattrs {
                append_xattrs(&mut builder, entry.path(), rel)?;
            }
            builder
                .append_dir(rel, entry.path())
                .context(format!("Failed to archive directory {}", rel.display()))?;
            stats.dirs += 1;
        } else if file_type.is_symlink() {
            let target = match fs::read_link(entry.path()) {
                Ok(target) => target,
                Err(e) => {
                    warn!("Skipping unreadable symlink {}: {e}", rel.display());
                    continue;
                }
            };
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Skipping symlink {}: {e}", rel.display());
                    continue;
                }
            };
            let mut header = Header::new_gnu();
            header.set_metadata_in_mode(&meta, HeaderMode::Complete);
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, rel, &target)
                .context(format!("Failed to archive symlink {}", rel.display()))?;
            stats.symlinks += 1;
        } else if file_type.is_file() {
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {e}", rel.display());
                    continue;
                }
            };
            let size = meta.len();
            if opts.max_file_size_mb == 0 || size > max_bytes {
                debug!("Excluding {} ({size} bytes)", rel.display());
                stats.excluded += 1;
                continue;
            }
            let mut file = match fs::File::open(entry.path()) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Skipping unopenable file {}: {e}", rel.display());
                    continue;
                }
            };
            if opts.preserve_xattrs {
                append_xattrs(&mut builder, entry.path(), rel)?;
            }
            if let Some(segments) = sparse_map(&file, size) {
                append_sparse(&mut builder, rel, &meta, file, &segments, size)?;
                stats.sparse += 1;
                stats.files += 1;
                stats.bytes_in += size;
                continue;
            }
            if let Err(e) = file.seek(SeekFrom::Start(0)) {
                warn!("Skipping unseekable file {}: {e}", rel.display());
                continue;
            }
            let mut header = Header::new_gnu();
            header.set_metadata_in_mode(&meta, HeaderMode::Complete);
            header.set_size(size);
            let mut reader = PaddedReader::new(file, size);
            builder
                .append_data(&mut header, rel, &mut reader)
                .context(format!("Failed to archive {}", rel.display()))?;
            if reader.padded() {
                warn!("{} changed while reading; padded to {size} bytes", rel.display());
                stats.padded += 1;
            }
            stats.files += 1;
            stats.bytes_in += size;
        } else {
            // fifo/socket/device nodes have no business in the archive
            debug!("Skipping special file {}", rel.display());
        }
    }

    builder.finish().context("Failed to finalize tar stream")?;
    Ok(stats)
}

/// Emit a PAX extended header carrying `SCHILY.xattr.*` records for the next
/// entry. Unreadable attributes are logged and dropped, never fatal.
fn append_xattrs<W: Write>(builder: &mut Builder<W>, path: &Path, rel: &Path) -> Result<()> {
    let names = match xattr::list(path) {
        Ok(names) => names,
        Err(e) => {
            debug!("xattr list failed for {}: {e}", rel.display());
            return Ok(());
        }
    };
    let mut records: Vec<u8> = Vec::new();
    for name in names {
        let name_str = name.to_string_lossy().to_string();
        match xattr::get(path, &name) {
            Ok(Some(value)) => {
                records.extend_from_slice(&pax_record(
                    &format!("SCHILY.xattr.{name_str}"),
                    &value,
                ));
            }
            Ok(None) => {}
            Err(e) => debug!("xattr read failed for {} ({name_str}): {e}", rel.display()),
        }
    }
    if records.is_empty() {
        return Ok(());
    }
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::XHeader);
    header.set_size(records.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append(&header, records.as_slice())
        .context(format!("Failed to write xattr header for {}", rel.display()))?;
    Ok(())
}

/// Map the data segments of a file via `SEEK_DATA`/`SEEK_HOLE`. Returns
/// `None` when the file should be stored plain: it is not sparse, the
/// filesystem cannot report holes, or the map does not fit the base GNU
/// header (more than [`MAX_SPARSE_SEGMENTS`] segments, or offsets beyond
/// what an octal header field can carry).
fn sparse_map(file: &fs::File, size: u64) -> Option<Vec<(u64, u64)>> {
    if size == 0 || size > MAX_OCTAL_FIELD {
        return None;
    }
    let fd = file.as_raw_fd();
    let mut segments: Vec<(u64, u64)> = Vec::new();
    let mut offset: libc::off_t = 0;
    loop {
        let data_start = unsafe { libc::lseek(fd, offset, libc::SEEK_DATA) };
        if data_start < 0 {
            // ENXIO means no data at or after the offset (a trailing hole);
            // anything else means the filesystem cannot report holes
            let errno = io::Error::last_os_error().raw_os_error();
            if errno == Some(libc::ENXIO) {
                break;
            }
            return None;
        }
        let hole_start = unsafe { libc::lseek(fd, data_start, libc::SEEK_HOLE) };
        if hole_start < 0 || hole_start < data_start {
            return None;
        }
        if hole_start as u64 > MAX_OCTAL_FIELD || segments.len() >= MAX_SPARSE_SEGMENTS {
            return None;
        }
        segments.push((data_start as u64, (hole_start - data_start) as u64));
        offset = hole_start;
        if offset as u64 >= size {
            break;
        }
    }
    // a single segment covering the whole file is just a plain file
    if segments.len() == 1 && segments[0] == (0, size) {
        return None;
    }
    Some(segments)
}

/// Emit one old-GNU sparse entry: the data map in the base header's four
/// sparse slots, `realsize` carrying the logical size, and only the data
/// segments stored.
fn append_sparse<W: Write>(
    builder: &mut Builder<W>,
    rel: &Path,
    meta: &fs::Metadata,
    file: fs::File,
    segments: &[(u64, u64)],
    size: u64,
) -> Result<()> {
    let stored: u64 = segments.iter().map(|(_, len)| len).sum();
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(meta, HeaderMode::Complete);
    header.set_entry_type(EntryType::GNUSparse);
    header.set_size(stored);
    {
        let gnu = header
            .as_gnu_mut()
            .expect("header built with new_gnu is a GNU header");
        octal_field(&mut gnu.realsize, size);
        for (slot, (offset, len)) in gnu.sparse.iter_mut().zip(segments) {
            octal_field(&mut slot.offset, *offset);
            octal_field(&mut slot.numbytes, *len);
        }
    }
    let reader = SparseSegmentReader::new(file, segments.to_vec());
    builder
        .append_data(&mut header, rel, reader)
        .context(format!("Failed to archive sparse file {}", rel.display()))?;
    debug!(
        "Stored {} sparse: {stored} of {size} bytes in {} segment(s)",
        rel.display(),
        segments.len()
    );
    Ok(())
}

/// Write a value into a 12-byte octal header field, `%011o` + NUL as GNU tar
/// does. Values are screened against [`MAX_OCTAL_FIELD`] before this point.
fn octal_field(field: &mut [u8; 12], value: u64) {
    let text = format!("{value:011o}");
    field[..11].copy_from_slice(text.as_bytes());
    field[11] = 0;
}

/// Reads the mapped data segments in order, seeking to each segment's offset
/// and zero-padding segments that shrink mid-read so the stored length always
/// matches the header.
struct SparseSegmentReader {
    file: fs::File,
    segments: Vec<(u64, u64)>,
    index: usize,
    pos_in_segment: u64,
}

impl SparseSegmentReader {
    fn new(file: fs::File, segments: Vec<(u64, u64)>) -> Self {
        SparseSegmentReader {
            file,
            segments,
            index: 0,
            pos_in_segment: 0,
        }
    }
}

impl Read for SparseSegmentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (offset, len) = match self.segments.get(self.index) {
                Some(segment) => *segment,
                None => return Ok(0),
            };
            let remaining = len - self.pos_in_segment;
            if remaining == 0 {
                self.index += 1;
                self.pos_in_segment = 0;
                continue;
            }
            let want = buf.len().min(remaining as usize);
            let seek_ok = self
                .file
                .seek(SeekFrom::Start(offset + self.pos_in_segment))
                .is_ok();
            let got = if seek_ok {
                self.file.read(&mut buf[..want]).unwrap_or(0)
            } else {
                0
            };
            if got == 0 {
                // segment vanished under us; pad to the declared length
                buf[..want].fill(0);
                self.pos_in_segment += want as u64;
                return Ok(want);
            }
            self.pos_in_segment += got as u64;
            return Ok(got);
        }
    }
}

/// One PAX record: `"<len> <key>=<value>\n"` where `len` counts the entire
/// record including its own digits.
fn pax_record(key: &str, value: &[u8]) -> Vec<u8> {
    let base = key.len() + value.len() + 3; // space, '=', newline
    let mut len = base + decimal_width(base);
    if decimal_width(len) != decimal_width(base) {
        len = base + decimal_width(len);
    }
    let mut record = format!("{len} {key}=").into_bytes();
    record.extend_from_slice(value);
    record.push(b'\n');
    record
}

fn decimal_width(n: usize) -> usize {
    let mut width = 1;
    let mut n = n / 10;
    while n > 0 {
        width += 1;
        n /= 10;
    }
    width
}

/// Reads exactly `declared` bytes: truncates files that grew and zero-pads
/// files that shrank or failed mid-read, so the tar header stays truthful.
struct PaddedReader<R> {
    inner: Option<R>,
    remaining: u64,
    padded: bool,
}

impl<R: Read> PaddedReader<R> {
    fn new(inner: R, declared: u64) -> Self {
        PaddedReader {
            inner: Some(inner),
            remaining: declared,
            padded: false,
        }
    }

    fn padded(&self) -> bool {
        self.padded
    }
}

impl<R: Read> Read for PaddedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining as usize);
        if let Some(inner) = self.inner.as_mut() {
            match inner.read(&mut buf[..want]) {
                Ok(0) => self.inner = None,
                Ok(n) => {
                    self.remaining -= n as u64;
                    return Ok(n);
                }
                Err(_) => self.inner = None,
            }
        }
        // source is gone; pad with zeros
        self.padded = true;
        buf[..want].fill(0);
        self.remaining -= want as u64;
        Ok(want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn octal_field_is_nul_terminated_octal() {
        let mut field = [0xffu8; 12];
        octal_field(&mut field, 0o1234);
        assert_eq!(&field[..11], b"00000001234");
        assert_eq!(field[11], 0);
    }

    #[test]
    fn sparse_map_of_dense_file_is_none() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"dense content").unwrap();
        tmp.flush().unwrap();
        let file = tmp.reopen().unwrap();
        assert!(sparse_map(&file, 13).is_none());
    }

    #[test]
    fn sparse_map_of_empty_file_is_none() {
        let tmp = NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();
        assert!(sparse_map(&file, 0).is_none());
    }

    #[test]
    fn sparse_map_finds_holes_when_the_filesystem_reports_them() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = tmp.reopen().unwrap();
        file.write_all(&[0x41; 4096]).unwrap();
        file.seek(SeekFrom::Start(1024 * 1024)).unwrap();
        file.write_all(&[0x42; 4096]).unwrap();
        file.sync_all().unwrap();
        let size = file.metadata().unwrap().len();

        // not every filesystem reports holes; plain storage is the fallback
        if let Some(segments) = sparse_map(&file, size) {
            let stored: u64 = segments.iter().map(|(_, len)| len).sum();
            assert!(stored < size);
            assert!(segments.len() <= MAX_SPARSE_SEGMENTS);
            assert_eq!(segments[0].0, 0);
        }
    }

    #[test]
    fn sparse_reader_concatenates_mapped_segments() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"AAAA....BBBB").unwrap();
        tmp.flush().unwrap();
        let file = tmp.reopen().unwrap();

        let mut reader = SparseSegmentReader::new(file, vec![(0, 4), (8, 4)]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"AAAABBBB");
    }

    #[test]
    fn sparse_reader_pads_vanished_segments() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"AAAA").unwrap();
        tmp.flush().unwrap();
        let file = tmp.reopen().unwrap();

        // second segment lies beyond EOF, as if the file shrank
        let mut reader = SparseSegmentReader::new(file, vec![(0, 4), (100, 4)]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"AAAA\0\0\0\0");
    }

    #[test]
    fn pax_record_length_counts_itself() {
        let record = pax_record("SCHILY.xattr.user.test", b"v");
        let text = String::from_utf8(record.clone()).unwrap();
        let (len_str, _) = text.split_once(' ').unwrap();
        assert_eq!(len_str.parse::<usize>().unwrap(), record.len());
    }

    #[test]
    fn padded_reader_pads_short_sources() {
        let source: &[u8] = b"abc";
        let mut reader = PaddedReader::new(source, 8);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc\0\0\0\0\0");
        assert!(reader.padded());
    }

    #[test]
    fn padded_reader_truncates_grown_sources() {
        let source: &[u8] = b"abcdefgh";
        let mut reader = PaddedReader::new(source, 4);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcd");
        assert!(!reader.padded());
    }
}
