//! Integration tests for the tar streamer: structure preservation, oversize
//! exclusion, symlinks, and stream determinism.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::symlink;
use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;

use rs_salvage::archive::streamer::{stream_tar, StreamOptions};

fn build_tree(root: &Path) -> Result<()> {
    fs::create_dir_all(root.join("etc/nested"))?;
    fs::create_dir_all(root.join("home/empty"))?;
    fs::write(root.join("etc/hostname"), "salvage-test\n")?;
    fs::write(root.join("etc/nested/config.toml"), "key = 1\n")?;
    fs::write(root.join("home/big.bin"), vec![0x42u8; 2 * 1024 * 1024])?;
    symlink("etc/hostname", root.join("hostname-link"))?;
    Ok(())
}

fn archive_names(bytes: &[u8]) -> BTreeSet<String> {
    let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect()
}

#[test]
fn archives_files_dirs_and_symlinks() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path())?;

    let opts = StreamOptions {
        max_file_size_mb: 100,
        preserve_xattrs: false,
    };
    let mut bytes = Vec::new();
    let stats = stream_tar(root.path(), &opts, &mut bytes)?;

    assert_eq!(stats.files, 3);
    assert_eq!(stats.dirs, 4);
    assert_eq!(stats.symlinks, 1);
    assert_eq!(stats.excluded, 0);

    let names = archive_names(&bytes);
    assert!(names.contains("etc/hostname"));
    assert!(names.contains("etc/nested/config.toml"));
    assert!(names.contains("home/big.bin"));
    assert!(names.contains("hostname-link"));
    Ok(())
}

#[test]
fn file_contents_round_trip() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path())?;

    let opts = StreamOptions {
        max_file_size_mb: 100,
        preserve_xattrs: false,
    };
    let mut bytes = Vec::new();
    stream_tar(root.path(), &opts, &mut bytes)?;

    let mut archive = tar::Archive::new(std::io::Cursor::new(&bytes));
    let mut found = false;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == "etc/hostname" {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            assert_eq!(content, "salvage-test\n");
            found = true;
        }
    }
    assert!(found, "etc/hostname not found in archive");
    Ok(())
}

#[test]
fn oversize_files_are_excluded_but_parents_remain() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path())?;

    let opts = StreamOptions {
        max_file_size_mb: 1,
        preserve_xattrs: false,
    };
    let mut bytes = Vec::new();
    let stats = stream_tar(root.path(), &opts, &mut bytes)?;

    assert_eq!(stats.excluded, 1);
    let names = archive_names(&bytes);
    assert!(!names.contains("home/big.bin"));
    // the parent directory of the excluded file survives
    assert!(names.iter().any(|n| n.trim_end_matches('/') == "home"));
    Ok(())
}

#[test]
fn zero_limit_archives_structure_only() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path())?;

    let opts = StreamOptions {
        max_file_size_mb: 0,
        preserve_xattrs: false,
    };
    let mut bytes = Vec::new();
    let stats = stream_tar(root.path(), &opts, &mut bytes)?;

    assert_eq!(stats.files, 0);
    assert_eq!(stats.excluded, 3);
    assert_eq!(stats.dirs, 4);
    let names = archive_names(&bytes);
    assert!(names.iter().any(|n| n.trim_end_matches('/') == "etc/nested"));
    assert!(!names.contains("etc/hostname"));
    Ok(())
}

/// Two streams over unchanged input are byte-identical, which is what makes
/// chunk-level resume digests meaningful.
#[test]
fn stream_is_deterministic_for_unchanged_input() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path())?;

    let opts = StreamOptions {
        max_file_size_mb: 100,
        preserve_xattrs: false,
    };
    let mut first = Vec::new();
    stream_tar(root.path(), &opts, &mut first)?;
    let mut second = Vec::new();
    stream_tar(root.path(), &opts, &mut second)?;

    assert_eq!(first, second);
    Ok(())
}

/// A file with a large hole is stored as a GNU sparse entry carrying only its
/// data segments; on filesystems that cannot report holes it falls back to a
/// plain entry of the full size.
#[test]
fn sparse_files_are_stored_compactly_when_supported() -> Result<()> {
    let root = TempDir::new()?;
    let path = root.path().join("sparse.bin");
    let mut file = fs::File::create(&path)?;
    file.write_all(&[0x41; 4096])?;
    file.seek(SeekFrom::Start(1024 * 1024))?;
    file.write_all(&[0x42; 4096])?;
    file.sync_all()?;
    drop(file);
    let real_size = fs::metadata(&path)?.len();

    let opts = StreamOptions {
        max_file_size_mb: 100,
        preserve_xattrs: false,
    };
    let mut bytes = Vec::new();
    let stats = stream_tar(root.path(), &opts, &mut bytes)?;

    let mut archive = tar::Archive::new(std::io::Cursor::new(&bytes));
    let mut seen = false;
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.path()?.to_string_lossy() != "sparse.bin" {
            continue;
        }
        seen = true;
        if stats.sparse == 1 {
            assert_eq!(entry.header().entry_type(), tar::EntryType::GNUSparse);
            // only the data segments are stored
            assert!(entry.header().size()? < real_size);
        } else {
            assert_eq!(entry.header().size()?, real_size);
        }
    }
    assert!(seen, "sparse.bin not found in archive");
    Ok(())
}

/// With xattr preservation on, the stream stays a valid tar archive; when the
/// filesystem actually records an xattr, it travels as a PAX extension.
#[test]
fn xattr_preservation_keeps_the_archive_valid() -> Result<()> {
    let root = TempDir::new()?;
    build_tree(root.path())?;
    let tagged = root.path().join("etc/hostname");
    let xattr_supported = xattr::set(&tagged, "user.salvage.test", b"1").is_ok();

    let opts = StreamOptions {
        max_file_size_mb: 100,
        preserve_xattrs: true,
    };
    let mut bytes = Vec::new();
    let stats = stream_tar(root.path(), &opts, &mut bytes)?;
    assert_eq!(stats.files, 3);

    // the archive must stay readable either way
    let names = archive_names(&bytes);
    assert!(names.contains("etc/hostname"));

    if xattr_supported {
        let haystack = bytes.windows(b"SCHILY.xattr.user.salvage.test".len()).any(
            |window| window == b"SCHILY.xattr.user.salvage.test",
        );
        assert!(haystack, "expected a SCHILY.xattr PAX record");
    }
    Ok(())
}
