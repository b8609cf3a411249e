//! On-disk layout: one `.epoch`/`.primary`/`.secondary` triple per epoch,
//! named by the zero-padded epoch number.

use crate::error::{Error, Result};
use chain_history::EpochNo;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub(crate) const EPOCH_EXT: &str = "epoch";
pub(crate) const PRIMARY_EXT: &str = "primary";
pub(crate) const SECONDARY_EXT: &str = "secondary";

pub(crate) fn epoch_file(root: &Path, epoch: EpochNo) -> PathBuf {
    root.join(format!("{:08}.{}", epoch.0, EPOCH_EXT))
}

pub(crate) fn primary_file(root: &Path, epoch: EpochNo) -> PathBuf {
    root.join(format!("{:08}.{}", epoch.0, PRIMARY_EXT))
}

pub(crate) fn secondary_file(root: &Path, epoch: EpochNo) -> PathBuf {
    root.join(format!("{:08}.{}", epoch.0, SECONDARY_EXT))
}

/// Epoch numbers for which at least one of the three files exists.
pub(crate) fn list_epochs(root: &Path) -> Result<Vec<EpochNo>> {
    let mut epochs = BTreeSet::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::fs(root, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|err| Error::fs(root, err))?;
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some(EPOCH_EXT | PRIMARY_EXT | SECONDARY_EXT) => {}
            _ => continue,
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem,
            None => continue,
        };
        if let Ok(number) = stem.parse::<u64>() {
            epochs.insert(EpochNo(number));
        }
    }
    Ok(epochs.into_iter().collect())
}

pub(crate) fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|err| Error::fs(path, err))
}

pub(crate) fn file_size_or_zero(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(Error::fs(path, err)),
    }
}

pub(crate) fn exists(path: &Path) -> bool {
    path.exists()
}

/// Open for appending, creating the file if needed.
pub(crate) fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| Error::fs(path, err))
}

/// Open a fresh file that must not exist yet.
pub(crate) fn create_new(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(path)
        .map_err(|err| Error::fs(path, err))
}

/// Open for positioned reads and writes.
pub(crate) fn open_read_write(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| Error::fs(path, err))
}

pub(crate) fn open_read(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| Error::fs(path, err))
}

pub(crate) fn read_all(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| Error::fs(path, err))
}

pub(crate) fn write_all(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|err| Error::fs(path, err))
}

/// Read exactly `buf.len()` bytes at `offset` from an exclusive handle.
pub(crate) fn read_exact_at(file: &mut File, path: &Path, buf: &mut [u8], offset: u64) -> Result<()> {
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(buf))
        .map_err(|err| Error::fs(path, err))
}

pub(crate) fn truncate(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|err| Error::fs(path, err))?;
    file.set_len(len).map_err(|err| Error::fs(path, err))
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::fs(path, err)),
    }
}

/// Remove whatever remains of an epoch's file triple.
pub(crate) fn remove_epoch(root: &Path, epoch: EpochNo) -> Result<()> {
    remove_if_exists(&epoch_file(root, epoch))?;
    remove_if_exists(&primary_file(root, epoch))?;
    remove_if_exists(&secondary_file(root, epoch))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn epoch_files_are_zero_padded() {
        let root = Path::new("/db");
        assert_eq!(
            epoch_file(root, EpochNo(7)),
            PathBuf::from("/db/00000007.epoch")
        );
        assert_eq!(
            primary_file(root, EpochNo(12_345_678)),
            PathBuf::from("/db/12345678.primary")
        );
        assert_eq!(
            secondary_file(root, EpochNo(0)),
            PathBuf::from("/db/00000000.secondary")
        );
    }

    #[test]
    fn list_epochs_unions_the_three_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("00000000.epoch"), b"").unwrap();
        fs::write(dir.path().join("00000002.secondary"), b"").unwrap();
        fs::write(dir.path().join("00000001.primary"), b"").unwrap();
        fs::write(dir.path().join("garbage.txt"), b"").unwrap();
        fs::write(dir.path().join("not-a-number.epoch"), b"").unwrap();

        let epochs = list_epochs(dir.path()).unwrap();
        assert_eq!(epochs, vec![EpochNo(0), EpochNo(1), EpochNo(2)]);
    }
}
