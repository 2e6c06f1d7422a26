use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use nix::sys::statvfs::statvfs;
use nix::unistd::AccessFlags;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

const MEGABYTE: u64 = 1024 * 1024;

pub fn save_json<D, P>(data: D, path: P) -> bool
where
    D: Serialize,
    P: AsRef<Path>,
    P: std::fmt::Debug,
{
    // Serialize in advance so that a failure leaves the existing file untouched.
    let buf = match serde_json::to_vec(&data) {
        Ok(buf) => buf,
        Err(err) => {
            tracing::error!(%err, ?path, "Failed to serialize data");
            return false;
        }
    };
    save_data(&buf, path)
}

/// Writes `data` into `<path>.new`, syncs it, and then renames it to `path`.
pub fn save_data<P>(data: &[u8], path: P) -> bool
where
    P: AsRef<Path>,
    P: std::fmt::Debug,
{
    let new_path = append_extension(&path, "new");
    if let Err(err) = write_synced(data, &new_path) {
        tracing::error!(%err, ?path, "Failed to write <path>.new");
        let _ = std::fs::remove_file(&new_path);
        return false;
    }
    if let Err(err) = std::fs::rename(&new_path, &path) {
        tracing::error!(%err, ?path, "Failed to rename <path>.new to <path>");
        let _ = std::fs::remove_file(&new_path);
        return false;
    }
    tracing::debug!(nwritten = data.len(), ?path, "Saved data");
    true
}

fn write_synced(data: &[u8], path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

pub fn load_json<T, P>(path: P) -> Result<T, Error>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn append_extension<P, S>(path: P, ext: S) -> PathBuf
where
    P: AsRef<Path>,
    S: AsRef<OsStr>,
{
    let path = path.as_ref();
    match path.extension() {
        Some(last_ext) => {
            let mut last_ext = last_ext.to_os_string();
            last_ext.push(".");
            last_ext.push(ext);
            path.with_extension(last_ext)
        }
        None => path.with_extension(ext),
    }
}

/// Creates every missing leading directory of `path`, and `path` itself when
/// `is_directory` is set.
pub fn make_dirs<P: AsRef<Path>>(path: P, is_directory: bool) -> io::Result<()> {
    let path = path.as_ref();
    let dir = if is_directory {
        Some(path)
    } else {
        path.parent()
    };
    match dir {
        Some(dir) if !dir.as_os_str().is_empty() => {
            std::fs::create_dir_all(dir).inspect_err(|err| {
                tracing::error!(%err, ?dir, "Failed to create directory");
            })
        }
        _ => Ok(()),
    }
}

/// Returns true if `path` is an existing directory we may create entries in.
pub fn directory_ok<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    if !path.is_dir() {
        return false;
    }
    nix::unistd::access(path, AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK).is_ok()
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DiskSpace {
    pub free_mb: u64,
    pub used_mb: u64,
}

/// Queries the file system containing `path`.
pub fn disk_space<P: AsRef<Path>>(path: P) -> io::Result<DiskSpace> {
    let stat = statvfs(path.as_ref())?;
    let block_size = stat.fragment_size() as u64;
    Ok(DiskSpace {
        free_mb: stat.blocks_available() as u64 * block_size / MEGABYTE,
        used_mb: (stat.blocks() as u64).saturating_sub(stat.blocks_free() as u64) * block_size
            / MEGABYTE,
    })
}

/// Sum of the sizes of all regular files below `dir`, in MB.
pub fn dir_size_mb<P: AsRef<Path>>(dir: P) -> u64 {
    let bytes: u64 = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum();
    bytes / MEGABYTE
}

/// Removes a file or a whole directory tree.
///
/// With `follow_symlinks`, the target of every symlink found is removed as
/// well.
pub fn remove_file_or_dir<P: AsRef<Path>>(path: P, follow_symlinks: bool) -> io::Result<()> {
    let path = path.as_ref();
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path)? {
            remove_file_or_dir(entry?.path(), follow_symlinks)?;
        }
        tracing::debug!(?path, "Removing directory");
        return std::fs::remove_dir(path);
    }
    if follow_symlinks && metadata.file_type().is_symlink() {
        match std::fs::canonicalize(path) {
            Ok(target) => {
                tracing::debug!(?path, ?target, "Removing symlink target");
                remove_file_or_dir(target, false)?;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(?path, "Dangling symlink");
            }
            Err(err) => return Err(err),
        }
    }
    tracing::debug!(?path, "Removing file");
    std::fs::remove_file(path)
}

/// Removes every empty directory below `dir`, bottom up. `dir` itself is
/// removed only if `remove_this` is set and it ends up empty.
pub fn remove_empty_directories<P: AsRef<Path>>(dir: P, remove_this: bool) -> bool {
    let dir = dir.as_ref();
    let mut empty = true;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::error!(%err, ?dir, "Failed to read directory");
            return false;
        }
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => {
                if !remove_empty_directories(&path, true) {
                    empty = false;
                }
            }
            _ => empty = false,
        }
    }
    if empty && remove_this {
        if let Err(err) = std::fs::remove_dir(dir) {
            tracing::error!(%err, ?dir, "Failed to remove directory");
            return false;
        }
        tracing::debug!(?dir, "Removed empty directory");
    }
    empty
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;
    use test_log::test;

    #[test]
    fn test_save_data() {
        let temp_dir = TempDir::new().unwrap();

        let path = temp_dir.path().join("test");
        let new_path = append_extension(&path, "new");
        assert!(!path.exists());
        assert!(!new_path.exists());

        let ok = save_data(b"foo", &path);
        assert!(ok);
        assert_matches!(std::fs::read(&path), Ok(data) => {
            assert!(data == b"foo");
        });
        assert!(!new_path.exists());

        let ok = save_data(b"bar", &path);
        assert!(ok);
        assert_matches!(std::fs::read(&path), Ok(data) => {
            assert!(data == b"bar");
        });
        assert!(!new_path.exists());
    }

    #[test]
    fn test_save_data_into_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("test");
        assert!(!save_data(b"foo", &path));
        assert!(!path.exists());
    }

    #[test]
    fn test_save_json_and_load_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.json");
        assert!(save_json(vec![1, 2, 3], &path));
        assert_matches!(load_json::<Vec<u32>, _>(&path), Ok(data) => {
            assert_eq!(data, vec![1, 2, 3]);
        });
        assert_matches!(load_json::<String, _>(&path), Err(Error::JsonError(_)));
        assert_matches!(
            load_json::<Vec<u32>, _>(temp_dir.path().join("missing.json")),
            Err(Error::IoError(_))
        );
    }

    #[test]
    fn test_append_extension() {
        assert_eq!(append_extension("foobar", "baz"), Path::new("foobar.baz"));
        assert_eq!(append_extension("foo.bar", "baz"), Path::new("foo.bar.baz"));
    }

    #[test]
    fn test_make_dirs() {
        let temp_dir = TempDir::new().unwrap();

        let file = temp_dir.path().join("a/b/c.ts");
        assert_matches!(make_dirs(&file, false), Ok(()));
        assert!(temp_dir.path().join("a/b").is_dir());
        assert!(!file.exists());

        let dir = temp_dir.path().join("x/y");
        assert_matches!(make_dirs(&dir, true), Ok(()));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_directory_ok() {
        let temp_dir = TempDir::new().unwrap();
        assert!(directory_ok(temp_dir.path()));
        assert!(!directory_ok(temp_dir.path().join("missing")));

        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(!directory_ok(&file));

        // Not writable.
        let ro = temp_dir.path().join("ro");
        std::fs::create_dir(&ro).unwrap();
        std::fs::set_permissions(&ro, std::os::unix::fs::PermissionsExt::from_mode(0o555)).unwrap();
        let root = nix::unistd::Uid::effective().is_root();
        assert_eq!(directory_ok(&ro), root);
    }

    #[test]
    fn test_disk_space() {
        let temp_dir = TempDir::new().unwrap();
        assert_matches!(disk_space(temp_dir.path()), Ok(space) => {
            assert!(space.free_mb > 0 || space.used_mb > 0);
        });
        assert_matches!(disk_space(temp_dir.path().join("missing")), Err(err) => {
            assert_eq!(err.kind(), io::ErrorKind::NotFound);
        });
    }

    #[test]
    fn test_dir_size_mb() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
        std::fs::write(temp_dir.path().join("a"), vec![0u8; 1024 * 1024]).unwrap();
        std::fs::write(temp_dir.path().join("sub/b"), vec![0u8; 1024 * 1024]).unwrap();
        assert_eq!(dir_size_mb(temp_dir.path()), 2);
    }

    #[test]
    fn test_remove_file_or_dir() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target.ts");
        std::fs::write(&target, b"data").unwrap();

        let dir = temp_dir.path().join("rec");
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub/index"), b"").unwrap();
        std::os::unix::fs::symlink(&target, dir.join("00001.ts")).unwrap();

        assert_matches!(remove_file_or_dir(&dir, true), Ok(()));
        assert!(!dir.exists());
        assert!(!target.exists());
    }

    #[test]
    fn test_remove_file_or_dir_keeps_symlink_targets() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target.ts");
        std::fs::write(&target, b"data").unwrap();
        let link = temp_dir.path().join("link.ts");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_matches!(remove_file_or_dir(&link, false), Ok(()));
        assert!(std::fs::symlink_metadata(&link).is_err());
        assert!(target.exists());
    }

    #[test]
    fn test_remove_empty_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        std::fs::create_dir_all(root.join("empty/nested")).unwrap();
        std::fs::create_dir_all(root.join("full")).unwrap();
        std::fs::write(root.join("full/file"), b"").unwrap();

        assert!(!remove_empty_directories(&root, true));
        assert!(!root.join("empty").exists());
        assert!(root.join("full/file").exists());

        std::fs::remove_file(root.join("full/file")).unwrap();
        assert!(remove_empty_directories(&root, false));
        assert!(root.is_dir());
        assert!(!root.join("full").exists());
    }
}
