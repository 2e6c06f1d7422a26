mod lock_file;

#[cfg(test)]
pub(crate) mod stub;

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::Error;
use crate::file_util;
use crate::file_util::DiskSpace;
use crate::tuned_file::TunedFile;

pub use lock_file::LockFile;

/// Free space source for a volume.
pub trait DiskSpaceQuery {
    fn disk_space(&self, volume: &Path) -> io::Result<DiskSpace>;
}

/// Queries the file system through `statvfs(3)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Statvfs;

impl DiskSpaceQuery for Statvfs {
    fn disk_space(&self, volume: &Path) -> io::Result<DiskSpace> {
        file_util::disk_space(volume)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub free_mb: u64,
    pub used_mb: u64,
    pub percent: u8,
}

/// The video directory, possibly distributed over numbered volumes.
///
/// A root named like `/srv/video0` is the canonical volume of a chain of
/// siblings `/srv/video1`, `/srv/video2` and so on.  Recordings are always
/// addressed through the canonical volume.  A file physically placed on
/// another volume is reachable there through a symlink.
pub struct VideoDirectory<S = Statvfs> {
    root: PathBuf,
    space: S,
}

impl VideoDirectory<Statvfs> {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_space_query(root, Statvfs)
    }
}

impl<S: DiskSpaceQuery> VideoDirectory<S> {
    pub fn with_space_query<P: AsRef<Path>>(root: P, space: S) -> Self {
        let root = root.as_ref().components().collect::<PathBuf>();
        VideoDirectory { root, space }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_distributed(&self) -> bool {
        self.root
            .as_os_str()
            .as_encoded_bytes()
            .last()
            .is_some_and(|&c| c == b'0')
    }

    /// All volumes of the chain, the canonical one first.
    ///
    /// Enumeration stops at the first sibling which doesn't exist or isn't
    /// writable.
    pub fn volumes(&self) -> Volumes {
        Volumes {
            next: Some(self.root.clone()),
            distributed: self.is_distributed(),
        }
    }

    pub fn free_space_mb<P: AsRef<Path>>(&self, volume: P) -> io::Result<DiskSpace> {
        let volume = volume.as_ref();
        self.space.disk_space(volume).inspect_err(|err| {
            tracing::error!(%err, ?volume, "Failed to query disk space");
        })
    }

    // Unreadable volumes count as full.
    fn free_mb_or_zero(&self, volume: &Path) -> DiskSpace {
        self.free_space_mb(volume).unwrap_or_default()
    }

    /// Opens a video file without moving it to another volume.
    pub fn open_video_file<P: AsRef<Path>>(
        &self,
        path: P,
        options: &OpenOptions,
    ) -> Result<TunedFile, Error> {
        let path = self.check_path(path.as_ref())?;
        Ok(TunedFile::open(path, options)?)
    }

    /// Creates a new video file on the volume with the most free space.
    ///
    /// If that isn't the canonical volume, `path` becomes a symlink to the
    /// file actually created.
    pub fn create_video_file<P: AsRef<Path>>(&self, path: P) -> Result<TunedFile, Error> {
        let path = self.check_path(path.as_ref())?;
        let options = {
            let mut options = OpenOptions::new();
            options.read(true).write(true).create(true).truncate(true);
            options
        };

        let mut actual = path.to_path_buf();
        if self.is_distributed() {
            let mut max_free = self.free_space_mb(&self.root)?.free_mb;
            let mut chosen = None;
            for volume in self.volumes().skip(1) {
                let free = match self.free_space_mb(&volume) {
                    Ok(space) => space.free_mb,
                    Err(err) => {
                        tracing::warn!(%err, ?volume, "Failed to query free space, skipped");
                        continue;
                    }
                };
                if free > max_free {
                    max_free = free;
                    chosen = Some(volume);
                }
            }
            if let Some(volume) = chosen {
                actual = self.adjust(path, &volume);
                file_util::make_dirs(&actual, false)?;
                file_util::make_dirs(path, false)?;
                std::os::unix::fs::symlink(&actual, path).inspect_err(|err| {
                    tracing::error!(%err, ?path, ?actual, "Failed to create symlink");
                })?;
                tracing::debug!(?path, ?actual, free_mb = max_free, "Placed on another volume");
            }
        }
        if actual == path {
            file_util::make_dirs(path, false)?;
        }
        Ok(TunedFile::open(&actual, &options)?)
    }

    /// Returns true if a recording of `size_mb` fits somewhere.
    ///
    /// New files land on the canonical volume first, so it must have twice
    /// the space.
    pub fn space_available(&self, size_mb: u64) -> bool {
        if self.is_distributed() {
            if self.free_mb_or_zero(&self.root).free_mb >= size_mb * 2 {
                return true;
            }
            self.volumes()
                .skip(1)
                .any(|volume| self.free_mb_or_zero(&volume).free_mb >= size_mb)
        } else {
            self.free_mb_or_zero(&self.root).free_mb >= size_mb
        }
    }

    /// Usage summed over every volume.
    ///
    /// `deleted_mb` is the size of recordings already marked for deletion,
    /// counted as free space.
    pub fn disk_usage(&self, deleted_mb: u64) -> DiskUsage {
        let (mut free_mb, mut used_mb) = self
            .volumes()
            .map(|volume| self.free_mb_or_zero(&volume))
            .fold((0, 0), |(free, used), space| {
                (free + space.free_mb, used + space.used_mb)
            });
        let deleted_mb = deleted_mb.min(used_mb);
        free_mb += deleted_mb;
        used_mb -= deleted_mb;
        let total = free_mb + used_mb;
        let percent = if total > 0 {
            (used_mb * 100 / total) as u8
        } else {
            0
        };
        DiskUsage {
            free_mb,
            used_mb,
            percent,
        }
    }

    /// Removes a video file, including the physical file a symlink points to.
    pub fn remove_video_file<P: AsRef<Path>>(&self, path: P) -> bool {
        let Ok(path) = self.check_path(path.as_ref()) else {
            return false;
        };
        match file_util::remove_file_or_dir(path, true) {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(%err, ?path, "Failed to remove video file");
                false
            }
        }
    }

    /// Renames the canonical entry only, a symlink keeps pointing to the
    /// same physical file.
    pub fn rename_video_file<P, Q>(&self, old_path: P, new_path: Q) -> bool
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (old_path, new_path) = (old_path.as_ref(), new_path.as_ref());
        if self.check_path(old_path).is_err() || self.check_path(new_path).is_err() {
            return false;
        }
        match std::fs::rename(old_path, new_path) {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(%err, ?old_path, ?new_path, "Failed to rename video file");
                false
            }
        }
    }

    /// Removes empty directories left behind on every volume.
    pub fn remove_empty_video_directories(&self) {
        for volume in self.volumes() {
            file_util::remove_empty_directories(&volume, false);
        }
    }

    pub fn video_file_exists<P: AsRef<Path>>(&self, path: P) -> bool {
        // `exists()` follows symlinks, so a dangling one doesn't count.
        self.check_path(path.as_ref())
            .is_ok_and(|path| path.exists())
    }

    /// Returns true if `path` is on the same file system as any volume.
    pub fn is_on_video_filesystem<P: AsRef<Path>>(&self, path: P) -> bool {
        let Ok(metadata) = std::fs::metadata(path) else {
            return false;
        };
        self.volumes().any(|volume| {
            std::fs::metadata(&volume).is_ok_and(|volume| volume.dev() == metadata.dev())
        })
    }

    /// Locks the canonical volume.
    pub fn lock(&self, max_wait: std::time::Duration) -> Result<LockFile, Error> {
        let mut lock_file = LockFile::new(&self.root);
        lock_file.acquire(max_wait)?;
        Ok(lock_file)
    }

    fn check_path<'a>(&self, path: &'a Path) -> Result<&'a Path, Error> {
        if path.starts_with(&self.root) {
            Ok(path)
        } else {
            tracing::error!(?path, root = ?self.root, "Not in the video directory");
            Err(Error::NotInVideoDirectory(path.to_path_buf()))
        }
    }

    fn adjust(&self, path: &Path, volume: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(relative) => volume.join(relative),
            Err(_) => path.to_path_buf(),
        }
    }
}

pub struct Volumes {
    next: Option<PathBuf>,
    distributed: bool,
}

impl Iterator for Volumes {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if self.distributed {
            self.next = next_volume(&current).filter(|volume| file_util::directory_ok(volume));
        }
        Some(current)
    }
}

/// The sibling volume of `volume`.
///
/// The trailing number is incremented keeping its width, so the chain ends at
/// `video9` or `video99`.
pub fn next_volume<P: AsRef<Path>>(volume: P) -> Option<PathBuf> {
    let name = volume.as_ref().to_str()?;
    let width = name
        .bytes()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if width == 0 {
        return None;
    }
    let (prefix, digits) = name.split_at(name.len() - width);
    let number = digits.parse::<u64>().ok()? + 1;
    if number.to_string().len() > width {
        return None;
    }
    Some(PathBuf::from(format!("{prefix}{number:0width$}")))
}
