use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;

use pvrd_core::error::Error;
use pvrd_core::tuned_file::TunedFile;
use pvrd_core::videodir::VideoDirectory;
use pvrd_core::*;

const COPY_BUFFER_SIZE: usize = 188 * 4096;

/// Copy a transport stream into the video directory.
///
/// The file is placed on the volume having the most free space.  The video
/// directory is locked while the file is being created.
#[derive(Args)]
pub struct CommandLine {
    /// Source file.
    #[arg()]
    source: PathBuf,

    /// Destination path relative to video.dir.
    #[arg()]
    name: PathBuf,
}

pub fn main(config: Arc<config::Config>, cl: &CommandLine) -> Result<(), Error> {
    let video_dir = VideoDirectory::new(&config.video.dir);
    let dest = video_dir.root().join(&cl.name);
    copy(&video_dir, &cl.source, &dest, config.video.lock_wait)
}

fn copy<S>(
    video_dir: &VideoDirectory<S>,
    source: &Path,
    dest: &Path,
    lock_wait: std::time::Duration,
) -> Result<(), Error>
where
    S: videodir::DiskSpaceQuery,
{
    let size_mb = std::fs::metadata(source)?.len().div_ceil(1024 * 1024);
    let mut src = TunedFile::open(source, OpenOptions::new().read(true))?;

    let mut dst = {
        let _lock = video_dir.lock(lock_wait)?;
        if !video_dir.space_available(size_mb) {
            tracing::error!(size_mb, "No space left on the video directory");
            return Err(Error::NoVolumeSpace(size_mb));
        }
        video_dir.create_video_file(dest)?
    };

    let start = Instant::now();
    let mut buf = vec![0; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    let result = loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => break Err(Error::from(err)),
        };
        if let Err(err) = dst.write(&buf[..n]) {
            break Err(err);
        }
        copied += n as u64;
    };
    if let Err(err) = result {
        if err.raw_os_error() == Some(libc::ENOSPC) {
            tracing::error!(?dest, copied, "Video directory is full");
        } else {
            tracing::error!(%err, ?dest, copied, "Failed to record");
        }
        drop(dst);
        video_dir.remove_video_file(dest);
        return Err(err);
    }
    dst.close()?;
    src.close()?;
    let elapsed = humantime::format_duration(std::time::Duration::from_millis(
        start.elapsed().as_millis() as u64,
    ));
    tracing::info!(?dest, copied, %elapsed, "Recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pvrd_core::file_util::DiskSpace;
    use test_log::test;

    struct Space(u64);

    impl videodir::DiskSpaceQuery for Space {
        fn disk_space(&self, _volume: &Path) -> std::io::Result<DiskSpace> {
            Ok(DiskSpace {
                free_mb: self.0,
                used_mb: 0,
            })
        }
    }

    #[test]
    fn test_copy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("video");
        std::fs::create_dir(&root).unwrap();
        let source = dir.path().join("source.ts");
        std::fs::write(&source, vec![0x47; 188 * 100]).unwrap();

        let video_dir = VideoDirectory::with_space_query(&root, Space(100));
        let dest = root.join("show/001.ts");
        let result = copy(&video_dir, &source, &dest, std::time::Duration::ZERO);
        assert_matches!(result, Ok(()));
        assert_eq!(std::fs::read(&dest).unwrap(), vec![0x47; 188 * 100]);
        // The lock is released.
        assert!(!root.join(".lock-pvrd").exists());
    }

    #[test]
    fn test_copy_no_space() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("video");
        std::fs::create_dir(&root).unwrap();
        let source = dir.path().join("source.ts");
        std::fs::write(&source, vec![0x47; 188]).unwrap();

        let video_dir = VideoDirectory::with_space_query(&root, Space(0));
        let dest = root.join("001.ts");
        let result = copy(&video_dir, &source, &dest, std::time::Duration::ZERO);
        assert_matches!(result, Err(Error::NoVolumeSpace(1)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_copy_outside_video_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("video");
        std::fs::create_dir(&root).unwrap();
        let source = dir.path().join("source.ts");
        std::fs::write(&source, vec![0x47; 188]).unwrap();

        let video_dir = VideoDirectory::with_space_query(&root, Space(100));
        let result = copy(
            &video_dir,
            &source,
            &dir.path().join("001.ts"),
            std::time::Duration::ZERO,
        );
        assert_matches!(result, Err(Error::NotInVideoDirectory(_)));
    }

    #[test]
    fn test_copy_failure_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("video");
        std::fs::create_dir(&root).unwrap();
        // Reading a directory fails after the destination has been created.
        let source = dir.path().join("source");
        std::fs::create_dir(&source).unwrap();

        let video_dir = VideoDirectory::with_space_query(&root, Space(100));
        let dest = root.join("001.ts");
        let result = copy(&video_dir, &source, &dest, std::time::Duration::ZERO);
        assert_matches!(result, Err(err) => {
            assert_eq!(err.raw_os_error(), Some(libc::EISDIR));
        });
        assert!(!dest.exists());
        assert!(!root.join(".lock-pvrd").exists());
    }
}
