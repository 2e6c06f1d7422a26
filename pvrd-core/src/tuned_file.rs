//! File I/O with manual page cache management.
//!
//! The kernel read-ahead is disabled when a file is opened.  Instead, reads
//! issue explicit read-ahead hints for sequential access and drop pages which
//! have been consumed, and writes drop pages once they have been handed to the
//! disk.  This keeps long recordings and replays from evicting everything
//! else out of the page cache, and avoids seek storms on a single spinning
//! disk that is recording and replaying at the same time.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::IntoRawFd;
use std::path::Path;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
use nix::fcntl::PosixFadviseAdvice;

use crate::error::Error;

const KILOBYTE: i64 = 1024;
const MEGABYTE: i64 = 1024 * KILOBYTE;

// Page granularity used when dropping a range.
const FADVISE_GRANULARITY: i64 = 4 * KILOBYTE;
const READ_CHUNK: i64 = 8 * MEGABYTE;
const INITIAL_READAHEAD: i64 = 128 * KILOBYTE;
const WRITE_BUFFER: i64 = 800 * KILOBYTE;
const WRITE_FLUSH_THRESHOLD: i64 = 32 * MEGABYTE;
const READAHEAD_FACTOR: i64 = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheAdvice {
    Random,
    WillNeed,
    DontNeed,
}

/// Applies page cache hints to an open file.
///
/// `offset == 0 && len == 0` addresses the whole file.
pub trait CacheAdvisor {
    fn advise(&mut self, file: &File, offset: u64, len: u64, advice: CacheAdvice)
    -> io::Result<()>;
}

/// Hints through `posix_fadvise(2)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fadvise;

impl CacheAdvisor for Fadvise {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    fn advise(
        &mut self,
        file: &File,
        offset: u64,
        len: u64,
        advice: CacheAdvice,
    ) -> io::Result<()> {
        let advice = match advice {
            CacheAdvice::Random => PosixFadviseAdvice::POSIX_FADV_RANDOM,
            CacheAdvice::WillNeed => PosixFadviseAdvice::POSIX_FADV_WILLNEED,
            CacheAdvice::DontNeed => PosixFadviseAdvice::POSIX_FADV_DONTNEED,
        };
        nix::fcntl::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            advice,
        )?;
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    fn advise(
        &mut self,
        _file: &File,
        _offset: u64,
        _len: u64,
        _advice: CacheAdvice,
    ) -> io::Result<()> {
        Ok(())
    }
}

/// A file with tuned page cache behavior.
///
/// Not meant to be shared between threads; a recording or replay session owns
/// its instance.
#[derive(Debug)]
pub struct TunedFile<A: CacheAdvisor = Fadvise> {
    file: Option<File>,
    advisor: A,
    // Offsets are kept signed, ranges computed from them may start before 0.
    curpos: i64,
    lastpos: i64,
    begin: i64,
    ahead: i64,
    cached_start: i64,
    cached_end: i64,
    readahead: i64,
    written: i64,
    total_written: i64,
    dirty: bool,
}

impl TunedFile<Fadvise> {
    pub fn open<P: AsRef<Path>>(path: P, options: &OpenOptions) -> io::Result<Self> {
        Self::open_with_advisor(path, options, Fadvise)
    }

    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open(
            path,
            OpenOptions::new().read(true).write(true).create(true).truncate(true),
        )
    }
}

impl<A: CacheAdvisor> TunedFile<A> {
    pub fn open_with_advisor<P: AsRef<Path>>(
        path: P,
        options: &OpenOptions,
        advisor: A,
    ) -> io::Result<Self> {
        let path = path.as_ref();
        let file = options.open(path).inspect_err(|err| {
            tracing::error!(%err, ?path, "Failed to open file");
        })?;
        let mut tuned = TunedFile {
            file: Some(file),
            advisor,
            curpos: 0,
            lastpos: 0,
            begin: 0,
            ahead: 0,
            cached_start: 0,
            cached_end: 0,
            readahead: INITIAL_READAHEAD,
            written: 0,
            total_written: 0,
            dirty: false,
        };
        // We do our own read-ahead.
        tuned.advise(0, 0, CacheAdvice::Random);
        tracing::trace!(?path, "Opened");
        Ok(tuned)
    }

    pub fn position(&self) -> u64 {
        self.curpos as u64
    }

    /// Syncs pending writes, drops the whole file from the page cache and
    /// closes the descriptor.
    pub fn close(mut self) -> io::Result<()> {
        self.close_file()
    }

    fn close_file(&mut self) -> io::Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let mut result = Ok(());
        if self.dirty {
            // Last chance to uncache the data, it must hit the disk first.
            if let Err(err) = file.sync_data() {
                tracing::error!(%err, "Failed to sync data");
                result = Err(err);
            }
            self.dirty = false;
        }
        if let Err(err) = self.advisor.advise(&file, 0, 0, CacheAdvice::DontNeed) {
            tracing::debug!(%err, "Failed to drop the file from the cache");
        }
        if let Err(errno) = nix::unistd::close(file.into_raw_fd()) {
            let err = io::Error::from(errno);
            tracing::error!(%err, "Failed to close");
            if result.is_ok() {
                result = Err(err);
            }
        }
        result
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if let SeekFrom::Start(offset) = pos {
            if offset as i64 == self.curpos {
                return Ok(offset);
            }
        }
        let offset = self.file()?.seek(pos)?;
        self.curpos = offset as i64;
        Ok(offset)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = buf.len() as i64;
        // Non-zero if we are not at the offset where the last access ended.
        let jumped = self.curpos - self.lastpos;
        if self.cached_start < self.cached_end
            && (self.curpos < self.cached_start || self.curpos > self.cached_end)
        {
            // The current position is outside the cached window.
            self.drop_cache(self.cached_start, self.cached_end - self.cached_start);
            self.cached_start = self.curpos;
            self.cached_end = self.curpos;
        }
        self.cached_start = self.cached_start.min(self.curpos);

        let nread = retry_on_interrupt(|| self.file()?.read(buf))?;
        if nread > 0 {
            self.curpos += nread as i64;
            self.cached_end = self.cached_end.max(self.curpos);
            // Small forward jumps inside the read-ahead window are still
            // sequential access.
            if jumped >= 0 && jumped <= self.readahead {
                // Only when at least half of the previous read-ahead has been
                // consumed, so that we don't hint after every read.
                if self.ahead - self.curpos < self.readahead / 2 {
                    self.advise(self.curpos, self.readahead, CacheAdvice::WillNeed);
                    self.ahead = self.curpos + self.readahead;
                    self.cached_end = self.cached_end.max(self.ahead);
                }
                if self.readahead < size * READAHEAD_FACTOR {
                    self.readahead = size * READAHEAD_FACTOR;
                }
            } else {
                // Prefetching after a jump only gets in the way of e.g. fast
                // rewind.
                self.ahead = self.curpos;
            }
        }

        if self.cached_start < self.cached_end {
            if self.curpos - self.cached_start > READ_CHUNK * 2 {
                // Moved forward far enough, shrink the tail of the window.
                self.drop_cache(
                    self.cached_start,
                    self.curpos - READ_CHUNK - self.cached_start,
                );
                self.cached_start = self.curpos - READ_CHUNK;
            } else if self.cached_end > self.ahead && self.cached_end - self.curpos > READ_CHUNK * 2
            {
                // Moved back far enough, shrink the head of the window.
                self.drop_cache(
                    self.curpos + READ_CHUNK,
                    self.cached_end - (self.curpos + READ_CHUNK),
                );
                self.cached_end = self.curpos + READ_CHUNK;
            }
        }
        self.lastpos = self.curpos;
        Ok(nread)
    }

    /// Writes the whole buffer.
    ///
    /// Fails with [`Error::PartialWrite`] if the write stops making progress
    /// after some bytes have been written.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let mut nwritten = 0;
        let mut failure = None;
        while nwritten < buf.len() {
            let result = match self.file() {
                Ok(file) => file.write(&buf[nwritten..]),
                Err(err) => Err(err),
            };
            match result {
                Ok(0) => {
                    failure = Some(io::Error::from(io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => nwritten += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    tracing::debug!("Interrupted while writing, retrying");
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if nwritten > 0 {
            self.written_back(nwritten as i64);
        }
        match failure {
            None => Ok(nwritten),
            Some(err) if nwritten == 0 => Err(err.into()),
            Some(err) => {
                tracing::error!(%err, nwritten, "Write failed");
                Err(Error::PartialWrite {
                    written: nwritten,
                    source: err,
                })
            }
        }
    }

    fn written_back(&mut self, nwritten: i64) {
        self.dirty = true;
        self.begin = self.begin.min(self.curpos);
        self.curpos += nwritten;
        self.written += nwritten;
        self.lastpos = self.lastpos.max(self.curpos);
        if self.written <= WRITE_BUFFER {
            return;
        }

        if self.lastpos > self.begin {
            // This starts the writeback of begin..lastpos and drops what the
            // previous call has written back.  The range is extended to the
            // front because a partial page at the end is skipped the first
            // time and only dropped by a later call.
            let headdrop = self.begin.min(WRITE_BUFFER * 2);
            self.advise(
                self.begin - headdrop,
                self.lastpos - self.begin + headdrop,
                CacheAdvice::DontNeed,
            );
        }
        self.begin = self.curpos;
        self.lastpos = self.curpos;
        self.total_written += self.written;
        self.written = 0;

        // When writing faster than the disk, pages can still be dirty when the
        // above hint is given.  Another coarser pass catches them.
        if self.total_written > WRITE_FLUSH_THRESHOLD {
            let headdrop = (self.curpos - self.total_written).min(self.total_written * 2);
            self.advise(
                self.curpos - self.total_written - headdrop,
                self.total_written + headdrop,
                CacheAdvice::DontNeed,
            );
            self.total_written = 0;
        }
    }

    fn drop_cache(&mut self, offset: i64, len: i64) {
        // Widen the range so that pages only partially covered are dropped too.
        self.advise(
            offset - (FADVISE_GRANULARITY - 1),
            len + (FADVISE_GRANULARITY - 1) * 2,
            CacheAdvice::DontNeed,
        );
    }

    fn advise(&mut self, mut offset: i64, mut len: i64, advice: CacheAdvice) {
        let whole_file = offset == 0 && len == 0;
        if offset < 0 {
            len += offset;
            offset = 0;
        }
        if len <= 0 && !whole_file {
            return;
        }
        let Some(file) = self.file.as_ref() else {
            return;
        };
        tracing::trace!(offset, len, ?advice, "Cache hint");
        if let Err(err) = self
            .advisor
            .advise(file, offset as u64, len as u64, advice)
        {
            tracing::debug!(%err, offset, len, ?advice, "Cache hint failed");
        }
    }
}

impl<A: CacheAdvisor> Drop for TunedFile<A> {
    fn drop(&mut self) {
        let _ = self.close_file();
    }
}

impl<A: CacheAdvisor> Read for TunedFile<A> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TunedFile::read(self, buf)
    }
}

impl<A: CacheAdvisor> Write for TunedFile<A> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match TunedFile::write(self, buf) {
            Ok(n) => Ok(n),
            // Report the short write, the next call surfaces the error.
            Err(Error::PartialWrite { written, .. }) => Ok(written),
            Err(Error::IoError(err)) => Err(err),
            Err(err) => Err(io::Error::other(err)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<A: CacheAdvisor> Seek for TunedFile<A> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        TunedFile::seek(self, pos)
    }
}

fn retry_on_interrupt<F>(mut f: F) -> io::Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    loop {
        match f() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                tracing::debug!("Interrupted while reading, retrying");
            }
            result => return result,
        }
    }
}
