use std::path::PathBuf;

use crate::models::ChannelId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0:?} is not in the video directory")]
    NotInVideoDirectory(PathBuf),
    #[error("No volume has {0} MB free")]
    NoVolumeSpace(u64),
    #[error("Timed out waiting for lock file {0:?}")]
    LockTimeout(PathBuf),
    #[error("Invalid section: {0}")]
    InvalidSection(&'static str),
    #[error("CRC mismatch")]
    CrcMismatch,
    #[error("Channel not found")]
    ChannelNotFound,
    #[error("Invalid channel id: {0}")]
    InvalidChannelId(String),
    #[error("Invalid channel: {0}")]
    InvalidChannel(ChannelId),
    #[error("No epg.cache-dir specified")]
    NoCacheDir,
    #[error("Write failed after {written} bytes: {source}")]
    PartialWrite {
        written: usize,
        source: std::io::Error,
    },
    #[error("std::io error: {0}")]
    IoError(std::io::Error),
    #[error("std::num error: {0}")]
    ParseIntError(std::num::ParseIntError),
    #[error("JSON error: {0}")]
    JsonError(serde_json::Error),
    #[error("YAML error: {0}")]
    YamlError(serde_yaml::Error),
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}

impl Error {
    /// The OS error code carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::IoError(err) | Self::PartialWrite { source: err, .. } => err.raw_os_error(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::ParseIntError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err)
    }
}
