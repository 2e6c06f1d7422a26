// <coverage:exclude>
use std::collections::HashMap;

use super::*;

#[derive(Default)]
pub(crate) struct DiskSpaceStub(HashMap<PathBuf, DiskSpace>);

impl DiskSpaceStub {
    pub(crate) fn with<P: AsRef<Path>>(mut self, volume: P, free_mb: u64, used_mb: u64) -> Self {
        self.0
            .insert(volume.as_ref().to_path_buf(), DiskSpace { free_mb, used_mb });
        self
    }
}

impl DiskSpaceQuery for DiskSpaceStub {
    fn disk_space(&self, volume: &Path) -> io::Result<DiskSpace> {
        self.0
            .get(volume)
            .copied()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}
