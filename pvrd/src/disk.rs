use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use pvrd_core::error::Error;
use pvrd_core::videodir::VideoDirectory;
use pvrd_core::*;

/// Output the disk usage of the video directory in JSON.
///
/// Every volume of a distributed video directory is taken into account.
#[derive(Args)]
pub struct CommandLine {
    /// Size of recordings already marked for deletion, in MB.
    ///
    /// It's counted as free space.
    #[arg(long, default_value_t = 0)]
    deleted_mb: u64,

    /// Directory holding recordings already marked for deletion.
    ///
    /// The size of its files is added to --deleted-mb.  Can be specified
    /// multiple times.
    #[arg(long)]
    deleted_dir: Vec<PathBuf>,

    /// Output the usage of each volume in addition to the total.
    #[arg(long)]
    volumes: bool,
}

impl CommandLine {
    fn deleted_mb(&self) -> u64 {
        self.deleted_dir
            .iter()
            .map(|dir| {
                let size_mb = file_util::dir_size_mb(dir);
                tracing::debug!(?dir, size_mb, "Deleted recordings");
                size_mb
            })
            .sum::<u64>()
            + self.deleted_mb
    }
}

pub fn main(config: Arc<config::Config>, cl: &CommandLine) -> Result<(), Error> {
    let video_dir = VideoDirectory::new(&config.video.dir);
    let usage = video_dir.disk_usage(cl.deleted_mb());
    let json = if cl.volumes {
        let volumes = video_dir
            .volumes()
            .map(|volume| {
                let space = video_dir.free_space_mb(&volume)?;
                Ok(serde_json::json!({
                    "path": volume,
                    "freeMb": space.free_mb,
                    "usedMb": space.used_mb,
                }))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        serde_json::json!({
            "total": usage,
            "volumes": volumes,
        })
    } else {
        serde_json::to_value(usage)?
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
