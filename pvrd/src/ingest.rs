use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Args;

use pvrd_core::channels::ChannelTable;
use pvrd_core::epg::ScheduleManager;
use pvrd_core::error::Error;
use pvrd_core::*;

/// Feed EIT sections into the schedule cache.
///
/// FILE contains concatenated EIT sections as read from a demultiplexer.
/// Schedules are loaded from epg.cache-dir first and saved back after all
/// sections have been processed.
#[derive(Args)]
pub struct CommandLine {
    /// Remove events which ended before the linger time.
    #[arg(long)]
    cleanup: bool,

    /// File containing EIT sections.
    #[arg()]
    file: PathBuf,
}

pub fn main(config: Arc<config::Config>, cl: &CommandLine) -> Result<(), Error> {
    let channels = Arc::new(ChannelTable::from_config(&config.channels));
    let manager = ScheduleManager::new(&config.epg, channels);
    if let Err(err) = manager.load() {
        tracing::warn!(%err, "Failed to load schedules, start with empty ones");
    }

    let data = std::fs::read(&cl.file)?;
    let now = Utc::now();
    let mut sections = 0;
    let mut updated = 0;
    let mut failed = 0;
    for section in Sections::new(&data) {
        sections += 1;
        match manager.process_section(section, now) {
            Ok(true) => updated += 1,
            Ok(false) => (),
            Err(err) => {
                tracing::debug!(%err, "Skipped section");
                failed += 1;
            }
        }
    }

    if cl.cleanup {
        let removed = manager.cleanup(now);
        tracing::info!(removed, "Cleaned up schedules");
    }

    tracing::info!(sections, updated, failed, file = ?cl.file, "Ingested");

    if manager.is_modified() && !manager.save() {
        tracing::warn!("Schedules were not saved");
    }
    Ok(())
}

/// Splits a byte stream into PSI sections by their section_length field.
///
/// A truncated trailing section is dropped.
struct Sections<'a> {
    data: &'a [u8],
}

impl<'a> Sections<'a> {
    fn new(data: &'a [u8]) -> Self {
        Sections { data }
    }
}

impl<'a> Iterator for Sections<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        // Stuffing bytes may follow the last section.
        if self.data.len() < 3 || self.data[0] == 0xFF {
            return None;
        }
        let section_length = (((self.data[1] & 0x0F) as usize) << 8) | self.data[2] as usize;
        let len = 3 + section_length;
        if len > self.data.len() {
            tracing::warn!(len, remaining = self.data.len(), "Truncated section");
            self.data = &[];
            return None;
        }
        let (section, rest) = self.data.split_at(len);
        self.data = rest;
        Some(section)
    }
}
