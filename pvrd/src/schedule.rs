use std::sync::Arc;

use chrono::Utc;
use clap::Args;

use pvrd_core::channels::ChannelTable;
use pvrd_core::epg::ScheduleManager;
use pvrd_core::error::Error;
use pvrd_core::models::ChannelId;
use pvrd_core::*;

/// Output the cached schedule of a channel in JSON.
#[derive(Args)]
pub struct CommandLine {
    /// Output only the present and following events.
    #[arg(long)]
    now: bool,

    /// Channel ID in the form of NID-TSID-SID[-SOURCE_ID].
    #[arg()]
    channel: ChannelId,
}

pub fn main(config: Arc<config::Config>, cl: &CommandLine) -> Result<(), Error> {
    let channels = Arc::new(ChannelTable::from_config(&config.channels));
    let manager = ScheduleManager::new(&config.epg, channels);
    manager.load()?;

    let json = if cl.now {
        let now = Utc::now();
        serde_json::json!({
            "present": manager.present_event(&cl.channel, now),
            "following": manager.following_event(&cl.channel, now),
        })
    } else {
        serde_json::to_value(manager.events(&cl.channel))?
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
