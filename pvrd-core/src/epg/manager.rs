use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use indexmap::IndexMap;

use super::decoder::EitDecoder;
use super::handler::EpgHandler;
use super::handler::EpgHandlers;
use super::models::CandidateEvent;
use super::models::Event;
use super::schedule::Schedule;
use crate::channels::ChannelRegistry;
use crate::config::EpgConfig;
use crate::error::Error;
use crate::file_util;
use crate::models::ChannelId;
use crate::models::EventId;
use crate::si::EitEvent;
use crate::si::TID_PRESENT_FOLLOWING;

const INDEX_FILE_NAME: &str = "schedules.json";

/// Owns the schedules of all channels.
///
/// Sections of a channel must be processed in the order they're received.
pub struct ScheduleManager {
    config: EpgConfig,
    decoder: EitDecoder,
    handlers: EpgHandlers,
    channels: Arc<dyn ChannelRegistry>,
    schedules: Mutex<Schedules>,
}

#[derive(Default)]
struct Schedules {
    map: IndexMap<ChannelId, Schedule>,
    syncers: HashMap<(ChannelId, u8), SectionSyncer>,
    modified: bool,
}

impl Schedules {
    fn get_or_create(&mut self, channel: ChannelId) -> &mut Schedule {
        self.map
            .entry(channel)
            .or_insert_with(|| Schedule::new(channel))
    }
}

impl ScheduleManager {
    pub fn new(config: &EpgConfig, channels: Arc<dyn ChannelRegistry>) -> Self {
        ScheduleManager {
            config: config.clone(),
            decoder: EitDecoder::new(config),
            handlers: EpgHandlers::new(config.bugfix_level),
            channels,
            schedules: Default::default(),
        }
    }

    /// Registers a handler.  Handlers registered earlier take precedence.
    pub fn register_handler<H: EpgHandler + 'static>(&mut self, handler: H) {
        self.handlers.register(handler);
    }

    /// Decodes an EIT section and merges its events.
    ///
    /// Returns `Ok(true)` if a schedule has been modified.  Sections which
    /// are ignored by policy yield `Ok(false)`.
    pub fn process_section(&self, data: &[u8], now: DateTime<Utc>) -> Result<bool, Error> {
        let section = self.decoder.parse_section(data)?;
        let channel = section.channel_id();
        if !channel.is_valid() {
            tracing::debug!(%channel, "Ignored a section of an invalid channel");
            return Ok(false);
        }
        if self.handlers.ignore_channel(&channel) {
            tracing::trace!(%channel, "Ignored channel");
            return Ok(false);
        }

        let table_id = section.table_id;
        let version = section.version;
        let section_number = section.section_number;

        let mut guard = self.lock();
        let schedules = &mut *guard;

        let syncer = schedules.syncers.entry((channel, table_id)).or_default();
        if !syncer.check(version, section_number) {
            tracing::trace!(%channel, table_id, version, section_number, "Already processed");
            return Ok(false);
        }

        if !self.handlers.begin_segment_transfer(&channel) {
            tracing::debug!(%channel, table_id, "Segment transfer refused");
            return Ok(false);
        }

        let schedule = schedules.get_or_create(channel);
        let events: Vec<&EitEvent> = section
            .events
            .iter()
            .filter(|event| {
                !self
                    .handlers
                    .handle_eit_event(schedule, event, table_id, version)
            })
            .collect();

        let linger_limit = now - self.linger_time();
        let mut empty = true;
        let mut segment: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        let mut candidates = vec![];
        for event in events {
            let Some(candidate) = self.decoder.decode_event(&channel, event, now) else {
                continue;
            };
            empty = false;
            if let Some(start_time) = candidate.start_time {
                let end_time = start_time + Duration::seconds(candidate.duration as i64);
                if end_time < linger_limit {
                    continue;
                }
                segment = match segment {
                    Some((segment_start, segment_end)) => {
                        Some((segment_start.min(start_time), segment_end.max(end_time)))
                    }
                    None => Some((start_time, end_time)),
                };
            }
            candidates.push(candidate);
        }

        for candidate in candidates.iter_mut() {
            resolve_time_shifted(&schedules.map, &channel, candidate);
        }

        let portal_name = candidates
            .iter()
            .filter_map(|candidate| candidate.portal_name.clone())
            .last();

        let schedule = schedules.get_or_create(channel);
        let mut modified = false;
        for candidate in candidates.iter() {
            modified |= schedule.merge(candidate, table_id, version, &self.handlers, now);
        }
        if empty && table_id == TID_PRESENT_FOLLOWING && section_number == 0 {
            schedule.clr_running_status();
        }
        if modified {
            self.handlers.sort_schedule(schedule);
            if let Some((segment_start, segment_end)) = segment {
                self.handlers.drop_outdated(
                    schedule,
                    segment_start,
                    segment_end,
                    table_id,
                    version,
                );
            }
            schedules.modified = true;
        }
        self.handlers.end_segment_transfer(modified);

        if let Some(syncer) = schedules.syncers.get_mut(&(channel, table_id)) {
            syncer.processed(section_number);
        }
        drop(guard);

        if let Some(portal_name) = portal_name {
            if !self.channels.set_portal_name(&channel, &portal_name) {
                tracing::trace!(%channel, "Portal name for an unknown channel");
            }
        }

        Ok(modified)
    }

    pub fn get_event(
        &self,
        channel: &ChannelId,
        event_id: EventId,
        start_time: Option<DateTime<Utc>>,
    ) -> Option<Event> {
        self.lock()
            .map
            .get(channel)
            .and_then(|schedule| schedule.get_event(event_id, start_time))
            .cloned()
    }

    /// A snapshot of the events of a channel in the stored order.
    pub fn events(&self, channel: &ChannelId) -> Vec<Event> {
        self.lock()
            .map
            .get(channel)
            .map(|schedule| schedule.events().to_vec())
            .unwrap_or_default()
    }

    pub fn present_event(&self, channel: &ChannelId, now: DateTime<Utc>) -> Option<Event> {
        self.lock()
            .map
            .get(channel)
            .and_then(|schedule| schedule.present_event(now))
            .cloned()
    }

    pub fn following_event(&self, channel: &ChannelId, now: DateTime<Utc>) -> Option<Event> {
        self.lock()
            .map
            .get(channel)
            .and_then(|schedule| schedule.following_event(now))
            .cloned()
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.lock().map.keys().cloned().collect()
    }

    /// Adds an event which didn't come from a section.
    pub fn add_event(&self, event: Event, now: DateTime<Utc>) -> Result<bool, Error> {
        if !event.channel.is_valid() {
            return Err(Error::InvalidChannel(event.channel));
        }
        let mut guard = self.lock();
        let schedules = &mut *guard;
        let schedule = schedules.get_or_create(event.channel);
        let modified = schedule.add_event(&event, &self.handlers, now);
        if modified {
            self.handlers.sort_schedule(schedule);
            schedules.modified = true;
        }
        Ok(modified)
    }

    /// Adds an ATSC event identified by the frequency and the source id of
    /// its channel.
    pub fn add_atsc_event(
        &self,
        frequency: u32,
        source_id: u16,
        mut event: Event,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let Some(channel) = self.channels.get_by_source(frequency, source_id) else {
            tracing::warn!(frequency, source_id, %event.event_id, "No channel for an ATSC event, dropped");
            return Err(Error::ChannelNotFound);
        };
        event.channel = channel.id;
        event.atsc_source_id = Some(source_id);
        self.add_event(event, now)
    }

    pub fn clear(&self) {
        let mut schedules = self.lock();
        schedules.map.clear();
        schedules.syncers.clear();
        schedules.modified = true;
        tracing::info!("Cleared all schedules");
    }

    pub fn remove_channel(&self, channel: &ChannelId) -> bool {
        let mut schedules = self.lock();
        schedules.syncers.retain(|(id, _), _| id != channel);
        if schedules.map.shift_remove(channel).is_some() {
            schedules.modified = true;
            true
        } else {
            false
        }
    }

    /// Removes events which ended before the linger time.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let linger = self.linger_time();
        let mut schedules = self.lock();
        let removed: usize = schedules
            .map
            .values_mut()
            .map(|schedule| schedule.cleanup(now, linger))
            .sum();
        if removed > 0 {
            tracing::debug!(removed, "Removed expired events");
            schedules.modified = true;
        }
        removed
    }

    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    /// Saves modified schedules into `epg.cache-dir`.
    ///
    /// Each schedule is saved into its own file, and `schedules.json` maps
    /// channels to the files.  Failures are logged and the in-memory
    /// schedules are kept.
    pub fn save(&self) -> bool {
        let Some(cache_dir) = self.config.cache_dir.as_ref() else {
            tracing::warn!("No epg.cache-dir specified, skip to save schedules");
            return false;
        };

        let mut schedules = self.lock();
        let mut ok = true;
        let mut index = IndexMap::new();
        for (channel, schedule) in schedules.map.iter_mut() {
            let file_name = format!("{}.json", channel);
            if schedule.is_modified() {
                if file_util::save_json(schedule.events(), cache_dir.join(&file_name)) {
                    schedule.set_modified(false);
                } else {
                    ok = false;
                }
            }
            index.insert(*channel, file_name);
        }
        if schedules.modified {
            if file_util::save_json(&index, cache_dir.join(INDEX_FILE_NAME)) {
                schedules.modified = !ok;
            } else {
                ok = false;
            }
        }
        if ok {
            tracing::info!(channels = index.len(), "Saved schedules");
        }
        ok
    }

    /// Replaces the schedules with the ones saved in `epg.cache-dir`.
    ///
    /// A schedule file which can't be loaded is skipped.
    pub fn load(&self) -> Result<(), Error> {
        let Some(cache_dir) = self.config.cache_dir.as_ref() else {
            return Err(Error::NoCacheDir);
        };

        let json_path = cache_dir.join(INDEX_FILE_NAME);
        tracing::debug!(?json_path, "Loading schedules...");
        let index: IndexMap<ChannelId, PathBuf> = file_util::load_json(&json_path)?;

        let mut map = IndexMap::new();
        for (channel, file_name) in index.into_iter() {
            let path = cache_dir.join(&file_name);
            match file_util::load_json::<Vec<Event>, _>(&path) {
                Ok(events) => {
                    map.insert(channel, Schedule::with_events(channel, events));
                }
                Err(err) => {
                    tracing::error!(%err, %channel, ?path, "Failed to load schedule, skipped");
                }
            }
        }

        let mut schedules = self.lock();
        schedules.map = map;
        schedules.syncers.clear();
        schedules.modified = false;
        tracing::info!(channels = schedules.map.len(), "Loaded schedules");
        Ok(())
    }

    fn linger_time(&self) -> Duration {
        self.config
            .linger_time
            .and_then(|linger| Duration::from_std(linger).ok())
            .unwrap_or_else(Duration::zero)
    }

    fn lock(&self) -> MutexGuard<'_, Schedules> {
        self.schedules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Copies the texts of the event referenced by a time-shifted event.
fn resolve_time_shifted(
    map: &IndexMap<ChannelId, Schedule>,
    channel: &ChannelId,
    candidate: &mut CandidateEvent,
) {
    let Some((service_id, event_id)) = candidate.time_shifted else {
        return;
    };
    let referenced = map
        .get(&channel.sibling(service_id))
        .and_then(|schedule| schedule.get_event_by_id(event_id));
    match referenced {
        Some(referenced) => {
            candidate.title = referenced.title.clone();
            candidate.short_text = referenced.short_text.clone();
            candidate.description = referenced.description.clone();
        }
        None => {
            tracing::trace!(%channel, %service_id, %event_id, "Referenced event not found");
        }
    }
}

/// Tracks the sections of a table already processed.
#[derive(Default)]
struct SectionSyncer {
    version: Option<u8>,
    processed: [u64; 4],
}

impl SectionSyncer {
    /// Returns `true` if the section has to be processed.
    fn check(&mut self, version: u8, section_number: u8) -> bool {
        if self.version != Some(version) {
            self.version = Some(version);
            self.processed = [0; 4];
        }
        let (word, bit) = Self::position(section_number);
        self.processed[word] & bit == 0
    }

    fn processed(&mut self, section_number: u8) {
        let (word, bit) = Self::position(section_number);
        self.processed[word] |= bit;
    }

    fn position(section_number: u8) -> (usize, u64) {
        ((section_number / 64) as usize, 1 << (section_number % 64))
    }
}
