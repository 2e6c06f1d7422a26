use std::collections::HashMap;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;

use super::handler::EpgHandlers;
use super::models::CandidateEvent;
use super::models::Event;
use crate::models::ChannelId;
use crate::models::EventId;
use crate::si::RUNNING_STATUS_NOT_RUNNING;
use crate::si::RUNNING_STATUS_PAUSING;
use crate::si::TID_PRESENT_FOLLOWING;

/// Returns `true` if `version` is newer than `base` in the 5-bit version
/// sequence of a table.
///
/// Versions wrap around from 31 to 0, so half of the sequence following
/// `base` is considered newer.
pub fn is_newer_version(version: u8, base: u8) -> bool {
    version != base && (version.wrapping_sub(base) & 0x1F) < 16
}

// Versions out of the 5-bit range are never current.
fn is_at_least_version(version: u8, base: u8) -> bool {
    version <= 0x1F && (version == base || is_newer_version(version, base))
}

/// The events of a single channel.
///
/// Events are identified by their event id, or by their start time when it's
/// defined.  NVOD reference events have no start time and are only reachable
/// by their event id.
#[derive(Debug)]
pub struct Schedule {
    channel: ChannelId,
    events: Vec<Event>,
    by_id: HashMap<EventId, usize>,
    by_start: HashMap<DateTime<Utc>, usize>,
    has_running: bool,
    present_seen: Option<DateTime<Utc>>,
    modified: bool,
}

impl Schedule {
    pub fn new(channel: ChannelId) -> Self {
        Schedule {
            channel,
            events: vec![],
            by_id: HashMap::new(),
            by_start: HashMap::new(),
            has_running: false,
            present_seen: None,
            modified: false,
        }
    }

    /// Restores a schedule from persisted events.
    pub fn with_events(channel: ChannelId, events: Vec<Event>) -> Self {
        let mut schedule = Schedule::new(channel);
        schedule.events = events
            .into_iter()
            .map(|mut event| {
                event.channel = channel;
                event
            })
            .collect();
        schedule.sort();
        schedule.has_running = schedule.events.iter().any(Event::is_running);
        schedule
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn has_running(&self) -> bool {
        self.has_running
    }

    pub fn present_seen(&self) -> Option<DateTime<Utc>> {
        self.present_seen
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Looks up an event by its start time, or by its id if the start time
    /// is undefined.
    pub fn get_event(&self, event_id: EventId, start_time: Option<DateTime<Utc>>) -> Option<&Event> {
        self.find(event_id, start_time).map(|index| &self.events[index])
    }

    pub fn get_event_by_id(&self, event_id: EventId) -> Option<&Event> {
        self.by_id.get(&event_id).map(|&index| &self.events[index])
    }

    pub fn get_event_by_start(&self, start_time: DateTime<Utc>) -> Option<&Event> {
        self.by_start.get(&start_time).map(|&index| &self.events[index])
    }

    /// Merges an event into the schedule.
    ///
    /// A new event is created if no matching one exists.  An existing event
    /// is updated only if `table_id` is at least as current as the table it
    /// came from and the version differs.  Lower table ids are more current,
    /// table ids below the present/following table count as present.
    ///
    /// Returns `true` if the schedule has been modified.
    pub fn merge(
        &mut self,
        candidate: &CandidateEvent,
        table_id: u8,
        version: u8,
        handlers: &EpgHandlers,
        now: DateTime<Utc>,
    ) -> bool {
        let handled_externally = handlers.handled_externally(&self.channel);
        let existing = if handled_externally {
            None
        } else {
            self.find(candidate.event_id, candidate.start_time)
        };

        let index = match existing {
            Some(index) => {
                let event = &mut self.events[index];
                event.seen = Some(now);
                let current_table_id = event.table_id.max(TID_PRESENT_FOLLOWING);
                if table_id > current_table_id {
                    tracing::trace!(
                        channel = %self.channel,
                        %event.event_id,
                        table_id,
                        current_table_id,
                        "Ignored an event from a less current table"
                    );
                    return false;
                }
                if table_id == current_table_id && event.version == version {
                    return false;
                }
                let key = (event.event_id, event.start_time);
                // Some broadcasters use different ids for the same event in
                // different tables.
                handlers.set_event_id(event, candidate.event_id);
                handlers.set_start_time(event, candidate.start_time);
                handlers.set_duration(event, candidate.duration);
                self.rekey(index, key);
                index
            }
            None => {
                if handled_externally
                    && !handlers.is_update(
                        candidate.event_id,
                        candidate.start_time,
                        table_id,
                        version,
                    )
                {
                    return false;
                }
                let mut event = Event::new(candidate.event_id, self.channel);
                handlers.set_start_time(&mut event, candidate.start_time);
                handlers.set_duration(&mut event, candidate.duration);
                if handled_externally {
                    fill_event(&mut event, candidate, table_id, version, handlers, now);
                    return false;
                }
                self.push(event)
            }
        };

        if table_id == TID_PRESENT_FOLLOWING && candidate.running_status >= RUNNING_STATUS_NOT_RUNNING
        {
            self.set_running_status(index, candidate.running_status, now);
        }
        fill_event(
            &mut self.events[index],
            candidate,
            table_id,
            version,
            handlers,
            now,
        );
        self.modified = true;
        true
    }

    /// Adds an event which didn't come from a section.
    pub fn add_event(&mut self, event: &Event, handlers: &EpgHandlers, now: DateTime<Utc>) -> bool {
        let mut candidate = CandidateEvent::from(event);
        candidate.running_status = 0;
        self.merge(&candidate, event.table_id, event.version, handlers, now)
    }

    /// Sorts events by start time, keeping the order of simultaneous ones.
    pub fn sort(&mut self) {
        self.events.sort_by_key(|event| event.start_time);
        self.reindex();
    }

    /// Removes events in `[segment_start, segment_end)` superseded by the
    /// segment just received.
    ///
    /// The segment replaces every event from less current tables.  Within the
    /// same table, an event survives only if its version is at least
    /// `version`.
    pub fn drop_outdated(
        &mut self,
        segment_start: DateTime<Utc>,
        segment_end: DateTime<Utc>,
        table_id: u8,
        version: u8,
    ) {
        let before = self.events.len();
        let mut running_dropped = false;
        self.events.retain(|event| {
            let in_segment = event
                .start_time
                .is_some_and(|start| segment_start <= start && start < segment_end);
            if !in_segment {
                return true;
            }
            let outdated = event.table_id > table_id
                || (event.table_id == table_id && !is_at_least_version(event.version, version));
            if outdated {
                tracing::trace!(
                    channel = %event.channel,
                    %event.event_id,
                    event.table_id,
                    event.version,
                    "Dropped an outdated event"
                );
                running_dropped |= event.is_running();
            }
            !outdated
        });
        if self.events.len() != before {
            self.reindex();
            if running_dropped && self.has_running {
                self.clr_running_status();
            }
            self.modified = true;
        }
    }

    /// Records the running status announced in a present/following table.
    ///
    /// An event starting or running makes every earlier event not running.
    pub fn set_running_status(&mut self, index: usize, status: u8, now: DateTime<Utc>) {
        let start_time = self.events[index].start_time;
        for (i, event) in self.events.iter_mut().enumerate() {
            if i == index {
                if event.running_status > RUNNING_STATUS_NOT_RUNNING
                    || status > RUNNING_STATUS_NOT_RUNNING
                {
                    event.running_status = status;
                }
            } else if status >= RUNNING_STATUS_PAUSING && event.start_time < start_time {
                event.running_status = RUNNING_STATUS_NOT_RUNNING;
            }
        }
        self.has_running = self.events.iter().any(Event::is_running);
        self.present_seen = Some(now);
    }

    pub fn clr_running_status(&mut self) {
        for event in self.events.iter_mut().filter(|event| event.is_running()) {
            event.running_status = RUNNING_STATUS_NOT_RUNNING;
        }
        self.has_running = false;
    }

    /// The event on air at `now`.
    ///
    /// The running status announced by the broadcaster takes precedence over
    /// the start time.
    pub fn present_event(&self, now: DateTime<Utc>) -> Option<&Event> {
        if self.has_running {
            if let Some(event) = self.events.iter().find(|event| event.is_running()) {
                return Some(event);
            }
        }
        self.events.iter().find(|event| match (event.start_time, event.end_time()) {
            (Some(start), Some(end)) => start <= now && now < end,
            _ => false,
        })
    }

    pub fn following_event(&self, now: DateTime<Utc>) -> Option<&Event> {
        let after = match self.present_event(now).and_then(Event::end_time) {
            Some(end) => end,
            None => now,
        };
        self.events
            .iter()
            .find(|event| event.start_time.is_some_and(|start| start >= after))
    }

    /// Removes events which ended more than `linger` before `now`.
    pub fn cleanup(&mut self, now: DateTime<Utc>, linger: Duration) -> usize {
        let before = self.events.len();
        self.events.retain(|event| match event.end_time() {
            Some(end) => end + linger >= now,
            None => true,
        });
        let removed = before - self.events.len();
        if removed > 0 {
            self.reindex();
            self.has_running = self.events.iter().any(Event::is_running);
            self.modified = true;
        }
        removed
    }

    fn find(&self, event_id: EventId, start_time: Option<DateTime<Utc>>) -> Option<usize> {
        match start_time {
            Some(start_time) => self.by_start.get(&start_time).copied(),
            None => self.by_id.get(&event_id).copied(),
        }
    }

    fn push(&mut self, event: Event) -> usize {
        let index = self.events.len();
        self.by_id.insert(event.event_id, index);
        if let Some(start_time) = event.start_time {
            self.by_start.insert(start_time, index);
        }
        self.events.push(event);
        index
    }

    // Updates the indexes after the id or the start time of an event changed.
    fn rekey(&mut self, index: usize, (event_id, start_time): (EventId, Option<DateTime<Utc>>)) {
        let event = &self.events[index];
        if event.event_id != event_id {
            if self.by_id.get(&event_id) == Some(&index) {
                self.by_id.remove(&event_id);
            }
            self.by_id.insert(event.event_id, index);
        }
        if event.start_time != start_time {
            if let Some(start_time) = start_time {
                if self.by_start.get(&start_time) == Some(&index) {
                    self.by_start.remove(&start_time);
                }
            }
            if let Some(start_time) = event.start_time {
                self.by_start.insert(start_time, index);
            }
        }
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        self.by_start.clear();
        for (index, event) in self.events.iter().enumerate() {
            self.by_id.insert(event.event_id, index);
            if let Some(start_time) = event.start_time {
                self.by_start.insert(start_time, index);
            }
        }
    }
}

fn fill_event(
    event: &mut Event,
    candidate: &CandidateEvent,
    table_id: u8,
    version: u8,
    handlers: &EpgHandlers,
    now: DateTime<Utc>,
) {
    if event.table_id > TID_PRESENT_FOLLOWING {
        event.table_id = table_id;
    }
    event.version = version;
    event.seen = Some(now);
    handlers.set_title(event, candidate.title.as_deref());
    handlers.set_short_text(event, candidate.short_text.as_deref());
    handlers.set_description(event, candidate.description.as_deref());
    handlers.set_contents(event, &candidate.contents);
    handlers.set_parental_rating(event, candidate.parental_rating);
    handlers.set_star_rating(event, candidate.star_rating);
    handlers.set_vps(event, candidate.vps);
    handlers.set_components(event, &candidate.components);
    if candidate.custom_genre.is_some() {
        event.custom_genre = candidate.custom_genre.clone();
    }
    if candidate.atsc_source_id.is_some() {
        event.atsc_source_id = candidate.atsc_source_id;
    }
    handlers.fix_epg_bugs(event);
    handlers.handle_event(event);
}
