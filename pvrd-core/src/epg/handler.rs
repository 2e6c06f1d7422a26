use chrono::DateTime;
use chrono::Utc;

use super::bugfix;
use super::models::Event;
use super::schedule::Schedule;
use crate::models::ChannelId;
use crate::models::Component;
use crate::models::EventId;
use crate::si::EitEvent;

/// A hook into the EPG pipeline.
///
/// Every method returns `true` when the handler took care of the matter, in
/// which case the handlers registered later and the default action are
/// skipped.  All methods default to `false`.
pub trait EpgHandler: Send + Sync {
    /// Discards every section of `channel` before decoding.
    fn ignore_channel(&self, _channel: &ChannelId) -> bool {
        false
    }

    /// Events of `channel` are stored by the handler.
    fn handled_externally(&self, _channel: &ChannelId) -> bool {
        false
    }

    /// Forces an update of an externally handled event.
    fn is_update(
        &self,
        _event_id: EventId,
        _start_time: Option<DateTime<Utc>>,
        _table_id: u8,
        _version: u8,
    ) -> bool {
        false
    }

    /// Consumes a raw event entry before it's decoded.
    fn handle_eit_event(
        &self,
        _schedule: &mut Schedule,
        _event: &EitEvent,
        _table_id: u8,
        _version: u8,
    ) -> bool {
        false
    }

    fn set_event_id(&self, _event: &mut Event, _event_id: EventId) -> bool {
        false
    }

    fn set_title(&self, _event: &mut Event, _title: Option<&str>) -> bool {
        false
    }

    fn set_short_text(&self, _event: &mut Event, _short_text: Option<&str>) -> bool {
        false
    }

    fn set_description(&self, _event: &mut Event, _description: Option<&str>) -> bool {
        false
    }

    fn set_contents(&self, _event: &mut Event, _contents: &[u8]) -> bool {
        false
    }

    fn set_parental_rating(&self, _event: &mut Event, _rating: u16) -> bool {
        false
    }

    fn set_star_rating(&self, _event: &mut Event, _rating: u8) -> bool {
        false
    }

    fn set_start_time(&self, _event: &mut Event, _start_time: Option<DateTime<Utc>>) -> bool {
        false
    }

    fn set_duration(&self, _event: &mut Event, _duration: u32) -> bool {
        false
    }

    fn set_vps(&self, _event: &mut Event, _vps: Option<DateTime<Utc>>) -> bool {
        false
    }

    fn set_components(&self, _event: &mut Event, _components: &[Component]) -> bool {
        false
    }

    fn fix_epg_bugs(&self, _event: &mut Event) -> bool {
        false
    }

    /// Last chance to touch an event before it's stored.
    fn handle_event(&self, _event: &mut Event) -> bool {
        false
    }

    fn sort_schedule(&self, _schedule: &mut Schedule) -> bool {
        false
    }

    fn drop_outdated(
        &self,
        _schedule: &mut Schedule,
        _segment_start: DateTime<Utc>,
        _segment_end: DateTime<Utc>,
        _table_id: u8,
        _version: u8,
    ) -> bool {
        false
    }

    /// Returning `false` aborts the transfer of the section.
    fn begin_segment_transfer(&self, _channel: &ChannelId) -> bool {
        true
    }

    fn end_segment_transfer(&self, _modified: bool) -> bool {
        false
    }
}

/// The ordered chain of registered handlers.
///
/// Handlers are asked in registration order.
pub struct EpgHandlers {
    handlers: Vec<Box<dyn EpgHandler>>,
    bugfix_level: u8,
}

impl EpgHandlers {
    pub fn new(bugfix_level: u8) -> Self {
        EpgHandlers {
            handlers: vec![],
            bugfix_level,
        }
    }

    pub fn register<H: EpgHandler + 'static>(&mut self, handler: H) {
        self.handlers.push(Box::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn ignore_channel(&self, channel: &ChannelId) -> bool {
        self.handlers.iter().any(|h| h.ignore_channel(channel))
    }

    pub fn handled_externally(&self, channel: &ChannelId) -> bool {
        self.handlers.iter().any(|h| h.handled_externally(channel))
    }

    pub fn is_update(
        &self,
        event_id: EventId,
        start_time: Option<DateTime<Utc>>,
        table_id: u8,
        version: u8,
    ) -> bool {
        self.handlers
            .iter()
            .any(|h| h.is_update(event_id, start_time, table_id, version))
    }

    pub fn handle_eit_event(
        &self,
        schedule: &mut Schedule,
        event: &EitEvent,
        table_id: u8,
        version: u8,
    ) -> bool {
        self.handlers
            .iter()
            .any(|h| h.handle_eit_event(schedule, event, table_id, version))
    }

    pub fn set_event_id(&self, event: &mut Event, event_id: EventId) {
        if !self.handlers.iter().any(|h| h.set_event_id(event, event_id)) {
            event.event_id = event_id;
        }
    }

    pub fn set_title(&self, event: &mut Event, title: Option<&str>) {
        if !self.handlers.iter().any(|h| h.set_title(event, title)) {
            event.title = title.map(str::to_string);
        }
    }

    pub fn set_short_text(&self, event: &mut Event, short_text: Option<&str>) {
        if !self.handlers.iter().any(|h| h.set_short_text(event, short_text)) {
            event.short_text = short_text.map(str::to_string);
        }
    }

    pub fn set_description(&self, event: &mut Event, description: Option<&str>) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_description(event, description))
        {
            event.description = description.map(str::to_string);
        }
    }

    pub fn set_contents(&self, event: &mut Event, contents: &[u8]) {
        if !self.handlers.iter().any(|h| h.set_contents(event, contents)) {
            event.contents = contents.to_vec();
        }
    }

    pub fn set_parental_rating(&self, event: &mut Event, rating: u16) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_parental_rating(event, rating))
        {
            event.parental_rating = rating;
        }
    }

    pub fn set_star_rating(&self, event: &mut Event, rating: u8) {
        if !self.handlers.iter().any(|h| h.set_star_rating(event, rating)) {
            event.star_rating = rating;
        }
    }

    pub fn set_start_time(&self, event: &mut Event, start_time: Option<DateTime<Utc>>) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_start_time(event, start_time))
        {
            event.start_time = start_time;
        }
    }

    pub fn set_duration(&self, event: &mut Event, duration: u32) {
        if !self.handlers.iter().any(|h| h.set_duration(event, duration)) {
            event.duration = duration;
        }
    }

    pub fn set_vps(&self, event: &mut Event, vps: Option<DateTime<Utc>>) {
        if !self.handlers.iter().any(|h| h.set_vps(event, vps)) {
            event.vps = vps;
        }
    }

    pub fn set_components(&self, event: &mut Event, components: &[Component]) {
        if !self
            .handlers
            .iter()
            .any(|h| h.set_components(event, components))
        {
            event.components = components.to_vec();
        }
    }

    pub fn fix_epg_bugs(&self, event: &mut Event) {
        if !self.handlers.iter().any(|h| h.fix_epg_bugs(event)) {
            bugfix::fix_epg_bugs(event, self.bugfix_level);
        }
    }

    pub fn handle_event(&self, event: &mut Event) {
        let _ = self.handlers.iter().any(|h| h.handle_event(event));
    }

    pub fn sort_schedule(&self, schedule: &mut Schedule) {
        if !self.handlers.iter().any(|h| h.sort_schedule(schedule)) {
            schedule.sort();
        }
    }

    pub fn drop_outdated(
        &self,
        schedule: &mut Schedule,
        segment_start: DateTime<Utc>,
        segment_end: DateTime<Utc>,
        table_id: u8,
        version: u8,
    ) {
        let handled = self.handlers.iter().any(|h| {
            h.drop_outdated(schedule, segment_start, segment_end, table_id, version)
        });
        if !handled {
            schedule.drop_outdated(segment_start, segment_end, table_id, version);
        }
    }

    pub fn begin_segment_transfer(&self, channel: &ChannelId) -> bool {
        self.handlers
            .iter()
            .all(|h| h.begin_segment_transfer(channel))
    }

    pub fn end_segment_transfer(&self, modified: bool) {
        let _ = self
            .handlers
            .iter()
            .any(|h| h.end_segment_transfer(modified));
    }
}

impl Default for EpgHandlers {
    fn default() -> Self {
        EpgHandlers::new(crate::config::EpgConfig::MAX_BUGFIX_LEVEL)
    }
}
