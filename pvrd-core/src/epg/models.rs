use std::fmt;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::models::ChannelId;
use crate::models::Component;
use crate::models::EventId;
use crate::models::ServiceId;
use crate::si::RUNNING_STATUS_PAUSING;

/// Table id of an event which hasn't been merged from any table yet.
pub const TABLE_ID_NONE: u8 = 0xFF;
/// Version of an event which hasn't been merged from any table yet.
pub const VERSION_NONE: u8 = 0xFF;
pub const MAX_EVENT_CONTENTS: usize = 4;

/// A program event stored in a schedule.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: EventId,
    pub channel: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atsc_source_id: Option<u16>,
    pub table_id: u8,
    pub version: u8,
    #[serde(default)]
    pub running_status: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub start_time: Option<DateTime<Utc>>,
    // in seconds
    pub duration: u32,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub vps: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contents: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_genre: Option<String>,
    #[serde(default)]
    pub parental_rating: u16,
    #[serde(default)]
    pub star_rating: u8,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(skip)]
    pub seen: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(event_id: EventId, channel: ChannelId) -> Self {
        Event {
            event_id,
            channel,
            atsc_source_id: None,
            table_id: TABLE_ID_NONE,
            version: VERSION_NONE,
            running_status: 0,
            title: None,
            short_text: None,
            description: None,
            start_time: None,
            duration: 0,
            vps: None,
            contents: vec![],
            custom_genre: None,
            parental_rating: 0,
            star_rating: 0,
            components: vec![],
            seen: None,
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .map(|start_time| start_time + Duration::seconds(self.duration as i64))
    }

    pub fn is_running(&self) -> bool {
        self.running_status >= RUNNING_STATUS_PAUSING
    }

    pub fn genre(&self) -> Option<Genre> {
        self.contents.first().map(|&content| Genre::from(content >> 4))
    }

    pub fn sub_genre(&self) -> Option<u8> {
        self.contents.first().map(|&content| content & 0x0F)
    }
}

/// An event decoded from an EIT section, not merged yet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateEvent {
    pub event_id: EventId,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: u32,
    pub running_status: u8,
    pub title: Option<String>,
    pub short_text: Option<String>,
    pub description: Option<String>,
    pub contents: Vec<u8>,
    pub custom_genre: Option<String>,
    pub parental_rating: u16,
    pub star_rating: u8,
    pub vps: Option<DateTime<Utc>>,
    pub components: Vec<Component>,
    pub atsc_source_id: Option<u16>,
    // The texts are copied from the referenced event of a sibling service.
    pub time_shifted: Option<(ServiceId, EventId)>,
    // Name announced by a Premiere linkage while the event is on air.
    pub portal_name: Option<String>,
}

impl CandidateEvent {
    pub fn new(event_id: EventId, start_time: Option<DateTime<Utc>>, duration: u32) -> Self {
        CandidateEvent {
            event_id,
            start_time,
            duration,
            ..Default::default()
        }
    }
}

impl From<&Event> for CandidateEvent {
    fn from(event: &Event) -> Self {
        CandidateEvent {
            event_id: event.event_id,
            start_time: event.start_time,
            duration: event.duration,
            running_status: event.running_status,
            title: event.title.clone(),
            short_text: event.short_text.clone(),
            description: event.description.clone(),
            contents: event.contents.clone(),
            custom_genre: event.custom_genre.clone(),
            parental_rating: event.parental_rating,
            star_rating: event.star_rating,
            vps: event.vps,
            components: event.components.clone(),
            atsc_source_id: event.atsc_source_id,
            time_shifted: None,
            portal_name: None,
        }
    }
}

/// Level 1 content classification (EN 300 468, table 28).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Genre {
    Undefined,
    MovieDrama,
    NewsCurrentAffairs,
    ShowGameShow,
    Sports,
    ChildrenYouth,
    MusicBalletDance,
    ArtsCulture,
    SocialPoliticalEconomics,
    EducationScienceFactual,
    LeisureHobbies,
    SpecialCharacteristics,
    UserDefined,
    Reserved(u8),
}

impl From<u8> for Genre {
    fn from(level1: u8) -> Self {
        match level1 {
            0x0 => Self::Undefined,
            0x1 => Self::MovieDrama,
            0x2 => Self::NewsCurrentAffairs,
            0x3 => Self::ShowGameShow,
            0x4 => Self::Sports,
            0x5 => Self::ChildrenYouth,
            0x6 => Self::MusicBalletDance,
            0x7 => Self::ArtsCulture,
            0x8 => Self::SocialPoliticalEconomics,
            0x9 => Self::EducationScienceFactual,
            0xA => Self::LeisureHobbies,
            0xB => Self::SpecialCharacteristics,
            0xF => Self::UserDefined,
            level1 => Self::Reserved(level1),
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "Undefined",
            Self::MovieDrama => "Movie/Drama",
            Self::NewsCurrentAffairs => "News/Current affairs",
            Self::ShowGameShow => "Show/Game show",
            Self::Sports => "Sports",
            Self::ChildrenYouth => "Children's/Youth programmes",
            Self::MusicBalletDance => "Music/Ballet/Dance",
            Self::ArtsCulture => "Arts/Culture",
            Self::SocialPoliticalEconomics => "Social/Political issues/Economics",
            Self::EducationScienceFactual => "Education/Science/Factual topics",
            Self::LeisureHobbies => "Leisure hobbies",
            Self::SpecialCharacteristics => "Special characteristics",
            Self::UserDefined => "User defined",
            Self::Reserved(level1) => return write!(f, "Reserved({:X})", level1),
        };
        f.write_str(name)
    }
}
