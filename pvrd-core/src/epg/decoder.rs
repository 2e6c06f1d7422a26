use chrono::DateTime;
use chrono::Datelike;
use chrono::Duration;
use chrono::Local;
use chrono::TimeZone;
use chrono::Utc;

use super::models::CandidateEvent;
use super::models::MAX_EVENT_CONTENTS;
use crate::config::EpgConfig;
use crate::error::Error;
use crate::models::ChannelId;
use crate::models::Component;
use crate::models::EventId;
use crate::models::ServiceId;
use crate::si::Descriptor;
use crate::si::EitEvent;
use crate::si::EitSection;
use crate::si::ExtendedItem;
use crate::si::LINKAGE_TYPE_PREMIERE;
use crate::si::StartTime;
use crate::si::decode_text;
use crate::si::same_language;

/// Events decoded from one section.
#[derive(Clone, Debug)]
pub struct DecodedSection {
    pub channel: ChannelId,
    pub table_id: u8,
    pub version: u8,
    pub section_number: u8,
    pub events: Vec<CandidateEvent>,
}

/// Turns EIT sections into candidate events.
pub struct EitDecoder {
    languages: Vec<String>,
    extended_text_separator: String,
}

impl EitDecoder {
    pub fn new(config: &EpgConfig) -> Self {
        EitDecoder {
            languages: config.languages.clone(),
            extended_text_separator: config.extended_text_separator.clone(),
        }
    }

    /// Checks the structure and the CRC of a section and parses it.
    pub fn parse_section(&self, data: &[u8]) -> Result<EitSection, Error> {
        EitSection::parse(data).inspect_err(|err| {
            tracing::debug!(%err, "Dropped section");
        })
    }

    pub fn decode_section(&self, data: &[u8], now: DateTime<Utc>) -> Result<DecodedSection, Error> {
        let section = self.parse_section(data)?;
        let channel = section.channel_id();
        let events = section
            .events
            .iter()
            .filter_map(|event| self.decode_event(&channel, event, now))
            .collect();
        Ok(DecodedSection {
            channel,
            table_id: section.table_id,
            version: section.version,
            section_number: section.section_number,
            events,
        })
    }

    /// Decodes one event entry.
    ///
    /// Returns `None` for bogus entries.  NVOD reference events have an
    /// undefined start time and are kept.
    pub fn decode_event(
        &self,
        channel: &ChannelId,
        event: &EitEvent,
        now: DateTime<Utc>,
    ) -> Option<CandidateEvent> {
        let start_time = match event.start_time {
            StartTime::Invalid => {
                tracing::trace!(%channel, event.event_id, "Invalid start time, dropped");
                return None;
            }
            StartTime::Defined(_) if event.duration == 0 => {
                tracing::trace!(%channel, event.event_id, "Zero duration, dropped");
                return None;
            }
            StartTime::Defined(time) => Some(time),
            StartTime::Undefined => None,
        };

        let mut candidate =
            CandidateEvent::new(EventId::from(event.event_id), start_time, event.duration);
        candidate.running_status = event.running_status;

        let mut short_pref = None;
        let mut short_event = None;
        let mut extended_pref = None;
        let mut extended = ExtendedEventCollector::default();
        let mut rating_pref = None;
        let mut dish_title = None;
        let mut dish_description = None;

        for descriptor in event.descriptors.iter() {
            match descriptor {
                Descriptor::ShortEvent {
                    language,
                    name,
                    text,
                } => {
                    if self.is_preferred(language, &mut short_pref) {
                        short_event = Some((name, text));
                    }
                }
                Descriptor::ExtendedEvent {
                    number,
                    last_number,
                    language,
                    items,
                    text,
                } => {
                    if self.is_preferred(language, &mut extended_pref) {
                        extended.restart(language);
                    }
                    extended.add(language, *number, *last_number, items, text);
                }
                Descriptor::TimeShiftedEvent {
                    reference_service_id,
                    reference_event_id,
                } => {
                    candidate.time_shifted = Some((
                        ServiceId::from(*reference_service_id),
                        EventId::from(*reference_event_id),
                    ));
                }
                Descriptor::Content(contents) => {
                    let room = MAX_EVENT_CONTENTS.saturating_sub(candidate.contents.len());
                    candidate
                        .contents
                        .extend(contents.iter().copied().take(room));
                }
                Descriptor::ParentalRating(ratings) => {
                    for (country, rating) in ratings.iter() {
                        if self.is_preferred(country, &mut rating_pref) {
                            candidate.parental_rating = dvb_minimum_age(*rating);
                        }
                    }
                }
                Descriptor::DishRating(rating) => {
                    candidate.star_rating = ((rating >> 13) & 0x07) as u8;
                    candidate.parental_rating = ((rating >> 10) & 0x07) << 10 | (rating & 0x03FF);
                }
                Descriptor::Pdc {
                    month,
                    day,
                    hour,
                    minute,
                } => {
                    candidate.vps = vps_time(now, *month, *day, *hour, *minute);
                }
                Descriptor::Linkage {
                    transport_stream_id,
                    original_network_id,
                    service_id,
                    linkage_type,
                    private_data,
                } if *linkage_type == LINKAGE_TYPE_PREMIERE => {
                    let on_air = match (start_time, candidate.duration) {
                        (Some(start), duration) => {
                            start <= now && now < start + Duration::seconds(duration as i64)
                        }
                        _ => false,
                    };
                    if !on_air {
                        continue;
                    }
                    let target = ChannelId::from((
                        *original_network_id,
                        *transport_stream_id,
                        *service_id,
                    ));
                    if target == *channel {
                        candidate.portal_name = non_empty(decode_text(private_data));
                    } else {
                        // Links between channels aren't maintained.
                        tracing::trace!(%channel, %target, "Ignored link to another channel");
                    }
                }
                Descriptor::Component {
                    stream_content,
                    component_type,
                    language,
                    text,
                    ..
                } => {
                    // 1=MPEG-2 video, 2=MPEG-1 audio, 3=subtitles, 4=AC-3 audio,
                    // 5=H.264 video, 6=HE-AAC audio
                    if (1..=6).contains(stream_content) && *component_type != 0 {
                        candidate.components.push(Component {
                            stream_class: *stream_content,
                            component_type: *component_type,
                            language: language.clone(),
                            description: non_empty(text.clone()),
                        });
                    }
                }
                Descriptor::DishShortEvent(text) => dish_title = Some(text),
                Descriptor::DishExtendedEvent(text) => dish_description = Some(text),
                _ => (),
            }
        }

        if let Some((name, text)) = short_event {
            candidate.title = non_empty(name.clone());
            candidate.short_text = non_empty(text.clone());
        } else if let Some(title) = dish_title {
            candidate.title = non_empty(title.clone());
        }
        candidate.description = extended
            .into_text(&self.extended_text_separator)
            .or_else(|| dish_description.cloned().and_then(non_empty));

        Some(candidate)
    }

    // The first descriptor seen is taken unless a later one has a language
    // which ranks higher in the preference list.
    fn is_preferred(&self, language: &str, current: &mut Option<usize>) -> bool {
        let rank = self
            .languages
            .iter()
            .position(|preferred| same_language(preferred, language));
        match (*current, rank) {
            (None, rank) => {
                *current = Some(rank.unwrap_or(self.languages.len()));
                true
            }
            (Some(current_rank), Some(rank)) if rank < current_rank => {
                *current = Some(rank);
                true
            }
            _ => false,
        }
    }
}

/// Collects the fragments of an extended event text.
///
/// The text is committed only when the last fragment has been seen.
#[derive(Default)]
struct ExtendedEventCollector<'a> {
    language: Option<&'a str>,
    fragments: Vec<(&'a [ExtendedItem], &'a str)>,
    committed: Option<(Vec<&'a ExtendedItem>, Vec<&'a str>)>,
}

impl<'a> ExtendedEventCollector<'a> {
    fn restart(&mut self, language: &'a str) {
        self.language = Some(language);
        self.fragments.clear();
    }

    fn add(
        &mut self,
        language: &str,
        number: u8,
        last_number: u8,
        items: &'a [ExtendedItem],
        text: &'a str,
    ) {
        match self.language {
            Some(collecting) if same_language(collecting, language) => (),
            _ => return,
        }
        self.fragments.push((items, text));
        if number == last_number {
            let items = self
                .fragments
                .iter()
                .flat_map(|(items, _)| items.iter())
                .collect();
            let texts = self.fragments.iter().map(|(_, text)| *text).collect();
            self.committed = Some((items, texts));
            self.language = None;
        }
    }

    fn into_text(self, separator: &str) -> Option<String> {
        let (items, texts) = self.committed?;
        let items = items
            .iter()
            .map(|item| format!("{}: {}", item.description, item.item))
            .collect::<Vec<_>>()
            .join("\n");
        let text = texts.join(separator);
        let description = match (items.is_empty(), text.is_empty()) {
            (true, _) => text,
            (false, true) => items,
            (false, false) => format!("{items}\n{text}"),
        };
        non_empty(description)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

// The rating is the minimum age minus 3.  0x11..0x13 are used by CSAT.
fn dvb_minimum_age(rating: u8) -> u16 {
    match rating {
        0x01..=0x0F => rating as u16 + 3,
        0x11 => 10,
        0x12 => 12,
        0x13 => 16,
        _ => 0,
    }
}

// The label carries no year.  Broadcasters never announce far ahead, so the
// year nearest to the current date is taken.
fn vps_time(
    now: DateTime<Utc>,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Utc>> {
    let now = now.with_timezone(&Local);
    let year = match (now.month(), month) {
        (12, 1) => now.year() + 1,
        (1, 12) => now.year() - 1,
        _ => now.year(),
    };
    Local
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .earliest()
        .map(|time| time.with_timezone(&Utc))
}
