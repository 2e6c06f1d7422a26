//! Decoding of DVB SI sections carrying event information.

mod descriptors;
mod text;

#[cfg(test)]
pub(crate) mod stub;

use chrono::DateTime;
use chrono::Days;
use chrono::NaiveDate;
use chrono::NaiveTime;
use chrono::Utc;

use crate::error::Error;
use crate::models::ChannelId;

pub use descriptors::Descriptor;
pub use descriptors::ExtendedItem;
pub use descriptors::LINKAGE_TYPE_PREMIERE;
pub use text::decode_text;
pub use text::normalize_language_code;
pub use text::same_language;

pub const TID_PRESENT_FOLLOWING: u8 = 0x4E;
pub const TID_PRESENT_FOLLOWING_OTHER: u8 = 0x4F;
pub const TID_SCHEDULE_FIRST: u8 = 0x50;
pub const TID_SCHEDULE_LAST: u8 = 0x6F;

pub const RUNNING_STATUS_UNDEFINED: u8 = 0;
pub const RUNNING_STATUS_NOT_RUNNING: u8 = 1;
pub const RUNNING_STATUS_STARTS_SOON: u8 = 2;
pub const RUNNING_STATUS_PAUSING: u8 = 3;
pub const RUNNING_STATUS_RUNNING: u8 = 4;

const HEADER_SIZE: usize = 14;
const CRC_SIZE: usize = 4;
const EVENT_HEADER_SIZE: usize = 12;
const MAX_SECTION_SIZE: usize = 4096;

/// One EIT section.
#[derive(Clone, Debug, PartialEq)]
pub struct EitSection {
    pub table_id: u8,
    pub service_id: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub events: Vec<EitEvent>,
}

/// Start time field of an event entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartTime {
    Defined(DateTime<Utc>),
    /// All bits set, used by NVOD reference events.
    Undefined,
    Invalid,
}

impl StartTime {
    pub fn defined(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Defined(time) => Some(*time),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EitEvent {
    pub event_id: u16,
    pub start_time: StartTime,
    // in seconds
    pub duration: u32,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

impl EitSection {
    /// Parses a complete section including its CRC.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 3 {
            return Err(Error::InvalidSection("too short"));
        }
        let table_id = data[0];
        if !(TID_PRESENT_FOLLOWING..=TID_SCHEDULE_LAST).contains(&table_id) {
            return Err(Error::InvalidSection("not an EIT"));
        }
        if data[1] & 0x80 == 0 {
            return Err(Error::InvalidSection("no section syntax"));
        }
        let section_length = read_u16(&data[1..]) as usize & 0x0FFF;
        let total = section_length + 3;
        if total > MAX_SECTION_SIZE || total > data.len() {
            return Err(Error::InvalidSection("truncated"));
        }
        if total < HEADER_SIZE + CRC_SIZE {
            return Err(Error::InvalidSection("too short"));
        }
        let data = &data[..total];
        if crc32(data) != 0 {
            return Err(Error::CrcMismatch);
        }

        let mut section = EitSection {
            table_id,
            service_id: read_u16(&data[3..]),
            version: (data[5] >> 1) & 0x1F,
            current_next: data[5] & 0x01 != 0,
            section_number: data[6],
            last_section_number: data[7],
            transport_stream_id: read_u16(&data[8..]),
            original_network_id: read_u16(&data[10..]),
            segment_last_section_number: data[12],
            last_table_id: data[13],
            events: vec![],
        };

        let mut rest = &data[HEADER_SIZE..total - CRC_SIZE];
        while !rest.is_empty() {
            if rest.len() < EVENT_HEADER_SIZE {
                return Err(Error::InvalidSection("truncated event"));
            }
            let loop_length = read_u16(&rest[10..]) as usize & 0x0FFF;
            let end = EVENT_HEADER_SIZE + loop_length;
            if end > rest.len() {
                return Err(Error::InvalidSection("truncated descriptor loop"));
            }
            section.events.push(EitEvent {
                event_id: read_u16(rest),
                start_time: decode_start_time(&rest[2..7]),
                duration: decode_bcd_time(&rest[7..10]).unwrap_or(0),
                running_status: rest[10] >> 5,
                free_ca_mode: rest[10] & 0x10 != 0,
                descriptors: Descriptor::parse_loop(&rest[EVENT_HEADER_SIZE..end]),
            });
            rest = &rest[end..];
        }
        Ok(section)
    }

    pub fn channel_id(&self) -> ChannelId {
        (
            self.original_network_id,
            self.transport_stream_id,
            self.service_id,
        )
            .into()
    }

    pub fn is_present_following(&self) -> bool {
        self.table_id == TID_PRESENT_FOLLOWING || self.table_id == TID_PRESENT_FOLLOWING_OTHER
    }
}

fn read_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

/// CRC-32/MPEG-2 of `data`.
///
/// A section including its trailing CRC yields 0.
pub fn crc32(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF, |crc, &byte| {
        CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize] ^ (crc << 8)
    })
}

static CRC_TABLE: [u32; 256] = make_crc_table();

const fn make_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn decode_bcd(byte: u8) -> Option<u32> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    if hi > 9 || lo > 9 {
        return None;
    }
    Some((hi * 10 + lo) as u32)
}

/// Decodes a 24-bit BCD `hhmmss` into seconds.
pub fn decode_bcd_time(data: &[u8]) -> Option<u32> {
    let hours = decode_bcd(data[0])?;
    let minutes = decode_bcd(data[1])?;
    let seconds = decode_bcd(data[2])?;
    if minutes > 59 || seconds > 59 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Decodes a 40-bit MJD + BCD UTC time.
pub fn decode_start_time(data: &[u8]) -> StartTime {
    if data.iter().all(|&b| b == 0xFF) {
        return StartTime::Undefined;
    }
    let mjd = read_u16(data);
    let Some(seconds) = decode_bcd_time(&data[2..5]).filter(|&secs| secs < 24 * 3600) else {
        return StartTime::Invalid;
    };
    // MJD 0 is 1858-11-17.
    let date = NaiveDate::from_ymd_opt(1858, 11, 17)
        .and_then(|epoch| epoch.checked_add_days(Days::new(mjd as u64)));
    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0);
    match (date, time) {
        // An all-zero field is what a broken encoder sends.
        _ if mjd == 0 => StartTime::Invalid,
        (Some(date), Some(time)) => StartTime::Defined(date.and_time(time).and_utc()),
        _ => StartTime::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::stub::EitSectionBuilder;
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn test_crc32() {
        assert_eq!(crc32(b"123456789"), 0x0376_E6E7);
        let mut data = b"123456789".to_vec();
        data.extend_from_slice(&crc32(b"123456789").to_be_bytes());
        assert_eq!(crc32(&data), 0);
    }

    #[test]
    fn test_decode_start_time() {
        // Example from EN 300 468 Annex C.
        assert_eq!(
            decode_start_time(&[0xC0, 0x79, 0x12, 0x45, 0x00]),
            StartTime::Defined(Utc.with_ymd_and_hms(1993, 10, 13, 12, 45, 0).unwrap())
        );
        assert_eq!(
            decode_start_time(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            StartTime::Undefined
        );
        assert_eq!(
            decode_start_time(&[0xC0, 0x79, 0x25, 0x00, 0x00]),
            StartTime::Invalid
        );
        assert_eq!(
            decode_start_time(&[0xC0, 0x79, 0x1A, 0x00, 0x00]),
            StartTime::Invalid
        );
        assert_eq!(
            decode_start_time(&[0x00, 0x00, 0x00, 0x00, 0x00]),
            StartTime::Invalid
        );
    }

    #[test]
    fn test_decode_bcd_time() {
        assert_eq!(decode_bcd_time(&[0x01, 0x45, 0x30]), Some(6330));
        assert_eq!(decode_bcd_time(&[0x00, 0x00, 0x00]), Some(0));
        assert_eq!(decode_bcd_time(&[0x01, 0x60, 0x00]), None);
        assert_eq!(decode_bcd_time(&[0x0A, 0x00, 0x00]), None);
    }

    #[test]
    fn test_parse() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 20, 15, 0).unwrap();
        let data = EitSectionBuilder::new(0x50, (1, 1051, 28106))
            .version(7)
            .section(2, 8)
            .event(0x1234, Some(start), 5400, |event| {
                event.running_status(4).short_event("deu", "Tagesschau", "Nachrichten")
            })
            .build();

        assert_matches!(EitSection::parse(&data), Ok(section) => {
            assert_eq!(section.table_id, 0x50);
            assert_eq!(section.version, 7);
            assert!(section.current_next);
            assert_eq!(section.section_number, 2);
            assert_eq!(section.last_section_number, 8);
            assert_eq!(section.channel_id(), ChannelId::from((1, 1051, 28106)));
            assert_eq!(section.events.len(), 1);
            let event = &section.events[0];
            assert_eq!(event.event_id, 0x1234);
            assert_eq!(event.start_time, StartTime::Defined(start));
            assert_eq!(event.duration, 5400);
            assert_eq!(event.running_status, 4);
            assert_eq!(event.descriptors, vec![Descriptor::ShortEvent {
                language: "deu".to_string(),
                name: "Tagesschau".to_string(),
                text: "Nachrichten".to_string(),
            }]);
        });
    }

    #[test]
    fn test_parse_invalid() {
        let mut data = EitSectionBuilder::new(0x4E, (1, 2, 3)).build();
        assert_matches!(EitSection::parse(&data), Ok(section) => {
            assert!(section.events.is_empty());
            assert!(section.is_present_following());
        });

        assert_matches!(
            EitSection::parse(&data[..2]),
            Err(Error::InvalidSection(_))
        );
        assert_matches!(
            EitSection::parse(&data[..data.len() - 1]),
            Err(Error::InvalidSection(_))
        );

        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert_matches!(EitSection::parse(&data), Err(Error::CrcMismatch));

        let data = EitSectionBuilder::new(0x42, (1, 2, 3)).build();
        assert_matches!(EitSection::parse(&data), Err(Error::InvalidSection(_)));
    }

    #[test]
    fn test_parse_truncated_descriptor_loop() {
        let data = EitSectionBuilder::new(0x50, (1, 2, 3))
            .raw_event(&[0x00, 0x01, 0xC0, 0x79, 0x12, 0x45, 0x00, 0x00, 0x30, 0x00, 0x00, 0x20])
            .build();
        assert_matches!(EitSection::parse(&data), Err(Error::InvalidSection(_)));
    }

    #[test]
    fn test_parse_skips_malformed_descriptor() {
        let data = EitSectionBuilder::new(0x50, (1, 2, 3))
            .event(1, None, 60, |event| {
                event
                    .raw_descriptor(0x4D, &[b'd', b'e', b'u', 10])
                    .content(&[(0x1, 0x2)])
            })
            .build();
        assert_matches!(EitSection::parse(&data), Ok(section) => {
            assert_eq!(section.events[0].start_time, StartTime::Undefined);
            assert_eq!(section.events[0].descriptors, vec![Descriptor::Content(vec![0x12])]);
        });
    }
}
