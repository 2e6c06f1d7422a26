// <coverage:exclude>
use chrono::Timelike;

use super::*;

/// Builds raw EIT sections with a valid CRC.
pub(crate) struct EitSectionBuilder {
    table_id: u8,
    triple: (u16, u16, u16),
    version: u8,
    section_number: u8,
    last_section_number: u8,
    events: Vec<u8>,
}

impl EitSectionBuilder {
    pub(crate) fn new(table_id: u8, triple: (u16, u16, u16)) -> Self {
        EitSectionBuilder {
            table_id,
            triple,
            version: 0,
            section_number: 0,
            last_section_number: 0,
            events: vec![],
        }
    }

    pub(crate) fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn section(mut self, number: u8, last: u8) -> Self {
        self.section_number = number;
        self.last_section_number = last;
        self
    }

    pub(crate) fn event<F>(
        mut self,
        event_id: u16,
        start_time: Option<DateTime<Utc>>,
        duration: u32,
        f: F,
    ) -> Self
    where
        F: FnOnce(EitEventBuilder) -> EitEventBuilder,
    {
        let start = match start_time {
            Some(time) => encode_start_time(time),
            None => [0xFF; 5],
        };
        let event = f(EitEventBuilder {
            start,
            running_status: 0,
            descriptors: vec![],
        });
        self.events.extend_from_slice(&event_id.to_be_bytes());
        self.events.extend_from_slice(&event.start);
        self.events.extend_from_slice(&encode_bcd_time(duration));
        let loop_length = event.descriptors.len() as u16 | ((event.running_status as u16) << 13);
        self.events.extend_from_slice(&loop_length.to_be_bytes());
        self.events.extend_from_slice(&event.descriptors);
        self
    }

    pub(crate) fn raw_event(mut self, data: &[u8]) -> Self {
        self.events.extend_from_slice(data);
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let section_length = (HEADER_SIZE - 3 + self.events.len() + CRC_SIZE) as u16;
        let mut data = vec![self.table_id];
        data.extend_from_slice(&(0xF000 | section_length).to_be_bytes());
        data.extend_from_slice(&self.triple.2.to_be_bytes());
        data.push(0xC1 | (self.version << 1));
        data.push(self.section_number);
        data.push(self.last_section_number);
        data.extend_from_slice(&self.triple.1.to_be_bytes());
        data.extend_from_slice(&self.triple.0.to_be_bytes());
        data.push(self.last_section_number);
        data.push(self.table_id);
        data.extend_from_slice(&self.events);
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        data
    }
}

pub(crate) struct EitEventBuilder {
    start: [u8; 5],
    running_status: u8,
    descriptors: Vec<u8>,
}

impl EitEventBuilder {
    pub(crate) fn raw_start(mut self, start: [u8; 5]) -> Self {
        self.start = start;
        self
    }

    pub(crate) fn running_status(mut self, status: u8) -> Self {
        self.running_status = status;
        self
    }

    pub(crate) fn raw_descriptor(mut self, tag: u8, data: &[u8]) -> Self {
        self.descriptors.push(tag);
        self.descriptors.push(data.len() as u8);
        self.descriptors.extend_from_slice(data);
        self
    }

    pub(crate) fn short_event(self, language: &str, name: &str, text: &str) -> Self {
        let mut data = language.as_bytes().to_vec();
        push_text(&mut data, name);
        push_text(&mut data, text);
        self.raw_descriptor(0x4D, &data)
    }

    pub(crate) fn extended_event(
        self,
        number: u8,
        last_number: u8,
        language: &str,
        items: &[(&str, &str)],
        text: &str,
    ) -> Self {
        let mut data = vec![(number << 4) | last_number];
        data.extend_from_slice(language.as_bytes());
        let mut items_data = vec![];
        for (description, item) in items {
            push_text(&mut items_data, description);
            push_text(&mut items_data, item);
        }
        data.push(items_data.len() as u8);
        data.extend_from_slice(&items_data);
        push_text(&mut data, text);
        self.raw_descriptor(0x4E, &data)
    }

    pub(crate) fn time_shifted(self, service_id: u16, event_id: u16) -> Self {
        let mut data = service_id.to_be_bytes().to_vec();
        data.extend_from_slice(&event_id.to_be_bytes());
        self.raw_descriptor(0x4F, &data)
    }

    pub(crate) fn component(
        self,
        stream_content: u8,
        component_type: u8,
        language: &str,
        text: &str,
    ) -> Self {
        let mut data = vec![0xF0 | stream_content, component_type, 0];
        data.extend_from_slice(language.as_bytes());
        data.extend_from_slice(text.as_bytes());
        self.raw_descriptor(0x50, &data)
    }

    pub(crate) fn content(self, nibbles: &[(u8, u8)]) -> Self {
        let data: Vec<u8> = nibbles
            .iter()
            .flat_map(|&(level1, level2)| [(level1 << 4) | level2, 0])
            .collect();
        self.raw_descriptor(0x54, &data)
    }

    pub(crate) fn parental_rating(self, ratings: &[(&str, u8)]) -> Self {
        let data: Vec<u8> = ratings
            .iter()
            .flat_map(|&(country, rating)| {
                let mut entry = country.as_bytes().to_vec();
                entry.push(rating);
                entry
            })
            .collect();
        self.raw_descriptor(0x55, &data)
    }

    pub(crate) fn pdc(self, month: u32, day: u32, hour: u32, minute: u32) -> Self {
        let label = (day << 15) | (month << 11) | (hour << 6) | minute;
        let bytes = label.to_be_bytes();
        self.raw_descriptor(0x69, &[0xF0 | bytes[1], bytes[2], bytes[3]])
    }

    pub(crate) fn linkage(self, triple: (u16, u16, u16), linkage_type: u8, data: &[u8]) -> Self {
        let mut payload = triple.1.to_be_bytes().to_vec();
        payload.extend_from_slice(&triple.0.to_be_bytes());
        payload.extend_from_slice(&triple.2.to_be_bytes());
        payload.push(linkage_type);
        payload.extend_from_slice(data);
        self.raw_descriptor(0x4A, &payload)
    }

    pub(crate) fn dish_rating(self, rating: u16) -> Self {
        self.raw_descriptor(0x89, &rating.to_be_bytes())
    }

    pub(crate) fn dish_text(self, tag: u8, text: &str) -> Self {
        let mut data = vec![0x00];
        data.extend_from_slice(text.as_bytes());
        self.raw_descriptor(tag, &data)
    }
}

fn push_text(data: &mut Vec<u8>, text: &str) {
    data.push(text.len() as u8);
    data.extend_from_slice(text.as_bytes());
}

fn encode_bcd(value: u32) -> u8 {
    (((value / 10) << 4) | (value % 10)) as u8
}

fn encode_bcd_time(seconds: u32) -> [u8; 3] {
    [
        encode_bcd(seconds / 3600),
        encode_bcd(seconds / 60 % 60),
        encode_bcd(seconds % 60),
    ]
}

fn encode_start_time(time: DateTime<Utc>) -> [u8; 5] {
    let epoch = NaiveDate::from_ymd_opt(1858, 11, 17).unwrap();
    let mjd = (time.date_naive() - epoch).num_days() as u16;
    let bcd = encode_bcd_time(time.num_seconds_from_midnight());
    let mjd = mjd.to_be_bytes();
    [mjd[0], mjd[1], bcd[0], bcd[1], bcd[2]]
}
