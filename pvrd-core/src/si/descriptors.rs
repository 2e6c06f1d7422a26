use super::read_u16;
use super::text::decode_text;
use super::text::normalize_language_code;

pub const LINKAGE_TYPE_PREMIERE: u8 = 0xB0;

const TAG_LINKAGE: u8 = 0x4A;
const TAG_SHORT_EVENT: u8 = 0x4D;
const TAG_EXTENDED_EVENT: u8 = 0x4E;
const TAG_TIME_SHIFTED_EVENT: u8 = 0x4F;
const TAG_COMPONENT: u8 = 0x50;
const TAG_CONTENT: u8 = 0x54;
const TAG_PARENTAL_RATING: u8 = 0x55;
const TAG_PDC: u8 = 0x69;
const TAG_DISH_RATING: u8 = 0x89;
const TAG_DISH_SHORT_EVENT: u8 = 0x91;
const TAG_DISH_EXTENDED_EVENT: u8 = 0x92;

#[derive(Clone, Debug, PartialEq)]
pub struct ExtendedItem {
    pub description: String,
    pub item: String,
}

/// Descriptors found in the descriptor loop of an event entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Descriptor {
    ShortEvent {
        language: String,
        name: String,
        text: String,
    },
    ExtendedEvent {
        number: u8,
        last_number: u8,
        language: String,
        items: Vec<ExtendedItem>,
        text: String,
    },
    TimeShiftedEvent {
        reference_service_id: u16,
        reference_event_id: u16,
    },
    Component {
        stream_content: u8,
        component_type: u8,
        component_tag: u8,
        language: String,
        text: String,
    },
    /// `(level1 << 4) | level2` for each classification.
    Content(Vec<u8>),
    ParentalRating(Vec<(String, u8)>),
    Pdc {
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    },
    Linkage {
        transport_stream_id: u16,
        original_network_id: u16,
        service_id: u16,
        linkage_type: u8,
        private_data: Vec<u8>,
    },
    DishRating(u16),
    DishShortEvent(String),
    DishExtendedEvent(String),
    Other(u8),
}

impl Descriptor {
    /// Parses a descriptor loop.  Malformed descriptors are skipped.
    pub fn parse_loop(mut data: &[u8]) -> Vec<Descriptor> {
        let mut descriptors = vec![];
        while data.len() >= 2 {
            let tag = data[0];
            let len = data[1] as usize;
            if 2 + len > data.len() {
                tracing::warn!(tag, len, "Descriptor exceeds the loop, skipped");
                break;
            }
            match Self::parse(tag, &data[2..2 + len]) {
                Some(Descriptor::Other(_)) => (),
                Some(descriptor) => descriptors.push(descriptor),
                None => tracing::warn!(tag, len, "Malformed descriptor, skipped"),
            }
            data = &data[2 + len..];
        }
        descriptors
    }

    fn parse(tag: u8, data: &[u8]) -> Option<Self> {
        match tag {
            TAG_SHORT_EVENT => Self::parse_short_event(data),
            TAG_EXTENDED_EVENT => Self::parse_extended_event(data),
            TAG_TIME_SHIFTED_EVENT => {
                if data.len() < 4 {
                    return None;
                }
                Some(Descriptor::TimeShiftedEvent {
                    reference_service_id: read_u16(data),
                    reference_event_id: read_u16(&data[2..]),
                })
            }
            TAG_COMPONENT => {
                if data.len() < 6 {
                    return None;
                }
                Some(Descriptor::Component {
                    stream_content: data[0] & 0x0F,
                    component_type: data[1],
                    component_tag: data[2],
                    language: normalize_language_code(&data[3..6]),
                    text: decode_text(&data[6..]),
                })
            }
            TAG_CONTENT => {
                if data.len() % 2 != 0 {
                    return None;
                }
                Some(Descriptor::Content(
                    data.chunks_exact(2).map(|pair| pair[0]).collect(),
                ))
            }
            TAG_PARENTAL_RATING => {
                if data.len() % 4 != 0 {
                    return None;
                }
                Some(Descriptor::ParentalRating(
                    data.chunks_exact(4)
                        .map(|entry| (normalize_language_code(&entry[..3]), entry[3]))
                        .collect(),
                ))
            }
            TAG_PDC => {
                if data.len() < 3 {
                    return None;
                }
                // 4 reserved bits followed by a 20-bit label.
                let label = u32::from_be_bytes([0, data[0], data[1], data[2]]) & 0x000F_FFFF;
                Some(Descriptor::Pdc {
                    day: (label >> 15) & 0x1F,
                    month: (label >> 11) & 0x0F,
                    hour: (label >> 6) & 0x1F,
                    minute: label & 0x3F,
                })
            }
            TAG_LINKAGE => {
                if data.len() < 7 {
                    return None;
                }
                Some(Descriptor::Linkage {
                    transport_stream_id: read_u16(data),
                    original_network_id: read_u16(&data[2..]),
                    service_id: read_u16(&data[4..]),
                    linkage_type: data[6],
                    private_data: data[7..].to_vec(),
                })
            }
            TAG_DISH_RATING => {
                if data.len() < 2 {
                    return None;
                }
                Some(Descriptor::DishRating(read_u16(data)))
            }
            TAG_DISH_SHORT_EVENT => Self::parse_dish_text(data).map(Descriptor::DishShortEvent),
            TAG_DISH_EXTENDED_EVENT => {
                Self::parse_dish_text(data).map(Descriptor::DishExtendedEvent)
            }
            _ => Some(Descriptor::Other(tag)),
        }
    }

    fn parse_short_event(data: &[u8]) -> Option<Self> {
        let language = normalize_language_code(data.get(..3)?);
        let (name, rest) = split_length_prefixed(data.get(3..)?)?;
        let (text, _) = split_length_prefixed(rest)?;
        Some(Descriptor::ShortEvent {
            language,
            name: decode_text(name),
            text: decode_text(text),
        })
    }

    fn parse_extended_event(data: &[u8]) -> Option<Self> {
        let numbers = *data.first()?;
        let language = normalize_language_code(data.get(1..4)?);
        let (mut items_data, rest) = split_length_prefixed(data.get(4..)?)?;
        let mut items = vec![];
        while !items_data.is_empty() {
            let (description, rest) = split_length_prefixed(items_data)?;
            let (item, rest) = split_length_prefixed(rest)?;
            items.push(ExtendedItem {
                description: decode_text(description),
                item: decode_text(item),
            });
            items_data = rest;
        }
        let (text, _) = split_length_prefixed(rest)?;
        Some(Descriptor::ExtendedEvent {
            number: numbers >> 4,
            last_number: numbers & 0x0F,
            language,
            items,
            text: decode_text(text),
        })
    }

    // Compressed payloads need the Huffman tables of the provider, which we
    // don't have.
    fn parse_dish_text(data: &[u8]) -> Option<String> {
        let (&flags, text) = data.split_first()?;
        if flags & 0x80 != 0 {
            return None;
        }
        Some(decode_text(text))
    }
}

fn split_length_prefixed(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&len, rest) = data.split_first()?;
    let len = len as usize;
    if len > rest.len() {
        return None;
    }
    Some(rest.split_at(len))
}
