use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct NetworkId(u16);

impl NetworkId {
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NID#{:04X}", self.0)
    }
}

impl From<u16> for NetworkId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct TransportStreamId(u16);

impl TransportStreamId {
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for TransportStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TSID#{:04X}", self.0)
    }
}

impl From<u16> for TransportStreamId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct ServiceId(u16);

impl ServiceId {
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SID#{:04X}", self.0)
    }
}

impl From<u16> for ServiceId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

// DVB event ids are 16 bits wide, but externally fed events may use the full
// 32-bit range.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct EventId(u32);

impl EventId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EID#{:04X}", self.0)
    }
}

impl From<u32> for EventId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<u16> for EventId {
    fn from(value: u16) -> Self {
        Self(value as u32)
    }
}

/// Identity of a broadcast service.
///
/// The canonical string form is `<nid>-<tsid>-<sid>` in decimal, followed by
/// `-<source-id>` for ATSC channels.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    nid: NetworkId,
    tsid: TransportStreamId,
    sid: ServiceId,
    source_id: Option<u16>,
}

impl ChannelId {
    pub fn new(nid: NetworkId, tsid: TransportStreamId, sid: ServiceId) -> Self {
        ChannelId {
            nid,
            tsid,
            sid,
            source_id: None,
        }
    }

    pub fn with_source_id(mut self, source_id: u16) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn nid(&self) -> NetworkId {
        self.nid
    }

    pub fn tsid(&self) -> TransportStreamId {
        self.tsid
    }

    pub fn sid(&self) -> ServiceId {
        self.sid
    }

    pub fn source_id(&self) -> Option<u16> {
        self.source_id
    }

    pub fn is_valid(&self) -> bool {
        self.sid.value() != 0 && (self.nid.value() != 0 || self.tsid.value() != 0)
    }

    /// The identity of another service on the same network and transport
    /// stream.
    pub fn sibling(&self, sid: ServiceId) -> Self {
        ChannelId::new(self.nid, self.tsid, sid)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.nid.value(),
            self.tsid.value(),
            self.sid.value()
        )?;
        if let Some(source_id) = self.source_id {
            write!(f, "-{}", source_id)?;
        }
        Ok(())
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let (nid, tsid, sid, source_id) = match parts.as_slice() {
            [nid, tsid, sid] => (nid, tsid, sid, None),
            [nid, tsid, sid, source_id] => (nid, tsid, sid, Some(source_id)),
            _ => return Err(Error::InvalidChannelId(s.to_string())),
        };
        let mut id = ChannelId::new(
            nid.parse::<u16>()?.into(),
            tsid.parse::<u16>()?.into(),
            sid.parse::<u16>()?.into(),
        );
        if let Some(source_id) = source_id {
            id = id.with_source_id(source_id.parse()?);
        }
        Ok(id)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.to_string()
    }
}

impl From<(u16, u16, u16)> for ChannelId {
    fn from(triple: (u16, u16, u16)) -> Self {
        ChannelId::new(triple.0.into(), triple.1.into(), triple.2.into())
    }
}

/// A stream component announced for an event.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    // 1=MPEG-2 video, 2=MPEG-1 audio, 3=subtitles, 4=AC-3 audio,
    // 5=H.264 video, 6=HE-AAC audio
    pub stream_class: u8,
    pub component_type: u8,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use test_log::test;

    #[test]
    fn test_channel_id_is_valid() {
        assert!(!ChannelId::from((0, 0, 5)).is_valid());
        assert!(ChannelId::from((1, 0, 5)).is_valid());
        assert!(ChannelId::from((0, 1, 5)).is_valid());
        assert!(!ChannelId::from((1, 1, 0)).is_valid());
        assert!(!ChannelId::from((0, 0, 0)).is_valid());
    }

    #[test]
    fn test_channel_id_string_form() {
        let id = ChannelId::from((1, 1051, 28106));
        assert_eq!(id.to_string(), "1-1051-28106");
        assert_matches!("1-1051-28106".parse::<ChannelId>(), Ok(parsed) => {
            assert_eq!(parsed, id);
        });

        let id = id.with_source_id(7);
        assert_eq!(id.to_string(), "1-1051-28106-7");
        assert_matches!("1-1051-28106-7".parse::<ChannelId>(), Ok(parsed) => {
            assert_eq!(parsed, id);
            assert_eq!(parsed.source_id(), Some(7));
        });

        assert_matches!("1-2".parse::<ChannelId>(), Err(Error::InvalidChannelId(_)));
        assert_matches!("1-x-3".parse::<ChannelId>(), Err(Error::ParseIntError(_)));
    }

    #[test]
    fn test_channel_id_serde() {
        let id = ChannelId::from((1, 2, 3));
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""1-2-3""#);
        assert_matches!(serde_json::from_str::<ChannelId>(r#""1-2-3""#), Ok(parsed) => {
            assert_eq!(parsed, id);
        });
        assert!(serde_json::from_str::<ChannelId>(r#""bogus""#).is_err());
    }

    #[test]
    fn test_channel_id_sibling() {
        let id = ChannelId::from((1, 2, 3)).with_source_id(9);
        assert_eq!(id.sibling(4.into()), ChannelId::from((1, 2, 4)));
    }
}
