use std::sync::Mutex;
use std::sync::PoisonError;

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::ChannelConfig;
use crate::models::ChannelId;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    // Assigned by the registry, starting from 1.
    pub uid: u32,
    pub id: ChannelId,
    pub name: String,
    pub frequency: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portal_name: Option<String>,
}

impl Channel {
    pub fn new(id: ChannelId, name: &str, frequency: u32) -> Self {
        Channel {
            uid: 0,
            id,
            name: name.to_string(),
            frequency,
            portal_name: None,
        }
    }
}

impl From<&ChannelConfig> for Channel {
    fn from(config: &ChannelConfig) -> Self {
        let mut id = ChannelId::from((config.nid, config.tsid, config.sid));
        if let Some(source_id) = config.source_id {
            id = id.with_source_id(source_id);
        }
        Channel::new(id, &config.name, config.frequency)
    }
}

/// Channel lookups used by the EPG pipeline.
pub trait ChannelRegistry: Send + Sync {
    fn get(&self, id: &ChannelId) -> Option<Channel>;
    fn get_by_uid(&self, uid: u32) -> Option<Channel>;
    /// Ignores the ATSC source id.
    fn get_by_triple(&self, nid: u16, tsid: u16, sid: u16) -> Option<Channel>;
    fn get_by_source(&self, frequency: u32, source_id: u16) -> Option<Channel>;
    fn set_portal_name(&self, id: &ChannelId, portal_name: &str) -> bool;
    /// Adds a channel or merges it into the one with the same id.  Returns
    /// the uid of the channel.
    fn add(&self, channel: Channel) -> u32;
    fn remove(&self, id: &ChannelId) -> Option<Channel>;
}

/// An in-memory channel registry.
#[derive(Default)]
pub struct ChannelTable {
    inner: Mutex<ChannelTableInner>,
}

#[derive(Default)]
struct ChannelTableInner {
    channels: IndexMap<ChannelId, Channel>,
    last_uid: u32,
}

impl ChannelTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_config(configs: &[ChannelConfig]) -> Self {
        let table = ChannelTable::new();
        for config in configs.iter() {
            table.add(config.into());
        }
        tracing::debug!(channels = configs.len(), "Loaded channels");
        table
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.lock().channels.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelTableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find<F>(&self, pred: F) -> Option<Channel>
    where
        F: Fn(&Channel) -> bool,
    {
        self.lock().channels.values().find(|ch| pred(ch)).cloned()
    }
}

impl ChannelRegistry for ChannelTable {
    fn get(&self, id: &ChannelId) -> Option<Channel> {
        self.lock().channels.get(id).cloned()
    }

    fn get_by_uid(&self, uid: u32) -> Option<Channel> {
        self.find(|ch| ch.uid == uid)
    }

    fn get_by_triple(&self, nid: u16, tsid: u16, sid: u16) -> Option<Channel> {
        self.find(|ch| {
            ch.id.nid().value() == nid && ch.id.tsid().value() == tsid && ch.id.sid().value() == sid
        })
    }

    fn get_by_source(&self, frequency: u32, source_id: u16) -> Option<Channel> {
        self.find(|ch| ch.frequency == frequency && ch.id.source_id() == Some(source_id))
    }

    fn set_portal_name(&self, id: &ChannelId, portal_name: &str) -> bool {
        let mut inner = self.lock();
        match inner.channels.get_mut(id) {
            Some(channel) => {
                if channel.portal_name.as_deref() != Some(portal_name) {
                    tracing::debug!(channel = %id, portal_name, "Changed portal name");
                    channel.portal_name = Some(portal_name.to_string());
                }
                true
            }
            None => false,
        }
    }

    fn add(&self, mut channel: Channel) -> u32 {
        let mut inner = self.lock();
        if let Some(existing) = inner.channels.get_mut(&channel.id) {
            existing.name = channel.name;
            existing.frequency = channel.frequency;
            if channel.portal_name.is_some() {
                existing.portal_name = channel.portal_name;
            }
            return existing.uid;
        }
        inner.last_uid += 1;
        channel.uid = inner.last_uid;
        let uid = channel.uid;
        tracing::debug!(channel = %channel.id, uid, name = %channel.name, "Added channel");
        inner.channels.insert(channel.id, channel);
        uid
    }

    fn remove(&self, id: &ChannelId) -> Option<Channel> {
        self.lock().channels.shift_remove(id)
    }
}
