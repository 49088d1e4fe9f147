//! Handoff: getting a capture outcome to whichever UI surface is alive.
//!
//! The coordinator cannot hand its result back by return value: the surface
//! that asked may have closed while the user was dragging. So every outcome
//! is written to a durable single-slot store first, and a direct UI
//! notification is sent second, as a hint. Consumers never trust the hint's
//! payload; they react to it by reading-and-clearing the store, which makes
//! duplicate deliveries harmless.

pub mod store;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capture::CaptureError;
use crate::error::ErrorKind;
use crate::messaging::{from_data_url, to_data_url, Message, UiBus};
use store::{KeyValueStore, StoreError};

/// Logical slots in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    CaptureResult,
    CaptureError,
    /// Popup → standalone editor image transfer.
    EditorImage,
}

impl Channel {
    pub fn key(&self) -> &'static str {
        match self {
            Channel::CaptureResult => "capture-result",
            Channel::CaptureError => "capture-error",
            Channel::EditorImage => "editor-image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffEntry {
    /// PNG as a data URL.
    pub payload: Option<String>,
    pub error: Option<StoredError>,
    /// Stays `None` in the store; set on the copy handed to a consumer.
    pub consumed_by: Option<String>,
    pub created_at_ms: u64,
}

impl HandoffEntry {
    pub fn image(png_bytes: &[u8]) -> Self {
        Self {
            payload: Some(to_data_url(png_bytes)),
            error: None,
            consumed_by: None,
            created_at_ms: now_ms(),
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            payload: None,
            error: Some(StoredError {
                kind,
                message: message.into(),
            }),
            consumed_by: None,
            created_at_ms: now_ms(),
        }
    }

    /// Decoded PNG bytes, if this entry carries an image.
    pub fn image_bytes(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.payload
            .as_deref()
            .map(|url| from_data_url(url).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Last-write-wins slots over a `KeyValueStore`.
pub struct HandoffStore {
    kv: Arc<dyn KeyValueStore>,
    // One reader at a time within the process.
    read_lock: Mutex<()>,
}

impl HandoffStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            read_lock: Mutex::new(()),
        }
    }

    /// Replaces whatever the slot held.
    pub fn write(&self, channel: Channel, entry: &HandoffEntry) -> Result<(), StoreError> {
        let value = serde_json::to_value(entry).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.kv.set(channel.key(), value)?;
        log::info!("[HANDOFF] Wrote '{}'", channel.key());
        Ok(())
    }

    pub fn clear(&self, channel: Channel) -> Result<(), StoreError> {
        self.kv.remove(channel.key())
    }

    pub fn peek(&self, channel: Channel) -> Result<Option<HandoffEntry>, StoreError> {
        let mut found = self.kv.get(&[channel.key()])?;
        found
            .remove(channel.key())
            .map(|v| serde_json::from_value(v).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    /// Takes the entry out of its slot. Of two racing readers, one sees it.
    pub fn read_and_clear(&self, channel: Channel, consumer: &str) -> Result<Option<HandoffEntry>, StoreError> {
        let _guard = self
            .read_lock
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        let Some(mut entry) = self.peek(channel)? else {
            return Ok(None);
        };
        // Remove before handing out, so a crash mid-consume cannot redeliver.
        self.kv.remove(channel.key())?;
        entry.consumed_by = Some(consumer.to_string());
        log::info!("[HANDOFF] '{}' consumed by {}", channel.key(), consumer);
        Ok(Some(entry))
    }
}

/// What a consumer finds waiting for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Pending {
    Image(Vec<u8>),
    Failed(StoredError),
}

/// At-least-once delivery of capture outcomes: durable slot + UI hint.
#[derive(Clone)]
pub struct Delivery {
    store: Arc<HandoffStore>,
    bus: UiBus,
}

impl Delivery {
    pub fn new(store: Arc<HandoffStore>, bus: UiBus) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &Arc<HandoffStore> {
        &self.store
    }

    pub fn bus(&self) -> &UiBus {
        &self.bus
    }

    pub fn publish_image(&self, png_bytes: &[u8]) -> Result<(), StoreError> {
        let entry = HandoffEntry::image(png_bytes);
        self.store.write(Channel::CaptureResult, &entry)?;
        self.store.clear(Channel::CaptureError)?;
        if let Some(data_url) = entry.payload {
            self.bus.notify(Message::AreaCaptured { data_url });
        }
        Ok(())
    }

    pub fn publish_error(&self, error: &CaptureError) -> Result<(), StoreError> {
        let entry = HandoffEntry::failure(error.kind(), error.to_string());
        self.store.write(Channel::CaptureError, &entry)?;
        self.store.clear(Channel::CaptureResult)?;
        self.bus.notify(Message::AreaCaptureFailed {
            error: error.to_string(),
            kind: error.kind(),
        });
        Ok(())
    }

    /// Consumes whatever outcome is waiting. Call it on startup and on every hint.
    pub fn take_pending(&self, consumer: &str) -> Result<Option<Pending>, StoreError> {
        if let Some(entry) = self.store.read_and_clear(Channel::CaptureResult, consumer)? {
            if let Some(bytes) = entry.image_bytes()? {
                return Ok(Some(Pending::Image(bytes)));
            }
        }
        if let Some(entry) = self.store.read_and_clear(Channel::CaptureError, consumer)? {
            if let Some(error) = entry.error {
                return Ok(Some(Pending::Failed(error)));
            }
        }
        Ok(None)
    }
}
