//! Cross-context message vocabulary and the two transports that carry it.
//!
//! - `CoordinatorHandle`: page overlays and UI surfaces talk to the
//!   coordinator through its inbox. Only `capture` waits for a reply.
//! - `UiBus`: the coordinator's fire-and-forget notifications to whichever
//!   UI surface happens to be listening. Nobody listening means the message
//!   is gone; the handoff store is the path that actually delivers.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::capture::geometry::SelectionRect;
use crate::capture::CaptureError;
use crate::error::ErrorKind;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Selection emitted by the region selector, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaCoords {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
}

impl AreaCoords {
    pub fn new(selection: SelectionRect, device_pixel_ratio: f64) -> Self {
        Self {
            x: selection.x,
            y: selection.y,
            width: selection.width,
            height: selection.height,
            device_pixel_ratio,
        }
    }

    pub fn selection(&self) -> SelectionRect {
        SelectionRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// `{ "action": ..., ...payload }` messages exchanged between contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    /// Full viewport snapshot, answered on the reply channel.
    Capture,
    InitiateAreaCapture,
    /// Selector → coordinator.
    CaptureAreaCoords { coords: AreaCoords },
    /// Selector exited without a selection (escape or too small).
    #[serde(rename_all = "camelCase")]
    AreaSelectionCancelled { page_id: u64 },
    /// Coordinator → UI.
    #[serde(rename_all = "camelCase")]
    AreaCaptured { data_url: String },
    /// Coordinator → UI.
    AreaCaptureFailed { error: String, kind: ErrorKind },
}

impl Message {
    pub fn action(&self) -> &'static str {
        match self {
            Message::Capture => "capture",
            Message::InitiateAreaCapture => "initiateAreaCapture",
            Message::CaptureAreaCoords { .. } => "captureAreaCoords",
            Message::AreaSelectionCancelled { .. } => "areaSelectionCancelled",
            Message::AreaCaptured { .. } => "areaCaptured",
            Message::AreaCaptureFailed { .. } => "areaCaptureFailed",
        }
    }
}

/// Answer to a request that asked for one.
#[derive(Debug, Clone)]
pub enum Reply {
    Image(Vec<u8>),
    Accepted,
    Failed(CaptureError),
}

pub struct Envelope {
    pub message: Message,
    pub reply: Option<oneshot::Sender<Reply>>,
}

/// Sending side of the coordinator inbox. Cheap to clone.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl CoordinatorHandle {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Fire-and-forget. A full inbox does not drop the message: delivery
    /// waits for room on the runtime (or blocks, off-runtime). Returns false
    /// only when the coordinator is gone.
    pub fn send(&self, message: Message) -> bool {
        let action = message.action();
        let envelope = match self.tx.try_send(Envelope { message, reply: None }) {
            Ok(()) => return true,
            Err(TrySendError::Full(envelope)) => envelope,
            Err(TrySendError::Closed(_)) => {
                log::warn!("[MESSAGING] Dropped '{}': coordinator is not running", action);
                return false;
            }
        };

        log::debug!("[MESSAGING] Inbox full, queueing '{}'", action);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let tx = self.tx.clone();
                runtime.spawn(async move {
                    if tx.send(envelope).await.is_err() {
                        log::warn!("[MESSAGING] Dropped '{}': coordinator is not running", action);
                    }
                });
                true
            }
            Err(_) => {
                let sent = self.tx.blocking_send(envelope).is_ok();
                if !sent {
                    log::warn!("[MESSAGING] Dropped '{}': coordinator is not running", action);
                }
                sent
            }
        }
    }

    /// Sends `message` and waits for the coordinator's answer.
    pub async fn request(&self, message: Message) -> Result<Reply, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| CaptureError::CaptureFailed("coordinator is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CaptureError::CaptureFailed("coordinator dropped the request".to_string()))
    }

    /// The `capture` action: full viewport PNG bytes.
    pub async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        match self.request(Message::Capture).await? {
            Reply::Image(bytes) => Ok(bytes),
            Reply::Failed(e) => Err(e),
            Reply::Accepted => Err(CaptureError::CaptureFailed(
                "coordinator answered without an image".to_string(),
            )),
        }
    }

    /// The `initiateAreaCapture` action. Errors here are the ones the still-open
    /// caller can see directly; later failures land in the handoff store.
    pub async fn initiate_area_capture(&self) -> Result<(), CaptureError> {
        match self.request(Message::InitiateAreaCapture).await? {
            Reply::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }
}

/// Broadcast channel the coordinator uses to poke live UI surfaces.
#[derive(Clone)]
pub struct UiBus {
    tx: broadcast::Sender<Message>,
}

impl UiBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }

    /// Best effort. Returns whether anyone was listening.
    pub fn notify(&self, message: Message) -> bool {
        let action = message.action();
        match self.tx.send(message) {
            Ok(listeners) => {
                log::debug!("[MESSAGING] '{}' sent to {} listener(s)", action, listeners);
                true
            }
            Err(_) => {
                log::debug!("[MESSAGING] '{}' had no listener", action);
                false
            }
        }
    }
}

impl Default for UiBus {
    fn default() -> Self {
        Self::new(16)
    }
}

pub fn to_data_url(png_bytes: &[u8]) -> String {
    format!("{}{}", PNG_DATA_URL_PREFIX, STANDARD.encode(png_bytes))
}

pub fn from_data_url(data_url: &str) -> Result<Vec<u8>, DataUrlError> {
    let encoded = data_url
        .strip_prefix(PNG_DATA_URL_PREFIX)
        .ok_or(DataUrlError::NotPng)?;
    STANDARD
        .decode(encoded)
        .map_err(|e| DataUrlError::Base64(e.to_string()))
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DataUrlError {
    #[error("Data URL is not a base64 PNG")]
    NotPng,

    #[error("Invalid base64 payload: {0}")]
    Base64(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_use_action_tag() {
        let msg = Message::CaptureAreaCoords {
            coords: AreaCoords {
                x: 1.0,
                y: 2.0,
                width: 30.0,
                height: 40.0,
                device_pixel_ratio: 2.0,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "captureAreaCoords");
        assert_eq!(json["coords"]["devicePixelRatio"], 2.0);

        let parsed: Message =
            serde_json::from_str(r#"{"action":"areaCaptured","dataUrl":"data:image/png;base64,AA=="}"#)
                .unwrap();
        assert_eq!(parsed.action(), "areaCaptured");
    }

    #[test]
    fn data_url_rejects_other_mime_types() {
        assert!(matches!(
            from_data_url("data:image/jpeg;base64,AAAA"),
            Err(DataUrlError::NotPng)
        ));
        assert_eq!(from_data_url(&to_data_url(&[1, 2, 3])).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn bus_without_listener_reports_no_delivery() {
        let bus = UiBus::default();
        assert!(!bus.notify(Message::InitiateAreaCapture));
        let mut rx = bus.subscribe();
        assert!(bus.notify(Message::InitiateAreaCapture));
        assert_eq!(rx.try_recv().unwrap(), Message::InitiateAreaCapture);
    }

    #[tokio::test]
    async fn send_to_full_inbox_is_delivered_later() {
        let (handle, mut inbox) = CoordinatorHandle::channel(1);
        assert!(handle.send(Message::InitiateAreaCapture));
        assert!(handle.send(Message::AreaSelectionCancelled { page_id: 3 }));

        assert_eq!(inbox.recv().await.unwrap().message, Message::InitiateAreaCapture);
        assert_eq!(
            inbox.recv().await.unwrap().message,
            Message::AreaSelectionCancelled { page_id: 3 }
        );
    }

    #[test]
    fn send_off_runtime_blocks_until_there_is_room() {
        let (handle, mut inbox) = CoordinatorHandle::channel(1);
        assert!(handle.send(Message::InitiateAreaCapture));
        let drain = std::thread::spawn(move || {
            let first = inbox.blocking_recv().unwrap().message;
            let second = inbox.blocking_recv().unwrap().message;
            (first, second)
        });
        assert!(handle.send(Message::AreaSelectionCancelled { page_id: 9 }));
        let (first, second) = drain.join().unwrap();
        assert_eq!(first, Message::InitiateAreaCapture);
        assert_eq!(second, Message::AreaSelectionCancelled { page_id: 9 });
    }

    #[tokio::test]
    async fn request_fails_when_coordinator_is_gone() {
        let (handle, inbox) = CoordinatorHandle::channel(4);
        drop(inbox);
        assert!(handle.capture().await.is_err());
        assert!(!handle.send(Message::InitiateAreaCapture));
    }
}
