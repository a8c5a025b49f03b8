//! Transport-level scene attachment consumed by sessions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::ClientInfo;

/// Topic of every push made to a scene.
pub const DATA_UPDATE_TOPIC: &str = "data-update";

/// Payload of a `data-update` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdate {
    pub id: String,
    pub data: Value,
}

impl DataUpdate {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A single client scene attached over some transport (a websocket in
/// production).
///
/// `send` must not block: sessions call it while holding their own lock so
/// that pushes to one scene keep the order they were issued in. Delivery is
/// best-effort; a closed transport silently drops the message.
pub trait Connection: Send + Sync {
    fn scene_id(&self) -> &str;

    fn client(&self) -> &ClientInfo;

    fn send(&self, topic: &str, payload: &DataUpdate);
}
