//! Wire format of the push channel.
//!
//! Every frame is a JSON object with a `type` discriminator. Names follow the
//! events the desktop page already listens for.

use serde::{Deserialize, Serialize};

/// Frames the broker sends to connected browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// First frame on every connection; tells the client its channel id
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected { channel_id: String },

    #[serde(rename = "qrGenerated", rename_all = "camelCase")]
    QrGenerated {
        url: String,
        session_id: String,
        is_registration: bool,
    },

    #[serde(rename = "associationConfirmed", rename_all = "camelCase")]
    AssociationConfirmed { username: String, device_id: String },

    #[serde(rename = "heartbeat-response")]
    HeartbeatResponse { timestamp: i64 },

    /// Direct push to the initiator that owns the session
    #[serde(rename = "authSuccess", rename_all = "camelCase")]
    AuthSuccess {
        token: String,
        username: String,
        device_id: String,
        is_registration: bool,
        session_id: String,
    },

    /// Sent to everyone; listeners keep only their own session id
    #[serde(rename = "authBroadcast", rename_all = "camelCase")]
    AuthBroadcast {
        session_id: String,
        username: String,
        success: bool,
        is_registration: bool,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Frames browsers send to the broker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Initiator wants a pairing session bound to this channel
    #[serde(rename = "requestQR", rename_all = "camelCase")]
    RequestQr {
        username: String,
        #[serde(default)]
        is_registration: bool,
    },

    /// Remember this browser for `username`
    #[serde(rename = "associate", rename_all = "camelCase")]
    Associate { username: String, device_id: String },

    #[serde(rename = "heartbeat")]
    Heartbeat {
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
