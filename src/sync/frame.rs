//! Newline-delimited JSON framing for sync messages.
//!
//! Each frame is one JSON object on its own line:
//!
//! ```text
//! {"event":"sync","data":"<base64 sync message>"}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Media type negotiated for sync bodies.
pub const CONTENT_TYPE: &str = "application/x-ndjson";
/// Media type sent on bodies we produce.
pub const CONTENT_TYPE_WITH_CHARSET: &str = "application/x-ndjson; charset=utf-8";
/// Event tag carrying an Automerge sync message.
pub const EVENT_SYNC: &str = "sync";

/// A single line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrame {
    pub event: String,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "base64_data"
    )]
    pub data: Vec<u8>,
}

impl MessageFrame {
    /// Builds a sync frame around an encoded sync message.
    pub fn sync(data: Vec<u8>) -> Self {
        Self {
            event: EVENT_SYNC.to_string(),
            data,
        }
    }

    /// Returns true if this frame carries a sync message.
    pub fn is_sync(&self) -> bool {
        self.event == EVENT_SYNC
    }

    /// Serializes the frame as one JSON line including the trailing newline.
    pub fn encode(&self) -> Bytes {
        // Serializing a string and a byte vector cannot fail.
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        Bytes::from(line)
    }

    /// Parses one line, without its terminating newline.
    pub fn decode(line: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(line)
    }
}

/// Returns true if the header value names the sync media type with either no
/// charset or a utf-8 charset.
pub fn is_suitable_content_type(value: &str) -> bool {
    let mut parts = value.split(';');
    let media_type = parts.next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case(CONTENT_TYPE) {
        return false;
    }

    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let Some((name, value)) = param.split_once('=') else {
            return false;
        };
        if name.trim().eq_ignore_ascii_case("charset") {
            let charset = value.trim().trim_matches('"');
            if !charset.is_empty() && !charset.eq_ignore_ascii_case("utf-8") {
                return false;
            }
        }
    }
    true
}

mod base64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
