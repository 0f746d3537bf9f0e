use serde_derive::{Deserialize, Serialize};

use crate::entities::FileMeta;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
/// One control frame of the peer protocol, discriminated by the `type` tag.
pub enum WireMessage {
    /// A peer's full folder index. Sent unprompted right after connecting
    /// and again on every `status` broadcast.
    #[serde(rename = "INDEX")]
    Index {
        device_id: String,
        files: Vec<FileMeta>,
    },
    /// Ask whoever holds `hash` to send the file. `path` is informational;
    /// responders match by hash only.
    #[serde(rename = "FILE_REQUEST")]
    FileRequest { hash: String, path: String },
    /// File header. Exactly `size` raw payload bytes follow on the same
    /// stream before the next control frame.
    #[serde(rename = "FILE")]
    File {
        path: String,
        size: u64,
        hash: String,
    },
    /// Manual naming override for a content hash.
    #[serde(rename = "CONSENSUS_VOTE")]
    ConsensusVote { hash: String, name: String },
    /// Sender has no more outbound work.
    #[serde(rename = "DONE")]
    Done,
}

impl WireMessage {
    fn known_tag(tag: &str) -> bool {
        matches!(
            tag,
            "INDEX" | "FILE_REQUEST" | "FILE" | "CONSENSUS_VOTE" | "DONE"
        )
    }

    /// Two-stage decode of one JSON line: the envelope first, then the
    /// concrete shape. A well-formed frame with an unknown `type` yields
    /// `None` so readers can skip it; malformed JSON is an error.
    pub fn decode_line(line: &str) -> serde_json::Result<Option<WireMessage>> {
        let envelope: serde_json::Value = serde_json::from_str(line)?;
        match envelope.get("type").and_then(|t| t.as_str()) {
            Some(tag) if Self::known_tag(tag) => serde_json::from_value(envelope).map(Some),
            _ => Ok(None),
        }
    }

    /// Serialized frame without the trailing newline. Compact JSON never
    /// contains a raw newline, which is what keeps line framing sound.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
