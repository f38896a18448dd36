use serde::{Deserialize, Serialize};

use crate::snapshot::{PlaybackSnapshot, SupervisorRunState};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 2;

/// Largest payload a frame header may announce.  Anything bigger is a broken
/// or hostile peer, not a command.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    Start {
        base_url: String,
        room_id: String,
        location: String,
    },
    Stop,
    Reset,
    TogglePause,
    Next,
    Seek { seconds: i64 },
    SetVolume { value: i64 },
    NudgeVolume { delta: i64 },
    GetVolume,
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state.
    Hello {
        protocol_version: u32,
        state: CastState,
    },
    State {
        data: CastState,
    },
    /// Presence line as shown in the persistent notification.  `None` once
    /// the notification is removed.
    Presence {
        text: Option<String>,
    },
    Volume {
        value: Option<u8>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
    /// Outcome of a command, sent only to the client that issued it.
    /// `volume` is set by the volume commands.
    Reply {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        volume: Option<u8>,
    },
}

/// Everything an observer needs to draw the casting screen.
///
/// `rev` increases with every publish so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CastState {
    #[serde(default)]
    pub rev: u64,
    pub snapshot: PlaybackSnapshot,
    /// Only updated by explicit pause toggles, never by polling.
    pub playing: bool,
    #[serde(default)]
    pub run_state: SupervisorRunState,
    #[serde(default)]
    pub device_location: Option<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        let Some(len) = payload_len(data) else {
            anyhow::bail!("Insufficient data for length header");
        };
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN);
        }
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

/// Payload length announced by the header at the start of `data`, once all
/// four header bytes are there.
pub fn payload_len(data: &[u8]) -> Option<usize> {
    let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_command_survives_framing() {
        let msg = Message::Command(Command::Start {
            base_url: "http://10.0.0.2:8080".into(),
            room_id: "42".into(),
            location: "http://10.0.0.9/desc.xml".into(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Start { room_id, .. }) => assert_eq!(room_id, "42"),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let encoded = Message::Command(Command::Next).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn oversized_header_is_refused_before_payload_arrives() {
        let mut data = (MAX_FRAME_LEN as u32 + 1).to_be_bytes().to_vec();
        data.extend_from_slice(b"{}");
        assert_eq!(payload_len(&data), Some(MAX_FRAME_LEN + 1));
        let err = Message::decode(&data).unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        assert_eq!(payload_len(&data[..3]), None);
    }

    #[test]
    fn reply_defaults_missing_fields() {
        let msg: Message = serde_json::from_str(r#"{"broadcast":"Reply"}"#).unwrap();
        assert!(matches!(
            msg,
            Message::Broadcast(Broadcast::Reply {
                error: None,
                volume: None
            })
        ));
    }

    #[test]
    fn hello_carries_snapshot() {
        let state = CastState {
            rev: 7,
            snapshot: PlaybackSnapshot::new(12, 200, "song"),
            playing: true,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.rev, 7);
                assert_eq!(state.snapshot.title, "song");
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }
}
