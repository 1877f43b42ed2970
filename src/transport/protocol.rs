//! Wire protocol between host and viewer
//!
//! Every message is a JSON envelope. Viewer→host messages carry
//! `{command, params}`; host→viewer messages carry `{command, data}` and use
//! exactly two command tags: `configVideoDecoder` and `videoChunk`.
//!
//! Two viewer commands are intercepted and handled by the session
//! coordinator; everything else is forwarded verbatim to the
//! remote-debugging session.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Command tag intercepted to start the encode pipeline
pub const CMD_START_SCREENCAST: &str = "Page.startScreencast";
/// Command tag intercepted to resize the viewport and encoder
pub const CMD_SET_VIEWPORT: &str = "Page.setViewport";

/// Chunk flavor as reported by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Key,
    Delta,
}

/// A timestamped unit of encoded video payload
///
/// Produced by the relay host, carried verbatim over the transport (payload
/// base64 on the wire), consumed once by the decode queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedChunk {
    /// Originating capture timestamp, microseconds
    #[serde(rename = "timestamp")]
    pub timestamp_us: u64,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(rename = "chunkData", with = "base64_bytes")]
    pub payload: Bytes,
}

/// Decoder configuration announced to the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
}

/// Host→viewer message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum HostMessage {
    #[serde(rename = "configVideoDecoder")]
    ConfigVideoDecoder(DecoderConfig),
    #[serde(rename = "videoChunk")]
    VideoChunk(EncodedChunk),
}

/// Parameters of the intercepted start-capture command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreencastParams {
    pub format: String,
    pub quality: u32,
    pub every_nth_frame: u32,
}

impl Default for ScreencastParams {
    fn default() -> Self {
        Self {
            format: "jpeg".to_string(),
            quality: 100,
            every_nth_frame: 1,
        }
    }
}

/// Parameters of the intercepted set-viewport command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportParams {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,
    #[serde(default = "default_mobile")]
    pub mobile: bool,
}

fn default_scale_factor() -> f64 {
    1.0
}

fn default_mobile() -> bool {
    true
}

/// Raw viewer→host envelope
#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    command: String,
    #[serde(default)]
    params: Value,
}

/// A viewer→host command, split into intercepted and passthrough forms
#[derive(Debug, Clone)]
pub enum ViewerCommand {
    StartScreencast(ScreencastParams),
    SetViewport(ViewportParams),
    /// Forwarded verbatim to the remote-debugging session
    Passthrough { command: String, params: Value },
}

impl ViewerCommand {
    /// Parse a raw text frame into a command
    ///
    /// Malformed frames produce an error the caller is expected to log and
    /// ignore; they never close the channel.
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: CommandEnvelope = serde_json::from_str(text)
            .map_err(|e| AppError::Transport(format!("malformed envelope: {e}")))?;

        match envelope.command.as_str() {
            CMD_START_SCREENCAST => {
                let params = serde_json::from_value(envelope.params)
                    .map_err(|e| AppError::Transport(format!("bad screencast params: {e}")))?;
                Ok(ViewerCommand::StartScreencast(params))
            }
            CMD_SET_VIEWPORT => {
                let params = serde_json::from_value(envelope.params)
                    .map_err(|e| AppError::Transport(format!("bad viewport params: {e}")))?;
                Ok(ViewerCommand::SetViewport(params))
            }
            _ => Ok(ViewerCommand::Passthrough {
                command: envelope.command,
                params: envelope.params,
            }),
        }
    }

    /// Serialize a viewer→host envelope (used by the viewer client)
    pub fn envelope(command: &str, params: &Value) -> String {
        serde_json::json!({ "command": command, "params": params }).to_string()
    }
}

/// Base64 transport encoding for chunk payloads
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_screencast() {
        let text = r#"{"command":"Page.startScreencast","params":{"format":"jpeg","quality":100,"everyNthFrame":1}}"#;
        match ViewerCommand::parse(text).unwrap() {
            ViewerCommand::StartScreencast(p) => {
                assert_eq!(p.format, "jpeg");
                assert_eq!(p.quality, 100);
                assert_eq!(p.every_nth_frame, 1);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_set_viewport_defaults() {
        let text = r#"{"command":"Page.setViewport","params":{"width":800,"height":600}}"#;
        match ViewerCommand::parse(text).unwrap() {
            ViewerCommand::SetViewport(p) => {
                assert_eq!((p.width, p.height), (800, 600));
                assert_eq!(p.device_scale_factor, 1.0);
                assert!(p.mobile);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_passthrough() {
        let text = r#"{"command":"Input.dispatchKeyEvent","params":{"type":"keyDown","key":"a"}}"#;
        match ViewerCommand::parse(text).unwrap() {
            ViewerCommand::Passthrough { command, params } => {
                assert_eq!(command, "Input.dispatchKeyEvent");
                assert_eq!(params["key"], "a");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_is_error() {
        assert!(ViewerCommand::parse("not json").is_err());
        assert!(ViewerCommand::parse(r#"{"params":{}}"#).is_err());
    }

    #[test]
    fn test_host_message_wire_shape() {
        let msg = HostMessage::VideoChunk(EncodedChunk {
            timestamp_us: 1000,
            kind: ChunkKind::Key,
            payload: Bytes::from_static(b"\x01\x02\x03"),
        });
        let json: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["command"], "videoChunk");
        assert_eq!(json["data"]["timestamp"], 1000);
        assert_eq!(json["data"]["type"], "key");
        assert_eq!(json["data"]["chunkData"], "AQID");
    }

    #[test]
    fn test_chunk_payload_round_trip() {
        let chunk = EncodedChunk {
            timestamp_us: 42,
            kind: ChunkKind::Delta,
            payload: Bytes::from(vec![0u8, 255, 17, 99]),
        };
        let text = serde_json::to_string(&chunk).unwrap();
        let back: EncodedChunk = serde_json::from_str(&text).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_decoder_config_wire_names() {
        let config = DecoderConfig {
            codec: "vp8".to_string(),
            coded_width: 640,
            coded_height: 480,
        };
        let json: Value =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(json["codec"], "vp8");
        assert_eq!(json["codedWidth"], 640);
        assert_eq!(json["codedHeight"], 480);
    }

    #[test]
    fn test_config_message_parse() {
        let text = r#"{"command":"configVideoDecoder","data":{"codec":"vp8","codedWidth":640,"codedHeight":480}}"#;
        let msg: HostMessage = serde_json::from_str(text).unwrap();
        assert_eq!(
            msg,
            HostMessage::ConfigVideoDecoder(DecoderConfig {
                codec: "vp8".to_string(),
                coded_width: 640,
                coded_height: 480,
            })
        );
    }
}
