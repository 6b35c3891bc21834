use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::audio::pcm;
use crate::blendshape::Weights;
use crate::error::SyncError;
use crate::events::Role;
use crate::playback::{BlendshapeFrame, SyncFrame};

/// Blendshape weights as sent on the wire: by name, or positionally in
/// channel order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireWeights {
    Named(HashMap<String, f32>),
    Positional(Vec<f32>),
}

impl WireWeights {
    pub fn to_weights(&self) -> Result<Weights, SyncError> {
        match self {
            WireWeights::Named(map) => Ok(Weights::from_named(map)),
            WireWeights::Positional(values) => Weights::from_slice(values),
        }
    }
}

impl From<&Weights> for WireWeights {
    fn from(weights: &Weights) -> Self {
        WireWeights::Positional(weights.as_array().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    #[serde(rename_all = "camelCase")]
    AudioStart {
        turn_id: String,
        session_id: String,
        #[serde(default)]
        sample_rate: Option<u32>,
        #[serde(default)]
        format: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SyncFrame {
        /// Base64 PCM16 LE mono.
        audio: String,
        weights: WireWeights,
        frame_index: u64,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    AudioEnd {
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TranscriptDelta {
        role: Role,
        text: String,
        #[serde(default)]
        start_offset: Option<f64>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        previous_item_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TranscriptDone {
        role: Role,
        text: String,
        #[serde(default)]
        interrupted: bool,
    },
    #[serde(rename_all = "camelCase")]
    Interrupt { turn_id: String, offset_ms: f64 },
    /// Discrete blendshapes not paired with audio.
    #[serde(rename_all = "camelCase")]
    BlendshapeFrame {
        weights: WireWeights,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    BlendshapeEnd,
}

impl ProtocolEvent {
    pub fn parse(json: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decodes the payload of a `sync_frame` event.
pub fn decode_sync_frame(
    audio: &str,
    weights: &WireWeights,
    frame_index: u64,
    session_id: Option<String>,
    timestamp: Option<f64>,
) -> Result<SyncFrame, SyncError> {
    Ok(SyncFrame {
        audio: pcm::decode_base64(audio)?,
        weights: weights.to_weights()?,
        timestamp: timestamp.unwrap_or(0.0),
        frame_index,
        session_id,
    })
}

pub fn decode_blendshape_frame(weights: &WireWeights, timestamp: Option<f64>) -> Result<BlendshapeFrame, SyncError> {
    Ok(BlendshapeFrame {
        weights: weights.to_weights()?,
        timestamp: timestamp.unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blendshape::Blendshape;

    #[test]
    fn test_parse_audio_start() {
        let event = ProtocolEvent::parse(
            r#"{"type":"audio_start","turnId":"t1","sessionId":"s1","sampleRate":24000,"format":"pcm16"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ProtocolEvent::AudioStart {
                turn_id: "t1".into(),
                session_id: "s1".into(),
                sample_rate: Some(24000),
                format: Some("pcm16".into()),
            }
        );
    }

    #[test]
    fn test_parse_sync_frame_named_weights() {
        let event = ProtocolEvent::parse(
            r#"{"type":"sync_frame","audio":"AAAAAA==","weights":{"jawOpen":0.5},"frameIndex":7,"sessionId":"s1"}"#,
        )
        .unwrap();
        let ProtocolEvent::SyncFrame { audio, weights, frame_index, session_id, timestamp } = event else {
            panic!("wrong variant");
        };
        let frame = decode_sync_frame(&audio, &weights, frame_index, session_id, timestamp).unwrap();
        assert_eq!(frame.audio.len(), 4);
        assert_eq!(frame.frame_index, 7);
        assert_eq!(frame.weights.get(Blendshape::JawOpen), 0.5);
        assert_eq!(frame.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_parse_positional_weights() {
        let values: Vec<String> = (0..52).map(|_| "0.1".to_string()).collect();
        let json = format!(r#"{{"type":"blendshape_frame","weights":[{}]}}"#, values.join(","));
        let ProtocolEvent::BlendshapeFrame { weights, timestamp } = ProtocolEvent::parse(&json).unwrap() else {
            panic!("wrong variant");
        };
        let frame = decode_blendshape_frame(&weights, timestamp).unwrap();
        assert!((frame.weights.get(Blendshape::TongueOut) - 0.1).abs() < 1e-6);

        let short = WireWeights::Positional(vec![0.0; 10]);
        assert!(short.to_weights().is_err());
    }

    #[test]
    fn test_parse_transcript_and_interrupt() {
        let delta = ProtocolEvent::parse(
            r#"{"type":"transcript_delta","role":"assistant","text":"Hi","startOffset":120.5,"itemId":"b","previousItemId":"a"}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            ProtocolEvent::TranscriptDelta { role: Role::Assistant, start_offset: Some(o), .. } if o == 120.5
        ));

        let done = ProtocolEvent::parse(r#"{"type":"transcript_done","role":"user","text":"hey"}"#).unwrap();
        assert!(matches!(done, ProtocolEvent::TranscriptDone { interrupted: false, .. }));

        let interrupt = ProtocolEvent::parse(r#"{"type":"interrupt","turnId":"t1","offsetMs":500}"#).unwrap();
        assert_eq!(interrupt, ProtocolEvent::Interrupt { turn_id: "t1".into(), offset_ms: 500.0 });

        assert!(ProtocolEvent::parse(r#"{"type":"blendshape_end"}"#).is_ok());
        assert!(ProtocolEvent::parse(r#"{"type":"nope"}"#).is_err());
    }

    #[test]
    fn test_bad_audio_is_reported() {
        let weights = WireWeights::Named(HashMap::new());
        assert!(matches!(
            decode_sync_frame("%%%", &weights, 0, None, None),
            Err(SyncError::AudioPayload(_))
        ));
    }
}
