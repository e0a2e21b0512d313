//! Wire protocol between the harness and an engine process.
//!
//! Requests are written one JSON document per line on the engine's stdin.
//! Responses are lines on stdout prefixed with [`RESPONSE_PREFIX`]; any other
//! stdout line is engine chatter and is skipped by the reader.

use serde::{Deserialize, Serialize};

use crate::observation::{ResponseObservation, Size2D, hex_bytes};
use crate::replay::ReplayInfo;

/// Marks a stdout line as a protocol response.
pub const RESPONSE_PREFIX: &str = "JSON:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    ReplayInfo {
        #[serde(with = "hex_bytes")]
        replay_data: Vec<u8>,
    },
    StartReplay(RequestStartReplay),
    Step {
        count: u32,
    },
    Observe,
    Quit,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::ReplayInfo { .. } => "replay_info",
            Request::StartReplay(_) => "start_replay",
            Request::Step { .. } => "step",
            Request::Observe => "observe",
            Request::Quit => "quit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    ReplayInfo(ReplayInfo),
    Observation(Box<ResponseObservation>),
    Error(String),
}

/// Start a replay from the perspective of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStartReplay {
    #[serde(with = "hex_bytes")]
    pub replay_data: Vec<u8>,
    pub options: InterfaceOptions,
    pub observed_player_id: u32,
}

/// Which parts of the state the engine should include in observations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterfaceOptions {
    pub raw: bool,
    pub raw_affects_selection: bool,
    pub raw_crop_to_playable_area: bool,
    pub score: bool,
    pub show_cloaked: bool,
    pub show_placeholders: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_layer: Option<SpatialCameraSetup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialCameraSetup {
    pub width: f32,
    pub resolution: Size2D,
    pub minimap_resolution: Size2D,
    pub crop_to_playable_area: bool,
    pub allow_cheating_layers: bool,
}

impl InterfaceOptions {
    /// Everything a determinism comparison wants to see: raw units, score,
    /// cheating feature layers at 48x48.
    pub fn comparison() -> Self {
        Self {
            raw: true,
            raw_affects_selection: true,
            raw_crop_to_playable_area: true,
            score: true,
            show_cloaked: true,
            show_placeholders: true,
            feature_layer: Some(SpatialCameraSetup {
                width: 24.0,
                resolution: Size2D { x: 48, y: 48 },
                minimap_resolution: Size2D { x: 48, y: 48 },
                crop_to_playable_area: true,
                allow_cheating_layers: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_replay_is_byte_stable() {
        let req = Request::StartReplay(RequestStartReplay {
            replay_data: b"{}".to_vec(),
            options: InterfaceOptions::comparison(),
            observed_player_id: 1,
        });
        let a = serde_json::to_string(&req).unwrap();
        let b = serde_json::to_string(&req.clone()).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("\"replay_data\":\"7b7d\""));
    }

    #[test]
    fn test_request_names() {
        assert_eq!(Request::Step { count: 8 }.name(), "step");
        assert_eq!(Request::Observe.name(), "observe");
    }
}
