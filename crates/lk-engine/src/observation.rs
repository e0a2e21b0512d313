//! Observation data model shared by the harness and the engine worker.
//!
//! An observation is what one `observe` request returns: the simulation
//! state at the current game loop, the actions issued since the previous
//! observation, and the final player results once the game has ended.

use serde::{Deserialize, Serialize};

/// Full response to an `observe` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseObservation {
    pub observation: Observation,
    /// Actions issued by the observed player since the previous observation.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Empty while the game is running.
    #[serde(default)]
    pub player_result: Vec<PlayerResult>,
}

impl ResponseObservation {
    /// Game loop this observation was captured at.
    pub fn game_loop(&self) -> u32 {
        self.observation.game_loop
    }

    /// True once the engine reported a terminal result.
    pub fn game_ended(&self) -> bool {
        !self.player_result.is_empty()
    }
}

/// Simulation state at one game loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub game_loop: u32,
    pub player_common: PlayerCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<RawData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_layer_data: Option<FeatureLayerData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerCommon {
    pub player_id: u32,
    pub minerals: u32,
    pub food_used: u32,
    pub food_cap: u32,
    pub army_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub units: Vec<Unit>,
}

/// One unit as seen by the observed player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Engine-assigned handle. Not stable across processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u64>,
    pub unit_type: u32,
    pub owner: u32,
    pub pos: Point,
    pub health: f32,
    pub health_max: f32,
    #[serde(default)]
    pub orders: Vec<UnitOrder>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitOrder {
    pub ability_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_unit_tag: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_world_space_pos: Option<Point>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub score: i64,
    pub killed_value_units: u32,
    pub lost_value_units: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayerData {
    pub minimap_renders: MinimapLayers,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinimapLayers {
    /// Owning player id per cell, 0 for empty.
    pub player_relative: ImageData,
    /// Number of units per cell, saturating at 255.
    pub unit_density: ImageData,
}

/// Raw image buffer, row-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub bits_per_pixel: u32,
    pub size: Size2D,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl ImageData {
    /// Blank 8-bit image.
    pub fn new(size: Size2D) -> Self {
        Self {
            bits_per_pixel: 8,
            size,
            data: vec![0; (size.x * size.y) as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.size.x || y >= self.size.y {
            return None;
        }
        self.data.get((y * self.size.x + x) as usize).copied()
    }

    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        if x < self.size.x && y < self.size.y {
            let idx = (y * self.size.x + x) as usize;
            if let Some(cell) = self.data.get_mut(idx) {
                *cell = value;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size2D {
    pub x: u32,
    pub y: u32,
}

/// One action taken by the observed player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_raw: Option<ActionRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_command: Option<ActionRawUnitCommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRawUnitCommand {
    pub ability_id: u32,
    #[serde(default)]
    pub unit_tags: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_unit_tag: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_world_space_pos: Option<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    Victory,
    Defeat,
    Tie,
    Undecided,
}

impl GameResult {
    pub fn is_decided(&self) -> bool {
        !matches!(self, GameResult::Undecided)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub player_id: u32,
    pub result: GameResult,
}

/// Serde adapter that writes byte buffers as lowercase hex strings, so a
/// buffer is a single leaf in the JSON tree rather than one node per byte.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_data_serializes_as_hex_leaf() {
        let mut img = ImageData::new(Size2D { x: 2, y: 2 });
        img.set(1, 0, 0xab);
        let value = serde_json::to_value(&img).unwrap();
        assert_eq!(value["data"], "00ab0000");

        let back: ImageData = serde_json::from_value(value).unwrap();
        assert_eq!(back.get(1, 0), Some(0xab));
        assert_eq!(back.get(2, 0), None);
    }

    #[test]
    fn test_cleared_tags_are_omitted() {
        let unit = Unit {
            tag: None,
            unit_type: 48,
            ..Default::default()
        };
        let value = serde_json::to_value(&unit).unwrap();
        assert!(value.get("tag").is_none());
    }

    #[test]
    fn test_game_ended_follows_player_result() {
        let mut obs = ResponseObservation::default();
        assert!(!obs.game_ended());
        obs.player_result.push(PlayerResult {
            player_id: 1,
            result: GameResult::Victory,
        });
        assert!(obs.game_ended());
    }
}
