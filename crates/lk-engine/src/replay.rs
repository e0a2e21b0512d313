//! Replay files and the store that resolves them.
//!
//! A replay is a JSON document: a version header naming the engine build it
//! was recorded with, the initial units, and the timestamped commands issued
//! by each player. Engines receive the raw bytes; the harness only ever reads
//! the header.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::observation::{GameResult, Point, Size2D};

/// Engine version a replay was recorded with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayVersion {
    pub game_version: String,
    pub build: u32,
    pub data_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFile {
    pub header: ReplayVersion,
    pub map_name: String,
    pub map_size: Size2D,
    pub seed: u64,
    /// Total length of the recording in game loops.
    pub game_loops: u32,
    pub players: Vec<ReplayPlayer>,
    pub units: Vec<UnitSpawn>,
    #[serde(default)]
    pub commands: Vec<ReplayCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayPlayer {
    pub player_id: u32,
    pub race: String,
    pub result: GameResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpawn {
    pub owner: u32,
    pub unit_type: u32,
    pub pos: Point,
    pub health: f32,
}

/// A command recorded at a given loop. Units are referenced by their index
/// in [`ReplayFile::units`] since engine tags are not part of the recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayCommand {
    pub game_loop: u32,
    pub player_id: u32,
    pub ability_id: u32,
    pub units: Vec<usize>,
    pub target: CommandTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandTarget {
    Point(Point),
    Unit(usize),
}

impl ReplayFile {
    pub fn parse(data: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(data).map_err(|e| EngineError::InvalidReplay(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Extract the recording version without parsing the whole replay body.
pub fn replay_version(data: &[u8]) -> Result<ReplayVersion, EngineError> {
    #[derive(Deserialize)]
    struct HeaderOnly {
        header: ReplayVersion,
    }

    let parsed: HeaderOnly =
        serde_json::from_slice(data).map_err(|e| EngineError::InvalidReplay(e.to_string()))?;
    Ok(parsed.header)
}

/// Metadata answered by an engine for `replay_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayInfo {
    pub map_name: String,
    pub game_version: String,
    pub base_build: u32,
    pub data_version: String,
    pub game_duration_loops: u32,
    pub player_info: Vec<ReplayPlayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayPlayerInfo {
    pub player_id: u32,
    pub race: String,
    pub result: GameResult,
}

impl From<&ReplayFile> for ReplayInfo {
    fn from(replay: &ReplayFile) -> Self {
        Self {
            map_name: replay.map_name.clone(),
            game_version: replay.header.game_version.clone(),
            base_build: replay.header.build,
            data_version: replay.header.data_version.clone(),
            game_duration_loops: replay.game_loops,
            player_info: replay
                .players
                .iter()
                .map(|p| ReplayPlayerInfo {
                    player_id: p.player_id,
                    race: p.race.clone(),
                    result: p.result,
                })
                .collect(),
        }
    }
}

impl fmt::Display for ReplayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "map_name: {}", self.map_name)?;
        writeln!(f, "game_version: {}", self.game_version)?;
        writeln!(f, "base_build: {}", self.base_build)?;
        writeln!(f, "data_version: {}", self.data_version)?;
        write!(f, "game_duration_loops: {}", self.game_duration_loops)?;
        for p in &self.player_info {
            write!(f, "\nplayer {}: {} ({:?})", p.player_id, p.race, p.result)?;
        }
        Ok(())
    }
}

/// Resolves replay names to files.
///
/// A name that points at an existing file is used directly. Otherwise it is
/// looked up under the replay directory, with and without a `.json` suffix.
#[derive(Debug, Clone, Default)]
pub struct ReplayStore {
    replay_dir: Option<PathBuf>,
}

impl ReplayStore {
    pub fn new(replay_dir: Option<PathBuf>) -> Self {
        Self { replay_dir }
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf, EngineError> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }

        if let Some(dir) = &self.replay_dir {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
            let with_ext = dir.join(format!("{}.json", name));
            if with_ext.is_file() {
                return Ok(with_ext);
            }
        }

        Err(EngineError::ReplayNotFound(direct.to_path_buf()))
    }

    /// Raw replay bytes for `name`.
    pub fn replay_data(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.resolve(name)?;
        tracing::debug!("loading replay from {}", path.display());
        Ok(fs::read(path)?)
    }
}
