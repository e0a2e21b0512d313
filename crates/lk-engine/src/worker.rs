//! Request handling for the reference engine worker.

use crate::protocol::{RESPONSE_PREFIX, Request, RequestStartReplay, Response};
use crate::replay::{ReplayFile, ReplayInfo};
use crate::sim::Skirmish;

/// State of one worker process: the build it emulates and the replay in
/// progress, if any.
#[derive(Debug)]
pub struct WorkerSession {
    build: Option<u32>,
    data_version: Option<String>,
    tag_base: u64,
    game: Option<Skirmish>,
}

impl WorkerSession {
    /// `build` and `data_version` restrict which replays are accepted;
    /// `None` accepts any.
    pub fn new(build: Option<u32>, data_version: Option<String>, tag_base: u64) -> Self {
        Self {
            build,
            data_version,
            tag_base,
            game: None,
        }
    }

    /// Answer one request. The flag is true once the worker should exit.
    pub fn handle(&mut self, request: Request) -> (Response, bool) {
        let response = match request {
            Request::ReplayInfo { replay_data } => match ReplayFile::parse(&replay_data) {
                Ok(replay) => Response::ReplayInfo(ReplayInfo::from(&replay)),
                Err(e) => Response::Error(e.to_string()),
            },
            Request::StartReplay(req) => self.start_replay(req),
            Request::Step { count } => match self.game.as_mut() {
                Some(game) => {
                    game.step(count);
                    Response::Ok
                }
                None => Response::Error("no replay in progress".into()),
            },
            Request::Observe => match self.game.as_mut() {
                Some(game) => Response::Observation(Box::new(game.observe())),
                None => Response::Error("no replay in progress".into()),
            },
            Request::Quit => return (Response::Ok, true),
        };
        (response, false)
    }

    fn start_replay(&mut self, req: RequestStartReplay) -> Response {
        let replay = match ReplayFile::parse(&req.replay_data) {
            Ok(r) => r,
            Err(e) => return Response::Error(e.to_string()),
        };
        if let Some(build) = self.build {
            if replay.header.build != build {
                return Response::Error(format!(
                    "replay was recorded with build {} but this engine is build {}",
                    replay.header.build, build
                ));
            }
        }
        if let Some(data_version) = &self.data_version {
            if &replay.header.data_version != data_version {
                return Response::Error(format!(
                    "replay data version {} does not match {}",
                    replay.header.data_version, data_version
                ));
            }
        }
        self.game = Some(Skirmish::new(
            replay,
            req.options,
            req.observed_player_id,
            self.tag_base,
        ));
        Response::Ok
    }

    /// Game loop of the replay in progress.
    pub fn game_loop(&self) -> Option<u32> {
        self.game.as_ref().map(Skirmish::game_loop)
    }
}

/// Format a response as a protocol line.
pub fn response_line(response: &Response) -> String {
    let json = serde_json::to_string(response).unwrap_or_else(|e| {
        serde_json::json!({ "Error": format!("failed to encode response: {}", e) }).to_string()
    });
    format!("{}{}", RESPONSE_PREFIX, json)
}
