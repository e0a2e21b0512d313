//! End-to-end runs of `run_comparison` against scripted in-process engines.

use std::cell::RefCell;
use std::rc::Rc;

use lk_compare::{
    CancelToken, CompareError, LockstepDriver, LoopConfig, Phase, Termination, run_comparison,
};
use lk_engine::observation::{
    GameResult, Observation, PlayerResult, Point, RawData, Score, Unit,
};
use lk_engine::replay::ReplayPlayerInfo;
use lk_engine::{
    EngineController, EngineError, EngineLauncher, InterfaceOptions, ReplayInfo, ReplayVersion,
    RequestStartReplay, ResponseObservation, VersionSpec,
};

#[derive(Debug, Default)]
struct Log {
    launched: usize,
    started: Vec<Vec<u8>>,
    quit: Vec<usize>,
    close: Vec<usize>,
}

/// What the scripted engines do. Ticks count from 0.
#[derive(Debug, Clone, Default)]
struct Script {
    fail_launch: Option<usize>,
    fail_start: Option<usize>,
    fail_step: Option<(usize, u32)>,
    fail_observe: Option<(usize, u32)>,
    /// The reference reports a result from this tick on.
    game_ends_at: Option<u32>,
    /// Cancel while observing this tick.
    cancel_at: Option<(u32, CancelToken)>,
    /// Instance and tick where the score differs.
    score_drift: Vec<(usize, u32)>,
    /// Instance and tick where unit 3 has less health.
    health_drift: Vec<(usize, u32)>,
}

struct ScriptedLauncher {
    log: Rc<RefCell<Log>>,
    script: Script,
}

struct ScriptedEngine {
    index: usize,
    log: Rc<RefCell<Log>>,
    script: Script,
    ticks: u32,
    step_mul: u32,
}

impl EngineLauncher for ScriptedLauncher {
    type Engine = ScriptedEngine;

    fn launch(&self, spec: &VersionSpec) -> Result<ScriptedEngine, EngineError> {
        let mut log = self.log.borrow_mut();
        let index = log.launched;
        if self.script.fail_launch == Some(index) {
            return Err(EngineError::BinaryNotFound(spec.binary.clone()));
        }
        log.launched += 1;
        Ok(ScriptedEngine {
            index,
            log: Rc::clone(&self.log),
            script: self.script.clone(),
            ticks: 0,
            step_mul: 0,
        })
    }
}

impl ScriptedEngine {
    fn tick(&self) -> u32 {
        self.ticks.saturating_sub(1)
    }

    fn at(&self, plan: &[(usize, u32)]) -> bool {
        plan.contains(&(self.index, self.tick()))
    }
}

impl EngineController for ScriptedEngine {
    fn replay_info(&mut self, _: &[u8]) -> Result<ReplayInfo, EngineError> {
        Ok(ReplayInfo {
            map_name: "Scripted".into(),
            game_version: "4.10.0".into(),
            base_build: 75689,
            data_version: "x".into(),
            game_duration_loops: 1000,
            player_info: vec![ReplayPlayerInfo {
                player_id: 1,
                race: "Terran".into(),
                result: GameResult::Victory,
            }],
        })
    }

    fn start_replay(&mut self, request: &RequestStartReplay) -> Result<(), EngineError> {
        if self.script.fail_start == Some(self.index) {
            return Err(EngineError::Remote("bad replay".into()));
        }
        self.log
            .borrow_mut()
            .started
            .push(serde_json::to_vec(request).map_err(EngineError::Json)?);
        Ok(())
    }

    fn step(&mut self, count: u32) -> Result<(), EngineError> {
        if self.script.fail_step == Some((self.index, self.ticks)) {
            return Err(EngineError::WorkerExited);
        }
        self.step_mul = count;
        self.ticks += 1;
        Ok(())
    }

    fn observe(&mut self) -> Result<ResponseObservation, EngineError> {
        let tick = self.tick();
        if self.script.fail_observe == Some((self.index, tick)) {
            return Err(EngineError::WorkerExited);
        }
        if let Some((at, token)) = &self.script.cancel_at {
            if *at == tick {
                token.cancel();
            }
        }

        let units = (0..5)
            .map(|i| Unit {
                tag: Some((self.index as u64 + 1) * 1000 + i),
                unit_type: 48,
                owner: 1,
                pos: Point::new(i as f32, 2.0),
                health: if i == 3 && self.at(&self.script.health_drift) { 30.0 } else { 45.0 },
                health_max: 45.0,
                orders: vec![],
            })
            .collect();
        let score = if self.at(&self.script.score_drift) { 99 } else { 10 };
        let ended = self.index == 0 && self.script.game_ends_at.is_some_and(|t| tick >= t);

        Ok(ResponseObservation {
            observation: Observation {
                game_loop: self.ticks * self.step_mul,
                raw_data: Some(RawData { units }),
                score: Some(Score {
                    score,
                    ..Default::default()
                }),
                ..Default::default()
            },
            actions: vec![],
            player_result: if ended {
                vec![PlayerResult {
                    player_id: 1,
                    result: GameResult::Victory,
                }]
            } else {
                vec![]
            },
        })
    }

    fn quit(&mut self) -> Result<(), EngineError> {
        self.log.borrow_mut().quit.push(self.index);
        Ok(())
    }

    fn close(self) -> Result<(), EngineError> {
        self.log.borrow_mut().close.push(self.index);
        Ok(())
    }
}

fn versions(n: usize) -> Vec<VersionSpec> {
    let version = ReplayVersion {
        game_version: "4.10.0".into(),
        build: 75689,
        data_version: "x".into(),
    };
    (0..n)
        .map(|i| VersionSpec::new(version.clone(), format!("engine-{}", i)))
        .collect()
}

fn start_request() -> RequestStartReplay {
    RequestStartReplay {
        replay_data: b"{\"replay\":true}".to_vec(),
        options: InterfaceOptions::comparison(),
        observed_player_id: 1,
    }
}

struct Run {
    log: Rc<RefCell<Log>>,
    output: String,
    result: Result<lk_compare::ComparisonReport, CompareError>,
}

fn run(n: usize, script: Script, config: LoopConfig, cancel: CancelToken) -> Run {
    let log = Rc::new(RefCell::new(Log::default()));
    let launcher = ScriptedLauncher {
        log: Rc::clone(&log),
        script,
    };
    let driver = LockstepDriver::new(config, cancel);
    let mut out = Vec::new();
    let result = run_comparison(launcher, &versions(n), &start_request(), &driver, 100, &mut out);
    Run {
        log,
        output: String::from_utf8(out).unwrap(),
        result,
    }
}

fn diffing(count: u64) -> LoopConfig {
    LoopConfig {
        diff: true,
        count,
        ..Default::default()
    }
}

fn assert_each_torn_down_once(log: &Log, n: usize) {
    let expected: Vec<usize> = (0..n).collect();
    assert_eq!(log.quit, expected);
    assert_eq!(log.close, expected);
}

#[test]
fn test_clean_run_of_identical_engines() {
    let r = run(2, Script::default(), diffing(10), CancelToken::new());
    let report = r.result.unwrap();

    assert_eq!(report.outcome.termination, Termination::BudgetExhausted);
    assert_eq!(report.outcome.iterations, 10);
    assert_eq!(report.outcome.last_game_loop, Some(80));
    assert!(report.converged());
    let divergence = report.divergence.as_ref().unwrap();
    assert!(divergence.by_instance.iter().all(|i| i.count == 0));
    assert!(divergence.by_path.is_empty());
    assert!(!r.output.contains("Diff on step"));
    assert!(r.output.contains("map_name: Scripted"));

    for t in &report.timings {
        assert_eq!(t.timings.get(Phase::Launch).unwrap().num, 1);
        assert_eq!(t.timings.get(Phase::StartReplay).unwrap().num, 1);
        assert_eq!(t.timings.get(Phase::Step).unwrap().num, 10);
        assert_eq!(t.timings.get(Phase::Observe).unwrap().num, 10);
    }
    assert_each_torn_down_once(&r.log.borrow(), 2);
}

#[test]
fn test_start_request_is_identical_for_every_instance() {
    let r = run(3, Script::default(), diffing(1), CancelToken::new());
    assert!(r.result.is_ok());
    let log = r.log.borrow();
    assert_eq!(log.started.len(), 3);
    assert!(log.started.iter().all(|bytes| *bytes == log.started[0]));
}

#[test]
fn test_divergence_is_reported_and_counted() {
    let script = Script {
        score_drift: vec![(1, 3), (1, 7)],
        health_drift: vec![(1, 7)],
        ..Default::default()
    };
    let r = run(2, script, diffing(10), CancelToken::new());
    let report = r.result.unwrap();
    let divergence = report.divergence.as_ref().unwrap();

    assert_eq!(divergence.by_instance[0].label, "engine-1 (build 75689)");
    assert_eq!(divergence.by_instance[0].count, 2);
    assert_eq!(divergence.by_path[0].path, "observation.score.score");
    assert_eq!(divergence.by_path[0].count, 2);
    assert_eq!(
        divergence.by_path[1].path,
        "observation.raw_data.units[*].health"
    );
    assert_eq!(divergence.by_path[1].count, 1);

    assert_eq!(r.output.matches("Diff on step").count(), 2);
    assert!(r.output.contains(&format!("{:-^80}", " Diff on step: 32 ")));
    assert!(r.output.contains("Changed observation.score.score: 10 -> 99."));
    assert!(r.output.contains("Changed observation.raw_data.units[3].health: 45.0 -> 30.0."));
}

#[test]
fn test_divergence_split_across_two_peers() {
    // Peer 1 drifts on score at ticks 3 and 7, peer 2 on unit health at tick 7.
    let script = Script {
        score_drift: vec![(1, 3), (1, 7)],
        health_drift: vec![(2, 7)],
        ..Default::default()
    };
    let r = run(3, script, diffing(10), CancelToken::new());
    let report = r.result.unwrap();
    let divergence = report.divergence.as_ref().unwrap();

    let counts: Vec<(&str, u64)> = divergence
        .by_instance
        .iter()
        .map(|i| (i.label.as_str(), i.count))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("engine-1 (build 75689)", 2),
            ("engine-2 (build 75689)", 1),
            ("engine-0 (build 75689)", 0),
        ]
    );
    let paths: Vec<(&str, u64)> = divergence
        .by_path
        .iter()
        .map(|p| (p.path.as_str(), p.count))
        .collect();
    assert_eq!(
        paths,
        vec![
            ("observation.score.score", 2),
            ("observation.raw_data.units[*].health", 1),
        ]
    );

    // Tick 7 shows both peers under a single banner.
    assert_eq!(r.output.matches("Diff on step").count(), 2);
    assert_each_torn_down_once(&r.log.borrow(), 3);
}

#[test]
fn test_diffing_disabled_skips_comparison() {
    let script = Script {
        score_drift: vec![(1, 0)],
        ..Default::default()
    };
    let r = run(2, script, LoopConfig { count: 3, ..Default::default() }, CancelToken::new());
    let report = r.result.unwrap();
    assert!(report.divergence.is_none());
    assert!(!r.output.contains("Diff on step"));
    assert!(!report.to_string().contains("Diff Counts"));
}

#[test]
fn test_interrupt_keeps_completed_ticks() {
    let cancel = CancelToken::new();
    let script = Script {
        cancel_at: Some((5, cancel.clone())),
        score_drift: vec![(1, 2)],
        ..Default::default()
    };
    let r = run(2, script, diffing(100), cancel);
    let report = r.result.unwrap();

    assert_eq!(report.outcome.termination, Termination::Interrupted);
    assert_eq!(report.outcome.iterations, 6);
    assert_eq!(report.divergence.as_ref().unwrap().by_instance[0].count, 1);
    for t in &report.timings {
        assert_eq!(t.timings.get(Phase::Observe).unwrap().num, 6);
    }
    assert_each_torn_down_once(&r.log.borrow(), 2);
}

#[test]
fn test_game_result_ends_the_loop_after_comparing_the_final_tick() {
    let script = Script {
        game_ends_at: Some(4),
        score_drift: vec![(1, 4)],
        ..Default::default()
    };
    let r = run(2, script, diffing(100), CancelToken::new());
    let report = r.result.unwrap();
    assert_eq!(report.outcome.termination, Termination::GameEnded);
    assert_eq!(report.outcome.iterations, 5);
    assert_eq!(report.divergence.as_ref().unwrap().by_instance[0].count, 1);
    assert_each_torn_down_once(&r.log.borrow(), 2);
}

#[test]
fn test_zero_budget_runs_no_ticks() {
    let r = run(2, Script::default(), diffing(0), CancelToken::new());
    let report = r.result.unwrap();
    assert_eq!(report.outcome.termination, Termination::BudgetExhausted);
    assert_eq!(report.outcome.iterations, 0);
    assert_eq!(report.outcome.last_game_loop, None);
    assert_each_torn_down_once(&r.log.borrow(), 2);
}

#[test]
fn test_no_binaries() {
    let r = run(0, Script::default(), diffing(1), CancelToken::new());
    assert!(matches!(r.result, Err(CompareError::NoBinaries)));
    assert_eq!(r.log.borrow().launched, 0);
}

#[test]
fn test_launch_failure_tears_down_launched_instances() {
    let script = Script {
        fail_launch: Some(2),
        ..Default::default()
    };
    let r = run(4, script, diffing(10), CancelToken::new());
    assert!(matches!(r.result, Err(CompareError::Launch { ref binary, .. }) if binary == "engine-2"));
    assert_each_torn_down_once(&r.log.borrow(), 2);
}

#[test]
fn test_start_failure_tears_down_everything() {
    let script = Script {
        fail_start: Some(1),
        ..Default::default()
    };
    let r = run(3, script, diffing(10), CancelToken::new());
    assert!(matches!(
        r.result,
        Err(CompareError::Protocol { phase: Phase::StartReplay, .. })
    ));
    assert_each_torn_down_once(&r.log.borrow(), 3);
}

#[test]
fn test_step_failure_tears_down_everything() {
    let script = Script {
        fail_step: Some((1, 4)),
        ..Default::default()
    };
    let r = run(3, script, diffing(10), CancelToken::new());
    match r.result {
        Err(CompareError::Protocol { instance, phase, .. }) => {
            assert_eq!(instance, "engine-1 (build 75689)");
            assert_eq!(phase, Phase::Step);
        }
        other => panic!("unexpected {:?}", other.map(|r| r.outcome)),
    }
    assert_each_torn_down_once(&r.log.borrow(), 3);
}

#[test]
fn test_observe_failure_tears_down_everything() {
    let script = Script {
        fail_observe: Some((2, 0)),
        ..Default::default()
    };
    let r = run(3, script, diffing(10), CancelToken::new());
    assert!(matches!(
        r.result,
        Err(CompareError::Protocol { phase: Phase::Observe, .. })
    ));
    assert_each_torn_down_once(&r.log.borrow(), 3);
}
