//! Skirmish simulation run by the reference engine worker.
//!
//! Replays the recorded commands over a handful of units: movement toward
//! points, chasing and attacking target units, and score bookkeeping. Combat
//! rolls come from a ChaCha stream seeded by the replay, so two workers fed
//! the same replay produce the same states. Unit tags are offset by a
//! per-process base and therefore differ between workers.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::observation::{
    Action, ActionRaw, ActionRawUnitCommand, FeatureLayerData, ImageData, MinimapLayers,
    Observation, PlayerCommon, PlayerResult, Point, RawData, ResponseObservation, Score, Size2D,
    Unit, UnitOrder,
};
use crate::protocol::InterfaceOptions;
use crate::replay::{CommandTarget, ReplayCommand, ReplayFile};

/// Distance covered per game loop.
const MOVE_SPEED: f32 = 0.5;
/// Attack range.
const ATTACK_RANGE: f32 = 1.5;
/// Loops between two attacks of the same unit.
const ATTACK_COOLDOWN: u32 = 4;

#[derive(Debug, Clone)]
struct SimUnit {
    tag: u64,
    unit_type: u32,
    owner: u32,
    pos: Point,
    health: f32,
    health_max: f32,
    order: Option<SimOrder>,
    cooldown: u32,
}

impl SimUnit {
    fn alive(&self) -> bool {
        self.health > 0.0
    }
}

#[derive(Debug, Clone)]
struct SimOrder {
    ability_id: u32,
    target: CommandTarget,
}

#[derive(Debug)]
pub struct Skirmish {
    replay: ReplayFile,
    options: InterfaceOptions,
    observed_player_id: u32,
    rng: ChaCha8Rng,
    game_loop: u32,
    units: Vec<SimUnit>,
    next_command: usize,
    pending_actions: Vec<Action>,
    score: Score,
}

impl Skirmish {
    /// Set up the initial state of `replay`. Units get tags
    /// `tag_base + 1 ..= tag_base + n` in spawn order.
    pub fn new(
        mut replay: ReplayFile,
        options: InterfaceOptions,
        observed_player_id: u32,
        tag_base: u64,
    ) -> Self {
        replay.commands.sort_by_key(|c| c.game_loop);
        let units = replay
            .units
            .iter()
            .enumerate()
            .map(|(i, spawn)| SimUnit {
                tag: tag_base + i as u64 + 1,
                unit_type: spawn.unit_type,
                owner: spawn.owner,
                pos: spawn.pos,
                health: spawn.health,
                health_max: spawn.health,
                order: None,
                cooldown: 0,
            })
            .collect();

        Self {
            rng: ChaCha8Rng::seed_from_u64(replay.seed),
            replay,
            options,
            observed_player_id,
            game_loop: 0,
            units,
            next_command: 0,
            pending_actions: Vec::new(),
            score: Score::default(),
        }
    }

    pub fn game_loop(&self) -> u32 {
        self.game_loop
    }

    pub fn finished(&self) -> bool {
        self.game_loop >= self.replay.game_loops
    }

    /// Advance by `count` game loops, stopping at the end of the recording.
    pub fn step(&mut self, count: u32) {
        for _ in 0..count {
            if self.finished() {
                break;
            }
            self.apply_commands();
            self.advance_units();
            self.game_loop += 1;
        }
    }

    fn apply_commands(&mut self) {
        while let Some(cmd) = self.replay.commands.get(self.next_command) {
            if cmd.game_loop > self.game_loop {
                break;
            }
            let cmd = cmd.clone();
            self.next_command += 1;
            self.apply_command(&cmd);
        }
    }

    fn apply_command(&mut self, cmd: &ReplayCommand) {
        let mut issued = Vec::new();
        for &idx in &cmd.units {
            if let Some(unit) = self.units.get_mut(idx).filter(|u| u.alive()) {
                if unit.owner != cmd.player_id {
                    continue;
                }
                unit.order = Some(SimOrder {
                    ability_id: cmd.ability_id,
                    target: cmd.target.clone(),
                });
                issued.push(unit.tag);
            }
        }

        if issued.is_empty() || cmd.player_id != self.observed_player_id {
            return;
        }

        let (target_unit_tag, target_world_space_pos) = match &cmd.target {
            CommandTarget::Point(p) => (None, Some(*p)),
            CommandTarget::Unit(idx) => (self.units.get(*idx).map(|u| u.tag), None),
        };
        self.pending_actions.push(Action {
            action_raw: Some(ActionRaw {
                unit_command: Some(ActionRawUnitCommand {
                    ability_id: cmd.ability_id,
                    unit_tags: issued,
                    target_unit_tag,
                    target_world_space_pos,
                }),
            }),
        });
    }

    fn advance_units(&mut self) {
        for i in 0..self.units.len() {
            if !self.units[i].alive() {
                continue;
            }
            if self.units[i].cooldown > 0 {
                self.units[i].cooldown -= 1;
            }
            let Some(order) = self.units[i].order.clone() else {
                continue;
            };

            match order.target {
                CommandTarget::Point(dest) => {
                    if move_toward(&mut self.units[i].pos, dest) {
                        self.units[i].order = None;
                    }
                }
                CommandTarget::Unit(target) => {
                    let Some(target_pos) = self
                        .units
                        .get(target)
                        .filter(|t| t.alive())
                        .map(|t| t.pos)
                    else {
                        self.units[i].order = None;
                        continue;
                    };
                    if self.units[i].pos.distance(&target_pos) > ATTACK_RANGE {
                        move_toward(&mut self.units[i].pos, target_pos);
                    } else if self.units[i].cooldown == 0 {
                        self.units[i].cooldown = ATTACK_COOLDOWN;
                        let damage = self.rng.gen_range(4..=8) as f32;
                        self.hit(i, target, damage);
                    }
                }
            }
        }
    }

    fn hit(&mut self, attacker: usize, target: usize, damage: f32) {
        let attacker_owner = self.units[attacker].owner;
        let victim = &mut self.units[target];
        victim.health = (victim.health - damage).max(0.0);
        if victim.alive() {
            return;
        }

        let value = unit_value(victim.unit_type);
        if victim.owner == self.observed_player_id {
            self.score.lost_value_units += value;
        } else if attacker_owner == self.observed_player_id {
            self.score.killed_value_units += value;
        }
        self.score.score =
            i64::from(self.score.killed_value_units) - i64::from(self.score.lost_value_units) / 2;
    }

    /// Snapshot of the current state. Drains the actions issued since the
    /// previous call.
    pub fn observe(&mut self) -> ResponseObservation {
        let observed = self.observed_player_id;
        let own_units = self
            .units
            .iter()
            .filter(|u| u.alive() && u.owner == observed)
            .count() as u32;

        let mut observation = Observation {
            game_loop: self.game_loop,
            player_common: PlayerCommon {
                player_id: observed,
                minerals: 50 + (self.game_loop / 22) * 5,
                food_used: own_units,
                food_cap: 15,
                army_count: own_units,
            },
            ..Default::default()
        };

        if self.options.raw {
            observation.raw_data = Some(RawData {
                units: self.units.iter().filter(|u| u.alive()).map(|u| self.raw_unit(u)).collect(),
            });
        }
        if self.options.score {
            observation.score = Some(self.score.clone());
        }
        if let Some(setup) = &self.options.feature_layer {
            observation.feature_layer_data = Some(FeatureLayerData {
                minimap_renders: self.minimap(setup.minimap_resolution),
            });
        }

        let player_result = if self.finished() {
            self.replay
                .players
                .iter()
                .map(|p| PlayerResult {
                    player_id: p.player_id,
                    result: p.result,
                })
                .collect()
        } else {
            Vec::new()
        };

        ResponseObservation {
            observation,
            actions: std::mem::take(&mut self.pending_actions),
            player_result,
        }
    }

    fn raw_unit(&self, unit: &SimUnit) -> Unit {
        let orders = unit
            .order
            .iter()
            .map(|o| match &o.target {
                CommandTarget::Point(p) => UnitOrder {
                    ability_id: o.ability_id,
                    target_unit_tag: None,
                    target_world_space_pos: Some(*p),
                },
                CommandTarget::Unit(idx) => UnitOrder {
                    ability_id: o.ability_id,
                    target_unit_tag: self.units.get(*idx).map(|t| t.tag),
                    target_world_space_pos: None,
                },
            })
            .collect();

        Unit {
            tag: Some(unit.tag),
            unit_type: unit.unit_type,
            owner: unit.owner,
            pos: unit.pos,
            health: unit.health,
            health_max: unit.health_max,
            orders,
        }
    }

    fn minimap(&self, resolution: Size2D) -> MinimapLayers {
        let mut player_relative = ImageData::new(resolution);
        let mut unit_density = ImageData::new(resolution);
        let map = self.replay.map_size;
        if map.x == 0 || map.y == 0 {
            return MinimapLayers {
                player_relative,
                unit_density,
            };
        }

        for unit in self.units.iter().filter(|u| u.alive()) {
            let cx = ((unit.pos.x / map.x as f32) * resolution.x as f32).floor();
            let cy = ((unit.pos.y / map.y as f32) * resolution.y as f32).floor();
            let cx = (cx.max(0.0) as u32).min(resolution.x.saturating_sub(1));
            let cy = (cy.max(0.0) as u32).min(resolution.y.saturating_sub(1));
            player_relative.set(cx, cy, unit.owner.min(255) as u8);
            let density = unit_density.get(cx, cy).unwrap_or(0).saturating_add(1);
            unit_density.set(cx, cy, density);
        }

        MinimapLayers {
            player_relative,
            unit_density,
        }
    }
}

/// Move `pos` one step toward `dest`. Returns true on arrival.
fn move_toward(pos: &mut Point, dest: Point) -> bool {
    let dist = pos.distance(&dest);
    if dist <= MOVE_SPEED {
        *pos = dest;
        return true;
    }
    pos.x += (dest.x - pos.x) / dist * MOVE_SPEED;
    pos.y += (dest.y - pos.y) / dist * MOVE_SPEED;
    false
}

fn unit_value(unit_type: u32) -> u32 {
    match unit_type {
        48 => 50,   // marine
        105 => 50,  // zergling pair
        73 => 100,  // zealot
        _ => 25,
    }
}
