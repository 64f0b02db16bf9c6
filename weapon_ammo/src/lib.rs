//! Per-actor magazine, reserve, reload and pump-action state.
#![forbid(unsafe_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmmoFeed {
    /// Whole-magazine swap.
    #[default]
    Magazine,
    /// One round at a time.
    Tube,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmmoAction {
    #[default]
    SelfLoading,
    /// Needs a manual cycle after every shot.
    Pump,
}

/// Capacities and timings for one weapon. Times are in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AmmoSpec {
    /// Key for the per-weapon magazine cache.
    pub weapon: String,
    /// Key for the shared reserve pool.
    pub ammo_type: String,
    pub magazine_size: u32,
    pub feed: AmmoFeed,
    pub action: AmmoAction,
    pub reload_time: f32,
    pub incremental_start_time: f32,
    /// Point within the start phase at which its round goes in, in `[0, 1]`.
    pub incremental_insert_fraction: f32,
    pub incremental_loop_time: f32,
    pub pump_time: f32,
    /// Rounds loaded the first time the weapon is equipped; full when unset.
    pub initial_rounds: Option<u32>,
}

impl Default for AmmoSpec {
    fn default() -> Self {
        Self {
            weapon: String::new(),
            ammo_type: String::new(),
            magazine_size: 30,
            feed: AmmoFeed::Magazine,
            action: AmmoAction::SelfLoading,
            reload_time: 2.0,
            incremental_start_time: 0.6,
            incremental_insert_fraction: 0.5,
            incremental_loop_time: 0.5,
            pump_time: 0.6,
            initial_rounds: None,
        }
    }
}

impl AmmoSpec {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.weapon.trim().is_empty() {
            errors.push("weapon must not be empty".to_string());
        }
        if self.ammo_type.trim().is_empty() {
            errors.push("ammo_type must not be empty".to_string());
        }
        if self.magazine_size == 0 {
            errors.push("magazine_size must be > 0".to_string());
        }
        let timings = [
            ("reload_time", self.reload_time),
            ("incremental_start_time", self.incremental_start_time),
            ("incremental_loop_time", self.incremental_loop_time),
            ("pump_time", self.pump_time),
        ];
        for (name, value) in timings {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("{} must be finite and >= 0", name));
            }
        }
        if !(0.0..=1.0).contains(&self.incremental_insert_fraction) {
            errors.push("incremental_insert_fraction must be in [0, 1]".to_string());
        }
        if let Some(rounds) = self.initial_rounds {
            if rounds > self.magazine_size {
                errors.push("initial_rounds must be <= magazine_size".to_string());
            }
        }
        errors
    }
}

/// The whole reload/pump state. Timers count up from zero within each phase.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum AmmoPhase {
    #[default]
    Idle,
    ReloadingStandard {
        elapsed: f32,
        chambering: bool,
    },
    ReloadingIncrementalStart {
        elapsed: f32,
        inserted: bool,
        chambering: bool,
    },
    ReloadingIncrementalLoop {
        elapsed: f32,
        chambering: bool,
    },
    PumpNeeded,
    Pumping {
        elapsed: f32,
    },
}

impl AmmoPhase {
    pub fn is_reloading(self) -> bool {
        self.chambering().is_some()
    }

    fn chambering(self) -> Option<bool> {
        match self {
            AmmoPhase::ReloadingStandard { chambering, .. }
            | AmmoPhase::ReloadingIncrementalStart { chambering, .. }
            | AmmoPhase::ReloadingIncrementalLoop { chambering, .. } => Some(chambering),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReloadPhase {
    None,
    Standard,
    IncrementalStart,
    IncrementalLoop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PumpStage {
    Idle,
    NeedsPump,
    Pumping,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AmmoCommand {
    Consume(u32),
    StartReload,
    CancelReload,
    TriggerPump,
    Advance(f32),
}

/// Read-only snapshot for HUD and weapon animation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AmmoStatus {
    pub weapon: String,
    pub ammo_type: String,
    pub current: u32,
    pub max: u32,
    pub reserve: u32,
    pub reload_phase: ReloadPhase,
    pub pump_stage: PumpStage,
    pub reload_progress: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CachedWeapon {
    rounds: u32,
    pump_pending: bool,
}

#[derive(Clone, Debug)]
pub struct AmmoStateMachine {
    spec: AmmoSpec,
    phase: AmmoPhase,
    current: u32,
    reserves: HashMap<String, u32>,
    cache: HashMap<String, CachedWeapon>,
}

impl AmmoStateMachine {
    pub fn new(spec: AmmoSpec) -> Self {
        let mut machine = Self {
            spec: AmmoSpec::default(),
            phase: AmmoPhase::Idle,
            current: 0,
            reserves: HashMap::new(),
            cache: HashMap::new(),
        };
        machine.load(spec);
        machine
    }

    pub fn spec(&self) -> &AmmoSpec {
        &self.spec
    }

    pub fn phase(&self) -> AmmoPhase {
        self.phase
    }

    pub fn current_ammo(&self) -> u32 {
        self.current
    }

    pub fn max_ammo(&self) -> u32 {
        self.spec.magazine_size
    }

    pub fn current_ammo_type(&self) -> &str {
        &self.spec.ammo_type
    }

    pub fn reserve(&self, ammo_type: &str) -> u32 {
        self.reserves.get(ammo_type).copied().unwrap_or(0)
    }

    pub fn reload_phase(&self) -> ReloadPhase {
        match self.phase {
            AmmoPhase::ReloadingStandard { .. } => ReloadPhase::Standard,
            AmmoPhase::ReloadingIncrementalStart { .. } => ReloadPhase::IncrementalStart,
            AmmoPhase::ReloadingIncrementalLoop { .. } => ReloadPhase::IncrementalLoop,
            _ => ReloadPhase::None,
        }
    }

    pub fn pump_stage(&self) -> PumpStage {
        match self.phase {
            AmmoPhase::PumpNeeded => PumpStage::NeedsPump,
            AmmoPhase::Pumping { .. } => PumpStage::Pumping,
            _ => PumpStage::Idle,
        }
    }

    /// Fraction of the current reload phase's timer elapsed, if reloading.
    pub fn reload_progress(&self) -> Option<f32> {
        let (elapsed, duration) = match self.phase {
            AmmoPhase::ReloadingStandard { elapsed, .. } => (elapsed, self.spec.reload_time),
            AmmoPhase::ReloadingIncrementalStart { elapsed, .. } => {
                (elapsed, self.spec.incremental_start_time)
            }
            AmmoPhase::ReloadingIncrementalLoop { elapsed, .. } => {
                (elapsed, self.spec.incremental_loop_time)
            }
            _ => return None,
        };
        if duration > 0.0 {
            Some((elapsed / duration).clamp(0.0, 1.0))
        } else {
            Some(1.0)
        }
    }

    pub fn status(&self) -> AmmoStatus {
        AmmoStatus {
            weapon: self.spec.weapon.clone(),
            ammo_type: self.spec.ammo_type.clone(),
            current: self.current,
            max: self.max_ammo(),
            reserve: self.reserve(&self.spec.ammo_type),
            reload_phase: self.reload_phase(),
            pump_stage: self.pump_stage(),
            reload_progress: self.reload_progress(),
        }
    }

    pub fn can_fire(&self) -> bool {
        self.current > 0 && matches!(self.phase, AmmoPhase::Idle)
    }

    pub fn consume(&mut self, rounds: u32) -> bool {
        self.apply(AmmoCommand::Consume(rounds))
    }

    pub fn start_reload(&mut self) -> bool {
        self.apply(AmmoCommand::StartReload)
    }

    pub fn cancel_reload(&mut self) -> bool {
        self.apply(AmmoCommand::CancelReload)
    }

    pub fn trigger_pump(&mut self) -> bool {
        self.apply(AmmoCommand::TriggerPump)
    }

    pub fn update(&mut self, dt: f32) -> bool {
        self.apply(AmmoCommand::Advance(dt))
    }

    /// Adds pickup rounds to a reserve pool, saturating at `u32::MAX`.
    pub fn add_reserve(&mut self, ammo_type: &str, rounds: u32) {
        let pool = self.reserves.entry(ammo_type.to_string()).or_insert(0);
        *pool = pool.saturating_add(rounds);
    }

    /// Switches weapons. The outgoing weapon's rounds and pending pump are
    /// cached; an in-progress reload is cancelled first.
    pub fn equip(&mut self, spec: AmmoSpec) {
        if self.phase.is_reloading() {
            self.apply(AmmoCommand::CancelReload);
        }
        let pump_pending = matches!(
            self.phase,
            AmmoPhase::PumpNeeded | AmmoPhase::Pumping { .. }
        );
        self.cache.insert(
            self.spec.weapon.clone(),
            CachedWeapon {
                rounds: self.current,
                pump_pending,
            },
        );
        self.load(spec);
    }

    fn load(&mut self, spec: AmmoSpec) {
        let cached = self.cache.get(&spec.weapon).copied().unwrap_or(CachedWeapon {
            rounds: spec.initial_rounds.unwrap_or(spec.magazine_size),
            pump_pending: false,
        });
        let rounds = cached.rounds.min(spec.magazine_size);
        let excess = cached.rounds - rounds;
        if excess > 0 {
            self.add_reserve(&spec.ammo_type, excess);
        }
        debug!(weapon = %spec.weapon, rounds, "weapon equipped");
        self.current = rounds;
        self.phase = if cached.pump_pending {
            AmmoPhase::PumpNeeded
        } else {
            AmmoPhase::Idle
        };
        self.spec = spec;
        self.sync_cache();
    }

    /// Single entry point for every state transition.
    pub fn apply(&mut self, command: AmmoCommand) -> bool {
        let accepted = match command {
            AmmoCommand::Consume(rounds) => self.apply_consume(rounds),
            AmmoCommand::StartReload => self.apply_start_reload(),
            AmmoCommand::CancelReload => self.apply_cancel_reload(),
            AmmoCommand::TriggerPump => self.apply_trigger_pump(),
            AmmoCommand::Advance(dt) => self.advance(dt),
        };
        if !accepted {
            trace!(?command, phase = ?self.phase, "ammo command rejected");
        }
        accepted
    }

    fn apply_consume(&mut self, rounds: u32) -> bool {
        if rounds == 0 || rounds > self.current {
            return false;
        }
        match self.phase {
            AmmoPhase::Idle => {}
            _ => return false,
        }
        self.current -= rounds;
        if self.spec.action == AmmoAction::Pump {
            self.phase = AmmoPhase::PumpNeeded;
        }
        self.sync_cache();
        true
    }

    fn apply_start_reload(&mut self) -> bool {
        let chambering = match self.phase {
            AmmoPhase::Idle => false,
            AmmoPhase::PumpNeeded => true,
            _ => return false,
        };
        if self.current >= self.spec.magazine_size {
            return false;
        }
        if self.reserve(&self.spec.ammo_type) == 0 {
            return false;
        }
        self.phase = match self.spec.feed {
            AmmoFeed::Magazine => AmmoPhase::ReloadingStandard {
                elapsed: 0.0,
                chambering,
            },
            AmmoFeed::Tube => AmmoPhase::ReloadingIncrementalStart {
                elapsed: 0.0,
                inserted: false,
                chambering,
            },
        };
        debug!(weapon = %self.spec.weapon, chambering, "reload started");
        true
    }

    fn apply_cancel_reload(&mut self) -> bool {
        let Some(chambering) = self.phase.chambering() else {
            return false;
        };
        self.finish_reload(chambering);
        true
    }

    fn apply_trigger_pump(&mut self) -> bool {
        if self.phase != AmmoPhase::PumpNeeded {
            return false;
        }
        self.phase = AmmoPhase::Pumping { elapsed: 0.0 };
        true
    }

    fn advance(&mut self, dt: f32) -> bool {
        if !dt.is_finite() || dt <= 0.0 {
            return false;
        }
        let mut remaining = dt;
        loop {
            match self.phase {
                AmmoPhase::Idle | AmmoPhase::PumpNeeded => return true,
                AmmoPhase::ReloadingStandard {
                    elapsed,
                    chambering,
                } => {
                    let duration = self.spec.reload_time.max(0.0);
                    let target = elapsed + remaining;
                    if target < duration {
                        self.phase = AmmoPhase::ReloadingStandard {
                            elapsed: target,
                            chambering,
                        };
                        return true;
                    }
                    remaining = target - duration;
                    let missing = self.spec.magazine_size - self.current;
                    let added = self.transfer(missing);
                    debug!(weapon = %self.spec.weapon, added, "magazine reloaded");
                    self.finish_reload(chambering);
                }
                AmmoPhase::ReloadingIncrementalStart {
                    elapsed,
                    mut inserted,
                    chambering,
                } => {
                    let duration = self.spec.incremental_start_time.max(0.0);
                    let insert_at = duration * self.spec.incremental_insert_fraction.clamp(0.0, 1.0);
                    let target = elapsed + remaining;
                    if !inserted && target >= insert_at {
                        self.transfer(1);
                        inserted = true;
                    }
                    if target < duration {
                        self.phase = AmmoPhase::ReloadingIncrementalStart {
                            elapsed: target,
                            inserted,
                            chambering,
                        };
                        return true;
                    }
                    remaining = target - duration;
                    self.continue_incremental(chambering);
                }
                AmmoPhase::ReloadingIncrementalLoop {
                    elapsed,
                    chambering,
                } => {
                    let duration = self.spec.incremental_loop_time.max(0.0);
                    let target = elapsed + remaining;
                    if target < duration {
                        self.phase = AmmoPhase::ReloadingIncrementalLoop {
                            elapsed: target,
                            chambering,
                        };
                        return true;
                    }
                    remaining = target - duration;
                    self.transfer(1);
                    self.continue_incremental(chambering);
                }
                AmmoPhase::Pumping { elapsed } => {
                    let duration = self.spec.pump_time.max(0.0);
                    let target = elapsed + remaining;
                    if target < duration {
                        self.phase = AmmoPhase::Pumping { elapsed: target };
                        return true;
                    }
                    remaining = target - duration;
                    debug!(weapon = %self.spec.weapon, "pump cycled");
                    self.phase = AmmoPhase::Idle;
                }
            }
        }
    }

    fn continue_incremental(&mut self, chambering: bool) {
        let full = self.current >= self.spec.magazine_size;
        if full || self.reserve(&self.spec.ammo_type) == 0 {
            debug!(weapon = %self.spec.weapon, rounds = self.current, "tube reload finished");
            self.finish_reload(chambering);
        } else {
            self.phase = AmmoPhase::ReloadingIncrementalLoop {
                elapsed: 0.0,
                chambering,
            };
        }
    }

    fn finish_reload(&mut self, chambering: bool) {
        self.phase = if chambering && self.current > 0 {
            AmmoPhase::PumpNeeded
        } else {
            AmmoPhase::Idle
        };
    }

    /// Moves up to `rounds` from the reserve into the magazine; returns the count moved.
    fn transfer(&mut self, rounds: u32) -> u32 {
        let missing = self.spec.magazine_size.saturating_sub(self.current);
        let Some(pool) = self.reserves.get_mut(&self.spec.ammo_type) else {
            return 0;
        };
        let moved = rounds.min(missing).min(*pool);
        *pool -= moved;
        self.current += moved;
        self.sync_cache();
        moved
    }

    fn sync_cache(&mut self) {
        let pump_pending = matches!(
            self.phase,
            AmmoPhase::PumpNeeded | AmmoPhase::Pumping { .. }
        );
        self.cache.insert(
            self.spec.weapon.clone(),
            CachedWeapon {
                rounds: self.current,
                pump_pending,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DT: f32 = 1.0 / 60.0;

    fn rifle() -> AmmoSpec {
        AmmoSpec {
            weapon: "rifle".to_string(),
            ammo_type: "5.56".to_string(),
            magazine_size: 30,
            reload_time: 2.0,
            ..Default::default()
        }
    }

    fn shotgun() -> AmmoSpec {
        AmmoSpec {
            weapon: "shotgun".to_string(),
            ammo_type: "12ga".to_string(),
            magazine_size: 5,
            feed: AmmoFeed::Tube,
            action: AmmoAction::Pump,
            incremental_start_time: 0.6,
            incremental_insert_fraction: 0.5,
            incremental_loop_time: 0.5,
            pump_time: 0.6,
            ..Default::default()
        }
    }

    fn run_until_idle(ammo: &mut AmmoStateMachine) {
        for _ in 0..1000 {
            if !ammo.phase().is_reloading() && ammo.pump_stage() != PumpStage::Pumping {
                return;
            }
            ammo.update(DT);
        }
        panic!("state machine never settled: {:?}", ammo.phase());
    }

    #[test]
    fn first_equip_loads_initial_rounds() {
        let ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(12),
            ..rifle()
        });
        assert_eq!(ammo.current_ammo(), 12);
        assert_eq!(ammo.max_ammo(), 30);
        assert_eq!(ammo.current_ammo_type(), "5.56");
        assert_eq!(ammo.reserve("5.56"), 0);
        assert_eq!(ammo.reload_phase(), ReloadPhase::None);
        assert_eq!(ammo.pump_stage(), PumpStage::Idle);
    }

    #[test]
    fn consume_fails_without_mutation_when_empty() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(1),
            ..rifle()
        });
        assert!(ammo.consume(1));
        assert!(!ammo.consume(1));
        assert_eq!(ammo.current_ammo(), 0);
        assert!(!ammo.consume(0));
    }

    #[test]
    fn standard_reload_transfers_missing_rounds() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(10),
            ..rifle()
        });
        ammo.add_reserve("5.56", 50);
        assert!(ammo.start_reload());
        assert_eq!(ammo.reload_phase(), ReloadPhase::Standard);
        assert!(!ammo.consume(1));

        ammo.update(1.0);
        assert_eq!(ammo.current_ammo(), 10);
        assert_eq!(ammo.reload_progress(), Some(0.5));
        ammo.update(1.5);
        assert_eq!(ammo.current_ammo(), 30);
        assert_eq!(ammo.reserve("5.56"), 30);
        assert_eq!(ammo.reload_phase(), ReloadPhase::None);
    }

    #[test]
    fn reload_is_refused_when_full_or_reserve_empty() {
        let mut ammo = AmmoStateMachine::new(rifle());
        ammo.add_reserve("5.56", 30);
        assert!(!ammo.start_reload());

        let mut dry = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(3),
            ..rifle()
        });
        assert!(!dry.start_reload());
        assert_eq!(dry.reload_phase(), ReloadPhase::None);
    }

    #[test]
    fn partial_reserve_fills_what_it_can() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(0),
            ..rifle()
        });
        ammo.add_reserve("5.56", 7);
        assert!(ammo.start_reload());
        ammo.update(5.0);
        assert_eq!(ammo.current_ammo(), 7);
        assert_eq!(ammo.reserve("5.56"), 0);
    }

    #[test]
    fn cancel_before_any_round_changes_nothing() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(4),
            ..rifle()
        });
        ammo.add_reserve("5.56", 40);
        assert!(ammo.start_reload());
        ammo.update(0.5);
        assert!(ammo.cancel_reload());
        assert_eq!(ammo.current_ammo(), 4);
        assert_eq!(ammo.reserve("5.56"), 40);
        assert_eq!(ammo.reload_phase(), ReloadPhase::None);
        assert!(!ammo.cancel_reload());
    }

    #[test]
    fn incremental_reload_fills_tube() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(2),
            action: AmmoAction::SelfLoading,
            ..shotgun()
        });
        ammo.add_reserve("12ga", 10);
        assert!(ammo.start_reload());
        assert_eq!(ammo.reload_phase(), ReloadPhase::IncrementalStart);

        ammo.update(0.2);
        assert_eq!(ammo.current_ammo(), 2);
        ammo.update(0.2);
        assert_eq!(ammo.current_ammo(), 3);
        ammo.update(0.3);
        assert_eq!(ammo.reload_phase(), ReloadPhase::IncrementalLoop);

        run_until_idle(&mut ammo);
        assert_eq!(ammo.current_ammo(), 5);
        assert_eq!(ammo.reserve("12ga"), 7);
        assert_eq!(ammo.reload_phase(), ReloadPhase::None);
    }

    #[test]
    fn large_dt_rolls_through_every_phase() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(0),
            action: AmmoAction::SelfLoading,
            ..shotgun()
        });
        ammo.add_reserve("12ga", 3);
        assert!(ammo.start_reload());
        ammo.update(10.0);
        assert_eq!(ammo.current_ammo(), 3);
        assert_eq!(ammo.reserve("12ga"), 0);
        assert_eq!(ammo.reload_phase(), ReloadPhase::None);
    }

    #[test]
    fn cancelled_tube_reload_keeps_inserted_rounds() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(1),
            action: AmmoAction::SelfLoading,
            ..shotgun()
        });
        ammo.add_reserve("12ga", 10);
        assert!(ammo.start_reload());
        ammo.update(0.6 + 0.5 + 0.1);
        assert_eq!(ammo.current_ammo(), 3);
        assert!(ammo.cancel_reload());
        ammo.update(2.0);
        assert_eq!(ammo.current_ammo(), 3);
        assert_eq!(ammo.reserve("12ga"), 8);
    }

    #[test]
    fn pump_action_blocks_until_cycled() {
        let mut ammo = AmmoStateMachine::new(AmmoSpec {
            initial_rounds: Some(1),
            ..shotgun()
        });
        ammo.add_reserve("12ga", 4);
        assert!(ammo.consume(1));
        assert_eq!(ammo.pump_stage(), PumpStage::NeedsPump);

        assert!(ammo.start_reload());
        run_until_idle(&mut ammo);
        assert_eq!(ammo.current_ammo(), 4);
        assert_eq!(ammo.pump_stage(), PumpStage::NeedsPump);
        assert!(!ammo.consume(1));

        assert!(ammo.trigger_pump());
        assert_eq!(ammo.pump_stage(), PumpStage::Pumping);
        assert!(!ammo.consume(1));
        assert!(!ammo.trigger_pump());
        ammo.update(0.3);
        assert!(!ammo.consume(1));
        ammo.update(0.4);
        assert_eq!(ammo.pump_stage(), PumpStage::Idle);
        assert!(ammo.consume(1));
        assert_eq!(ammo.current_ammo(), 3);
        assert_eq!(ammo.pump_stage(), PumpStage::NeedsPump);
    }

    #[test]
    fn pump_is_only_valid_when_needed() {
        let mut ammo = AmmoStateMachine::new(shotgun());
        assert!(!ammo.trigger_pump());
        assert_eq!(ammo.pump_stage(), PumpStage::Idle);
    }

    #[test]
    fn equip_restores_cached_rounds_and_pending_pump() {
        let mut ammo = AmmoStateMachine::new(rifle());
        ammo.add_reserve("5.56", 60);
        assert!(ammo.consume(3));
        assert!(ammo.start_reload());

        ammo.equip(shotgun());
        assert_eq!(ammo.current_ammo(), 5);
        assert_eq!(ammo.reload_phase(), ReloadPhase::None);
        assert!(ammo.consume(1));
        assert_eq!(ammo.pump_stage(), PumpStage::NeedsPump);

        ammo.equip(rifle());
        assert_eq!(ammo.current_ammo(), 27);
        assert_eq!(ammo.reserve("5.56"), 60);
        assert_eq!(ammo.pump_stage(), PumpStage::Idle);

        ammo.equip(shotgun());
        assert_eq!(ammo.current_ammo(), 4);
        assert_eq!(ammo.pump_stage(), PumpStage::NeedsPump);
    }

    #[test]
    fn add_reserve_saturates() {
        let mut ammo = AmmoStateMachine::new(rifle());
        ammo.add_reserve("5.56", u32::MAX - 1);
        ammo.add_reserve("5.56", 10);
        assert_eq!(ammo.reserve("5.56"), u32::MAX);
    }

    #[test]
    fn spec_validation_reports_bad_fields() {
        let spec = AmmoSpec {
            magazine_size: 0,
            incremental_insert_fraction: 1.5,
            initial_rounds: Some(3),
            ..rifle()
        };
        let errors = spec.validate();
        assert!(errors.iter().any(|err| err.contains("magazine_size")));
        assert!(errors.iter().any(|err| err.contains("incremental_insert_fraction")));
        assert!(errors.iter().any(|err| err.contains("initial_rounds")));
        assert!(rifle().validate().is_empty());
    }

    fn command() -> impl Strategy<Value = AmmoCommand> {
        prop_oneof![
            (1u32..4).prop_map(AmmoCommand::Consume),
            Just(AmmoCommand::StartReload),
            Just(AmmoCommand::CancelReload),
            Just(AmmoCommand::TriggerPump),
            (0.0f32..1.5).prop_map(AmmoCommand::Advance),
        ]
    }

    proptest! {
        #[test]
        fn rounds_are_conserved(
            tube in any::<bool>(),
            pump in any::<bool>(),
            initial in 0u32..=6,
            reserve in 0u32..40,
            commands in proptest::collection::vec(command(), 0..64),
        ) {
            let spec = AmmoSpec {
                weapon: "test".to_string(),
                ammo_type: "test".to_string(),
                magazine_size: 6,
                feed: if tube { AmmoFeed::Tube } else { AmmoFeed::Magazine },
                action: if pump { AmmoAction::Pump } else { AmmoAction::SelfLoading },
                reload_time: 1.0,
                initial_rounds: Some(initial),
                ..Default::default()
            };
            let mut ammo = AmmoStateMachine::new(spec);
            ammo.add_reserve("test", reserve);
            let mut consumed = 0u32;
            for command in commands {
                let before = ammo.current_ammo();
                if ammo.apply(command) {
                    if let AmmoCommand::Consume(rounds) = command {
                        consumed += rounds;
                        prop_assert_eq!(ammo.current_ammo(), before - rounds);
                    }
                }
                prop_assert!(ammo.current_ammo() <= ammo.max_ammo());
                let drawn = reserve - ammo.reserve("test");
                prop_assert_eq!(ammo.current_ammo() + consumed, initial + drawn);
            }
        }
    }
}
