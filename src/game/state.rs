//! Simulation Context
//!
//! Everything that must stay identical across peers (world, RNG, treasury,
//! tick counter) plus the per-process bookkeeping the dispatcher and
//! scheduler need (nest depth, pending callback, network link, events).
//! One context lives for the whole process run and is passed by reference
//! into `execute` and `run_frame`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineConfig;
use crate::core::hash::{compute_tick_checksum, StateHasher};
use crate::core::money::Money;
use crate::core::rng::DeterministicRng;
use crate::game::command::{Command, CommandError, CommandResult, GhostFamily};
use crate::game::dispatch;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::finance::{ExpenditureType, FinanceGate, Finances};
use crate::game::registry::{CallbackId, CallbackRegistry, CommandRegistry, ResultCallback};
use crate::game::tick::AutosaveTimer;
use crate::network::session::PlayerId;
use crate::network::sync::NetworkSync;

// =============================================================================
// WORLD INTERFACE
// =============================================================================

/// Hooks invoked around loads and saves. The save format is the host's concern.
pub trait PersistenceHooks {
    /// Called after a scenario, save or server map finished loading.
    fn on_load_complete(&mut self) {}

    /// Called immediately before the host writes a save.
    fn on_before_save(&mut self) {}
}

/// Gameplay state driven by the engine.
///
/// Implementations must be deterministic: `update` may only draw randomness
/// from the supplied RNG, and must run its systems in the same order on
/// every peer.
pub trait World: PersistenceHooks + 'static {
    /// Advance every gameplay system by one tick.
    fn update(&mut self, rng: &mut DeterministicRng, tick: u32);

    /// Fold all synchronised state into the tick checksum.
    fn checksum(&self, hasher: &mut StateHasher);

    /// Drop the local ghost preview of a placement family.
    fn remove_ghost_placements(&mut self, _family: GhostFamily) {}

    /// Refresh time-based animations while paused.
    fn invalidate_animations(&mut self) {}

    /// Serialise the world for a joining client.
    fn snapshot(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Replace the world from a server snapshot.
    fn restore(&mut self, _payload: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}

// =============================================================================
// SMALL STATE TYPES
// =============================================================================

/// Reentrancy depth of the dispatcher.
///
/// Depth 1 is the top-level command; deeper levels are sub-commands issued
/// from another command's handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NestState {
    depth: u32,
}

impl NestState {
    /// Current depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// True while the outermost command is running.
    pub fn is_top_level(&self) -> bool {
        self.depth == 1
    }

    pub(crate) fn enter(&mut self) {
        self.depth = self.depth.saturating_add(1);
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn reset(&mut self) {
        self.depth = 0;
    }
}

/// What the host is currently showing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenMode {
    /// Normal park play
    #[default]
    Playing,
    /// Title screen demo park
    TitleDemo,
    /// Scenario editor
    ScenarioEditor,
    /// Track designer
    TrackDesigner,
    /// Track design manager
    TrackManager,
}

impl ScreenMode {
    /// Modes where autosave never runs.
    pub fn suppresses_autosave(self) -> bool {
        matches!(
            self,
            ScreenMode::TitleDemo | ScreenMode::TrackDesigner | ScreenMode::TrackManager
        )
    }
}

// =============================================================================
// SIMULATION CONTEXT
// =============================================================================

/// Process-wide simulation state.
pub struct SimulationContext<W: World> {
    /// Gameplay state
    pub world: W,

    /// Shared random stream
    pub rng: DeterministicRng,

    /// Treasury and ledger
    pub finances: Finances,

    /// Handler table
    pub registry: CommandRegistry<W>,

    /// Result callbacks available to the UI
    pub callbacks: CallbackRegistry,

    /// Replication link
    pub network: NetworkSync,

    /// Current screen
    pub screen_mode: ScreenMode,

    /// Engine configuration
    pub config: EngineConfig,

    tick: u32,
    nest: NestState,
    paused: bool,
    gate: FinanceGate,
    pending_callback: Option<CallbackId>,
    last_error: Option<CommandError>,
    command_is_networked: bool,
    expenditure_type: ExpenditureType,
    command_player: Option<PlayerId>,
    pub(crate) autosave: AutosaveTimer,
    events: Vec<GameEvent>,
    in_tick: bool,
    clock_ms: u64,
}

impl<W: World> SimulationContext<W> {
    /// Create an offline context with the built-in handlers registered.
    pub fn new(world: W, config: EngineConfig) -> Self {
        let gate = FinanceGate::new(config.privileged_flags);
        let network = NetworkSync::offline(config.network.clone());
        Self {
            world,
            rng: DeterministicRng::default(),
            finances: Finances::default(),
            registry: CommandRegistry::with_builtins(),
            callbacks: CallbackRegistry::default(),
            network,
            screen_mode: ScreenMode::Playing,
            config,
            tick: 0,
            nest: NestState::default(),
            paused: false,
            gate,
            pending_callback: None,
            last_error: None,
            command_is_networked: false,
            expenditure_type: ExpenditureType::default(),
            command_player: None,
            autosave: AutosaveTimer::default(),
            events: Vec::new(),
            in_tick: false,
            clock_ms: 0,
        }
    }

    /// Replace the network link.
    pub fn with_network(mut self, network: NetworkSync) -> Self {
        self.network = network;
        self
    }

    /// Execute a command through the two-phase dispatcher.
    pub fn execute(&mut self, command: &mut Command) -> CommandResult {
        dispatch::execute(self, command)
    }

    /// Load a fresh scenario (offline or server): seed the RNG, reset the
    /// tick counter and treasury, and run the load hook.
    pub fn load_scenario(&mut self, seed: [u32; 2], cash: Money) {
        self.complete_load(0, seed, Finances::new(cash), false);
        info!(seed0 = seed[0], seed1 = seed[1], cash, "scenario loaded");
    }

    /// Finish a load with explicit state (used for server map snapshots).
    pub fn complete_load(&mut self, tick: u32, rng_state: [u32; 2], finances: Finances, paused: bool) {
        self.tick = tick;
        self.rng.set_state(rng_state);
        self.finances = finances;
        self.paused = paused;
        self.nest.reset();
        self.pending_callback = None;
        self.last_error = None;
        self.command_player = None;
        self.network.reset_for_load(tick);
        self.world.on_load_complete();
        self.push_event(GameEventData::LoadCompleted { tick });
    }

    // ===== TICK & CLOCK =====

    /// Completed simulation ticks.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub(crate) fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Wall-clock milliseconds accumulated by `run_frame`.
    ///
    /// Never feeds into world state.
    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub(crate) fn advance_clock(&mut self, elapsed_ms: u32) {
        self.clock_ms = self.clock_ms.saturating_add(elapsed_ms as u64);
    }

    /// True while a simulation tick is running.
    pub fn in_tick(&self) -> bool {
        self.in_tick
    }

    pub(crate) fn set_in_tick(&mut self, value: bool) {
        self.in_tick = value;
    }

    /// Tick stamp for a command the server is about to broadcast.
    ///
    /// Commands applied between ticks land before the next tick's update, so
    /// clients must run them at the end of the previous tick.
    pub fn replication_stamp(&self) -> u32 {
        if self.in_tick || self.paused {
            self.tick
        } else {
            self.tick.saturating_sub(1)
        }
    }

    // ===== PAUSE =====

    /// Local pause state.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    // ===== DISPATCH BOOKKEEPING =====

    /// Current nest state.
    pub fn nest(&self) -> NestState {
        self.nest
    }

    pub(crate) fn nest_mut(&mut self) -> &mut NestState {
        &mut self.nest
    }

    /// Affordability gate.
    pub fn finance_gate(&self) -> FinanceGate {
        self.gate
    }

    /// Last error raised by a top-level command.
    pub fn last_error(&self) -> Option<&CommandError> {
        self.last_error.as_ref()
    }

    pub(crate) fn set_last_error(&mut self, error: Option<CommandError>) {
        self.last_error = error;
    }

    /// True if the running top-level command arrived from the network.
    pub fn is_networked_command(&self) -> bool {
        self.command_is_networked
    }

    pub(crate) fn set_networked_command(&mut self, value: bool) {
        self.command_is_networked = value;
    }

    /// Ledger category for the running command's payment.
    pub fn expenditure_type(&self) -> ExpenditureType {
        self.expenditure_type
    }

    /// Handlers call this to file their cost under a category.
    pub fn set_expenditure_type(&mut self, category: ExpenditureType) {
        self.expenditure_type = category;
    }

    /// Player the running command is attributed to.
    pub fn command_player(&self) -> Option<PlayerId> {
        self.command_player
    }

    pub(crate) fn set_command_player(&mut self, player: Option<PlayerId>) {
        self.command_player = player;
    }

    /// True if the running command was issued by this peer's own player.
    pub fn is_acting_player(&self) -> bool {
        self.command_player
            .map_or(true, |player| player == self.network.local_player_id())
    }

    /// Arm a result callback for the next top-level command.
    pub fn set_result_callback(&mut self, id: Option<CallbackId>) {
        self.pending_callback = id;
    }

    /// Armed callback, if any.
    pub fn pending_callback(&self) -> Option<CallbackId> {
        self.pending_callback
    }

    pub(crate) fn take_result_callback(&mut self) -> Option<ResultCallback> {
        self.pending_callback
            .take()
            .and_then(|id| self.callbacks.get(id))
    }

    // ===== EVENTS =====

    /// Push an event stamped with the current tick.
    pub fn push_event(&mut self, data: GameEventData) {
        self.events.push(GameEvent::new(self.tick, data));
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    // ===== VERIFICATION =====

    /// Checksum of tick, RNG, treasury and world.
    pub fn checksum(&self) -> String {
        compute_tick_checksum(self.tick, &self.rng, |hasher| {
            hasher.put(&self.finances.cash).put(&self.finances.no_money);
            self.world.checksum(hasher);
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxPark;

    #[test]
    fn test_nest_never_negative() {
        let mut nest = NestState::default();
        nest.exit();
        assert_eq!(nest.depth(), 0);
        nest.enter();
        assert!(nest.is_top_level());
        nest.enter();
        assert!(!nest.is_top_level());
        nest.reset();
        assert_eq!(nest.depth(), 0);
    }

    #[test]
    fn test_autosave_suppressed_modes() {
        assert!(ScreenMode::TitleDemo.suppresses_autosave());
        assert!(ScreenMode::TrackManager.suppresses_autosave());
        assert!(!ScreenMode::Playing.suppresses_autosave());
        assert!(!ScreenMode::ScenarioEditor.suppresses_autosave());
    }

    #[test]
    fn test_load_scenario_resets_state() {
        let mut ctx = SimulationContext::new(SandboxPark::default(), EngineConfig::default());
        ctx.load_scenario([1, 2], 5000);
        assert_eq!(ctx.tick(), 0);
        assert_eq!(ctx.rng.state(), [1, 2]);
        assert_eq!(ctx.finances.cash, 5000);
        let events = ctx.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, GameEventData::LoadCompleted { tick: 0 });
        assert!(ctx.take_events().is_empty());
    }

    #[test]
    fn test_replication_stamp() {
        let mut ctx = SimulationContext::new(SandboxPark::default(), EngineConfig::default());
        assert_eq!(ctx.replication_stamp(), 0);
        ctx.advance_tick();
        ctx.advance_tick();
        assert_eq!(ctx.replication_stamp(), 1);
        ctx.set_in_tick(true);
        assert_eq!(ctx.replication_stamp(), 2);
        ctx.set_in_tick(false);
        ctx.set_paused(true);
        assert_eq!(ctx.replication_stamp(), 2);
    }

    #[test]
    fn test_checksum_tracks_cash() {
        let mut a = SimulationContext::new(SandboxPark::default(), EngineConfig::default());
        let mut b = SimulationContext::new(SandboxPark::default(), EngineConfig::default());
        a.load_scenario([3, 4], 100);
        b.load_scenario([3, 4], 100);
        assert_eq!(a.checksum(), b.checksum());
        b.finances.cash = 90;
        assert_ne!(a.checksum(), b.checksum());
        b.finances.cash = 100;
        b.finances.no_money = true;
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_complete_load_keeps_whole_treasury() {
        let mut ctx = SimulationContext::new(SandboxPark::default(), EngineConfig::default());
        let mut finances = Finances::new(700);
        finances.apply_payment(50, ExpenditureType::Landscaping);
        finances.no_money = true;
        ctx.complete_load(12, [1, 2], finances.clone(), true);
        assert_eq!(ctx.finances, finances);
        assert_eq!(ctx.tick(), 12);
        assert!(ctx.is_paused());
    }
}
