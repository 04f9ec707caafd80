//! Fixed-Step Scheduler
//!
//! [`run_frame`] is called once per host frame and decides how many
//! simulation ticks to run; [`tick`] runs exactly one. The tick counter only
//! advances here.
//!
//! One tick, in order:
//!
//! ```text
//! network update ─► client gate ─► tick broadcast / desync check
//!   ─► World::update ─► autosave timer ─► drain command queue ─► flush ─► tick += 1
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::game::events::GameEventData;
use crate::game::state::{SimulationContext, World};
use crate::network::sync;
use crate::network::transport::NetworkMode;
use crate::{CATCH_UP_THRESHOLD, CATCH_UP_TICKS, GAME_MAX_UPDATES, GAME_UPDATE_TIME_MS, MAX_UPDATES_PER_FRAME};

/// Scheduler tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Duration of one tick at normal speed
    pub update_time_ms: u32,
    /// Clamp for updates derived from wall-clock time
    pub max_wall_clock_updates: u32,
    /// Hard cap on ticks per frame, catch-up included
    pub max_updates_per_frame: u32,
    /// Client lag (in ticks) that triggers catch-up
    pub catch_up_threshold: u32,
    /// Extra ticks per frame while catching up
    pub catch_up_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_time_ms: GAME_UPDATE_TIME_MS,
            max_wall_clock_updates: GAME_MAX_UPDATES,
            max_updates_per_frame: MAX_UPDATES_PER_FRAME,
            catch_up_threshold: CATCH_UP_THRESHOLD,
            catch_up_ticks: CATCH_UP_TICKS,
        }
    }
}

// =============================================================================
// AUTOSAVE
// =============================================================================

/// How often to autosave, measured in wall-clock time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutosaveFrequency {
    /// Every minute
    EveryMinute,
    /// Every 5 minutes
    #[default]
    Every5Minutes,
    /// Every 15 minutes
    Every15Minutes,
    /// Every 30 minutes
    Every30Minutes,
    /// Every hour
    EveryHour,
    /// Never
    Never,
}

impl AutosaveFrequency {
    /// Interval in milliseconds, `None` for never.
    pub fn interval_ms(self) -> Option<u64> {
        const MINUTE: u64 = 60 * 1000;
        match self {
            AutosaveFrequency::EveryMinute => Some(MINUTE),
            AutosaveFrequency::Every5Minutes => Some(5 * MINUTE),
            AutosaveFrequency::Every15Minutes => Some(15 * MINUTE),
            AutosaveFrequency::Every30Minutes => Some(30 * MINUTE),
            AutosaveFrequency::EveryHour => Some(60 * MINUTE),
            AutosaveFrequency::Never => None,
        }
    }
}

/// Wall-clock idle timer. Paused after an autosave until the next tick or
/// committed command restarts it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AutosaveTimer {
    last_save_ms: Option<u64>,
}

impl AutosaveTimer {
    /// True while waiting for activity after a save.
    pub fn is_paused(&self) -> bool {
        self.last_save_ms.is_none()
    }

    /// Restart the timer if it was paused.
    pub fn resume(&mut self, now_ms: u64) {
        if self.last_save_ms.is_none() {
            self.last_save_ms = Some(now_ms);
        }
    }

    /// True (and pauses the timer) once the interval has elapsed.
    pub fn poll_due(&mut self, now_ms: u64, frequency: AutosaveFrequency) -> bool {
        let (Some(last), Some(interval)) = (self.last_save_ms, frequency.interval_ms()) else {
            return false;
        };
        if now_ms.saturating_sub(last) >= interval {
            self.last_save_ms = None;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// FRAME
// =============================================================================

/// What a frame did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Ticks the frame asked for
    pub requested: u32,
    /// Ticks actually run
    pub ticks_run: u32,
    /// Catch-up ticks were added
    pub caught_up: bool,
    /// An autosave was requested
    pub autosaved: bool,
}

/// Ticks requested for a frame before catch-up and pause.
///
/// Speeds above 1 are fast-forward and run `2^(speed-1)` ticks.
pub fn updates_for_speed(config: &SchedulerConfig, elapsed_ms: u32, configured_speed: u8) -> u32 {
    if configured_speed > 1 {
        let shift = u32::from(configured_speed - 1).min(31);
        return 1u32 << shift;
    }
    let by_time = elapsed_ms / config.update_time_ms.max(1);
    by_time.clamp(1, config.max_wall_clock_updates.max(1))
}

/// Run one host frame.
pub fn run_frame<W: World>(
    ctx: &mut SimulationContext<W>,
    elapsed_ms: u32,
    configured_speed: u8,
) -> FrameReport {
    ctx.advance_clock(elapsed_ms);
    let config = ctx.config.scheduler.clone();
    let mut report = FrameReport::default();

    let mut num_updates = updates_for_speed(&config, elapsed_ms, configured_speed);

    if ctx.network.is_connected_client() {
        let lag = ctx.network.server_tick().saturating_sub(ctx.tick());
        if lag >= config.catch_up_threshold {
            num_updates = num_updates.saturating_add(config.catch_up_ticks);
            report.caught_up = true;
            debug!(lag, server_tick = ctx.network.server_tick(), "client catching up");
        }
    }
    num_updates = num_updates.min(config.max_updates_per_frame);

    if ctx.is_paused() {
        num_updates = 0;
        ctx.world.invalidate_animations();
        // Pause is local: replicated commands keep arriving and must land.
        sync::update(ctx);
        sync::process_command_queue(ctx);
        sync::send_hold(ctx);
        ctx.network.flush();
    }
    report.requested = num_updates;

    for _ in 0..num_updates {
        if !tick(ctx) {
            break;
        }
        report.ticks_run += 1;
    }

    if !ctx.screen_mode.suppresses_autosave() {
        report.autosaved = autosave_check(ctx);
    }

    ctx.nest_mut().reset();
    report
}

/// Run exactly one simulation tick. Returns false if a client had to wait
/// for the server.
pub fn tick<W: World>(ctx: &mut SimulationContext<W>) -> bool {
    sync::update(ctx);

    // A client never runs a tick the server has not finished announcing,
    // including before the server map has loaded.
    if ctx.network.mode() == NetworkMode::Client && ctx.tick() >= ctx.network.server_tick() {
        return false;
    }

    ctx.set_in_tick(true);

    match ctx.network.mode() {
        NetworkMode::Server => sync::send_tick(ctx),
        NetworkMode::Client => {
            // Failure is already logged and surfaced as an event.
            let _ = sync::check_desynchronisation(ctx);
        }
        NetworkMode::None => {}
    }

    let tick = ctx.tick();
    ctx.world.update(&mut ctx.rng, tick);

    let now = ctx.clock_ms();
    ctx.autosave.resume(now);

    sync::process_command_queue(ctx);
    ctx.network.flush();

    ctx.advance_tick();
    ctx.nest_mut().reset();
    ctx.set_in_tick(false);
    true
}

fn autosave_check<W: World>(ctx: &mut SimulationContext<W>) -> bool {
    let now = ctx.clock_ms();
    let frequency = ctx.config.autosave;
    if !ctx.autosave.poll_due(now, frequency) {
        return false;
    }
    info!(tick = ctx.tick(), "autosave due");
    ctx.world.on_before_save();
    ctx.push_event(GameEventData::AutosaveRequested);
    true
}

// =============================================================================
// TESTS
// =============================================================================
