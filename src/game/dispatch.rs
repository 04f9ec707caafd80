//! Two-Phase Command Dispatch
//!
//! ```text
//! Idle ─► Validating ─┬─► Rejected
//!                     └─► Affording ─┬─► Unaffordable
//!                                    ├─► Sending (client, top level)
//!                                    └─► Applying ─► Committed
//! ```
//!
//! Nested commands re-enter [`execute`] from inside a handler; the nest
//! depth tells the outermost call apart. Replication, callbacks, payment
//! and UI feedback belong to the outermost call only.

use thiserror::Error;
use tracing::{debug, warn};

#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::core::money::{Money, MONEY_UNDEFINED};
use crate::game::command::{Command, CommandError, CommandFlags, CommandKind, CommandResult, ErrorBody, CANT_DO_THIS};
use crate::game::events::GameEventData;
use crate::game::finance::InsufficientFunds;
use crate::game::registry::CommandHandler;
use crate::game::state::{SimulationContext, World};
use crate::network::transport::NetworkMode;

/// Why a dispatch failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler registered for the kind
    #[error("no handler registered for command {0}")]
    InvalidCommandKind(CommandKind),

    /// Affordability gate rejected the cost
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),

    /// The handler refused the command
    #[error("command rejected: {0}")]
    Rejected(CommandError),
}

impl DispatchError {
    /// Error window content.
    pub fn to_command_error(&self, title: &str) -> CommandError {
        match self {
            DispatchError::InvalidCommandKind(_) => {
                CommandError::new(title, ErrorBody::Message(self.to_string()))
            }
            DispatchError::InsufficientFunds(funds) => funds.to_command_error(title),
            DispatchError::Rejected(error) => error.clone(),
        }
    }
}

/// Run one command through validate, afford, replicate and apply.
///
/// `command.args` holds the final argument slots on return. The nest depth
/// is the same before and after the call.
pub fn execute<W: World>(ctx: &mut SimulationContext<W>, command: &mut Command) -> CommandResult {
    let kind = command.kind;
    let flags = command.flags;

    let Some(handler) = ctx.registry.get(kind) else {
        warn!(%kind, "no handler registered; command ignored");
        let error = DispatchError::InvalidCommandKind(kind);
        return CommandResult::from_error(error.to_command_error(CANT_DO_THIS));
    };

    #[cfg(feature = "debug-tracing")]
    trace!(%kind, flags = flags.bits(), args = ?command.args, depth = ctx.nest().depth(), "execute");

    // Entry bookkeeping
    if ctx.nest().depth() == 0 {
        ctx.set_last_error(None);
        ctx.set_networked_command(flags.contains(CommandFlags::NETWORKED));
    }
    ctx.nest_mut().enter();

    // The authoritative placement replaces whatever ghost the local player
    // was previewing for the same class.
    if flags.contains(CommandFlags::NETWORKED) && !flags.contains(CommandFlags::GHOST) {
        if let Some(family) = kind.ghost_family() {
            ctx.world.remove_ghost_placements(family);
        }
    }

    if ctx.command_player().is_none() {
        let local = ctx.network.local_player_id();
        ctx.set_command_player(Some(local));
    }

    if ctx.nest().is_top_level() {
        write_audit_line(ctx, handler.as_ref(), command, flags);
    }

    let original_args = command.args;

    // Validation
    let validated = handler.validate(ctx, &mut command.args, flags - CommandFlags::APPLY);
    let failure = if validated.cost == MONEY_UNDEFINED {
        validated
            .error
            .unwrap_or_else(|| CommandError::new(handler.error_title(), ErrorBody::None))
    } else {
        match check_affordability(ctx, validated.cost, flags) {
            Ok(cost) => {
                command.args = original_args;
                return commit(ctx, handler.as_ref(), command, cost);
            }
            Err(funds) => {
                command.args = original_args;
                debug!(%kind, required = funds.required, available = funds.available, "command unaffordable");
                DispatchError::from(funds).to_command_error(handler.error_title())
            }
        }
    };

    // Rejected or unaffordable
    ctx.nest_mut().exit();
    ctx.set_result_callback(None);
    if ctx.nest().depth() == 0 {
        ctx.set_command_player(None);
    }
    ctx.set_last_error(Some(failure.clone()));

    let wants_window = ctx.nest().depth() == 0
        && flags.contains(CommandFlags::APPLY)
        && ctx.is_acting_player()
        && !flags.intersects(CommandFlags::ALLOW_DURING_PAUSE | CommandFlags::NETWORKED);
    if wants_window {
        ctx.push_event(GameEventData::ErrorWindow {
            title: failure.title.clone(),
            body: failure.body.clone(),
        });
    }

    CommandResult::from_error(failure)
}

/// Affordability applies to top-level, unprivileged, non-zero costs only.
fn check_affordability<W: World>(
    ctx: &SimulationContext<W>,
    cost: Money,
    flags: CommandFlags,
) -> Result<Money, InsufficientFunds> {
    if !ctx.nest().is_top_level() || cost == 0 {
        return Ok(cost);
    }
    ctx.finance_gate().check_afford(&ctx.finances, cost, flags)
}

/// Dry-run return, replication, apply and the depth-0 side effects.
fn commit<W: World>(
    ctx: &mut SimulationContext<W>,
    handler: &dyn CommandHandler<W>,
    command: &mut Command,
    validated_cost: Money,
) -> CommandResult {
    let kind = command.kind;
    let flags = command.flags;
    let mut cost = validated_cost;

    if !flags.contains(CommandFlags::APPLY) {
        unwind(ctx);
        return CommandResult::ok(cost);
    }

    // Replication gate
    let replicate = ctx.nest().is_top_level()
        && ctx.network.mode() != NetworkMode::None
        && !flags.intersects(CommandFlags::NETWORKED | CommandFlags::GHOST | CommandFlags::BIT5)
        && !kind.is_network_denied();
    if replicate {
        let callback = ctx.pending_callback();
        match ctx.network.mode() {
            NetworkMode::Client => {
                let stamp = ctx.tick();
                ctx.network.send_command(stamp, command, callback);
                ctx.set_result_callback(None);
                unwind(ctx);
                return CommandResult::ok(cost);
            }
            NetworkMode::Server => {
                let stamp = ctx.replication_stamp();
                let player = ctx.network.local_player_id();
                ctx.network.broadcast_command(stamp, player, command, callback);
            }
            NetworkMode::None => {}
        }
    }

    // Apply
    let applied = handler.apply(ctx, &mut command.args, flags);

    if ctx.nest().is_top_level() && !flags.contains(CommandFlags::GHOST) {
        if let Some(callback) = ctx.take_result_callback() {
            callback(&command.args);
        }
    }

    let acting = ctx.is_acting_player();
    let player = ctx.command_player();

    if applied.cost != MONEY_UNDEFINED && applied.cost < cost {
        cost = applied.cost;
    }

    ctx.nest_mut().exit();
    if ctx.nest().depth() != 0 {
        return CommandResult::ok(cost);
    }
    ctx.set_command_player(None);

    // Depth-0 side effects
    if !flags.contains(CommandFlags::BIT5) {
        let category = ctx.expenditure_type();
        ctx.finances.apply_payment(cost, category);
        if cost != 0 && !ctx.is_paused() && acting {
            ctx.push_event(GameEventData::MoneyEffect { amount: cost });
        }
    }

    if ctx.network.mode() == NetworkMode::Server
        && !flags.intersects(CommandFlags::NETWORKED | CommandFlags::GHOST)
    {
        if let Some(player) = player {
            let now = ctx.clock_ms();
            ctx.network.players.record_action(player, kind, cost, now);
        }
    }

    let now = ctx.clock_ms();
    ctx.autosave.resume(now);

    CommandResult::ok(cost)
}

fn unwind<W: World>(ctx: &mut SimulationContext<W>) {
    ctx.nest_mut().exit();
    if ctx.nest().depth() == 0 {
        ctx.set_command_player(None);
    }
}

/// Best-effort multiplayer audit line for the outermost command.
fn write_audit_line<W: World>(
    ctx: &mut SimulationContext<W>,
    handler: &dyn CommandHandler<W>,
    command: &Command,
    flags: CommandFlags,
) {
    let mode = ctx.network.mode();
    let eligible = match mode {
        NetworkMode::Server => true,
        NetworkMode::Client => ctx.is_networked_command(),
        NetworkMode::None => false,
    };
    if !eligible || !ctx.network.config().log_server_actions {
        return;
    }

    let Some(summary) = handler.audit_summary(&ctx.world, &command.args, flags) else {
        return;
    };
    let name = ctx
        .command_player()
        .and_then(|player| ctx.network.players.get(player))
        .map(|session| session.name.clone())
        .unwrap_or_else(|| "Unknown player".to_string());
    ctx.network.server_log_mut().append(&format!("{name} {summary}"));
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use proptest::prelude::*;

    use crate::config::EngineConfig;
    use crate::game::events::GameEvent;
    use crate::game::finance::ExpenditureType;
    use crate::game::registry::FnHandler;
    use crate::network::session::PlayerId;
    use crate::sandbox::{self, SandboxPark};

    fn offline(cash: Money) -> SimulationContext<SandboxPark> {
        let mut ctx = sandbox::new_context(EngineConfig::default());
        ctx.load_scenario([1, 2], cash);
        ctx.take_events();
        ctx
    }

    fn error_windows(events: &[GameEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e.data, GameEventData::ErrorWindow { .. }))
            .count()
    }

    #[test]
    fn test_unknown_kind_is_invalid() {
        let mut ctx = offline(1000);
        let mut cmd = Command::apply(CommandKind::ModifyTile, [0; 5]);
        let result = execute(&mut ctx, &mut cmd);
        assert_eq!(result.cost, MONEY_UNDEFINED);
        assert_eq!(ctx.nest().depth(), 0);
        assert!(ctx.take_events().is_empty());
    }

    #[test]
    fn test_unaffordable_command_changes_nothing() {
        // 100 in the bank, 150 to build
        let mut ctx = offline(100);
        let before = ctx.checksum();
        let mut cmd = sandbox::place_scenery(3, 4, 150);
        let result = execute(&mut ctx, &mut cmd);

        assert_eq!(result.cost, MONEY_UNDEFINED);
        assert_eq!(
            result.error.map(|e| e.body),
            Some(ErrorBody::NotEnoughCash { required: 150 })
        );
        assert_eq!(ctx.finances.cash, 100);
        assert_eq!(ctx.checksum(), before);
        assert_eq!(ctx.nest().depth(), 0);
        assert_eq!(error_windows(&ctx.take_events()), 1);
    }

    #[test]
    fn test_dry_run_prices_without_mutation() {
        let mut ctx = offline(1000);
        let before = ctx.checksum();
        let mut cmd = sandbox::place_scenery(3, 4, 150);
        cmd.flags -= CommandFlags::APPLY;
        let result = execute(&mut ctx, &mut cmd);
        assert_eq!(result.cost, 150);
        assert_eq!(ctx.checksum(), before);
        assert_eq!(ctx.finances.cash, 1000);
    }

    #[test]
    fn test_apply_charges_once() {
        let mut ctx = offline(1000);
        let mut cmd = sandbox::place_scenery(3, 4, 150);
        let result = execute(&mut ctx, &mut cmd);
        assert_eq!(result.cost, 150);
        assert_eq!(ctx.finances.cash, 850);
        assert_eq!(ctx.finances.spent_on(ExpenditureType::Landscaping), 150);
        assert_eq!(ctx.world.scenery.len(), 1);
        let events = ctx.take_events();
        assert!(events.iter().any(|e| e.data == GameEventData::MoneyEffect { amount: 150 }));
    }

    #[test]
    fn test_bit5_skips_payment_and_gate() {
        let mut ctx = offline(0);
        let mut cmd = sandbox::place_scenery(1, 1, 500).with_flags(CommandFlags::BIT5);
        let result = execute(&mut ctx, &mut cmd);
        assert_eq!(result.cost, 500);
        assert_eq!(ctx.finances.cash, 0);
        assert_eq!(ctx.world.scenery.len(), 1);
    }

    #[test]
    fn test_bit2_skips_gate_but_pays() {
        let mut ctx = offline(0);
        let mut cmd = sandbox::place_scenery(1, 1, 500).with_flags(CommandFlags::BIT2);
        assert_eq!(execute(&mut ctx, &mut cmd).cost, 500);
        assert_eq!(ctx.finances.cash, -500);
    }

    #[test]
    fn test_error_window_suppressed_for_networked_and_pause_allowed() {
        let mut ctx = offline(100);
        let mut cmd = sandbox::place_scenery(3, 4, 150).with_flags(CommandFlags::NETWORKED);
        execute(&mut ctx, &mut cmd);
        let mut cmd = sandbox::place_scenery(3, 4, 150).with_flags(CommandFlags::ALLOW_DURING_PAUSE);
        execute(&mut ctx, &mut cmd);
        assert_eq!(error_windows(&ctx.take_events()), 0);
        assert!(ctx.last_error().is_some());
    }

    #[test]
    fn test_error_window_suppressed_for_dry_run() {
        let mut ctx = offline(100);
        let mut cmd = sandbox::place_scenery(3, 4, 150);
        cmd.flags -= CommandFlags::APPLY;
        assert_eq!(execute(&mut ctx, &mut cmd).cost, 150);
        let mut cmd = Command::query(CommandKind::PlaceScenery, [3, 4, -1, 0, 0]);
        assert!(!execute(&mut ctx, &mut cmd).is_ok());
        assert_eq!(error_windows(&ctx.take_events()), 0);
    }

    #[test]
    fn test_no_error_window_for_other_players() {
        let mut ctx = offline(100);
        ctx.set_command_player(Some(PlayerId(4)));
        let mut cmd = sandbox::place_scenery(3, 4, 150);
        execute(&mut ctx, &mut cmd);
        assert_eq!(error_windows(&ctx.take_events()), 0);
        assert_eq!(ctx.command_player(), None);
    }

    #[test]
    fn test_callback_fires_once_at_commit() {
        let mut ctx = offline(1000);
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = ctx.callbacks.register(move |_| counter.set(counter.get() + 1));
        ctx.set_result_callback(id);

        let mut cmd = sandbox::demolish_ride(0);
        let mut create = sandbox::create_ride(3);
        execute(&mut ctx, &mut create);
        assert_eq!(hits.get(), 1);
        assert!(ctx.pending_callback().is_none());

        execute(&mut ctx, &mut cmd);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_callback_cleared_on_failure() {
        let mut ctx = offline(0);
        let id = ctx.callbacks.register(|_| panic!("must not fire"));
        ctx.set_result_callback(id);
        let mut cmd = sandbox::place_scenery(1, 1, 10);
        assert!(!execute(&mut ctx, &mut cmd).is_ok());
        assert!(ctx.pending_callback().is_none());
    }

    #[test]
    fn test_ghost_skips_callback() {
        let mut ctx = offline(1000);
        let id = ctx.callbacks.register(|_| panic!("ghosts never fire callbacks"));
        ctx.set_result_callback(id);
        let mut cmd = sandbox::place_scenery(1, 1, 10).with_flags(CommandFlags::GHOST);
        assert!(execute(&mut ctx, &mut cmd).is_ok());
        assert!(ctx.world.ghosts.contains(&(1, 1)));
    }

    #[test]
    fn test_nested_commands_charge_once_and_unwind() {
        let mut ctx = offline(10_000);
        let mut create = sandbox::create_ride(3);
        execute(&mut ctx, &mut create);
        let cash_after_build = ctx.finances.cash;

        let mut demolish = sandbox::demolish_ride(0);
        let result = execute(&mut ctx, &mut demolish);
        assert!(result.is_ok());
        assert_eq!(ctx.nest().depth(), 0);
        assert!(ctx.world.rides.is_empty());
        assert_eq!(ctx.finances.cash, cash_after_build - result.cost);
    }

    #[test]
    fn test_applied_cost_lowers_validated_cost() {
        fn cheaper(_: &mut SimulationContext<SandboxPark>, _: &mut crate::game::command::CommandArgs, flags: CommandFlags) -> CommandResult {
            if flags.contains(CommandFlags::APPLY) {
                CommandResult::ok(40)
            } else {
                CommandResult::ok(60)
            }
        }
        let mut ctx = offline(100);
        ctx.registry.register(CommandKind::ModifyTile, FnHandler::new(cheaper));
        let mut cmd = Command::apply(CommandKind::ModifyTile, [0; 5]);
        assert_eq!(execute(&mut ctx, &mut cmd).cost, 40);
        assert_eq!(ctx.finances.cash, 60);
    }

    #[test]
    fn test_args_restored_before_apply() {
        fn scribble(_: &mut SimulationContext<SandboxPark>, args: &mut crate::game::command::CommandArgs, flags: CommandFlags) -> CommandResult {
            if flags.contains(CommandFlags::APPLY) {
                assert_eq!(args.get(0), 1);
                args.set(1, 99);
            } else {
                args.set(0, -7);
            }
            CommandResult::ok(0)
        }
        let mut ctx = offline(100);
        ctx.registry.register(CommandKind::ModifyTile, FnHandler::new(scribble));
        let mut cmd = Command::apply(CommandKind::ModifyTile, [1, 0, 0, 0, 0]);
        assert!(execute(&mut ctx, &mut cmd).is_ok());
        assert_eq!(cmd.args.slots(), &[1, 99, 0, 0, 0]);
    }

    #[test]
    fn test_networked_placement_clears_ghost() {
        let mut ctx = offline(1000);
        let mut ghost = sandbox::place_scenery(5, 5, 10).with_flags(CommandFlags::GHOST);
        execute(&mut ctx, &mut ghost);
        assert!(!ctx.world.ghosts.is_empty());
        let mut real = sandbox::place_scenery(5, 5, 10).with_flags(CommandFlags::NETWORKED);
        execute(&mut ctx, &mut real);
        assert!(ctx.world.ghosts.is_empty());
    }

    #[test]
    fn test_toggle_pause_builtin() {
        let mut ctx = offline(0);
        let mut cmd = Command::apply(CommandKind::TogglePause, [0; 5])
            .with_flags(CommandFlags::ALLOW_DURING_PAUSE);
        execute(&mut ctx, &mut cmd);
        assert!(ctx.is_paused());
        execute(&mut ctx, &mut cmd);
        assert!(!ctx.is_paused());
    }

    proptest! {
        #[test]
        fn prop_validation_is_pure(kind_index in 0usize..72, args in proptest::array::uniform5(-20i32..20)) {
            let mut ctx = offline(1_000);
            let mut setup = sandbox::create_ride(2);
            execute(&mut ctx, &mut setup);
            let before = ctx.checksum();
            let world_before = ctx.world.clone();
            let cash = ctx.finances.cash;

            let kind = CommandKind::ALL[kind_index];
            if let Some(handler) = ctx.registry.get(kind) {
                let mut slots = crate::game::command::CommandArgs::new(args);
                handler.validate(&mut ctx, &mut slots, CommandFlags::empty());
            }
            prop_assert_eq!(&ctx.world, &world_before);
            prop_assert_eq!(ctx.finances.cash, cash);
            prop_assert_eq!(ctx.checksum(), before);
        }

        #[test]
        fn prop_nest_depth_balanced(ops in proptest::collection::vec((0usize..4, 0i32..6), 1..40)) {
            let mut ctx = offline(5_000);
            for (op, arg) in ops {
                let mut cmd = match op {
                    0 => sandbox::create_ride(arg),
                    1 => sandbox::demolish_ride(arg),
                    2 => sandbox::place_scenery(arg, arg, 25),
                    _ => sandbox::set_ride_price(arg, arg * 10),
                };
                execute(&mut ctx, &mut cmd);
                prop_assert_eq!(ctx.nest().depth(), 0);
            }
        }
    }
}
