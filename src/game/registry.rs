//! Command Handler Registry
//!
//! Gameplay code registers one two-phase handler per [`CommandKind`]. The
//! dispatcher looks handlers up here and never knows what a kind does.
//!
//! ## Handler contract
//!
//! `validate` runs with `APPLY` cleared and must not mutate committed world
//! state: it prices the command and reports errors. `apply` runs only after
//! validation and the affordability gate passed, and is the only phase
//! allowed to mutate.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::game::command::{CommandArgs, CommandFlags, CommandKind, CommandResult, CANT_DO_THIS};
use crate::game::events::{GameEventData, LoadOrQuitAction};
use crate::game::state::{SimulationContext, World};

/// Produces a human-readable audit line for the multiplayer server log.
///
/// Most kinds are not audited; the default returns `None`.
pub trait AuditLoggable<W: World> {
    /// Summary of the command, without the player name.
    fn audit_summary(&self, _world: &W, _args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        None
    }
}

/// A registered two-phase command handler.
pub trait CommandHandler<W: World>: AuditLoggable<W> {
    /// Price and check the command. Must not mutate world state.
    fn validate(
        &self,
        ctx: &mut SimulationContext<W>,
        args: &mut CommandArgs,
        flags: CommandFlags,
    ) -> CommandResult;

    /// Perform the mutation. Called with `APPLY` set.
    fn apply(
        &self,
        ctx: &mut SimulationContext<W>,
        args: &mut CommandArgs,
        flags: CommandFlags,
    ) -> CommandResult;

    /// Title of the error window when the command fails for money reasons.
    fn error_title(&self) -> &'static str {
        CANT_DO_THIS
    }
}

/// Single-function handler that branches on `APPLY` itself.
pub type HandlerFn<W> = fn(&mut SimulationContext<W>, &mut CommandArgs, CommandFlags) -> CommandResult;

/// Adapts a [`HandlerFn`] to the two-phase interface.
pub struct FnHandler<W: World> {
    func: HandlerFn<W>,
    title: &'static str,
}

impl<W: World> FnHandler<W> {
    /// Wrap a function with the default error title.
    pub fn new(func: HandlerFn<W>) -> Self {
        Self {
            func,
            title: CANT_DO_THIS,
        }
    }
}

impl<W: World> AuditLoggable<W> for FnHandler<W> {}

impl<W: World> CommandHandler<W> for FnHandler<W> {
    fn validate(
        &self,
        ctx: &mut SimulationContext<W>,
        args: &mut CommandArgs,
        flags: CommandFlags,
    ) -> CommandResult {
        (self.func)(ctx, args, flags - CommandFlags::APPLY)
    }

    fn apply(
        &self,
        ctx: &mut SimulationContext<W>,
        args: &mut CommandArgs,
        flags: CommandFlags,
    ) -> CommandResult {
        (self.func)(ctx, args, flags | CommandFlags::APPLY)
    }

    fn error_title(&self) -> &'static str {
        self.title
    }
}

/// Kind-to-handler table.
///
/// Handlers are reference counted so the dispatcher can hold one while the
/// handler itself re-enters the context (sub-commands).
pub struct CommandRegistry<W: World> {
    handlers: BTreeMap<CommandKind, Rc<dyn CommandHandler<W>>>,
}

impl<W: World> Default for CommandRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: World> CommandRegistry<W> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with the core-owned handlers (pause, load-or-quit).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(CommandKind::TogglePause, TogglePauseHandler);
        registry.register(CommandKind::LoadOrQuit, LoadOrQuitHandler);
        registry
    }

    /// Register a handler, returning the one it replaced.
    pub fn register<H>(&mut self, kind: CommandKind, handler: H) -> Option<Rc<dyn CommandHandler<W>>>
    where
        H: CommandHandler<W> + 'static,
    {
        self.handlers.insert(kind, Rc::new(handler))
    }

    /// Register a single-function handler.
    pub fn register_fn(&mut self, kind: CommandKind, func: HandlerFn<W>) {
        self.register(kind, FnHandler::new(func));
    }

    /// Look up a handler.
    pub fn get(&self, kind: CommandKind) -> Option<Rc<dyn CommandHandler<W>>> {
        self.handlers.get(&kind).cloned()
    }

    /// True if a handler is registered.
    pub fn contains(&self, kind: CommandKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in discriminant order.
    pub fn kinds(&self) -> impl Iterator<Item = CommandKind> + '_ {
        self.handlers.keys().copied()
    }

    /// Number of registered handlers.
    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Kinds with no handler. A complete ruleset returns an empty list.
    pub fn missing_kinds(&self) -> Vec<CommandKind> {
        CommandKind::ALL
            .iter()
            .copied()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }
}

// =============================================================================
// RESULT CALLBACKS
// =============================================================================

/// UI hook invoked once with the final argument slots of a committed
/// top-level command.
pub type ResultCallback = Rc<dyn Fn(&CommandArgs)>;

/// Index of a registered callback. Travels with replicated commands so the
/// issuing client can fire its callback when the server echo lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallbackId(pub u8);

/// Per-process callback table.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Vec<ResultCallback>,
}

impl CallbackRegistry {
    /// Register a callback. Returns `None` once 256 are registered.
    pub fn register(&mut self, callback: impl Fn(&CommandArgs) + 'static) -> Option<CallbackId> {
        let id = u8::try_from(self.callbacks.len()).ok()?;
        self.callbacks.push(Rc::new(callback));
        Some(CallbackId(id))
    }

    /// Look up a callback.
    pub fn get(&self, id: CallbackId) -> Option<ResultCallback> {
        self.callbacks.get(id.0 as usize).cloned()
    }
}

// =============================================================================
// BUILT-IN HANDLERS
// =============================================================================

/// Flips the pause state.
pub struct TogglePauseHandler;

impl<W: World> AuditLoggable<W> for TogglePauseHandler {}

impl<W: World> CommandHandler<W> for TogglePauseHandler {
    fn validate(&self, _ctx: &mut SimulationContext<W>, _args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        CommandResult::ok(0)
    }

    fn apply(&self, ctx: &mut SimulationContext<W>, _args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        let paused = !ctx.is_paused();
        ctx.set_paused(paused);
        ctx.push_event(GameEventData::PauseToggled { paused });
        CommandResult::ok(0)
    }
}

/// Opens or closes the save prompt, or proceeds straight to load/quit.
///
/// Slot 0 selects the action (0 open prompt, 1 close prompt, other proceed);
/// slot 1 carries the prompt mode.
pub struct LoadOrQuitHandler;

impl<W: World> AuditLoggable<W> for LoadOrQuitHandler {}

impl<W: World> CommandHandler<W> for LoadOrQuitHandler {
    fn validate(&self, _ctx: &mut SimulationContext<W>, _args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        CommandResult::ok(0)
    }

    fn apply(&self, ctx: &mut SimulationContext<W>, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        let action = match args.get(0) {
            0 => LoadOrQuitAction::OpenSavePrompt { mode: args.get(1) },
            1 => LoadOrQuitAction::CloseSavePrompt,
            _ => LoadOrQuitAction::Proceed,
        };
        ctx.push_event(GameEventData::LoadOrQuitRequested { action });
        CommandResult::ok(0)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::sandbox::SandboxPark;

    fn noop(_ctx: &mut SimulationContext<SandboxPark>, _args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
        if flags.contains(CommandFlags::APPLY) {
            CommandResult::ok(5)
        } else {
            CommandResult::ok(7)
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = CommandRegistry::<SandboxPark>::with_builtins();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(CommandKind::TogglePause));
        assert!(registry.contains(CommandKind::LoadOrQuit));
        assert_eq!(registry.missing_kinds().len(), CommandKind::ALL.len() - 2);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = CommandRegistry::<SandboxPark>::new();
        assert!(registry.register(CommandKind::Cheat, FnHandler::new(noop)).is_none());
        assert!(registry.register(CommandKind::Cheat, FnHandler::new(noop)).is_some());
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec![CommandKind::Cheat]);
    }

    #[test]
    fn test_fn_handler_phases() {
        let mut ctx = SimulationContext::new(SandboxPark::default(), Default::default());
        let handler = FnHandler::new(noop);
        let mut args = CommandArgs::default();
        assert_eq!(handler.validate(&mut ctx, &mut args, CommandFlags::APPLY).cost, 7);
        assert_eq!(handler.apply(&mut ctx, &mut args, CommandFlags::empty()).cost, 5);
    }

    #[test]
    fn test_callback_registry() {
        let hits = Rc::new(Cell::new(0));
        let seen = hits.clone();
        let mut callbacks = CallbackRegistry::default();
        let id = callbacks.register(move |args| seen.set(args.get(0))).unwrap();
        (callbacks.get(id).unwrap())(&CommandArgs::new([9, 0, 0, 0, 0]));
        assert_eq!(hits.get(), 9);
        assert!(callbacks.get(CallbackId(200)).is_none());
    }
}
