//! Command Execution and Simulation Loop
//!
//! Everything that touches synchronised state runs on the simulation thread
//! and is deterministic given the same seed and command stream.
//!
//! ## Module Structure
//!
//! - `command`: Command kinds, flags, arguments, results
//! - `registry`: Two-phase handler trait, handler table, result callbacks
//! - `finance`: Treasury, ledger and the affordability gate
//! - `state`: Simulation context and the world interface
//! - `dispatch`: Validate / afford / replicate / apply protocol
//! - `tick`: Fixed-step scheduler and autosave timer
//! - `events`: Notifications for the presentation layer

pub mod command;
pub mod dispatch;
pub mod events;
pub mod finance;
pub mod registry;
pub mod state;
pub mod tick;

// Re-export key types
pub use command::{Command, CommandArgs, CommandError, CommandFlags, CommandKind, CommandResult, ErrorBody};
pub use dispatch::{execute, DispatchError};
pub use events::{GameEvent, GameEventData};
pub use finance::{ExpenditureType, FinanceGate, Finances, InsufficientFunds};
pub use registry::{AuditLoggable, CallbackId, CommandHandler, CommandRegistry, FnHandler};
pub use state::{NestState, PersistenceHooks, ScreenMode, SimulationContext, World};
pub use tick::{run_frame, tick, AutosaveFrequency, FrameReport, SchedulerConfig};
