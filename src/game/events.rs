//! Engine Events
//!
//! Notifications raised for the presentation layer. The engine never opens
//! windows itself; it pushes events and the host drains them each frame.

use serde::{Deserialize, Serialize};

use crate::core::money::Money;
use crate::game::command::ErrorBody;
use crate::network::session::PlayerId;

/// What a load-or-quit command asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOrQuitAction {
    /// Ask whether to save first
    OpenSavePrompt {
        /// Prompt variant (load, quit to menu, quit game)
        mode: i32,
    },
    /// Dismiss the prompt
    CloseSavePrompt,
    /// Load or quit without asking
    Proceed,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// A locally issued command failed; show a modal
    ErrorWindow {
        /// Window title
        title: String,
        /// Detail line
        body: ErrorBody,
    },

    /// Floating money text for the acting player
    MoneyEffect {
        /// Committed cost (negative for income)
        amount: Money,
    },

    /// Local state diverged from the server; prompt to reconnect
    Desynchronised {
        /// Tick of the failed checkpoint
        tick: u32,
        /// Local RNG word
        local_srand0: u32,
        /// Server RNG word
        server_srand0: u32,
        /// Checksums were compared and differed
        checksum_mismatch: bool,
    },

    /// Connection to the server was lost or closed
    Disconnected {
        /// Human-readable reason
        reason: String,
    },

    /// A player joined the session
    PlayerJoined {
        /// New player
        player_id: PlayerId,
        /// Display name
        name: String,
    },

    /// A player left the session
    PlayerLeft {
        /// Departed player
        player_id: PlayerId,
    },

    /// Pause state changed
    PauseToggled {
        /// New state
        paused: bool,
    },

    /// Load-or-quit flow requested
    LoadOrQuitRequested {
        /// Requested step
        action: LoadOrQuitAction,
    },

    /// Autosave is due; `on_before_save` has already run
    AutosaveRequested,

    /// A scenario or server map finished loading
    LoadCompleted {
        /// Tick the simulation resumes from
        tick: u32,
    },
}

/// An event stamped with the tick it was raised on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when the event occurred
    pub tick: u32,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u32, data: GameEventData) -> Self {
        Self { tick, data }
    }

    /// True for events that want a modal window.
    pub fn is_modal(&self) -> bool {
        matches!(
            self.data,
            GameEventData::ErrorWindow { .. } | GameEventData::Desynchronised { .. }
        )
    }
}
