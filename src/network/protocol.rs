//! Protocol Messages
//!
//! Wire format for client-server communication. Messages travel as
//! bincode frames; JSON helpers exist for logs and debugging. Enums are
//! externally tagged because bincode cannot decode internally tagged ones.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::command::{Command, CommandArgs, CommandError, CommandFlags, CommandKind};
use crate::game::finance::Finances;
use crate::game::registry::CallbackId;
use crate::network::auth::AuthRequest;
use crate::network::session::{PlayerId, PlayerSession};

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Binary encoding or decoding failed.
    #[error("bincode: {0}")]
    Binary(#[from] bincode::Error),

    /// JSON encoding or decoding failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Command discriminant out of range.
    #[error("unknown command kind {0}")]
    UnknownCommandKind(u32),

    /// Flags carry bits no command understands.
    #[error("invalid command flags {0:#x}")]
    InvalidFlags(u32),
}

// =============================================================================
// SHARED PAYLOADS
// =============================================================================

/// One replicated command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPacket {
    /// Tick stamp (client: informational; server: the tick clients run it on)
    pub tick: u32,
    /// Originating player
    pub player: PlayerId,
    /// Raw command kind
    pub kind: u32,
    /// Raw flags
    pub flags: u32,
    /// Argument slots
    pub args: [i32; 5],
    /// Result callback of the originating peer
    pub callback: Option<CallbackId>,
}

impl CommandPacket {
    /// Wrap a command for the wire.
    pub fn new(tick: u32, player: PlayerId, command: &Command, callback: Option<CallbackId>) -> Self {
        Self {
            tick,
            player,
            kind: command.kind as u32,
            flags: (command.flags - CommandFlags::NETWORKED).bits(),
            args: *command.args.slots(),
            callback,
        }
    }

    /// Decode into a command tagged as arriving from the network.
    pub fn to_command(&self) -> Result<Command, ProtocolError> {
        let kind = CommandKind::from_u32(self.kind)
            .ok_or(ProtocolError::UnknownCommandKind(self.kind))?;
        let flags = CommandFlags::from_bits(self.flags)
            .ok_or(ProtocolError::InvalidFlags(self.flags))?;
        Ok(Command {
            kind,
            flags: flags | CommandFlags::NETWORKED,
            args: CommandArgs::new(self.args),
        })
    }
}

/// State a joining client loads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSnapshot {
    /// Server tick at the time of the snapshot
    pub tick: u32,
    /// RNG state at the start of that tick
    pub rng_state: [u32; 2],
    /// Treasury, no-money flag and ledger
    pub finances: Finances,
    /// Server pause state
    pub paused: bool,
    /// Opaque world payload
    pub payload: Vec<u8>,
}

/// Authoritative tick announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickPacket {
    /// Tick about to run on the server
    pub tick: u32,
    /// First RNG state word before the tick's update
    pub srand0: u32,
    /// Full state checksum on checksum ticks
    pub checksum: Option<String>,
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Assigned player on success.
    pub player: Option<PlayerId>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join request.
    Auth(AuthRequest),

    /// Top-level command issued by the client's player.
    GameCommand(CommandPacket),

    /// Reply to a server ping.
    Pong {
        /// Timestamp echoed from the ping
        timestamp: u64,
    },

    /// Player is leaving.
    Leave,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Full park state for a joining client.
    Map(MapSnapshot),

    /// Start-of-tick announcement.
    Tick(TickPacket),

    /// Server is paused with `tick` next to run; clients may run every
    /// earlier tick. Carries no checkpoint.
    Held {
        /// Server tick counter
        tick: u32,
    },

    /// Command to run on the stamped tick.
    GameCommand(CommandPacket),

    /// Everyone currently connected.
    PlayerList(Vec<PlayerSession>),

    /// Error to show the player.
    ShowError(CommandError),

    /// Latency probe.
    Ping {
        /// Server wall clock
        timestamp: u64,
    },

    /// Server is dropping this client.
    Disconnect {
        /// Why
        reason: String,
    },
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}
