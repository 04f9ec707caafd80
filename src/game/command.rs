//! Command Model
//!
//! Every player action is a [`Command`]: a kind, a flag set, and five
//! untyped argument slots interpreted by the kind's handler. Commands are
//! the only way gameplay state changes outside the tick update, which is
//! what lets peers stay in lockstep by exchanging them.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::money::{format_money, Money, MONEY_UNDEFINED};

// =============================================================================
// COMMAND KINDS
// =============================================================================

macro_rules! command_kinds {
    ($($(#[$doc:meta])* $variant:ident = $value:literal,)+) => {
        /// Every command a player (or the server) can issue.
        ///
        /// Discriminants are stable and travel on the wire.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(u32)]
        pub enum CommandKind {
            $($(#[$doc])* $variant = $value,)+
        }

        impl CommandKind {
            /// All kinds in discriminant order.
            pub const ALL: &'static [CommandKind] = &[$(CommandKind::$variant,)+];

            /// Decode a wire discriminant.
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(CommandKind::$variant),)+
                    _ => None,
                }
            }

            /// Variant name, for logs.
            pub fn name(self) -> &'static str {
                match self {
                    $(CommandKind::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

command_kinds! {
    /// Ride colour scheme
    SetRideAppearance = 0,
    /// Land height at a tile
    SetLandHeight = 1,
    /// Pause or unpause the simulation
    TogglePause = 2,
    /// Track piece placement
    PlaceTrack = 3,
    /// Track piece removal
    RemoveTrack = 4,
    /// Load a save or quit to menu
    LoadOrQuit = 5,
    /// New ride
    CreateRide = 6,
    /// Demolish or refurbish a ride
    DemolishRide = 7,
    /// Open, close or test a ride
    SetRideStatus = 8,
    /// Ride vehicle type and count
    SetRideVehicles = 9,
    /// Rename a ride
    SetRideName = 10,
    /// Ride operating setting
    SetRideSetting = 11,
    /// Ride entrance or exit placement
    PlaceRideEntranceOrExit = 12,
    /// Ride entrance or exit removal
    RemoveRideEntranceOrExit = 13,
    /// Small scenery removal
    RemoveScenery = 14,
    /// Small scenery placement
    PlaceScenery = 15,
    /// Water level at a tile
    SetWaterHeight = 16,
    /// Footpath placement
    PlacePath = 17,
    /// Footpath laid along a track drag
    PlacePathFromTrack = 18,
    /// Footpath removal
    RemovePath = 19,
    /// Terrain surface or edge style
    ChangeSurfaceStyle = 20,
    /// Ride or shop price
    SetRidePrice = 21,
    /// Rename a guest
    SetGuestName = 22,
    /// Rename a staff member
    SetStaffName = 23,
    /// Raise a land selection
    RaiseLand = 24,
    /// Lower a land selection
    LowerLand = 25,
    /// Smooth land editing
    EditLandSmooth = 26,
    /// Raise water over a selection
    RaiseWater = 27,
    /// Lower water over a selection
    LowerWater = 28,
    /// Brake piece speed
    SetBrakesSpeed = 29,
    /// Hire staff
    HireNewStaffMember = 30,
    /// Toggle a staff patrol tile
    SetStaffPatrol = 31,
    /// Fire staff
    FireStaffMember = 32,
    /// Staff duties
    SetStaffOrder = 33,
    /// Rename the park
    SetParkName = 34,
    /// Open or close the park
    SetParkOpen = 35,
    /// Buy land or construction rights
    BuyLandRights = 36,
    /// Park entrance placement
    PlaceParkEntrance = 37,
    /// Park entrance removal
    RemoveParkEntrance = 38,
    /// Maze wall edit
    SetMazeTrack = 39,
    /// Park admission price
    SetParkEntranceFee = 40,
    /// Staff uniform colour
    SetStaffColour = 41,
    /// Wall placement
    PlaceWall = 42,
    /// Wall removal
    RemoveWall = 43,
    /// Large scenery placement
    PlaceLargeScenery = 44,
    /// Large scenery removal
    RemoveLargeScenery = 45,
    /// Take or repay loan
    SetCurrentLoan = 46,
    /// Research funding and priorities
    SetResearchFunding = 47,
    /// Whole track design placement
    PlaceTrackDesign = 48,
    /// Marketing campaign
    StartMarketingCampaign = 49,
    /// Whole maze design placement
    PlaceMazeDesign = 50,
    /// Banner placement
    PlaceBanner = 51,
    /// Banner removal
    RemoveBanner = 52,
    /// Small scenery colour
    SetSceneryColour = 53,
    /// Wall colour
    SetWallColour = 54,
    /// Large scenery colour
    SetLargeSceneryColour = 55,
    /// Banner colour
    SetBannerColour = 56,
    /// Land ownership flags. Scenario editor only
    SetLandOwnership = 57,
    /// Clear scenery from an area
    ClearScenery = 58,
    /// Banner text
    SetBannerName = 59,
    /// Sign text
    SetSignName = 60,
    /// Banner style and text colour
    SetBannerStyle = 61,
    /// Sign style and text colour
    SetSignStyle = 62,
    /// Move a player to another permission group
    SetPlayerGroup = 63,
    /// Add, remove or edit permission groups
    ModifyGroups = 64,
    /// Disconnect a player
    KickPlayer = 65,
    /// Cheat toggles and actions
    Cheat = 66,
    /// Pick up or drop a guest
    PickupGuest = 67,
    /// Pick up or drop a staff member
    PickupStaff = 68,
    /// Pop a balloon
    BalloonPress = 69,
    /// Raw tile element edit
    ModifyTile = 70,
    /// Scenario objectives and options
    EditScenarioOptions = 71,
}

/// Entity class whose local ghost preview is cleared before an
/// authoritative placement of the same class lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GhostFamily {
    /// Walls
    Wall,
    /// Small scenery
    Scenery,
    /// Large scenery
    LargeScenery,
    /// Banners
    Banner,
    /// Footpaths
    Path,
}

impl CommandKind {
    /// Never replicated; always runs locally only.
    pub fn is_network_denied(self) -> bool {
        matches!(self, CommandKind::LoadOrQuit)
    }

    /// A client may not ask the server to run these.
    pub fn is_client_forbidden(self) -> bool {
        matches!(self, CommandKind::TogglePause | CommandKind::LoadOrQuit)
    }

    /// Ghost preview class cleared by a networked placement of this kind.
    pub fn ghost_family(self) -> Option<GhostFamily> {
        match self {
            CommandKind::PlaceWall => Some(GhostFamily::Wall),
            CommandKind::PlaceScenery => Some(GhostFamily::Scenery),
            CommandKind::PlaceLargeScenery => Some(GhostFamily::LargeScenery),
            CommandKind::PlaceBanner => Some(GhostFamily::Banner),
            CommandKind::PlacePath => Some(GhostFamily::Path),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// FLAGS
// =============================================================================

bitflags! {
    /// Execution flags carried by every command.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CommandFlags: u32 {
        /// Mutate state. Without it the handler only validates and prices.
        const APPLY = 1 << 0;
        /// Replaying a recorded command.
        const REPLAY = 1 << 1;
        /// Privileged caller; skips the affordability check.
        const BIT2 = 1 << 2;
        /// Permitted while the game is paused; suppresses the error window.
        const ALLOW_DURING_PAUSE = 1 << 3;
        /// Privileged caller; skips affordability, balance update and replication.
        const BIT5 = 1 << 5;
        /// Preview placement, never committed to the park.
        const GHOST = 1 << 6;
        /// Already replicated by the server.
        const NETWORKED = 1 << 31;
    }
}

impl CommandFlags {
    /// Flags that bypass the affordability check unless configured otherwise.
    pub const PRIVILEGED: CommandFlags = CommandFlags::BIT2.union(CommandFlags::BIT5);
}

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Five untyped argument slots, interpreted per kind by its handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandArgs(pub [i32; 5]);

impl CommandArgs {
    /// Number of slots.
    pub const LEN: usize = 5;

    /// Create from raw slots.
    pub const fn new(slots: [i32; 5]) -> Self {
        Self(slots)
    }

    /// Read slot `index` (0 if out of range).
    #[inline]
    pub fn get(&self, index: usize) -> i32 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Write slot `index`; out-of-range writes are ignored.
    #[inline]
    pub fn set(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    /// Raw slots.
    pub fn slots(&self) -> &[i32; 5] {
        &self.0
    }
}

/// A single player or server action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Selects the registered handler
    pub kind: CommandKind,
    /// Execution flags
    pub flags: CommandFlags,
    /// Handler arguments
    pub args: CommandArgs,
}

impl Command {
    /// Create a command.
    pub fn new(kind: CommandKind, flags: CommandFlags, args: [i32; 5]) -> Self {
        Self {
            kind,
            flags,
            args: CommandArgs(args),
        }
    }

    /// Create an applying command.
    pub fn apply(kind: CommandKind, args: [i32; 5]) -> Self {
        Self::new(kind, CommandFlags::APPLY, args)
    }

    /// Create a dry-run (price only) command.
    pub fn query(kind: CommandKind, args: [i32; 5]) -> Self {
        Self::new(kind, CommandFlags::empty(), args)
    }

    /// Builder: add flags.
    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags |= flags;
        self
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Default error window title.
pub const CANT_DO_THIS: &str = "Can't do this...";

/// Detail line of a command failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorBody {
    /// No detail
    None,
    /// Treasury could not cover the cost
    NotEnoughCash {
        /// Full cost of the command
        required: Money,
    },
    /// The player's group lacks the permission
    PermissionDenied,
    /// Action repeated faster than its cooldown
    RateLimited,
    /// Not allowed while paused
    NotWhilePaused,
    /// Handler-specific text
    Message(String),
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorBody::None => Ok(()),
            ErrorBody::NotEnoughCash { required } => {
                write!(f, "Not enough cash - requires {}", format_money(*required))
            }
            ErrorBody::PermissionDenied => f.write_str("Permission denied"),
            ErrorBody::RateLimited => f.write_str("You are doing that too fast"),
            ErrorBody::NotWhilePaused => f.write_str("Not allowed while paused"),
            ErrorBody::Message(text) => f.write_str(text),
        }
    }
}

/// Title and body shown when a command fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    /// Window title, e.g. "Can't build this here..."
    pub title: String,
    /// Detail line
    pub body: ErrorBody,
}

impl CommandError {
    /// Create an error.
    pub fn new(title: impl Into<String>, body: ErrorBody) -> Self {
        Self {
            title: title.into(),
            body,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body {
            ErrorBody::None => f.write_str(&self.title),
            ref body => write!(f, "{}: {}", self.title, body),
        }
    }
}

/// Outcome of one handler call or one dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    /// Cost, or [`MONEY_UNDEFINED`] on failure
    pub cost: Money,
    /// Present on failure
    pub error: Option<CommandError>,
}

impl CommandResult {
    /// Success with a cost (negative for refunds).
    pub fn ok(cost: Money) -> Self {
        Self { cost, error: None }
    }

    /// Failure with a title and body.
    pub fn failed(title: impl Into<String>, body: ErrorBody) -> Self {
        Self::from_error(CommandError::new(title, body))
    }

    /// Failure from an existing error.
    pub fn from_error(error: CommandError) -> Self {
        Self {
            cost: MONEY_UNDEFINED,
            error: Some(error),
        }
    }

    /// True if the command succeeded.
    pub fn is_ok(&self) -> bool {
        self.cost != MONEY_UNDEFINED
    }
}

// =============================================================================
// TESTS
// =============================================================================
