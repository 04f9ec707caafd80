//! Network Layer
//!
//! Lockstep replication between one server and its clients.
//! This layer is **non-deterministic** (sockets, wall clock, peer order);
//! it only ever feeds the deterministic core through ordered commands.
//!
//! ## Module Structure
//!
//! - `transport`: Transport trait and in-process channel transports
//! - `server`: WebSocket listener and client connector
//! - `protocol`: Wire messages
//! - `auth`: Password and JWT authentication
//! - `session`: Players, groups, cooldowns
//! - `server_log`: Multiplayer audit log
//! - `sync`: Command queue, tick broadcast, desync detection

pub mod auth;
pub mod protocol;
pub mod server;
pub mod server_log;
pub mod session;
pub mod sync;
pub mod transport;

pub use auth::{authenticate, validate_token, Admission, AuthConfig, AuthError, AuthRequest, TokenClaims};
pub use protocol::{ClientMessage, CommandPacket, MapSnapshot, ProtocolError, ServerMessage, TickPacket};
pub use server::{connect, WebSocketError, WebSocketListener};
pub use server_log::ServerLog;
pub use session::{GroupId, PlayerGroup, PlayerId, PlayerList, PlayerSession, SessionError};
pub use sync::{NetworkConfig, NetworkSync, PendingCommandQueue, SyncError};
pub use transport::{
    channel_server, AuthStatus, ChannelClient, ChannelServer, Destination, NetworkMode, NetworkStatus,
    PeerAcceptor, PeerId, Transport, TransportError, TransportEvent,
};
