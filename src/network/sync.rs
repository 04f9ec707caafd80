//! Lockstep Synchronisation
//!
//! [`NetworkSync`] owns the transport, the player list and the queue of
//! commands received from the network. The free functions in this module
//! are called by the scheduler at fixed points of every tick:
//!
//! ```text
//! update ─► send_tick (server) / check_desynchronisation (client)
//!        ─► World::update ─► process_command_queue ─► flush
//! ```
//!
//! The server executes remote commands in receipt order and re-broadcasts
//! them stamped with the tick they ran on. Clients run a stamped command
//! at the end of exactly that tick, so every peer applies the same stream
//! in the same place.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::game::command::{Command, CommandError, CommandKind, ErrorBody, CANT_DO_THIS};
use crate::game::events::GameEventData;
use crate::game::registry::CallbackId;
use crate::game::state::{SimulationContext, World};
use crate::network::auth::{authenticate, Admission, AuthConfig, AuthRequest};
use crate::network::protocol::{
    AuthResult, ClientMessage, CommandPacket, MapSnapshot, ProtocolError, ServerMessage, TickPacket,
};
use crate::network::server_log::ServerLog;
use crate::network::session::{Cooldowns, GroupId, PlayerId, PlayerList, PlayerSession, SessionError};
use crate::network::transport::{
    AuthStatus, Destination, NetworkMode, NetworkStatus, PeerId, Transport, TransportError, TransportEvent,
};
use crate::{TICK_CHECKSUM_INTERVAL, VERSION};

/// Tick checkpoints a client keeps before the oldest are dropped.
pub const MAX_CHECKPOINTS: usize = 256;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Multiplayer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local player's display name
    pub player_name: String,
    /// Write the multiplayer audit log
    pub log_server_actions: bool,
    /// Append audit lines to this file
    pub server_log_path: Option<PathBuf>,
    /// Keep the connection after a desync
    pub stay_connected: bool,
    /// Ticks between full-state checksums in tick broadcasts (0 disables)
    pub tick_checksum_interval: u32,
    /// Wall-clock interval between pings
    pub ping_interval_ms: u64,
    /// Player slots, host included
    pub max_players: usize,
    /// Minimum gap between scenery placements per player
    pub place_scenery_cooldown_ms: u64,
    /// Minimum gap between ride demolitions per player
    pub demolish_ride_cooldown_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            player_name: "Player".into(),
            log_server_actions: false,
            server_log_path: None,
            stay_connected: false,
            tick_checksum_interval: TICK_CHECKSUM_INTERVAL,
            ping_interval_ms: 3000,
            max_players: 16,
            place_scenery_cooldown_ms: 20,
            demolish_ride_cooldown_ms: 1000,
        }
    }
}

impl NetworkConfig {
    fn cooldowns(&self) -> Cooldowns {
        Cooldowns {
            place_scenery_ms: self.place_scenery_cooldown_ms,
            demolish_ride_ms: self.demolish_ride_cooldown_ms,
        }
    }
}

/// Synchronisation errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local state diverged from the server's checkpoint.
    #[error("desynchronised at tick {tick}")]
    Desynchronized {
        /// Tick of the failed checkpoint
        tick: u32,
    },

    /// A packet could not be decoded.
    #[error("malformed remote command: {0}")]
    MalformedRemoteCommand(#[from] ProtocolError),

    /// Clients may not replicate this kind.
    #[error("{0} may not be sent over the network")]
    NetworkDisallowedCommand(CommandKind),

    /// Command from a peer that never authenticated.
    #[error("{0} is not authenticated")]
    Unauthenticated(PeerId),

    /// Player's group lacks the permission.
    #[error("permission denied for {0}")]
    PermissionDenied(CommandKind),

    /// Command repeated inside its cooldown.
    #[error("{0} rate limited")]
    RateLimited(CommandKind),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// COMMAND QUEUE
// =============================================================================

/// A command received from the network, waiting for its tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Tick stamp
    pub tick: u32,
    /// Receipt order
    pub seq: u64,
    /// Originating player
    pub player: PlayerId,
    /// Command, tagged NETWORKED
    pub command: Command,
    /// Originating peer's callback
    pub callback: Option<CallbackId>,
}

/// Remote commands ordered by `(tick, receipt order)`.
#[derive(Clone, Debug, Default)]
pub struct PendingCommandQueue {
    entries: BTreeMap<(u32, u64), QueuedCommand>,
    next_seq: u64,
}

impl PendingCommandQueue {
    /// Queue a command.
    pub fn push(&mut self, tick: u32, player: PlayerId, command: Command, callback: Option<CallbackId>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            (tick, seq),
            QueuedCommand {
                tick,
                seq,
                player,
                command,
                callback,
            },
        );
    }

    /// Stamp of the next command.
    pub fn peek_tick(&self) -> Option<u32> {
        self.entries.keys().next().map(|(tick, _)| *tick)
    }

    /// Take the next command.
    pub fn pop_front(&mut self) -> Option<QueuedCommand> {
        self.entries.pop_first().map(|(_, queued)| queued)
    }

    /// Number of queued commands.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Server state announced at the start of a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickCheckpoint {
    /// Tick
    pub tick: u32,
    /// Server RNG word before the update
    pub srand0: u32,
    /// Server checksum, on checksum ticks
    pub checksum: Option<String>,
}

// =============================================================================
// NETWORK SYNC
// =============================================================================

/// Replication state of this process.
pub struct NetworkSync {
    config: NetworkConfig,
    mode: NetworkMode,
    transport: Option<Box<dyn Transport>>,
    auth: AuthConfig,
    auth_status: AuthStatus,

    /// Everyone in the session (mirrored from the server on clients)
    pub players: PlayerList,
    local_player: PlayerId,

    server_tick: u32,
    queue: PendingCommandQueue,
    checkpoints: VecDeque<TickCheckpoint>,
    desynchronised: bool,

    server_log: ServerLog,
    peers: BTreeMap<PeerId, Option<PlayerId>>,
    last_ping_ms: u64,
}

impl NetworkSync {
    /// Single-player link.
    pub fn offline(config: NetworkConfig) -> Self {
        let mut players = PlayerList::new(config.max_players);
        players.insert(PlayerSession::new(PlayerId::HOST, config.player_name.clone(), GroupId::ADMIN));
        let server_log = ServerLog::new(config.server_log_path.clone());
        Self {
            config,
            mode: NetworkMode::None,
            transport: None,
            auth: AuthConfig::default(),
            auth_status: AuthStatus::None,
            players,
            local_player: PlayerId::HOST,
            server_tick: 0,
            queue: PendingCommandQueue::default(),
            checkpoints: VecDeque::new(),
            desynchronised: false,
            server_log,
            peers: BTreeMap::new(),
            last_ping_ms: 0,
        }
    }

    /// Host a session over `transport`.
    pub fn server(config: NetworkConfig, transport: Box<dyn Transport>, auth: AuthConfig) -> Self {
        let mut sync = Self::offline(config);
        sync.mode = NetworkMode::Server;
        sync.transport = Some(transport);
        sync.auth = auth;
        info!(player = %sync.config.player_name, "hosting session");
        sync
    }

    /// Join a session over `transport`. The join request goes out at once.
    pub fn client(config: NetworkConfig, transport: Box<dyn Transport>, mut request: AuthRequest) -> Self {
        let mut sync = Self::offline(config);
        sync.players = PlayerList::new(sync.config.max_players);
        sync.mode = NetworkMode::Client;
        sync.transport = Some(transport);
        if request.name.is_empty() {
            request.name = sync.config.player_name.clone();
        }
        sync.send_to_server(&ClientMessage::Auth(request));
        sync.auth_status = AuthStatus::Requested;
        sync
    }

    // ===== STATE =====

    /// Role of this process.
    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    /// Link state.
    pub fn status(&self) -> NetworkStatus {
        self.transport
            .as_ref()
            .map_or(NetworkStatus::None, |transport| transport.status())
    }

    /// Client authentication state.
    pub fn auth_status(&self) -> AuthStatus {
        self.auth_status
    }

    /// Settings.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Audit log.
    pub fn server_log(&self) -> &ServerLog {
        &self.server_log
    }

    /// Audit log, for appending.
    pub fn server_log_mut(&mut self) -> &mut ServerLog {
        &mut self.server_log
    }

    /// This process's player.
    pub fn local_player_id(&self) -> PlayerId {
        self.local_player
    }

    /// Last tick announced by the server (the server's own tick on a host).
    pub fn server_tick(&self) -> u32 {
        self.server_tick
    }

    /// Client with an accepted join.
    pub fn is_connected_client(&self) -> bool {
        self.mode == NetworkMode::Client
            && self.status() == NetworkStatus::Connected
            && self.auth_status == AuthStatus::Ok
    }

    /// A checkpoint mismatch was detected.
    pub fn is_desynchronised(&self) -> bool {
        self.desynchronised
    }

    /// Commands waiting to run.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    // ===== OUTBOUND =====

    /// Client: send a top-level command to the server.
    pub fn send_command(&mut self, stamp: u32, command: &Command, callback: Option<CallbackId>) {
        let packet = CommandPacket::new(stamp, self.local_player, command, callback);
        self.send_to_server(&ClientMessage::GameCommand(packet));
    }

    /// Server: send a command to every player, stamped with its tick.
    pub fn broadcast_command(
        &mut self,
        stamp: u32,
        player: PlayerId,
        command: &Command,
        callback: Option<CallbackId>,
    ) {
        let packet = CommandPacket::new(stamp, player, command, callback);
        self.send_to_players(&ServerMessage::GameCommand(packet));
    }

    /// Push queued frames out.
    pub fn flush(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(err) = transport.flush() {
                debug!(%err, "flush failed");
            }
        }
    }

    /// Forget queued commands and checkpoints from before a load.
    pub fn reset_for_load(&mut self, tick: u32) {
        self.queue.clear();
        self.checkpoints.clear();
        self.server_tick = tick;
        self.desynchronised = false;
    }

    /// Close the link and continue offline.
    pub fn disconnect(&mut self) {
        if self.mode == NetworkMode::Server {
            self.send_to_players(&ServerMessage::Disconnect {
                reason: "Server shutting down".into(),
            });
        } else if self.mode == NetworkMode::Client {
            self.send_to_server(&ClientMessage::Leave);
        }
        self.go_offline();
    }

    fn go_offline(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.mode = NetworkMode::None;
        self.auth_status = AuthStatus::None;
        self.queue.clear();
        self.checkpoints.clear();
        self.peers.clear();
    }

    fn send_to_server(&mut self, message: &ClientMessage) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match message.to_bytes() {
            Ok(frame) => {
                if let Err(err) = transport.send(Destination::Server, frame) {
                    debug!(%err, "send to server failed");
                }
            }
            Err(err) => warn!(%err, "failed to encode client message"),
        }
    }

    fn send_to_peer(&mut self, peer: PeerId, message: &ServerMessage) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match message.to_bytes() {
            Ok(frame) => {
                if let Err(err) = transport.send(Destination::Peer(peer), frame) {
                    debug!(%peer, %err, "send failed");
                }
            }
            Err(err) => warn!(%err, "failed to encode server message"),
        }
    }

    /// Send to every authenticated peer.
    fn send_to_players(&mut self, message: &ServerMessage) {
        let targets: Vec<PeerId> = self
            .peers
            .iter()
            .filter_map(|(peer, player)| player.map(|_| *peer))
            .collect();
        for peer in targets {
            self.send_to_peer(peer, message);
        }
    }

    fn broadcast_player_list(&mut self) {
        let list: Vec<PlayerSession> = self.players.iter().cloned().collect();
        self.send_to_players(&ServerMessage::PlayerList(list));
    }

    fn peer_of(&self, player: PlayerId) -> Option<PeerId> {
        self.peers
            .iter()
            .find(|(_, p)| **p == Some(player))
            .map(|(peer, _)| *peer)
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let Some(transport) = self.transport.as_mut() else {
            return Vec::new();
        };
        std::iter::from_fn(|| transport.poll_recv()).collect()
    }

    fn audit(&mut self, line: &str) {
        if self.config.log_server_actions {
            self.server_log.append(line);
        }
    }
}

// =============================================================================
// PER-TICK ENTRY POINTS
// =============================================================================

/// Receive everything the transport has and react to it.
pub fn update<W: World>(ctx: &mut SimulationContext<W>) {
    match ctx.network.mode() {
        NetworkMode::None => {}
        NetworkMode::Server => {
            for event in ctx.network.poll_events() {
                handle_server_event(ctx, event);
            }
            maybe_ping(ctx);
        }
        NetworkMode::Client => {
            for event in ctx.network.poll_events() {
                handle_client_event(ctx, event);
                if ctx.network.mode() != NetworkMode::Client {
                    break;
                }
            }
        }
    }
}

/// Run queued remote commands that are due.
pub fn process_command_queue<W: World>(ctx: &mut SimulationContext<W>) {
    match ctx.network.mode() {
        NetworkMode::None => {}
        NetworkMode::Server => {
            while let Some(queued) = ctx.network.queue.pop_front() {
                run_server_command(ctx, queued);
            }
        }
        NetworkMode::Client => {
            let tick = ctx.tick();
            while let Some(stamp) = ctx.network.queue.peek_tick() {
                if stamp > tick {
                    break;
                }
                let Some(queued) = ctx.network.queue.pop_front() else {
                    break;
                };
                if stamp < tick {
                    warn!(stamp, tick, kind = %queued.command.kind, "stale command discarded");
                    continue;
                }
                run_client_command(ctx, queued);
                // Outside a tick only pause-time commands run; once the
                // pause lifts the rest wait for this tick's world update.
                if !ctx.in_tick() && !ctx.is_paused() {
                    break;
                }
            }
        }
    }
}

/// Server: announce the tick about to run.
pub fn send_tick<W: World>(ctx: &mut SimulationContext<W>) {
    let tick = ctx.tick();
    let interval = ctx.network.config.tick_checksum_interval;
    let checksum = (interval > 0 && tick % interval == 0).then(|| ctx.checksum());
    let packet = TickPacket {
        tick,
        srand0: ctx.rng.s0(),
        checksum,
    };
    ctx.network.server_tick = tick;
    ctx.network.send_to_players(&ServerMessage::Tick(packet));
}

/// Server: while paused, tell clients they may run every tick before the
/// current one so pause-time commands reach them.
pub fn send_hold<W: World>(ctx: &mut SimulationContext<W>) {
    if ctx.network.mode() != NetworkMode::Server {
        return;
    }
    let tick = ctx.tick();
    ctx.network.server_tick = tick;
    ctx.network.send_to_players(&ServerMessage::Held { tick });
}

/// Client: compare local state with the server checkpoint for this tick.
pub fn check_desynchronisation<W: World>(ctx: &mut SimulationContext<W>) -> Result<(), SyncError> {
    if ctx.network.mode() != NetworkMode::Client || ctx.network.desynchronised {
        return Ok(());
    }
    let tick = ctx.tick();
    while ctx.network.checkpoints.front().is_some_and(|cp| cp.tick < tick) {
        ctx.network.checkpoints.pop_front();
    }
    if ctx.network.checkpoints.front().map(|cp| cp.tick) != Some(tick) {
        return Ok(());
    }
    let Some(checkpoint) = ctx.network.checkpoints.pop_front() else {
        return Ok(());
    };

    let local_srand0 = ctx.rng.s0();
    let checksum_mismatch = checkpoint
        .checksum
        .as_ref()
        .is_some_and(|expected| *expected != ctx.checksum());
    if local_srand0 == checkpoint.srand0 && !checksum_mismatch {
        return Ok(());
    }

    ctx.network.desynchronised = true;
    error!(
        tick,
        local_srand0,
        server_srand0 = checkpoint.srand0,
        checksum_mismatch,
        "desynchronised from server"
    );
    ctx.push_event(GameEventData::Desynchronised {
        tick,
        local_srand0,
        server_srand0: checkpoint.srand0,
        checksum_mismatch,
    });
    if !ctx.network.config.stay_connected {
        ctx.network.disconnect();
        info!("left the session after desync");
    }
    Err(SyncError::Desynchronized { tick })
}

// =============================================================================
// SERVER RECEIVE PATH
// =============================================================================

fn handle_server_event<W: World>(ctx: &mut SimulationContext<W>, event: TransportEvent) {
    match event {
        TransportEvent::Connected(peer) => {
            debug!(%peer, "peer connected");
            ctx.network.peers.insert(peer, None);
        }
        TransportEvent::Disconnected(peer) => remove_peer(ctx, peer, "connection lost"),
        TransportEvent::Message(peer, frame) => match ClientMessage::from_bytes(&frame) {
            Ok(message) => handle_client_message(ctx, peer, message),
            Err(err) => warn!(%peer, %err, "malformed client frame dropped"),
        },
    }
}

fn handle_client_message<W: World>(ctx: &mut SimulationContext<W>, peer: PeerId, message: ClientMessage) {
    match message {
        ClientMessage::Auth(request) => accept_player(ctx, peer, request),
        ClientMessage::GameCommand(packet) => {
            if let Err(err) = admit_command(ctx, peer, &packet) {
                reject_command(ctx, peer, err);
            }
        }
        ClientMessage::Pong { timestamp } => {
            let now = ctx.clock_ms();
            if let Some(player) = ctx.network.peers.get(&peer).copied().flatten() {
                if let Some(session) = ctx.network.players.get_mut(player) {
                    session.ping_ms = u32::try_from(now.saturating_sub(timestamp)).unwrap_or(u32::MAX);
                }
            }
        }
        ClientMessage::Leave => {
            if let Some(transport) = ctx.network.transport.as_mut() {
                transport.disconnect(peer);
            }
            remove_peer(ctx, peer, "left the game");
        }
    }
}

fn register_player(players: &mut PlayerList, admission: &Admission) -> Result<PlayerId, SessionError> {
    let player = players.add_player(&admission.name)?;
    if admission.admin {
        players.set_group(player, GroupId::ADMIN)?;
    }
    Ok(player)
}

fn accept_player<W: World>(ctx: &mut SimulationContext<W>, peer: PeerId, request: AuthRequest) {
    if ctx.network.peers.get(&peer) != Some(&None) {
        warn!(%peer, "duplicate or unexpected join request dropped");
        return;
    }

    let admitted = authenticate(&request, &ctx.network.auth)
        .map_err(|err| err.to_string())
        .and_then(|admission| register_player(&mut ctx.network.players, &admission).map_err(|err| err.to_string()));
    let player = match admitted {
        Ok(player) => player,
        Err(reason) => {
            warn!(%peer, %reason, "join rejected");
            let result = AuthResult {
                player: None,
                error: Some(reason),
                server_version: VERSION.to_string(),
            };
            ctx.network.send_to_peer(peer, &ServerMessage::AuthResult(result));
            ctx.network.peers.remove(&peer);
            if let Some(transport) = ctx.network.transport.as_mut() {
                transport.disconnect(peer);
            }
            return;
        }
    };

    ctx.network.peers.insert(peer, Some(player));
    let result = AuthResult {
        player: Some(player),
        error: None,
        server_version: VERSION.to_string(),
    };
    ctx.network.send_to_peer(peer, &ServerMessage::AuthResult(result));

    let map = MapSnapshot {
        tick: ctx.tick(),
        rng_state: ctx.rng.state(),
        finances: ctx.finances.clone(),
        paused: ctx.is_paused(),
        payload: ctx.world.snapshot(),
    };
    ctx.network.send_to_peer(peer, &ServerMessage::Map(map));
    ctx.network.broadcast_player_list();

    let name = ctx
        .network
        .players
        .get(player)
        .map(|session| session.name.clone())
        .unwrap_or_default();
    info!(%peer, %player, %name, tick = ctx.tick(), "player joined");
    ctx.network.audit(&format!("{name} has joined the game"));
    ctx.push_event(GameEventData::PlayerJoined { player_id: player, name });
}

fn remove_peer<W: World>(ctx: &mut SimulationContext<W>, peer: PeerId, reason: &str) {
    let Some(entry) = ctx.network.peers.remove(&peer) else {
        return;
    };
    let Some(player) = entry else {
        debug!(%peer, "unauthenticated peer went away");
        return;
    };
    let name = ctx
        .network
        .players
        .remove(player)
        .map(|session| session.name)
        .unwrap_or_default();
    ctx.network.broadcast_player_list();
    info!(%peer, %player, %name, reason, "player left");
    ctx.network.audit(&format!("{name} has left the game ({reason})"));
    ctx.push_event(GameEventData::PlayerLeft { player_id: player });
}

/// Queue a remote command after the protocol, permission and cooldown checks.
fn admit_command<W: World>(
    ctx: &mut SimulationContext<W>,
    peer: PeerId,
    packet: &CommandPacket,
) -> Result<(), SyncError> {
    let player = ctx
        .network
        .peers
        .get(&peer)
        .copied()
        .flatten()
        .ok_or(SyncError::Unauthenticated(peer))?;
    let command = packet.to_command()?;
    let kind = command.kind;
    if kind.is_client_forbidden() {
        return Err(SyncError::NetworkDisallowedCommand(kind));
    }

    let cooldowns = ctx.network.config.cooldowns();
    ctx.network
        .players
        .check_command(player, kind, ctx.clock_ms(), cooldowns)
        .map_err(|err| match err {
            SessionError::RateLimited => SyncError::RateLimited(kind),
            _ => SyncError::PermissionDenied(kind),
        })?;

    let tick = ctx.tick();
    ctx.network.queue.push(tick, player, command, packet.callback);
    Ok(())
}

fn reject_command<W: World>(ctx: &mut SimulationContext<W>, peer: PeerId, err: SyncError) {
    let body = match err {
        SyncError::PermissionDenied(_) => ErrorBody::PermissionDenied,
        SyncError::RateLimited(_) => ErrorBody::RateLimited,
        _ => {
            warn!(%peer, %err, "protocol violation; command dropped");
            return;
        }
    };
    debug!(%peer, %err, "command refused");
    let error = CommandError::new(CANT_DO_THIS, body);
    ctx.network.send_to_peer(peer, &ServerMessage::ShowError(error));
}

fn run_server_command<W: World>(ctx: &mut SimulationContext<W>, queued: QueuedCommand) {
    let mut command = queued.command;
    ctx.set_command_player(Some(queued.player));
    let result = ctx.execute(&mut command);
    ctx.set_command_player(None);

    if result.is_ok() {
        let now = ctx.clock_ms();
        ctx.network
            .players
            .record_action(queued.player, queued.command.kind, result.cost, now);
        let stamp = ctx.replication_stamp();
        ctx.network
            .broadcast_command(stamp, queued.player, &queued.command, queued.callback);
    } else if let Some(error) = result.error {
        debug!(player = %queued.player, kind = %queued.command.kind, %error, "remote command failed");
        if let Some(peer) = ctx.network.peer_of(queued.player) {
            ctx.network.send_to_peer(peer, &ServerMessage::ShowError(error));
        }
    }
}

fn maybe_ping<W: World>(ctx: &mut SimulationContext<W>) {
    let now = ctx.clock_ms();
    let interval = ctx.network.config.ping_interval_ms;
    if interval == 0 || now.saturating_sub(ctx.network.last_ping_ms) < interval {
        return;
    }
    ctx.network.last_ping_ms = now;
    ctx.network.send_to_players(&ServerMessage::Ping { timestamp: now });
}

// =============================================================================
// CLIENT RECEIVE PATH
// =============================================================================

fn handle_client_event<W: World>(ctx: &mut SimulationContext<W>, event: TransportEvent) {
    match event {
        TransportEvent::Connected(_) => {}
        TransportEvent::Disconnected(_) => connection_lost(ctx, "Connection to the server was lost".into()),
        TransportEvent::Message(_, frame) => match ServerMessage::from_bytes(&frame) {
            Ok(message) => handle_server_message(ctx, message),
            Err(err) => warn!(%err, "malformed server frame dropped"),
        },
    }
}

fn handle_server_message<W: World>(ctx: &mut SimulationContext<W>, message: ServerMessage) {
    match message {
        ServerMessage::AuthResult(result) => match result.player {
            Some(player) => {
                ctx.network.local_player = player;
                ctx.network.auth_status = AuthStatus::Ok;
                info!(%player, server_version = %result.server_version, "joined server");
            }
            None => {
                ctx.network.auth_status = AuthStatus::Rejected;
                let reason = result.error.unwrap_or_else(|| "Join refused".into());
                connection_lost(ctx, reason);
            }
        },
        ServerMessage::Map(map) => {
            if let Err(err) = ctx.world.restore(&map.payload) {
                error!(%err, "server map could not be loaded");
                ctx.network.disconnect();
                ctx.push_event(GameEventData::Disconnected {
                    reason: format!("Failed to load server map: {err}"),
                });
                return;
            }
            ctx.complete_load(map.tick, map.rng_state, map.finances, map.paused);
            info!(tick = map.tick, "server map loaded");
        }
        ServerMessage::Tick(packet) => {
            ctx.network.server_tick = packet.tick;
            ctx.network.checkpoints.push_back(TickCheckpoint {
                tick: packet.tick,
                srand0: packet.srand0,
                checksum: packet.checksum,
            });
            while ctx.network.checkpoints.len() > MAX_CHECKPOINTS {
                ctx.network.checkpoints.pop_front();
            }
        }
        ServerMessage::Held { tick } => {
            ctx.network.server_tick = ctx.network.server_tick.max(tick);
        }
        ServerMessage::GameCommand(packet) => match packet.to_command() {
            Ok(command) => ctx
                .network
                .queue
                .push(packet.tick, packet.player, command, packet.callback),
            Err(err) => warn!(%err, "malformed command from server dropped"),
        },
        ServerMessage::PlayerList(players) => ctx.network.players.replace_players(players),
        ServerMessage::ShowError(error) => ctx.push_event(GameEventData::ErrorWindow {
            title: error.title,
            body: error.body,
        }),
        ServerMessage::Ping { timestamp } => {
            ctx.network.send_to_server(&ClientMessage::Pong { timestamp });
        }
        ServerMessage::Disconnect { reason } => connection_lost(ctx, reason),
    }
}

fn run_client_command<W: World>(ctx: &mut SimulationContext<W>, queued: QueuedCommand) {
    let armed = ctx.pending_callback();
    let own = queued.player == ctx.network.local_player_id();
    ctx.set_result_callback(if own { queued.callback } else { None });
    ctx.set_command_player(Some(queued.player));

    let mut command = queued.command;
    let result = ctx.execute(&mut command);

    ctx.set_command_player(None);
    ctx.set_result_callback(armed);
    if !result.is_ok() {
        warn!(kind = %queued.command.kind, player = %queued.player, "replicated command failed locally");
    }
}

fn connection_lost<W: World>(ctx: &mut SimulationContext<W>, reason: String) {
    warn!(%reason, "disconnected; continuing offline");
    ctx.network.go_offline();
    ctx.push_event(GameEventData::Disconnected { reason });
}

// =============================================================================
// TESTS
// =============================================================================
