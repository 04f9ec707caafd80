//! Transports
//!
//! The simulation thread never blocks on I/O. A transport hands it raw
//! frames through unbounded tokio channels that it polls with `try_recv`;
//! anything that talks to sockets runs on tokio tasks on the other side of
//! those channels (see `network::server`). The same channel pair doubles
//! as an in-process loopback for tests and the demo binary.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Role of this process in a multiplayer session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkMode {
    /// Single player
    #[default]
    None,
    /// Authoritative host
    Server,
    /// Connected to a host
    Client,
}

/// Connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// No transport
    #[default]
    None,
    /// Server listening
    Ready,
    /// Client waiting for the server
    Connecting,
    /// Link up
    Connected,
    /// Link gone
    Closed,
}

/// Client authentication state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStatus {
    /// Not attempted
    #[default]
    None,
    /// Request sent
    Requested,
    /// Accepted
    Ok,
    /// Refused
    Rejected,
}

/// Transport-level connection id. On a client the server is always peer 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The server, as seen from a client.
    pub const SERVER: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Where a frame goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    /// The server (clients only)
    Server,
    /// One connected peer (server only)
    Peer(PeerId),
    /// Every connected peer (server only)
    AllPeers,
}

/// Something the simulation thread must react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer connected
    Connected(PeerId),
    /// A frame arrived
    Message(PeerId, Vec<u8>),
    /// A peer (or, on a client, the server) went away
    Disconnected(PeerId),
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The link is closed.
    #[error("connection closed")]
    Closed,

    /// No such peer.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Destination not valid for this side of the link.
    #[error("cannot send to {0:?} from this transport")]
    InvalidDestination(Destination),

    /// Socket failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Byte-frame link between the simulation and the outside world.
pub trait Transport {
    /// Which side of the link this is.
    fn mode(&self) -> NetworkMode;

    /// Link state.
    fn status(&self) -> NetworkStatus;

    /// Queue a frame.
    fn send(&mut self, to: Destination, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next pending event, without blocking.
    fn poll_recv(&mut self) -> Option<TransportEvent>;

    /// Push queued frames out. Channel transports deliver on `send`.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Drop one peer (server only).
    fn disconnect(&mut self, _peer: PeerId) {}

    /// Close the link.
    fn close(&mut self);
}

// =============================================================================
// CHANNEL LINKS
// =============================================================================

/// Server half of one connection.
#[derive(Debug)]
pub struct PeerLink {
    /// Frames to the peer
    pub outbound: UnboundedSender<Vec<u8>>,
    /// Frames from the peer
    pub inbound: UnboundedReceiver<Vec<u8>>,
}

/// Client half of one connection.
#[derive(Debug)]
pub struct ClientLink {
    /// Frames to the server
    pub outbound: UnboundedSender<Vec<u8>>,
    /// Frames from the server
    pub inbound: UnboundedReceiver<Vec<u8>>,
}

/// Two connected halves.
pub fn link_pair() -> (PeerLink, ClientLink) {
    let (to_client, from_server) = unbounded_channel();
    let (to_server, from_client) = unbounded_channel();
    (
        PeerLink {
            outbound: to_client,
            inbound: from_client,
        },
        ClientLink {
            outbound: to_server,
            inbound: from_server,
        },
    )
}

/// Hands new connections to a [`ChannelServer`]. Cloneable; accept loops
/// on tokio tasks hold one each.
#[derive(Clone, Debug)]
pub struct PeerAcceptor {
    accept: UnboundedSender<PeerLink>,
}

impl PeerAcceptor {
    /// Offer a connection to the server.
    pub fn offer(&self, link: PeerLink) -> Result<(), TransportError> {
        self.accept.send(link).map_err(|_| TransportError::Closed)
    }

    /// Open an in-process connection.
    pub fn connect_loopback(&self) -> Result<ChannelClient, TransportError> {
        let (peer, client) = link_pair();
        self.offer(peer)?;
        Ok(ChannelClient::new(client))
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Server transport over channel links.
#[derive(Debug)]
pub struct ChannelServer {
    accept: UnboundedReceiver<PeerLink>,
    peers: BTreeMap<PeerId, PeerLink>,
    pending: VecDeque<TransportEvent>,
    next_peer: u32,
    status: NetworkStatus,
}

/// A server transport plus the acceptor that feeds it.
pub fn channel_server() -> (ChannelServer, PeerAcceptor) {
    let (accept_tx, accept_rx) = unbounded_channel();
    let server = ChannelServer {
        accept: accept_rx,
        peers: BTreeMap::new(),
        pending: VecDeque::new(),
        next_peer: 1,
        status: NetworkStatus::Ready,
    };
    (server, PeerAcceptor { accept: accept_tx })
}

impl ChannelServer {
    /// Connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn send_to(&mut self, peer: PeerId, frame: Vec<u8>) -> Result<(), TransportError> {
        let link = self.peers.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
        if link.outbound.send(frame).is_err() {
            self.drop_peer(peer);
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn drop_peer(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_some() {
            debug!(%peer, "peer link dropped");
            self.pending.push_back(TransportEvent::Disconnected(peer));
        }
    }
}

impl Transport for ChannelServer {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Server
    }

    fn status(&self) -> NetworkStatus {
        self.status
    }

    fn send(&mut self, to: Destination, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.status == NetworkStatus::Closed {
            return Err(TransportError::Closed);
        }
        match to {
            Destination::Peer(peer) => self.send_to(peer, frame),
            Destination::AllPeers => {
                let peers: Vec<PeerId> = self.peers.keys().copied().collect();
                for peer in peers {
                    // A dead peer surfaces as a Disconnected event.
                    let _ = self.send_to(peer, frame.clone());
                }
                Ok(())
            }
            Destination::Server => Err(TransportError::InvalidDestination(to)),
        }
    }

    fn poll_recv(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }

        while let Ok(link) = self.accept.try_recv() {
            let peer = PeerId(self.next_peer);
            self.next_peer = self.next_peer.wrapping_add(1).max(1);
            self.peers.insert(peer, link);
            self.pending.push_back(TransportEvent::Connected(peer));
        }
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }

        let mut closed = None;
        for (peer, link) in self.peers.iter_mut() {
            match link.inbound.try_recv() {
                Ok(frame) => return Some(TransportEvent::Message(*peer, frame)),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    closed = Some(*peer);
                    break;
                }
            }
        }
        if let Some(peer) = closed {
            self.drop_peer(peer);
        }
        self.pending.pop_front()
    }

    fn disconnect(&mut self, peer: PeerId) {
        // Dropping the sender ends the peer's writer task.
        self.peers.remove(&peer);
    }

    fn close(&mut self) {
        self.peers.clear();
        self.accept.close();
        self.status = NetworkStatus::Closed;
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Client transport over a channel link.
#[derive(Debug)]
pub struct ChannelClient {
    outbound: Option<UnboundedSender<Vec<u8>>>,
    inbound: UnboundedReceiver<Vec<u8>>,
    status: NetworkStatus,
}

impl ChannelClient {
    /// Wrap the client half of a link.
    pub fn new(link: ClientLink) -> Self {
        Self {
            outbound: Some(link.outbound),
            inbound: link.inbound,
            status: NetworkStatus::Connected,
        }
    }
}

impl Transport for ChannelClient {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Client
    }

    fn status(&self) -> NetworkStatus {
        self.status
    }

    fn send(&mut self, to: Destination, frame: Vec<u8>) -> Result<(), TransportError> {
        if to != Destination::Server {
            return Err(TransportError::InvalidDestination(to));
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    fn poll_recv(&mut self) -> Option<TransportEvent> {
        if self.status == NetworkStatus::Closed {
            return None;
        }
        match self.inbound.try_recv() {
            Ok(frame) => Some(TransportEvent::Message(PeerId::SERVER, frame)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.status = NetworkStatus::Closed;
                self.outbound = None;
                Some(TransportEvent::Disconnected(PeerId::SERVER))
            }
        }
    }

    fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
        self.status = NetworkStatus::Closed;
    }
}

// =============================================================================
// TESTS
// =============================================================================
