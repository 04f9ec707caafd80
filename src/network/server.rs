//! WebSocket Transports
//!
//! Socket I/O runs on tokio tasks. Each connection is pumped between the
//! socket and a channel link, so the simulation thread only ever sees a
//! [`ChannelServer`] or [`ChannelClient`] and never awaits.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::network::transport::{channel_server, link_pair, ChannelClient, ChannelServer, PeerAcceptor, TransportError};

/// WebSocket errors.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Channel side closed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Accept loop feeding a [`ChannelServer`].
pub struct WebSocketListener {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl WebSocketListener {
    /// Bind and start accepting. Returns the transport for the simulation
    /// thread and the listener handle.
    pub async fn bind(addr: SocketAddr) -> Result<(ChannelServer, WebSocketListener), WebSocketError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (transport, acceptor) = channel_server();
        let (shutdown_tx, _) = broadcast::channel(1);

        let accept_task = tokio::spawn(accept_loop(listener, acceptor, shutdown_tx.clone()));
        info!(%local_addr, "websocket listener started");

        Ok((
            transport,
            WebSocketListener {
                local_addr,
                shutdown_tx,
                accept_task,
            },
        ))
    }

    /// Bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.accept_task.abort();
    }
}

impl Drop for WebSocketListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(listener: TcpListener, acceptor: PeerAcceptor, shutdown_tx: broadcast::Sender<()>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(stream, addr, acceptor.clone(), shutdown_tx.subscribe()));
                }
                Err(e) => warn!("accept failed: {}", e),
            },
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("accept loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    acceptor: PeerAcceptor,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (peer, io) = link_pair();
    if acceptor.offer(peer).is_err() {
        debug!(%addr, "server transport gone; dropping connection");
        return;
    }
    debug!(%addr, "connection accepted");

    tokio::select! {
        _ = pump(ws_stream, io.outbound, io.inbound) => {}
        _ = shutdown_rx.recv() => {}
    }
    debug!(%addr, "connection closed");
}

/// Connect to a server. The returned transport is ready to hand to
/// `NetworkSync::client`.
pub async fn connect(url: &str) -> Result<ChannelClient, WebSocketError> {
    let (ws_stream, _response) = connect_async(url).await?;
    let (io, client) = link_pair();
    tokio::spawn(pump(ws_stream, io.outbound, io.inbound));
    info!(%url, "connected");
    Ok(ChannelClient::new(client))
}

/// Move frames between a socket and the simulation until either side ends.
async fn pump<S>(ws_stream: WebSocketStream<S>, to_sim: UnboundedSender<Vec<u8>>, mut from_sim: UnboundedReceiver<Vec<u8>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = from_sim.recv().await {
            if ws_sender.send(Message::Binary(frame)).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Binary(frame)) => {
                if to_sim.send(frame).is_err() {
                    break;
                }
            }
            Ok(Message::Text(_)) => debug!("text frame ignored"),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("websocket read failed: {}", e);
                break;
            }
        }
    }

    // Dropping `to_sim` is what tells the simulation the link is gone.
    drop(to_sim);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::EngineConfig;
    use crate::game::tick::run_frame;
    use crate::network::auth::{AuthConfig, AuthRequest};
    use crate::network::sync::NetworkSync;
    use crate::network::transport::{Destination, NetworkMode, PeerId, Transport, TransportEvent};
    use crate::sandbox;

    async fn next_event(transport: &mut dyn Transport) -> TransportEvent {
        for _ in 0..200 {
            if let Some(event) = transport.poll_recv() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no transport event within a second");
    }

    async fn listen() -> (ChannelServer, WebSocketListener, String) {
        let (server, listener) = WebSocketListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let url = format!("ws://{}", listener.local_addr());
        (server, listener, url)
    }

    #[tokio::test]
    async fn test_frames_cross_the_socket() {
        let (mut server, _listener, url) = listen().await;
        let mut client = connect(&url).await.unwrap();

        let peer = match next_event(&mut server).await {
            TransportEvent::Connected(peer) => peer,
            other => panic!("unexpected {other:?}"),
        };

        client.send(Destination::Server, b"up".to_vec()).unwrap();
        assert_eq!(next_event(&mut server).await, TransportEvent::Message(peer, b"up".to_vec()));

        server.send(Destination::Peer(peer), b"down".to_vec()).unwrap();
        assert_eq!(
            next_event(&mut client).await,
            TransportEvent::Message(PeerId::SERVER, b"down".to_vec())
        );
    }

    #[tokio::test]
    async fn test_kicked_peer_sees_disconnect() {
        let (mut server, _listener, url) = listen().await;
        let mut client = connect(&url).await.unwrap();
        let TransportEvent::Connected(peer) = next_event(&mut server).await else {
            panic!("expected a connection");
        };

        server.disconnect(peer);
        assert_eq!(next_event(&mut client).await, TransportEvent::Disconnected(PeerId::SERVER));
    }

    #[tokio::test]
    async fn test_client_close_reaches_server() {
        let (mut server, _listener, url) = listen().await;
        let mut client = connect(&url).await.unwrap();
        let TransportEvent::Connected(peer) = next_event(&mut server).await else {
            panic!("expected a connection");
        };

        client.close();
        assert_eq!(next_event(&mut server).await, TransportEvent::Disconnected(peer));
    }

    #[tokio::test]
    async fn test_join_over_websocket() {
        let (transport, _listener, url) = listen().await;
        let config = EngineConfig::default();
        let network = NetworkSync::server(config.network.clone(), Box::new(transport), AuthConfig::default());
        let mut host = sandbox::new_context(config.clone()).with_network(network);
        host.load_scenario([5, 6], 20_000);
        let mut build = sandbox::place_scenery(8, 8, 40);
        host.execute(&mut build);

        let client_transport = connect(&url).await.unwrap();
        let request = AuthRequest {
            name: "Remote".into(),
            ..Default::default()
        };
        let network = NetworkSync::client(config.network.clone(), Box::new(client_transport), request);
        let mut guest = sandbox::new_context(config).with_network(network);

        for _ in 0..100 {
            run_frame(&mut host, 25, 1);
            tokio::time::sleep(Duration::from_millis(5)).await;
            run_frame(&mut guest, 25, 1);
            if guest.tick() >= 3 {
                break;
            }
        }

        assert_eq!(guest.network.mode(), NetworkMode::Client);
        assert!(guest.network.is_connected_client());
        assert!(guest.tick() >= 3);
        assert_eq!(guest.world.scenery, host.world.scenery);
        assert!(!guest.network.is_desynchronised());
    }
}
