//! TCP transport: listener and dialer around handshaked sessions.
//!
//! The [`Server`] accepts raw connections, responds to the handshake and
//! forwards every decoded inbound message into the supervisor's channel,
//! stamped with the session's authenticated signatory. The [`Client`]
//! drains the shared outbound channel, keeping a bounded pool of
//! initiated connections keyed by destination socket address.
//!
//! Connection-level failures terminate that connection only; the
//! supervisor never sees them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_protocol::{MessageOnTheWire, MessageReceiver, MessageSender, PeerAddr};

use crate::error::{NetError, Result};
use crate::handshake::Handshaker;
use crate::session::Session;

/// Options for the listening side.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Deadline for a newly accepted connection to finish its handshake.
    pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(60),
        }
    }
}

/// Accepts connections and feeds inbound messages to the supervisor.
pub struct Server {
    options: ServerOptions,
    handshaker: Arc<Handshaker>,
    sender: MessageSender,
}

impl Server {
    /// Create a server forwarding inbound messages into `sender`.
    pub fn new(options: ServerOptions, handshaker: Arc<Handshaker>, sender: MessageSender) -> Self {
        Self {
            options,
            handshaker,
            sender,
        }
    }

    /// Bind `addr` and serve until cancelled.
    pub async fn listen(&self, cancel: CancellationToken, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(cancel, listener).await
    }

    /// Serve an already bound listener until cancelled.
    pub async fn serve(&self, cancel: CancellationToken, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "tcp server listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let options = self.options.clone();
                    let handshaker = Arc::clone(&self.handshaker);
                    let sender = self.sender.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        handle_connection(options, handshaker, sender, cancel, stream, remote_addr)
                            .await;
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    options: ServerOptions,
    handshaker: Arc<Handshaker>,
    sender: MessageSender,
    cancel: CancellationToken,
    mut stream: TcpStream,
    remote_addr: SocketAddr,
) {
    let mut session =
        match timeout(options.handshake_timeout, handshaker.respond(&mut stream)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(addr = %remote_addr, error = %e, "handshake failed");
                return;
            }
            Err(_) => {
                warn!(addr = %remote_addr, "handshake timed out");
                return;
            }
        };

    let remote = session.remote();
    debug!(peer = %remote, addr = %remote_addr, "inbound session established");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = session.read_message(&mut stream) => {
                match result {
                    Ok(message) => {
                        let envelope = MessageOnTheWire::inbound(remote, message);
                        // Backpressure: block until the supervisor drains us.
                        if sender.send(envelope).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(peer = %remote, addr = %remote_addr, error = %e, "connection closed");
                        return;
                    }
                }
            }
        }
    }
}

/// Options for the dialing side.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline for dialing plus handshaking a new connection.
    pub dial_timeout: Duration,
    /// Deadline for writing one message.
    pub write_timeout: Duration,
    /// Maximum pooled connections; the pool evicts when full.
    pub max_connections: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            max_connections: 256,
        }
    }
}

struct Conn {
    stream: TcpStream,
    session: Session,
}

/// Drains the outbound channel, writing messages through pooled sessions.
pub struct Client {
    options: ClientOptions,
    handshaker: Arc<Handshaker>,
    conns: HashMap<SocketAddr, Conn>,
}

impl Client {
    /// Create a client.
    pub fn new(options: ClientOptions, handshaker: Arc<Handshaker>) -> Self {
        Self {
            options,
            handshaker,
            conns: HashMap::new(),
        }
    }

    /// Consume envelopes from `receiver` until cancelled or the channel
    /// closes. Delivery failures are logged per envelope and never abort
    /// the loop.
    pub async fn run(mut self, cancel: CancellationToken, mut receiver: MessageReceiver) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                maybe = receiver.recv() => {
                    let Some(envelope) = maybe else { return };
                    if let Err(e) = self.deliver(envelope).await {
                        debug!(error = %e, "delivery failed");
                    }
                }
            }
        }
    }

    async fn deliver(&mut self, envelope: MessageOnTheWire) -> Result<()> {
        let to = envelope
            .to
            .clone()
            .ok_or_else(|| NetError::Connection("outbound envelope without destination".into()))?;
        let addr = resolve(&to)?;

        match &envelope.cancel {
            Some(token) => {
                let result = tokio::select! {
                    _ = token.cancelled() => Err(NetError::Cancelled),
                    result = self.write_to(addr, &envelope) => result,
                };
                if matches!(result, Err(NetError::Cancelled)) {
                    // A write may be half-done; the connection is no longer
                    // frame-aligned.
                    self.conns.remove(&addr);
                }
                result
            }
            None => self.write_to(addr, &envelope).await,
        }
    }

    async fn write_to(&mut self, addr: SocketAddr, envelope: &MessageOnTheWire) -> Result<()> {
        if !self.conns.contains_key(&addr) {
            let conn = self.connect(addr).await?;
            self.insert(addr, conn);
        }

        // A pooled connection may have died since its last use; redial once.
        if let Err(e) = self.try_write(addr, envelope).await {
            debug!(addr = %addr, error = %e, "pooled connection failed, redialing");
            self.conns.remove(&addr);
            let conn = self.connect(addr).await?;
            self.insert(addr, conn);
            self.try_write(addr, envelope).await?;
        }
        Ok(())
    }

    async fn try_write(&mut self, addr: SocketAddr, envelope: &MessageOnTheWire) -> Result<()> {
        let conn = self
            .conns
            .get_mut(&addr)
            .ok_or_else(|| NetError::Connection("connection not pooled".into()))?;

        let result = timeout(
            self.options.write_timeout,
            conn.session.write_message(&mut conn.stream, &envelope.message),
        )
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.conns.remove(&addr);
                Err(NetError::Session(e))
            }
            Err(_) => {
                self.conns.remove(&addr);
                Err(NetError::Timeout)
            }
        }
    }

    async fn connect(&self, addr: SocketAddr) -> Result<Conn> {
        let dial = async {
            let mut stream = TcpStream::connect(addr).await?;
            let session = self.handshaker.initiate(&mut stream).await?;
            Ok::<_, NetError>(Conn { stream, session })
        };
        let conn = timeout(self.options.dial_timeout, dial)
            .await
            .map_err(|_| NetError::Timeout)??;
        debug!(addr = %addr, peer = %conn.session.remote(), "outbound session established");
        Ok(conn)
    }

    fn insert(&mut self, addr: SocketAddr, conn: Conn) {
        while self.conns.len() >= self.options.max_connections {
            // Evict an arbitrary pooled connection to stay within bounds.
            let Some(victim) = self.conns.keys().next().copied() else {
                break;
            };
            debug!(addr = %victim, "evicting pooled connection");
            self.conns.remove(&victim);
        }
        self.conns.insert(addr, conn);
    }
}

fn resolve(to: &PeerAddr) -> Result<SocketAddr> {
    let locator = to.network_string();
    locator
        .parse()
        .map_err(|e: std::net::AddrParseError| NetError::InvalidAddress(locator, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::AllowAll;
    use murmur_crypto::Keypair;
    use murmur_protocol::{
        GroupId, Message, MessageVariant, TcpPeerAddress, V1,
    };
    use tokio::sync::mpsc;

    async fn spawn_server(keypair: Keypair) -> (SocketAddr, MessageReceiver, CancellationToken) {
        let (sender, receiver) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Server::new(
            ServerOptions::default(),
            Arc::new(Handshaker::new(keypair, Arc::new(AllowAll))),
            sender,
        );
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            server.serve(server_cancel, listener).await.unwrap();
        });
        (addr, receiver, cancel)
    }

    #[tokio::test]
    async fn test_send_and_receive_message() {
        let server_keys = Keypair::generate();
        let client_keys = Keypair::generate();
        let client_signatory = client_keys.signatory();

        let (addr, mut inbound, cancel) = spawn_server(server_keys.clone()).await;

        let (out_tx, out_rx) = mpsc::channel(64);
        let client = Client::new(
            ClientOptions::default(),
            Arc::new(Handshaker::new(client_keys, Arc::new(AllowAll))),
        );
        tokio::spawn(client.run(cancel.clone(), out_rx));

        let to: PeerAddr = Arc::new(TcpPeerAddress::new(server_keys.signatory(), addr, 0));
        let message = Message::new(V1, MessageVariant::Cast, GroupId::NIL, b"over tcp".to_vec());
        out_tx
            .send(MessageOnTheWire::outbound(to, message.clone()))
            .await
            .unwrap();

        let received = inbound.recv().await.unwrap();
        assert_eq!(received.message, message);
        assert_eq!(received.from, Some(client_signatory));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_pooled_connection_is_reused() {
        let server_keys = Keypair::generate();
        let (addr, mut inbound, cancel) = spawn_server(server_keys.clone()).await;

        let (out_tx, out_rx) = mpsc::channel(64);
        let client = Client::new(
            ClientOptions::default(),
            Arc::new(Handshaker::new(Keypair::generate(), Arc::new(AllowAll))),
        );
        tokio::spawn(client.run(cancel.clone(), out_rx));

        let to: PeerAddr = Arc::new(TcpPeerAddress::new(server_keys.signatory(), addr, 0));
        for i in 0..3u8 {
            let message = Message::new(V1, MessageVariant::Cast, GroupId::NIL, vec![i]);
            out_tx
                .send(MessageOnTheWire::outbound(Arc::clone(&to), message))
                .await
                .unwrap();
        }

        for i in 0..3u8 {
            let received = inbound.recv().await.unwrap();
            assert_eq!(received.message.body, vec![i]);
        }

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unreachable_destination_does_not_kill_client() {
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(64);
        let client = Client::new(
            ClientOptions {
                dial_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            Arc::new(Handshaker::new(Keypair::generate(), Arc::new(AllowAll))),
        );
        tokio::spawn(client.run(cancel.clone(), out_rx));

        // A port nothing listens on.
        let dead: PeerAddr = Arc::new(TcpPeerAddress::new(
            Keypair::generate().signatory(),
            "127.0.0.1:1".parse().unwrap(),
            0,
        ));
        let message = Message::new(V1, MessageVariant::Cast, GroupId::NIL, vec![1]);
        out_tx
            .send(MessageOnTheWire::outbound(dead, message))
            .await
            .unwrap();

        // The client loop is still alive and accepts further envelopes.
        let still_dead: PeerAddr = Arc::new(TcpPeerAddress::new(
            Keypair::generate().signatory(),
            "127.0.0.1:1".parse().unwrap(),
            0,
        ));
        let message = Message::new(V1, MessageVariant::Cast, GroupId::NIL, vec![2]);
        out_tx
            .send(MessageOnTheWire::outbound(still_dead, message))
            .await
            .unwrap();

        cancel.cancel();
    }
}
