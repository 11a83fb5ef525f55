//! The peer supervisor.
//!
//! Owns the main event loop: a single task multiplexing cancellation, the
//! periodic bootstrap tick and the inbound message channel with equal
//! priority. Inbound messages are dispatched by variant to the ping/pong,
//! cast, multicast or broadcast handler; handler failures are logged and
//! never terminate the loop.
//!
//! Bootstrap loads every known address into a queue and lets a bounded
//! pool of workers ping them, each ping under a timeout sized so one full
//! sweep fits inside the bootstrap period.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use murmur_protocol::{
    EventReceiver, EventSender, GroupId, MessageOnTheWire, MessageReceiver, MessageSender,
    MessageVariant, PeerAddr, PeerAddressCodec, PeerId,
};
use murmur_store::{MemStore, Store};

use crate::broadcast::{Broadcaster, Storage};
use crate::cast::Caster;
use crate::dht::Dht;
use crate::error::{PeerError, Result};
use crate::multicast::Multicaster;
use crate::pingpong::PingPonger;

/// Default period between bootstrap sweeps.
pub const DEFAULT_BOOTSTRAP_DURATION: Duration = Duration::from_secs(60 * 60);

/// Floor for the per-ping timeout during bootstrap.
const MIN_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Ceiling for the per-ping timeout during bootstrap.
const MAX_PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`Peer`].
///
/// `me`, `bootstrap` and `codec` are required; everything else has
/// defaults matching an idle overlay node.
pub struct PeerOptions {
    /// This node's own address, gossiped in pings and pongs.
    pub me: PeerAddr,
    /// Initial peer set; must be non-empty.
    pub bootstrap: Vec<PeerAddr>,
    /// Codec used for addresses on the wire and in the DHT store.
    pub codec: Arc<dyn PeerAddressCodec>,
    /// Capacity hint for the event channel created by
    /// [`PeerOptions::event_channel`]. Zero means "smallest possible".
    pub event_buffer: usize,
    /// Bootstrap worker count. Zero means 2x the CPU count.
    pub bootstrap_workers: usize,
    /// Period between bootstrap sweeps. Zero means one hour.
    pub bootstrap_duration: Duration,
    /// DHT backend; defaults to an in-memory store.
    pub dht_store: Option<Arc<dyn Store>>,
    /// Broadcast dedup backend; defaults to an in-memory store.
    pub broadcaster_store: Option<Arc<dyn Store>>,
}

impl PeerOptions {
    /// Options with the required fields set and defaults elsewhere.
    pub fn new(me: PeerAddr, bootstrap: Vec<PeerAddr>, codec: Arc<dyn PeerAddressCodec>) -> Self {
        Self {
            me,
            bootstrap,
            codec,
            event_buffer: 0,
            bootstrap_workers: 0,
            bootstrap_duration: Duration::ZERO,
            dht_store: None,
            broadcaster_store: None,
        }
    }

    /// Set the event channel capacity hint.
    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer;
        self
    }

    /// Set the bootstrap worker count.
    pub fn with_bootstrap_workers(mut self, workers: usize) -> Self {
        self.bootstrap_workers = workers;
        self
    }

    /// Set the period between bootstrap sweeps.
    pub fn with_bootstrap_duration(mut self, duration: Duration) -> Self {
        self.bootstrap_duration = duration;
        self
    }

    /// Set the DHT backend.
    pub fn with_dht_store(mut self, store: Arc<dyn Store>) -> Self {
        self.dht_store = Some(store);
        self
    }

    /// Set the broadcast dedup backend.
    pub fn with_broadcaster_store(mut self, store: Arc<dyn Store>) -> Self {
        self.broadcaster_store = Some(store);
        self
    }

    /// Create the event channel this peer should report into, sized per
    /// `event_buffer`.
    pub fn event_channel(&self) -> (EventSender, EventReceiver) {
        mpsc::channel(self.event_buffer.max(1))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.bootstrap.is_empty() {
            return Err("empty bootstrap addresses".to_string());
        }
        Ok(())
    }
}

impl std::fmt::Debug for PeerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerOptions")
            .field("me", &self.me)
            .field("bootstrap", &self.bootstrap.len())
            .field("bootstrap_workers", &self.bootstrap_workers)
            .field("bootstrap_duration", &self.bootstrap_duration)
            .finish_non_exhaustive()
    }
}

/// The gossip supervisor: event loop, bootstrap scheduler and dispatcher.
pub struct Peer {
    bootstrap_workers: usize,
    bootstrap_duration: Duration,
    dht: Arc<Dht>,
    ping_ponger: PingPonger,
    caster: Caster,
    multicaster: Multicaster,
    broadcaster: Broadcaster,
    receiver: MessageReceiver,
}

impl Peer {
    /// Build a peer from options and its channel collaborators.
    ///
    /// Outbound messages go to `sender`, observable state changes to
    /// `events`, and inbound messages are read from `receiver`.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::InvalidOptions`] on a misconfiguration, which
    /// callers are expected to treat as fatal at startup.
    pub fn new(
        options: PeerOptions,
        receiver: MessageReceiver,
        sender: MessageSender,
        events: EventSender,
    ) -> Result<Self> {
        options.validate().map_err(PeerError::InvalidOptions)?;

        let bootstrap_workers = if options.bootstrap_workers == 0 {
            2 * num_cpus()
        } else {
            options.bootstrap_workers
        };
        let bootstrap_duration = if options.bootstrap_duration.is_zero() {
            DEFAULT_BOOTSTRAP_DURATION
        } else {
            options.bootstrap_duration
        };

        let dht_store = options
            .dht_store
            .unwrap_or_else(|| Arc::new(MemStore::new()));
        let broadcaster_store = options
            .broadcaster_store
            .unwrap_or_else(|| Arc::new(MemStore::new()));

        let dht = Arc::new(Dht::new(
            options.me,
            Arc::clone(&options.codec),
            dht_store,
            &options.bootstrap,
        )?);

        let ping_ponger = PingPonger::new(
            Arc::clone(&dht),
            sender.clone(),
            events.clone(),
            options.codec,
        );
        let caster = Caster::new(Arc::clone(&dht), sender.clone(), events.clone());
        let multicaster = Multicaster::new(Arc::clone(&dht), sender.clone(), events.clone());
        let broadcaster = Broadcaster::new(
            Storage::new(broadcaster_store),
            Arc::clone(&dht),
            sender,
            events,
        );

        Ok(Self {
            bootstrap_workers,
            bootstrap_duration,
            dht,
            ping_ponger,
            caster,
            multicaster,
            broadcaster,
            receiver,
        })
    }

    /// The directory this peer maintains.
    pub fn dht(&self) -> Arc<Dht> {
        Arc::clone(&self.dht)
    }

    /// This node's own address.
    pub fn me(&self) -> PeerAddr {
        self.dht.me()
    }

    /// Look up a peer's address.
    pub fn peer(&self, id: &PeerId) -> Result<PeerAddr> {
        self.dht.peer_address(id)
    }

    /// All known peer addresses.
    pub fn peers(&self) -> Result<Vec<PeerAddr>> {
        self.dht.peer_addresses()
    }

    /// Number of known peers.
    pub fn num_peers(&self) -> Result<usize> {
        self.dht.num_peers()
    }

    /// Send `body` directly to `to`.
    pub async fn cast(&self, cancel: &CancellationToken, to: PeerId, body: Vec<u8>) -> Result<()> {
        self.caster.cast(cancel, to, body).await
    }

    /// Send `body` to every known peer.
    pub async fn multicast(&self, cancel: &CancellationToken, body: Vec<u8>) -> Result<()> {
        self.multicaster.multicast(cancel, body).await
    }

    /// Send `body` to the members of `group`.
    pub async fn multicast_group(
        &self,
        cancel: &CancellationToken,
        group: GroupId,
        body: Vec<u8>,
    ) -> Result<()> {
        self.multicaster.multicast_group(cancel, group, body).await
    }

    /// Flood `body` across the network.
    pub async fn broadcast(&self, cancel: &CancellationToken, body: Vec<u8>) -> Result<()> {
        self.broadcaster.broadcast(cancel, body).await
    }

    /// Run the event loop until `cancel` fires or the inbound channel
    /// closes. Performs one bootstrap sweep immediately, then one per
    /// bootstrap period.
    pub async fn run(&mut self, cancel: CancellationToken) {
        self.bootstrap(&cancel).await;

        let mut ticker = interval(self.bootstrap_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval's first tick completes immediately; the sweep above
        // already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("supervisor cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    self.bootstrap(&cancel).await;
                }
                maybe = self.receiver.recv() => {
                    let Some(envelope) = maybe else {
                        debug!("inbound channel closed");
                        return;
                    };
                    if let Err(e) = self.dispatch(&cancel, envelope).await {
                        warn!(error = %e, "failed to handle inbound message");
                    }
                }
            }
        }
    }

    /// Route one inbound message to its handler.
    async fn dispatch(&self, cancel: &CancellationToken, envelope: MessageOnTheWire) -> Result<()> {
        let MessageOnTheWire { from, message, .. } = envelope;
        match message.variant {
            MessageVariant::Ping => self.ping_ponger.accept_ping(cancel, message).await,
            MessageVariant::Pong => self.ping_ponger.accept_pong(cancel, message).await,
            MessageVariant::Cast => self.caster.accept_cast(cancel, from, message).await,
            MessageVariant::Multicast => {
                self.multicaster.accept_multicast(cancel, from, message).await
            }
            MessageVariant::Broadcast => {
                self.broadcaster.accept_broadcast(cancel, from, message).await
            }
        }
    }

    /// Ping every known peer through a bounded worker pool.
    ///
    /// Failures are logged per peer and never abort the sweep.
    async fn bootstrap(&self, cancel: &CancellationToken) {
        let peer_addrs = match self.dht.peer_addresses() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(error = %e, "bootstrap: failed to load peer addresses");
                return;
            }
        };
        if peer_addrs.is_empty() {
            return;
        }

        let total = peer_addrs.len();
        let per_ping = ping_timeout(self.bootstrap_workers, self.bootstrap_duration, total);
        debug!(peers = total, workers = self.bootstrap_workers, timeout = ?per_ping, "bootstrap sweep");

        let queue = Arc::new(Mutex::new(VecDeque::from(peer_addrs)));
        let mut workers = Vec::with_capacity(self.bootstrap_workers);
        for _ in 0..self.bootstrap_workers {
            let queue = Arc::clone(&queue);
            let ping_ponger = self.ping_ponger.clone();
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let next = match queue.lock() {
                        Ok(mut queue) => queue.pop_front(),
                        Err(_) => return,
                    };
                    let Some(addr) = next else { return };

                    match timeout(per_ping, ping_ponger.ping(&cancel, addr.peer_id())).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(peer = %addr, error = %e, "bootstrap: ping failed");
                        }
                        Err(_) => {
                            warn!(peer = %addr, "bootstrap: ping timed out");
                        }
                    }
                }
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("me", &self.dht.me())
            .field("bootstrap_workers", &self.bootstrap_workers)
            .field("bootstrap_duration", &self.bootstrap_duration)
            .finish_non_exhaustive()
    }
}

/// Get number of CPU cores.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Per-ping timeout for a bootstrap sweep.
///
/// Sized so that `workers` pinging `total` peers sequentially finish
/// within one bootstrap period even if every ping runs to its deadline,
/// floored at one second and capped at thirty.
fn ping_timeout(workers: usize, period: Duration, total: usize) -> Duration {
    let mut t = period * workers as u32 / total as u32;
    if t > period {
        t = period;
    }
    if t > MAX_PING_TIMEOUT {
        t = MAX_PING_TIMEOUT;
    }
    if t < MIN_PING_TIMEOUT {
        t = MIN_PING_TIMEOUT;
    }
    t
}
