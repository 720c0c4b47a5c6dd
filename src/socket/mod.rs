//! Per-connection websocket pump.
//!
//! A [`Pump`] owns one upgraded client connection and runs two loops over
//! it: the outbound loop drains the bounded queue fed through
//! [`PumpHandle::send`] and keeps the peer alive with pings, the inbound
//! loop watches for pongs, close frames and read deadlines. Whichever loop
//! ends first tears the connection down and unregisters it from the hub.

pub mod server;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, timeout, timeout_at};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use tungstenite::Message;

use crate::hub::HubHandle;
use crate::models::Payload;
use crate::{Result, TradeBotError};

/// Time allowed to write one batch of frames to the peer.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between pongs before the peer is considered gone.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Pings are sent at 9/10 of [`PONG_WAIT`] so a pong can arrive in time.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Largest inbound frame accepted from a client.
const MAX_MESSAGE_SIZE: usize = 1024;

/// Outbound messages buffered per connection.
const QUEUE_CAPACITY: usize = 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of one connection as seen through its [`PumpHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting messages.
    Open,
    /// The queue is closed; queued messages and the close frame are being
    /// written.
    Closing,
    /// Both loops have stopped.
    Closed,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// What the hub does when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait for room in the queue.
    #[default]
    Block,
    /// Drop the connection.
    Disconnect,
}

impl FromStr for BackpressurePolicy {
    type Err = TradeBotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(TradeBotError::Config(format!(
                "invalid backpressure policy {other:?}, expected \"block\" or \"disconnect\""
            ))),
        }
    }
}

/// Timing and sizing for every pump created by a server.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            max_message_size: MAX_MESSAGE_SIZE,
            queue_capacity: QUEUE_CAPACITY,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

/// Outcome of [`PumpHandle::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue was full under [`BackpressurePolicy::Disconnect`].
    Full,
    /// The pump has been closed or its outbound loop has exited.
    Closed,
}

/// Cloneable sending side of a pump's outbound queue.
///
/// Every clone shares the same queue, so [`close`](Self::close) from any
/// of them closes it for all.
#[derive(Debug, Clone)]
pub struct PumpHandle {
    id: ConnectionId,
    policy: BackpressurePolicy,
    sender: Arc<Mutex<Option<mpsc::Sender<Payload>>>>,
    state: Arc<AtomicU8>,
}

impl PumpHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `payload` for the outbound loop.
    pub async fn send(&self, payload: Payload) -> Delivery {
        // Clone out of the lock so a blocked send never holds it.
        let Some(sender) = self.sender.lock().await.clone() else {
            return Delivery::Closed;
        };

        match self.policy {
            BackpressurePolicy::Block => match sender.send(payload).await {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
            BackpressurePolicy::Disconnect => match sender.try_send(payload) {
                Ok(()) => Delivery::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }

    /// Closes the outbound queue.
    ///
    /// Messages already queued are still written, followed by a single
    /// close frame. Returns `false` if the queue was already closed.
    pub async fn close(&self) -> bool {
        let closed = self.sender.lock().await.take().is_some();
        let _ = self.state.compare_exchange(
            ConnectionState::Open as u8,
            ConnectionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        closed
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub async fn is_closed(&self) -> bool {
        self.sender.lock().await.is_none()
    }
}

/// Creates a pump queue without a transport attached.
pub(crate) fn channel(config: &PumpConfig) -> (PumpHandle, mpsc::Receiver<Payload>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let handle = PumpHandle {
        id: ConnectionId::next(),
        policy: config.backpressure,
        sender: Arc::new(Mutex::new(Some(tx))),
        state: Arc::new(AtomicU8::new(ConnectionState::Open as u8)),
    };
    (handle, rx)
}

/// Why the inbound loop stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    /// The peer sent a close frame or the stream ended.
    Closed,
    /// No pong arrived within the read deadline.
    Deadline,
    /// The peer sent a frame larger than the configured maximum.
    Oversized,
    /// The transport reported an error.
    Error,
}

/// One client connection and its outbound queue.
pub struct Pump {
    handle: PumpHandle,
    queue: mpsc::Receiver<Payload>,
    config: PumpConfig,
}

impl Pump {
    pub fn new(config: PumpConfig) -> Self {
        let (handle, queue) = channel(&config);
        Self {
            handle,
            queue,
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn handle(&self) -> PumpHandle {
        self.handle.clone()
    }

    /// Runs both loops over `ws` until either side ends, then unregisters
    /// the connection from `hub`.
    pub async fn run<S>(self, ws: WebSocketStream<S>, hub: HubHandle)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Self {
            handle,
            queue,
            config,
        } = self;
        let id = handle.id;
        let (sink, stream) = ws.split();

        let writer = write_loop(sink, queue, &config, id);
        tokio::pin!(writer);

        tokio::select! {
            end = read_loop(stream, &config, id) => {
                info!(connection = %id, reason = ?end, "Inbound side closed");
                handle.close().await;
                let _ = hub.unregister(id);
                // Flush what is left and send the close frame.
                if let Err(e) = writer.await {
                    debug!(connection = %id, "Outbound side ended with error: {e}");
                }
            }
            result = &mut writer => {
                match result {
                    Ok(()) => info!(connection = %id, "Outbound side closed"),
                    Err(e) => warn!(connection = %id, "Outbound side failed: {e}"),
                }
                handle.close().await;
                let _ = hub.unregister(id);
            }
        }
        handle.mark_closed();
    }
}

/// Writes queued payloads and keepalive pings until the queue closes or a
/// write fails.
///
/// Every message already queued when a write starts goes out in the same
/// flush.
async fn write_loop<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<Payload>,
    config: &PumpConfig,
    id: ConnectionId,
) -> Result<()>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut ticker =
        tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(payload) = next else {
                    // After a peer-initiated close the protocol layer has
                    // already queued its reply and refuses another close
                    // frame; closing the sink writes that reply out.
                    if let Err(e) = write_deadline(config, sink.send(Message::Close(None))).await {
                        debug!(connection = %id, "Close frame not sent: {e}");
                    }
                    if let Err(e) = write_deadline(config, sink.close()).await {
                        debug!(connection = %id, "Close not flushed: {e}");
                    }
                    return Ok(());
                };

                let batch = write_deadline(config, async {
                    sink.feed(Message::Text(payload)).await?;
                    let mut batch = 1;
                    for _ in 0..queue.len() {
                        let Ok(payload) = queue.try_recv() else { break };
                        sink.feed(Message::Text(payload)).await?;
                        batch += 1;
                    }
                    sink.flush().await?;
                    Ok::<_, tungstenite::Error>(batch)
                })
                .await?;
                debug!(connection = %id, batch, "Flushed outbound messages");
            }
            _ = ticker.tick() => {
                write_deadline(config, sink.send(Message::Ping(Default::default()))).await?;
            }
        }
    }
}

/// Bounds one write by the configured write wait.
async fn write_deadline<T, F>(config: &PumpConfig, write: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, tungstenite::Error>>,
{
    match timeout(config.write_wait, write).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TradeBotError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write deadline exceeded",
        ))),
    }
}

/// Reads frames until the peer goes away or breaks a limit.
async fn read_loop<St>(mut stream: St, config: &PumpConfig, id: ConnectionId) -> ReadEnd
where
    St: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => return ReadEnd::Deadline,
            Ok(None) => return ReadEnd::Closed,
            Ok(Some(Err(e))) => {
                warn!(connection = %id, "Read failed: {e}");
                return ReadEnd::Error;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        if frame.len() > config.max_message_size {
            warn!(
                connection = %id,
                size = frame.len(),
                limit = config.max_message_size,
                "Inbound message too large"
            );
            return ReadEnd::Oversized;
        }

        match frame {
            Message::Pong(_) => deadline = Instant::now() + config.pong_wait,
            Message::Text(text) => {
                debug!(connection = %id, message = text.as_str(), "Inbound message");
            }
            Message::Close(_) => return ReadEnd::Closed,
            _ => {}
        }
    }
}
