//! Reconnecting WebSocket connection
//!
//! A [`Connection`] is a handle onto three kinds of background task:
//! - the **supervisor**, which owns the live transport, the connection state,
//!   the subscription message and the backoff schedule, and is the only task
//!   that writes to the socket;
//! - one **receive task** per session, decoding frames and pushing payloads
//!   into the bounded outward channel;
//! - the **ping task**, asking the supervisor for a keepalive ping every
//!   `ping_interval`.
//!
//! Everything else talks to the supervisor through [`Command`]s and reads the
//! state through an atomic. Transient failures never reach the caller: they
//! are logged and turned into the reconnect cycle.
//!
//! # State machine
//! Disconnected -> Connecting (immediately, or after the backoff delay)
//! Connecting -> Connected (handshake ok, subscription replayed)
//! Connecting -> Disconnected (connect/handshake failure)
//! Connected -> Disconnected (Close frame, EOF, I/O error, read timeout)
//! any -> Closing -> Closed (close())

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::frame::{self, CloseCode, Frame, Opcode};
use crate::handshake;
use crate::transport::{default_connector, BoxedTransport, Connector};

/// Bound on any single write to the socket
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the farewell Close frame and transport shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// State
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Closing => 3,
            ConnectionState::Closed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State readable from any task; written by the supervisor only
struct Shared {
    state: AtomicU8,
    closed: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        if previous != state {
            debug!("Connection state: {} -> {}", previous, state);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Requests handled by the supervisor
#[derive(Debug)]
enum Command {
    Send(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    SetSubscription(String),
}

/// Channel ends moved into the supervisor by `start()`
struct Startup {
    commands: mpsc::UnboundedReceiver<Command>,
    outward: mpsc::Sender<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Public handle
// ============================================================================

/// Reconnecting, resubscribing WebSocket client connection
pub struct Connection {
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    startup: Mutex<Option<Startup>>,
    stream: Mutex<Option<mpsc::Receiver<String>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection using TCP or TLS according to `config.tls`.
    /// Fails only when the TLS client configuration cannot be built.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let connector = default_connector(config.tls)?;
        Ok(Self::with_connector(config, connector))
    }

    /// Create a connection over a caller-supplied transport connector
    pub fn with_connector(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (outward_tx, outward_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (shutdown, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            connector,
            shared: Arc::new(Shared {
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                closed: AtomicBool::new(false),
            }),
            commands: command_tx,
            startup: Mutex::new(Some(Startup { commands: command_rx, outward: outward_tx })),
            stream: Mutex::new(Some(outward_rx)),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Replace the whole desired subscription. It is written after every
    /// successful (re)connect; nothing is sent immediately.
    pub fn set_subscription(&self, message: impl Into<String>) {
        if self.commands.send(Command::SetSubscription(message.into())).is_err() {
            debug!("Subscription set after supervisor exit; ignored");
        }
    }

    /// Spawn the supervisor and ping tasks. Must be called inside a Tokio
    /// runtime. Calling it again, or after `close()`, does nothing.
    pub fn start(&self) {
        if self.is_closed() {
            warn!("start() called on a closed connection; ignoring");
            return;
        }
        let Some(startup) = lock(&self.startup).take() else {
            debug!("Connection already started");
            return;
        };

        let supervisor = Supervisor {
            config: self.config.clone(),
            connector: self.connector.clone(),
            shared: self.shared.clone(),
            commands: startup.commands,
            command_tx: self.commands.clone(),
            outward: startup.outward,
            shutdown: self.shutdown.subscribe(),
            backoff: Backoff::new(self.config.initial_backoff, self.config.max_backoff),
            subscription: None,
        };

        let ping = ping_loop(
            self.shared.clone(),
            self.commands.clone(),
            self.config.ping_interval,
            self.shutdown.subscribe(),
        );

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(supervisor.run()));
        tasks.push(tokio::spawn(ping));
    }

    /// Take the outward channel of decoded payloads. Only the first call
    /// returns it. Not draining it eventually stalls the connection.
    pub fn stream(&self) -> Option<mpsc::Receiver<String>> {
        lock(&self.stream).take()
    }

    /// Queue a masked text frame. Returns `false` (and does nothing) when no
    /// session is live; resubscription covers delivery after reconnects.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.submit(Command::Send(text.into()))
    }

    /// Queue an empty ping frame; same delivery rules as [`Connection::send`]
    pub fn send_ping(&self) -> bool {
        self.submit(Command::Ping(Vec::new()))
    }

    fn submit(&self, command: Command) -> bool {
        if !self.is_connected() {
            debug!("Not connected; dropping {:?}", command);
            return false;
        }
        self.commands.send(command).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.state() == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close the connection and wait for every background task to finish.
    /// Idempotent: later calls return immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing connection to {}", self.config.endpoint());
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
        }

        self.shared.set_state(ConnectionState::Closed);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shutdown.send_replace(true);
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Why a live session ended
enum SessionEnd {
    Dropped,
    Shutdown,
}

struct Supervisor {
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Handed to receive tasks so they can ask for pongs
    command_tx: mpsc::UnboundedSender<Command>,
    outward: mpsc::Sender<String>,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
    subscription: Option<String>,
}

impl Supervisor {
    async fn run(mut self) {
        info!("Connection supervisor started for {}", self.config.endpoint());

        let mut transport: Option<BoxedTransport> = None;
        let mut retry_delay: Option<Duration> = None;

        while !self.shared.is_closed() {
            match self.shared.state() {
                ConnectionState::Disconnected => {
                    if let Some(delay) = retry_delay.take() {
                        warn!("Reconnecting in {:?}...", delay);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.shutdown_signal() => break,
                        }
                    }
                    self.shared.set_state(ConnectionState::Connecting);
                }
                ConnectionState::Connecting => {
                    self.drain_commands();

                    let shutdown = self.shutdown_signal();
                    let attempt = tokio::select! {
                        result = self.connect_internal() => result,
                        _ = shutdown => break,
                    };

                    match attempt {
                        Ok(live) => {
                            self.backoff.reset();
                            self.shared.set_state(ConnectionState::Connected);
                            info!("Connected to {}", self.config.endpoint());
                            transport = Some(live);
                        }
                        Err(e) => {
                            error!("Connection to {} failed: {}", self.config.endpoint(), e);
                            self.shared.set_state(ConnectionState::Disconnected);
                            retry_delay = Some(self.backoff.next_delay());
                        }
                    }
                }
                ConnectionState::Connected => {
                    let Some(live) = transport.take() else {
                        self.shared.set_state(ConnectionState::Disconnected);
                        continue;
                    };
                    match self.run_session(live).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped => self.shared.set_state(ConnectionState::Disconnected),
                    }
                }
                ConnectionState::Closing | ConnectionState::Closed => break,
            }
        }

        self.shared.set_state(ConnectionState::Closed);
        info!("Connection supervisor for {} stopped", self.config.endpoint());
    }

    /// Resolves once `close()` has been called (or the handle dropped)
    fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown = self.shutdown.clone();
        async move {
            let _ = shutdown.wait_for(|closed| *closed).await;
        }
    }

    /// Apply commands queued while no session was live. Sends and pings
    /// belong to a dead epoch and are discarded.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::SetSubscription(message) => self.subscription = Some(message),
                stale => debug!("Discarding {:?} queued before reconnect", stale),
            }
        }
    }

    /// Open the transport, run the handshake and replay the subscription,
    /// all within `connect_timeout`
    async fn connect_internal(&mut self) -> Result<BoxedTransport> {
        info!("Connecting to {}", self.config.endpoint());
        let connect_timeout = self.config.connect_timeout;

        tokio::time::timeout(connect_timeout, self.establish())
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn establish(&mut self) -> Result<BoxedTransport> {
        let config = self.config.clone();
        let mut transport = self.connector.connect(&config.host, config.port).await?;
        handshake::perform(&mut transport, &config.host, config.port, &config.resource).await?;
        debug!("Handshake with {} complete", config.host);

        // Pick up a subscription set while the attempt was in flight
        self.drain_commands();
        if let Some(subscription) = &self.subscription {
            info!("Replaying subscription ({} bytes)", subscription.len());
            write_frame(&mut transport, &Frame::text(subscription.as_str())).await?;
        }
        Ok(transport)
    }

    /// Serve one connected epoch until it drops or shutdown is requested
    async fn run_session(&mut self, transport: BoxedTransport) -> SessionEnd {
        let (reader, mut writer) = tokio::io::split(transport);

        let mut receiver = tokio::spawn(receive_loop(
            reader,
            self.outward.clone(),
            self.command_tx.clone(),
            self.config.read_timeout,
            self.config.max_frame_size,
        ));

        let shutdown = self.shutdown_signal();
        tokio::pin!(shutdown);

        let end = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    self.shared.set_state(ConnectionState::Closing);
                    let farewell = Frame::close(CloseCode::Normal, "");
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, write_frame(&mut writer, &farewell))
                        .await;
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
                    break SessionEnd::Shutdown;
                }
                finished = &mut receiver => {
                    match finished {
                        Ok(Ok(code)) => info!("Server closed connection ({:?})", code),
                        Ok(Err(Error::ConnectionClosed)) => info!("WebSocket stream ended"),
                        Ok(Err(e)) => warn!("WebSocket error: {}", e),
                        Err(e) => warn!("Receive task failed: {}", e),
                    }
                    break SessionEnd::Dropped;
                }
                Some(command) = self.commands.recv() => {
                    let written = tokio::select! {
                        result = self.handle_command(command, &mut writer) => Some(result),
                        _ = &mut shutdown => None,
                    };
                    match written {
                        Some(Ok(())) => {}
                        Some(Err(e)) => {
                            warn!("Write failed: {}", e);
                            break SessionEnd::Dropped;
                        }
                        None => {
                            // A half-written frame leaves no room for a Close frame
                            self.shared.set_state(ConnectionState::Closing);
                            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
                            break SessionEnd::Shutdown;
                        }
                    }
                }
            }
        };

        receiver.abort();
        end
    }

    async fn handle_command<W>(&mut self, command: Command, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let frame = match command {
            Command::SetSubscription(message) => {
                debug!("Subscription replaced ({} bytes)", message.len());
                self.subscription = Some(message);
                return Ok(());
            }
            Command::Send(text) => Frame::text(text),
            Command::Ping(payload) => {
                debug!("Sending ping");
                Frame::ping(payload)
            }
            Command::Pong(payload) => Frame::pong(payload),
        };

        tokio::time::timeout(WRITE_TIMEOUT, write_frame(writer, &frame))
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(())
    }
}

/// Client frames are always masked
async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&frame::encode(frame, true)).await?;
    writer.flush().await
}

// ============================================================================
// Background loops
// ============================================================================

/// Decode frames until the session ends. Returns the peer's close code for a
/// Close frame, or the error that ended the stream.
async fn receive_loop(
    mut reader: ReadHalf<BoxedTransport>,
    outward: mpsc::Sender<String>,
    commands: mpsc::UnboundedSender<Command>,
    read_timeout: Duration,
    max_frame_size: usize,
) -> Result<Option<CloseCode>> {
    let mut received: u64 = 0;

    loop {
        let frame = tokio::time::timeout(read_timeout, frame::decode(&mut reader, max_frame_size))
            .await
            .map_err(|_| Error::Timeout)??;

        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                // Awaits while the consumer is behind: backpressure stalls decoding
                if outward.send(frame.payload_string()).await.is_err() {
                    debug!("Stream receiver dropped; discarding payload");
                }
                received += 1;
                if received % 1000 == 0 {
                    debug!("Received {} messages this session", received);
                }
            }
            Opcode::Ping => {
                let _ = commands.send(Command::Pong(frame.payload));
            }
            Opcode::Pong => debug!("Pong received"),
            Opcode::Close => return Ok(frame.close_code()),
            other => debug!("Ignoring {:?} frame ({} bytes)", other, frame.payload.len()),
        }
    }
}

/// Ask for a keepalive ping every `interval` while connected
async fn ping_loop(
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if shared.is_closed() {
            break;
        }
        if shared.state() == ConnectionState::Connected
            && commands.send(Command::Ping(Vec::new())).is_err()
        {
            break;
        }
    }
    debug!("Ping loop stopped");
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}
