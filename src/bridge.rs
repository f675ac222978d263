// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address::{Addr64, OwnIdentity};
use crate::config::BridgeConfig;
use crate::devices::Device;
use crate::engine::{Effect, Engine};
use crate::error::{BridgeError, Result};
use crate::event::{event_channel, BridgeEvent, EventReceiver, EventSender};
use crate::join::{JoinScheduler, ScheduledSend};
use crate::protocol::{self, ExplicitMessage, MessageKind, MessageParams};
use crate::store::{save_detached, DeviceStore};
use crate::transport::frame::{OutboundFrame, RawFrame};
use crate::transport::serial::{self, SerialWriter};
use crate::transport::{spawn_writer, FrameWriter, WriterHandle, XBeeCodec};

const COMMAND_QUEUE: usize = 64;
const FRAME_QUEUE: usize = 64;

/// Requests handled by the bridge task.
enum Command {
    Send {
        remote64: Addr64,
        kind: MessageKind,
        params: MessageParams,
        reply: oneshot::Sender<Result<u8>>,
    },
    SendRaw {
        frame: OutboundFrame,
        reply: oneshot::Sender<Result<u8>>,
    },
    ReadAddresses {
        reply: oneshot::Sender<Result<()>>,
    },
    Devices {
        reply: oneshot::Sender<Vec<Device>>,
    },
    OwnIdentity {
        reply: oneshot::Sender<OwnIdentity>,
    },
    Reconfigure(Box<BridgeConfig>),
    /// A join timer fired
    Scheduled(ScheduledSend),
}

/// The main public API of the bridge.
///
/// All device state lives in one task that owns the [`Engine`]; inbound
/// frames, watchdog ticks, join timers and caller requests are handled there
/// one at a time.
///
/// # Example
///
/// ```no_run
/// use alertme_xbee_bridge::{BridgeConfig, BridgeEvent, XBeeBridge};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = BridgeConfig::builder()
///         .serial_port("/dev/ttyUSB0")
///         .baud_rate(115_200)
///         .build();
///
///     let mut bridge = XBeeBridge::connect(config, None).await?;
///
///     let mut events = bridge.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             if let BridgeEvent::Publication(p) = event {
///                 println!("{} = {}", p.topic, p.value);
///             }
///         }
///     });
///
///     // Let new devices join
///     bridge.permit_join().await?;
///
///     tokio::signal::ctrl_c().await?;
///     bridge.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct XBeeBridge {
    commands: mpsc::Sender<Command>,
    event_tx: EventSender,
    cancel: CancellationToken,
    actor_handle: Option<JoinHandle<()>>,
    reader_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
}

impl XBeeBridge {
    /// Open the serial port and start the bridge.
    ///
    /// Opening is retried on transient errors with exponential backoff, from
    /// `reconnect_delay_ms` up to `max_connect_retries` times.
    pub async fn connect(config: BridgeConfig, store: Option<Arc<dyn DeviceStore>>) -> Result<Self> {
        let mut last_error = None;
        for attempt in 0..=config.max_connect_retries {
            if attempt > 0 {
                let delay_ms = config.reconnect_delay_ms * (1 << (attempt - 1).min(4));
                warn!(
                    "Open attempt {} failed, retrying in {:.1}s...",
                    attempt,
                    delay_ms as f64 / 1000.0
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }
            match serial::open(&config) {
                Ok(port) => return Self::start_serial(config, port, store),
                Err(e) => {
                    if !e.is_retryable() || attempt == config.max_connect_retries {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(BridgeError::TransportClosed))
    }

    fn start_serial(
        config: BridgeConfig,
        port: Box<dyn serialport::SerialPort>,
        store: Option<Arc<dyn DeviceStore>>,
    ) -> Result<Self> {
        let read_port = port.try_clone()?;
        let cancel = CancellationToken::new();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let reader = serial::spawn_reader(
            read_port,
            XBeeCodec::new(config.api_mode),
            frame_tx,
            cancel.child_token(),
        );
        let writer = SerialWriter::new(port, XBeeCodec::new(config.api_mode));
        let mut bridge = Self::start_with(config, writer, frame_rx, store, cancel)?;
        bridge.reader_handle = Some(reader);
        Ok(bridge)
    }

    /// Start the bridge on an arbitrary frame source and sink.
    pub fn start<W: FrameWriter>(
        config: BridgeConfig,
        writer: W,
        frames: mpsc::Receiver<RawFrame>,
        store: Option<Arc<dyn DeviceStore>>,
    ) -> Result<Self> {
        Self::start_with(config, writer, frames, store, CancellationToken::new())
    }

    fn start_with<W: FrameWriter>(
        config: BridgeConfig,
        writer: W,
        frames: mpsc::Receiver<RawFrame>,
        store: Option<Arc<dyn DeviceStore>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut engine = Engine::new(&config)?;
        if let Some(store) = &store {
            match store.load() {
                Ok(Some(snapshot)) => engine.restore(snapshot),
                Ok(None) => {}
                Err(e) => error!("Ignoring unreadable status: {}", e),
            }
        }

        let (event_tx, _event_rx) = event_channel(config.event_capacity);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (writer, writer_handle) = spawn_writer(writer, COMMAND_QUEUE);

        let actor = Actor {
            engine,
            writer,
            events: event_tx.clone(),
            scheduler: JoinScheduler::new(),
            store,
            commands: command_tx.clone(),
            read_addresses: config.read_addresses_on_connect,
            watchdog_interval: config.watchdog_interval(),
        };
        let actor_handle = tokio::spawn(actor.run(frames, command_rx, cancel.clone()));

        info!("Bridge started");
        Ok(Self {
            commands: command_tx,
            event_tx,
            cancel,
            actor_handle: Some(actor_handle),
            reader_handle: None,
            writer_handle: Some(writer_handle),
        })
    }

    /// Subscribe to bridge events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        response.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Send a catalog message to a known device. Returns the frame id used.
    pub async fn send(&self, remote64: Addr64, kind: MessageKind, params: MessageParams) -> Result<u8> {
        self.request(|reply| Command::Send {
            remote64,
            kind,
            params,
            reply,
        })
        .await?
    }

    /// Build a catalog message without sending it.
    pub fn generate(&self, name: &str, params: &MessageParams) -> Result<ExplicitMessage> {
        protocol::generate(name, params)
    }

    /// Send a catalog message by name (`"switchStateRequest"`, `"modeChangeRequest"`, ...).
    pub async fn send_message(&self, name: &str, params: MessageParams, remote64: Addr64) -> Result<u8> {
        let kind: MessageKind = name.parse()?;
        self.send(remote64, kind, params).await
    }

    /// Open the network for joining.
    pub async fn permit_join(&self) -> Result<u8> {
        info!("Permitting joins");
        self.send(Addr64::BROADCAST_TX, MessageKind::PermitJoinRequest, MessageParams::default())
            .await
    }

    /// Write a frame as-is.
    pub async fn send_raw(&self, frame: OutboundFrame) -> Result<u8> {
        self.request(|reply| Command::SendRaw { frame, reply }).await?
    }

    /// Ask the radio for its own addresses (`MY`, `SH`, `SL`).
    pub async fn read_addresses(&self) -> Result<()> {
        self.request(|reply| Command::ReadAddresses { reply }).await?
    }

    /// Snapshot of all known devices.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.request(|reply| Command::Devices { reply }).await
    }

    pub async fn own_identity(&self) -> Result<OwnIdentity> {
        self.request(|reply| Command::OwnIdentity { reply }).await
    }

    /// Apply new names, offsets and timings without restarting.
    pub async fn reconfigure(&self, config: BridgeConfig) -> Result<()> {
        self.commands
            .send(Command::Reconfigure(Box::new(config)))
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Stop the bridge, cancelling pending join timers.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting bridge");
        self.cancel.cancel();
        if let Some(h) = self.actor_handle.take()
            && let Err(e) = h.await
        {
            warn!("Bridge task ended abnormally: {}", e);
        }
        if let Some(h) = self.reader_handle.take() {
            let _ = h.await;
        }
        if let Some(h) = self.writer_handle.take() {
            let _ = h.await;
        }
        Ok(())
    }
}

impl Drop for XBeeBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(h) = self.actor_handle.take() {
            h.abort();
        }
    }
}

/// State owned by the bridge task.
struct Actor {
    engine: Engine,
    writer: WriterHandle,
    events: EventSender,
    scheduler: JoinScheduler,
    store: Option<Arc<dyn DeviceStore>>,
    commands: mpsc::Sender<Command>,
    read_addresses: bool,
    watchdog_interval: Duration,
}

impl Actor {
    async fn run(
        mut self,
        mut frames: mpsc::Receiver<RawFrame>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        let _ = self.events.send(BridgeEvent::Connected);
        if self.read_addresses
            && let Err(e) = self.query_addresses().await
        {
            warn!("Failed to query own addresses: {}", e);
        }

        let mut watchdog = tokio::time::interval(self.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Bridge task cancelled");
                    break;
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        warn!("Frame source closed");
                        break;
                    };
                    let effects = self.engine.handle_frame(&frame, Utc::now());
                    self.apply(effects).await;
                }
                Some(command) = commands.recv() => self.handle_command(command).await,
                _ = watchdog.tick() => {
                    let effects = self.engine.tick(Utc::now());
                    self.apply(effects).await;
                }
            }
        }

        self.scheduler.shutdown();
        if let Some(store) = self.store.clone() {
            // Waited for, so the status is on disk before disconnect returns
            let snapshot = self.engine.snapshot();
            match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to save status: {}", e),
                Err(e) => error!("Status save task failed: {}", e),
            }
        }
        let _ = self.events.send(BridgeEvent::Disconnected);
        info!("Bridge stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                remote64,
                kind,
                params,
                reply,
            } => {
                let result = self.send(remote64, kind, &params).await;
                let _ = reply.send(result);
            }
            Command::SendRaw { frame, reply } => {
                let _ = reply.send(self.writer.send(frame).await);
            }
            Command::ReadAddresses { reply } => {
                let _ = reply.send(self.query_addresses().await);
            }
            Command::Devices { reply } => {
                let _ = reply.send(self.engine.devices());
            }
            Command::OwnIdentity { reply } => {
                let _ = reply.send(self.engine.own_identity().clone());
            }
            Command::Reconfigure(config) => {
                info!("Applying new configuration");
                self.engine.reconfigure(&config);
            }
            Command::Scheduled(send) => {
                debug!("Join timer fired: {} to {}", send.kind, send.remote64);
                if let Err(e) = self.send(send.remote64, send.kind, &send.params).await {
                    warn!("Scheduled {} to {} failed: {}", send.kind, send.remote64, e);
                }
            }
        }
    }

    async fn send(&mut self, remote64: Addr64, kind: MessageKind, params: &MessageParams) -> Result<u8> {
        let frame = self.engine.outbound(remote64, kind, params)?;
        debug!("Sending {} to {}", kind, remote64);
        self.writer.send(frame).await
    }

    async fn query_addresses(&mut self) -> Result<()> {
        for command in ["MY", "SH", "SL"] {
            self.writer.send(OutboundFrame::at_command(command)?).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Event(event) => {
                    // No subscribers is not an error
                    let _ = self.events.send(event);
                }
                Effect::Send { remote64, kind, params } => {
                    if let Err(e) = self.send(remote64, kind, &params).await {
                        warn!("Sending {} to {} failed: {}", kind, remote64, e);
                    }
                }
                Effect::Schedule(send) => {
                    let commands = self.commands.clone();
                    let remote64 = send.remote64;
                    let delay = send.delay;
                    self.scheduler.schedule(remote64, delay, async move {
                        let _ = commands.send(Command::Scheduled(send)).await;
                    });
                }
                Effect::CancelScheduled { remote64 } => self.scheduler.cancel(remote64),
                Effect::Persist => {
                    if let Some(store) = &self.store {
                        save_detached(store.clone(), self.engine.snapshot());
                    }
                }
            }
        }
    }
}
