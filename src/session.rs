//! Session actor that owns the monitor
//!
//! One tokio task owns all derived state; everything else talks to it over
//! channels. The task drains the transfer queue in small batches on a fixed
//! tick, applies the slow-moving readings from the ingestor's watch channel,
//! reacts to link lifecycle events, and answers commands carrying oneshot
//! reply channels. Connection teardown happens inside a single actor turn so
//! readers never observe a half-cleared session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::device::{self, DeviceCommand, LinkChange, LinkEvent};
use crate::dsp::{DEFAULT_MAX_POINTS, HrvSeries};
use crate::ingest::{SampleIngestor, ScalarReadings};
use crate::monitor::Monitor;
use crate::protocol::{DeviceStatus, LinkState, Snapshot, ViewMode};
use crate::transfer::{DEFAULT_QUEUE_CAPACITY, TransferQueue};

/// Pacing and sizing for the session task
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Drain cadence in milliseconds
    pub tick_interval_ms: u64,
    /// Samples consumed per tick; the cadence deliberately never catches up
    /// in bursts, the queue absorbs them instead
    pub tick_batch: usize,
    /// Retained points per waveform trace
    pub max_points: usize,
    /// Transfer queue capacity in samples
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5,
            tick_batch: 2,
            max_points: DEFAULT_MAX_POINTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session task is gone")]
    Closed,
    #[error("{0}")]
    Rejected(String),
}

/// Answer to a status query
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub link: LinkState,
    pub host: Option<String>,
    pub device: Option<DeviceStatus>,
    pub mode: ViewMode,
    pub uptime_seconds: u64,
    pub samples_seen: u64,
    pub samples_dropped: u64,
    pub beats: u64,
}

enum Command {
    Waveform {
        mode: Option<ViewMode>,
        count: usize,
        reply: oneshot::Sender<(ViewMode, Vec<f32>)>,
    },
    Spectrum {
        size: usize,
        reply: oneshot::Sender<Vec<f32>>,
    },
    Hrv {
        reply: oneshot::Sender<HrvSeries>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    SetMode {
        mode: ViewMode,
        reply: oneshot::Sender<()>,
    },
    SetRate {
        hz: u32,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Connect {
        host: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for talking to the session task
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn ask<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    /// The most recent waveform points; `mode` defaults to the active one
    pub async fn waveform(
        &self,
        mode: Option<ViewMode>,
        count: usize,
    ) -> Result<(ViewMode, Vec<f32>), SessionError> {
        self.ask(|reply| Command::Waveform { mode, count, reply }).await
    }

    /// Spectrum magnitudes over the raw trace; `size` must be a power of two
    pub async fn spectrum(&self, size: usize) -> Result<Vec<f32>, SessionError> {
        self.ask(|reply| Command::Spectrum { size, reply }).await
    }

    pub async fn hrv(&self) -> Result<HrvSeries, SessionError> {
        self.ask(|reply| Command::Hrv { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.ask(|reply| Command::Status { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, SessionError> {
        self.ask(|reply| Command::Snapshot { reply }).await
    }

    pub async fn set_mode(&self, mode: ViewMode) -> Result<(), SessionError> {
        self.ask(|reply| Command::SetMode { mode, reply }).await
    }

    /// Forward a sampling-rate change to the device
    pub async fn set_rate(&self, hz: u32) -> Result<(), SessionError> {
        self.ask(|reply| Command::SetRate { hz, reply })
            .await?
            .map_err(SessionError::Rejected)
    }

    /// Clear the waveform history and detector state; the link stays up
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.ask(|reply| Command::Reset { reply }).await
    }

    /// Open a link to the sensor at `host`, replacing any active link
    pub async fn connect(&self, host: String) -> Result<(), SessionError> {
        self.ask(|reply| Command::Connect { host, reply })
            .await?
            .map_err(SessionError::Rejected)
    }

    /// Tear down the active link and clear the session state
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.ask(|reply| Command::Disconnect { reply }).await
    }
}

struct ActiveLink {
    generation: u64,
    host: Option<String>,
    commands: Option<mpsc::Sender<DeviceCommand>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Session {
    config: SessionConfig,
    monitor: Monitor,
    queue: Arc<TransferQueue>,
    ingestor: Arc<SampleIngestor>,
    readings: watch::Receiver<ScalarReadings>,
    commands: mpsc::Receiver<Command>,
    link_events: mpsc::Receiver<LinkEvent>,
    link_events_tx: mpsc::Sender<LinkEvent>,
    device_status: Arc<watch::Sender<Option<DeviceStatus>>>,
    device_status_rx: watch::Receiver<Option<DeviceStatus>>,
    link: Option<ActiveLink>,
    link_state: LinkState,
    device: Option<DeviceStatus>,
    generation: u64,
    /// Replay sessions keep their input; connect commands are rejected
    fixed_link: bool,
    started: Instant,
}

impl Session {
    /// Spawn a session with no device link; clients connect one later
    pub fn spawn(config: SessionConfig) -> SessionHandle {
        let (session, handle) = Session::new(config);
        tokio::spawn(session.run());
        handle
    }

    /// Spawn a session fed by an NDJSON reader instead of a device
    pub fn spawn_with_reader<R>(config: SessionConfig, reader: R) -> SessionHandle
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (mut session, handle) = Session::new(config);
        session.fixed_link = true;
        session.generation += 1;
        let task = device::spawn_reader_link(
            reader,
            session.generation,
            Arc::clone(&session.ingestor),
            session.link_events_tx.clone(),
        );
        session.link = Some(ActiveLink {
            generation: session.generation,
            host: None,
            commands: None,
            tasks: vec![task],
        });
        tokio::spawn(session.run());
        handle
    }

    fn new(config: SessionConfig) -> (Self, SessionHandle) {
        let queue = Arc::new(TransferQueue::new(config.queue_capacity));
        let (ingestor, readings) = SampleIngestor::new(Arc::clone(&queue));
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (link_events_tx, link_events_rx) = mpsc::channel(16);
        let (device_status_tx, device_status_rx) = watch::channel(None);

        let session = Self {
            monitor: Monitor::new(config.max_points),
            config,
            queue,
            ingestor: Arc::new(ingestor),
            readings,
            commands: commands_rx,
            link_events: link_events_rx,
            link_events_tx,
            device_status: Arc::new(device_status_tx),
            device_status_rx,
            link: None,
            link_state: LinkState::Closed,
            device: None,
            generation: 0,
            fixed_link: false,
            started: Instant::now(),
        };
        (session, SessionHandle { commands: commands_tx })
    }

    pub async fn run(mut self) {
        info!(
            "session started (tick {}ms, batch {}, {} points)",
            self.config.tick_interval_ms, self.config.tick_batch, self.config.max_points
        );

        let mut tick = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick(),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone, nothing can reach us anymore
                    None => break,
                },
                Some(event) = self.link_events.recv() => self.on_link_event(event),
            }
        }

        self.teardown_link().await;
        info!("session stopped");
    }

    /// Monotonic milliseconds since session start
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn on_tick(&mut self) {
        let now_ms = self.elapsed_ms();
        let batch = self.queue.drain(self.config.tick_batch);
        if !batch.is_empty() {
            self.monitor.push(&batch, now_ms);
        }

        if self.readings.has_changed().unwrap_or(false) {
            let readings = *self.readings.borrow_and_update();
            self.monitor.apply_readings(readings);
        }
        if self.device_status_rx.has_changed().unwrap_or(false) {
            self.device = self.device_status_rx.borrow_and_update().clone();
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Waveform { mode, count, reply } => {
                let mode = mode.unwrap_or_else(|| self.monitor.mode());
                let _ = reply.send((mode, self.monitor.waveform(mode, count)));
            }
            Command::Spectrum { size, reply } => {
                let _ = reply.send(self.monitor.spectrum(size));
            }
            Command::Hrv { reply } => {
                let _ = reply.send(self.monitor.hrv());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::SetMode { mode, reply } => {
                self.monitor.set_mode(mode);
                let _ = reply.send(());
            }
            Command::SetRate { hz, reply } => {
                let _ = reply.send(self.set_rate(hz));
            }
            Command::Reset { reply } => {
                self.reset();
                let _ = reply.send(());
            }
            Command::Connect { host, reply } => {
                let _ = reply.send(self.connect(host).await);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        let Some(link) = &self.link else {
            return;
        };
        if event.generation != link.generation {
            // Straggler from a link already torn down
            return;
        }
        match event.change {
            LinkChange::Opened => {
                info!("device link is up");
                self.link_state = LinkState::Open;
            }
            LinkChange::Closed => {
                info!("device link closed");
                self.link_state = LinkState::Closed;
            }
            LinkChange::Failed(reason) => {
                warn!("device link failed: {}", reason);
                self.link_state = LinkState::Error;
            }
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            link: self.link_state,
            host: self.link.as_ref().and_then(|link| link.host.clone()),
            device: self.device.clone(),
            mode: self.monitor.mode(),
            uptime_seconds: self.started.elapsed().as_secs(),
            samples_seen: self.monitor.samples_seen(),
            samples_dropped: self.queue.dropped(),
            beats: self.monitor.beat_count(),
        }
    }

    fn snapshot(&self) -> Snapshot {
        let readings = self.monitor.readings();
        Snapshot {
            link: self.link_state,
            mode: self.monitor.mode(),
            heartbeat: readings.heartbeat,
            bpm: self.monitor.detected_bpm(),
            temperature: readings.temperature,
            finger: readings.finger,
            beats: self.monitor.beat_count(),
            ibi_ms: self.monitor.latest_interval(),
            device: self.device.clone(),
            ts: self.elapsed_ms(),
        }
    }

    fn set_rate(&self, hz: u32) -> Result<(), String> {
        let Some(link) = &self.link else {
            return Err("no device link".to_string());
        };
        let Some(commands) = &link.commands else {
            return Err("active link does not take commands".to_string());
        };
        commands.try_send(DeviceCommand::SetRate(hz)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "device link is busy".to_string(),
            mpsc::error::TrySendError::Closed(_) => "device link is gone".to_string(),
        })
    }

    /// Clear all derived state; pending samples and published readings go too
    fn reset(&mut self) {
        self.queue.clear();
        self.ingestor.clear();
        self.monitor.reset();
        info!("monitor state cleared");
    }

    async fn connect(&mut self, host: String) -> Result<(), String> {
        if self.fixed_link {
            return Err("replay input is fixed for this session".to_string());
        }

        self.disconnect().await;
        self.generation += 1;

        let (device_commands, device_commands_rx) = mpsc::channel(8);
        let ws = device::spawn_ws_link(
            host.clone(),
            self.generation,
            Arc::clone(&self.ingestor),
            self.link_events_tx.clone(),
            device_commands_rx,
        );
        let poller = device::spawn_status_poller(host.clone(), Arc::clone(&self.device_status));

        self.link = Some(ActiveLink {
            generation: self.generation,
            host: Some(host),
            commands: Some(device_commands),
            tasks: vec![ws, poller],
        });
        Ok(())
    }

    /// Tear down the link and clear every reading in one actor turn, so no
    /// request can observe a half-cleared session
    async fn disconnect(&mut self) {
        self.teardown_link().await;
        self.queue.clear();
        self.ingestor.clear();
        self.monitor.reset();
        self.device = None;
        let _ = self.device_status.send(None);
        self.link_state = LinkState::Closed;
    }

    async fn teardown_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        info!(
            "tearing down device link, {} samples queued so far ({} dropped)",
            self.queue.pushed(),
            self.queue.dropped()
        );
        // Retire the generation so stragglers from these tasks are ignored
        self.generation += 1;
        for task in &link.tasks {
            task.abort();
        }
        for task in link.tasks {
            let _ = task.await;
        }
    }
}
