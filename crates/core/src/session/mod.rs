//! Session state machine gatekeeping which scheduler, if any, is running.
//!
//! At most one session is active at a time. [`SessionController::start`]
//! validates the request and spawns the scheduler thread without waiting for
//! it; [`SessionController::stop`] cancels it and waits a bounded time for the
//! thread to exit. A scheduler that ends on its own (all beats sent, socket or
//! send failure) returns the session to idle itself, latching any error for
//! the next [`SessionController::status`] call.

use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    color::{HueSource, RandomHue},
    network::{ChannelFactory, MulticastFactory},
    protocol::PacketCounter,
    queue::{QueuedTrack, TrackQueue},
    scheduler::{
        cancel_pair, BeatScheduler, BeatTiming, CancelHandle, CancelToken, Effect,
        EffectScheduler, Exit, Scheduler, StaticScheduler, Transmitter,
    },
    AppConfig, ErrorInfo, LightSyncError, Result, Rgb, TrackSync,
};

/// Builds the hue source for each beat session.
pub type HueFactory = fn() -> Box<dyn HueSource>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Idle,
    Beat,
    Blink,
    Static,
}

impl From<Effect> for SessionMode {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Blink => SessionMode::Blink,
        }
    }
}

/// What to run when a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRequest {
    /// Play the track at the head of the queue.
    Beat,
    /// Run a named preset effect.
    Effect { name: String },
    /// Hold a colour. Components must be within `0..=255`.
    Static { r: i64, g: i64, b: i64 },
}

impl StartRequest {
    pub fn effect(name: impl Into<String>) -> Self {
        Self::Effect { name: name.into() }
    }

    pub fn color(r: i64, g: i64, b: i64) -> Self {
        Self::Static { r, g, b }
    }
}

/// The single session record. Fields that change together are only ever
/// written under one lock.
#[derive(Debug, Default)]
pub struct SessionState {
    mode: SessionMode,
    bound_ip: Option<Ipv4Addr>,
    current_file: Option<String>,
    last_error: Option<ErrorInfo>,
    /// Bumped on every start and stop; schedulers from older generations
    /// leave the state alone.
    generation: u64,
}

impl SessionState {
    fn reset_idle(&mut self) {
        self.mode = SessionMode::Idle;
        self.current_file = None;
    }
}

/// Point-in-time view returned by [`SessionController::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub active: bool,
    pub mode: SessionMode,
    pub current_file: Option<String>,
    pub queue: Vec<QueuedTrack>,
    pub bound_ip: Option<Ipv4Addr>,
    pub last_error: Option<ErrorInfo>,
}

/// Handles to the running scheduler thread.
struct Worker {
    cancel: CancelHandle,
    /// Disconnects when the scheduler thread exits.
    done: Receiver<()>,
    generation: u64,
}

enum Plan {
    Beat,
    Effect(Effect),
    Static(Rgb),
}

impl Plan {
    fn mode(&self) -> SessionMode {
        match self {
            Plan::Beat => SessionMode::Beat,
            Plan::Effect(effect) => SessionMode::from(*effect),
            Plan::Static(_) => SessionMode::Static,
        }
    }
}

pub struct SessionController {
    config: AppConfig,
    state: Arc<Mutex<SessionState>>,
    queue: Mutex<TrackQueue>,
    worker: Mutex<Option<Worker>>,
    channels: Arc<dyn ChannelFactory>,
    counter: Arc<PacketCounter>,
    hues: HueFactory,
}

impl SessionController {
    /// Controller sending real multicast frames with random beat hues.
    pub fn new(config: AppConfig) -> Self {
        let channels = Arc::new(MulticastFactory::new(&config.network));
        Self::with_channels(config, channels)
    }

    /// Controller using a custom channel factory.
    pub fn with_channels(config: AppConfig, channels: Arc<dyn ChannelFactory>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SessionState::default())),
            queue: Mutex::new(TrackQueue::new()),
            worker: Mutex::new(None),
            channels,
            counter: PacketCounter::global(),
            hues: random_hue,
        }
    }

    pub fn with_hue_source(mut self, hues: HueFactory) -> Self {
        self.hues = hues;
        self
    }

    pub fn with_counter(mut self, counter: Arc<PacketCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Starts a session bound to the local interface `ip`. Returns as soon as
    /// the scheduler thread is launched.
    pub fn start(&self, request: StartRequest, ip: &str) -> Result<()> {
        let interface = parse_interface(ip)?;
        let plan = match request {
            StartRequest::Beat => Plan::Beat,
            StartRequest::Effect { name } => Plan::Effect(name.parse()?),
            StartRequest::Static { r, g, b } => {
                let color = Rgb::from_components(r, g, b).ok_or_else(|| {
                    LightSyncError::invalid(format!("colour ({r}, {g}, {b}) is outside 0..=255"))
                })?;
                Plan::Static(color)
            }
        };

        let mut worker = lock(&self.worker);
        if self.mode() != SessionMode::Idle {
            return Err(LightSyncError::Busy);
        }
        if matches!(plan, Plan::Beat) && lock(&self.queue).is_empty() {
            return Err(LightSyncError::EmptyQueue);
        }

        self.stop_worker(&mut worker);
        thread::sleep(self.config.timing.settle());

        let mode = plan.mode();
        let timing = &self.config.timing;
        let (scheduler, current_file): (Box<dyn Scheduler>, Option<String>) = match plan {
            Plan::Beat => {
                let track = lock(&self.queue)
                    .dequeue()
                    .ok_or(LightSyncError::EmptyQueue)?;
                let filename = track.filename.clone();
                let scheduler =
                    BeatScheduler::new(track, (self.hues)(), BeatTiming::from(timing));
                (Box::new(scheduler), Some(filename))
            }
            Plan::Effect(effect) => (
                Box::new(EffectScheduler::new(effect, timing.blink_interval())),
                None,
            ),
            Plan::Static(color) => (
                Box::new(StaticScheduler::new(color, timing.keep_alive())),
                None,
            ),
        };

        let generation = {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.mode = mode;
            state.bound_ip = Some(interface);
            state.current_file = current_file.clone();
            state.last_error = None;
            state.generation
        };

        match self.spawn(scheduler, interface, generation) {
            Ok(spawned) => {
                *worker = Some(spawned);
                info!(?mode, %interface, file = current_file.as_deref(), "session started");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to spawn scheduler thread");
                lock(&self.state).reset_idle();
                Err(err)
            }
        }
    }

    fn spawn(
        &self,
        mut scheduler: Box<dyn Scheduler>,
        interface: Ipv4Addr,
        generation: u64,
    ) -> Result<Worker> {
        let (cancel, token) = cancel_pair();
        let (done_tx, done) = bounded::<()>(0);
        let state = Arc::clone(&self.state);
        let channels = Arc::clone(&self.channels);
        let counter = Arc::clone(&self.counter);

        thread::Builder::new()
            .name(format!("light-sync-{}", scheduler.name()))
            .spawn(move || {
                let _done = done_tx;
                let outcome = run_session(
                    scheduler.as_mut(),
                    channels.as_ref(),
                    interface,
                    counter,
                    &token,
                );
                finish_session(&state, generation, scheduler.name(), outcome);
            })?;

        Ok(Worker {
            cancel,
            done,
            generation,
        })
    }

    /// Stops the active session, if any. Always succeeds.
    pub fn stop(&self) {
        let mut worker = lock(&self.worker);
        self.stop_worker(&mut worker);
    }

    fn stop_worker(&self, slot: &mut Option<Worker>) {
        if let Some(mut worker) = slot.take() {
            debug!(generation = worker.generation, "cancelling scheduler");
            worker.cancel.cancel();
            let timeout = self.config.timing.join_timeout();
            if let Err(RecvTimeoutError::Timeout) = worker.done.recv_timeout(timeout) {
                warn!(
                    generation = worker.generation,
                    ?timeout,
                    "scheduler did not exit in time, resetting session anyway"
                );
            }
        }

        let mut state = lock(&self.state);
        if state.mode != SessionMode::Idle {
            info!(mode = ?state.mode, "session stopped");
        }
        state.generation += 1;
        state.reset_idle();
    }

    /// Stops any session. Also runs when the controller is dropped.
    pub fn shutdown(&self) {
        info!("shutting down dispatcher");
        self.stop();
    }

    /// Reports the session and queue. Any latched error is returned once and
    /// then cleared.
    pub fn status(&self) -> StatusSnapshot {
        let queue = lock(&self.queue).summary();
        let mut state = lock(&self.state);
        StatusSnapshot {
            active: state.mode != SessionMode::Idle,
            mode: state.mode,
            current_file: state.current_file.clone(),
            queue,
            bound_ip: state.bound_ip,
            last_error: state.last_error.take(),
        }
    }

    /// Current mode, without consuming the latched error.
    pub fn mode(&self) -> SessionMode {
        lock(&self.state).mode
    }

    pub fn is_active(&self) -> bool {
        self.mode() != SessionMode::Idle
    }

    pub fn enqueue_track(&self, track: TrackSync) {
        lock(&self.queue).enqueue(track);
    }

    /// Removes every queued track named `filename`. Returns whether anything
    /// was removed.
    pub fn remove_from_queue(&self, filename: &str) -> Result<bool> {
        if filename.trim().is_empty() {
            return Err(LightSyncError::invalid("filename is empty"));
        }
        let removed = lock(&self.queue).remove(filename);
        if removed == 0 {
            warn!(filename, "track not in queue");
        } else {
            info!(filename, removed, "removed from queue");
        }
        Ok(removed > 0)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.is_active() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &self.config)
            .field("mode", &self.mode())
            .finish()
    }
}

fn random_hue() -> Box<dyn HueSource> {
    Box::new(RandomHue::new())
}

/// Opens the session's channel and drives the scheduler. The channel is
/// dropped, closing the socket, on every return path.
fn run_session(
    scheduler: &mut dyn Scheduler,
    channels: &dyn ChannelFactory,
    interface: Ipv4Addr,
    counter: Arc<PacketCounter>,
    cancel: &CancelToken,
) -> Result<Exit> {
    let sink = channels.open(interface)?;
    let mut tx = Transmitter::new(sink, counter);
    scheduler.run(&mut tx, cancel)
}

fn finish_session(
    state: &Mutex<SessionState>,
    generation: u64,
    name: &str,
    outcome: Result<Exit>,
) {
    match &outcome {
        Ok(Exit::Cancelled) => {
            debug!(scheduler = name, "scheduler cancelled");
            return;
        }
        Ok(Exit::Completed) => info!(scheduler = name, "session completed"),
        Err(err) => error!(scheduler = name, error = %err, "session aborted"),
    }

    let mut state = lock(state);
    if state.generation != generation {
        warn!(scheduler = name, "scheduler outlived its session, leaving state untouched");
        return;
    }
    if let Err(err) = &outcome {
        state.last_error = Some(ErrorInfo::from(err));
    }
    state.reset_idle();
}

fn parse_interface(ip: &str) -> Result<Ipv4Addr> {
    let ip = ip.trim();
    if ip.is_empty() {
        return Err(LightSyncError::invalid("interface IP is empty"));
    }
    ip.parse()
        .map_err(|_| LightSyncError::invalid(format!("`{ip}` is not an IPv4 address")))
}

/// Every guarded value stays consistent across a panic, so poisoning is
/// ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
