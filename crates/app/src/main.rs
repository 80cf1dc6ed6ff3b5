use std::{
    net::Ipv4Addr,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use light_sync_core::{
    AppConfig, Arrival, Frame, LightSyncError, MulticastListener, SequenceTracker,
    SessionController, StartRequest, TrackSync, FRAME_LEN,
};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> light_sync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Beat { ip, tracks } => run_beat(config, &ip, &tracks, &shutdown_signal()?),
        Commands::Blink { ip, seconds } => run_preset(
            config,
            StartRequest::effect("blink"),
            &ip,
            seconds,
            &shutdown_signal()?,
        ),
        Commands::Color {
            ip,
            r,
            g,
            b,
            seconds,
        } => run_preset(
            config,
            StartRequest::color(r, g, b),
            &ip,
            seconds,
            &shutdown_signal()?,
        ),
        Commands::Listen { ip } => run_listen(&config, ip),
    }
}

/// How waiting on a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    /// The session went idle or the deadline passed.
    Finished,
    /// Ctrl+C or SIGTERM arrived.
    Interrupted,
}

fn run_beat(
    config: AppConfig,
    ip: &str,
    tracks: &[PathBuf],
    interrupt: &Receiver<()>,
) -> light_sync_core::Result<()> {
    let controller = SessionController::new(config);
    for path in tracks {
        controller.enqueue_track(TrackSync::from_json_path(path)?);
    }

    while !controller.status().queue.is_empty() {
        controller.start(StartRequest::Beat, ip)?;
        if wait_for_session(&controller, None, interrupt)? == Wait::Interrupted {
            controller.shutdown();
            return Ok(());
        }
    }

    tracing::info!("queue finished");
    Ok(())
}

fn run_preset(
    config: AppConfig,
    request: StartRequest,
    ip: &str,
    seconds: Option<u64>,
    interrupt: &Receiver<()>,
) -> light_sync_core::Result<()> {
    let controller = SessionController::new(config);
    controller.start(request, ip)?;

    let deadline = seconds.map(|secs| Instant::now() + Duration::from_secs(secs));
    let outcome = wait_for_session(&controller, deadline, interrupt);
    controller.shutdown();
    outcome.map(|_| ())
}

/// Polls the session until it goes idle, `deadline` passes or `interrupt`
/// disconnects. A latched session error is returned as
/// [`LightSyncError::Session`].
fn wait_for_session(
    controller: &SessionController,
    deadline: Option<Instant>,
    interrupt: &Receiver<()>,
) -> light_sync_core::Result<Wait> {
    loop {
        if let Err(RecvTimeoutError::Disconnected) = interrupt.recv_timeout(POLL_INTERVAL) {
            tracing::info!("interrupted, stopping session");
            return Ok(Wait::Interrupted);
        }
        let status = controller.status();
        if let Some(error) = status.last_error {
            tracing::error!(kind = ?error.kind, "{}", error.message);
            return Err(LightSyncError::Session(error));
        }
        if !status.active || deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Ok(Wait::Finished);
        }
    }
}

/// Watches for Ctrl+C (and SIGTERM on unix) on a background thread. The
/// returned channel disconnects once a signal arrives.
fn shutdown_signal() -> light_sync_core::Result<Receiver<()>> {
    let (notify, interrupt) = bounded::<()>(0);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("light-sync-signals".into())
        .spawn(move || {
            runtime.block_on(async {
                let ctrl_c = async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %err, "cannot listen for Ctrl+C");
                        std::future::pending::<()>().await;
                    }
                };

                #[cfg(unix)]
                let terminate = async {
                    use tokio::signal::unix::{signal, SignalKind};
                    match signal(SignalKind::terminate()) {
                        Ok(mut stream) => {
                            stream.recv().await;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "cannot listen for SIGTERM");
                            std::future::pending::<()>().await;
                        }
                    }
                };

                #[cfg(not(unix))]
                let terminate = std::future::pending::<()>();

                tokio::select! {
                    _ = ctrl_c => {},
                    _ = terminate => {},
                }
            });
            drop(notify);
        })?;

    Ok(interrupt)
}

fn run_listen(config: &AppConfig, ip: Ipv4Addr) -> light_sync_core::Result<()> {
    let listener = MulticastListener::join(ip, &config.network)?;
    let mut tracker = SequenceTracker::new();
    let mut buf = [0u8; 64];

    loop {
        let (len, from) = listener.recv(&mut buf)?;
        let frame = match Frame::decode(&buf[..len]) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%from, len, expected = FRAME_LEN, error = %err, "ignoring datagram");
                continue;
            }
        };

        let Frame {
            command,
            color,
            packet_id,
        } = frame;
        match tracker.observe(packet_id) {
            Arrival::First | Arrival::InOrder => {}
            Arrival::Gap { missed } => tracing::warn!(packet_id, missed, "packets lost"),
            Arrival::Stale => tracing::warn!(packet_id, "duplicate or reordered packet"),
        }
        tracing::info!(%from, packet_id, ?command, r = color.r, g = color.g, b = color.b, "frame");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives a multicast lighting rig from analysed music", long_about = None)]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play analysed tracks back to back, one beat session per track.
    Beat {
        /// Local interface address to send from.
        #[arg(long)]
        ip: String,
        /// Analysed track files (JSON with filename, beats and tempo).
        #[arg(required = true)]
        tracks: Vec<PathBuf>,
    },
    /// Run the blink preset effect.
    Blink {
        #[arg(long)]
        ip: String,
        /// Stop after this many seconds instead of running until killed.
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Hold a static colour.
    Color {
        #[arg(long)]
        ip: String,
        r: i64,
        g: i64,
        b: i64,
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Join the multicast group and log received frames.
    Listen {
        /// Local interface address to join the group on.
        #[arg(long)]
        ip: Ipv4Addr,
    },
}
