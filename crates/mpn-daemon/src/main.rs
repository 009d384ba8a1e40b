mod assets;
mod core;
mod error;
mod glyphs;
mod mpd;
mod notify;
mod opts;
mod reconnect;

use std::path::{Path, PathBuf};

use clap::Parser;
use mpn_proto::config::Config;
use mpn_proto::platform::{self, MpdAddress};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::{NotifierCore, Settings};
use crate::mpd::MpdClient;
use crate::notify::{DesktopNotifier, UiEvent};
use crate::reconnect::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForkResult {
    Parent,
    Child,
}

fn main() -> anyhow::Result<()> {
    let opts = opts::Opts::parse();
    if opts.show_defaults {
        print!("{}", Config::default().to_toml()?);
        return Ok(());
    }

    let config_path = opts.config.clone().unwrap_or_else(Config::config_path);
    let config = opts.apply(Config::load_from(&config_path)?);

    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("mpn.log");

    // --debug keeps the process in the foreground.
    let detach = config.daemon.detach && !config.daemon.debug;
    if detach {
        eprintln!("mpn: logging to {}", log_path.display());
        if do_detach(&log_path)? == ForkResult::Parent {
            return Ok(());
        }
    }
    init_logging(config.daemon.debug, detach.then_some(log_path.as_path()))?;
    info!("Config loaded from: {:?}", config_path);

    let code = {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(run(config, config_path))?
    };
    std::process::exit(code);
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
    Ok(())
}

/// Fork twice so the daemon is reparented and has no controlling terminal,
/// then point stdout and stderr at the log file.
fn do_detach(log_file_path: &Path) -> anyhow::Result<ForkResult> {
    use std::os::unix::io::AsRawFd;

    match unsafe { nix::unistd::fork()? } {
        nix::unistd::ForkResult::Child => {
            nix::unistd::setsid()?;
            match unsafe { nix::unistd::fork()? } {
                nix::unistd::ForkResult::Parent { .. } => std::process::exit(0),
                nix::unistd::ForkResult::Child => {}
            }
        }
        nix::unistd::ForkResult::Parent { .. } => {
            return Ok(ForkResult::Parent);
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;
    let fd = file.as_raw_fd();
    nix::unistd::dup2(fd, std::io::stdout().as_raw_fd())?;
    nix::unistd::dup2(fd, std::io::stderr().as_raw_fd())?;

    Ok(ForkResult::Child)
}

async fn run(config: Config, config_path: PathBuf) -> anyhow::Result<i32> {
    let address = MpdAddress::from_env();
    info!("Server: {}", address.socket_address());

    let shutdown = CancellationToken::new();
    // All external inputs funnel into the core through this channel.
    let (event_tx, event_rx) = mpsc::channel::<UiEvent>(32);

    spawn_signal_listener(
        shutdown.clone(),
        event_tx.clone(),
        !config.daemon.once,
        config_path,
    )?;

    let sink = DesktopNotifier::connect(&config, &platform::cache_dir(), event_tx).await;

    let mut core = NotifierCore::new(
        Settings::from_config(&config),
        MpdClient::new(address),
        sink,
        ReconnectPolicy::new(config.connection.persist),
        event_rx,
        shutdown,
    )?;
    Ok(core.run().await)
}

/// SIGINT/SIGTERM shut down, SIGUSR1 re-shows the popup and SIGHUP re-reads
/// the tray icon size from the config file.
fn spawn_signal_listener(
    shutdown: CancellationToken,
    events: mpsc::Sender<UiEvent>,
    persistent: bool,
    config_path: PathBuf,
) -> anyhow::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = interrupt.recv() => None,
                _ = terminate.recv() => None,
                _ = user1.recv() => Some(UiEvent::Activate),
                _ = hangup.recv() => match Config::load_from(&config_path) {
                    Ok(reloaded) => Some(UiEvent::TraySizeChanged(reloaded.status_icon.size)),
                    Err(e) => {
                        warn!("signal: cannot reload {:?}: {}", config_path, e);
                        continue;
                    }
                },
            };
            match event {
                None => {
                    info!("signal: shutting down");
                    shutdown.cancel();
                    break;
                }
                Some(UiEvent::Activate) if !persistent => {
                    debug!("signal: activate ignored in one-shot mode");
                }
                Some(event) => {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    Ok(())
}
