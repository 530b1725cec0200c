//! lsswitchd — LocalSend switchboard daemon.
//!
//! Relays LocalSend discovery between subnets: captures local multicast
//! announces, exchanges them with peer switchboards over TCP, and registers
//! remote clients with the local LocalSend instance over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use lsswitch_core::cipher::PayloadCipher;
use lsswitch_core::config::{
    SwitchSettings, DEFAULT_CLIENT_ALIVE_CHECK_INTERVAL_SECS,
    DEFAULT_CLIENT_BROADCAST_INTERVAL_SECS, DEFAULT_PEER_CONNECT_MAX_RETRIES,
    LOCALSEND_DEFAULT_MULTICAST_V4, LOCALSEND_DEFAULT_PORT, MULTICAST_CHAN_SIZE,
    SHUTDOWN_WIND_DOWN, SWITCH_DATA_CHAN_SIZE,
};
use lsswitch_core::net::{generate_switch_id, interface_for_ip, outbound_ip};
use lsswitch_services::{ConnectionHub, HttpPool, LocalClientLounge, SwitchLounge};

use lsswitchd::logging::RotatingWriter;
use lsswitchd::{autostart, link, multicast, paths, relay};

#[derive(Parser, Debug)]
#[command(
    name = "lsswitchd",
    version,
    about = "Bridges LocalSend discovery across subnets"
)]
struct Cli {
    /// Address of a peer switchboard node
    #[arg(long, env = "LOCALSEND_SWITCH_PEER_ADDR")]
    peer_addr: Option<String>,

    /// Peer switchboard port (defaults to the service port)
    #[arg(long, env = "LOCALSEND_SWITCH_PEER_PORT")]
    peer_port: Option<u16>,

    /// Local TCP service port (defaults to the peer port)
    #[arg(long, env = "LOCALSEND_SWITCH_SERV_PORT")]
    serv_port: Option<u16>,

    /// LocalSend multicast group address
    #[arg(long, env = "LOCALSEND_MULTICAST_ADDR", default_value = LOCALSEND_DEFAULT_MULTICAST_V4)]
    ls_addr: std::net::IpAddr,

    /// LocalSend multicast / HTTP port
    #[arg(long, env = "LOCALSEND_SERVER_PORT", default_value_t = LOCALSEND_DEFAULT_PORT)]
    ls_port: u16,

    /// Enable debug logging (also via LOCALSEND_SWITCH_LOG_DEBUG=1)
    #[arg(long)]
    debug: bool,

    /// Seconds between proactive broadcasts of local clients to peers
    #[arg(
        long,
        env = "LOCALSEND_SWITCH_CLIENT_BROADCAST_INTERVAL",
        default_value_t = DEFAULT_CLIENT_BROADCAST_INTERVAL_SECS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    client_broadcast_interval: u32,

    /// Seconds between local client aliveness probes
    #[arg(
        long,
        env = "LOCALSEND_SWITCH_CLIENT_ALIVE_CHECK_INTERVAL",
        default_value_t = DEFAULT_CLIENT_ALIVE_CHECK_INTERVAL_SECS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    client_alive_check_interval: u32,

    /// Log file path
    #[arg(
        long,
        env = "LOCALSEND_SWITCH_LOG_FILE_PATH",
        default_value = "localsend-switch-logs/latest.log"
    )]
    log_file: PathBuf,

    /// Log file size in bytes before rotation
    #[arg(
        long,
        env = "LOCALSEND_SWITCH_LOG_FILE_MAX_SIZE",
        default_value_t = 5 * 1024 * 1024,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    log_file_max_size: u64,

    /// Historical log files to keep
    #[arg(
        long,
        env = "LOCALSEND_SWITCH_LOG_FILE_MAX_HISTORICAL",
        default_value_t = 5
    )]
    log_file_max_historical: usize,

    /// Dial retries before giving up on the peer (negative = unlimited)
    #[arg(
        long,
        env = "LOCALSEND_SWITCH_PEER_CONNECT_MAX_RETRIES",
        default_value_t = DEFAULT_PEER_CONNECT_MAX_RETRIES
    )]
    peer_connect_max_retries: i32,

    /// Working directory (defaults to the executable's directory)
    #[arg(long, env = "LOCALSEND_SWITCH_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Configure launch-on-login, then exit
    #[arg(long, value_enum)]
    autostart: Option<AutostartAction>,

    /// Shared secret enabling peer payload encryption (empty = disabled)
    #[arg(long, env = "LOCALSEND_SWITCH_DATA_SECRET", hide_env_values = true, default_value = "")]
    secret: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum AutostartAction {
    Enable,
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let debug = cli.debug
        || std::env::var("LOCALSEND_SWITCH_LOG_DEBUG")
            .map(|v| v == "1")
            .unwrap_or(false);

    // Run relative to the binary unless told otherwise, so the default log
    // directory lands next to it.
    let work_dir = match &cli.work_dir {
        Some(dir) => dir.clone(),
        None => paths::executable_dir().context("failed to resolve executable directory")?,
    };
    std::env::set_current_dir(&work_dir)
        .with_context(|| format!("failed to change working directory to {}", work_dir.display()))?;

    let file_writer = RotatingWriter::new(
        &cli.log_file,
        cli.log_file_max_size,
        cli.log_file_max_historical,
    )
    .context("failed to set up log file writer")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(if debug { "debug" } else { "info" }))
        .with_writer(std::io::stdout.and(file_writer))
        .with_ansi(false)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "LocalSend switchboard starting");
    tracing::info!(dir = %work_dir.display(), "working directory");

    if let Some(action) = cli.autostart {
        let enable = matches!(action, AutostartAction::Enable);
        autostart::set_autostart(enable).context("failed to update autostart configuration")?;
        tracing::info!(enabled = enable, "autostart configuration updated");
        return Ok(());
    }

    let settings = SwitchSettings::new(
        cli.client_broadcast_interval,
        cli.client_alive_check_interval,
        cli.peer_connect_max_retries,
    );
    tracing::debug!(?settings, "runtime settings");

    // Each port defaults to the other; with neither, the node is
    // multicast-only.
    let serv_port = cli.serv_port.or(cli.peer_port);
    let peer_port = cli.peer_port.or(cli.serv_port);
    if serv_port.is_none() {
        tracing::warn!("no peer or service port provided, only the multicast listener will run");
    }

    let self_ip = outbound_ip().context("failed to determine outbound IP address")?;
    let interface = interface_for_ip(self_ip)
        .context("failed to enumerate network interfaces")?
        .with_context(|| format!("no network interface found for IP {self_ip}"))?;
    tracing::info!(ip = %self_ip, interface = %interface.name, "outbound network selected");

    let node_id = generate_switch_id();
    tracing::info!(%node_id, "switch node ID");

    let cipher = Arc::new(PayloadCipher::new(&cli.secret).context("failed to initialise payload cipher")?);
    if cipher.is_enabled() {
        tracing::info!("peer payload encryption enabled");
    }

    let shutdown = CancellationToken::new();
    let (err_tx, mut err_rx) = mpsc::channel::<anyhow::Error>(8);
    let (multicast_tx, multicast_rx) = mpsc::channel(MULTICAST_CHAN_SIZE);
    let (peer_tx, peer_rx) = mpsc::channel(SWITCH_DATA_CHAN_SIZE);

    let (switch_lounge, switch_lounge_rx) = SwitchLounge::new();
    let client_lounge = LocalClientLounge::new(settings.client_cache_lifetime);
    let hub = ConnectionHub::new(shutdown.clone());
    let http_pool = HttpPool::spawn(&shutdown).context("failed to build HTTP client pool")?;

    tokio::spawn(multicast::listen_announces(
        node_id.clone(),
        cli.ls_addr,
        cli.ls_port,
        interface.name.clone(),
        self_ip,
        multicast_tx,
        err_tx.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(relay::pump_local_announces(
        multicast_rx,
        switch_lounge.clone(),
        client_lounge.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(relay::pump_peer_messages(
        peer_rx,
        switch_lounge.clone(),
        shutdown.clone(),
    ));

    match serv_port {
        Some(port) => {
            tokio::spawn(link::serve(
                port,
                hub.clone(),
                peer_tx.clone(),
                cipher.clone(),
                err_tx.clone(),
                shutdown.clone(),
            ));
        }
        None => tracing::info!("service port not provided, TCP server will not be started"),
    }

    match (cli.peer_addr.as_deref(), peer_port) {
        (Some(addr), Some(port)) if !addr.is_empty() => {
            tokio::spawn(link::maintain_peer(
                addr.to_string(),
                port,
                hub.clone(),
                peer_tx.clone(),
                cipher.clone(),
                settings.peer_connect_max_retries,
                err_tx.clone(),
                shutdown.clone(),
            ));
        }
        _ => tracing::info!("peer address or port not provided, switch forwarder will not dial out"),
    }

    tokio::spawn(relay::forward_loop(
        switch_lounge_rx,
        hub.clone(),
        client_lounge.clone(),
        http_pool.sender(),
        self_ip,
        shutdown.clone(),
    ));
    tokio::spawn(relay::broadcast_loop(
        node_id,
        self_ip,
        settings.client_broadcast_interval,
        hub.clone(),
        client_lounge.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(relay::probe_loop(
        cli.ls_port,
        settings.client_alive_check_interval,
        http_pool.sender(),
        client_lounge.clone(),
        shutdown.clone(),
    ));

    let outcome = tokio::select! {
        signalled = shutdown_signal() => signalled,
        fatal = err_rx.recv() => Err(fatal.unwrap_or_else(|| anyhow::anyhow!("fatal error channel closed unexpectedly"))),
    };
    match &outcome {
        Ok(()) => tracing::info!("shutting down gracefully"),
        Err(err) => tracing::error!(error = %err, "fatal error, shutting down"),
    }

    shutdown.cancel();
    switch_lounge.close();
    client_lounge.close();
    hub.close();
    // Give the tasks a moment to observe the signal and wind down.
    tokio::time::sleep(SHUTDOWN_WIND_DOWN).await;

    outcome
}

/// Resolve on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to register SIGTERM handler")?;
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted.context("failed to listen for interrupt signal")?;
            }
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for interrupt signal")
    }
}
