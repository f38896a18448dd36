mod core;
mod http;
mod socket;

use std::sync::Arc;

use cast_daemon::engine::IpcEngine;
use cast_daemon::presence::{PresenceNotifier, StatusFileSink};
use cast_daemon::publisher::StatePublisher;
use cast_daemon::supervisor::SupervisorTiming;
use cast_daemon::{BroadcastMessage, CastController};
use cast_proto::config::Config;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // WARN and ERROR only; clients do not want the poll chatter
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is OK
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

async fn write_pid_file(config: &Config) -> anyhow::Result<()> {
    let pid = std::process::id().to_string();
    if let Some(parent) = config.daemon.pid_file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&config.daemon.pid_file, pid).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can feed it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = cast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,cast_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let engine = Arc::new(IpcEngine::new(&config.engine));
    info!("Engine IPC at {}", engine.address());

    let sink = StatusFileSink::new(config.daemon.presence_file.clone())
        .with_broadcast(broadcast_tx.clone());
    let controller = Arc::new(CastController::new(
        engine.clone(),
        Arc::new(StatePublisher::new()),
        Arc::new(PresenceNotifier::new(Arc::new(sink))),
        SupervisorTiming::from_config(&config.supervisor),
        config.volume.clone(),
    ));

    write_pid_file(&config).await?;

    // Event channel: every external input funnels into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        cast_proto::platform::DAEMON_TCP_PORT,
        controller.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            controller.clone(),
            event_tx.clone(),
        );
    }

    let signal_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        let _ = signal_tx.send(core::DaemonEvent::Shutdown).await;
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    let result = core::DaemonCore::new(controller, broadcast_tx).run(event_rx).await;

    info!("Cleaning up daemon");
    engine.kill().await;
    let _ = tokio::fs::remove_file(&config.daemon.pid_file).await;

    result
}
