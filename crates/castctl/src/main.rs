mod connection;

use std::time::Duration;

use anyhow::bail;
use cast_proto::config::Config;
use cast_proto::protocol::{Broadcast, CastState, Command, Message, PROTOCOL_VERSION};
use clap::{Parser, Subcommand};
use connection::DaemonConnection;

/// Control a running cast-daemon.
#[derive(Parser, Debug)]
#[command(name = "castctl")]
#[command(version)]
struct Args {
    /// Daemon address (host:port)
    #[arg(long, env = "CASTCTL_ADDRESS", default_value_t = cast_proto::platform::daemon_address())]
    address: String,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Start casting a room to a renderer
    Start {
        /// Karaoke server base URL, e.g. http://192.168.1.5:8080
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        room: String,
        /// Device description URL of the renderer
        #[arg(long)]
        location: String,
    },
    /// Stop supervising and clear the notification
    Stop,
    /// Stop and discard the engine session
    Reset,
    /// Toggle pause
    Pause,
    /// Skip to the next track
    Next,
    /// Seek to an absolute position in seconds
    Seek { seconds: i64 },
    /// Show the volume, set it (0-100) or step it with `up` / `down`
    Volume {
        #[arg(allow_hyphen_values = true)]
        value: Option<String>,
    },
    /// Print the current state once
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Follow state, presence and log broadcasts until interrupted
    Watch,
}

/// How long to wait for the daemon to answer a command.  Volume reads can
/// take a few device round trips.
const REPLY_WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut conn = DaemonConnection::connect(&args.address).await?;
    let state = expect_hello(&mut conn).await?;

    let (cmd, wants_volume) = match args.command {
        Action::Status { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                println!("{}", describe(&state));
            }
            return Ok(());
        }
        Action::Watch => return watch(&mut conn).await,
        Action::Start {
            base_url,
            room,
            location,
        } => (
            Command::Start {
                base_url,
                room_id: room,
                location,
            },
            false,
        ),
        Action::Stop => (Command::Stop, false),
        Action::Reset => (Command::Reset, false),
        Action::Pause => (Command::TogglePause, false),
        Action::Next => (Command::Next, false),
        Action::Seek { seconds } => (Command::Seek { seconds }, false),
        Action::Volume { value } => (volume_command(value.as_deref())?, true),
    };

    conn.send_command(cmd).await?;
    let volume = await_reply(&mut conn).await?;
    if wants_volume {
        match volume {
            Some(v) => println!("volume {}", v),
            None => bail!("no volume reported by the device"),
        }
    }
    Ok(())
}

fn volume_command(value: Option<&str>) -> anyhow::Result<Command> {
    let step = i64::from(volume_step());
    Ok(match value {
        None => Command::GetVolume,
        Some("up") | Some("+") => Command::NudgeVolume { delta: step },
        Some("down") | Some("-") => Command::NudgeVolume { delta: -step },
        Some(v) => match v.parse::<i64>() {
            Ok(n) if v.starts_with('+') || v.starts_with('-') => Command::NudgeVolume { delta: n },
            Ok(n) => Command::SetVolume { value: n },
            Err(_) => bail!("volume must be a number, +N/-N, up or down (got {:?})", v),
        },
    })
}

/// Step from the daemon's config file when present; never writes one.
fn volume_step() -> u8 {
    std::fs::read_to_string(Config::config_path())
        .ok()
        .and_then(|content| Config::from_toml_str(&content).ok())
        .unwrap_or_default()
        .volume
        .step
}

async fn expect_hello(conn: &mut DaemonConnection) -> anyhow::Result<CastState> {
    match conn.receive_message().await? {
        Some(Message::Broadcast(Broadcast::Hello {
            protocol_version,
            state,
        })) => {
            if protocol_version != PROTOCOL_VERSION {
                bail!(
                    "daemon speaks protocol {}, castctl speaks {}",
                    protocol_version,
                    PROTOCOL_VERSION
                );
            }
            Ok(state)
        }
        Some(other) => bail!("unexpected greeting from daemon: {:?}", other),
        None => bail!("daemon closed the connection"),
    }
}

/// Wait for the daemon's answer to our command, skipping broadcasts meant
/// for every client (including other clients' errors).
async fn await_reply(conn: &mut DaemonConnection) -> anyhow::Result<Option<u8>> {
    let deadline = tokio::time::Instant::now() + REPLY_WAIT;
    loop {
        match tokio::time::timeout_at(deadline, conn.receive_message()).await {
            Err(_) => bail!("no answer from cast-daemon"),
            Ok(msg) => match msg? {
                Some(Message::Broadcast(Broadcast::Reply { error: Some(message), .. })) => {
                    bail!(message)
                }
                Some(Message::Broadcast(Broadcast::Reply { volume, .. })) => return Ok(volume),
                Some(_) => {}
                None => bail!("daemon closed the connection"),
            },
        }
    }
}

async fn watch(conn: &mut DaemonConnection) -> anyhow::Result<()> {
    loop {
        let msg = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            msg = conn.receive_message() => msg?,
        };
        match msg {
            Some(Message::Broadcast(b)) => match b {
                Broadcast::State { data } => println!("{}", describe(&data)),
                Broadcast::Presence { text: Some(text) } => println!("presence: {}", text),
                Broadcast::Presence { text: None } => println!("presence cleared"),
                Broadcast::Volume { value: Some(v) } => println!("volume {}", v),
                Broadcast::Volume { value: None } => println!("volume unknown"),
                Broadcast::Log { message } => println!("{}", message),
                Broadcast::Error { message } => eprintln!("error: {}", message),
                Broadcast::Hello { .. } | Broadcast::Reply { .. } => {}
            },
            Some(Message::Command(_)) => {}
            None => bail!("daemon closed the connection"),
        }
    }
}

fn describe(state: &CastState) -> String {
    let snap = &state.snapshot;
    let device = state.device_location.as_deref().unwrap_or("-");
    format!(
        "[{:?}] {} {} {}/{}s rev={} device={}",
        state.run_state,
        if state.playing { "playing" } else { "paused" },
        snap.title,
        snap.current_secs,
        snap.total_secs,
        state.rev,
        device
    )
}
