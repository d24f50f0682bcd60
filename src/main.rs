mod device;
mod dsp;
mod ingest;
mod monitor;
mod protocol;
mod server;
mod session;
mod transfer;
mod transport;

use crate::protocol::{ClientMessage, ServerMessage, ViewMode};
use crate::server::SocketServer;
use crate::session::{Session, SessionConfig};
use crate::transport::{AsyncTransport, DEFAULT_SOCKET_PATH};
use anyhow::bail;
use clap::{Parser, Subcommand};
use jiff::Zoned;

#[derive(Parser)]
#[command(name = "pulsemon")]
#[command(about = "Streaming pulse-sensor monitor service for Linux")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor service
    Serve {
        /// Socket path to listen on
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,

        /// Sensor host to link at startup (e.g. 192.168.4.1)
        #[arg(long, conflicts_with = "stdin")]
        device: Option<String>,

        /// Replay NDJSON packets from stdin instead of a device
        #[arg(long)]
        stdin: bool,

        /// Points retained per waveform trace
        #[arg(long, default_value = "1000")]
        max_points: usize,
    },

    /// Subscribe to the service and print snapshots as they arrive
    Watch {
        /// Socket path of the running service
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Check service health and device status
    Status {
        /// Socket path of the running service
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Open a link to a sensor host
    Connect {
        /// Sensor host, e.g. 192.168.4.1
        host: String,

        /// Socket path of the running service
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Tear down the device link and clear the session
    Disconnect {
        /// Socket path of the running service
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Switch the active waveform trace
    Mode {
        /// Trace to display
        #[arg(value_enum)]
        mode: ModeArg,

        /// Socket path of the running service
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Change the device sampling rate
    Rate {
        /// Sampling rate in Hz (1-1000)
        hz: u32,

        /// Socket path of the running service
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Clear the waveform history and detector state
    Reset {
        /// Socket path of the running service
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Raw,
    Filtered,
}

impl From<ModeArg> for ViewMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Raw => ViewMode::Raw,
            ModeArg::Filtered => ViewMode::Filtered,
        }
    }
}

/// Expand `$UID` and systemd's `$RUNTIME_DIRECTORY` in a socket path
fn expand_socket_path(path: &str) -> String {
    let uid = std::env::var("UID").unwrap_or_else(|_| nix::unistd::getuid().to_string());
    let mut expanded = path.replace("$UID", &uid);
    if let Ok(runtime_dir) = std::env::var("RUNTIME_DIRECTORY") {
        expanded = expanded.replace("$RUNTIME_DIRECTORY", &runtime_dir);
    }
    expanded
}

/// Send a single command and report the acknowledgment
async fn send_command(socket_path: &str, message: ClientMessage) {
    let transport = AsyncTransport::new(expand_socket_path(socket_path));

    match transport.send_request(&message).await {
        Ok(ServerMessage::Ok { .. }) => println!("OK"),
        Ok(ServerMessage::Error { error, .. }) => eprintln!("Error from service: {}", error),
        Ok(other) => eprintln!("Unexpected response: {:?}", other),
        Err(e) => eprintln!("{}", e),
    }
}

async fn watch_snapshots(socket_path: &str) -> anyhow::Result<()> {
    let transport = AsyncTransport::new(expand_socket_path(socket_path));

    let mut conn = transport.connect().await?;
    conn.write_message(&ClientMessage::new_subscribe()).await?;

    loop {
        match conn.read_server_message().await? {
            Some(ServerMessage::Subscribed { .. }) => {
                println!("Subscribed, waiting for snapshots...");
            }
            Some(ServerMessage::Snapshot(snapshot)) => print_snapshot(&snapshot),
            Some(_) => {}
            None => bail!("service closed the connection"),
        }
    }
}

fn print_snapshot(snapshot: &crate::protocol::Snapshot) {
    let now = Zoned::now().strftime("%H:%M:%S");
    let bpm = snapshot
        .bpm
        .map(|b| format!("{:>5.1}", b))
        .unwrap_or_else(|| "    -".to_string());
    let device_bpm = snapshot
        .heartbeat
        .map(|b| format!("{:>5.1}", b))
        .unwrap_or_else(|| "    -".to_string());
    let temperature = snapshot
        .temperature
        .map(|t| format!("{:.1}C", t))
        .unwrap_or_else(|| "-".to_string());
    let finger = if snapshot.finger { "on" } else { "off" };

    println!(
        "[{}] link={} bpm={} device_bpm={} beats={} temp={} finger={}",
        now,
        snapshot.link.as_str(),
        bpm,
        device_bpm,
        snapshot.beats,
        temperature,
        finger
    );
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            socket_path,
            device,
            stdin,
            max_points,
        } => {
            let socket_path = expand_socket_path(&socket_path);
            eprintln!("Starting pulsemon service on {}", socket_path);

            let config = SessionConfig {
                max_points,
                ..SessionConfig::default()
            };

            let session = if stdin {
                eprintln!("Input: NDJSON replay from stdin");
                Session::spawn_with_reader(config, tokio::io::BufReader::new(tokio::io::stdin()))
            } else {
                Session::spawn(config)
            };

            if let Some(host) = device {
                eprintln!("Device: {}", host);
                if let Err(e) = session.connect(host).await {
                    eprintln!("Failed to open device link: {}", e);
                    return;
                }
            }

            let mut server = match SocketServer::new(&socket_path, session) {
                Ok(server) => server,
                Err(e) => {
                    eprintln!("Could not set up the service socket: {}", e);
                    return;
                }
            };

            if let Err(e) = server.run().await {
                eprintln!("Service stopped with error: {}", e);
            }
        }

        Commands::Watch { socket_path } => {
            if let Err(e) = watch_snapshots(&socket_path).await {
                eprintln!("Watch failed: {}", e);
            }
        }

        Commands::Status { socket_path } => {
            let transport = AsyncTransport::new(expand_socket_path(&socket_path));

            match transport.send_request(&ClientMessage::new_status()).await {
                Ok(ServerMessage::Status {
                    link,
                    host,
                    device,
                    mode,
                    uptime_seconds,
                    samples_seen,
                    samples_dropped,
                    beats,
                    ..
                }) => {
                    println!("Service Status:");
                    let status_json = serde_json::json!({
                        "link": link.as_str(),
                        "host": host,
                        "device": device,
                        "mode": mode,
                        "uptime_seconds": uptime_seconds,
                        "samples_seen": samples_seen,
                        "samples_dropped": samples_dropped,
                        "beats": beats,
                    });
                    match serde_json::to_string_pretty(&status_json) {
                        Ok(json) => println!("{}", json),
                        Err(e) => eprintln!("Could not render status: {}", e),
                    }
                }
                Ok(ServerMessage::Error { error, .. }) => {
                    eprintln!("Error from service: {}", error);
                }
                Ok(other) => {
                    eprintln!("Unexpected response: {:?}", other);
                }
                Err(e) => {
                    eprintln!("Status request failed: {}", e);
                }
            }
        }

        Commands::Connect { host, socket_path } => {
            send_command(&socket_path, ClientMessage::new_connect(host)).await;
        }

        Commands::Disconnect { socket_path } => {
            send_command(&socket_path, ClientMessage::new_disconnect()).await;
        }

        Commands::Mode { mode, socket_path } => {
            send_command(&socket_path, ClientMessage::new_set_mode(mode.into())).await;
        }

        Commands::Rate { hz, socket_path } => {
            send_command(&socket_path, ClientMessage::new_set_rate(hz)).await;
        }

        Commands::Reset { socket_path } => {
            send_command(&socket_path, ClientMessage::new_reset()).await;
        }
    }
}
