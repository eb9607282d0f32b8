//! pairlink - QR-code pairing and authenticated sessions
//!
//! `pairlink serve` issues a one-time pairing offer, renders it as a QR code
//! in the terminal, and waits for a client to claim it. `pairlink join`
//! plays the client role from a scanned code.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Parser, Subcommand};
use pairlink_client::PairClient;
use pairlink_core::PairingConfig;
use pairlink_server::{PairServer, PairingStarted};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// pairlink - pair a device by scanning a one-time QR code
#[derive(Parser, Debug)]
#[command(name = "pairlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the rendezvous server and display a pairing code
    Serve {
        /// Server port
        #[arg(short, long, default_value = "5125")]
        port: u16,

        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Address advertised in the pairing code (auto-detected if omitted)
        #[arg(long)]
        advertise: Option<String>,

        /// Offer time-to-live in seconds
        #[arg(long, default_value = "120")]
        ttl: u64,
    },
    /// Claim a pairing code and open a session
    Join {
        /// The scanned pairing code (base64)
        #[arg(short, long)]
        code: String,

        /// Message to send once the session is up
        #[arg(short, long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("pairlink v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve {
            port,
            bind,
            advertise,
            ttl,
        } => serve(port, bind, advertise, ttl).await,
        Command::Join { code, message } => join(code, message).await,
    }
}

async fn serve(port: u16, bind: String, advertise: Option<String>, ttl: u64) -> Result<()> {
    let advertise_addr = advertise
        .or_else(get_local_ip)
        .unwrap_or_else(|| "127.0.0.1".to_string());

    let config = PairingConfig::new()
        .with_bind_addr(bind)
        .with_advertise_addr(advertise_addr)
        .with_port(port)
        .with_offer_ttl(Duration::from_secs(ttl));

    let server = Arc::new(PairServer::bind(config).await?);
    info!("Listening on {}", server.local_addr());

    let started = server.start_pairing().await?;
    print_pairing(&started);

    // Re-issue the offer whenever it expires unclaimed, until a client pairs.
    let refresher = {
        let server = server.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                if server.sessions().active_count().await > 0 {
                    println!();
                    println!("  ✓ Device paired successfully!");
                    println!();
                    break;
                }
                if server.handshake().expire_if_due().await {
                    match server.start_pairing().await {
                        Ok(started) => {
                            println!();
                            print_pairing(&started);
                        }
                        Err(e) => {
                            warn!("could not refresh pairing offer: {}", e);
                            break;
                        }
                    }
                }
            }
        })
    };

    let run = tokio::spawn(server.clone().run());

    info!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    server.shutdown();
    refresher.abort();
    run.await?.context("server task failed")?;
    Ok(())
}

async fn join(code: String, message: Option<String>) -> Result<()> {
    let payload = BASE64
        .decode(code.trim())
        .context("pairing code is not valid base64")?;

    let client = PairClient::new(PairingConfig::new());
    let mut session = client.pair(&payload).await?;
    info!("Session {} established", session.id());

    let body = message.unwrap_or_else(|| "hello from pairlink".to_string());
    session.send(body).await?;
    session.close().await?;
    info!("Session closed");
    Ok(())
}

fn print_pairing(started: &PairingStarted) {
    let code = BASE64.encode(&started.payload);
    display_qr_code(&code);
    info!("");
    info!("  Scan the QR code above to pair.");
    info!("  Or pass the code directly: pairlink join --code {}", code);
    info!("");
    info!("  Code expires in {} seconds", started.expires_in);
    info!("");
}

/// Display a QR code in the terminal
fn display_qr_code(data: &str) {
    use qrcode::QrCode;

    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to generate QR code: {}", e);
            return;
        }
    };

    // Render as Unicode block characters for terminal display
    let string = code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .build();

    for line in string.lines() {
        println!("  {}", line);
    }
}

/// Best-effort local IP discovery via a throwaway UDP socket
fn get_local_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip().to_string())
}
