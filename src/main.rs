pub mod bits;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod macros;
pub mod packet;
pub mod pipeline;
pub mod primitives;
pub mod reliability;
pub mod stream;
pub mod transport_parameters;

pub use primitives::*;

pub const MINI_QUICHE_VERSION: u32 = 0b0000_0010;

use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::config::EndpointConfig;
use crate::crypto::tls::NullSession;
use crate::endpoint::{Client, Server};
use crate::stream::StreamType;

fn install_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("MINI_QUICHE_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

/// `mini-quiche <host> <port>` drives a client that opens a bidirectional
/// stream and prints whatever it reads back. `mini-quiche <host> <port> serve`
/// runs a single-connection server on that address instead.
#[tokio::main]
async fn main() -> ExitCode {
    install_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <host> <port> [serve]", args[0]);
        return ExitCode::FAILURE;
    }

    let host = &args[1];
    let port: u16 = match args[2].parse() {
        Ok(p) => p,
        Err(_) => {
            eprintln!("invalid port: {}", args[2]);
            return ExitCode::FAILURE;
        }
    };
    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(a) => a,
        Err(err) => {
            eprintln!("invalid address {host}:{port}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mode = args.get(3).map(String::as_str).unwrap_or("client");
    let result = match mode {
        "serve" => run_server(addr).await,
        "client" => run_client(addr).await,
        other => {
            eprintln!("unrecognized mode {other:?}, expected \"client\" or \"serve\"");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "session failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_client(peer_addr: SocketAddr) -> crate::error::QuicheResult<()> {
    let local_addr: SocketAddr = if peer_addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" }.parse().unwrap();
    let mut client = Client::connect(local_addr, peer_addr, EndpointConfig::default(), Box::new(NullSession::default())).await?;

    let stream_id = client.connection_mut().open_stream(StreamType::ClientBidi);
    let _ = client.connection_mut().write_stream(stream_id, b"hello from mini-quiche")?;
    client.connection_mut().finish_stream(stream_id)?;

    client.drive_until_established(std::time::Duration::from_secs(5)).await?;
    client.flush().await?;

    let reply = client.drive_and_read(stream_id, std::time::Duration::from_secs(5)).await?;
    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

async fn run_server(local_addr: SocketAddr) -> crate::error::QuicheResult<()> {
    let server = Server::listen(local_addr, EndpointConfig::default()).await?;
    let mut conn = server.accept(|| Box::new(NullSession::default())).await?;

    loop {
        let events = conn.drive_once(std::time::Duration::from_secs(30)).await?;
        if events.is_empty() && conn.connection_mut().is_draining() {
            break;
        }
        for data in events {
            let mut reply = data.data;
            reply.extend_from_slice(b" (echoed)");
            let _ = conn.connection_mut().write_stream(data.stream_id, &reply)?;
            conn.connection_mut().finish_stream(data.stream_id)?;
            conn.flush().await?;
        }
    }
    Ok(())
}
