//! Entry point for `rudp`.
//!
//! Parses CLI arguments and runs one endpoint in either **active** or
//! **passive** mode.  All protocol work is delegated to the library; `main.rs`
//! owns only process setup (logging, argument parsing, socket binding).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use rudp::{Endpoint, EndpointConfig, Socket};

/// Reliable ordered message exchange over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Send to a known peer and initiate the teardown.
    Active {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:54322")]
        bind: SocketAddr,
        /// Address of the passive endpoint.
        #[arg(short, long, default_value = "127.0.0.1:54321")]
        peer: SocketAddr,
        /// Messages to send, in order.
        #[arg(short, long, num_args = 1..)]
        messages: Vec<String>,
    },
    /// Wait for a peer to speak first.
    Passive {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:54321")]
        bind: SocketAddr,
        /// Messages to send back, in order.
        #[arg(short, long, num_args = 1..)]
        messages: Vec<String>,
    },
}

#[derive(Args)]
struct Tuning {
    /// Connection id shared by both endpoints.
    #[arg(long, global = true, default_value_t = 12345)]
    conn_id: u32,
    /// Number of messages expected from the peer.
    #[arg(long, global = true, default_value_t = 5)]
    expect: u32,
    /// Maximum unacknowledged data packets.
    #[arg(long, global = true, default_value_t = 3)]
    window: u32,
    /// Retransmissions per packet before it is dropped.
    #[arg(long, global = true, default_value_t = 5)]
    max_retries: u32,
    /// Receive poll timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 200)]
    poll_ms: u64,
    /// Consecutive empty polls before giving up on the peer.
    #[arg(long, global = true, default_value_t = 100)]
    max_timeouts: u32,
    /// Spacing of teardown packets in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    fin_timeout_ms: u64,
    /// Teardown packets sent before giving up.
    #[arg(long, global = true, default_value_t = 3)]
    max_fin_retries: u32,
    /// Hop count stamped on outbound packets.
    #[arg(long, global = true, default_value_t = 255)]
    ttl: u8,
    /// Largest datagram accepted, in bytes; bounds message length.
    #[arg(long, global = true, default_value_t = 1024)]
    recv_buffer: usize,
}

impl Tuning {
    fn config(&self) -> EndpointConfig {
        EndpointConfig::default()
            .with_conn_id(self.conn_id)
            .with_expected_messages(self.expect)
            .with_window_size(self.window)
            .with_max_retries(self.max_retries)
            .with_poll_timeout(Duration::from_millis(self.poll_ms))
            .with_max_timeouts(self.max_timeouts)
            .with_fin_timeout(
                Duration::from_millis(self.fin_timeout_ms),
                self.max_fin_retries,
            )
            .with_ttl(self.ttl)
            .with_recv_buffer_size(self.recv_buffer)
    }
}

fn or_default(messages: Vec<String>, prefix: &str, count: u32) -> Vec<Vec<u8>> {
    if messages.is_empty() {
        (1..=count)
            .map(|i| format!("{prefix} {i}").into_bytes())
            .collect()
    } else {
        messages.into_iter().map(String::into_bytes).collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.config();

    let mut endpoint = match cli.mode {
        Mode::Active {
            bind,
            peer,
            messages,
        } => {
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("active endpoint on {} → {peer}", socket.local_addr);
            let messages = or_default(messages, "Data Packet", 5);
            Endpoint::active(config, socket, peer, messages)?
        }
        Mode::Passive { bind, messages } => {
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("passive endpoint on {}", socket.local_addr);
            let messages = or_default(messages, "Receiver packet", 3);
            Endpoint::passive(config, socket, messages)?
        }
    };

    let reason = endpoint.run().await?;
    for (i, message) in endpoint.delivered().iter().enumerate() {
        println!("{:>3}: {}", i + 1, String::from_utf8_lossy(message));
    }
    log::info!("{} endpoint finished: {reason}", endpoint.role());
    Ok(())
}
