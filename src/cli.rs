//! Command line interface for the `pushwire` binary.
//!
//! Kept free of library types so the build script can render a man page
//! from it.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `pushwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "pushwire",
    version,
    about = "Receive gateway events over a long-lived WebSocket and print them as JSON lines"
)]
pub struct Cli {
    /// Application id issued by the open platform.
    #[arg(long, env = "PUSHWIRE_APP_ID")]
    pub app_id: String,

    /// Application secret issued by the open platform.
    #[arg(long, env = "PUSHWIRE_APP_SECRET", hide_env_values = true)]
    pub app_secret: String,

    /// Gateway environment: `feishu`, `lark`, or an explicit http(s) base URL.
    #[arg(long, env = "PUSHWIRE_DOMAIN", default_value = "feishu")]
    pub domain: String,

    /// Exit instead of reconnecting when the connection drops.
    #[arg(long)]
    pub no_auto_reconnect: bool,

    /// Value of the `locale` header sent with the handshake.
    #[arg(long, default_value = "zh")]
    pub locale: String,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "PUSHWIRE_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}
