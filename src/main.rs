//! `pushwire` binary: prints every event delivered by the gateway as one
//! JSON line on stdout.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use pushwire::{Domain, EventContext, StopReason, WsClient, dispatch_fn};
use serde_json::{Value, json};

fn print_event(event: &Value, ctx: &EventContext) {
    let line = json!({
        "message_id": ctx.message_id,
        "trace_id": ctx.trace_id,
        "event": event,
    });
    println!("{line}");
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: Option<std::net::SocketAddr>) {
    let Some(addr) = addr else { return };
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => info!("serving metrics: addr={addr}"),
        Err(e) => warn!("metrics exporter not installed: error={e}"),
    }
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: Option<std::net::SocketAddr>) {
    if addr.is_some() {
        warn!("--metrics-addr ignored: built without the `metrics` feature");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    install_metrics(cli.metrics_addr);

    let domain = match cli.domain.parse::<Domain>() {
        Ok(domain) => domain,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let client = WsClient::builder(cli.app_id, cli.app_secret)
        .domain(domain)
        .auto_reconnect(!cli.no_auto_reconnect)
        .locale(cli.locale)
        .dispatcher(dispatch_fn(|event, ctx| async move {
            print_event(&event, &ctx);
            Ok(None)
        }))
        .build();
    let client = match client {
        Ok(client) => client,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = client.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
        }
        shutdown.cancel();
    });

    match client.run().await {
        StopReason::Shutdown => ExitCode::SUCCESS,
        reason => {
            error!("client stopped: {reason}");
            ExitCode::FAILURE
        }
    }
}
