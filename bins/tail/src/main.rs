mod config;
mod error;
mod print;

use std::io::Write;

use clap::Parser;

use bridge_api::ErrorKind;
use broadcast_server::BroadcastClient;

use config::TailArgs;
use error::TailError;
use print::{BodyEncoding, format_event};

#[tokio::main]
async fn main() {
    // stdout занят событиями, логи: в stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = TailArgs::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: TailArgs) -> Result<(), TailError> {
    let mut client = tokio::time::timeout(
        args.connect_timeout(),
        BroadcastClient::connect(args.addr.as_str(), &args.identity),
    )
    .await
    .map_err(|_| TailError::Timeout(args.addr.clone()))?
    .map_err(|e| match e.kind() {
        ErrorKind::Config => TailError::Denied(e.message().to_string()),
        _ => TailError::Connect { addr: args.addr.clone(), source: e },
    })?;
    tracing::info!(addr = %args.addr, identity = %args.identity, "subscribed");

    let encoding = if args.base64 { BodyEncoding::Base64 } else { BodyEncoding::Text };
    let mut stdout = std::io::stdout().lock();
    let mut received = 0u64;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = client.next_event() => event?,
        };
        let Some(event) = event else {
            tracing::info!(received, "server closed the connection");
            break;
        };

        writeln!(stdout, "{}", format_event(&event, encoding)?)?;
        stdout.flush()?;

        received += 1;
        if args.count.is_some_and(|n| received >= n) {
            break;
        }
    }
    Ok(())
}
