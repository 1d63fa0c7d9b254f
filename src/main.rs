mod config;
mod connection;
mod logging;
mod payload;
mod radio;

use anyhow::Result;
use clap::Parser;
use config::{Cli, LinkConfig};
use connection::{ConnectionManager, StatusDisplay};
use radio::BluezRadio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = LinkConfig::from(Cli::parse());
    logging::init_logger(&config.log_filter);

    let target = config.manager.target;
    info!("payload-link starting");
    info!("  Service: {}", target.service_id());
    info!("  Characteristic: {}", target.characteristic_id());

    let (display, mut status_rx) = StatusDisplay::new();
    let radio = BluezRadio::new(config.radio.clone());
    let manager = ConnectionManager::new(display, config.manager.clone(), radio);

    // Mirror status strings on stdout
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            println!("{}", status);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match payload::parse_line(&line) {
                    Ok(Some(payload)) => {
                        if !manager.is_ready() {
                            warn!("Payload device not ready ({})", manager.status());
                        }
                        info!("Sending {} byte payload", payload.len());
                        manager.send(payload)?;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping input: {:#}", e),
                },
                None => {
                    info!("Input closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    manager.shutdown().await
}
