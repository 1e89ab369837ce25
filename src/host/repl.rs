//! Interactive host-side client.
//!
//! Connects to a serving sandbox, reads fragments from stdin, and
//! prints the correlated result or error — the stand-in for whatever
//! UI layer sits on top of the channel. Meta commands start with `/`
//! and never reach the sandbox.

use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::channel::socket;
use crate::config::ChannelConfig;
use crate::host::Dispatcher;

/// Maximum consecutive connection attempts before giving up.
const MAX_CONNECT_ATTEMPTS: u32 = 5;

pub async fn run(channel: &ChannelConfig, request_timeout_secs: u64) -> Result<()> {
    let dispatcher = connect_with_backoff(channel).await?;
    let deadline = Duration::from_secs(request_timeout_secs);

    println!(
        "Connected to {}. Type a fragment, /help for commands.",
        channel.addr()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.starts_with('/') {
                    if !handle_command(input) {
                        break;
                    }
                    continue;
                }
                match dispatcher.execute_with_timeout(input, deadline).await {
                    Ok(response) => match (&response.result, &response.error) {
                        (Some(value), None) => println!("=> {value}"),
                        (_, Some(error)) => println!("!! {error}"),
                        // Unreachable: responses carry exactly one of the two
                        _ => println!("=> null"),
                    },
                    Err(e) if e.is_channel_fault() => {
                        warn!("Channel failed: {e}");
                        break;
                    }
                    Err(e) => println!("!! {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing channel");
                break;
            }
        }
    }

    dispatcher.close();
    Ok(())
}

/// Handles a meta command. Returns false when the session should end.
fn handle_command(command: &str) -> bool {
    match command {
        "/quit" | "/exit" => false,
        "/help" => {
            println!(
                "\
Commands:\n\
  /help    — This message\n\
  /quit    — Close the channel and exit\n\
Anything else is sent to the sandbox as a code fragment."
            );
            true
        }
        other => {
            println!("Unknown command: {other}\nType /help for available commands.");
            true
        }
    }
}

async fn connect_with_backoff(channel: &ChannelConfig) -> Result<Dispatcher> {
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2);
    loop {
        match socket::connect(&channel.host, channel.port).await {
            Ok((events, handle)) => return Ok(Dispatcher::start(events, handle)),
            Err(e) => {
                let delay = backoff.next();
                if backoff.attempts() >= MAX_CONNECT_ATTEMPTS {
                    return Err(anyhow!(
                        "cannot connect after {MAX_CONNECT_ATTEMPTS} attempts: {e}"
                    ));
                }
                warn!(
                    "Connection failed: {e}, retrying in {}s (attempt {})",
                    delay.as_secs(),
                    backoff.attempts()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_commands_end_the_session() {
        assert!(!handle_command("/quit"));
        assert!(!handle_command("/exit"));
    }

    #[test]
    fn test_help_and_unknown_commands_continue() {
        assert!(handle_command("/help"));
        assert!(handle_command("/bogus"));
    }
}
