use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use event_sync::{ChannelStatus, ConnectOptions, SessionLifecycle, WebSocketConnector};
use shared::domain::Objective;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

/// Terminal shell around the event subscription engine: joins one event's
/// topic, prints snapshot changes, and maps stdin lines to the focus/blur
/// signals a windowed shell would emit.
#[derive(Parser, Debug)]
struct Args {
    /// Server base url, e.g. https://events.example.com
    #[arg(long)]
    server_url: Url,
    /// Opaque bearer token minted by the auth layer.
    #[arg(long)]
    token: String,
    /// Hash id of the event to subscribe to.
    #[arg(long)]
    event: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let lifecycle = SessionLifecycle::mount(
        Arc::new(WebSocketConnector),
        ConnectOptions {
            server_url: args.server_url,
            token: args.token,
        },
        &args.event,
    )
    .await?;
    tracing::info!(event = %args.event, "subscribed");

    let mut snapshot = lifecycle.snapshot();
    let snapshot_printer = tokio::spawn(async move {
        while snapshot.changed().await.is_ok() {
            let replica = snapshot.borrow_and_update().clone();
            match replica {
                Some(replica) => {
                    let online = replica
                        .participants
                        .values()
                        .filter(|participant| participant.is_online)
                        .count();
                    println!(
                        "[{}] {} decisions, {}/{} online, {} chat messages",
                        replica.title,
                        replica.decisions.len(),
                        online,
                        replica.participants.len(),
                        replica.chat.len(),
                    );
                }
                None => println!("[waiting] no snapshot"),
            }
        }
    });

    let mut status = lifecycle.status();
    let status_printer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let status = *status.borrow_and_update();
            let label = match status {
                ChannelStatus::Connecting => "connecting",
                ChannelStatus::Joined => "joined",
                ChannelStatus::NotJoined => "not joined",
            };
            println!("(status: {label})");
        }
    });

    println!("commands: blur | focus | join | leave | say <text> | discuss time|place | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(' ')
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((line, ""));
        match verb {
            "blur" => lifecycle.handle_blur().await,
            "focus" => lifecycle.handle_focus().await,
            "join" => match lifecycle.commands().await {
                Ok(commands) => {
                    if let Err(err) = commands.join_event().await {
                        eprintln!("join_event failed: {err}");
                    }
                }
                Err(err) => eprintln!("{err}"),
            },
            "leave" => match lifecycle.commands().await {
                Ok(commands) => {
                    if let Err(err) = commands.leave_event().await {
                        eprintln!("leave_event failed: {err}");
                    }
                }
                Err(err) => eprintln!("{err}"),
            },
            "say" if !rest.is_empty() => match lifecycle.commands().await {
                Ok(commands) => {
                    if let Err(err) = commands.chat_shout(rest).await {
                        eprintln!("chat_shout failed: {err}");
                    }
                }
                Err(err) => eprintln!("{err}"),
            },
            "discuss" if rest == "time" || rest == "place" => {
                let objective = if rest == "time" {
                    Objective::Time
                } else {
                    Objective::Place
                };
                match lifecycle.commands().await {
                    Ok(commands) => {
                        if let Err(err) = commands.open_discussion(objective).await {
                            eprintln!("open_discussion failed: {err}");
                        }
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
            "quit" => break,
            "" => {}
            other => eprintln!("unknown command: {other}"),
        }
    }

    snapshot_printer.abort();
    status_printer.abort();
    lifecycle.unmount().await;
    Ok(())
}
