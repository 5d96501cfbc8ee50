//! Line-oriented terminal collaborator
//!
//! Reads commands from stdin, prints replies, and prints pushed updates
//! (members, vote tallies, pick progress, notices) from a background task.

pub mod handlers;
mod parse;
pub mod render;

pub use handlers::{handle_pick, Console};
pub use parse::parse_command;

use crate::protocol::{Command, Reply};
use crate::state::AppState;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Run the interactive loop until `quit` or end of input
pub async fn run(state: Arc<AppState>) -> std::io::Result<()> {
    render::spawn_renderer(state.clone());
    let mut console = Console::new(state.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type 'help' for commands.");
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                println!("{}", render::format_reply(&Reply::Error { msg }));
                continue;
            }
        };

        // The pick delay must not block other commands
        if command == Command::Pick {
            let state = state.clone();
            tokio::spawn(async move {
                if let Some(reply) = handle_pick(&state).await {
                    println!("{}", render::format_reply(&reply));
                }
            });
            continue;
        }

        let quit = command == Command::Quit;
        if let Some(reply) = console.handle(command).await {
            println!("{}", render::format_reply(&reply));
        }
        if quit {
            break;
        }
    }

    tracing::info!("Console closed");
    Ok(())
}
