//! CLI channel: stdin/stdout REPL for local testing.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{
    Channel, IncomingMessage, MessageStream, OutgoingResponse, ReplyKeyboard, StatusUpdate,
};
use crate::error::ChannelError;

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    user_id: String,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            user_id: "local-user".to_string(),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Buttons rendered as a bracketed line, one line per keyboard row.
fn render_keyboard(keyboard: &ReplyKeyboard) -> String {
    keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|label| format!("[{label}]"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let msg = IncomingMessage::new("cli", &user_id, &line);
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}\n", response.content);
        if let Some(ref keyboard) = response.keyboard {
            println!("{}\n", render_keyboard(keyboard));
        }
        eprint!("> ");
        Ok(())
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        match status {
            StatusUpdate::Thinking(msg) => eprintln!("⏳ {}", msg),
            StatusUpdate::Status(msg) => eprintln!("ℹ️  {}", msg),
        }
        Ok(())
    }
}
