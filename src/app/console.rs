use super::{OutputFormat, ShutdownReason};
use crate::bot::{BotRouter, Outgoing, Reply, ReplySender};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Line-oriented chat transport over any reader/writer pair.
///
/// Each input line is one message from the default chat. A line of the form
/// `@<chat> <text>` is delivered as if sent from `<chat>`. Each chat has its own
/// worker: messages from one chat are handled in order, different chats run
/// concurrently so a long recording does not hold up other chats.
pub struct ConsoleTransport {
    router: Arc<BotRouter>,
    chat_id: String,
    format: OutputFormat,
    cancellation_token: CancellationToken,
}

impl ConsoleTransport {
    pub fn new<S: Into<String>>(
        router: Arc<BotRouter>,
        chat_id: S,
        format: OutputFormat,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            router,
            chat_id: chat_id.into(),
            format,
            cancellation_token,
        }
    }

    /// Read messages until input closes or the transport is cancelled.
    ///
    /// Returns the reason the transport stopped by itself, `None` when cancelled.
    /// Messages already read are handled before it returns.
    pub async fn run<R, W>(&self, input: R, output: W) -> Option<ShutdownReason>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("Console transport started (default chat: {})", self.chat_id);

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_replies(rx, output, self.format));
        let mut lines = input.lines();
        let mut chats = HashMap::new();
        let mut workers = JoinSet::new();

        let reason = loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!("Console transport cancelled");
                    break None;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let Some((chat_id, text)) = self.parse_line(&line) else {
                            continue;
                        };
                        self.enqueue(&mut chats, &mut workers, &tx, chat_id, text);
                    }
                    Ok(None) => {
                        info!("Console input closed");
                        break Some(ShutdownReason::InputClosed);
                    }
                    Err(e) => {
                        error!("Failed to read console input: {}", e);
                        break Some(ShutdownReason::Error(e.to_string()));
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    log_join(joined);
                }
            }
        };

        // Closing the queues lets each worker finish what it already received
        chats.clear();
        if !workers.is_empty() {
            info!("Waiting for {} chat(s) with messages in progress", workers.len());
        }
        while let Some(joined) = workers.join_next().await {
            log_join(joined);
        }

        drop(tx);
        if let Err(e) = writer.await {
            warn!("Reply writer task failed: {}", e);
        }

        debug!("Console transport stopped");
        reason
    }

    /// Queue `text` on the chat's worker, starting one if needed
    fn enqueue(
        &self,
        chats: &mut HashMap<String, mpsc::UnboundedSender<String>>,
        workers: &mut JoinSet<()>,
        replies: &ReplySender,
        chat_id: String,
        text: String,
    ) {
        let text = match chats.get(&chat_id) {
            Some(queue) => match queue.send(text) {
                Ok(()) => return,
                // Worker is gone (it panicked); start a fresh one
                Err(mpsc::error::SendError(text)) => text,
            },
            None => text,
        };

        let (queue, mut messages) = mpsc::unbounded_channel::<String>();
        let router = Arc::clone(&self.router);
        let replies = replies.clone();
        let worker_chat = chat_id.clone();
        workers.spawn(async move {
            while let Some(text) = messages.recv().await {
                router.handle(&worker_chat, &text, &replies).await;
            }
            debug!("Chat worker for {} finished", worker_chat);
        });

        if queue.send(text).is_err() {
            warn!("Chat worker for {} exited before its first message", chat_id);
        }
        chats.insert(chat_id, queue);
    }

    fn parse_line(&self, line: &str) -> Option<(String, String)> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(addressed) = line.strip_prefix('@') {
            if let Some((chat_id, text)) = addressed.split_once(char::is_whitespace) {
                let text = text.trim();
                if !chat_id.is_empty() && !text.is_empty() {
                    return Some((chat_id.to_string(), text.to_string()));
                }
            }
        }

        Some((self.chat_id.clone(), line.to_string()))
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!("Message handler failed: {}", e);
    }
}

/// Render one reply as an output line
pub fn render(outgoing: &Outgoing, format: OutputFormat) -> serde_json::Result<String> {
    let line = match format {
        OutputFormat::Json => serde_json::to_string(outgoing)?,
        OutputFormat::Text => match &outgoing.reply {
            Reply::Text { text } => format!("[{}] {}", outgoing.chat_id, text),
            Reply::Photo { path } => format!("[{}] photo: {}", outgoing.chat_id, path.display()),
            Reply::Video { path } => format!("[{}] video: {}", outgoing.chat_id, path.display()),
        },
    };
    Ok(line + "\n")
}

async fn write_replies<W>(mut rx: mpsc::UnboundedReceiver<Outgoing>, mut output: W, format: OutputFormat)
where
    W: AsyncWrite + Unpin,
{
    while let Some(outgoing) = rx.recv().await {
        let line = match render(&outgoing, format) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to render reply for {}: {}", outgoing.chat_id, e);
                continue;
            }
        };

        if let Err(e) = output.write_all(line.as_bytes()).await {
            error!("Failed to write reply: {}", e);
            break;
        }
        if let Err(e) = output.flush().await {
            warn!("Failed to flush replies: {}", e);
        }
    }
}
