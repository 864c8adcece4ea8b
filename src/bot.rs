use crate::error::PicamError;
use crate::service::CameraService;
use crate::session::{SessionStore, Step};
use crate::storage::{MediaFile, MediaKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const HELP_TEXT: &str = "Hello! I am a camera bot.\n\
Available commands:\n\
/photo - take a photo\n\
/video - record a video\n\
/latest - show latest files\n\
/show_photo - send the latest photo\n\
/show_video - send the latest video\n\
/file <name> - send a stored file by name\n\
/cleanup - clean up old files\n\
/cancel - abort the video prompt";

/// A chat command understood by the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Photo,
    Video,
    Latest,
    Cleanup,
    ShowPhoto,
    ShowVideo,
    File(String),
    Cancel,
    Unknown(String),
}

impl Command {
    /// Parse `/name[@bot] [args]`; `None` for plain text
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;

        let (head, args) = match body.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (body, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        Some(match name.as_str() {
            "start" | "help" => Self::Start,
            "photo" => Self::Photo,
            "video" => Self::Video,
            "latest" => Self::Latest,
            "cleanup" => Self::Cleanup,
            "show_photo" => Self::ShowPhoto,
            "show_video" => Self::ShowVideo,
            "file" => Self::File(args.to_string()),
            "cancel" => Self::Cancel,
            _ => Self::Unknown(name),
        })
    }
}

/// Something to send back to a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reply {
    Text { text: String },
    Photo { path: PathBuf },
    Video { path: PathBuf },
}

impl Reply {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::Text { text: text.into() }
    }

    fn media(file: &MediaFile) -> Self {
        match file.kind {
            MediaKind::Photo => Self::Photo {
                path: file.path.clone(),
            },
            MediaKind::Video => Self::Video {
                path: file.path.clone(),
            },
        }
    }
}

/// A reply addressed to a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outgoing {
    pub chat_id: String,
    #[serde(flatten)]
    pub reply: Reply,
}

pub type ReplySender = mpsc::UnboundedSender<Outgoing>;

/// Turns chat messages into camera service calls
pub struct BotRouter {
    service: Arc<CameraService>,
    sessions: SessionStore,
    log_interactions: bool,
}

impl BotRouter {
    pub fn new(service: Arc<CameraService>, log_interactions: bool) -> Self {
        Self {
            service,
            sessions: SessionStore::new(),
            log_interactions,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one incoming message, streaming replies to `out` as they happen
    pub async fn handle(&self, chat_id: &str, text: &str, out: &ReplySender) {
        let send = |reply: Reply| {
            if out
                .send(Outgoing {
                    chat_id: chat_id.to_string(),
                    reply,
                })
                .is_err()
            {
                warn!("Reply channel closed; dropping reply for {}", chat_id);
            }
        };

        match Command::parse(text) {
            Some(command) => {
                if self.log_interactions {
                    info!(target: "picam_bot::interactions", chat_id, command = ?command, "command received");
                }
                self.dispatch(chat_id, command, &send).await;
            }
            None => {
                let bounds = self.service.duration_bounds();
                match self.sessions.update(chat_id, |c| c.on_text(text, &bounds)) {
                    Step::Ignored => {
                        debug!("Ignoring text from {} outside a conversation", chat_id);
                        send(Reply::text("Send /start to see the available commands"));
                    }
                    Step::Reprompt(prompt) => send(Reply::text(prompt)),
                    Step::Record(seconds) => self.record(seconds, &send).await,
                }
            }
        }
    }

    /// Run a command. A pending duration prompt survives other commands;
    /// only `/cancel` or a valid duration ends it.
    async fn dispatch(&self, chat_id: &str, command: Command, send: &impl Fn(Reply)) {
        match command {
            Command::Start => send(Reply::text(HELP_TEXT)),
            Command::Photo => {
                send(Reply::text("Taking a photo..."));
                match self.service.capture_photo().await {
                    Ok(path) => send(Reply::Photo { path }),
                    Err(e) => send(Reply::text(Self::failure("taking the photo", &e))),
                }
            }
            Command::Video => {
                let bounds = self.service.duration_bounds();
                let prompt = self.sessions.update(chat_id, |c| c.start_video(&bounds));
                send(Reply::text(prompt));
            }
            Command::Latest => send(self.latest().await),
            Command::Cleanup => {
                let result = self.service.cleanup_old_files().await;
                if result.errors.is_empty() {
                    send(Reply::text("Old files have been successfully deleted"));
                } else {
                    send(Reply::text(format!(
                        "Cleanup finished, but {} files could not be deleted",
                        result.errors.len()
                    )));
                }
            }
            Command::ShowPhoto => send(self.latest_media(MediaKind::Photo).await),
            Command::ShowVideo => send(self.latest_media(MediaKind::Video).await),
            Command::File(name) => send(self.file(&name).await),
            Command::Cancel => {
                if self.sessions.update(chat_id, |c| c.cancel()) {
                    send(Reply::text("Video recording cancelled"));
                } else {
                    send(Reply::text("Nothing to cancel"));
                }
            }
            Command::Unknown(name) => {
                send(Reply::text(format!(
                    "Unknown command /{}. Send /start to see the available commands",
                    name
                )));
            }
        }
    }

    async fn record(&self, seconds: u32, send: &impl Fn(Reply)) {
        send(Reply::text(format!("Recording video for {} seconds...", seconds)));
        match self.service.record_video(i64::from(seconds)).await {
            Ok(path) => send(Reply::Video { path }),
            Err(e) => send(Reply::text(Self::failure("recording the video", &e))),
        }
    }

    async fn latest(&self) -> Reply {
        let mut message = String::from("Latest files:\n");
        let mut any = false;

        for (kind, heading) in [(MediaKind::Video, "Videos"), (MediaKind::Photo, "Photos")] {
            match self.service.latest_files(kind, None).await {
                Ok(files) if !files.is_empty() => {
                    any = true;
                    message.push_str(&format!("\n{}:\n", heading));
                    for file in files {
                        message.push_str(&format!("- {} ({})\n", file.name(), file.created_display()));
                    }
                }
                Ok(_) => {}
                Err(e) => return Reply::text(Self::failure("getting the file list", &e)),
            }
        }

        if any {
            Reply::text(message.trim_end())
        } else {
            Reply::text("No files yet")
        }
    }

    async fn latest_media(&self, kind: MediaKind) -> Reply {
        match self.service.latest_file(kind).await {
            Ok(file) => Reply::media(&file),
            Err(e) => Reply::text(Self::failure(&format!("sending the {}", kind), &e)),
        }
    }

    async fn file(&self, name: &str) -> Reply {
        if name.is_empty() {
            return Reply::text("Usage: /file <name>, e.g. /file 20240101_12_00_00.jpg");
        }

        let kind = MediaKind::ALL
            .into_iter()
            .find(|kind| kind.matches(Path::new(name)));

        let Some(kind) = kind else {
            return Reply::text("File names end in .jpg or .mp4");
        };

        match self.service.file_by_name(kind, name).await {
            Ok(file) => Reply::media(&file),
            Err(e) => Reply::text(Self::failure("looking up the file", &e)),
        }
    }

    fn failure(action: &str, error: &PicamError) -> String {
        match error {
            PicamError::Device { .. } => format!("An error occurred while {}", action),
            other => other.user_message(),
        }
    }
}
