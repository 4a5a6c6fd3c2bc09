// Command-line surface: fixed positional arguments mapped onto an
// `UploadRequest`.

use crate::request::UploadRequest;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tg-uploader",
    version,
    about = "Upload an audio file or archive to a Telegram chat through the Bot API",
    override_usage = "tg-uploader <bot_token> <chat_id> <file_path> <title> <performer> <duration> <reply_to_message_id> [thumbnail_path] [parse_mode] [delay_seconds]"
)]
pub struct Cli {
    /// Bot token, passed through to the API untouched
    #[arg(allow_hyphen_values = true)]
    pub bot_token: String,

    /// Destination chat or channel id
    #[arg(allow_negative_numbers = true)]
    pub chat_id: i64,

    /// File to upload; .zip, .rar and .7z go out as documents
    #[arg(allow_hyphen_values = true)]
    pub file_path: PathBuf,

    /// Audio title, or the caption for documents
    #[arg(allow_hyphen_values = true)]
    pub title: String,

    #[arg(allow_hyphen_values = true)]
    pub performer: String,

    /// Duration in seconds, 0 to leave it out
    #[arg(allow_negative_numbers = true)]
    pub duration: i64,

    /// Message to reply to, 0 for none
    #[arg(allow_negative_numbers = true)]
    pub reply_to_message_id: i64,

    /// Cover image sent as the `thumb` part; empty for none
    #[arg(allow_hyphen_values = true)]
    pub thumbnail_path: Option<String>,

    /// Telegram parse mode for the caption (HTML, MarkdownV2, ...)
    pub parse_mode: Option<String>,

    /// Minimum seconds since the last successful upload
    #[arg(allow_negative_numbers = true)]
    pub delay_seconds: Option<i64>,
}

impl Cli {
    pub fn into_request(self) -> UploadRequest {
        UploadRequest {
            token: self.bot_token,
            chat_id: self.chat_id,
            file_path: self.file_path,
            title: Some(self.title).filter(|s| !s.is_empty()),
            performer: Some(self.performer).filter(|s| !s.is_empty()),
            duration: self.duration,
            reply_to_message_id: self.reply_to_message_id,
            thumbnail_path: self.thumbnail_path.filter(|p| !p.is_empty()).map(PathBuf::from),
            parse_mode: self.parse_mode.filter(|s| !s.is_empty()),
            min_interval_secs: self.delay_seconds.unwrap_or(0),
        }
    }
}
