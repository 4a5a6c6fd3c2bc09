// Request model: the immutable description of one upload and the
// extension-based routing decision derived from it.

use std::path::{Path, PathBuf};

/// Extensions that are sent as generic documents. Everything else goes
/// out as audio.
const DOCUMENT_EXTENSIONS: [&str; 3] = ["zip", "rar", "7z"];

/// Everything needed for a single upload. Built once (usually by the CLI
/// layer) and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub token: String,
    pub chat_id: i64,
    pub file_path: PathBuf,
    pub title: Option<String>,
    pub performer: Option<String>,
    /// Seconds. Values `<= 0` are not sent.
    pub duration: i64,
    /// 0 means "not a reply".
    pub reply_to_message_id: i64,
    pub thumbnail_path: Option<PathBuf>,
    pub parse_mode: Option<String>,
    /// Minimum spacing between successful uploads, in seconds. `<= 0`
    /// disables the rate gate.
    pub min_interval_secs: i64,
}

impl UploadRequest {
    /// A request with only the mandatory values set.
    pub fn new(token: impl Into<String>, chat_id: i64, file_path: impl Into<PathBuf>) -> Self {
        Self {
            token: token.into(),
            chat_id,
            file_path: file_path.into(),
            title: None,
            performer: None,
            duration: 0,
            reply_to_message_id: 0,
            thumbnail_path: None,
            parse_mode: None,
            min_interval_secs: 0,
        }
    }

    pub fn classification(&self) -> FileClassification {
        classify(&self.file_path)
    }
}

/// How the platform should treat the uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClassification {
    Audio,
    Document,
}

impl FileClassification {
    /// Bot API method used for this kind of file.
    pub fn method(self) -> &'static str {
        match self {
            FileClassification::Audio => "sendAudio",
            FileClassification::Document => "sendDocument",
        }
    }

    /// Multipart field that carries the file content.
    pub fn field_name(self) -> &'static str {
        match self {
            FileClassification::Audio => "audio",
            FileClassification::Document => "document",
        }
    }
}

/// Classify a file purely by its lower-cased extension. The extension is
/// whatever follows the last `.` of the file name, so a bare `.zip` counts.
pub fn classify(path: &Path) -> FileClassification {
    let ext = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.rfind('.').map(|i| n[i + 1..].to_ascii_lowercase()));

    match ext {
        Some(ext) if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) => FileClassification::Document,
        _ => FileClassification::Audio,
    }
}
