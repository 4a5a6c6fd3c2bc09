// API client module: a small blocking HTTP client that pushes one file to
// the Bot API. The multipart body is produced on a worker thread and
// streamed as the request body; the rate gate is consulted before and
// updated after a confirmed upload.

use crate::conduit::{DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE};
use crate::config::UploaderConfig;
use crate::encoder::StreamEncoder;
use crate::error::{Result, UploadError};
use crate::rate_gate::RateGate;
use crate::request::UploadRequest;
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Blocking client that holds the reqwest client, the API base URL and
/// the rate gate shared by every upload.
#[derive(Clone)]
pub struct UploadClient {
    client: Client,
    api_base: String,
    timeout: Duration,
    gate: RateGate,
}

/// What the platform handed back for a delivered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub message_id: i64,
    pub file_id: Option<String>,
}

/// Uniform response wrapper of the Bot API.
#[derive(Deserialize, Debug)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Deserialize, Debug)]
struct SentMessage {
    message_id: i64,
    #[serde(default)]
    audio: Option<SentFile>,
    #[serde(default)]
    document: Option<SentFile>,
}

#[derive(Deserialize, Debug)]
struct SentFile {
    file_id: String,
}

impl UploadClient {
    pub fn new(config: &UploaderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UploadError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(UploadClient {
            client,
            api_base: config.api_base.clone(),
            timeout: config.timeout,
            gate: RateGate::new(config.state_path.clone()),
        })
    }

    /// Client configured from `TG_UPLOADER_*` environment variables. See
    /// `UploaderConfig::from_env`.
    pub fn from_env() -> Result<Self> {
        Self::new(&UploaderConfig::from_env()?)
    }

    /// Upload `req.file_path` and return the id of the message it became.
    pub fn upload(&self, req: &UploadRequest) -> Result<UploadResult> {
        self.gate.wait(req.min_interval_secs)?;

        if !req.file_path.is_file() {
            return Err(UploadError::FileNotFound(req.file_path.clone()));
        }

        let classification = req.classification();
        let method = classification.method();
        let url = format!("{}{}/{}", self.api_base, req.token, method);

        let encoder = StreamEncoder::new(req);
        let content_type = encoder.content_type();
        info!(
            "uploading {} to chat {} via {}",
            req.file_path.display(),
            req.chat_id,
            method
        );

        let (body, producer) = encoder.spawn(DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE);
        let sent = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .body(Body::new(body))
            .send();
        let encoded = producer
            .join()
            .unwrap_or_else(|_| Err(UploadError::Streaming("encoder thread panicked".into())));

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(UploadError::Timeout(self.timeout)),
            // A body that could not be built outranks the transport error it
            // caused; an abandoned body is only the echo of that error.
            Err(e) => {
                return Err(match encoded {
                    Err(UploadError::BodyAborted) | Ok(()) => transport_error(e),
                    Err(cause) => cause,
                })
            }
        };

        if let Err(cause) = encoded {
            // The server answered before taking the whole body.
            if matches!(cause, UploadError::BodyAborted) {
                if let Ok(Envelope { ok: false, description, .. }) = self.read_envelope(response) {
                    return Err(UploadError::RemoteRejected(description.unwrap_or_default()));
                }
            }
            return Err(cause);
        }

        let envelope = self.read_envelope(response)?;
        if !envelope.ok {
            return Err(UploadError::RemoteRejected(envelope.description.unwrap_or_default()));
        }
        let sent = envelope
            .result
            .ok_or_else(|| UploadError::MalformedResponse("missing result".into()))?;
        if sent.message_id <= 0 {
            return Err(UploadError::MalformedResponse(format!(
                "invalid message_id {}",
                sent.message_id
            )));
        }

        let file_id = sent.audio.or(sent.document).map(|f| f.file_id);
        info!("uploaded as message {} (file_id {:?})", sent.message_id, file_id);

        self.gate
            .commit()
            .map_err(|source| UploadError::StateWriteFailed {
                message_id: sent.message_id,
                path: self.gate.state_path().to_path_buf(),
                source,
            })?;

        Ok(UploadResult {
            message_id: sent.message_id,
            file_id,
        })
    }

    fn read_envelope(&self, response: Response) -> Result<Envelope> {
        let status = response.status();
        let text = response.text().map_err(|e| {
            if e.is_timeout() {
                UploadError::Timeout(self.timeout)
            } else {
                UploadError::MalformedResponse(e.to_string())
            }
        })?;
        debug!("response {}: {}", status, text);
        serde_json::from_str(&text).map_err(|e| {
            UploadError::MalformedResponse(format!("{} (HTTP {}): {}", e, status, text))
        })
    }
}

/// Flatten a reqwest error and its causes into one line. The URL is left
/// out because it embeds the bot token.
fn transport_error(e: reqwest::Error) -> UploadError {
    let e = e.without_url();
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    UploadError::Transport(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn client_for(server: &ServerGuard, state_path: &Path) -> UploadClient {
        UploadClient::new(&UploaderConfig {
            api_base: format!("{}/bot", server.url()),
            state_path: state_path.to_path_buf(),
            timeout: Duration::from_secs(30),
        })
        .unwrap()
    }

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const OK_AUDIO: &str =
        r#"{"ok":true,"result":{"message_id":321,"audio":{"file_id":"CQACAgQ"}}}"#;

    #[test]
    fn audio_upload_returns_message_id_and_commits() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state").join("last_upload.txt");
        let file = write_file(&dir, "song.mp3", b"fake mp3 payload");

        let mock = server
            .mock("POST", "/bottest-token/sendAudio")
            .match_header(
                "content-type",
                Matcher::Regex(r"^multipart/form-data; boundary=tgup[0-9a-f]{32}$".into()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="audio"; filename="song.mp3""#.into()),
                Matcher::Regex("fake mp3 payload".into()),
                Matcher::Regex(r#"name="chat_id"\r\n\r\n-42\r\n"#.into()),
                Matcher::Regex(r#"name="title"\r\n\r\nIntro\r\n"#.into()),
                Matcher::Regex(r#"name="supports_streaming"\r\n\r\ntrue\r\n"#.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(OK_AUDIO)
            .create();

        let mut req = UploadRequest::new("test-token", -42, &file);
        req.title = Some("Intro".into());
        let result = client_for(&server, &state).upload(&req).unwrap();

        mock.assert();
        assert_eq!(result.message_id, 321);
        assert_eq!(result.file_id.as_deref(), Some("CQACAgQ"));
        assert!(RateGate::new(&state).last_upload().unwrap().is_some());
    }

    #[test]
    fn archives_go_to_send_document_with_caption() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "Backup.ZIP", b"PK\x03\x04 archive");

        let mock = server
            .mock("POST", "/bottest-token/sendDocument")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="document"; filename="Backup.ZIP""#.into()),
                Matcher::Regex(r#"name="caption"\r\n\r\nNightly\r\n"#.into()),
            ]))
            .with_body(r#"{"ok":true,"result":{"message_id":9,"document":{"file_id":"BQAD"}}}"#)
            .create();

        let mut req = UploadRequest::new("test-token", 1, &file);
        req.title = Some("Nightly".into());
        let result = client_for(&server, &dir.path().join("ts")).upload(&req).unwrap();

        mock.assert();
        assert_eq!(result.message_id, 9);
        assert_eq!(result.file_id.as_deref(), Some("BQAD"));
    }

    #[test]
    fn rejection_leaves_state_untouched() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("last_upload.txt");
        let file = write_file(&dir, "song.mp3", b"audio");
        RateGate::new(&state).commit_at(1_600_000_000).unwrap();

        server
            .mock("POST", "/bottest-token/sendAudio")
            .with_status(400)
            .with_body(r#"{"ok": false, "description": "Bad Request"}"#)
            .create();

        let err = client_for(&server, &state)
            .upload(&UploadRequest::new("test-token", 1, &file))
            .unwrap_err();

        match err {
            UploadError::RemoteRejected(desc) => assert_eq!(desc, "Bad Request"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fs::read_to_string(&state).unwrap(), "1600000000");
    }

    #[test]
    fn non_json_body_is_malformed() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("last_upload.txt");
        let file = write_file(&dir, "song.mp3", b"audio");

        server
            .mock("POST", "/bottest-token/sendAudio")
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create();

        let err = client_for(&server, &state)
            .upload(&UploadRequest::new("test-token", 1, &file))
            .unwrap_err();

        assert!(matches!(err, UploadError::MalformedResponse(_)));
        assert!(!state.exists());
    }

    #[test]
    fn ok_without_result_is_malformed() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "song.mp3", b"audio");

        server
            .mock("POST", "/bottest-token/sendAudio")
            .with_body(r#"{"ok":true}"#)
            .create();

        let err = client_for(&server, &dir.path().join("ts"))
            .upload(&UploadRequest::new("test-token", 1, &file))
            .unwrap_err();
        assert!(matches!(err, UploadError::MalformedResponse(_)));
    }

    #[test]
    fn missing_file_fails_before_any_request() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let mock = server.mock("POST", Matcher::Any).expect(0).create();

        let err = client_for(&server, &dir.path().join("ts"))
            .upload(&UploadRequest::new("test-token", 1, dir.path().join("nope.mp3")))
            .unwrap_err();

        assert!(matches!(err, UploadError::FileNotFound(_)));
        mock.assert();
    }

    #[test]
    fn missing_thumbnail_aborts_the_upload() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("ts");
        let file = write_file(&dir, "song.mp3", b"audio");

        server
            .mock("POST", Matcher::Any)
            .with_body(OK_AUDIO)
            .create();

        let mut req = UploadRequest::new("test-token", 1, &file);
        req.thumbnail_path = Some(dir.path().join("cover.jpg"));
        let err = client_for(&server, &state).upload(&req).unwrap_err();

        assert!(matches!(err, UploadError::ThumbnailNotFound(_)), "{:?}", err);
        assert!(!state.exists());
    }

    #[test]
    fn unreadable_rate_state_fails_before_any_request() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("ts");
        fs::write(&state, "not a timestamp").unwrap();
        let file = write_file(&dir, "song.mp3", b"audio");
        let mock = server.mock("POST", Matcher::Any).expect(0).create();

        let mut req = UploadRequest::new("test-token", 1, &file);
        req.min_interval_secs = 5;
        let err = client_for(&server, &state).upload(&req).unwrap_err();

        assert!(matches!(err, UploadError::RateStateRead { .. }));
        mock.assert();
    }

    #[test]
    fn failed_commit_reports_the_delivered_message() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "song.mp3", b"audio");
        // A regular file where the state directory should be.
        let blocker = write_file(&dir, "blocker", b"");

        server
            .mock("POST", "/bottest-token/sendAudio")
            .with_body(OK_AUDIO)
            .create();

        let err = client_for(&server, &blocker.join("ts"))
            .upload(&UploadRequest::new("test-token", 1, &file))
            .unwrap_err();

        match err {
            UploadError::StateWriteFailed { message_id, .. } => assert_eq!(message_id, 321),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("ts");
        // Larger than the conduit buffers, so the encoder is still writing
        // when the connection is refused.
        let file = write_file(&dir, "big.mp3", &vec![0x55; 8 * 1024 * 1024]);

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = UploadClient::new(&UploaderConfig {
            api_base: format!("http://127.0.0.1:{}/bot", port),
            state_path: state.clone(),
            timeout: Duration::from_secs(30),
        })
        .unwrap();

        let err = client
            .upload(&UploadRequest::new("test-token", 1, &file))
            .unwrap_err();

        match err {
            UploadError::Transport(msg) => assert!(!msg.contains("test-token"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!state.exists());
    }

    #[test]
    fn slow_response_times_out() {
        let mut server = Server::new();
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "song.mp3", b"audio");

        server
            .mock("POST", "/bottest-token/sendAudio")
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_secs(3));
                w.write_all(OK_AUDIO.as_bytes())
            })
            .create();

        let client = UploadClient::new(&UploaderConfig {
            api_base: format!("{}/bot", server.url()),
            state_path: dir.path().join("ts"),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let err = client
            .upload(&UploadRequest::new("test-token", 1, &file))
            .unwrap_err();

        assert!(matches!(err, UploadError::Timeout(_)), "{:?}", err);
    }
}
