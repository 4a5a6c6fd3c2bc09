// Streaming multipart/form-data encoder.
//
// The body is written part by part into any `Write`; `spawn` runs that on
// a worker thread feeding a bounded conduit, so the HTTP client can read
// the body while it is produced and the file is never held in memory.

use crate::conduit::{self, ConduitReader};
use crate::error::{Result, UploadError};
use crate::request::{FileClassification, UploadRequest};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::debug;
use uuid::Uuid;

/// A text field of the form, in the order it is written.
pub type FormField = (&'static str, String);

#[derive(Debug, Clone)]
pub struct StreamEncoder {
    boundary: String,
    file_field: &'static str,
    file_path: PathBuf,
    fields: Vec<FormField>,
    thumbnail_path: Option<PathBuf>,
}

impl StreamEncoder {
    /// Plan the body for `req`. Nothing is read from disk until encoding.
    pub fn new(req: &UploadRequest) -> Self {
        let classification = req.classification();
        Self {
            boundary: format!("tgup{}", Uuid::new_v4().simple()),
            file_field: classification.field_name(),
            file_path: req.file_path.clone(),
            fields: form_fields(req, classification),
            thumbnail_path: req.thumbnail_path.clone(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    /// Write the whole body into `w`. The closing boundary is written even
    /// when a part fails, and the part's error is returned afterwards.
    pub fn encode_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let parts = self.write_parts(w);
        let trailer = write!(w, "--{}--\r\n", self.boundary).map_err(write_error);
        parts.and(trailer)
    }

    /// Start encoding on a worker thread. The returned reader yields the
    /// body; if encoding fails, its next read fails too. The join handle
    /// carries the encoder's own error for reporting.
    pub fn spawn(
        self,
        capacity: usize,
        chunk_size: usize,
    ) -> (ConduitReader, JoinHandle<Result<()>>) {
        let (mut writer, reader) = conduit::pipe(capacity, chunk_size);
        let handle = thread::spawn(move || match self.encode_to(&mut writer) {
            Ok(()) => writer.finish().map_err(write_error),
            Err(e) => {
                writer.fail(io::Error::other(e.to_string()));
                Err(e)
            }
        });
        (reader, handle)
    }

    fn write_parts<W: Write>(&self, w: &mut W) -> Result<()> {
        self.write_file_part(w, self.file_field, &self.file_path)
            .map_err(|e| match e {
                PartError::Missing => UploadError::FileNotFound(self.file_path.clone()),
                PartError::Failed(e) => e,
            })?;

        for (name, value) in &self.fields {
            debug!("form field {}={:?}", name, value);
            write!(
                w,
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .map_err(write_error)?;
        }

        if let Some(thumb) = &self.thumbnail_path {
            self.write_file_part(w, "thumb", thumb).map_err(|e| match e {
                PartError::Missing => UploadError::ThumbnailNotFound(thumb.clone()),
                PartError::Failed(e) => e,
            })?;
        }
        Ok(())
    }

    fn write_file_part<W: Write>(
        &self,
        w: &mut W,
        name: &str,
        path: &Path,
    ) -> std::result::Result<(), PartError> {
        if !path.exists() {
            return Err(PartError::Missing);
        }
        let mut file = File::open(path).map_err(|e| {
            PartError::Failed(UploadError::Streaming(format!(
                "failed to open {}: {}",
                path.display(),
                e
            )))
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        write!(
            w,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            self.boundary,
            name,
            escape_quotes(&file_name)
        )
        .map_err(|e| PartError::Failed(write_error(e)))?;

        // io::copy cannot say which side failed; only the conduit reports BrokenPipe.
        let copied = io::copy(&mut file, w).map_err(|e| {
            PartError::Failed(match e.kind() {
                io::ErrorKind::BrokenPipe => UploadError::BodyAborted,
                _ => UploadError::Streaming(format!(
                    "failed to stream {}: {}",
                    path.display(),
                    e
                )),
            })
        })?;
        w.write_all(b"\r\n").map_err(|e| PartError::Failed(write_error(e)))?;
        debug!("streamed {} bytes of {} as {:?}", copied, path.display(), name);
        Ok(())
    }
}

enum PartError {
    Missing,
    Failed(UploadError),
}

fn write_error(e: io::Error) -> UploadError {
    match e.kind() {
        io::ErrorKind::BrokenPipe => UploadError::BodyAborted,
        _ => UploadError::Streaming(format!("failed to write request body: {}", e)),
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Scalar fields for `req`, skipping the ones with nothing to say.
pub fn form_fields(req: &UploadRequest, classification: FileClassification) -> Vec<FormField> {
    let mut fields = vec![("chat_id", req.chat_id.to_string())];

    if req.reply_to_message_id != 0 {
        fields.push(("reply_to_message_id", req.reply_to_message_id.to_string()));
    }
    if let Some(mode) = non_empty(&req.parse_mode) {
        fields.push(("parse_mode", mode.to_string()));
    }

    match classification {
        FileClassification::Audio => {
            if let Some(title) = non_empty(&req.title) {
                fields.push(("title", title.to_string()));
            }
            if let Some(performer) = non_empty(&req.performer) {
                fields.push(("performer", performer.to_string()));
            }
            if req.duration > 0 {
                fields.push(("duration", req.duration.to_string()));
            }
            fields.push(("supports_streaming", "true".to_string()));
        }
        FileClassification::Document => {
            if let Some(title) = non_empty(&req.title) {
                fields.push(("caption", title.to_string()));
            }
        }
    }
    fields
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
