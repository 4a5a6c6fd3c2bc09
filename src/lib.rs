// Library root
// -----------
// The binary (`main.rs`) only parses arguments and reports the outcome;
// everything else lives here so it can be tested without a process.
//
// Module responsibilities:
// - `api`: the blocking upload client and Bot API response handling.
// - `encoder`, `conduit`: streaming multipart body produced on a worker
//   thread behind a bounded pipe.
// - `rate_gate`: file-backed cool-down between successful uploads.
// - `request`: the upload description and audio/document routing.
// - `cli`, `config`, `logging`, `error`: the ambient pieces.
pub mod api;
pub mod cli;
pub mod conduit;
pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod rate_gate;
pub mod request;

pub use api::{UploadClient, UploadResult};
pub use error::UploadError;
pub use request::{FileClassification, UploadRequest};
