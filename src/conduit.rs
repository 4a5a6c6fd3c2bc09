// Bounded in-memory pipe between the encoder thread and the HTTP body.
//
// The writer half buffers into chunks and hands them over a
// `sync_channel`, so a slow consumer stalls the producer once `capacity`
// chunks are in flight. The producer must end the stream explicitly with
// `finish` or `fail`; a writer that is dropped without either is reported
// to the reader as an unexpected EOF rather than a clean end of body.

use std::io::{self, Read, Write};
use std::mem;
use std::sync::mpsc::{self, Receiver, SyncSender};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_CAPACITY: usize = 16;

enum Frame {
    Data(Vec<u8>),
    End,
    Failed(io::ErrorKind, String),
}

/// Create a connected writer/reader pair. At most roughly
/// `capacity * chunk_size` bytes are buffered at any time.
pub fn pipe(capacity: usize, chunk_size: usize) -> (ConduitWriter, ConduitReader) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let chunk_size = chunk_size.max(1);
    (
        ConduitWriter {
            tx,
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
        },
        ConduitReader {
            rx,
            current: Vec::new(),
            pos: 0,
            state: ReadState::Open,
        },
    )
}

pub struct ConduitWriter {
    tx: SyncSender<Frame>,
    buf: Vec<u8>,
    chunk_size: usize,
}

impl ConduitWriter {
    fn send(&self, frame: Frame) -> io::Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "body reader went away"))
    }

    fn flush_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        self.send(Frame::Data(chunk))
    }

    /// Flush buffered bytes and signal a clean end of stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.flush_chunk()?;
        self.send(Frame::End)
    }

    /// Flush buffered bytes, then make the reader's next read fail with
    /// `err`. Everything written before the failure is still delivered.
    pub fn fail(mut self, err: io::Error) {
        // The reader may already be gone; there is nobody left to tell.
        let _ = self.flush_chunk();
        let _ = self.send(Frame::Failed(err.kind(), err.to_string()));
    }
}

impl Write for ConduitWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == self.chunk_size {
            self.flush_chunk()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_chunk()
    }
}

enum ReadState {
    Open,
    Ended,
    Failed(io::ErrorKind, String),
}

pub struct ConduitReader {
    rx: Receiver<Frame>,
    current: Vec<u8>,
    pos: usize,
    state: ReadState,
}

impl Read for ConduitReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.current.len() {
                let n = (self.current.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }

            match &self.state {
                ReadState::Ended => return Ok(0),
                ReadState::Failed(kind, msg) => return Err(io::Error::new(*kind, msg.clone())),
                ReadState::Open => {}
            }

            match self.rx.recv() {
                Ok(Frame::Data(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Ok(Frame::End) => self.state = ReadState::Ended,
                Ok(Frame::Failed(kind, msg)) => self.state = ReadState::Failed(kind, msg),
                Err(_) => {
                    self.state = ReadState::Failed(
                        io::ErrorKind::UnexpectedEof,
                        "body writer stopped without finishing".to_string(),
                    )
                }
            }
        }
    }
}
