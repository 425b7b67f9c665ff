//! Response payloads
//!
//! A payload writes the response body to a stream and may report its length
//! up front. When the length is unknown the connection falls back to chunked
//! encoding or to closing the connection after the body.

use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// The body of a response
pub trait Payload: Send {
    /// Write the payload to `out`
    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<()>;

    /// Length in bytes, or `None` if it is only known once written
    fn length(&self) -> Option<u64>;
}

/// An in-memory payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytesPayload {
    data: Bytes,
}

impl BytesPayload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        BytesPayload { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Payload for BytesPayload {
    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.data)
    }

    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// A payload streamed from a reader of unknown length
pub struct ReaderPayload {
    reader: Box<dyn Read + Send>,
}

impl ReaderPayload {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        ReaderPayload {
            reader: Box::new(reader),
        }
    }
}

impl Payload for ReaderPayload {
    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<()> {
        io::copy(&mut self.reader, out)?;
        Ok(())
    }

    fn length(&self) -> Option<u64> {
        None
    }
}

impl fmt::Debug for ReaderPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReaderPayload")
    }
}

/// A payload read from a file whose size is known when opened
#[derive(Debug)]
pub struct FilePayload {
    file: File,
    length: u64,
}

impl FilePayload {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(FilePayload { file, length })
    }
}

impl Payload for FilePayload {
    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<()> {
        // Never send more than was announced in Content-Length
        let copied = io::copy(&mut (&mut self.file).take(self.length), out)?;
        if copied < self.length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being sent",
            ));
        }
        Ok(())
    }

    fn length(&self) -> Option<u64> {
        Some(self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_bytes_payload() {
        let mut payload = BytesPayload::new("Hello");
        assert_eq!(payload.length(), Some(5));

        let mut out = Vec::new();
        payload.write_to(&mut out).unwrap();
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn test_reader_payload_has_unknown_length() {
        let mut payload = ReaderPayload::new(Cursor::new(b"streamed".to_vec()));
        assert_eq!(payload.length(), None);

        let mut out = Vec::new();
        payload.write_to(&mut out).unwrap();
        assert_eq!(out, b"streamed");
    }

    #[test]
    fn test_file_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file contents").unwrap();

        let mut payload = FilePayload::open(file.path()).unwrap();
        assert_eq!(payload.length(), Some(13));

        let mut out = Vec::new();
        payload.write_to(&mut out).unwrap();
        assert_eq!(out, b"file contents");
    }
}
