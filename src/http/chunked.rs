//! Chunked transfer coding
//!
//! [`ChunkedWriter`] frames response bodies whose length is not known up
//! front. [`ChunkedDecoder`] undoes the framing and is fed arbitrary
//! fragments of input.

use super::{Error, Result, CRLF};
use std::io::{self, Write};

/// Longest chunk-size or trailer line accepted by the decoder
const MAX_LINE: usize = 4096;

/// Writes each non-empty `write` as one chunk
///
/// Wrap it in a `BufWriter` to control the chunk size. Call
/// [`finish`](ChunkedWriter::finish) to emit the terminating zero-length
/// chunk; later writes fail.
pub struct ChunkedWriter<W: Write> {
    inner: W,
    finished: bool,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        ChunkedWriter {
            inner,
            finished: false,
        }
    }

    /// Write the last chunk and flush
    ///
    /// Calling it more than once only flushes.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.finished {
            self.finished = true;
            self.inner.write_all(b"0\r\n\r\n")?;
        }
        self.inner.flush()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "chunked body already finished",
            ));
        }
        // An empty chunk would terminate the body
        if buf.is_empty() {
            return Ok(0);
        }
        write!(self.inner, "{:x}\r\n", buf.len())?;
        self.inner.write_all(buf)?;
        self.inner.write_all(CRLF.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Size,
    Data,
    DataEnd,
    Trailer,
    Done,
}

/// Incremental decoder for chunked bodies
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecodeState,
    line: Vec<u8>,
    remaining: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecodeState::Size,
            line: Vec::new(),
            remaining: 0,
        }
    }

    /// Decode as much of `input` as possible, appending data to `output`
    ///
    /// Returns the number of bytes consumed. Once the body is complete no
    /// further input is consumed, so whatever follows it (e.g. the next
    /// pipelined request) is left to the caller.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<usize> {
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                DecodeState::Done => break,
                DecodeState::Data => {
                    let available = (input.len() - pos) as u64;
                    let n = self.remaining.min(available) as usize;
                    output.extend_from_slice(&input[pos..pos + n]);
                    pos += n;
                    self.remaining -= n as u64;
                    if self.remaining == 0 {
                        self.state = DecodeState::DataEnd;
                    }
                }
                DecodeState::Size | DecodeState::DataEnd | DecodeState::Trailer => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        break;
                    };
                    self.end_line(&line)?;
                }
            }
        }

        Ok(pos)
    }

    /// Accumulate up to and including LF; returns the line without CRLF
    fn take_line(&mut self, input: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>> {
        let rest = &input[*pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                self.line.extend_from_slice(&rest[..i]);
                *pos += i + 1;
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            None => {
                self.line.extend_from_slice(rest);
                *pos = input.len();
                if self.line.len() > MAX_LINE {
                    return Err(Error::Protocol("chunk line too long".to_string()));
                }
                Ok(None)
            }
        }
    }

    fn end_line(&mut self, line: &[u8]) -> Result<()> {
        match self.state {
            DecodeState::Size => {
                let text = String::from_utf8_lossy(line);
                // chunk extensions follow ';' and are ignored
                let size = text.split(';').next().unwrap_or_default().trim();
                self.remaining = u64::from_str_radix(size, 16)
                    .map_err(|_| Error::InvalidChunkSize(size.to_string()))?;
                self.state = if self.remaining == 0 {
                    DecodeState::Trailer
                } else {
                    DecodeState::Data
                };
            }
            DecodeState::DataEnd => {
                if !line.is_empty() {
                    return Err(Error::Protocol("expected CRLF after chunk data".to_string()));
                }
                self.state = DecodeState::Size;
            }
            DecodeState::Trailer => {
                // trailer fields are discarded
                if line.is_empty() {
                    self.state = DecodeState::Done;
                }
            }
            DecodeState::Data | DecodeState::Done => {}
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.state == DecodeState::Done
    }

    pub fn reset(&mut self) {
        *self = ChunkedDecoder::new();
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a complete chunked body
pub fn decode_chunked(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = Vec::with_capacity(input.len());
    decoder.decode(input, &mut output)?;
    if !decoder.is_complete() {
        return Err(Error::Incomplete);
    }
    Ok(output)
}

/// Encode `data` as a chunked body using chunks of at most `chunk_size` bytes
pub fn encode_chunked(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut writer = ChunkedWriter::new(Vec::with_capacity(data.len() + 32));
    for chunk in data.chunks(chunk_size.max(1)) {
        // writes to a Vec cannot fail
        let _ = writer.write_all(chunk);
    }
    let _ = writer.finish();
    writer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;

    fn buffered_round_trip(len: usize, buffer: usize) -> (Vec<u8>, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut chunked = ChunkedWriter::new(Vec::new());
        {
            let mut out = BufWriter::with_capacity(buffer, &mut chunked);
            for piece in data.chunks(128) {
                out.write_all(piece).unwrap();
            }
            out.flush().unwrap();
        }
        chunked.finish().unwrap();
        (data, chunked.into_inner())
    }

    #[test]
    fn test_write_chunks() {
        let mut writer = ChunkedWriter::new(Vec::new());
        writer.write_all(b"Hello").unwrap();
        writer.write_all(b"").unwrap();
        writer.write_all(b", World!").unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.into_inner(), b"5\r\nHello\r\n8\r\n, World!\r\n0\r\n\r\n");
    }

    #[test]
    fn test_empty_body() {
        let (data, encoded) = buffered_round_trip(0, 4096);
        assert_eq!(encoded, b"0\r\n\r\n");
        assert_eq!(decode_chunked(&encoded).unwrap(), data);
    }

    #[test]
    fn test_single_byte_body() {
        let (data, encoded) = buffered_round_trip(1, 4096);
        assert_eq!(encoded, b"1\r\n\0\r\n0\r\n\r\n");
        assert_eq!(decode_chunked(&encoded).unwrap(), data);
    }

    #[test]
    fn test_body_larger_than_buffer() {
        let (data, encoded) = buffered_round_trip(10_000, 4096);
        assert!(encoded.starts_with(b"1000\r\n"));
        assert_eq!(decode_chunked(&encoded).unwrap(), data);
    }

    #[test]
    fn test_write_after_finish_fails() {
        let mut writer = ChunkedWriter::new(Vec::new());
        writer.finish().unwrap();
        writer.finish().unwrap();
        assert!(writer.is_finished());
        assert!(writer.write_all(b"late").is_err());
        assert_eq!(writer.into_inner(), b"0\r\n\r\n");
    }

    #[test]
    fn test_decode_extensions_and_trailers() {
        let input = b"5;name=value\r\nHello\r\nA\r\n0123456789\r\n0\r\nExpires: never\r\n\r\n";
        assert_eq!(decode_chunked(input).unwrap(), b"Hello0123456789");
    }

    #[test]
    fn test_decode_byte_at_a_time_stops_at_end() {
        let mut input = encode_chunked(b"pipelined body", 4);
        let body_len = input.len();
        input.extend_from_slice(b"GET / HTTP/1.1\r\n");

        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();
        let mut consumed = 0;
        for i in 0..input.len() {
            consumed += decoder.decode(&input[i..i + 1], &mut output).unwrap();
        }
        assert!(decoder.is_complete());
        assert_eq!(consumed, body_len);
        assert_eq!(output, b"pipelined body");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_chunked(b"xyz\r\nHello\r\n0\r\n\r\n"),
            Err(Error::InvalidChunkSize(_))
        ));
        assert!(matches!(
            decode_chunked(b"2\r\nHello\r\n0\r\n\r\n"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(decode_chunked(b"5\r\nHel"), Err(Error::Incomplete)));
    }

    #[test]
    fn test_reset() {
        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();
        decoder.decode(b"0\r\n\r\n", &mut output).unwrap();
        assert!(decoder.is_complete());
        decoder.reset();
        assert!(!decoder.is_complete());
        decoder.decode(b"1\r\nx\r\n0\r\n\r\n", &mut output).unwrap();
        assert_eq!(output, b"x");
    }
}
