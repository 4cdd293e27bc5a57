//! Chunked transfer-coding: request-body decoding and response-body encoding.

use super::request::Progress;
use super::ParseError;

#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a `<hex-size>[;ext]\r\n` line.
    Size,
    /// `remaining` data bytes of the current chunk still to read.
    Data(usize),
    /// The `\r\n` that follows a chunk's data.
    DataTrailer,
    /// The final `\r\n`-terminated (possibly empty) trailer section after the zero chunk.
    Trailers,
    /// Decoding finished; no more input should be fed.
    Done,
}

/// Incrementally decodes a chunked request body. Bytes may arrive split across arbitrarily many
/// reads, so each [`ChunkedDecoder::feed`] call consumes as much of its input as it can and
/// reports how far it got.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        ChunkedDecoder { state: State::Size }
    }
}

impl ChunkedDecoder {
    /// A fresh decoder at the start of a chunked body.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the terminating zero-length chunk and its trailer section have been consumed.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Consumes as many complete chunks as `input` contains, appending decoded data to `out`.
    /// Returns how many bytes of `input` were consumed. Call [`ChunkedDecoder::is_done`]
    /// afterward to check whether the body is complete.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, ParseError> {
        let mut pos = 0;

        loop {
            match self.state {
                State::Done => return Ok(pos),
                State::Size => {
                    let Some(nl) = find_crlf(&input[pos..]) else {
                        return Ok(pos);
                    };
                    let line = &input[pos..pos + nl];
                    let size_str = line
                        .split(|&b| b == b';')
                        .next()
                        .unwrap_or(line);
                    let size_str =
                        std::str::from_utf8(size_str).map_err(|_| ParseError::ChunkFraming)?;
                    let size = usize::from_str_radix(size_str.trim(), 16)
                        .map_err(|_| ParseError::ChunkFraming)?;
                    pos += nl + 2;
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::Data(size)
                    };
                }
                State::Data(remaining) => {
                    let available = input.len() - pos;
                    if available == 0 {
                        return Ok(pos);
                    }
                    let take = remaining.min(available);
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.state = if take == remaining {
                        State::DataTrailer
                    } else {
                        State::Data(remaining - take)
                    };
                    if matches!(self.state, State::Data(_)) {
                        return Ok(pos);
                    }
                }
                State::DataTrailer => {
                    if input.len() - pos < 2 {
                        return Ok(pos);
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(ParseError::ChunkFraming);
                    }
                    pos += 2;
                    self.state = State::Size;
                }
                State::Trailers => {
                    let Some(nl) = find_crlf(&input[pos..]) else {
                        return Ok(pos);
                    };
                    if nl == 0 {
                        pos += 2;
                        self.state = State::Done;
                        return Ok(pos);
                    }
                    // Trailer header lines are parsed and discarded; the server does not
                    // expose trailers to handlers.
                    pos += nl + 2;
                }
            }
        }
    }

    /// Decodes a complete, self-contained chunked body in one call.
    pub fn decode_all(input: &[u8]) -> Result<Progress<Vec<u8>>, ParseError> {
        let mut decoder = Self::new();
        let mut out = Vec::new();
        let consumed = decoder.feed(input, &mut out)?;
        if decoder.is_done() {
            Ok(Progress::Complete(out, consumed))
        } else {
            Ok(Progress::Partial)
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Encodes one chunk: `hex(len)\r\n<data>\r\n`. Callers must not emit an empty chunk through this
/// path — use [`encode_last_chunk`] to terminate the stream instead.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// The terminating zero-size chunk with an empty trailer section.
pub const fn encode_last_chunk() -> &'static [u8] {
    b"0\r\n\r\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_chunked_body() {
        let wire = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let Progress::Complete(body, consumed) = ChunkedDecoder::decode_all(wire).unwrap() else {
            panic!("expected complete decode");
        };
        assert_eq!(b"Wikipedia", body.as_slice());
        assert_eq!(wire.len(), consumed);
    }

    #[test]
    fn reports_partial_mid_chunk() {
        let wire = b"4\r\nWi";
        assert!(matches!(
            ChunkedDecoder::decode_all(wire).unwrap(),
            Progress::Partial
        ));
    }

    #[test]
    fn feed_accepts_input_split_across_many_calls() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        for byte in b"3\r\nabc\r\n0\r\n\r\n" {
            let consumed = decoder.feed(std::slice::from_ref(byte), &mut out).unwrap();
            assert_eq!(1, consumed);
        }

        assert!(decoder.is_done());
        assert_eq!(b"abc", out.as_slice());
    }

    #[test]
    fn rejects_non_hex_chunk_size() {
        let wire = b"zz\r\nabc\r\n0\r\n\r\n";
        assert!(ChunkedDecoder::decode_all(wire).is_err());
    }

    #[test]
    fn skips_trailer_headers_after_the_last_chunk() {
        let wire = b"0\r\nX-Checksum: deadbeef\r\n\r\n";
        let Progress::Complete(body, consumed) = ChunkedDecoder::decode_all(wire).unwrap() else {
            panic!("expected complete decode");
        };
        assert!(body.is_empty());
        assert_eq!(wire.len(), consumed);
    }

    #[test]
    fn encode_chunk_matches_wire_format() {
        assert_eq!(b"3\r\nabc\r\n".to_vec(), encode_chunk(b"abc"));
        assert_eq!(b"0\r\n\r\n", encode_last_chunk());
    }
}
