use std::io::{self, Read, Write};

use lansync_config::CHUNK_SIZE;
use lansync_core::entities::WireMessage;
use lansync_core::helpers::create_buffer;
use lansync_core::utils::Logger;

static LOGGER: Logger = Logger::verbose("Wire");

/// Reassembles newline-framed control messages from a byte stream, carrying
/// whatever the last read left over. After a FILE header the payload bytes
/// are pulled through `read_body` before line framing resumes.
pub struct FrameReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> FrameReader<R> {
        FrameReader {
            inner,
            buf: Vec::new(),
        }
    }

    /// Next control frame. Frames with an unknown `type` are skipped.
    /// Ok(None) is EOF on a frame boundary; EOF inside a frame is an error.
    pub fn read_frame(&mut self) -> io::Result<Option<WireMessage>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = std::str::from_utf8(&line[..line.len() - 1])
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame is not utf-8"))?;
                match WireMessage::decode_line(line) {
                    Ok(Some(msg)) => return Ok(Some(msg)),
                    Ok(None) => {
                        LOGGER.debug(format!("skipping unknown frame: {}", line));
                        continue;
                    }
                    Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                }
            }

            let mut chunk = create_buffer(CHUNK_SIZE);
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Copy exactly `size` payload bytes into `sink`, draining the line
    /// lookahead first. Anything short is an UnexpectedEof: the following
    /// bytes could no longer be told apart from payload.
    pub fn read_body<W: Write>(&mut self, size: u64, sink: &mut W) -> io::Result<()> {
        let mut remaining = size;

        if !self.buf.is_empty() {
            let take = (self.buf.len() as u64).min(remaining) as usize;
            sink.write_all(&self.buf[..take])?;
            self.buf.drain(..take);
            remaining -= take as u64;
        }

        let mut chunk = create_buffer(CHUNK_SIZE);
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let n = self.inner.read(&mut chunk[..want])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-payload",
                ));
            }
            sink.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// One serialized control frame: compact JSON plus the newline.
pub fn write_frame<W: Write>(w: &mut W, msg: &WireMessage) -> io::Result<()> {
    let line = msg
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    w.write_all(line.as_bytes())?;
    w.write_all(b"\n")
}

#[cfg(test)]
mod unit_tests {
    use std::io::Cursor;

    use super::*;

    /// Hands out one byte per read to exercise reassembly across reads.
    struct OneByteReader {
        data: Vec<u8>,
        pos: usize,
    }
    impl Read for OneByteReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.data.len() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    fn vote_frame() -> (WireMessage, Vec<u8>) {
        let msg = WireMessage::ConsensusVote {
            hash: String::from("abcd"),
            name: String::from("chosen.txt"),
        };
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &msg).unwrap();
        (msg, bytes)
    }

    #[test]
    fn test_frame_roundtrip() {
        let (msg, bytes) = vote_frame();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_frame().unwrap(), Some(msg));
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn test_reassembly_across_partial_reads() {
        let (msg, mut bytes) = vote_frame();
        let (msg2, bytes2) = vote_frame();
        bytes.extend_from_slice(&bytes2);

        let mut reader = FrameReader::new(OneByteReader { data: bytes, pos: 0 });
        assert_eq!(reader.read_frame().unwrap(), Some(msg));
        assert_eq!(reader.read_frame().unwrap(), Some(msg2));
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn test_unknown_frames_are_skipped() {
        let (msg, bytes) = vote_frame();
        let mut stream = b"{\"type\":\"HELLO\",\"extra\":true}\n".to_vec();
        stream.extend_from_slice(&bytes);

        let mut reader = FrameReader::new(Cursor::new(stream));
        assert_eq!(reader.read_frame().unwrap(), Some(msg));
    }

    #[test]
    fn test_bad_json_is_a_framing_error() {
        let mut reader = FrameReader::new(Cursor::new(b"this is not json\n".to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_eof_mid_frame_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(b"{\"type\":\"DONE\"".to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_body_follows_header_then_framing_resumes() {
        let header = WireMessage::File {
            path: String::from("a.bin"),
            size: 5,
            hash: String::from("ab"),
        };
        let mut stream = Vec::new();
        write_frame(&mut stream, &header).unwrap();
        stream.extend_from_slice(b"\x00\x01\n\x02\x03"); // payload may contain newlines
        let (next, next_bytes) = vote_frame();
        stream.extend_from_slice(&next_bytes);

        let mut reader = FrameReader::new(OneByteReader { data: stream, pos: 0 });
        assert_eq!(reader.read_frame().unwrap(), Some(header));

        let mut body = Vec::new();
        reader.read_body(5, &mut body).unwrap();
        assert_eq!(body, b"\x00\x01\n\x02\x03");

        assert_eq!(reader.read_frame().unwrap(), Some(next));
    }

    #[test]
    fn test_body_drains_lookahead_buffer() {
        let header = WireMessage::File {
            path: String::from("a.bin"),
            size: 3,
            hash: String::from("ab"),
        };
        let mut stream = Vec::new();
        write_frame(&mut stream, &header).unwrap();
        stream.extend_from_slice(b"xyz");

        // A single big read pulls header and payload into the buffer together.
        let mut reader = FrameReader::new(Cursor::new(stream));
        assert_eq!(reader.read_frame().unwrap(), Some(header));
        let mut body = Vec::new();
        reader.read_body(3, &mut body).unwrap();
        assert_eq!(body, b"xyz");
    }

    #[test]
    fn test_short_body_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(b"abc".to_vec()));
        let mut body = Vec::new();
        let err = reader.read_body(10, &mut body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
