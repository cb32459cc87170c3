use std::io::{ErrorKind, Read};

use bytes::Bytes;
use tracing::debug;

use crate::codec::{Frame, FrameConfig, FrameHeader, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete frames from any `Read` stream (blocking).
///
/// Reads exactly one header and exactly one body per frame and never
/// buffers ahead, so the stream is left positioned on the next frame
/// boundary after every call.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next frame and require it to carry `expected_type`.
    ///
    /// Cookie and type mismatches are returned as errors; the body of a
    /// mismatched frame is left unread.
    pub fn read_message(&mut self, expected_type: i64) -> Result<Bytes> {
        let header = self.read_header()?;
        let length = header.validate(&self.config).inspect_err(|err| {
            debug!(error = %err, "rejecting frame header");
        })?;
        if header.msg_type != expected_type {
            return Err(FrameError::TypeMismatch {
                expected: expected_type,
                received: header.msg_type,
            });
        }
        self.read_body(length)
    }

    /// Read the next frame of any type.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let header = self.read_header()?;
        let length = header.validate(&self.config)?;
        let payload = self.read_body(length)?;
        Ok(Frame {
            msg_type: header.msg_type,
            payload,
        })
    }

    /// Read and decode one header without validating it.
    pub fn read_header(&mut self) -> Result<FrameHeader> {
        let mut raw = [0u8; HEADER_SIZE];
        self.read_full(&mut raw)?;
        Ok(FrameHeader::decode(&raw))
    }

    fn read_body(&mut self, length: usize) -> Result<Bytes> {
        let mut body = vec![0u8; length];
        self.read_full(&mut body)?;
        Ok(Bytes::from(body))
    }

    /// Fill `buf` completely, retrying interrupted reads.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut position = 0usize;
        while position < buf.len() {
            match self.inner.read(&mut buf[position..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => position += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(FrameError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to read data from the socket: {err}"),
                    )))
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_frame;

    const COOKIE: i64 = 77;

    fn reader_over(wire: Vec<u8>) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::with_config(Cursor::new(wire), FrameConfig::with_cookie(COOKIE))
    }

    fn wire_of(frames: &[(i64, &[u8])]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for (msg_type, payload) in frames {
            encode_frame(COOKIE, *msg_type, payload, &mut wire);
        }
        wire.to_vec()
    }

    #[test]
    fn read_expected_message() {
        let mut reader = reader_over(wire_of(&[(3, b"hello")]));
        assert_eq!(reader.read_message(3).unwrap().as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames_in_order() {
        let mut reader = reader_over(wire_of(&[(1, b"one"), (2, b"two"), (3, b"three")]));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.msg_type, f1.payload.as_ref()), (1, b"one".as_ref()));
        assert_eq!((f2.msg_type, f2.payload.as_ref()), (2, b"two".as_ref()));
        assert_eq!((f3.msg_type, f3.payload.as_ref()), (3, b"three".as_ref()));
    }

    #[test]
    fn does_not_read_past_frame_boundary() {
        let wire = wire_of(&[(1, b"first"), (2, b"second")]);
        let first_len = (HEADER_SIZE + 5) as u64;
        let mut reader = reader_over(wire);

        reader.read_message(1).unwrap();
        assert_eq!(reader.get_ref().position(), first_len);
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let mut reader = reader_over(wire_of(&[(9, b"x")]));
        let err = reader.read_message(4).unwrap_err();

        assert!(matches!(
            err,
            FrameError::TypeMismatch {
                expected: 4,
                received: 9
            }
        ));
        let text = err.to_string();
        assert!(text.contains('4') && text.contains('9'));
    }

    #[test]
    fn cookie_mismatch_fails_read() {
        let mut wire = BytesMut::new();
        encode_frame(COOKIE + 1, 1, b"bad", &mut wire);

        let mut reader = reader_over(wire.to_vec());
        let err = reader.read_message(1).unwrap_err();
        assert!(matches!(err, FrameError::CookieMismatch { .. }));
        assert!(err.to_string().contains(&(COOKIE + 1).to_string()));
    }

    #[test]
    fn empty_body_roundtrip() {
        let mut reader = reader_over(wire_of(&[(5, b"")]));
        assert!(reader.read_message(5).unwrap().is_empty());
    }

    #[test]
    fn large_body() {
        let payload = vec![0xAB; 256 * 1024];
        let mut reader = reader_over(wire_of(&[(6, &payload)]));
        assert_eq!(reader.read_message(6).unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire_of(&[(4, b"slow")]),
            pos: 0,
        };
        let mut reader = FrameReader::with_config(byte_reader, FrameConfig::with_cookie(COOKIE));

        assert_eq!(reader.read_message(4).unwrap().as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = reader_over(Vec::new());
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn connection_closed_mid_body() {
        let mut partial = BytesMut::new();
        partial.put_slice(&FrameHeader::new(COOKIE, 2, 16).encode());
        partial.put_slice(b"only-part");

        let mut reader = reader_over(partial.to_vec());
        assert!(matches!(
            reader.read_message(2).unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = ErrorOnceThenData {
            kind: ErrorKind::Interrupted,
            fired: false,
            inner: Cursor::new(wire_of(&[(8, b"ok")])),
        };
        let mut framed = FrameReader::with_config(reader, FrameConfig::with_cookie(COOKIE));

        assert_eq!(framed.read_message(8).unwrap().as_ref(), b"ok");
    }

    #[test]
    fn not_found_is_reported_as_socket_read_failure() {
        let reader = ErrorOnceThenData {
            kind: ErrorKind::NotFound,
            fired: false,
            inner: Cursor::new(wire_of(&[(8, b"ok")])),
        };
        let mut framed = FrameReader::with_config(reader, FrameConfig::with_cookie(COOKIE));

        let err = framed.read_message(8).unwrap_err();
        assert!(
            matches!(&err, FrameError::Io(e) if e.kind() == ErrorKind::NotFound
                && e.to_string().starts_with("failed to read data from the socket"))
        );
    }

    #[test]
    fn other_errors_propagate() {
        let reader = ErrorOnceThenData {
            kind: ErrorKind::ConnectionReset,
            fired: false,
            inner: Cursor::new(wire_of(&[(8, b"ok")])),
        };
        let mut framed = FrameReader::with_config(reader, FrameConfig::with_cookie(COOKIE));

        let err = framed.read_message(8).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::ConnectionReset));
    }

    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let config = FrameConfig::with_cookie(COOKIE);
        let mut writer = crate::writer::FrameWriter::with_config(left, config);
        let mut reader = FrameReader::with_config(right, config);

        for (i, payload) in [&b""[..], b"a", &[0u8; 4096][..]].iter().enumerate() {
            writer.write_message(i as i64, payload).unwrap();
            assert_eq!(reader.read_message(i as i64).unwrap().as_ref(), *payload);
        }
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct ErrorOnceThenData {
        kind: ErrorKind,
        fired: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for ErrorOnceThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.fired {
                self.fired = true;
                return Err(std::io::Error::from(self.kind));
            }
            self.inner.read(buf)
        }
    }
}
