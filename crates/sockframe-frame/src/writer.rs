use std::io::{ErrorKind, Write};

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes complete frames to any `Write` stream (blocking).
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Write a complete frame.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_message(frame.msg_type, frame.payload.as_ref())
    }

    /// Write cookie, type, length and body, in that order.
    ///
    /// Each buffer is written to completion before the next one starts.
    pub fn write_message(&mut self, msg_type: i64, body: &[u8]) -> Result<()> {
        if let Some(max) = self.config.max_payload_size {
            if body.len() > max {
                return Err(FrameError::PayloadTooLarge {
                    size: body.len(),
                    max,
                });
            }
        }

        let cookie = self.config.cookie.to_ne_bytes();
        let msg_type = msg_type.to_ne_bytes();
        let length = (body.len() as i64).to_ne_bytes();
        let buffers: [&[u8]; 4] = [&cookie, &msg_type, &length, body];

        for buffer in buffers {
            self.write_buffer(buffer)?;
        }
        self.flush()
    }

    /// Write one buffer completely, retrying interrupted writes.
    fn write_buffer(&mut self, buffer: &[u8]) -> Result<()> {
        let mut position = 0usize;
        while position < buffer.len() {
            match self.inner.write(&buffer[position..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => position += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
