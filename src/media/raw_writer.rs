use std::io::Write;

use rtp::packet::Packet;

use super::MediaWriter;
use crate::error::{Error, Result};

/// RawWriter writes bare RTP payloads back to back. It is used for
/// G.711 tracks, whose payload is already a plain sample stream.
pub struct RawWriter<W: Write> {
    writer: W,
    bytes_written: usize,
    closed: bool,
}

impl<W: Write> RawWriter<W> {
    pub fn new(writer: W) -> Self {
        RawWriter {
            writer,
            bytes_written: 0,
            closed: false,
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl<W: Write + Send> MediaWriter for RawWriter<W> {
    fn write_rtp(&mut self, pkt: &Packet) -> Result<()> {
        if self.closed {
            return Err(Error::ErrRecorderClosed);
        }
        self.writer.write_all(&pkt.payload)?;
        self.bytes_written += pkt.payload.len();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.flush()?;
        Ok(())
    }
}
