#[cfg(test)]
mod media_test;

pub mod ogg_writer;
pub mod raw_writer;

use bytes::Bytes;
use rtp::packet::Packet;

use crate::error::Result;
use crate::track::{MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU};

/// Opus TOC byte for a 20ms CELT fullband frame followed by an empty
/// payload; decoders render it as silence.
const OPUS_SILENCE_FRAME: &[u8] = &[0xf8, 0xff, 0xfe];
const PCMU_SILENCE: u8 = 0xff;
const PCMA_SILENCE: u8 = 0xd5;

pub const OPUS_SAMPLE_RATE: u32 = 48000;
pub const OPUS_CHANNEL_COUNT: u8 = 2;
pub const LAW_SAMPLE_RATE: u32 = 8000;
pub const LAW_CHANNEL_COUNT: u8 = 1;

/// Codec selects the recorder implementation and the on-disk file format
/// for a track.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Codec {
    /// Opus payload wrapped in an Ogg container.
    Opus { sample_rate: u32, channel_count: u8 },
    /// G.711 mu-law payload written without a container.
    Pcmu,
    /// G.711 A-law payload written without a container.
    Pcma,
}

impl Codec {
    pub fn opus() -> Self {
        Codec::Opus {
            sample_rate: OPUS_SAMPLE_RATE,
            channel_count: OPUS_CHANNEL_COUNT,
        }
    }

    /// from_mime_type maps a negotiated mime type onto a codec, ignoring case.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        if mime_type.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
            Some(Codec::opus())
        } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_PCMU) {
            Some(Codec::Pcmu)
        } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_PCMA) {
            Some(Codec::Pcma)
        } else {
            None
        }
    }

    /// from_extension maps an audio file extension (without the dot) back
    /// onto a codec.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "opus" => Some(Codec::opus()),
            "pcmu" => Some(Codec::Pcmu),
            "pcma" => Some(Codec::Pcma),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Opus { .. } => "opus",
            Codec::Pcmu => "pcmu",
            Codec::Pcma => "pcma",
        }
    }

    /// silence_frame builds a packet that keeps the timing of `pkt` but
    /// carries silence instead of its payload.
    pub fn silence_frame(&self, pkt: &Packet) -> Packet {
        let payload = match self {
            Codec::Opus { .. } => Bytes::from_static(OPUS_SILENCE_FRAME),
            Codec::Pcmu => Bytes::from(vec![PCMU_SILENCE; pkt.payload.len()]),
            Codec::Pcma => Bytes::from(vec![PCMA_SILENCE; pkt.payload.len()]),
        };

        Packet {
            header: rtp::header::Header {
                version: pkt.header.version,
                marker: pkt.header.marker,
                payload_type: pkt.header.payload_type,
                sequence_number: pkt.header.sequence_number,
                timestamp: pkt.header.timestamp,
                ssrc: pkt.header.ssrc,
                ..Default::default()
            },
            payload,
        }
    }
}

/// MediaWriter turns RTP packets of one track into a media file.
pub trait MediaWriter: Send {
    /// write_rtp adds the content of an RTP packet to the media
    fn write_rtp(&mut self, pkt: &Packet) -> Result<()>;
    /// close finalizes the media
    /// Note: close implementation must be idempotent
    fn close(&mut self) -> Result<()>;
}
