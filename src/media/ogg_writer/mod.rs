
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use rtp::packet::Packet;

use super::MediaWriter;
use crate::error::{Error, Result};

pub const PAGE_HEADER_TYPE_CONTINUATION_OF_STREAM: u8 = 0x00;
pub const PAGE_HEADER_TYPE_BEGINNING_OF_STREAM: u8 = 0x02;
pub const PAGE_HEADER_TYPE_END_OF_STREAM: u8 = 0x04;
pub const DEFAULT_PRE_SKIP: u16 = 3840; // 3840 recommended in the RFC
pub const PAGE_HEADER_SIGNATURE: &[u8] = b"OggS";
pub const ID_PAGE_SIGNATURE: &[u8] = b"OpusHead";
pub const COMMENT_PAGE_SIGNATURE: &[u8] = b"OpusTags";
pub const PAGE_HEADER_SIZE: usize = 27;

const VENDOR: &[u8] = b"webrtc-recorder";

/// OggWriter wraps Opus RTP payloads into an Ogg Opus stream (RFC 7845).
///
/// The target only needs `Write`: pages are emitted strictly in order and
/// the writer never seeks back, so it can feed a buffered chunk sink.
pub struct OggWriter<W: Write> {
    writer: W,
    sample_rate: u32,
    channel_count: u8,
    serial: u32,
    page_index: u32,
    checksum_table: [u32; 256],
    previous_granule_position: u64,
    previous_timestamp: u32,
    closed: bool,
}

impl<W: Write> OggWriter<W> {
    /// new writes the Opus ID and comment headers to `writer`
    pub fn new(writer: W, sample_rate: u32, channel_count: u8) -> Result<Self> {
        let mut w = OggWriter {
            writer,
            sample_rate,
            channel_count,
            serial: rand::random::<u32>(),
            page_index: 0,
            checksum_table: generate_checksum_table(),

            // Timestamp and Granule MUST start from 1
            // Only headers can have 0 values
            previous_timestamp: 1,
            previous_granule_position: 1,
            closed: false,
        };

        w.write_headers()?;

        Ok(w)
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn granule_position(&self) -> u64 {
        self.previous_granule_position
    }

    fn write_headers(&mut self) -> Result<()> {
        let mut id_header = Vec::with_capacity(19);
        id_header.write_all(ID_PAGE_SIGNATURE)?; // 'OpusHead' //0-7
        id_header.write_u8(1)?; // Version //8
        id_header.write_u8(self.channel_count)?; // Channel count //9
        id_header.write_u16::<LittleEndian>(DEFAULT_PRE_SKIP)?; // pre-skip //10-11
        id_header.write_u32::<LittleEndian>(self.sample_rate)?; // input sample rate //12-15
        id_header.write_u16::<LittleEndian>(0)?; // output gain //16-17
        id_header.write_u8(0)?; // channel map 0 = one stream: mono or stereo //18

        // The ID header page has granule position 0 and is flagged as beginning of stream
        self.write_page(
            Bytes::from(id_header),
            PAGE_HEADER_TYPE_BEGINNING_OF_STREAM,
            0,
            self.page_index,
        )?;
        self.page_index += 1;

        let mut comment_header = Vec::with_capacity(16 + VENDOR.len());
        comment_header.write_all(COMMENT_PAGE_SIGNATURE)?; // 'OpusTags' //0-7
        comment_header.write_u32::<LittleEndian>(VENDOR.len() as u32)?; // Vendor Length //8-11
        comment_header.write_all(VENDOR)?;
        comment_header.write_u32::<LittleEndian>(0)?; // User Comment List Length

        self.write_page(
            Bytes::from(comment_header),
            PAGE_HEADER_TYPE_CONTINUATION_OF_STREAM,
            0,
            self.page_index,
        )?;
        self.page_index += 1;

        Ok(())
    }

    fn write_page(
        &mut self,
        payload: Bytes,
        header_type: u8,
        granule_pos: u64,
        page_index: u32,
    ) -> Result<()> {
        let payload_len = payload.len();
        let n_segments = payload_len / 255 + 1;

        let mut page = Vec::with_capacity(PAGE_HEADER_SIZE + n_segments + payload_len);
        page.write_all(PAGE_HEADER_SIGNATURE)?; // 'OggS' //0-3
        page.write_u8(0)?; // Version //4
        page.write_u8(header_type)?; // 1 = continuation, 2 = beginning of stream, 4 = end of stream //5
        page.write_u64::<LittleEndian>(granule_pos)?; // granule position //6-13
        page.write_u32::<LittleEndian>(self.serial)?; // Bitstream serial number //14-17
        page.write_u32::<LittleEndian>(page_index)?; // Page sequence number //18-21
        page.write_u32::<LittleEndian>(0)?; // Checksum reserve //22-25
        page.write_u8(n_segments as u8)?; // Number of segments in page //26

        // Lacing values: all full segments are 255, the last one holds the
        // remainder (0 when the payload is a multiple of 255).
        for _ in 0..n_segments - 1 {
            page.write_u8(255)?;
        }
        page.write_u8((payload_len % 255) as u8)?;
        page.write_all(&payload)?;

        let mut checksum = 0u32;
        for v in &page {
            checksum = (checksum << 8) ^ self.checksum_table[(((checksum >> 24) as u8) ^ *v) as usize];
        }
        page[22..26].copy_from_slice(&checksum.to_le_bytes());

        self.writer.write_all(&page)?;

        Ok(())
    }
}

impl<W: Write + Send> MediaWriter for OggWriter<W> {
    /// write_rtp appends one Opus packet as its own page. The granule
    /// position advances by the RTP timestamp delta, which for Opus is
    /// always expressed in 48kHz ticks.
    fn write_rtp(&mut self, packet: &Packet) -> Result<()> {
        if self.closed {
            return Err(Error::ErrRecorderClosed);
        }
        if packet.payload.is_empty() {
            return Err(Error::ErrEmptyOpusPayload);
        }

        if self.previous_timestamp != 1 {
            let increment = packet
                .header
                .timestamp
                .wrapping_sub(self.previous_timestamp);
            self.previous_granule_position += increment as u64;
        }
        self.previous_timestamp = packet.header.timestamp;

        self.write_page(
            packet.payload.clone(),
            PAGE_HEADER_TYPE_CONTINUATION_OF_STREAM,
            self.previous_granule_position,
            self.page_index,
        )?;
        self.page_index += 1;

        Ok(())
    }

    /// close ends the stream with an empty page flagged as end of stream
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.write_page(
            Bytes::new(),
            PAGE_HEADER_TYPE_END_OF_STREAM,
            self.previous_granule_position,
            self.page_index,
        )?;
        self.page_index += 1;

        self.writer.flush()?;
        Ok(())
    }
}

pub(crate) fn generate_checksum_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    const POLY: u32 = 0x04c11db7;

    for (i, t) in table.iter_mut().enumerate() {
        let mut r = (i as u32) << 24;
        for _ in 0..8 {
            if (r & 0x80000000) != 0 {
                r = (r << 1) ^ POLY;
            } else {
                r <<= 1;
            }
        }
        *t = r;
    }
    table
}
