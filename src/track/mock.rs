use std::sync::Mutex;

use super::*;

/// MockPacketSource stands in for a relay track in tests.
pub(crate) struct MockPacketSource {
    id: String,
    kind: TrackKind,
    mime_type: String,
    on_read: Mutex<Option<OnReadHdlrFn>>,
    on_removed: Mutex<Option<OnTrackRemovedHdlrFn>>,
    on_read_registrations: Mutex<usize>,
}

impl MockPacketSource {
    pub(crate) fn new(id: &str, kind: TrackKind, mime_type: &str) -> Self {
        MockPacketSource {
            id: id.to_owned(),
            kind,
            mime_type: mime_type.to_owned(),
            on_read: Mutex::new(None),
            on_removed: Mutex::new(None),
            on_read_registrations: Mutex::new(0),
        }
    }

    pub(crate) fn audio(id: &str, mime_type: &str) -> Self {
        Self::new(id, TrackKind::Audio, mime_type)
    }

    /// emit delivers a packet to the registered observer, returning false
    /// when nobody is listening.
    pub(crate) fn emit(&self, pkt: &Packet) -> bool {
        let mut on_read = self.on_read.lock().unwrap();
        if let Some(f) = on_read.as_mut() {
            f(pkt);
            true
        } else {
            false
        }
    }

    pub(crate) fn remove(&self, track_id: &str) {
        let mut on_removed = self.on_removed.lock().unwrap();
        if let Some(f) = on_removed.as_mut() {
            f(track_id);
        }
    }

    pub(crate) fn on_read_registrations(&self) -> usize {
        *self.on_read_registrations.lock().unwrap()
    }
}

impl PacketSource for MockPacketSource {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    fn on_read(&self, f: OnReadHdlrFn) {
        *self.on_read_registrations.lock().unwrap() += 1;
        *self.on_read.lock().unwrap() = Some(f);
    }

    fn on_removed(&self, f: OnTrackRemovedHdlrFn) {
        *self.on_removed.lock().unwrap() = Some(f);
    }
}

/// packet builds a minimal audio packet.
pub(crate) fn packet(sequence_number: u16, timestamp: u32, payload: &[u8]) -> Packet {
    Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type: 111,
            sequence_number,
            timestamp,
            ssrc: 0xcafe,
            ..Default::default()
        },
        payload: bytes::Bytes::copy_from_slice(payload),
    }
}
