#[cfg(test)]
pub(crate) mod mock;

use std::fmt;

use rtp::packet::Packet;

pub const MIME_TYPE_OPUS: &str = "audio/opus";
pub const MIME_TYPE_PCMU: &str = "audio/PCMU";
pub const MIME_TYPE_PCMA: &str = "audio/PCMA";

/// Invoked once per inbound RTP packet. The packet is only borrowed for the
/// duration of the call, so observers that keep it must copy it.
pub type OnReadHdlrFn = Box<dyn (FnMut(&Packet)) + Send + Sync + 'static>;

/// Invoked with the id of a track that was detached from the relay.
pub type OnTrackRemovedHdlrFn = Box<dyn (FnMut(&str)) + Send + Sync + 'static>;

/// TrackKind mirrors the media kind negotiated for a track.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackKind {
    #[default]
    Unspecified,
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            TrackKind::Unspecified => "unspecified",
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        };
        write!(f, "{s}")
    }
}

/// PacketSource is the live inbound stream of a single track, owned by the
/// relay. The recording subsystem never outlives it: it registers one packet
/// observer and one removal observer and otherwise only reads metadata.
pub trait PacketSource: Send + Sync {
    /// id is the stable identifier of the track.
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// mime_type is the negotiated codec, e.g. `audio/opus`.
    fn mime_type(&self) -> String;

    /// on_read registers the packet observer. A source holds at most one
    /// observer; registering again replaces the previous one.
    fn on_read(&self, f: OnReadHdlrFn);

    /// on_removed registers the observer fired when any track of the
    /// owning connection is detached.
    fn on_removed(&self, f: OnTrackRemovedHdlrFn);
}
