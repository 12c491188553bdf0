//! Offline reconstruction of a room from its per-track recordings.
//!
//! A room is processed in three passes: every captured track is decoded to
//! PCM, each PCM file is prefixed with enough silence to line it up with the
//! earliest track of the room, and the aligned files are summed into
//! `{room}/merged.wav`.

#[cfg(test)]
pub(crate) mod mock;

pub mod indexer;
pub mod post_processor;
pub mod transcoder;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::session::path_component;
use indexer::{read_room, TrackRecord};
use transcoder::{PcmFormat, Transcoder};

pub const MERGED_FILE_NAME: &str = "merged.wav";

/// TrackOffset is how far a track starts after the earliest track of its room.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOffset {
    pub client_id: String,
    pub track_id: String,
    pub offset_ms: f64,
}

/// compute_offsets returns one offset per track, in input order. The
/// earliest track gets 0 and no offset is ever negative.
pub fn compute_offsets(tracks: &[TrackRecord]) -> Vec<TrackOffset> {
    let earliest: Option<DateTime<Utc>> = tracks.iter().map(|t| t.start_time).min();
    let Some(earliest) = earliest else {
        return vec![];
    };

    tracks
        .iter()
        .map(|t| TrackOffset {
            client_id: t.client_id.clone(),
            track_id: t.track_id.clone(),
            offset_ms: (t.start_time - earliest).num_milliseconds() as f64,
        })
        .collect()
}

/// process_room runs the whole reconstruction for one room and returns the
/// path of the merged file. Tracks that fail to decode or pad are logged and
/// left out of the mix; the room only fails when nothing is left to mix.
pub async fn process_room(
    root_dir: &Path,
    room_id: &str,
    transcoder: &dyn Transcoder,
) -> Result<PathBuf> {
    path_component(room_id)?;
    let room = read_room(root_dir, room_id).await?;
    let tracks = room.tracks();
    if tracks.is_empty() {
        return Err(Error::ErrNothingToMix(room_id.to_owned()));
    }

    let mut normalized = Vec::with_capacity(tracks.len());
    for (index, track) in tracks.iter().enumerate() {
        match transcoder
            .normalize(track.codec, &track.path, &track.normalized_path())
            .await
        {
            Ok(()) => normalized.push(index),
            Err(err) => log::warn!(
                "room {}: failed to decode track {}/{}: {}",
                room_id,
                track.client_id,
                track.track_id,
                err
            ),
        }
    }

    // Offsets are measured against every discovered track so that a track
    // which failed to decode does not shift the others.
    let offsets = compute_offsets(&tracks);

    let mut inputs = Vec::with_capacity(normalized.len());
    for index in normalized {
        let track = &tracks[index];
        let offset = &offsets[index];
        log::debug!(
            "room {}: track {}/{} starts at +{}ms",
            room_id,
            track.client_id,
            track.track_id,
            offset.offset_ms
        );

        let output = track.offset_path();
        match transcoder
            .pad_with_silence(
                &track.normalized_path(),
                &output,
                offset.offset_ms,
                PcmFormat::normalized(track.codec),
            )
            .await
        {
            Ok(()) => inputs.push(output),
            Err(err) => log::warn!(
                "room {}: failed to align track {}/{}: {}",
                room_id,
                track.client_id,
                track.track_id,
                err
            ),
        }
    }

    if inputs.is_empty() {
        return Err(Error::ErrNothingToMix(room_id.to_owned()));
    }

    let merged = root_dir.join(room_id).join(MERGED_FILE_NAME);
    transcoder.mix(&inputs, &merged).await?;
    log::info!(
        "room {}: mixed {} of {} tracks into {}",
        room_id,
        inputs.len(),
        tracks.len(),
        merged.display()
    );

    Ok(merged)
}
