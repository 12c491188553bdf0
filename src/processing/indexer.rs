use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::media::Codec;
use crate::session::{read_metadata, AUDIO_FILE_STEM};

pub const NORMALIZED_FILE_NAME: &str = "audio.wav";
pub const OFFSET_FILE_NAME: &str = "offset.wav";

/// TrackRecord is one captured track found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub client_id: String,
    pub track_id: String,
    /// path of the captured audio file
    pub path: PathBuf,
    pub codec: Codec,
    pub start_time: DateTime<Utc>,
}

impl TrackRecord {
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// normalized_path is where the decoded PCM copy of the track goes.
    pub fn normalized_path(&self) -> PathBuf {
        self.dir().join(NORMALIZED_FILE_NAME)
    }

    /// offset_path is where the silence-padded copy of the track goes.
    pub fn offset_path(&self) -> PathBuf {
        self.dir().join(OFFSET_FILE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub client_id: String,
    pub tracks: Vec<TrackRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub room_id: String,
    pub clients: Vec<ClientRecord>,
}

impl RoomRecord {
    /// tracks flattens all clients' tracks, clients first.
    pub fn tracks(&self) -> Vec<TrackRecord> {
        self.clients
            .iter()
            .flat_map(|c| c.tracks.iter().cloned())
            .collect()
    }
}

/// read_room walks `{root}/{room_id}/{client}/{track}` and collects every
/// track that has both metadata and a captured audio file. Unreadable
/// clients or tracks are skipped; only a missing room directory is an error.
pub async fn read_room(root_dir: &Path, room_id: &str) -> Result<RoomRecord> {
    let room_dir = root_dir.join(room_id);
    match tokio::fs::metadata(&room_dir).await {
        Ok(m) if m.is_dir() => {}
        _ => return Err(Error::ErrRoomNotFound(room_dir)),
    }

    let mut clients = vec![];
    for (client_id, client_dir) in sub_dirs(&room_dir).await? {
        match read_client(&client_dir, &client_id).await {
            Ok(client) => clients.push(client),
            Err(err) => log::warn!(
                "room {}: skipping client {}: {}",
                room_id,
                client_id,
                err
            ),
        }
    }

    Ok(RoomRecord {
        room_id: room_id.to_owned(),
        clients,
    })
}

async fn read_client(client_dir: &Path, client_id: &str) -> Result<ClientRecord> {
    let mut tracks = vec![];
    for (track_id, track_dir) in sub_dirs(client_dir).await? {
        match read_track(&track_dir, client_id, &track_id).await {
            Ok(track) => tracks.push(track),
            Err(err) => log::warn!(
                "client {}: skipping track {}: {}",
                client_id,
                track_id,
                err
            ),
        }
    }

    Ok(ClientRecord {
        client_id: client_id.to_owned(),
        tracks,
    })
}

/// read_track loads a single track directory.
pub async fn read_track(track_dir: &Path, client_id: &str, track_id: &str) -> Result<TrackRecord> {
    let metadata = read_metadata(track_dir).await?;

    for ext in ["opus", "pcmu", "pcma"] {
        let path = track_dir.join(format!("{AUDIO_FILE_STEM}.{ext}"));
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(codec) = Codec::from_extension(ext) {
            return Ok(TrackRecord {
                client_id: client_id.to_owned(),
                track_id: track_id.to_owned(),
                path,
                codec,
                start_time: metadata.start_time,
            });
        }
    }

    Err(Error::ErrNoAudioFile(track_dir.to_path_buf()))
}

/// sub_dirs lists the directories directly below `dir`, sorted by name.
async fn sub_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut dirs = vec![];
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    dirs.sort();
    Ok(dirs)
}
