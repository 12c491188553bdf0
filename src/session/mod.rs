
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::chunk_writer::{ChunkWriter, OnChunkHdlrFn, DEFAULT_FLUSH_INTERVAL};
use crate::error::{Error, Result};
use crate::media::Codec;
use crate::recorder::{
    OpusRecorder, PcmRecorder, Recorder, RecorderState, DEFAULT_MAILBOX_CAPACITY,
};
use crate::track::{PacketSource, TrackKind};

pub const DEFAULT_ROOT_DIR: &str = "recordings";
pub const METADATA_FILE_NAME: &str = "meta.json";
pub const AUDIO_FILE_STEM: &str = "audio";

/// RecordMetadata is persisted next to every captured audio file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub start_time: DateTime<Utc>,
}

/// RecordingConfig controls where and how live tracks are captured.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub root_dir: PathBuf,
    pub flush_interval: Duration,
    pub mailbox_capacity: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        RecordingConfig {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl RecordingConfig {
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_mailbox_capacity(mut self, mailbox_capacity: usize) -> Self {
        self.mailbox_capacity = mailbox_capacity;
        self
    }
}

/// SessionRecorder writes the session's `meta.json` the first time capture
/// actually starts, so the stored start time lines up with the first packet
/// in the audio file rather than with session creation.
struct SessionRecorder {
    inner: Arc<dyn Recorder>,
    dir: PathBuf,
    // None until the first successful start
    start_time: Mutex<Option<DateTime<Utc>>>,
}

#[async_trait]
impl Recorder for SessionRecorder {
    async fn start(&self) -> Result<()> {
        let mut start_time = self.start_time.lock().await;
        if start_time.is_some() || self.inner.state() != RecorderState::Stopped {
            return self.inner.start().await;
        }

        let now = Utc::now();
        self.inner.start().await?;

        let metadata = RecordMetadata { start_time: now };
        if let Err(err) = write_metadata(&self.dir, &metadata).await {
            self.inner.stop().await?;
            return Err(err);
        }
        *start_time = Some(now);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }

    async fn pause(&self) -> Result<()> {
        self.inner.pause().await
    }

    async fn resume(&self) -> Result<()> {
        self.inner.resume().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn state(&self) -> RecorderState {
        self.inner.state()
    }

    fn dropped_packets(&self) -> u64 {
        self.inner.dropped_packets()
    }
}

/// RecordingSession binds one live track to its directory on disk.
pub struct RecordingSession {
    room_id: String,
    client_id: String,
    track_id: String,
    dir: PathBuf,
    codec: Codec,
    recorder: Arc<dyn Recorder>,
    writer: ChunkWriter,
    file: Arc<Mutex<File>>,
}

impl RecordingSession {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn recorder(&self) -> Arc<dyn Recorder> {
        Arc::clone(&self.recorder)
    }

    /// close finalizes the recorder, drains the chunk writer and syncs the
    /// audio file. The recorder's finalize error, if any, is returned after
    /// the file has been drained regardless.
    pub async fn close(&self) -> Result<()> {
        let result = self.recorder.close().await;
        self.writer.close().await;

        let file = self.file.lock().await;
        if let Err(err) = file.sync_all().await {
            log::warn!("failed to sync {}: {}", self.dir.display(), err);
        }

        log::info!(
            "closed recording session {}/{}/{}",
            self.room_id,
            self.client_id,
            self.track_id
        );
        result
    }
}

/// RecordingManager owns every live recording session, keyed by track id.
pub struct RecordingManager {
    config: RecordingConfig,
    sessions: Arc<Mutex<HashMap<String, Arc<RecordingSession>>>>,
}

impl RecordingManager {
    pub fn new(config: RecordingConfig) -> Self {
        RecordingManager {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// record returns the recorder for `source`, creating the session
    /// directory `{root}/{room}/{client}/{track}` and its audio file on first
    /// use. The recorder is returned stopped; `meta.json` is written by its
    /// first successful start.
    pub async fn record(
        &self,
        room_id: &str,
        client_id: &str,
        source: Arc<dyn PacketSource>,
    ) -> Result<Arc<dyn Recorder>> {
        let track_id = source.id();
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&track_id) {
            return Ok(session.recorder());
        }

        if source.kind() != TrackKind::Audio {
            return Err(Error::ErrNonAudioTrack(track_id));
        }
        let mime_type = source.mime_type();
        let codec =
            Codec::from_mime_type(&mime_type).ok_or(Error::ErrUnsupportedCodec(mime_type))?;

        let dir = self
            .config
            .root_dir
            .join(path_component(room_id)?)
            .join(path_component(client_id)?)
            .join(path_component(&track_id)?);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.{}", AUDIO_FILE_STEM, codec.extension()));
        let file = Arc::new(Mutex::new(File::create(&path).await?));
        let writer = ChunkWriter::builder()
            .with_interval(self.config.flush_interval)
            .build(file_sink(Arc::clone(&file), path));

        let recorder = match self.new_recorder(codec, Arc::clone(&source), writer.clone()) {
            Ok(recorder) => recorder,
            Err(err) => {
                writer.close().await;
                return Err(err);
            }
        };
        let recorder: Arc<dyn Recorder> = Arc::new(SessionRecorder {
            inner: recorder,
            dir: dir.clone(),
            start_time: Mutex::new(None),
        });

        let session = Arc::new(RecordingSession {
            room_id: room_id.to_owned(),
            client_id: client_id.to_owned(),
            track_id: track_id.clone(),
            dir,
            codec,
            recorder: Arc::clone(&recorder),
            writer,
            file,
        });
        sessions.insert(track_id.clone(), session);
        drop(sessions);

        self.watch_removal(source.as_ref(), track_id.clone());
        log::info!(
            "created recording session {}/{}/{} ({})",
            room_id,
            client_id,
            track_id,
            codec.extension()
        );

        Ok(recorder)
    }

    fn new_recorder(
        &self,
        codec: Codec,
        source: Arc<dyn PacketSource>,
        writer: ChunkWriter,
    ) -> Result<Arc<dyn Recorder>> {
        let capacity = self.config.mailbox_capacity;
        let recorder: Arc<dyn Recorder> = match codec {
            Codec::Opus { .. } => Arc::new(OpusRecorder::new_opus(source, writer, capacity)?),
            Codec::Pcmu | Codec::Pcma => {
                Arc::new(PcmRecorder::new_pcm(source, codec, writer, capacity)?)
            }
        };
        Ok(recorder)
    }

    fn watch_removal(&self, source: &dyn PacketSource, track_id: String) {
        let sessions = Arc::clone(&self.sessions);
        source.on_removed(Box::new(move |removed: &str| {
            if removed != track_id {
                return;
            }
            let sessions = Arc::clone(&sessions);
            let track_id = track_id.clone();
            tokio::spawn(async move {
                if let Err(err) = close_session(&sessions, &track_id).await {
                    log::warn!("failed to close recording of track {}: {}", track_id, err);
                }
            });
        }));
    }

    /// recorder looks up the live recorder of a track.
    pub async fn recorder(&self, track_id: &str) -> Option<Arc<dyn Recorder>> {
        let sessions = self.sessions.lock().await;
        sessions.get(track_id).map(|s| s.recorder())
    }

    pub async fn session(&self, track_id: &str) -> Option<Arc<RecordingSession>> {
        let sessions = self.sessions.lock().await;
        sessions.get(track_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.len()
    }

    /// close_session tears down the session of a track. It returns false if
    /// the track was not being recorded.
    pub async fn close_session(&self, track_id: &str) -> Result<bool> {
        close_session(&self.sessions, track_id).await
    }

    /// close_all tears down every live session, returning the first error.
    pub async fn close_all(&self) -> Result<()> {
        let sessions: Vec<Arc<RecordingSession>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };

        let mut result = Ok(());
        for session in sessions {
            if let Err(err) = session.close().await {
                log::warn!(
                    "failed to close recording of track {}: {}",
                    session.track_id(),
                    err
                );
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

async fn close_session(
    sessions: &Mutex<HashMap<String, Arc<RecordingSession>>>,
    track_id: &str,
) -> Result<bool> {
    let session = {
        let mut sessions = sessions.lock().await;
        sessions.remove(track_id)
    };
    match session {
        Some(session) => {
            session.close().await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// path_component accepts an id only if it names a single directory entry.
pub(crate) fn path_component(id: &str) -> Result<&str> {
    if id.is_empty() || id == "." || id == ".." || id.contains(|c: char| c == '/' || c == '\\') {
        Err(Error::ErrInvalidPathComponent(id.to_owned()))
    } else {
        Ok(id)
    }
}

fn file_sink(file: Arc<Mutex<File>>, path: PathBuf) -> OnChunkHdlrFn {
    Box::new(move |chunk: Bytes| {
        let file = Arc::clone(&file);
        let path = path.clone();
        Box::pin(async move {
            let mut file = file.lock().await;
            if let Err(err) = file.write_all(&chunk).await {
                log::error!(
                    "failed to write {} bytes to {}: {}",
                    chunk.len(),
                    path.display(),
                    err
                );
                return;
            }
            if let Err(err) = file.flush().await {
                log::error!("failed to flush {}: {}", path.display(), err);
            }
        })
    })
}

/// write_metadata stores `metadata` as `meta.json` inside `dir`.
pub async fn write_metadata(dir: &Path, metadata: &RecordMetadata) -> Result<()> {
    let data = serde_json::to_vec(metadata)?;
    tokio::fs::write(dir.join(METADATA_FILE_NAME), data).await?;
    Ok(())
}

/// read_metadata loads `meta.json` from `dir`.
pub async fn read_metadata(dir: &Path) -> Result<RecordMetadata> {
    let path = dir.join(METADATA_FILE_NAME);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|err| Error::ErrMetadata {
            path: path.clone(),
            reason: err.to_string(),
        })?;
    serde_json::from_slice(&data).map_err(|err| Error::ErrMetadata {
        path,
        reason: err.to_string(),
    })
}
