
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use rtp::packet::Packet;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::ogg_writer::OggWriter;
use crate::media::raw_writer::RawWriter;
use crate::media::{Codec, MediaWriter, OPUS_CHANNEL_COUNT, OPUS_SAMPLE_RATE};
use crate::track::{OnReadHdlrFn, PacketSource};

pub const DEFAULT_MAILBOX_CAPACITY: usize = 128;

/// RecorderState is the capture state of a single track recorder.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecorderState {
    #[default]
    Stopped,
    Recording,
    Paused,
}

const STATE_STOPPED: u8 = 0;
const STATE_RECORDING: u8 = 1;
const STATE_PAUSED: u8 = 2;

impl From<u8> for RecorderState {
    fn from(v: u8) -> Self {
        match v {
            STATE_RECORDING => RecorderState::Recording,
            STATE_PAUSED => RecorderState::Paused,
            _ => RecorderState::Stopped,
        }
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RecorderState::Stopped => "stopped",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// Recorder captures one track into a media file.
///
/// All transitions are idempotent: starting a running recorder or stopping a
/// stopped one does nothing. Pausing or resuming a stopped recorder fails
/// with [`Error::ErrRecorderNotRunning`].
#[async_trait]
pub trait Recorder: Send + Sync {
    /// start subscribes to the track (once per recorder) and begins capture.
    async fn start(&self) -> Result<()>;

    /// stop ends capture. Packets still queued are discarded.
    async fn stop(&self) -> Result<()>;

    /// pause keeps the timeline running but records silence.
    async fn pause(&self) -> Result<()>;

    /// resume switches a paused recorder back to real audio.
    async fn resume(&self) -> Result<()>;

    /// close stops capture and finalizes the media file.
    async fn close(&self) -> Result<()>;

    fn state(&self) -> RecorderState;

    /// dropped_packets counts packets discarded because the mailbox was full.
    fn dropped_packets(&self) -> u64;
}

struct RecorderInternal<W: MediaWriter> {
    track_id: String,
    codec: Codec,
    state: AtomicU8,
    closed: AtomicBool,
    dropped: AtomicU64,
    mailbox: ArcSwapOption<mpsc::Sender<Packet>>,
    writer: Mutex<W>,
}

impl<W: MediaWriter> RecorderInternal<W> {
    fn state(&self) -> RecorderState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// enqueue runs on the packet source's delivery path and never blocks.
    fn enqueue(&self, pkt: &Packet) {
        let mailbox = self.mailbox.load();
        let Some(tx) = &*mailbox else {
            return;
        };

        match tx.try_send(pkt.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(pkt)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                if dropped == 1 {
                    log::warn!(
                        "track {} recorder is overloaded, dropping packet {}",
                        self.track_id,
                        pkt.header.sequence_number
                    );
                } else {
                    log::debug!(
                        "track {} dropped packet {} ({} dropped so far)",
                        self.track_id,
                        pkt.header.sequence_number,
                        dropped
                    );
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    async fn write(&self, pkt: &Packet) {
        let mut writer = self.writer.lock().await;
        let result = if self.state() == RecorderState::Paused {
            writer.write_rtp(&self.codec.silence_frame(pkt))
        } else {
            writer.write_rtp(pkt)
        };
        if let Err(err) = result {
            log::warn!(
                "track {} failed to record packet {}: {}",
                self.track_id,
                pkt.header.sequence_number,
                err
            );
        }
    }

    /// mark_stopped moves the recorder to Stopped and closes the mailbox.
    /// It returns whether this call performed the transition.
    fn mark_stopped(&self) -> bool {
        let prev = self.state.swap(STATE_STOPPED, Ordering::SeqCst);
        self.mailbox.store(None);
        prev != STATE_STOPPED
    }

    async fn run(
        internal: Arc<RecorderInternal<W>>,
        mut packets_rx: mpsc::Receiver<Packet>,
        mut close_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = close_rx.recv() => break,
                pkt = packets_rx.recv() => match pkt {
                    Some(pkt) => internal.write(&pkt).await,
                    None => break,
                },
            }
        }

        if internal.mark_stopped() {
            log::debug!("track {} recorder stopped itself", internal.track_id);
        }
    }
}

/// TrackRecorder drives a [`MediaWriter`] from a track's packets.
///
/// Packets are copied off the source's delivery path into a bounded mailbox
/// and written by a dedicated task in arrival order. When the mailbox is full
/// the incoming packet is dropped so the live source is never held up.
pub struct TrackRecorder<W: MediaWriter> {
    source: Arc<dyn PacketSource>,
    mailbox_capacity: usize,
    internal: Arc<RecorderInternal<W>>,
    subscribed: AtomicBool,

    ops: Mutex<()>,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
    done: Mutex<Option<JoinHandle<()>>>,
}

/// OpusRecorder stores Opus packets in an Ogg container.
pub type OpusRecorder<S> = TrackRecorder<OggWriter<S>>;

/// PcmRecorder stores G.711 payloads as they arrive.
pub type PcmRecorder<S> = TrackRecorder<RawWriter<S>>;

impl<S: Write + Send + 'static> TrackRecorder<OggWriter<S>> {
    pub fn new_opus(
        source: Arc<dyn PacketSource>,
        sink: S,
        mailbox_capacity: usize,
    ) -> Result<Self> {
        let writer = OggWriter::new(sink, OPUS_SAMPLE_RATE, OPUS_CHANNEL_COUNT)?;
        Ok(TrackRecorder::new(
            source,
            Codec::opus(),
            writer,
            mailbox_capacity,
        ))
    }
}

impl<S: Write + Send + 'static> TrackRecorder<RawWriter<S>> {
    /// new_pcm accepts only the law-encoded codecs.
    pub fn new_pcm(
        source: Arc<dyn PacketSource>,
        codec: Codec,
        sink: S,
        mailbox_capacity: usize,
    ) -> Result<Self> {
        match codec {
            Codec::Pcmu | Codec::Pcma => Ok(TrackRecorder::new(
                source,
                codec,
                RawWriter::new(sink),
                mailbox_capacity,
            )),
            Codec::Opus { .. } => Err(Error::ErrUnsupportedCodec(source.mime_type())),
        }
    }
}

impl<W: MediaWriter + 'static> TrackRecorder<W> {
    pub fn new(
        source: Arc<dyn PacketSource>,
        codec: Codec,
        writer: W,
        mailbox_capacity: usize,
    ) -> Self {
        TrackRecorder {
            internal: Arc::new(RecorderInternal {
                track_id: source.id(),
                codec,
                state: AtomicU8::new(STATE_STOPPED),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                mailbox: ArcSwapOption::empty(),
                writer: Mutex::new(writer),
            }),
            source,
            mailbox_capacity: mailbox_capacity.max(1),
            subscribed: AtomicBool::new(false),
            ops: Mutex::new(()),
            close_tx: Mutex::new(None),
            done: Mutex::new(None),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.internal.track_id
    }

    pub fn codec(&self) -> Codec {
        self.internal.codec
    }

    fn subscribe(&self) {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return;
        }

        let internal: Weak<RecorderInternal<W>> = Arc::downgrade(&self.internal);
        let on_read: OnReadHdlrFn = Box::new(move |pkt: &Packet| {
            if let Some(internal) = internal.upgrade() {
                internal.enqueue(pkt);
            }
        });
        self.source.on_read(on_read);
    }

    async fn stop_internal(&self) {
        let was_running = self.internal.mark_stopped();
        {
            let mut close_tx = self.close_tx.lock().await;
            close_tx.take();
        }

        let done = {
            let mut done = self.done.lock().await;
            done.take()
        };
        if let Some(done) = done {
            if let Err(err) = done.await {
                log::warn!(
                    "track {} recorder task failed: {}",
                    self.internal.track_id,
                    err
                );
            }
        }

        if was_running {
            log::info!("track {} recording stopped", self.internal.track_id);
        }
    }
}

#[async_trait]
impl<W: MediaWriter + 'static> Recorder for TrackRecorder<W> {
    async fn start(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        if self.internal.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrRecorderClosed);
        }
        if self
            .internal
            .state
            .compare_exchange(
                STATE_STOPPED,
                STATE_RECORDING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        // a loop that stopped itself may still be unwinding
        let previous = {
            let mut done = self.done.lock().await;
            done.take()
        };
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let (packets_tx, packets_rx) = mpsc::channel(self.mailbox_capacity);
        let (close_tx, close_rx) = mpsc::channel(1);
        {
            let mut c = self.close_tx.lock().await;
            *c = Some(close_tx);
        }
        self.internal.mailbox.store(Some(Arc::new(packets_tx)));
        self.subscribe();

        let internal = Arc::clone(&self.internal);
        let handle = tokio::spawn(async move {
            RecorderInternal::run(internal, packets_rx, close_rx).await;
        });
        {
            let mut done = self.done.lock().await;
            *done = Some(handle);
        }

        log::info!(
            "track {} recording started ({})",
            self.internal.track_id,
            self.internal.codec.extension()
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.stop_internal().await;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        match self.internal.state.compare_exchange(
            STATE_RECORDING,
            STATE_PAUSED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                log::debug!("track {} recording paused", self.internal.track_id);
                Ok(())
            }
            Err(STATE_PAUSED) => Ok(()),
            Err(_) => Err(Error::ErrRecorderNotRunning),
        }
    }

    async fn resume(&self) -> Result<()> {
        match self.internal.state.compare_exchange(
            STATE_PAUSED,
            STATE_RECORDING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                log::debug!("track {} recording resumed", self.internal.track_id);
                Ok(())
            }
            Err(STATE_RECORDING) => Ok(()),
            Err(_) => Err(Error::ErrRecorderNotRunning),
        }
    }

    async fn close(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.stop_internal().await;

        if self.internal.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.internal.writer.lock().await;
        writer.close()
    }

    fn state(&self) -> RecorderState {
        self.internal.state()
    }

    fn dropped_packets(&self) -> u64 {
        self.internal.dropped.load(Ordering::SeqCst)
    }
}
