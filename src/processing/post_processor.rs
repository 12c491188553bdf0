use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, Mutex};
use waitgroup::WaitGroup;

use super::process_room;
use super::transcoder::Transcoder;
use crate::error::{Error, Result};
use crate::session::path_component;

/// Called after every room job with the room id and its outcome.
pub type OnRoomProcessedHdlrFn = Box<
    dyn (FnMut(String, Result<PathBuf>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

struct PostProcessorInternal {
    root_dir: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    // held for the whole of a room job: at most one room is in flight
    processing: Mutex<()>,
    on_processed_handler: ArcSwapOption<Mutex<OnRoomProcessedHdlrFn>>,
}

/// PostProcessor rebuilds closed rooms one at a time, in submission order.
pub struct PostProcessor {
    internal: Arc<PostProcessorInternal>,
    jobs_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    wg: Mutex<Option<WaitGroup>>,
}

impl PostProcessor {
    /// new starts the worker. It must be called within a tokio runtime.
    pub fn new(root_dir: impl Into<PathBuf>, transcoder: Arc<dyn Transcoder>) -> Self {
        let internal = Arc::new(PostProcessorInternal {
            root_dir: root_dir.into(),
            transcoder,
            processing: Mutex::new(()),
            on_processed_handler: ArcSwapOption::empty(),
        });

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let wg = WaitGroup::new();
        let w = wg.worker();
        let internal2 = Arc::clone(&internal);
        tokio::spawn(async move {
            let _d = w;
            PostProcessor::run(internal2, jobs_rx).await;
        });

        PostProcessor {
            internal,
            jobs_tx: Mutex::new(Some(jobs_tx)),
            wg: Mutex::new(Some(wg)),
        }
    }

    async fn run(internal: Arc<PostProcessorInternal>, mut jobs_rx: mpsc::UnboundedReceiver<String>) {
        while let Some(room_id) = jobs_rx.recv().await {
            let _processing = internal.processing.lock().await;

            log::info!("post-processing room {}", room_id);
            let result = process_room(
                &internal.root_dir,
                &room_id,
                internal.transcoder.as_ref(),
            )
            .await;
            if let Err(err) = &result {
                log::error!("post-processing room {} failed: {}", room_id, err);
            }

            if let Some(handler) = &*internal.on_processed_handler.load() {
                let mut f = handler.lock().await;
                f(room_id, result).await;
            }
        }
        log::trace!("post-processor stopped");
    }

    /// on_processed sets a handler that is called after every room job.
    pub fn on_processed(&self, f: OnRoomProcessedHdlrFn) {
        self.internal
            .on_processed_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// submit queues a room for processing. It never waits for the job.
    pub async fn submit(&self, room_id: &str) -> Result<()> {
        path_component(room_id)?;
        let jobs_tx = self.jobs_tx.lock().await;
        match &*jobs_tx {
            Some(tx) => tx
                .send(room_id.to_owned())
                .map_err(|_| Error::ErrPostProcessorClosed),
            None => Err(Error::ErrPostProcessorClosed),
        }
    }

    /// close stops accepting rooms and returns once every queued room has
    /// been processed.
    pub async fn close(&self) {
        {
            let mut jobs_tx = self.jobs_tx.lock().await;
            jobs_tx.take();
        }

        let wg = {
            let mut wg = self.wg.lock().await;
            wg.take()
        };
        if let Some(wg) = wg {
            wg.wait().await;
        }
    }
}
