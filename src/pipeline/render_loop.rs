use super::pacing::{fps, Branch, FramePacer, FrameStats};
use super::render::{Renderer, TickInputs, TickPlan};
use super::PipInner;
use crate::capture::LiveSource;
use crate::segmentation::Segmenter;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Segmenter as seen by the loop: loading in the background, usable, or gone.
pub(crate) enum SegmenterSlot {
    Loading(oneshot::Receiver<Box<dyn Segmenter>>),
    Ready(Box<dyn Segmenter>),
    Unavailable,
}

impl SegmenterSlot {
    fn ready(&mut self) -> Option<&mut dyn Segmenter> {
        if let SegmenterSlot::Loading(rx) = self {
            match rx.try_recv() {
                Ok(segmenter) => {
                    tracing::info!("Segmentation model ready");
                    *self = SegmenterSlot::Ready(segmenter);
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    tracing::warn!("Segmentation model unavailable, effect stays in passthrough");
                    *self = SegmenterSlot::Unavailable;
                }
            }
        }
        match self {
            SegmenterSlot::Ready(segmenter) => Some(segmenter.as_mut()),
            _ => None,
        }
    }
}

/// Handle to the running render loop.
pub struct RenderHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RenderHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the loop and wait for the in-flight tick to unwind.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Render loop task failed: {}", e);
        }
    }
}

pub(crate) struct RenderLoop {
    inner: Arc<PipInner>,
    webcam: watch::Receiver<Option<LiveSource>>,
    screen: watch::Receiver<Option<LiveSource>>,
    background: watch::Receiver<Option<Arc<image::RgbaImage>>>,
    segmenter: SegmenterSlot,
    renderer: Renderer,
    pacer: FramePacer,
    stats: FrameStats,
    debug: bool,
}

impl RenderLoop {
    pub(crate) fn new(inner: Arc<PipInner>, segmenter: SegmenterSlot) -> Self {
        let config = inner.config.clone();
        Self {
            webcam: inner.webcam.subscribe(),
            screen: inner.screen.subscribe(),
            background: inner.background_image.subscribe(),
            segmenter,
            renderer: Renderer::new(config.max_reduced_height, config.segmentation_timeout),
            pacer: FramePacer::new(config.frame_budget),
            stats: FrameStats::default(),
            debug: config.debug,
            inner,
        }
    }

    pub(crate) fn spawn(self) -> RenderHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        RenderHandle { cancel, task }
    }

    async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            "Starting render loop (budget {:?}, reduced height {})",
            self.pacer.budget(),
            self.inner.config.max_reduced_height.pixels()
        );

        loop {
            let started = Instant::now();

            let branch = tokio::select! {
                _ = cancel.cancelled() => break,
                branch = self.tick() => branch,
            };
            let work = started.elapsed();

            let wait = self.pacer.remaining(work);
            if !wait.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            if self.debug {
                tracing::debug!("[{}] FPS: {}", branch.tag(), fps(started.elapsed()));
            }
            self.stats
                .record(branch, self.renderer.last_segment_time(), work);
        }

        tracing::info!("Render loop stopped after {} frames", self.stats.frames());
    }

    async fn tick(&mut self) -> Branch {
        if self.webcam.has_changed().unwrap_or(false) {
            self.webcam.borrow_and_update();
            if let SegmenterSlot::Ready(segmenter) = &mut self.segmenter {
                segmenter.reset_state();
            }
        }

        let inputs = TickInputs {
            controls: self.inner.controls.snapshot(),
            webcam: self.webcam.borrow().as_ref().and_then(|s| s.current_frame()),
            screen: self.screen.borrow().as_ref().map(|s| s.current_frame()),
            background_image: self.background.borrow().clone(),
        };
        let plan = TickPlan::decide(inputs);

        let branch = self.renderer.render(plan, self.segmenter.ready()).await;
        if branch != Branch::Idle && !self.renderer.output().is_empty() {
            let frame = Arc::new(self.renderer.output().image().clone());
            self.inner.output.send_replace(Some(frame));
        }
        branch
    }
}
