//! The picture-in-picture pipeline and its public controls.
//!
//! ```text
//! webcam ─► raw ─► reduced ─► segmenter ─► matte ─┐
//!                                                 ├─► output ─► capture_stream()
//! background (none | image | screen share) ───────┘
//! ```
//!
//! [`Pip`] is a cheap handle; clones drive the same pipeline. Controls may be
//! changed from any task while the render loop runs.

mod controls;
mod pacing;
mod render;
mod render_loop;

pub use controls::{BackgroundSelection, ControlState, Controls};
pub use pacing::{fps, Branch, FramePacer, FrameStats};
pub use render::{BackgroundSource, Renderer, TickInputs, TickPlan};
pub use render_loop::RenderHandle;

use crate::capture::{LiveSource, ScreenShareProvider};
use crate::compositor::PlacementPreset;
use crate::config::PipelineConfig;
use crate::error::AcquireError;
use crate::segmentation::{self, Segmenter, SegmenterConfig};
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use render_loop::{RenderLoop, SegmenterSlot};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};

type StopCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct PipInner {
    pub(crate) config: PipelineConfig,
    pub(crate) controls: Controls,
    pub(crate) webcam: watch::Sender<Option<LiveSource>>,
    pub(crate) screen: watch::Sender<Option<LiveSource>>,
    pub(crate) background_image: watch::Sender<Option<Arc<RgbaImage>>>,
    pub(crate) output: watch::Sender<Option<Arc<RgbaImage>>>,
    screen_provider: Arc<dyn ScreenShareProvider>,
    on_stop_screen_share: Option<StopCallback>,
    segmenter_tx: Mutex<Option<oneshot::Sender<Box<dyn Segmenter>>>>,
    segmenter_rx: Mutex<Option<oneshot::Receiver<Box<dyn Segmenter>>>>,
}

/// Picture-in-picture webcam compositor.
#[derive(Clone)]
pub struct Pip {
    inner: Arc<PipInner>,
}

impl Pip {
    pub fn new(config: PipelineConfig, screen_provider: Arc<dyn ScreenShareProvider>) -> Result<Self> {
        config.validate()?;

        let controls = Controls::new(ControlState {
            effect_on: config.effect_on,
            background: BackgroundSelection::None,
            preset: PlacementPreset::Small,
        });
        let (segmenter_tx, segmenter_rx) = oneshot::channel();

        Ok(Self {
            inner: Arc::new(PipInner {
                config,
                controls,
                webcam: watch::channel(None).0,
                screen: watch::channel(None).0,
                background_image: watch::channel(None).0,
                output: watch::channel(None).0,
                screen_provider,
                on_stop_screen_share: None,
                segmenter_tx: Mutex::new(Some(segmenter_tx)),
                segmenter_rx: Mutex::new(Some(segmenter_rx)),
            }),
        })
    }

    /// Register a callback for when the screen share ends on its own.
    ///
    /// Must be called before the handle is cloned.
    pub fn with_on_stop_screen_share<F>(mut self, callback: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::get_mut(&mut self.inner)
            .ok_or_else(|| anyhow!("Pipeline handle already shared"))?;
        inner.on_stop_screen_share = Some(Arc::new(callback));
        Ok(self)
    }

    /// Hand over a ready segmenter. Only the first one is used.
    pub fn install_segmenter(&self, segmenter: Box<dyn Segmenter>) -> Result<()> {
        let tx = lock(&self.inner.segmenter_tx)?
            .take()
            .ok_or_else(|| anyhow!("Segmenter already installed"))?;
        tx.send(segmenter)
            .map_err(|_| anyhow!("Render loop no longer accepts a segmenter"))
    }

    /// Load the default model in the background. The pipeline renders
    /// passthrough until it is ready, and for good if loading fails.
    pub fn load_segmenter(&self, config: SegmenterConfig) -> Result<()> {
        let tx = lock(&self.inner.segmenter_tx)?
            .take()
            .ok_or_else(|| anyhow!("Segmenter already installed"))?;

        tokio::task::spawn_blocking(move || match segmentation::create_default_model(&config) {
            Ok(model) => {
                if tx.send(model).is_err() {
                    tracing::debug!("Segmentation model loaded after pipeline shut down");
                }
            }
            Err(e) => tracing::warn!("Failed to load segmentation model: {:#}", e),
        });
        Ok(())
    }

    pub fn attach_stream(&self, source: LiveSource) {
        tracing::info!("Attaching {} stream", source.label());
        self.inner.webcam.send_replace(Some(source));
    }

    /// Detach the webcam. The device itself keeps running until its owner
    /// stops it.
    pub fn detach_stream(&self) {
        if let Some(previous) = self.inner.webcam.send_replace(None) {
            tracing::info!("Detached {} stream", previous.label());
        }
    }

    /// Acquire a screen share and composite over it.
    ///
    /// Turns the effect on and resets the layout to `small`. On failure the
    /// pipeline is left exactly as it was.
    pub async fn start_screen_share(&self) -> Result<(), AcquireError> {
        self.acquire_screen_share().await?;
        self.inner.controls.store(ControlState {
            effect_on: true,
            background: BackgroundSelection::Stream,
            preset: PlacementPreset::Small,
        });
        Ok(())
    }

    /// Acquire and install a share, replacing any previous one. Controls are
    /// left alone.
    async fn acquire_screen_share(&self) -> Result<(), AcquireError> {
        let source = self.inner.screen_provider.acquire().await?;
        if source.is_ended() && source.current_frame().is_none() {
            return Err(AcquireError::EndedBeforeFirstFrame);
        }
        tracing::info!("Screen share started");

        if let Some(previous) = self.inner.screen.send_replace(Some(source.clone())) {
            previous.stop();
        }
        self.watch_screen_share_end(source);
        Ok(())
    }

    /// Stop the screen share and return to no background, effect off.
    pub fn stop_screen_share(&self) {
        if let Some(share) = self.inner.screen.send_replace(None) {
            share.stop();
            tracing::info!("Screen share stopped");
        }
        self.inner.controls.update(|state| ControlState {
            effect_on: false,
            background: BackgroundSelection::None,
            ..state
        });
    }

    fn watch_screen_share_end(&self, source: LiveSource) {
        let pip = self.clone();
        tokio::spawn(async move {
            source.ended().await;
            if source.stop_requested() {
                return;
            }
            let current = pip
                .inner
                .screen
                .borrow()
                .as_ref()
                .is_some_and(|s| s.same_stream(&source));
            if !current {
                return;
            }
            tracing::info!("Screen share ended by its source");
            pip.stop_screen_share();
            if let Some(callback) = &pip.inner.on_stop_screen_share {
                callback();
            }
        });
    }

    pub fn turn_effect_on(&self, effect_on: bool) {
        self.inner
            .controls
            .update(|state| ControlState { effect_on, ..state });
    }

    pub fn set_video_size(&self, preset: PlacementPreset) {
        self.inner
            .controls
            .update(|state| ControlState { preset, ..state });
    }

    /// Use `image` as the virtual background, or clear it with `None`.
    ///
    /// Clearing only drops the `Image` selection; a screen-share background
    /// stays selected.
    pub fn set_background_image(&self, image: Option<RgbaImage>) {
        let selected = image.is_some();
        self.inner.background_image.send_replace(image.map(Arc::new));
        self.inner.controls.update(|state| {
            let background = match (selected, state.background) {
                (true, _) => BackgroundSelection::Image,
                (false, BackgroundSelection::Image) => BackgroundSelection::None,
                (false, other) => other,
            };
            ControlState { background, ..state }
        });
    }

    pub fn select_background(&self, background: BackgroundSelection) {
        self.inner
            .controls
            .update(|state| ControlState { background, ..state });
    }

    pub fn controls(&self) -> ControlState {
        self.inner.controls.snapshot()
    }

    /// Start rendering. A `Stream` background without a share acquires one
    /// first, keeping the current effect flag and layout. Can only be called
    /// once per pipeline.
    pub async fn initialize_render(&self) -> Result<RenderHandle> {
        let rx = lock(&self.inner.segmenter_rx)?
            .take()
            .ok_or_else(|| anyhow!("Render loop already started"))?;

        let wants_share = self.controls().background == BackgroundSelection::Stream
            && self.inner.screen.borrow().is_none();
        if wants_share {
            if let Err(e) = self.acquire_screen_share().await {
                // Leave the loop startable for a retry.
                *lock(&self.inner.segmenter_rx)? = Some(rx);
                return Err(e).context("Failed to acquire screen share");
            }
        }

        Ok(RenderLoop::new(Arc::clone(&self.inner), SegmenterSlot::Loading(rx)).spawn())
    }

    /// The composited output, updated after every rendered tick.
    pub fn capture_stream(&self) -> watch::Receiver<Option<Arc<RgbaImage>>> {
        self.inner.output.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("Pipeline state poisoned"))
}
