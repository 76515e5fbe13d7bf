use super::FrameSource;
use anyhow::{Context, Result};
use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a live video input.
///
/// The latest frame is published by a producer (usually a capture thread).
/// Dimensions read as 0x0 until the first frame arrives. Clones share the
/// same underlying stream.
#[derive(Debug, Clone)]
pub struct LiveSource {
    id: u64,
    label: Arc<str>,
    frames: watch::Receiver<Option<Arc<RgbaImage>>>,
    stop: CancellationToken,
    ended: CancellationToken,
}

/// Producer side of a [`LiveSource`]. Dropping it ends the stream.
pub struct FramePublisher {
    frames: watch::Sender<Option<Arc<RgbaImage>>>,
    stop: CancellationToken,
    ended: CancellationToken,
}

impl LiveSource {
    pub fn channel(label: &str) -> (FramePublisher, LiveSource) {
        let (tx, rx) = watch::channel(None);
        let stop = CancellationToken::new();
        let ended = CancellationToken::new();

        let publisher = FramePublisher {
            frames: tx,
            stop: stop.clone(),
            ended: ended.clone(),
        };
        let source = LiveSource {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label),
            frames: rx,
            stop,
            ended,
        };
        (publisher, source)
    }

    /// Open a blocking device on its own thread and pump its frames.
    ///
    /// `open` runs on the capture thread, so the device itself never has to
    /// cross threads. Errors from `open` are returned here.
    pub async fn spawn_device<F>(label: &str, open: F) -> Result<LiveSource>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
    {
        let (publisher, source) = Self::channel(label);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let thread_label = label.to_owned();

        std::thread::Builder::new()
            .name(format!("{label}-capture"))
            .spawn(move || {
                let mut device = match open() {
                    Ok(device) => {
                        let _ = ready_tx.send(Ok(()));
                        device
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let (width, height) = device.resolution();
                tracing::info!("{} capturing at {}x{}", thread_label, width, height);
                pump(device.as_mut(), &publisher, &thread_label);
            })
            .context("Failed to spawn capture thread")?;

        ready_rx
            .await
            .context("Capture thread exited while opening the device")??;
        Ok(source)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current pixel size; 0x0 before the first frame.
    pub fn dimensions(&self) -> (u32, u32) {
        self.frames
            .borrow()
            .as_ref()
            .map(|f| f.dimensions())
            .unwrap_or((0, 0))
    }

    pub fn current_frame(&self) -> Option<Arc<RgbaImage>> {
        self.frames.borrow().clone()
    }

    /// Ask the producer to stop. The stream ends once it does.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    /// Resolves when the producer has gone away.
    pub async fn ended(&self) {
        self.ended.cancelled().await
    }

    pub fn same_stream(&self, other: &LiveSource) -> bool {
        self.id == other.id
    }
}

impl FramePublisher {
    pub fn publish(&self, frame: RgbaImage) {
        self.frames.send_replace(Some(Arc::new(frame)));
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for FramePublisher {
    fn drop(&mut self) {
        self.ended.cancel();
    }
}

fn pump(device: &mut dyn FrameSource, publisher: &FramePublisher, label: &str) {
    let mut frames = 0u64;
    while !publisher.is_stopped() {
        match device.capture_frame() {
            Ok(frame) => {
                publisher.publish(frame);
                frames += 1;
            }
            Err(e) => {
                tracing::warn!("{} capture failed: {:#}", label, e);
                break;
            }
        }
    }
    tracing::info!("{} stopped after {} frames", label, frames);
}
