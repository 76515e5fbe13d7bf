mod loopback;

pub use loopback::V4L2Output;

use anyhow::Result;
use image::RgbaImage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Trait for output destinations
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// Forward every composited frame from `stream` into `sink` until cancelled
/// or the pipeline goes away.
pub async fn forward_stream<O>(
    mut stream: watch::Receiver<Option<Arc<RgbaImage>>>,
    mut sink: O,
    cancel: CancellationToken,
) -> Result<()>
where
    O: OutputSink + Send + 'static,
{
    let (width, height) = sink.resolution();
    tracing::info!("Forwarding composited frames to a {}x{} sink", width, height);

    let mut written = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = stream.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let Some(frame) = stream.borrow_and_update().clone() else {
            continue;
        };
        sink = tokio::task::spawn_blocking(move || sink.write_frame(&frame).map(|_| sink))
            .await??;
        written += 1;
    }
    tracing::info!("Output stream closed after {} frames", written);
    Ok(())
}
