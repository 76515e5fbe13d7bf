use super::controls::{BackgroundSelection, ControlState};
use super::pacing::Branch;
use crate::compositor::{
    downscale_into, place, placement_rect, render_background, update_matte, Backdrop,
    PlacementPreset, Surface,
};
use crate::config::ReducedHeight;
use crate::segmentation::Segmenter;
use image::RgbaImage;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Background resolved from the current selection and attached sources.
#[derive(Debug, Clone)]
pub enum BackgroundSource {
    None,
    Image(Arc<RgbaImage>),
    /// Screen share is attached; its frame may not have arrived yet.
    Stream(Option<Arc<RgbaImage>>),
}

/// What one tick will do, decided from a single snapshot of inputs.
#[derive(Debug, Clone)]
pub enum TickPlan {
    Idle,
    Passthrough {
        frame: Arc<RgbaImage>,
    },
    Composite {
        frame: Arc<RgbaImage>,
        background: BackgroundSource,
        preset: PlacementPreset,
        /// Screen-share size used as the placement reference.
        screen: Option<(u32, u32)>,
    },
}

/// Current value of every input the loop reads.
#[derive(Debug, Clone, Default)]
pub struct TickInputs {
    pub controls: ControlState,
    pub webcam: Option<Arc<RgbaImage>>,
    pub screen: Option<Option<Arc<RgbaImage>>>,
    pub background_image: Option<Arc<RgbaImage>>,
}

impl TickPlan {
    pub fn decide(inputs: TickInputs) -> Self {
        let Some(frame) = inputs.webcam.filter(|f| f.width() != 0 && f.height() != 0) else {
            return TickPlan::Idle;
        };
        if !inputs.controls.effect_on {
            return TickPlan::Passthrough { frame };
        }

        let background = match (inputs.controls.background, inputs.screen, inputs.background_image) {
            (BackgroundSelection::Stream, Some(share), _) => BackgroundSource::Stream(share),
            (BackgroundSelection::Image, _, Some(still)) => BackgroundSource::Image(still),
            _ => BackgroundSource::None,
        };

        // Only a share that is actually drawn sizes the canvas; otherwise the
        // output is at webcam size and placement must follow it.
        let screen = match &background {
            BackgroundSource::Stream(share) => {
                Some(share.as_ref().map(|f| f.dimensions()).unwrap_or((0, 0)))
            }
            _ => None,
        };

        TickPlan::Composite {
            frame,
            background,
            preset: inputs.controls.preset,
            screen,
        }
    }
}

/// Owns the four surfaces and runs the per-tick raster work.
pub struct Renderer {
    max_reduced_height: ReducedHeight,
    segmentation_timeout: Duration,
    raw: Surface,
    reduced: Surface,
    matte: Surface,
    output: Surface,
    last_segment: Duration,
}

impl Renderer {
    pub fn new(max_reduced_height: ReducedHeight, segmentation_timeout: Duration) -> Self {
        Self {
            max_reduced_height,
            segmentation_timeout,
            raw: Surface::new(),
            reduced: Surface::new(),
            matte: Surface::new(),
            output: Surface::new(),
            last_segment: Duration::ZERO,
        }
    }

    pub fn output(&self) -> &Surface {
        &self.output
    }

    pub fn matte(&self) -> &Surface {
        &self.matte
    }

    pub fn reduced(&self) -> &Surface {
        &self.reduced
    }

    /// Time the last composite tick spent inside the segmenter.
    pub fn last_segment_time(&self) -> Duration {
        self.last_segment
    }

    /// Run one tick. Without a ready segmenter a composite plan degrades to
    /// passthrough.
    pub async fn render(&mut self, plan: TickPlan, segmenter: Option<&mut dyn Segmenter>) -> Branch {
        self.last_segment = Duration::ZERO;
        match plan {
            TickPlan::Idle => Branch::Idle,
            TickPlan::Passthrough { frame } => {
                self.blit_raw(&frame);
                self.passthrough()
            }
            TickPlan::Composite {
                frame,
                background,
                preset,
                screen,
            } => {
                self.blit_raw(&frame);
                match segmenter {
                    Some(segmenter) => {
                        self.composite(&frame, background, preset, screen, segmenter)
                            .await
                    }
                    None => self.passthrough(),
                }
            }
        }
    }

    fn blit_raw(&mut self, frame: &RgbaImage) {
        let (width, height) = frame.dimensions();
        self.raw.resize(width, height);
        self.raw.draw(frame, 0.0, 0.0, width as f64, height as f64);
    }

    fn passthrough(&mut self) -> Branch {
        let (width, height) = self.raw.dimensions();
        self.output.resize(width, height);
        self.output
            .draw(self.raw.image(), 0.0, 0.0, width as f64, height as f64);
        Branch::Passthrough
    }

    async fn composite(
        &mut self,
        frame: &RgbaImage,
        background: BackgroundSource,
        preset: PlacementPreset,
        screen: Option<(u32, u32)>,
        segmenter: &mut dyn Segmenter,
    ) -> Branch {
        if !downscale_into(&mut self.reduced, frame, self.max_reduced_height) {
            return self.passthrough();
        }

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.segmentation_timeout, segmenter.segment(self.reduced.image()))
                .await;
        self.last_segment = started.elapsed();

        let mask = match outcome {
            Ok(Ok(mask)) => mask,
            Ok(Err(e)) => {
                tracing::warn!("Segmentation failed, passing frame through: {:#}", e);
                return self.passthrough();
            }
            Err(_) => {
                tracing::warn!(
                    "Segmentation exceeded {:?}, passing frame through",
                    self.segmentation_timeout
                );
                return self.passthrough();
            }
        };

        let raw_size = self.raw.dimensions();
        let backdrop = match &background {
            BackgroundSource::None => Backdrop::None,
            BackgroundSource::Image(still) => Backdrop::Image(still),
            BackgroundSource::Stream(share) => Backdrop::Stream(share.as_deref()),
        };
        render_background(&mut self.output, backdrop, raw_size);

        if let Err(e) = update_matte(&mut self.matte, &mask, &self.reduced, self.output.dimensions()) {
            tracing::warn!("Discarding mask: {}", e);
            return self.passthrough();
        }

        let rect = placement_rect(preset.spec(), screen, raw_size);
        place(&mut self.output, &self.matte, rect);
        Branch::Composite
    }
}
