use super::preprocess::Preprocessor;
use super::types::{SegmentationMask, Segmenter};
use super::SegmenterConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::RgbaImage;
use ndarray::{arr1, Array4, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
/// Its soft alpha matte is thresholded into a binary person mask.
pub struct RobustVideoMatting {
    inner: Arc<Mutex<RvmSession>>,
    reset_requested: Arc<AtomicBool>,
    threshold: f32,
}

struct RvmSession {
    session: Session,
    preprocessor: Preprocessor,
    // Fed back into the next inference; None until the first frame.
    recurrent: Option<[Array4<f32>; 4]>,
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// The model runs at `config.input_width`×`config.input_height`; recurrent
    /// state is computed at `config.downsample_ratio` of that size.
    pub fn new(config: &SegmenterConfig) -> Result<Self> {
        let path = config.model_path.as_path();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(
            "RVM model loaded ({}x{}, downsample {})",
            config.input_width,
            config.input_height,
            config.downsample_ratio
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(RvmSession {
                session,
                preprocessor: Preprocessor::new(config.input_width, config.input_height),
                recurrent: None,
                downsample_ratio: config.downsample_ratio,
            })),
            reset_requested: Arc::new(AtomicBool::new(false)),
            threshold: config.threshold,
        })
    }
}

impl RvmSession {
    /// Run one inference and return the alpha matte at the frame's size.
    fn infer(&mut self, frame: &RgbaImage) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let input = self.preprocessor.preprocess(frame);

        // The exported graph accepts 1x1x1x1 zeros as the initial state.
        let [r1, r2, r3, r4] = self
            .recurrent
            .take()
            .unwrap_or_else(|| std::array::from_fn(|_| Array4::zeros((1, 1, 1, 1))));

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![
                "src" => Tensor::from_array(input)?,
                "r1i" => Tensor::from_array(r1)?,
                "r2i" => Tensor::from_array(r2)?,
                "r3i" => Tensor::from_array(r3)?,
                "r4i" => Tensor::from_array(r4)?,
                "downsample_ratio" => Tensor::from_array(arr1(&[self.downsample_ratio]))?,
            ])
            .context("Failed to run inference")?;
        drop(_infer_span);

        // Outputs: fgr, pha, r1o..r4o. Only the alpha matte and state are kept.
        let pha = outputs["pha"].try_extract_array::<f32>()?;
        let shape = pha.shape().to_vec();
        anyhow::ensure!(shape.len() == 4, "Unexpected matte shape {:?}", shape);
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);
        let matte: Vec<f32> = pha.iter().copied().collect();

        let mut next = Vec::with_capacity(4);
        for name in ["r1o", "r2o", "r3o", "r4o"] {
            let state = outputs[name]
                .try_extract_array::<f32>()?
                .to_owned()
                .into_dimensionality::<Ix4>()?;
            next.push(state);
        }
        self.recurrent = next.try_into().ok();

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::postprocess_matte(&matte, matte_width, matte_height, frame_width, frame_height)
    }
}

#[async_trait]
impl Segmenter for RobustVideoMatting {
    async fn segment(&mut self, frame: &RgbaImage) -> Result<SegmentationMask> {
        let inner = Arc::clone(&self.inner);
        let reset = self.reset_requested.swap(false, Ordering::AcqRel);
        let owned = frame.clone();

        let alpha = tokio::task::spawn_blocking(move || {
            let mut session = inner.lock().map_err(|_| anyhow!("RVM session poisoned"))?;
            if reset {
                session.recurrent = None;
            }
            session.infer(&owned)
        })
        .await
        .context("RVM inference task failed")??;

        let (width, height) = frame.dimensions();
        Ok(SegmentationMask::from_alpha(width, height, &alpha, self.threshold)?)
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.reset_requested.store(true, Ordering::Release);
    }
}
