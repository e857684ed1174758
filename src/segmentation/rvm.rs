use super::preprocess::Preprocessor;
use super::types::{Accuracy, AlphaMask, SegmentationModel};
use anyhow::{anyhow, ensure, Context, Result};
use image::RgbImage;
use ndarray::{arr1, Array4, Ix4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames and dropped whenever the
/// input resolution changes.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    accuracy: Accuracy,

    // Recurrent hidden states, fed back on the next frame
    hidden: Option<[Array4<f32>; 4]>,

    // Fraction of the input resolution the recurrent decoder runs at
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// The accuracy mode picks the model input size: `Fast` runs at 256x256,
    /// `Accurate` at 512x512. Hidden states always run at 1/4 of the input.
    pub fn new<P: AsRef<Path>>(model_path: P, accuracy: Accuracy) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        let (width, height) = accuracy.input_size();

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            accuracy,
            hidden: None,
            downsample_ratio: 0.25,
        })
    }

    fn zero_hidden_states(&self) -> [Array4<f32>; 4] {
        let (width, height) = self.preprocessor.target_size();
        let h = (height as f32 * self.downsample_ratio) as usize;
        let w = (width as f32 * self.downsample_ratio) as usize;

        tracing::debug!("Initializing hidden states to {}x{}", w, h);

        [
            Array4::zeros((1, 16, h / 2, w / 2)),
            Array4::zeros((1, 20, h / 4, w / 4)),
            Array4::zeros((1, 40, h / 8, w / 8)),
            Array4::zeros((1, 64, h / 16, w / 16)),
        ]
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbImage) -> Result<AlphaMask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let hidden = match self.hidden.take() {
            Some(hidden) => hidden,
            None => self.zero_hidden_states(),
        };

        let input_tensor = self.preprocessor.preprocess(frame)?;
        let [r1, r2, r3, r4] = hidden;

        // RVM expects: src, r1i, r2i, r3i, r4i, downsample_ratio
        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![
                Tensor::from_array(input_tensor)?,
                Tensor::from_array(r1)?,
                Tensor::from_array(r2)?,
                Tensor::from_array(r3)?,
                Tensor::from_array(r4)?,
                Tensor::from_array(arr1(&[self.downsample_ratio]))?
            ])
            .context("Failed to run inference")?;
        drop(_infer_span);

        // Outputs: fgr, pha, r1o, r2o, r3o, r4o
        ensure!(outputs.len() >= 6, "RVM returned {} outputs, expected 6", outputs.len());

        let mut next = Vec::with_capacity(4);
        for index in 2..6 {
            let state = outputs[index]
                .try_extract_array::<f32>()?
                .to_owned()
                .into_dimensionality::<Ix4>()
                .with_context(|| format!("Hidden state {} has unexpected rank", index - 1))?;
            next.push(state);
        }
        self.hidden = next.try_into().ok();

        // Alpha matte, shape [1, 1, H, W]
        let pha = outputs[1].try_extract_array::<f32>()?;
        let shape = pha.shape();
        ensure!(shape.len() == 4, "Alpha output has rank {}, expected 4", shape.len());
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);

        AlphaMask::from_raw(matte_width, matte_height, pha.iter().copied().collect())
            .ok_or_else(|| anyhow!("Alpha output does not fill a {}x{} mask", matte_width, matte_height))
    }

    fn set_accuracy(&mut self, accuracy: Accuracy) {
        if accuracy == self.accuracy {
            return;
        }

        let (width, height) = accuracy.input_size();
        tracing::info!("Switching RVM to {:?} ({}x{})", accuracy, width, height);
        self.accuracy = accuracy;
        self.preprocessor = Preprocessor::new(width, height);
        self.reset_state();
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.hidden = None;
    }

    fn input_size(&self) -> (u32, u32) {
        self.preprocessor.target_size()
    }
}
