use super::{EncodeError, FaceEncoder};
use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use log::{debug, info};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

// UltraFace RFB-320 input geometry
const DETECTOR_WIDTH: u32 = 320;
const DETECTOR_HEIGHT: u32 = 240;
// ArcFace input geometry
const RECOGNIZER_SIZE: u32 = 112;

#[derive(Debug, Clone)]
pub struct OnnxOptions {
    /// Minimum detector score for a box to count as a face.
    pub confidence_threshold: f32,
    /// Fraction of the box size added on each side before cropping.
    pub crop_margin: f32,
}

impl Default for OnnxOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            crop_margin: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
struct FaceBox {
    // Corner coordinates, normalized to [0, 1]
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// Face encoder backed by two ONNX models: an UltraFace detector that finds
/// the most confident face and an ArcFace recognizer that embeds its crop.
pub struct OnnxFaceEncoder {
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
    options: OnnxOptions,
}

impl OnnxFaceEncoder {
    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(
        detector: P,
        recognizer: Q,
        options: OnnxOptions,
    ) -> Result<Self> {
        let detector_path = detector.as_ref();
        let recognizer_path = recognizer.as_ref();

        if !detector_path.is_file() || !recognizer_path.is_file() {
            anyhow::bail!(
                "Face models missing; expected detector at {:?} and recognizer at {:?}",
                detector_path,
                recognizer_path
            );
        }

        let detector = Session::builder()?
            .commit_from_file(detector_path)
            .with_context(|| format!("Failed to create detector session from {:?}", detector_path))?;
        let recognizer = Session::builder()?
            .commit_from_file(recognizer_path)
            .with_context(|| {
                format!("Failed to create recognizer session from {:?}", recognizer_path)
            })?;

        info!(
            "Face models loaded: detector={:?} recognizer={:?}",
            detector_path, recognizer_path
        );

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            options,
        })
    }

    fn detect(&self, image: &DynamicImage) -> Result<Option<FaceBox>> {
        let resized = image
            .resize_exact(DETECTOR_WIDTH, DETECTOR_HEIGHT, FilterType::Triangle)
            .to_rgb8();
        let data = to_nchw(&resized, |v| (v - 127.0) / 128.0);
        let input = Tensor::from_array((
            vec![1i64, 3, DETECTOR_HEIGHT as i64, DETECTOR_WIDTH as i64],
            data,
        ))
        .context("Failed to create detector input tensor")?;

        let mut session = self
            .detector
            .lock()
            .map_err(|_| anyhow!("detector session lock poisoned"))?;
        let input_name = session.inputs[0].name.clone();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let scores_name = pick_output(&output_names, "scores", 0)?;
        let boxes_name = pick_output(&output_names, "boxes", 1)?;

        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("Detector inference failed")?;
        let (_, scores) = outputs
            .get(scores_name.as_str())
            .context("Detector produced no scores output")?
            .try_extract_tensor::<f32>()?;
        let (_, boxes) = outputs
            .get(boxes_name.as_str())
            .context("Detector produced no boxes output")?
            .try_extract_tensor::<f32>()?;

        let anchors = scores.len() / 2;
        if boxes.len() < anchors * 4 {
            anyhow::bail!(
                "Detector output shapes disagree: {} scores, {} box values",
                scores.len(),
                boxes.len()
            );
        }

        let mut best: Option<FaceBox> = None;
        for i in 0..anchors {
            let score = scores[i * 2 + 1];
            if score < self.options.confidence_threshold {
                continue;
            }
            if best.as_ref().is_some_and(|b| b.score >= score) {
                continue;
            }
            best = Some(FaceBox {
                x1: boxes[i * 4],
                y1: boxes[i * 4 + 1],
                x2: boxes[i * 4 + 2],
                y2: boxes[i * 4 + 3],
                score,
            });
        }

        if let Some(face) = &best {
            debug!("Detected face with score {:.3}", face.score);
        }
        Ok(best)
    }

    fn crop(&self, image: &DynamicImage, face: &FaceBox) -> Option<DynamicImage> {
        let (width, height) = image.dimensions();
        let (w, h) = (width as f32, height as f32);

        let box_w = (face.x2 - face.x1) * w;
        let box_h = (face.y2 - face.y1) * h;
        let margin_x = box_w * self.options.crop_margin;
        let margin_y = box_h * self.options.crop_margin;

        let x1 = (face.x1 * w - margin_x).clamp(0.0, w) as u32;
        let y1 = (face.y1 * h - margin_y).clamp(0.0, h) as u32;
        let x2 = (face.x2 * w + margin_x).clamp(0.0, w) as u32;
        let y2 = (face.y2 * h + margin_y).clamp(0.0, h) as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(image.crop_imm(x1, y1, x2 - x1, y2 - y1))
    }

    fn embed(&self, face: &DynamicImage) -> Result<Vec<f32>> {
        let resized = face
            .resize_exact(RECOGNIZER_SIZE, RECOGNIZER_SIZE, FilterType::Triangle)
            .to_rgb8();
        let data = to_nchw(&resized, |v| (v - 127.5) / 127.5);
        let input = Tensor::from_array((
            vec![1i64, 3, RECOGNIZER_SIZE as i64, RECOGNIZER_SIZE as i64],
            data,
        ))
        .context("Failed to create recognizer input tensor")?;

        let mut session = self
            .recognizer
            .lock()
            .map_err(|_| anyhow!("recognizer session lock poisoned"))?;
        let input_name = session.inputs[0].name.clone();
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("Recognizer declares no outputs")?;

        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("Recognizer inference failed")?;
        let (_, values) = outputs
            .get(output_name.as_str())
            .context("Recognizer produced no embedding output")?
            .try_extract_tensor::<f32>()?;

        let mut embedding = values.to_vec();
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            anyhow::bail!("Recognizer embedding has zero norm");
        }
        for x in &mut embedding {
            *x /= norm;
        }
        Ok(embedding)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<f32>, EncodeError> {
        let face = self
            .detect(image)
            .map_err(model_error)?
            .ok_or(EncodeError::NoFace)?;
        let crop = self.crop(image, &face).ok_or(EncodeError::NoFace)?;
        self.embed(&crop).map_err(model_error)
    }
}

fn model_error(err: anyhow::Error) -> EncodeError {
    EncodeError::Model(format!("{err:#}"))
}

fn pick_output(names: &[String], preferred: &str, fallback: usize) -> Result<String> {
    names
        .iter()
        .find(|n| n.as_str() == preferred)
        .or_else(|| names.get(fallback))
        .cloned()
        .with_context(|| format!("Model has no output named {preferred:?}"))
}

/// Planar RGB float buffer in NCHW order.
fn to_nchw(image: &image::RgbImage, normalize: impl Fn(f32) -> f32) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = normalize(pixel[c] as f32);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_to_nchw_layout() {
        let img = ImageBuffer::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([10u8, 20, 30])
            } else {
                Rgb([40u8, 50, 60])
            }
        });
        let data = to_nchw(&img, |v| v);
        assert_eq!(data, vec![10.0, 40.0, 20.0, 50.0, 30.0, 60.0]);
    }

    #[test]
    fn test_pick_output_prefers_name() {
        let names = vec!["boxes".to_string(), "scores".to_string()];
        assert_eq!(pick_output(&names, "scores", 0).unwrap(), "scores");
        assert_eq!(pick_output(&names, "missing", 0).unwrap(), "boxes");
        assert!(pick_output(&[], "scores", 0).is_err());
    }

    #[test]
    fn test_missing_models_rejected() {
        let result = OnnxFaceEncoder::from_files(
            "/nonexistent/detector.onnx",
            "/nonexistent/recognizer.onnx",
            OnnxOptions::default(),
        );
        assert!(result.is_err());
    }
}
