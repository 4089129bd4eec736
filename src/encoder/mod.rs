use image::DynamicImage;
use thiserror::Error;

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxFaceEncoder, OnnxOptions};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("face not found")]
    NoFace,

    #[error("face model error: {0}")]
    Model(String),
}

/// Turns an image into the embedding of the face it shows.
///
/// Implementations return [`EncodeError::NoFace`] when nothing usable is
/// detected. The pipeline treats both variants as a reason to skip the image.
pub trait FaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<f32>, EncodeError>;
}

impl<T: FaceEncoder + ?Sized> FaceEncoder for &T {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<f32>, EncodeError> {
        (**self).encode(image)
    }
}

impl<T: FaceEncoder + ?Sized> FaceEncoder for Box<T> {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<f32>, EncodeError> {
        (**self).encode(image)
    }
}
