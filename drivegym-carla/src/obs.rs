//! Observation of [`CarlaEnv`](crate::CarlaEnv).
use drivegym_core::Obs;
use ndarray::Array3;

/// Decoded frame of the primary camera, `(height, width, 3)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CarlaObs {
    pub image: Array3<u8>,
}

impl From<Array3<u8>> for CarlaObs {
    fn from(image: Array3<u8>) -> Self {
        Self { image }
    }
}

impl Obs for CarlaObs {
    fn len(&self) -> usize {
        1
    }
}
