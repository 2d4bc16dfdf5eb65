//! Gaussian projection, reserved but not available.

use crate::error::{MapperError, Result};
use crate::projection::{HemisphereInput, ProjectionKernel};
use crate::sparse::CsrMatrix;
use crate::util::GridShape;


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianKernel {
    pub std: f64,
}

impl ProjectionKernel for GaussianKernel {
    fn build_operator(&self, _input: &HemisphereInput, _shape: GridShape) -> Result<CsrMatrix> {
        Err(MapperError::Unimplemented(String::from("gaussian")))
    }
}
