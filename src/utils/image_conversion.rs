//! Conversion from `OpenCV` 8-bit BGR images to ndarray input tensors.

use crate::{utils::safe_cast::i32_to_usize, Error, Result};
use ndarray::Array4;
use opencv::core::{Mat, Vec3b, CV_8UC3};
use opencv::prelude::*;

/// Per-channel normalization applied while building a tensor.
///
/// `offset` and `scale` are indexed by output channel, so for `swap_rb`
/// they are given in RGB order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    /// Value subtracted from each 0..255 channel
    pub offset: [f32; 3],
    /// Divisor applied after the offset
    pub scale: [f32; 3],
    /// Emit channels in RGB order instead of the image's BGR
    pub swap_rb: bool,
}

impl Normalization {
    /// Map 0..255 to 0..1, RGB order
    pub const UNIT_RGB: Self = Self::uniform(0.0, 255.0, true);

    /// ImageNet mean and standard deviation, RGB order
    pub const IMAGENET_RGB: Self = Self {
        offset: [123.675, 116.28, 103.53],
        scale: [58.395, 57.12, 57.375],
        swap_rb: true,
    };

    /// Same offset and scale on every channel
    #[must_use]
    pub const fn uniform(offset: f32, scale: f32, swap_rb: bool) -> Self {
        Self {
            offset: [offset; 3],
            scale: [scale; 3],
            swap_rb,
        }
    }

    /// Normalized `[c0, c1, c2]` of one BGR pixel in output channel order
    fn apply(&self, px: &Vec3b) -> [f32; 3] {
        let ordered = if self.swap_rb { [px[2], px[1], px[0]] } else { [px[0], px[1], px[2]] };
        let mut out = [0.0; 3];
        for (c, v) in ordered.iter().enumerate() {
            out[c] = (f32::from(*v) - self.offset[c]) / self.scale[c];
        }
        out
    }
}

/// Memory order of an image tensor with batch size 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `(1, 3, H, W)`
    Nchw,
    /// `(1, H, W, 3)`
    Nhwc,
}

/// `(width, height, channels)` of a Mat
#[must_use]
pub fn mat_shape(mat: &Mat) -> (i32, i32, i32) {
    (mat.cols(), mat.rows(), mat.channels())
}

/// Convert an 8-bit 3-channel image to an NCHW `f32` tensor with batch size 1
///
/// # Errors
///
/// Returns an error if the Mat is not `CV_8UC3` or its pixels cannot be read
pub fn mat_to_nchw(mat: &Mat, norm: Normalization) -> Result<Array4<f32>> {
    mat_to_tensor(mat, norm, TensorLayout::Nchw)
}

/// Convert an 8-bit 3-channel image to an NHWC `f32` tensor with batch size 1
///
/// # Errors
///
/// Returns an error if the Mat is not `CV_8UC3` or its pixels cannot be read
pub fn mat_to_nhwc(mat: &Mat, norm: Normalization) -> Result<Array4<f32>> {
    mat_to_tensor(mat, norm, TensorLayout::Nhwc)
}

/// Convert an 8-bit 3-channel image to a tensor in the given layout
///
/// # Errors
///
/// Returns an error if the Mat is not `CV_8UC3` or its pixels cannot be read
pub fn mat_to_tensor(mat: &Mat, norm: Normalization, layout: TensorLayout) -> Result<Array4<f32>> {
    if mat.typ() != CV_8UC3 {
        return Err(Error::InvalidInput(format!(
            "Expected CV_8UC3 image, got type {}",
            mat.typ()
        )));
    }
    let height = i32_to_usize(mat.rows())?;
    let width = i32_to_usize(mat.cols())?;
    let mut tensor = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, height, width)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, height, width, 3)),
    };

    let mut write = |row: usize, col: usize, px: &Vec3b| {
        for (c, v) in norm.apply(px).into_iter().enumerate() {
            match layout {
                TensorLayout::Nchw => tensor[[0, c, row, col]] = v,
                TensorLayout::Nhwc => tensor[[0, row, col, c]] = v,
            }
        }
    };

    if mat.is_continuous() {
        let pixels = mat.data_typed::<Vec3b>()?;
        for (idx, px) in pixels.iter().enumerate() {
            write(idx / width, idx % width, px);
        }
    } else {
        for row in 0..mat.rows() {
            for col in 0..mat.cols() {
                let px = mat.at_2d::<Vec3b>(row, col)?;
                write(i32_to_usize(row)?, i32_to_usize(col)?, px);
            }
        }
    }

    Ok(tensor)
}
