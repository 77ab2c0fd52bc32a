//! Binary morphology over 0/255 masks with the 3x3 cross kernel.
//!
//! An L1 ball of radius 1 is exactly the cross, so the imageproc operators
//! match an elliptical 3x3 structuring element.

use image::GrayImage;
use imageproc::{distance_transform::Norm, morphology};

const KERNEL_NORM: Norm = Norm::L1;
const KERNEL_RADIUS: u8 = 1;

pub fn erode(mask: &GrayImage) -> GrayImage {
    morphology::erode(mask, KERNEL_NORM, KERNEL_RADIUS)
}

pub fn dilate(mask: &GrayImage) -> GrayImage {
    morphology::dilate(mask, KERNEL_NORM, KERNEL_RADIUS)
}

pub fn open(mask: &GrayImage) -> GrayImage {
    morphology::open(mask, KERNEL_NORM, KERNEL_RADIUS)
}

pub fn close(mask: &GrayImage) -> GrayImage {
    morphology::close(mask, KERNEL_NORM, KERNEL_RADIUS)
}

/// Removes speckle noise, then fills single-pixel gaps.
pub fn clean_mask(mask: &GrayImage) -> GrayImage {
    close(&open(mask))
}
