use crate::config::TensorLayout;
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array4, ArrayD, Axis};
use std::io::Cursor;
use thiserror::Error;
use vessel_api::{DataUri, DataUriError};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to decode base64 image: {0}")]
    DataUri(#[from] DataUriError),
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(image::ImageError),
    #[error("Image has zero size")]
    Empty,
    #[error("Unexpected model output shape {0:?}")]
    OutputShape(Vec<usize>),
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ImageError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode(image::ImageError::IoError(e)))?;
    let decoded = reader.decode().map_err(ImageError::Decode)?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ImageError::Empty);
    }
    Ok(rgb)
}

pub fn decode_data_uri_image(input: &str) -> Result<RgbImage, ImageError> {
    let uri = DataUri::parse(input)?;
    decode_image(&uri.data)
}

pub fn encode_png(image: DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(ImageError::Encode)?;
    Ok(buf)
}

pub fn encode_png_data_uri(image: DynamicImage) -> Result<String, ImageError> {
    let png = encode_png(image)?;
    Ok(DataUri::encode("image/png", &png))
}

/// Resizes to the model input and scales channels to `[0, 1]`.
pub fn preprocess(image: &RgbImage, width: u32, height: u32, layout: TensorLayout) -> Array4<f32> {
    let resized = image::imageops::resize(image, width, height, FilterType::Triangle);
    let (w, h) = (width as usize, height as usize);

    let mut input = match layout {
        TensorLayout::Nhwc => Array4::zeros((1, h, w, 3)),
        TensorLayout::Nchw => Array4::zeros((1, 3, h, w)),
    };
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (c, value) in pixel.0.iter().enumerate() {
            let value = *value as f32 / 255.;
            match layout {
                TensorLayout::Nhwc => input[[0, y, x, c]] = value,
                TensorLayout::Nchw => input[[0, c, y, x]] = value,
            }
        }
    }
    input
}

/// Squeezes a single-channel model output down to `[H, W]`.
pub fn probability_map(output: ArrayD<f32>) -> Result<Array2<f32>, ImageError> {
    let shape = output.shape().to_vec();
    let squeezed = match shape.as_slice() {
        [_, _] => output,
        [1, _, _] => output.index_axis_move(Axis(0), 0),
        [1, _, _, 1] => output
            .index_axis_move(Axis(3), 0)
            .index_axis_move(Axis(0), 0),
        [1, 1, _, _] => output
            .index_axis_move(Axis(0), 0)
            .index_axis_move(Axis(0), 0),
        _ => return Err(ImageError::OutputShape(shape)),
    };
    squeezed
        .into_dimensionality::<ndarray::Ix2>()
        .map_err(|_| ImageError::OutputShape(shape))
}

/// Thresholds the probability map and resizes it back to the source size.
pub fn postprocess_mask(
    probabilities: &Array2<f32>,
    original_width: u32,
    original_height: u32,
    threshold: f32,
) -> GrayImage {
    let (h, w) = probabilities.dim();
    if w == 0 || h == 0 {
        return GrayImage::new(original_width, original_height);
    }
    // nearest neighbour: src = floor(dst * src_len / dst_len)
    let src_x: Vec<usize> = (0..original_width as usize)
        .map(|x| (x * w / original_width as usize).min(w - 1))
        .collect();
    let src_y: Vec<usize> = (0..original_height as usize)
        .map(|y| (y * h / original_height as usize).min(h - 1))
        .collect();

    GrayImage::from_fn(original_width, original_height, |x, y| {
        if probabilities[[src_y[y as usize], src_x[x as usize]]] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Blends a red vessel layer over the original image.
pub fn overlay(original: &RgbImage, mask: &GrayImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    RgbImage::from_fn(original.width(), original.height(), |x, y| {
        let Rgb([r, g, b]) = *original.get_pixel(x, y);
        let vessel = mask
            .get_pixel_checked(x, y)
            .map(|p| p.0[0] > 0)
            .unwrap_or(false);
        let red = if vessel { 255.0 } else { 0.0 };
        let blend = |orig: u8, layer: f32| (orig as f32 * (1.0 - alpha) + layer * alpha).round() as u8;
        Rgb([blend(r, red), blend(g, 0.0), blend(b, 0.0)])
    })
}
