use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use vessel_api::VesselMetrics;

/// Counts outermost vessel regions, like OpenCV's `RETR_EXTERNAL`.
///
/// Foreground is 8-connected and the image is framed by background, so
/// regions touching the border are counted. A region nested inside the hole
/// of another one has a parent contour and is skipped.
fn count_external_regions(mask: &GrayImage) -> u64 {
    find_contours::<i32>(mask)
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .count() as u64
}

pub fn calculate(mask: &GrayImage, processing_time: f64) -> VesselMetrics {
    let total_pixels = mask.width() as u64 * mask.height() as u64;
    if total_pixels == 0 {
        return VesselMetrics {
            total_pixels: 0,
            vessel_pixels: 0,
            vessel_ratio: 0.0,
            vessel_percentage: 0.0,
            num_vessel_regions: 0,
            average_region_size: 0.0,
            processing_time,
        };
    }

    let vessel_pixels = mask.pixels().filter(|p| p.0[0] > 0).count() as u64;
    let vessel_ratio = vessel_pixels as f64 / total_pixels as f64;
    let num_vessel_regions = count_external_regions(mask);
    let average_region_size = if num_vessel_regions > 0 {
        vessel_pixels as f64 / num_vessel_regions as f64
    } else {
        0.0
    };

    VesselMetrics {
        total_pixels,
        vessel_pixels,
        vessel_ratio,
        vessel_percentage: vessel_ratio * 100.0,
        num_vessel_regions,
        average_region_size,
        processing_time,
    }
}
