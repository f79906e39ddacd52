//! Image suitability checks and contrast enhancement.

use image::{imageops, RgbImage};
use imageproc::contrast::equalize_histogram;
use thiserror::Error;

/// Smallest accepted enrollment image edge, in pixels.
pub const MIN_IMAGE_EDGE: u32 = 100;
/// Mean brightness bounds (0–255) for an acceptable enrollment image.
pub const MIN_BRIGHTNESS: f32 = 30.0;
pub const MAX_BRIGHTNESS: f32 = 240.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityError {
    #[error("image too small ({width}x{height}, need at least {MIN_IMAGE_EDGE}x{MIN_IMAGE_EDGE})")]
    TooSmall { width: u32, height: u32 },
    #[error("image too dark (mean brightness {0:.1})")]
    TooDark(f32),
    #[error("image too bright (mean brightness {0:.1})")]
    TooBright(f32),
}

/// Mean of all channel values (0.0–255.0).
pub fn mean_brightness(image: &RgbImage) -> f32 {
    let raw = image.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    raw.iter().map(|&b| b as f64).sum::<f64>() as f32 / raw.len() as f32
}

/// Reject images that are too small, too dark or too bright to enroll.
pub fn validate_face_image(image: &RgbImage) -> Result<(), QualityError> {
    let (width, height) = image.dimensions();
    if width < MIN_IMAGE_EDGE || height < MIN_IMAGE_EDGE {
        return Err(QualityError::TooSmall { width, height });
    }

    let brightness = mean_brightness(image);
    if brightness < MIN_BRIGHTNESS {
        return Err(QualityError::TooDark(brightness));
    }
    if brightness > MAX_BRIGHTNESS {
        return Err(QualityError::TooBright(brightness));
    }
    Ok(())
}

/// Global histogram equalization of the luminance, in place.
///
/// Each pixel's channels are shifted by the change in its luma, which keeps
/// hue roughly intact.
pub fn equalize(image: &mut RgbImage) {
    let before = imageops::grayscale(&*image);
    let after = equalize_histogram(&before);

    for (pixel, (old, new)) in image.pixels_mut().zip(before.pixels().zip(after.pixels())) {
        let delta = new[0] as i16 - old[0] as i16;
        for c in pixel.0.iter_mut() {
            *c = (*c as i16 + delta).clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_validate_accepts_ordinary_image() {
        let img = RgbImage::from_pixel(120, 160, Rgb([120, 110, 100]));
        assert_eq!(validate_face_image(&img), Ok(()));
    }

    #[test]
    fn test_validate_rejects_small() {
        let img = RgbImage::from_pixel(99, 400, Rgb([128, 128, 128]));
        assert_eq!(
            validate_face_image(&img),
            Err(QualityError::TooSmall { width: 99, height: 400 })
        );
    }

    #[test]
    fn test_validate_rejects_dark_and_bright() {
        let dark = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        let bright = RgbImage::from_pixel(100, 100, Rgb([250, 250, 250]));
        assert!(matches!(validate_face_image(&dark), Err(QualityError::TooDark(_))));
        assert!(matches!(validate_face_image(&bright), Err(QualityError::TooBright(_))));
    }

    #[test]
    fn test_mean_brightness() {
        let img = RgbImage::from_pixel(4, 4, Rgb([0, 60, 240]));
        assert!((mean_brightness(&img) - 100.0).abs() < 1e-4);
        assert_eq!(mean_brightness(&RgbImage::new(0, 0)), 0.0);
    }

    #[test]
    fn test_equalize_increases_contrast() {
        let mut img = RgbImage::from_fn(32, 32, |x, y| {
            let v = 100 + ((x + y * 32) % 11) as u8;
            Rgb([v, v, v])
        });
        let spread = |img: &RgbImage| {
            let lumas: Vec<u8> = img.pixels().map(|p| p[0]).collect();
            lumas.iter().max().unwrap() - lumas.iter().min().unwrap()
        };
        let before = spread(&img);
        equalize(&mut img);
        assert!(spread(&img) > before, "equalize should widen the range");
    }

    #[test]
    fn test_equalize_flat_image_stays_flat() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([50, 60, 70]));
        equalize(&mut img);
        let first = *img.get_pixel(0, 0);
        assert!(img.pixels().all(|p| *p == first));
    }

    #[test]
    fn test_equalize_shifts_channels_together() {
        let mut img = RgbImage::from_fn(16, 16, |x, _| {
            let v = 90 + (x as u8) * 2;
            Rgb([v, v + 10, v + 20])
        });
        equalize(&mut img);
        for p in img.pixels().filter(|p| p[2] < 255) {
            assert_eq!(p[1] as i16 - p[0] as i16, 10);
            assert_eq!(p[2] as i16 - p[1] as i16, 10);
        }
    }
}
