//! Adapters between `image` buffers and the core image types.

use crate::frames::FrameError;
use camcalib_core::{GrayImageView, RgbImage};
use std::path::Path;

/// Borrow an `image::GrayImage` as a core view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

pub fn from_image_rgb(img: ::image::RgbImage) -> Result<RgbImage, FrameError> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    RgbImage::from_raw(width, height, img.into_raw())
        .ok_or(FrameError::InvalidBuffer { width, height })
}

pub fn to_image_rgb(img: &RgbImage) -> Result<::image::RgbImage, FrameError> {
    let invalid = FrameError::InvalidBuffer {
        width: img.width,
        height: img.height,
    };
    let (Ok(w), Ok(h)) = (u32::try_from(img.width), u32::try_from(img.height)) else {
        return Err(invalid);
    };
    ::image::RgbImage::from_raw(w, h, img.data.clone()).ok_or(invalid)
}

/// Decode any supported image file as RGB.
pub fn load_rgb(path: impl AsRef<Path>) -> Result<RgbImage, FrameError> {
    let img = ::image::open(path)?.to_rgb8();
    from_image_rgb(img)
}

/// Encode by file extension.
pub fn save_rgb(img: &RgbImage, path: impl AsRef<Path>) -> Result<(), FrameError> {
    to_image_rgb(img)?.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_view_borrows_the_buffer() {
        let img = ::image::GrayImage::from_fn(3, 2, |x, y| ::image::Luma([(x + 10 * y) as u8]));
        let view = gray_view(&img);
        assert_eq!((view.width, view.height), (3, 2));
        assert_eq!(view.get(2, 1), 12);
    }

    #[test]
    fn rgb_conversion_keeps_pixels() {
        let mut core = RgbImage::new(4, 3);
        core.put(3, 2, [1, 2, 3]);
        let img = to_image_rgb(&core).unwrap();
        assert_eq!(img.get_pixel(3, 2).0, [1, 2, 3]);
        assert_eq!(from_image_rgb(img).unwrap(), core);
    }
}
