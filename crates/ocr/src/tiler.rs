use image::DynamicImage;
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

use ryoshu_core::{BoundingBox, PixelRegion, NORMALIZED_MAX};

#[derive(Debug, Error)]
pub enum TileError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode tile: {0}")]
    Encode(String),
    #[error("Tile staging failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One crop of the source image.
pub struct Tile {
    pub index: u8,
    pub region: PixelRegion,
    pub image: DynamicImage,
}

impl Tile {
    /// Encode the tile as PNG into a fresh temporary file. The file is
    /// removed when the returned handle drops.
    pub fn stage(&self, dir: Option<&Path>) -> Result<NamedTempFile, TileError> {
        let png = encode_png(&self.image)?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("ryoshu-tile-").suffix(".png");
        let mut file = match dir {
            Some(d) => builder.tempfile_in(d)?,
            None => builder.tempfile()?,
        };
        file.write_all(&png)?;
        file.flush()?;
        Ok(file)
    }
}

/// Four quadrants plus a centred crop of the same size, so that a receipt
/// lying across a quadrant boundary is seen whole at least once.
pub fn tile_regions(width: u32, height: u32) -> [PixelRegion; 5] {
    let (w, h) = (width / 2, height / 2);
    [
        PixelRegion::new(0, 0, w, h),
        PixelRegion::new(w, 0, w, h),
        PixelRegion::new(0, h, w, h),
        PixelRegion::new(w, h, w, h),
        PixelRegion::new(width / 4, height / 4, w, h),
    ]
}

/// Split `img` into its five tiles. Images too small to halve give none.
pub fn split_into_tiles(img: &DynamicImage) -> Vec<Tile> {
    if img.width() < 2 || img.height() < 2 {
        return Vec::new();
    }
    tile_regions(img.width(), img.height())
        .into_iter()
        .enumerate()
        .map(|(i, region)| Tile {
            index: i as u8,
            region,
            image: crop(img, region),
        })
        .collect()
}

pub fn crop(img: &DynamicImage, region: PixelRegion) -> DynamicImage {
    img.crop_imm(region.x, region.y, region.width, region.height)
}

/// Pixel region for a normalized box grown by `margin` (a fraction of the
/// full image size) on every side and clamped to the image.
pub fn expand_region(bbox: BoundingBox, margin: f64, width: u32, height: u32) -> PixelRegion {
    let axis = |lo: u32, hi: u32, full: u32| -> (u32, u32) {
        let full_f = full as f64;
        let scale = |v: u32| v as f64 / NORMALIZED_MAX as f64 * full_f;
        let pad = margin * full_f;
        let (lo, hi) = (lo.min(hi), lo.max(hi));
        let start = (scale(lo) - pad).floor().clamp(0.0, full_f) as u32;
        let end = (scale(hi) + pad).ceil().clamp(0.0, full_f) as u32;
        let start = start.min(full.saturating_sub(1));
        (start, end.saturating_sub(start).max(1))
    };
    let (y, h) = axis(bbox.ymin, bbox.ymax, height);
    let (x, w) = axis(bbox.xmin, bbox.xmax, width);
    PixelRegion::new(x, y, w, h)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, TileError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| TileError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    fn gray(width: u32, height: u32) -> DynamicImage {
        let img: GrayImage = ImageBuffer::from_fn(width, height, |x, _| Luma([(x % 256) as u8]));
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn regions_for_even_image() {
        let r = tile_regions(400, 200);
        assert_eq!(r[0], PixelRegion::new(0, 0, 200, 100));
        assert_eq!(r[1], PixelRegion::new(200, 0, 200, 100));
        assert_eq!(r[2], PixelRegion::new(0, 100, 200, 100));
        assert_eq!(r[3], PixelRegion::new(200, 100, 200, 100));
        assert_eq!(r[4], PixelRegion::new(100, 50, 200, 100));
    }

    #[test]
    fn split_produces_five_half_size_tiles() {
        let tiles = split_into_tiles(&gray(40, 20));
        assert_eq!(tiles.len(), 5);
        for (i, t) in tiles.iter().enumerate() {
            assert_eq!(t.index as usize, i);
            assert_eq!((t.image.width(), t.image.height()), (20, 10));
        }
    }

    #[test]
    fn tiny_image_has_no_tiles() {
        assert!(split_into_tiles(&gray(1, 8)).is_empty());
    }

    #[test]
    fn staged_tile_is_png_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let tile = split_into_tiles(&gray(8, 8)).remove(0);
        let staged = tile.stage(Some(dir.path())).unwrap();
        let path = staged.path().to_path_buf();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn expand_region_adds_margin_and_clamps() {
        let b = BoundingBox::from_raw([250, 250, 750, 750]);
        let r = expand_region(b, 0.05, 400, 400);
        assert_eq!(r, PixelRegion::new(80, 80, 240, 240));

        let edge = BoundingBox::from_raw([0, 0, 1000, 1000]);
        assert_eq!(expand_region(edge, 0.05, 400, 200), PixelRegion::new(0, 0, 400, 200));
    }

    #[test]
    fn expand_region_never_empty() {
        let b = BoundingBox::from_raw([1000, 1000, 1000, 1000]);
        let r = expand_region(b, 0.0, 100, 100);
        assert!(r.width >= 1 && r.height >= 1);
        assert!(r.x + r.width <= 100 && r.y + r.height <= 100);
    }
}
