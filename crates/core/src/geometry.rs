use serde::{Deserialize, Serialize};

/// Upper bound of the normalized coordinate space used by `box_2d`.
pub const NORMALIZED_MAX: u32 = 1000;

/// `[ymin, xmin, ymax, xmax]` in the 0–1000 normalized space of whatever
/// image (or tile) the detection was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub ymin: u32,
    pub xmin: u32,
    pub ymax: u32,
    pub xmax: u32,
}

impl BoundingBox {
    /// Build from raw backend values, clamping each into 0..=1000.
    pub fn from_raw(values: [i64; 4]) -> Self {
        let c = |v: i64| v.clamp(0, NORMALIZED_MAX as i64) as u32;
        BoundingBox {
            ymin: c(values[0]),
            xmin: c(values[1]),
            ymax: c(values[2]),
            xmax: c(values[3]),
        }
    }

    pub fn to_array(self) -> [u32; 4] {
        [self.ymin, self.xmin, self.ymax, self.xmax]
    }

    /// Re-express a box detected inside `region` in the normalized space of
    /// the full `image_width` × `image_height` image.
    pub fn to_global(self, region: PixelRegion, image_width: u32, image_height: u32) -> Self {
        let axis = |v: u32, span: u32, offset: u32, full: u32| -> u32 {
            if full == 0 {
                return 0;
            }
            let local_px = v as f64 / NORMALIZED_MAX as f64 * span as f64;
            let global_px = local_px + offset as f64;
            let normalized = (global_px / full as f64 * NORMALIZED_MAX as f64).round();
            normalized.clamp(0.0, NORMALIZED_MAX as f64) as u32
        };
        BoundingBox {
            ymin: axis(self.ymin, region.height, region.y, image_height),
            xmin: axis(self.xmin, region.width, region.x, image_width),
            ymax: axis(self.ymax, region.height, region.y, image_height),
            xmax: axis(self.xmax, region.width, region.x, image_width),
        }
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from(a: [u32; 4]) -> Self {
        BoundingBox::from_raw([a[0] as i64, a[1] as i64, a[2] as i64, a[3] as i64])
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        b.to_array()
    }
}

/// A rectangle in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        PixelRegion { x, y, width, height }
    }

    /// The region covering a whole `width` × `height` image.
    pub fn full(width: u32, height: u32) -> Self {
        PixelRegion { x: 0, y: 0, width, height }
    }
}
