//! Image value object shared by the decoder, the encoder and the tile coder.

use crate::error::J2kError;

/// Integer division rounding towards positive infinity.
pub fn ceil_div(value: u32, divisor: u32) -> u32 {
    ((value as u64 + divisor as u64 - 1) / divisor as u64) as u32
}

/// `ceil(value / 2^power)`.
pub fn ceil_div_pow2(value: u32, power: u32) -> u32 {
    if power >= 32 {
        return u32::from(value != 0);
    }
    ((value as u64 + (1u64 << power) - 1) >> power) as u32
}

/// Half-open rectangle on the reference grid, `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    /// Projects a reference grid rectangle onto a component sampled by `dx` x `dy`.
    pub fn subsampled(&self, dx: u32, dy: u32) -> Rect {
        Rect {
            x0: ceil_div(self.x0, dx),
            y0: ceil_div(self.y0, dy),
            x1: ceil_div(self.x1, dx),
            y1: ceil_div(self.y1, dy),
        }
    }

    /// Rectangle at a resolution `reduce` levels below full resolution.
    pub fn reduced(&self, reduce: u32) -> Rect {
        Rect {
            x0: ceil_div_pow2(self.x0, reduce),
            y0: ceil_div_pow2(self.y0, reduce),
            x1: ceil_div_pow2(self.x1, reduce),
            y1: ceil_div_pow2(self.y1, reduce),
        }
    }
}

/// One image component.
#[derive(Debug, Clone, Default)]
pub struct ImageComponent {
    /// Horizontal subsampling factor (XRsiz).
    pub dx: u32,
    /// Vertical subsampling factor (YRsiz).
    pub dy: u32,
    /// Left edge of the component on its own sample grid.
    pub x0: u32,
    /// Top edge of the component on its own sample grid.
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    /// Bit depth, 1..=38 on the wire.
    pub precision: u8,
    pub signed: bool,
    /// Number of resolution levels the samples were decoded at.
    pub resolutions_decoded: u32,
    /// Row-major samples, `width * height` long once allocated.
    pub data: Option<Vec<i32>>,
}

impl ImageComponent {
    pub fn new(precision: u8, signed: bool, dx: u32, dy: u32) -> Self {
        Self {
            dx,
            dy,
            precision,
            signed,
            ..Default::default()
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(
            self.x0,
            self.y0,
            self.x0 + self.width,
            self.y0 + self.height,
        )
    }

    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Allocates a zeroed sample buffer if none is present.
    pub fn allocate(&mut self) {
        if self.data.is_none() {
            self.data = Some(vec![0; self.sample_count()]);
        }
    }

    pub fn min_value(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.precision - 1))
        } else {
            0
        }
    }

    pub fn max_value(&self) -> i64 {
        if self.signed {
            (1i64 << (self.precision - 1)) - 1
        } else {
            (1i64 << self.precision) - 1
        }
    }
}

/// Metadata carried alongside the samples. The codestream layer threads
/// it through without interpreting it, except for the capture resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub icc_profile: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
    pub iptc: Option<Vec<u8>>,
    /// Capture resolution in pixels per metre (horizontal, vertical).
    pub capture_resolution: Option<[f64; 2]>,
}

/// An image on the JPEG 2000 reference grid.
#[derive(Debug, Clone, Default)]
pub struct J2kImage {
    /// Left edge of the image area (XOsiz).
    pub x0: u32,
    /// Top edge of the image area (YOsiz).
    pub y0: u32,
    /// Right edge of the image area (Xsiz).
    pub x1: u32,
    /// Bottom edge of the image area (Ysiz).
    pub y1: u32,
    pub components: Vec<ImageComponent>,
    pub metadata: ImageMetadata,
}

impl J2kImage {
    /// Creates an image and derives every component's geometry from the image area.
    pub fn new(
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
        components: Vec<ImageComponent>,
    ) -> Result<Self, J2kError> {
        if x0 >= x1 || y0 >= y1 {
            return Err(J2kError::InvalidImageDimensions);
        }
        let mut image = Self {
            x0,
            y0,
            x1,
            y1,
            components,
            metadata: ImageMetadata::default(),
        };
        image.update_component_geometry(image.bounds(), 0);
        Ok(image)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x0, self.y0, self.x1, self.y1)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Sets every component's origin and size from `area` (reference grid)
    /// at `reduce` levels below full resolution.
    pub fn update_component_geometry(&mut self, area: Rect, reduce: u32) {
        for component in &mut self.components {
            let rect = area.subsampled(component.dx, component.dy).reduced(reduce);
            component.x0 = rect.x0;
            component.y0 = rect.y0;
            component.width = rect.width();
            component.height = rect.height();
        }
    }

    pub fn allocate(&mut self) {
        for component in &mut self.components {
            component.allocate();
        }
    }

    /// Checks that every allocated buffer matches its component geometry.
    pub fn validate_buffers(&self) -> Result<(), J2kError> {
        for component in &self.components {
            match &component.data {
                Some(data) if data.len() != component.sample_count() => {
                    return Err(J2kError::InvalidImageBuffer);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_geometry() {
        let components = vec![
            ImageComponent::new(8, false, 1, 1),
            ImageComponent::new(8, false, 2, 2),
        ];
        let image = J2kImage::new(1, 1, 10, 9, components).unwrap();
        assert_eq!((image.components[0].width, image.components[0].height), (9, 8));
        // ceil(10/2) - ceil(1/2) = 4, ceil(9/2) - ceil(1/2) = 4
        assert_eq!((image.components[1].x0, image.components[1].width), (1, 4));
        assert_eq!(image.components[1].height, 4);
    }

    #[test]
    fn test_reduced_rect() {
        let rect = Rect::new(3, 0, 64, 33);
        assert_eq!(rect.reduced(1), Rect::new(2, 0, 32, 17));
        assert_eq!(ceil_div_pow2(5, 40), 1);
    }

    #[test]
    fn test_sample_range() {
        let unsigned = ImageComponent::new(12, false, 1, 1);
        assert_eq!((unsigned.min_value(), unsigned.max_value()), (0, 4095));
        let signed = ImageComponent::new(8, true, 1, 1);
        assert_eq!((signed.min_value(), signed.max_value()), (-128, 127));
    }

    #[test]
    fn test_degenerate_image_rejected() {
        assert_eq!(
            J2kImage::new(4, 0, 4, 8, Vec::new()).unwrap_err(),
            J2kError::InvalidImageDimensions
        );
    }
}
