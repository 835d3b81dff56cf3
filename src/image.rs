use crate::buffer::NativeBuffer;
use crate::error::{Error, Result};
use crate::types::{PixelType, Rect};
use crate::view::{DataView, DataViewRef, PixelOps};

/// Pixel-interleaved samples of a rectangle, held in native memory
///
/// The pixel at `(x, y)` starts at `pix[(y - rect.y) * stride + (x - rect.x) * pixel_size]`
/// and holds `bands` consecutive samples of `pixel_type`.
#[derive(Debug)]
pub struct Image {
    pub(crate) pix: NativeBuffer,
    pub(crate) stride: usize,
    pub(crate) rect: Rect,
    pub(crate) bands: usize,
    pub(crate) pixel_type: PixelType,
}

impl Image {
    /// Zeroed image covering `rect`
    pub fn new(rect: Rect, bands: usize, pixel_type: PixelType) -> Result<Self> {
        let (stride, len) = rect
            .width
            .checked_mul(bands * pixel_type.size())
            .and_then(|stride| Some((stride, stride.checked_mul(rect.height)?)))
            .ok_or(Error::InvalidSize {
                op: "Image::new",
                size: rect.width,
                need: usize::MAX,
            })?;
        let pix = NativeBuffer::new(len)?;
        Ok(Image {
            pix,
            stride,
            rect,
            bands,
            pixel_type,
        })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn width(&self) -> usize {
        self.rect.width
    }

    pub fn height(&self) -> usize {
        self.rect.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Bytes per pixel, all bands included
    pub fn pixel_size(&self) -> usize {
        self.bands * self.pixel_type.size()
    }

    /// Byte offset of the pixel at `(x, y)`; `None` outside the image
    pub fn pix_offset(&self, x: usize, y: usize) -> Option<usize> {
        pix_offset(&self.rect, self.stride, self.pixel_size(), x, y)
    }

    pub fn pixel_at(&self, x: usize, y: usize) -> Option<&[u8]> {
        let (i, n) = (self.pix_offset(x, y)?, self.pixel_size());
        Some(&self.pix.as_bytes()[i..i + n])
    }

    /// Overwrite the pixel at `(x, y)`; ignored outside the image
    ///
    /// `value` must hold exactly one pixel, all bands included.
    pub fn set_pixel(&mut self, x: usize, y: usize, value: &[u8]) -> Result<()> {
        let n = self.pixel_size();
        if value.len() != n {
            return Err(Error::InvalidSize {
                op: "Image::set_pixel",
                size: value.len(),
                need: n,
            });
        }
        if let Some(i) = self.pix_offset(x, y) {
            self.pix.as_bytes_mut()[i..i + n].copy_from_slice(value);
        }
        Ok(())
    }

    /// One component of one band at `(x, y)` as a float
    pub fn sample(&self, x: usize, y: usize, band: usize, component: usize) -> Option<f64> {
        sample(self.pixel_type, self.bands, self.pixel_at(x, y)?, band, component)
    }

    /// Borrow the part of the image inside `rect`
    ///
    /// `rect` is clipped to the image; a rect outside it yields an empty view.
    pub fn sub_image(&self, rect: Rect) -> SubImage<'_> {
        let rect = rect.intersect(&self.rect);
        let pix: &[u8] = match self.pix_offset(rect.x, rect.y) {
            Some(i) if !rect.is_empty() => &self.pix.as_bytes()[i..],
            _ => &[],
        };
        SubImage {
            pix,
            stride: self.stride,
            rect,
            bands: self.bands,
            pixel_type: self.pixel_type,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.pix.as_bytes()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.pix.as_bytes_mut()
    }

    pub fn view(&self) -> DataViewRef<'_> {
        DataViewRef::new(self.pix.as_bytes())
    }

    pub fn view_mut(&mut self) -> DataView<'_> {
        DataView::new(self.pix.as_bytes_mut())
    }

    /// Backing native buffer
    pub fn buffer(&self) -> &NativeBuffer {
        &self.pix
    }

    pub fn into_buffer(self) -> NativeBuffer {
        self.pix
    }
}

/// Borrowed window into an [`Image`], sharing its pixels and stride
#[derive(Debug, Clone, Copy)]
pub struct SubImage<'a> {
    pix: &'a [u8],
    stride: usize,
    rect: Rect,
    bands: usize,
    pixel_type: PixelType,
}

impl<'a> SubImage<'a> {
    /// Window in the coordinates of the parent image
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pixel_size(&self) -> usize {
        self.bands * self.pixel_type.size()
    }

    /// Byte offset of `(x, y)` from the first pixel of the window
    pub fn pix_offset(&self, x: usize, y: usize) -> Option<usize> {
        pix_offset(&self.rect, self.stride, self.pixel_size(), x, y)
    }

    pub fn pixel_at(&self, x: usize, y: usize) -> Option<&'a [u8]> {
        let (i, n) = (self.pix_offset(x, y)?, self.pixel_size());
        Some(&self.pix[i..i + n])
    }

    pub fn sample(&self, x: usize, y: usize, band: usize, component: usize) -> Option<f64> {
        sample(self.pixel_type, self.bands, self.pixel_at(x, y)?, band, component)
    }

    /// Samples from the first pixel of the window to the end of the parent
    pub fn as_bytes(&self) -> &'a [u8] {
        self.pix
    }

    /// Copy the window into a packed image of its own
    pub fn to_image(&self) -> Result<Image> {
        let mut img = Image::new(self.rect, self.bands, self.pixel_type)?;
        if self.rect.is_empty() {
            return Ok(img);
        }
        let row = img.stride;
        for r in 0..self.rect.height {
            let at = r * self.stride;
            img.pix.as_bytes_mut()[r * row..(r + 1) * row].copy_from_slice(&self.pix[at..at + row]);
        }
        Ok(img)
    }
}

fn pix_offset(rect: &Rect, stride: usize, pixel_size: usize, x: usize, y: usize) -> Option<usize> {
    if !rect.contains(x, y) {
        return None;
    }
    Some((y - rect.y) * stride + (x - rect.x) * pixel_size)
}

fn sample(
    pixel_type: PixelType,
    bands: usize,
    px: &[u8],
    band: usize,
    component: usize,
) -> Option<f64> {
    let ops = PixelOps::for_type(pixel_type);
    if band >= bands || component >= ops.components {
        return None;
    }
    Some(ops.component(&px[band * ops.size..], component))
}
