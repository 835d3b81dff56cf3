//! Seam between the dataset layer and the native raster engine.
//!
//! The dataset layer only ever talks to a [`RasterEngine`] and the
//! [`NativeDataset`] handles it returns. Everything format specific lives
//! behind these traits.

pub mod builtin;
pub(crate) mod format;
pub(crate) mod resample;

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::buffer::SharedBuffer;
use crate::constants::DriverCaps;
use crate::error::NativeResult;
use crate::types::{Access, GeoTransform, PixelType, Rect, ResampleAlg};

pub use builtin::BuiltinEngine;

/// Layout of a caller buffer taking part in one band transfer
///
/// Sample `(bx, by)` of the band lives at `by * line_space + bx * pixel_space`
/// from the start of the buffer slice handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufLayout {
    pub width: usize,
    pub height: usize,
    pub pixel_space: usize,
    pub line_space: usize,
}

impl BufLayout {
    /// Bytes the layout spans for samples of `sample_size` bytes
    pub fn span(&self, sample_size: usize) -> usize {
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        (self.height - 1) * self.line_space + (self.width - 1) * self.pixel_space + sample_size
    }
}

/// Shape of a dataset to create
#[derive(Debug, Clone, PartialEq)]
pub struct CreateParams {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub pixel_type: PixelType,
    /// Driver creation options as `KEY=VALUE`
    pub options: Vec<String>,
}

/// An open native dataset handle; dropping it closes the handle
pub trait NativeDataset: Send {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn band_count(&self) -> usize;
    /// Native sample type code, numbered as [`PixelType::code`]
    fn pixel_type_code(&self) -> u8;
    fn driver_name(&self) -> String;
    fn projection(&self) -> String;
    /// `None` when the dataset carries no geotransform
    fn geo_transform(&self) -> Option<GeoTransform>;
    fn set_projection(&mut self, wkt: &str) -> NativeResult<()>;
    fn set_geo_transform(&mut self, transform: &GeoTransform) -> NativeResult<()>;

    /// Read `window` of band `band` (zero based) into `dst`
    ///
    /// When the layout size differs from the window size the window is
    /// resampled, using overviews where they help.
    fn read_band(
        &mut self,
        band: usize,
        window: Rect,
        dst: &mut [u8],
        layout: BufLayout,
    ) -> NativeResult<()>;

    /// Write `src` into `window` of band `band`; layout size equals the window
    fn write_band(
        &mut self,
        band: usize,
        window: Rect,
        src: &[u8],
        layout: BufLayout,
    ) -> NativeResult<()>;

    fn overview_count(&self) -> usize;
    /// Build overview levels with the given decimation factors
    fn build_overviews(&mut self, alg: ResampleAlg, factors: &[usize]) -> NativeResult<()>;
    fn flush(&mut self) -> NativeResult<()>;
}

/// A native raster engine
pub trait RasterEngine: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> String;
    /// Capabilities of `driver`, `None` when the engine has no such driver
    fn driver_caps(&self, driver: &str) -> Option<DriverCaps>;
    fn open(&self, path: &str, access: Access) -> NativeResult<Box<dyn NativeDataset>>;
    fn create(
        &self,
        driver: &str,
        path: &str,
        params: &CreateParams,
    ) -> NativeResult<Box<dyn NativeDataset>>;
    fn create_copy(
        &self,
        driver: &str,
        path: &str,
        src: &mut dyn NativeDataset,
        options: &[String],
    ) -> NativeResult<Box<dyn NativeDataset>>;
    /// Expose `buffer` as a readable and writable file named `name`
    fn install_virtual_file(&self, name: &str, buffer: SharedBuffer) -> NativeResult<()>;
    fn remove_virtual_file(&self, name: &str) -> NativeResult<()>;
}

static DEFAULT_ENGINE: Lazy<Arc<BuiltinEngine>> = Lazy::new(|| Arc::new(BuiltinEngine::new()));

/// Process-wide built-in engine used when none is injected
pub fn default_engine() -> Arc<dyn RasterEngine> {
    DEFAULT_ENGINE.clone()
}
