use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::buffer::NativeBuffer;
use crate::constants::DriverCaps;
use crate::driver::driver_for_path;
use crate::engine::{default_engine, BufLayout, CreateParams, NativeDataset, RasterEngine};
use crate::error::{Error, NativeError, Result};
use crate::image::Image;
use crate::lock;
use crate::types::{
    Access, GeoTransform, Options, PixelType, Rect, ResampleAlg, DEFAULT_GEO_TRANSFORM,
};
use crate::view::PixelOps;

/// Mutable state of a dataset, guarded by the dataset mutex
pub(crate) struct Inner {
    /// Native handle; `None` once closed
    pub(crate) native: Option<Box<dyn NativeDataset>>,
    pub(crate) projection: String,
    pub(crate) transform: GeoTransform,
    pub(crate) options: HashMap<String, String>,
    /// Staging area for copied transfers; grows, never shrinks
    pub(crate) scratch: NativeBuffer,
    /// Overview resampling selected for this handle
    pub(crate) resample: ResampleAlg,
}

/// An open raster dataset
///
/// Shape, band count and pixel type are fixed for the lifetime of the
/// handle. Every operation takes the handle's mutex for its full duration,
/// except the overview busy check, which reads an atomic flag.
///
/// Closing is explicit through [`Dataset::close`] and also happens on drop.
pub struct Dataset {
    path: String,
    access: Access,
    width: usize,
    height: usize,
    bands: usize,
    pixel_type: PixelType,
    ops: &'static PixelOps,
    driver: String,
    engine: Arc<dyn RasterEngine>,
    /// Set while an overview build runs
    pub(crate) building: AtomicBool,
    pub(crate) inner: Mutex<Inner>,
}

impl Dataset {
    /// Open `path` with the built-in engine
    pub fn open(path: &str, access: Access) -> Result<Dataset> {
        Dataset::open_with(default_engine(), path, access)
    }

    pub fn open_with(engine: Arc<dyn RasterEngine>, path: &str, access: Access) -> Result<Dataset> {
        let op = "Dataset::open";
        let native = engine.open(path, access).map_err(|reason| Error::OpenFailed {
            path: path.to_string(),
            op,
            reason,
        })?;
        let ds = Dataset::from_native(engine, path, access, native, HashMap::new(), op)?;
        debug!(
            "opened {} ({}x{}x{} {}, driver {})",
            path, ds.width, ds.height, ds.bands, ds.pixel_type, ds.driver
        );
        Ok(ds)
    }

    /// Create a new dataset with the built-in engine
    pub fn create(
        path: &str,
        width: usize,
        height: usize,
        bands: usize,
        pixel_type: PixelType,
        opts: &Options,
    ) -> Result<Dataset> {
        Dataset::create_with(default_engine(), path, width, height, bands, pixel_type, opts)
    }

    /// Create a new dataset; the driver comes from `opts` or the path extension
    pub fn create_with(
        engine: Arc<dyn RasterEngine>,
        path: &str,
        width: usize,
        height: usize,
        bands: usize,
        pixel_type: PixelType,
        opts: &Options,
    ) -> Result<Dataset> {
        let op = "Dataset::create";
        let driver = resolve_driver(engine.as_ref(), path, opts, DriverCaps::CREATE, op)?;
        let params = CreateParams {
            width,
            height,
            bands,
            pixel_type,
            options: opts.ext_option_list(),
        };
        let native = engine
            .create(&driver, path, &params)
            .map_err(|reason| create_failed(path, op, reason))?;
        let ds = Dataset::from_native(
            engine,
            path,
            Access::Update,
            native,
            opts.ext_options.clone(),
            op,
        )?;
        ds.apply_options(opts, op)?;
        debug!(
            "created {} ({}x{}x{} {}, driver {})",
            path, width, height, bands, pixel_type, driver
        );
        Ok(ds)
    }

    /// Copy this dataset's pixels and metadata into a new dataset at `path`
    pub fn create_copy(&self, path: &str, opts: &Options) -> Result<Dataset> {
        let op = "Dataset::create_copy";
        let driver = resolve_driver(self.engine.as_ref(), path, opts, DriverCaps::CREATE_COPY, op)?;
        let native = {
            let mut inner = lock(&self.inner);
            let Some(src) = inner.native.as_mut() else {
                return Err(self.closed(op));
            };
            self.engine
                .create_copy(&driver, path, src.as_mut(), &opts.ext_option_list())
                .map_err(|reason| create_failed(path, op, reason))?
        };
        let ds = Dataset::from_native(
            self.engine.clone(),
            path,
            Access::Update,
            native,
            opts.ext_options.clone(),
            op,
        )?;
        ds.apply_options(opts, op)?;
        debug!("copied {} to {} (driver {})", self.path, path, driver);
        Ok(ds)
    }

    fn from_native(
        engine: Arc<dyn RasterEngine>,
        path: &str,
        access: Access,
        native: Box<dyn NativeDataset>,
        options: HashMap<String, String>,
        op: &'static str,
    ) -> Result<Dataset> {
        let code = native.pixel_type_code();
        let pixel_type = PixelType::from_code(code).ok_or(Error::UnsupportedPixelType {
            path: path.to_string(),
            op,
            code,
        })?;
        Ok(Dataset {
            path: path.to_string(),
            access,
            width: native.width(),
            height: native.height(),
            bands: native.band_count(),
            pixel_type,
            ops: PixelOps::for_type(pixel_type),
            driver: native.driver_name(),
            engine,
            building: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                projection: native.projection(),
                transform: native.geo_transform().unwrap_or(DEFAULT_GEO_TRANSFORM),
                native: Some(native),
                options,
                scratch: NativeBuffer::new(0)?,
                resample: ResampleAlg::None,
            }),
        })
    }

    /// Write the projection and geotransform requested at creation
    fn apply_options(&self, opts: &Options, op: &'static str) -> Result<()> {
        let reject = |e: Error| match e {
            Error::MetadataWriteFailed { reason, .. } => create_failed(&self.path, op, reason),
            other => other,
        };
        if !opts.projection.is_empty() {
            self.set_projection(&opts.projection).map_err(reject)?;
        }
        if let Some(gt) = &opts.transform {
            self.set_geo_transform(gt).map_err(reject)?;
        }
        Ok(())
    }

    fn closed(&self, op: &'static str) -> Error {
        Error::UseAfterClose {
            path: self.path.clone(),
            op,
        }
    }

    fn io_failure(&self, op: &'static str, reason: NativeError) -> Error {
        Error::IoFailure {
            path: self.path.clone(),
            op,
            reason,
        }
    }

    /// Effective stride for `rect`; zero selects the packed row size
    fn check_stride(&self, op: &'static str, rect: &Rect, stride: usize) -> Result<usize> {
        let Some(row) = rect.width.checked_mul(self.bytes_per_pixel()) else {
            return Err(Error::InvalidStride {
                path: self.path.clone(),
                op,
                stride,
                min: usize::MAX,
            });
        };
        match stride {
            0 => Ok(row),
            s if s < row => Err(Error::InvalidStride {
                path: self.path.clone(),
                op,
                stride: s,
                min: row,
            }),
            s => Ok(s),
        }
    }

    /// Bytes a pixel-interleaved buffer of `width` x `height` spans
    ///
    /// Saturates at `usize::MAX`, which no buffer can satisfy.
    fn span(&self, width: usize, height: usize, stride: usize) -> usize {
        if width == 0 || height == 0 {
            return 0;
        }
        (height - 1)
            .checked_mul(stride)
            .and_then(|rows| rows.checked_add(width.checked_mul(self.bytes_per_pixel())?))
            .unwrap_or(usize::MAX)
    }

    fn layout(&self, width: usize, height: usize, stride: usize) -> BufLayout {
        BufLayout {
            width,
            height,
            pixel_space: self.bytes_per_pixel(),
            line_space: stride,
        }
    }

    /// Read every band of `window` into a `width` x `height` interleaved buffer
    fn read_bands(
        &self,
        native: &mut dyn NativeDataset,
        op: &'static str,
        window: Rect,
        buf: &mut [u8],
        layout: BufLayout,
    ) -> Result<()> {
        let size = self.pixel_type.size();
        for band in 0..self.bands {
            native
                .read_band(band, window, &mut buf[band * size..], layout)
                .map_err(|reason| self.io_failure(op, reason))?;
        }
        Ok(())
    }

    fn write_bands(
        &self,
        native: &mut dyn NativeDataset,
        op: &'static str,
        window: Rect,
        buf: &[u8],
        layout: BufLayout,
    ) -> Result<()> {
        let size = self.pixel_type.size();
        for band in 0..self.bands {
            native
                .write_band(band, window, &buf[band * size..], layout)
                .map_err(|reason| self.io_failure(op, reason))?;
        }
        Ok(())
    }

    /// Read `rect` into `dst` (pixel interleaved, `stride` bytes per row)
    ///
    /// A zero `stride` means rows are packed. The window is not clipped to
    /// the dataset bounds.
    pub fn read(&self, rect: Rect, dst: &mut [u8], stride: usize) -> Result<()> {
        let op = "Dataset::read";
        let mut inner = lock(&self.inner);
        let Inner {
            native: Some(native),
            scratch,
            ..
        } = &mut *inner
        else {
            return Err(self.closed(op));
        };
        let stride = self.check_stride(op, &rect, stride)?;
        if rect.is_empty() {
            return Ok(());
        }
        let need = self.span(rect.width, rect.height, stride);
        if dst.len() < need {
            return Err(Error::InvalidSize {
                op,
                size: dst.len(),
                need,
            });
        }
        scratch.reserve(need)?;
        let staged = &mut scratch.as_bytes_mut()[..need];
        let layout = self.layout(rect.width, rect.height, stride);
        self.read_bands(native.as_mut(), op, rect, staged, layout)?;
        let row = rect.width * self.bytes_per_pixel();
        for r in 0..rect.height {
            let at = r * stride;
            dst[at..at + row].copy_from_slice(&staged[at..at + row]);
        }
        Ok(())
    }

    /// Read `rect` straight into native memory owned by the caller
    ///
    /// A resizable `buf` that is too small is resized first, which discards
    /// its contents.
    pub fn read_into(&self, rect: Rect, buf: &mut NativeBuffer, stride: usize) -> Result<()> {
        let op = "Dataset::read_into";
        let mut inner = lock(&self.inner);
        let Some(native) = inner.native.as_mut() else {
            return Err(self.closed(op));
        };
        let stride = self.check_stride(op, &rect, stride)?;
        if rect.is_empty() {
            return Ok(());
        }
        let need = self.span(rect.width, rect.height, stride);
        if buf.len() < need {
            if !buf.can_resize() {
                return Err(Error::InvalidSize {
                    op,
                    size: buf.len(),
                    need,
                });
            }
            buf.resize(need)?;
        }
        let layout = self.layout(rect.width, rect.height, stride);
        self.read_bands(native.as_mut(), op, rect, buf.as_bytes_mut(), layout)
    }

    /// Write `src` (pixel interleaved, `stride` bytes per row) into `rect`
    pub fn write(&self, rect: Rect, src: &[u8], stride: usize) -> Result<()> {
        self.staged_write("Dataset::write", rect, src, stride)
    }

    fn staged_write(&self, op: &'static str, rect: Rect, src: &[u8], stride: usize) -> Result<()> {
        let mut inner = lock(&self.inner);
        let Inner {
            native: Some(native),
            scratch,
            ..
        } = &mut *inner
        else {
            return Err(self.closed(op));
        };
        let stride = self.check_stride(op, &rect, stride)?;
        if rect.is_empty() {
            return Ok(());
        }
        let need = self.span(rect.width, rect.height, stride);
        if src.len() < need {
            return Err(Error::InvalidSize {
                op,
                size: src.len(),
                need,
            });
        }
        scratch.reserve(need)?;
        let staged = &mut scratch.as_bytes_mut()[..need];
        let row = rect.width * self.bytes_per_pixel();
        for r in 0..rect.height {
            let at = r * stride;
            staged[at..at + row].copy_from_slice(&src[at..at + row]);
        }
        let layout = self.layout(rect.width, rect.height, stride);
        self.write_bands(native.as_mut(), op, rect, staged, layout)
    }

    /// Write `region`, which may live inside `buf`
    ///
    /// When `buf` owns `region` the bytes go to the engine without a copy;
    /// otherwise they are staged like [`Dataset::write`].
    pub fn write_from(
        &self,
        rect: Rect,
        buf: &NativeBuffer,
        region: &[u8],
        stride: usize,
    ) -> Result<()> {
        let op = "Dataset::write_from";
        if !buf.owns(region) {
            return self.staged_write(op, rect, region, stride);
        }
        let mut inner = lock(&self.inner);
        let Some(native) = inner.native.as_mut() else {
            return Err(self.closed(op));
        };
        let stride = self.check_stride(op, &rect, stride)?;
        if rect.is_empty() {
            return Ok(());
        }
        let need = self.span(rect.width, rect.height, stride);
        if region.len() < need {
            return Err(Error::InvalidSize {
                op,
                size: region.len(),
                need,
            });
        }
        let layout = self.layout(rect.width, rect.height, stride);
        self.write_bands(native.as_mut(), op, rect, region, layout)
    }

    /// Read `rect` into a new image
    pub fn read_image(&self, rect: Rect) -> Result<Image> {
        self.read_window("Dataset::read_image", rect, rect)
    }

    /// Read `window` resampled to the size of `out`; `out` becomes the image rect
    pub(crate) fn read_window(&self, op: &'static str, window: Rect, out: Rect) -> Result<Image> {
        let mut inner = lock(&self.inner);
        let Some(native) = inner.native.as_mut() else {
            return Err(self.closed(op));
        };
        let mut img = Image::new(out, self.bands, self.pixel_type)?;
        if window.is_empty() || out.is_empty() {
            return Ok(img);
        }
        let layout = self.layout(out.width, out.height, img.stride);
        self.read_bands(native.as_mut(), op, window, img.pix.as_bytes_mut(), layout)?;
        Ok(img)
    }

    /// Read `rect` resampled to `size` (width, height)
    ///
    /// The returned image is anchored at the origin.
    pub fn read_scaled(&self, rect: Rect, size: (usize, usize)) -> Result<Image> {
        self.read_window("Dataset::read_scaled", rect, Rect::with_size(size.0, size.1))
    }

    /// Write an image back at its own rect without copying
    pub fn write_image(&self, img: &Image) -> Result<()> {
        let op = "Dataset::write_image";
        if img.bands != self.bands || img.pixel_type != self.pixel_type {
            return Err(Error::InvalidSize {
                op,
                size: img.pixel_size(),
                need: self.bytes_per_pixel(),
            });
        }
        self.write_from(img.rect, &img.pix, img.pix.as_bytes(), img.stride)
    }

    /// Set the projection; unchanged values make no native call
    pub fn set_projection(&self, wkt: &str) -> Result<()> {
        let op = "Dataset::set_projection";
        let mut inner = lock(&self.inner);
        let Inner {
            native: Some(native),
            projection,
            ..
        } = &mut *inner
        else {
            return Err(self.closed(op));
        };
        if projection == wkt {
            return Ok(());
        }
        native
            .set_projection(wkt)
            .map_err(|reason| Error::MetadataWriteFailed {
                path: self.path.clone(),
                op,
                reason,
            })?;
        *projection = wkt.to_string();
        Ok(())
    }

    /// Set the geotransform; unchanged values make no native call
    pub fn set_geo_transform(&self, gt: &GeoTransform) -> Result<()> {
        let op = "Dataset::set_geo_transform";
        let mut inner = lock(&self.inner);
        let Inner {
            native: Some(native),
            transform,
            ..
        } = &mut *inner
        else {
            return Err(self.closed(op));
        };
        if transform == gt {
            return Ok(());
        }
        native
            .set_geo_transform(gt)
            .map_err(|reason| Error::MetadataWriteFailed {
                path: self.path.clone(),
                op,
                reason,
            })?;
        *transform = *gt;
        Ok(())
    }

    /// Push buffered state to storage
    ///
    /// Native failures are logged and not returned.
    pub fn flush(&self) -> Result<()> {
        let op = "Dataset::flush";
        let mut inner = lock(&self.inner);
        let Some(native) = inner.native.as_mut() else {
            return Err(self.closed(op));
        };
        if let Err(e) = native.flush() {
            warn!("{}: flush failed: {}", self.path, e);
        }
        Ok(())
    }

    /// Release the native handle and the scratch buffer; safe to repeat
    pub fn close(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        if let Some(mut native) = inner.native.take() {
            if let Err(e) = native.flush() {
                warn!("{}: flush on close failed: {}", self.path, e);
            }
            drop(native);
            inner.scratch.release();
            debug!("closed {}", self.path);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).native.is_none()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn pixel_ops(&self) -> &'static PixelOps {
        self.ops
    }

    /// Bytes per interleaved pixel, all bands included
    pub fn bytes_per_pixel(&self) -> usize {
        self.bands * self.ops.size
    }

    /// Full extent of the dataset
    pub fn bounds(&self) -> Rect {
        Rect::with_size(self.width, self.height)
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn engine(&self) -> &Arc<dyn RasterEngine> {
        &self.engine
    }

    pub fn projection(&self) -> Result<String> {
        let inner = lock(&self.inner);
        if inner.native.is_none() {
            return Err(self.closed("Dataset::projection"));
        }
        Ok(inner.projection.clone())
    }

    pub fn geo_transform(&self) -> Result<GeoTransform> {
        let inner = lock(&self.inner);
        if inner.native.is_none() {
            return Err(self.closed("Dataset::geo_transform"));
        }
        Ok(inner.transform)
    }

    /// Driver options the dataset was created with
    pub fn options(&self) -> Result<HashMap<String, String>> {
        let inner = lock(&self.inner);
        if inner.native.is_none() {
            return Err(self.closed("Dataset::options"));
        }
        Ok(inner.options.clone())
    }
}

fn create_failed(path: &str, op: &'static str, reason: NativeError) -> Error {
    Error::CreateFailed {
        path: path.to_string(),
        op,
        reason,
    }
}

/// Driver from `opts`, else from the extension of `path`, checked for `cap`
fn resolve_driver(
    engine: &dyn RasterEngine,
    path: &str,
    opts: &Options,
    cap: DriverCaps,
    op: &'static str,
) -> Result<String> {
    let driver = if opts.driver_name.is_empty() {
        driver_for_path(path).unwrap_or_default().to_string()
    } else {
        opts.driver_name.clone()
    };
    let caps = engine
        .driver_caps(&driver)
        .ok_or_else(|| Error::UnknownDriver {
            path: path.to_string(),
            op,
            driver: driver.clone(),
        })?;
    if !caps.contains(cap) {
        return Err(create_failed(
            path,
            op,
            NativeError::new(format!("driver {} does not support {:?}", driver, cap)),
        ));
    }
    Ok(driver)
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}: close failed: {}", self.path, e);
        }
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("access", &self.access)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bands", &self.bands)
            .field("pixel_type", &self.pixel_type)
            .field("driver", &self.driver)
            .finish()
    }
}
