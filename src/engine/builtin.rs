//! Built-in raster engine.
//!
//! Serves the `RBR` driver from disk or from virtual files and the `MEM`
//! driver from the heap. Read-only disk datasets are memory mapped so that
//! windowed reads never load the whole file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info, warn};
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::buffer::{NativeBuffer, SharedBuffer};
use crate::constants::{
    DriverCaps, DRIVER_MEM, DRIVER_RBR, OVERVIEW_SIDECAR_EXT, RBR_HEADER_SIZE, VERSION_MAJOR,
    VERSION_MINOR, VERSION_PATCH, VSIMEM_PREFIX,
};
use crate::engine::format::{self, Header, OverviewLevel};
use crate::engine::resample::{self, Plane};
use crate::engine::{BufLayout, CreateParams, NativeDataset, RasterEngine};
use crate::error::{NativeError, NativeResult};
use crate::lock;
use crate::types::{Access, GeoTransform, PixelType, Rect, ResampleAlg};
use crate::view::PixelOps;

/// Rows copied per chunk by `create_copy`
const COPY_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Engine serving the `RBR` and `MEM` drivers
#[derive(Debug, Default)]
pub struct BuiltinEngine {
    /// Virtual files by name
    vsi: Mutex<HashMap<String, SharedBuffer>>,
}

impl BuiltinEngine {
    pub fn new() -> Self {
        BuiltinEngine::default()
    }

    /// Whether a virtual file named `name` exists
    pub fn has_virtual_file(&self, name: &str) -> bool {
        lock(&self.vsi).contains_key(name)
    }

    fn virtual_file(&self, name: &str) -> NativeResult<SharedBuffer> {
        lock(&self.vsi)
            .get(name)
            .cloned()
            .ok_or_else(|| NativeError::new(format!("{}: no such virtual file", name)))
    }

    fn open_virtual(&self, path: &str, access: Access) -> NativeResult<BuiltinDataset> {
        let buffer = self.virtual_file(path)?;
        let bytes = lock(&buffer).as_bytes().to_vec();
        let header = Header::decode(&bytes, bytes.len())?;
        let projection = format::decode_trailer(&bytes[header.data_end()..])?;
        let mut data = bytes;
        data.truncate(header.data_end());
        Ok(BuiltinDataset {
            driver: DRIVER_RBR,
            backing: Backing::Virtual {
                name: path.to_string(),
                buffer,
            },
            access,
            header,
            projection,
            store: Store::Heap(data),
            overviews: Vec::new(),
            dirty: false,
        })
    }

    fn open_disk(&self, path: &str, access: Access) -> NativeResult<BuiltinDataset> {
        let update = access == Access::Update;
        let mut file = OpenOptions::new().read(true).write(update).open(path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < RBR_HEADER_SIZE {
            return Err(NativeError::new(format!("{}: not an RBR file", path)));
        }
        let mut head = [0u8; RBR_HEADER_SIZE];
        file.read_exact(&mut head)?;
        let header = Header::decode(&head, file_len)?;

        let mut trailer = Vec::new();
        file.seek(SeekFrom::Start(header.data_end() as u64))?;
        file.read_to_end(&mut trailer)?;
        let projection = format::decode_trailer(&trailer)?;

        let mut options = MmapOptions::new();
        options.len(header.data_end());
        let store = if update {
            Store::MappedMut(unsafe { options.map_mut(&file)? }, file)
        } else {
            Store::Mapped(unsafe { options.map(&file)? })
        };

        let overviews = load_sidecar(path, &header);
        Ok(BuiltinDataset {
            driver: DRIVER_RBR,
            backing: Backing::Disk(PathBuf::from(path)),
            access,
            header,
            projection,
            store,
            overviews,
            dirty: false,
        })
    }

    fn create_dataset(
        &self,
        driver: &str,
        path: &str,
        params: &CreateParams,
    ) -> NativeResult<BuiltinDataset> {
        if params.width == 0 || params.height == 0 || params.bands == 0 {
            return Err(NativeError::new(format!(
                "invalid dataset shape {}x{}x{}",
                params.width, params.height, params.bands
            )));
        }
        for option in &params.options {
            debug!("{}: ignoring creation option {}", driver, option);
        }
        let header = Header {
            width: params.width,
            height: params.height,
            bands: params.bands,
            pixel_type: params.pixel_type,
            transform: None,
        };
        let head = header.encode()?;
        let heap = || {
            let mut data = vec![0u8; header.data_end()];
            data[..RBR_HEADER_SIZE].copy_from_slice(&head);
            Store::Heap(data)
        };

        let (driver, backing, store) = match driver {
            DRIVER_MEM => (DRIVER_MEM, Backing::Memory, heap()),
            DRIVER_RBR if path.starts_with(VSIMEM_PREFIX) => {
                let mut vsi = lock(&self.vsi);
                let buffer = match vsi.get(path) {
                    Some(buffer) => buffer.clone(),
                    None => {
                        let buffer = NativeBuffer::new(0)
                            .map_err(|e| NativeError::new(e.to_string()))?
                            .into_shared();
                        vsi.insert(path.to_string(), buffer.clone());
                        buffer
                    }
                };
                drop(vsi);
                let backing = Backing::Virtual {
                    name: path.to_string(),
                    buffer,
                };
                (DRIVER_RBR, backing, heap())
            }
            DRIVER_RBR => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                file.set_len(header.data_end() as u64)?;
                file.write_all(&head)?;
                file.seek(SeekFrom::Start(header.data_end() as u64))?;
                file.write_all(&format::encode_trailer("")?)?;
                remove_sidecar(path);
                let mut options = MmapOptions::new();
                options.len(header.data_end());
                let map = unsafe { options.map_mut(&file)? };
                (
                    DRIVER_RBR,
                    Backing::Disk(PathBuf::from(path)),
                    Store::MappedMut(map, file),
                )
            }
            other => return Err(NativeError::new(format!("driver {} not available", other))),
        };

        let mut ds = BuiltinDataset {
            driver,
            backing,
            access: Access::Update,
            header,
            projection: String::new(),
            store,
            overviews: Vec::new(),
            dirty: true,
        };
        ds.flush()?;
        Ok(ds)
    }
}

fn sidecar_path(path: &str) -> String {
    format!("{}.{}", path, OVERVIEW_SIDECAR_EXT)
}

fn remove_sidecar(path: &str) {
    let sidecar = sidecar_path(path);
    if Path::new(&sidecar).exists() {
        if let Err(e) = fs::remove_file(&sidecar) {
            warn!("{}: failed to remove old overviews: {}", sidecar, e);
        }
    }
}

/// Overviews from the sidecar next to `path`; stale or broken sidecars are skipped
fn load_sidecar(path: &str, header: &Header) -> Vec<OverviewLevel> {
    let sidecar = sidecar_path(path);
    let bytes = match fs::read(&sidecar) {
        Ok(bytes) => bytes,
        Err(_) => return Vec::new(),
    };
    match format::decode_overviews(header, &bytes) {
        Ok(Some(levels)) => levels,
        Ok(None) => {
            warn!("{}: overviews do not match {}, ignoring", sidecar, path);
            Vec::new()
        }
        Err(e) => {
            warn!("{}: {}, ignoring", sidecar, e);
            Vec::new()
        }
    }
}

impl RasterEngine for BuiltinEngine {
    fn name(&self) -> &str {
        "builtin"
    }

    fn version(&self) -> String {
        format!("{}.{}.{}", VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
    }

    fn driver_caps(&self, driver: &str) -> Option<DriverCaps> {
        match driver {
            DRIVER_RBR => Some(DriverCaps::CREATE | DriverCaps::CREATE_COPY | DriverCaps::VIRTUAL_IO),
            DRIVER_MEM => Some(DriverCaps::CREATE | DriverCaps::CREATE_COPY),
            _ => None,
        }
    }

    fn open(&self, path: &str, access: Access) -> NativeResult<Box<dyn NativeDataset>> {
        let ds = if path.starts_with(VSIMEM_PREFIX) {
            self.open_virtual(path, access)?
        } else {
            self.open_disk(path, access)?
        };
        Ok(Box::new(ds))
    }

    fn create(
        &self,
        driver: &str,
        path: &str,
        params: &CreateParams,
    ) -> NativeResult<Box<dyn NativeDataset>> {
        Ok(Box::new(self.create_dataset(driver, path, params)?))
    }

    fn create_copy(
        &self,
        driver: &str,
        path: &str,
        src: &mut dyn NativeDataset,
        options: &[String],
    ) -> NativeResult<Box<dyn NativeDataset>> {
        let code = src.pixel_type_code();
        let pixel_type = PixelType::from_code(code)
            .ok_or_else(|| NativeError::new(format!("unknown pixel type code {}", code)))?;
        let params = CreateParams {
            width: src.width(),
            height: src.height(),
            bands: src.band_count(),
            pixel_type,
            options: options.to_vec(),
        };
        let mut dst = self.create_dataset(driver, path, &params)?;
        dst.set_projection(&src.projection())?;
        if let Some(gt) = src.geo_transform() {
            dst.set_geo_transform(&gt)?;
        }

        let size = params.pixel_type.size();
        let row = params.width * size;
        let rows = (COPY_CHUNK_BYTES / row).clamp(1, params.height);
        let mut chunk = vec![0u8; rows * row];
        for band in 0..params.bands {
            let mut y = 0;
            while y < params.height {
                let n = rows.min(params.height - y);
                let window = Rect::new(0, y, params.width, n);
                let layout = BufLayout {
                    width: params.width,
                    height: n,
                    pixel_space: size,
                    line_space: row,
                };
                src.read_band(band, window, &mut chunk, layout)?;
                dst.write_band(band, window, &chunk, layout)?;
                y += n;
            }
        }
        dst.flush()?;
        Ok(Box::new(dst))
    }

    fn install_virtual_file(&self, name: &str, buffer: SharedBuffer) -> NativeResult<()> {
        if !name.starts_with(VSIMEM_PREFIX) {
            return Err(NativeError::new(format!(
                "{}: virtual file names must start with {}",
                name, VSIMEM_PREFIX
            )));
        }
        let mut vsi = lock(&self.vsi);
        if vsi.contains_key(name) {
            return Err(NativeError::new(format!("{}: virtual file exists", name)));
        }
        vsi.insert(name.to_string(), buffer);
        Ok(())
    }

    fn remove_virtual_file(&self, name: &str) -> NativeResult<()> {
        lock(&self.vsi)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NativeError::new(format!("{}: no such virtual file", name)))
    }
}

/// Where a dataset's bytes are persisted
enum Backing {
    Disk(PathBuf),
    Virtual { name: String, buffer: SharedBuffer },
    Memory,
}

/// Header and samples, `[0, data_end)` of the encoded file
enum Store {
    Mapped(Mmap),
    MappedMut(MmapMut, File),
    Heap(Vec<u8>),
}

impl Store {
    fn bytes(&self) -> &[u8] {
        match self {
            Store::Mapped(map) => map,
            Store::MappedMut(map, _) => map,
            Store::Heap(data) => data,
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Store::Mapped(_) => None,
            Store::MappedMut(map, _) => Some(map),
            Store::Heap(data) => Some(data),
        }
    }
}

struct BuiltinDataset {
    driver: &'static str,
    backing: Backing,
    access: Access,
    header: Header,
    projection: String,
    store: Store,
    overviews: Vec<OverviewLevel>,
    /// Header, trailer or samples changed since the last flush
    dirty: bool,
}

impl BuiltinDataset {
    fn name(&self) -> String {
        match &self.backing {
            Backing::Disk(path) => path.display().to_string(),
            Backing::Virtual { name, .. } => name.clone(),
            Backing::Memory => DRIVER_MEM.to_string(),
        }
    }

    fn check_writable(&self) -> NativeResult<()> {
        if self.access == Access::ReadOnly {
            return Err(NativeError::new(format!(
                "{}: dataset opened read-only",
                self.name()
            )));
        }
        Ok(())
    }

    fn check_window(&self, band: usize, window: &Rect) -> NativeResult<()> {
        if band >= self.header.bands {
            return Err(NativeError::new(format!(
                "band {} out of range (dataset has {})",
                band + 1,
                self.header.bands
            )));
        }
        let bounds = Rect::with_size(self.header.width, self.header.height);
        if window.is_empty() || !bounds.contains_rect(window) {
            return Err(NativeError::new(format!(
                "access window {:?} out of range for {}x{} raster",
                window, self.header.width, self.header.height
            )));
        }
        Ok(())
    }

    fn base_plane(&self, band: usize) -> Plane<'_> {
        let start = self.header.band_offset(band);
        Plane {
            data: &self.store.bytes()[start..start + self.header.band_len()],
            width: self.header.width,
            height: self.header.height,
        }
    }

    /// Coarsest level whose factor does not exceed `ratio`
    fn pick_level(&self, ratio: f64) -> Option<&OverviewLevel> {
        self.overviews
            .iter()
            .filter(|l| l.factor as f64 <= ratio + 1e-9)
            .max_by_key(|l| l.factor)
    }

    fn read_resampled(
        &self,
        band: usize,
        window: Rect,
        dst: &mut [u8],
        layout: BufLayout,
    ) -> NativeResult<()> {
        let size = self.header.pixel_type.size();
        let sx = window.width as f64 / layout.width as f64;
        let sy = window.height as f64 / layout.height as f64;
        let (plane, factor) = match self.pick_level(sx.min(sy)) {
            Some(level) => (
                Plane {
                    data: level.band(band, self.header.pixel_type),
                    width: level.width,
                    height: level.height,
                },
                level.factor,
            ),
            None => (self.base_plane(band), 1),
        };
        for by in 0..layout.height {
            let y = window.y as f64 + (by as f64 + 0.5) * sy;
            let py = ((y as usize) / factor).min(plane.height - 1);
            for bx in 0..layout.width {
                let x = window.x as f64 + (bx as f64 + 0.5) * sx;
                let px = ((x as usize) / factor).min(plane.width - 1);
                let from = (py * plane.width + px) * size;
                let to = by * layout.line_space + bx * layout.pixel_space;
                dst[to..to + size].copy_from_slice(&plane.data[from..from + size]);
            }
        }
        Ok(())
    }

    fn build_levels(&self, alg: ResampleAlg, factors: &[usize]) -> Vec<OverviewLevel> {
        let ops = PixelOps::for_type(self.header.pixel_type);
        let mut levels: Vec<OverviewLevel> = Vec::with_capacity(factors.len());
        for &factor in factors {
            let (width, height) = OverviewLevel::dims(self.header.width, self.header.height, factor);
            let source = levels
                .iter()
                .filter(|l| factor % l.factor == 0)
                .max_by_key(|l| l.factor);
            let mut data = Vec::with_capacity(width * height * ops.size * self.header.bands);
            for band in 0..self.header.bands {
                let (plane, step) = match source {
                    Some(level) => (
                        Plane {
                            data: level.band(band, self.header.pixel_type),
                            width: level.width,
                            height: level.height,
                        },
                        factor / level.factor,
                    ),
                    None => (self.base_plane(band), factor),
                };
                data.extend(resample::downsample(&plane, ops, step, width, height, alg));
            }
            levels.push(OverviewLevel {
                factor,
                width,
                height,
                data,
            });
        }
        levels
    }
}

impl NativeDataset for BuiltinDataset {
    fn width(&self) -> usize {
        self.header.width
    }

    fn height(&self) -> usize {
        self.header.height
    }

    fn band_count(&self) -> usize {
        self.header.bands
    }

    fn pixel_type_code(&self) -> u8 {
        self.header.pixel_type.code()
    }

    fn driver_name(&self) -> String {
        self.driver.to_string()
    }

    fn projection(&self) -> String {
        self.projection.clone()
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.header.transform
    }

    fn set_projection(&mut self, wkt: &str) -> NativeResult<()> {
        self.check_writable()?;
        self.projection = wkt.to_string();
        self.dirty = true;
        Ok(())
    }

    fn set_geo_transform(&mut self, transform: &GeoTransform) -> NativeResult<()> {
        self.check_writable()?;
        if transform.iter().any(|v| !v.is_finite()) {
            return Err(NativeError::new("geotransform coefficients must be finite"));
        }
        self.header.transform = Some(*transform);
        self.dirty = true;
        Ok(())
    }

    fn read_band(
        &mut self,
        band: usize,
        window: Rect,
        dst: &mut [u8],
        layout: BufLayout,
    ) -> NativeResult<()> {
        self.check_window(band, &window)?;
        let size = self.header.pixel_type.size();
        if dst.len() < layout.span(size) {
            return Err(NativeError::new("destination buffer too small"));
        }
        if layout.width != window.width || layout.height != window.height {
            return self.read_resampled(band, window, dst, layout);
        }
        let plane = self.base_plane(band);
        for r in 0..window.height {
            let from = ((window.y + r) * plane.width + window.x) * size;
            let src = &plane.data[from..from + window.width * size];
            let to = r * layout.line_space;
            if layout.pixel_space == size {
                dst[to..to + src.len()].copy_from_slice(src);
            } else {
                for (c, sample) in src.chunks_exact(size).enumerate() {
                    let at = to + c * layout.pixel_space;
                    dst[at..at + size].copy_from_slice(sample);
                }
            }
        }
        Ok(())
    }

    fn write_band(
        &mut self,
        band: usize,
        window: Rect,
        src: &[u8],
        layout: BufLayout,
    ) -> NativeResult<()> {
        self.check_writable()?;
        self.check_window(band, &window)?;
        if layout.width != window.width || layout.height != window.height {
            return Err(NativeError::new("resampled writes are not supported"));
        }
        let size = self.header.pixel_type.size();
        if src.len() < layout.span(size) {
            return Err(NativeError::new("source buffer too small"));
        }
        let start = self.header.band_offset(band);
        let width = self.header.width;
        let bytes = self
            .store
            .bytes_mut()
            .ok_or_else(|| NativeError::new("dataset storage is read-only"))?;
        for r in 0..window.height {
            let to = start + ((window.y + r) * width + window.x) * size;
            let from = r * layout.line_space;
            if layout.pixel_space == size {
                let n = window.width * size;
                bytes[to..to + n].copy_from_slice(&src[from..from + n]);
            } else {
                for c in 0..window.width {
                    let at = from + c * layout.pixel_space;
                    let dst = to + c * size;
                    bytes[dst..dst + size].copy_from_slice(&src[at..at + size]);
                }
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn overview_count(&self) -> usize {
        self.overviews.len()
    }

    fn build_overviews(&mut self, alg: ResampleAlg, factors: &[usize]) -> NativeResult<()> {
        if let Some(bad) = factors.iter().find(|&&f| f < 2) {
            return Err(NativeError::new(format!("invalid overview factor {}", bad)));
        }
        let mut factors = factors.to_vec();
        factors.sort_unstable();
        factors.dedup();

        info!(
            "{}: building {} overview levels ({})",
            self.name(),
            factors.len(),
            alg
        );
        let levels = self.build_levels(alg, &factors);
        if let Backing::Disk(path) = &self.backing {
            let sidecar = sidecar_path(&path.display().to_string());
            fs::write(&sidecar, format::encode_overviews(&self.header, &levels)?)?;
        }
        self.overviews = levels;
        Ok(())
    }

    fn flush(&mut self) -> NativeResult<()> {
        if !self.dirty || self.access == Access::ReadOnly {
            return Ok(());
        }
        let head = self.header.encode()?;
        let trailer = format::encode_trailer(&self.projection)?;
        let end = self.header.data_end();
        if let Some(bytes) = self.store.bytes_mut() {
            bytes[..RBR_HEADER_SIZE].copy_from_slice(&head);
        }
        match (&mut self.store, &self.backing) {
            (Store::MappedMut(map, file), _) => {
                map.flush()?;
                file.set_len((end + trailer.len()) as u64)?;
                file.seek(SeekFrom::Start(end as u64))?;
                file.write_all(&trailer)?;
                file.sync_data()?;
            }
            (Store::Heap(data), Backing::Virtual { buffer, .. }) => {
                let mut buf = lock(buffer);
                buf.resize(end + trailer.len())
                    .map_err(|e| NativeError::new(e.to_string()))?;
                let out = buf.as_bytes_mut();
                out[..end].copy_from_slice(data);
                out[end..].copy_from_slice(&trailer);
            }
            _ => {}
        }
        self.dirty = false;
        Ok(())
    }
}

impl Drop for BuiltinDataset {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("{}: flush on close failed: {}", self.name(), e);
        }
    }
}
