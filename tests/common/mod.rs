#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use rasterbridge::engine::{BufLayout, CreateParams};
use rasterbridge::{
    Access, BuiltinEngine, DriverCaps, GeoTransform, NativeDataset, NativeResult, RasterEngine,
    Rect, ResampleAlg, SharedBuffer,
};
use tempfile::TempDir;

// Common test setup
pub fn setup_test_dir() -> TempDir {
    TempDir::new().unwrap()
}

pub fn path_in(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

/// Native calls observed by a `CountingEngine`
#[derive(Default)]
pub struct Counters {
    pub set_projection: AtomicUsize,
    pub set_geo_transform: AtomicUsize,
    pub build_overviews: AtomicUsize,
    pub read_band: AtomicUsize,
    pub write_band: AtomicUsize,
    /// Resampling passed to each build
    pub algs: Mutex<Vec<ResampleAlg>>,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Built-in engine wrapper that counts calls on the datasets it hands out
///
/// With a gate installed, every overview build waits on the barrier twice:
/// once to announce it started and once to be released.
pub struct CountingEngine {
    inner: BuiltinEngine,
    pub counters: Arc<Counters>,
    gate: Option<Arc<Barrier>>,
}

impl CountingEngine {
    pub fn new() -> Arc<CountingEngine> {
        Arc::new(CountingEngine {
            inner: BuiltinEngine::new(),
            counters: Arc::new(Counters::default()),
            gate: None,
        })
    }

    pub fn gated(gate: Arc<Barrier>) -> Arc<CountingEngine> {
        Arc::new(CountingEngine {
            inner: BuiltinEngine::new(),
            counters: Arc::new(Counters::default()),
            gate: Some(gate),
        })
    }

    fn wrap(&self, native: Box<dyn NativeDataset>) -> Box<dyn NativeDataset> {
        Box::new(CountingDataset {
            inner: native,
            counters: self.counters.clone(),
            gate: self.gate.clone(),
        })
    }
}

impl RasterEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn version(&self) -> String {
        self.inner.version()
    }

    fn driver_caps(&self, driver: &str) -> Option<DriverCaps> {
        self.inner.driver_caps(driver)
    }

    fn open(&self, path: &str, access: Access) -> NativeResult<Box<dyn NativeDataset>> {
        Ok(self.wrap(self.inner.open(path, access)?))
    }

    fn create(
        &self,
        driver: &str,
        path: &str,
        params: &CreateParams,
    ) -> NativeResult<Box<dyn NativeDataset>> {
        Ok(self.wrap(self.inner.create(driver, path, params)?))
    }

    fn create_copy(
        &self,
        driver: &str,
        path: &str,
        src: &mut dyn NativeDataset,
        options: &[String],
    ) -> NativeResult<Box<dyn NativeDataset>> {
        Ok(self.wrap(self.inner.create_copy(driver, path, src, options)?))
    }

    fn install_virtual_file(&self, name: &str, buffer: SharedBuffer) -> NativeResult<()> {
        self.inner.install_virtual_file(name, buffer)
    }

    fn remove_virtual_file(&self, name: &str) -> NativeResult<()> {
        self.inner.remove_virtual_file(name)
    }
}

struct CountingDataset {
    inner: Box<dyn NativeDataset>,
    counters: Arc<Counters>,
    gate: Option<Arc<Barrier>>,
}

impl NativeDataset for CountingDataset {
    fn width(&self) -> usize {
        self.inner.width()
    }

    fn height(&self) -> usize {
        self.inner.height()
    }

    fn band_count(&self) -> usize {
        self.inner.band_count()
    }

    fn pixel_type_code(&self) -> u8 {
        self.inner.pixel_type_code()
    }

    fn driver_name(&self) -> String {
        self.inner.driver_name()
    }

    fn projection(&self) -> String {
        self.inner.projection()
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.inner.geo_transform()
    }

    fn set_projection(&mut self, wkt: &str) -> NativeResult<()> {
        self.counters.set_projection.fetch_add(1, Ordering::SeqCst);
        self.inner.set_projection(wkt)
    }

    fn set_geo_transform(&mut self, transform: &GeoTransform) -> NativeResult<()> {
        self.counters.set_geo_transform.fetch_add(1, Ordering::SeqCst);
        self.inner.set_geo_transform(transform)
    }

    fn read_band(
        &mut self,
        band: usize,
        window: Rect,
        dst: &mut [u8],
        layout: BufLayout,
    ) -> NativeResult<()> {
        self.counters.read_band.fetch_add(1, Ordering::SeqCst);
        self.inner.read_band(band, window, dst, layout)
    }

    fn write_band(
        &mut self,
        band: usize,
        window: Rect,
        src: &[u8],
        layout: BufLayout,
    ) -> NativeResult<()> {
        self.counters.write_band.fetch_add(1, Ordering::SeqCst);
        self.inner.write_band(band, window, src, layout)
    }

    fn overview_count(&self) -> usize {
        self.inner.overview_count()
    }

    fn build_overviews(&mut self, alg: ResampleAlg, factors: &[usize]) -> NativeResult<()> {
        self.counters.build_overviews.fetch_add(1, Ordering::SeqCst);
        self.counters.algs.lock().unwrap().push(alg);
        if let Some(gate) = &self.gate {
            gate.wait();
            gate.wait();
        }
        self.inner.build_overviews(alg, factors)
    }

    fn flush(&mut self) -> NativeResult<()> {
        self.inner.flush()
    }
}

/// Deterministic test pattern of `len` bytes
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
