//! Overview pyramid management.
//!
//! Levels form the doubling sequence 2, 4, ..., 2^k where 2^k is the first
//! factor that fits the larger dimension into one tile. Builds are lazy and
//! idempotent; while one runs, the busy flag lets readers bail out without
//! waiting on the dataset mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::constants::{MAX_OVERVIEW_LEVELS, TILE_SIZE};
use crate::dataset::{Dataset, Inner};
use crate::engine::{default_engine, RasterEngine};
use crate::error::{Error, Result};
use crate::image::Image;
use crate::lock;
use crate::types::{Access, Rect, ResampleAlg};

/// Decimation factors needed for a `width` x `height` raster
pub fn compute_levels(width: usize, height: usize) -> Vec<usize> {
    let max_dim = width.max(height);
    let mut levels = Vec::new();
    if max_dim <= TILE_SIZE {
        return levels;
    }
    for i in 1..MAX_OVERVIEW_LEVELS {
        let factor = 1usize << i;
        levels.push(factor);
        if TILE_SIZE * factor >= max_dim {
            break;
        }
    }
    levels
}

/// Clears the busy flag when dropped, including on error and unwind
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        BusyGuard(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dataset {
    /// Open `path` with the built-in engine and build overviews if absent
    pub fn open_with_overviews(path: &str, alg: ResampleAlg, access: Access) -> Result<Dataset> {
        Dataset::open_with_overviews_using(default_engine(), path, alg, access)
    }

    pub fn open_with_overviews_using(
        engine: Arc<dyn RasterEngine>,
        path: &str,
        alg: ResampleAlg,
        access: Access,
    ) -> Result<Dataset> {
        let ds = Dataset::open_with(engine, path, access)?;
        ds.build_overviews_if_absent(alg)?;
        Ok(ds)
    }

    /// Build overviews unless the dataset already has at least one level
    pub fn build_overviews_if_absent(&self, alg: ResampleAlg) -> Result<()> {
        self.build_overviews("Dataset::build_overviews_if_absent", alg, false)
    }

    /// Build overviews even when levels exist, replacing them
    pub fn rebuild_overviews(&self, alg: ResampleAlg) -> Result<()> {
        self.build_overviews("Dataset::rebuild_overviews", alg, true)
    }

    fn build_overviews(&self, op: &'static str, alg: ResampleAlg, force: bool) -> Result<()> {
        let mut inner = lock(&self.inner);
        let Inner {
            native: Some(native),
            resample,
            ..
        } = &mut *inner
        else {
            return Err(Error::UseAfterClose {
                path: self.path().to_string(),
                op,
            });
        };
        if !force && native.overview_count() > 0 {
            return Ok(());
        }
        let levels = compute_levels(self.width(), self.height());
        if levels.is_empty() {
            debug!("{}: fits in one tile, no overviews needed", self.path());
            return Ok(());
        }
        let alg = self.resolve_resample(alg, *resample);

        let _busy = BusyGuard::set(&self.building);
        info!(
            "{}: building overviews {:?} with {}",
            self.path(),
            levels,
            alg
        );
        native
            .build_overviews(alg, &levels)
            .map_err(|reason| Error::OverviewBuildFailed {
                path: self.path().to_string(),
                op,
                reason,
            })
    }

    /// Explicit choice, then the handle's selection, then the type default
    fn resolve_resample(&self, explicit: ResampleAlg, selected: ResampleAlg) -> ResampleAlg {
        if explicit != ResampleAlg::None {
            return explicit;
        }
        if selected != ResampleAlg::None {
            return selected;
        }
        if self.bands() == 1 && self.pixel_type().is_float() {
            ResampleAlg::Nearest
        } else {
            ResampleAlg::Average
        }
    }

    /// Whether overview levels exist; `false` right away while a build runs
    pub fn has_overviews(&self) -> Result<bool> {
        if self.is_building() {
            return Ok(false);
        }
        Ok(self.overview_count()? > 0)
    }

    pub fn overview_count(&self) -> Result<usize> {
        let inner = lock(&self.inner);
        match inner.native.as_ref() {
            Some(native) => Ok(native.overview_count()),
            None => Err(Error::UseAfterClose {
                path: self.path().to_string(),
                op: "Dataset::overview_count",
            }),
        }
    }

    /// Busy check; never takes the dataset mutex
    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    /// Select the resampling used when a build passes `ResampleAlg::None`
    pub fn set_resample(&self, alg: ResampleAlg) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.native.is_none() {
            return Err(Error::UseAfterClose {
                path: self.path().to_string(),
                op: "Dataset::set_resample",
            });
        }
        inner.resample = alg;
        Ok(())
    }

    pub fn resample(&self) -> Result<ResampleAlg> {
        let inner = lock(&self.inner);
        if inner.native.is_none() {
            return Err(Error::UseAfterClose {
                path: self.path().to_string(),
                op: "Dataset::resample",
            });
        }
        Ok(inner.resample)
    }

    /// Read `rect`, given in the coordinates of overview `level`
    ///
    /// Level 0 is the base raster; level `n` is decimated by `2^n`. The rect
    /// is clipped to the level extent, and the image carries the clipped
    /// rect in level coordinates.
    pub fn read_overview(&self, level: i32, rect: Rect) -> Result<Image> {
        let op = "Dataset::read_overview";
        if self.is_building() {
            return Err(Error::OverviewBusy {
                path: self.path().to_string(),
                op,
            });
        }
        let scale = u32::try_from(level)
            .ok()
            .filter(|&l| (l as usize) < MAX_OVERVIEW_LEVELS)
            .map(|l| 1usize << l)
            .ok_or_else(|| Error::InvalidLevel {
                path: self.path().to_string(),
                op,
                level,
            })?;
        let extent = Rect::with_size(self.width().div_ceil(scale), self.height().div_ceil(scale));
        let clipped = rect.intersect(&extent);
        let window = clipped.scale(scale).intersect(&self.bounds());
        self.read_window(op, window, clipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_list() {
        assert_eq!(compute_levels(1000, 600), vec![2, 4]);
        assert_eq!(compute_levels(256, 256), Vec::<usize>::new());
        assert_eq!(compute_levels(257, 10), vec![2]);
        assert_eq!(compute_levels(10, 513), vec![2, 4]);
        assert_eq!(compute_levels(512, 512), vec![2]);
    }

    #[test]
    fn level_list_is_capped() {
        let levels = compute_levels(usize::MAX, 1);
        assert_eq!(levels.len(), MAX_OVERVIEW_LEVELS - 1);
        assert_eq!(levels.last(), Some(&(1 << (MAX_OVERVIEW_LEVELS - 1))));
    }

    #[test]
    fn busy_guard_clears_on_unwind() {
        let flag = AtomicBool::new(false);
        let result = std::panic::catch_unwind(|| {
            let _busy = BusyGuard::set(&flag);
            assert!(flag.load(Ordering::Acquire));
            panic!("build failed");
        });
        assert!(result.is_err());
        assert!(!flag.load(Ordering::Acquire));
    }
}
