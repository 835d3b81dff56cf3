//! Safe access to raster datasets held by a native raster engine.
//!
//! A [`Dataset`] wraps one native handle behind a mutex and stages windowed
//! reads and writes through [`NativeBuffer`]s. Overview pyramids are built
//! lazily and guarded by an atomic busy flag. In-memory files are exposed to
//! the engine through a [`VirtualFileRegistry`].

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod buffer;
pub mod constants;
mod dataset;
pub mod driver;
pub mod engine;
mod error;
mod image;
pub mod overview;
mod types;
pub mod view;
mod vfs;

pub use buffer::{NativeBuffer, SharedBuffer};
pub use constants::DriverCaps;
pub use dataset::Dataset;
pub use driver::driver_for_path;
pub use engine::{default_engine, BuiltinEngine, NativeDataset, RasterEngine};
pub use error::{Error, NativeError, NativeResult, Result};
pub use image::{Image, SubImage};
pub use overview::compute_levels;
pub use types::{
    Access, GeoTransform, Options, PixelType, Rect, ResampleAlg, DEFAULT_GEO_TRANSFORM,
};
pub use view::{swap_bytes, Complex, DataView, DataViewRef, Element, PixelOps};
pub use vfs::VirtualFileRegistry;

/// Lock `m`, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
