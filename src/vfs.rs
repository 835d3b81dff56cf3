use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;
use once_cell::sync::Lazy;

use crate::buffer::SharedBuffer;
use crate::constants::VSIMEM_PREFIX;
use crate::engine::{default_engine, RasterEngine};
use crate::error::{Error, NativeError, Result};
use crate::lock;

static NEXT_REGISTRY: AtomicUsize = AtomicUsize::new(0);

static GLOBAL: Lazy<VirtualFileRegistry> = Lazy::new(|| VirtualFileRegistry::new(default_engine()));

#[derive(Default)]
struct Entries {
    counter: u64,
    files: HashMap<String, SharedBuffer>,
}

/// Named in-memory files the engine can open like paths
///
/// The registry only holds references; the buffers stay owned by whoever
/// created them. Each registry draws names from its own namespace, so
/// several registries can share one engine.
pub struct VirtualFileRegistry {
    engine: Arc<dyn RasterEngine>,
    id: usize,
    entries: Mutex<Entries>,
}

impl VirtualFileRegistry {
    pub fn new(engine: Arc<dyn RasterEngine>) -> Self {
        VirtualFileRegistry {
            engine,
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Process-wide registry over the built-in engine
    pub fn global() -> &'static VirtualFileRegistry {
        &GLOBAL
    }

    /// Install `buffer` as a virtual file and return its generated name
    pub fn register(&self, buffer: SharedBuffer) -> Result<String> {
        let mut entries = lock(&self.entries);
        entries.counter += 1;
        let name = format!(
            "{}rasterbridge/{}/{}.rbr",
            VSIMEM_PREFIX, self.id, entries.counter
        );
        self.engine
            .install_virtual_file(&name, buffer.clone())
            .map_err(|reason| Error::CreateFailed {
                path: name.clone(),
                op: "VirtualFileRegistry::register",
                reason,
            })?;
        entries.files.insert(name.clone(), buffer);
        Ok(name)
    }

    pub fn lookup(&self, name: &str) -> Result<SharedBuffer> {
        lock(&self.entries)
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    /// Remove the virtual file; the mapping goes away even if the engine fails
    pub fn unlink(&self, name: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.files.remove(name).is_none() {
            return Err(Error::NotFound {
                name: name.to_string(),
            });
        }
        self.engine
            .remove_virtual_file(name)
            .map_err(|reason: NativeError| Error::UnlinkFailed {
                name: name.to_string(),
                reason,
            })
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.entries).files.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for VirtualFileRegistry {
    fn drop(&mut self) {
        let entries = lock(&self.entries);
        for name in entries.files.keys() {
            if let Err(e) = self.engine.remove_virtual_file(name) {
                warn!("failed to unlink {}: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::NativeBuffer;
    use crate::engine::BuiltinEngine;

    #[test]
    fn names_are_unique_per_registry() {
        let engine: Arc<dyn RasterEngine> = Arc::new(BuiltinEngine::new());
        let a = VirtualFileRegistry::new(engine.clone());
        let b = VirtualFileRegistry::new(engine);
        let buf = NativeBuffer::new(16).unwrap().into_shared();
        let n1 = a.register(buf.clone()).unwrap();
        let n2 = a.register(buf.clone()).unwrap();
        let n3 = b.register(buf).unwrap();
        assert_ne!(n1, n2);
        assert_ne!(n1, n3);
        assert!(n1.starts_with(VSIMEM_PREFIX));
        assert_eq!(a.names(), {
            let mut v = vec![n1, n2];
            v.sort();
            v
        });
    }

    #[test]
    fn unlink_unknown_name() {
        let reg = VirtualFileRegistry::new(Arc::new(BuiltinEngine::new()));
        assert!(matches!(reg.unlink("/vsimem/nope"), Err(Error::NotFound { .. })));
        assert!(reg.is_empty());
    }
}
