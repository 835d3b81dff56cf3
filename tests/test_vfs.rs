mod common;

use std::sync::Arc;

use common::pattern;
use rasterbridge::{
    Access, BuiltinEngine, Dataset, Error, NativeBuffer, Options, PixelType, RasterEngine,
    VirtualFileRegistry,
};

fn engines() -> (Arc<BuiltinEngine>, Arc<dyn RasterEngine>) {
    let builtin = Arc::new(BuiltinEngine::new());
    let engine: Arc<dyn RasterEngine> = builtin.clone();
    (builtin, engine)
}

#[test]
fn test_encode_and_decode_in_memory() {
    let (_, engine) = engines();
    let registry = VirtualFileRegistry::new(engine.clone());
    let buf = NativeBuffer::new(0).unwrap().into_shared();
    let name = registry.register(buf.clone()).unwrap();

    let data = pattern(8 * 4 * 3, 11);
    let ds = Dataset::create_with(
        engine.clone(),
        &name,
        8,
        4,
        3,
        PixelType::Byte,
        &Options::new().projection("EPSG:4326"),
    )
    .unwrap();
    assert_eq!(ds.driver(), "RBR");
    ds.write(ds.bounds(), &data, 0).unwrap();
    ds.close().unwrap();
    assert_eq!(buf.lock().unwrap().len(), 80 + data.len() + 4 + 9);

    // Decode a copy of the encoded bytes under a second name.
    let encoded = NativeBuffer::from_bytes(buf.lock().unwrap().as_bytes()).unwrap();
    let copy_name = registry.register(encoded.into_shared()).unwrap();
    let ds = Dataset::open_with(engine, &copy_name, Access::ReadOnly).unwrap();
    let mut back = vec![0u8; data.len()];
    ds.read(ds.bounds(), &mut back, 0).unwrap();
    assert_eq!(back, data);
    assert_eq!(ds.projection().unwrap(), "EPSG:4326");
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_lookup_and_unlink() {
    let (builtin, engine) = engines();
    let registry = VirtualFileRegistry::new(engine.clone());
    let buf = NativeBuffer::new(32).unwrap().into_shared();
    let name = registry.register(buf.clone()).unwrap();

    assert!(Arc::ptr_eq(&registry.lookup(&name).unwrap(), &buf));
    assert!(builtin.has_virtual_file(&name));
    registry.unlink(&name).unwrap();
    assert!(!builtin.has_virtual_file(&name));
    assert!(matches!(registry.lookup(&name), Err(Error::NotFound { .. })));
    assert!(matches!(
        Dataset::open_with(engine, &name, Access::ReadOnly),
        Err(Error::OpenFailed { .. })
    ));
    // The registry never owned the buffer.
    assert_eq!(buf.lock().unwrap().len(), 32);
}

#[test]
fn test_failed_unlink_still_drops_mapping() {
    let (_, engine) = engines();
    let registry = VirtualFileRegistry::new(engine.clone());
    let name = registry
        .register(NativeBuffer::new(8).unwrap().into_shared())
        .unwrap();
    engine.remove_virtual_file(&name).unwrap();

    let err = registry.unlink(&name).unwrap_err();
    assert!(matches!(err, Error::UnlinkFailed { .. }));
    assert!(registry.is_empty());
}

#[test]
fn test_drop_unlinks_remaining_files() {
    let (builtin, engine) = engines();
    let names = {
        let registry = VirtualFileRegistry::new(engine);
        for _ in 0..3 {
            registry
                .register(NativeBuffer::new(4).unwrap().into_shared())
                .unwrap();
        }
        registry.names()
    };
    assert_eq!(names.len(), 3);
    for name in names {
        assert!(!builtin.has_virtual_file(&name));
    }
}

#[test]
fn test_global_registry() {
    let registry = VirtualFileRegistry::global();
    let name = registry
        .register(NativeBuffer::new(0).unwrap().into_shared())
        .unwrap();
    let ds = Dataset::create(&name, 2, 2, 1, PixelType::Byte, &Options::new()).unwrap();
    ds.write(ds.bounds(), &[1, 2, 3, 4], 0).unwrap();
    ds.close().unwrap();

    let ds = Dataset::open(&name, Access::ReadOnly).unwrap();
    let mut back = [0u8; 4];
    ds.read(ds.bounds(), &mut back, 0).unwrap();
    assert_eq!(back, [1, 2, 3, 4]);
    registry.unlink(&name).unwrap();
}
