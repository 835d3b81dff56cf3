mod common;

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{path_in, setup_test_dir, Counters, CountingEngine};
use rasterbridge::{
    compute_levels, Access, Dataset, Error, Options, PixelType, Rect, ResampleAlg,
};

/// 600 x 300 single band raster whose pixel value is `x / 4`
fn striped(ds: &Dataset) {
    let data: Vec<u8> = (0..300)
        .flat_map(|_| (0..600).map(|x| (x / 4) as u8))
        .collect();
    ds.write(ds.bounds(), &data, 0).unwrap();
}

fn counted_mem(
    engine: &Arc<CountingEngine>,
    width: usize,
    height: usize,
    bands: usize,
    pixel_type: PixelType,
) -> Dataset {
    Dataset::create_with(
        engine.clone(),
        "mem",
        width,
        height,
        bands,
        pixel_type,
        &Options::new().driver("MEM"),
    )
    .unwrap()
}

#[test]
fn test_level_lists() {
    assert_eq!(compute_levels(1000, 600), vec![2, 4]);
    assert_eq!(compute_levels(256, 256), Vec::<usize>::new());
    assert_eq!(compute_levels(257, 10), vec![2]);
}

#[test]
fn test_build_is_idempotent() {
    let engine = CountingEngine::new();
    let ds = counted_mem(&engine, 600, 300, 1, PixelType::Byte);
    assert!(!ds.has_overviews().unwrap());

    ds.build_overviews_if_absent(ResampleAlg::None).unwrap();
    ds.build_overviews_if_absent(ResampleAlg::None).unwrap();
    assert_eq!(Counters::get(&engine.counters.build_overviews), 1);
    assert!(ds.has_overviews().unwrap());
    assert_eq!(ds.overview_count().unwrap(), 2);

    ds.rebuild_overviews(ResampleAlg::Nearest).unwrap();
    assert_eq!(Counters::get(&engine.counters.build_overviews), 2);
}

#[test]
fn test_small_raster_needs_no_build() {
    let engine = CountingEngine::new();
    let ds = counted_mem(&engine, 256, 100, 1, PixelType::Byte);
    ds.build_overviews_if_absent(ResampleAlg::Average).unwrap();
    assert_eq!(Counters::get(&engine.counters.build_overviews), 0);
    assert!(!ds.has_overviews().unwrap());
}

#[test]
fn test_resample_resolution() {
    let engine = CountingEngine::new();
    let single_float = counted_mem(&engine, 300, 300, 1, PixelType::Float32);
    single_float
        .build_overviews_if_absent(ResampleAlg::None)
        .unwrap();
    let multi_float = counted_mem(&engine, 300, 300, 2, PixelType::Float32);
    multi_float
        .build_overviews_if_absent(ResampleAlg::None)
        .unwrap();

    multi_float.set_resample(ResampleAlg::Cubic).unwrap();
    assert_eq!(multi_float.resample().unwrap(), ResampleAlg::Cubic);
    multi_float.rebuild_overviews(ResampleAlg::None).unwrap();
    multi_float.rebuild_overviews(ResampleAlg::Mode).unwrap();

    let algs = engine.counters.algs.lock().unwrap().clone();
    assert_eq!(
        algs,
        vec![
            ResampleAlg::Nearest,
            ResampleAlg::Average,
            ResampleAlg::Cubic,
            ResampleAlg::Mode
        ]
    );
}

#[test]
fn test_busy_check_never_blocks() {
    let gate = Arc::new(Barrier::new(2));
    let engine = CountingEngine::gated(gate.clone());
    let ds = Arc::new(counted_mem(&engine, 600, 300, 1, PixelType::Byte));

    let builder = {
        let ds = ds.clone();
        thread::spawn(move || ds.build_overviews_if_absent(ResampleAlg::None))
    };
    // The native build has started and holds the dataset mutex.
    gate.wait();
    assert!(ds.is_building());

    let start = Instant::now();
    assert!(!ds.has_overviews().unwrap());
    let err = ds.read_overview(1, Rect::new(0, 0, 4, 4)).unwrap_err();
    assert!(matches!(err, Error::OverviewBusy { .. }));
    assert!(start.elapsed() < Duration::from_secs(1));

    gate.wait();
    builder.join().unwrap().unwrap();
    assert!(!ds.is_building());
    assert!(ds.has_overviews().unwrap());
}

#[test]
fn test_read_overview_uses_level_coordinates() {
    let ds = Dataset::create("mem", 600, 300, 1, PixelType::Byte, &Options::new().driver("MEM"))
        .unwrap();
    striped(&ds);

    let before = ds.read_overview(2, Rect::new(10, 5, 4, 2)).unwrap();
    assert_eq!(before.as_bytes(), &[10, 11, 12, 13, 10, 11, 12, 13]);

    ds.build_overviews_if_absent(ResampleAlg::Average).unwrap();
    let after = ds.read_overview(2, Rect::new(10, 5, 4, 2)).unwrap();
    assert_eq!(after.rect(), Rect::new(10, 5, 4, 2));
    assert_eq!(after.as_bytes(), before.as_bytes());

    let base = ds.read_overview(0, Rect::new(8, 0, 2, 1)).unwrap();
    assert_eq!(base.as_bytes(), &[2, 2]);
}

#[test]
fn test_read_overview_clips_to_level_extent() {
    let ds = Dataset::create("mem", 600, 300, 1, PixelType::Byte, &Options::new().driver("MEM"))
        .unwrap();
    striped(&ds);

    let img = ds.read_overview(2, Rect::new(148, 74, 10, 10)).unwrap();
    assert_eq!(img.rect(), Rect::new(148, 74, 2, 1));
    assert_eq!(img.as_bytes(), &[148, 149]);

    let err = ds.read_overview(-1, Rect::new(0, 0, 1, 1)).unwrap_err();
    assert!(matches!(err, Error::InvalidLevel { level: -1, .. }));
}

#[test]
fn test_overviews_persist_next_to_disk_dataset() {
    let dir = setup_test_dir();
    let path = path_in(&dir, "pyramid.rbr");
    let ds = Dataset::create(&path, 600, 300, 1, PixelType::Byte, &Options::new()).unwrap();
    striped(&ds);
    ds.close().unwrap();

    let ds = Dataset::open_with_overviews(&path, ResampleAlg::None, Access::ReadOnly).unwrap();
    assert!(ds.has_overviews().unwrap());
    ds.close().unwrap();
    assert!(fs::metadata(format!("{}.ovr", path)).is_ok());

    let ds = Dataset::open(&path, Access::ReadOnly).unwrap();
    assert_eq!(ds.overview_count().unwrap(), 2);
    let img = ds.read_overview(1, Rect::new(0, 0, 4, 1)).unwrap();
    assert_eq!(img.as_bytes(), &[0, 0, 1, 1]);
}

#[test]
fn test_stale_sidecar_is_ignored() {
    let dir = setup_test_dir();
    let path = path_in(&dir, "stale.rbr");
    let sidecar = format!("{}.ovr", path);
    let saved = path_in(&dir, "saved.ovr");

    let ds = Dataset::create(&path, 600, 300, 1, PixelType::Byte, &Options::new()).unwrap();
    ds.build_overviews_if_absent(ResampleAlg::None).unwrap();
    ds.close().unwrap();
    fs::copy(&sidecar, &saved).unwrap();

    // Recreating the base drops its sidecar; put the old one back.
    Dataset::create(&path, 520, 300, 1, PixelType::Byte, &Options::new())
        .unwrap()
        .close()
        .unwrap();
    assert!(fs::metadata(&sidecar).is_err());
    fs::copy(&saved, &sidecar).unwrap();

    let ds = Dataset::open(&path, Access::ReadOnly).unwrap();
    assert!(!ds.has_overviews().unwrap());
    assert_eq!(ds.width(), 520);
}

#[test]
fn test_overview_calls_after_close() {
    let ds = Dataset::create("mem", 300, 300, 1, PixelType::Byte, &Options::new().driver("MEM"))
        .unwrap();
    ds.close().unwrap();
    assert!(matches!(
        ds.build_overviews_if_absent(ResampleAlg::None),
        Err(Error::UseAfterClose { .. })
    ));
    assert!(matches!(ds.has_overviews(), Err(Error::UseAfterClose { .. })));
}
