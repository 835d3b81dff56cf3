use rasterbridge::{swap_bytes, Complex, DataView, Error, NativeBuffer, PixelOps, PixelType};

#[test]
fn test_ownership_of_sub_slices() {
    let mut buf = NativeBuffer::new(64).unwrap();
    buf.as_bytes_mut()
        .iter_mut()
        .enumerate()
        .for_each(|(i, b)| *b = i as u8);
    let other = NativeBuffer::from_bytes(buf.as_bytes()).unwrap();

    let bytes = buf.as_bytes();
    assert!(buf.owns(bytes));
    assert!(buf.owns(&bytes[10..20]));
    assert!(buf.owns(&bytes[63..]));
    assert!(!buf.owns(&bytes[..0]));
    assert!(!buf.owns(other.as_bytes()));
    assert!(!other.owns(&bytes[1..2]));
    assert_eq!(other.as_bytes(), bytes);
}

#[test]
fn test_resize_changes_size_only() {
    let mut buf = NativeBuffer::new(16).unwrap();
    buf.resize(48).unwrap();
    assert_eq!(buf.len(), 48);
    assert!(buf.can_resize());
    buf.resize(0).unwrap();
    assert!(buf.is_empty());
    assert!(buf.as_ptr().is_null());
}

#[test]
fn test_fixed_buffers() {
    assert!(matches!(
        NativeBuffer::fixed(0),
        Err(Error::InvalidSize { size: 0, .. })
    ));
    let mut buf = NativeBuffer::fixed(8).unwrap();
    assert!(!buf.can_resize());
    assert!(matches!(buf.resize(16), Err(Error::NotResizable)));
    assert_eq!(buf.len(), 8);
    buf.release();
    buf.release();
    assert_eq!(buf.len(), 0);
}

#[test]
fn test_swap_twice_is_identity() {
    let original: Vec<u8> = (0..19).collect();
    for width in [1, 2, 4, 8] {
        let mut data = original.clone();
        swap_bytes(&mut data, width);
        if width > 1 {
            assert_ne!(data, original);
        }
        // The partial tail group is never touched.
        let tail = original.len() / width * width;
        assert_eq!(data[tail..], original[tail..]);
        swap_bytes(&mut data, width);
        assert_eq!(data, original);
    }
}

#[test]
fn test_typed_view_over_native_memory() {
    let mut buf = NativeBuffer::new(33).unwrap();
    let mut view = DataView::new(buf.as_bytes_mut());
    assert_eq!(view.len_of::<u32>(), 8);
    assert_eq!(view.len_of::<Complex<f64>>(), 2);
    view.set(1, Complex::new(1.5f64, -2.0));
    assert_eq!(view.get::<Complex<f64>>(1), Some(Complex::new(1.5, -2.0)));
    assert_eq!(view.get::<f64>(3), Some(-2.0));
    assert_eq!(view.get::<u32>(8), None);

    view.set(0, 0x0102_0304u32);
    view.to_big_endian(4);
    assert_eq!(&view.bytes()[..4], &[1, 2, 3, 4]);
    view.from_big_endian(4);
    assert_eq!(view.get::<u32>(0), Some(0x0102_0304));
}

#[test]
fn test_pixel_ops_saturate_integers() {
    let ops = PixelOps::for_type(PixelType::Int16);
    let mut sample = [0u8; 2];
    ops.set_component(&mut sample, 0, 1.0e9);
    assert_eq!(ops.component(&sample, 0), i16::MAX as f64);

    let ops = PixelOps::for_type(PixelType::CInt32);
    assert_eq!((ops.size, ops.components, ops.swap_width()), (8, 2, 4));
}
