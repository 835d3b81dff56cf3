//! Typed access to raw sample bytes.
//!
//! Views borrow a byte range and reinterpret runs of it as fixed-width
//! numbers. They never copy the range, so a view is only as valid as the
//! borrow it was built from. A trailing partial element is ignored.

use std::mem::size_of;

use crate::types::PixelType;

/// Fixed-width value that can be read from and written to raw bytes
///
/// # Safety
///
/// Implementors must be plain data: every bit pattern of `size_of::<Self>()`
/// bytes is a valid value and the type has no padding. `DataView::as_slice`
/// relies on this to reinterpret byte ranges in place.
pub unsafe trait Element: Copy + Sized {
    /// Read a value from the first `size_of::<Self>()` bytes, native order
    fn read_ne(bytes: &[u8]) -> Self;
    /// Write the value into the first `size_of::<Self>()` bytes, native order
    fn write_ne(self, bytes: &mut [u8]);
}

macro_rules! element_impl {
    ($($t:ty),*) => {$(
        unsafe impl Element for $t {
            #[inline]
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&bytes[..size_of::<$t>()]);
                <$t>::from_ne_bytes(raw)
            }

            #[inline]
            fn write_ne(self, bytes: &mut [u8]) {
                bytes[..size_of::<$t>()].copy_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

element_impl!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Complex sample stored as adjacent real and imaginary parts
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Complex { re, im }
    }
}

macro_rules! complex_impl {
    ($($t:ty),*) => {$(
        unsafe impl Element for Complex<$t> {
            #[inline]
            fn read_ne(bytes: &[u8]) -> Self {
                let half = size_of::<$t>();
                Complex {
                    re: <$t>::read_ne(&bytes[..half]),
                    im: <$t>::read_ne(&bytes[half..2 * half]),
                }
            }

            #[inline]
            fn write_ne(self, bytes: &mut [u8]) {
                let half = size_of::<$t>();
                self.re.write_ne(&mut bytes[..half]);
                self.im.write_ne(&mut bytes[half..2 * half]);
            }
        }
    )*};
}

complex_impl!(i16, i32, f32, f64);

/// Reverse the byte order inside every full `width`-byte group
///
/// Widths 0 and 1 leave the data untouched. A trailing partial group is
/// left as is. Applying the swap twice restores the input.
pub fn swap_bytes(data: &mut [u8], width: usize) {
    if width < 2 {
        return;
    }
    for chunk in data.chunks_exact_mut(width) {
        chunk.reverse();
    }
}

fn len_of<T: Element>(bytes: &[u8]) -> usize {
    bytes.len() / size_of::<T>()
}

fn get<T: Element>(bytes: &[u8], i: usize) -> Option<T> {
    let n = size_of::<T>();
    if i >= len_of::<T>(bytes) {
        return None;
    }
    Some(T::read_ne(&bytes[i * n..]))
}

fn as_slice<T: Element>(bytes: &[u8]) -> Option<&[T]> {
    // Element guarantees every bit pattern is a valid T.
    let (head, body, _) = unsafe { bytes.align_to::<T>() };
    if head.is_empty() {
        Some(body)
    } else {
        None
    }
}

/// Read-only typed view
#[derive(Debug, Clone, Copy)]
pub struct DataViewRef<'a> {
    bytes: &'a [u8],
}

impl<'a> DataViewRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        DataViewRef { bytes }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Number of whole `T` elements in the range
    pub fn len_of<T: Element>(&self) -> usize {
        len_of::<T>(self.bytes)
    }

    pub fn get<T: Element>(&self, i: usize) -> Option<T> {
        get(self.bytes, i)
    }

    /// Zero-copy slice, `None` when the range is not aligned for `T`
    pub fn as_slice<T: Element>(&self) -> Option<&'a [T]> {
        as_slice(self.bytes)
    }
}

/// Read/write typed view
#[derive(Debug)]
pub struct DataView<'a> {
    bytes: &'a mut [u8],
}

impl<'a> DataView<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        DataView { bytes }
    }

    pub fn as_ref(&self) -> DataViewRef<'_> {
        DataViewRef::new(self.bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    pub fn len_of<T: Element>(&self) -> usize {
        len_of::<T>(self.bytes)
    }

    pub fn get<T: Element>(&self, i: usize) -> Option<T> {
        get(self.bytes, i)
    }

    /// Store `value` at element index `i`
    ///
    /// # Panics
    ///
    /// Panics if `i` is not below `len_of::<T>()`.
    pub fn set<T: Element>(&mut self, i: usize, value: T) {
        let n = size_of::<T>();
        assert!(
            i < self.len_of::<T>(),
            "index {} out of range for {} elements",
            i,
            self.len_of::<T>()
        );
        value.write_ne(&mut self.bytes[i * n..]);
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        as_slice(self.bytes)
    }

    pub fn as_slice_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        let (head, body, _) = unsafe { self.bytes.align_to_mut::<T>() };
        if head.is_empty() {
            Some(body)
        } else {
            None
        }
    }

    pub fn swap_bytes(&mut self, width: usize) {
        swap_bytes(self.bytes, width);
    }

    /// Convert native-order elements of `width` bytes to big endian
    pub fn to_big_endian(&mut self, width: usize) {
        if cfg!(target_endian = "little") {
            swap_bytes(self.bytes, width);
        }
    }

    pub fn to_little_endian(&mut self, width: usize) {
        if cfg!(target_endian = "big") {
            swap_bytes(self.bytes, width);
        }
    }

    /// Convert big-endian elements to native order
    pub fn from_big_endian(&mut self, width: usize) {
        self.to_big_endian(width);
    }

    pub fn from_little_endian(&mut self, width: usize) {
        self.to_little_endian(width);
    }
}

/// Per pixel type accessors, resolved once and reused for every sample
///
/// A sample is `components` values of `component_size` bytes each: one for
/// real types, two (real, imaginary) for complex types.
#[derive(Debug)]
pub struct PixelOps {
    pub pixel_type: PixelType,
    pub size: usize,
    pub components: usize,
    pub component_size: usize,
    get: fn(&[u8]) -> f64,
    set: fn(&mut [u8], f64),
}

macro_rules! int_accessors {
    ($get:ident, $set:ident, $t:ty) => {
        fn $get(b: &[u8]) -> f64 {
            <$t>::read_ne(b) as f64
        }

        fn $set(b: &mut [u8], v: f64) {
            // NaN casts to zero
            let v = v.round().clamp(<$t>::MIN as f64, <$t>::MAX as f64) as $t;
            v.write_ne(b);
        }
    };
}

int_accessors!(get_u8, set_u8, u8);
int_accessors!(get_u16, set_u16, u16);
int_accessors!(get_i16, set_i16, i16);
int_accessors!(get_u32, set_u32, u32);
int_accessors!(get_i32, set_i32, i32);

fn get_f32(b: &[u8]) -> f64 {
    f32::read_ne(b) as f64
}

fn set_f32(b: &mut [u8], v: f64) {
    (v as f32).write_ne(b);
}

fn get_f64(b: &[u8]) -> f64 {
    f64::read_ne(b)
}

fn set_f64(b: &mut [u8], v: f64) {
    v.write_ne(b);
}

const fn ops(
    pixel_type: PixelType,
    components: usize,
    component_size: usize,
    get: fn(&[u8]) -> f64,
    set: fn(&mut [u8], f64),
) -> PixelOps {
    PixelOps {
        pixel_type,
        size: components * component_size,
        components,
        component_size,
        get,
        set,
    }
}

static PIXEL_OPS: [PixelOps; 11] = [
    ops(PixelType::Byte, 1, 1, get_u8, set_u8),
    ops(PixelType::UInt16, 1, 2, get_u16, set_u16),
    ops(PixelType::Int16, 1, 2, get_i16, set_i16),
    ops(PixelType::UInt32, 1, 4, get_u32, set_u32),
    ops(PixelType::Int32, 1, 4, get_i32, set_i32),
    ops(PixelType::Float32, 1, 4, get_f32, set_f32),
    ops(PixelType::Float64, 1, 8, get_f64, set_f64),
    ops(PixelType::CInt16, 2, 2, get_i16, set_i16),
    ops(PixelType::CInt32, 2, 4, get_i32, set_i32),
    ops(PixelType::CFloat32, 2, 4, get_f32, set_f32),
    ops(PixelType::CFloat64, 2, 8, get_f64, set_f64),
];

impl PixelOps {
    pub fn for_type(pixel_type: PixelType) -> &'static PixelOps {
        let ops = &PIXEL_OPS[pixel_type.code() as usize - 1];
        debug_assert_eq!(ops.pixel_type, pixel_type);
        ops
    }

    /// Component `c` of the sample starting at `sample[0]`
    #[inline]
    pub fn component(&self, sample: &[u8], c: usize) -> f64 {
        (self.get)(&sample[c * self.component_size..])
    }

    /// Store component `c`, rounding and saturating for integer types
    #[inline]
    pub fn set_component(&self, sample: &mut [u8], c: usize, value: f64) {
        (self.set)(&mut sample[c * self.component_size..], value)
    }

    /// Group width for byte swapping a run of these samples
    pub fn swap_width(&self) -> usize {
        self.component_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_table_matches_pixel_types() {
        for t in PixelType::ALL {
            let ops = PixelOps::for_type(t);
            assert_eq!(ops.pixel_type, t);
            assert_eq!(ops.size, t.size());
            assert_eq!(ops.components == 2, t.is_complex());
        }
    }

    #[test]
    fn integer_set_saturates() {
        let ops = PixelOps::for_type(PixelType::Byte);
        let mut b = [0u8; 1];
        ops.set_component(&mut b, 0, 300.0);
        assert_eq!(b[0], 255);
        ops.set_component(&mut b, 0, -4.0);
        assert_eq!(b[0], 0);
        ops.set_component(&mut b, 0, 2.6);
        assert_eq!(b[0], 3);
    }

    #[test]
    fn complex_components() {
        let ops = PixelOps::for_type(PixelType::CInt16);
        let mut b = [0u8; 4];
        ops.set_component(&mut b, 0, 7.0);
        ops.set_component(&mut b, 1, -3.0);
        let c = Complex::<i16>::read_ne(&b);
        assert_eq!(c, Complex::new(7, -3));
    }
}
