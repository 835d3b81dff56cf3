//! RBR container layout.
//!
//! Base file: fixed header, band-sequential samples, projection trailer.
//! Overview sidecar: fixed header, level factors, then per level and band
//! the downsampled samples. All header integers are little endian; samples
//! are stored in native order.

use crate::constants::{RBR_HEADER_SIZE, RBR_MAGIC, RBR_OVR_HEADER_SIZE, RBR_OVR_MAGIC};
use crate::error::{NativeError, NativeResult};
use crate::types::{GeoTransform, PixelType};

fn put_u32(out: &mut [u8], at: usize, v: u32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn get_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn get_f64(bytes: &[u8], at: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    f64::from_le_bytes(raw)
}

fn to_u32(v: usize, what: &str) -> NativeResult<u32> {
    u32::try_from(v).map_err(|_| NativeError::new(format!("{} {} exceeds format limit", what, v)))
}

/// Shape and georeferencing of an RBR base file
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Header {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub pixel_type: PixelType,
    pub transform: Option<GeoTransform>,
}

impl Header {
    /// End of the sample area, or an error when it does not fit in memory
    ///
    /// Every other size accessor assumes this has succeeded.
    pub fn checked_data_end(&self) -> NativeResult<usize> {
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.pixel_type.size()))
            .and_then(|n| n.checked_mul(self.bands))
            .and_then(|n| n.checked_add(RBR_HEADER_SIZE))
            .ok_or_else(|| {
                NativeError::new(format!(
                    "RBR raster {}x{}x{} {} is too large",
                    self.width, self.height, self.bands, self.pixel_type
                ))
            })
    }

    pub fn band_len(&self) -> usize {
        self.width * self.height * self.pixel_type.size()
    }

    pub fn data_len(&self) -> usize {
        self.band_len() * self.bands
    }

    /// Offset of band `band` from the start of the file
    pub fn band_offset(&self, band: usize) -> usize {
        RBR_HEADER_SIZE + band * self.band_len()
    }

    /// End of the sample area, where the trailer starts
    pub fn data_end(&self) -> usize {
        RBR_HEADER_SIZE + self.data_len()
    }

    pub fn encode(&self) -> NativeResult<[u8; RBR_HEADER_SIZE]> {
        self.checked_data_end()?;
        let mut out = [0u8; RBR_HEADER_SIZE];
        out[0..4].copy_from_slice(&RBR_MAGIC);
        put_u32(&mut out, 4, to_u32(self.width, "width")?);
        put_u32(&mut out, 8, to_u32(self.height, "height")?);
        put_u32(&mut out, 12, to_u32(self.bands, "band count")?);
        out[16] = self.pixel_type.code();
        if let Some(gt) = self.transform {
            out[17] = 1;
            for (i, v) in gt.iter().enumerate() {
                out[20 + i * 8..28 + i * 8].copy_from_slice(&v.to_le_bytes());
            }
        }
        Ok(out)
    }

    /// Decode the header at the start of `bytes` for a file of `file_len` bytes
    pub fn decode(bytes: &[u8], file_len: usize) -> NativeResult<Header> {
        if bytes.len() < RBR_HEADER_SIZE || bytes[0..4] != RBR_MAGIC {
            return Err(NativeError::new("not an RBR file"));
        }
        let pixel_type = PixelType::from_code(bytes[16])
            .ok_or_else(|| NativeError::new(format!("unknown pixel type code {}", bytes[16])))?;
        let transform = if bytes[17] != 0 {
            let mut gt = [0.0; 6];
            for (i, v) in gt.iter_mut().enumerate() {
                *v = get_f64(bytes, 20 + i * 8);
            }
            Some(gt)
        } else {
            None
        };
        let header = Header {
            width: get_u32(bytes, 4) as usize,
            height: get_u32(bytes, 8) as usize,
            bands: get_u32(bytes, 12) as usize,
            pixel_type,
            transform,
        };
        if header.width == 0 || header.height == 0 || header.bands == 0 {
            return Err(NativeError::new("RBR header has an empty dimension"));
        }
        let end = header.checked_data_end()?;
        if file_len < end {
            return Err(NativeError::new(format!(
                "RBR file truncated: {} bytes, samples end at {}",
                file_len, end
            )));
        }
        Ok(header)
    }
}

pub(crate) fn encode_trailer(projection: &str) -> NativeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + projection.len());
    out.extend_from_slice(&to_u32(projection.len(), "projection length")?.to_le_bytes());
    out.extend_from_slice(projection.as_bytes());
    Ok(out)
}

/// Decode the trailer; a missing trailer means no projection
pub(crate) fn decode_trailer(bytes: &[u8]) -> NativeResult<String> {
    if bytes.len() < 4 {
        return Ok(String::new());
    }
    let len = get_u32(bytes, 0) as usize;
    let text = bytes
        .get(4..4 + len)
        .ok_or_else(|| NativeError::new("RBR projection trailer truncated"))?;
    String::from_utf8(text.to_vec()).map_err(|_| NativeError::new("RBR projection is not UTF-8"))
}

/// One downsampled copy of every band
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OverviewLevel {
    pub factor: usize,
    pub width: usize,
    pub height: usize,
    /// Band-sequential samples
    pub data: Vec<u8>,
}

impl OverviewLevel {
    pub fn dims(base_width: usize, base_height: usize, factor: usize) -> (usize, usize) {
        (base_width.div_ceil(factor), base_height.div_ceil(factor))
    }

    pub fn band_len(&self, pixel_type: PixelType) -> usize {
        self.width * self.height * pixel_type.size()
    }

    pub fn band(&self, band: usize, pixel_type: PixelType) -> &[u8] {
        let n = self.band_len(pixel_type);
        &self.data[band * n..(band + 1) * n]
    }
}

pub(crate) fn encode_overviews(header: &Header, levels: &[OverviewLevel]) -> NativeResult<Vec<u8>> {
    let total: usize = levels.iter().map(|l| l.data.len()).sum();
    let mut out = vec![0u8; RBR_OVR_HEADER_SIZE];
    out[0..4].copy_from_slice(&RBR_OVR_MAGIC);
    put_u32(&mut out, 4, to_u32(header.width, "width")?);
    put_u32(&mut out, 8, to_u32(header.height, "height")?);
    put_u32(&mut out, 12, to_u32(header.bands, "band count")?);
    out[16] = header.pixel_type.code();
    put_u32(&mut out, 20, to_u32(levels.len(), "level count")?);
    out.reserve(levels.len() * 4 + total);
    for level in levels {
        out.extend_from_slice(&to_u32(level.factor, "factor")?.to_le_bytes());
    }
    for level in levels {
        out.extend_from_slice(&level.data);
    }
    Ok(out)
}

/// Decode a sidecar for `header`
///
/// Returns `Ok(None)` when the sidecar was written for a base of another
/// shape; such a sidecar is stale and must not be served.
pub(crate) fn decode_overviews(
    header: &Header,
    bytes: &[u8],
) -> NativeResult<Option<Vec<OverviewLevel>>> {
    if bytes.len() < RBR_OVR_HEADER_SIZE || bytes[0..4] != RBR_OVR_MAGIC {
        return Err(NativeError::new("not an RBR overview file"));
    }
    let matches = get_u32(bytes, 4) as usize == header.width
        && get_u32(bytes, 8) as usize == header.height
        && get_u32(bytes, 12) as usize == header.bands
        && bytes[16] == header.pixel_type.code();
    if !matches {
        return Ok(None);
    }
    let count = get_u32(bytes, 20) as usize;
    if (bytes.len() - RBR_OVR_HEADER_SIZE) / 4 < count {
        return Err(NativeError::new("RBR overview file truncated"));
    }
    let mut at = RBR_OVR_HEADER_SIZE;
    let mut factors = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.len() < at + 4 {
            return Err(NativeError::new("RBR overview file truncated"));
        }
        let factor = get_u32(bytes, at) as usize;
        if factor < 2 {
            return Err(NativeError::new(format!("invalid overview factor {}", factor)));
        }
        factors.push(factor);
        at += 4;
    }
    let mut levels = Vec::with_capacity(count);
    for factor in factors {
        let (width, height) = OverviewLevel::dims(header.width, header.height, factor);
        let len = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(header.pixel_type.size() * header.bands))
            .ok_or_else(|| NativeError::new("RBR overview level too large"))?;
        let data = at
            .checked_add(len)
            .and_then(|end| bytes.get(at..end))
            .ok_or_else(|| NativeError::new("RBR overview file truncated"))?
            .to_vec();
        at += len;
        levels.push(OverviewLevel {
            factor,
            width,
            height,
            data,
        });
    }
    Ok(Some(levels))
}
