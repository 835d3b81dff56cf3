use std::collections::HashMap;
use std::fmt;

/// Affine pixel-to-georeferenced transform coefficients
pub type GeoTransform = [f64; 6];

/// Identity transform reported when a dataset has none
pub const DEFAULT_GEO_TRANSFORM: GeoTransform = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Dataset access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    ReadOnly,
    Update,
}

/// Sample type of every band in a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
    CInt16,
    CInt32,
    CFloat32,
    CFloat64,
}

impl PixelType {
    pub const ALL: [PixelType; 11] = [
        PixelType::Byte,
        PixelType::UInt16,
        PixelType::Int16,
        PixelType::UInt32,
        PixelType::Int32,
        PixelType::Float32,
        PixelType::Float64,
        PixelType::CInt16,
        PixelType::CInt32,
        PixelType::CFloat32,
        PixelType::CFloat64,
    ];

    /// Size of one sample in bytes, both halves included for complex types
    pub fn size(self) -> usize {
        match self {
            PixelType::Byte => 1,
            PixelType::UInt16 | PixelType::Int16 => 2,
            PixelType::UInt32 | PixelType::Int32 | PixelType::Float32 => 4,
            PixelType::Float64 => 8,
            PixelType::CInt16 => 4,
            PixelType::CInt32 | PixelType::CFloat32 => 8,
            PixelType::CFloat64 => 16,
        }
    }

    /// Size of one sample in bits
    pub fn depth(self) -> usize {
        self.size() * 8
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            PixelType::CInt16 | PixelType::CInt32 | PixelType::CFloat32 | PixelType::CFloat64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            PixelType::Float32 | PixelType::Float64 | PixelType::CFloat32 | PixelType::CFloat64
        )
    }

    /// Wire code, matching the native engine's numbering
    pub fn code(self) -> u8 {
        match self {
            PixelType::Byte => 1,
            PixelType::UInt16 => 2,
            PixelType::Int16 => 3,
            PixelType::UInt32 => 4,
            PixelType::Int32 => 5,
            PixelType::Float32 => 6,
            PixelType::Float64 => 7,
            PixelType::CInt16 => 8,
            PixelType::CInt32 => 9,
            PixelType::CFloat32 => 10,
            PixelType::CFloat64 => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<PixelType> {
        PixelType::ALL.iter().copied().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelType::Byte => "Byte",
            PixelType::UInt16 => "UInt16",
            PixelType::Int16 => "Int16",
            PixelType::UInt32 => "UInt32",
            PixelType::Int32 => "Int32",
            PixelType::Float32 => "Float32",
            PixelType::Float64 => "Float64",
            PixelType::CInt16 => "CInt16",
            PixelType::CInt32 => "CInt32",
            PixelType::CFloat32 => "CFloat32",
            PixelType::CFloat64 => "CFloat64",
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<PixelType> {
        PixelType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kernel used to compute downsampled overview pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResampleAlg {
    /// No explicit choice; the dataset default applies
    None,
    Nearest,
    Gauss,
    Cubic,
    Average,
    Mode,
    AverageMagPhase,
}

impl ResampleAlg {
    pub fn name(self) -> &'static str {
        match self {
            ResampleAlg::None => "NONE",
            ResampleAlg::Nearest => "NEAREST",
            ResampleAlg::Gauss => "GAUSS",
            ResampleAlg::Cubic => "CUBIC",
            ResampleAlg::Average => "AVERAGE",
            ResampleAlg::Mode => "MODE",
            ResampleAlg::AverageMagPhase => "AVERAGE_MAGPHASE",
        }
    }

    /// Case-insensitive parse of the names accepted by `name`
    pub fn from_name(name: &str) -> Option<ResampleAlg> {
        [
            ResampleAlg::None,
            ResampleAlg::Nearest,
            ResampleAlg::Gauss,
            ResampleAlg::Cubic,
            ResampleAlg::Average,
            ResampleAlg::Mode,
            ResampleAlg::AverageMagPhase,
        ]
        .into_iter()
        .find(|a| a.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for ResampleAlg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel-space rectangle: `x`, `y` of the top-left corner and its size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin
    pub fn with_size(width: usize, height: usize) -> Self {
        Rect::new(0, 0, width, height)
    }

    /// Right edge, saturating at `usize::MAX`
    pub fn max_x(&self) -> usize {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge, saturating at `usize::MAX`
    pub fn max_y(&self) -> usize {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width.saturating_mul(self.height)
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.max_x() && y >= self.y && y < self.max_y()
    }

    /// Whether `other` lies entirely inside this rectangle
    pub fn contains_rect(&self, other: &Rect) -> bool {
        let fits = |start: usize, len: usize, end: usize| {
            start.checked_add(len).is_some_and(|e| e <= end)
        };
        other.x >= self.x
            && other.y >= self.y
            && fits(other.x, other.width, self.max_x())
            && fits(other.y, other.height, self.max_y())
    }

    /// Overlap of two rectangles; empty rectangles keep the clamped origin
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        Rect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    /// Multiply origin and size by `factor`, saturating at `usize::MAX`
    pub fn scale(&self, factor: usize) -> Rect {
        Rect::new(
            self.x.saturating_mul(factor),
            self.y.saturating_mul(factor),
            self.width.saturating_mul(factor),
            self.height.saturating_mul(factor),
        )
    }
}

/// Creation options for new datasets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    /// Driver short name; inferred from the file extension when empty
    pub driver_name: String,
    /// Projection definition written after creation, when non-empty
    pub projection: String,
    /// Geotransform written after creation, when set
    pub transform: Option<GeoTransform>,
    /// Driver-specific creation options
    pub ext_options: HashMap<String, String>,
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn driver(mut self, name: impl Into<String>) -> Self {
        self.driver_name = name.into();
        self
    }

    pub fn projection(mut self, wkt: impl Into<String>) -> Self {
        self.projection = wkt.into();
        self
    }

    pub fn transform(mut self, transform: GeoTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn ext_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ext_options.insert(key.into(), value.into());
        self
    }

    /// Ext options rendered as sorted `KEY=VALUE` strings
    pub fn ext_option_list(&self) -> Vec<String> {
        let mut list: Vec<String> = self
            .ext_options
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        list.sort();
        list
    }
}
