use bitflags::bitflags;

// Driver capability flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverCaps: u32 {
        /// Driver supports `Create`
        const CREATE = 0x01;
        /// Driver supports `CreateCopy`
        const CREATE_COPY = 0x02;
        /// Driver can read and write virtual (in-memory) files
        const VIRTUAL_IO = 0x04;
    }
}

/// Edge length of one overview tile in pixels
pub const TILE_SIZE: usize = 256;
/// Upper bound on generated pyramid levels
pub const MAX_OVERVIEW_LEVELS: usize = 30;

/// Path prefix the engine treats as in-memory virtual files
pub const VSIMEM_PREFIX: &str = "/vsimem/";
/// Extension appended to a raster path for its external overviews
pub const OVERVIEW_SIDECAR_EXT: &str = "ovr";

/// Magic number for RBR base files
pub const RBR_MAGIC: [u8; 4] = *b"RBR1";
/// Magic number for RBR overview sidecars
pub const RBR_OVR_MAGIC: [u8; 4] = *b"RBRO";
/// Fixed size of the RBR base header
pub const RBR_HEADER_SIZE: usize = 80;
/// Fixed size of the RBR overview sidecar header
pub const RBR_OVR_HEADER_SIZE: usize = 24;

/// Built-in driver names
pub const DRIVER_RBR: &str = "RBR";
pub const DRIVER_MEM: &str = "MEM";

/// Engine version reported by the built-in engine
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;
