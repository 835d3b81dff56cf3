//! Driver name inference.

use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;

use crate::constants::DRIVER_RBR;

lazy_static! {
    /// Lower-case file extension (with dot) to driver short name
    static ref DRIVERS_BY_EXT: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(".rbr", DRIVER_RBR);
        m.insert(".blx", "BLX");
        m.insert(".xlb", "BLX");
        m.insert(".bmp", "BMP");
        m.insert(".kap", "BSB");
        m.insert(".bt", "BT");
        m.insert(".dim", "DIMAP");
        m.insert(".dog", "DOQ1");
        m.insert(".dt0", "DTED");
        m.insert(".dt1", "DTED");
        m.insert(".dt2", "DTED");
        m.insert(".hdr", "EHdr");
        m.insert(".ers", "ERS");
        m.insert(".n1", "ESAT");
        m.insert(".gif", "GIF");
        m.insert(".grb", "GRIB");
        m.insert(".gta", "GTA");
        m.insert(".tif", "GTiff");
        m.insert(".tiff", "GTiff");
        m.insert(".img", "HFA");
        m.insert(".mpr", "ILWIS");
        m.insert(".mpl", "ILWIS");
        m.insert(".jpg", "JPEG");
        m.insert(".jpeg", "JPEG");
        m.insert(".ntf", "NITF");
        m.insert(".nsf", "NITF");
        m.insert(".grc", "NWT_GRC");
        m.insert(".tab", "NWT_GRC");
        m.insert(".png", "PNG");
        m.insert(".ppm", "PNM");
        m.insert(".pgm", "PNM");
        m.insert(".rik", "RIK");
        m.insert(".rsw", "RMF");
        m.insert(".mtw", "RMF");
        m.insert(".ter", "TERRAGEN");
        m.insert(".dem", "USGSDEM");
        m.insert(".vrt", "VRT");
        m.insert(".xpm", "XPM");
        m
    };
}

/// Driver short name for `path`, inferred from its extension
///
/// Matching is case-insensitive. A name ending in `toc.xml` selects the
/// ECRG table-of-contents driver.
pub fn driver_for_path(path: &str) -> Option<&'static str> {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with("toc.xml") {
        return Some("ECRGTOC");
    }
    let ext = Path::new(&lower).extension()?.to_str()?;
    DRIVERS_BY_EXT.get(format!(".{}", ext).as_str()).copied()
}
