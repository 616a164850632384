//! 31-bit tile coordinates
//!
//! Map geometry is stored as integer tile coordinates at zoom 31
//! (`0 <= x, y < 2^31`), Web-Mercator projected. Nested geometry streams
//! drop a fixed number of low bits; the shift constants here restore full
//! precision on materialization.

/// Low bits dropped from map-data geometry.
pub const SHIFT_COORDINATES: u32 = 5;
/// Low bits dropped from routing geometry.
pub const ROUTE_SHIFT_COORDINATES: u32 = 4;

const POW_31: f64 = 2147483648.0; // 2^31
// Web-Mercator latitude bound, atan(sinh(pi))
const MAX_LATITUDE: f64 = 85.05112877980659;

/// Longitude in degrees to a 31-bit tile x.
pub fn get_31_tile_number_x(longitude: f64) -> u32 {
    let l = longitude.clamp(-180.0, 180.0);
    let x = (l + 180.0) / 360.0 * POW_31;
    (x as u32).min(0x7fff_ffff)
}

/// Latitude in degrees to a 31-bit tile y.
pub fn get_31_tile_number_y(latitude: f64) -> u32 {
    let l = latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (1.0 - (l.tan() + 1.0 / l.cos()).ln() / std::f64::consts::PI) / 2.0 * POW_31;
    (y as u32).min(0x7fff_ffff)
}

/// 31-bit tile x back to longitude in degrees.
pub fn get_31_longitude_x(x: u32) -> f64 {
    x as f64 / POW_31 * 360.0 - 180.0
}

/// 31-bit tile y back to latitude in degrees.
pub fn get_31_latitude_y(y: u32) -> f64 {
    let n = std::f64::consts::PI * (1.0 - 2.0 * (y as f64 / POW_31));
    n.sinh().atan().to_degrees()
}

/// Great-circle distance in meters (haversine).
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();

    let a =
        (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Distance between two 31-bit tile points, in meters.
pub fn distance_31(x1: u32, y1: u32, x2: u32, y2: u32) -> f64 {
    distance(
        get_31_latitude_y(y1),
        get_31_longitude_x(x1),
        get_31_latitude_y(y2),
        get_31_longitude_x(x2),
    )
}

/// Axis-aligned box in 31-bit tile coordinates. `top < bottom` because
/// tile y grows southward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bbox31 {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Bbox31 {
    pub fn new(left: u32, right: u32, top: u32, bottom: u32) -> Bbox31 {
        Bbox31 { left, right, top, bottom }
    }

    /// Box covering the given lat/lon rectangle.
    pub fn from_lat_lon(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Bbox31 {
        Bbox31 {
            left: get_31_tile_number_x(min_lon),
            right: get_31_tile_number_x(max_lon),
            top: get_31_tile_number_y(max_lat),
            bottom: get_31_tile_number_y(min_lat),
        }
    }

    pub fn intersects(&self, other: &Bbox31) -> bool {
        self.right >= other.left
            && other.right >= self.left
            && self.bottom >= other.top
            && other.bottom >= self.top
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        self.left <= x && x <= self.right && self.top <= y && y <= self.bottom
    }

    /// Expand edges outward to `zoom`-tile granularity, as done for
    /// basemap queries so coarse tiles are not clipped at the query edge.
    pub fn aligned_to_zoom(&self, zoom: u32) -> Bbox31 {
        let shift = 31 - zoom;
        Bbox31 {
            left: (self.left >> shift) << shift,
            right: ((self.right >> shift) + 1) << shift,
            top: (self.top >> shift) << shift,
            bottom: ((self.bottom >> shift) + 1) << shift,
        }
    }
}
