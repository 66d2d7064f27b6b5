//! Great-circle distances between listings

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Haversine distance in kilometres between two (latitude, longitude) points
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Latitude/longitude box enclosing every point within `radius_km` of `center`
///
/// Longitudes are kept in [-180, 180]. A box crossing the antimeridian has
/// `min_lon > max_lon`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(center: (f64, f64), radius_km: f64) -> Self {
        let (lat, lon) = center;
        let dlat = (radius_km / EARTH_RADIUS_KM).to_degrees();
        // Longitude degrees shrink with latitude; clamp near the poles.
        let cos_lat = lat.to_radians().cos().abs().max(0.01);
        let dlon = (radius_km / (EARTH_RADIUS_KM * cos_lat)).to_degrees();

        let (min_lon, max_lon) = if dlon >= 180.0 {
            (-180.0, 180.0)
        } else {
            (wrap_longitude(lon - dlon), wrap_longitude(lon + dlon))
        };
        Self {
            min_lat: (lat - dlat).max(-90.0),
            max_lat: (lat + dlat).min(90.0),
            min_lon,
            max_lon,
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }

    pub fn contains(&self, point: (f64, f64)) -> bool {
        let (lat, lon) = (point.0, wrap_longitude(point.1));
        if lat < self.min_lat || lat > self.max_lat {
            return false;
        }
        if self.crosses_antimeridian() {
            lon >= self.min_lon || lon <= self.max_lon
        } else {
            lon >= self.min_lon && lon <= self.max_lon
        }
    }
}

/// Map any longitude onto [-180, 180]
pub fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}
