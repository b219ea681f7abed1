//! WGS84 Universal Transverse Mercator, forward direction only.
//!
//! The zone is fixed by the origin for the whole run. Extents that straddle a zone
//! boundary are projected into the origin's zone regardless, and lose accuracy.

use super::{Origin, Projection};

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmZone {
    pub number: u8,
    pub north: bool,
}

impl UtmZone {
    /// Zone containing the given position, without the Norway/Svalbard exceptions.
    pub fn containing(lat: f64, lon: f64) -> Self {
        let number = (((lon + 180.0) / 6.0).floor() + 1.0).clamp(1.0, 60.0) as u8;
        UtmZone {
            number,
            north: lat >= 0.0,
        }
    }

    pub fn central_meridian(&self) -> f64 {
        f64::from(self.number) * 6.0 - 183.0
    }

    /// `(easting, northing)` in meters of a position projected into this zone.
    pub fn to_easting_northing(&self, lat: f64, lon: f64) -> (f64, f64) {
        let e2 = FLATTENING * (2.0 - FLATTENING);
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let phi = lat.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = SEMI_MAJOR_AXIS / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * (lon - self.central_meridian()).to_radians();

        // meridian arc length from the equator
        let m = SEMI_MAJOR_AXIS
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

        let easting = SCALE_FACTOR
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + FALSE_EASTING;

        let mut northing = SCALE_FACTOR
            * (m + n
                * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
        if !self.north {
            northing += FALSE_NORTHING_SOUTH;
        }

        (easting, northing)
    }
}

/// Offsets between UTM coordinates of a point and of the origin, both in the origin's
/// zone.
pub struct Utm {
    zone: UtmZone,
    origin_easting: f64,
    origin_northing: f64,
}

impl Utm {
    pub fn new(origin: Origin) -> Self {
        let zone = UtmZone::containing(origin.lat, origin.lon);
        let (origin_easting, origin_northing) = zone.to_easting_northing(origin.lat, origin.lon);
        Utm {
            zone,
            origin_easting,
            origin_northing,
        }
    }
}

impl Projection for Utm {
    fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let (easting, northing) = self.zone.to_easting_northing(lat, lon);
        (easting - self.origin_easting, northing - self.origin_northing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::haversine_distance;

    fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
        (actual - expected).abs() <= tolerance
    }

    #[test]
    fn zone_from_longitude() {
        assert_eq!(UtmZone::containing(55.0, 10.0), UtmZone { number: 32, north: true });
        assert_eq!(UtmZone::containing(-33.9, 18.4), UtmZone { number: 34, north: false });
        assert_eq!(UtmZone::containing(0.0, -180.0).number, 1);
        assert_eq!(UtmZone::containing(0.0, 180.0).number, 60);
        assert_eq!(UtmZone::containing(0.0, 0.0).number, 31);
        assert_eq!(UtmZone::containing(10.0, 9.0).central_meridian(), 9.0);
    }

    #[test]
    fn equator_on_central_meridian() {
        let zone = UtmZone::containing(0.0, 9.0);
        assert_eq!(zone.to_easting_northing(0.0, 9.0), (500_000.0, 0.0));
    }

    #[test]
    fn forty_five_north_on_central_meridian() {
        let zone = UtmZone::containing(45.0, 9.0);
        let (easting, northing) = zone.to_easting_northing(45.0, 9.0);
        assert!(close(easting, 500_000.0, 1e-6));
        assert!(close(northing, 4_982_950.400, 0.01), "northing = {northing}");
    }

    #[test]
    fn denmark_reference_point() {
        let zone = UtmZone::containing(55.0, 10.0);
        let (easting, northing) = zone.to_easting_northing(55.0, 10.0);
        assert!(close(easting, 563_967.42, 0.01), "easting = {easting}");
        assert!(close(northing, 6_095_248.71, 0.01), "northing = {northing}");
    }

    #[test]
    fn southern_hemisphere_uses_false_northing() {
        let zone = UtmZone::containing(-33.9, 18.4);
        let (easting, northing) = zone.to_easting_northing(-33.9, 18.4);
        assert!(close(easting, 259_583.22, 0.01), "easting = {easting}");
        assert!(close(northing, 6_245_888.05, 0.01), "northing = {northing}");
    }

    #[test]
    fn symmetric_about_central_meridian() {
        let zone = UtmZone::containing(50.0, 9.0);
        let (east, north_east) = zone.to_easting_northing(50.0, 11.0);
        let (west, north_west) = zone.to_easting_northing(50.0, 7.0);
        assert!(close(east - FALSE_EASTING, FALSE_EASTING - west, 1e-6));
        assert!(close(north_east, north_west, 1e-6));
    }

    #[test]
    fn small_offsets_agree_with_great_circle_distance() {
        let projection = Utm::new(Origin { lat: 55.0, lon: 10.0 });
        let (x, y) = projection.project(55.001, 10.001);
        assert!(x > 0.0 && y > 0.0);

        let planar = x.hypot(y);
        let sphere = haversine_distance(55.0, 10.0, 55.001, 10.001);
        assert!((planar - sphere).abs() / sphere < 0.01, "planar = {planar}, sphere = {sphere}");
    }
}
