//! Planar projection of node coordinates relative to an origin node.
//!
//! Every strategy maps the origin itself to exactly `(0.0, 0.0)`. Angles go in as
//! degrees, offsets come out as `f64` without rounding.

pub mod utm;

use serde::Deserialize;

use crate::data::osm::RawNode;
use crate::errors::{Error, ErrorKind, Result};

use self::utm::Utm;

/// Mean Earth radius used by the local haversine approximation.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Origin {
    pub lat: f64,
    pub lon: f64,
}

impl From<&RawNode> for Origin {
    fn from(value: &RawNode) -> Self {
        Origin {
            lat: value.lat,
            lon: value.lon,
        }
    }
}

/// The origin is the first node in document order, not a centroid. Output coordinates
/// therefore shift with the ordering of the input.
pub fn resolve_origin(nodes: &[RawNode]) -> Result<Origin> {
    nodes.first()
        .map(Origin::from)
        .ok_or_else(|| Error::new(ErrorKind::EmptyInput, "Input contains no nodes, cannot pick an origin"))
}

pub trait Projection {
    /// Offset `(x, y)` of the point from the origin the projection was built for.
    fn project(&self, lat: f64, lon: f64) -> (f64, f64);
}

/// Selects the projection strategy for a run.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionKind {
    #[default]
    Utm,
    Haversine,
    DegreeOffset,
}

impl ProjectionKind {
    pub fn for_origin(self, origin: Origin) -> Box<dyn Projection> {
        match self {
            ProjectionKind::Utm => Box::new(Utm::new(origin)),
            ProjectionKind::Haversine => Box::new(LocalHaversine::new(origin)),
            ProjectionKind::DegreeOffset => Box::new(DegreeOffset::new(origin)),
        }
    }
}

/// Great-circle distance in meters on a sphere of radius [`EARTH_RADIUS_METERS`].
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + (dlon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Local approximation for small extents (a town or an island). `y` is the distance
/// along the origin's meridian, `x` the distance along the origin's parallel. Both are
/// unsigned distances; `x` is negated for the client's flipped horizontal axis.
pub struct LocalHaversine {
    origin: Origin,
}

impl LocalHaversine {
    pub fn new(origin: Origin) -> Self {
        LocalHaversine { origin }
    }
}

impl Projection for LocalHaversine {
    fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let Origin { lat: origin_lat, lon: origin_lon } = self.origin;
        let y = haversine_distance(origin_lat, origin_lon, lat, origin_lon);
        let x = haversine_distance(origin_lat, origin_lon, origin_lat, lon);
        // 0.0 - x rather than -x, so the origin meridian stays at +0.0
        (0.0 - x, y)
    }
}

/// Raw degree offsets, `(lon - origin_lon, lat - origin_lat)`.
pub struct DegreeOffset {
    origin: Origin,
}

impl DegreeOffset {
    pub fn new(origin: Origin) -> Self {
        DegreeOffset { origin }
    }
}

impl Projection for DegreeOffset {
    fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        (lon - self.origin.lon, lat - self.origin.lat)
    }
}
