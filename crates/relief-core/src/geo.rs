//! Geo-proximity ranking of resources.
//!
//! The store answers "which resources of this disaster are roughly near
//! this point"; this module decides the final answer. Filtering and
//! ordering happen here, in process, so the result is deterministic
//! whatever the store returns:
//!
//! - only resources of the queried disaster,
//! - only those whose great-circle distance is within the radius,
//! - at most one row per resource id,
//! - ascending by distance, ties broken by resource id.
//!
//! Distance is the haversine formula on a spherical Earth.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use relief_types::{DisasterId, NearbyResource, Resource};

/// Radius used when a query does not specify one, in meters.
pub const DEFAULT_RADIUS_METERS: f64 = 10_000.0;

/// Mean Earth radius (IUGG), in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A rejected geo query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// Coordinates or radius are malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

impl GeoPoint {
    /// Validate and build a point.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidQuery`] for non-finite values,
    /// `|lat| > 90`, or `|lon| > 180`.
    pub fn new(lat: f64, lon: f64) -> Result<Self, QueryError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(QueryError::InvalidQuery(format!(
                "coordinates must be finite (lat={lat}, lon={lon})"
            )));
        }
        if lat.abs() > 90.0 {
            return Err(QueryError::InvalidQuery(format!(
                "latitude {lat} outside [-90, 90]"
            )));
        }
        if lon.abs() > 180.0 {
            return Err(QueryError::InvalidQuery(format!(
                "longitude {lon} outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Latitude in degrees.
    pub const fn lat(self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    pub const fn lon(self) -> f64 {
        self.lon
    }
}

/// Great-circle distance between two points, in meters.
pub fn great_circle_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let half_dlat = (b.lat - a.lat).to_radians() / 2.0;
    let half_dlon = (b.lon - a.lon).to_radians() / 2.0;

    let h = (lat1.cos() * lat2.cos()).mul_add(half_dlon.sin().powi(2), half_dlat.sin().powi(2));
    // Rounding can push h a hair above 1 for antipodal points.
    let central_angle = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_METERS * central_angle
}

/// A validated nearby-resource query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyQuery {
    /// Disaster whose resources are searched.
    pub disaster_id: DisasterId,
    /// Query point.
    pub center: GeoPoint,
    /// Search radius in meters.
    pub radius_meters: f64,
}

impl NearbyQuery {
    /// Validate a query. `radius_meters` falls back to `default_radius`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidQuery`] for bad coordinates or a
    /// non-finite or non-positive radius.
    pub fn new(
        disaster_id: DisasterId,
        lat: f64,
        lon: f64,
        radius_meters: Option<f64>,
        default_radius: f64,
    ) -> Result<Self, QueryError> {
        let center = GeoPoint::new(lat, lon)?;
        let radius_meters = radius_meters.unwrap_or(default_radius);
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(QueryError::InvalidQuery(format!(
                "radius must be a positive number of meters (got {radius_meters})"
            )));
        }
        Ok(Self {
            disaster_id,
            center,
            radius_meters,
        })
    }

    /// Stable cache key for this query at a given resource generation.
    ///
    /// Coordinates and radius enter the key as their exact bit patterns.
    /// Two queries share a key only if they would match the same rows.
    pub fn cache_key(&self, generation: u64) -> String {
        format!(
            "nearby:{}:g{generation}:{:016x}:{:016x}:{:016x}",
            self.disaster_id,
            self.center.lat.to_bits(),
            self.center.lon.to_bits(),
            self.radius_meters.to_bits()
        )
    }
}

/// Filter and order candidate rows for `query`.
///
/// Candidates of other disasters, out of radius, with invalid
/// coordinates, or repeating an already-seen id are dropped.
pub fn rank_nearby(query: &NearbyQuery, candidates: Vec<Resource>) -> Vec<NearbyResource> {
    let mut seen = BTreeSet::new();
    let mut ranked: Vec<NearbyResource> = candidates
        .into_iter()
        .filter(|r| r.disaster_id == query.disaster_id)
        .filter(|r| seen.insert(r.id))
        .filter_map(|resource| {
            let point = GeoPoint::new(resource.lat, resource.lon).ok()?;
            let distance_meters = great_circle_distance(query.center, point);
            (distance_meters <= query.radius_meters).then_some(NearbyResource {
                resource,
                distance_meters,
            })
        })
        .collect();

    ranked.sort_by(compare_nearby);
    ranked
}

fn compare_nearby(a: &NearbyResource, b: &NearbyResource) -> Ordering {
    a.distance_meters
        .total_cmp(&b.distance_meters)
        .then_with(|| a.resource.id.cmp(&b.resource.id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use relief_types::ResourceId;

    use super::*;

    const NYC: (f64, f64) = (40.7128, -74.0060);

    fn resource(disaster_id: DisasterId, name: &str, lat: f64, lon: f64) -> Resource {
        Resource {
            id: ResourceId::new(),
            disaster_id,
            name: name.to_owned(),
            resource_type: String::from("shelter"),
            location_name: String::from("NYC"),
            lat,
            lon,
            created_at: Utc::now(),
        }
    }

    fn query(disaster_id: DisasterId, radius: f64) -> NearbyQuery {
        NearbyQuery::new(disaster_id, NYC.0, NYC.1, Some(radius), DEFAULT_RADIUS_METERS).unwrap()
    }

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn known_distance_nyc_to_philadelphia() {
        let d = great_circle_distance(point(NYC.0, NYC.1), point(39.9526, -75.1652));
        // Roughly 129.6 km.
        assert!((d - 129_600.0).abs() < 1_000.0, "{d}");
    }

    #[test]
    fn zero_distance_to_self() {
        let p = point(NYC.0, NYC.1);
        assert!(great_circle_distance(p, p).abs() < 1e-6);
    }

    #[test]
    fn antipodal_points_do_not_nan() {
        let d = great_circle_distance(point(0.0, 0.0), point(0.0, 180.0));
        assert!(d.is_finite());
        // Half the circumference.
        assert!((d - EARTH_RADIUS_METERS * std::f64::consts::PI).abs() < 1.0);
    }

    #[test]
    fn rejects_out_of_range_and_non_finite() {
        let id = DisasterId::new();
        for (lat, lon) in [(200.0, 0.0), (-90.5, 0.0), (0.0, 180.5), (f64::NAN, 0.0), (0.0, f64::INFINITY)] {
            let result = NearbyQuery::new(id, lat, lon, None, DEFAULT_RADIUS_METERS);
            assert!(matches!(result, Err(QueryError::InvalidQuery(_))), "{lat},{lon}");
        }
    }

    #[test]
    fn rejects_non_positive_radius() {
        let id = DisasterId::new();
        for radius in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let result = NearbyQuery::new(id, NYC.0, NYC.1, Some(radius), DEFAULT_RADIUS_METERS);
            assert!(result.is_err(), "radius {radius} accepted");
        }
    }

    #[test]
    fn boundary_coordinates_are_accepted() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn default_radius_applies() {
        let q = NearbyQuery::new(DisasterId::new(), NYC.0, NYC.1, None, DEFAULT_RADIUS_METERS).unwrap();
        assert!((q.radius_meters - 10_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ranks_within_radius_nearest_first() {
        let id = DisasterId::new();
        let other = DisasterId::new();
        let far = resource(id, "Newark shelter", 40.7357, -74.1724); // ~14 km west
        let near = resource(id, "City Hall depot", 40.7130, -74.0050);
        let mid = resource(id, "Brooklyn hospital", 40.6930, -73.9900);
        let foreign = resource(other, "Other disaster", 40.7128, -74.0060);
        let out = resource(id, "Boston", 42.3601, -71.0589);

        let ranked = rank_nearby(
            &query(id, 10_000.0),
            vec![far.clone(), near.clone(), mid.clone(), foreign, out],
        );

        let names: Vec<&str> = ranked.iter().map(|r| r.resource.name.as_str()).collect();
        assert_eq!(names, vec!["City Hall depot", "Brooklyn hospital"]);
        assert!(ranked.iter().all(|r| r.distance_meters <= 10_000.0));
        assert!(
            ranked
                .windows(2)
                .all(|w| matches!(w, [a, b] if a.distance_meters <= b.distance_meters))
        );
    }

    #[test]
    fn ties_break_by_id_and_duplicates_collapse() {
        let id = DisasterId::new();
        let a = resource(id, "A", 40.7200, -74.0000);
        let mut b = resource(id, "B", 40.7200, -74.0000);
        if b.id < a.id {
            b.id = ResourceId::new();
        }
        let expected_first = a.id.min(b.id);

        let ranked = rank_nearby(&query(id, 5_000.0), vec![b.clone(), a.clone(), b.clone()]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked.first().map(|r| r.resource.id), Some(expected_first));
    }

    #[test]
    fn cache_key_embeds_generation() {
        let q = query(DisasterId::new(), 10_000.0);
        assert_ne!(q.cache_key(1), q.cache_key(2));
        assert_eq!(q.cache_key(7), q.cache_key(7));
    }

    #[test]
    fn cache_key_separates_nearly_equal_radii() {
        let id = DisasterId::new();
        let wide = query(id, 10_000.04);
        let narrow = query(id, 10_000.0);
        assert_ne!(wide.cache_key(0), narrow.cache_key(0));

        let shifted =
            NearbyQuery::new(id, NYC.0 + 1e-7, NYC.1, Some(10_000.0), DEFAULT_RADIUS_METERS).unwrap();
        assert_ne!(shifted.cache_key(0), narrow.cache_key(0));
    }
}
