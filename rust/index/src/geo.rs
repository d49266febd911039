//! Geospatial search over article coordinates via geohash bucketing and
//! Haversine ranking.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};
use tome_types::ArticleType;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
pub const DEFAULT_PRECISION: usize = 9;
const MAX_PRECISION: usize = 12;

/// Minimum cell dimension (meters) per precision, used to pick a bucket
/// precision such that a 3x3 neighborhood covers the search circle.
const CELL_MIN_METERS: [f64; MAX_PRECISION] = [
    5_000_000.0,
    625_000.0,
    156_000.0,
    19_500.0,
    4_890.0,
    610.0,
    153.0,
    19.1,
    4.8,
    1.2,
    0.149,
    0.037,
];

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("latitude {0} outside [-90, 90]")]
    BadLatitude(f64),
    #[error("longitude {0} outside [-180, 180]")]
    BadLongitude(f64),
}

impl TomeError for GeoError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Encode to a base32 geohash of `precision` characters.
pub fn encode(lat: f64, lng: f64, precision: usize) -> Result<String, GeoError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(GeoError::BadLatitude(lat));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(GeoError::BadLongitude(lng));
    }
    let precision = precision.clamp(1, MAX_PRECISION);
    let (mut lat_range, mut lng_range) = ((-90.0f64, 90.0f64), (-180.0f64, 180.0f64));
    let mut hash = String::with_capacity(precision);
    let mut bit = 0;
    let mut value = 0usize;
    let mut even = true;
    while hash.len() < precision {
        if even {
            let mid = (lng_range.0 + lng_range.1) / 2.0;
            if lng >= mid {
                value = (value << 1) | 1;
                lng_range.0 = mid;
            } else {
                value <<= 1;
                lng_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                value = (value << 1) | 1;
                lat_range.0 = mid;
            } else {
                value <<= 1;
                lat_range.1 = mid;
            }
        }
        even = !even;
        bit += 1;
        if bit == 5 {
            hash.push(BASE32[value] as char);
            bit = 0;
            value = 0;
        }
    }
    Ok(hash)
}

/// Bounding box of a geohash cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Decode a geohash to its bounding box. Unknown characters are treated as
/// the end of the hash.
pub fn decode(geohash: &str) -> BoundingBox {
    let (mut lat_range, mut lng_range) = ((-90.0f64, 90.0f64), (-180.0f64, 180.0f64));
    let mut even = true;
    for c in geohash.bytes() {
        let Some(value) = BASE32.iter().position(|&b| b == c.to_ascii_lowercase()) else {
            break;
        };
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1;
            if even {
                let mid = (lng_range.0 + lng_range.1) / 2.0;
                if bit == 1 {
                    lng_range.0 = mid;
                } else {
                    lng_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bit == 1 {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            even = !even;
        }
    }
    BoundingBox {
        min_lat: lat_range.0,
        max_lat: lat_range.1,
        min_lng: lng_range.0,
        max_lng: lng_range.1,
    }
}

/// The 8 surrounding cells at the same precision, found by stepping one
/// cell width/height from the center and re-encoding. Cells at the poles
/// collapse onto fewer distinct neighbors.
pub fn neighbors(geohash: &str) -> Vec<String> {
    let cell = decode(geohash);
    let (lat, lng) = cell.center();
    let lat_step = cell.max_lat - cell.min_lat;
    let lng_step = cell.max_lng - cell.min_lng;
    let mut cells = Vec::with_capacity(8);
    for dy in [-1.0, 0.0, 1.0] {
        for dx in [-1.0, 0.0, 1.0] {
            if dy == 0.0 && dx == 0.0 {
                continue;
            }
            let neighbor_lat = (lat + dy * lat_step).clamp(-90.0, 90.0);
            let mut neighbor_lng = lng + dx * lng_step;
            if neighbor_lng > 180.0 {
                neighbor_lng -= 360.0;
            } else if neighbor_lng < -180.0 {
                neighbor_lng += 360.0;
            }
            if let Ok(hash) = encode(neighbor_lat, neighbor_lng, geohash.len()) {
                if hash != geohash && !cells.contains(&hash) {
                    cells.push(hash);
                }
            }
        }
    }
    cells
}

/// Great-circle distance in meters.
pub fn haversine(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> f64 {
    let phi_a = lat_a.to_radians();
    let phi_b = lat_b.to_radians();
    let d_phi = (lat_b - lat_a).to_radians();
    let d_lambda = (lng_b - lng_a).to_radians();
    let a = (d_phi / 2.0).sin().powi(2)
        + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
}

/// Largest precision whose cell still covers `radius_meters`, so the 3x3
/// neighborhood around the query point covers the whole circle.
pub fn precision_for_radius(radius_meters: f64) -> usize {
    for precision in (1..=MAX_PRECISION).rev() {
        if CELL_MIN_METERS[precision - 1] >= radius_meters {
            return precision;
        }
    }
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoEntry {
    pub article_id: String,
    pub lat: f64,
    pub lng: f64,
    pub geohash: String,
    pub article_type: ArticleType,
}

#[derive(Clone, Debug, Default)]
pub struct NearOptions {
    pub max_distance: f64,
    pub min_distance: Option<f64>,
    pub limit: Option<usize>,
    pub types: Option<Vec<ArticleType>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoMatch {
    pub entry: GeoEntry,
    pub distance_meters: f64,
}

/// Geohash-bucketed index over article coordinates. Entries are kept
/// sorted by geohash so candidate collection is a prefix range scan.
pub struct GeoIndex {
    precision: usize,
    entries: Vec<GeoEntry>,
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

impl GeoIndex {
    pub fn new(precision: usize) -> Self {
        GeoIndex {
            precision: precision.clamp(1, MAX_PRECISION),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(
        &mut self,
        article_id: impl Into<String>,
        lat: f64,
        lng: f64,
        article_type: ArticleType,
    ) -> Result<(), GeoError> {
        let geohash = encode(lat, lng, self.precision)?;
        let entry = GeoEntry {
            article_id: article_id.into(),
            lat,
            lng,
            geohash,
            article_type,
        };
        let position = self
            .entries
            .partition_point(|e| e.geohash.as_str() <= entry.geohash.as_str());
        self.entries.insert(position, entry);
        Ok(())
    }

    fn prefix_range(&self, prefix: &str) -> std::ops::Range<usize> {
        let start = self
            .entries
            .partition_point(|e| e.geohash.as_str() < prefix);
        let end = self.entries[start..]
            .partition_point(|e| e.geohash.starts_with(prefix))
            + start;
        start..end
    }

    /// Entries within `max_distance` meters of the point, nearest first.
    pub fn near(&self, lat: f64, lng: f64, options: &NearOptions) -> Result<Vec<GeoMatch>, GeoError> {
        let precision = precision_for_radius(options.max_distance).min(self.precision);
        let center = encode(lat, lng, precision)?;
        let mut cells = vec![center.clone()];
        cells.extend(neighbors(&center));

        let mut matches: Vec<GeoMatch> = Vec::new();
        for cell in &cells {
            for index in self.prefix_range(cell) {
                let entry = &self.entries[index];
                if let Some(types) = &options.types {
                    if !types.contains(&entry.article_type) {
                        continue;
                    }
                }
                let distance = haversine(lat, lng, entry.lat, entry.lng);
                if distance > options.max_distance {
                    continue;
                }
                if let Some(min) = options.min_distance {
                    if distance < min {
                        continue;
                    }
                }
                matches.push(GeoMatch {
                    entry: entry.clone(),
                    distance_meters: distance,
                });
            }
        }
        matches.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        if let Some(limit) = options.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    /// Entries whose coordinates fall inside the box.
    pub fn bounding_box(&self, bbox: &BoundingBox) -> Vec<GeoEntry> {
        // Covering cells at a precision coarse enough that stepping stays
        // bounded, then exact containment.
        let span_meters = haversine(bbox.min_lat, bbox.min_lng, bbox.max_lat, bbox.max_lng);
        let precision = precision_for_radius(span_meters.max(1.0)).min(self.precision);
        let cell = decode(&encode(
            bbox.min_lat.clamp(-90.0, 90.0),
            bbox.min_lng.clamp(-180.0, 180.0),
            precision,
        )
        .unwrap_or_default());
        let lat_step = (cell.max_lat - cell.min_lat).max(1e-9);
        let lng_step = (cell.max_lng - cell.min_lng).max(1e-9);

        let mut results = Vec::new();
        let mut seen_cells: Vec<String> = Vec::new();
        let mut lat = bbox.min_lat;
        while lat <= bbox.max_lat + lat_step {
            let mut lng = bbox.min_lng;
            while lng <= bbox.max_lng + lng_step {
                if let Ok(hash) = encode(lat.clamp(-90.0, 90.0), lng.clamp(-180.0, 180.0), precision)
                {
                    if !seen_cells.contains(&hash) {
                        seen_cells.push(hash.clone());
                        for index in self.prefix_range(&hash) {
                            let entry = &self.entries[index];
                            if bbox.contains(entry.lat, entry.lng) {
                                results.push(entry.clone());
                            }
                        }
                    }
                }
                lng += lng_step;
            }
            lat += lat_step;
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_geohash_encodes() {
        // Reference value for the Greenwich observatory area.
        assert_eq!(encode(57.64911, 10.40744, 11).unwrap(), "u4pruydqqvj");
    }

    #[test]
    fn decode_contains_encoded_point() {
        let hash = encode(35.6762, 139.6503, 9).unwrap();
        let bbox = decode(&hash);
        assert!(bbox.contains(35.6762, 139.6503));
    }

    #[test]
    fn haversine_properties_hold() {
        let tokyo = (35.6762, 139.6503);
        let paris = (48.8566, 2.3522);
        let d = haversine(tokyo.0, tokyo.1, paris.0, paris.1);
        assert!(d > 9_000_000.0 && d < 10_500_000.0);
        assert_eq!(haversine(tokyo.0, tokyo.1, tokyo.0, tokyo.1), 0.0);
        let reverse = haversine(paris.0, paris.1, tokyo.0, tokyo.1);
        assert!((d - reverse).abs() < 1e-6);
        // Antipodal bound.
        let antipodal = haversine(0.0, 0.0, 0.0, 180.0);
        assert!(antipodal <= std::f64::consts::PI * EARTH_RADIUS_METERS + 1.0);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert!(encode(91.0, 0.0, 9).is_err());
        assert!(encode(0.0, 181.0, 9).is_err());
    }

    fn index_with_cities() -> GeoIndex {
        let mut index = GeoIndex::default();
        index.insert("tokyo", 35.6762, 139.6503, ArticleType::Place).unwrap();
        index.insert("yokohama", 35.4437, 139.6380, ArticleType::Place).unwrap();
        index.insert("osaka", 34.6937, 135.5023, ArticleType::Place).unwrap();
        index.insert("paris", 48.8566, 2.3522, ArticleType::Place).unwrap();
        index
            .insert("tokyo-station", 35.6812, 139.7671, ArticleType::Org)
            .unwrap();
        index
    }

    #[test]
    fn near_ranks_by_distance() {
        let index = index_with_cities();
        let matches = index
            .near(
                35.6762,
                139.6503,
                &NearOptions {
                    max_distance: 50_000.0,
                    ..NearOptions::default()
                },
            )
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.entry.article_id.as_str()).collect();
        assert_eq!(ids, vec!["tokyo", "tokyo-station", "yokohama"]);
        assert!(matches[0].distance_meters < 1.0);
    }

    #[test]
    fn near_applies_type_and_distance_filters() {
        let index = index_with_cities();
        let matches = index
            .near(
                35.6762,
                139.6503,
                &NearOptions {
                    max_distance: 50_000.0,
                    min_distance: Some(1_000.0),
                    types: Some(vec![ArticleType::Place]),
                    limit: Some(1),
                },
            )
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry.article_id, "yokohama");
    }

    #[test]
    fn bounding_box_filters_containment() {
        let index = index_with_cities();
        let inside = index.bounding_box(&BoundingBox {
            min_lat: 35.0,
            max_lat: 36.0,
            min_lng: 139.0,
            max_lng: 140.0,
        });
        let mut ids: Vec<&str> = inside.iter().map(|e| e.article_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["tokyo", "tokyo-station", "yokohama"]);
    }

    proptest! {
        #[test]
        fn geohash_bbox_always_contains_point(
            lat in -90.0f64..=90.0,
            lng in -180.0f64..=180.0,
            precision in 1usize..=12,
        ) {
            let hash = encode(lat, lng, precision).unwrap();
            prop_assert_eq!(hash.len(), precision);
            prop_assert!(decode(&hash).contains(lat, lng));
        }

        #[test]
        fn haversine_is_symmetric_and_bounded(
            lat_a in -90.0f64..=90.0,
            lng_a in -180.0f64..=180.0,
            lat_b in -90.0f64..=90.0,
            lng_b in -180.0f64..=180.0,
        ) {
            let d = haversine(lat_a, lng_a, lat_b, lng_b);
            prop_assert!(d >= 0.0);
            prop_assert!(d <= std::f64::consts::PI * EARTH_RADIUS_METERS + 1.0);
            let r = haversine(lat_b, lng_b, lat_a, lng_a);
            prop_assert!((d - r).abs() < 1e-6);
        }
    }
}
