//! Geocoding boundary.
//!
//! The real resolver lives outside this crate (HTTP against the national
//! address base); the engine only needs the result shape.

/// Result of geocoding one address.
///
/// `address_line_1` and `city` are only set when the resolver's confidence
/// is high enough to prefer its spelling over the export's all-caps one.
#[derive(Debug, Clone, PartialEq)]
pub struct Geocoded {
    pub address_line_1: Option<String>,
    pub city: Option<String>,
    pub coords: (f64, f64),
}

pub trait Geocoder {
    /// `None` when the address cannot be resolved; creation proceeds with
    /// the export address and no coordinates.
    fn geocode(&self, address: &str, post_code: &str) -> Option<Geocoded>;
}

/// Geocoder that never resolves anything. Default for dry runs and tests.
#[derive(Debug, Default)]
pub struct NoGeocoder;

impl Geocoder for NoGeocoder {
    fn geocode(&self, _address: &str, _post_code: &str) -> Option<Geocoded> {
        None
    }
}
