#![forbid(unsafe_code)]

use hub_kernel_contracts::ph1route::GeoPoint;
use hub_kernel_contracts::ph1scan::LocationCheck;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const LOCATION_GATE_MAX_DISTANCE_M: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ph1GeoConfig {
    pub max_distance_m: f64,
    pub earth_radius_m: f64,
}

impl Ph1GeoConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_distance_m: LOCATION_GATE_MAX_DISTANCE_M,
            earth_radius_m: EARTH_RADIUS_M,
        }
    }
}

impl Default for Ph1GeoConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

/// Great-circle distance in meters between two points given in degrees.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint, radius_m: f64) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * radius_m * h.sqrt().atan2((1.0 - h).sqrt())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ph1GeoRuntime {
    config: Ph1GeoConfig,
}

impl Ph1GeoRuntime {
    pub fn new(config: Ph1GeoConfig) -> Self {
        Self { config }
    }

    pub fn distance_m(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        haversine_m(a, b, self.config.earth_radius_m)
    }

    /// Missing positions skip the gate. Exceeding the limit warns, it never blocks.
    pub fn check(&self, current: Option<&GeoPoint>, expected: Option<&GeoPoint>) -> LocationCheck {
        let (Some(current), Some(expected)) = (current, expected) else {
            return LocationCheck::Unverifiable;
        };
        let distance_m = self.distance_m(current, expected);
        if distance_m > self.config.max_distance_m {
            LocationCheck::Mismatch {
                distance_m,
                max_distance_m: self.config.max_distance_m,
            }
        } else {
            LocationCheck::Verified { distance_m }
        }
    }
}
