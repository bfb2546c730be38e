//! Great-circle distance for location cross-checks.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Haversine distance in kilometres between two (latitude, longitude)
/// points in degrees. `None` if a coordinate does not fit in an `f64`.
#[must_use]
pub fn distance_km(a: (Decimal, Decimal), b: (Decimal, Decimal)) -> Option<f64> {
    let lat1 = a.0.to_f64()?.to_radians();
    let lat2 = b.0.to_f64()?.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.1.to_f64()? - a.1.to_f64()?).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    Some(2.0 * EARTH_RADIUS_KM * h.sqrt().asin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance() {
        let p = (Decimal::new(-1_2921, 4), Decimal::new(36_8219, 4));
        assert!(distance_km(p, p).unwrap() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let a = (Decimal::ZERO, Decimal::ZERO);
        let b = (Decimal::ONE, Decimal::ZERO);
        let d = distance_km(a, b).unwrap();
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }
}
