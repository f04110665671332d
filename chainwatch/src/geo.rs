// chainwatch/src/geo.rs
//
// Great-circle distance between event locations.

use crate::events::Location;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub fn to_radians(degrees: f64) -> f64 {
    degrees * (std::f64::consts::PI / 180.0)
}

/// Haversine distance in km. Missing GPS on either side means no detectable
/// movement, so the result is exactly 0.
pub fn distance(a: &Location, b: &Location) -> f64 {
    let (Some(p), Some(q)) = (a.coordinates, b.coordinates) else {
        return 0.0;
    };

    let d_lat = to_radians(q.latitude - p.latitude);
    let d_lon = to_radians(q.longitude - p.longitude);

    let h = (d_lat / 2.0).sin().powi(2)
        + to_radians(p.latitude).cos() * to_radians(q.latitude).cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yirgacheffe() -> Location {
        Location::new("Ethiopia", "SNNPR", "Yirgacheffe").with_coordinates(6.1629, 38.2070)
    }

    fn hamburg() -> Location {
        Location::new("Germany", "Hamburg", "Hamburg").with_coordinates(53.5511, 9.9937)
    }

    #[test]
    fn symmetric_and_zero_on_self() {
        let (a, b) = (yirgacheffe(), hamburg());
        assert!((distance(&a, &b) - distance(&b, &a)).abs() < 1e-9);
        assert_eq!(distance(&a, &a), 0.0);
    }

    #[test]
    fn missing_coordinates_is_zero() {
        let bare = Location::new("Germany", "Hamburg", "Hamburg");
        assert_eq!(distance(&bare, &hamburg()), 0.0);
        assert_eq!(distance(&yirgacheffe(), &bare), 0.0);
        assert_eq!(distance(&bare, &bare), 0.0);
    }

    #[test]
    fn known_distance() {
        // Yirgacheffe → Hamburg is roughly 5,900 km
        let km = distance(&yirgacheffe(), &hamburg());
        assert!(km > 5_500.0 && km < 6_300.0, "got {km}");
    }

    #[test]
    fn radians() {
        assert!((to_radians(180.0) - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(to_radians(0.0), 0.0);
    }
}
