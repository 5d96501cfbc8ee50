//! Geolocation collaborator contract.
//!
//! The UI captures a fix (or one of four failure categories). The core never
//! distinguishes between failures: any error simply means no location.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location information unavailable")]
    PositionUnavailable,
    #[error("location request timed out")]
    Timeout,
    #[error("unknown location error")]
    Unknown,
}

impl GeolocationError {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "denied" | "permission_denied" => Some(Self::PermissionDenied),
            "unavailable" | "position_unavailable" => Some(Self::PositionUnavailable),
            "timeout" => Some(Self::Timeout),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Collapse a geolocation outcome into "have a usable location or not"
pub fn usable_location(fix: Result<GeoPoint, GeolocationError>) -> Option<GeoPoint> {
    match fix {
        Ok(point) if point.is_valid() => Some(point),
        Ok(point) => {
            tracing::warn!(
                "Discarding out-of-range location ({}, {})",
                point.latitude,
                point.longitude
            );
            None
        }
        Err(e) => {
            tracing::warn!("No location available: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_error_means_no_location() {
        for err in [
            GeolocationError::PermissionDenied,
            GeolocationError::PositionUnavailable,
            GeolocationError::Timeout,
            GeolocationError::Unknown,
        ] {
            assert_eq!(usable_location(Err(err)), None);
        }
    }

    #[test]
    fn test_valid_fix_is_kept() {
        let point = GeoPoint::new(12.9, 77.6);
        assert_eq!(usable_location(Ok(point)), Some(point));
        assert_eq!(usable_location(Ok(GeoPoint::new(f64::NAN, 0.0))), None);
    }

    #[test]
    fn test_parse_error_category() {
        assert_eq!(
            GeolocationError::parse("Denied"),
            Some(GeolocationError::PermissionDenied)
        );
        assert_eq!(GeolocationError::parse("12.5"), None);
    }
}
