use crate::types::{RestaurantCandidate, VoteKey};

pub const MAX_VOTE_KEY_LEN: usize = 100;

/// Derive the vote key for the candidate at `index`.
///
/// The name keeps only ASCII letters, digits and whitespace; whitespace runs
/// become `_`. Coordinates, when present, are appended as `_<lat>_<lon>` with
/// `.` and `-` replaced by `_`. The result is capped at 100 characters. A
/// candidate without a usable name falls back to `option-<index>`.
pub fn derive_vote_key(candidate: &RestaurantCandidate, index: usize) -> VoteKey {
    let fallback = || VoteKey::new(format!("option-{}", index));

    let Some(name) = candidate.name.as_deref() else {
        return fallback();
    };

    let mut key = sanitize_name(name);
    if let Some(coords) = candidate.gps_coordinates {
        if let (Some(lat), Some(lon)) = (coords.latitude, coords.longitude) {
            key.push('_');
            key.push_str(&coordinate_segment(lat));
            key.push('_');
            key.push_str(&coordinate_segment(lon));
        }
    }

    if key.is_empty() {
        return fallback();
    }
    // Every character is ASCII at this point, so byte truncation is safe
    key.truncate(MAX_VOTE_KEY_LEN);
    VoteKey::new(key)
}

fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;

    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
                in_space = true;
            }
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            in_space = false;
        }
        // Dropped characters do not end a whitespace run ("a - b" -> "a_b")
    }
    out
}

fn coordinate_segment(value: f64) -> String {
    format!("{}", value).replace(['.', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpsCoordinates;

    fn is_key_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    #[test]
    fn test_name_and_coordinates() {
        let candidate = RestaurantCandidate::named("Meghana's Foods").at(12.9716, 77.5946);
        assert_eq!(
            derive_vote_key(&candidate, 0).as_str(),
            "Meghanas_Foods_12_9716_77_5946"
        );
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        let candidate = RestaurantCandidate::named("  Truffles \t Cafe & Bar ");
        assert_eq!(derive_vote_key(&candidate, 3).as_str(), "_Truffles_Cafe_Bar_");
    }

    #[test]
    fn test_missing_name_falls_back_to_index() {
        let candidate = RestaurantCandidate::default().at(1.0, 2.0);
        assert_eq!(derive_vote_key(&candidate, 4).as_str(), "option-4");

        let unusable = RestaurantCandidate::named("!!!");
        assert_eq!(derive_vote_key(&unusable, 1).as_str(), "option-1");
    }

    #[test]
    fn test_partial_coordinates_are_ignored() {
        let mut candidate = RestaurantCandidate::named("Dosa Point");
        candidate.gps_coordinates = Some(GpsCoordinates {
            latitude: Some(12.9),
            longitude: None,
        });
        assert_eq!(derive_vote_key(&candidate, 0).as_str(), "Dosa_Point");
    }

    #[test]
    fn test_negative_coordinates_stay_distinct() {
        let north = RestaurantCandidate::named("Grill").at(40.7, -74.0);
        let south = RestaurantCandidate::named("Grill").at(40.7, 74.0);

        let north_key = derive_vote_key(&north, 0);
        assert_eq!(north_key.as_str(), "Grill_40_7__74");
        assert_ne!(north_key, derive_vote_key(&south, 0));
    }

    #[test]
    fn test_keys_are_capped() {
        let candidate = RestaurantCandidate::named("a".repeat(150)).at(12.9, 77.6);
        let key = derive_vote_key(&candidate, 0);
        assert_eq!(key.as_str().len(), MAX_VOTE_KEY_LEN);
    }

    #[test]
    fn test_keys_are_deterministic_and_path_safe() {
        let names = [
            "Café Coffee Day",
            "Toit — Brewpub",
            "A2B (Adyar Ananda Bhavan)",
            "McDonald's",
            "日本料理 Sushi",
            "Pizza/Pasta #1",
            "x",
        ];
        let coords = [(12.9, 77.6), (-33.8688, 151.2093), (0.0, -0.5), (51.5, 0.0)];

        for name in names {
            for (lat, lon) in coords {
                let candidate = RestaurantCandidate::named(name).at(lat, lon);
                let first = derive_vote_key(&candidate, 0);
                let second = derive_vote_key(&candidate.clone(), 0);

                assert_eq!(first, second);
                assert!(first.as_str().len() <= MAX_VOTE_KEY_LEN);
                assert!(
                    first.as_str().chars().all(is_key_char),
                    "unexpected character in {}",
                    first
                );
            }
        }
    }
}
