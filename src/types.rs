use crate::error::ValidationError;
use crate::geo::GeoPoint;
use rand::Rng;
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of generated group identifiers
pub const GROUP_ID_PREFIX: &str = "FF";

/// Characters that cannot appear inside a single store path segment
const FORBIDDEN_SEGMENT_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const GROUP_SUFFIX_LENGTH: usize = 4;

/// Opaque identifier of a dining group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Accept any user-supplied identifier the store can address as one path segment
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyGroupId);
        }
        if trimmed
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_SEGMENT_CHARS.contains(&c))
        {
            return Err(ValidationError::InvalidGroupId(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generate a fresh `FF-<base36 millis>-<4 random base36 chars>` identifier
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut rng = rand::rng();
        let suffix: String = (0..GROUP_SUFFIX_LENGTH)
            .map(|_| BASE36_DIGITS[rng.random_range(0..BASE36_DIGITS.len())] as char)
            .collect();

        Self(format!("{}-{}-{}", GROUP_ID_PREFIX, to_base36(millis), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Store-assigned key of a member record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberKey(String);

impl MemberKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Join key between a displayed candidate and its vote counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteKey(String);

impl VoteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Diet {
    #[serde(rename = "Veg")]
    Veg,
    #[serde(rename = "Non-Veg")]
    NonVeg,
}

impl fmt::Display for Diet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diet::Veg => f.write_str("Veg"),
            Diet::NonVeg => f.write_str("Non-Veg"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrinkCategory {
    Mocktail,
    Juice,
    Cocktail,
    Alcohol,
}

/// Optional preference per drink category
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DrinkPreferences {
    #[serde(default)]
    pub mocktail: Option<String>,
    #[serde(default)]
    pub juice: Option<String>,
    #[serde(default)]
    pub cocktail: Option<String>,
    #[serde(default)]
    pub alcohol: Option<String>,
}

impl DrinkPreferences {
    pub fn set(&mut self, category: DrinkCategory, choice: Option<String>) {
        let slot = match category {
            DrinkCategory::Mocktail => &mut self.mocktail,
            DrinkCategory::Juice => &mut self.juice,
            DrinkCategory::Cocktail => &mut self.cocktail,
            DrinkCategory::Alcohol => &mut self.alcohol,
        };
        // Empty selections are stored as "no preference"
        *slot = choice.filter(|c| !c.trim().is_empty());
    }
}

/// Suffix carried by every craving field on the wire
pub const CRAVING_SUFFIX: &str = "_craving";

/// Per-cuisine craving scores, flattened into the member record as
/// `<cuisine>_craving` fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CuisineCravings(BTreeMap<String, u8>);

impl CuisineCravings {
    pub fn insert(&mut self, cuisine: impl Into<String>, score: u8) {
        let cuisine = cuisine.into();
        let name = cuisine
            .strip_suffix(CRAVING_SUFFIX)
            .map(str::to_string)
            .unwrap_or(cuisine);
        self.0.insert(name, score);
    }

    pub fn get(&self, cuisine: &str) -> Option<u8> {
        self.0.get(cuisine).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for CuisineCravings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (cuisine, score) in &self.0 {
            map.serialize_entry(&format!("{}{}", cuisine, CRAVING_SUFFIX), score)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CuisineCravings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CravingsVisitor;

        impl<'de> Visitor<'de> for CravingsVisitor {
            type Value = CuisineCravings;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of <cuisine>_craving scores")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut cravings = BTreeMap::new();
                while let Some(key) = access.next_key::<String>()? {
                    match key.strip_suffix(CRAVING_SUFFIX) {
                        Some(cuisine) => {
                            let score: u8 = access.next_value()?;
                            cravings.insert(cuisine.to_string(), score);
                        }
                        None => {
                            access.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(CuisineCravings(cravings))
            }
        }

        deserializer.deserialize_map(CravingsVisitor)
    }
}

fn default_level() -> u8 {
    3
}

/// One participant's dining preferences, as stored under
/// `groups/{id}/members/{key}` and as sent to the recommendation service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_level")]
    pub hunger_level: u8,
    #[serde(default = "default_level")]
    pub spice_level: u8,
    #[serde(default)]
    pub diet: Option<Diet>,
    #[serde(default)]
    pub drink_preferences: DrinkPreferences,
    #[serde(flatten)]
    pub cravings: CuisineCravings,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latitude: None,
            longitude: None,
            hunger_level: default_level(),
            spice_level: default_level(),
            diet: None,
            drink_preferences: DrinkPreferences::default(),
            cravings: CuisineCravings::default(),
        }
    }

    pub fn located_at(mut self, point: GeoPoint) -> Self {
        self.latitude = Some(point.latitude);
        self.longitude = Some(point.longitude);
        self
    }

    pub fn hunger(mut self, level: u8) -> Self {
        self.hunger_level = level;
        self
    }

    pub fn spice(mut self, level: u8) -> Self {
        self.spice_level = level;
        self
    }

    pub fn diet(mut self, diet: Diet) -> Self {
        self.diet = Some(diet);
        self
    }

    pub fn craving(mut self, cuisine: impl Into<String>, score: u8) -> Self {
        self.cravings.insert(cuisine, score);
        self
    }

    pub fn drink(mut self, category: DrinkCategory, choice: impl Into<String>) -> Self {
        self.drink_preferences.set(category, Some(choice.into()));
        self
    }

    /// Coordinates, if both halves were captured
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Check a record before it is written to the group
    pub fn validate(&self) -> Result<(), ValidationError> {
        let point = self.location().ok_or(ValidationError::MissingLocation)?;
        if !point.is_valid() {
            return Err(ValidationError::InvalidLocation {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }
        for (field, value) in [
            ("hunger_level", self.hunger_level),
            ("spice_level", self.spice_level),
        ] {
            if !(1..=5).contains(&value) {
                return Err(ValidationError::LevelOutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// A member as delivered by the store, together with its store-issued key
#[derive(Debug, Clone, PartialEq)]
pub struct MemberEntry {
    pub key: MemberKey,
    pub member: Member,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GpsCoordinates {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// A restaurant option returned by the recommendation service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RestaurantCandidate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, rename = "type")]
    pub category: Option<String>,
    #[serde(default)]
    pub gps_coordinates: Option<GpsCoordinates>,
    #[serde(default)]
    pub link: Option<String>,
}

impl RestaurantCandidate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.gps_coordinates = Some(GpsCoordinates {
            latitude: Some(latitude),
            longitude: Some(longitude),
        });
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Name")
    }
}

/// A candidate annotated with its derived vote key
#[derive(Debug, Clone, PartialEq)]
pub struct BoardEntry {
    pub vote_key: VoteKey,
    pub candidate: RestaurantCandidate,
}

/// AI summary attached to an `/analyze` response
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AiRecommendation {
    #[serde(default, rename = "friendlyMessage")]
    pub friendly_message: Option<String>,
    #[serde(default, rename = "mapsUrl")]
    pub maps_url: Option<String>,
}

/// Body of a successful `/analyze` response
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AnalyzeResponse {
    #[serde(default, rename = "topRestaurants")]
    pub top_restaurants: Vec<RestaurantCandidate>,
    #[serde(default, rename = "aiRecommendation")]
    pub ai_recommendation: Option<AiRecommendation>,
}

/// Outcome of one "generate recommendations" cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendations {
    pub message: String,
    pub maps_url: Option<String>,
    pub entries: Vec<BoardEntry>,
}
