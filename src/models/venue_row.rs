use super::{ChronoAttributes, CpsAttributes, Venue, VenueIntegration, CHRONO_LIGHTSPEED, CPS};
use crate::error::VenueError;
use crate::utils::horizon::parse_time_of_day;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A `courses` row as returned by the data store, joined with its city
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub external_api: Option<String>,
    #[serde(default)]
    pub external_api_attributes: serde_json::Value,
    #[serde(default)]
    pub booking_visibility_days: Option<u32>,
    #[serde(default)]
    pub booking_visibility_start_time: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub requires_login: Option<bool>,
    #[serde(default)]
    pub cities: Option<CityRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub region_id: Option<i64>,
}

impl VenueRow {
    /// Decode one raw row, keeping its id in the error when the rest is malformed.
    pub fn from_value(value: serde_json::Value) -> Result<Self, VenueError> {
        let row = value
            .get("id")
            .and_then(serde_json::Value::as_i64)
            .map_or_else(|| "?".to_string(), |id| id.to_string());
        serde_json::from_value(value).map_err(|e| VenueError::MalformedRow {
            row,
            message: e.to_string(),
        })
    }

    /// Convert the free-form attribute bag into a typed integration.
    pub fn into_venue(self, default_timezone: Tz) -> Result<Venue, VenueError> {
        let venue_id = self.id;
        let invalid = |e: serde_json::Error| VenueError::InvalidAttributes {
            venue_id,
            message: e.to_string(),
        };

        let integration = match self.external_api.as_deref().unwrap_or_default() {
            CPS => {
                let mut attrs: CpsAttributes =
                    serde_json::from_value(self.external_api_attributes).map_err(invalid)?;
                attrs.requires_login = self.requires_login.unwrap_or(false);
                VenueIntegration::Cps(attrs)
            }
            CHRONO_LIGHTSPEED => {
                let attrs: ChronoAttributes =
                    serde_json::from_value(self.external_api_attributes).map_err(invalid)?;
                VenueIntegration::ChronoLightspeed(attrs)
            }
            other => {
                return Err(VenueError::UnsupportedIntegration {
                    venue_id,
                    kind: other.to_string(),
                })
            }
        };

        let timezone = match self.timezone.as_deref().map(str::trim) {
            None | Some("") => default_timezone,
            Some(tz) => tz.parse::<Tz>().map_err(|_| VenueError::InvalidTimezone {
                venue_id,
                timezone: tz.to_string(),
            })?,
        };

        let booking_visibility_start_time = match self.booking_visibility_start_time.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(parse_time_of_day(raw).ok_or_else(|| {
                VenueError::InvalidStartTime {
                    venue_id,
                    value: raw.to_string(),
                }
            })?),
        };

        Ok(Venue {
            id: venue_id,
            name: self.name,
            city: self.cities.and_then(|c| c.name),
            timezone,
            booking_visibility_days: self.booking_visibility_days.unwrap_or(0),
            booking_visibility_start_time,
            integration,
        })
    }
}
