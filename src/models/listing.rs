use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Residential,
    Commercial,
    Industrial,
    Land,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Residential => "residential",
            PropertyType::Commercial => "commercial",
            PropertyType::Industrial => "industrial",
            PropertyType::Land => "land",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "residential" => Ok(PropertyType::Residential),
            "commercial" => Ok(PropertyType::Commercial),
            "industrial" => Ok(PropertyType::Industrial),
            "land" => Ok(PropertyType::Land),
            other => Err(format!("unknown property type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Pending,
    Sold,
    Withdrawn,
    Deleted,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Pending => "pending",
            ListingStatus::Sold => "sold",
            ListingStatus::Withdrawn => "withdrawn",
            ListingStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ListingStatus::Active),
            "pending" => Ok(ListingStatus::Pending),
            "sold" => Ok(ListingStatus::Sold),
            "withdrawn" => Ok(ListingStatus::Withdrawn),
            "deleted" => Ok(ListingStatus::Deleted),
            other => Err(format!("unknown listing status '{}'", other)),
        }
    }
}

/// A property listing as read from the listings store. Never mutated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub city: String,
    pub property_type: PropertyType,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub square_feet: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<f64>,
    pub listing_date: NaiveDate,
    pub status: ListingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Listing {
    pub fn new(
        id: i64,
        city: impl Into<String>,
        property_type: PropertyType,
        price: f64,
        listing_date: NaiveDate,
    ) -> Self {
        Self {
            id,
            city: city.into(),
            property_type,
            price,
            square_feet: None,
            bedrooms: None,
            bathrooms: None,
            listing_date,
            status: ListingStatus::Active,
            latitude: None,
            longitude: None,
        }
    }

    pub fn with_square_feet(mut self, square_feet: i32) -> Self {
        self.square_feet = Some(square_feet);
        self
    }

    pub fn with_rooms(mut self, bedrooms: i32, bathrooms: f64) -> Self {
        self.bedrooms = Some(bedrooms);
        self.bathrooms = Some(bathrooms);
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_status(mut self, status: ListingStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    /// Price per square foot, `None` when the area is missing or not positive
    pub fn price_per_sqft(&self) -> Option<f64> {
        match self.square_feet {
            Some(sqft) if sqft > 0 => Some(self.price / sqft as f64),
            _ => None,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Whole days between the listing date and `as_of`, never negative
    pub fn days_on_market(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.listing_date).num_days().max(0)
    }
}
