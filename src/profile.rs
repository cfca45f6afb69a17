//! Profile completion gate: pure validation of a creator profile against
//! the required-field policy. Blocks publishing until every required field
//! is present; the edit UI reads the same list for its messaging.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Social platforms whose links satisfy the social-profile requirement.
pub const SOCIAL_PLATFORMS: &[&str] = &[
    "instagram",
    "pinterest",
    "twitter",
    "tiktok",
    "youtube",
    "behance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLabel {
    DisplayName,
    PlacementsCell,
    Headline,
    Website,
    Country,
    Bio,
    Username,
    UpiId,
    AadhaarNumber,
    Social,
}

impl FieldLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisplayName => "Display name",
            Self::PlacementsCell => "Placements cell",
            Self::Headline => "Headline",
            Self::Website => "Website",
            Self::Country => "Country",
            Self::Bio => "Bio",
            Self::Username => "Username",
            Self::UpiId => "UPI ID",
            Self::AadhaarNumber => "Aadhaar number",
            Self::Social => "Social profile link",
        }
    }
}

impl fmt::Display for FieldLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreatorProfile {
    pub display_name: String,
    pub placements_cell: String,
    pub headline: String,
    pub website: String,
    pub country: String,
    pub bio: String,
    pub username: Option<String>,
    pub upi_id: String,
    pub aadhaar_number: String,
    pub social_links: BTreeMap<String, String>,
}

/// Every required field the profile is still missing, in policy order.
pub fn missing_fields(profile: &CreatorProfile) -> Vec<FieldLabel> {
    let mut missing = Vec::new();

    if profile.display_name.trim().is_empty() {
        missing.push(FieldLabel::DisplayName);
    }
    if profile.placements_cell.trim().is_empty() {
        missing.push(FieldLabel::PlacementsCell);
    }
    if profile.headline.trim().is_empty() {
        missing.push(FieldLabel::Headline);
    }
    if !is_valid_website(profile.website.trim()) {
        missing.push(FieldLabel::Website);
    }

    let country = profile.country.trim();
    if country.is_empty() {
        missing.push(FieldLabel::Country);
    }
    if profile.bio.trim().is_empty() {
        missing.push(FieldLabel::Bio);
    }
    if profile
        .username
        .as_deref()
        .unwrap_or_default()
        .trim()
        .is_empty()
    {
        missing.push(FieldLabel::Username);
    }

    // Payout identifiers required for creators in India
    if country.eq_ignore_ascii_case("in") || country.eq_ignore_ascii_case("india") {
        if profile.upi_id.trim().is_empty() {
            missing.push(FieldLabel::UpiId);
        }
        if profile.aadhaar_number.trim().is_empty() {
            missing.push(FieldLabel::AadhaarNumber);
        }
    }

    if !has_valid_social_link(&profile.social_links) {
        missing.push(FieldLabel::Social);
    }

    missing
}

pub fn is_complete(profile: &CreatorProfile) -> bool {
    missing_fields(profile).is_empty()
}

fn has_valid_social_link(links: &BTreeMap<String, String>) -> bool {
    SOCIAL_PLATFORMS.iter().any(|platform| {
        links
            .get(*platform)
            .is_some_and(|value| !value.trim().is_empty())
    })
}

fn is_valid_website(website: &str) -> bool {
    match Url::parse(website) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}
