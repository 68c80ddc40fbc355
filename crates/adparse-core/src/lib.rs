//! Core domain model for adparse: parse records, platforms, and tariffs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod metrics;

pub use metrics::HistoryStats;

pub const CRATE_NAME: &str = "adparse-core";

/// Balance a fresh session starts with.
pub const DEFAULT_STARTING_BALANCE: i64 = 450;

/// Marketplace an ad URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Avito,
    Rabota,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Avito, Platform::Rabota];

    /// Substring that identifies this platform inside an ad URL.
    pub fn domain_marker(self) -> &'static str {
        match self {
            Platform::Avito => "avito.ru",
            Platform::Rabota => "rabota.ru",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Avito => "avito",
            Platform::Rabota => "rabota",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = UnknownPlatform;

    /// Parse the lowercase wire name used by the remote services.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avito" => Ok(Platform::Avito),
            "rabota" => Ok(Platform::Rabota),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown platform name {0:?}")]
pub struct UnknownPlatform(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported platform for url {url:?}: only avito.ru and rabota.ru are supported")]
pub struct UnsupportedPlatform {
    pub url: String,
}

/// Map a URL onto its platform by domain marker.
///
/// Matching is case-insensitive over the trimmed URL. Exactly one marker must match; a URL
/// naming neither or both platforms is rejected.
pub fn classify_platform(url: &str) -> Result<Platform, UnsupportedPlatform> {
    let normalized = url.trim().to_ascii_lowercase();
    let mut matches = Platform::ALL
        .into_iter()
        .filter(|platform| normalized.contains(platform.domain_marker()));

    match (matches.next(), matches.next()) {
        (Some(platform), None) => Ok(platform),
        _ => Err(UnsupportedPlatform {
            url: url.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Success,
    Failed,
}

/// Why an extraction attempt produced no phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service ran but reported no phone (or another logical error).
    Extraction,
    /// The service could not be reached or answered with something undecodable.
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Extraction => f.pad("extraction failure"),
            FailureKind::Transport => f.pad("transport error"),
        }
    }
}

/// One parse attempt, either built locally right after an extraction or read back from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    pub id: String,
    pub url: String,
    pub platform: Platform,
    pub phone: String,
    pub status: ParseStatus,
    pub timestamp: DateTime<Utc>,
    pub cost: u32,
}

impl ParseResult {
    /// Optimistic entry for a successful extraction. `cost` is the tariff price, which
    /// `TariffTable` keeps above zero; a zero here yields a record `is_consistent` rejects.
    pub fn success(
        url: impl Into<String>,
        platform: Platform,
        phone: impl Into<String>,
        cost: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            platform,
            phone: phone.into(),
            status: ParseStatus::Success,
            timestamp,
            cost,
        }
    }

    /// Optimistic entry for a failed extraction: no phone, no charge.
    pub fn failed(url: impl Into<String>, platform: Platform, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            platform,
            phone: String::new(),
            status: ParseStatus::Failed,
            timestamp,
            cost: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ParseStatus::Success
    }

    /// Whether status, phone and cost agree with each other.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            ParseStatus::Success => !self.phone.is_empty() && self.cost > 0,
            ParseStatus::Failed => self.phone.is_empty() && self.cost == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TariffTier {
    Basic,
    #[default]
    Standard,
    Premium,
}

impl TariffTier {
    pub const ALL: [TariffTier; 3] = [TariffTier::Basic, TariffTier::Standard, TariffTier::Premium];

    /// Built-in price per successful extraction.
    pub fn default_price(self) -> u32 {
        match self {
            TariffTier::Basic => 20,
            TariffTier::Standard => 15,
            TariffTier::Premium => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TariffTier::Basic => "basic",
            TariffTier::Standard => "standard",
            TariffTier::Premium => "premium",
        }
    }
}

impl fmt::Display for TariffTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tariff tier {0:?} (expected basic, standard or premium)")]
pub struct UnknownTariffTier(pub String);

impl std::str::FromStr for TariffTier {
    type Err = UnknownTariffTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(TariffTier::Basic),
            "standard" => Ok(TariffTier::Standard),
            "premium" => Ok(TariffTier::Premium),
            _ => Err(UnknownTariffTier(s.to_string())),
        }
    }
}

/// A tier together with the price charged per successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffPlan {
    pub tier: TariffTier,
    pub price: u32,
}

impl TariffPlan {
    pub fn from_tier(tier: TariffTier) -> Self {
        Self {
            tier,
            price: tier.default_price(),
        }
    }
}

impl Default for TariffPlan {
    fn default() -> Self {
        Self::from_tier(TariffTier::default())
    }
}
