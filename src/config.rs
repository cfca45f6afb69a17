use serde::Deserialize;
use std::path::Path;

use crate::earnings::EarningRates;

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub redirect: RedirectConfig,
    pub earnings: EarningsConfig,
    pub notifications: NotificationConfig,
    pub allocator: AllocatorConfig,
}

/// Sponsor-redirect targets and interstitial durations, per gated action.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RedirectConfig {
    pub default_url: String,
    pub like_url: String,
    pub copy_url: String,
    pub upload_url: String,
    pub profile_url: String,
    pub default_duration_ms: u64,
    pub like_duration_ms: u64,
    pub copy_duration_ms: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EarningsConfig {
    /// Display-estimate rates, currency per counted event.
    pub rates: EarningRates,
    /// Earning-point bumps credited to the owner per engagement event.
    pub points: EarningPointWeights,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct EarningPointWeights {
    pub view: f64,
    pub copy: f64,
    pub share: f64,
    /// Flat bump for a completed sponsor action.
    pub action: f64,
    /// Bump applied by the dashboard's sponsor-boost flow.
    pub boost: f64,
    /// Amount attached to each recorded redirect credit.
    pub redirect_credit: f64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub retention_days: i64,
    pub purge_batch_size: usize,
    pub page_size: usize,
    pub mark_read_batch_size: usize,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AllocatorConfig {
    pub username_max_length: usize,
    pub username_max_attempts: usize,
    pub username_max_changes: u32,
    pub slug_max_length: usize,
    pub slug_suffix_attempts: usize,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            default_url: "https://affiliate.example.com/redirect?s=strangeprompt".to_string(),
            like_url: "https://affiliate.example.com/go/like-ad?ref=strangeprompt".to_string(),
            copy_url: "https://affiliate.example.com/go/copy-ad?ref=strangeprompt".to_string(),
            upload_url: "https://affiliate.example.com/go/upload-ad?ref=strangeprompt".to_string(),
            profile_url: "https://affiliate.example.com/go/profile-ad?ref=strangeprompt".to_string(),
            default_duration_ms: 5000,
            like_duration_ms: 3500,
            copy_duration_ms: 4200,
        }
    }
}

impl Default for EarningsConfig {
    fn default() -> Self {
        Self {
            rates: EarningRates::default(),
            points: EarningPointWeights::default(),
        }
    }
}

impl Default for EarningPointWeights {
    fn default() -> Self {
        Self {
            view: 0.2,
            copy: 5.0,
            share: 2.0,
            action: 0.05,
            boost: 0.1,
            redirect_credit: 0.05,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retention_days: 60,
            purge_batch_size: 50,
            page_size: 5,
            mark_read_batch_size: 200,
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            username_max_length: 24,
            username_max_attempts: 40,
            username_max_changes: 5,
            slug_max_length: 64,
            slug_suffix_attempts: 6,
        }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => EngineConfig::default(),
        };
        Ok(config)
    }
}
