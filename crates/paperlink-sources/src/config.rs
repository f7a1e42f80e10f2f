//! Per-source connection settings

use std::time::Duration;

use anyhow::{Context, ensure};
use paperlink_core::BackoffPolicy;
use serde::{Deserialize, Serialize};

use crate::matching::DEFAULT_MATCH_THRESHOLD;

/// Settings for one external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    /// API root; `None` uses the public endpoint
    pub base_url: Option<String>,
    /// `None` uses the source's default pace
    pub requests_per_second: Option<f64>,
    pub api_key: Option<String>,
    /// Contact address for polite-pool access (OpenAlex)
    pub mailto: Option<String>,
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Minimum title similarity for a search hit to count as a match
    pub match_threshold: f64,
    /// Cap on the batch size; the source's own limit applies if lower
    pub max_batch_size: Option<usize>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            requests_per_second: None,
            api_key: None,
            mailto: None,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_batch_size: None,
        }
    }
}

impl SourceSettings {
    pub fn requests_per_second(&self, default: f64) -> f64 {
        self.requests_per_second.unwrap_or(default)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
        }
    }

    /// API key if configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn validate(&self, source: &str) -> anyhow::Result<()> {
        if let Some(rate) = self.requests_per_second {
            ensure!(
                rate > 0.0 && rate.is_finite(),
                "{source}: requests_per_second must be > 0 (got {rate})"
            );
        }
        ensure!(self.timeout_secs > 0, "{source}: timeout_secs must be > 0");
        ensure!(
            (0.0..=1.0).contains(&self.match_threshold),
            "{source}: match_threshold must be within 0..=1"
        );
        ensure!(
            self.max_batch_size != Some(0),
            "{source}: max_batch_size must be >= 1"
        );
        if let Some(key) = &self.api_key {
            ensure!(
                !key.contains("${"),
                "{source}: api_key references an unset environment variable ({key})"
            );
        }
        if let Some(url) = &self.base_url {
            reqwest::Url::parse(url).with_context(|| format!("{source}: invalid base_url {url}"))?;
        }
        Ok(())
    }
}

/// Settings for every known source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    pub openalex: SourceSettings,
    pub semantic_scholar: SourceSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = SourcesConfig::default();
        cfg.openalex.validate("openalex").unwrap();
        cfg.semantic_scholar.validate("semantic_scholar").unwrap();
        assert_eq!(cfg.openalex.backoff(), BackoffPolicy::default());
    }

    #[test]
    fn rejects_bad_rate_and_unexpanded_key() {
        let mut s = SourceSettings::default();
        s.requests_per_second = Some(0.0);
        assert!(s.validate("x").is_err());

        let mut s = SourceSettings::default();
        s.api_key = Some("${S2_API_KEY}".into());
        let err = s.validate("semantic_scholar").unwrap_err().to_string();
        assert!(err.contains("unset environment variable"));
    }

    #[test]
    fn blank_key_is_none() {
        let mut s = SourceSettings::default();
        s.api_key = Some("  ".into());
        assert_eq!(s.api_key(), None);
    }

    #[test]
    fn partial_settings_keep_defaults() {
        let cfg: SourcesConfig =
            serde_json::from_str(r#"{"semantic_scholar": {"api_key": "k"}}"#).unwrap();
        assert_eq!(cfg.semantic_scholar.api_key(), Some("k"));
        assert_eq!(cfg.semantic_scholar.max_retries, 3);
        assert_eq!(cfg.openalex.requests_per_second(10.0), 10.0);
    }
}
