//! Compile-time list of the sources the pipeline can talk to

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use paperlink_core::Clock;
use serde::{Deserialize, Serialize};

use crate::client::SourceClient;
use crate::config::{SourceSettings, SourcesConfig};
use crate::openalex::{self, OpenAlexClient};
use crate::semantic_scholar::{self, SemanticScholarClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[serde(rename = "openalex")]
    OpenAlex,
    SemanticScholar,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::OpenAlex, SourceKind::SemanticScholar];

    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAlex => openalex::NAME,
            Self::SemanticScholar => semantic_scholar::NAME,
        }
    }

    pub fn settings(self, config: &SourcesConfig) -> &SourceSettings {
        match self {
            Self::OpenAlex => &config.openalex,
            Self::SemanticScholar => &config.semantic_scholar,
        }
    }

    pub fn build(self, config: &SourcesConfig, clock: Arc<dyn Clock>) -> Arc<dyn SourceClient> {
        let settings = self.settings(config);
        match self {
            Self::OpenAlex => Arc::new(OpenAlexClient::new(settings, clock)),
            Self::SemanticScholar => Arc::new(SemanticScholarClient::new(settings, clock)),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "openalex" => Ok(Self::OpenAlex),
            "semantic_scholar" | "s2" => Ok(Self::SemanticScholar),
            other => Err(format!(
                "unknown source '{other}' (expected one of: openalex, semantic_scholar)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("OpenAlex".parse::<SourceKind>().unwrap(), SourceKind::OpenAlex);
        assert_eq!("semantic-scholar".parse::<SourceKind>().unwrap(), SourceKind::SemanticScholar);
        assert_eq!("s2".parse::<SourceKind>().unwrap(), SourceKind::SemanticScholar);
        assert!("crossref".parse::<SourceKind>().is_err());
        for kind in SourceKind::ALL {
            assert_eq!(kind.name().parse::<SourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn built_clients_report_their_name() {
        let config = SourcesConfig::default();
        for kind in SourceKind::ALL {
            let client = kind.build(&config, paperlink_core::system_clock());
            assert_eq!(client.name(), kind.name());
            assert!(client.capabilities().max_batch_size >= 1);
        }
    }

    #[test]
    fn serde_matches_source_names() {
        for kind in SourceKind::ALL {
            let v = serde_json::to_value(kind).unwrap();
            assert_eq!(v, kind.name());
            assert_eq!(serde_json::from_value::<SourceKind>(v).unwrap(), kind);
        }
    }
}
