//! Provider registry: builds the retrieval fan-out from configuration.
//!
//! Every enabled provider gets its own throttle from its config section.
//! A provider that needs an API key whose variable is unset is skipped with a
//! warning; the run continues with the remaining providers.

use std::sync::Arc;

use reportsmith_core::config::{ProviderConfig, RetrievalConfig};
use reportsmith_core::error::ProviderError;
use reportsmith_core::research::{EvidenceProvider, RetrievalFanout};
use tracing::{debug, info, warn};

use crate::arxiv::{self, ArxivProvider};
use crate::news::{self, NewsApiProvider};
use crate::semantic_scholar::{self, SemanticScholarProvider};
use crate::web::{self, TavilyProvider};

/// A configured provider that was left out of the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProvider {
    pub name: &'static str,
    pub reason: String,
}

/// The fan-out plus what was left out of it.
pub struct Registration {
    pub fanout: RetrievalFanout,
    pub skipped: Vec<SkippedProvider>,
}

/// Build the provider for config section `name`.
///
/// Returns `NotConfigured` when a required key is missing.
pub fn create_provider(
    name: &'static str,
    config: &ProviderConfig,
) -> Result<Arc<dyn EvidenceProvider>, ProviderError> {
    let missing_key = || ProviderError::NotConfigured {
        provider: name.to_string(),
        reason: format!(
            "environment variable {} is not set",
            config.api_key_env.as_deref().unwrap_or("<api_key_env>")
        ),
    };

    let provider: Arc<dyn EvidenceProvider> = match name {
        web::NAME => Arc::new(TavilyProvider::new(config.api_key().ok_or_else(missing_key)?)?),
        arxiv::NAME => Arc::new(ArxivProvider::new()?),
        semantic_scholar::NAME => Arc::new(SemanticScholarProvider::new(config.api_key())?),
        news::NAME => Arc::new(NewsApiProvider::new(config.api_key().ok_or_else(missing_key)?)?),
        other => {
            return Err(ProviderError::NotConfigured {
                provider: other.to_string(),
                reason: "unknown provider".into(),
            });
        }
    };
    Ok(provider)
}

/// Register every enabled, usable provider of `config`.
pub fn build_fanout(config: &RetrievalConfig) -> Registration {
    let mut fanout = RetrievalFanout::new(config.sections_in_flight);
    let mut skipped = Vec::new();

    for (name, provider_config) in config.providers() {
        if !provider_config.enabled {
            debug!(provider = name, "Provider disabled");
            skipped.push(SkippedProvider {
                name,
                reason: "disabled".into(),
            });
            continue;
        }
        match create_provider(name, provider_config) {
            Ok(provider) => {
                fanout = fanout.with_provider(
                    provider,
                    provider_config.throttle,
                    provider_config.max_results,
                );
            }
            Err(e) => {
                warn!(provider = name, error = %e, "Skipping evidence provider");
                skipped.push(SkippedProvider {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        providers = ?fanout.provider_names(),
        skipped = skipped.len(),
        "Evidence providers registered"
    );
    Registration { fanout, skipped }
}
