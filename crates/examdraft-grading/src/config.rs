//! Grading configuration and factory.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use examdraft_core::traits::GradingCollaborator;

use crate::http::{HttpGrader, DEFAULT_TIMEOUT_SECS};
use crate::mock::MockGrader;

/// The `[grading]` configuration section.
///
/// Note: Custom Debug impl masks the API key to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Grading service root. Without one, attempts are scored locally.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token; may reference environment variables as `${VAR}`.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

impl std::fmt::Debug for GradingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradingConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GradingConfig {
    /// Expand `${VAR}` references in the URL and key.
    pub fn resolved(&self) -> Self {
        Self {
            base_url: self.base_url.as_ref().map(|u| resolve_env_vars(u)),
            api_key: resolve_env_vars(&self.api_key),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
pub fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Create a grading collaborator from its configuration.
pub fn create_grader(config: &GradingConfig) -> Result<Arc<dyn GradingCollaborator>> {
    let config = config.resolved();
    match config.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(base_url) => {
            tracing::info!(base_url, "using HTTP grading service");
            Ok(Arc::new(HttpGrader::new(
                base_url,
                &config.api_key,
                config.timeout_secs,
            )?))
        }
        None => {
            tracing::info!("no grading service configured, scoring attempts locally");
            Ok(Arc::new(MockGrader::new()))
        }
    }
}
