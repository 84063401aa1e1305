use std::sync::Arc;

use leviathan_agent::runtime::{AgentRuntime, RuntimeError};
use leviathan_core::config::{AppConfig, ConfigError};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub agent_runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("agent runtime failed to start: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Builds the runtime from an already loaded config. An incomplete decision
/// matrix is not fatal: the server starts and reports itself degraded.
pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        prompt_file = %config.pipeline.prompt_file.display(),
        "starting application bootstrap"
    );

    let agent_runtime = AgentRuntime::from_config(&config)?;

    let missing = agent_runtime.matrix().missing_intents();
    if !missing.is_empty() {
        let names = missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        warn!(
            event_name = "system.bootstrap.matrix_incomplete",
            correlation_id = "bootstrap",
            missing = %names,
            "decision matrix has intents without a route"
        );
    }

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        llm_model = %config.llm.model,
        "agent runtime initialized"
    );

    Ok(Application { config, agent_runtime: Arc::new(agent_runtime) })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use leviathan_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?)
    }

    #[test]
    fn bootstrap_fails_fast_on_invalid_endpoints() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                intent_api: Some("intent.local:8081".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let error = result.err().expect("invalid intent endpoint should fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("inference.intent.base_url"));
    }

    #[test]
    fn bootstrap_starts_with_built_in_prompts() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                prompt_file: Some(PathBuf::from("/nonexistent/leviathan/prompt.json")),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("bootstrap should succeed with defaults");

        assert_eq!(app.config.server.port, 8080);
        assert_eq!(app.agent_runtime.matrix().missing_intents().len(), 1);
    }
}
