use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "leviathan.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub inference: InferenceConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct InferenceConfig {
    pub intent: ServiceEndpoint,
    pub ner: ServiceEndpoint,
}

#[derive(Clone, Debug)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub prompt_file: PathBuf,
    pub working_language: String,
    pub remote_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub intent_api: Option<String>,
    pub ner_api: Option<String>,
    pub prompt_file: Option<PathBuf>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "mistral:instruct".to_string(),
                temperature: 0.0,
                timeout_secs: 60,
            },
            inference: InferenceConfig {
                intent: ServiceEndpoint {
                    base_url: "http://localhost:8081".to_string(),
                    token: None,
                    timeout_secs: 15,
                },
                ner: ServiceEndpoint {
                    base_url: "http://localhost:8082".to_string(),
                    token: None,
                    timeout_secs: 15,
                },
            },
            pipeline: PipelineConfig {
                prompt_file: PathBuf::from("prompt.json"),
                working_language: "english".to_string(),
                remote_timeout_secs: 30,
                max_retries: 1,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(inference) = patch.inference {
            if let Some(intent) = inference.intent {
                intent.apply_to(&mut self.inference.intent);
            }
            if let Some(ner) = inference.ner {
                ner.apply_to(&mut self.inference.ner);
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(prompt_file) = pipeline.prompt_file {
                self.pipeline.prompt_file = prompt_file;
            }
            if let Some(working_language) = pipeline.working_language {
                self.pipeline.working_language = working_language;
            }
            if let Some(remote_timeout_secs) = pipeline.remote_timeout_secs {
                self.pipeline.remote_timeout_secs = remote_timeout_secs;
            }
            if let Some(max_retries) = pipeline.max_retries {
                self.pipeline.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEVIATHAN_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LEVIATHAN_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEVIATHAN_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LEVIATHAN_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LEVIATHAN_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("LEVIATHAN_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("LEVIATHAN_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("LEVIATHAN_LLM_TIMEOUT_SECS", &value)?;
        }

        // The bare names are what the classifier deployments export.
        let intent_api = read_env("LEVIATHAN_INTENT_API").or_else(|| read_env("INTENT_API"));
        if let Some(value) = intent_api {
            self.inference.intent.base_url = value;
        }
        let intent_token =
            read_env("LEVIATHAN_INTENT_API_TOKEN").or_else(|| read_env("INTENT_API_TOKEN"));
        if let Some(value) = intent_token {
            self.inference.intent.token = Some(secret_value(value));
        }
        let ner_api = read_env("LEVIATHAN_NER_API").or_else(|| read_env("NER_API"));
        if let Some(value) = ner_api {
            self.inference.ner.base_url = value;
        }
        let ner_token = read_env("LEVIATHAN_NER_API_TOKEN").or_else(|| read_env("NER_API_TOKEN"));
        if let Some(value) = ner_token {
            self.inference.ner.token = Some(secret_value(value));
        }

        if let Some(value) = read_env("LEVIATHAN_PROMPT_FILE") {
            self.pipeline.prompt_file = PathBuf::from(value);
        }
        if let Some(value) = read_env("LEVIATHAN_WORKING_LANGUAGE") {
            self.pipeline.working_language = value;
        }
        if let Some(value) = read_env("LEVIATHAN_REMOTE_TIMEOUT_SECS") {
            self.pipeline.remote_timeout_secs = parse_u64("LEVIATHAN_REMOTE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEVIATHAN_MAX_RETRIES") {
            self.pipeline.max_retries = parse_u32("LEVIATHAN_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("LEVIATHAN_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEVIATHAN_SERVER_PORT") {
            self.server.port = parse_u16("LEVIATHAN_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEVIATHAN_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEVIATHAN_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("LEVIATHAN_LOGGING_LEVEL").or_else(|| read_env("LEVIATHAN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEVIATHAN_LOGGING_FORMAT").or_else(|| read_env("LEVIATHAN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(intent_api) = overrides.intent_api {
            self.inference.intent.base_url = intent_api;
        }
        if let Some(ner_api) = overrides.ner_api {
            self.inference.ner.base_url = ner_api;
        }
        if let Some(prompt_file) = overrides.prompt_file {
            self.pipeline.prompt_file = prompt_file;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_endpoint("inference.intent", &self.inference.intent)?;
        validate_endpoint("inference.ner", &self.inference.ner)?;
        validate_pipeline(&self.pipeline)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config/leviathan.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_endpoint(name: &str, endpoint: &ServiceEndpoint) -> Result<(), ConfigError> {
    if !is_http_url(&endpoint.base_url) {
        return Err(ConfigError::Validation(format!(
            "{name}.base_url must start with http:// or https://"
        )));
    }

    if endpoint.timeout_secs == 0 || endpoint.timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "{name}.timeout_secs must be in range 1..=300"
        )));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.prompt_file.as_os_str().is_empty() {
        return Err(ConfigError::Validation("pipeline.prompt_file must not be empty".to_string()));
    }

    if pipeline.working_language.trim().is_empty() {
        return Err(ConfigError::Validation(
            "pipeline.working_language must not be empty".to_string(),
        ));
    }

    if pipeline.remote_timeout_secs == 0 || pipeline.remote_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "pipeline.remote_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if pipeline.max_retries > 5 {
        return Err(ConfigError::Validation(
            "pipeline.max_retries must be at most 5".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    inference: Option<InferencePatch>,
    pipeline: Option<PipelinePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct InferencePatch {
    intent: Option<EndpointPatch>,
    ner: Option<EndpointPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointPatch {
    base_url: Option<String>,
    token: Option<String>,
    timeout_secs: Option<u64>,
}

impl EndpointPatch {
    fn apply_to(self, endpoint: &mut ServiceEndpoint) {
        if let Some(base_url) = self.base_url {
            endpoint.base_url = base_url;
        }
        if let Some(token_value) = self.token {
            endpoint.token = Some(secret_value(token_value));
        }
        if let Some(timeout_secs) = self.timeout_secs {
            endpoint.timeout_secs = timeout_secs;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    prompt_file: Option<PathBuf>,
    working_language: Option<String>,
    remote_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
