use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leviathan_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec![
        "effective config (source precedence: flag > env > file > default):".to_string(),
    ];
    for field in fields(&config) {
        let source = if overridden_by_flag(options, field.key) {
            "flag".to_string()
        } else {
            field_source(
                field.key,
                field.env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            )
        };
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm = &config.llm;
    let intent = &config.inference.intent;
    let ner = &config.inference.ner;
    let pipeline = &config.pipeline;

    vec![
        Field::new("llm.provider", format!("{:?}", llm.provider), &["LEVIATHAN_LLM_PROVIDER"]),
        Field::new("llm.model", llm.model.as_str(), &["LEVIATHAN_LLM_MODEL"]),
        Field::new(
            "llm.base_url",
            llm.base_url.as_deref().unwrap_or("<unset>"),
            &["LEVIATHAN_LLM_BASE_URL"],
        ),
        Field::new("llm.api_key", redact_secret(llm.api_key.as_ref()), &["LEVIATHAN_LLM_API_KEY"]),
        Field::new(
            "llm.temperature",
            llm.temperature.to_string(),
            &["LEVIATHAN_LLM_TEMPERATURE"],
        ),
        Field::new(
            "llm.timeout_secs",
            llm.timeout_secs.to_string(),
            &["LEVIATHAN_LLM_TIMEOUT_SECS"],
        ),
        Field::new(
            "inference.intent.base_url",
            intent.base_url.as_str(),
            &["LEVIATHAN_INTENT_API", "INTENT_API"],
        ),
        Field::new(
            "inference.intent.token",
            redact_secret(intent.token.as_ref()),
            &["LEVIATHAN_INTENT_API_TOKEN", "INTENT_API_TOKEN"],
        ),
        Field::new(
            "inference.ner.base_url",
            ner.base_url.as_str(),
            &["LEVIATHAN_NER_API", "NER_API"],
        ),
        Field::new(
            "inference.ner.token",
            redact_secret(ner.token.as_ref()),
            &["LEVIATHAN_NER_API_TOKEN", "NER_API_TOKEN"],
        ),
        Field::new(
            "pipeline.prompt_file",
            pipeline.prompt_file.display().to_string(),
            &["LEVIATHAN_PROMPT_FILE"],
        ),
        Field::new(
            "pipeline.working_language",
            pipeline.working_language.as_str(),
            &["LEVIATHAN_WORKING_LANGUAGE"],
        ),
        Field::new(
            "pipeline.remote_timeout_secs",
            pipeline.remote_timeout_secs.to_string(),
            &["LEVIATHAN_REMOTE_TIMEOUT_SECS"],
        ),
        Field::new(
            "pipeline.max_retries",
            pipeline.max_retries.to_string(),
            &["LEVIATHAN_MAX_RETRIES"],
        ),
        Field::new(
            "server.bind_address",
            config.server.bind_address.as_str(),
            &["LEVIATHAN_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["LEVIATHAN_SERVER_PORT"]),
        Field::new(
            "logging.level",
            config.logging.level.as_str(),
            &["LEVIATHAN_LOGGING_LEVEL", "LEVIATHAN_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["LEVIATHAN_LOGGING_FORMAT", "LEVIATHAN_LOG_FORMAT"],
        ),
    ]
}

fn overridden_by_flag(options: &LoadOptions, key: &str) -> bool {
    let overrides = &options.overrides;
    match key {
        "logging.level" => overrides.log_level.is_some(),
        "llm.provider" => overrides.llm_provider.is_some(),
        "llm.model" => overrides.llm_model.is_some(),
        "llm.base_url" => overrides.llm_base_url.is_some(),
        "inference.intent.base_url" => overrides.intent_api.is_some(),
        "inference.ner.base_url" => overrides.ner_api.is_some(),
        "pipeline.prompt_file" => overrides.prompt_file.is_some(),
        "server.port" => overrides.server_port.is_some(),
        _ => false,
    }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from(DEFAULT_CONFIG_FILE);
    if root.exists() {
        return Some(root);
    }

    let nested = Path::new("config").join(DEFAULT_CONFIG_FILE);
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a short recognisable prefix (`sk-***`) and hides the rest.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
