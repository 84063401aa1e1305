use std::collections::VecDeque;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use leviathan_agent::gateway::LanguageModelGateway;
use leviathan_agent::history::InMemoryHistoryStore;
use leviathan_agent::inference::{InferenceTransport, RemoteInferenceClient};
use leviathan_agent::llm::LlmClient;
use leviathan_agent::pipeline::{CallPolicy, LeviathanPipeline};
use leviathan_agent::runtime::AgentRuntime;
use leviathan_cli::commands::{ask, chat, config, doctor, matrix};
use leviathan_core::config::{ConfigOverrides, LoadOptions};
use leviathan_core::decision_matrix::{DecisionMatrix, DEFAULT_DECISION_MATRIX};
use leviathan_core::domain::history::SessionId;
use leviathan_core::domain::inference::{LabeledSpan, ModelKind};
use leviathan_core::errors::{GatewayError, InferenceError};
use leviathan_core::prompts::PromptBook;
use serde_json::Value;

const FULL_MATRIX_CSV: &str = "intent;knowledge_base;entity_extraction;action\n\
inventory;graph;true;query_inventory\n\
checkout;graph;false;process_checkout\n\
irrelevant;null;false;decline\n\
conversational;null;false;\"small talk; be brief\"\n\
feedback;embedding;false;log_feedback\n\
postSale;embedding;true;post_sale_support\n";

#[test]
fn config_reports_sources_and_redacts_secrets() {
    with_env(
        &[
            ("LEVIATHAN_LLM_PROVIDER", "openai"),
            ("LEVIATHAN_LLM_API_KEY", "sk-very-secret"),
            ("NER_API", "http://ner.internal:9001"),
        ],
        || {
            let output = config::run(&LoadOptions::default());

            assert!(output.contains("- llm.provider = OpenAi (source: env (LEVIATHAN_LLM_PROVIDER))"));
            assert!(output.contains("- llm.api_key = sk-*** (source: env (LEVIATHAN_LLM_API_KEY))"));
            assert!(output.contains(
                "- inference.ner.base_url = http://ner.internal:9001 (source: env (NER_API))"
            ));
            assert!(output.contains("- llm.model = mistral:instruct (source: default)"));
            assert!(!output.contains("very-secret"));
        },
    );
}

#[test]
fn config_attributes_flag_overrides() {
    with_env(&[], || {
        let options = LoadOptions {
            overrides: ConfigOverrides {
                llm_model: Some("llama3".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };
        let output = config::run(&options);
        assert!(output.contains("- llm.model = llama3 (source: flag)"));
    });
}

#[test]
fn doctor_flags_the_missing_feedback_route_with_built_in_prompts() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[], || {
        let result = doctor::run(options_for(&dir.path().join("prompt.json")), true);
        assert_eq!(result.exit_code, 1, "incomplete matrix should fail the doctor");

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().expect("checks");
        let matrix_check = checks
            .iter()
            .find(|check| check["name"] == "decision_matrix")
            .expect("decision matrix check");
        assert_eq!(matrix_check["status"], "fail");
        assert!(matrix_check["details"].as_str().unwrap_or_default().contains("feedback"));

        let templates = checks
            .iter()
            .find(|check| check["name"] == "prompt_templates")
            .expect("template check");
        assert_eq!(templates["status"], "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("LEVIATHAN_MAX_RETRIES", "many")], || {
        let result = doctor::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        let statuses = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .map(|check| check["status"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(statuses, vec!["fail", "skipped", "skipped", "skipped", "skipped"]);
    });
}

#[test]
fn matrix_import_completes_the_matrix_and_keeps_other_prompt_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prompt_file = dir.path().join("prompt.json");
    fs::write(
        &prompt_file,
        r#"{"leviathan": {"sentiment_prompt": "Describe {{ input }} in {{ language }}."}, "ui": {"title": "Shop"}}"#,
    )
    .expect("write prompt file");
    let csv_file = dir.path().join("matrix.csv");
    fs::write(&csv_file, FULL_MATRIX_CSV).expect("write csv");

    with_env(&[], || {
        let before = matrix::check(options_for(&prompt_file));
        assert_eq!(before.exit_code, 1);
        assert_eq!(parse_payload(&before.output)["error_class"], "decision_matrix_incomplete");

        let imported = matrix::import(options_for(&prompt_file), &csv_file, ';');
        assert_eq!(imported.exit_code, 0, "import failed: {}", imported.output);
        assert_eq!(parse_payload(&imported.output)["status"], "ok");

        let after = matrix::check(options_for(&prompt_file));
        assert_eq!(after.exit_code, 0, "check failed: {}", after.output);

        let shown = matrix::show(options_for(&prompt_file));
        assert!(shown.output.contains("conversational|null|false|small talk; be brief"));
        assert!(shown.output.contains("- feedback -> knowledge_base=embedding"));
    });

    let saved: Value =
        serde_json::from_str(&fs::read_to_string(&prompt_file).expect("read")).expect("json");
    assert_eq!(saved["ui"]["title"], "Shop");
    assert_eq!(saved["leviathan"]["sentiment_prompt"], "Describe {{ input }} in {{ language }}.");
    let stored = saved["leviathan"]["decision_matrix"].as_str().expect("matrix text");
    assert!(stored.starts_with("intent|knowledge_base|entity_extraction|action\n"));
    assert!(!stored.ends_with('\n'));
}

#[test]
fn matrix_import_rejects_tables_without_routing_columns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prompt_file = dir.path().join("prompt.json");
    let csv_file = dir.path().join("matrix.csv");
    fs::write(&csv_file, "intent;action\ninventory;query_inventory\n").expect("write csv");

    with_env(&[], || {
        let result = matrix::import(options_for(&prompt_file), &csv_file, ';');
        assert_eq!(result.exit_code, 1);
        assert_eq!(parse_payload(&result.output)["error_class"], "decision_matrix_invalid");
    });
    assert!(!prompt_file.exists(), "nothing should be written for an invalid matrix");
}

#[tokio::test]
async fn chat_loop_answers_and_starts_new_sessions() {
    let llm = ScriptedLlm::answering(&[SENTIMENT, CHECKOUT_PLAN]);
    let runtime = scripted_runtime(llm);
    let mut output = Vec::new();

    let summary = chat::converse(
        &runtime,
        SessionId::from("s-chat"),
        "quiero pagar\n\n/new\n/quit\nnever read\n".as_bytes(),
        &mut output,
    )
    .await
    .expect("chat loop");

    assert_eq!(summary.answered, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.sessions.len(), 2);
    assert_eq!(summary.sessions[0], SessionId::from("s-chat"));

    let transcript = String::from_utf8(output).expect("utf8");
    assert!(transcript.starts_with("session s-chat"));
    assert!(transcript.contains("\"intent\": \"checkout\""));
    assert!(!transcript.contains("never read"));
}

#[tokio::test]
async fn chat_loop_reports_failed_turns_and_continues() {
    let llm = ScriptedLlm::answering(&["not json", SENTIMENT, CHECKOUT_PLAN]);
    let runtime = scripted_runtime(llm);
    let mut output = Vec::new();

    let input = "hola\nquiero pagar\n".as_bytes();
    let summary = chat::converse(&runtime, SessionId::from("s-chat"), input, &mut output)
        .await
        .expect("chat loop");

    assert_eq!((summary.answered, summary.failed), (1, 1));
    let transcript = String::from_utf8(output).expect("utf8");
    assert!(transcript.contains("(sentiment stage)"));
}

#[tokio::test]
async fn ask_renders_the_merged_result_with_its_session() {
    let runtime = scripted_runtime(ScriptedLlm::answering(&[SENTIMENT, CHECKOUT_PLAN]));

    let result = ask::ask(&runtime, &SessionId::from("s-ask"), "quiero pagar").await;

    assert_eq!(result.exit_code, 0);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["session_id"], "s-ask");
    assert_eq!(payload["result"]["intent"], "checkout");
    assert_eq!(payload["result"]["translation"], "I want to pay");
    assert!(payload["result"].get("entities").is_none());
}

#[tokio::test]
async fn ask_reports_the_failed_stage() {
    let runtime = scripted_runtime(ScriptedLlm::answering(&["no idea"]));

    let result = ask::ask(&runtime, &SessionId::from("s-ask"), "???").await;

    assert_eq!(result.exit_code, 4);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "sentiment_stage");
}

const SENTIMENT: &str = r#"{"language": "spanish", "sentiment": "neutral", "aggressiveness": 1, "translation": "I want to pay"}"#;
const CHECKOUT_PLAN: &str = r#"{"knowledge_base": {"type": "graph", "shouldUse": true}, "action_type": {"intent": "checkout", "action": "process_checkout"}, "entity_extraction": false}"#;

struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    fn answering(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|reply| (*reply).to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, GatewayError> {
        self.replies.lock().expect("replies").pop_front().ok_or_else(|| {
            GatewayError::Unavailable { message: "script exhausted".into(), timeout: false }
        })
    }
}

struct CheckoutClassifier;

#[async_trait]
impl InferenceTransport for CheckoutClassifier {
    async fn infer(
        &self,
        model: ModelKind,
        _text: &str,
        _label_map: Option<&[String]>,
    ) -> Result<Vec<LabeledSpan>, InferenceError> {
        match model {
            ModelKind::Intent => Ok(vec![LabeledSpan::label("LABEL_1").with_score(0.8)]),
            ModelKind::Ner => Ok(Vec::new()),
        }
    }
}

fn scripted_runtime(llm: Arc<ScriptedLlm>) -> AgentRuntime {
    let gateway = LanguageModelGateway::new(&PromptBook::default(), llm).expect("gateway");
    let pipeline = LeviathanPipeline::new(
        gateway,
        RemoteInferenceClient::new(Arc::new(CheckoutClassifier)),
        DecisionMatrix::parse(DEFAULT_DECISION_MATRIX).expect("matrix"),
        Arc::new(InMemoryHistoryStore::new()),
        "english",
        CallPolicy { max_retries: 0, ..CallPolicy::default() },
    )
    .expect("pipeline");
    AgentRuntime::new(pipeline)
}

fn options_for(prompt_file: &Path) -> LoadOptions {
    LoadOptions {
        overrides: ConfigOverrides {
            prompt_file: Some(prompt_file.to_path_buf()),
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEVIATHAN_LLM_PROVIDER",
        "LEVIATHAN_LLM_API_KEY",
        "LEVIATHAN_LLM_BASE_URL",
        "LEVIATHAN_LLM_MODEL",
        "LEVIATHAN_LLM_TEMPERATURE",
        "LEVIATHAN_LLM_TIMEOUT_SECS",
        "LEVIATHAN_INTENT_API",
        "LEVIATHAN_INTENT_API_TOKEN",
        "LEVIATHAN_NER_API",
        "LEVIATHAN_NER_API_TOKEN",
        "INTENT_API",
        "INTENT_API_TOKEN",
        "NER_API",
        "NER_API_TOKEN",
        "LEVIATHAN_PROMPT_FILE",
        "LEVIATHAN_WORKING_LANGUAGE",
        "LEVIATHAN_REMOTE_TIMEOUT_SECS",
        "LEVIATHAN_MAX_RETRIES",
        "LEVIATHAN_SERVER_BIND_ADDRESS",
        "LEVIATHAN_SERVER_PORT",
        "LEVIATHAN_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LEVIATHAN_LOGGING_LEVEL",
        "LEVIATHAN_LOGGING_FORMAT",
        "LEVIATHAN_LOG_LEVEL",
        "LEVIATHAN_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
