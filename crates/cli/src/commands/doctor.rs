use leviathan_agent::gateway::LanguageModelGateway;
use leviathan_agent::inference::HttpInferenceTransport;
use leviathan_agent::llm::client_from_config;
use leviathan_core::config::{AppConfig, LoadOptions};
use leviathan_core::decision_matrix::DecisionMatrix;
use leviathan_core::prompts::{PromptBook, TemplateId};
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_CHECK_FAILED};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const CHECKS_AFTER_CONFIG: [&str; 4] =
    ["prompt_book", "prompt_templates", "decision_matrix", "remote_clients"];

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_CHECK_FAILED };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::raw(exit_code, output);
    }

    CommandResult::raw(exit_code, render_human(&report))
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.extend(check_pipeline(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in CHECKS_AFTER_CONFIG {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_pipeline(config: &AppConfig) -> Vec<DoctorCheck> {
    let prompt_file = &config.pipeline.prompt_file;
    let book = match PromptBook::load_or_default(prompt_file) {
        Ok(book) => book,
        Err(error) => {
            return vec![
                DoctorCheck::fail("prompt_book", error.to_string()),
                DoctorCheck::skipped("prompt_templates", "the prompt book did not load"),
                DoctorCheck::skipped("decision_matrix", "the prompt book did not load"),
                check_remote_clients(config),
            ];
        }
    };

    let book_check = if prompt_file.exists() {
        let customized = TemplateId::ALL.iter().filter(|id| book.is_customized(**id)).count();
        DoctorCheck::pass(
            "prompt_book",
            format!(
                "loaded `{}` ({customized} of {} templates customized)",
                prompt_file.display(),
                TemplateId::ALL.len()
            ),
        )
    } else {
        DoctorCheck::pass(
            "prompt_book",
            format!("`{}` not found; using built-in prompts", prompt_file.display()),
        )
    };

    vec![
        book_check,
        check_templates(config, &book),
        check_matrix(&book),
        check_remote_clients(config),
    ]
}

fn check_templates(config: &AppConfig, book: &PromptBook) -> DoctorCheck {
    let client = match client_from_config(&config.llm) {
        Ok(client) => client,
        Err(error) => return DoctorCheck::fail("prompt_templates", error.to_string()),
    };
    match LanguageModelGateway::new(book, client) {
        Ok(_) => DoctorCheck::pass("prompt_templates", "all templates compile"),
        Err(error) => DoctorCheck::fail("prompt_templates", error.to_string()),
    }
}

fn check_matrix(book: &PromptBook) -> DoctorCheck {
    let matrix = match DecisionMatrix::parse(book.decision_matrix_text()) {
        Ok(matrix) => matrix,
        Err(error) => return DoctorCheck::fail("decision_matrix", error.to_string()),
    };

    let missing = matrix.missing_intents();
    if missing.is_empty() {
        return DoctorCheck::pass("decision_matrix", "every intent has a route");
    }
    let names = missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    DoctorCheck::fail("decision_matrix", format!("no route for: {names}"))
}

fn check_remote_clients(config: &AppConfig) -> DoctorCheck {
    if let Err(error) = HttpInferenceTransport::from_config(&config.inference) {
        return DoctorCheck::fail("remote_clients", error.to_string());
    }
    if let Err(error) = client_from_config(&config.llm) {
        return DoctorCheck::fail("remote_clients", error.to_string());
    }
    DoctorCheck::pass(
        "remote_clients",
        format!(
            "llm {:?} `{}`, intent `{}`, ner `{}`",
            config.llm.provider,
            config.llm.model,
            config.inference.intent.base_url,
            config.inference.ner.base_url
        ),
    )
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
