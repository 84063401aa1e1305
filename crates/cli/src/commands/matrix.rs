use std::fs;
use std::path::Path;

use leviathan_core::config::LoadOptions;
use leviathan_core::decision_matrix::DecisionMatrix;
use leviathan_core::errors::DecisionMatrixError;
use leviathan_core::prompts::PromptBook;
use leviathan_core::table::DelimitedTable;
use tracing::warn;

use crate::commands::{load_config, CommandResult, EXIT_CHECK_FAILED, EXIT_IO, EXIT_STARTUP};

pub fn show(options: LoadOptions) -> CommandResult {
    let (book, matrix) = match load_matrix("matrix show", options) {
        Ok(loaded) => loaded,
        Err(result) => return result,
    };

    let mut lines = vec![book.decision_matrix_text().to_string(), String::new()];
    for entry in matrix.entries() {
        lines.push(format!(
            "- {} -> knowledge_base={} entity_extraction={}",
            entry.intent, entry.knowledge_base, entry.requires_entity_extraction
        ));
    }
    for intent in matrix.missing_intents() {
        lines.push(format!("- {intent} -> <no row>"));
    }
    CommandResult::raw(0, lines.join("\n"))
}

pub fn check(options: LoadOptions) -> CommandResult {
    let (_, matrix) = match load_matrix("matrix check", options) {
        Ok(loaded) => loaded,
        Err(result) => return result,
    };

    let missing = matrix.missing_intents();
    if missing.is_empty() {
        return CommandResult::success(
            "matrix check",
            format!("decision matrix routes all {} intents", matrix.entries().count()),
        );
    }

    let names = missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    CommandResult::failure(
        "matrix check",
        "decision_matrix_incomplete",
        format!("no decision matrix row for: {names}"),
        EXIT_CHECK_FAILED,
    )
}

/// Replaces the stored matrix with a CSV export, keeping every other key of
/// the prompt file. The CSV is validated as a matrix before anything is
/// written.
pub fn import(options: LoadOptions, csv_path: &Path, delimiter: char) -> CommandResult {
    let command = "matrix import";
    let config = match load_config(command, options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let raw = match fs::read_to_string(csv_path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                command,
                "io",
                format!("could not read `{}`: {error}", csv_path.display()),
                EXIT_IO,
            );
        }
    };

    let imported = DelimitedTable::from_csv(&raw, delimiter)
        .map_err(DecisionMatrixError::from)
        .and_then(DecisionMatrix::from_table)
        .and_then(|matrix| matrix.to_text().map(|text| (matrix, text)));
    let (matrix, text) = match imported {
        Ok(imported) => imported,
        Err(error) => {
            return CommandResult::failure(
                command,
                "decision_matrix_invalid",
                error.to_string(),
                EXIT_CHECK_FAILED,
            );
        }
    };

    let missing = matrix.missing_intents();
    if !missing.is_empty() {
        warn!(
            event_name = "matrix.import_incomplete",
            missing = missing.len(),
            "imported decision matrix leaves intents unrouted"
        );
    }

    let prompt_file = &config.pipeline.prompt_file;
    let saved = PromptBook::load_or_default(prompt_file)
        .and_then(|book| book.with_decision_matrix(text).save(prompt_file));
    match saved {
        Ok(()) => CommandResult::success(
            command,
            format!(
                "decision matrix with {} rows written to `{}`",
                matrix.entries().count(),
                prompt_file.display()
            ),
        ),
        Err(error) => CommandResult::failure(command, "prompt_book", error.to_string(), EXIT_IO),
    }
}

fn load_matrix(
    command: &str,
    options: LoadOptions,
) -> Result<(PromptBook, DecisionMatrix), CommandResult> {
    let config = load_config(command, options)?;
    let book = PromptBook::load_or_default(&config.pipeline.prompt_file).map_err(|error| {
        CommandResult::failure(command, "prompt_book", error.to_string(), EXIT_STARTUP)
    })?;
    let matrix = DecisionMatrix::parse(book.decision_matrix_text()).map_err(|error| {
        CommandResult::failure(command, "decision_matrix_invalid", error.to_string(), EXIT_STARTUP)
    })?;
    Ok((book, matrix))
}
