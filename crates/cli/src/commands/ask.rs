use leviathan_agent::runtime::AgentRuntime;
use leviathan_core::config::LoadOptions;
use leviathan_core::domain::history::SessionId;
use serde_json::json;

use crate::commands::{block_on, load_config, CommandResult, EXIT_PIPELINE, EXIT_STARTUP};

pub fn run(options: LoadOptions, text: &str, session: Option<String>) -> CommandResult {
    let config = match load_config("ask", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match AgentRuntime::from_config(&config) {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure("ask", "startup", error.to_string(), EXIT_STARTUP);
        }
    };

    let session = session.map(SessionId).unwrap_or_else(SessionId::generate);
    block_on("ask", ask(&runtime, &session, text))
}

/// Runs one utterance and renders `{session_id, result}` as pretty JSON.
pub async fn ask(runtime: &AgentRuntime, session: &SessionId, text: &str) -> CommandResult {
    match runtime.handle_message(session, text).await {
        Ok(result) => {
            let rendered = serde_json::to_value(&result).and_then(|result| {
                serde_json::to_string_pretty(
                    &json!({ "session_id": session.as_str(), "result": result }),
                )
            });
            match rendered {
                Ok(output) => CommandResult::raw(0, output),
                Err(error) => CommandResult::failure(
                    "ask",
                    "serialization",
                    error.to_string(),
                    EXIT_PIPELINE,
                ),
            }
        }
        Err(error) => CommandResult::failure(
            "ask",
            &format!("{}_stage", error.stage),
            error.user_message(),
            EXIT_PIPELINE,
        ),
    }
}
