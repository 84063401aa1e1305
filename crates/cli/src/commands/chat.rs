use std::io::{self, BufRead, Write};

use leviathan_agent::runtime::AgentRuntime;
use leviathan_core::config::LoadOptions;
use leviathan_core::domain::history::SessionId;
use tracing::{info, warn};

use crate::commands::{block_on, load_config, CommandResult, EXIT_IO, EXIT_STARTUP};

const PROMPT: &str = "you> ";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatSummary {
    pub answered: usize,
    pub failed: usize,
    pub sessions: Vec<SessionId>,
}

pub fn run(options: LoadOptions, session: Option<String>) -> CommandResult {
    let config = match load_config("chat", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match AgentRuntime::from_config(&config) {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure("chat", "startup", error.to_string(), EXIT_STARTUP);
        }
    };

    let session = session.map(SessionId).unwrap_or_else(SessionId::generate);
    block_on("chat", async move {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        match converse(&runtime, session, stdin.lock(), &mut stdout).await {
            Ok(_) => CommandResult::raw(0, ""),
            Err(error) => CommandResult::failure("chat", "io", error.to_string(), EXIT_IO),
        }
    })
}

/// Reads utterances line by line until `/quit` or end of input.
///
/// `/new` forgets the current session's history and continues under a fresh
/// session id. A failed turn prints its user-facing message and the loop
/// carries on.
pub async fn converse<R, W>(
    runtime: &AgentRuntime,
    mut session: SessionId,
    input: R,
    output: &mut W,
) -> io::Result<ChatSummary>
where
    R: BufRead,
    W: Write,
{
    let mut summary = ChatSummary { sessions: vec![session.clone()], ..ChatSummary::default() };
    writeln!(output, "session {session} (type /new to start over, /quit to leave)")?;
    write!(output, "{PROMPT}")?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;
        let text = line.trim();

        match text {
            "" => {}
            "/quit" => break,
            "/new" => {
                if let Err(error) = runtime.end_session(&session).await {
                    warn!(
                        session_id = %session,
                        error = %error,
                        "could not clear session history"
                    );
                }
                session = SessionId::generate();
                info!(event_name = "chat.session_started", session_id = %session, "new session");
                summary.sessions.push(session.clone());
                writeln!(output, "session {session}")?;
            }
            utterance => match runtime.handle_message(&session, utterance).await {
                Ok(result) => {
                    let rendered = serde_json::to_string_pretty(&result)
                        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
                    writeln!(output, "{rendered}")?;
                    summary.answered += 1;
                }
                Err(error) => {
                    writeln!(output, "{}", error.user_message())?;
                    summary.failed += 1;
                }
            },
        }

        write!(output, "{PROMPT}")?;
        output.flush()?;
    }

    writeln!(output)?;
    Ok(summary)
}
