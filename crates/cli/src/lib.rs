pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use leviathan_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "leviathan",
    about = "Leviathan shopping assistant CLI",
    long_about = "Chat with the Leviathan pipeline, inspect configuration, and manage the decision matrix.",
    after_help = "Examples:\n  leviathan ask \"quiero una camisa roja\"\n  leviathan chat\n  leviathan doctor --json\n  leviathan matrix import matrix.csv --delimiter ';'"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Path to a leviathan.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, value_parser = parse_provider, help = "Override llm.provider")]
    llm_provider: Option<LlmProvider>,
    #[arg(long, global = true, help = "Override llm.model")]
    llm_model: Option<String>,
    #[arg(long, global = true, help = "Override pipeline.prompt_file")]
    prompt_file: Option<PathBuf>,
}

impl GlobalArgs {
    fn load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                log_level: self.log_level,
                llm_provider: self.llm_provider,
                llm_model: self.llm_model,
                prompt_file: self.prompt_file,
                ..ConfigOverrides::default()
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive conversation (/new starts over, /quit exits)")]
    Chat {
        #[arg(long, help = "Resume with this session id instead of a fresh one")]
        session: Option<String>,
    },
    #[command(about = "Run one utterance through the pipeline and print the merged result")]
    Ask {
        text: String,
        #[arg(long, help = "Session id used for conversation history")]
        session: Option<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, prompt templates, and decision matrix coverage")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Show, check, or import the decision matrix")]
    Matrix(MatrixCommand),
}

#[derive(Debug, Subcommand)]
enum MatrixCommand {
    #[command(about = "Print the decision matrix stored in the prompt file")]
    Show,
    #[command(about = "Fail when an intent has no decision matrix row")]
    Check,
    #[command(about = "Replace the decision matrix with the contents of a CSV file")]
    Import {
        csv: PathBuf,
        #[arg(long, default_value_t = ';', help = "CSV field delimiter")]
        delimiter: char,
    },
}

fn parse_provider(value: &str) -> Result<LlmProvider, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "openai" | "open_ai" => Ok(LlmProvider::OpenAi),
        "ollama" => Ok(LlmProvider::Ollama),
        other => Err(format!("unknown llm provider `{other}` (expected openai or ollama)")),
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();

    let result = match cli.command {
        Command::Chat { session } => commands::chat::run(options, session),
        Command::Ask { text, session } => commands::ask::run(options, &text, session),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Matrix(MatrixCommand::Show) => commands::matrix::show(options),
        Command::Matrix(MatrixCommand::Check) => commands::matrix::check(options),
        Command::Matrix(MatrixCommand::Import { csv, delimiter }) => {
            commands::matrix::import(options, &csv, delimiter)
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
