use std::process::ExitCode;

fn main() -> ExitCode {
    leviathan_cli::run()
}
