use std::io::{self, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::{generate, shells};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

const BIN_NAME: &str = "gridsync";

/// Write the completion script to `output_path`, or stdout when omitted.
pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let script = render_completions(shell);
    match output_path {
        Some(path) => {
            std::fs::write(path, &script)?;
            println!("Wrote {shell:?} completions to {}", path.display());
        }
        None => io::stdout().write_all(&script)?,
    }
    Ok(())
}

pub fn render_completions(shell: CompletionShell) -> Vec<u8> {
    let mut command = Cli::command();
    let mut script = Vec::new();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut command, BIN_NAME, &mut script),
        CompletionShell::Zsh => generate(shells::Zsh, &mut command, BIN_NAME, &mut script),
        CompletionShell::Fish => generate(shells::Fish, &mut command, BIN_NAME, &mut script),
    }
    script
}
