use crate::error::{self, Result};
use log::trace;
use snafu::ResultExt;
use std::path::Path;
use tokio::process::Command;

/// The outcome of a finished child process.
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub(crate) success: bool,
    pub(crate) code: i32,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, the way a terminal would have shown them.
    pub(crate) fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs `program` with `args` to completion. A non-zero exit is not an error here, callers decide
/// how to report it.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<CommandOutput> {
    run_in(program, args, None).await
}

/// Like [`run`] but with `dir` as the working directory.
pub(crate) async fn run_in(
    program: &str,
    args: &[String],
    dir: Option<&Path>,
) -> Result<CommandOutput> {
    trace!("Running '{} {}'", program, args.join(" "));
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .await
        .context(error::ProcessSnafu { what: program })?;
    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
