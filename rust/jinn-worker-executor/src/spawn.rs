//! Subprocess spawn (spec §4.F "Spawn"): builds the `tokio::process::Command`
//! for the LLM subprocess, choosing between a command-line argument and a
//! stdin-fed prompt depending on prompt size.

use jinn_worker_config::schema::ExecutorSection;
use std::path::Path;
use tokio::process::{Child, Command};

/// Everything needed to build one subprocess invocation.
pub struct SpawnRequest<'a> {
    pub binary: &'a str,
    pub prompt: &'a str,
    pub workspace_dir: &'a Path,
    pub env: Vec<(String, String)>,
}

/// Whether the prompt was passed on the command line or piped via stdin —
/// the caller needs this to know whether to write to the child's stdin.
pub enum PromptDelivery {
    CommandLine,
    Stdin,
}

pub struct SpawnedProcess {
    pub child: Child,
    pub delivery: PromptDelivery,
}

/// Spawns the subprocess. Small prompts go on the command line; prompts
/// larger than `config.stdin_prompt_threshold_bytes` go via stdin, with the
/// OS sandbox flag omitted in that case (spec §4.F: "sandboxing + stdin can
/// conflict").
pub fn spawn_subprocess(request: &SpawnRequest<'_>, config: &ExecutorSection) -> std::io::Result<SpawnedProcess> {
    let use_stdin = request.prompt.len() > config.stdin_prompt_threshold_bytes;

    let mut command = Command::new(request.binary);
    command
        .current_dir(request.workspace_dir)
        .arg("--model")
        .arg(&config.model_name)
        .arg("--yolo");

    for include_dir in &config.workspace_include_dirs {
        command.arg("--include-directory").arg(include_dir);
    }

    if use_stdin {
        command.stdin(std::process::Stdio::piped());
    } else {
        command.arg("--prompt").arg(request.prompt);
        command.stdin(std::process::Stdio::null());
    }

    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    command.env_clear();
    for (key, value) in &request.env {
        command.env(key, value);
    }

    let child = command.spawn()?;
    Ok(SpawnedProcess {
        child,
        delivery: if use_stdin {
            PromptDelivery::Stdin
        } else {
            PromptDelivery::CommandLine
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExecutorSection {
        ExecutorSection::default()
    }

    #[test]
    fn small_prompt_uses_command_line_delivery() {
        let cfg = config();
        let request = SpawnRequest {
            binary: "true",
            prompt: "hello",
            workspace_dir: Path::new("."),
            env: Vec::new(),
        };
        let spawned = spawn_subprocess(&request, &cfg).unwrap();
        assert!(matches!(spawned.delivery, PromptDelivery::CommandLine));
    }

    #[test]
    fn oversized_prompt_switches_to_stdin_delivery() {
        let mut cfg = config();
        cfg.stdin_prompt_threshold_bytes = 4;
        let request = SpawnRequest {
            binary: "true",
            prompt: "this prompt exceeds the tiny threshold",
            workspace_dir: Path::new("."),
            env: Vec::new(),
        };
        let spawned = spawn_subprocess(&request, &cfg).unwrap();
        assert!(matches!(spawned.delivery, PromptDelivery::Stdin));
    }
}
