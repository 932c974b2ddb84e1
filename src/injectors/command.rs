use super::{InjectError, KeyInjector};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Injector that shells out to an external program for each transition,
/// e.g. `xdotool keydown {key}` / `xdotool keyup {key}`.
pub struct CommandInjector {
    program: String,
    down_args: Vec<String>,
    up_args: Vec<String>,
}

impl CommandInjector {
    pub fn new(program: String, down_args: Vec<String>, up_args: Vec<String>) -> Self {
        Self {
            program,
            down_args,
            up_args,
        }
    }

    async fn run(&self, template: &[String], key: &str) -> Result<(), InjectError> {
        let args = build_args(template, key);
        tracing::debug!(program = %self.program, args = ?args, "running injector");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| InjectError::Spawn {
                key: key.to_string(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match stderr.trim() {
            "" => output.status.to_string(),
            msg => format!("{}: {msg}", output.status),
        };
        Err(InjectError::Rejected {
            key: key.to_string(),
            detail,
        })
    }
}

/// Replace `{key}` placeholders with the key name.
fn build_args(template: &[String], key: &str) -> Vec<String> {
    template.iter().map(|arg| arg.replace("{key}", key)).collect()
}

#[async_trait]
impl KeyInjector for CommandInjector {
    fn name(&self) -> &str {
        "command"
    }

    async fn key_down(&self, key: &str) -> Result<(), InjectError> {
        self.run(&self.down_args, key).await
    }

    async fn key_up(&self, key: &str) -> Result<(), InjectError> {
        self.run(&self.up_args, key).await
    }
}
