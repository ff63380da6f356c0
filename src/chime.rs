//! Chime backed by external commands: a sound player, then text-to-speech.

use async_trait::async_trait;
use doorbell_core::{config::ChimeConfig, error::DoorbellError, shellexpand, traits::Chime};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub struct CommandChime {
    sound_command: Vec<String>,
    tts_command: Vec<String>,
}

impl CommandChime {
    pub fn new(config: &ChimeConfig) -> Self {
        let expand = |argv: &[String]| -> Vec<String> { argv.iter().map(|a| shellexpand(a)).collect() };
        Self {
            sound_command: expand(&config.sound_command),
            tts_command: expand(&config.tts_command),
        }
    }
}

/// Run `argv` (plus an optional trailing argument) to completion.
/// An empty `argv` is a no-op.
async fn run(argv: &[String], extra: Option<&str>) -> Result<(), DoorbellError> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null());
    if let Some(extra) = extra {
        cmd.arg(extra);
    }

    debug!("chime: running {program}");
    let status = cmd
        .status()
        .await
        .map_err(|e| DoorbellError::Chime(format!("failed to run {program}: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(DoorbellError::Chime(format!("{program} exited with {status}")))
    }
}

#[async_trait]
impl Chime for CommandChime {
    async fn ring(&self, announcement: &str) -> Result<(), DoorbellError> {
        run(&self.sound_command, None).await?;
        run(&self.tts_command, Some(announcement)).await
    }
}
