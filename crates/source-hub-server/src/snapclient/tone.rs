//! Test tone playback on the configured ALSA device.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

const TONE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ToneError {
    #[error("failed to run {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} exited with code {code:?}: {stderr}")]
    Failed {
        path: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{path} did not finish within {timeout:?}")]
    TimedOut { path: String, timeout: Duration },
}

/// Plays one short sine burst through `speaker-test` (or a compatible command).
pub struct TonePlayer {
    command: PathBuf,
    device: String,
    timeout: Duration,
}

impl TonePlayer {
    pub fn new(command: PathBuf, device: String) -> Self {
        Self {
            command,
            device,
            timeout: TONE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn args(&self) -> Vec<String> {
        ["-D", self.device.as_str(), "-t", "sine", "-f", "440", "-c", "1", "-l", "1"]
            .iter()
            .map(|arg| arg.to_string())
            .collect()
    }

    pub async fn play(&self) -> Result<(), ToneError> {
        let path = self.command.display().to_string();
        tracing::info!(command = %path, device = %self.device, "playing test tone");
        let run = Command::new(&self.command)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(ToneError::Failed {
                path,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(source)) => Err(ToneError::Spawn { path, source }),
            Err(_) => Err(ToneError::TimedOut {
                path,
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapclient::process::write_script;

    #[test]
    fn args_target_configured_device() {
        let player = TonePlayer::new(PathBuf::from("speaker-test"), "plughw:1,0".to_string());
        let args = player.args();
        assert_eq!(&args[..2], &["-D".to_string(), "plughw:1,0".to_string()]);
        assert!(args.contains(&"sine".to_string()));
    }

    #[actix_web::test]
    async fn reports_player_failure_with_stderr() {
        let ok = TonePlayer::new(write_script("tone-ok", "exit 0"), "default".to_string());
        ok.play().await.unwrap();

        let broken = TonePlayer::new(
            write_script("tone-broken", "echo 'audio open error' >&2\nexit 1"),
            "default".to_string(),
        );
        match broken.play().await {
            Err(ToneError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "audio open error");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[actix_web::test]
    async fn hung_player_times_out() {
        let player = TonePlayer::new(write_script("tone-hang", "exec sleep 30"), "default".to_string())
            .with_timeout(Duration::from_millis(200));
        assert!(matches!(player.play().await, Err(ToneError::TimedOut { .. })));
    }

    #[actix_web::test]
    async fn missing_player_is_a_spawn_error() {
        let player = TonePlayer::new(PathBuf::from("/nonexistent/speaker-test"), "default".to_string());
        assert!(matches!(player.play().await, Err(ToneError::Spawn { .. })));
    }
}
