use crate::config::HelperConfig;
use crate::error::LaunchError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Type alias for a boxed helper run.
pub type LaunchTask = BoxFuture<'static, Result<(), LaunchError>>;

/// Starts the out-of-process step that walks a user through the scan.
///
/// The returned task is awaited in the background; the collaborator reports progress
/// through the callback endpoint, not through this return value. An `Err` is recorded as
/// a `failed` event on the session.
pub trait Collaborator: Send + Sync {
    fn launch(&self, session_id: &str) -> LaunchTask;
}

/// Nothing is started; events are expected to be posted to `/qq/callback` by whoever
/// drives the scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackOnly;

impl Collaborator for CallbackOnly {
    fn launch(&self, session_id: &str) -> LaunchTask {
        tracing::debug!(session = session_id, "No helper configured, waiting for callback");
        futures::future::ok::<(), LaunchError>(()).boxed()
    }
}

/// Runs a helper program once per session.
///
/// The session id is appended to the configured arguments. The helper also receives
/// `OIDC_SESSION_ID`, `OIDC_CALLBACK_URL` and `QR_CODE_PATH` in its environment, and is
/// killed when it outlives the session.
#[derive(Debug, Clone)]
pub struct HelperProcess {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    callback_url: String,
    qr_code_dir: PathBuf,
    timeout: Duration,
}

impl HelperProcess {
    pub fn from_config(config: &HelperConfig, qr_code_dir: &Path, timeout: Duration) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            callback_url: config.callback_url.clone(),
            qr_code_dir: qr_code_dir.to_path_buf(),
            timeout,
        }
    }

    /// Where the helper for `session_id` writes its scan image.
    pub fn qr_code_path(qr_code_dir: &Path, session_id: &str) -> PathBuf {
        qr_code_dir.join(format!("{session_id}.png"))
    }

    fn command(&self, session_id: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(session_id)
            .env("OIDC_SESSION_ID", session_id)
            .env("OIDC_CALLBACK_URL", &self.callback_url)
            .env(
                "QR_CODE_PATH",
                Self::qr_code_path(&self.qr_code_dir, session_id),
            )
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl Collaborator for HelperProcess {
    fn launch(&self, session_id: &str) -> LaunchTask {
        let mut cmd = self.command(session_id);
        let program = self.program.clone();
        let timeout = self.timeout;
        let session_id = session_id.to_string();

        async move {
            let mut child = cmd
                .spawn()
                .map_err(|source| LaunchError::Spawn { program, source })?;
            tracing::info!(session = %session_id, pid = ?child.id(), "External login helper started");

            let status = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(LaunchError::TimedOut(timeout));
                }
            };

            if status.success() {
                tracing::debug!(session = %session_id, "External login helper exited");
                Ok(())
            } else {
                Err(LaunchError::Exit(status))
            }
        }
        .boxed()
    }
}
