//! Supervision of the `cloudflared` connector process

use anyhow::{Context, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};
use tunsync_core::model::TunnelIdentity;

fn command(bin: &str, tunnel: &TunnelIdentity) -> Command {
    let mut cmd = Command::new(bin);
    cmd.args(["tunnel", "run", "--token"])
        .arg(&tunnel.token)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Running `cloudflared tunnel run` child
///
/// The child is killed if this handle is dropped.
pub struct TunnelProcess {
    child: Child,
}

impl TunnelProcess {
    /// Start `<bin> tunnel run --token <token>`
    ///
    /// The child inherits stdout and stderr. The token is passed on the
    /// command line and never logged.
    pub fn spawn(bin: &str, tunnel: &TunnelIdentity) -> Result<Self> {
        let child = command(bin, tunnel)
            .spawn()
            .with_context(|| format!("Failed to start tunnel process '{}'", bin))?;

        info!(
            "Tunnel process started (bin={}, tunnel={}, pid={:?})",
            bin,
            tunnel.id,
            child.id()
        );
        Ok(Self { child })
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .context("Failed to wait for tunnel process")
    }

    /// Stop the process, letting it drain its connections first
    ///
    /// Sends SIGTERM and waits up to `grace`; a process still running after
    /// that is killed.
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        info!("Stopping tunnel process");

        if self.send_sigterm() {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(status) => {
                    let status = status.context("Failed to wait for tunnel process")?;
                    info!("Tunnel process exited with {}", status);
                    return Ok(());
                }
                Err(_) => warn!(
                    "Tunnel process still running after {:?}, killing it",
                    grace
                ),
            }
        }

        self.child
            .kill()
            .await
            .context("Failed to stop tunnel process")
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: `pid` is our own child, which has not been reaped yet
        unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&self) -> bool {
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn identity() -> TunnelIdentity {
        TunnelIdentity::new("t-1", "tok-1")
    }

    fn script(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("cloudflared");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_command_line() {
        let cmd = command("cloudflared", &identity());
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "cloudflared");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, ["tunnel", "run", "--token", "tok-1"]);
    }

    #[tokio::test]
    async fn test_reports_exit_status() {
        let mut process = TunnelProcess::spawn("true", &identity()).unwrap();
        assert!(process.wait().await.unwrap().success());

        let mut process = TunnelProcess::spawn("false", &identity()).unwrap();
        assert!(!process.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("no-such-cloudflared");
        assert!(TunnelProcess::spawn(&bin.to_string_lossy(), &identity()).is_err());
    }

    #[tokio::test]
    async fn test_terminate_stops_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(&dir, "exec sleep 30");

        let process = TunnelProcess::spawn(&bin, &identity()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), process.terminate(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_terminate_lets_process_drain_on_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("drained");
        let bin = script(
            &dir,
            &format!(
                "trap 'echo drained > {}; exit 0' TERM\nwhile :; do sleep 0.1; done",
                marker.display()
            ),
        );

        let process = TunnelProcess::spawn(&bin, &identity()).unwrap();
        // Give the shell time to install its trap
        tokio::time::sleep(Duration::from_millis(300)).await;
        process.terminate(Duration::from_secs(5)).await.unwrap();

        assert_eq!(std::fs::read_to_string(marker).unwrap().trim(), "drained");
    }

    #[tokio::test]
    async fn test_terminate_kills_process_ignoring_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(&dir, "trap '' TERM\nwhile :; do sleep 0.1; done");

        let process = TunnelProcess::spawn(&bin, &identity()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::time::timeout(
            Duration::from_secs(5),
            process.terminate(Duration::from_millis(200)),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
