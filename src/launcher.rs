//! Local process-group launcher.
//!
//! `lloyd-mesh launch` starts `P` copies of a program on this machine, one
//! per rank, with the rank environment set. The group succeeds or fails as a
//! unit: as soon as one child exits unsuccessfully the others are killed.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const RANK_ENV: &str = "LLOYD_RANK";
pub const WORLD_SIZE_ENV: &str = "LLOYD_WORLD_SIZE";
pub const COORDINATOR_ENV: &str = "LLOYD_COORDINATOR";
pub const TOKEN_ENV: &str = "LLOYD_RUN_TOKEN";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How to start one process group
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub workers: usize,
    pub coordinator: SocketAddr,
    pub token: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl LaunchPlan {
    /// Plan to run the current executable with `args` on every rank
    pub fn new(workers: usize, coordinator: SocketAddr, args: Vec<OsString>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self {
            workers,
            coordinator,
            token: Uuid::new_v4().simple().to_string(),
            program,
            args,
        })
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Command line and environment for `rank`
    pub fn command(&self, rank: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(RANK_ENV, rank.to_string())
            .env(WORLD_SIZE_ENV, self.workers.to_string())
            .env(COORDINATOR_ENV, self.coordinator.to_string())
            .env(TOKEN_ENV, &self.token);
        cmd
    }

    /// Start every rank and wait for the group to finish
    pub fn run(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("A process group needs at least one worker");
        }
        info!(
            workers = self.workers,
            coordinator = %self.coordinator,
            program = %self.program.display(),
            "launching process group"
        );

        let mut children: Vec<Option<Child>> = Vec::with_capacity(self.workers);
        for rank in 0..self.workers {
            match self.command(rank).spawn() {
                Ok(child) => children.push(Some(child)),
                Err(e) => {
                    kill_all(&mut children);
                    return Err(e).with_context(|| format!("Failed to spawn rank {}", rank));
                }
            }
        }

        let mut remaining = self.workers;
        while remaining > 0 {
            for rank in 0..children.len() {
                let status = match children[rank].as_mut().map(Child::try_wait) {
                    Some(Ok(Some(status))) => status,
                    Some(Ok(None)) | None => continue,
                    Some(Err(e)) => {
                        kill_all(&mut children);
                        return Err(e).with_context(|| format!("Failed to poll rank {}", rank));
                    }
                };
                children[rank] = None;
                remaining -= 1;

                if !status.success() {
                    error!(rank, status = %describe(status), "rank failed, stopping the group");
                    kill_all(&mut children);
                    bail!("Rank {} exited with {}", rank, describe(status));
                }
                info!(rank, "rank finished");
            }
            if remaining > 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }
}

fn kill_all(children: &mut [Option<Child>]) {
    for (rank, slot) in children.iter_mut().enumerate() {
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.kill() {
                warn!(rank, error = %e, "failed to kill rank");
            }
            let _ = child.wait();
        }
    }
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::time::Instant;

    fn plan(workers: usize, script: &str) -> LaunchPlan {
        LaunchPlan::new(
            workers,
            "127.0.0.1:7070".parse().unwrap(),
            vec!["-c".into(), script.into()],
        )
        .unwrap()
        .with_program("/bin/sh")
    }

    #[test]
    fn test_command_sets_rank_environment() {
        let plan = plan(3, "true");
        let cmd = plan.command(2);
        let envs: Vec<(&OsStr, Option<&OsStr>)> = cmd.get_envs().collect();

        let get = |key: &str| {
            envs.iter()
                .find(|(k, _)| *k == OsStr::new(key))
                .and_then(|(_, v)| *v)
                .map(|v| v.to_string_lossy().into_owned())
        };
        assert_eq!(get(RANK_ENV).as_deref(), Some("2"));
        assert_eq!(get(WORLD_SIZE_ENV).as_deref(), Some("3"));
        assert_eq!(get(COORDINATOR_ENV).as_deref(), Some("127.0.0.1:7070"));
        assert_eq!(get(TOKEN_ENV), Some(plan.token.clone()));
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), vec!["-c", "true"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_group_succeeds() {
        plan(3, "test \"$LLOYD_WORLD_SIZE\" = 3").run().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_rank_stops_the_group() {
        let started = Instant::now();
        let err = plan(3, "if [ \"$LLOYD_RANK\" = 1 ]; then exit 3; fi; sleep 30")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Rank 1 exited with exit code 3"));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn test_empty_group_is_rejected() {
        assert!(plan(0, "true").run().is_err());
    }
}
