//! Spawner that runs the single-user server as a local child process.
//!
//! The child's pid is the resume state: a restarted hub can still poll and
//! signal a server it did not launch itself. Stopping escalates from
//! SIGINT to SIGTERM to SIGKILL, waiting a configurable time after each.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::monitor::{ExitCallback, LivenessMonitor};
use super::{PollStatus, Spawner, SpawnerOptions};
use crate::config::SpawnerConfig;
use crate::{AppError, BoxFuture, Result};

/// Interval between polls while waiting for a signalled process to exit.
const DEATH_INTERVAL: Duration = Duration::from_millis(100);

/// Pick a free TCP port on the loopback interface.
///
/// # Errors
///
/// Returns `AppError::Io` if no socket can be bound.
pub fn random_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Escalation stages used by [`Spawner::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Probe,
    Interrupt,
    Terminate,
    Kill,
}

#[derive(Debug, Default)]
struct ProcessState {
    child: Option<Child>,
    pid: u32,
}

impl ProcessState {
    fn clear(&mut self) {
        self.child = None;
        self.pid = 0;
    }

    fn poll(&mut self) -> Result<PollStatus> {
        if let Some(child) = self.child.as_mut() {
            return match child.try_wait()? {
                Some(status) => {
                    self.clear();
                    Ok(PollStatus::Exited(status.code().unwrap_or(0)))
                }
                None => Ok(PollStatus::Running),
            };
        }

        // Resumed from stored state: no child handle, only the pid.
        if self.pid == 0 {
            return Ok(PollStatus::Exited(0));
        }
        if signal(self.pid, None, Stage::Probe)? {
            Ok(PollStatus::Running)
        } else {
            self.clear();
            Ok(PollStatus::Exited(0))
        }
    }

    fn signal(&mut self, stage: Stage) -> Result<bool> {
        if self.pid == 0 {
            return Ok(false);
        }
        signal(self.pid, self.child.as_mut(), stage)
    }
}

#[cfg(unix)]
fn signal(pid: u32, _child: Option<&mut Child>, stage: Stage) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Backend(format!("pid out of range: {pid}")))?;
    let sig = match stage {
        Stage::Probe => None,
        Stage::Interrupt => Some(Signal::SIGINT),
        Stage::Terminate => Some(Signal::SIGTERM),
        Stage::Kill => Some(Signal::SIGKILL),
    };
    match kill(Pid::from_raw(raw), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(AppError::Backend(format!("failed to signal {pid}: {err}"))),
    }
}

#[cfg(not(unix))]
fn signal(_pid: u32, child: Option<&mut Child>, stage: Stage) -> Result<bool> {
    match child {
        Some(child) if stage != Stage::Probe => {
            child.start_kill()?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Launches the configured command as a child of the hub process.
pub struct LocalProcessSpawner {
    options: SpawnerOptions,
    config: SpawnerConfig,
    process: Arc<Mutex<ProcessState>>,
    monitor: Option<LivenessMonitor>,
    exit_callbacks: Vec<ExitCallback>,
}

impl LocalProcessSpawner {
    /// Spawner using the given backend settings.
    #[must_use]
    pub fn new(config: SpawnerConfig) -> Self {
        let mut options = SpawnerOptions::default();
        options.start_timeout = config.start_timeout();
        options.http_timeout = config.http_timeout();
        options.poll_interval = config.poll_interval();
        Self {
            options,
            config,
            process: Arc::new(Mutex::new(ProcessState::default())),
            monitor: None,
            exit_callbacks: Vec::new(),
        }
    }

    /// Register a callback fired when the liveness monitor sees the process
    /// exit. Explicit stops do not trigger it.
    pub fn add_exit_callback(&mut self, callback: ExitCallback) {
        self.exit_callbacks.push(callback);
    }

    /// Pid of the managed process, 0 when none.
    #[must_use]
    pub fn pid(&self) -> u32 {
        lock(&self.process).pid
    }

    /// Arguments passed after the configured command.
    #[must_use]
    pub fn get_args(&self, port: u16) -> Vec<String> {
        let base_url = self
            .options
            .server
            .as_ref()
            .map_or("/", |server| server.base_url.as_str());
        let mut args = vec![
            format!("--user={}", self.options.user_name),
            format!("--port={port}"),
            format!("--base-url={base_url}"),
            format!("--hub-prefix={}", self.options.hub.prefix),
            format!("--hub-api-url={}", self.options.hub.api_url),
        ];
        if !self.config.ip.is_empty() {
            args.push(format!("--ip={}", self.config.ip));
        }
        if !self.config.notebook_dir.is_empty() {
            args.push(format!("--notebook-dir={}", self.config.notebook_dir));
        }
        if self.config.debug {
            args.push("--debug".into());
        }
        args.extend(self.config.args.iter().cloned());
        args
    }

    /// Environment for the child: whitelisted hub variables plus credentials.
    #[must_use]
    pub fn get_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .config
            .env_keep
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect();
        env.insert("HUB_API_TOKEN".into(), self.options.api_token.clone());
        env.insert("USER".into(), self.options.user_name.clone());
        env
    }

    fn poll_now(&self) -> Result<PollStatus> {
        lock(&self.process).poll()
    }

    fn send(&self, stage: Stage) -> Result<bool> {
        lock(&self.process).signal(stage)
    }

    async fn wait_for_death(&self, timeout: Duration) -> Result<PollStatus> {
        let steps = timeout.as_millis() / DEATH_INTERVAL.as_millis();
        for _ in 0..steps {
            if let PollStatus::Exited(code) = self.poll_now()? {
                return Ok(PollStatus::Exited(code));
            }
            tokio::time::sleep(DEATH_INTERVAL).await;
        }
        self.poll_now()
    }

    async fn escalate(&self, now: bool) -> Result<()> {
        let stages = [
            (Stage::Interrupt, self.config.interrupt_timeout_seconds),
            (Stage::Terminate, self.config.term_timeout_seconds),
            (Stage::Kill, self.config.kill_timeout_seconds),
        ];
        let skip = usize::from(now);
        for (stage, wait) in stages.into_iter().skip(skip) {
            if let PollStatus::Exited(_) = self.poll_now()? {
                return Ok(());
            }
            debug!(pid = self.pid(), ?stage, "signalling single-user server");
            self.send(stage)?;
            if let PollStatus::Exited(_) = self.wait_for_death(Duration::from_secs(wait)).await? {
                return Ok(());
            }
        }
        warn!(pid = self.pid(), "process never died");
        Ok(())
    }
}

fn lock(process: &Mutex<ProcessState>) -> MutexGuard<'_, ProcessState> {
    process.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Spawner for LocalProcessSpawner {
    fn options(&self) -> &SpawnerOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SpawnerOptions {
        &mut self.options
    }

    fn load_state(&mut self, state: &Value) {
        if let Some(pid) = state
            .get("pid")
            .and_then(Value::as_u64)
            .and_then(|pid| u32::try_from(pid).ok())
        {
            lock(&self.process).pid = pid;
        }
    }

    fn get_state(&self) -> Value {
        match self.pid() {
            0 => Value::Object(Map::new()),
            pid => json!({ "pid": pid }),
        }
    }

    fn clear_state(&mut self) {
        self.options.api_token.clear();
        lock(&self.process).clear();
    }

    fn start(&mut self) -> BoxFuture<'_, Result<Option<(String, u16)>>> {
        Box::pin(async move {
            let (program, base_args) = self
                .config
                .cmd
                .split_first()
                .ok_or_else(|| AppError::Config("spawner.cmd must not be empty".into()))?;
            let port = random_port()?;

            let mut cmd = Command::new(program);
            cmd.args(base_args)
                .args(self.get_args(port))
                .env_clear()
                .envs(self.get_env())
                .stdin(Stdio::null())
                .kill_on_drop(false);

            let child = cmd
                .spawn()
                .map_err(|err| AppError::Backend(format!("failed to spawn {program}: {err}")))?;
            let pid = child.id().unwrap_or(0);
            info!(
                user = %self.options.user_name,
                pid,
                port,
                cmd = %self.config.cmd.join(" "),
                "single-user server process spawned"
            );

            let mut process = lock(&self.process);
            process.pid = pid;
            process.child = Some(child);
            drop(process);

            Ok(Some((self.config.ip.clone(), port)))
        })
    }

    fn poll(&mut self) -> BoxFuture<'_, Result<PollStatus>> {
        let status = self.poll_now();
        Box::pin(async move { status })
    }

    fn stop(&mut self, now: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.escalate(now).await })
    }

    fn start_polling(&mut self) {
        let interval = self.options.poll_interval;
        if interval.is_zero() {
            debug!(user = %self.options.user_name, "not polling subprocess");
            return;
        }
        self.stop_polling();

        let process = Arc::clone(&self.process);
        self.monitor = Some(LivenessMonitor::start(
            self.options.user_name.clone(),
            interval,
            move || {
                let status = lock(&process).poll();
                async move { status }
            },
            self.exit_callbacks.clone(),
        ));
    }

    fn stop_polling(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}
