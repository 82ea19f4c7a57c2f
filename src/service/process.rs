//! OS process helpers: detached spawn, liveness, tree termination, and
//! bounded one-shot commands.

use crate::error::{validate_pid, validate_pid_for_check, Error, Result};
use nix::sys::signal::{self, Signal};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

const SHELL: &str = "/bin/sh";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_LOG_NAME_LEN: usize = 60;

/// `<log_dir>/<sanitized name>-<id>.log`.
///
/// The name keeps ASCII alphanumerics, `-` and `_`; everything else becomes
/// `_`, truncated to 60 characters.
pub fn log_file_path(log_dir: &Path, service_name: &str, service_id: &str) -> PathBuf {
    let safe_name: String = service_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_LOG_NAME_LEN)
        .collect();
    log_dir.join(format!("{}-{}.log", safe_name, service_id))
}

/// Spawn `command` through the shell in its own process group, with stdout
/// and stderr appended to `log_path`. Returns the child's pid.
///
/// The child is not killed when the controller exits. While the controller
/// runs, a background task reaps it so an exited child never lingers as a
/// zombie.
pub async fn spawn_detached(
    command: &str,
    working_directory: Option<&Path>,
    env: &HashMap<OsString, OsString>,
    log_path: &Path,
) -> Result<u32> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let stderr = stdout.try_clone()?;

    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(command)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(false)
        .process_group(0);
    if let Some(dir) = working_directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| Error::Process("spawned process exited before reporting a pid".to_string()))?;

    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::debug!("Process {} exited with {}", pid, status),
            Err(e) => tracing::debug!("Failed to reap process {}: {}", pid, e),
        }
    });

    Ok(pid)
}

/// Whether `pid` is a live process that is not a zombie.
pub async fn is_process_alive(pid: u32) -> bool {
    let Some(nix_pid) = validate_pid_for_check(pid) else {
        return false;
    };
    if signal::kill(nix_pid, None).is_err() {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        let proc_status_path = format!("/proc/{}/status", pid);
        if let Ok(status_content) = tokio::fs::read_to_string(&proc_status_path).await {
            if let Some(line) = status_content.lines().find(|l| l.starts_with("State:")) {
                // "State:\tZ (zombie)"
                if let Some(state) = line.chars().skip("State:".len()).find(|c| c.is_alphabetic()) {
                    return !matches!(state, 'Z' | 'X' | 'x');
                }
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let output = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "stat="])
            .output()
            .await;
        if let Ok(output) = output {
            if output.status.success() {
                let stat = String::from_utf8_lossy(&output.stdout);
                return !stat.trim().starts_with('Z');
            }
        }
    }

    true
}

/// Parse `ps -A -o pid=,ppid=` output into `(pid, ppid)` pairs.
fn parse_process_table(output: &str) -> Vec<(u32, u32)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

/// All descendants of `root`, parents before children.
fn descendants(table: &[(u32, u32)], root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in table {
        children.entry(ppid).or_default().push(pid);
    }

    let mut seen = HashSet::from([root]);
    let mut out = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for &child in children.get(&parent).into_iter().flatten() {
            if seen.insert(child) {
                out.push(child);
                frontier.push(child);
            }
        }
    }
    out
}

/// Recursive children of `pid` as reported by `ps`.
pub async fn child_pids(pid: u32) -> Vec<u32> {
    match Command::new("ps").args(["-A", "-o", "pid=,ppid="]).output().await {
        Ok(output) if output.status.success() => {
            let table = parse_process_table(&String::from_utf8_lossy(&output.stdout));
            descendants(&table, pid)
        }
        Ok(output) => {
            tracing::debug!("ps exited with {} while listing children of {}", output.status, pid);
            Vec::new()
        }
        Err(e) => {
            tracing::debug!("Could not run ps to list children of {}: {}", pid, e);
            Vec::new()
        }
    }
}

/// Terminate `pid` and its descendants.
///
/// Children get SIGTERM first, then the parent. After up to `grace`, any
/// survivor gets SIGKILL. PIDs 0 and 1 and the controller's own pid are never
/// signalled.
pub async fn terminate_tree(pid: u32, service_name: &str, grace: Duration) -> Result<()> {
    let parent = validate_pid(pid, service_name)?;
    if !is_process_alive(pid).await {
        return Ok(());
    }

    let mut targets = Vec::new();
    for child in child_pids(pid).await {
        match validate_pid(child, service_name) {
            Ok(p) => targets.push((child, p)),
            Err(e) => tracing::warn!("Skipping child of '{}': {}", service_name, e),
        }
    }
    targets.push((pid, parent));

    for (raw, target) in &targets {
        if let Err(e) = signal::kill(*target, Signal::SIGTERM) {
            tracing::debug!("SIGTERM to {} ({}) failed: {}", raw, service_name, e);
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let mut alive = false;
        for (raw, _) in &targets {
            if is_process_alive(*raw).await {
                alive = true;
                break;
            }
        }
        if !alive || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    for (raw, target) in &targets {
        if is_process_alive(*raw).await {
            tracing::warn!(
                "Process {} of '{}' did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
                raw,
                service_name,
                grace
            );
            let _ = signal::kill(*target, Signal::SIGKILL);
        }
    }

    Ok(())
}

/// Run a one-shot shell command to completion within `timeout`.
///
/// Fails only when the command cannot be spawned or runs past `timeout` (it
/// is then killed). Any exit status, zero or not, is returned as-is.
pub async fn run_command(
    command: &str,
    working_directory: Option<&Path>,
    env: &HashMap<OsString, OsString>,
    timeout: Duration,
) -> Result<ExitStatus> {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(command)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_directory {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn()?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::Process(format!(
                "command timed out after {}s: {}",
                timeout.as_secs(),
                command
            )))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!("`{}` exited with {}: {}", command, output.status, stderr.trim());
    }
    Ok(output.status)
}
