use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, trace, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

pub use parse::ParsedHop;

mod parse;

/// Report cycles for mtr; kept low so one probe stays well under the
/// subprocess timeout.
const MTR_CYCLES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceTool {
    Scamper,
    Traceroute,
    Mtr,
}

impl TraceTool {
    pub fn from_name(name: &str) -> Option<TraceTool> {
        match name {
            "scamper" => Some(TraceTool::Scamper),
            "traceroute" => Some(TraceTool::Traceroute),
            "mtr" => Some(TraceTool::Mtr),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TraceTool::Scamper => "scamper",
            TraceTool::Traceroute => "traceroute",
            TraceTool::Mtr => "mtr",
        }
    }

    fn command(&self, target: IpAddr) -> Command {
        let mut cmd = Command::new(self.name());
        match self {
            TraceTool::Traceroute => {
                cmd.arg("-n").arg(target.to_string());
            }
            TraceTool::Scamper => {
                cmd.arg("-c").arg("trace").arg("-i").arg(target.to_string());
            }
            TraceTool::Mtr => {
                cmd.arg("-n")
                    .arg("-r")
                    .arg("-c")
                    .arg(MTR_CYCLES.to_string())
                    .arg(target.to_string());
            }
        }
        cmd
    }

    pub fn parse(&self, stdout: &str) -> Vec<ParsedHop> {
        match self {
            TraceTool::Traceroute => parse::traceroute(stdout),
            TraceTool::Scamper => parse::scamper(stdout),
            TraceTool::Mtr => parse::mtr(stdout),
        }
    }
}

/// First tool from the preference list that is present on this host.
/// Unknown names are skipped with a warning (settings are operator input).
pub fn select_tool(preference: &[String]) -> Option<TraceTool> {
    preference
        .iter()
        .filter_map(|name| match TraceTool::from_name(name) {
            some @ Some(_) => some,
            None => {
                warn!("Unknown probe tool `{}` in tool_preference, skipping", name);
                None
            }
        })
        .find(|tool| find_in_path(tool.name()).is_some())
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug)]
pub struct ProbeOutcome {
    pub exit_ok: bool,
    pub raw_output: String,
    pub hops: Vec<ParsedHop>,
}

impl ProbeOutcome {
    /// A probe that never produced usable output (spawn failure etc.).
    pub fn failed(raw_output: String) -> Self {
        Self {
            exit_ok: false,
            raw_output,
            hops: vec![],
        }
    }

    pub fn success(&self) -> bool {
        self.exit_ok && self.hops.iter().any(|hop| hop.ip.is_some())
    }
}

/// Runs one probe subprocess against one target, bounded by `timeout`.
/// On timeout the child is killed and whatever hops parsed so far are kept.
pub async fn run(tool: TraceTool, target: IpAddr, timeout: Duration) -> Result<ProbeOutcome> {
    let mut cmd = tool.command(target);
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    debug!("Probing {} with {}", target, tool.name());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {} process", tool.name()))?;
    let stdout = child.stdout.take().expect("stdout was requested piped");
    let mut lines = BufReader::new(stdout).lines();

    let deadline = Instant::now() + timeout;
    let mut raw_output = String::new();
    let mut timed_out = false;
    loop {
        let line_read = tokio::time::timeout_at(deadline, lines.next_line()).await;
        match line_read {
            Err(_elapsed) => {
                timed_out = true;
                break;
            }
            Ok(Ok(Some(line))) => {
                trace!("{}: {}", tool.name(), line);
                raw_output.push_str(&line);
                raw_output.push('\n');
            }
            Ok(Ok(None)) => break, // EOF
            Ok(Err(e)) => {
                warn!("Failed to read {} output: {}", tool.name(), e);
                break;
            }
        }
    }

    let exit_ok = if timed_out {
        warn!(
            "{} probe of {} exceeded {}s, killing it",
            tool.name(),
            target,
            timeout.as_secs()
        );
        let _ = child.kill().await;
        let _ = child.wait().await;
        false
    } else {
        child
            .wait()
            .await
            .with_context(|| "Failed to wait for probe child to exit")?
            .success()
    };

    let hops = tool.parse(&raw_output);
    Ok(ProbeOutcome {
        exit_ok,
        raw_output,
        hops,
    })
}
