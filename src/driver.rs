use crate::preset::CommandSpec;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,
    Cancelled,
}

enum TaskState {
    Pending,
    Running(Child),
    ExitedOk,
    ExitedFailed,
}

struct Task<'a> {
    spec: &'a CommandSpec,
    serial: bool,
    state: TaskState,
}

impl Task<'_> {
    fn is_running(&self) -> bool {
        matches!(self.state, TaskState::Running(_))
    }

    fn is_done(&self) -> bool {
        matches!(self.state, TaskState::ExitedOk | TaskState::ExitedFailed)
    }
}

/// Runs the plan's commands to completion: the parallel set starts
/// immediately and concurrently, the serial queue one-at-a-time with the
/// first entry started right away. A failing child never kills its
/// siblings; success requires every child to exit zero. When `interrupted`
/// flips, all live children are killed and the run reports `Cancelled`.
pub fn run(
    parallel: &[CommandSpec],
    serial: &[CommandSpec],
    log_target: Option<&Path>,
    interrupted: &AtomicBool,
) -> Result<RunOutcome> {
    let log_file = match log_target {
        Some(path) => Some(
            File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?,
        ),
        None => None,
    };

    let mut tasks: Vec<Task> = parallel
        .iter()
        .map(|spec| Task {
            spec,
            serial: false,
            state: TaskState::Pending,
        })
        .chain(serial.iter().map(|spec| Task {
            spec,
            serial: true,
            state: TaskState::Pending,
        }))
        .collect();

    for task in tasks.iter_mut().filter(|t| !t.serial) {
        task.state = TaskState::Running(spawn(task.spec, log_file.as_ref())?);
    }

    let mut tail = match log_target {
        Some(path) => Some(LogTail::open(path)?),
        None => None,
    };
    let status_line = tail.as_ref().map(|_| {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .expect("valid progress template")
                .tick_chars("|/-\\ "),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    });

    loop {
        for task in tasks.iter_mut() {
            if let TaskState::Running(child) = &mut task.state {
                if let Some(status) = child.try_wait()? {
                    if status.success() {
                        debug!("{} finished", task.spec.label);
                        task.state = TaskState::ExitedOk;
                    } else {
                        error!("{} exited with {}", task.spec.label, status);
                        task.state = TaskState::ExitedFailed;
                    }
                }
            }
        }

        // The serial queue advances only when no serial task is running;
        // the finalize step's FIFO reads block until writers attach, so no
        // further readiness signaling is needed.
        if !tasks.iter().any(|t| t.serial && t.is_running()) {
            if let Some(task) = tasks
                .iter_mut()
                .find(|t| t.serial && matches!(t.state, TaskState::Pending))
            {
                task.state = TaskState::Running(spawn(task.spec, log_file.as_ref())?);
            }
        }

        if interrupted.load(Ordering::SeqCst) {
            for task in tasks.iter_mut() {
                if let TaskState::Running(child) = &mut task.state {
                    debug!("killing {}", task.spec.label);
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
            if let Some(s) = &status_line {
                s.finish_and_clear();
            }
            return Ok(RunOutcome::Cancelled);
        }

        if tasks.iter().all(Task::is_done) {
            break;
        }

        if let (Some(tail), Some(spinner)) = (tail.as_mut(), status_line.as_ref()) {
            if let Some(line) = tail.poll() {
                spinner.set_message(line);
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    if let Some(s) = &status_line {
        s.finish_and_clear();
    }

    let failed = tasks
        .iter()
        .any(|t| matches!(t.state, TaskState::ExitedFailed));
    if failed {
        if log_target.is_some() {
            error!("Encoding failed. Check the log file for the error.");
        } else {
            error!("Encoding failed. Re-run with logging to find out what went wrong.");
        }
        Ok(RunOutcome::Failed)
    } else {
        info!("Processing done.");
        Ok(RunOutcome::Success)
    }
}

fn spawn(spec: &CommandSpec, log_file: Option<&File>) -> Result<Child> {
    debug!("Executing: {}", spec);
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).stdin(Stdio::null());
    match log_file {
        Some(f) => {
            cmd.stdout(f.try_clone()?);
            cmd.stderr(f.try_clone()?);
        }
        None => {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }
    }
    cmd.spawn()
        .with_context(|| format!("failed to start {}", spec.program.display()))
}

/// Incremental reader over the log file the children are writing, looking
/// for the encoder's most recent status line. Purely cosmetic; losing lines
/// never affects the run.
struct LogTail {
    file: File,
    pending: String,
}

impl LogTail {
    fn open(path: &Path) -> Result<Self> {
        // The driver created the file just above, so opening it for
        // reading cannot race with the children.
        let file = File::open(path)
            .with_context(|| format!("cannot read back log file {}", path.display()))?;
        Ok(Self {
            file,
            pending: String::new(),
        })
    }

    /// Returns the newest complete `frame=` line since the last poll, if
    /// any. The encoder terminates its status updates with CR, not LF.
    fn poll(&mut self) -> Option<String> {
        let mut chunk = Vec::new();
        if self.file.read_to_end(&mut chunk).is_err() || chunk.is_empty() {
            return None;
        }
        self.pending.push_str(&String::from_utf8_lossy(&chunk));

        let mut latest = None;
        while let Some(pos) = self.pending.find(['\n', '\r']) {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if line.starts_with("frame=") {
                latest = Some(line.to_string());
            }
        }
        latest
    }
}
