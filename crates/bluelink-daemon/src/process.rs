//! Persistent control session management
//!
//! [`CtlProcess`] owns one interactive interpreter child process (normally
//! `bluetoothctl`). [`CtlSession`] wraps it behind a lock, replays the startup
//! commands on every (re)start and implements [`LocalDeviceControl`].

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::{timeout, Instant};

use bluelink_core::prelude::*;
use bluelink_core::{clean_line, DeviceClass};

use crate::control::{resolve_program, ControlOptions, LocalDeviceControl};
use crate::devices;

/// Lines buffered between commands. Unsolicited scan events beyond this are dropped.
const OUTPUT_BUFFER: usize = 512;

/// How long `shutdown()` waits for the interpreter to honour `exit`
const GRACEFUL_EXIT: Duration = Duration::from_secs(2);

/// Prefix of the progress line printed by slow commands (pair, connect, ...)
const PENDING_PREFIX: &str = "Attempting to";

/// Manages an interpreter child process.
///
/// The `Child` handle lives in a dedicated `wait_for_exit` task. Output from
/// stdout and stderr is merged into one line channel that `execute()` reads.
pub struct CtlProcess {
    stdin_tx: mpsc::Sender<String>,
    lines_rx: mpsc::Receiver<String>,
    pid: Option<u32>,
    /// Tells the wait task to force-kill the process. Consumed on first use.
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
}

impl CtlProcess {
    /// Spawn `program` with piped stdio.
    pub fn spawn(program: &Path) -> Result<Self> {
        let program = resolve_program(program)?;

        info!("Spawning control session: {}", program.display());

        let mut child = Command::new(&program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::ControlNotFound {
                        program: program.display().to_string(),
                    }
                } else {
                    Error::control_spawn(e.to_string())
                }
            })?;

        let pid = child.id();
        info!("Control session started with PID: {:?}", pid);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::control_spawn("stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::control_spawn("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::control_spawn("stderr was not captured"))?;

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(32);
        tokio::spawn(Self::stdin_writer(stdin, stdin_rx));

        let (lines_tx, lines_rx) = mpsc::channel::<String>(OUTPUT_BUFFER);
        tokio::spawn(Self::output_reader(stdout, lines_tx.clone(), "stdout"));
        tokio::spawn(Self::output_reader(stderr, lines_tx, "stderr"));

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            stdin_tx,
            lines_rx,
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child` until it exits or is killed.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => info!("Control session exited with status: {:?}", status),
                    Err(e) => error!("Error waiting for control session: {}", e),
                }
            }
            _ = kill_rx => {
                info!("Kill signal received, force-killing control session");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill control session: {}", e);
                }
                if let Err(e) = child.wait().await {
                    error!("Error waiting after kill: {}", e);
                }
            }
        }

        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();
    }

    /// Forward output lines. A full buffer drops the line instead of blocking
    /// the interpreter on a full pipe.
    async fn output_reader<R>(stream: R, tx: mpsc::Sender<String>, source: &'static str)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(stream).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("{}: {}", source, line);

            match tx.try_send(line) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(line)) => {
                    trace!("Output buffer full, dropping: {}", line);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }

        debug!("{} reader finished", source);
    }

    async fn stdin_writer(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<String>) {
        while let Some(command) = rx.recv().await {
            debug!("Sending to control session: {}", command);

            if let Err(e) = stdin.write_all(command.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!("Failed to write newline: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }

        debug!("stdin writer finished");
    }

    /// Write one raw line without waiting for output
    pub async fn send(&self, command: &str) -> Result<()> {
        self.stdin_tx
            .send(command.to_string())
            .await
            .map_err(|_| Error::ControlExited)
    }

    /// Discard output that arrived since the last command.
    fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(line) = self.lines_rx.try_recv() {
            trace!("Discarding unsolicited output: {}", line);
            dropped += 1;
        }
        dropped
    }

    /// Run `command` and collect its cleaned output.
    ///
    /// Output is complete once no line arrives for `idle`, unless the last
    /// reply line is an `Attempting to ...` progress line, in which case
    /// collection continues until `limit`.
    pub async fn execute(
        &mut self,
        command: &str,
        idle: Duration,
        limit: Duration,
    ) -> Result<String> {
        if self.has_exited() {
            return Err(Error::ControlExited);
        }

        let stale = self.drain();
        if stale > 0 {
            debug!("Dropped {} unsolicited lines before '{}'", stale, command);
        }

        self.send(command).await?;

        let deadline = Instant::now() + limit;
        let mut lines: Vec<String> = Vec::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                if is_pending(&lines) {
                    return Err(Error::command_timeout(command));
                }
                break;
            }

            match timeout(idle.min(deadline - now), self.lines_rx.recv()).await {
                Ok(Some(raw)) => {
                    let line = clean_line(&raw);
                    if line.is_empty() || line == command {
                        continue;
                    }
                    lines.push(line);
                }
                Ok(None) => {
                    if lines.is_empty() {
                        return Err(Error::ControlExited);
                    }
                    break;
                }
                Err(_) if is_pending(&lines) => {}
                Err(_) => break,
            }
        }

        trace!("'{}' produced {} lines", command, lines.len());
        Ok(lines.join("\n"))
    }

    /// Ask the interpreter to exit, force-killing it after a grace period.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.has_exited() {
            info!("Control session already exited");
            return Ok(());
        }

        info!("Shutting down control session");
        let _ = self.send("exit").await;

        // Create the notified future before the final check so a notification
        // between the two cannot be missed.
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return Ok(());
        }

        match timeout(GRACEFUL_EXIT, notified).await {
            Ok(()) => {
                info!("Control session exited gracefully");
                Ok(())
            }
            Err(_) => {
                warn!("Timeout waiting for graceful exit, force killing");
                self.force_kill();
                Ok(())
            }
        }
    }

    fn force_kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for CtlProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            debug!("CtlProcess dropped while still running, killing");
            self.force_kill();
        }
    }
}

fn is_event_line(line: &str) -> bool {
    line.starts_with("[CHG]") || line.starts_with("[NEW]") || line.starts_with("[DEL]")
}

/// The last reply line (ignoring scan events) is a progress line
fn is_pending(lines: &[String]) -> bool {
    lines
        .iter()
        .rev()
        .find(|line| !is_event_line(line))
        .is_some_and(|line| line.starts_with(PENDING_PREFIX))
}

/// The persistent control channel used by the daemon and client commands
pub struct CtlSession {
    options: ControlOptions,
    process: Mutex<Option<CtlProcess>>,
}

impl CtlSession {
    /// Start the interpreter and replay the startup commands.
    pub async fn start(options: ControlOptions) -> Result<Self> {
        let process = Self::launch(&options).await?;
        Ok(Self {
            options,
            process: Mutex::new(Some(process)),
        })
    }

    async fn launch(options: &ControlOptions) -> Result<CtlProcess> {
        let mut process = CtlProcess::spawn(&options.program)?;

        for command in &options.startup_commands {
            match process
                .execute(command, options.idle_timeout, options.command_timeout)
                .await
            {
                Ok(output) => debug!("Startup '{}': {}", command, output),
                Err(Error::ControlExited) => {
                    return Err(Error::control_spawn(format!(
                        "session exited during startup command '{}'",
                        command
                    )));
                }
                Err(e) => warn!("Startup command '{}' failed: {}", command, e),
            }
        }

        Ok(process)
    }

    pub fn options(&self) -> &ControlOptions {
        &self.options
    }

    pub async fn is_running(&self) -> bool {
        self.process
            .lock()
            .await
            .as_ref()
            .is_some_and(CtlProcess::is_running)
    }

    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(CtlProcess::id)
    }
}

impl LocalDeviceControl for CtlSession {
    async fn execute(&self, command: &str) -> Result<String> {
        let mut guard = self.process.lock().await;
        let process = guard.as_mut().ok_or(Error::ControlExited)?;
        process
            .execute(
                command,
                self.options.idle_timeout,
                self.options.command_timeout,
            )
            .await
    }

    async fn query_devices(&self, class: DeviceClass) -> Result<String> {
        devices::query_devices(&self.options.program, class, self.options.query_timeout).await
    }

    async fn restart(&self) -> Result<()> {
        let mut guard = self.process.lock().await;
        if let Some(mut old) = guard.take() {
            old.shutdown().await?;
        }

        info!("Restarting control session");
        *guard = Some(Self::launch(&self.options).await?);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut guard = self.process.lock().await;
        match guard.take() {
            Some(mut process) => process.shutdown().await,
            None => Ok(()),
        }
    }
}
