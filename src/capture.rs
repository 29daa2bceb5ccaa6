//! Capture control.
//!
//! The pipeline reads raw HCI dump text from a byte stream handed out by a
//! [`CaptureControl`]. On a Linux host this is `hcidump --raw` with an
//! active `hcitool lescan` keeping the controller scanning; recorded dumps
//! can be replayed instead.

use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// Byte stream of raw dump text.
pub type CaptureStream = Box<dyn AsyncRead + Send + Unpin>;

/// Starts and stops the source of raw dump text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptureControl: Send {
    /// Start capturing and return the dump stream.
    async fn start(&mut self) -> Result<CaptureStream>;

    /// Stop capturing. Closing the source ends the stream.
    async fn stop(&mut self) -> Result<()>;
}

/// Runs `hcitool lescan` and `hcidump --raw` as child processes.
#[derive(Debug)]
pub struct ProcessCapture {
    hci_device: String,
    use_sudo: bool,
    scan: Option<Child>,
    dump: Option<Child>,
}

impl ProcessCapture {
    /// Create a capture on `hci_device`.
    pub fn new(hci_device: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            hci_device: hci_device.into(),
            use_sudo,
            scan: None,
            dump: None,
        }
    }

    /// Create a capture from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.hci_device.clone(), config.use_sudo)
    }

    /// Program and arguments of the scan process.
    pub fn scan_command(&self) -> Vec<String> {
        self.command_line("hcitool", &["-i", &self.hci_device, "lescan", "--duplicates"])
    }

    /// Program and arguments of the dump process.
    pub fn dump_command(&self) -> Vec<String> {
        self.command_line("hcidump", &["-i", &self.hci_device, "--raw"])
    }

    /// Check if the child processes are running.
    pub fn is_running(&self) -> bool {
        self.dump.is_some()
    }

    fn command_line(&self, program: &str, args: &[&str]) -> Vec<String> {
        let mut line = Vec::with_capacity(args.len() + 2);
        if self.use_sudo {
            line.push("sudo".to_string());
        }
        line.push(program.to_string());
        line.extend(args.iter().map(|a| a.to_string()));
        line
    }

    fn spawn(line: &[String], stdout: Stdio) -> Result<Child> {
        let (program, args) = line.split_first().ok_or_else(|| Error::CaptureControl {
            reason: "empty command line".to_string(),
        })?;

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CaptureControl {
                reason: format!("failed to spawn {}: {}", line.join(" "), e),
            })
    }

    async fn terminate(name: &str, child: Option<Child>) -> Result<()> {
        let mut child = match child {
            Some(child) => child,
            None => return Ok(()),
        };

        if let Err(e) = child.start_kill() {
            // Already exited.
            debug!("{} kill: {}", name, e);
        }
        let status = child.wait().await.map_err(|e| Error::CaptureControl {
            reason: format!("failed to reap {}: {}", name, e),
        })?;
        debug!("{} exited with {}", name, status);
        Ok(())
    }
}

#[async_trait]
impl CaptureControl for ProcessCapture {
    async fn start(&mut self) -> Result<CaptureStream> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        info!("Starting capture on {}", self.hci_device);
        let scan = Self::spawn(&self.scan_command(), Stdio::null())?;
        let mut dump = match Self::spawn(&self.dump_command(), Stdio::piped()) {
            Ok(dump) => dump,
            Err(e) => {
                Self::terminate("hcitool", Some(scan)).await?;
                return Err(e);
            }
        };

        let stdout = match dump.stdout.take() {
            Some(stdout) => stdout,
            None => {
                Self::terminate("hcidump", Some(dump)).await?;
                Self::terminate("hcitool", Some(scan)).await?;
                return Err(Error::CaptureControl {
                    reason: "hcidump stdout not captured".to_string(),
                });
            }
        };

        self.scan = Some(scan);
        self.dump = Some(dump);
        Ok(Box::new(stdout))
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.is_running() && self.scan.is_none() {
            return Ok(());
        }

        info!("Stopping capture on {}", self.hci_device);
        let dump = Self::terminate("hcidump", self.dump.take()).await;
        let scan = Self::terminate("hcitool", self.scan.take()).await;
        if let Err(e) = &scan {
            warn!("Error stopping scan: {}", e);
        }
        dump.and(scan)
    }
}

/// Serves a recorded dump.
pub struct ReplayCapture {
    source: Option<CaptureStream>,
    stopped: bool,
}

impl ReplayCapture {
    /// Replay from any reader.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            source: Some(Box::new(reader)),
            stopped: false,
        }
    }

    /// Replay a dump held in memory.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(Cursor::new(text.into().into_bytes()))
    }

    /// Replay a dump file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        Ok(Self::new(file))
    }

    /// Check if `stop` was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[async_trait]
impl CaptureControl for ReplayCapture {
    async fn start(&mut self) -> Result<CaptureStream> {
        self.source.take().ok_or_else(|| Error::CaptureControl {
            reason: "replay source already consumed".to_string(),
        })
    }

    async fn stop(&mut self) -> Result<()> {
        self.stopped = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_command_lines() {
        let capture = ProcessCapture::new("hci1", true);
        assert_eq!(
            capture.scan_command(),
            ["sudo", "hcitool", "-i", "hci1", "lescan", "--duplicates"]
        );
        assert_eq!(capture.dump_command(), ["sudo", "hcidump", "-i", "hci1", "--raw"]);

        let capture = ProcessCapture::new("hci0", false);
        assert_eq!(capture.dump_command()[0], "hcidump");
        assert!(!capture.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut capture = ProcessCapture::new("hci0", false);
        capture.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_replay_single_use() {
        let mut capture = ReplayCapture::from_text("> 04 3E\n");
        let mut stream = capture.start().await.unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "> 04 3E\n");

        assert!(matches!(
            capture.start().await,
            Err(Error::CaptureControl { .. })
        ));
        capture.stop().await.unwrap();
        assert!(capture.is_stopped());
    }
}
