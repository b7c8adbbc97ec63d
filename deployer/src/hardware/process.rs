//! Hardware service backed by the `mpremote` and `esptool` command line tools

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::hardware::{BoardInfo, FirmwareImage, FlashResult, HardwareService};
use crate::storage::settings::HardwareSettings;

/// USB bridges of the supported ESP32 boards: (VID, PID, board)
pub const KNOWN_BOARDS: &[(u16, u16, &str)] = &[
    (0x10C4, 0xEA60, "Heltec WiFi LoRa 32 V3 (CP210x)"),
    (0x303A, 0x1001, "ESP32-S3 Native USB"),
    (0x1A86, 0x55D4, "ESP32 (CH9102)"),
];

/// Runs the flashing tools as subprocesses
#[derive(Debug, Clone)]
pub struct ProcessHardwareService {
    mpremote_bin: String,
    esptool_bin: String,
    python_bin: String,
    port: Option<String>,
    timeout: Duration,
}

impl ProcessHardwareService {
    pub fn new(settings: &HardwareSettings) -> Self {
        Self {
            mpremote_bin: settings.mpremote_bin.clone(),
            esptool_bin: settings.esptool_bin.clone(),
            python_bin: settings.python_bin.clone(),
            port: settings.serial_port.clone().filter(|p| !p.is_empty()),
            timeout: Duration::from_secs(settings.flash_timeout_secs),
        }
    }

    /// Look for a known board among the serial ports `mpremote` lists
    pub async fn detect_board(&self) -> Result<Option<BoardInfo>, DeployError> {
        let args = vec!["connect".to_string(), "list".to_string()];
        match self.run_tool(&self.mpremote_bin, &args, None).await {
            Ok(output) if output.success => Ok(find_known_board(&output.stdout)),
            Ok(output) => Err(DeployError::Process(format!(
                "Listing serial ports failed: {}",
                output.stderr
            ))),
            Err(failure) => Err(DeployError::Process(
                self.failure_result(&self.mpremote_bin, failure)
                    .message_or_default(),
            )),
        }
    }

    /// Configured serial port, or the port of a detected board
    async fn board_port(&self) -> Result<String, DeployError> {
        if let Some(port) = &self.port {
            return Ok(port.clone());
        }
        match self.detect_board().await? {
            Some(board) => {
                info!("Detected {} on {}", board.board_type, board.port);
                Ok(board.port)
            }
            None => Err(DeployError::NoBoardDetected),
        }
    }

    /// Arguments for copying `files` to the board root
    pub fn copy_args(port: &str, files: &[String]) -> Vec<String> {
        let mut args = vec!["connect".to_string(), port.to_string(), "cp".to_string()];
        args.extend(files.iter().cloned());
        args.push(":".to_string());
        args
    }

    /// Arguments for restarting the interpreter without a hardware reset
    pub fn soft_reset_args(port: &str) -> Vec<String> {
        vec!["connect".to_string(), port.to_string(), "soft-reset".to_string()]
    }

    /// Arguments for writing an image with the programmer tool
    pub fn write_flash_args(&self, image: &FirmwareImage) -> Vec<String> {
        let mut args = vec!["--chip".to_string(), image.chip.clone()];
        if let Some(port) = &self.port {
            args.push("--port".to_string());
            args.push(port.clone());
        }
        args.push("--baud".to_string());
        args.push(image.baud_rate.to_string());
        args.push("write_flash".to_string());
        for segment in &image.segments {
            args.push(segment.offset.clone());
            args.push(segment.path.display().to_string());
        }
        args
    }

    async fn run_tool(
        &self,
        program: &str,
        args: &[String],
        current_dir: Option<&Path>,
    ) -> Result<ToolOutput, ToolFailure> {
        debug!("Running {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = current_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolFailure::NotInstalled
            } else {
                ToolFailure::Spawn(e.to_string())
            }
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolFailure::TimedOut)?
            .map_err(|e| ToolFailure::Spawn(e.to_string()))?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn failure_result(&self, program: &str, failure: ToolFailure) -> FlashResult {
        match failure {
            ToolFailure::NotInstalled => FlashResult::failed(format!(
                "{} not found. Install it with: pip install {}",
                program,
                install_name(program)
            )),
            ToolFailure::TimedOut => FlashResult::failed(format!(
                "Flash timed out after {} seconds",
                self.timeout.as_secs()
            )),
            ToolFailure::Spawn(e) => FlashResult::failed(format!("Failed to run {}: {}", program, e)),
        }
    }
}

struct ToolOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

enum ToolFailure {
    NotInstalled,
    TimedOut,
    Spawn(String),
}

fn install_name(program: &str) -> &str {
    let base = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    base.trim_end_matches(".py")
}

/// First known board in `mpremote connect list` output.
///
/// Each line reads `<port> <serial> <vid>:<pid> <manufacturer> <product>`.
pub fn find_known_board(listing: &str) -> Option<BoardInfo> {
    listing.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let port = fields.next()?;
        let (vid, pid) = fields.nth(1)?.split_once(':')?;
        let vid = u16::from_str_radix(vid, 16).ok()?;
        let pid = u16::from_str_radix(pid, 16).ok()?;
        KNOWN_BOARDS
            .iter()
            .find(|(v, p, _)| *v == vid && *p == pid)
            .map(|(_, _, board)| BoardInfo {
                port: port.to_string(),
                board_type: board.to_string(),
            })
    })
}

#[async_trait]
impl HardwareService for ProcessHardwareService {
    async fn compile_sources(&self, workspace_dir: &Path, files: &[String]) -> Result<(), DeployError> {
        let sources: Vec<String> = files.iter().filter(|f| f.ends_with(".py")).cloned().collect();
        if sources.is_empty() {
            return Err(DeployError::Compile("No Python files found".to_string()));
        }

        let mut args = vec!["-m".to_string(), "py_compile".to_string()];
        args.extend(sources.iter().cloned());
        match self.run_tool(&self.python_bin, &args, Some(workspace_dir)).await {
            Ok(output) if output.success => {
                debug!("{} source file(s) compiled", sources.len());
                Ok(())
            }
            Ok(output) => Err(DeployError::Compile(if output.stderr.is_empty() {
                format!("{} rejected the sources", self.python_bin)
            } else {
                output.stderr
            })),
            Err(ToolFailure::NotInstalled) => {
                warn!("{} not found, copying sources unchecked", self.python_bin);
                Ok(())
            }
            Err(failure) => Err(DeployError::Process(
                self.failure_result(&self.python_bin, failure)
                    .message_or_default(),
            )),
        }
    }

    async fn flash_files(&self, workspace_dir: &Path, files: &[String]) -> FlashResult {
        if files.is_empty() {
            return FlashResult::failed("No files to flash");
        }
        let port = match self.board_port().await {
            Ok(port) => port,
            Err(e) => return FlashResult::failed(e.to_string()),
        };

        info!("Copying {} file(s) to board on {}", files.len(), port);
        let args = Self::copy_args(&port, files);
        match self.run_tool(&self.mpremote_bin, &args, Some(workspace_dir)).await {
            Ok(output) if output.success => {
                FlashResult::ok(format!("Flashed {} file(s) to {}", files.len(), port))
            }
            Ok(output) => {
                let detail = if output.stderr.is_empty() {
                    "Unknown error"
                } else {
                    output.stderr.as_str()
                };
                FlashResult::failed(format!("Flash failed: {}", detail))
            }
            Err(failure) => self.failure_result(&self.mpremote_bin, failure),
        }
    }

    async fn reset_board(&self) -> Result<(), DeployError> {
        let port = self.board_port().await?;
        let args = Self::soft_reset_args(&port);
        match self.run_tool(&self.mpremote_bin, &args, None).await {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(DeployError::Process(format!("Board reset failed: {}", output.stderr))),
            Err(failure) => {
                let message = self
                    .failure_result(&self.mpremote_bin, failure)
                    .message_or_default();
                Err(DeployError::Process(message))
            }
        }
    }

    async fn flash_image(&self, image: &FirmwareImage) -> FlashResult {
        if image.segments.is_empty() {
            return FlashResult::failed("No firmware image to flash");
        }

        info!("Writing {} image segment(s) for {}", image.segments.len(), image.chip);
        let args = self.write_flash_args(image);
        match self.run_tool(&self.esptool_bin, &args, None).await {
            Ok(output) if output.success => {
                debug!("{}", output.stdout);
                FlashResult::ok(format!("Firmware written to {}", image.chip))
            }
            Ok(output) => {
                warn!("Programmer tool failed: {}", output.stderr);
                FlashResult::failed(format!("Firmware flash failed: {}", output.stderr))
            }
            Err(failure) => self.failure_result(&self.esptool_bin, failure),
        }
    }
}
