use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;

/// Artifact extensions in preference order when locating exported binaries.
const ARTIFACT_EXTENSIONS: [&str; 3] = ["hex", "bin", "elf"];

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("compilation failed: {details}")]
    Compile { details: String },
    #[error("upload failed: {details}")]
    Upload { details: String },
    #[error("{tool} timed out after {timeout:?}")]
    Timeout {
        tool: &'static str,
        timeout: Duration,
    },
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("no exported binary found under {0}")]
    ArtifactMissing(PathBuf),
    #[error("failed to read exported binary {path}: {source}")]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolchainError {
    /// The diagnostic text surfaced to the caller in the `details` field.
    /// For process failures this is the tool's stderr verbatim.
    pub fn details(&self) -> String {
        match self {
            Self::Compile { details } | Self::Upload { details } => details.clone(),
            other => other.to_string(),
        }
    }
}

/// Captured output of a finished toolchain process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// stderr emitted alongside a zero exit status. Warnings, not failure;
    /// success is decided by exit status alone.
    pub fn warnings(&self) -> Option<String> {
        if self.stderr.trim().is_empty() {
            None
        } else {
            Some(self.stderr.clone())
        }
    }
}

/// The seam between the HTTP layer and the external compiler, so tests can
/// substitute a fake without a toolchain installed.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn compile(&self, sketch_dir: &Path, board: &str)
        -> Result<ProcessOutput, ToolchainError>;

    async fn upload(
        &self,
        sketch_dir: &Path,
        board: &str,
        port: &str,
    ) -> Result<ProcessOutput, ToolchainError>;
}

/// Invokes the arduino-cli binary for compile and upload.
pub struct ArduinoCli {
    bin: PathBuf,
    timeout: Duration,
    export_binaries: bool,
}

impl ArduinoCli {
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration, export_binaries: bool) -> Self {
        Self {
            bin: bin.into(),
            timeout,
            export_binaries,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.cli_path,
            config.build_timeout,
            config.export_binaries,
        )
    }

    async fn run(
        &self,
        tool: &'static str,
        cmd: &mut Command,
    ) -> Result<std::process::Output, ToolchainError> {
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(ToolchainError::Spawn { tool, source }),
            Err(_) => Err(ToolchainError::Timeout {
                tool,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl Toolchain for ArduinoCli {
    async fn compile(
        &self,
        sketch_dir: &Path,
        board: &str,
    ) -> Result<ProcessOutput, ToolchainError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("compile").arg("--fqbn").arg(board);
        if self.export_binaries {
            cmd.arg("--export-binaries");
        }
        cmd.arg(sketch_dir);

        debug!("Running {} compile for {}", self.bin.display(), board);
        let output = self.run("arduino-cli compile", &mut cmd).await?;

        if !output.status.success() {
            return Err(ToolchainError::Compile {
                details: failure_details("arduino-cli compile", &output),
            });
        }

        Ok(process_output(&output))
    }

    async fn upload(
        &self,
        sketch_dir: &Path,
        board: &str,
        port: &str,
    ) -> Result<ProcessOutput, ToolchainError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("upload")
            .arg("-p")
            .arg(port)
            .arg("--fqbn")
            .arg(board)
            .arg(sketch_dir);

        debug!("Running {} upload to {} for {}", self.bin.display(), port, board);
        let output = self.run("arduino-cli upload", &mut cmd).await?;

        if !output.status.success() {
            return Err(ToolchainError::Upload {
                details: failure_details("arduino-cli upload", &output),
            });
        }

        Ok(process_output(&output))
    }
}

fn process_output(output: &std::process::Output) -> ProcessOutput {
    ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

fn failure_details(tool: &str, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        format!("{} exited with {}", tool, output.status)
    } else {
        stderr.to_string()
    }
}

/// Locates the artifact that `--export-binaries` placed under
/// `<sketch_dir>/build/<env>/`, preferring .hex over .bin over .elf.
pub async fn find_exported_binary(sketch_dir: &Path) -> Result<PathBuf, ToolchainError> {
    let build_dir = sketch_dir.join("build");
    if !build_dir.is_dir() {
        return Err(ToolchainError::ArtifactMissing(build_dir));
    }

    // arduino-cli writes into a per-FQBN subdirectory; also check build/
    // itself in case the layout is flat.
    let mut search_dirs = vec![build_dir.clone()];
    if let Ok(mut entries) = fs::read_dir(&build_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                search_dirs.push(path);
            }
        }
    }

    for ext in ARTIFACT_EXTENSIONS {
        for dir in &search_dirs {
            if let Some(found) = file_with_extension(dir, ext).await {
                debug!("Found exported binary {}", found.display());
                return Ok(found);
            }
        }
    }

    Err(ToolchainError::ArtifactMissing(build_dir))
}

/// Finds the artifact and reads its bytes, mapping both failure modes to
/// explicit errors rather than leaving them unhandled.
pub async fn read_exported_binary(sketch_dir: &Path) -> Result<Vec<u8>, ToolchainError> {
    let path = find_exported_binary(sketch_dir).await?;
    fs::read(&path)
        .await
        .map_err(|source| ToolchainError::ArtifactUnreadable { path, source })
}

async fn file_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut entries = fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            return Some(path);
        }
    }
    None
}
