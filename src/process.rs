//! External script invocation
//!
//! Model integrations that live outside the process (Python inference
//! scripts) are driven through [`ScriptCommand`]. Every call has an explicit
//! timeout, an explicit exit-code interpretation and an explicit expected
//! output file, and maps onto [`ModelError`]:
//!
//! | outcome                         | error                      |
//! |---------------------------------|----------------------------|
//! | program missing / exit 127      | `ModelError::Unavailable`  |
//! | deadline exceeded (child killed)| `ModelError::Timeout`      |
//! | other non-zero exit             | `ModelError::Failed`       |
//! | exit 0, no output file          | `ModelError::MissingOutput`|

use crate::codec;
use crate::device::Device;
use crate::error::ModelError;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// Shell convention for "command not found"
const EXIT_NOT_FOUND: i32 = 127;
const STDERR_TAIL_CHARS: usize = 600;

pub struct ScriptCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Duration,
    expected_output: Option<PathBuf>,
}

impl ScriptCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            timeout: Duration::from_secs(300),
            expected_output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// File the script must leave behind on success
    pub fn expect_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.expected_output = Some(path.into());
        self
    }

    /// Run to completion and return the expected output path (if one was set)
    pub async fn execute(self) -> Result<Option<PathBuf>, ModelError> {
        debug!("Running {} {}", self.program, self.args.join(" "));

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(ModelError::Timeout {
                    program: self.program,
                    seconds: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelError::Unavailable(format!("{} not found", self.program)))
            }
            Ok(Err(e)) => return Err(ModelError::Io(e)),
            Ok(Ok(output)) => output,
        };

        match output.status.code() {
            Some(0) => {}
            Some(EXIT_NOT_FOUND) => {
                return Err(ModelError::Unavailable(format!(
                    "{} reported a missing command: {}",
                    self.program,
                    stderr_tail(&output.stderr)
                )))
            }
            code => {
                return Err(ModelError::Failed {
                    program: self.program,
                    code,
                    stderr: stderr_tail(&output.stderr),
                })
            }
        }

        if let Some(expected) = &self.expected_output {
            if !expected.is_file() {
                return Err(ModelError::MissingOutput(expected.clone()));
            }
        }

        Ok(self.expected_output)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        text.to_string()
    } else {
        text.chars().skip(count - STDERR_TAIL_CHARS).collect()
    }
}

/// Check that a program can be launched at all
pub fn program_available(program: &str, probe_args: &[&str]) -> bool {
    std::process::Command::new(program)
        .args(probe_args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Shared settings for every script-backed model
#[derive(Debug, Clone)]
pub struct ScriptRuntime {
    pub interpreter: String,
    pub timeout: Duration,
    pub scratch_root: PathBuf,
    pub device: Device,
}

impl ScriptRuntime {
    /// Load-time check: interpreter launches and the script exists
    pub fn check(&self, script: &Path) -> Result<(), ModelError> {
        if !program_available(&self.interpreter, &["-c", ""]) {
            return Err(ModelError::Unavailable(format!(
                "interpreter {} cannot be launched",
                self.interpreter
            )));
        }
        if !script.is_file() {
            return Err(ModelError::Unavailable(format!(
                "script not found: {}",
                script.display()
            )));
        }
        Ok(())
    }

    /// `<interpreter> <script>` with timeout and device environment applied
    pub fn command(&self, script: &Path) -> ScriptCommand {
        let cmd = ScriptCommand::new(self.interpreter.clone())
            .path_arg(script)
            .timeout(self.timeout);
        match self.device {
            Device::Cpu => cmd.env("CUDA_VISIBLE_DEVICES", ""),
            Device::Cuda => cmd,
        }
    }

    /// Hand `image` to a script as `input.png` inside a private scratch
    /// directory and decode whatever it reports as output.
    ///
    /// `build` receives the input file and an empty output directory and must
    /// return a command with its expected output set. The scratch directory is
    /// removed on every exit path.
    pub async fn run_image<F>(&self, image: &RgbImage, build: F) -> Result<RgbImage, ModelError>
    where
        F: FnOnce(&Path, &Path) -> ScriptCommand,
    {
        let scratch = tempfile::Builder::new()
            .prefix("model-")
            .tempdir_in(&self.scratch_root)?;
        let input_path = scratch.path().join("input.png");
        let output_dir = scratch.path().join("out");
        tokio::fs::create_dir_all(&output_dir).await?;

        let frame = image.clone();
        let png = tokio::task::spawn_blocking(move || codec::encode_png(&frame))
            .await
            .map_err(|e| ModelError::Image(format!("Encode task failed: {}", e)))?
            .map_err(|e| ModelError::Image(e.to_string()))?;
        tokio::fs::write(&input_path, png).await?;

        let produced = build(&input_path, &output_dir)
            .execute()
            .await?
            .ok_or_else(|| ModelError::MissingOutput(output_dir.clone()))?;

        tokio::task::spawn_blocking(move || {
            image::open(&produced)
                .map(|img| img.to_rgb8())
                .map_err(|e| ModelError::Image(format!("Failed to read model output: {}", e)))
        })
        .await
        .map_err(|e| ModelError::Image(format!("Decode task failed: {}", e)))?
    }
}
