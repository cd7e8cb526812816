//! Descriptor extraction boundary.
//!
//! Detection, landmarking and embedding are done by an external model. This
//! crate only defines the capability and a process-based adapter for it: the
//! frame goes to the program's stdin as PNG, and the program answers on stdout
//! with `null` (no face) or `{"descriptor": [...], "landmarks": ...}`.

use anyhow::{Context, Result};
use image::ImageFormat;
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::descriptor::Detection;
use crate::frame::Frame;

/// Environment variable through which the model location reaches the program.
pub const MODEL_DIR_ENV: &str = "FACEREG_MODEL_DIR";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Produces at most one face descriptor per frame.
pub trait DescriptorExtractor: Send {
    fn extract(&mut self, frame: &Frame) -> Result<Option<Detection>>;
}

impl<T: DescriptorExtractor + ?Sized> DescriptorExtractor for Box<T> {
    fn extract(&mut self, frame: &Frame) -> Result<Option<Detection>> {
        (**self).extract(frame)
    }
}

/// Runs an external extraction program once per frame.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
    model_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandExtractor {
    /// Validate the program and model assets. Nothing may be extracted until
    /// this has succeeded.
    pub fn load(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        model_dir: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let program = program.into();
        if program.as_os_str().is_empty() {
            anyhow::bail!("no extractor program configured");
        }
        // Bare names are resolved through PATH at spawn time.
        if program.components().count() > 1 && !program.exists() {
            anyhow::bail!("extractor program {} not found", program.display());
        }
        if let Some(dir) = &model_dir {
            if !dir.is_dir() {
                anyhow::bail!("model directory {} does not exist", dir.display());
            }
        }
        log::info!(
            "descriptor extractor ready: {} (timeout {:?})",
            program.display(),
            timeout
        );
        Ok(Self {
            program,
            args,
            model_dir,
            timeout,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl DescriptorExtractor for CommandExtractor {
    fn extract(&mut self, frame: &Frame) -> Result<Option<Detection>> {
        let mut png = Vec::new();
        frame
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("encoding frame")?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.model_dir {
            cmd.env(MODEL_DIR_ENV, dir);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning extractor {}", self.program.display()))?;

        let mut stdin = child.stdin.take().context("extractor stdin unavailable")?;
        let mut stdout = child.stdout.take().context("extractor stdout unavailable")?;
        let mut stderr = child.stderr.take().context("extractor stderr unavailable")?;

        let deadline = Instant::now() + self.timeout;
        let writer = detach(move || stdin.write_all(&png));
        let reader = detach(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });
        let err_reader = detach(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        // Pipe threads are left detached when the deadline passes; grandchildren
        // may still hold the pipes open after the child itself has exited.
        let status = match wait_until(&mut child, deadline)? {
            Some(status) => status,
            None => anyhow::bail!("extractor timed out after {:?}", self.timeout),
        };

        match collect(&writer, deadline, self.timeout)? {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                log::debug!("extractor closed stdin before reading the whole frame")
            }
            Err(e) => return Err(e).context("writing frame to extractor"),
        }
        let output =
            collect(&reader, deadline, self.timeout)?.context("reading extractor output")?;
        let diagnostics = collect(&err_reader, deadline, self.timeout)?;

        if !status.success() {
            anyhow::bail!(
                "extractor exited with {}: {}",
                status,
                diagnostics.trim()
            );
        }
        if !diagnostics.trim().is_empty() {
            log::debug!("extractor stderr: {}", diagnostics.trim());
        }

        parse_output(&output)
    }
}

/// Run `f` on its own thread and hand back a receiver for its result.
fn detach<T, F>(f: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx
}

/// Receive a pipe thread's result, giving up at `deadline`.
fn collect<T>(rx: &mpsc::Receiver<T>, deadline: Instant, timeout: Duration) -> Result<T> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("extractor output still open after {:?}", timeout);
            anyhow::bail!("extractor timed out after {:?}", timeout)
        }
        Err(RecvTimeoutError::Disconnected) => anyhow::bail!("extractor pipe thread panicked"),
    }
}

/// Wait for the child, killing it once `deadline` has passed.
fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait().context("waiting for extractor")? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            log::warn!("extractor missed its deadline, killing it");
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Decode the program's answer.
pub fn parse_output(output: &[u8]) -> Result<Option<Detection>> {
    let text = std::str::from_utf8(output).context("extractor output is not UTF-8")?;
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("extractor produced no output");
    }
    let detection: Option<Detection> =
        serde_json::from_str(text).context("parsing extractor output")?;
    if let Some(d) = &detection {
        if d.descriptor.is_empty() {
            anyhow::bail!("extractor returned an empty descriptor");
        }
        if !d.descriptor.is_finite() {
            anyhow::bail!("extractor returned a descriptor with non-finite values");
        }
    }
    Ok(detection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame() -> Frame {
        Frame::from_pixel(2, 2, Rgb([1, 2, 3]))
    }

    fn shell(script: &str, timeout: Duration) -> Result<CommandExtractor> {
        CommandExtractor::load("sh", vec!["-c".into(), script.into()], None, timeout)
    }

    #[test]
    fn test_parse_null_is_no_face() -> Result<()> {
        assert!(parse_output(b"null\n")?.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_descriptor_with_landmarks() -> Result<()> {
        let d = parse_output(br#"{"descriptor":[0.5,-0.25],"landmarks":[[1,2],[3,4]]}"#)?
            .expect("detection");
        assert_eq!(d.descriptor.values, vec![0.5, -0.25]);
        assert!(d.landmarks.is_some());
        Ok(())
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_output(b"").is_err());
        assert!(parse_output(b"{\"descriptor\":\"abc\"}").is_err());
        assert!(parse_output(b"{\"descriptor\":[]}").is_err());
    }

    #[test]
    fn test_parse_rejects_overflowing_values() {
        // 1e39 is out of f32 range and would deserialize to infinity.
        let err = parse_output(b"{\"descriptor\":[1e39,0,0]}").unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn test_load_missing_model_dir() {
        let res = CommandExtractor::load(
            "sh",
            vec![],
            Some(PathBuf::from("/nonexistent/models")),
            Duration::from_secs(1),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_command_round_trip() -> Result<()> {
        let mut ex = shell(
            r#"cat > /dev/null; echo '{"descriptor":[1.0,0.0,0.0]}'"#,
            Duration::from_secs(5),
        )?;
        let d = ex.extract(&frame())?.expect("detection");
        assert_eq!(d.descriptor.values, vec![1.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_command_no_face() -> Result<()> {
        let mut ex = shell("cat > /dev/null; echo null", Duration::from_secs(5))?;
        assert!(ex.extract(&frame())?.is_none());
        Ok(())
    }

    #[test]
    fn test_command_failure_surfaces_stderr() -> Result<()> {
        let mut ex = shell(
            "cat > /dev/null; echo 'model missing' >&2; exit 3",
            Duration::from_secs(5),
        )?;
        let err = ex.extract(&frame()).unwrap_err();
        assert!(format!("{err:#}").contains("model missing"));
        Ok(())
    }

    #[test]
    fn test_command_timeout() -> Result<()> {
        let mut ex = shell("exec sleep 5", Duration::from_millis(200))?;
        let start = Instant::now();
        let err = ex.extract(&frame()).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
        Ok(())
    }

    #[test]
    fn test_command_timeout_covers_inherited_stdout() -> Result<()> {
        // The child exits at once but a background job keeps stdout open.
        let mut ex = shell("cat > /dev/null; sleep 6 & echo null", Duration::from_secs(1))?;
        let start = Instant::now();
        let err = ex.extract(&frame()).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
        Ok(())
    }
}
