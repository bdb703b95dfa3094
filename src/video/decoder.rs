//! External decoder subprocess
//!
//! The decoder reads the raw stream on stdin and writes fixed-size BGR frames
//! on stdout. It is started once per session and never restarted.

use parking_lot::Mutex;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::config::VideoConfig;
use crate::error::VideoError;

/// Owned decoder child process with piped stdin/stdout
pub struct DecoderProcess {
    child: Mutex<Child>,
    program: String,
}

impl DecoderProcess {
    /// Spawn the configured decoder. Returns the process and its two pipes.
    pub fn spawn(config: &VideoConfig) -> Result<(Self, ChildStdin, ChildStdout), VideoError> {
        let args = config.resolved_args();
        let mut child = Command::new(&config.decoder_program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VideoError::DecoderSpawn(format!("{}: {}", config.decoder_program, e)))?;

        let stdin = child.stdin.take().ok_or(VideoError::PipeUnavailable)?;
        let stdout = child.stdout.take().ok_or(VideoError::PipeUnavailable)?;

        tracing::info!(
            "Decoder started: {} {} (pid {})",
            config.decoder_program,
            args.join(" "),
            child.id()
        );

        Ok((
            Self {
                child: Mutex::new(child),
                program: config.decoder_program.clone(),
            },
            stdin,
            stdout,
        ))
    }

    /// Exit description if the process has terminated, `None` while running
    pub fn exit_status(&self) -> Option<String> {
        match self.child.lock().try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("status unavailable: {}", e)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.exit_status().is_none()
    }

    pub fn id(&self) -> u32 {
        self.child.lock().id()
    }

    /// Forcibly terminate and reap the process
    pub fn kill(&self) {
        let mut child = self.child.lock();
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Err(e) = child.kill() {
            tracing::warn!("Failed to kill decoder {}: {}", self.program, e);
        }
        let _ = child.wait();
        tracing::info!("Decoder {} terminated", self.program);
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn cat_config() -> VideoConfig {
        VideoConfig {
            decoder_program: "cat".into(),
            decoder_args: Vec::new(),
            ..VideoConfig::default()
        }
    }

    #[test]
    fn test_passthrough_and_exit_detection() {
        let (decoder, mut stdin, mut stdout) = DecoderProcess::spawn(&cat_config()).unwrap();
        assert!(decoder.is_running());

        stdin.write_all(b"abc").unwrap();
        drop(stdin);

        let mut out = Vec::new();
        stdout.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");

        let mut status = None;
        for _ in 0..100 {
            status = decoder.exit_status();
            if status.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(status.is_some());
    }

    #[test]
    fn test_missing_program() {
        let config = VideoConfig {
            decoder_program: "definitely-not-a-decoder-binary".into(),
            ..VideoConfig::default()
        };
        assert!(matches!(DecoderProcess::spawn(&config), Err(VideoError::DecoderSpawn(_))));
    }

    #[test]
    fn test_kill() {
        let (decoder, _stdin, _stdout) = DecoderProcess::spawn(&cat_config()).unwrap();
        decoder.kill();
        assert!(!decoder.is_running());
    }
}
