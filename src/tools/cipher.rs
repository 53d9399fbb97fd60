//! External streaming cipher
//!
//! Wraps the configured symmetric cipher command (gpg-style: plaintext on
//! stdin, ciphertext on stdout, or the reverse). The passphrase reaches the
//! child only through its environment; it never appears on the command
//! line.

use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crate::config::CipherCommand;
use crate::error::{SnapkeepError, SnapkeepResult, VerifyFailure};
use crate::secrets::Passphrase;
use crate::verify::{DecryptStreamError, Decryptor};

/// A cipher invocation bound to its configuration
pub struct CommandCipher {
    cmd: CipherCommand,
}

impl CommandCipher {
    pub fn new(cmd: CipherCommand) -> Self {
        Self { cmd }
    }

    /// Build the command, injecting the passphrase into the child env
    fn command(&self) -> SnapkeepResult<Command> {
        let mut command = Command::new(&self.cmd.program);
        command.args(&self.cmd.args);
        if let Some(var) = &self.cmd.passphrase_env {
            let secret = Passphrase::from_env(var)?;
            command.env(var, secret.expose());
        }
        Ok(command)
    }

    /// Spawn the cipher as a filter over an already-piped stdin
    ///
    /// Used on the encrypt side of the archive pipeline, where stdin comes
    /// straight from the producer's stdout.
    pub fn spawn_filter(&self, stdin: Stdio) -> SnapkeepResult<Child> {
        let mut command = self.command()?;
        command.stdin(stdin).stdout(Stdio::piped()).stderr(Stdio::piped());
        command
            .spawn()
            .map_err(|e| SnapkeepError::Tool(format!("{}: failed to start: {}", self.cmd.program, e)))
    }
}

impl Decryptor for CommandCipher {
    fn decrypt(&self, input: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>, VerifyFailure> {
        let mut command = self
            .command()
            .map_err(|e| VerifyFailure::decrypt(e.to_string()))?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| VerifyFailure::decrypt(format!("{}: failed to start: {}", self.cmd.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VerifyFailure::decrypt("decryptor stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VerifyFailure::decrypt("decryptor stdout unavailable"))?;

        // Feed the ciphertext from a separate thread so reading the
        // plaintext cannot deadlock against a full stdin pipe.
        let mut input = input;
        let writer = std::thread::spawn(move || {
            let _ = io::copy(&mut input, &mut stdin);
        });

        Ok(Box::new(ChildStreamReader {
            child: Some(child),
            stdout,
            writer: Some(writer),
        }))
    }
}

/// Reader over a child's stdout that surfaces a non-zero exit as a
/// [`DecryptStreamError`] at end of stream
struct ChildStreamReader {
    child: Option<Child>,
    stdout: ChildStdout,
    writer: Option<JoinHandle<()>>,
}

impl Read for ChildStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stdout.read(buf)?;
        if n == 0 {
            if let Some(writer) = self.writer.take() {
                let _ = writer.join();
            }
            if let Some(mut child) = self.child.take() {
                let mut stderr_text = String::new();
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut stderr_text);
                }
                let status = child.wait()?;
                if !status.success() {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        DecryptStreamError(format!(
                            "decryptor exited with {}: {}",
                            status,
                            stderr_text.trim()
                        )),
                    ));
                }
            }
        }
        Ok(n)
    }
}

impl Drop for ChildStreamReader {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}
