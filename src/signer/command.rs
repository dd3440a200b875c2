//! Signer that delegates to an external program
//!
//! The program receives the document on stdin and must write the signed
//! document to stdout. Credentials and request context are exported as
//! environment variables. The exit status decides the outcome:
//!
//! | status            | outcome                          |
//! |-------------------|----------------------------------|
//! | 0                 | success                          |
//! | auth exit code    | authentication rejected          |
//! | 65 (EX_DATAERR)   | illegal request                  |
//! | 69 (EX_UNAVAILABLE) | crypto token offline           |
//! | 70 (EX_SOFTWARE)  | server error                     |
//! | anything else     | unknown failure                  |

use super::{RequestContext, Signer};
use crate::credentials::Credentials;
use crate::error::{FailureKind, SignError};
use std::io::{ErrorKind, Write};
use std::process::{Command, Output, Stdio};
use std::thread;
use tracing::trace;

/// Default exit status meaning "credentials rejected" (EX_NOPERM)
pub const DEFAULT_AUTH_EXIT_CODE: i32 = 77;

pub const ENV_USERNAME: &str = "SIGN_BATCH_USERNAME";
pub const ENV_PASSWORD: &str = "SIGN_BATCH_PASSWORD";
pub const ENV_CONTEXT_PREFIX: &str = "SIGN_BATCH_CTX_";

const EX_DATAERR: i32 = 65;
const EX_UNAVAILABLE: i32 = 69;
const EX_SOFTWARE: i32 = 70;

/// Runs one process per signing request
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: String,
    args: Vec<String>,
    auth_exit_code: i32,
}

impl CommandSigner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            auth_exit_code: DEFAULT_AUTH_EXIT_CODE,
        }
    }

    /// Set the exit status that signals an authentication rejection
    pub fn auth_exit_code(mut self, code: i32) -> Self {
        self.auth_exit_code = code;
        self
    }

    fn run(
        &self,
        data: &[u8],
        context: &RequestContext,
        credentials: &Credentials,
    ) -> Result<Output, SignError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(ENV_USERNAME, &credentials.username)
            .env(ENV_PASSWORD, &credentials.password);

        for (key, value) in context.iter() {
            command.env(format!("{}{}", ENV_CONTEXT_PREFIX, env_key(key)), value);
        }

        let mut child = command.spawn().map_err(|e| {
            SignError::Transport(format!("Failed to start '{}': {}", self.program, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SignError::Transport("Signer stdin unavailable".into()))?;

        // Feed stdin from a scoped thread so a large stdout cannot deadlock us
        let (fed, output) = thread::scope(|s| {
            let feeder = s.spawn(move || stdin.write_all(data));
            let output = child.wait_with_output();
            (feeder.join(), output)
        });

        match fed {
            Ok(Ok(())) => {}
            // The program may exit without consuming its input
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(SignError::Io(e)),
            Err(_) => return Err(SignError::Transport("Signer stdin writer panicked".into())),
        }

        Ok(output?)
    }

    fn classify(&self, output: &Output) -> SignError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        let Some(code) = output.status.code() else {
            return SignError::Transport(format!("'{}' terminated by signal", self.program));
        };

        let detail = if stderr.is_empty() {
            format!("'{}' exited with status {}", self.program, code)
        } else {
            stderr
        };

        if code == self.auth_exit_code {
            return SignError::AuthenticationRequired { detail };
        }

        let kind = match code {
            EX_DATAERR => FailureKind::IllegalRequest,
            EX_UNAVAILABLE => FailureKind::CryptoTokenOffline,
            EX_SOFTWARE => FailureKind::Server,
            _ => FailureKind::Unknown,
        };

        SignError::Rejected { kind, detail }
    }
}

impl Signer for CommandSigner {
    fn sign(
        &self,
        data: &[u8],
        output: &mut dyn Write,
        context: &RequestContext,
        credentials: &Credentials,
    ) -> Result<(), SignError> {
        let result = self.run(data, context, credentials)?;

        trace!(
            program = %self.program,
            status = ?result.status.code(),
            bytes = result.stdout.len(),
            "Signer process finished"
        );

        if !result.status.success() {
            return Err(self.classify(&result));
        }

        output.write_all(&result.stdout)?;
        Ok(())
    }
}

/// Map a context key to an environment-safe suffix
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
