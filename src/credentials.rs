//! Credentials and the password prompt collaborator

use crate::error::CredentialError;
use dialoguer::Password;
use std::fmt;

/// Username and password presented to the signer
///
/// The username is fixed for the batch. The password is replaced when the
/// coordinator re-prompts after an authentication rejection.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of replacement passwords
///
/// Called while the coordinator holds its lock, so implementations block
/// every other worker until they return.
pub trait PasswordPrompt: Send + Sync {
    fn prompt_for_password(&self, username: &str) -> Result<String, CredentialError>;
}

/// Prompts on the controlling terminal without echo
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    /// Ask for the first password when only a username was given
    pub fn initial_password(&self, username: &str) -> Result<String, CredentialError> {
        read_password(format!("Password for user '{}'", username), username)
    }
}

impl PasswordPrompt for ConsolePrompt {
    fn prompt_for_password(&self, username: &str) -> Result<String, CredentialError> {
        read_password(
            format!("Enter correct password for user '{}'", username),
            username,
        )
    }
}

fn read_password(prompt: String, username: &str) -> Result<String, CredentialError> {
    Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()
        .map_err(|e| CredentialError::PromptFailed {
            username: username.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("alice", "s3cret");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("s3cret"));
    }
}
