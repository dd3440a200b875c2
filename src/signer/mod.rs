//! Signer collaborator interface
//!
//! The batch core only needs a three-way classification of each signing
//! attempt: success, authentication rejection, or any other failure. How the
//! request travels to the signing service is up to the [`Signer`]
//! implementation.

pub mod command;

pub use command::CommandSigner;

use crate::credentials::Credentials;
use crate::error::SignError;
use std::collections::BTreeMap;
use std::io::Write;

/// Context key carrying the original file name
pub const CONTEXT_FILENAME: &str = "FILENAME";

/// Per-request key/value context passed through to the signer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    entries: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from user metadata
    pub fn with_metadata<'a, I>(metadata: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        Self {
            entries: metadata
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Something that can turn document bytes into signed bytes
///
/// Shared by every worker thread. Credentials are passed per call because
/// the password can change between attempts.
pub trait Signer: Send + Sync {
    fn sign(
        &self,
        data: &[u8],
        output: &mut dyn Write,
        context: &RequestContext,
        credentials: &Credentials,
    ) -> Result<(), SignError>;
}
