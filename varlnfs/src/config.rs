//! The two-line config file format.
//!
//! ```text
//! <fallback>\n<variable-name>\n
//! ```
//!
//! Line 1 is the static fallback target. Line 2, when present and non-empty,
//! names the environment variable consulted first. There is no escaping and
//! no further lines carry meaning.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, VarlnError};

/// Resolution policy of one virtual entry, borrowed from the mapped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigEntry<'a> {
    pub fallback: &'a [u8],
    pub variable: Option<&'a [u8]>,
}

impl<'a> ConfigEntry<'a> {
    /// Parse the raw contents of a config file. `path` is only used in logs.
    pub fn parse(content: &'a [u8], path: &Path) -> Result<Self> {
        debug!("Parsing configuration file {}.", path.display());
        if content.is_empty() {
            warn!("Config file {} is empty. Ignoring.", path.display());
            return Err(VarlnError::NotFound(format!(
                "{}: empty config file",
                path.display()
            )));
        }

        let Some(nl) = content.iter().position(|&b| b == b'\n') else {
            return Ok(Self {
                fallback: content,
                variable: None,
            });
        };
        let rest = &content[nl + 1..];
        let line = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => &rest[..end],
            None => rest,
        };

        Ok(Self {
            fallback: &content[..nl],
            variable: (!line.is_empty()).then_some(line),
        })
    }
}
