//! Turns a config entry and the caller's environment into a link target.

use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::config::ConfigEntry;
use crate::environ::EnvironSource;
use crate::error::{Result, VarlnError};

/// Where a resolved target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Environment,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Bytes written to the output buffer.
    pub len: usize,
    pub origin: Origin,
}

/// Resolve `entry` for the process `caller`, writing the target into `buf`.
///
/// A value taken from the environment is written whole or rejected with
/// [`VarlnError::ValueTooLarge`] when it needs `buf.len()` bytes or more.
/// The fallback is cut to `buf.len()` bytes without an error.
pub fn resolve<E>(entry: &ConfigEntry<'_>, caller: Pid, env: &E, buf: &mut [u8]) -> Result<Resolution>
where
    E: EnvironSource + ?Sized,
{
    if let Some(name) = entry.variable.filter(|name| !name.is_empty()) {
        debug!(
            "Looking up {} in the environment of {caller}.",
            String::from_utf8_lossy(name)
        );
        match env.snapshot(caller) {
            Ok(snapshot) => {
                if let Some(value) = snapshot.get(name).filter(|v| !v.is_empty()) {
                    if value.len() >= buf.len() {
                        return Err(VarlnError::ValueTooLarge {
                            len: value.len(),
                            capacity: buf.len(),
                        });
                    }
                    buf[..value.len()].copy_from_slice(value);
                    return Ok(Resolution {
                        len: value.len(),
                        origin: Origin::Environment,
                    });
                }
            }
            Err(e @ VarlnError::OutOfMemory(_)) => return Err(e),
            Err(e) => warn!("Environment of {caller} unavailable, using fallback: {e}"),
        }
    }

    let len = entry.fallback.len().min(buf.len());
    buf[..len].copy_from_slice(&entry.fallback[..len]);
    Ok(Resolution {
        len,
        origin: Origin::Fallback,
    })
}
