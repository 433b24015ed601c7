//! Feature-gated failpoint injection for crash testing.
//!
//! Compile with `--features failpoints` to enable injection. Without the
//! feature, [`fp!`](crate::fp) expands to `Ok(())` and nothing is registered.
//!
//! Injection points used by the store:
//!
//! | Name | Where |
//! |------|-------|
//! | `FP_WRITE_BEFORE_RENAME` | after all temp files are fsynced, before the first rename |
//! | `FP_SAVE_AFTER_STAGE` | after the staging directory is complete, before the swap |
//! | `FP_SAVE_AFTER_BACKUP` | between moving the old root aside and moving staging in |

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

/// Actions a failpoint can take when triggered.
#[derive(Clone, Debug)]
pub enum FailpointAction {
    /// No-op (default).
    Off,
    /// Return an error with the given message.
    Error(String),
    /// Panic with the given message.
    Panic(String),
}

static REGISTRY: LazyLock<Mutex<HashMap<&'static str, FailpointAction>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Set a failpoint action.
pub fn set(name: &'static str, action: FailpointAction) {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name, action);
}

/// Clear a specific failpoint.
pub fn clear(name: &'static str) {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(name);
}

/// Clear all failpoints.
pub fn clear_all() {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// Check if a failpoint is set and execute its action.
///
/// # Errors
/// Returns the configured message for an `Error` action.
///
/// # Panics
/// Panics if the failpoint action is `Panic`.
pub fn check(name: &str) -> Result<(), String> {
    let action = REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned();
    match action {
        None | Some(FailpointAction::Off) => Ok(()),
        Some(FailpointAction::Error(msg)) => Err(format!("failpoint {name}: {msg}")),
        Some(FailpointAction::Panic(msg)) => panic!("failpoint {name}: {msg}"),
    }
}

/// Failpoint injection point.
///
/// With `failpoints`: checks the registry and may return `Err(String)` or panic.
/// Without it: `Ok::<(), String>(())`.
///
/// Usage: `fp!("FP_SAVE_AFTER_STAGE")?;` inside a function returning a type
/// with `From<String>`, or map the error explicitly.
#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        $crate::failpoints::check($name)
    };
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        Ok::<(), String>(())
    };
}
