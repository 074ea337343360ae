//! Bridge construction settings.
//!
//! Grounded on `Ikaleio-geofront`'s `GeofrontOptions`: a plain serde struct
//! with an `env`-overridable entry point, rather than the teacher's VCL
//! `.vcc`-generated parameter struct, which has no analogue here.

use std::path::PathBuf;

/// How to launch (or locate) the interpreter subprocess, and how wide its
/// integer arguments are.
///
/// There is deliberately no `handshake_timeout` field: the liveness
/// handshake is a single blocking read with no independent timeout layered
/// on top, matching the rest of this crate's fully synchronous I/O model.
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path to the interpreter executable. `None` defers to
    /// `BRIDGE_INTERPRETER`, then to `"python3"` on `$PATH`.
    pub interpreter: Option<PathBuf>,
    /// Width in bytes of every packed integer argument on the wire.
    pub integer_width: usize,
    /// Extra arguments appended after the mandatory read-fd/write-fd/width
    /// triple.
    pub extra_args: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            interpreter: None,
            integer_width: 8,
            extra_args: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset. Only `BRIDGE_INTERPRETER` is consulted; width and
    /// extra arguments have no environment-variable form.
    pub fn from_env() -> Self {
        let interpreter = std::env::var_os("BRIDGE_INTERPRETER").map(PathBuf::from);
        BridgeConfig {
            interpreter,
            ..BridgeConfig::default()
        }
    }

    /// Parse a config from a JSON document (e.g. loaded from a file). Only
    /// available with the `serde` feature.
    #[cfg(feature = "serde")]
    pub fn from_json_str(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub(crate) fn resolve_interpreter(&self) -> String {
        if let Some(path) = &self.interpreter {
            return path.to_string_lossy().into_owned();
        }
        if let Some(env) = std::env::var_os("BRIDGE_INTERPRETER") {
            return env.to_string_lossy().into_owned();
        }
        "python3".to_string()
    }
}
