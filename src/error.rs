// Raybridge Error Handling
// Every failure the bridge itself can produce, with a colored report for startup diagnostics

use colored::*;
use std::fmt;
use std::thread::ThreadId;
use thiserror::Error;

/// Broad category of a bridge error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong environment or ABI, raised while initializing. Never retried.
    Initialization,
    /// Raised at a single call site (pinning, thread affinity, bad input)
    Call,
    /// The bridge itself described something wrong
    Defect,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Initialization => write!(f, "InitializationError"),
            ErrorKind::Call => write!(f, "CallError"),
            ErrorKind::Defect => write!(f, "BridgeDefect"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("native library '{name}' not found (tried {tried}): {reason}")]
    LibraryNotFound {
        name: String,
        tried: String,
        reason: String,
    },

    #[error("symbol '{symbol}' not found in '{library}'")]
    SymbolNotFound { library: String, symbol: String },

    #[error("version mismatch: bridge requires native version {required}, library reports {found}")]
    VersionMismatch { required: String, found: String },

    #[error("unsupported signature for '{symbol}': {reason}")]
    UnsupportedSignature { symbol: String, reason: String },

    #[error("layout mismatch for {type_name}: {detail}")]
    LayoutMismatch { type_name: String, detail: String },

    #[error("cannot pin {what}: {reason}")]
    PinFailure { what: String, reason: String },

    #[error("invalid {type_name} bytes: {reason}")]
    InvalidMirror { type_name: String, reason: String },

    #[error("call to '{symbol}' does not match its descriptor: {reason}")]
    SignatureMismatch { symbol: String, reason: String },

    #[error("graphics calls are bound to thread {owner:?}, called from {current:?}")]
    ThreadAffinity { owner: ThreadId, current: ThreadId },

    #[error("no window is open")]
    NoWindow,

    #[error("InitWindow could not open a {width}x{height} window")]
    WindowInitFailed { width: i32, height: i32 },

    #[error("bridge is not initialized")]
    NotInitialized,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::LibraryNotFound { .. }
            | BridgeError::SymbolNotFound { .. }
            | BridgeError::VersionMismatch { .. }
            | BridgeError::UnsupportedSignature { .. }
            | BridgeError::LayoutMismatch { .. }
            | BridgeError::NotInitialized
            | BridgeError::Config(_)
            | BridgeError::Io(_) => ErrorKind::Initialization,
            BridgeError::PinFailure { .. }
            | BridgeError::InvalidMirror { .. }
            | BridgeError::ThreadAffinity { .. }
            | BridgeError::NoWindow
            | BridgeError::WindowInitFailed { .. } => ErrorKind::Call,
            BridgeError::SignatureMismatch { .. } => ErrorKind::Defect,
        }
    }

    /// Initialization failures mean the installation is wrong, not that the call was unlucky
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Initialization | ErrorKind::Defect)
    }

    /// Remediation hint shown under the error in reports
    pub fn help(&self) -> Option<String> {
        match self {
            BridgeError::LibraryNotFound { name, .. } => Some(format!(
                "install the {} shared library on the loader search path, or set \"library_path\" in raybridge.json",
                name
            )),
            BridgeError::SymbolNotFound { .. } => {
                Some("the installed library was built without this export; check its version".to_string())
            }
            BridgeError::VersionMismatch { required, .. } => Some(format!(
                "this bridge only speaks the {} ABI; install that exact release",
                required
            )),
            BridgeError::LayoutMismatch { .. } => {
                Some("struct mirrors do not match this target; do not use the bridge on it".to_string())
            }
            BridgeError::ThreadAffinity { .. } => Some(
                "create the window and issue every graphics call from the same thread".to_string(),
            ),
            BridgeError::NoWindow => Some("call Bridge::init_window first".to_string()),
            BridgeError::WindowInitFailed { .. } => {
                Some("raylib logs the platform reason at warning level; route the native log to see it".to_string())
            }
            BridgeError::NotInitialized => {
                Some("call raybridge::initialize() before using the bridge".to_string())
            }
            _ => None,
        }
    }

    /// Format the error for a terminal
    pub fn format(&self) -> String {
        let mut output = format!(
            "{}: {}\n",
            self.kind().to_string().red().bold(),
            self.to_string().white().bold()
        );
        if let Some(help) = self.help() {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }
        output
    }

    pub(crate) fn unsupported(symbol: &str, reason: impl Into<String>) -> Self {
        BridgeError::UnsupportedSignature {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn pin_failure(what: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::PinFailure {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_mirror(type_name: &str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidMirror {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::ffi::NulError> for BridgeError {
    fn from(e: std::ffi::NulError) -> Self {
        BridgeError::pin_failure(
            "string argument",
            format!("interior NUL byte at position {}", e.nul_position()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_names_both_versions() {
        let err = BridgeError::VersionMismatch {
            required: "5.5".into(),
            found: "5.0".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("5.5"));
        assert!(msg.contains("5.0"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_kinds() {
        let pin = BridgeError::pin_failure("slice", "too long");
        assert_eq!(pin.kind(), ErrorKind::Call);
        assert!(!pin.is_fatal());

        let defect = BridgeError::SignatureMismatch {
            symbol: "add".into(),
            reason: "expected 2 arguments, got 1".into(),
        };
        assert_eq!(defect.kind(), ErrorKind::Defect);
        assert!(defect.is_fatal());
    }

    #[test]
    fn test_nul_error_becomes_pin_failure() {
        let err: BridgeError = std::ffi::CString::new("a\0b").unwrap_err().into();
        assert!(matches!(err, BridgeError::PinFailure { .. }));
        assert!(err.to_string().contains("position 1"));
    }

    #[test]
    fn test_format_includes_help() {
        colored::control::set_override(false);
        let err = BridgeError::NotInitialized;
        let report = err.format();
        assert!(report.starts_with("InitializationError: bridge is not initialized"));
        assert!(report.contains("Help: call raybridge::initialize()"));
    }
}
