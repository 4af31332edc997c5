// Raybridge
// Native interop bridge for the raylib 5.5 C ABI

pub mod abi;
pub mod binding;
pub mod bridge;
pub mod callback;
pub mod config;
pub mod error;
pub mod invoke;
pub mod loader;
pub mod pin;
pub mod raylib;
pub mod version;

pub use abi::buffer::{release_native, NativeBuffer, OwnedBuffer};
pub use abi::mirror::*;
pub use abi::{AbiMirror, AbiType, Address, NativeType, Primitive};
pub use binding::{Backend, Binding};
pub use bridge::{Bridge, GraphicsContext};
pub use callback::{forward_to_tracing, CallbackKind, TraceLogLevel, TrampolineHandle, TrampolineState};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use invoke::{CallDescriptor, NativeValue};
pub use loader::{NativeHandle, NativeLibrary, SymbolSource, SymbolTable};
pub use pin::{pin_scope, PinSet, PinnedSlice};
pub use raylib::{ActiveRaylib, RaylibApi, REQUIRED_VERSION};
pub use version::VersionGuard;

use once_cell::sync::OnceCell;

// Process-wide bridge; set once by the first successful initialize()
static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Initialize the process-wide bridge.
///
/// Concurrent first calls are safe: exactly one runs the startup sequence.
/// After a success, later calls return the same bridge and ignore `config`.
/// A failure leaves the bridge uninitialized.
pub fn initialize(config: BridgeConfig) -> BridgeResult<&'static Bridge> {
    BRIDGE.get_or_try_init(|| {
        let bridge = Bridge::open(config)?;
        bridge.apply_log_config()?;
        Ok(bridge)
    })
}

/// The process-wide bridge, or `NotInitialized`
pub fn bridge() -> BridgeResult<&'static Bridge> {
    BRIDGE.get().ok_or(BridgeError::NotInitialized)
}

pub fn is_initialized() -> bool {
    BRIDGE.get().is_some()
}
