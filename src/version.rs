// Raybridge Version Guard
// Refuses any native library whose reported version differs from the bound one

use crate::abi::{AbiType, Address, Primitive};
use crate::error::{BridgeError, BridgeResult};
use crate::invoke::CallDescriptor;
use crate::loader::SymbolSource;
use serde::Serialize;
use std::ffi::CStr;
use std::os::raw::c_char;

/// Reported in place of a version string when the library returns null
pub const NULL_VERSION: &str = "<null>";

/// How a library exports its version string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VersionExport {
    /// `const char *version(void)`
    Function,
    /// `const char *version;` (raylib's `raylib_version`)
    Data,
}

impl VersionExport {
    /// Fetch the version string behind a resolved export
    ///
    /// # Safety
    /// `address` must be the export's address and match this shape.
    pub unsafe fn read(self, address: Address, symbol: &str) -> BridgeResult<Option<String>> {
        let raw = match self {
            VersionExport::Function => {
                let descriptor = CallDescriptor::build(
                    address,
                    symbol,
                    AbiType::from(Primitive::Pointer),
                    Vec::new(),
                )?;
                descriptor.call::<*const c_char>(&[])
            }
            VersionExport::Data => *address.as_ptr::<*const c_char>(),
        };
        Ok(read_version(raw))
    }
}

/// Read a NUL-terminated version string
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn read_version(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct VersionGuard {
    required: String,
}

impl VersionGuard {
    pub fn new(required: &str) -> Self {
        VersionGuard {
            required: required.to_string(),
        }
    }

    pub fn required(&self) -> &str {
        &self.required
    }

    /// Exact comparison; "5.5" and "5.5.0" are different versions
    pub fn check(&self, found: &str) -> BridgeResult<()> {
        if found == self.required {
            Ok(())
        } else {
            Err(BridgeError::VersionMismatch {
                required: self.required.clone(),
                found: found.to_string(),
            })
        }
    }

    /// Resolve the version export, read it, and check it
    pub fn verify(
        &self,
        source: &dyn SymbolSource,
        symbol: &str,
        export: VersionExport,
    ) -> BridgeResult<String> {
        let address = source.resolve(symbol)?;
        // SAFETY: the binding declares the export's shape
        let found = unsafe { export.read(address, symbol)? }
            .unwrap_or_else(|| NULL_VERSION.to_string());
        self.check(&found)?;
        Ok(found)
    }
}
