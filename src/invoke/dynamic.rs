// Raybridge Dynamic Invoker
// Runtime calls through prepared libffi call interfaces

use super::{NativeValue, ReturnSlot};
use crate::abi::{AbiType, Address, NativeType, Primitive};
use crate::error::{BridgeError, BridgeResult};
use libffi::middle::{Cif, CodePtr};
use smallvec::SmallVec;
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// One bound native function: address, argument and return shapes, and the
/// prepared call interface. Built once at initialization, immutable after.
pub struct CallDescriptor {
    symbol: String,
    address: Address,
    code: CodePtr,
    cif: Cif,
    return_type: AbiType,
    argument_types: Vec<AbiType>,
    widened_return: bool,
}

// SAFETY: the cif and code pointer are never mutated after build, and libffi
// only reads them during ffi_call.
unsafe impl Send for CallDescriptor {}
unsafe impl Sync for CallDescriptor {}

impl CallDescriptor {
    pub fn build(
        address: Address,
        symbol: &str,
        return_type: AbiType,
        argument_types: Vec<AbiType>,
    ) -> BridgeResult<Self> {
        if address.is_null() {
            return Err(BridgeError::unsupported(symbol, "null code address"));
        }

        let ffi_return = return_type.ffi_type(symbol)?;
        let mut ffi_args = Vec::with_capacity(argument_types.len());
        for (index, ty) in argument_types.iter().enumerate() {
            if ty.is_void() {
                return Err(BridgeError::unsupported(
                    symbol,
                    format!("argument {} is void", index),
                ));
            }
            ffi_args.push(ty.ffi_type(symbol)?);
        }

        // libffi::middle reports a failed ffi_prep_cif by panicking
        let cif = panic::catch_unwind(AssertUnwindSafe(|| Cif::new(ffi_args, ffi_return)))
            .map_err(|_| BridgeError::unsupported(symbol, "libffi rejected the type list"))?;

        let widened_return = match &return_type {
            AbiType::Primitive(p) => p.is_integral() && p.size() < size_of::<usize>(),
            _ => false,
        };

        debug!(
            symbol,
            args = argument_types.len(),
            ret = %return_type,
            "built call descriptor"
        );

        Ok(CallDescriptor {
            symbol: symbol.to_string(),
            address,
            code: CodePtr::from_ptr(address.as_ptr::<c_void>()),
            cif,
            return_type,
            argument_types,
            widened_return,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn return_type(&self) -> &AbiType {
        &self.return_type
    }

    pub fn argument_types(&self) -> &[AbiType] {
        &self.argument_types
    }

    /// Typed call used by generated bindings.
    ///
    /// # Safety
    /// `args` must hold one pointer per argument, each pointing to a value of
    /// the described type, and `R` must match the described return type.
    pub unsafe fn call<R: NativeType>(&self, args: &[*mut c_void]) -> R {
        debug_assert_eq!(args.len(), self.argument_types.len(), "{}", self.symbol);
        debug_assert!(size_of::<R>() == self.return_type.size(), "{}", self.symbol);
        let mut slot = ReturnSlot::new(self.return_type.size());
        self.call_raw(args, slot.as_mut_ptr());
        slot.read::<R>(self.widened_return)
    }

    /// Checked call over tagged values; a mismatch with the descriptor is a defect.
    ///
    /// # Safety
    /// Pointer arguments must be valid for whatever the native function does with them.
    pub unsafe fn invoke(&self, args: &[NativeValue]) -> BridgeResult<NativeValue> {
        if args.len() != self.argument_types.len() {
            return Err(self.mismatch(format!(
                "expected {} arguments, got {}",
                self.argument_types.len(),
                args.len()
            )));
        }
        for (index, (value, ty)) in args.iter().zip(&self.argument_types).enumerate() {
            if !value.matches(ty) {
                return Err(self.mismatch(format!(
                    "argument {} is {}, descriptor says {}",
                    index,
                    value.type_name(),
                    ty
                )));
            }
        }

        let pointers: SmallVec<[*mut c_void; 8]> =
            args.iter().map(NativeValue::as_arg_ptr).collect();
        let mut slot = ReturnSlot::new(self.return_type.size());
        self.call_raw(&pointers, slot.as_mut_ptr());
        Ok(slot.to_value(&self.return_type, self.widened_return))
    }

    unsafe fn call_raw(&self, args: &[*mut c_void], ret: *mut c_void) {
        libffi::raw::ffi_call(
            self.cif.as_raw_ptr(),
            Some(*self.code.as_fun()),
            ret,
            args.as_ptr() as *mut *mut c_void,
        );
    }

    fn mismatch(&self, reason: String) -> BridgeError {
        BridgeError::SignatureMismatch {
            symbol: self.symbol.clone(),
            reason,
        }
    }
}

impl fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("symbol", &self.symbol)
            .field("address", &self.address)
            .field("return_type", &self.return_type)
            .field("argument_types", &self.argument_types)
            .finish()
    }
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.symbol)?;
        for (i, ty) in self.argument_types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        write!(f, ")")?;
        if !matches!(self.return_type, AbiType::Primitive(Primitive::Void)) {
            write!(f, " -> {}", self.return_type)?;
        }
        Ok(())
    }
}
