// Raybridge Invocation
// Values crossing the call boundary and the return-slot rules shared by both backends

mod dynamic;

pub use dynamic::CallDescriptor;

use crate::abi::{AbiMirror, AbiType, Address, Primitive};
use crate::error::{BridgeError, BridgeResult};
use smallvec::{smallvec, SmallVec};
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::ptr;

/// Pointer to an argument value, in the form `ffi_call` expects
#[inline]
pub fn arg<T>(value: &T) -> *mut c_void {
    value as *const T as *mut c_void
}

/// Raw bytes of a struct passed or returned by value, kept 8-byte aligned
#[derive(Clone)]
pub struct AbiBytes {
    name: String,
    words: SmallVec<[u64; 8]>,
    len: usize,
}

impl AbiBytes {
    pub fn new(name: &str, bytes: &[u8]) -> Self {
        let mut words: SmallVec<[u64; 8]> = smallvec![0; (bytes.len() + 7) / 8];
        // SAFETY: words holds at least bytes.len() bytes
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), words.as_mut_ptr() as *mut u8, bytes.len());
        }
        AbiBytes {
            name: name.to_string(),
            words,
            len: bytes.len(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    fn as_ptr(&self) -> *mut c_void {
        self.words.as_ptr() as *mut c_void
    }
}

impl PartialEq for AbiBytes {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for AbiBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02x?}", self.name, self.as_bytes())
    }
}

/// A tagged argument or return value for descriptor-checked calls
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Void,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Pointer(Address),
    Struct(AbiBytes),
}

impl NativeValue {
    pub fn from_mirror<T: AbiMirror>(value: &T) -> Self {
        NativeValue::Struct(AbiBytes::new(T::NAME, &value.to_native()))
    }

    pub fn to_mirror<T: AbiMirror>(&self) -> BridgeResult<T> {
        match self {
            NativeValue::Struct(bytes) if bytes.name == T::NAME => T::mirror_of(bytes.as_bytes()),
            other => Err(BridgeError::invalid_mirror(
                T::NAME,
                format!("value is {}", other.type_name()),
            )),
        }
    }

    pub fn type_name(&self) -> String {
        let name = match self {
            NativeValue::Void => "void",
            NativeValue::Bool(_) => "bool",
            NativeValue::I8(_) => "i8",
            NativeValue::U8(_) => "u8",
            NativeValue::I16(_) => "i16",
            NativeValue::U16(_) => "u16",
            NativeValue::I32(_) => "i32",
            NativeValue::U32(_) => "u32",
            NativeValue::I64(_) => "i64",
            NativeValue::U64(_) => "u64",
            NativeValue::F32(_) => "f32",
            NativeValue::F64(_) => "f64",
            NativeValue::Pointer(_) => "ptr",
            NativeValue::Struct(bytes) => return bytes.name.clone(),
        };
        name.to_string()
    }

    pub fn matches(&self, ty: &AbiType) -> bool {
        use Primitive as P;
        match (self, ty) {
            (NativeValue::Struct(bytes), AbiType::Aggregate(_) | AbiType::Array { .. }) => {
                bytes.name == ty.to_string() && bytes.len == ty.size()
            }
            (value, AbiType::Primitive(kind)) => matches!(
                (value, kind),
                (NativeValue::Bool(_), P::Bool)
                    | (NativeValue::I8(_), P::I8)
                    | (NativeValue::U8(_), P::U8)
                    | (NativeValue::I16(_), P::I16)
                    | (NativeValue::U16(_), P::U16)
                    | (NativeValue::I32(_), P::I32)
                    | (NativeValue::U32(_), P::U32)
                    | (NativeValue::I64(_), P::I64)
                    | (NativeValue::U64(_), P::U64)
                    | (NativeValue::F32(_), P::F32)
                    | (NativeValue::F64(_), P::F64)
                    | (NativeValue::Pointer(_), P::Pointer)
            ),
            _ => false,
        }
    }

    fn as_arg_ptr(&self) -> *mut c_void {
        match self {
            NativeValue::Void => ptr::null_mut(),
            NativeValue::Bool(v) => arg(v),
            NativeValue::I8(v) => arg(v),
            NativeValue::U8(v) => arg(v),
            NativeValue::I16(v) => arg(v),
            NativeValue::U16(v) => arg(v),
            NativeValue::I32(v) => arg(v),
            NativeValue::U32(v) => arg(v),
            NativeValue::I64(v) => arg(v),
            NativeValue::U64(v) => arg(v),
            NativeValue::F32(v) => arg(v),
            NativeValue::F64(v) => arg(v),
            NativeValue::Pointer(v) => arg(v),
            NativeValue::Struct(bytes) => bytes.as_ptr(),
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for NativeValue {
                fn from(v: $ty) -> Self {
                    NativeValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_value!(
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Address => Pointer,
);

/// Return buffer for `ffi_call`: at least one `ffi_arg` wide and 8-byte aligned
pub(crate) struct ReturnSlot {
    words: SmallVec<[u64; 8]>,
}

impl ReturnSlot {
    pub(crate) fn new(size: usize) -> Self {
        let bytes = size.max(size_of::<u64>());
        ReturnSlot {
            words: smallvec![0; (bytes + 7) / 8],
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        self.words.as_mut_ptr() as *mut c_void
    }

    /// Byte offset of an `R`-sized value libffi stored widened to `ffi_arg`
    fn offset(size: usize, widened: bool) -> usize {
        if widened && cfg!(target_endian = "big") {
            size_of::<usize>().saturating_sub(size)
        } else {
            0
        }
    }

    /// # Safety
    /// The slot must hold a value of type `R` written by the call.
    pub(crate) unsafe fn read<R>(&self, widened: bool) -> R {
        let base = self.words.as_ptr() as *const u8;
        ptr::read_unaligned(base.add(Self::offset(size_of::<R>(), widened)) as *const R)
    }

    pub(crate) unsafe fn to_value(&self, ty: &AbiType, widened: bool) -> NativeValue {
        match ty {
            AbiType::Primitive(kind) => match kind {
                Primitive::Void => NativeValue::Void,
                Primitive::Bool => NativeValue::Bool(self.read::<u8>(widened) != 0),
                Primitive::I8 => NativeValue::I8(self.read(widened)),
                Primitive::U8 => NativeValue::U8(self.read(widened)),
                Primitive::I16 => NativeValue::I16(self.read(widened)),
                Primitive::U16 => NativeValue::U16(self.read(widened)),
                Primitive::I32 => NativeValue::I32(self.read(widened)),
                Primitive::U32 => NativeValue::U32(self.read(widened)),
                Primitive::I64 => NativeValue::I64(self.read(widened)),
                Primitive::U64 => NativeValue::U64(self.read(widened)),
                Primitive::F32 => NativeValue::F32(self.read(widened)),
                Primitive::F64 => NativeValue::F64(self.read(widened)),
                Primitive::Pointer => NativeValue::Pointer(self.read(widened)),
            },
            AbiType::Array { .. } | AbiType::Aggregate(_) => {
                let bytes = std::slice::from_raw_parts(self.words.as_ptr() as *const u8, ty.size());
                NativeValue::Struct(AbiBytes::new(&ty.to_string(), bytes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::mirror::{Rectangle, Vector3};
    use crate::abi::NativeType;

    #[test]
    fn test_matches() {
        assert!(NativeValue::I32(1).matches(&i32::abi_type()));
        assert!(!NativeValue::I32(1).matches(&u32::abi_type()));
        assert!(NativeValue::Pointer(Address::NULL).matches(&Primitive::Pointer.into()));
        let v = NativeValue::from_mirror(&Vector3::default());
        assert!(v.matches(&Vector3::abi_type()));
        assert!(!v.matches(&Rectangle::abi_type()));
        assert!(!NativeValue::Void.matches(&AbiType::VOID));
    }

    #[test]
    fn test_mirror_round_trip_through_value() {
        let r = Rectangle {
            x: 1.0,
            y: 2.0,
            width: 30.0,
            height: 40.0,
        };
        let value = NativeValue::from_mirror(&r);
        assert_eq!(value.type_name(), "Rectangle");
        assert_eq!(value.to_mirror::<Rectangle>().unwrap(), r);
        assert!(value.to_mirror::<Vector3>().is_err());
        assert!(NativeValue::I32(0).to_mirror::<Rectangle>().is_err());
    }

    #[test]
    fn test_return_slot_minimum_width() {
        let slot = ReturnSlot::new(1);
        assert_eq!(slot.words.len(), 1);
        let big = ReturnSlot::new(64);
        assert_eq!(big.words.len(), 8);
    }

    #[test]
    fn test_abi_bytes_alignment() {
        let bytes = AbiBytes::new("Odd", &[1, 2, 3]);
        assert_eq!(bytes.as_bytes(), &[1, 2, 3]);
        assert_eq!(bytes.as_ptr() as usize % 8, 0);
    }
}
