// Raybridge ABI Description
// Shapes of native values, the C layout rules that place them, and the mirror traits
//
// A mirror is a #[repr(C)] struct whose bytes are the native struct's bytes.
// Its AbiType is computed independently with the C rules below, so the startup
// self-check can compare the two (and a header table) before anything crosses
// the boundary.

/// Declares #[repr(C)] mirror structs together with their AbiType description
macro_rules! abi_struct {
    ($(
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $fty:ty ),* $(,)?
        }
    )*) => {$(
        $(#[$meta])*
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $fty, )*
        }

        unsafe impl $crate::abi::NativeType for $name {
            fn abi_type() -> $crate::abi::AbiType {
                $crate::abi::AbiType::aggregate(
                    stringify!($name),
                    vec![$( (stringify!($field), <$fty as $crate::abi::NativeType>::abi_type()) ),*],
                )
            }
        }

        unsafe impl $crate::abi::AbiMirror for $name {
            const NAME: &'static str = stringify!($name);

            fn field_offsets() -> Vec<usize> {
                vec![$( std::mem::offset_of!($name, $field) ),*]
            }
        }
    )*};
}

pub mod buffer;
pub mod mirror;

use crate::error::{BridgeError, BridgeResult};
use libffi::middle::Type as FfiType;
use serde::Serialize;
use std::fmt;
use std::mem::{align_of, size_of};
use std::ptr;

// ==================== Primitive Kinds ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Primitive {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl Primitive {
    pub fn size(self) -> usize {
        match self {
            Primitive::Void => 0,
            Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
            Primitive::Pointer => size_of::<usize>(),
        }
    }

    /// Alignment inside a struct; follows the target (i64 is 4-aligned on i386)
    pub fn align(self) -> usize {
        match self {
            Primitive::Void | Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => align_of::<i16>(),
            Primitive::I32 | Primitive::U32 => align_of::<i32>(),
            Primitive::F32 => align_of::<f32>(),
            Primitive::I64 | Primitive::U64 => align_of::<i64>(),
            Primitive::F64 => align_of::<f64>(),
            Primitive::Pointer => align_of::<usize>(),
        }
    }

    /// Integer kinds that libffi widens to a full `ffi_arg` in return slots
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Primitive::Bool
                | Primitive::I8
                | Primitive::U8
                | Primitive::I16
                | Primitive::U16
                | Primitive::I32
                | Primitive::U32
                | Primitive::I64
                | Primitive::U64
        )
    }

    fn to_ffi_type(self) -> FfiType {
        match self {
            Primitive::Void => FfiType::void(),
            // C _Bool is one byte and travels like an unsigned char
            Primitive::Bool | Primitive::U8 => FfiType::u8(),
            Primitive::I8 => FfiType::i8(),
            Primitive::I16 => FfiType::i16(),
            Primitive::U16 => FfiType::u16(),
            Primitive::I32 => FfiType::i32(),
            Primitive::U32 => FfiType::u32(),
            Primitive::I64 => FfiType::i64(),
            Primitive::U64 => FfiType::u64(),
            Primitive::F32 => FfiType::f32(),
            Primitive::F64 => FfiType::f64(),
            Primitive::Pointer => FfiType::pointer(),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Primitive::Void => "void",
            Primitive::Bool => "bool",
            Primitive::I8 => "i8",
            Primitive::U8 => "u8",
            Primitive::I16 => "i16",
            Primitive::U16 => "u16",
            Primitive::I32 => "i32",
            Primitive::U32 => "u32",
            Primitive::I64 => "i64",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Pointer => "ptr",
        };
        f.write_str(name)
    }
}

// ==================== Composite Types ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub ty: AbiType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub name: String,
    pub fields: Vec<Field>,
    pub size: usize,
    pub align: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AbiType {
    Primitive(Primitive),
    Array { element: Box<AbiType>, len: usize },
    Aggregate(Aggregate),
}

/// A primitive leaf inside a (possibly nested) type, at an absolute offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafSpan {
    pub offset: usize,
    pub kind: Primitive,
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

impl AbiType {
    pub const VOID: AbiType = AbiType::Primitive(Primitive::Void);

    /// Lay out fields in order with C rules: each field at the next offset aligned
    /// for it, total size rounded up to the strictest field alignment.
    pub fn aggregate(name: &str, fields: Vec<(&str, AbiType)>) -> AbiType {
        let mut offset = 0;
        let mut align = 1;
        let mut laid_out = Vec::with_capacity(fields.len());
        for (field_name, ty) in fields {
            let field_align = ty.align();
            offset = align_up(offset, field_align);
            align = align.max(field_align);
            let size = ty.size();
            laid_out.push(Field {
                name: field_name.to_string(),
                offset,
                ty,
            });
            offset += size;
        }
        AbiType::Aggregate(Aggregate {
            name: name.to_string(),
            fields: laid_out,
            size: align_up(offset, align),
            align,
        })
    }

    pub fn array(element: AbiType, len: usize) -> AbiType {
        AbiType::Array {
            element: Box::new(element),
            len,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            AbiType::Primitive(p) => p.size(),
            AbiType::Array { element, len } => element.size() * len,
            AbiType::Aggregate(agg) => agg.size,
        }
    }

    pub fn align(&self) -> usize {
        match self {
            AbiType::Primitive(p) => p.align(),
            AbiType::Array { element, .. } => element.align(),
            AbiType::Aggregate(agg) => agg.align,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, AbiType::Primitive(Primitive::Void))
    }

    /// Every primitive leaf with its absolute offset, in layout order
    pub fn leaf_spans(&self) -> Vec<LeafSpan> {
        let mut spans = Vec::new();
        self.collect_spans(0, &mut spans);
        spans
    }

    fn collect_spans(&self, base: usize, out: &mut Vec<LeafSpan>) {
        match self {
            AbiType::Primitive(Primitive::Void) => {}
            AbiType::Primitive(kind) => out.push(LeafSpan {
                offset: base,
                kind: *kind,
            }),
            AbiType::Array { element, len } => {
                let stride = element.size();
                for i in 0..*len {
                    element.collect_spans(base + i * stride, out);
                }
            }
            AbiType::Aggregate(agg) => {
                for field in &agg.fields {
                    field.ty.collect_spans(base + field.offset, out);
                }
            }
        }
    }

    /// libffi description; `symbol` only labels the error
    pub(crate) fn ffi_type(&self, symbol: &str) -> BridgeResult<FfiType> {
        match self {
            AbiType::Primitive(p) => Ok(p.to_ffi_type()),
            AbiType::Array { len: 0, .. } => Err(BridgeError::unsupported(
                symbol,
                format!("zero-length array in {}", self),
            )),
            AbiType::Array { element, len } => {
                if element.is_void() {
                    return Err(BridgeError::unsupported(symbol, "array of void"));
                }
                // libffi has no array type; a struct of N elements has the same layout
                let element = element.ffi_type(symbol)?;
                Ok(FfiType::structure(vec![element; *len]))
            }
            AbiType::Aggregate(agg) => {
                if agg.fields.is_empty() {
                    return Err(BridgeError::unsupported(
                        symbol,
                        format!("empty aggregate {}", agg.name),
                    ));
                }
                let mut fields = Vec::with_capacity(agg.fields.len());
                for field in &agg.fields {
                    if field.ty.is_void() {
                        return Err(BridgeError::unsupported(
                            symbol,
                            format!("void field {}.{}", agg.name, field.name),
                        ));
                    }
                    fields.push(field.ty.ffi_type(symbol)?);
                }
                Ok(FfiType::structure(fields))
            }
        }
    }
}

impl From<Primitive> for AbiType {
    fn from(p: Primitive) -> Self {
        AbiType::Primitive(p)
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Primitive(p) => write!(f, "{}", p),
            AbiType::Array { element, len } => write!(f, "[{}; {}]", element, len),
            AbiType::Aggregate(agg) => write!(f, "{}", agg.name),
        }
    }
}

// ==================== Addresses ====================

/// A native pointer held as an opaque address-sized integer.
/// Mirrors never hold Rust references into foreign memory.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Address(pub usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ==================== Native Types ====================

/// A Rust type with a known native shape.
///
/// # Safety
/// `abi_type()` must describe exactly the size, alignment and field placement
/// of `Self` as the C compiler lays out the matching native type.
pub unsafe trait NativeType: Copy + 'static {
    fn abi_type() -> AbiType;
}

macro_rules! impl_native_primitive {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            unsafe impl NativeType for $ty {
                fn abi_type() -> AbiType {
                    AbiType::Primitive(Primitive::$kind)
                }
            }
        )*
    };
}

impl_native_primitive!(
    () => Void,
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

unsafe impl<T: 'static> NativeType for *const T {
    fn abi_type() -> AbiType {
        AbiType::Primitive(Primitive::Pointer)
    }
}

unsafe impl<T: 'static> NativeType for *mut T {
    fn abi_type() -> AbiType {
        AbiType::Primitive(Primitive::Pointer)
    }
}

unsafe impl<T: NativeType, const N: usize> NativeType for [T; N] {
    fn abi_type() -> AbiType {
        AbiType::array(T::abi_type(), N)
    }
}

// ==================== Mirrors ====================

/// A native struct mirrored bit-for-bit by a #[repr(C)] Rust struct.
///
/// # Safety
/// Implementors must be #[repr(C)] with the field order of the native struct;
/// `field_offsets` must list `offset_of!` for each field in declaration order.
pub unsafe trait AbiMirror: NativeType {
    const NAME: &'static str;

    fn field_offsets() -> Vec<usize>;

    /// Copy native bytes into a mirror value
    fn mirror_of(bytes: &[u8]) -> BridgeResult<Self> {
        check_mirror_bytes::<Self>(bytes)?;
        // SAFETY: length checked, every bool byte is 0 or 1, all other bit patterns are valid
        Ok(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const Self) })
    }

    /// Reinterpret native bytes in place, without copying
    fn view(bytes: &[u8]) -> BridgeResult<&Self> {
        check_mirror_bytes::<Self>(bytes)?;
        if bytes.as_ptr() as usize % align_of::<Self>() != 0 {
            return Err(BridgeError::invalid_mirror(
                Self::NAME,
                format!("buffer is not {}-byte aligned", align_of::<Self>()),
            ));
        }
        // SAFETY: size, alignment and bool validity checked above
        Ok(unsafe { &*(bytes.as_ptr() as *const Self) })
    }

    /// Native byte image of the value; padding bytes are zero
    fn to_native(&self) -> Vec<u8> {
        let mut out = vec![0u8; size_of::<Self>()];
        let src = self as *const Self as *const u8;
        for span in Self::abi_type().leaf_spans() {
            // SAFETY: spans lie inside Self and never cover padding
            unsafe {
                ptr::copy_nonoverlapping(
                    src.add(span.offset),
                    out.as_mut_ptr().add(span.offset),
                    span.kind.size(),
                );
            }
        }
        out
    }
}

fn check_mirror_bytes<T: AbiMirror>(bytes: &[u8]) -> BridgeResult<()> {
    if bytes.len() != size_of::<T>() {
        return Err(BridgeError::invalid_mirror(
            T::NAME,
            format!("expected {} bytes, got {}", size_of::<T>(), bytes.len()),
        ));
    }
    for span in T::abi_type().leaf_spans() {
        if span.kind == Primitive::Bool && bytes[span.offset] > 1 {
            return Err(BridgeError::invalid_mirror(
                T::NAME,
                format!(
                    "bool at offset {} holds {}",
                    span.offset, bytes[span.offset]
                ),
            ));
        }
    }
    Ok(())
}

// ==================== Layout Self-Check ====================

#[derive(Debug, Clone, Serialize)]
pub struct FieldReport {
    pub name: String,
    pub offset: usize,
    pub ty: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutReport {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldReport>,
    /// Whether the size was also compared against the native header table
    pub header_checked: bool,
}

/// Compare a mirror's computed C layout against the Rust layout and the header table
pub fn verify_layout<T: AbiMirror>() -> BridgeResult<LayoutReport> {
    let mismatch = |detail: String| BridgeError::LayoutMismatch {
        type_name: T::NAME.to_string(),
        detail,
    };

    let agg = match T::abi_type() {
        AbiType::Aggregate(agg) => agg,
        other => return Err(mismatch(format!("described as {}, not a struct", other))),
    };

    if agg.size != size_of::<T>() || agg.align != align_of::<T>() {
        return Err(mismatch(format!(
            "C layout is {}/{} bytes (size/align), Rust layout is {}/{}",
            agg.size,
            agg.align,
            size_of::<T>(),
            align_of::<T>()
        )));
    }

    let offsets = T::field_offsets();
    if offsets.len() != agg.fields.len() {
        return Err(mismatch(format!(
            "{} described fields, {} declared",
            agg.fields.len(),
            offsets.len()
        )));
    }
    for (field, rust_offset) in agg.fields.iter().zip(offsets) {
        if field.offset != rust_offset {
            return Err(mismatch(format!(
                "field {} at C offset {}, Rust offset {}",
                field.name, field.offset, rust_offset
            )));
        }
    }

    let header = mirror::header_layout(T::NAME);
    if let Some((size, align)) = header {
        if (size, align) != (agg.size, agg.align) {
            return Err(mismatch(format!(
                "native header says {}/{} bytes (size/align), mirror is {}/{}",
                size, align, agg.size, agg.align
            )));
        }
    }

    Ok(LayoutReport {
        name: agg.name.clone(),
        size: agg.size,
        align: agg.align,
        fields: agg
            .fields
            .iter()
            .map(|f| FieldReport {
                name: f.name.clone(),
                offset: f.offset,
                ty: f.ty.to_string(),
            })
            .collect(),
        header_checked: header.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    abi_struct! {
        pub struct Padded {
            pub tag: u8,
            pub value: f64,
            pub flag: bool,
        }

        pub struct WithArray {
            pub count: u16,
            pub weights: [f32; 3],
        }
    }

    #[test]
    fn test_c_layout_rules() {
        let ty = Padded::abi_type();
        assert_eq!(ty.size(), size_of::<Padded>());
        assert_eq!(ty.align(), align_of::<Padded>());
        match &ty {
            AbiType::Aggregate(agg) => {
                assert_eq!(agg.fields[0].offset, 0);
                assert_eq!(agg.fields[1].offset, align_of::<f64>());
                assert_eq!(agg.fields[2].offset, align_of::<f64>() + 8);
            }
            _ => panic!("expected aggregate"),
        }

        let arr = WithArray::abi_type();
        assert_eq!(arr.size(), 16);
        assert_eq!(arr.align(), 4);
        assert_eq!(arr.leaf_spans().len(), 4);
    }

    #[test]
    fn test_verify_layout_unlisted_type() {
        let report = verify_layout::<Padded>().unwrap();
        assert!(!report.header_checked);
        assert_eq!(report.fields.len(), 3);
        assert_eq!(report.fields[1].ty, "f64");
    }

    #[test]
    fn test_to_native_zeroes_padding() {
        let value = Padded {
            tag: 0xAB,
            value: -1.5,
            flag: true,
        };
        let bytes = value.to_native();
        assert_eq!(bytes.len(), size_of::<Padded>());
        assert_eq!(bytes[0], 0xAB);
        assert!(bytes[1..align_of::<f64>()].iter().all(|b| *b == 0));
        let back = Padded::mirror_of(&bytes).unwrap();
        assert_eq!(back, value);
        assert_eq!(back.to_native(), bytes);
    }

    #[test]
    fn test_mirror_of_rejects_bad_bool_and_length() {
        let mut bytes = Padded::default().to_native();
        let flag_offset = Padded::field_offsets()[2];
        bytes[flag_offset] = 2;
        assert!(matches!(
            Padded::mirror_of(&bytes),
            Err(BridgeError::InvalidMirror { .. })
        ));
        assert!(Padded::mirror_of(&bytes[1..]).is_err());
    }

    #[test]
    fn test_view_checks_alignment() {
        // u64 backing guarantees 8-byte alignment for the first view
        let words = [0u64; 4];
        let bytes = unsafe {
            std::slice::from_raw_parts(words.as_ptr() as *const u8, 32)
        };
        let size = size_of::<Padded>();
        assert!(Padded::view(&bytes[..size]).is_ok());
        assert!(Padded::view(&bytes[1..size + 1]).is_err());
    }

    #[test]
    fn test_ffi_type_rejections() {
        let empty = AbiType::aggregate("Empty", vec![]);
        assert!(matches!(
            empty.ffi_type("f"),
            Err(BridgeError::UnsupportedSignature { .. })
        ));
        let zero = AbiType::array(AbiType::Primitive(Primitive::I32), 0);
        assert!(zero.ffi_type("f").is_err());
        let void_field = AbiType::aggregate("V", vec![("v", AbiType::VOID)]);
        assert!(void_field.ffi_type("f").is_err());
        assert!(Padded::abi_type().ffi_type("f").is_ok());
    }

    #[test]
    fn test_pointer_fields_are_addresses() {
        assert_eq!(
            Address::abi_type(),
            AbiType::Primitive(Primitive::Pointer)
        );
        assert_eq!(Address::abi_type().size(), size_of::<usize>());
        assert!(Address::NULL.is_null());
    }
}
