// Raybridge Bindings
// One declaration of the native function table, expanded into both call backends

use crate::error::BridgeResult;
use crate::loader::SymbolSource;
use crate::version::VersionExport;
use serde::Serialize;
use std::fmt;

/// How a binding reaches native code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Backend {
    /// `extern "C"` declarations resolved by the linker
    Static,
    /// Symbols resolved at runtime and called through libffi
    Dynamic,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Static => write!(f, "static"),
            Backend::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// A complete binding of one native version's function table
pub trait Binding: Sized + Send + Sync + 'static {
    const BACKEND: Backend;
    const REQUIRED_VERSION: &'static str;
    const VERSION_SYMBOL: &'static str;
    const VERSION_EXPORT: VersionExport;
    /// Every bound symbol, version export first
    const SYMBOLS: &'static [&'static str];

    /// Resolve every symbol and prepare its call. The static backend ignores `native`.
    fn bind(native: Option<&dyn SymbolSource>) -> BridgeResult<Self>;

    /// Version string the bound library reports, if it reports one
    fn native_version(&self) -> Option<String>;
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ret_ty {
    () => {
        ()
    };
    ($ret:ty) => {
        $ret
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __version_export {
    (fn) => {
        $crate::version::VersionExport::Function
    };
    (static) => {
        $crate::version::VersionExport::Data
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __version_decl {
    (fn $symbol:ident) => {
        pub fn $symbol() -> *const ::std::os::raw::c_char;
    };
    (static $symbol:ident) => {
        pub static $symbol: *const ::std::os::raw::c_char;
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __version_read {
    (fn $sys:ident :: $symbol:ident) => {
        $sys::$symbol()
    };
    (static $sys:ident :: $symbol:ident) => {
        $sys::$symbol
    };
}

/// Declare a native function table once and get:
///
/// * an API trait with one `unsafe fn` per native function,
/// * a static backend calling an `extern "C"` block (behind a cfg),
/// * a dynamic backend calling through one `CallDescriptor` per function,
/// * `Binding` impls for both.
///
/// The version export is either a function (`version fn name() == "1.0"`) or a
/// `const char *` variable (`version static name == "5.5"`).
///
/// ```ignore
/// bind_native! {
///     pub trait StubApi;
///     version fn stub_version() == "1.0";
///     static StubStatic in stub_sys, cfg(all());
///     dynamic StubDynamic;
///
///     fn add = stub_add(a: i32, b: i32) -> i32;
/// }
/// ```
#[macro_export]
macro_rules! bind_native {
    (
        $(#[$api_meta:meta])*
        $vis:vis trait $api:ident;
        version $vkind:tt $version_symbol:ident $(())? == $required:literal;
        static $static_ty:ident in $sys:ident, cfg($($scfg:tt)*) $(, link($($link:tt)*))?;
        dynamic $dyn_ty:ident;
        $(
            $(#[$fn_meta:meta])*
            fn $method:ident = $symbol:ident($($arg:ident : $aty:ty),* $(,)?) $(-> $ret:ty)?;
        )*
    ) => {
        $(#[$api_meta])*
        $vis trait $api: Send + Sync {
            $(
                $(#[$fn_meta])*
                #[allow(clippy::too_many_arguments)]
                unsafe fn $method(&self, $($arg: $aty),*) -> $crate::__ret_ty!($($ret)?);
            )*
        }

        #[cfg($($scfg)*)]
        #[allow(non_snake_case, non_upper_case_globals)]
        mod $sys {
            #[allow(unused_imports)]
            use super::*;

            $(#[link($($link)*)])?
            extern "C" {
                $crate::__version_decl!($vkind $version_symbol);
                $(
                    pub fn $symbol($($arg: $aty),*) -> $crate::__ret_ty!($($ret)?);
                )*
            }
        }

        /// Compiled calls against the linked library
        #[cfg($($scfg)*)]
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $static_ty;

        #[cfg($($scfg)*)]
        impl $api for $static_ty {
            $(
                #[inline]
                unsafe fn $method(&self, $($arg: $aty),*) -> $crate::__ret_ty!($($ret)?) {
                    $sys::$symbol($($arg),*)
                }
            )*
        }

        #[cfg($($scfg)*)]
        impl $crate::binding::Binding for $static_ty {
            const BACKEND: $crate::binding::Backend = $crate::binding::Backend::Static;
            const REQUIRED_VERSION: &'static str = $required;
            const VERSION_SYMBOL: &'static str = stringify!($version_symbol);
            const VERSION_EXPORT: $crate::version::VersionExport = $crate::__version_export!($vkind);
            const SYMBOLS: &'static [&'static str] =
                &[stringify!($version_symbol), $(stringify!($symbol)),*];

            fn bind(_native: Option<&dyn $crate::loader::SymbolSource>) -> $crate::BridgeResult<Self> {
                Ok($static_ty)
            }

            fn native_version(&self) -> Option<String> {
                unsafe { $crate::version::read_version($crate::__version_read!($vkind $sys::$version_symbol)) }
            }
        }

        /// Runtime calls through one prepared descriptor per native function
        #[derive(Debug)]
        $vis struct $dyn_ty {
            version_address: $crate::abi::Address,
            $( $method: $crate::invoke::CallDescriptor, )*
        }

        impl $dyn_ty {
            /// Every prepared descriptor, in declaration order
            pub fn descriptors(&self) -> Vec<&$crate::invoke::CallDescriptor> {
                vec![$(&self.$method),*]
            }
        }

        impl $api for $dyn_ty {
            $(
                unsafe fn $method(&self, $($arg: $aty),*) -> $crate::__ret_ty!($($ret)?) {
                    self.$method.call(&[$($crate::invoke::arg(&$arg)),*])
                }
            )*
        }

        impl $crate::binding::Binding for $dyn_ty {
            const BACKEND: $crate::binding::Backend = $crate::binding::Backend::Dynamic;
            const REQUIRED_VERSION: &'static str = $required;
            const VERSION_SYMBOL: &'static str = stringify!($version_symbol);
            const VERSION_EXPORT: $crate::version::VersionExport = $crate::__version_export!($vkind);
            const SYMBOLS: &'static [&'static str] =
                &[stringify!($version_symbol), $(stringify!($symbol)),*];

            fn bind(native: Option<&dyn $crate::loader::SymbolSource>) -> $crate::BridgeResult<Self> {
                let native = native.ok_or($crate::BridgeError::NotInitialized)?;
                Ok($dyn_ty {
                    version_address: native.resolve(stringify!($version_symbol))?,
                    $(
                        $method: $crate::invoke::CallDescriptor::build(
                            native.resolve(stringify!($symbol))?,
                            stringify!($symbol),
                            <$crate::__ret_ty!($($ret)?) as $crate::abi::NativeType>::abi_type(),
                            vec![$(<$aty as $crate::abi::NativeType>::abi_type()),*],
                        )?,
                    )*
                })
            }

            fn native_version(&self) -> Option<String> {
                let export = <Self as $crate::binding::Binding>::VERSION_EXPORT;
                unsafe { export.read(self.version_address, stringify!($version_symbol)) }
                    .ok()
                    .flatten()
            }
        }
    };
}
