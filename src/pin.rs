// Raybridge Pinning
// Keeps Rust memory that native code reads or writes in place for one call scope
//
// A pinned slice is borrowed for the scope's lifetime, so the borrow checker
// guarantees it is neither moved nor freed while native code holds its address.
// The process-wide table only counts pins so leaks and double releases are visible.

use crate::abi::NativeType;
use crate::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::ffi::CString;
use std::marker::PhantomData;
use std::mem::size_of;
use std::os::raw::{c_char, c_int};
use std::ptr;

static PIN_TABLE: Mutex<Option<FxHashMap<usize, usize>>> = Mutex::new(None);

fn acquire(addr: usize) {
    let mut table = PIN_TABLE.lock();
    *table.get_or_insert_with(FxHashMap::default).entry(addr).or_insert(0) += 1;
}

fn release(addr: usize) {
    let mut table = PIN_TABLE.lock();
    if let Some(map) = table.as_mut() {
        if let Some(count) = map.get_mut(&addr) {
            *count -= 1;
            if *count == 0 {
                map.remove(&addr);
            }
        }
    }
}

/// Whether some live scope currently pins memory starting at `addr`
pub fn is_pinned(addr: usize) -> bool {
    PIN_TABLE
        .lock()
        .as_ref()
        .map_or(false, |map| map.contains_key(&addr))
}

/// Total pins held by every live scope in the process
pub fn outstanding() -> usize {
    PIN_TABLE
        .lock()
        .as_ref()
        .map_or(0, |map| map.values().sum())
}

/// Pointer and length of a pinned slice, ready to pass as call arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedSlice<T> {
    ptr: *mut T,
    len: usize,
}

impl<T> PinnedSlice<T> {
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    /// Only valid to write through when the slice came from `pin_mut`
    pub fn as_mut_ptr(&self) -> *mut T {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length as the C `int` most raylib size parameters take
    pub fn len_c_int(&self) -> BridgeResult<c_int> {
        c_int::try_from(self.len).map_err(|_| {
            BridgeError::pin_failure(
                format!("slice of {} elements", self.len),
                "length does not fit the native int parameter",
            )
        })
    }
}

/// Every pin taken during one call; released together when dropped
pub struct PinSet<'scope> {
    pinned: SmallVec<[usize; 4]>,
    strings: SmallVec<[CString; 4]>,
    _scope: PhantomData<&'scope mut ()>,
}

impl<'scope> PinSet<'scope> {
    pub fn new() -> Self {
        PinSet {
            pinned: SmallVec::new(),
            strings: SmallVec::new(),
            _scope: PhantomData,
        }
    }

    fn check_element<T>(what: &str) -> BridgeResult<()> {
        if size_of::<T>() == 0 {
            return Err(BridgeError::pin_failure(
                what,
                "zero-sized element type has no native address",
            ));
        }
        Ok(())
    }

    fn track<T>(&mut self, ptr: *mut T, len: usize) -> PinnedSlice<T> {
        if len == 0 {
            return PinnedSlice {
                ptr: ptr::null_mut(),
                len: 0,
            };
        }
        acquire(ptr as usize);
        self.pinned.push(ptr as usize);
        PinnedSlice { ptr, len }
    }

    /// Pin a slice native code only reads
    pub fn pin<T: NativeType>(&mut self, data: &'scope [T]) -> BridgeResult<PinnedSlice<T>> {
        Self::check_element::<T>("slice")?;
        Ok(self.track(data.as_ptr() as *mut T, data.len()))
    }

    /// Pin a slice native code may write into
    pub fn pin_mut<T: NativeType>(
        &mut self,
        data: &'scope mut [T],
    ) -> BridgeResult<PinnedSlice<T>> {
        Self::check_element::<T>("slice")?;
        Ok(self.track(data.as_mut_ptr(), data.len()))
    }

    /// Pin a single value passed by pointer (e.g. `Wave *` in WaveCrop)
    pub fn pin_value<T: NativeType>(&mut self, value: &'scope mut T) -> BridgeResult<*mut T> {
        Self::check_element::<T>("value")?;
        Ok(self.track(value as *mut T, 1).as_mut_ptr())
    }

    /// Marshal a string to a NUL-terminated copy owned by this scope
    pub fn c_string(&mut self, s: &str) -> BridgeResult<*const c_char> {
        let owned = CString::new(s)?;
        // moving the CString does not move its heap buffer
        let ptr = owned.as_ptr();
        self.strings.push(owned);
        Ok(ptr)
    }

    /// Number of slices and values pinned by this scope
    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }
}

impl Default for PinSet<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PinSet<'_> {
    fn drop(&mut self) {
        for addr in self.pinned.drain(..) {
            release(addr);
        }
    }
}

/// Run `f` with a fresh pin set; every pin is released when `f` returns or unwinds
pub fn pin_scope<'scope, R>(f: impl FnOnce(&mut PinSet<'scope>) -> R) -> R {
    let mut pins = PinSet::new();
    f(&mut pins)
}
