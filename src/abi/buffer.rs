// Raybridge Native Buffers
// Memory handed back by native calls: borrowed for a while, or owned until released

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::slice;

/// Native memory seen from Rust.
///
/// `Borrowed` memory stays owned by the library (e.g. `Wave::data`);
/// `Owned` memory was allocated for us and is freed through the library's
/// own release function.
pub enum NativeBuffer<'a, T> {
    Borrowed(&'a [T]),
    Owned(OwnedBuffer<'a, T>),
}

impl<'a, T> NativeBuffer<'a, T> {
    /// # Safety
    /// `ptr` must point to `len` initialized values that stay valid and
    /// unmodified for `'a`.
    pub unsafe fn borrowed(ptr: *const T, len: usize) -> Self {
        if ptr.is_null() || len == 0 {
            NativeBuffer::Borrowed(&[])
        } else {
            NativeBuffer::Borrowed(slice::from_raw_parts(ptr, len))
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            NativeBuffer::Borrowed(s) => s,
            NativeBuffer::Owned(owned) => owned.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, NativeBuffer::Owned(_))
    }

    /// Copy out; owned memory is released right after
    pub fn into_vec(self) -> Vec<T>
    where
        T: Clone,
    {
        match self {
            NativeBuffer::Borrowed(s) => s.to_vec(),
            NativeBuffer::Owned(owned) => owned.into_vec(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for NativeBuffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeBuffer::Borrowed(s) => f.debug_tuple("Borrowed").field(s).finish(),
            NativeBuffer::Owned(o) => f.debug_tuple("Owned").field(o).finish(),
        }
    }
}

type Release<'a> = Box<dyn FnOnce(*mut c_void) + 'a>;

/// A native allocation released exactly once, on drop
pub struct OwnedBuffer<'a, T> {
    ptr: NonNull<T>,
    len: usize,
    release: Option<Release<'a>>,
}

impl<'a, T> OwnedBuffer<'a, T> {
    /// Take ownership of a native allocation. Returns `None` for null.
    ///
    /// # Safety
    /// `ptr` must point to `len` initialized values that nothing else frees,
    /// and `release` must be the matching native free function.
    pub unsafe fn from_raw(
        ptr: *mut T,
        len: usize,
        release: impl FnOnce(*mut c_void) + 'a,
    ) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| OwnedBuffer {
            ptr,
            len,
            release: Some(Box::new(release)),
        })
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: from_raw's contract; the allocation lives until drop
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn into_vec(self) -> Vec<T>
    where
        T: Clone,
    {
        self.as_slice().to_vec()
    }
}

impl<T> Drop for OwnedBuffer<'_, T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.ptr.as_ptr() as *mut c_void);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for OwnedBuffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Release an owned buffer now instead of at end of scope
pub fn release_native<T>(buffer: OwnedBuffer<'_, T>) {
    drop(buffer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};

    fn leak(values: Vec<u8>) -> (*mut u8, usize) {
        let boxed = values.into_boxed_slice();
        let len = boxed.len();
        (Box::into_raw(boxed) as *mut u8, len)
    }

    fn free(ptr: *mut c_void, len: usize) {
        unsafe {
            drop(Box::from_raw(slice::from_raw_parts_mut(ptr as *mut u8, len)));
        }
    }

    #[test]
    fn test_owned_released_once() {
        let released = Cell::new(0);
        let (ptr, len) = leak(vec![1, 2, 3]);
        let buffer = unsafe {
            OwnedBuffer::from_raw(ptr, len, |p| {
                released.set(released.get() + 1);
                free(p, len);
            })
        }
        .unwrap();
        assert_eq!(buffer.as_slice(), &[1, 2, 3]);
        let copy = NativeBuffer::Owned(buffer).into_vec();
        assert_eq!(copy, vec![1, 2, 3]);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_explicit_release() {
        let released = Cell::new(false);
        let (ptr, len) = leak(vec![9; 16]);
        let buffer = unsafe {
            OwnedBuffer::from_raw(ptr, len, |p| {
                assert!(!released.replace(true));
                free(p, len);
            })
        }
        .unwrap();
        release_native(buffer);
        assert!(released.get());
    }

    #[test]
    fn test_released_during_unwind() {
        let released = Cell::new(false);
        let (ptr, len) = leak(vec![0; 4]);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _buffer = unsafe {
                OwnedBuffer::from_raw(ptr, len, |p| {
                    released.set(true);
                    free(p, len);
                })
            };
            panic!("caller failed while holding a native buffer");
        }));
        assert!(result.is_err());
        assert!(released.get());
    }

    #[test]
    fn test_null_is_not_owned() {
        let buffer = unsafe { OwnedBuffer::<u8>::from_raw(std::ptr::null_mut(), 8, |_| {}) };
        assert!(buffer.is_none());
    }

    #[test]
    fn test_borrowed_views() {
        let data = [1.0f32, 2.0, 3.0];
        let view = unsafe { NativeBuffer::borrowed(data.as_ptr(), data.len()) };
        assert!(!view.is_owned());
        assert_eq!(view.as_slice(), &data);
        let empty = unsafe { NativeBuffer::<f32>::borrowed(std::ptr::null(), 10) };
        assert!(empty.is_empty());
    }
}
