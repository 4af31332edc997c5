// Raybridge Callback Trampolines
// Native-callable function pointers backed by Rust closures
//
// Each trampoline is a libffi closure whose userdata is its registry id. The
// entry point looks the id up under a read lock, clones the closure out, and
// calls it with borrowed views of the native arguments. Panics stop here.

use crate::error::{BridgeError, BridgeResult};
use libffi::low::ffi_cif;
use libffi::middle::{Cif, Closure, Type as FfiType};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int, c_uint};
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub type TrampolineId = u64;

/// raylib's TraceLogLevel, in its numeric order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLogLevel {
    All = 0,
    Trace = 1,
    Debug = 2,
    Info = 3,
    Warning = 4,
    Error = 5,
    Fatal = 6,
    None = 7,
}

impl TraceLogLevel {
    pub fn from_raw(level: c_int) -> Self {
        match level {
            0 => TraceLogLevel::All,
            1 => TraceLogLevel::Trace,
            2 => TraceLogLevel::Debug,
            3 => TraceLogLevel::Info,
            4 => TraceLogLevel::Warning,
            5 => TraceLogLevel::Error,
            6 => TraceLogLevel::Fatal,
            _ => TraceLogLevel::None,
        }
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// The closed set of callback shapes the library accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// `void (*)(int logLevel, const char *text, va_list args)`
    TraceLog,
    /// `void (*)(void *bufferData, unsigned int frames)`, interleaved f32 samples
    AudioProcessor { channels: u32 },
    /// `bool (*)(const char *fileName, char *text)`
    SaveFileText,
}

impl CallbackKind {
    pub fn name(&self) -> &'static str {
        match self {
            CallbackKind::TraceLog => "TraceLogCallback",
            CallbackKind::AudioProcessor { .. } => "AudioCallback",
            CallbackKind::SaveFileText => "SaveFileTextCallback",
        }
    }

    fn cif(&self) -> Cif {
        match self {
            CallbackKind::TraceLog => Cif::new(
                vec![FfiType::i32(), FfiType::pointer(), FfiType::pointer()],
                FfiType::void(),
            ),
            CallbackKind::AudioProcessor { .. } => {
                Cif::new(vec![FfiType::pointer(), FfiType::u32()], FfiType::void())
            }
            CallbackKind::SaveFileText => {
                Cif::new(vec![FfiType::pointer(), FfiType::pointer()], FfiType::u8())
            }
        }
    }
}

type LogFn = dyn Fn(TraceLogLevel, &str) + Send + Sync;
type AudioFn = dyn Fn(&mut [f32], u32) + Send + Sync;
type SaveTextFn = dyn Fn(&str, &str) -> bool + Send + Sync;

#[derive(Clone)]
enum Target {
    Log(Arc<LogFn>),
    Audio { channels: u32, func: Arc<AudioFn> },
    SaveText(Arc<SaveTextFn>),
}

// ==================== Registry ====================

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static REGISTRY: RwLock<Option<FxHashMap<TrampolineId, Target>>> = RwLock::new(None);

pub fn is_registered(id: TrampolineId) -> bool {
    REGISTRY
        .read()
        .as_ref()
        .map_or(false, |map| map.contains_key(&id))
}

/// Number of trampolines native code may currently call
pub fn registered_count() -> usize {
    REGISTRY.read().as_ref().map_or(0, |map| map.len())
}

fn lookup(id: TrampolineId) -> Option<Target> {
    // the lock is released before the closure runs
    let target = REGISTRY
        .read()
        .as_ref()
        .and_then(|map| map.get(&id).cloned());
    if target.is_none() {
        debug!(trampoline = id, "trampoline invoked while unregistered; ignoring");
    }
    target
}

// ==================== Handles ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrampolineState {
    Unregistered,
    Registered,
}

/// libffi closure memory plus the boxed id it reads as userdata
struct ClosureData {
    closure: Closure<'static>,
    id_ptr: *mut TrampolineId,
}

impl Drop for ClosureData {
    fn drop(&mut self) {
        if !self.id_ptr.is_null() {
            unsafe {
                let _ = Box::from_raw(self.id_ptr);
            }
        }
    }
}

// SAFETY: the closure's code and cif are immutable once built
unsafe impl Send for ClosureData {}
unsafe impl Sync for ClosureData {}

/// A native function pointer that calls a Rust closure.
///
/// Native code may only call it while it is Registered. Dropping a Registered
/// handle unregisters it; the native side must not hold the pointer after that.
pub struct TrampolineHandle {
    id: TrampolineId,
    kind: CallbackKind,
    code: usize,
    target: Target,
    state: TrampolineState,
    closure: ClosureData,
}

impl TrampolineHandle {
    pub fn trace_log<F>(func: F) -> Self
    where
        F: Fn(TraceLogLevel, &str) + Send + Sync + 'static,
    {
        Self::new(CallbackKind::TraceLog, Target::Log(Arc::new(func)))
    }

    /// `func` receives `frames * channels` interleaved samples and the frame count
    pub fn audio_processor<F>(channels: u32, func: F) -> BridgeResult<Self>
    where
        F: Fn(&mut [f32], u32) + Send + Sync + 'static,
    {
        if channels == 0 {
            return Err(BridgeError::unsupported(
                CallbackKind::AudioProcessor { channels }.name(),
                "audio processors need at least one channel",
            ));
        }
        Ok(Self::new(
            CallbackKind::AudioProcessor { channels },
            Target::Audio {
                channels,
                func: Arc::new(func),
            },
        ))
    }

    pub fn save_file_text<F>(func: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        Self::new(CallbackKind::SaveFileText, Target::SaveText(Arc::new(func)))
    }

    fn new(kind: CallbackKind, target: Target) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let id_ptr = Box::into_raw(Box::new(id));
        // owned and freed by ClosureData
        let userdata: &'static TrampolineId = unsafe { &*id_ptr };

        let closure = match kind {
            CallbackKind::TraceLog => Closure::new(kind.cif(), trace_log_entry, userdata),
            CallbackKind::AudioProcessor { .. } => Closure::new(kind.cif(), audio_entry, userdata),
            CallbackKind::SaveFileText => Closure::new(kind.cif(), save_file_text_entry, userdata),
        };
        let code = {
            let fn_ptr: unsafe extern "C" fn() = *closure.code_ptr();
            fn_ptr as usize
        };

        debug!(trampoline = id, kind = kind.name(), "created trampoline");
        TrampolineHandle {
            id,
            kind,
            code,
            target,
            state: TrampolineState::Unregistered,
            closure: ClosureData { closure, id_ptr },
        }
    }

    pub fn id(&self) -> TrampolineId {
        self.id
    }

    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    pub fn state(&self) -> TrampolineState {
        self.state
    }

    /// The code pointer to hand to native code
    pub fn as_ptr(&self) -> *const c_void {
        self.code as *const c_void
    }

    /// Unregistered -> Registered; registering twice is a no-op
    pub fn register(&mut self) {
        REGISTRY
            .write()
            .get_or_insert_with(FxHashMap::default)
            .insert(self.id, self.target.clone());
        self.state = TrampolineState::Registered;
    }

    /// Registered -> Unregistered; later native invocations are ignored
    pub fn unregister(&mut self) {
        if let Some(map) = REGISTRY.write().as_mut() {
            map.remove(&self.id);
        }
        self.state = TrampolineState::Unregistered;
    }

    fn closure_code(&self) -> usize {
        let fn_ptr: unsafe extern "C" fn() = *self.closure.closure.code_ptr();
        fn_ptr as usize
    }
}

impl Drop for TrampolineHandle {
    fn drop(&mut self) {
        if self.state == TrampolineState::Registered {
            warn!(
                trampoline = self.id,
                kind = self.kind.name(),
                "dropping a registered trampoline; unregistering it"
            );
            self.unregister();
        }
    }
}

impl std::fmt::Debug for TrampolineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrampolineHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("code", &format_args!("{:#x}", self.closure_code()))
            .finish()
    }
}

/// A log trampoline that re-emits native log lines as `tracing` events
pub fn forward_to_tracing() -> TrampolineHandle {
    TrampolineHandle::trace_log(|level, message| match level {
        TraceLogLevel::All | TraceLogLevel::Trace => tracing::trace!(target: "raylib", "{}", message),
        TraceLogLevel::Debug => tracing::debug!(target: "raylib", "{}", message),
        TraceLogLevel::Info => tracing::info!(target: "raylib", "{}", message),
        TraceLogLevel::Warning => tracing::warn!(target: "raylib", "{}", message),
        TraceLogLevel::Error | TraceLogLevel::Fatal => {
            tracing::error!(target: "raylib", "{}", message)
        }
        TraceLogLevel::None => {}
    })
}

// ==================== Entry Points ====================

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a user closure; a panic is logged and replaced with `fallback`
fn guarded<R>(id: TrampolineId, kind: &str, fallback: R, f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            warn!(
                trampoline = id,
                kind,
                panic = %panic_message(payload.as_ref()),
                "callback panicked; returning to native code"
            );
            fallback
        }
    }
}

unsafe fn arg_at<T: Copy>(args: *const *const c_void, index: usize) -> T {
    *(*args.add(index) as *const T)
}

unsafe fn c_text<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

const MAX_LOG_MESSAGE: usize = 1024;

#[cfg(unix)]
extern "C" {
    fn vsnprintf(buf: *mut c_char, size: usize, format: *const c_char, args: *mut c_void) -> c_int;
}

/// Expand a printf-style log template with its va_list
unsafe fn format_message<'a>(text: *const c_char, args: *mut c_void) -> Cow<'a, str> {
    let template = c_text(text);
    if args.is_null() || !template.contains('%') {
        return template;
    }
    #[cfg(unix)]
    {
        let mut buf = [0 as c_char; MAX_LOG_MESSAGE];
        if vsnprintf(buf.as_mut_ptr(), buf.len(), text, args) >= 0 {
            return Cow::Owned(CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned());
        }
    }
    template
}

unsafe extern "C" fn trace_log_entry(
    _cif: &ffi_cif,
    _result: &mut usize,
    args: *const *const c_void,
    userdata: &TrampolineId,
) {
    let id = *userdata;
    guarded(id, "TraceLogCallback", (), || {
        let Some(Target::Log(func)) = lookup(id) else {
            return;
        };
        let level = TraceLogLevel::from_raw(arg_at::<c_int>(args, 0));
        let text = arg_at::<*const c_char>(args, 1);
        let va = arg_at::<*mut c_void>(args, 2);
        let message = format_message(text, va);
        func(level, message.as_ref())
    });
}

unsafe extern "C" fn audio_entry(
    _cif: &ffi_cif,
    _result: &mut usize,
    args: *const *const c_void,
    userdata: &TrampolineId,
) {
    let id = *userdata;
    guarded(id, "AudioCallback", (), || {
        let Some(Target::Audio { channels, func }) = lookup(id) else {
            return;
        };
        let buffer = arg_at::<*mut c_void>(args, 0) as *mut f32;
        let frames = arg_at::<c_uint>(args, 1);
        let Some(len) = (frames as usize).checked_mul(channels as usize) else {
            warn!(trampoline = id, frames, channels, "audio buffer length overflows; skipping");
            return;
        };
        let samples: &mut [f32] = if buffer.is_null() || len == 0 {
            &mut []
        } else {
            slice::from_raw_parts_mut(buffer, len)
        };
        func(samples, frames)
    });
}

unsafe extern "C" fn save_file_text_entry(
    _cif: &ffi_cif,
    result: &mut usize,
    args: *const *const c_void,
    userdata: &TrampolineId,
) {
    // libffi widens a bool return to a full ffi_arg
    *result = 0;
    let id = *userdata;
    let saved = guarded(id, "SaveFileTextCallback", false, || {
        let Some(Target::SaveText(func)) = lookup(id) else {
            return false;
        };
        let file_name = c_text(arg_at::<*const c_char>(args, 0));
        let text = c_text(arg_at::<*const c_char>(args, 1));
        func(file_name.as_ref(), text.as_ref())
    });
    *result = saved as usize;
}
