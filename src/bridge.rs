// Raybridge Bridge
// Initialization sequence and the safe raylib surface built on the bound function table

use crate::abi::buffer::{NativeBuffer, OwnedBuffer};
use crate::abi::mirror::{self, AudioStream, Color, Image, Rectangle, Wave};
use crate::binding::{Backend, Binding};
use crate::callback::{forward_to_tracing, CallbackKind, TraceLogLevel, TrampolineHandle, TrampolineId};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::loader::{NativeHandle, NativeLibrary};
use crate::pin::PinSet;
use crate::raylib::{ActiveRaylib, RaylibApi};
use crate::version::{VersionGuard, NULL_VERSION};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::ptr;
use std::thread::{self, ThreadId};
use tracing::{debug, info};

/// A bound native library: the symbol source, its checked version, and the call table
pub struct Bridge<A = ActiveRaylib> {
    // kept alive for as long as descriptors point into it
    native: Option<NativeHandle>,
    api: A,
    version: String,
    config: BridgeConfig,
    graphics_owner: Mutex<Option<ThreadId>>,
    log_callback: Mutex<Option<Installed<A>>>,
    save_text_callback: Mutex<Option<Installed<A>>>,
    processors: Mutex<FxHashMap<TrampolineId, Installed<A>>>,
}

/// A trampoline native code holds, with the call that makes native code let go of it
struct Installed<A> {
    handle: TrampolineHandle,
    stream: Option<AudioStream>,
    release: unsafe fn(&A, Option<AudioStream>, *const c_void),
}

impl<A> Installed<A> {
    fn new(
        handle: TrampolineHandle,
        stream: Option<AudioStream>,
        release: unsafe fn(&A, Option<AudioStream>, *const c_void),
    ) -> Self {
        Installed {
            handle,
            stream,
            release,
        }
    }

    /// Unregister without telling native code; only once it holds something else
    fn retire(self) -> TrampolineHandle {
        let mut handle = self.handle;
        handle.unregister();
        handle
    }

    /// Make native code drop the pointer, then unregister
    fn release(self, api: &A) -> TrampolineHandle {
        unsafe { (self.release)(api, self.stream, self.handle.as_ptr()) };
        self.retire()
    }
}

unsafe fn clear_trace_log<A: RaylibApi>(api: &A, _: Option<AudioStream>, _: *const c_void) {
    api.set_trace_log_callback(ptr::null())
}

unsafe fn clear_save_file_text<A: RaylibApi>(api: &A, _: Option<AudioStream>, _: *const c_void) {
    api.set_save_file_text_callback(ptr::null())
}

unsafe fn detach_stream_processor<A: RaylibApi>(api: &A, stream: Option<AudioStream>, code: *const c_void) {
    if let Some(stream) = stream {
        api.detach_audio_stream_processor(stream, code)
    }
}

unsafe fn detach_mixed_processor<A: RaylibApi>(api: &A, _: Option<AudioStream>, code: *const c_void) {
    api.detach_audio_mixed_processor(code)
}

impl<A: Binding> Bridge<A> {
    /// Open the configured library (dynamic backend) and run every startup check
    pub fn open(config: BridgeConfig) -> BridgeResult<Self> {
        let native: Option<NativeHandle> = match A::BACKEND {
            Backend::Dynamic => Some(Box::new(NativeLibrary::open_configured(&config)?)),
            Backend::Static => None,
        };
        Self::with_native(native, config)
    }

    /// Startup checks in order: version, struct layouts, then every symbol.
    /// The static backend has no symbol source and checks its version after binding.
    pub fn with_native(native: Option<NativeHandle>, config: BridgeConfig) -> BridgeResult<Self> {
        let guard = VersionGuard::new(A::REQUIRED_VERSION);
        if let Some(source) = native.as_deref() {
            guard.verify(source, A::VERSION_SYMBOL, A::VERSION_EXPORT)?;
        }

        if config.verify_layouts {
            let reports = mirror::verify_all()?;
            debug!(mirrors = reports.len(), "struct layouts verified");
        }

        let api = A::bind(native.as_deref())?;
        let version = api
            .native_version()
            .unwrap_or_else(|| NULL_VERSION.to_string());
        guard.check(&version)?;

        info!(
            version = version.as_str(),
            backend = %A::BACKEND,
            symbols = A::SYMBOLS.len(),
            "native bridge initialized"
        );

        Ok(Bridge {
            native,
            api,
            version,
            config,
            graphics_owner: Mutex::new(None),
            log_callback: Mutex::new(None),
            save_text_callback: Mutex::new(None),
            processors: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn backend(&self) -> Backend {
        A::BACKEND
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Name of the symbol source, if the backend loaded one
    pub fn library_name(&self) -> Option<&str> {
        self.native.as_deref().map(|n| n.name())
    }
}

fn expect_kind(handle: &TrampolineHandle, expected: CallbackKind, symbol: &str) -> BridgeResult<()> {
    let matches = match (handle.kind(), expected) {
        (CallbackKind::AudioProcessor { .. }, CallbackKind::AudioProcessor { .. }) => true,
        (actual, expected) => actual == expected,
    };
    if matches {
        Ok(())
    } else {
        Err(BridgeError::SignatureMismatch {
            symbol: symbol.to_string(),
            reason: format!(
                "expects a {}, got a {}",
                expected.name(),
                handle.kind().name()
            ),
        })
    }
}

impl<A: Binding + RaylibApi> Bridge<A> {
    /// Apply the log settings from the config
    pub fn apply_log_config(&self) -> BridgeResult<()> {
        if let Some(level) = self.config.native_log_level {
            self.set_trace_log_level(level);
        }
        if self.config.route_native_log {
            self.set_trace_log_callback(forward_to_tracing())?;
        }
        Ok(())
    }

    // ==================== Logging & Callbacks ====================

    pub fn set_trace_log_level(&self, level: TraceLogLevel) {
        unsafe { self.api.set_trace_log_level(level.as_raw()) }
    }

    /// Install a log trampoline; the previous one is released after the swap
    pub fn set_trace_log_callback(&self, mut handle: TrampolineHandle) -> BridgeResult<()> {
        expect_kind(&handle, CallbackKind::TraceLog, "SetTraceLogCallback")?;
        handle.register();
        let mut slot = self.log_callback.lock();
        unsafe { self.api.set_trace_log_callback(handle.as_ptr()) };
        if let Some(previous) = slot.replace(Installed::new(handle, None, clear_trace_log::<A>)) {
            previous.retire();
        }
        Ok(())
    }

    /// Restore raylib's built-in logger
    pub fn clear_trace_log_callback(&self) {
        let mut slot = self.log_callback.lock();
        match slot.take() {
            Some(installed) => {
                installed.release(&self.api);
            }
            None => unsafe { self.api.set_trace_log_callback(ptr::null()) },
        }
    }

    pub fn set_save_file_text_callback(&self, mut handle: TrampolineHandle) -> BridgeResult<()> {
        expect_kind(&handle, CallbackKind::SaveFileText, "SetSaveFileTextCallback")?;
        handle.register();
        let mut slot = self.save_text_callback.lock();
        unsafe { self.api.set_save_file_text_callback(handle.as_ptr()) };
        if let Some(previous) = slot.replace(Installed::new(handle, None, clear_save_file_text::<A>)) {
            previous.retire();
        }
        Ok(())
    }

    pub fn clear_save_file_text_callback(&self) {
        let mut slot = self.save_text_callback.lock();
        match slot.take() {
            Some(installed) => {
                installed.release(&self.api);
            }
            None => unsafe { self.api.set_save_file_text_callback(ptr::null()) },
        }
    }

    /// SaveFileText takes a mutable `char *`; the text is copied into a pinned buffer
    pub fn save_file_text(&self, file_name: &str, text: &str) -> BridgeResult<bool> {
        let mut buffer = std::ffi::CString::new(text)?.into_bytes_with_nul();
        let mut pins = PinSet::new();
        let name = pins.c_string(file_name)?;
        let text = pins.pin_mut(&mut buffer)?;
        Ok(unsafe { self.api.save_file_text(name, text.as_mut_ptr() as *mut _) })
    }

    // ==================== Graphics ====================

    /// Open the window and bind graphics calls to the calling thread
    pub fn init_window(&self, width: i32, height: i32, title: &str) -> BridgeResult<GraphicsContext<'_, A>> {
        let mut pins = PinSet::new();
        let title = pins.c_string(title)?;
        let current = thread::current().id();
        {
            let mut owner = self.graphics_owner.lock();
            match *owner {
                Some(existing) if existing != current => {
                    return Err(BridgeError::ThreadAffinity {
                        owner: existing,
                        current,
                    })
                }
                _ => *owner = Some(current),
            }
        }
        unsafe { self.api.init_window(width, height, title) };
        if !unsafe { self.api.is_window_ready() } {
            *self.graphics_owner.lock() = None;
            return Err(BridgeError::WindowInitFailed { width, height });
        }
        Ok(GraphicsContext::new(self))
    }

    /// The graphics context, available only on the thread that opened the window
    pub fn graphics(&self) -> BridgeResult<GraphicsContext<'_, A>> {
        let current = thread::current().id();
        match *self.graphics_owner.lock() {
            Some(owner) if owner == current => Ok(GraphicsContext::new(self)),
            Some(owner) => Err(BridgeError::ThreadAffinity { owner, current }),
            None => Err(BridgeError::NoWindow),
        }
    }

    // ==================== Colors ====================

    pub fn color_to_int(&self, color: Color) -> i32 {
        unsafe { self.api.color_to_int(color) }
    }

    pub fn get_color(&self, hex_value: u32) -> Color {
        unsafe { self.api.get_color(hex_value) }
    }

    // ==================== Files & Memory ====================

    /// Read a whole file; `None` when raylib could not load it
    pub fn load_file_data(&self, file_name: &str) -> BridgeResult<Option<OwnedBuffer<'_, u8>>> {
        let mut pins = PinSet::new();
        let name = pins.c_string(file_name)?;
        let mut size: c_int = 0;
        let data = unsafe { self.api.load_file_data(name, &mut size) };
        let len = usize::try_from(size).unwrap_or(0);
        let api = &self.api;
        let release = move |p: *mut c_void| unsafe { api.unload_file_data(p as *mut u8) };
        // SAFETY: LoadFileData returns `size` bytes owned by the caller until UnloadFileData
        Ok(unsafe { OwnedBuffer::from_raw(data, len, release) })
    }

    pub fn save_file_data(&self, file_name: &str, data: &[u8]) -> BridgeResult<bool> {
        let mut pins = PinSet::new();
        let name = pins.c_string(file_name)?;
        let bytes = pins.pin(data)?;
        let len = bytes.len_c_int()?;
        Ok(unsafe { self.api.save_file_data(name, bytes.as_mut_ptr() as *mut c_void, len) })
    }

    /// Decode an image from encoded bytes; `file_type` is the extension, e.g. ".png"
    pub fn load_image_from_memory(&self, file_type: &str, data: &[u8]) -> BridgeResult<Image> {
        let mut pins = PinSet::new();
        let kind = pins.c_string(file_type)?;
        let bytes = pins.pin(data)?;
        let len = bytes.len_c_int()?;
        Ok(unsafe { self.api.load_image_from_memory(kind, bytes.as_ptr(), len) })
    }

    pub fn unload_image(&self, image: Image) {
        unsafe { self.api.unload_image(image) }
    }

    /// Free memory raylib allocated with its own allocator
    ///
    /// # Safety
    /// `ptr` must come from a raylib allocation not yet freed.
    pub unsafe fn mem_free(&self, ptr: *mut c_void) {
        self.api.mem_free(ptr)
    }

    // ==================== Audio ====================

    pub fn init_audio_device(&self) {
        unsafe { self.api.init_audio_device() }
    }

    pub fn close_audio_device(&self) {
        unsafe { self.api.close_audio_device() }
    }

    pub fn is_audio_device_ready(&self) -> bool {
        unsafe { self.api.is_audio_device_ready() }
    }

    pub fn load_audio_stream(&self, sample_rate: u32, sample_size: u32, channels: u32) -> AudioStream {
        unsafe { self.api.load_audio_stream(sample_rate, sample_size, channels) }
    }

    /// Processors still attached to the stream are detached first
    pub fn unload_audio_stream(&self, stream: AudioStream) {
        let attached: Vec<Installed<A>> = {
            let mut processors = self.processors.lock();
            let ids: Vec<TrampolineId> = processors
                .iter()
                .filter(|(_, p)| p.stream.map_or(false, |s| s.buffer == stream.buffer))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| processors.remove(id)).collect()
        };
        for installed in attached {
            installed.release(&self.api);
        }
        unsafe { self.api.unload_audio_stream(stream) }
    }

    /// Registers the processor, attaches it, and keeps it until it is detached
    pub fn attach_audio_stream_processor(
        &self,
        stream: &AudioStream,
        mut handle: TrampolineHandle,
    ) -> BridgeResult<TrampolineId> {
        self.check_audio_handle(&handle, stream.channels, "AttachAudioStreamProcessor")?;
        handle.register();
        let id = handle.id();
        let mut processors = self.processors.lock();
        unsafe { self.api.attach_audio_stream_processor(*stream, handle.as_ptr()) };
        processors.insert(
            id,
            Installed::new(handle, Some(*stream), detach_stream_processor::<A>),
        );
        Ok(id)
    }

    /// The mixed processor sees the final stereo mix
    pub fn attach_audio_mixed_processor(&self, mut handle: TrampolineHandle) -> BridgeResult<TrampolineId> {
        self.check_audio_handle(&handle, 2, "AttachAudioMixedProcessor")?;
        handle.register();
        let id = handle.id();
        let mut processors = self.processors.lock();
        unsafe { self.api.attach_audio_mixed_processor(handle.as_ptr()) };
        processors.insert(id, Installed::new(handle, None, detach_mixed_processor::<A>));
        Ok(id)
    }

    /// Detach a stream or mixed processor, then unregister it.
    /// Returns the handle so it can be attached again; `None` if `id` is not attached.
    pub fn detach_audio_processor(&self, id: TrampolineId) -> Option<TrampolineHandle> {
        let installed = self.processors.lock().remove(&id)?;
        Some(installed.release(&self.api))
    }

    /// Number of processors native code may currently call
    pub fn attached_processors(&self) -> usize {
        self.processors.lock().len()
    }

    fn check_audio_handle(&self, handle: &TrampolineHandle, channels: u32, symbol: &str) -> BridgeResult<()> {
        expect_kind(handle, CallbackKind::AudioProcessor { channels }, symbol)?;
        match handle.kind() {
            CallbackKind::AudioProcessor { channels: c } if c != channels => {
                Err(BridgeError::SignatureMismatch {
                    symbol: symbol.to_string(),
                    reason: format!("processor expects {} channels, stream has {}", c, channels),
                })
            }
            _ => Ok(()),
        }
    }

    // ==================== Waves ====================

    pub fn load_wave_from_memory(&self, file_type: &str, data: &[u8]) -> BridgeResult<Wave> {
        let mut pins = PinSet::new();
        let kind = pins.c_string(file_type)?;
        let bytes = pins.pin(data)?;
        let len = bytes.len_c_int()?;
        Ok(unsafe { self.api.load_wave_from_memory(kind, bytes.as_ptr(), len) })
    }

    pub fn unload_wave(&self, wave: Wave) {
        unsafe { self.api.unload_wave(wave) }
    }

    /// Decoded f32 samples, `frame_count * channels` long; released with UnloadWaveSamples
    pub fn wave_samples(&self, wave: &Wave) -> Option<OwnedBuffer<'_, f32>> {
        let samples = unsafe { self.api.load_wave_samples(*wave) };
        let len = wave.frame_count as usize * wave.channels as usize;
        let api = &self.api;
        let release = move |p: *mut c_void| unsafe { api.unload_wave_samples(p as *mut f32) };
        unsafe { OwnedBuffer::from_raw(samples, len, release) }
    }

    /// The wave's raw sample bytes, still owned by the wave
    ///
    /// # Safety
    /// `wave.data` must point to the wave's live sample buffer.
    pub unsafe fn wave_data<'w>(&self, wave: &'w Wave) -> NativeBuffer<'w, u8> {
        let bytes = wave.frame_count as usize * wave.channels as usize * (wave.sample_size as usize / 8);
        NativeBuffer::borrowed(wave.data.as_ptr::<u8>(), bytes)
    }

    /// Crop in place; raylib may replace `wave.data`
    pub fn wave_crop(&self, wave: &mut Wave, init_frame: i32, final_frame: i32) -> BridgeResult<()> {
        let mut pins = PinSet::new();
        let target = pins.pin_value(wave)?;
        unsafe { self.api.wave_crop(target, init_frame, final_frame) };
        Ok(())
    }
}

/// Native code must stop calling every trampoline before its closure is freed
impl<A> Drop for Bridge<A> {
    fn drop(&mut self) {
        let mut installed: Vec<Installed<A>> =
            self.processors.get_mut().drain().map(|(_, p)| p).collect();
        installed.extend(self.log_callback.get_mut().take());
        installed.extend(self.save_text_callback.get_mut().take());
        if !installed.is_empty() {
            debug!(count = installed.len(), "releasing native callbacks");
        }
        for entry in installed {
            entry.release(&self.api);
        }
    }
}

// ==================== Graphics Context ====================

/// Graphics calls for the thread that opened the window. Not `Send`.
pub struct GraphicsContext<'b, A: Binding + RaylibApi = ActiveRaylib> {
    bridge: &'b Bridge<A>,
    _not_send: PhantomData<*const ()>,
}

struct EndDrawingOnDrop<'a, A: RaylibApi>(&'a A);

impl<A: RaylibApi> Drop for EndDrawingOnDrop<'_, A> {
    fn drop(&mut self) {
        unsafe { self.0.end_drawing() }
    }
}

impl<'b, A: Binding + RaylibApi> GraphicsContext<'b, A> {
    fn new(bridge: &'b Bridge<A>) -> Self {
        GraphicsContext {
            bridge,
            _not_send: PhantomData,
        }
    }

    fn api(&self) -> &'b A {
        &self.bridge.api
    }

    pub fn should_close(&self) -> bool {
        unsafe { self.api().window_should_close() }
    }

    pub fn is_ready(&self) -> bool {
        unsafe { self.api().is_window_ready() }
    }

    pub fn screen_width(&self) -> i32 {
        unsafe { self.api().get_screen_width() }
    }

    pub fn screen_height(&self) -> i32 {
        unsafe { self.api().get_screen_height() }
    }

    pub fn set_target_fps(&self, fps: i32) {
        unsafe { self.api().set_target_fps(fps) }
    }

    /// One frame: BeginDrawing, `f`, then EndDrawing even if `f` unwinds
    pub fn draw<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        unsafe { self.api().begin_drawing() };
        let _end = EndDrawingOnDrop(self.api());
        f(self)
    }

    pub fn clear_background(&self, color: Color) {
        unsafe { self.api().clear_background(color) }
    }

    pub fn draw_rectangle_rec(&self, rec: Rectangle, color: Color) {
        unsafe { self.api().draw_rectangle_rec(rec, color) }
    }

    pub fn draw_text(&self, text: &str, x: i32, y: i32, font_size: i32, color: Color) -> BridgeResult<()> {
        let mut pins = PinSet::new();
        let text = pins.c_string(text)?;
        unsafe { self.api().draw_text(text, x, y, font_size, color) };
        Ok(())
    }

    pub fn measure_text(&self, text: &str, font_size: i32) -> BridgeResult<i32> {
        let mut pins = PinSet::new();
        let text = pins.c_string(text)?;
        Ok(unsafe { self.api().measure_text(text, font_size) })
    }

    /// Close the window and release the graphics thread
    pub fn close_window(self) {
        unsafe { self.api().close_window() };
        *self.bridge.graphics_owner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Address;
    use crate::callback::is_registered;
    use crate::loader::SymbolTable;
    use crate::raylib::DynamicRaylib;
    use std::cell::Cell;
    use std::ffi::CStr;
    use std::os::raw::{c_char, c_uint};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Stubbed = Bridge<DynamicRaylib>;

    #[repr(transparent)]
    struct Exported(*const c_char);
    unsafe impl Sync for Exported {}

    static VERSION_5_5: Exported = Exported(b"5.5\0".as_ptr() as *const c_char);
    static VERSION_5_0: Exported = Exported(b"5.0\0".as_ptr() as *const c_char);

    static FILE_RELEASES: AtomicUsize = AtomicUsize::new(0);
    static LOG_CALLBACK: AtomicUsize = AtomicUsize::new(0);
    static SAVE_TEXT_CALLBACK: AtomicUsize = AtomicUsize::new(0);
    static STREAM_PROCESSOR: AtomicUsize = AtomicUsize::new(0);
    static STREAM_DETACHES: AtomicUsize = AtomicUsize::new(0);
    static MIXED_PROCESSOR: AtomicUsize = AtomicUsize::new(0);

    thread_local! {
        static WINDOW_WIDTH: Cell<c_int> = const { Cell::new(0) };
    }

    const FILE_BYTES: &[u8] = b"data";

    extern "C" fn placeholder() {}

    extern "C" fn init_window(width: c_int, _height: c_int, _title: *const c_char) {
        WINDOW_WIDTH.with(|w| w.set(width));
    }

    extern "C" fn is_window_ready() -> bool {
        WINDOW_WIDTH.with(|w| w.get() > 0)
    }

    extern "C" fn close_window() {}

    extern "C" fn get_screen_width() -> c_int {
        800
    }

    extern "C" fn get_color(hex_value: c_uint) -> Color {
        Color::from_packed(hex_value)
    }

    extern "C" fn color_to_int(color: Color) -> c_int {
        color.to_packed() as c_int
    }

    unsafe extern "C" fn load_file_data(file_name: *const c_char, data_size: *mut c_int) -> *mut u8 {
        if CStr::from_ptr(file_name).to_bytes() == b"missing.bin" {
            *data_size = 0;
            return ptr::null_mut();
        }
        let boxed: Box<[u8]> = FILE_BYTES.into();
        *data_size = boxed.len() as c_int;
        Box::into_raw(boxed) as *mut u8
    }

    unsafe extern "C" fn unload_file_data(data: *mut u8) {
        let _ = Box::from_raw(ptr::slice_from_raw_parts_mut(data, FILE_BYTES.len()));
        FILE_RELEASES.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn wave_crop(wave: *mut Wave, init_frame: c_int, final_frame: c_int) {
        (*wave).frame_count = (final_frame - init_frame) as u32;
    }

    extern "C" fn native_unload_stream(_stream: AudioStream) {}

    extern "C" fn native_attach_stream(_stream: AudioStream, processor: *const c_void) {
        STREAM_PROCESSOR.store(processor as usize, Ordering::SeqCst);
    }

    extern "C" fn native_detach_stream(_stream: AudioStream, processor: *const c_void) {
        let _ = STREAM_PROCESSOR.compare_exchange(processor as usize, 0, Ordering::SeqCst, Ordering::SeqCst);
        STREAM_DETACHES.fetch_add(1, Ordering::SeqCst);
    }

    extern "C" fn native_attach_mixed(processor: *const c_void) {
        MIXED_PROCESSOR.store(processor as usize, Ordering::SeqCst);
    }

    extern "C" fn native_detach_mixed(processor: *const c_void) {
        let _ = MIXED_PROCESSOR.compare_exchange(processor as usize, 0, Ordering::SeqCst, Ordering::SeqCst);
    }

    extern "C" fn set_trace_log_callback(callback: *const c_void) {
        LOG_CALLBACK.store(callback as usize, Ordering::SeqCst);
    }

    extern "C" fn set_save_file_text_callback(callback: *const c_void) {
        SAVE_TEXT_CALLBACK.store(callback as usize, Ordering::SeqCst);
    }

    // forwards to the installed callback, otherwise reports failure
    unsafe extern "C" fn save_file_text(file_name: *const c_char, text: *mut c_char) -> bool {
        let callback = SAVE_TEXT_CALLBACK.load(Ordering::SeqCst);
        if callback == 0 {
            return false;
        }
        let callback: unsafe extern "C" fn(*const c_char, *mut c_char) -> bool =
            std::mem::transmute(callback);
        callback(file_name, text)
    }

    fn stub_library(version: &'static Exported) -> NativeHandle {
        let mut table = SymbolTable::new("raylib-stub");
        for symbol in <DynamicRaylib as Binding>::SYMBOLS {
            table.insert(symbol, Address(placeholder as usize));
        }
        let stubs: [(&str, usize); 18] = [
            ("InitWindow", init_window as usize),
            ("IsWindowReady", is_window_ready as usize),
            ("UnloadAudioStream", native_unload_stream as usize),
            ("AttachAudioStreamProcessor", native_attach_stream as usize),
            ("DetachAudioStreamProcessor", native_detach_stream as usize),
            ("AttachAudioMixedProcessor", native_attach_mixed as usize),
            ("DetachAudioMixedProcessor", native_detach_mixed as usize),
            ("CloseWindow", close_window as usize),
            ("GetScreenWidth", get_screen_width as usize),
            ("GetColor", get_color as usize),
            ("ColorToInt", color_to_int as usize),
            ("LoadFileData", load_file_data as usize),
            ("UnloadFileData", unload_file_data as usize),
            ("WaveCrop", wave_crop as usize),
            ("SetTraceLogCallback", set_trace_log_callback as usize),
            ("SetSaveFileTextCallback", set_save_file_text_callback as usize),
            ("SaveFileText", save_file_text as usize),
            ("raylib_version", version as *const Exported as usize),
        ];
        for (symbol, address) in stubs {
            table.insert(symbol, Address(address));
        }
        Box::new(table)
    }

    fn stub_bridge() -> Stubbed {
        Stubbed::with_native(Some(stub_library(&VERSION_5_5)), BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_open_against_stub() {
        let bridge = stub_bridge();
        assert_eq!(bridge.version(), "5.5");
        assert_eq!(bridge.backend(), Backend::Dynamic);
        assert_eq!(bridge.library_name(), Some("raylib-stub"));
    }

    #[test]
    fn test_version_mismatch_refuses_library() {
        let result = Stubbed::with_native(Some(stub_library(&VERSION_5_0)), BridgeConfig::default());
        match result {
            Err(BridgeError::VersionMismatch { required, found }) => {
                assert_eq!(required, "5.5");
                assert_eq!(found, "5.0");
            }
            Err(e) => panic!("expected VersionMismatch, got {}", e),
            Ok(_) => panic!("expected VersionMismatch, got a bridge"),
        }
    }

    #[test]
    fn test_dynamic_backend_needs_a_library() {
        assert!(matches!(
            Stubbed::with_native(None, BridgeConfig::default()),
            Err(BridgeError::NotInitialized)
        ));
    }

    #[test]
    fn test_graphics_thread_affinity() {
        let bridge = stub_bridge();
        assert!(matches!(bridge.graphics(), Err(BridgeError::NoWindow)));

        let context = bridge.init_window(800, 450, "stub").unwrap();
        assert_eq!(context.screen_width(), 800);

        std::thread::scope(|s| {
            s.spawn(|| {
                assert!(matches!(
                    bridge.graphics(),
                    Err(BridgeError::ThreadAffinity { .. })
                ));
                let err = bridge.init_window(640, 480, "other").err().unwrap();
                assert_eq!(err.kind(), crate::error::ErrorKind::Call);
            });
        });

        assert!(bridge.graphics().is_ok());
        context.close_window();
        assert!(matches!(bridge.graphics(), Err(BridgeError::NoWindow)));
    }

    #[test]
    fn test_failed_window_releases_owner() {
        let bridge = stub_bridge();
        match bridge.init_window(0, 0, "headless") {
            Err(BridgeError::WindowInitFailed { width, height }) => assert_eq!((width, height), (0, 0)),
            Err(e) => panic!("expected WindowInitFailed, got {}", e),
            Ok(_) => panic!("got a context for a window that never opened"),
        }
        assert!(matches!(bridge.graphics(), Err(BridgeError::NoWindow)));
        let context = bridge.init_window(320, 240, "retry").unwrap();
        context.close_window();
    }

    #[test]
    fn test_title_with_nul_is_rejected_before_owning() {
        let bridge = stub_bridge();
        assert!(bridge.init_window(800, 450, "bad\0title").is_err());
        assert!(matches!(bridge.graphics(), Err(BridgeError::NoWindow)));
    }

    #[test]
    fn test_colors_pass_by_value() {
        let bridge = stub_bridge();
        assert_eq!(bridge.get_color(0xE6_29_37_FF), Color::rgba(230, 41, 55, 255));
        assert_eq!(bridge.color_to_int(Color::RED), Color::RED.to_packed() as i32);
    }

    #[test]
    fn test_load_file_data_releases_once() {
        let bridge = stub_bridge();
        let before = FILE_RELEASES.load(Ordering::SeqCst);
        {
            let buffer = bridge.load_file_data("level.bin").unwrap().unwrap();
            assert_eq!(buffer.as_slice(), FILE_BYTES);
        }
        assert_eq!(FILE_RELEASES.load(Ordering::SeqCst), before + 1);
        assert!(bridge.load_file_data("missing.bin").unwrap().is_none());
        assert_eq!(FILE_RELEASES.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_wave_crop_writes_through_pointer() {
        let bridge = stub_bridge();
        let mut wave = Wave {
            frame_count: 100,
            sample_rate: 44100,
            sample_size: 16,
            channels: 2,
            data: Address::NULL,
        };
        bridge.wave_crop(&mut wave, 10, 60).unwrap();
        assert_eq!(wave.frame_count, 50);
        assert!(!crate::pin::is_pinned(&wave as *const Wave as usize));
    }

    #[test]
    fn test_log_callback_swap() {
        let bridge = stub_bridge();
        let first = TrampolineHandle::trace_log(|_, _| {});
        let first_id = first.id();
        let first_ptr = first.as_ptr() as usize;
        bridge.set_trace_log_callback(first).unwrap();
        assert_eq!(LOG_CALLBACK.load(Ordering::SeqCst), first_ptr);
        assert!(is_registered(first_id));

        let second = TrampolineHandle::trace_log(|_, _| {});
        let second_id = second.id();
        bridge.set_trace_log_callback(second).unwrap();
        assert!(!is_registered(first_id));
        assert!(is_registered(second_id));

        bridge.clear_trace_log_callback();
        assert_eq!(LOG_CALLBACK.load(Ordering::SeqCst), 0);
        assert!(!is_registered(second_id));
    }

    #[test]
    fn test_callback_kind_is_checked() {
        let bridge = stub_bridge();
        let wrong = TrampolineHandle::save_file_text(|_, _| true);
        let err = bridge.set_trace_log_callback(wrong).unwrap_err();
        assert!(matches!(err, BridgeError::SignatureMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_save_file_text_through_callback() {
        let bridge = stub_bridge();
        let saved: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
        let sink = Arc::clone(&saved);
        let handle = TrampolineHandle::save_file_text(move |file, text| {
            sink.lock().push((file.to_string(), text.to_string()));
            true
        });
        bridge.set_save_file_text_callback(handle).unwrap();

        assert!(bridge.save_file_text("notes.txt", "hello").unwrap());
        assert_eq!(
            saved.lock().as_slice(),
            &[("notes.txt".to_string(), "hello".to_string())]
        );

        bridge.clear_save_file_text_callback();
        assert!(!bridge.save_file_text("notes.txt", "again").unwrap());
        assert_eq!(saved.lock().len(), 1);
    }

    #[test]
    fn test_audio_processor_channel_check() {
        let bridge = stub_bridge();
        let stream = AudioStream {
            channels: 1,
            ..AudioStream::default()
        };
        let stereo = TrampolineHandle::audio_processor(2, |_, _| {}).unwrap();
        let id = stereo.id();
        let err = bridge
            .attach_audio_stream_processor(&stream, stereo)
            .unwrap_err();
        assert!(matches!(err, BridgeError::SignatureMismatch { .. }));
        assert!(!is_registered(id));
        assert_eq!(bridge.attached_processors(), 0);
    }

    // all processor flows share the stub's statics, so they run in one test
    #[test]
    fn test_attached_processors_are_detached() {
        let stream = AudioStream {
            buffer: Address(0x1000),
            channels: 2,
            ..AudioStream::default()
        };
        let detaches = || STREAM_DETACHES.load(Ordering::SeqCst);

        // explicit detach hands the handle back
        let bridge = stub_bridge();
        let handle = TrampolineHandle::audio_processor(2, |_, _| {}).unwrap();
        let code = handle.as_ptr() as usize;
        let id = bridge.attach_audio_stream_processor(&stream, handle).unwrap();
        assert_eq!(STREAM_PROCESSOR.load(Ordering::SeqCst), code);
        assert!(is_registered(id));
        let before = detaches();
        let handle = bridge.detach_audio_processor(id).unwrap();
        assert_eq!(detaches(), before + 1);
        assert_eq!(STREAM_PROCESSOR.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), crate::callback::TrampolineState::Unregistered);
        assert!(bridge.detach_audio_processor(id).is_none());

        // unloading the stream detaches what is still attached to it
        let id = bridge.attach_audio_stream_processor(&stream, handle).unwrap();
        let before = detaches();
        bridge.unload_audio_stream(stream);
        assert_eq!(detaches(), before + 1);
        assert!(!is_registered(id));
        assert_eq!(bridge.attached_processors(), 0);

        // dropping the bridge detaches before the closures are freed
        let handle = TrampolineHandle::audio_processor(2, |_, _| {}).unwrap();
        let id = bridge.attach_audio_stream_processor(&stream, handle).unwrap();
        let mixed = TrampolineHandle::audio_processor(2, |_, _| {}).unwrap();
        let mixed_id = bridge.attach_audio_mixed_processor(mixed).unwrap();
        assert_ne!(MIXED_PROCESSOR.load(Ordering::SeqCst), 0);
        let before = detaches();
        drop(bridge);
        assert_eq!(detaches(), before + 1);
        assert_eq!(STREAM_PROCESSOR.load(Ordering::SeqCst), 0);
        assert_eq!(MIXED_PROCESSOR.load(Ordering::SeqCst), 0);
        assert!(!is_registered(id));
        assert!(!is_registered(mixed_id));
    }
}
