// Raybridge raylib Binding
// The fixed raylib 5.5 function table, declared once for both backends
//
// Only the entry points the bridge wraps are bound. Anything added here must
// match raylib.h for this exact version; a newer raylib gets a new binding.

use crate::abi::mirror::{AudioStream, Color, Image, Rectangle, Wave};
use crate::binding::Binding;
use std::ffi::c_void;
use std::os::raw::{c_char, c_int, c_uint};

crate::bind_native! {
    /// raylib 5.5 entry points, callable through either backend
    pub trait RaylibApi;
    version static raylib_version == "5.5";
    static StaticRaylib in raylib_sys, cfg(feature = "static-link"), link(name = "raylib");
    dynamic DynamicRaylib;

    // window
    fn init_window = InitWindow(width: c_int, height: c_int, title: *const c_char);
    fn close_window = CloseWindow();
    fn window_should_close = WindowShouldClose() -> bool;
    fn is_window_ready = IsWindowReady() -> bool;
    fn get_screen_width = GetScreenWidth() -> c_int;
    fn get_screen_height = GetScreenHeight() -> c_int;
    fn set_target_fps = SetTargetFPS(fps: c_int);

    // drawing
    fn begin_drawing = BeginDrawing();
    fn end_drawing = EndDrawing();
    fn clear_background = ClearBackground(color: Color);
    fn draw_rectangle_rec = DrawRectangleRec(rec: Rectangle, color: Color);
    fn draw_text = DrawText(text: *const c_char, pos_x: c_int, pos_y: c_int, font_size: c_int, color: Color);
    fn measure_text = MeasureText(text: *const c_char, font_size: c_int) -> c_int;

    // colors
    fn color_to_int = ColorToInt(color: Color) -> c_int;
    fn get_color = GetColor(hex_value: c_uint) -> Color;

    // logging and file callbacks
    fn set_trace_log_level = SetTraceLogLevel(log_level: c_int);
    /// `callback` is a `TraceLogCallback` trampoline or null
    fn set_trace_log_callback = SetTraceLogCallback(callback: *const c_void);
    /// `callback` is a `SaveFileTextCallback` trampoline or null
    fn set_save_file_text_callback = SetSaveFileTextCallback(callback: *const c_void);
    fn save_file_text = SaveFileText(file_name: *const c_char, text: *mut c_char) -> bool;

    // memory and files
    fn mem_free = MemFree(ptr: *mut c_void);
    fn load_file_data = LoadFileData(file_name: *const c_char, data_size: *mut c_int) -> *mut u8;
    fn unload_file_data = UnloadFileData(data: *mut u8);
    fn save_file_data = SaveFileData(file_name: *const c_char, data: *mut c_void, data_size: c_int) -> bool;
    fn load_image_from_memory = LoadImageFromMemory(file_type: *const c_char, file_data: *const u8, data_size: c_int) -> Image;
    fn unload_image = UnloadImage(image: Image);

    // audio device and streams
    fn init_audio_device = InitAudioDevice();
    fn close_audio_device = CloseAudioDevice();
    fn is_audio_device_ready = IsAudioDeviceReady() -> bool;
    fn load_audio_stream = LoadAudioStream(sample_rate: c_uint, sample_size: c_uint, channels: c_uint) -> AudioStream;
    fn unload_audio_stream = UnloadAudioStream(stream: AudioStream);
    fn attach_audio_stream_processor = AttachAudioStreamProcessor(stream: AudioStream, processor: *const c_void);
    fn detach_audio_stream_processor = DetachAudioStreamProcessor(stream: AudioStream, processor: *const c_void);
    fn attach_audio_mixed_processor = AttachAudioMixedProcessor(processor: *const c_void);
    fn detach_audio_mixed_processor = DetachAudioMixedProcessor(processor: *const c_void);

    // waves
    fn load_wave_from_memory = LoadWaveFromMemory(file_type: *const c_char, file_data: *const u8, data_size: c_int) -> Wave;
    fn unload_wave = UnloadWave(wave: Wave);
    fn load_wave_samples = LoadWaveSamples(wave: Wave) -> *mut f32;
    fn unload_wave_samples = UnloadWaveSamples(samples: *mut f32);
    fn wave_crop = WaveCrop(wave: *mut Wave, init_frame: c_int, final_frame: c_int);
}

/// The backend selected at build time
#[cfg(feature = "static-link")]
pub type ActiveRaylib = StaticRaylib;

/// The backend selected at build time
#[cfg(not(feature = "static-link"))]
pub type ActiveRaylib = DynamicRaylib;

/// The only raylib version this binding speaks
pub const REQUIRED_VERSION: &str = <DynamicRaylib as Binding>::REQUIRED_VERSION;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Address;
    use crate::binding::Backend;
    use crate::loader::SymbolTable;
    use crate::version::VersionExport;

    #[test]
    fn test_binding_constants() {
        assert_eq!(REQUIRED_VERSION, "5.5");
        assert_eq!(<DynamicRaylib as Binding>::VERSION_SYMBOL, "raylib_version");
        assert_eq!(<DynamicRaylib as Binding>::VERSION_EXPORT, VersionExport::Data);
        assert_eq!(<DynamicRaylib as Binding>::BACKEND, Backend::Dynamic);
        let symbols = <DynamicRaylib as Binding>::SYMBOLS;
        assert_eq!(symbols[0], "raylib_version");
        assert!(symbols.contains(&"WaveCrop"));
        assert!(symbols.contains(&"SetTraceLogCallback"));
    }

    #[test]
    fn test_bind_reports_first_missing_symbol() {
        extern "C" fn placeholder() {}
        // everything except CloseWindow
        let mut table = SymbolTable::new("partial");
        for symbol in <DynamicRaylib as Binding>::SYMBOLS {
            if *symbol != "CloseWindow" {
                table.insert(symbol, Address(placeholder as usize));
            }
        }
        match DynamicRaylib::bind(Some(&table)) {
            Err(crate::BridgeError::SymbolNotFound { symbol, .. }) => {
                assert_eq!(symbol, "CloseWindow")
            }
            other => panic!("expected SymbolNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_descriptors_match_header_signatures() {
        extern "C" fn placeholder() {}
        let mut table = SymbolTable::new("shapes");
        for symbol in <DynamicRaylib as Binding>::SYMBOLS {
            table.insert(symbol, Address(placeholder as usize));
        }
        let api = DynamicRaylib::bind(Some(&table)).unwrap();
        let descriptors = api.descriptors();
        assert_eq!(descriptors.len(), <DynamicRaylib as Binding>::SYMBOLS.len() - 1);
        let render = |name: &str| {
            descriptors
                .iter()
                .find(|d| d.symbol() == name)
                .map(|d| d.to_string())
                .unwrap()
        };
        assert_eq!(render("GetColor"), "GetColor(u32) -> Color");
        assert_eq!(render("DrawRectangleRec"), "DrawRectangleRec(Rectangle, Color)");
        assert_eq!(render("WaveCrop"), "WaveCrop(ptr, i32, i32)");
        assert_eq!(render("SaveFileText"), "SaveFileText(ptr, ptr) -> bool");
        assert_eq!(render("LoadAudioStream"), "LoadAudioStream(u32, u32, u32) -> AudioStream");
    }

    #[test]
    fn test_bind_without_library() {
        assert!(matches!(
            DynamicRaylib::bind(None),
            Err(crate::BridgeError::NotInitialized)
        ));
    }
}
