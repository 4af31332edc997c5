// Raybridge Mirror Types
// #[repr(C)] copies of the raylib 5.5 structs, field for field

use super::{verify_layout, Address, LayoutReport};
use crate::error::BridgeResult;

abi_struct! {
    pub struct Vector2 {
        pub x: f32,
        pub y: f32,
    }

    pub struct Vector3 {
        pub x: f32,
        pub y: f32,
        pub z: f32,
    }

    pub struct Vector4 {
        pub x: f32,
        pub y: f32,
        pub z: f32,
        pub w: f32,
    }

    /// Column-major 4x4 matrix (OpenGL order), declared row by row as in raylib.h
    pub struct Matrix {
        pub m0: f32,
        pub m4: f32,
        pub m8: f32,
        pub m12: f32,
        pub m1: f32,
        pub m5: f32,
        pub m9: f32,
        pub m13: f32,
        pub m2: f32,
        pub m6: f32,
        pub m10: f32,
        pub m14: f32,
        pub m3: f32,
        pub m7: f32,
        pub m11: f32,
        pub m15: f32,
    }

    pub struct Color {
        pub r: u8,
        pub g: u8,
        pub b: u8,
        pub a: u8,
    }

    pub struct Rectangle {
        pub x: f32,
        pub y: f32,
        pub width: f32,
        pub height: f32,
    }

    /// Pixel data lives in native (CPU) memory
    pub struct Image {
        pub data: Address,
        pub width: i32,
        pub height: i32,
        pub mipmaps: i32,
        pub format: i32,
    }

    /// Pixel data lives in GPU memory; only the OpenGL id is held here
    pub struct Texture {
        pub id: u32,
        pub width: i32,
        pub height: i32,
        pub mipmaps: i32,
        pub format: i32,
    }

    pub struct RenderTexture {
        pub id: u32,
        pub texture: Texture,
        pub depth: Texture,
    }

    pub struct NPatchInfo {
        pub source: Rectangle,
        pub left: i32,
        pub top: i32,
        pub right: i32,
        pub bottom: i32,
        pub layout: i32,
    }

    pub struct GlyphInfo {
        pub value: i32,
        pub offset_x: i32,
        pub offset_y: i32,
        pub advance_x: i32,
        pub image: Image,
    }

    pub struct Font {
        pub base_size: i32,
        pub glyph_count: i32,
        pub glyph_padding: i32,
        pub texture: Texture,
        pub recs: Address,
        pub glyphs: Address,
    }

    pub struct Camera3D {
        pub position: Vector3,
        pub target: Vector3,
        pub up: Vector3,
        pub fovy: f32,
        pub projection: i32,
    }

    pub struct Camera2D {
        pub offset: Vector2,
        pub target: Vector2,
        pub rotation: f32,
        pub zoom: f32,
    }

    pub struct Ray {
        pub position: Vector3,
        pub direction: Vector3,
    }

    pub struct RayCollision {
        pub hit: bool,
        pub distance: f32,
        pub point: Vector3,
        pub normal: Vector3,
    }

    pub struct BoundingBox {
        pub min: Vector3,
        pub max: Vector3,
    }

    pub struct Wave {
        pub frame_count: u32,
        pub sample_rate: u32,
        pub sample_size: u32,
        pub channels: u32,
        pub data: Address,
    }

    /// `buffer` and `processor` are opaque rAudio internals
    pub struct AudioStream {
        pub buffer: Address,
        pub processor: Address,
        pub sample_rate: u32,
        pub sample_size: u32,
        pub channels: u32,
    }

    pub struct Sound {
        pub stream: AudioStream,
        pub frame_count: u32,
    }

    pub struct Music {
        pub stream: AudioStream,
        pub frame_count: u32,
        pub looping: bool,
        pub ctx_type: i32,
        pub ctx_data: Address,
    }

    pub struct Shader {
        pub id: u32,
        pub locs: Address,
    }

    pub struct FilePathList {
        pub capacity: u32,
        pub count: u32,
        pub paths: Address,
    }

    pub struct VrDeviceInfo {
        pub h_resolution: i32,
        pub v_resolution: i32,
        pub h_screen_size: f32,
        pub v_screen_size: f32,
        pub eye_to_screen_distance: f32,
        pub lens_separation_distance: f32,
        pub interpupillary_distance: f32,
        pub lens_distortion_values: [f32; 4],
        pub chroma_ab_correction: [f32; 4],
    }
}

pub type Quaternion = Vector4;
pub type Texture2D = Texture;
pub type TextureCubemap = Texture;
pub type RenderTexture2D = RenderTexture;
pub type Camera = Camera3D;

// ==================== Color Conversions ====================

impl Color {
    pub const LIGHTGRAY: Color = Color::rgba(200, 200, 200, 255);
    pub const GRAY: Color = Color::rgba(130, 130, 130, 255);
    pub const RED: Color = Color::rgba(230, 41, 55, 255);
    pub const GREEN: Color = Color::rgba(0, 228, 48, 255);
    pub const BLUE: Color = Color::rgba(0, 121, 241, 255);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const BLANK: Color = Color::rgba(0, 0, 0, 0);
    pub const RAYWHITE: Color = Color::rgba(245, 245, 245, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color { r, g, b, a }
    }

    /// Packed as 0xRRGGBBAA, the encoding of ColorToInt/GetColor
    pub const fn to_packed(self) -> u32 {
        ((self.r as u32) << 24) | ((self.g as u32) << 16) | ((self.b as u32) << 8) | self.a as u32
    }

    pub const fn from_packed(value: u32) -> Self {
        Color {
            r: (value >> 24) as u8,
            g: (value >> 16) as u8,
            b: (value >> 8) as u8,
            a: value as u8,
        }
    }
}

impl From<[u8; 4]> for Color {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Color { r, g, b, a }
    }
}

impl From<Color> for [u8; 4] {
    fn from(c: Color) -> Self {
        [c.r, c.g, c.b, c.a]
    }
}

// ==================== Header Layout Table ====================

/// (name, size, align) as compiled from raylib.h 5.5 on LP64/LLP64 targets
#[cfg(target_pointer_width = "64")]
pub const NATIVE_LAYOUTS: &[(&str, usize, usize)] = &[
    ("Vector2", 8, 4),
    ("Vector3", 12, 4),
    ("Vector4", 16, 4),
    ("Matrix", 64, 4),
    ("Color", 4, 1),
    ("Rectangle", 16, 4),
    ("Image", 24, 8),
    ("Texture", 20, 4),
    ("RenderTexture", 44, 4),
    ("NPatchInfo", 36, 4),
    ("GlyphInfo", 40, 8),
    ("Font", 48, 8),
    ("Camera3D", 44, 4),
    ("Camera2D", 24, 4),
    ("Ray", 24, 4),
    ("RayCollision", 32, 4),
    ("BoundingBox", 24, 4),
    ("Wave", 24, 8),
    ("AudioStream", 32, 8),
    ("Sound", 40, 8),
    ("Music", 56, 8),
    ("Shader", 16, 8),
    ("FilePathList", 16, 8),
    ("VrDeviceInfo", 60, 4),
];

#[cfg(not(target_pointer_width = "64"))]
pub const NATIVE_LAYOUTS: &[(&str, usize, usize)] = &[];

pub fn header_layout(name: &str) -> Option<(usize, usize)> {
    NATIVE_LAYOUTS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, size, align)| (*size, *align))
}

macro_rules! assert_layout {
    ($($ty:ty => $size:expr, $align:expr;)*) => {
        $(
            const _: () = assert!(std::mem::size_of::<$ty>() == $size);
            const _: () = assert!(std::mem::align_of::<$ty>() == $align);
        )*
    };
}

#[cfg(target_pointer_width = "64")]
assert_layout! {
    Vector2 => 8, 4;
    Vector3 => 12, 4;
    Vector4 => 16, 4;
    Matrix => 64, 4;
    Color => 4, 1;
    Rectangle => 16, 4;
    Image => 24, 8;
    Texture => 20, 4;
    RenderTexture => 44, 4;
    NPatchInfo => 36, 4;
    GlyphInfo => 40, 8;
    Font => 48, 8;
    Camera3D => 44, 4;
    Camera2D => 24, 4;
    Ray => 24, 4;
    RayCollision => 32, 4;
    BoundingBox => 24, 4;
    Wave => 24, 8;
    AudioStream => 32, 8;
    Sound => 40, 8;
    Music => 56, 8;
    Shader => 16, 8;
    FilePathList => 16, 8;
    VrDeviceInfo => 60, 4;
}

/// Run the layout check over every mirror, stopping at the first mismatch
pub fn verify_all() -> BridgeResult<Vec<LayoutReport>> {
    Ok(vec![
        verify_layout::<Vector2>()?,
        verify_layout::<Vector3>()?,
        verify_layout::<Vector4>()?,
        verify_layout::<Matrix>()?,
        verify_layout::<Color>()?,
        verify_layout::<Rectangle>()?,
        verify_layout::<Image>()?,
        verify_layout::<Texture>()?,
        verify_layout::<RenderTexture>()?,
        verify_layout::<NPatchInfo>()?,
        verify_layout::<GlyphInfo>()?,
        verify_layout::<Font>()?,
        verify_layout::<Camera3D>()?,
        verify_layout::<Camera2D>()?,
        verify_layout::<Ray>()?,
        verify_layout::<RayCollision>()?,
        verify_layout::<BoundingBox>()?,
        verify_layout::<Wave>()?,
        verify_layout::<AudioStream>()?,
        verify_layout::<Sound>()?,
        verify_layout::<Music>()?,
        verify_layout::<Shader>()?,
        verify_layout::<FilePathList>()?,
        verify_layout::<VrDeviceInfo>()?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AbiMirror, NativeType};
    use std::mem::offset_of;

    #[test]
    fn test_self_check_passes() {
        let reports = verify_all().unwrap();
        assert_eq!(reports.len(), 24);
        #[cfg(target_pointer_width = "64")]
        assert!(reports.iter().all(|r| r.header_checked));
    }

    #[test]
    fn test_field_offsets_match_header() {
        assert_eq!(offset_of!(RayCollision, point), 8);
        assert_eq!(offset_of!(Camera3D, projection), 40);
        assert_eq!(offset_of!(Music, looping), 36);
        assert_eq!(offset_of!(Music, ctx_type), 40);
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(offset_of!(Music, ctx_data), 48);
            assert_eq!(offset_of!(Wave, data), 16);
            assert_eq!(offset_of!(AudioStream, sample_rate), 16);
            assert_eq!(offset_of!(GlyphInfo, image), 16);
            assert_eq!(offset_of!(Font, recs), 32);
            assert_eq!(offset_of!(Shader, locs), 8);
        }
    }

    fn assert_round_trip<T: AbiMirror + std::fmt::Debug>(value: T) {
        let bytes = value.to_native();
        let back = T::mirror_of(&bytes).unwrap();
        assert_eq!(back.to_native(), bytes, "{} bytes changed", T::NAME);
    }

    #[test]
    fn test_round_trip_edge_values() {
        assert_round_trip(Vector2::default());
        assert_round_trip(Vector2 {
            x: f32::MAX,
            y: f32::MIN,
        });
        // NaN compares unequal but must keep its bit pattern
        assert_round_trip(Vector4 {
            x: f32::NAN,
            y: -0.0,
            z: f32::INFINITY,
            w: f32::MIN_POSITIVE,
        });
        assert_round_trip(Texture {
            id: u32::MAX,
            width: i32::MIN,
            height: -1,
            mipmaps: i32::MAX,
            format: 7,
        });
        assert_round_trip(Music {
            stream: AudioStream {
                buffer: Address(usize::MAX),
                processor: Address::NULL,
                sample_rate: 48_000,
                sample_size: 32,
                channels: 2,
            },
            frame_count: u32::MAX,
            looping: true,
            ctx_type: -3,
            ctx_data: Address(0x1000),
        });
        assert_round_trip(RayCollision {
            hit: true,
            distance: f32::NAN,
            point: Vector3 {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
            normal: Vector3::default(),
        });
        assert_round_trip(VrDeviceInfo {
            lens_distortion_values: [1.0, 0.22, 0.24, 0.0],
            chroma_ab_correction: [0.996, -0.004, 1.014, 0.0],
            ..VrDeviceInfo::default()
        });
    }

    #[test]
    fn test_unsigned_fields_stay_unsigned() {
        let wave = Wave {
            frame_count: 0xFFFF_FFFF,
            ..Wave::default()
        };
        let back = Wave::mirror_of(&wave.to_native()).unwrap();
        assert_eq!(back.frame_count, u32::MAX);
    }

    #[test]
    fn test_music_rejects_bad_looping_byte() {
        let mut bytes = Music::default().to_native();
        bytes[offset_of!(Music, looping)] = 0xFF;
        assert!(Music::mirror_of(&bytes).is_err());
    }

    #[test]
    fn test_color_conversions() {
        let c = Color::rgba(0x12, 0x34, 0x56, 0x78);
        assert_eq!(c.to_packed(), 0x1234_5678);
        assert_eq!(Color::from_packed(0x1234_5678), c);
        let raw: [u8; 4] = c.into();
        assert_eq!(raw, [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(Color::from(raw), c);
        // a Color's native bytes are exactly its channels
        assert_eq!(c.to_native(), raw.to_vec());
    }

    #[test]
    fn test_matrix_field_order() {
        let ty = Matrix::abi_type();
        let spans = ty.leaf_spans();
        assert_eq!(spans.len(), 16);
        assert_eq!(offset_of!(Matrix, m4), 4);
        assert_eq!(offset_of!(Matrix, m1), 16);
        assert_eq!(offset_of!(Matrix, m15), 60);
    }
}
