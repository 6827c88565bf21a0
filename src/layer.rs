// Caller-facing data model: Layer, LayerStack, LayerBuffer (spec.md §3.1).
//
// Grounded on `core/layer_stack.h` and `core/layer_buffer.h`
// (examples/original_source/displayengine/include/core), generalized from
// the original's four-plane C struct into owned Rust types.

use crate::format::PixelFormat;
use std::os::unix::io::RawFd;

/// An axis-aligned rectangle in floating point mixer/fb coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayerRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl LayerRect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        LayerRect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// `left <= right`, `top <= bottom`, and no NaN coordinate.
    pub fn is_valid(&self) -> bool {
        !self.left.is_nan()
            && !self.top.is_nan()
            && !self.right.is_nan()
            && !self.bottom.is_nan()
            && self.left <= self.right
            && self.top <= self.bottom
    }

    /// All four coordinates are integer-valued (spec.md §4.3 crop rule).
    pub fn is_integral(&self) -> bool {
        self.left.fract() == 0.0
            && self.top.fract() == 0.0
            && self.right.fract() == 0.0
            && self.bottom.fract() == 0.0
    }
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct LayerFlags: u32 {
        const CURSOR      = 1 << 0;
        const SKIP        = 1 << 1;
        const UPDATING    = 1 << 2;
        const SINGLE_BUFFER = 1 << 3;
    }
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct LayerStackFlags: u32 {
        const GEOMETRY_CHANGED      = 1 << 0;
        const SECURE_PRESENT        = 1 << 1;
        const VIDEO_PRESENT         = 1 << 2;
        const SINGLE_BUFFERED_PRESENT = 1 << 3;
        const CURSOR_PRESENT        = 1 << 4;
    }
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct LayerBufferFlags: u32 {
        const SECURE         = 1 << 0;
        const SECURE_DISPLAY = 1 << 1;
        const INTERLACE      = 1 << 2;
        const VIDEO          = 1 << 3;
    }
}

/// One plane of a buffer: an fd, a byte offset into it, and its stride.
/// A negative fd means "not applicable" when used for a fence slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaneInfo {
    pub fd: RawFd,
    pub offset: u32,
    pub stride: u32,
}

/// Up to four image planes, plus the fence slots a producer/consumer pair
/// negotiate a buffer handoff through (spec.md §3.1, §6).
#[derive(Debug, Clone, Default)]
pub struct LayerBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<PlaneInfo>,
    /// IN: signalled by the producer when it is done writing.
    pub acquire_fence: RawFd,
    /// OUT: signalled by the core when it is done reading.
    pub release_fence: RawFd,
    pub flags: LayerBufferFlags,
}

impl LayerBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        LayerBuffer {
            width,
            height,
            format,
            planes: Vec::new(),
            acquire_fence: -1,
            release_fence: -1,
            flags: LayerBufferFlags::empty(),
        }
    }
}

/// Horizontal/vertical mirror plus rotation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayerTransform {
    pub rotation: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl LayerTransform {
    pub fn is_identity(&self) -> bool {
        self.rotation == 0.0 && !self.flip_horizontal && !self.flip_vertical
    }

    /// 90/270 rotation swaps the footprint's width/height.
    pub fn needs_90_rotate(&self) -> bool {
        let r = self.rotation.rem_euclid(360.0);
        r == 90.0 || r == 270.0
    }
}

/// Blend mode applied when compositing a layer over what is beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendingMode {
    #[default]
    Opaque,
    Premultiplied,
    Coverage,
}

/// Tagged composition kind (spec.md §3.1). Exactly one `GPUTarget` and at
/// most one `BlitTarget` may exist in a prepared stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionType {
    Gpu,
    Sde,
    HwCursor,
    Hybrid,
    Blit,
    GpuTarget,
    BlitTarget,
}

#[derive(Debug, Clone, Default)]
pub struct SolidFillColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// One entry in a LayerStack: a source rect cropped from `input_buffer`,
/// mapped onto `dst_rect` in mixer space.
#[derive(Debug, Clone)]
pub struct Layer {
    pub input_buffer: Option<LayerBuffer>,
    pub composition: CompositionType,
    pub src_rect: LayerRect,
    pub dst_rect: LayerRect,
    pub blending: BlendingMode,
    pub plane_alpha: u8,
    pub transform: LayerTransform,
    pub solid_fill_color: Option<SolidFillColor>,
    pub frame_rate: u32,
    pub flags: LayerFlags,
}

impl Layer {
    pub fn new(composition: CompositionType) -> Self {
        Layer {
            input_buffer: None,
            composition,
            src_rect: LayerRect::default(),
            dst_rect: LayerRect::default(),
            blending: BlendingMode::default(),
            plane_alpha: 0xff,
            transform: LayerTransform::default(),
            solid_fill_color: None,
            frame_rate: 60,
            flags: LayerFlags::empty(),
        }
    }

    pub fn is_yuv(&self) -> bool {
        self.input_buffer
            .as_ref()
            .map(|b| b.format.is_yuv())
            .unwrap_or(false)
    }

    /// A layer is cursor-eligible if it carries the cursor flag; the stack
    /// level `cursor_present` bit and hardware capability are checked by
    /// the strategy engine (spec.md §4.4).
    pub fn is_cursor_flagged(&self) -> bool {
        self.flags.contains(LayerFlags::CURSOR)
    }
}

/// Bottom-to-top ordered layer sequence plus stack-level state
/// (spec.md §3.1).
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    pub layers: Vec<Layer>,
    pub output_buffer: Option<LayerBuffer>,
    /// OUT, filled in by Commit on physical displays only.
    pub retire_fence: RawFd,
    /// OUT, a duplicate of the commit's release fence the caller can wait
    /// on without walking every layer (spec.md §4.2).
    pub release_fence: RawFd,
    pub flags: LayerStackFlags,
}

impl LayerStack {
    pub fn new() -> Self {
        LayerStack {
            layers: Vec::new(),
            output_buffer: None,
            retire_fence: -1,
            release_fence: -1,
            flags: LayerStackFlags::empty(),
        }
    }

    pub fn gpu_target_index(&self) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.composition == CompositionType::GpuTarget)
    }

    pub fn blit_target_index(&self) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.composition == CompositionType::BlitTarget)
    }

    /// Layer-stack validation rules from spec.md §4.1. Returns the
    /// specific violation so the controller can log it before mapping to
    /// `SdeError::Parameters`.
    pub fn validate_shape(&self) -> Result<(), &'static str> {
        let gpu_targets: Vec<usize> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.composition == CompositionType::GpuTarget)
            .map(|(i, _)| i)
            .collect();

        if gpu_targets.len() != 1 {
            return Err("exactly one GPUTarget layer must exist");
        }
        let gpu_target_index = gpu_targets[0];

        if gpu_target_index != self.layers.len() - 1 {
            // Not strictly "last", but every non-GPUTarget layer must
            // precede it -- equivalent to it being last in the stack.
            for (i, l) in self.layers.iter().enumerate() {
                if l.composition != CompositionType::GpuTarget && i > gpu_target_index {
                    return Err("a non-GPUTarget layer follows the GPUTarget layer");
                }
            }
        }

        let blit_targets = self
            .layers
            .iter()
            .filter(|l| l.composition == CompositionType::BlitTarget)
            .count();
        if blit_targets > 1 {
            return Err("at most one BlitTarget layer may exist");
        }

        let gpu_target = &self.layers[gpu_target_index];
        if !gpu_target.src_rect.is_valid() || !gpu_target.dst_rect.is_valid() {
            return Err("GPUTarget rectangles are invalid");
        }

        Ok(())
    }
}
