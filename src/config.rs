// Hardware capability and attribute snapshots (spec.md §10.3 / SPEC_FULL
// §10.3): plain structs with `Default` impls so unit tests can build a
// fixture without a file-backed config system, mirroring how
// `thundr::CreateInfo` hands capability data down to `Device` without a
// config file of its own.
//
// Grounded on `core/hw_info_types.h` (`HWResourceInfo`, `HWDisplayAttributes`,
// `HWPanelInfo`) in original_source.

/// Fixed hardware limit reported once by the device adaptor (spec.md §4.2)
/// and consumed by the resource manager when picking and scaling pipes.
#[derive(Debug, Clone, Copy)]
pub struct HWResourceInfo {
    pub num_vig_pipe: u32,
    pub num_rgb_pipe: u32,
    pub num_dma_pipe: u32,
    pub num_cursor_pipe: u32,
    /// How many of the RGB pipes the bootloader splash screen already owns
    /// at `Engine` construction time (SPEC_FULL §11, supplemented feature).
    pub splash_owned_rgb_pipes: u32,
    pub max_scale_up: u32,
    pub max_scale_down: u32,
    pub max_source_pipe_width: f32,
    /// Crops narrower/shorter than this are rejected outright (spec.md §4.3
    /// rule 3); despite the name this is a floor, matching the original's
    /// confusingly-named `kMaxCropWidth`/`kMaxCropHeight` constants.
    pub min_crop_width: f32,
    pub min_crop_height: f32,
    pub has_decimation: bool,
    pub has_non_scalar_rgb: bool,
    pub is_src_split: bool,
}

impl Default for HWResourceInfo {
    fn default() -> Self {
        HWResourceInfo {
            num_vig_pipe: 4,
            num_rgb_pipe: 4,
            num_dma_pipe: 2,
            num_cursor_pipe: 1,
            splash_owned_rgb_pipes: 0,
            max_scale_up: 20,
            max_scale_down: 4,
            max_source_pipe_width: 2560.0,
            min_crop_width: 1.0,
            min_crop_height: 1.0,
            has_decimation: true,
            has_non_scalar_rgb: false,
            is_src_split: false,
        }
    }
}

/// A stereoscopic 3D packing an HDMI display mode may advertise
/// (spec.md §4.1 `Init`: "the highest-resolution mode matching a
/// requested S3D mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3DMode {
    SideBySide,
    TopBottom,
    FramePacking,
}

/// A single display's current mode (spec.md §4.1, §4.6).
#[derive(Debug, Clone, Copy)]
pub struct HWDisplayAttributes {
    pub x_pixels: u32,
    pub y_pixels: u32,
    pub fps: u32,
    /// Right edge of the left mixer half, in pixels. Equal to `x_pixels`
    /// unless the panel is split across two interfaces.
    pub split_left: u32,
    pub is_device_split: bool,
    /// The S3D packing this mode advertises, if any (HDMI only).
    pub s3d_mode: Option<S3DMode>,
}

impl Default for HWDisplayAttributes {
    fn default() -> Self {
        HWDisplayAttributes {
            x_pixels: 1920,
            y_pixels: 1080,
            fps: 60,
            split_left: 1920,
            is_device_split: false,
            s3d_mode: None,
        }
    }
}

/// Video mode drives the panel continuously off a live timing generator;
/// command mode only refreshes on an explicit trigger and cannot accept
/// an asynchronous cursor position update (spec.md §4.1, §4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelMode {
    #[default]
    Video,
    Command,
}

/// Panel capability bits the strategy engine consults when deciding
/// whether partial update / cursor offload is viable (spec.md §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct HWPanelInfo {
    pub partial_update: bool,
    pub left_roi_count: u32,
    pub right_roi_count: u32,
    pub is_primary_panel: bool,
    pub dynamic_fps: bool,
    pub mode: PanelMode,
}

/// The hard width threshold above which a layer must be split across two
/// mixer halves (spec.md §4.3), independent of any particular display's
/// attributes. Matches the original's `kMaxInterfaceWidth` constant.
pub const MAX_INTERFACE_WIDTH: f32 = 2048.0;
