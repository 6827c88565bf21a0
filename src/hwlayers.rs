// The hardware-resolved plan a successful Prepare leaves behind
// (spec.md §3.2), built by the builder described in spec.md §9.1: mutable
// while the negotiation loop runs, handed to the device adaptor as a
// finished value once a strategy lands.

use crate::layer::LayerRect;
use crate::rotator::HWRotatorSession;

/// One side (left or right half-mixer) of a hardware layer's pipe
/// assignment.
#[derive(Debug, Clone, Default)]
pub struct HWPipeInfo {
    pub valid: bool,
    pub pipe_id: u32,
    pub src_roi: LayerRect,
    pub dst_roi: LayerRect,
    pub horizontal_decimation: u32,
    pub vertical_decimation: u32,
    pub z_order: u32,
    pub rotate90: bool,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl HWPipeInfo {
    pub fn needs_scaling(&self) -> bool {
        self.valid
            && ((self.dst_roi.width() - self.src_roi.width()).abs() > f32::EPSILON
                || (self.dst_roi.height() - self.src_roi.height()).abs() > f32::EPSILON)
    }
}

/// Per-hardware-layer pipe assignment: one or two `HWPipeInfo`s plus the
/// rotator session feeding them, if any (spec.md §3.2).
#[derive(Debug, Clone, Default)]
pub struct HWLayerConfig {
    pub left_pipe: HWPipeInfo,
    pub right_pipe: HWPipeInfo,
    pub rotator: Option<HWRotatorSession>,
    /// Set by the resource manager when a non-DMA pipe is mandatory for
    /// this layer (e.g. the primary display's frame-buffer target).
    pub use_non_dma_pipe: bool,
}

impl HWLayerConfig {
    /// A dual-pipe layer: `right_pipe.valid` implies the two ROIs tile
    /// the destination with no gap or overlap (spec.md §3.2 invariant).
    pub fn is_dual_pipe(&self) -> bool {
        self.right_pipe.valid
    }
}

/// Maps compacted hardware-layer position back to the original stack
/// index, plus the ROI and strategy-visible flags for this attempt.
#[derive(Debug, Clone, Default)]
pub struct HWLayersInfo {
    /// hardware layer position -> original LayerStack index.
    pub index: Vec<usize>,
    pub roi: LayerRect,
    /// Non-zero when the last hardware validation attempt failed,
    /// forcing the next PrePrepare into safe mode (spec.md §4.6).
    pub validation_failed: bool,
    /// Whether partial update is permitted this frame. False whenever the
    /// panel lacks the capability and also for exactly one frame after a
    /// `ReconfigureDisplay` attribute change (property R3, spec.md §4.1).
    pub partial_update: bool,
}

impl HWLayersInfo {
    pub fn count(&self) -> usize {
        self.index.len()
    }
}

/// The full per-frame plan: one `HWLayerConfig` per hardware layer,
/// indexed the same way as `info.index` (spec.md §3.2).
#[derive(Debug, Clone, Default)]
pub struct HWLayers {
    pub info: HWLayersInfo,
    pub config: Vec<HWLayerConfig>,
}

impl HWLayers {
    pub fn new() -> Self {
        HWLayers::default()
    }

    pub fn clear(&mut self) {
        self.info = HWLayersInfo::default();
        self.config.clear();
    }
}
