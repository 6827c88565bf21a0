// The hardware pipe pool and resource negotiation: component C4
// (spec.md §4.3).
//
// Grounded directly on `res_manager.cpp`/`res_config.cpp` in
// original_source: pipe array layout and `Start`/`Acquire`/`PostCommit`/
// `Purge` bodies are a close translation of `ResManager`'s; `Config`,
// `IsValidDimension`, `CalculateCropRects`, and `CalculateCut` are
// translated from `res_config.cpp` with the same rounding and cut-ratio
// arithmetic. `GetMdssPipeId`'s hardcoded 4-VIG/4-RGB/2-DMA table is
// generalized (SPEC_FULL §11) into a capability-driven bit index.

use crate::config::{HWResourceInfo, MAX_INTERFACE_WIDTH};
use crate::error::{Result, SdeError};
use crate::hwlayers::{HWLayerConfig, HWLayers};
use crate::ids::{DisplayId, NUM_DISPLAY_KINDS};
use crate::layer::{Layer, LayerRect, LayerStack, LayerTransform};
use utils::log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Vig,
    Rgb,
    Dma,
    Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Idle,
    Acquired,
    ToRelease,
    /// Held by the bootloader's splash screen until the primary display's
    /// first frame commits (SPEC_FULL §11).
    OwnedByKernel,
}

/// One hardware overlay pipe. `priority` is the pipe's index within its
/// kind: lower priority pipes are preferred when swapping a dual-pipe
/// layer's left/right assignment (spec.md §4.3 rule 5).
#[derive(Debug, Clone)]
pub struct SourcePipe {
    pub index: usize,
    pub kind: PipeKind,
    pub priority: u32,
    pub mdss_pipe_id: u32,
    pub state: PipeState,
    pub owner: Option<DisplayId>,
    pub at_right: bool,
    pub reserved: bool,
    pub state_frame_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct DisplayResourceContext {
    frame_count: u64,
}

/// Hardware pipe pool shared by every registered display (component C4,
/// spec.md §4.3). One per `Engine`.
pub struct ResourceManager {
    pipes: Vec<SourcePipe>,
    hw_res_info: HWResourceInfo,
    frame_start: bool,
    contexts: [Option<DisplayResourceContext>; NUM_DISPLAY_KINDS],
}

impl ResourceManager {
    pub fn new(hw_res_info: HWResourceInfo) -> Self {
        let mut pipes = Vec::new();
        let mut index = 0usize;

        for i in 0..hw_res_info.num_vig_pipe {
            pipes.push(SourcePipe {
                index,
                kind: PipeKind::Vig,
                priority: i,
                mdss_pipe_id: mdss_pipe_id(PipeKind::Vig, i),
                state: PipeState::Idle,
                owner: None,
                at_right: false,
                reserved: false,
                state_frame_count: 0,
            });
            index += 1;
        }
        for i in 0..hw_res_info.num_rgb_pipe {
            let owned_by_splash = i < hw_res_info.splash_owned_rgb_pipes;
            pipes.push(SourcePipe {
                index,
                kind: PipeKind::Rgb,
                priority: i,
                mdss_pipe_id: mdss_pipe_id(PipeKind::Rgb, i),
                state: if owned_by_splash {
                    PipeState::OwnedByKernel
                } else {
                    PipeState::Idle
                },
                owner: None,
                at_right: false,
                reserved: false,
                state_frame_count: 0,
            });
            index += 1;
        }
        for i in 0..hw_res_info.num_dma_pipe {
            pipes.push(SourcePipe {
                index,
                kind: PipeKind::Dma,
                priority: i,
                mdss_pipe_id: mdss_pipe_id(PipeKind::Dma, i),
                state: PipeState::Idle,
                owner: None,
                at_right: false,
                reserved: false,
                state_frame_count: 0,
            });
            index += 1;
        }
        for i in 0..hw_res_info.num_cursor_pipe {
            pipes.push(SourcePipe {
                index,
                kind: PipeKind::Cursor,
                priority: i,
                mdss_pipe_id: mdss_pipe_id(PipeKind::Cursor, i),
                state: PipeState::Idle,
                owner: None,
                at_right: false,
                reserved: false,
                state_frame_count: 0,
            });
            index += 1;
        }

        ResourceManager {
            pipes,
            hw_res_info,
            frame_start: false,
            contexts: [None; NUM_DISPLAY_KINDS],
        }
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }

    pub fn hw_res_info(&self) -> HWResourceInfo {
        self.hw_res_info
    }

    pub fn register_display(&mut self, display: DisplayId) -> Result<()> {
        let slot = &mut self.contexts[display.index()];
        if slot.is_some() {
            return Err(SdeError::Parameters);
        }
        *slot = Some(DisplayResourceContext { frame_count: 0 });
        Ok(())
    }

    pub fn unregister_display(&mut self, display: DisplayId) -> Result<()> {
        self.purge(display);
        self.contexts[display.index()] = None;
        Ok(())
    }

    /// Releases this display's `ToRelease` pipes and bumps its frame
    /// counter, but only on the first call within a frame -- subsequent
    /// displays calling `start` in the same frame just continue
    /// (spec.md §4.3).
    pub fn start(&mut self, display: DisplayId) -> Result<()> {
        if self.contexts[display.index()].is_none() {
            return Err(SdeError::Parameters);
        }
        if self.frame_start {
            return Ok(());
        }
        self.frame_start = true;
        self.contexts[display.index()].as_mut().unwrap().frame_count += 1;

        for pipe in self.pipes.iter_mut() {
            if pipe.owner == Some(display) && pipe.state == PipeState::ToRelease {
                pipe.state = PipeState::Idle;
            }
        }
        Ok(())
    }

    /// No hardware work to do; kept symmetric with `start` because the
    /// negotiation loop calls the pair once per strategy attempt.
    pub fn stop(&mut self, _display: DisplayId) -> Result<()> {
        Ok(())
    }

    /// Assigns pipes to every hardware layer in `hw_layers` for `display`,
    /// given `stack` to read layer geometry from (spec.md §4.3 rules 1, 2,
    /// 5). Leaves no pipe `reserved` on failure.
    pub fn acquire(
        &mut self,
        display: DisplayId,
        attrs_split_left: u32,
        attrs_x_pixels: u32,
        attrs_y_pixels: u32,
        stack: &LayerStack,
        hw_layers: &mut HWLayers,
    ) -> Result<()> {
        if hw_layers.info.count() > self.pipes.len() {
            return Err(SdeError::Resources);
        }

        self.config(
            display,
            attrs_split_left,
            attrs_x_pixels,
            attrs_y_pixels,
            stack,
            hw_layers,
        )?;

        for pipe in self.pipes.iter_mut() {
            pipe.reserved = false;
        }

        let count = hw_layers.info.count();
        for i in 0..count {
            let layer_index = hw_layers.info.index[i];
            let layer = &stack.layers[layer_index];
            let mut use_non_dma_pipe = hw_layers.config[i].use_non_dma_pipe;
            if display == DisplayId::Primary {
                use_non_dma_pipe = true;
            }

            let is_yuv = layer.is_yuv();
            let need_scale_left = hw_layers.config[i].left_pipe.needs_scaling();

            let left_index =
                match self.get_pipe(display, is_yuv, need_scale_left, false, use_non_dma_pipe) {
                    Some(idx) => idx,
                    None => return self.acquire_failed(),
                };
            self.pipes[left_index].reserved = true;

            if !hw_layers.config[i].is_dual_pipe() {
                hw_layers.config[i].left_pipe.pipe_id = self.pipes[left_index].mdss_pipe_id;
                self.pipes[left_index].at_right = false;
                continue;
            }

            let need_scale_right = hw_layers.config[i].right_pipe.needs_scaling();
            let mut right_index = match self.get_pipe(
                display,
                is_yuv,
                need_scale_right,
                true,
                use_non_dma_pipe,
            ) {
                Some(idx) => idx,
                None => return self.acquire_failed(),
            };

            let mut left_index = left_index;
            if self.pipes[right_index].priority < self.pipes[left_index].priority {
                std::mem::swap(&mut left_index, &mut right_index);
            }

            hw_layers.config[i].right_pipe.pipe_id = self.pipes[right_index].mdss_pipe_id;
            self.pipes[right_index].reserved = true;
            self.pipes[right_index].at_right = true;
            self.pipes[left_index].reserved = true;
            self.pipes[left_index].at_right = false;
            hw_layers.config[i].left_pipe.pipe_id = self.pipes[left_index].mdss_pipe_id;
        }

        Ok(())
    }

    fn acquire_failed(&mut self) -> Result<()> {
        for pipe in self.pipes.iter_mut() {
            pipe.reserved = false;
        }
        Err(SdeError::Resources)
    }

    /// Commits the pipe assignment from a successful `acquire`: reserved
    /// pipes become `Acquired` under this display, stale `Acquired` pipes
    /// this display no longer needs become `ToRelease` (spec.md §4.3
    /// rule 4). Also hands off any splash-owned pipes on the primary
    /// display's first committed frame.
    pub fn post_commit(&mut self, display: DisplayId) -> Result<()> {
        let frame_count = self.contexts[display.index()]
            .ok_or(SdeError::Parameters)?
            .frame_count;

        for pipe in self.pipes.iter_mut() {
            if pipe.reserved {
                pipe.owner = Some(display);
                pipe.state = PipeState::Acquired;
                pipe.state_frame_count = frame_count;
                log::debug!(
                    "pipe {} ({:?}) acquired by {:?}",
                    pipe.index,
                    pipe.kind,
                    display
                );
            } else if pipe.owner == Some(display) && pipe.state == PipeState::Acquired {
                pipe.state = PipeState::ToRelease;
                pipe.state_frame_count = frame_count;
            }
        }

        if frame_count == 1 && display == DisplayId::Primary {
            for pipe in self.pipes.iter_mut() {
                if pipe.state == PipeState::OwnedByKernel {
                    pipe.state = PipeState::ToRelease;
                    pipe.owner = Some(DisplayId::Primary);
                }
            }
        }

        self.frame_start = false;
        Ok(())
    }

    /// Releases every pipe owned by `display` back to `Idle`, regardless
    /// of state (spec.md §4.3, used on unregister/teardown).
    pub fn purge(&mut self, display: DisplayId) {
        for pipe in self.pipes.iter_mut() {
            if pipe.owner == Some(display) {
                pipe.state = PipeState::Idle;
            }
        }
    }

    fn get_pipe(
        &self,
        display: DisplayId,
        is_yuv: bool,
        need_scale: bool,
        at_right: bool,
        use_non_dma_pipe: bool,
    ) -> Option<usize> {
        if is_yuv {
            return self.next_pipe(PipeKind::Vig, display, at_right);
        }

        if !need_scale && !use_non_dma_pipe {
            if let Some(idx) = self.next_pipe(PipeKind::Dma, display, at_right) {
                return Some(idx);
            }
        }

        if !need_scale || self.hw_res_info.has_non_scalar_rgb {
            if let Some(idx) = self.next_pipe(PipeKind::Rgb, display, at_right) {
                return Some(idx);
            }
        }

        self.next_pipe(PipeKind::Vig, display, at_right)
    }

    /// A pipe this display already has `Acquired` on the same side wins
    /// first, to minimize pipe churn across frames; otherwise the first
    /// `Idle` pipe (or one this display already holds on the other side)
    /// of the given kind.
    fn next_pipe(&self, kind: PipeKind, display: DisplayId, at_right: bool) -> Option<usize> {
        let candidates = || self.pipes.iter().filter(move |p| p.kind == kind);

        if let Some(p) = candidates().find(|p| {
            !p.reserved
                && p.state == PipeState::Acquired
                && p.owner == Some(display)
                && p.at_right == at_right
        }) {
            return Some(p.index);
        }

        candidates()
            .find(|p| {
                !p.reserved
                    && (p.state == PipeState::Idle
                        || (p.state == PipeState::Acquired && p.owner == Some(display)))
            })
            .map(|p| p.index)
    }

    /// Translates layer source/destination rects into mixer-local ROIs,
    /// deciding whether a layer needs a right-half pipe at all
    /// (spec.md §4.3 rule 2). Grounded on `res_config.cpp::Config`.
    fn config(
        &self,
        display: DisplayId,
        split_left: u32,
        x_pixels: u32,
        y_pixels: u32,
        stack: &LayerStack,
        hw_layers: &mut HWLayers,
    ) -> Result<()> {
        let count = hw_layers.info.count();
        for i in 0..count {
            let layer_index = hw_layers.info.index[i];
            let layer = &stack.layers[layer_index];

            if is_valid_dimension(layer, &self.hw_res_info).is_none() {
                log::verbose!("invalid layer dimension at index {}", layer_index);
                return Err(SdeError::NotSupported);
            }

            let scissor_left = LayerRect::new(0.0, 0.0, split_left as f32, y_pixels as f32);
            let mut crop = layer.src_rect;
            let mut dst = layer.dst_rect;
            let crop_right_orig = crop;
            let dst_right_orig = dst;

            calculate_crop_rects(&mut crop, &mut dst, scissor_left, layer.transform);
            hw_layers.config[i].left_pipe.valid = true;
            hw_layers.config[i].left_pipe.src_roi = crop;
            hw_layers.config[i].left_pipe.dst_roi = dst;

            let crop_width = crop_right_orig.right - crop_right_orig.left;
            let needs_right = (dst_right_orig.right - dst_right_orig.left) > MAX_INTERFACE_WIDTH
                || crop_width > MAX_INTERFACE_WIDTH
                || (display == DisplayId::Primary
                    && self.hw_res_info.is_src_split
                    && crop_width > split_left as f32);

            if needs_right {
                let scissor_right =
                    LayerRect::new(split_left as f32, 0.0, x_pixels as f32, y_pixels as f32);
                let mut crop_right = crop_right_orig;
                let mut dst_right = dst_right_orig;
                calculate_crop_rects(&mut crop_right, &mut dst_right, scissor_right, layer.transform);
                hw_layers.config[i].right_pipe.valid = true;
                hw_layers.config[i].right_pipe.src_roi = crop_right;
                hw_layers.config[i].right_pipe.dst_roi = dst_right;
            } else {
                hw_layers.config[i].right_pipe.valid = false;
            }
        }
        Ok(())
    }
}

fn mdss_pipe_id(kind: PipeKind, local_index: u32) -> u32 {
    let bit = match kind {
        PipeKind::Vig => local_index,
        PipeKind::Rgb => 4 + local_index,
        PipeKind::Dma => 8 + local_index,
        PipeKind::Cursor => 10 + local_index,
    };
    1 << bit
}

/// Non-integral crops are rejected outright, then crop/dst are rounded
/// inward (ceil left/top, floor right/bottom) before the resulting scale
/// factors are checked against the hardware's scaling limits
/// (spec.md §4.3 rule 3).
fn is_valid_dimension(layer: &Layer, hw_res_info: &HWResourceInfo) -> Option<(f32, f32)> {
    if !layer.src_rect.is_integral() {
        return None;
    }

    let crop = integerize_rect(&layer.src_rect);
    let dst = integerize_rect(&layer.dst_rect);

    let rotated90 = layer.transform.needs_90_rotate();
    let (crop_w, crop_h) = if rotated90 {
        (crop.height(), crop.width())
    } else {
        (crop.width(), crop.height())
    };
    let dst_w = dst.width();
    let dst_h = dst.height();

    if dst_w < 1.0 || dst_h < 1.0 {
        return None;
    }

    let w_scale = crop_w / dst_w;
    let h_scale = crop_h / dst_h;

    if crop_w < hw_res_info.min_crop_width || crop_h < hw_res_info.min_crop_height {
        return None;
    }

    if w_scale > 1.0 || h_scale > 1.0 {
        let max_scale_down = hw_res_info.max_scale_down as f32;
        if !hw_res_info.has_decimation {
            if crop_w > hw_res_info.max_source_pipe_width
                || w_scale > max_scale_down
                || h_scale > max_scale_down
            {
                return None;
            }
        } else if w_scale > max_scale_down || h_scale > max_scale_down {
            return None;
        }
    }

    if (w_scale < 1.0 || h_scale < 1.0) && w_scale > 0.0 && h_scale > 0.0 {
        let max_scale_up = hw_res_info.max_scale_up as f32;
        if (1.0 / w_scale) > max_scale_up || (1.0 / h_scale) > max_scale_up {
            return None;
        }
    }

    Some((w_scale, h_scale))
}

fn integerize_rect(rect: &LayerRect) -> LayerRect {
    LayerRect::new(
        rect.left.ceil(),
        rect.top.ceil(),
        rect.right.floor(),
        rect.bottom.floor(),
    )
}

struct CutRatios {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

/// Rotates/flips which edge a scissor-driven cut ratio applies to, so the
/// crop (source-space) cut matches the dst (mixer-space) edge it came
/// from (spec.md §4.3 rule 2). Grounded on `res_config.cpp::CalculateCut`.
fn calculate_cut(ratios: &mut CutRatios, transform: &LayerTransform) {
    if transform.flip_horizontal {
        std::mem::swap(&mut ratios.left, &mut ratios.right);
    }
    if transform.flip_vertical {
        std::mem::swap(&mut ratios.top, &mut ratios.bottom);
    }
    if transform.needs_90_rotate() && transform.rotation.rem_euclid(360.0) == 90.0 {
        let tmp = ratios.left;
        ratios.left = ratios.top;
        ratios.top = ratios.right;
        ratios.right = ratios.bottom;
        ratios.bottom = tmp;
    }
}

/// Clips `dst` to `scissor`, then shrinks `crop` by the same proportion on
/// the corresponding source edge (spec.md §4.3 rule 2, "ROI cut").
/// Grounded on `res_config.cpp::CalculateCropRects`.
fn calculate_crop_rects(
    crop: &mut LayerRect,
    dst: &mut LayerRect,
    scissor: LayerRect,
    transform: LayerTransform,
) {
    let crop_w = crop.width();
    let crop_h = crop.height();
    let dst_w = (dst.right - dst.left).abs();
    let dst_h = (dst.bottom - dst.top).abs();

    let mut ratios = CutRatios {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    if dst.left < scissor.left {
        ratios.left = (scissor.left - dst.left) / dst_w;
        dst.left = scissor.left;
    }
    if dst.right > scissor.right {
        ratios.right = (dst.right - scissor.right) / dst_w;
        dst.right = scissor.right;
    }
    if dst.top < scissor.top {
        ratios.top = (scissor.top - dst.top) / dst_h;
        dst.top = scissor.top;
    }
    if dst.bottom > scissor.bottom {
        ratios.bottom = (dst.bottom - scissor.bottom) / dst_h;
        dst.bottom = scissor.bottom;
    }

    calculate_cut(&mut ratios, &transform);

    crop.left += crop_w * ratios.left;
    crop.top += crop_h * ratios.top;
    crop.right -= crop_w * ratios.right;
    crop.bottom -= crop_h * ratios.bottom;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CompositionType, LayerBuffer};

    fn make_hw_layers(layer_count: usize) -> HWLayers {
        let mut hw_layers = HWLayers::new();
        hw_layers.info.index = (0..layer_count).collect();
        hw_layers.config = vec![HWLayerConfig::default(); layer_count];
        hw_layers
    }

    fn opaque_layer(w: u32, h: u32) -> Layer {
        let mut layer = Layer::new(CompositionType::Sde);
        layer.input_buffer = Some(LayerBuffer::new(w, h, crate::format::PixelFormat::RGBA8888));
        layer.src_rect = LayerRect::new(0.0, 0.0, w as f32, h as f32);
        layer.dst_rect = LayerRect::new(0.0, 0.0, w as f32, h as f32);
        layer
    }

    #[test]
    fn acquire_assigns_a_pipe_per_layer() {
        let mut rm = ResourceManager::new(HWResourceInfo::default());
        rm.register_display(DisplayId::Primary).unwrap();
        rm.start(DisplayId::Primary).unwrap();

        let mut stack = LayerStack::new();
        stack.layers.push(opaque_layer(100, 100));
        let mut hw_layers = make_hw_layers(1);

        rm.acquire(DisplayId::Primary, 1920, 1920, 1080, &stack, &mut hw_layers)
            .unwrap();

        assert!(hw_layers.config[0].left_pipe.pipe_id != 0);
        rm.post_commit(DisplayId::Primary).unwrap();
    }

    #[test]
    fn acquire_fails_cleanly_when_layers_exceed_pipes() {
        let mut rm = ResourceManager::new(HWResourceInfo {
            num_vig_pipe: 0,
            num_rgb_pipe: 0,
            num_dma_pipe: 0,
            num_cursor_pipe: 0,
            ..HWResourceInfo::default()
        });
        rm.register_display(DisplayId::Primary).unwrap();
        rm.start(DisplayId::Primary).unwrap();

        let mut stack = LayerStack::new();
        stack.layers.push(opaque_layer(100, 100));
        let mut hw_layers = make_hw_layers(1);

        let err = rm
            .acquire(DisplayId::Primary, 1920, 1920, 1080, &stack, &mut hw_layers)
            .unwrap_err();
        assert_eq!(err, SdeError::Resources);
        assert!(rm.pipes.iter().all(|p| !p.reserved));
    }

    #[test]
    fn splash_owned_pipes_hand_off_on_first_primary_frame() {
        let mut rm = ResourceManager::new(HWResourceInfo {
            splash_owned_rgb_pipes: 1,
            ..HWResourceInfo::default()
        });
        rm.register_display(DisplayId::Primary).unwrap();
        assert_eq!(
            rm.pipes
                .iter()
                .filter(|p| p.state == PipeState::OwnedByKernel)
                .count(),
            1
        );

        rm.start(DisplayId::Primary).unwrap();
        rm.post_commit(DisplayId::Primary).unwrap();

        assert!(rm
            .pipes
            .iter()
            .any(|p| p.state == PipeState::ToRelease && p.owner == Some(DisplayId::Primary)));
    }

    #[test]
    fn non_integral_crop_is_rejected() {
        let mut layer = opaque_layer(100, 100);
        layer.src_rect = LayerRect::new(0.5, 0.0, 100.0, 100.0);
        assert!(is_valid_dimension(&layer, &HWResourceInfo::default()).is_none());
    }
}
