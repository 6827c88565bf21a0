// The per-display frame driver: component C7 (spec.md §4.1), tying C1/C3/C6
// together for one display.
//
// `prepare`/`commit`/`flush`/`set_display_state` are a close translation of
// `sdm/libs/core/display_base.cpp`'s `Prepare`/`Commit`/`Flush`/
// `SetDisplayState`: the `pending_commit_` gate, the PrePrepare/loop/
// PostPrepare/Validate shape, and the `ReconfigureDisplay` funnel for the
// attribute setters are all carried over; only the rotator/resource/
// strategy collaborators are now owned values instead of raw interface
// pointers (spec.md §9.1).

use crate::composition::CompositionManager;
use crate::config::{HWDisplayAttributes, HWPanelInfo, PanelMode, S3DMode};
use crate::device::{HWDeviceAdaptor, PowerState};
use crate::error::{Result, SdeError};
use crate::fence::FenceWaiter;
use crate::hwlayers::HWLayers;
use crate::ids::DisplayId;
use crate::layer::LayerStack;
use crate::rotator::RotatorController;
use utils::log;

/// The frame state machine (spec.md §4.1): `Off ⇄ On ⇄ Doze ⇄ DozeSuspend ⇄
/// Standby`. Prepare/Commit are rejected outside `{On, Doze}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayState {
    #[default]
    Off,
    On,
    Doze,
    DozeSuspend,
    Standby,
}

impl DisplayState {
    fn is_active_for_frames(&self) -> bool {
        matches!(self, DisplayState::On | DisplayState::Doze)
    }
}

/// Ties components C1/C2+C3/C6 together for one display (component C7).
pub struct DisplayController {
    pub id: DisplayId,
    state: DisplayState,
    active: bool,
    attributes: HWDisplayAttributes,
    panel_info: HWPanelInfo,
    device: Box<dyn HWDeviceAdaptor>,
    rotator: Option<RotatorController>,
    waiter: Box<dyn FenceWaiter>,
    hw_layers: HWLayers,
    pending_commit: bool,
    /// Persists across frames so the next Prepare's
    /// `PrepareStrategyConstraints` forces safe mode after a hardware
    /// validation rejection (spec.md §4.6).
    validation_failed: bool,
    /// The S3D packing `Init` should prefer for this display, if any
    /// (HDMI only; spec.md §4.1).
    requested_s3d: Option<S3DMode>,
    /// Whether `Init` actually landed on an S3D-capable mode.
    s3d_active: bool,
    /// Set by `reconfigure` for exactly one frame so the device marshals
    /// without partial update after an attribute change (property R3,
    /// spec.md §4.1 `ReconfigureDisplay`).
    suppress_partial_update: bool,
}

impl DisplayController {
    pub fn new(
        id: DisplayId,
        device: Box<dyn HWDeviceAdaptor>,
        rotator: Option<RotatorController>,
        waiter: Box<dyn FenceWaiter>,
        panel_info: HWPanelInfo,
    ) -> Self {
        Self::with_s3d_mode(id, device, rotator, waiter, panel_info, None)
    }

    /// Like `new`, but also records the S3D packing `Init` should prefer
    /// when `id` is HDMI (spec.md §4.1).
    pub fn with_s3d_mode(
        id: DisplayId,
        device: Box<dyn HWDeviceAdaptor>,
        rotator: Option<RotatorController>,
        waiter: Box<dyn FenceWaiter>,
        panel_info: HWPanelInfo,
        requested_s3d: Option<S3DMode>,
    ) -> Self {
        DisplayController {
            id,
            state: DisplayState::Off,
            active: false,
            attributes: HWDisplayAttributes::default(),
            panel_info,
            device,
            rotator,
            waiter,
            hw_layers: HWLayers::new(),
            pending_commit: false,
            validation_failed: false,
            requested_s3d,
            s3d_active: false,
            suppress_partial_update: false,
        }
    }

    /// Fetches display attributes and registers with the composition
    /// manager (spec.md §4.1 `Init`). On HDMI with a requested S3D mode,
    /// scans every mode via `get_num_display_attributes` and picks the
    /// highest-resolution one that advertises it; otherwise (and for every
    /// other display) uses mode 0.
    pub fn init(&mut self, comp_mgr: &mut CompositionManager) -> Result<()> {
        self.attributes = if self.id == DisplayId::Hdmi {
            if let Some(wanted) = self.requested_s3d {
                let count = self.device.get_num_display_attributes();
                let mut chosen: Option<HWDisplayAttributes> = None;
                for mode in 0..count {
                    let attrs = self.device.get_display_attributes(mode)?;
                    if attrs.s3d_mode != Some(wanted) {
                        continue;
                    }
                    let is_better = chosen
                        .map(|c| attrs.x_pixels * attrs.y_pixels > c.x_pixels * c.y_pixels)
                        .unwrap_or(true);
                    if is_better {
                        chosen = Some(attrs);
                    }
                }
                self.s3d_active = chosen.is_some();
                match chosen {
                    Some(attrs) => attrs,
                    None => self.device.get_display_attributes(0)?,
                }
            } else {
                self.s3d_active = false;
                self.device.get_display_attributes(0)?
            }
        } else {
            self.device.get_display_attributes(0)?
        };

        if self.id == DisplayId::Hdmi {
            comp_mgr.set_hdmi_s3d_active(self.s3d_active);
        }
        comp_mgr.register_display(self.id)?;
        Ok(())
    }

    pub fn attributes(&self) -> HWDisplayAttributes {
        self.attributes
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// spec.md §4.1's layer-stack validation rules plus the mixer-bounds
    /// check (rule 4).
    fn validate_layer_stack(&self, stack: &LayerStack) -> Result<()> {
        stack.validate_shape().map_err(|_| SdeError::Parameters)?;
        let gpu_target_index = stack.gpu_target_index().ok_or(SdeError::Parameters)?;
        let gpu_target = &stack.layers[gpu_target_index];
        if gpu_target.dst_rect.right > self.attributes.x_pixels as f32
            || gpu_target.dst_rect.bottom > self.attributes.y_pixels as f32
        {
            return Err(SdeError::Parameters);
        }
        Ok(())
    }

    /// PrePrepare → negotiation loop → rotator prepare → hardware validate
    /// (spec.md §4.1, §4.6). On success, `commit` may be called with the
    /// same `stack`.
    pub fn prepare(&mut self, comp_mgr: &mut CompositionManager, stack: &mut LayerStack) -> Result<()> {
        self.pending_commit = false;

        self.validate_layer_stack(stack)?;
        if !self.active {
            return Err(SdeError::Permission);
        }

        let mut hw_layers = comp_mgr.prepare(
            self.id,
            self.attributes.split_left,
            self.attributes.x_pixels,
            self.attributes.y_pixels,
            stack,
            self.validation_failed,
        )?;
        hw_layers.info.partial_update = self.panel_info.partial_update && !self.suppress_partial_update;

        if let Some(rc) = self.rotator.as_mut() {
            let hw_res_info = comp_mgr.hw_res_info();
            rc.prepare(&mut hw_layers, stack, &hw_res_info)?;
        }

        match self.device.validate(&hw_layers) {
            Ok(()) => {
                self.validation_failed = false;
                self.hw_layers = hw_layers;
                self.pending_commit = true;
                Ok(())
            }
            Err(SdeError::ShutDown) => Err(SdeError::ShutDown),
            Err(e) => {
                self.validation_failed = true;
                Err(e)
            }
        }
    }

    /// Must follow a successful `prepare` with the same stack
    /// (spec.md §4.1). Runs rotator commit, device commit, rotator
    /// post-commit, composition-manager post-commit in order; on
    /// device-commit failure the frame is abandoned and not retried
    /// (spec.md §7).
    pub fn commit(&mut self, comp_mgr: &mut CompositionManager, stack: &mut LayerStack) -> Result<()> {
        if !self.active {
            return Err(SdeError::Permission);
        }
        if !self.pending_commit {
            return Err(SdeError::Undefined);
        }
        self.pending_commit = false;

        if let Some(rc) = self.rotator.as_mut() {
            rc.commit(&mut self.hw_layers, stack, self.waiter.as_ref())?;
        }

        let result = self.device.commit(&self.hw_layers)?;
        crate::device::apply_commit_result(self.waiter.as_ref(), stack, &self.hw_layers, result);

        if let Some(rc) = self.rotator.as_mut() {
            rc.post_commit(&self.hw_layers, result.release_fence, self.waiter.as_ref())?;
        }

        self.suppress_partial_update = false;
        comp_mgr.post_commit(self.id)
    }

    /// Cancels any in-flight plan and purges rotator/pipe state
    /// (spec.md §4.1).
    pub fn flush(&mut self, comp_mgr: &mut CompositionManager) -> Result<()> {
        if !self.active {
            return Err(SdeError::Permission);
        }
        self.hw_layers.clear();
        self.device.flush()?;
        if let Some(rc) = self.rotator.as_mut() {
            rc.purge()?;
        }
        comp_mgr.purge(self.id);
        self.pending_commit = false;
        Ok(())
    }

    /// Idempotent (property R1): returns immediately with no-op if already
    /// in `state`. Transitions to `Off` always flush first.
    pub fn set_display_state(&mut self, comp_mgr: &mut CompositionManager, state: DisplayState) -> Result<()> {
        if state == self.state {
            return Ok(());
        }

        let (power_state, active) = match state {
            DisplayState::Off => {
                self.hw_layers.clear();
                self.device.flush()?;
                if let Some(rc) = self.rotator.as_mut() {
                    rc.purge()?;
                }
                comp_mgr.purge(self.id);
                (PowerState::Off, false)
            }
            DisplayState::On => (PowerState::On, true),
            DisplayState::Doze => (PowerState::Doze, true),
            DisplayState::DozeSuspend => (PowerState::DozeSuspend, false),
            DisplayState::Standby => (PowerState::Standby, false),
        };

        self.device.set_power_state(power_state)?;
        self.active = active;
        self.state = state;
        Ok(())
    }

    /// Common funnel for `SetActiveConfig`/`SetRefreshRate`/
    /// `SetMixerResolution`/`SetFrameBufferConfig` (spec.md §4.1):
    /// re-queries attributes and, only when something changed,
    /// re-registers with the composition manager and disables partial
    /// update for one frame (property R3).
    pub fn reconfigure(
        &mut self,
        comp_mgr: &mut CompositionManager,
        mode: u32,
    ) -> Result<()> {
        let new_attributes = self.device.get_display_attributes(mode)?;
        if attributes_equal(&new_attributes, &self.attributes) {
            return Ok(());
        }

        self.attributes = new_attributes;
        self.suppress_partial_update = true;
        comp_mgr.unregister_display(self.id)?;
        comp_mgr.register_display(self.id)?;
        log::info!(
            "display {:?} reconfigured to {}x{}@{}",
            self.id,
            self.attributes.x_pixels,
            self.attributes.y_pixels,
            self.attributes.fps
        );
        Ok(())
    }

    /// Valid only in `On` state and only when the top non-GPUTarget layer
    /// is cursor-eligible and the panel is in video mode (spec.md §4.1,
    /// §6: command-mode panels reject async cursor updates).
    pub fn set_cursor_position(&mut self, stack: &LayerStack, x: i32, y: i32) -> Result<()> {
        if self.state != DisplayState::On {
            return Err(SdeError::NotSupported);
        }
        if self.panel_info.mode == PanelMode::Command || !crate::strategy::is_cursor_eligible(stack) {
            return Err(SdeError::NotSupported);
        }
        self.device.set_cursor_position(&self.hw_layers, x, y)
    }

    pub fn dump(&self) -> String {
        format!(
            "display {:?}: state={:?} active={} pending_commit={} attrs={}x{}@{}",
            self.id,
            self.state,
            self.active,
            self.pending_commit,
            self.attributes.x_pixels,
            self.attributes.y_pixels,
            self.attributes.fps
        )
    }
}

fn attributes_equal(a: &HWDisplayAttributes, b: &HWDisplayAttributes) -> bool {
    a.x_pixels == b.x_pixels
        && a.y_pixels == b.y_pixels
        && a.fps == b.fps
        && a.split_left == b.split_left
        && a.is_device_split == b.is_device_split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::CompositionManager;
    use crate::config::HWResourceInfo;
    use crate::device::MockDeviceAdaptor;
    use crate::fence::NullFenceWaiter;
    use crate::layer::{CompositionType, Layer, LayerRect};
    use crate::strategy::DefaultStrategy;

    fn stack_with_gpu_target() -> LayerStack {
        let mut stack = LayerStack::new();
        let mut fb = Layer::new(CompositionType::GpuTarget);
        fb.src_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        fb.dst_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        stack.layers.push(fb);
        stack
    }

    fn make_controller() -> DisplayController {
        DisplayController::new(
            DisplayId::Primary,
            Box::new(MockDeviceAdaptor::new(HWDisplayAttributes::default())),
            None,
            Box::new(NullFenceWaiter),
            HWPanelInfo::default(),
        )
    }

    #[test]
    fn prepare_rejects_inactive_display_with_permission() {
        let mut comp_mgr = CompositionManager::new(HWResourceInfo::default(), Box::new(DefaultStrategy));
        let mut display = make_controller();
        display.init(&mut comp_mgr).unwrap();

        let mut stack = stack_with_gpu_target();
        let err = display.prepare(&mut comp_mgr, &mut stack).unwrap_err();
        assert_eq!(err, SdeError::Permission);
    }

    #[test]
    fn full_frame_cycle_configures_the_display() {
        let mut comp_mgr = CompositionManager::new(HWResourceInfo::default(), Box::new(DefaultStrategy));
        let mut display = make_controller();
        display.init(&mut comp_mgr).unwrap();
        display
            .set_display_state(&mut comp_mgr, DisplayState::On)
            .unwrap();

        let mut stack = stack_with_gpu_target();
        display.prepare(&mut comp_mgr, &mut stack).unwrap();
        display.commit(&mut comp_mgr, &mut stack).unwrap();

        assert!(stack.retire_fence >= 0);
        assert!(!comp_mgr.is_safe_mode());
    }

    #[test]
    fn commit_without_prepare_is_rejected() {
        let mut comp_mgr = CompositionManager::new(HWResourceInfo::default(), Box::new(DefaultStrategy));
        let mut display = make_controller();
        display.init(&mut comp_mgr).unwrap();
        display
            .set_display_state(&mut comp_mgr, DisplayState::On)
            .unwrap();

        let mut stack = stack_with_gpu_target();
        let err = display.commit(&mut comp_mgr, &mut stack).unwrap_err();
        assert_eq!(err, SdeError::Undefined);
    }

    #[test]
    fn set_display_state_is_idempotent() {
        let mut comp_mgr = CompositionManager::new(HWResourceInfo::default(), Box::new(DefaultStrategy));
        let mut display = make_controller();
        display.init(&mut comp_mgr).unwrap();
        display
            .set_display_state(&mut comp_mgr, DisplayState::On)
            .unwrap();
        display
            .set_display_state(&mut comp_mgr, DisplayState::On)
            .unwrap();
        assert_eq!(display.state(), DisplayState::On);
    }
}
