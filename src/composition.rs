// The per-frame negotiation driver: component C6 (spec.md §4.6), plus the
// engine-wide safe-mode/idle/thermal policy it owns (spec.md §3.5).
//
// `prepare`/`post_commit`/`register_display` are a close translation of
// `comp_manager.cpp`'s `Prepare`/`PostCommit`/`RegisterDisplay` (including
// the unconditional `safe_mode_ = true` on every registration); the
// PrePrepare/loop/PostPrepare shape matches spec.md §4.6's pseudocode.
// `UnregisterDisplay` is the SPEC_FULL §11 supplement (not in the read
// original source).

use crate::config::HWResourceInfo;
use crate::error::{Result, SdeError};
use crate::hwlayers::HWLayers;
use crate::ids::{DisplayId, NUM_DISPLAY_KINDS};
use crate::layer::{CompositionType, LayerStack};
use crate::pipe::ResourceManager;
use crate::strategy::{self, Strategy, StrategyConstraints};
use utils::log;

/// The thermal level at or above which C6 forces safe mode
/// (spec.md §9.2's resolved open question: inclusive `>= 3`).
const THERMAL_FALLBACK_LEVEL: u32 = 3;

/// Drives the strategy/resource negotiation loop for every display sharing
/// one engine, and owns the cross-display safe-mode bookkeeping
/// (spec.md §3.5, §4.6).
pub struct CompositionManager {
    resource_manager: ResourceManager,
    strategy: Box<dyn Strategy>,
    registered: [bool; NUM_DISPLAY_KINDS],
    configured: [bool; NUM_DISPLAY_KINDS],
    safe_mode: bool,
    idle_fallback_latch: [bool; NUM_DISPLAY_KINDS],
    thermal_fallback: [bool; NUM_DISPLAY_KINDS],
    /// HDMI is driving a stereoscopic 3D mode (spec.md §4.4 `max_layers`):
    /// forces Primary's `max_layers` to 0, falling it back to an all-GPU
    /// plan for the duration.
    hdmi_s3d_active: bool,
}

impl CompositionManager {
    pub fn new(hw_res_info: HWResourceInfo, strategy: Box<dyn Strategy>) -> Self {
        CompositionManager {
            resource_manager: ResourceManager::new(hw_res_info),
            strategy,
            registered: [false; NUM_DISPLAY_KINDS],
            configured: [false; NUM_DISPLAY_KINDS],
            safe_mode: false,
            idle_fallback_latch: [false; NUM_DISPLAY_KINDS],
            thermal_fallback: [false; NUM_DISPLAY_KINDS],
            hdmi_s3d_active: false,
        }
    }

    pub fn hw_res_info(&self) -> HWResourceInfo {
        self.resource_manager.hw_res_info()
    }

    /// Set by HDMI's `Init` once it has chosen an S3D-capable mode
    /// (spec.md §4.1, §4.4).
    pub fn set_hdmi_s3d_active(&mut self, active: bool) {
        self.hdmi_s3d_active = active;
    }

    /// Registering a display unconditionally forces safe mode: the new
    /// display has not yet completed a PostCommit, so `configured_displays
    /// ⊊ registered_displays` becomes true (spec.md §3.5).
    pub fn register_display(&mut self, display: DisplayId) -> Result<()> {
        self.resource_manager.register_display(display)?;
        let idx = display.index();
        self.registered[idx] = true;
        self.configured[idx] = false;
        self.safe_mode = true;
        Ok(())
    }

    /// SPEC_FULL §11 supplement: clears the display's registration and
    /// pipes, and re-derives safe mode from what remains registered.
    pub fn unregister_display(&mut self, display: DisplayId) -> Result<()> {
        self.resource_manager.unregister_display(display)?;
        let idx = display.index();
        self.registered[idx] = false;
        self.configured[idx] = false;
        self.recompute_safe_mode();
        Ok(())
    }

    pub fn notify_idle_timeout(&mut self, display: DisplayId) {
        self.idle_fallback_latch[display.index()] = true;
    }

    /// A thermal-event callback; the threshold is inclusive
    /// (spec.md §9.2).
    pub fn notify_thermal_level(&mut self, display: DisplayId, level: u32) {
        self.thermal_fallback[display.index()] = level >= THERMAL_FALLBACK_LEVEL;
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode
    }

    /// PrePrepare + the strategy/resource negotiation loop + PostPrepare,
    /// all in one call (spec.md §4.6). `validation_failed` carries forward
    /// the previous frame's hardware-validation outcome, forcing safe mode
    /// this attempt (spec.md §4.6 `PrepareStrategyConstraints`).
    pub fn prepare(
        &mut self,
        display: DisplayId,
        split_left: u32,
        x_pixels: u32,
        y_pixels: u32,
        stack: &mut LayerStack,
        validation_failed: bool,
    ) -> Result<HWLayers> {
        let idx = display.index();
        let idle_latched = self.idle_fallback_latch[idx];
        let app_layer_count = stack
            .layers
            .iter()
            .filter(|l| {
                l.composition != CompositionType::GpuTarget
                    && l.composition != CompositionType::BlitTarget
            })
            .count();

        let forced_safe_mode = self.safe_mode
            || (idle_latched && app_layer_count > 1)
            || self.thermal_fallback[idx]
            || validation_failed;

        let max_layers = if display == DisplayId::Primary {
            if self.hdmi_s3d_active {
                0
            } else {
                self.resource_manager.pipe_count()
            }
        } else {
            2
        };

        let mut token = self.strategy.start(stack);
        let mut result: Result<HWLayers> = Err(SdeError::Undefined);

        // Bracket the whole attempt loop with one Start/Stop pair, matching
        // `comp_manager.cpp::Prepare` -- not one pair per attempt.
        if let Err(e) = self.resource_manager.start(display) {
            self.strategy.stop(token);
            return Err(e);
        }

        loop {
            let constraints = StrategyConstraints {
                safe_mode: forced_safe_mode,
                max_layers,
                use_cursor: strategy::is_cursor_eligible(stack),
                idle_fallback: idle_latched,
            };

            let plan = self.strategy.get_next_strategy(&mut token, &mut *stack, &constraints);
            let mut plan = match plan {
                Some(p) => p,
                None => {
                    result = Err(SdeError::Resources);
                    break;
                }
            };

            let acquired =
                self.resource_manager
                    .acquire(display, split_left, x_pixels, y_pixels, stack, &mut plan);

            match acquired {
                Ok(()) => {
                    result = Ok(plan);
                    break;
                }
                Err(e) => {
                    log::debug!("strategy attempt failed for {:?}: {}", display, e);
                    result = Err(e);
                    continue;
                }
            }
        }

        let _ = self.resource_manager.stop(display);
        self.strategy.stop(token);
        result
    }

    /// Commits the pipe assignment, marks `display` configured, and clears
    /// safe mode once every registered display has been configured
    /// (spec.md §4.6).
    pub fn post_commit(&mut self, display: DisplayId) -> Result<()> {
        self.resource_manager.post_commit(display)?;
        self.configured[display.index()] = true;
        self.idle_fallback_latch[display.index()] = false;
        self.recompute_safe_mode();
        Ok(())
    }

    pub fn purge(&mut self, display: DisplayId) {
        self.resource_manager.purge(display);
    }

    fn recompute_safe_mode(&mut self) {
        let all_configured = self
            .registered
            .iter()
            .zip(self.configured.iter())
            .all(|(registered, configured)| !registered || *configured);
        if all_configured {
            self.safe_mode = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Layer, LayerRect};
    use crate::strategy::DefaultStrategy;

    fn stack_with_gpu_target() -> LayerStack {
        let mut stack = LayerStack::new();
        let mut fb = Layer::new(CompositionType::GpuTarget);
        fb.src_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        fb.dst_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        stack.layers.push(fb);
        stack
    }

    #[test]
    fn registering_a_second_display_forces_safe_mode_until_both_configure() {
        let mut cm = CompositionManager::new(HWResourceInfo::default(), Box::new(DefaultStrategy));
        cm.register_display(DisplayId::Primary).unwrap();
        assert!(cm.is_safe_mode());

        let mut stack = stack_with_gpu_target();
        let plan = cm
            .prepare(DisplayId::Primary, 1920, 1920, 1080, &mut stack, false)
            .unwrap();
        cm.post_commit(DisplayId::Primary).unwrap();
        let _ = plan;
        assert!(!cm.is_safe_mode());

        cm.register_display(DisplayId::Hdmi).unwrap();
        assert!(cm.is_safe_mode(), "registering HDMI must force safe mode again");

        let plan = cm
            .prepare(DisplayId::Hdmi, 1920, 1920, 1080, &mut stack, false)
            .unwrap();
        let _ = plan;
        cm.post_commit(DisplayId::Hdmi).unwrap();
        assert!(!cm.is_safe_mode());
    }

    #[test]
    fn exhausted_strategies_return_an_error() {
        struct NeverSucceeds;
        impl Strategy for NeverSucceeds {
            fn start(&mut self, _stack: &LayerStack) -> strategy::StrategyToken {
                strategy::StrategyToken::new(1)
            }
            fn get_next_strategy(
                &mut self,
                token: &mut strategy::StrategyToken,
                _stack: &mut LayerStack,
                _constraints: &StrategyConstraints,
            ) -> Option<HWLayers> {
                if token.consume() {
                    None
                } else {
                    None
                }
            }
            fn stop(&mut self, _token: strategy::StrategyToken) {}
        }

        let mut cm = CompositionManager::new(HWResourceInfo::default(), Box::new(NeverSucceeds));
        cm.register_display(DisplayId::Primary).unwrap();
        let mut stack = stack_with_gpu_target();
        let err = cm
            .prepare(DisplayId::Primary, 1920, 1920, 1080, &mut stack, false)
            .unwrap_err();
        assert_eq!(err, SdeError::Resources);
    }
}
