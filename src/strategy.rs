// The composition strategy seam: component C5 (spec.md §4.4).
//
// No original_source file maps onto this directly -- the real stack loads a
// strategy plug-in via `dlopen`/`dlsym` (`comp_manager.cpp::Init`), which is
// explicitly out of scope (spec.md §1) beyond the fallback contract. This
// models the interface the plug-in would implement and ships the in-tree
// default, following the teacher's `Backend` trait pattern
// (`thundr/src/display/mod.rs`) for swapping an implementation in at
// construction time.
//
// The ordering dependency spec.md §9.1 calls out -- `get_next_strategy` may
// only be called after `start` -- is encoded with a token only `start`
// can mint, per §9.1's suggestion to make the dependency a type-level one
// rather than a documented-but-unchecked precondition.

use crate::hwlayers::{HWLayerConfig, HWLayers, HWPipeInfo};
use crate::layer::{CompositionType, LayerStack};

/// Per-attempt constraints the composition manager derives from engine-wide
/// state before asking the strategy for a plan (spec.md §4.4).
#[derive(Debug, Clone, Copy)]
pub struct StrategyConstraints {
    pub safe_mode: bool,
    pub max_layers: usize,
    pub use_cursor: bool,
    pub idle_fallback: bool,
}

/// Proof that `Strategy::start` ran and said how many attempts remain.
/// `get_next_strategy` takes this by `&mut` and consumes one attempt per
/// call, so a strategy cannot be iterated without first being started.
pub struct StrategyToken {
    remaining: u32,
}

impl StrategyToken {
    pub(crate) fn new(max_attempts: u32) -> Self {
        StrategyToken {
            remaining: max_attempts,
        }
    }

    /// Consumes one attempt; `false` means the caller has exhausted every
    /// attempt `start` promised and must stop looping (spec.md §4.6).
    pub(crate) fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

/// Iterates candidate composition plans for one frame (component C5).
pub trait Strategy: Send + Sync {
    /// Begins a new per-frame iteration over `stack`, returning a token
    /// good for the number of attempts this strategy is willing to offer.
    fn start(&mut self, stack: &LayerStack) -> StrategyToken;

    /// Produces the next candidate plan, or `None` once the strategy has
    /// nothing left to offer under `constraints`. Takes `stack` mutably
    /// because marking a layer GPU-composited is the strategy's job, not
    /// the caller's (spec.md §4.4).
    fn get_next_strategy(
        &mut self,
        token: &mut StrategyToken,
        stack: &mut LayerStack,
        constraints: &StrategyConstraints,
    ) -> Option<HWLayers>;

    /// Ends the per-frame iteration. Takes the token by value so it cannot
    /// be reused afterwards.
    fn stop(&mut self, token: StrategyToken);
}

/// The in-tree fallback (spec.md §4.4): marks every non-GPUTarget layer as
/// GPU and exposes the GPUTarget layer as the sole hardware layer. Always
/// succeeds at the resource level (one DMA or RGB pipe for the fb layer).
/// Offers exactly one attempt (§9.2's resolved open question).
#[derive(Debug, Default)]
pub struct DefaultStrategy;

impl Strategy for DefaultStrategy {
    fn start(&mut self, _stack: &LayerStack) -> StrategyToken {
        StrategyToken::new(1)
    }

    fn get_next_strategy(
        &mut self,
        token: &mut StrategyToken,
        stack: &mut LayerStack,
        _constraints: &StrategyConstraints,
    ) -> Option<HWLayers> {
        if !token.consume() {
            return None;
        }

        let gpu_target_index = stack.gpu_target_index()?;

        for (i, layer) in stack.layers.iter_mut().enumerate() {
            if i != gpu_target_index {
                layer.composition = CompositionType::Gpu;
            }
        }

        let gpu_target = &stack.layers[gpu_target_index];

        let mut hw_layers = HWLayers::new();
        hw_layers.info.index = vec![gpu_target_index];
        hw_layers.info.roi = gpu_target.dst_rect;

        let mut config = HWLayerConfig::default();
        config.left_pipe = HWPipeInfo {
            valid: true,
            src_roi: gpu_target.src_rect,
            dst_roi: gpu_target.dst_rect,
            ..HWPipeInfo::default()
        };
        hw_layers.config = vec![config];

        Some(hw_layers)
    }

    fn stop(&mut self, _token: StrategyToken) {}
}

/// True iff `layer`'s top-of-stack position and flags make it eligible for
/// hardware cursor offload (spec.md §4.4 `use_cursor`); the hardware
/// capability check itself belongs to the device adaptor.
pub fn is_cursor_eligible(stack: &LayerStack) -> bool {
    if !stack
        .flags
        .contains(crate::layer::LayerStackFlags::CURSOR_PRESENT)
    {
        return false;
    }
    stack
        .layers
        .iter()
        .filter(|l| l.composition != CompositionType::GpuTarget)
        .last()
        .map(|l| l.is_cursor_flagged())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Layer, LayerRect};

    fn stack_with_gpu_target() -> LayerStack {
        let mut stack = LayerStack::new();
        stack.layers.push(Layer::new(CompositionType::Gpu));
        let mut fb = Layer::new(CompositionType::GpuTarget);
        fb.src_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        fb.dst_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        stack.layers.push(fb);
        stack
    }

    #[test]
    fn default_strategy_offers_exactly_one_attempt() {
        let mut stack = stack_with_gpu_target();
        let mut strategy = DefaultStrategy;
        let mut token = strategy.start(&stack);

        let constraints = StrategyConstraints {
            safe_mode: false,
            max_layers: 4,
            use_cursor: false,
            idle_fallback: false,
        };

        let plan = strategy.get_next_strategy(&mut token, &mut stack, &constraints);
        assert!(plan.is_some());
        let plan = plan.unwrap();
        assert_eq!(plan.info.index, vec![1]);
        assert_eq!(stack.layers[0].composition, CompositionType::Gpu);

        let second = strategy.get_next_strategy(&mut token, &mut stack, &constraints);
        assert!(second.is_none());
        strategy.stop(token);
    }
}
