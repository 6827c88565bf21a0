// The facade tying every display to the shared composition/resource pool
// (SPEC_FULL §6, §11): component wiring, engine-wide locking, and the
// event-callback registry.
//
// No single original_source file maps onto this -- `comp_manager.cpp`'s
// `CompositionManager` owns the shared `ResManager` but not the per-display
// objects, and the original's event dispatch lives in the HAL/IDisplay
// shim this crate doesn't carry. The locking pattern is grounded on the
// teacher's `Arc<Mutex<Surface>>`/`Rc<RefCell<ShellSurface>>` shared-mutable-
// state idiom (`category5/ways/wl_shell.rs`, `category5/ways/role.rs`),
// upgraded to `parking_lot::ReentrantMutex<RefCell<_>>` per spec.md §5's
// requirement that a callback invoked while the engine already holds its
// own lock (e.g. a VSync handler calling back into `commit`) not deadlock.

use crate::composition::CompositionManager;
use crate::config::{HWPanelInfo, HWResourceInfo};
use crate::device::HWDeviceAdaptor;
use crate::display::{DisplayController, DisplayState};
use crate::error::{Result, SdeError};
use crate::fence::FenceWaiter;
use crate::ids::DisplayId;
use crate::layer::LayerStack;
use crate::rotator::{BufferAllocator, RotatorController, RotatorDevice};
use crate::strategy::{DefaultStrategy, Strategy};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::HashMap;

/// Event kinds the engine dispatches to registered callbacks (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Hotplug,
    VSync,
    Refresh,
    IdleTimeout,
    ThermalEvent,
    CecMessage,
}

type Callback = Box<dyn FnMut(DisplayId) + Send>;

struct EngineState {
    comp_mgr: CompositionManager,
    displays: HashMap<DisplayId, DisplayController>,
    callbacks: HashMap<EventKind, Vec<Callback>>,
}

/// Owns every registered display plus the shared pipe pool and strategy
/// (component wiring described across spec.md §4, §5, §6).
pub struct Engine {
    inner: ReentrantMutex<RefCell<EngineState>>,
}

impl Engine {
    /// `strategy` falls back to `DefaultStrategy` when the caller has no
    /// plug-in strategy to load (spec.md §4.4).
    pub fn new(hw_res_info: HWResourceInfo, strategy: Option<Box<dyn Strategy>>) -> Self {
        let strategy = strategy.unwrap_or_else(|| Box::new(DefaultStrategy));
        Engine {
            inner: ReentrantMutex::new(RefCell::new(EngineState {
                comp_mgr: CompositionManager::new(hw_res_info, strategy),
                displays: HashMap::new(),
                callbacks: HashMap::new(),
            })),
        }
    }

    /// Builds and initializes a `DisplayController` for `id` and registers
    /// it with the shared composition manager (spec.md §4.1 `Init`).
    /// `rotator` is `None` for displays with no pre-rotation block.
    pub fn register_display(
        &self,
        id: DisplayId,
        device: Box<dyn HWDeviceAdaptor>,
        rotator: Option<(Box<dyn RotatorDevice>, Box<dyn BufferAllocator>)>,
        waiter: Box<dyn FenceWaiter>,
        panel_info: HWPanelInfo,
    ) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();

        if state.displays.contains_key(&id) {
            return Err(SdeError::Parameters);
        }

        let rotator = rotator.map(|(dev, alloc)| RotatorController::new(dev, alloc));
        let mut controller = DisplayController::new(id, device, rotator, waiter, panel_info);
        controller.init(&mut state.comp_mgr)?;
        state.displays.insert(id, controller);
        Ok(())
    }

    /// SPEC_FULL §11 supplement: tears down a display and returns its pipes
    /// to the shared pool.
    pub fn unregister_display(&self, id: DisplayId) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        if state.displays.remove(&id).is_none() {
            return Err(SdeError::Parameters);
        }
        state.comp_mgr.unregister_display(id)
    }

    pub fn set_display_state(&self, id: DisplayId, target: DisplayState) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        let state = &mut *state;
        let display = state.displays.get_mut(&id).ok_or(SdeError::Parameters)?;
        display.set_display_state(&mut state.comp_mgr, target)
    }

    pub fn prepare(&self, id: DisplayId, stack: &mut LayerStack) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        let state = &mut *state;
        let display = state.displays.get_mut(&id).ok_or(SdeError::Parameters)?;
        display.prepare(&mut state.comp_mgr, stack)
    }

    pub fn commit(&self, id: DisplayId, stack: &mut LayerStack) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        let state = &mut *state;
        let display = state.displays.get_mut(&id).ok_or(SdeError::Parameters)?;
        display.commit(&mut state.comp_mgr, stack)
    }

    pub fn flush(&self, id: DisplayId) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        let state = &mut *state;
        let display = state.displays.get_mut(&id).ok_or(SdeError::Parameters)?;
        display.flush(&mut state.comp_mgr)
    }

    pub fn reconfigure_display(&self, id: DisplayId, mode: u32) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        let state = &mut *state;
        let display = state.displays.get_mut(&id).ok_or(SdeError::Parameters)?;
        display.reconfigure(&mut state.comp_mgr, mode)
    }

    pub fn set_cursor_position(&self, id: DisplayId, stack: &LayerStack, x: i32, y: i32) -> Result<()> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        let display = state.displays.get_mut(&id).ok_or(SdeError::Parameters)?;
        display.set_cursor_position(stack, x, y)
    }

    pub fn is_safe_mode(&self) -> bool {
        let guard = self.inner.lock();
        let state = guard.borrow();
        state.comp_mgr.is_safe_mode()
    }

    /// Registers a callback for `kind` (spec.md §6). Multiple callbacks may
    /// be registered for the same kind; they run in registration order.
    pub fn register_callback(&self, kind: EventKind, callback: Callback) {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        state.callbacks.entry(kind).or_insert_with(Vec::new).push(callback);
    }

    /// Dispatches `kind` for `display`: updates the composition manager's
    /// idle/thermal policy first (spec.md §3.5), then runs every callback
    /// registered for `kind`.
    pub fn dispatch_event(&self, kind: EventKind, display: DisplayId, thermal_level: u32) {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();

        match kind {
            EventKind::IdleTimeout => state.comp_mgr.notify_idle_timeout(display),
            EventKind::ThermalEvent => state.comp_mgr.notify_thermal_level(display, thermal_level),
            _ => {}
        }

        if let Some(callbacks) = state.callbacks.get_mut(&kind) {
            for callback in callbacks.iter_mut() {
                callback(display);
            }
        }
    }

    /// SPEC_FULL §11 supplement: a one-line-per-display diagnostic dump,
    /// following the teacher's `Atmosphere::print_surface_tree`-style debug
    /// dumps (`category5/atmosphere/mod.rs`).
    pub fn dump(&self) -> String {
        let guard = self.inner.lock();
        let state = guard.borrow();
        let mut out = format!("engine: safe_mode={}\n", state.comp_mgr.is_safe_mode());
        for id in DisplayId::all() {
            if let Some(display) = state.displays.get(&id) {
                out.push_str(&display.dump());
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDeviceAdaptor;
    use crate::fence::NullFenceWaiter;
    use crate::layer::{CompositionType, Layer, LayerRect};

    fn stack_with_gpu_target() -> LayerStack {
        let mut stack = LayerStack::new();
        let mut fb = Layer::new(CompositionType::GpuTarget);
        fb.src_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        fb.dst_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        stack.layers.push(fb);
        stack
    }

    fn register(engine: &Engine, id: DisplayId) {
        engine
            .register_display(
                id,
                Box::new(MockDeviceAdaptor::new(crate::config::HWDisplayAttributes::default())),
                None,
                Box::new(NullFenceWaiter),
                HWPanelInfo::default(),
            )
            .unwrap();
    }

    #[test]
    fn a_frame_cycles_through_the_facade() {
        let engine = Engine::new(HWResourceInfo::default(), None);
        register(&engine, DisplayId::Primary);
        engine
            .set_display_state(DisplayId::Primary, DisplayState::On)
            .unwrap();

        let mut stack = stack_with_gpu_target();
        engine.prepare(DisplayId::Primary, &mut stack).unwrap();
        engine.commit(DisplayId::Primary, &mut stack).unwrap();
        assert!(stack.retire_fence >= 0);
    }

    #[test]
    fn registering_a_second_display_is_visible_through_the_facade() {
        let engine = Engine::new(HWResourceInfo::default(), None);
        register(&engine, DisplayId::Primary);
        assert!(engine.is_safe_mode());

        engine
            .set_display_state(DisplayId::Primary, DisplayState::On)
            .unwrap();
        let mut stack = stack_with_gpu_target();
        engine.prepare(DisplayId::Primary, &mut stack).unwrap();
        engine.commit(DisplayId::Primary, &mut stack).unwrap();
        assert!(!engine.is_safe_mode());

        register(&engine, DisplayId::Hdmi);
        assert!(engine.is_safe_mode(), "HDMI registration must force safe mode again");
    }

    #[test]
    fn idle_timeout_dispatch_reaches_registered_callbacks() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let engine = Engine::new(HWResourceInfo::default(), None);
        register(&engine, DisplayId::Primary);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        engine.register_callback(
            EventKind::IdleTimeout,
            Box::new(move |_display| fired_clone.store(true, Ordering::SeqCst)),
        );

        engine.dispatch_event(EventKind::IdleTimeout, DisplayId::Primary, 0);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn unregistering_an_unknown_display_is_an_error() {
        let engine = Engine::new(HWResourceInfo::default(), None);
        let err = engine.unregister_display(DisplayId::Hdmi).unwrap_err();
        assert_eq!(err, SdeError::Parameters);
    }
}
