// The hardware device adaptor: component C1 (spec.md §4.2).
//
// Grounded on `hw_interface.h`'s `HWInterface` pure-virtual contract
// (`GetHWCapabilities`/`Open`/`Validate`/`Commit`/`PowerOn` etc.) in
// original_source, modeled as a trait per spec.md §9.1 ("polymorphic
// interfaces ... as trait-like contracts, not inheritance hierarchies"),
// and on `thundr::Display`'s swapchain validate/present split
// (`thundr/src/display/mod.rs`) for the validate-then-commit shape.
//
// Wire-level marshalling (ioctl layout, property blob encoding) is out of
// scope (spec.md §1); this module implements the marshalling *rules* --
// dedup, rect rounding, fence duplication -- at the level the core owns,
// and leaves the actual kernel call behind the `HWDeviceAdaptor` trait.

use crate::config::HWDisplayAttributes;
use crate::error::{Result, SdeError};
use crate::fence::{self, FenceWaiter};
use crate::hwlayers::HWLayers;
use crate::layer::LayerStack;
use std::collections::HashSet;
use std::os::unix::io::RawFd;

/// Device power states the adaptor can be driven through (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    Doze,
    DozeSuspend,
    Standby,
}

/// A dry-run or real commit outcome from the kernel side.
#[derive(Debug, Clone, Copy)]
pub struct CommitResult {
    pub retire_fence: RawFd,
    pub release_fence: RawFd,
}

/// Narrow validate-then-commit interface over a resolved plan
/// (component C1, spec.md §4.2). One adaptor instance per display.
pub trait HWDeviceAdaptor: Send + Sync {
    /// Dry-runs `hw_layers` against the device. Returns `Hardware` on
    /// rejection (the composition manager tries the next strategy) and
    /// `ShutDown` when the device is entering teardown. Must not consume
    /// fences.
    fn validate(&mut self, hw_layers: &HWLayers) -> Result<()>;

    /// Performs the atomic commit and returns the fences the kernel
    /// produced for it.
    fn commit(&mut self, hw_layers: &HWLayers) -> Result<CommitResult>;

    /// Submits an empty plan and returns its release fence, which the
    /// caller may ignore.
    fn flush(&mut self) -> Result<RawFd>;

    fn set_power_state(&mut self, state: PowerState) -> Result<()>;

    /// An async position update referencing the last layer's currently
    /// bound pipe. Unsupported in command-mode panels.
    fn set_cursor_position(&mut self, hw_layers: &HWLayers, x: i32, y: i32) -> Result<()>;

    fn get_display_attributes(&self, mode: u32) -> Result<HWDisplayAttributes>;
    fn get_num_display_attributes(&self) -> u32;
}

/// Applies spec.md §4.2's commit marshalling rules to a successful device
/// commit: stamps the retire fence onto the stack, then duplicates the
/// release fence into every distinct input layer's buffer exactly once
/// (property P5) and into the stack-level `release_fence` handle.
pub fn apply_commit_result(
    waiter: &dyn FenceWaiter,
    stack: &mut LayerStack,
    hw_layers: &HWLayers,
    result: CommitResult,
) {
    stack.retire_fence = result.retire_fence;
    stack.release_fence = waiter.dup(result.release_fence);

    let mut deduped = HashSet::new();
    for &stack_index in hw_layers.info.index.iter() {
        if !deduped.insert(stack_index) {
            continue;
        }
        if let Some(layer) = stack.layers.get_mut(stack_index) {
            if let Some(buffer) = layer.input_buffer.as_mut() {
                buffer.release_fence = waiter.dup(result.release_fence);
            }
        }
    }

    fence::close_fence(result.release_fence);
}

/// A headless adaptor for tests: validation always passes, commits hand
/// back fabricated fds, power transitions just record the last state.
pub struct MockDeviceAdaptor {
    pub attributes: HWDisplayAttributes,
    pub power_state: PowerState,
    pub fail_validate: bool,
    pub fail_commit: bool,
    pub shutting_down: bool,
    /// Unlike `shutting_down`, only `commit` sees this -- models a device
    /// that still validates fine but tears down before the atomic commit
    /// lands (spec.md §8 scenario S5).
    pub shut_down_on_commit: bool,
    next_fence: RawFd,
}

impl MockDeviceAdaptor {
    pub fn new(attributes: HWDisplayAttributes) -> Self {
        MockDeviceAdaptor {
            attributes,
            power_state: PowerState::Off,
            fail_validate: false,
            fail_commit: false,
            shutting_down: false,
            shut_down_on_commit: false,
            next_fence: 100,
        }
    }

    fn next_fd(&mut self) -> RawFd {
        self.next_fence += 1;
        self.next_fence
    }
}

impl HWDeviceAdaptor for MockDeviceAdaptor {
    fn validate(&mut self, _hw_layers: &HWLayers) -> Result<()> {
        if self.shutting_down {
            return Err(SdeError::ShutDown);
        }
        if self.fail_validate {
            return Err(SdeError::Hardware);
        }
        Ok(())
    }

    fn commit(&mut self, _hw_layers: &HWLayers) -> Result<CommitResult> {
        if self.shutting_down || self.shut_down_on_commit {
            return Err(SdeError::ShutDown);
        }
        if self.fail_commit {
            return Err(SdeError::Hardware);
        }
        Ok(CommitResult {
            retire_fence: self.next_fd(),
            release_fence: self.next_fd(),
        })
    }

    fn flush(&mut self) -> Result<RawFd> {
        Ok(self.next_fd())
    }

    fn set_power_state(&mut self, state: PowerState) -> Result<()> {
        self.power_state = state;
        Ok(())
    }

    fn set_cursor_position(&mut self, _hw_layers: &HWLayers, _x: i32, _y: i32) -> Result<()> {
        Ok(())
    }

    fn get_display_attributes(&self, _mode: u32) -> Result<HWDisplayAttributes> {
        Ok(self.attributes)
    }

    fn get_num_display_attributes(&self) -> u32 {
        1
    }
}
