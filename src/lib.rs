//! A user-space mobile display-composition core: per-frame Prepare/Commit
//! over a shared hardware pipe pool, with pluggable strategy, rotator, and
//! device-adaptor seams (spec.md §1).
//!
//! The public surface is [`Engine`] plus the data types a caller builds a
//! [`LayerStack`](layer::LayerStack) out of. Everything below `Engine` --
//! the resource manager, rotator controller, strategy, composition manager
//! -- is exposed for embedders that want to supply their own strategy or
//! drive a display directly, but `Engine` is the intended entry point.

mod composition;
mod config;
mod device;
mod display;
mod engine;
mod error;
mod fence;
mod format;
mod hwlayers;
mod ids;
mod layer;
mod pipe;
mod rotator;
mod strategy;

pub use composition::CompositionManager;
pub use config::{HWDisplayAttributes, HWPanelInfo, HWResourceInfo, MAX_INTERFACE_WIDTH};
pub use device::{apply_commit_result, CommitResult, HWDeviceAdaptor, MockDeviceAdaptor, PowerState};
pub use display::{DisplayController, DisplayState};
pub use engine::{Engine, EventKind};
pub use error::{Result, SdeError};
pub use fence::{wait_and_close, FenceTimeout, FenceWaiter, NullFenceWaiter, NO_FENCE};
pub use format::PixelFormat;
pub use hwlayers::{HWLayerConfig, HWLayers, HWLayersInfo, HWPipeInfo};
pub use ids::{DisplayId, NUM_DISPLAY_KINDS};
pub use layer::{
    BlendingMode, CompositionType, Layer, LayerBuffer, LayerBufferFlags, LayerFlags, LayerRect,
    LayerStack, LayerStackFlags, LayerTransform, PlaneInfo, SolidFillColor,
};
pub use pipe::{PipeKind, PipeState, ResourceManager, SourcePipe};
pub use rotator::{
    BufferAllocator, HWRotatorSession, HWSessionConfig, RotatorController, RotatorDevice,
    MAX_SESSION_COUNT,
};
pub use strategy::{is_cursor_eligible, DefaultStrategy, Strategy, StrategyConstraints, StrategyToken};
