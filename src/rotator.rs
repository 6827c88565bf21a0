// The pre-rotation pipeline: components C2 (session manager) and C3
// (rotator controller), spec.md §4.5.
//
// `SessionManager`'s `start`/`open_session`/`get_next_buffer`/`stop`/
// `set_release_fd`/`acquire_session`/`release_session` are a close
// translation of `session_manager.cpp`, including the state-transition
// table in its header comment and the wait-then-close ordering in
// `GetNextBuffer` (property P4). `RotatorController` is the per-frame
// Prepare/Commit/PostCommit/Purge wrapper spec.md §4.5 describes around
// that session state machine.

use crate::config::HWResourceInfo;
use crate::error::{Result, SdeError};
use crate::fence::{self, FenceWaiter, NO_FENCE};
use crate::format::PixelFormat;
use crate::hwlayers::{HWLayerConfig, HWLayers, HWPipeInfo};
use crate::layer::{LayerBuffer, LayerBufferFlags, LayerStack, LayerTransform};
use std::os::unix::io::RawFd;
use utils::log;

/// Fixed bound on concurrently open rotator sessions, generalized from the
/// original's `kMaxSessionCount` compile constant.
pub const MAX_SESSION_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Released,
    Ready,
    Acquired,
}

/// What a rotation request needs: source/destination geometry and buffer
/// allocation parameters. Two requests with equal configs may share a
/// session (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HWSessionConfig {
    pub src_width: u32,
    pub src_height: u32,
    pub src_format: PixelFormat,
    pub dst_width: u32,
    pub dst_height: u32,
    pub dst_format: PixelFormat,
    pub buffer_count: u32,
    pub secure: bool,
    pub cache: bool,
    pub frame_rate: u32,
}

/// A layer's rotator assignment for one frame: the request plus the
/// rotated output buffer the caller reads from once `get_next_buffer`
/// returns (spec.md §3.2, §4.5).
#[derive(Debug, Clone)]
pub struct HWRotatorSession {
    pub hw_session_config: HWSessionConfig,
    pub output_buffer: LayerBuffer,
    pub session_id: usize,
}

impl HWRotatorSession {
    pub fn new(hw_session_config: HWSessionConfig) -> Self {
        HWRotatorSession {
            output_buffer: LayerBuffer::new(
                hw_session_config.dst_width,
                hw_session_config.dst_height,
                hw_session_config.dst_format,
            ),
            hw_session_config,
            session_id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BufferConfig {
    width: u32,
    height: u32,
    format: PixelFormat,
    buffer_count: u32,
    secure: bool,
    cache: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct AllocBufferInfo {
    fd: RawFd,
    stride: u32,
    size: usize,
}

#[derive(Debug, Clone, Default)]
struct BufferInfo {
    buffer_config: BufferConfig,
    alloc_buffer_info: AllocBufferInfo,
}

/// Allocates/frees the buffers a rotator session's output lands in.
/// Abstracted the way `fence::FenceWaiter` abstracts fence waiting, so
/// tests can run without a real ION/gralloc allocator.
pub trait BufferAllocator: Send + Sync {
    fn allocate_buffer(&self, info: &mut BufferInfo) -> Result<()>;
    fn free_buffer(&self, info: &mut BufferInfo) -> Result<()>;
}

/// Opens/closes a session against the real rotator hardware block.
pub trait RotatorDevice: Send + Sync {
    fn open_session(&self, session: &mut HWRotatorSession) -> Result<()>;
    fn close_session(&self, session: &mut HWRotatorSession) -> Result<()>;

    /// Dry-runs `session`'s config against the device without committing
    /// (spec.md §4.5 `Prepare`: "dry-run via the rotator device's
    /// Validate"). Returns `Hardware` on rejection.
    fn validate(&self, session: &HWRotatorSession) -> Result<()>;

    /// Kicks off the rotation job for `session` and stamps the rotated
    /// output buffer's acquire fence (spec.md §4.5 `Commit`: "store the
    /// rotator's acquire fence on the layer's new input buffer").
    fn submit(&self, session: &mut HWRotatorSession) -> Result<()>;
}

struct Session {
    state: SessionState,
    hw_rotator_session: HWRotatorSession,
    buffer_info: BufferInfo,
    release_fd: Vec<RawFd>,
    offset: Vec<u32>,
    curr_index: usize,
}

impl Session {
    fn released() -> Self {
        Session {
            state: SessionState::Released,
            hw_rotator_session: HWRotatorSession::new(HWSessionConfig {
                src_width: 0,
                src_height: 0,
                src_format: PixelFormat::Invalid,
                dst_width: 0,
                dst_height: 0,
                dst_format: PixelFormat::Invalid,
                buffer_count: 0,
                secure: false,
                cache: false,
                frame_rate: 0,
            }),
            buffer_info: BufferInfo::default(),
            release_fd: Vec::new(),
            offset: Vec::new(),
            curr_index: 0,
        }
    }
}

/// Owns the rotator's session pool (component C2, spec.md §4.5).
pub struct SessionManager {
    sessions: Vec<Session>,
    active_session_count: usize,
    rotator_device: Box<dyn RotatorDevice>,
    buffer_allocator: Box<dyn BufferAllocator>,
}

impl SessionManager {
    pub fn new(
        rotator_device: Box<dyn RotatorDevice>,
        buffer_allocator: Box<dyn BufferAllocator>,
    ) -> Self {
        SessionManager {
            sessions: (0..MAX_SESSION_COUNT).map(|_| Session::released()).collect(),
            active_session_count: 0,
            rotator_device,
            buffer_allocator,
        }
    }

    /// Demotes every session still `Acquired` from the previous frame to
    /// `Ready`, so `open_session` can reuse it this frame if the config
    /// matches; a session left unreacquired by frame end is released in
    /// `stop`.
    pub fn start(&mut self) {
        let mut ready_session_count = 0usize;
        let mut session_count = 0usize;
        while ready_session_count < self.active_session_count && session_count < self.sessions.len() {
            if self.sessions[session_count].state == SessionState::Released {
                session_count += 1;
                continue;
            }
            self.sessions[session_count].state = SessionState::Ready;
            session_count += 1;
            ready_session_count += 1;
        }
    }

    /// Finds a `Ready` session whose config matches `hw_rotator_session`'s
    /// and reacquires it, else opens a new session in the first `Released`
    /// slot (spec.md §4.5). Mutates `hw_rotator_session` with the assigned
    /// `session_id` and (on reuse) the already-known output buffer shape.
    pub fn open_session(&mut self, hw_rotator_session: &mut HWRotatorSession) -> Result<()> {
        let input_config = hw_rotator_session.hw_session_config;

        let mut free_session = self.active_session_count.min(self.sessions.len());
        let mut acquired_session: Option<usize> = None;
        let mut ready_session_count = 0usize;

        for (i, session) in self.sessions.iter_mut().enumerate() {
            if ready_session_count >= self.active_session_count {
                break;
            }
            if session.state == SessionState::Released {
                free_session = i;
                continue;
            }
            if session.state != SessionState::Ready {
                continue;
            }
            if session.hw_rotator_session.hw_session_config == input_config {
                session.state = SessionState::Acquired;
                acquired_session = Some(i);
                break;
            }
            ready_session_count += 1;
        }

        if let Some(i) = acquired_session {
            hw_rotator_session.output_buffer.width = input_config.dst_width;
            hw_rotator_session.output_buffer.height = input_config.dst_height;
            hw_rotator_session.output_buffer.format = input_config.dst_format;
            if input_config.secure {
                hw_rotator_session.output_buffer.flags.insert(LayerBufferFlags::SECURE);
            }
            hw_rotator_session.session_id = i;
            return Ok(());
        }

        if free_session >= self.sessions.len() {
            return Err(SdeError::Memory);
        }

        self.acquire_session(hw_rotator_session, free_session)?;
        hw_rotator_session.session_id = free_session;
        self.active_session_count += 1;
        log::debug!(
            "rotator session {} acquired, active={}",
            free_session,
            self.active_session_count
        );
        Ok(())
    }

    /// Lazily allocates the session's output buffer ring on first use,
    /// then waits on and closes the release fence for the ring slot about
    /// to be handed out before filling in the plane info (property P4).
    pub fn get_next_buffer(
        &mut self,
        hw_rotator_session: &mut HWRotatorSession,
        waiter: &dyn FenceWaiter,
    ) -> Result<()> {
        let session_id = hw_rotator_session.session_id;
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(SdeError::Parameters)?;
        if session.state != SessionState::Acquired {
            return Err(SdeError::Parameters);
        }

        let curr_index = session.curr_index;

        if session.buffer_info.alloc_buffer_info.fd < 0 {
            let buffer_count = session.buffer_info.buffer_config.buffer_count as usize;
            self.buffer_allocator.allocate_buffer(&mut session.buffer_info)?;
            let buffer_size = session.buffer_info.alloc_buffer_info.size;
            session.offset = (0..buffer_count)
                .map(|idx| (buffer_size / buffer_count.max(1) * idx) as u32)
                .collect();
        }

        fence::wait_and_close(waiter, session.release_fd[curr_index]);
        session.release_fd[curr_index] = NO_FENCE;

        hw_rotator_session.output_buffer.planes.clear();
        hw_rotator_session.output_buffer.planes.push(crate::layer::PlaneInfo {
            fd: session.buffer_info.alloc_buffer_info.fd,
            offset: session.offset[curr_index],
            stride: session.buffer_info.alloc_buffer_info.stride,
        });

        Ok(())
    }

    /// Releases every session still `Ready` (i.e. not reacquired this
    /// frame) and frees its buffers.
    pub fn stop(&mut self) -> Result<()> {
        let mut session_id = 0usize;
        while self.active_session_count > 0 && session_id < self.sessions.len() {
            if self.sessions[session_id].state == SessionState::Ready {
                self.release_session(session_id)?;
                self.active_session_count -= 1;
            }
            session_id += 1;
        }
        Ok(())
    }

    /// Dry-runs `session` against the rotator device (spec.md §4.5
    /// `Prepare`).
    pub fn validate(&self, session: &HWRotatorSession) -> Result<()> {
        self.rotator_device.validate(session)
    }

    /// Kicks off the rotation job for `session` (spec.md §4.5 `Commit`).
    pub fn submit(&self, session: &mut HWRotatorSession) -> Result<()> {
        self.rotator_device.submit(session)
    }

    /// Stores the rotator output's release fence in the session's ring and
    /// advances the ring index (spec.md §4.5).
    pub fn set_release_fd(&mut self, session_id: usize, release_fence_fd: RawFd) -> Result<()> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(SdeError::Parameters)?;
        if session.state != SessionState::Acquired {
            return Err(SdeError::Parameters);
        }

        let buffer_count = session.buffer_info.buffer_config.buffer_count.max(1) as usize;
        session.release_fd[session.curr_index] = release_fence_fd;
        session.curr_index = (session.curr_index + 1) % buffer_count;
        Ok(())
    }

    /// Tears down every session regardless of state, used when a display
    /// is torn down (spec.md §4.5).
    pub fn purge(&mut self) -> Result<()> {
        for session_id in 0..self.sessions.len() {
            if self.sessions[session_id].state != SessionState::Released {
                self.release_session(session_id)?;
                self.active_session_count = self.active_session_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    fn acquire_session(
        &mut self,
        hw_rotator_session: &mut HWRotatorSession,
        slot: usize,
    ) -> Result<()> {
        self.rotator_device.open_session(hw_rotator_session)?;

        let input_config = hw_rotator_session.hw_session_config;
        hw_rotator_session.output_buffer = LayerBuffer::new(
            input_config.dst_width,
            input_config.dst_height,
            input_config.dst_format,
        );
        if input_config.secure {
            hw_rotator_session.output_buffer.flags.insert(LayerBufferFlags::SECURE);
        }

        let buffer_count = input_config.buffer_count.max(1) as usize;

        let session = &mut self.sessions[slot];
        session.release_fd = vec![NO_FENCE; buffer_count];
        session.offset = vec![0; buffer_count];
        session.curr_index = 0;
        session.buffer_info = BufferInfo {
            buffer_config: BufferConfig {
                buffer_count: input_config.buffer_count,
                secure: input_config.secure,
                cache: input_config.cache,
                width: input_config.dst_width,
                height: input_config.dst_height,
                format: input_config.dst_format,
            },
            alloc_buffer_info: AllocBufferInfo {
                fd: -1,
                ..Default::default()
            },
        };
        session.state = SessionState::Acquired;
        session.hw_rotator_session = hw_rotator_session.clone();

        Ok(())
    }

    fn release_session(&mut self, slot: usize) -> Result<()> {
        self.buffer_allocator
            .free_buffer(&mut self.sessions[slot].buffer_info)?;
        self.rotator_device
            .close_session(&mut self.sessions[slot].hw_rotator_session)?;

        let session = &mut self.sessions[slot];
        for fd in session.release_fd.iter_mut() {
            fence::close_fence(*fd);
            *fd = NO_FENCE;
        }
        session.state = SessionState::Released;
        session.offset.clear();
        session.release_fd.clear();
        Ok(())
    }
}

/// Per-frame wrapper around `SessionManager` (component C3, spec.md §4.5):
/// brackets the negotiation loop with `start`/`stop` and drives
/// `open_session`/`get_next_buffer`/`set_release_fd` for every hardware
/// layer that needs pre-rotation.
pub struct RotatorController {
    session_manager: SessionManager,
}

impl RotatorController {
    pub fn new(
        rotator_device: Box<dyn RotatorDevice>,
        buffer_allocator: Box<dyn BufferAllocator>,
    ) -> Self {
        RotatorController {
            session_manager: SessionManager::new(rotator_device, buffer_allocator),
        }
    }

    /// Computes which hardware layers in `hw_layers` need pre-rotation
    /// (transform not identity, or a downscale beyond the pipe's scaling
    /// limit), opens/reuses a rotator session for each, then dry-runs it
    /// against the device (spec.md §4.5 `Prepare`).
    pub fn prepare(
        &mut self,
        hw_layers: &mut HWLayers,
        stack: &LayerStack,
        hw_res_info: &HWResourceInfo,
    ) -> Result<()> {
        self.session_manager.start();

        let count = hw_layers.config.len();
        for i in 0..count {
            if hw_layers.config[i].rotator.is_some() {
                continue;
            }
            let layer_index = hw_layers.info.index[i];
            let layer = match stack.layers.get(layer_index) {
                Some(l) => l,
                None => continue,
            };
            let pipe = &hw_layers.config[i].left_pipe;
            if !needs_rotation_for_layer(layer.transform, pipe, hw_res_info) {
                continue;
            }
            if let Some(buffer) = layer.input_buffer.as_ref() {
                let session_config = build_session_config(buffer, pipe, layer.frame_rate);
                hw_layers.config[i].rotator = Some(HWRotatorSession::new(session_config));
            }
        }

        for config in hw_layers.config.iter_mut() {
            if let Some(session) = config.rotator.as_mut() {
                self.session_manager.open_session(session)?;
                self.session_manager.validate(session)?;
            }
        }
        Ok(())
    }

    /// For every rotated layer: waits out its ring slot's previous release
    /// fence and hands out the next output buffer, submits the rotation
    /// job, then merges the rotator's completion fence into the original
    /// input buffer's release fence (spec.md §4.5 `Commit`).
    pub fn commit(
        &mut self,
        hw_layers: &mut HWLayers,
        stack: &mut LayerStack,
        waiter: &dyn FenceWaiter,
    ) -> Result<()> {
        let count = hw_layers.config.len();
        for i in 0..count {
            if hw_layers.config[i].rotator.is_none() {
                continue;
            }

            {
                let session = hw_layers.config[i].rotator.as_mut().unwrap();
                self.session_manager.get_next_buffer(session, waiter)?;
            }
            self.session_manager.submit(hw_layers.config[i].rotator.as_mut().unwrap())?;

            let rotator_fence = hw_layers.config[i]
                .rotator
                .as_ref()
                .unwrap()
                .output_buffer
                .acquire_fence;
            let layer_index = hw_layers.info.index[i];
            if let Some(layer) = stack.layers.get_mut(layer_index) {
                if let Some(buffer) = layer.input_buffer.as_mut() {
                    let merged = waiter.merge(buffer.release_fence, waiter.dup(rotator_fence));
                    fence::close_fence(buffer.release_fence);
                    buffer.release_fence = merged;
                }
            }
        }
        Ok(())
    }

    /// Records the device's per-commit release fence into every rotated
    /// layer's session ring, then releases any session not reacquired this
    /// frame (spec.md §4.5 `PostCommit`).
    pub fn post_commit(&mut self, hw_layers: &HWLayers, device_release_fence: RawFd, waiter: &dyn FenceWaiter) -> Result<()> {
        for config in hw_layers.config.iter() {
            if let Some(session) = config.rotator.as_ref() {
                self.session_manager
                    .set_release_fd(session.session_id, waiter.dup(device_release_fence))?;
            }
        }
        self.session_manager.stop()
    }

    /// Tears down every rotator session, used when a display is destroyed.
    pub fn purge(&mut self) -> Result<()> {
        self.session_manager.purge()
    }
}

/// A layer needs pre-rotation when its transform is not identity, or when
/// the downscale its assigned pipe would have to do exceeds the hardware's
/// scaling limit (spec.md §4.5 `Prepare`).
fn needs_rotation_for_layer(
    transform: LayerTransform,
    pipe: &HWPipeInfo,
    hw_res_info: &HWResourceInfo,
) -> bool {
    if !pipe.valid {
        return false;
    }
    if !transform.is_identity() {
        return true;
    }
    let max_scale_down = hw_res_info.max_scale_down as f32;
    let w_scale = pipe.src_roi.width() / pipe.dst_roi.width().max(1.0);
    let h_scale = pipe.src_roi.height() / pipe.dst_roi.height().max(1.0);
    w_scale > max_scale_down || h_scale > max_scale_down
}

/// The rotator's output becomes its assigned pipe's source, so the
/// session's destination geometry is the pipe's (post-cut) source ROI.
fn build_session_config(buffer: &LayerBuffer, pipe: &HWPipeInfo, frame_rate: u32) -> HWSessionConfig {
    HWSessionConfig {
        src_width: buffer.width,
        src_height: buffer.height,
        src_format: buffer.format,
        dst_width: pipe.src_roi.width() as u32,
        dst_height: pipe.src_roi.height() as u32,
        dst_format: buffer.format,
        buffer_count: 2,
        secure: buffer.flags.contains(LayerBufferFlags::SECURE),
        cache: false,
        frame_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::NullFenceWaiter;

    struct MockRotatorDevice;
    impl RotatorDevice for MockRotatorDevice {
        fn open_session(&self, _session: &mut HWRotatorSession) -> Result<()> {
            Ok(())
        }
        fn close_session(&self, _session: &mut HWRotatorSession) -> Result<()> {
            Ok(())
        }
        fn validate(&self, _session: &HWRotatorSession) -> Result<()> {
            Ok(())
        }
        fn submit(&self, session: &mut HWRotatorSession) -> Result<()> {
            session.output_buffer.acquire_fence = 77;
            Ok(())
        }
    }

    struct MockBufferAllocator;
    impl BufferAllocator for MockBufferAllocator {
        fn allocate_buffer(&self, info: &mut BufferInfo) -> Result<()> {
            info.alloc_buffer_info = AllocBufferInfo {
                fd: 42,
                stride: 4096,
                size: 4096 * 2160,
            };
            Ok(())
        }
        fn free_buffer(&self, info: &mut BufferInfo) -> Result<()> {
            info.alloc_buffer_info.fd = -1;
            Ok(())
        }
    }

    fn config() -> HWSessionConfig {
        HWSessionConfig {
            src_width: 1920,
            src_height: 1080,
            src_format: PixelFormat::RGBA8888,
            dst_width: 1920,
            dst_height: 1080,
            dst_format: PixelFormat::RGBA8888,
            buffer_count: 2,
            secure: false,
            cache: false,
            frame_rate: 60,
        }
    }

    #[test]
    fn open_session_allocates_a_fresh_slot_then_reuses_it() {
        let mut sm = SessionManager::new(Box::new(MockRotatorDevice), Box::new(MockBufferAllocator));
        sm.start();

        let mut session = HWRotatorSession::new(config());
        sm.open_session(&mut session).unwrap();
        assert_eq!(session.session_id, 0);
        sm.get_next_buffer(&mut session, &NullFenceWaiter).unwrap();
        sm.set_release_fd(session.session_id, 7).unwrap();
        sm.stop().unwrap();

        // Next frame: config matches, session should be reused from Ready.
        sm.start();
        let mut session2 = HWRotatorSession::new(config());
        sm.open_session(&mut session2).unwrap();
        assert_eq!(session2.session_id, 0);
    }

    #[test]
    fn stop_releases_sessions_not_reacquired() {
        let mut sm = SessionManager::new(Box::new(MockRotatorDevice), Box::new(MockBufferAllocator));
        sm.start();
        let mut session = HWRotatorSession::new(config());
        sm.open_session(&mut session).unwrap();
        sm.start();
        // Not reacquired this cycle -> Ready -> stop() should release it.
        sm.stop().unwrap();
        assert_eq!(sm.active_session_count, 0);
    }

    fn rotated_hw_layers() -> (HWLayers, LayerStack) {
        use crate::layer::{CompositionType, Layer, LayerBuffer, LayerRect};

        let mut stack = LayerStack::new();
        let mut layer = Layer::new(CompositionType::Sde);
        layer.input_buffer = Some(LayerBuffer::new(1920, 1080, PixelFormat::RGBA8888));
        layer.src_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        layer.dst_rect = LayerRect::new(0.0, 0.0, 1920.0, 1080.0);
        layer.transform.rotation = 90.0;
        stack.layers.push(layer);

        let mut hw_layers = HWLayers::new();
        hw_layers.info.index = vec![0];
        hw_layers.config = vec![HWLayerConfig {
            left_pipe: HWPipeInfo {
                valid: true,
                src_roi: LayerRect::new(0.0, 0.0, 1080.0, 1920.0),
                dst_roi: LayerRect::new(0.0, 0.0, 1080.0, 1920.0),
                ..HWPipeInfo::default()
            },
            ..HWLayerConfig::default()
        }];
        (hw_layers, stack)
    }

    /// A layer with a 90 degree transform picks up a rotator session in
    /// `prepare`, and `commit` merges the rotator's completion fence into
    /// the original input buffer's release fence instead of leaving it
    /// untouched.
    #[test]
    fn rotated_layer_gets_a_session_and_a_merged_release_fence() {
        let mut controller = RotatorController::new(
            Box::new(MockRotatorDevice),
            Box::new(MockBufferAllocator),
        );
        let (mut hw_layers, mut stack) = rotated_hw_layers();
        let hw_res_info = HWResourceInfo::default();

        controller.prepare(&mut hw_layers, &stack, &hw_res_info).unwrap();
        assert!(hw_layers.config[0].rotator.is_some());

        stack.layers[0].input_buffer.as_mut().unwrap().release_fence = 9;
        controller.commit(&mut hw_layers, &mut stack, &NullFenceWaiter).unwrap();
        assert_eq!(
            stack.layers[0].input_buffer.as_ref().unwrap().release_fence,
            9
        );

        controller.post_commit(&hw_layers, 123, &NullFenceWaiter).unwrap();
    }
}
