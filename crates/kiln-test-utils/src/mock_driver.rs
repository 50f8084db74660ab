//! Recording implementation of [`GlDriver`] for tests.
//!
//! The mock never touches a GPU. It records every call and simulates the small
//! amount of bound state that callers can query back (current program,
//! enabled vertex attributes, bound textures and framebuffer).

use crate::{driver::GlDriver, gpu_types::*};
use std::collections::HashMap;
use parking_lot::Mutex;
use wgpu::{BlendFactor, BlendOperation, CompareFunction, Face, FrontFace, IndexFormat, PrimitiveTopology, StencilOperation};

/// A single driver call, as recorded by [`MockDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Enable(Capability),
    Disable(Capability),
    UseProgram(ProgramId),
    DeleteProgram(ProgramId),
    ActiveTexture(u32),
    BindTexture {
        target: TextureTarget,
        texture: TextureId,
    },
    DeleteTexture(TextureId),
    BlendFunc {
        src: BlendFactor,
        dst: BlendFactor,
    },
    BlendEquation(BlendOperation),
    GenVertexArray(VaoId),
    BindVertexArray(VaoId),
    DeleteVertexArray(VaoId),
    EnableVertexAttribArray(u32),
    DisableVertexAttribArray(u32),
    VertexAttribPointer(VertexAttribute),
    GenBuffer(BufferId),
    BindBuffer {
        target: BufferTarget,
        buffer: BufferId,
    },
    BufferData {
        target: BufferTarget,
        size: usize,
        usage: BufferUsage,
    },
    DeleteBuffer(BufferId),
    GenFramebuffer(FramebufferId),
    BindFramebuffer(FramebufferId),
    FramebufferTexture2D {
        attachment: Attachment,
        texture: Option<TextureId>,
    },
    DeleteFramebuffer(FramebufferId),
    Viewport {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Scissor {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    CullFace(Face),
    FrontFace(FrontFace),
    LineWidth(f32),
    DepthMask(bool),
    DepthFunc(CompareFunction),
    StencilFunc {
        face: Option<Face>,
        function: CompareFunction,
        reference: u32,
        read_mask: u8,
    },
    StencilOp {
        face: Option<Face>,
        fail: StencilOperation,
        depth_fail: StencilOperation,
        pass: StencilOperation,
    },
    StencilMask {
        face: Option<Face>,
        write_mask: u8,
    },
    ClearColor([f32; 4]),
    ClearDepth(f32),
    ClearStencil(u32),
    Clear(ClearMask),
    DrawArrays {
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
    },
    DrawElements {
        topology: PrimitiveTopology,
        format: IndexFormat,
        count: u32,
        offset: u64,
    },
}

impl DriverCall {
    /// Whether this call is a draw.
    pub fn is_draw(&self) -> bool {
        matches!(self, DriverCall::DrawArrays { .. } | DriverCall::DrawElements { .. })
    }
}

/// Simulated server-side state.
#[derive(Debug, Default)]
struct MockState {
    program: Option<ProgramId>,
    active_unit: u32,
    bound_textures: HashMap<u32, TextureId>,
    vao: VaoId,
    /// Enabled attribute arrays per VAO.
    vao_attribs: HashMap<VaoId, VertexAttribFlags>,
    framebuffer: FramebufferId,
    depth_write: bool,
    next_id: u32,
}

/// Mock implementation of [`GlDriver`] for testing.
///
/// Methods take `&self` but record into `Mutex`-guarded vectors so the mock is
/// `Send + Sync` like any real driver.
///
/// # Example
///
/// ```rust
/// use kiln_test_utils::{Capability, DriverCall, GlDriver, MockDriver};
///
/// let driver = MockDriver::new();
/// driver.enable(Capability::Blend);
///
/// assert_eq!(driver.calls(), vec![DriverCall::Enable(Capability::Blend)]);
/// ```
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    state: Mutex<MockState>,
    shareable_vao: bool,
}

impl MockDriver {
    /// Create a mock driver without shareable VAO support.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(MockState {
                depth_write: true,
                next_id: 1,
                ..Default::default()
            }),
            shareable_vao: false,
        }
    }

    /// Builder: report shareable VAO support.
    pub fn with_shareable_vao(mut self, supported: bool) -> Self {
        self.shareable_vao = supported;
        self
    }

    /// Get a copy of all recorded calls.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls (useful between test steps). Simulated state is kept.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Get total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Count recorded calls matching `predicate`.
    pub fn count_where(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Count `use_program` calls.
    pub fn count_use_program(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::UseProgram(_)))
    }

    /// Count `bind_texture` calls.
    pub fn count_bind_texture(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::BindTexture { .. }))
    }

    /// Count `active_texture` calls.
    pub fn count_active_texture(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::ActiveTexture(_)))
    }

    /// Count `blend_func` calls.
    pub fn count_blend_func(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::BlendFunc { .. }))
    }

    /// Count draw calls of either kind.
    pub fn count_draws(&self) -> usize {
        self.count_where(DriverCall::is_draw)
    }

    /// Count `bind_framebuffer` calls.
    pub fn count_bind_framebuffer(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::BindFramebuffer(_)))
    }

    /// Count `framebuffer_texture_2d` calls (attach and detach).
    pub fn count_framebuffer_attach(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::FramebufferTexture2D { .. }))
    }

    /// Count `clear` calls.
    pub fn count_clear(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::Clear(_)))
    }

    /// Count `buffer_data` uploads.
    pub fn count_buffer_data(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::BufferData { .. }))
    }

    /// Count `depth_mask` calls.
    pub fn count_depth_mask(&self) -> usize {
        self.count_where(|call| matches!(call, DriverCall::DepthMask(_)))
    }

    /// Index or vertex counts of every draw call, in submission order.
    pub fn draws(&self) -> Vec<u32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::DrawElements { count, .. } => Some(*count),
                DriverCall::DrawArrays { count, .. } => Some(*count),
                _ => None,
            })
            .collect()
    }

    /// Texture bound to `unit`, if any.
    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.state.lock().bound_textures.get(&unit).copied()
    }

    /// Currently bound framebuffer.
    pub fn bound_framebuffer(&self) -> FramebufferId {
        self.state.lock().framebuffer
    }

    /// Current depth write mask.
    pub fn depth_write(&self) -> bool {
        self.state.lock().depth_write
    }

    /// Change the enabled attributes of the bound VAO without recording a call,
    /// as foreign code sharing the context would.
    pub fn set_enabled_vertex_attribs_untracked(&self, flags: VertexAttribFlags) {
        let mut state = self.state.lock();
        let vao = state.vao;
        state.vao_attribs.insert(vao, flags);
    }

    /// Bind a program without recording a call, as foreign code sharing the context would.
    pub fn set_program_untracked(&self, program: Option<ProgramId>) {
        self.state.lock().program = program;
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }

    fn next_id(&self) -> u32 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        id
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl GlDriver for MockDriver {
    fn supports_shareable_vao(&self) -> bool {
        self.shareable_vao
    }

    fn enable(&self, capability: Capability) {
        self.record(DriverCall::Enable(capability));
    }

    fn disable(&self, capability: Capability) {
        self.record(DriverCall::Disable(capability));
    }

    fn use_program(&self, program: ProgramId) {
        self.state.lock().program = (!program.is_none()).then_some(program);
        self.record(DriverCall::UseProgram(program));
    }

    fn delete_program(&self, program: ProgramId) {
        {
            let mut state = self.state.lock();
            if state.program == Some(program) {
                state.program = None;
            }
        }
        self.record(DriverCall::DeleteProgram(program));
    }

    fn current_program(&self) -> Option<ProgramId> {
        self.state.lock().program
    }

    fn active_texture(&self, unit: u32) {
        self.state.lock().active_unit = unit;
        self.record(DriverCall::ActiveTexture(unit));
    }

    fn bind_texture(&self, target: TextureTarget, texture: TextureId) {
        {
            let mut state = self.state.lock();
            let unit = state.active_unit;
            state.bound_textures.insert(unit, texture);
        }
        self.record(DriverCall::BindTexture { target, texture });
    }

    fn delete_texture(&self, texture: TextureId) {
        self.state
            .lock()
            .bound_textures
            .retain(|_, bound| *bound != texture);
        self.record(DriverCall::DeleteTexture(texture));
    }

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        self.record(DriverCall::BlendFunc { src, dst });
    }

    fn blend_equation(&self, operation: BlendOperation) {
        self.record(DriverCall::BlendEquation(operation));
    }

    fn gen_vertex_array(&self) -> VaoId {
        let vao = VaoId(self.next_id());
        self.record(DriverCall::GenVertexArray(vao));
        vao
    }

    fn bind_vertex_array(&self, vao: VaoId) {
        self.state.lock().vao = vao;
        self.record(DriverCall::BindVertexArray(vao));
    }

    fn delete_vertex_array(&self, vao: VaoId) {
        {
            let mut state = self.state.lock();
            state.vao_attribs.remove(&vao);
            if state.vao == vao {
                state.vao = VaoId::DEFAULT;
            }
        }
        self.record(DriverCall::DeleteVertexArray(vao));
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        {
            let mut state = self.state.lock();
            let vao = state.vao;
            let flags = state.vao_attribs.entry(vao).or_default();
            flags.insert(VertexAttribFlags::from_bits_retain(1 << index));
        }
        self.record(DriverCall::EnableVertexAttribArray(index));
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        {
            let mut state = self.state.lock();
            let vao = state.vao;
            let flags = state.vao_attribs.entry(vao).or_default();
            flags.remove(VertexAttribFlags::from_bits_retain(1 << index));
        }
        self.record(DriverCall::DisableVertexAttribArray(index));
    }

    fn vertex_attrib_pointer(&self, attribute: &VertexAttribute) {
        self.record(DriverCall::VertexAttribPointer(*attribute));
    }

    fn enabled_vertex_attribs(&self) -> VertexAttribFlags {
        let state = self.state.lock();
        state.vao_attribs.get(&state.vao).copied().unwrap_or_default()
    }

    fn gen_buffer(&self) -> BufferId {
        let buffer = BufferId(self.next_id());
        self.record(DriverCall::GenBuffer(buffer));
        buffer
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: BufferId) {
        self.record(DriverCall::BindBuffer { target, buffer });
    }

    fn buffer_data(&self, target: BufferTarget, data: &[u8], usage: BufferUsage) {
        self.record(DriverCall::BufferData {
            target,
            size: data.len(),
            usage,
        });
    }

    fn delete_buffer(&self, buffer: BufferId) {
        self.record(DriverCall::DeleteBuffer(buffer));
    }

    fn default_framebuffer(&self) -> FramebufferId {
        FramebufferId::NONE
    }

    fn gen_framebuffer(&self) -> FramebufferId {
        let framebuffer = FramebufferId(self.next_id());
        self.record(DriverCall::GenFramebuffer(framebuffer));
        framebuffer
    }

    fn bind_framebuffer(&self, framebuffer: FramebufferId) {
        self.state.lock().framebuffer = framebuffer;
        self.record(DriverCall::BindFramebuffer(framebuffer));
    }

    fn framebuffer_texture_2d(&self, attachment: Attachment, texture: Option<TextureId>) {
        self.record(DriverCall::FramebufferTexture2D {
            attachment,
            texture,
        });
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        {
            let mut state = self.state.lock();
            if state.framebuffer == framebuffer {
                state.framebuffer = FramebufferId::NONE;
            }
        }
        self.record(DriverCall::DeleteFramebuffer(framebuffer));
    }

    fn viewport(&self, x: i32, y: i32, width: u32, height: u32) {
        self.record(DriverCall::Viewport {
            x,
            y,
            width,
            height,
        });
    }

    fn scissor(&self, x: i32, y: i32, width: u32, height: u32) {
        self.record(DriverCall::Scissor {
            x,
            y,
            width,
            height,
        });
    }

    fn cull_face(&self, face: Face) {
        self.record(DriverCall::CullFace(face));
    }

    fn front_face(&self, winding: FrontFace) {
        self.record(DriverCall::FrontFace(winding));
    }

    fn line_width(&self, width: f32) {
        self.record(DriverCall::LineWidth(width));
    }

    fn depth_mask(&self, write: bool) {
        self.state.lock().depth_write = write;
        self.record(DriverCall::DepthMask(write));
    }

    fn depth_func(&self, function: CompareFunction) {
        self.record(DriverCall::DepthFunc(function));
    }

    fn stencil_func(&self, function: CompareFunction, reference: u32, read_mask: u8) {
        self.record(DriverCall::StencilFunc {
            face: None,
            function,
            reference,
            read_mask,
        });
    }

    fn stencil_func_separate(&self, face: Face, function: CompareFunction, reference: u32, read_mask: u8) {
        self.record(DriverCall::StencilFunc {
            face: Some(face),
            function,
            reference,
            read_mask,
        });
    }

    fn stencil_op(&self, fail: StencilOperation, depth_fail: StencilOperation, pass: StencilOperation) {
        self.record(DriverCall::StencilOp {
            face: None,
            fail,
            depth_fail,
            pass,
        });
    }

    fn stencil_op_separate(
        &self,
        face: Face,
        fail: StencilOperation,
        depth_fail: StencilOperation,
        pass: StencilOperation,
    ) {
        self.record(DriverCall::StencilOp {
            face: Some(face),
            fail,
            depth_fail,
            pass,
        });
    }

    fn stencil_mask(&self, write_mask: u8) {
        self.record(DriverCall::StencilMask {
            face: None,
            write_mask,
        });
    }

    fn stencil_mask_separate(&self, face: Face, write_mask: u8) {
        self.record(DriverCall::StencilMask {
            face: Some(face),
            write_mask,
        });
    }

    fn clear_color(&self, rgba: [f32; 4]) {
        self.record(DriverCall::ClearColor(rgba));
    }

    fn clear_depth(&self, depth: f32) {
        self.record(DriverCall::ClearDepth(depth));
    }

    fn clear_stencil(&self, stencil: u32) {
        self.record(DriverCall::ClearStencil(stencil));
    }

    fn clear(&self, mask: ClearMask) {
        self.record(DriverCall::Clear(mask));
    }

    fn draw_arrays(&self, topology: PrimitiveTopology, first: u32, count: u32) {
        self.record(DriverCall::DrawArrays {
            topology,
            first,
            count,
        });
    }

    fn draw_elements(&self, topology: PrimitiveTopology, format: IndexFormat, count: u32, offset: u64) {
        self.record(DriverCall::DrawElements {
            topology,
            format,
            count,
            offset,
        });
    }
}
