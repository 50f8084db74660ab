//! GL-style command buffer.
//!
//! Translates renderer requests into driver calls. Raster state (depth,
//! stencil, cull, viewport, scissor...) is cached here; binding state goes
//! through the shared [`GlStateCache`]. Framebuffers are managed per render
//! pass: a pass whose attachments match the current one keeps the bound
//! framebuffer and only re-runs its clears.

use crate::blend::BlendFunc;
use crate::depth_stencil::DepthStencilState;
use crate::gl_state::GlStateCache;
use crate::render_pass::{MAX_COLOR_ATTACHMENTS, RenderPassDescriptor};
use crate::state_cache::StateTracker;
use bitflags::bitflags;
use kiln_core::profiling::profile_function;
use kiln_test_utils::{
    Attachment, BufferId, BufferTarget, BufferUsage, Capability, ClearMask, FramebufferId, GlDriver, ProgramId,
    TextureId, VaoId, VertexAttribFlags, VertexAttribute,
};
use std::sync::Arc;
use wgpu::{CompareFunction, Face, FrontFace, IndexFormat, PrimitiveTopology, StencilOperation};

/// Stencil comparison for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFunc {
    pub compare: CompareFunction,
    pub reference: u32,
    pub read_mask: u8,
}

/// Stencil operations for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilOps {
    pub fail: StencilOperation,
    pub depth_fail: StencilOperation,
    pub pass: StencilOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ScissorState {
    enabled: bool,
    rect: Viewport,
}

bitflags! {
    /// Attachments currently bound to the generated framebuffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct AttachedFlags: u8 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
        const COLOR0 = 1 << 2;
        const COLOR1 = 1 << 3;
        const COLOR2 = 1 << 4;
        const COLOR3 = 1 << 5;
    }
}

impl AttachedFlags {
    fn color(slot: usize) -> Self {
        Self::from_bits_retain(Self::COLOR0.bits() << slot)
    }
}

/// Last raster state sent to the driver; `None` is unknown.
#[derive(Debug, Default)]
struct RasterCache {
    depth_test: Option<bool>,
    depth_mask: Option<bool>,
    depth_func: Option<CompareFunction>,
    clear_depth: Option<f32>,
    stencil_test: Option<bool>,
    stencil_func: Option<StencilFunc>,
    stencil_op: Option<StencilOps>,
    stencil_mask: Option<u8>,
    /// Back then front.
    stencil_func_separate: Option<(StencilFunc, StencilFunc)>,
    stencil_op_separate: Option<(StencilOps, StencilOps)>,
    stencil_mask_separate: Option<(u8, u8)>,
    cull_mode: Option<Option<Face>>,
    winding: Option<FrontFace>,
    line_width: Option<f32>,
}

/// Command buffer for one GL context.
pub struct CommandBuffer {
    driver: Arc<dyn GlDriver>,
    state_cache: Arc<GlStateCache>,
    raster: RasterCache,
    viewport: StateTracker<Viewport>,
    scissor: StateTracker<ScissorState>,

    pass_descriptor: Option<RenderPassDescriptor>,
    default_fbo: FramebufferId,
    generated_fbo: Option<FramebufferId>,
    current_fbo: Option<FramebufferId>,
    attached: AttachedFlags,

    depth_stencil_state: Option<Arc<DepthStencilState>>,
    stencil_ref_front: u32,
    stencil_ref_back: u32,

    vertex_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
}

impl CommandBuffer {
    pub fn new(state_cache: Arc<GlStateCache>) -> Self {
        let driver = Arc::clone(state_cache.driver());
        let default_fbo = driver.default_framebuffer();

        Self {
            driver,
            state_cache,
            raster: RasterCache::default(),
            viewport: StateTracker::default(),
            scissor: StateTracker::default(),
            pass_descriptor: None,
            default_fbo,
            generated_fbo: None,
            current_fbo: None,
            attached: AttachedFlags::empty(),
            depth_stencil_state: None,
            stencil_ref_front: 0,
            stencil_ref_back: 0,
            vertex_buffer: None,
            index_buffer: None,
        }
    }

    pub fn state_cache(&self) -> &Arc<GlStateCache> {
        &self.state_cache
    }

    pub fn driver(&self) -> &Arc<dyn GlDriver> {
        &self.driver
    }

    /// The framebuffer bound by the last render pass switch.
    pub fn current_framebuffer(&self) -> Option<FramebufferId> {
        self.current_fbo
    }

    pub fn pass_descriptor(&self) -> Option<&RenderPassDescriptor> {
        self.pass_descriptor.as_ref()
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.state()
    }

    /// Forget every cached value after the GL context was lost or recreated.
    ///
    /// GL objects created by this buffer died with the context and are
    /// recreated on demand.
    pub fn invalidate(&mut self) {
        self.raster = RasterCache::default();
        self.viewport.invalidate();
        self.scissor.invalidate();
        self.pass_descriptor = None;
        self.generated_fbo = None;
        self.current_fbo = None;
        self.attached = AttachedFlags::empty();
        self.vertex_buffer = None;
        self.index_buffer = None;
        self.state_cache.invalidate_state_cache();
    }

    // Render passes

    /// Start a render pass described by `desc`.
    ///
    /// The framebuffer setup only runs when `desc` differs from the current
    /// pass in more than its clear values. The clears always run.
    pub fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        profile_function!();
        let reuse = self
            .pass_descriptor
            .as_ref()
            .is_some_and(|current| current.equal_except_clear(desc));

        if !reuse {
            if let Some(current) = &self.pass_descriptor {
                tracing::debug!("render pass switch: {}", current.diff(desc));
            }
            self.apply_framebuffer(desc);
        }

        self.pass_descriptor = Some(*desc);
        self.apply_clear(desc);
    }

    fn apply_framebuffer(&mut self, desc: &RenderPassDescriptor) {
        let use_depth = desc.depth_test_enabled && desc.depth_attachment.is_some();
        let use_stencil = desc.stencil_test_enabled && desc.stencil_attachment.is_some();
        let use_generated = desc.uses_external_attachment();

        let fbo = if use_generated {
            *self.generated_fbo.get_or_insert_with(|| self.driver.gen_framebuffer())
        } else {
            self.default_fbo
        };
        self.driver.bind_framebuffer(fbo);
        self.current_fbo = Some(fbo);

        if use_depth {
            self.attach(Attachment::Depth, desc.depth_attachment.map(|a| a.texture), AttachedFlags::DEPTH);
        } else if use_generated {
            self.detach(Attachment::Depth, AttachedFlags::DEPTH);
        }

        if use_stencil {
            self.attach(
                Attachment::Stencil,
                desc.stencil_attachment.map(|a| a.texture),
                AttachedFlags::STENCIL,
            );
        } else if use_generated {
            self.detach(Attachment::Stencil, AttachedFlags::STENCIL);
        }

        for slot in 0..MAX_COLOR_ATTACHMENTS {
            let attachment = Attachment::Color(slot as u32);
            let flag = AttachedFlags::color(slot);
            match desc.color_attachments[slot] {
                Some(texture) if desc.need_color_attachment => {
                    self.attach(attachment, Some(texture.texture), flag);
                }
                _ if use_generated => self.detach(attachment, flag),
                _ => {}
            }
        }

        // Clears honour viewport and scissor
        if let Some(color) = desc.color_attachments[0] {
            self.set_viewport(0, 0, color.width, color.height);
            self.set_scissor_rect(false, 0, 0, 0, 0);
        }
    }

    fn attach(&mut self, attachment: Attachment, texture: Option<TextureId>, flag: AttachedFlags) {
        self.driver.framebuffer_texture_2d(attachment, texture);
        self.attached.insert(flag);
    }

    fn detach(&mut self, attachment: Attachment, flag: AttachedFlags) {
        if self.attached.contains(flag) {
            self.driver.framebuffer_texture_2d(attachment, None);
            self.attached.remove(flag);
        }
    }

    fn apply_clear(&mut self, desc: &RenderPassDescriptor) {
        let mut mask = ClearMask::empty();

        if desc.need_clear_color {
            mask |= ClearMask::COLOR;
            self.driver.clear_color(desc.clear_color);
        }

        let old_depth_write = self.raster.depth_mask;
        let old_clear_depth = self.raster.clear_depth;
        if desc.need_clear_depth {
            mask |= ClearMask::DEPTH;
            self.set_clear_depth(desc.clear_depth);
            // Depth clears are masked by the depth write flag
            self.set_depth_mask(true);
        }

        if desc.need_clear_stencil {
            mask |= ClearMask::STENCIL;
            self.driver.clear_stencil(desc.clear_stencil);
        }

        if !mask.is_empty() {
            self.driver.clear(mask);
        }

        if desc.need_clear_depth {
            if old_depth_write == Some(false) {
                self.set_depth_mask(false);
            }
            if let Some(old) = old_clear_depth
                && old.to_bits() != desc.clear_depth.to_bits()
            {
                self.set_clear_depth(old);
            }
        }
    }

    // Bindings

    // Redundant program and texture binds are elided by the state cache alone

    pub fn use_program(&mut self, program: ProgramId) {
        self.state_cache.use_program(program);
    }

    pub fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.state_cache.bind_texture_2d_n(unit, texture);
    }

    pub fn set_blend_func(&mut self, blend: BlendFunc) {
        self.state_cache.blend_func(blend.src, blend.dst);
    }

    /// Select the depth-stencil state applied before each draw. `None` disables both tests.
    pub fn set_depth_stencil_state(&mut self, state: Option<Arc<DepthStencilState>>) {
        let same = match (&self.depth_stencil_state, &state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.depth_stencil_state = state;
        }
    }

    pub fn set_stencil_reference_value(&mut self, front: u32, back: u32) {
        self.stencil_ref_front = front;
        self.stencil_ref_back = back;
    }

    // Buffers

    /// Upload interleaved vertex data into this buffer's vertex buffer.
    pub fn set_vertex_buffer_data(&mut self, data: &[u8]) {
        let buffer = *self.vertex_buffer.get_or_insert_with(|| self.driver.gen_buffer());
        self.driver.bind_buffer(BufferTarget::Array, buffer);
        self.driver.buffer_data(BufferTarget::Array, data, BufferUsage::Dynamic);
    }

    /// Upload index data into this buffer's index buffer.
    pub fn set_index_buffer_data(&mut self, data: &[u8]) {
        let buffer = *self.index_buffer.get_or_insert_with(|| self.driver.gen_buffer());
        self.driver.bind_buffer(BufferTarget::ElementArray, buffer);
        self.driver.buffer_data(BufferTarget::ElementArray, data, BufferUsage::Dynamic);
    }

    /// Enable `flags` on the default VAO and point each attribute into the vertex buffer.
    pub fn set_vertex_layout(&mut self, flags: VertexAttribFlags, attributes: &[VertexAttribute]) {
        self.state_cache.enable_vertex_attribs(flags, VaoId::DEFAULT);
        for attribute in attributes {
            self.driver.vertex_attrib_pointer(attribute);
        }
    }

    // Rasterizer

    pub fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport.update_state(Viewport { x, y, width, height });
        if self.viewport.state_changed() {
            self.driver.viewport(x, y, width, height);
        }
    }

    pub fn set_scissor_rect(&mut self, enabled: bool, x: i32, y: i32, width: u32, height: u32) {
        self.scissor.update_state(ScissorState {
            enabled,
            rect: Viewport { x, y, width, height },
        });
        if !self.scissor.state_changed() {
            return;
        }

        if enabled {
            self.driver.enable(Capability::ScissorTest);
            self.driver.scissor(x, y, width, height);
        } else {
            self.driver.disable(Capability::ScissorTest);
        }
    }

    /// Cull `mode` faces; `None` disables culling.
    pub fn set_cull_mode(&mut self, mode: Option<Face>) {
        if self.raster.cull_mode == Some(mode) {
            return;
        }
        self.raster.cull_mode = Some(mode);

        match mode {
            Some(face) => {
                self.driver.enable(Capability::CullFace);
                self.driver.cull_face(face);
            }
            None => self.driver.disable(Capability::CullFace),
        }
    }

    pub fn set_winding(&mut self, winding: FrontFace) {
        if self.raster.winding != Some(winding) {
            self.raster.winding = Some(winding);
            self.driver.front_face(winding);
        }
    }

    /// Set the line width; non-positive widths fall back to 1.
    pub fn set_line_width(&mut self, width: f32) {
        if self.raster.line_width == Some(width) {
            return;
        }
        self.raster.line_width = Some(width);
        self.driver.line_width(if width > 0.0 { width } else { 1.0 });
    }

    // Depth and stencil

    pub fn set_depth_test(&mut self, enabled: bool) {
        if self.raster.depth_test != Some(enabled) {
            self.raster.depth_test = Some(enabled);
            self.toggle(Capability::DepthTest, enabled);
        }
    }

    pub fn set_depth_mask(&mut self, write: bool) {
        if self.raster.depth_mask != Some(write) {
            self.raster.depth_mask = Some(write);
            self.driver.depth_mask(write);
        }
    }

    pub fn set_depth_func(&mut self, function: CompareFunction) {
        if self.raster.depth_func != Some(function) {
            self.raster.depth_func = Some(function);
            self.driver.depth_func(function);
        }
    }

    pub fn set_clear_depth(&mut self, depth: f32) {
        if self.raster.clear_depth.map(f32::to_bits) != Some(depth.to_bits()) {
            self.raster.clear_depth = Some(depth);
            self.driver.clear_depth(depth);
        }
    }

    pub fn set_stencil_test(&mut self, enabled: bool) {
        if self.raster.stencil_test != Some(enabled) {
            self.raster.stencil_test = Some(enabled);
            self.toggle(Capability::StencilTest, enabled);
        }
    }

    pub fn set_stencil_func(&mut self, func: StencilFunc) {
        if self.raster.stencil_func != Some(func) {
            self.raster.stencil_func = Some(func);
            self.raster.stencil_func_separate = None;
            self.driver.stencil_func(func.compare, func.reference, func.read_mask);
        }
    }

    pub fn set_stencil_op(&mut self, ops: StencilOps) {
        if self.raster.stencil_op != Some(ops) {
            self.raster.stencil_op = Some(ops);
            self.raster.stencil_op_separate = None;
            self.driver.stencil_op(ops.fail, ops.depth_fail, ops.pass);
        }
    }

    pub fn set_stencil_mask(&mut self, write_mask: u8) {
        if self.raster.stencil_mask != Some(write_mask) {
            self.raster.stencil_mask = Some(write_mask);
            self.raster.stencil_mask_separate = None;
            self.driver.stencil_mask(write_mask);
        }
    }

    pub fn set_stencil_func_separate(&mut self, back: StencilFunc, front: StencilFunc) {
        if self.raster.stencil_func_separate != Some((back, front)) {
            self.raster.stencil_func_separate = Some((back, front));
            self.raster.stencil_func = None;
            self.driver
                .stencil_func_separate(Face::Back, back.compare, back.reference, back.read_mask);
            self.driver
                .stencil_func_separate(Face::Front, front.compare, front.reference, front.read_mask);
        }
    }

    pub fn set_stencil_op_separate(&mut self, back: StencilOps, front: StencilOps) {
        if self.raster.stencil_op_separate != Some((back, front)) {
            self.raster.stencil_op_separate = Some((back, front));
            self.raster.stencil_op = None;
            self.driver
                .stencil_op_separate(Face::Back, back.fail, back.depth_fail, back.pass);
            self.driver
                .stencil_op_separate(Face::Front, front.fail, front.depth_fail, front.pass);
        }
    }

    pub fn set_stencil_mask_separate(&mut self, back: u8, front: u8) {
        if self.raster.stencil_mask_separate != Some((back, front)) {
            self.raster.stencil_mask_separate = Some((back, front));
            self.raster.stencil_mask = None;
            self.driver.stencil_mask_separate(Face::Back, back);
            self.driver.stencil_mask_separate(Face::Front, front);
        }
    }

    // Drawing

    pub fn draw_arrays(&mut self, topology: PrimitiveTopology, first: u32, count: u32) {
        if count == 0 {
            return;
        }
        self.prepare_drawing();
        self.driver.draw_arrays(topology, first, count);
    }

    /// Draw `count` indices starting `offset` bytes into the index buffer.
    pub fn draw_elements(&mut self, topology: PrimitiveTopology, format: IndexFormat, count: u32, offset: u64) {
        if count == 0 {
            return;
        }
        self.prepare_drawing();
        self.driver.draw_elements(topology, format, count, offset);
    }

    fn prepare_drawing(&mut self) {
        match self.depth_stencil_state.clone() {
            Some(state) => state.apply(self.stencil_ref_front, self.stencil_ref_back, self),
            None => {
                self.set_depth_test(false);
                self.set_stencil_test(false);
            }
        }
    }

    fn toggle(&self, capability: Capability, enabled: bool) {
        if enabled {
            self.driver.enable(capability);
        } else {
            self.driver.disable(capability);
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if let Some(fbo) = self.generated_fbo.take() {
            self.driver.delete_framebuffer(fbo);
        }
        for buffer in [self.vertex_buffer.take(), self.index_buffer.take()].into_iter().flatten() {
            self.driver.delete_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateCacheConfig;
    use crate::depth_stencil::{DepthStencilDescriptor, DepthStencilStateCache, StencilDescriptor};
    use crate::render_pass::AttachmentTexture;
    use kiln_test_utils::{DriverCall, MockDriver, TextureTarget};

    fn setup() -> (Arc<MockDriver>, CommandBuffer) {
        let driver = Arc::new(MockDriver::new());
        let cache = Arc::new(GlStateCache::new(
            Arc::clone(&driver) as Arc<dyn GlDriver>,
            StateCacheConfig::default(),
        ));
        (driver, CommandBuffer::new(cache))
    }

    fn target(id: u32) -> AttachmentTexture {
        AttachmentTexture::new(TextureId(id), 320, 240)
    }

    #[test]
    fn test_raster_setters_are_cached() {
        let (driver, mut cb) = setup();

        cb.set_depth_test(true);
        cb.set_depth_test(true);
        cb.set_depth_func(CompareFunction::LessEqual);
        cb.set_depth_func(CompareFunction::LessEqual);
        cb.set_winding(FrontFace::Cw);
        cb.set_winding(FrontFace::Cw);
        cb.set_viewport(0, 0, 10, 10);
        cb.set_viewport(0, 0, 10, 10);

        assert_eq!(driver.call_count(), 4);
    }

    #[test]
    fn test_line_width_falls_back_to_one() {
        let (driver, mut cb) = setup();
        cb.set_line_width(0.0);
        assert_eq!(driver.calls(), vec![DriverCall::LineWidth(1.0)]);
    }

    #[test]
    fn test_cull_mode_none_disables() {
        let (driver, mut cb) = setup();
        cb.set_cull_mode(Some(Face::Back));
        cb.set_cull_mode(None);
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Enable(Capability::CullFace),
                DriverCall::CullFace(Face::Back),
                DriverCall::Disable(Capability::CullFace),
            ]
        );
    }

    #[test]
    fn test_clear_only_change_reuses_framebuffer() {
        let (driver, mut cb) = setup();
        let red = RenderPassDescriptor::default().with_clear_color([1.0, 0.0, 0.0, 1.0]);
        let blue = RenderPassDescriptor::default().with_clear_color([0.0, 0.0, 1.0, 1.0]);

        cb.begin_render_pass(&red);
        assert_eq!(driver.count_bind_framebuffer(), 1);
        assert_eq!(driver.bound_framebuffer(), FramebufferId::NONE);

        driver.clear_calls();
        cb.begin_render_pass(&blue);
        assert_eq!(driver.count_bind_framebuffer(), 0);
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::ClearColor([0.0, 0.0, 1.0, 1.0]),
                DriverCall::Clear(ClearMask::COLOR),
            ]
        );
    }

    #[test]
    fn test_external_attachment_uses_generated_framebuffer() {
        let (driver, mut cb) = setup();
        let offscreen = RenderPassDescriptor::default().with_color_attachment(target(5));

        cb.begin_render_pass(&offscreen);
        let generated = cb.current_framebuffer();
        assert!(generated.is_some_and(|fbo| !fbo.is_none()));
        assert_eq!(cb.viewport(), Viewport { x: 0, y: 0, width: 320, height: 240 });
        assert!(driver.calls().contains(&DriverCall::FramebufferTexture2D {
            attachment: Attachment::Color(0),
            texture: Some(TextureId(5)),
        }));

        cb.begin_render_pass(&RenderPassDescriptor::default());
        assert_eq!(cb.current_framebuffer(), Some(FramebufferId::NONE));

        // The generated framebuffer is created once and reused
        cb.begin_render_pass(&offscreen);
        assert_eq!(cb.current_framebuffer(), generated);
        assert_eq!(driver.count_where(|c| matches!(c, DriverCall::GenFramebuffer(_))), 1);
    }

    #[test]
    fn test_unused_depth_attachment_is_detached() {
        let (driver, mut cb) = setup();
        let with_depth = RenderPassDescriptor::default()
            .with_color_attachment(target(5))
            .with_depth_attachment(target(6));
        let color_only = RenderPassDescriptor::default().with_color_attachment(target(5));

        cb.begin_render_pass(&with_depth);
        driver.clear_calls();
        cb.begin_render_pass(&color_only);

        let calls = driver.calls();
        assert!(calls.contains(&DriverCall::FramebufferTexture2D {
            attachment: Attachment::Depth,
            texture: None,
        }));
        // Stencil was never attached, so nothing to detach
        assert!(!calls.contains(&DriverCall::FramebufferTexture2D {
            attachment: Attachment::Stencil,
            texture: None,
        }));
    }

    #[test]
    fn test_depth_clear_restores_depth_mask() {
        let (driver, mut cb) = setup();
        cb.set_depth_mask(false);
        cb.set_clear_depth(0.5);
        driver.clear_calls();

        cb.begin_render_pass(&RenderPassDescriptor::default().with_clear_depth(1.0));

        assert_eq!(
            driver.calls()[1..],
            [
                DriverCall::ClearDepth(1.0),
                DriverCall::DepthMask(true),
                DriverCall::Clear(ClearMask::DEPTH),
                DriverCall::DepthMask(false),
                DriverCall::ClearDepth(0.5),
            ]
        );
        assert!(!driver.depth_write());
    }

    #[test]
    fn test_depth_stencil_apply_equal_faces() {
        let (driver, mut cb) = setup();
        let face = StencilDescriptor {
            compare: CompareFunction::Equal,
            read_mask: 0xff,
            write_mask: 0x0f,
            ..Default::default()
        };
        let desc = DepthStencilDescriptor {
            stencil_test: true,
            front: face,
            back: face,
            ..Default::default()
        };
        let states = DepthStencilStateCache::default();
        cb.set_depth_stencil_state(Some(states.get_or_create_state(&desc)));
        cb.set_stencil_reference_value(1, 2);

        cb.draw_arrays(PrimitiveTopology::TriangleList, 0, 3);

        let calls = driver.calls();
        assert!(calls.contains(&DriverCall::StencilFunc {
            face: None,
            function: CompareFunction::Equal,
            reference: 1,
            read_mask: 0xff,
        }));
        assert!(calls.contains(&DriverCall::StencilMask {
            face: None,
            write_mask: 0x0f,
        }));
        assert_eq!(driver.count_draws(), 1);
    }

    #[test]
    fn test_depth_stencil_apply_separate_faces() {
        let (driver, mut cb) = setup();
        let desc = DepthStencilDescriptor {
            stencil_test: true,
            back: StencilDescriptor {
                compare: CompareFunction::Never,
                ..Default::default()
            },
            ..Default::default()
        };
        let states = DepthStencilStateCache::default();
        cb.set_depth_stencil_state(Some(states.get_or_create_state(&desc)));
        cb.set_stencil_reference_value(1, 2);
        cb.draw_arrays(PrimitiveTopology::TriangleList, 0, 3);

        let funcs: Vec<_> = driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, DriverCall::StencilFunc { .. }))
            .collect();
        assert_eq!(
            funcs,
            vec![
                DriverCall::StencilFunc {
                    face: Some(Face::Back),
                    function: CompareFunction::Never,
                    reference: 2,
                    read_mask: 0,
                },
                DriverCall::StencilFunc {
                    face: Some(Face::Front),
                    function: CompareFunction::Always,
                    reference: 1,
                    read_mask: 0,
                },
            ]
        );

        // A second draw with the same state issues no raster calls
        driver.clear_calls();
        cb.draw_arrays(PrimitiveTopology::TriangleList, 0, 3);
        assert_eq!(driver.call_count(), 1);
    }

    #[test]
    fn test_no_depth_stencil_state_disables_tests() {
        let (driver, mut cb) = setup();
        cb.set_depth_test(true);
        driver.clear_calls();

        cb.draw_elements(PrimitiveTopology::TriangleList, IndexFormat::Uint16, 6, 0);
        assert_eq!(driver.calls()[0], DriverCall::Disable(Capability::DepthTest));
    }

    #[test]
    fn test_empty_draw_is_skipped() {
        let (driver, mut cb) = setup();
        cb.draw_elements(PrimitiveTopology::TriangleList, IndexFormat::Uint16, 0, 0);
        assert_eq!(driver.call_count(), 0);
    }

    #[test]
    fn test_invalidate_reissues_everything() {
        let (driver, mut cb) = setup();
        let offscreen = RenderPassDescriptor::default().with_color_attachment(target(5));
        cb.begin_render_pass(&offscreen);
        cb.set_depth_test(true);
        cb.use_program(ProgramId(4));

        cb.invalidate();
        driver.clear_calls();

        cb.set_depth_test(true);
        cb.use_program(ProgramId(4));
        cb.begin_render_pass(&offscreen);

        assert_eq!(driver.count_use_program(), 1);
        assert_eq!(driver.count_bind_framebuffer(), 1);
        assert_eq!(driver.count_where(|c| matches!(c, DriverCall::GenFramebuffer(_))), 1);
        assert!(driver.calls().contains(&DriverCall::Enable(Capability::DepthTest)));
    }

    #[test]
    fn test_repeated_binds_are_elided() {
        let (driver, mut cb) = setup();
        cb.use_program(ProgramId(4));
        cb.bind_texture(0, TextureId(2));
        cb.use_program(ProgramId(4));
        cb.bind_texture(0, TextureId(2));

        assert_eq!(driver.count_use_program(), 1);
        assert_eq!(driver.count_bind_texture(), 1);
    }

    #[test]
    fn test_state_cache_invalidation_reaches_binds() {
        let (driver, mut cb) = setup();
        cb.use_program(ProgramId(1));
        cb.bind_texture(0, TextureId(1));

        // Direct driver use followed by the documented invalidate
        cb.driver().use_program(ProgramId(9));
        cb.driver().bind_texture(TextureTarget::Texture2D, TextureId(99));
        cb.state_cache().invalidate_state_cache();

        cb.use_program(ProgramId(1));
        cb.bind_texture(0, TextureId(1));
        assert_eq!(driver.current_program(), Some(ProgramId(1)));
        assert_eq!(driver.bound_texture(0), Some(TextureId(1)));
    }

    #[test]
    fn test_deleted_ids_are_bound_again() {
        let (driver, mut cb) = setup();
        cb.use_program(ProgramId(1));
        cb.bind_texture(0, TextureId(3));

        cb.state_cache().delete_program(ProgramId(1));
        cb.state_cache().delete_texture(TextureId(3));
        cb.use_program(ProgramId(1));
        cb.bind_texture(0, TextureId(3));

        assert_eq!(driver.count_use_program(), 2);
        assert_eq!(driver.count_bind_texture(), 2);
    }

    #[test]
    fn test_drop_releases_objects() {
        let (driver, mut cb) = setup();
        cb.begin_render_pass(&RenderPassDescriptor::default().with_color_attachment(target(1)));
        cb.set_vertex_buffer_data(&[0u8; 24]);
        drop(cb);

        assert_eq!(driver.count_where(|c| matches!(c, DriverCall::DeleteFramebuffer(_))), 1);
        assert_eq!(driver.count_where(|c| matches!(c, DriverCall::DeleteBuffer(_))), 1);
    }
}
