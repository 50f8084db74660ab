//! Command sorting, batching and submission.
//!
//! The renderer collects [`RenderCommand`]s into queues during the frame.
//! [`Renderer::render`] sorts every queue, then walks queue 0: geometry
//! commands are copied into one shared vertex/index array and merged into
//! batches by material, everything else breaks the current batch.
//!
//! A queue is drawn at most once per frame. A second group command naming
//! an already drawn queue is skipped with a warning, since the custom and
//! callback commands in it have already run.
//!
//! # Example
//!
//! ```
//! use kiln_render::blend::BlendFunc;
//! use kiln_render::command::{RenderCommand, V3fC4bT2f};
//! use kiln_render::config::RendererConfig;
//! use kiln_render::renderer::Renderer;
//! use kiln_test_utils::{GlDriver, MockDriver, ProgramId, TextureId};
//! use std::sync::Arc;
//!
//! let driver = Arc::new(MockDriver::new());
//! let mut renderer = Renderer::with_driver(driver.clone(), RendererConfig::default());
//!
//! renderer.begin_frame();
//! let quad = [V3fC4bT2f::default(); 4];
//! for z in 0..3 {
//!     let mut sprite = renderer.triangles_command(ProgramId(1), TextureId(1), BlendFunc::default());
//!     sprite.set_quads(&[quad]);
//!     renderer.add_command(RenderCommand::quad(z as f32, sprite)).unwrap();
//! }
//! renderer.render();
//! renderer.end_frame();
//!
//! assert_eq!(driver.count_draws(), 1);
//! ```

use crate::blend::BlendFunc;
use crate::command::{CommandKind, CommandPool, MaterialId, MeshCommand, RenderCommand, TrianglesCommand, V3fC4bT2f};
use crate::command_buffer::CommandBuffer;
use crate::config::RendererConfig;
use crate::depth_stencil::{DepthStencilDescriptor, DepthStencilState, DepthStencilStateCache};
use crate::error::RenderError;
use crate::gl_state::GlStateCache;
use crate::material::StateBlock;
use crate::queue::{RenderQueue, RenderQueueId};
use crate::render_pass::RenderPassDescriptor;
use glam::{Mat4, Vec3};
use kiln_core::profiling::{profile_function, profile_scope};
use kiln_test_utils::{GlDriver, ProgramId, TextureId};
use std::sync::Arc;
use wgpu::{CompareFunction, IndexFormat, PrimitiveTopology};

/// Largest vertex count addressable with `u16` indices.
const MAX_BATCH_VERTICES: usize = u16::MAX as usize + 1;

/// Counters for the current frame, reset by [`Renderer::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub draw_calls: usize,
    pub drawn_vertices: usize,
    /// Geometry commands copied into batches.
    pub batched_commands: usize,
}

/// A run of indices drawn with one material.
#[derive(Debug, Clone, Copy)]
struct Batch {
    material_id: MaterialId,
    program: ProgramId,
    texture: TextureId,
    blend: BlendFunc,
    index_start: usize,
    index_count: usize,
    /// Cleared for `skip_batching` commands so nothing merges into them.
    mergeable: bool,
}

/// Sorts, batches and submits render commands for one GL context.
pub struct Renderer {
    config: RendererConfig,
    command_buffer: CommandBuffer,
    depth_stencil_states: DepthStencilStateCache,

    queues: Vec<RenderQueue>,
    group_stack: Vec<RenderQueueId>,
    visiting: Vec<RenderQueueId>,
    /// Queues drawn so far this frame.
    drawn: Vec<RenderQueueId>,
    pool: CommandPool,

    vertices: Vec<V3fC4bT2f>,
    indices: Vec<u16>,
    batches: Vec<Batch>,

    render_pass: RenderPassDescriptor,
    depth_test: bool,
    frame_begun: bool,
    rendering: bool,
    stats: FrameStats,
}

impl Renderer {
    /// Create a renderer that shares `state_cache` with other command buffers of the context.
    pub fn new(state_cache: Arc<GlStateCache>, mut config: RendererConfig) -> Self {
        if config.max_vertices > MAX_BATCH_VERTICES {
            tracing::warn!(
                "max_vertices {} exceeds the u16 index range, clamping to {}",
                config.max_vertices,
                MAX_BATCH_VERTICES
            );
            config.max_vertices = MAX_BATCH_VERTICES;
        }

        tracing::debug!(
            "Creating renderer (vertices: {}, indices: {})",
            config.max_vertices,
            config.max_indices
        );

        Self {
            command_buffer: CommandBuffer::new(state_cache),
            depth_stencil_states: DepthStencilStateCache::new(config.depth_stencil_cache),
            queues: vec![RenderQueue::new()],
            group_stack: vec![RenderQueueId::DEFAULT],
            visiting: Vec::new(),
            drawn: Vec::new(),
            pool: CommandPool::default(),
            vertices: Vec::with_capacity(config.max_vertices),
            indices: Vec::with_capacity(config.max_indices),
            batches: Vec::new(),
            render_pass: RenderPassDescriptor::default(),
            depth_test: config.depth_test,
            frame_begun: false,
            rendering: false,
            stats: FrameStats::default(),
            config,
        }
    }

    /// Create a renderer with its own state cache over `driver`.
    pub fn with_driver(driver: Arc<dyn GlDriver>, config: RendererConfig) -> Self {
        let state_cache = Arc::new(GlStateCache::new(driver, config.state_cache));
        Self::new(state_cache, config)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    pub fn command_buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    pub fn depth_stencil_states(&self) -> &DepthStencilStateCache {
        &self.depth_stencil_states
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn queue(&self, id: RenderQueueId) -> Option<&RenderQueue> {
        self.queues.get(id.0)
    }

    /// Enable depth testing for the z-ordered buckets.
    pub fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    /// Pass used by [`render`](Self::render) and [`clear`](Self::clear).
    pub fn set_render_pass(&mut self, desc: RenderPassDescriptor) {
        self.render_pass = desc;
    }

    pub fn render_pass(&self) -> &RenderPassDescriptor {
        &self.render_pass
    }

    /// Forget all cached GL state after the context was lost.
    pub fn invalidate(&mut self) {
        self.command_buffer.invalidate();
    }

    // Queues

    /// Add an empty queue for group commands to reference.
    pub fn create_render_queue(&mut self) -> RenderQueueId {
        self.queues.push(RenderQueue::new());
        RenderQueueId(self.queues.len() - 1)
    }

    /// Route subsequent [`add_command`](Self::add_command) calls to `id`.
    pub fn push_group(&mut self, id: RenderQueueId) -> Result<(), RenderError> {
        if id.0 >= self.queues.len() {
            return Err(RenderError::InvalidQueue(id));
        }
        self.group_stack.push(id);
        Ok(())
    }

    pub fn pop_group(&mut self) -> Result<RenderQueueId, RenderError> {
        if self.group_stack.len() <= 1 {
            return Err(RenderError::EmptyGroupStack);
        }
        self.group_stack.pop().ok_or(RenderError::EmptyGroupStack)
    }

    /// Queue on top of the group stack.
    pub fn current_queue(&self) -> RenderQueueId {
        self.group_stack.last().copied().unwrap_or(RenderQueueId::DEFAULT)
    }

    pub fn add_command(&mut self, command: RenderCommand) -> Result<(), RenderError> {
        self.add_command_to(command, self.current_queue())
    }

    /// Add `command` to queue `id`.
    ///
    /// Fails between [`render`](Self::render) and [`end_frame`](Self::end_frame).
    pub fn add_command_to(&mut self, command: RenderCommand, id: RenderQueueId) -> Result<(), RenderError> {
        if self.rendering {
            return Err(RenderError::AddWhileRendering);
        }
        self.queues
            .get_mut(id.0)
            .ok_or(RenderError::InvalidQueue(id))?
            .push(command);
        Ok(())
    }

    /// A geometry command from the pool, reusing the buffers of a previous frame.
    pub fn triangles_command(&mut self, program: ProgramId, texture: TextureId, blend: BlendFunc) -> TrianglesCommand {
        self.pool.acquire(program, texture, blend)
    }

    // Frame

    pub fn begin_frame(&mut self) {
        kiln_core::profiling::new_frame();
        self.stats = FrameStats::default();
        self.frame_begun = true;
        self.rendering = false;
    }

    /// Clear color and depth of the render pass target right away.
    pub fn clear(&mut self) {
        let desc = self
            .render_pass
            .with_clear_color(self.config.clear_color)
            .with_clear_depth(1.0);
        self.command_buffer.begin_render_pass(&desc);
    }

    /// Sort all queues and draw queue 0.
    pub fn render(&mut self) {
        profile_function!();
        if !self.frame_begun {
            tracing::warn!("render() called without begin_frame()");
            self.begin_frame();
        }
        self.rendering = true;

        self.command_buffer.begin_render_pass(&self.render_pass);
        for queue in &mut self.queues {
            queue.sort();
        }
        self.drawn.clear();

        self.visit_queue(RenderQueueId::DEFAULT);
        self.flush();
    }

    /// Return this frame's commands to the pool and reopen the queues.
    ///
    /// Commands that were added but never rendered are dropped.
    pub fn end_frame(&mut self) {
        for queue in &mut self.queues {
            for command in queue.drain() {
                self.pool.release(command);
            }
        }
        self.group_stack.truncate(1);
        self.vertices.clear();
        self.indices.clear();
        self.batches.clear();
        self.drawn.clear();
        self.frame_begun = false;
        self.rendering = false;
    }

    fn visit_queue(&mut self, id: RenderQueueId) {
        if self.visiting.contains(&id) {
            tracing::warn!("Group cycle through render queue {:?}, skipping", id);
            return;
        }
        if self.drawn.contains(&id) {
            tracing::warn!("Render queue {:?} was already drawn this frame, skipping", id);
            return;
        }
        if self.visiting.len() >= self.config.max_group_depth {
            tracing::warn!(
                "Group nesting deeper than {} at render queue {:?}, skipping",
                self.config.max_group_depth,
                id
            );
            return;
        }
        let Some(queue) = self.queues.get_mut(id.0) else {
            tracing::warn!("Group references missing render queue {:?}", id);
            return;
        };

        let (mut opaque, mut transparent) = queue.take_buckets();
        self.visiting.push(id);
        self.drawn.push(id);

        if !opaque.is_empty() {
            let state = self.bucket_state(false);
            self.process_bucket(&mut opaque, &state);
        }
        if !transparent.is_empty() {
            let state = self.bucket_state(true);
            self.process_bucket(&mut transparent, &state);
        }

        self.visiting.pop();
        if let Some(queue) = self.queues.get_mut(id.0) {
            queue.restore_buckets(opaque, transparent);
        }
    }

    fn bucket_state(&self, transparent: bool) -> Arc<DepthStencilState> {
        let desc = if self.depth_test {
            DepthStencilDescriptor::depth(CompareFunction::LessEqual, !transparent)
        } else {
            DepthStencilDescriptor::default()
        };
        self.depth_stencil_states.get_or_create_state(&desc)
    }

    fn process_bucket(&mut self, commands: &mut [RenderCommand], state: &Arc<DepthStencilState>) {
        profile_scope!("process_bucket");
        self.flush();
        self.command_buffer.set_depth_stencil_state(Some(Arc::clone(state)));

        for command in commands.iter_mut() {
            let batchable = command.is_batchable();
            match &mut command.kind {
                CommandKind::Quad(geometry) | CommandKind::Triangles(geometry) => {
                    self.queue_geometry(geometry, batchable);
                }
                CommandKind::Mesh(mesh) => {
                    self.flush();
                    self.draw_mesh(mesh);
                    self.command_buffer.set_depth_stencil_state(Some(Arc::clone(state)));
                }
                CommandKind::Custom(callback) => {
                    self.flush();
                    if let Some(callback) = callback.take()
                        && let Err(e) = callback(&mut self.command_buffer)
                    {
                        tracing::warn!("{}", e);
                    }
                    self.command_buffer.set_depth_stencil_state(Some(Arc::clone(state)));
                }
                CommandKind::Group(id) => {
                    let id = *id;
                    self.flush();
                    self.visit_queue(id);
                    self.command_buffer.set_depth_stencil_state(Some(Arc::clone(state)));
                }
                CommandKind::Callback(callback) => {
                    self.flush();
                    if let Some(callback) = callback.take() {
                        callback();
                    }
                }
            }
        }

        self.flush();
    }

    /// Whether `vertices` and `indices` can be drawn from one batch buffer.
    fn drawable(&self, vertices: &[V3fC4bT2f], indices: &[u16]) -> bool {
        if vertices.is_empty() || indices.is_empty() {
            return false;
        }

        if vertices.len() > self.config.max_vertices || indices.len() > self.config.max_indices {
            let error = RenderError::CommandTooLarge {
                vertices: vertices.len(),
                indices: indices.len(),
            };
            tracing::warn!("{}, skipping", error);
            return false;
        }
        if indices.iter().any(|&i| usize::from(i) >= vertices.len()) {
            tracing::warn!("Command indexes past its {} vertices, skipping", vertices.len());
            return false;
        }
        true
    }

    fn push_vertices(&mut self, vertices: &[V3fC4bT2f], model_view: Mat4) {
        if model_view == Mat4::IDENTITY {
            self.vertices.extend_from_slice(vertices);
        } else {
            self.vertices.extend(vertices.iter().map(|v| V3fC4bT2f {
                position: model_view.transform_point3(Vec3::from(v.position)).to_array(),
                ..*v
            }));
        }
    }

    fn queue_geometry(&mut self, geometry: &TrianglesCommand, batchable: bool) {
        let vertices = geometry.vertices();
        let indices = geometry.indices();
        if !self.drawable(vertices, indices) {
            return;
        }

        if self.vertices.len() + vertices.len() > self.config.max_vertices
            || self.indices.len() + indices.len() > self.config.max_indices
        {
            self.flush();
        }

        // Bounded by max_vertices, which fits u16 indices
        let base = self.vertices.len() as u16;
        self.push_vertices(vertices, geometry.model_view());

        let index_start = self.indices.len();
        self.indices.extend(indices.iter().map(|&i| base + i));
        self.stats.batched_commands += 1;

        let material_id = geometry.material_id();
        match self.batches.last_mut() {
            Some(last) if batchable && last.mergeable && last.material_id == material_id => {
                last.index_count += indices.len();
            }
            _ => self.batches.push(Batch {
                material_id,
                program: geometry.program(),
                texture: geometry.texture(),
                blend: geometry.blend(),
                index_start,
                index_count: indices.len(),
                mergeable: batchable,
            }),
        }
    }

    /// Upload the mesh once and draw it with each pass of its current technique.
    ///
    /// Expects an empty batch buffer. Cull mode and winding go back to the
    /// sprite defaults afterwards.
    fn draw_mesh(&mut self, mesh: &MeshCommand) {
        profile_function!();
        let material = mesh.material();
        let Some(technique) = material.technique() else {
            tracing::warn!("Material '{}' has no technique, skipping mesh", material.name);
            return;
        };
        if technique.passes().is_empty() || !self.drawable(mesh.vertices(), mesh.indices()) {
            return;
        }

        self.push_vertices(mesh.vertices(), mesh.model_view());
        let cb = &mut self.command_buffer;
        cb.set_vertex_buffer_data(bytemuck::cast_slice(&self.vertices));
        cb.set_index_buffer_data(bytemuck::cast_slice(mesh.indices()));
        cb.set_vertex_layout(V3fC4bT2f::ATTRIB_FLAGS, &V3fC4bT2f::attributes());

        for pass in technique.passes() {
            pass.bind(cb, &self.depth_stencil_states);
            cb.draw_elements(
                PrimitiveTopology::TriangleList,
                IndexFormat::Uint16,
                mesh.indices().len() as u32,
                0,
            );
            self.stats.draw_calls += 1;
            self.stats.drawn_vertices += self.vertices.len();
        }

        let defaults = StateBlock::default();
        cb.set_cull_mode(defaults.cull_mode);
        cb.set_winding(defaults.winding);
        self.vertices.clear();
    }

    /// Upload the pending geometry and draw every batch.
    fn flush(&mut self) {
        if self.batches.is_empty() {
            return;
        }
        profile_function!();

        let cb = &mut self.command_buffer;
        cb.set_vertex_buffer_data(bytemuck::cast_slice(&self.vertices));
        cb.set_index_buffer_data(bytemuck::cast_slice(&self.indices));
        cb.set_vertex_layout(V3fC4bT2f::ATTRIB_FLAGS, &V3fC4bT2f::attributes());

        for batch in &self.batches {
            cb.use_program(batch.program);
            cb.bind_texture(0, batch.texture);
            cb.set_blend_func(batch.blend);
            cb.draw_elements(
                PrimitiveTopology::TriangleList,
                IndexFormat::Uint16,
                batch.index_count as u32,
                (batch.index_start * std::mem::size_of::<u16>()) as u64,
            );
            self.stats.draw_calls += 1;
        }

        self.stats.drawn_vertices += self.vertices.len();
        self.vertices.clear();
        self.indices.clear();
        self.batches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_test_utils::MockDriver;

    fn renderer(config: RendererConfig) -> (Arc<MockDriver>, Renderer) {
        let driver = Arc::new(MockDriver::new());
        let renderer = Renderer::with_driver(Arc::clone(&driver) as Arc<dyn GlDriver>, config);
        (driver, renderer)
    }

    fn quad_command(renderer: &mut Renderer, z: f32, texture: u32) -> RenderCommand {
        let mut cmd = renderer.triangles_command(ProgramId(1), TextureId(texture), BlendFunc::default());
        cmd.set_quads(&[[V3fC4bT2f::default(); 4]]);
        RenderCommand::quad(z, cmd)
    }

    #[test]
    fn test_max_vertices_is_clamped() {
        let (_, renderer) = renderer(RendererConfig::default().with_capacity(100_000, 1000));
        assert_eq!(renderer.config().max_vertices, 65536);
    }

    #[test]
    fn test_model_view_is_applied() {
        let (_, mut renderer) = renderer(RendererConfig::default());
        let mut cmd = renderer.triangles_command(ProgramId(1), TextureId(1), BlendFunc::default());
        cmd.set_quads(&[[V3fC4bT2f::default(); 4]]);
        cmd.set_model_view(Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));

        renderer.queue_geometry(&cmd, true);
        assert!(renderer.vertices.iter().all(|v| v.position == [5.0, 0.0, 0.0]));
    }

    #[test]
    fn test_indices_are_rebased() {
        let (_, mut renderer) = renderer(RendererConfig::default());
        for texture in [1, 2] {
            let mut cmd = renderer.triangles_command(ProgramId(1), TextureId(texture), BlendFunc::default());
            cmd.set_quads(&[[V3fC4bT2f::default(); 4]]);
            renderer.queue_geometry(&cmd, true);
        }

        assert_eq!(&renderer.indices[6..], &[4, 5, 6, 7, 6, 5]);
        assert_eq!(renderer.batches.len(), 2);
        assert_eq!(renderer.batches[1].index_start, 6);
    }

    #[test]
    fn test_skip_batching_stands_alone() {
        let (driver, mut renderer) = renderer(RendererConfig::default());
        renderer.begin_frame();
        for skip in [false, true, false] {
            let cmd = quad_command(&mut renderer, 0.0, 1).with_skip_batching(skip);
            renderer.add_command(cmd).unwrap();
        }
        renderer.render();

        assert_eq!(driver.draws(), vec![6, 6, 6]);
    }

    #[test]
    fn test_end_frame_recycles_commands() {
        let (_, mut renderer) = renderer(RendererConfig::default());
        renderer.begin_frame();
        let cmd = quad_command(&mut renderer, 0.0, 1);
        renderer.add_command(cmd).unwrap();
        renderer.render();
        renderer.end_frame();

        assert_eq!(renderer.pool.len(), 1);
        assert!(renderer.queue(RenderQueueId::DEFAULT).is_some_and(RenderQueue::is_empty));
    }

    #[test]
    fn test_render_without_begin_frame() {
        let (driver, mut renderer) = renderer(RendererConfig::default());
        let cmd = quad_command(&mut renderer, 0.0, 1);
        renderer.add_command(cmd).unwrap();
        renderer.render();

        assert_eq!(driver.count_draws(), 1);
        assert_eq!(renderer.stats().draw_calls, 1);
    }
}
