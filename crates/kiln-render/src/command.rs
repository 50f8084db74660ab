//! Render commands.
//!
//! Nodes describe what to draw with [`RenderCommand`]s. Geometry commands
//! (quads and triangles) carry a [`MaterialId`] so the renderer can merge
//! consecutive commands with identical GPU state into one draw call.

use crate::blend::BlendFunc;
use crate::command_buffer::CommandBuffer;
use crate::error::RenderError;
use crate::material::Material;
use crate::queue::RenderQueueId;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use kiln_test_utils::{ProgramId, TextureId, VertexAttribFlags, VertexAttribute};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// Most quads one command can hold with `u16` indices.
pub const MAX_QUADS_PER_COMMAND: usize = (u16::MAX as usize + 1) / 4;

/// Interleaved vertex: position, packed RGBA color, texture coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct V3fC4bT2f {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub tex_coords: [f32; 2],
}

static_assertions::assert_eq_size!(V3fC4bT2f, [u8; 24]);

impl V3fC4bT2f {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    /// Attributes that must be enabled to draw this vertex type.
    pub const ATTRIB_FLAGS: VertexAttribFlags = VertexAttribFlags::POS_COLOR_TEX;

    pub fn new(position: [f32; 3], color: [u8; 4], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            color,
            tex_coords,
        }
    }

    /// Attribute pointers for the standard position/color/texcoord locations.
    pub fn attributes() -> [VertexAttribute; 3] {
        [
            VertexAttribute {
                index: 0,
                format: wgpu::VertexFormat::Float32x3,
                normalized: false,
                stride: Self::STRIDE,
                offset: 0,
            },
            VertexAttribute {
                index: 1,
                format: wgpu::VertexFormat::Unorm8x4,
                normalized: true,
                stride: Self::STRIDE,
                offset: 12,
            },
            VertexAttribute {
                index: 2,
                format: wgpu::VertexFormat::Float32x2,
                normalized: false,
                stride: Self::STRIDE,
                offset: 16,
            },
        ]
    }
}

/// Hash of the GPU state a geometry command needs.
///
/// Equal ids mean equal program, texture and blend function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MaterialId(pub u32);

impl MaterialId {
    /// Reserved id; commands carrying it are never merged.
    pub const DO_NOT_BATCH: Self = Self(0);

    pub fn compute(program: ProgramId, texture: TextureId, blend: BlendFunc) -> Self {
        Self::from_key(&(program, texture, blend))
    }

    /// Id for any hashable description of GPU state.
    pub fn from_key(key: &impl Hash) -> Self {
        // Fixed seeds keep ids stable for the lifetime of the process
        let hasher = ahash::RandomState::with_seeds(
            0x243f_6a88_85a3_08d3,
            0x1319_8a2e_0370_7344,
            0xa409_3822_299f_31d0,
            0x082e_fa98_ec4e_6c89,
        );
        let hash = hasher.hash_one(key);
        let folded = (hash ^ (hash >> 32)) as u32;
        if folded == 0 { Self(1) } else { Self(folded) }
    }

    pub fn is_batchable(self) -> bool {
        self != Self::DO_NOT_BATCH
    }
}

/// Indexed triangles drawn with one program, one texture and one blend function.
///
/// Indices refer to this command's own vertices; the renderer rebases them
/// when it copies the geometry into a batch.
#[derive(Debug, Clone)]
pub struct TrianglesCommand {
    program: ProgramId,
    texture: TextureId,
    blend: BlendFunc,
    material_id: MaterialId,
    vertices: Vec<V3fC4bT2f>,
    indices: Vec<u16>,
    model_view: Mat4,
}

impl TrianglesCommand {
    pub fn new(program: ProgramId, texture: TextureId, blend: BlendFunc) -> Self {
        Self {
            program,
            texture,
            blend,
            material_id: MaterialId::compute(program, texture, blend),
            vertices: Vec::new(),
            indices: Vec::new(),
            model_view: Mat4::IDENTITY,
        }
    }

    /// Build a command from quads given as four corners each.
    ///
    /// Corners are ordered bottom-left, top-left, bottom-right, top-right and
    /// each quad becomes the triangles (0, 1, 2) and (3, 2, 1).
    pub fn from_quads(program: ProgramId, texture: TextureId, blend: BlendFunc, quads: &[[V3fC4bT2f; 4]]) -> Self {
        let mut command = Self::new(program, texture, blend);
        command.set_quads(quads);
        command
    }

    /// Replace the geometry with `quads`, keeping the allocated capacity.
    ///
    /// Quads past [`MAX_QUADS_PER_COMMAND`] are dropped.
    pub fn set_quads(&mut self, quads: &[[V3fC4bT2f; 4]]) {
        let quads = if quads.len() > MAX_QUADS_PER_COMMAND {
            tracing::warn!(
                "{} quads exceed the u16 index range; dropping the last {}",
                quads.len(),
                quads.len() - MAX_QUADS_PER_COMMAND
            );
            &quads[..MAX_QUADS_PER_COMMAND]
        } else {
            quads
        };

        self.vertices.clear();
        self.indices.clear();
        for (i, quad) in quads.iter().enumerate() {
            let base = (i * 4) as u16;
            self.vertices.extend_from_slice(quad);
            self.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 3, base + 2, base + 1]);
        }
    }

    /// Replace the geometry, keeping the allocated capacity.
    ///
    /// A trailing partial triangle is dropped.
    pub fn set_geometry(&mut self, vertices: &[V3fC4bT2f], indices: &[u16]) {
        copy_geometry(&mut self.vertices, &mut self.indices, vertices, indices);
    }

    pub fn set_program(&mut self, program: ProgramId) {
        if self.program != program {
            self.program = program;
            self.update_material_id();
        }
    }

    pub fn set_texture(&mut self, texture: TextureId) {
        if self.texture != texture {
            self.texture = texture;
            self.update_material_id();
        }
    }

    pub fn set_blend(&mut self, blend: BlendFunc) {
        if self.blend != blend {
            self.blend = blend;
            self.update_material_id();
        }
    }

    pub fn set_model_view(&mut self, model_view: Mat4) {
        self.model_view = model_view;
    }

    fn update_material_id(&mut self) {
        self.material_id = MaterialId::compute(self.program, self.texture, self.blend);
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn blend(&self) -> BlendFunc {
        self.blend
    }

    pub fn material_id(&self) -> MaterialId {
        self.material_id
    }

    pub fn vertices(&self) -> &[V3fC4bT2f] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn model_view(&self) -> Mat4 {
        self.model_view
    }

    /// Clear geometry and reset to the given material, keeping capacity.
    pub fn reset(&mut self, program: ProgramId, texture: TextureId, blend: BlendFunc) {
        self.vertices.clear();
        self.indices.clear();
        self.model_view = Mat4::IDENTITY;
        self.program = program;
        self.texture = texture;
        self.blend = blend;
        self.update_material_id();
    }
}

fn copy_geometry(
    dst_vertices: &mut Vec<V3fC4bT2f>,
    dst_indices: &mut Vec<u16>,
    vertices: &[V3fC4bT2f],
    indices: &[u16],
) {
    let whole = indices.len() - indices.len() % 3;
    if whole != indices.len() {
        tracing::warn!(
            "Geometry with {} indices; dropping the trailing {}",
            indices.len(),
            indices.len() - whole
        );
    }

    dst_vertices.clear();
    dst_vertices.extend_from_slice(vertices);
    dst_indices.clear();
    dst_indices.extend_from_slice(&indices[..whole]);
}

/// Indexed triangles drawn once per pass of a material's current technique.
///
/// Meshes are never merged with other commands; the renderer uploads the
/// geometry once and binds each pass before its draw.
#[derive(Debug, Clone)]
pub struct MeshCommand {
    material: Arc<Material>,
    material_id: MaterialId,
    vertices: Vec<V3fC4bT2f>,
    indices: Vec<u16>,
    model_view: Mat4,
}

impl MeshCommand {
    pub fn new(material: Arc<Material>) -> Self {
        Self {
            material_id: material.material_id(),
            material,
            vertices: Vec::new(),
            indices: Vec::new(),
            model_view: Mat4::IDENTITY,
        }
    }

    /// Replace the geometry. A trailing partial triangle is dropped.
    pub fn set_geometry(&mut self, vertices: &[V3fC4bT2f], indices: &[u16]) {
        copy_geometry(&mut self.vertices, &mut self.indices, vertices, indices);
    }

    pub fn with_geometry(mut self, vertices: &[V3fC4bT2f], indices: &[u16]) -> Self {
        self.set_geometry(vertices, indices);
        self
    }

    pub fn set_model_view(&mut self, model_view: Mat4) {
        self.model_view = model_view;
    }

    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }

    /// Id of the material's current technique when the command was built.
    pub fn material_id(&self) -> MaterialId {
        self.material_id
    }

    pub fn vertices(&self) -> &[V3fC4bT2f] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn model_view(&self) -> Mat4 {
        self.model_view
    }
}

/// Callback run by a [`CommandKind::Custom`] command with the command buffer.
pub type CustomFn = Box<dyn FnOnce(&mut CommandBuffer) -> Result<(), RenderError> + Send>;

/// Callback run by a [`CommandKind::Callback`] command.
pub type CallbackFn = Box<dyn FnOnce() + Send>;

/// What a render command does.
pub enum CommandKind {
    Quad(TrianglesCommand),
    Triangles(TrianglesCommand),
    /// Geometry drawn with every pass of a material. Breaks the current batch.
    Mesh(MeshCommand),
    /// Arbitrary drawing through the command buffer. Breaks the current batch.
    Custom(Option<CustomFn>),
    /// Renders another queue in place.
    Group(RenderQueueId),
    /// CPU work ordered with the draws. Breaks the current batch.
    Callback(Option<CallbackFn>),
}

impl std::fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quad(cmd) => f.debug_tuple("Quad").field(&cmd.material_id()).finish(),
            Self::Triangles(cmd) => f.debug_tuple("Triangles").field(&cmd.material_id()).finish(),
            Self::Mesh(cmd) => f.debug_tuple("Mesh").field(&cmd.material.name).finish(),
            Self::Custom(_) => f.write_str("Custom"),
            Self::Group(id) => f.debug_tuple("Group").field(id).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// A drawing operation submitted to the renderer.
#[derive(Debug)]
pub struct RenderCommand {
    pub global_z_order: f32,
    /// Transparent commands are drawn after opaque ones, back to front.
    pub transparent: bool,
    /// Draw this command on its own even if the material matches its neighbours.
    pub skip_batching: bool,
    pub kind: CommandKind,
}

impl RenderCommand {
    fn with_kind(global_z_order: f32, kind: CommandKind) -> Self {
        Self {
            global_z_order,
            transparent: false,
            skip_batching: false,
            kind,
        }
    }

    pub fn triangles(global_z_order: f32, command: TrianglesCommand) -> Self {
        Self::with_kind(global_z_order, CommandKind::Triangles(command))
    }

    pub fn quad(global_z_order: f32, command: TrianglesCommand) -> Self {
        Self::with_kind(global_z_order, CommandKind::Quad(command))
    }

    pub fn custom(
        global_z_order: f32,
        callback: impl FnOnce(&mut CommandBuffer) -> Result<(), RenderError> + Send + 'static,
    ) -> Self {
        Self::with_kind(global_z_order, CommandKind::Custom(Some(Box::new(callback))))
    }

    pub fn mesh(global_z_order: f32, command: MeshCommand) -> Self {
        Self::with_kind(global_z_order, CommandKind::Mesh(command))
    }

    pub fn group(global_z_order: f32, queue: RenderQueueId) -> Self {
        Self::with_kind(global_z_order, CommandKind::Group(queue))
    }

    pub fn callback(global_z_order: f32, callback: impl FnOnce() + Send + 'static) -> Self {
        Self::with_kind(global_z_order, CommandKind::Callback(Some(Box::new(callback))))
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_skip_batching(mut self, skip: bool) -> Self {
        self.skip_batching = skip;
        self
    }

    /// Sort and batching key. Non-geometry commands never batch.
    pub fn material_id(&self) -> MaterialId {
        match &self.kind {
            CommandKind::Quad(cmd) | CommandKind::Triangles(cmd) => cmd.material_id(),
            CommandKind::Mesh(cmd) => cmd.material_id(),
            _ => MaterialId::DO_NOT_BATCH,
        }
    }

    /// Geometry payload for quad and triangles commands.
    pub fn geometry(&self) -> Option<&TrianglesCommand> {
        match &self.kind {
            CommandKind::Quad(cmd) | CommandKind::Triangles(cmd) => Some(cmd),
            _ => None,
        }
    }

    /// Whether this command may share a draw with a neighbour of the same material.
    pub fn is_batchable(&self) -> bool {
        self.geometry().is_some() && !self.skip_batching && self.material_id().is_batchable()
    }
}

/// Recycles geometry commands so their vertex and index vectors keep their capacity.
#[derive(Debug, Default)]
pub struct CommandPool {
    free: Vec<TrianglesCommand>,
}

impl CommandPool {
    /// Take a command from the pool, or allocate one when it is empty.
    pub fn acquire(&mut self, program: ProgramId, texture: TextureId, blend: BlendFunc) -> TrianglesCommand {
        match self.free.pop() {
            Some(mut command) => {
                command.reset(program, texture, blend);
                command
            }
            None => TrianglesCommand::new(program, texture, blend),
        }
    }

    /// Return the geometry payload of `command`, if any, to the pool.
    pub fn release(&mut self, command: RenderCommand) {
        if let CommandKind::Quad(cmd) | CommandKind::Triangles(cmd) = command.kind {
            self.free.push(cmd);
        }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> [V3fC4bT2f; 4] {
        let v = |x: f32, y: f32| V3fC4bT2f::new([x, y, 0.0], [255; 4], [x, y]);
        [v(0.0, 0.0), v(0.0, 1.0), v(1.0, 0.0), v(1.0, 1.0)]
    }

    #[test]
    fn test_material_id_is_stable_and_distinct() {
        let a = MaterialId::compute(ProgramId(1), TextureId(2), BlendFunc::ALPHA_PREMULTIPLIED);
        let b = MaterialId::compute(ProgramId(1), TextureId(2), BlendFunc::ALPHA_PREMULTIPLIED);
        let c = MaterialId::compute(ProgramId(1), TextureId(3), BlendFunc::ALPHA_PREMULTIPLIED);
        let d = MaterialId::compute(ProgramId(1), TextureId(2), BlendFunc::ADDITIVE);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.is_batchable());
    }

    #[test]
    fn test_setters_recompute_material_id() {
        let mut cmd = TrianglesCommand::new(ProgramId(1), TextureId(2), BlendFunc::DISABLE);
        let before = cmd.material_id();

        cmd.set_texture(TextureId(2));
        assert_eq!(cmd.material_id(), before);

        cmd.set_texture(TextureId(9));
        assert_eq!(
            cmd.material_id(),
            MaterialId::compute(ProgramId(1), TextureId(9), BlendFunc::DISABLE)
        );
    }

    #[test]
    fn test_quads_expand_to_six_indices() {
        let cmd = TrianglesCommand::from_quads(ProgramId(1), TextureId(1), BlendFunc::DISABLE, &[quad(), quad()]);

        assert_eq!(cmd.vertices().len(), 8);
        assert_eq!(cmd.indices(), &[0, 1, 2, 3, 2, 1, 4, 5, 6, 7, 6, 5]);
    }

    #[test]
    fn test_quads_past_index_range_are_dropped() {
        let quads = vec![quad(); MAX_QUADS_PER_COMMAND + 2];
        let cmd = TrianglesCommand::from_quads(ProgramId(1), TextureId(1), BlendFunc::DISABLE, &quads);

        assert_eq!(cmd.vertices().len(), u16::MAX as usize + 1);
        assert_eq!(cmd.indices().iter().max(), Some(&u16::MAX));
    }

    #[test]
    fn test_partial_triangle_is_dropped() {
        let mut cmd = TrianglesCommand::new(ProgramId(1), TextureId(1), BlendFunc::DISABLE);
        cmd.set_geometry(&quad(), &[0, 1, 2, 3]);
        assert_eq!(cmd.indices(), &[0, 1, 2]);
    }

    #[test]
    fn test_non_geometry_commands_never_batch() {
        assert_eq!(
            RenderCommand::callback(0.0, || {}).material_id(),
            MaterialId::DO_NOT_BATCH
        );
        assert!(!RenderCommand::group(0.0, RenderQueueId(1)).is_batchable());

        let cmd = TrianglesCommand::new(ProgramId(1), TextureId(1), BlendFunc::DISABLE);
        assert!(RenderCommand::triangles(0.0, cmd.clone()).is_batchable());
        assert!(!RenderCommand::triangles(0.0, cmd).with_skip_batching(true).is_batchable());
    }

    #[test]
    fn test_mesh_sorts_by_material_but_never_merges() {
        let program = Arc::new(crate::material::Program::new(ProgramId(4), "lit"));
        let mut material = Material::new("rock");
        material.add_technique(
            crate::material::Technique::new("normal").with_pass(crate::material::Pass::new("base", program)),
        );
        let material = Arc::new(material);

        let mesh = MeshCommand::new(Arc::clone(&material)).with_geometry(&quad(), &[0, 1, 2, 3]);
        assert_eq!(mesh.indices(), &[0, 1, 2]);

        let cmd = RenderCommand::mesh(0.0, mesh);
        assert_eq!(cmd.material_id(), material.material_id());
        assert!(cmd.material_id().is_batchable());
        assert!(!cmd.is_batchable());
        assert!(cmd.geometry().is_none());
    }

    #[test]
    fn test_pool_keeps_capacity() {
        let mut pool = CommandPool::default();
        let cmd = TrianglesCommand::from_quads(ProgramId(1), TextureId(1), BlendFunc::DISABLE, &[quad(); 16]);
        pool.release(RenderCommand::quad(0.0, cmd));
        pool.release(RenderCommand::callback(0.0, || {}));
        assert_eq!(pool.len(), 1);

        let reused = pool.acquire(ProgramId(2), TextureId(3), BlendFunc::ADDITIVE);
        assert!(reused.vertices().is_empty());
        assert!(reused.vertices.capacity() >= 64);
        assert_eq!(
            reused.material_id(),
            MaterialId::compute(ProgramId(2), TextureId(3), BlendFunc::ADDITIVE)
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn test_vertex_layout() {
        let attributes = V3fC4bT2f::attributes();
        assert_eq!(V3fC4bT2f::STRIDE, 24);
        assert_eq!(attributes.map(|a| a.offset), [0, 12, 16]);
        assert!(attributes[1].normalized);
    }
}
