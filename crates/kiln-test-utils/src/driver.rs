//! The driver seam between the renderer core and a graphics API.

use crate::gpu_types::*;
use wgpu::{BlendFactor, BlendOperation, CompareFunction, Face, FrontFace, IndexFormat, PrimitiveTopology, StencilOperation};

/// Raw, uncached GL-style driver calls.
///
/// Every method maps to one API call. Implementations must not add caching of
/// their own: the renderer's state caches assume that each call they issue
/// reaches the API.
///
/// Methods take `&self` and return owned values so the trait stays object
/// safe and a driver can be shared as `Arc<dyn GlDriver>` between the state
/// cache, command buffers and renderers of one context.
pub trait GlDriver: Send + Sync {
    // Capabilities

    /// Whether vertex array objects are available and carry their own attribute state.
    fn supports_shareable_vao(&self) -> bool;

    /// Enable a server-side capability.
    fn enable(&self, capability: Capability);

    /// Disable a server-side capability.
    fn disable(&self, capability: Capability);

    // Programs

    fn use_program(&self, program: ProgramId);

    fn delete_program(&self, program: ProgramId);

    /// Query the program the API currently has bound.
    fn current_program(&self) -> Option<ProgramId>;

    // Textures

    /// Select the active texture unit (zero based).
    fn active_texture(&self, unit: u32);

    fn bind_texture(&self, target: TextureTarget, texture: TextureId);

    fn delete_texture(&self, texture: TextureId);

    // Blending

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor);

    fn blend_equation(&self, operation: BlendOperation);

    // Vertex arrays and attributes

    fn gen_vertex_array(&self) -> VaoId;

    fn bind_vertex_array(&self, vao: VaoId);

    fn delete_vertex_array(&self, vao: VaoId);

    fn enable_vertex_attrib_array(&self, index: u32);

    fn disable_vertex_attrib_array(&self, index: u32);

    fn vertex_attrib_pointer(&self, attribute: &VertexAttribute);

    /// Query the enabled attribute arrays of the currently bound VAO.
    fn enabled_vertex_attribs(&self) -> VertexAttribFlags;

    // Buffers

    fn gen_buffer(&self) -> BufferId;

    fn bind_buffer(&self, target: BufferTarget, buffer: BufferId);

    fn buffer_data(&self, target: BufferTarget, data: &[u8], usage: BufferUsage);

    fn delete_buffer(&self, buffer: BufferId);

    // Framebuffers

    /// The framebuffer bound by the window system when the context was created.
    fn default_framebuffer(&self) -> FramebufferId;

    fn gen_framebuffer(&self) -> FramebufferId;

    fn bind_framebuffer(&self, framebuffer: FramebufferId);

    /// Attach `texture` to `attachment` of the bound framebuffer; `None` detaches.
    fn framebuffer_texture_2d(&self, attachment: Attachment, texture: Option<TextureId>);

    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    // Rasterizer

    fn viewport(&self, x: i32, y: i32, width: u32, height: u32);

    fn scissor(&self, x: i32, y: i32, width: u32, height: u32);

    fn cull_face(&self, face: Face);

    fn front_face(&self, winding: FrontFace);

    fn line_width(&self, width: f32);

    // Depth and stencil

    fn depth_mask(&self, write: bool);

    fn depth_func(&self, function: CompareFunction);

    fn stencil_func(&self, function: CompareFunction, reference: u32, read_mask: u8);

    fn stencil_func_separate(&self, face: Face, function: CompareFunction, reference: u32, read_mask: u8);

    fn stencil_op(&self, fail: StencilOperation, depth_fail: StencilOperation, pass: StencilOperation);

    fn stencil_op_separate(
        &self,
        face: Face,
        fail: StencilOperation,
        depth_fail: StencilOperation,
        pass: StencilOperation,
    );

    fn stencil_mask(&self, write_mask: u8);

    fn stencil_mask_separate(&self, face: Face, write_mask: u8);

    // Clearing

    fn clear_color(&self, rgba: [f32; 4]);

    fn clear_depth(&self, depth: f32);

    fn clear_stencil(&self, stencil: u32);

    fn clear(&self, mask: ClearMask);

    // Drawing

    fn draw_arrays(&self, topology: PrimitiveTopology, first: u32, count: u32);

    /// Draw `count` indices starting `offset` bytes into the bound index buffer.
    fn draw_elements(&self, topology: PrimitiveTopology, format: IndexFormat, count: u32, offset: u64);
}
