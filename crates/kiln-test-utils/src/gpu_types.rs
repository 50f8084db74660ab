//! GL object handles and small value types shared by drivers and the renderer.
//!
//! Handles are identifiers only. Whoever created the object owns it; holding a
//! handle does not keep the object alive.

use bitflags::bitflags;

macro_rules! gl_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            /// The reserved "no object" name.
            pub const NONE: Self = Self(0);

            /// Whether this is the reserved zero name.
            pub fn is_none(self) -> bool {
                self.0 == 0
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

gl_handle!(
    /// A linked shader program.
    ProgramId
);
gl_handle!(
    /// A texture object.
    TextureId
);
gl_handle!(
    /// A vertex array object. `VaoId::NONE` is the default (shared) VAO.
    VaoId
);
gl_handle!(
    /// A vertex or index buffer object.
    BufferId
);
gl_handle!(
    /// A framebuffer object. `FramebufferId::NONE` is the window-system framebuffer.
    FramebufferId
);

impl VaoId {
    /// The default vertex array object.
    pub const DEFAULT: Self = Self::NONE;
}

/// Server-side capabilities toggled with enable/disable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Blend,
    DepthTest,
    StencilTest,
    CullFace,
    ScissorTest,
}

/// Texture bind targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureTarget {
    #[default]
    Texture2D,
    CubeMap,
}

/// Buffer bind targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Vertex data.
    Array,
    /// Index data.
    ElementArray,
}

/// Upload frequency hint for buffer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    Dynamic,
    Stream,
}

/// Framebuffer attachment points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color(u32),
    Depth,
    Stencil,
}

/// A vertex attribute layout entry for `vertex_attrib_pointer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub index: u32,
    pub format: wgpu::VertexFormat,
    pub normalized: bool,
    pub stride: u32,
    pub offset: u32,
}

bitflags! {
    /// Buffers cleared by a single `clear` call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearMask: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

bitflags! {
    /// Enabled vertex attribute arrays, one bit per attribute index.
    ///
    /// The named flags cover the engine's standard attribute locations; any
    /// other bit is still a valid attribute index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VertexAttribFlags: u32 {
        const POSITION = 1 << 0;
        const COLOR = 1 << 1;
        const TEX_COORD = 1 << 2;
        const NORMAL = 1 << 3;
        const BLEND_WEIGHT = 1 << 4;
        const BLEND_INDEX = 1 << 5;

        const POS_COLOR_TEX = Self::POSITION.bits() | Self::COLOR.bits() | Self::TEX_COORD.bits();

        const _ = !0;
    }
}
