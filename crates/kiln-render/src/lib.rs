//! Kiln renderer core.
//!
//! Collects per-frame render commands, sorts and batches them by material and
//! depth, and submits them through a [`GlDriver`](kiln_test_utils::GlDriver)
//! while eliding redundant state changes.
//!
//! Layers, leaf first:
//!
//! - [`gl_state::GlStateCache`]: per-thread cache of program, texture, blend
//!   and vertex attribute bindings.
//! - [`depth_stencil`]: depth/stencil state objects shared through a
//!   [`state_cache::StateCache`].
//! - [`render_pass::RenderPassDescriptor`]: attachments and clears of a pass.
//! - [`material`]: material, technique and pass tree, drawn by mesh commands.
//! - [`command`] and [`queue`]: what nodes submit each frame.
//! - [`renderer::Renderer`]: sorting, batching and submission.
//! - [`command_buffer::CommandBuffer`]: raster state cache and framebuffer
//!   management in front of the driver.

pub mod blend;
pub mod command;
pub mod command_buffer;
pub mod config;
pub mod depth_stencil;
pub mod error;
pub mod gl_state;
pub mod material;
pub mod queue;
pub mod render_pass;
pub mod renderer;
pub mod state_cache;

pub use blend::BlendFunc;
pub use command::{CommandKind, MaterialId, MeshCommand, RenderCommand, TrianglesCommand, V3fC4bT2f};
pub use command_buffer::CommandBuffer;
pub use config::{RendererConfig, StateCacheConfig, ValidationMode};
pub use depth_stencil::{DepthStencilDescriptor, DepthStencilState, DepthStencilStateCache, StencilDescriptor};
pub use error::{RenderError, StateCacheMismatch};
pub use gl_state::GlStateCache;
pub use material::{Material, Pass, Program, StateBlock, Technique};
pub use queue::{RenderQueue, RenderQueueId};
pub use render_pass::{AttachmentTexture, RenderPassDescriptor};
pub use renderer::{FrameStats, Renderer};
pub use state_cache::{CachePolicy, StateCache, StateTracker};

#[cfg(feature = "mock")]
pub use kiln_test_utils::{DriverCall, MockDriver};
