//! Renderer configuration.

use crate::state_cache::CachePolicy;

/// Default vertex capacity of the shared batch buffer.
pub const VBO_SIZE: usize = 65536;
/// Default index capacity of the shared batch buffer.
pub const INDEX_VBO_SIZE: usize = VBO_SIZE * 6 / 4;

/// When the GL state cache compares itself against the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValidationMode {
    /// Never query the driver.
    #[default]
    Off,
    /// Query on every checked call.
    Always,
    /// Query on one of every `every_n` checked calls.
    Sampled { every_n: u32 },
}

impl ValidationMode {
    /// Whether the `call_index`-th checked call (zero based) should validate.
    pub fn should_validate(self, call_index: u64) -> bool {
        match self {
            ValidationMode::Off => false,
            ValidationMode::Always => true,
            ValidationMode::Sampled { every_n } => every_n != 0 && call_index % u64::from(every_n) == 0,
        }
    }
}

/// Configuration for [`GlStateCache`](crate::gl_state::GlStateCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCacheConfig {
    /// With caching off every setter forwards straight to the driver.
    pub enabled: bool,
    pub validation: ValidationMode,
}

impl Default for StateCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            validation: ValidationMode::Off,
        }
    }
}

/// Configuration for [`Renderer`](crate::renderer::Renderer).
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Vertex capacity of one batch upload. Clamped to 65536 so indices fit in `u16`.
    pub max_vertices: usize,
    /// Index capacity of one batch upload.
    pub max_indices: usize,
    /// Maximum nesting of group commands.
    pub max_group_depth: usize,
    /// Color used by [`Renderer::clear`](crate::renderer::Renderer::clear).
    pub clear_color: [f32; 4],
    /// Depth testing for the 2D (global z-order) buckets.
    pub depth_test: bool,
    /// Capacity policy of the depth-stencil state cache.
    pub depth_stencil_cache: CachePolicy,
    pub state_cache: StateCacheConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_vertices: VBO_SIZE,
            max_indices: INDEX_VBO_SIZE,
            max_group_depth: 32,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_test: false,
            depth_stencil_cache: CachePolicy::Unbounded,
            state_cache: StateCacheConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Builder: set the batch buffer capacities.
    pub fn with_capacity(mut self, max_vertices: usize, max_indices: usize) -> Self {
        self.max_vertices = max_vertices;
        self.max_indices = max_indices;
        self
    }

    /// Builder: set the state cache configuration.
    pub fn with_state_cache(mut self, state_cache: StateCacheConfig) -> Self {
        self.state_cache = state_cache;
        self
    }
}
