//! Cache of GL binding state used to elide redundant driver calls.
//!
//! Every slot is keyed by the calling thread so secondary contexts on other
//! threads keep independent views of the bound state. Each slot category has
//! its own lock: texture binds never wait on program binds.
//!
//! The cache must always match what the driver has bound. Code that calls the
//! driver directly has to call [`GlStateCache::invalidate_state_cache`]
//! afterwards.

use crate::config::StateCacheConfig;
use crate::error::StateCacheMismatch;
use ahash::{HashMap, HashSet};
use kiln_test_utils::{Capability, GlDriver, ProgramId, TextureId, TextureTarget, VaoId, VertexAttribFlags};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use wgpu::{BlendFactor, BlendOperation};

/// Number of texture units tracked per thread.
pub const MAX_TEXTURE_UNITS: usize = 16;
/// Number of vertex attribute arrays tracked per thread.
pub const MAX_VERTEX_ATTRIBS: u32 = 16;

const ATTRIB_MASK: u32 = (1 << MAX_VERTEX_ATTRIBS) - 1;

#[derive(Debug, Clone, Copy, Default)]
struct TextureSlots {
    active_unit: Option<u32>,
    bound: [Option<TextureId>; MAX_TEXTURE_UNITS],
}

#[derive(Debug, Clone, Copy, Default)]
struct VertexSlots {
    vao: Option<VaoId>,
    /// Enabled arrays of the default VAO.
    attribs: VertexAttribFlags,
}

type PerThread<T> = Mutex<HashMap<ThreadId, T>>;

fn with_slot<T: Default, R>(slots: &PerThread<T>, f: impl FnOnce(&mut T) -> R) -> R {
    let mut slots = slots.lock();
    f(slots.entry(thread::current().id()).or_default())
}

fn masked(flags: VertexAttribFlags) -> VertexAttribFlags {
    VertexAttribFlags::from_bits_retain(flags.bits() & ATTRIB_MASK)
}

/// Per-thread GL binding cache for one GPU context.
///
/// Shared between the command buffers of a context through an `Arc`.
pub struct GlStateCache {
    driver: Arc<dyn GlDriver>,
    config: StateCacheConfig,
    programs: PerThread<Option<ProgramId>>,
    textures: PerThread<TextureSlots>,
    blend: PerThread<Option<(BlendFactor, BlendFactor)>>,
    vertex: PerThread<VertexSlots>,
    attrib_calls: AtomicU64,
}

impl GlStateCache {
    pub fn new(driver: Arc<dyn GlDriver>, config: StateCacheConfig) -> Self {
        Self {
            driver,
            config,
            programs: Mutex::new(HashMap::default()),
            textures: Mutex::new(HashMap::default()),
            blend: Mutex::new(HashMap::default()),
            vertex: Mutex::new(HashMap::default()),
            attrib_calls: AtomicU64::new(0),
        }
    }

    pub fn driver(&self) -> &Arc<dyn GlDriver> {
        &self.driver
    }

    pub fn config(&self) -> StateCacheConfig {
        self.config
    }

    /// Reset every slot of the calling thread to unknown.
    ///
    /// Call after context loss or after talking to the driver directly.
    pub fn invalidate_state_cache(&self) {
        let id = thread::current().id();
        self.programs.lock().insert(id, None);
        self.textures.lock().insert(id, TextureSlots::default());
        self.blend.lock().insert(id, None);
        self.vertex.lock().insert(id, VertexSlots::default());
        tracing::debug!("GL state cache invalidated for {:?}", id);
    }

    /// Drop every slot of the calling thread.
    ///
    /// Call from a render thread before it exits; entries are otherwise kept
    /// for the lifetime of the cache.
    pub fn forget_thread(&self) {
        let id = thread::current().id();
        self.programs.lock().remove(&id);
        self.textures.lock().remove(&id);
        self.blend.lock().remove(&id);
        self.vertex.lock().remove(&id);
    }

    /// Number of threads with at least one cached slot.
    pub fn tracked_threads(&self) -> usize {
        let mut ids: HashSet<ThreadId> = self.programs.lock().keys().copied().collect();
        ids.extend(self.textures.lock().keys().copied());
        ids.extend(self.blend.lock().keys().copied());
        ids.extend(self.vertex.lock().keys().copied());
        ids.len()
    }

    // Programs

    pub fn use_program(&self, program: ProgramId) {
        if !self.config.enabled {
            self.driver.use_program(program);
            return;
        }

        with_slot(&self.programs, |current| {
            if *current != Some(program) {
                *current = Some(program);
                self.driver.use_program(program);
            }
        });
    }

    /// Delete `program`, first removing it from every thread's cache.
    pub fn delete_program(&self, program: ProgramId) {
        for current in self.programs.lock().values_mut() {
            if *current == Some(program) {
                *current = None;
            }
        }
        self.driver.delete_program(program);
    }

    // Textures

    pub fn active_texture(&self, unit: u32) {
        if !Self::check_unit(unit) {
            return;
        }
        if !self.config.enabled {
            self.driver.active_texture(unit);
            return;
        }

        with_slot(&self.textures, |slots| self.set_active_unit(slots, unit));
    }

    /// Bind a 2D texture to unit 0.
    pub fn bind_texture_2d(&self, texture: TextureId) {
        self.bind_texture_n(0, TextureTarget::Texture2D, texture);
    }

    /// Bind a 2D texture to `unit`, activating the unit first if needed.
    pub fn bind_texture_2d_n(&self, unit: u32, texture: TextureId) {
        self.bind_texture_n(unit, TextureTarget::Texture2D, texture);
    }

    /// Bind `texture` to `unit`. Targets share one slot per unit.
    pub fn bind_texture_n(&self, unit: u32, target: TextureTarget, texture: TextureId) {
        if !Self::check_unit(unit) {
            return;
        }
        if !self.config.enabled {
            self.driver.active_texture(unit);
            self.driver.bind_texture(target, texture);
            return;
        }

        with_slot(&self.textures, |slots| {
            let slot = unit as usize;
            if slots.bound[slot] != Some(texture) {
                slots.bound[slot] = Some(texture);
                self.set_active_unit(slots, unit);
                self.driver.bind_texture(target, texture);
            }
        });
    }

    /// Delete `texture`, first removing it from every unit of every thread.
    pub fn delete_texture(&self, texture: TextureId) {
        for slots in self.textures.lock().values_mut() {
            for bound in slots.bound.iter_mut() {
                if *bound == Some(texture) {
                    *bound = None;
                }
            }
        }
        self.driver.delete_texture(texture);
    }

    // Blending

    /// Set the blend function. `One, Zero` disables blending instead.
    pub fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        if !self.config.enabled {
            self.set_blending(src, dst);
            return;
        }

        with_slot(&self.blend, |current| {
            if *current != Some((src, dst)) {
                *current = Some((src, dst));
                self.set_blending(src, dst);
            }
        });
    }

    /// Re-issue the cached blend function and reset the blend equation to `Add`.
    ///
    /// For code that changed blending behind the cache's back.
    pub fn blend_reset_to_cache(&self) {
        self.driver.blend_equation(BlendOperation::Add);
        if let Some((src, dst)) = with_slot(&self.blend, |current| *current) {
            self.set_blending(src, dst);
        }
    }

    // Vertex arrays

    /// Bind `vao`. A no-op when the driver has no shareable VAOs.
    pub fn bind_vao(&self, vao: VaoId) {
        if !self.driver.supports_shareable_vao() {
            return;
        }
        if !self.config.enabled {
            self.driver.bind_vertex_array(vao);
            return;
        }

        with_slot(&self.vertex, |slots| self.set_vao(slots, vao));
    }

    /// Enable exactly the attribute arrays in `flags`.
    ///
    /// A non-default `vao` carries its own attribute state, so with shareable
    /// VAOs the arrays are enabled on it directly and the cached mask is left
    /// alone. Otherwise the default VAO is bound and only the bits that differ
    /// from the cached mask are toggled.
    pub fn enable_vertex_attribs(&self, flags: VertexAttribFlags, vao: VaoId) {
        let shareable = self.driver.supports_shareable_vao();
        let flags = masked(flags);

        if shareable && !vao.is_none() {
            self.bind_vao(vao);
            for index in 0..MAX_VERTEX_ATTRIBS {
                if flags.bits() & (1 << index) != 0 {
                    self.driver.enable_vertex_attrib_array(index);
                }
            }
            return;
        }

        if !self.config.enabled {
            if shareable {
                self.driver.bind_vertex_array(VaoId::DEFAULT);
            }
            self.toggle_attribs(VertexAttribFlags::all() ^ flags, flags);
            return;
        }

        let call_index = self.attrib_calls.fetch_add(1, Ordering::Relaxed);
        let validate = self.config.validation.should_validate(call_index);

        with_slot(&self.vertex, |slots| {
            if shareable {
                self.set_vao(slots, VaoId::DEFAULT);
            }

            if validate {
                let actual = masked(self.driver.enabled_vertex_attribs());
                if actual != slots.attribs {
                    let mismatch = StateCacheMismatch::VertexAttribs {
                        cached: slots.attribs,
                        actual,
                    };
                    tracing::error!("{}; resynchronising from the driver", mismatch);
                    slots.attribs = actual;
                }
            }

            self.toggle_attribs(slots.attribs, flags);
            slots.attribs = flags;
        });
    }

    /// Compare the calling thread's cache against the driver.
    ///
    /// Checks the bound program and, while the default VAO is bound, the
    /// enabled attribute arrays. Unknown slots are skipped.
    pub fn validate(&self) -> Result<(), StateCacheMismatch> {
        if let Some(cached) = with_slot(&self.programs, |current| *current) {
            let actual = self.driver.current_program();
            if actual != Some(cached) {
                return Err(StateCacheMismatch::Program {
                    cached: Some(cached),
                    actual,
                });
            }
        }

        let slots = with_slot(&self.vertex, |slots| *slots);
        if !self.driver.supports_shareable_vao() || slots.vao == Some(VaoId::DEFAULT) {
            let actual = masked(self.driver.enabled_vertex_attribs());
            if actual != slots.attribs {
                return Err(StateCacheMismatch::VertexAttribs {
                    cached: slots.attribs,
                    actual,
                });
            }
        }

        Ok(())
    }

    // Queries on the calling thread's view

    pub fn current_program(&self) -> Option<ProgramId> {
        with_slot(&self.programs, |current| *current)
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        with_slot(&self.textures, |slots| slots.bound.get(unit as usize).copied().flatten())
    }

    pub fn active_texture_unit(&self) -> Option<u32> {
        with_slot(&self.textures, |slots| slots.active_unit)
    }

    pub fn blend_state(&self) -> Option<(BlendFactor, BlendFactor)> {
        with_slot(&self.blend, |current| *current)
    }

    pub fn bound_vao(&self) -> Option<VaoId> {
        with_slot(&self.vertex, |slots| slots.vao)
    }

    pub fn enabled_vertex_attribs(&self) -> VertexAttribFlags {
        with_slot(&self.vertex, |slots| slots.attribs)
    }

    fn check_unit(unit: u32) -> bool {
        if unit as usize >= MAX_TEXTURE_UNITS {
            tracing::warn!("texture unit {} out of range (max {}), ignored", unit, MAX_TEXTURE_UNITS);
            return false;
        }
        true
    }

    fn set_active_unit(&self, slots: &mut TextureSlots, unit: u32) {
        if slots.active_unit != Some(unit) {
            slots.active_unit = Some(unit);
            self.driver.active_texture(unit);
        }
    }

    fn set_vao(&self, slots: &mut VertexSlots, vao: VaoId) {
        if slots.vao != Some(vao) {
            slots.vao = Some(vao);
            self.driver.bind_vertex_array(vao);
        }
    }

    fn set_blending(&self, src: BlendFactor, dst: BlendFactor) {
        if src == BlendFactor::One && dst == BlendFactor::Zero {
            self.driver.disable(Capability::Blend);
        } else {
            self.driver.enable(Capability::Blend);
            self.driver.blend_func(src, dst);
        }
    }

    fn toggle_attribs(&self, before: VertexAttribFlags, after: VertexAttribFlags) {
        let changed = (before ^ after).bits();
        for index in 0..MAX_VERTEX_ATTRIBS {
            let bit = 1 << index;
            if changed & bit == 0 {
                continue;
            }
            if after.bits() & bit != 0 {
                self.driver.enable_vertex_attrib_array(index);
            } else {
                self.driver.disable_vertex_attrib_array(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationMode;
    use kiln_test_utils::{DriverCall, MockDriver};
    use std::sync::Barrier;

    fn cache_with(driver: &Arc<MockDriver>, config: StateCacheConfig) -> GlStateCache {
        GlStateCache::new(Arc::clone(driver) as Arc<dyn GlDriver>, config)
    }

    fn setup() -> (Arc<MockDriver>, GlStateCache) {
        let driver = Arc::new(MockDriver::new());
        let cache = cache_with(&driver, StateCacheConfig::default());
        (driver, cache)
    }

    #[test]
    fn test_use_program_is_idempotent() {
        let (driver, cache) = setup();

        cache.use_program(ProgramId(3));
        cache.use_program(ProgramId(3));
        assert_eq!(driver.count_use_program(), 1);

        cache.use_program(ProgramId(4));
        assert_eq!(driver.count_use_program(), 2);
    }

    #[test]
    fn test_invalidate_forces_reissue() {
        let (driver, cache) = setup();
        cache.use_program(ProgramId(3));
        cache.bind_texture_2d(TextureId(5));
        cache.blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
        driver.clear_calls();

        cache.invalidate_state_cache();
        cache.use_program(ProgramId(3));
        cache.bind_texture_2d(TextureId(5));
        cache.blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);

        assert_eq!(driver.count_use_program(), 1);
        assert_eq!(driver.count_bind_texture(), 1);
        assert_eq!(driver.count_active_texture(), 1);
        assert_eq!(driver.count_blend_func(), 1);
    }

    #[test]
    fn test_bind_texture_n_activates_unit_first() {
        let (driver, cache) = setup();

        cache.bind_texture_2d_n(2, TextureId(9));
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::ActiveTexture(2),
                DriverCall::BindTexture {
                    target: TextureTarget::Texture2D,
                    texture: TextureId(9)
                },
            ]
        );

        // Same texture on the same unit is elided entirely
        cache.bind_texture_2d_n(2, TextureId(9));
        assert_eq!(driver.call_count(), 2);

        // Another texture on the active unit needs no unit switch
        cache.bind_texture_2d_n(2, TextureId(10));
        assert_eq!(driver.count_active_texture(), 1);
        assert_eq!(driver.count_bind_texture(), 2);
    }

    #[test]
    fn test_out_of_range_unit_is_ignored() {
        let (driver, cache) = setup();
        cache.bind_texture_2d_n(MAX_TEXTURE_UNITS as u32, TextureId(1));
        cache.active_texture(99);
        assert_eq!(driver.call_count(), 0);
    }

    #[test]
    fn test_delete_texture_scrubs_slot() {
        let (driver, cache) = setup();
        cache.bind_texture_2d_n(0, TextureId(7));
        cache.delete_texture(TextureId(7));
        assert_eq!(cache.bound_texture(0), None);

        driver.clear_calls();
        cache.bind_texture_2d_n(0, TextureId(7));
        assert_eq!(driver.count_bind_texture(), 1);
    }

    #[test]
    fn test_delete_scrubs_other_threads() {
        let (driver, cache) = setup();
        let bound = Barrier::new(2);
        let deleted = Barrier::new(2);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                cache.use_program(ProgramId(11));
                cache.bind_texture_2d(TextureId(7));
                bound.wait();
                deleted.wait();
                assert_eq!(cache.current_program(), None);
                assert_eq!(cache.bound_texture(0), None);
            });

            bound.wait();
            cache.delete_program(ProgramId(11));
            cache.delete_texture(TextureId(7));
            deleted.wait();
        });

        assert_eq!(
            driver.count_where(|call| matches!(call, DriverCall::DeleteTexture(TextureId(7)))),
            1
        );
    }

    #[test]
    fn test_threads_have_independent_slots() {
        let (driver, cache) = setup();
        cache.use_program(ProgramId(1));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(cache.current_program(), None);
                cache.use_program(ProgramId(1));
            });
        });

        assert_eq!(driver.count_use_program(), 2);
    }

    #[test]
    fn test_forget_thread_drops_its_slots() {
        let (driver, cache) = setup();
        cache.use_program(ProgramId(1));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                cache.use_program(ProgramId(2));
                cache.bind_texture_2d(TextureId(3));
                assert_eq!(cache.tracked_threads(), 2);
                cache.forget_thread();
            });
        });
        assert_eq!(cache.tracked_threads(), 1);

        // The calling thread's view survives; forgetting it makes binds miss
        cache.use_program(ProgramId(1));
        assert_eq!(driver.count_use_program(), 2);
        cache.forget_thread();
        assert_eq!(cache.tracked_threads(), 0);
        cache.use_program(ProgramId(1));
        assert_eq!(driver.count_use_program(), 3);
    }

    #[test]
    fn test_blend_one_zero_disables_blending() {
        let (driver, cache) = setup();

        cache.blend_func(BlendFactor::One, BlendFactor::Zero);
        assert_eq!(driver.calls(), vec![DriverCall::Disable(Capability::Blend)]);

        driver.clear_calls();
        cache.blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Enable(Capability::Blend),
                DriverCall::BlendFunc {
                    src: BlendFactor::SrcAlpha,
                    dst: BlendFactor::OneMinusSrcAlpha
                },
            ]
        );
    }

    #[test]
    fn test_blend_reset_to_cache_reissues() {
        let (driver, cache) = setup();
        cache.blend_func(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
        driver.clear_calls();

        cache.blend_reset_to_cache();
        assert_eq!(driver.count_blend_func(), 1);
        assert!(driver.calls().contains(&DriverCall::BlendEquation(BlendOperation::Add)));
    }

    #[test]
    fn test_enable_vertex_attribs_toggles_changed_bits() {
        let (driver, cache) = setup();

        cache.enable_vertex_attribs(VertexAttribFlags::POS_COLOR_TEX, VaoId::DEFAULT);
        assert_eq!(driver.count_where(|c| matches!(c, DriverCall::EnableVertexAttribArray(_))), 3);

        driver.clear_calls();
        cache.enable_vertex_attribs(
            VertexAttribFlags::POSITION | VertexAttribFlags::NORMAL,
            VaoId::DEFAULT,
        );
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::DisableVertexAttribArray(1),
                DriverCall::DisableVertexAttribArray(2),
                DriverCall::EnableVertexAttribArray(3),
            ]
        );
        assert_eq!(
            cache.enabled_vertex_attribs(),
            VertexAttribFlags::POSITION | VertexAttribFlags::NORMAL
        );
    }

    #[test]
    fn test_shareable_vao_bypasses_mask() {
        let driver = Arc::new(MockDriver::new().with_shareable_vao(true));
        let cache = cache_with(&driver, StateCacheConfig::default());

        cache.enable_vertex_attribs(VertexAttribFlags::POSITION, VaoId(4));
        cache.enable_vertex_attribs(VertexAttribFlags::POSITION, VaoId(4));

        // Bound once, enabled every time, cached mask untouched
        assert_eq!(driver.count_where(|c| matches!(c, DriverCall::BindVertexArray(_))), 1);
        assert_eq!(driver.count_where(|c| matches!(c, DriverCall::EnableVertexAttribArray(0))), 2);
        assert!(cache.enabled_vertex_attribs().is_empty());

        // Back to the default VAO goes through the cache
        driver.clear_calls();
        cache.enable_vertex_attribs(VertexAttribFlags::POSITION, VaoId::DEFAULT);
        assert_eq!(driver.calls()[0], DriverCall::BindVertexArray(VaoId::DEFAULT));
    }

    #[test]
    fn test_validation_resyncs_from_driver() {
        let driver = Arc::new(MockDriver::new());
        let config = StateCacheConfig {
            enabled: true,
            validation: ValidationMode::Always,
        };
        let cache = cache_with(&driver, config);

        cache.enable_vertex_attribs(VertexAttribFlags::POSITION, VaoId::DEFAULT);
        // Foreign code enables an extra array
        driver.set_enabled_vertex_attribs_untracked(VertexAttribFlags::POSITION | VertexAttribFlags::COLOR);
        assert!(cache.validate().is_err());
        driver.clear_calls();

        cache.enable_vertex_attribs(VertexAttribFlags::POSITION, VaoId::DEFAULT);
        assert_eq!(driver.calls(), vec![DriverCall::DisableVertexAttribArray(1)]);
        assert!(cache.validate().is_ok());
    }

    #[test]
    fn test_validate_detects_program_mismatch() {
        let (driver, cache) = setup();
        cache.use_program(ProgramId(2));
        assert!(cache.validate().is_ok());

        driver.set_program_untracked(Some(ProgramId(6)));
        assert_eq!(
            cache.validate(),
            Err(StateCacheMismatch::Program {
                cached: Some(ProgramId(2)),
                actual: Some(ProgramId(6)),
            })
        );
    }

    #[test]
    fn test_disabled_cache_passes_through() {
        let driver = Arc::new(MockDriver::new());
        let config = StateCacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache = cache_with(&driver, config);

        cache.use_program(ProgramId(3));
        cache.use_program(ProgramId(3));
        cache.bind_texture_2d(TextureId(1));
        cache.bind_texture_2d(TextureId(1));

        assert_eq!(driver.count_use_program(), 2);
        assert_eq!(driver.count_bind_texture(), 2);
    }
}
