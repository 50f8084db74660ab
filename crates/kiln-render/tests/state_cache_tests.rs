//! Integration tests for command buffers on top of the shared GL state cache,
//! depth-stencil states and render pass reuse.

use kiln_render::command_buffer::CommandBuffer;
use kiln_render::config::StateCacheConfig;
use kiln_render::depth_stencil::{DepthStencilDescriptor, DepthStencilStateCache, StencilDescriptor};
use kiln_render::gl_state::GlStateCache;
use kiln_render::render_pass::{AttachmentTexture, RenderPassDescriptor};
use kiln_test_utils::{Capability, ClearMask, DriverCall, GlDriver, MockDriver, ProgramId, TextureId};
use std::sync::Arc;
use std::thread;
use wgpu::{CompareFunction, PrimitiveTopology, StencilOperation};

fn state_cache(config: StateCacheConfig) -> (Arc<MockDriver>, Arc<GlStateCache>) {
    kiln_core::logging::init_for_tests();
    let driver = Arc::new(MockDriver::new());
    let cache = Arc::new(GlStateCache::new(Arc::clone(&driver) as Arc<dyn GlDriver>, config));
    (driver, cache)
}

#[test]
fn test_command_buffers_share_bindings() {
    let (driver, cache) = state_cache(StateCacheConfig::default());
    let mut sprites = CommandBuffer::new(Arc::clone(&cache));
    let mut overlay = CommandBuffer::new(Arc::clone(&cache));

    sprites.use_program(ProgramId(3));
    sprites.bind_texture(0, TextureId(8));
    overlay.use_program(ProgramId(3));
    overlay.bind_texture(0, TextureId(8));
    assert_eq!(driver.count_use_program(), 1);
    assert_eq!(driver.count_bind_texture(), 1);

    // One buffer changes the binding, the other must notice
    overlay.use_program(ProgramId(4));
    sprites.use_program(ProgramId(3));
    assert_eq!(driver.current_program(), Some(ProgramId(3)));
    assert_eq!(driver.count_use_program(), 3);
}

#[test]
fn test_delete_on_another_thread_reaches_command_buffer() {
    let (driver, cache) = state_cache(StateCacheConfig::default());
    let mut cb = CommandBuffer::new(Arc::clone(&cache));
    cb.use_program(ProgramId(5));
    cb.bind_texture(0, TextureId(9));

    thread::scope(|s| {
        s.spawn(|| {
            cache.delete_program(ProgramId(5));
            cache.delete_texture(TextureId(9));
        });
    });
    driver.clear_calls();

    // The driver may hand the ids out again, so they must be bound again here
    cb.use_program(ProgramId(5));
    cb.bind_texture(0, TextureId(9));
    assert_eq!(driver.count_use_program(), 1);
    assert_eq!(driver.count_bind_texture(), 1);
}

#[test]
fn test_shared_fields_are_elided_across_states() {
    let (driver, cache) = state_cache(StateCacheConfig::default());
    let mut cb = CommandBuffer::new(cache);
    let states = DepthStencilStateCache::default();

    let write = states.get_or_create_state(&DepthStencilDescriptor::depth(CompareFunction::LessEqual, true));
    let read = states.get_or_create_state(&DepthStencilDescriptor::depth(CompareFunction::LessEqual, false));

    cb.set_depth_stencil_state(Some(write));
    cb.draw_arrays(PrimitiveTopology::TriangleList, 0, 3);
    driver.clear_calls();

    cb.set_depth_stencil_state(Some(read));
    cb.draw_arrays(PrimitiveTopology::TriangleList, 0, 3);

    // Only the depth mask differs between the two states
    assert_eq!(
        driver.calls(),
        vec![
            DriverCall::DepthMask(false),
            DriverCall::DrawArrays {
                topology: PrimitiveTopology::TriangleList,
                first: 0,
                count: 3,
            },
        ]
    );
}

#[test]
fn test_stencil_state_apply_sequence() {
    let (driver, cache) = state_cache(StateCacheConfig::default());
    let mut cb = CommandBuffer::new(cache);
    let states = DepthStencilStateCache::default();

    let face = StencilDescriptor {
        depth_stencil_pass_op: StencilOperation::Replace,
        read_mask: 0xff,
        write_mask: 0xff,
        ..Default::default()
    };
    let desc = DepthStencilDescriptor {
        stencil_test: true,
        front: face,
        back: face,
        ..Default::default()
    };
    cb.set_depth_stencil_state(Some(states.get_or_create_state(&desc)));
    cb.set_stencil_reference_value(1, 1);
    cb.draw_arrays(PrimitiveTopology::TriangleList, 0, 3);

    assert_eq!(
        driver.calls(),
        vec![
            DriverCall::Disable(Capability::DepthTest),
            DriverCall::DepthMask(false),
            DriverCall::DepthFunc(CompareFunction::Less),
            DriverCall::Enable(Capability::StencilTest),
            DriverCall::StencilFunc {
                face: None,
                function: CompareFunction::Always,
                reference: 1,
                read_mask: 0xff,
            },
            DriverCall::StencilOp {
                face: None,
                fail: StencilOperation::Keep,
                depth_fail: StencilOperation::Keep,
                pass: StencilOperation::Replace,
            },
            DriverCall::StencilMask {
                face: None,
                write_mask: 0xff,
            },
            DriverCall::DrawArrays {
                topology: PrimitiveTopology::TriangleList,
                first: 0,
                count: 3,
            },
        ]
    );
}

#[test]
fn test_clear_only_pass_change_reuses_framebuffer() {
    let (driver, cache) = state_cache(StateCacheConfig::default());
    let mut cb = CommandBuffer::new(cache);
    let target = AttachmentTexture::new(TextureId(12), 64, 64);

    let first = RenderPassDescriptor::default()
        .with_color_attachment(target)
        .with_clear_color([1.0, 0.0, 0.0, 1.0]);
    let second = RenderPassDescriptor::default()
        .with_color_attachment(target)
        .with_clear_color([0.0, 1.0, 0.0, 1.0]);

    cb.begin_render_pass(&first);
    let binds = driver.count_bind_framebuffer();
    let attaches = driver.count_framebuffer_attach();

    cb.begin_render_pass(&second);

    assert_eq!(driver.count_bind_framebuffer(), binds);
    assert_eq!(driver.count_framebuffer_attach(), attaches);
    assert_eq!(driver.count_clear(), 2);
    assert_eq!(driver.calls().last(), Some(&DriverCall::Clear(ClearMask::COLOR)));
}

#[test]
fn test_attachment_change_rebinds_framebuffer() {
    let (driver, cache) = state_cache(StateCacheConfig::default());
    let mut cb = CommandBuffer::new(cache);

    cb.begin_render_pass(&RenderPassDescriptor::default());
    cb.begin_render_pass(
        &RenderPassDescriptor::default().with_color_attachment(AttachmentTexture::new(TextureId(12), 64, 64)),
    );
    cb.begin_render_pass(&RenderPassDescriptor::default());

    assert_eq!(driver.count_bind_framebuffer(), 3);
    assert!(driver.bound_framebuffer().is_none());
}
