//! Depth/stencil state objects and their cache.
//!
//! A [`DepthStencilDescriptor`] is a plain value. The cache turns each distinct
//! value into one shared [`DepthStencilState`], so the command buffer can tell
//! whether the state changed with a pointer comparison.

use crate::command_buffer::{CommandBuffer, StencilFunc, StencilOps};
use crate::state_cache::{CachePolicy, StateCache};
use std::sync::Arc;
use wgpu::{CompareFunction, StencilOperation};

/// Stencil behaviour for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilDescriptor {
    pub stencil_failure_op: StencilOperation,
    pub depth_failure_op: StencilOperation,
    pub depth_stencil_pass_op: StencilOperation,
    pub compare: CompareFunction,
    pub read_mask: u8,
    pub write_mask: u8,
}

impl Default for StencilDescriptor {
    fn default() -> Self {
        Self {
            stencil_failure_op: StencilOperation::Keep,
            depth_failure_op: StencilOperation::Keep,
            depth_stencil_pass_op: StencilOperation::Keep,
            compare: CompareFunction::Always,
            read_mask: 0,
            write_mask: 0,
        }
    }
}

impl StencilDescriptor {
    fn func(&self, reference: u32) -> StencilFunc {
        StencilFunc {
            compare: self.compare,
            reference,
            read_mask: self.read_mask,
        }
    }

    fn ops(&self) -> StencilOps {
        StencilOps {
            fail: self.stencil_failure_op,
            depth_fail: self.depth_failure_op,
            pass: self.depth_stencil_pass_op,
        }
    }

    fn to_wgpu(self) -> wgpu::StencilFaceState {
        wgpu::StencilFaceState {
            compare: self.compare,
            fail_op: self.stencil_failure_op,
            depth_fail_op: self.depth_failure_op,
            pass_op: self.depth_stencil_pass_op,
        }
    }
}

/// Depth and stencil configuration for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDescriptor {
    pub depth_compare: CompareFunction,
    pub depth_write: bool,
    pub depth_test: bool,
    pub stencil_test: bool,
    pub front: StencilDescriptor,
    pub back: StencilDescriptor,
}

impl Default for DepthStencilDescriptor {
    fn default() -> Self {
        Self {
            depth_compare: CompareFunction::Less,
            depth_write: false,
            depth_test: false,
            stencil_test: false,
            front: StencilDescriptor::default(),
            back: StencilDescriptor::default(),
        }
    }
}

impl DepthStencilDescriptor {
    /// Depth test with `compare`, writing depth when `write` is set.
    pub fn depth(compare: CompareFunction, write: bool) -> Self {
        Self {
            depth_compare: compare,
            depth_write: write,
            depth_test: true,
            ..Default::default()
        }
    }

    /// Convert to the wgpu pipeline state for a depth attachment of `format`.
    ///
    /// Stencil masks are taken from the front face; wgpu has no per-face masks.
    pub fn to_wgpu(&self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        let stencil = if self.stencil_test {
            wgpu::StencilState {
                front: self.front.to_wgpu(),
                back: self.back.to_wgpu(),
                read_mask: u32::from(self.front.read_mask),
                write_mask: u32::from(self.front.write_mask),
            }
        } else {
            wgpu::StencilState::default()
        };

        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_test && self.depth_write,
            depth_compare: if self.depth_test {
                self.depth_compare
            } else {
                CompareFunction::Always
            },
            stencil,
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

/// An immutable, applied form of a [`DepthStencilDescriptor`].
#[derive(Debug)]
pub struct DepthStencilState {
    descriptor: DepthStencilDescriptor,
    is_back_front_stencil_equal: bool,
}

impl DepthStencilState {
    pub fn new(descriptor: DepthStencilDescriptor) -> Self {
        Self {
            is_back_front_stencil_equal: descriptor.front == descriptor.back,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &DepthStencilDescriptor {
        &self.descriptor
    }

    pub fn is_back_front_stencil_equal(&self) -> bool {
        self.is_back_front_stencil_equal
    }

    /// Apply this state through the command buffer's cached setters.
    pub fn apply(&self, front_ref: u32, back_ref: u32, command_buffer: &mut CommandBuffer) {
        let desc = &self.descriptor;

        command_buffer.set_depth_test(desc.depth_test);
        command_buffer.set_depth_mask(desc.depth_write);
        command_buffer.set_depth_func(desc.depth_compare);
        command_buffer.set_stencil_test(desc.stencil_test);

        if !desc.stencil_test {
            return;
        }

        if self.is_back_front_stencil_equal {
            command_buffer.set_stencil_func(desc.front.func(front_ref));
            command_buffer.set_stencil_op(desc.front.ops());
            command_buffer.set_stencil_mask(desc.front.write_mask);
        } else {
            command_buffer.set_stencil_func_separate(desc.back.func(back_ref), desc.front.func(front_ref));
            command_buffer.set_stencil_op_separate(desc.back.ops(), desc.front.ops());
            command_buffer.set_stencil_mask_separate(desc.back.write_mask, desc.front.write_mask);
        }
    }
}

/// Cache handing out one [`DepthStencilState`] per distinct descriptor.
pub struct DepthStencilStateCache {
    states: StateCache<DepthStencilDescriptor, DepthStencilState>,
}

impl DepthStencilStateCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            states: StateCache::new(policy, |descriptor: &DepthStencilDescriptor| {
                tracing::debug!("creating depth-stencil state {:?}", descriptor);
                DepthStencilState::new(*descriptor)
            }),
        }
    }

    /// Get the shared state for `descriptor`; equal descriptors return the same `Arc`.
    pub fn get_or_create_state(&self, descriptor: &DepthStencilDescriptor) -> Arc<DepthStencilState> {
        self.states.get_or_create_state(descriptor)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&self) {
        self.states.clear();
    }
}

impl Default for DepthStencilStateCache {
    fn default() -> Self {
        Self::new(CachePolicy::Unbounded)
    }
}
