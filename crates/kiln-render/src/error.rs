//! Error types for the renderer core.

use crate::queue::RenderQueueId;
use kiln_test_utils::{ProgramId, VertexAttribFlags};

/// Renderer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A command was submitted after `render` and before `end_frame`.
    AddWhileRendering,
    /// The queue id does not name a queue of this renderer.
    InvalidQueue(RenderQueueId),
    /// `pop_group` was called with only the default queue on the stack.
    EmptyGroupStack,
    /// A single command does not fit into an empty batch buffer.
    CommandTooLarge { vertices: usize, indices: usize },
    /// A custom command callback reported a failure.
    Callback(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddWhileRendering => write!(f, "Cannot add commands while the frame is being rendered"),
            Self::InvalidQueue(id) => write!(f, "Render queue {:?} does not exist", id),
            Self::EmptyGroupStack => write!(f, "Cannot pop the default render queue"),
            Self::CommandTooLarge { vertices, indices } => write!(
                f,
                "Command with {} vertices and {} indices exceeds the batch capacity",
                vertices, indices
            ),
            Self::Callback(msg) => write!(f, "Custom command failed: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

/// A cached binding that disagrees with the state queried from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCacheMismatch {
    Program {
        cached: Option<ProgramId>,
        actual: Option<ProgramId>,
    },
    VertexAttribs {
        cached: VertexAttribFlags,
        actual: VertexAttribFlags,
    },
}

impl std::fmt::Display for StateCacheMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Program { cached, actual } => {
                write!(f, "Program cache out of sync: cached {:?}, driver {:?}", cached, actual)
            }
            Self::VertexAttribs { cached, actual } => write!(
                f,
                "Vertex attribute cache out of sync: cached {:#06x}, driver {:#06x}",
                cached.bits(),
                actual.bits()
            ),
        }
    }
}

impl std::error::Error for StateCacheMismatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::InvalidQueue(RenderQueueId(4));
        assert!(format!("{}", err).contains("does not exist"));

        let err = RenderError::CommandTooLarge {
            vertices: 70000,
            indices: 6,
        };
        assert!(format!("{}", err).contains("70000"));

        let err = StateCacheMismatch::VertexAttribs {
            cached: VertexAttribFlags::POSITION,
            actual: VertexAttribFlags::empty(),
        };
        assert!(format!("{}", err).contains("0x0001"));
    }
}
