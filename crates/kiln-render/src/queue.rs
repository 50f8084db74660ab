//! Render queues.

use crate::command::RenderCommand;

/// Index of a queue owned by a [`Renderer`](crate::renderer::Renderer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderQueueId(pub usize);

impl RenderQueueId {
    /// The queue `Renderer::render` starts from.
    pub const DEFAULT: Self = Self(0);
}

/// Commands of one queue, split into an opaque and a transparent bucket.
#[derive(Debug, Default)]
pub struct RenderQueue {
    opaque: Vec<RenderCommand>,
    transparent: Vec<RenderCommand>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `command` to the bucket its `transparent` flag selects.
    pub fn push(&mut self, command: RenderCommand) {
        if command.transparent {
            self.transparent.push(command);
        } else {
            self.opaque.push(command);
        }
    }

    /// Sort both buckets for drawing.
    ///
    /// Opaque commands go front to back by z order, then by material so equal
    /// materials end up adjacent. Transparent commands go back to front. Both
    /// sorts are stable.
    pub fn sort(&mut self) {
        self.opaque.sort_by(|a, b| {
            a.global_z_order
                .total_cmp(&b.global_z_order)
                .then_with(|| a.material_id().cmp(&b.material_id()))
        });
        self.transparent
            .sort_by(|a, b| b.global_z_order.total_cmp(&a.global_z_order));
    }

    pub fn opaque(&self) -> &[RenderCommand] {
        &self.opaque
    }

    pub fn transparent(&self) -> &[RenderCommand] {
        &self.transparent
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty()
    }

    /// Take both buckets, leaving the queue empty.
    pub fn take_buckets(&mut self) -> (Vec<RenderCommand>, Vec<RenderCommand>) {
        (
            std::mem::take(&mut self.opaque),
            std::mem::take(&mut self.transparent),
        )
    }

    /// Put buckets taken with [`take_buckets`](Self::take_buckets) back.
    ///
    /// Commands pushed in the meantime are kept after the restored ones.
    pub fn restore_buckets(&mut self, mut opaque: Vec<RenderCommand>, mut transparent: Vec<RenderCommand>) {
        opaque.append(&mut self.opaque);
        transparent.append(&mut self.transparent);
        self.opaque = opaque;
        self.transparent = transparent;
    }

    /// Remove every command from both buckets.
    pub fn drain(&mut self) -> impl Iterator<Item = RenderCommand> + '_ {
        self.opaque.drain(..).chain(self.transparent.drain(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendFunc;
    use crate::command::TrianglesCommand;
    use kiln_test_utils::{ProgramId, TextureId};

    fn z_orders(commands: &[RenderCommand]) -> Vec<f32> {
        commands.iter().map(|c| c.global_z_order).collect()
    }

    fn geometry(z: f32, texture: u32) -> RenderCommand {
        RenderCommand::triangles(
            z,
            TrianglesCommand::new(ProgramId(1), TextureId(texture), BlendFunc::DISABLE),
        )
    }

    #[test]
    fn test_opaque_ascending_transparent_descending() {
        let mut queue = RenderQueue::new();
        for z in [3.0, 1.0, 2.0] {
            queue.push(RenderCommand::callback(z, || {}));
            queue.push(RenderCommand::callback(z, || {}).with_transparent(true));
        }

        queue.sort();
        assert_eq!(z_orders(queue.opaque()), vec![1.0, 2.0, 3.0]);
        assert_eq!(z_orders(queue.transparent()), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_equal_z_groups_by_material() {
        let mut queue = RenderQueue::new();
        queue.push(geometry(0.0, 1));
        queue.push(geometry(0.0, 2));
        queue.push(geometry(0.0, 1));
        queue.sort();

        let ids: Vec<_> = queue.opaque().iter().map(|c| c.material_id()).collect();
        assert!(ids[0] == ids[1] || ids[1] == ids[2]);
        assert!(ids[0] <= ids[1] && ids[1] <= ids[2]);
    }

    #[test]
    fn test_sort_is_stable_and_nan_safe() {
        let mut queue = RenderQueue::new();
        queue.push(RenderCommand::group(1.0, RenderQueueId(1)));
        queue.push(RenderCommand::callback(f32::NAN, || {}));
        queue.push(RenderCommand::group(1.0, RenderQueueId(2)));
        queue.sort();

        let groups: Vec<_> = queue
            .opaque()
            .iter()
            .filter_map(|c| match c.kind {
                crate::command::CommandKind::Group(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(groups, vec![RenderQueueId(1), RenderQueueId(2)]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_restore_keeps_late_commands() {
        let mut queue = RenderQueue::new();
        queue.push(RenderCommand::callback(1.0, || {}));
        let (opaque, transparent) = queue.take_buckets();
        assert!(queue.is_empty());

        queue.push(RenderCommand::callback(2.0, || {}));
        queue.restore_buckets(opaque, transparent);
        assert_eq!(z_orders(queue.opaque()), vec![1.0, 2.0]);
        assert_eq!(queue.drain().count(), 2);
    }
}
