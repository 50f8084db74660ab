//! Blend function presets.

use wgpu::BlendFactor;

/// Source and destination blend factors for one draw.
///
/// `One, Zero` means "no blending"; the state cache disables blending for it
/// instead of setting the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFunc {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendFunc {
    /// No blending - source completely replaces destination.
    pub const DISABLE: Self = Self::new(BlendFactor::One, BlendFactor::Zero);

    /// Blending for premultiplied alpha.
    ///
    /// Formula: `src.rgb + dst.rgb * (1 - src.a)`
    pub const ALPHA_PREMULTIPLIED: Self = Self::new(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);

    /// Standard alpha blending.
    ///
    /// Formula: `src.rgb * src.a + dst.rgb * (1 - src.a)`
    pub const ALPHA_NON_PREMULTIPLIED: Self = Self::new(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);

    /// Additive blending for glow and particles.
    ///
    /// Formula: `src.rgb * src.a + dst.rgb`
    pub const ADDITIVE: Self = Self::new(BlendFactor::SrcAlpha, BlendFactor::One);

    pub const fn new(src: BlendFactor, dst: BlendFactor) -> Self {
        Self { src, dst }
    }

    pub fn is_disabled(self) -> bool {
        self == Self::DISABLE
    }

    /// Convert to a wgpu blend state. `None` when blending is disabled.
    pub fn to_blend_state(self) -> Option<wgpu::BlendState> {
        if self.is_disabled() {
            return None;
        }

        let component = wgpu::BlendComponent {
            src_factor: self.src,
            dst_factor: self.dst,
            operation: wgpu::BlendOperation::Add,
        };
        Some(wgpu::BlendState {
            color: component,
            alpha: component,
        })
    }

    /// Create a color target state with this blend function.
    pub fn to_color_target_state(self, format: wgpu::TextureFormat) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format,
            blend: self.to_blend_state(),
            write_mask: wgpu::ColorWrites::ALL,
        }
    }
}

impl Default for BlendFunc {
    fn default() -> Self {
        Self::ALPHA_PREMULTIPLIED
    }
}

impl From<BlendFunc> for Option<wgpu::BlendState> {
    fn from(func: BlendFunc) -> Self {
        func.to_blend_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_has_no_blend_state() {
        assert!(BlendFunc::DISABLE.is_disabled());
        assert_eq!(BlendFunc::DISABLE.to_blend_state(), None);
    }

    #[test]
    fn test_premultiplied_matches_wgpu_color() {
        let state = BlendFunc::ALPHA_PREMULTIPLIED.to_blend_state();
        assert_eq!(
            state.map(|s| s.color),
            Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING.color)
        );
    }
}
