//! Render pass descriptors.
//!
//! A descriptor names the attachments of one pass and what to clear at its
//! start. Two descriptors that are [`equal_except_clear`] can share the bound
//! framebuffer; only the clears have to run again.
//!
//! [`equal_except_clear`]: RenderPassDescriptor::equal_except_clear

use kiln_test_utils::TextureId;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

/// Number of color attachment slots.
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// An externally supplied attachment texture and its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentTexture {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

impl AttachmentTexture {
    pub fn new(texture: TextureId, width: u32, height: u32) -> Self {
        Self { texture, width, height }
    }
}

/// Attachments, clear values and test flags of one render pass.
///
/// Equality compares float clear values by bit pattern so that it agrees with
/// `Hash`.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassDescriptor {
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u32,
    pub need_color_attachment: bool,
    pub depth_test_enabled: bool,
    pub stencil_test_enabled: bool,
    pub need_clear_color: bool,
    pub need_clear_depth: bool,
    pub need_clear_stencil: bool,
    pub color_attachments: [Option<AttachmentTexture>; MAX_COLOR_ATTACHMENTS],
    pub depth_attachment: Option<AttachmentTexture>,
    pub stencil_attachment: Option<AttachmentTexture>,
}

impl Default for RenderPassDescriptor {
    fn default() -> Self {
        Self {
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            clear_stencil: 0,
            need_color_attachment: true,
            depth_test_enabled: false,
            stencil_test_enabled: false,
            need_clear_color: false,
            need_clear_depth: false,
            need_clear_stencil: false,
            color_attachments: [None; MAX_COLOR_ATTACHMENTS],
            depth_attachment: None,
            stencil_attachment: None,
        }
    }
}

impl RenderPassDescriptor {
    /// Builder: clear color to `rgba` at the start of the pass.
    pub fn with_clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.need_clear_color = true;
        self.clear_color = rgba;
        self
    }

    /// Builder: clear depth to `depth` at the start of the pass.
    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.need_clear_depth = true;
        self.clear_depth = depth;
        self
    }

    /// Builder: clear stencil to `stencil` at the start of the pass.
    pub fn with_clear_stencil(mut self, stencil: u32) -> Self {
        self.need_clear_stencil = true;
        self.clear_stencil = stencil;
        self
    }

    /// Builder: render into `texture` as color attachment 0.
    pub fn with_color_attachment(mut self, texture: AttachmentTexture) -> Self {
        self.need_color_attachment = true;
        self.color_attachments[0] = Some(texture);
        self
    }

    /// Builder: depth test against `texture`.
    pub fn with_depth_attachment(mut self, texture: AttachmentTexture) -> Self {
        self.depth_test_enabled = true;
        self.depth_attachment = Some(texture);
        self
    }

    /// Builder: stencil test against `texture`.
    pub fn with_stencil_attachment(mut self, texture: AttachmentTexture) -> Self {
        self.stencil_test_enabled = true;
        self.stencil_attachment = Some(texture);
        self
    }

    /// Same attachments and test flags, regardless of clear values.
    pub fn equal_except_clear(&self, other: &Self) -> bool {
        self.need_color_attachment == other.need_color_attachment
            && self.depth_test_enabled == other.depth_test_enabled
            && self.stencil_test_enabled == other.stencil_test_enabled
            && self.color_attachments == other.color_attachments
            && self.depth_attachment == other.depth_attachment
            && self.stencil_attachment == other.stencil_attachment
    }

    /// Whether any attachment is supplied by the caller rather than the window.
    pub fn uses_external_attachment(&self) -> bool {
        (self.need_color_attachment && self.color_attachments[0].is_some())
            || (self.depth_test_enabled && self.depth_attachment.is_some())
            || (self.stencil_test_enabled && self.stencil_attachment.is_some())
    }

    /// Describe the fields that differ from `other`, for logs.
    ///
    /// Differences that force a framebuffer switch come first; clear value
    /// differences follow an `FYI:` marker.
    pub fn diff(&self, other: &Self) -> String {
        let mut out = String::new();

        field(
            &mut out,
            "need_color_attachment",
            self.need_color_attachment != other.need_color_attachment,
            self.need_color_attachment.to_string(),
            other.need_color_attachment.to_string(),
        );
        field(
            &mut out,
            "depth_test_enabled",
            self.depth_test_enabled != other.depth_test_enabled,
            self.depth_test_enabled.to_string(),
            other.depth_test_enabled.to_string(),
        );
        field(
            &mut out,
            "stencil_test_enabled",
            self.stencil_test_enabled != other.stencil_test_enabled,
            self.stencil_test_enabled.to_string(),
            other.stencil_test_enabled.to_string(),
        );
        for (i, (a, b)) in self.color_attachments.iter().zip(&other.color_attachments).enumerate() {
            field(
                &mut out,
                &format!("color_attachments[{i}]"),
                a != b,
                attachment_name(a),
                attachment_name(b),
            );
        }
        field(
            &mut out,
            "depth_attachment",
            self.depth_attachment != other.depth_attachment,
            attachment_name(&self.depth_attachment),
            attachment_name(&other.depth_attachment),
        );
        field(
            &mut out,
            "stencil_attachment",
            self.stencil_attachment != other.stencil_attachment,
            attachment_name(&self.stencil_attachment),
            attachment_name(&other.stencil_attachment),
        );

        let mut clears = String::new();
        field(
            &mut clears,
            "clear_color",
            bits4(&self.clear_color) != bits4(&other.clear_color),
            format!("{:?}", self.clear_color),
            format!("{:?}", other.clear_color),
        );
        field(
            &mut clears,
            "clear_depth",
            self.clear_depth.to_bits() != other.clear_depth.to_bits(),
            self.clear_depth.to_string(),
            other.clear_depth.to_string(),
        );
        field(
            &mut clears,
            "clear_stencil",
            self.clear_stencil != other.clear_stencil,
            self.clear_stencil.to_string(),
            other.clear_stencil.to_string(),
        );
        for (name, a, b) in [
            ("need_clear_color", self.need_clear_color, other.need_clear_color),
            ("need_clear_depth", self.need_clear_depth, other.need_clear_depth),
            ("need_clear_stencil", self.need_clear_stencil, other.need_clear_stencil),
        ] {
            field(&mut clears, name, a != b, a.to_string(), b.to_string());
        }

        if !clears.is_empty() {
            out.push_str("FYI: ");
            out.push_str(&clears);
        }

        out.trim_end_matches(", ").to_string()
    }
}

fn field(out: &mut String, name: &str, differs: bool, from: String, to: String) {
    if differs {
        let _ = write!(out, "{name} ({from} -> {to}), ");
    }
}

fn bits4(values: &[f32; 4]) -> [u32; 4] {
    values.map(f32::to_bits)
}

fn attachment_name(attachment: &Option<AttachmentTexture>) -> String {
    match attachment {
        Some(a) => format!("texture {} ({}x{})", a.texture.0, a.width, a.height),
        None => "none".to_string(),
    }
}

impl PartialEq for RenderPassDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.equal_except_clear(other)
            && bits4(&self.clear_color) == bits4(&other.clear_color)
            && self.clear_depth.to_bits() == other.clear_depth.to_bits()
            && self.clear_stencil == other.clear_stencil
            && self.need_clear_color == other.need_clear_color
            && self.need_clear_depth == other.need_clear_depth
            && self.need_clear_stencil == other.need_clear_stencil
    }
}

impl Eq for RenderPassDescriptor {}

impl Hash for RenderPassDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        bits4(&self.clear_color).hash(state);
        self.clear_depth.to_bits().hash(state);
        self.clear_stencil.hash(state);
        self.need_color_attachment.hash(state);
        self.depth_test_enabled.hash(state);
        self.stencil_test_enabled.hash(state);
        self.need_clear_color.hash(state);
        self.need_clear_depth.hash(state);
        self.need_clear_stencil.hash(state);
        self.color_attachments.hash(state);
        self.depth_attachment.hash(state);
        self.stencil_attachment.hash(state);
    }
}
