//! Materials, techniques and passes.
//!
//! A [`Material`] owns named [`Technique`]s and each technique owns an ordered
//! list of [`Pass`]es. A pass is one draw: a shared program plus the fixed
//! function state and textures to use with it.
//!
//! # Example
//!
//! ```
//! use kiln_render::blend::BlendFunc;
//! use kiln_render::material::{Material, Pass, Program, Technique};
//! use kiln_test_utils::{ProgramId, TextureId};
//! use std::sync::Arc;
//!
//! let sprite = Arc::new(Program::new(ProgramId(1), "sprite"));
//! let mut pass = Pass::new("base", sprite);
//! pass.state.blend = BlendFunc::ALPHA_PREMULTIPLIED;
//! pass.set_texture(0, TextureId(7));
//!
//! let mut material = Material::new("hero");
//! material.add_technique(Technique::new("normal").with_pass(pass));
//! assert!(material.set_technique("normal"));
//! ```

use crate::blend::BlendFunc;
use crate::command::{MaterialId, TrianglesCommand};
use crate::command_buffer::CommandBuffer;
use crate::depth_stencil::{DepthStencilDescriptor, DepthStencilStateCache};
use kiln_test_utils::{ProgramId, TextureId};
use std::sync::Arc;
use wgpu::{Face, FrontFace};

/// A linked GPU program, shared between passes.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Program {
    pub id: ProgramId,
    pub label: String,
}

impl Program {
    pub fn new(id: ProgramId, label: impl Into<String>) -> Self {
        Self { id, label: label.into() }
    }
}

/// Fixed function state of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateBlock {
    pub blend: BlendFunc,
    /// Faces to cull; `None` draws both.
    pub cull_mode: Option<Face>,
    pub winding: FrontFace,
    pub depth_stencil: DepthStencilDescriptor,
}

impl Default for StateBlock {
    fn default() -> Self {
        Self {
            blend: BlendFunc::default(),
            cull_mode: None,
            winding: FrontFace::Ccw,
            depth_stencil: DepthStencilDescriptor::default(),
        }
    }
}

/// One draw of a technique.
#[derive(Debug, Clone)]
pub struct Pass {
    pub name: String,
    program: Arc<Program>,
    pub state: StateBlock,
    /// Texture per unit, sorted by unit.
    textures: Vec<(u32, TextureId)>,
}

impl Pass {
    pub fn new(name: impl Into<String>, program: Arc<Program>) -> Self {
        Self {
            name: name.into(),
            program,
            state: StateBlock::default(),
            textures: Vec::new(),
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn set_program(&mut self, program: Arc<Program>) {
        self.program = program;
    }

    /// Bind `texture` to `unit`, replacing any texture already there.
    pub fn set_texture(&mut self, unit: u32, texture: TextureId) {
        match self.textures.binary_search_by_key(&unit, |(u, _)| *u) {
            Ok(i) => self.textures[i].1 = texture,
            Err(i) => self.textures.insert(i, (unit, texture)),
        }
    }

    pub fn texture(&self, unit: u32) -> Option<TextureId> {
        self.textures
            .binary_search_by_key(&unit, |(u, _)| *u)
            .ok()
            .map(|i| self.textures[i].1)
    }

    pub fn textures(&self) -> &[(u32, TextureId)] {
        &self.textures
    }

    /// Id covering the program, every texture binding and the whole state block.
    pub fn material_id(&self) -> MaterialId {
        MaterialId::from_key(&(self.program.id, &self.textures, &self.state))
    }

    /// An empty sprite command drawn with this pass's program, unit 0 texture and blend.
    ///
    /// Sprite batches carry no cull, winding or depth-stencil state, so the
    /// command's id differs from [`material_id`](Self::material_id).
    pub fn triangles_command(&self) -> TrianglesCommand {
        TrianglesCommand::new(self.program.id, self.main_texture(), self.state.blend)
    }

    fn main_texture(&self) -> TextureId {
        self.texture(0).unwrap_or(TextureId::NONE)
    }

    /// Make this pass's program, textures and state current.
    pub fn bind(&self, command_buffer: &mut CommandBuffer, depth_stencil_states: &DepthStencilStateCache) {
        command_buffer.use_program(self.program.id);
        for &(unit, texture) in &self.textures {
            command_buffer.bind_texture(unit, texture);
        }
        command_buffer.set_blend_func(self.state.blend);
        command_buffer.set_cull_mode(self.state.cull_mode);
        command_buffer.set_winding(self.state.winding);
        command_buffer.set_depth_stencil_state(Some(
            depth_stencil_states.get_or_create_state(&self.state.depth_stencil),
        ));
    }
}

/// A named, ordered list of passes.
#[derive(Debug, Clone)]
pub struct Technique {
    pub name: String,
    passes: Vec<Pass>,
}

impl Technique {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: Vec::new(),
        }
    }

    pub fn with_pass(mut self, pass: Pass) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn add_pass(&mut self, pass: Pass) {
        self.passes.push(pass);
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn passes_mut(&mut self) -> &mut [Pass] {
        &mut self.passes
    }

    pub fn pass(&self, name: &str) -> Option<&Pass> {
        self.passes.iter().find(|p| p.name == name)
    }
}

/// A set of techniques with one current technique.
///
/// Cloning copies the whole tree; programs stay shared.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    techniques: Vec<Technique>,
    current: usize,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            techniques: Vec::new(),
            current: 0,
        }
    }

    /// Add a technique. The first one added becomes current.
    pub fn add_technique(&mut self, technique: Technique) {
        self.techniques.push(technique);
    }

    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    pub fn technique_by_name(&self, name: &str) -> Option<&Technique> {
        self.techniques.iter().find(|t| t.name == name)
    }

    pub fn technique_by_name_mut(&mut self, name: &str) -> Option<&mut Technique> {
        self.techniques.iter_mut().find(|t| t.name == name)
    }

    /// Make `name` the current technique. Returns `false` and keeps the
    /// current one when there is no such technique.
    pub fn set_technique(&mut self, name: &str) -> bool {
        match self.techniques.iter().position(|t| t.name == name) {
            Some(index) => {
                self.current = index;
                true
            }
            None => {
                tracing::warn!("Material '{}' has no technique '{}'", self.name, name);
                false
            }
        }
    }

    pub fn technique(&self) -> Option<&Technique> {
        self.techniques.get(self.current)
    }

    /// Id of the current technique's passes, in order.
    pub fn material_id(&self) -> MaterialId {
        let passes: Vec<MaterialId> = self
            .technique()
            .map(|t| t.passes.iter().map(Pass::material_id).collect())
            .unwrap_or_default();
        MaterialId::from_key(&passes)
    }
}
