// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recording backend without a GPU, for tests and offline pipeline runs.

use super::{BackendError, ProgramId, ProgramSource, RenderBackend, UniformBindings};
use crate::value::{RenderTarget, TargetId, TextureId};
use indexmap::IndexMap;

/// A backend call, as recorded by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Program compiled
    Compile(ProgramId),
    /// Target allocated
    Allocate(TargetId),
    /// Target bound, `None` for the final surface
    Bind(Option<TargetId>),
    /// Bound target cleared
    Clear,
    /// Uniforms bound on a program
    Uniforms(ProgramId, UniformBindings),
    /// Full-screen quad drawn
    Draw {
        /// Program used
        program: ProgramId,
        /// Target written, `None` for the final surface
        target: Option<TargetId>,
    },
}

/// Backend that records every call instead of rendering
#[derive(Debug)]
pub struct HeadlessBackend {
    programs: IndexMap<ProgramId, ProgramSource>,
    commands: Vec<Command>,
    bound: Option<TargetId>,
    next_handle: u64,
    camera: (f32, f32),
    max_texture_units: usize,
}

impl HeadlessBackend {
    /// Create a backend with the given sampler budget
    pub fn new(max_texture_units: usize) -> Self {
        Self {
            programs: IndexMap::new(),
            commands: Vec::new(),
            bound: None,
            next_handle: 1,
            camera: (0.1, 1000.0),
            max_texture_units,
        }
    }

    /// Recorded commands
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Forget recorded commands, keeping programs and targets
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Source a program was compiled from
    pub fn program(&self, id: ProgramId) -> Option<&ProgramSource> {
        self.programs.get(&id)
    }

    /// Number of programs compiled so far
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Recorded draws as `(program, target)` pairs
    pub fn draws(&self) -> impl Iterator<Item = (ProgramId, Option<TargetId>)> + '_ {
        self.commands.iter().filter_map(|command| match command {
            Command::Draw { program, target } => Some((*program, *target)),
            _ => None,
        })
    }

    /// Uniforms most recently bound on a program
    pub fn last_uniforms(&self, id: ProgramId) -> Option<&UniformBindings> {
        self.commands.iter().rev().find_map(|command| match command {
            Command::Uniforms(program, uniforms) if *program == id => Some(uniforms),
            _ => None,
        })
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(16)
    }
}

impl RenderBackend for HeadlessBackend {
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, BackendError> {
        if source.fragment.trim().is_empty() {
            return Err(BackendError::Compile("empty fragment stage".to_string()));
        }
        let id = ProgramId(self.next_handle());
        self.programs.insert(id, source.clone());
        self.commands.push(Command::Compile(id));
        Ok(id)
    }

    fn allocate_target(&mut self, width: u32, height: u32, with_depth: bool) -> RenderTarget {
        let id = TargetId(self.next_handle());
        let color = TextureId(self.next_handle());
        let depth = with_depth.then(|| TextureId(self.next_handle()));
        self.commands.push(Command::Allocate(id));
        RenderTarget {
            id,
            width,
            height,
            color,
            depth,
        }
    }

    fn bind_target(&mut self, target: Option<&RenderTarget>) {
        self.bound = target.map(|t| t.id);
        self.commands.push(Command::Bind(self.bound));
    }

    fn clear(&mut self) {
        self.commands.push(Command::Clear);
    }

    fn bind_uniforms(
        &mut self,
        program: ProgramId,
        uniforms: &UniformBindings,
    ) -> Result<(), BackendError> {
        if !self.programs.contains_key(&program) {
            return Err(BackendError::UnknownProgram(program));
        }
        self.commands.push(Command::Uniforms(program, uniforms.clone()));
        Ok(())
    }

    fn draw_fullscreen_quad(&mut self, program: ProgramId) -> Result<(), BackendError> {
        if !self.programs.contains_key(&program) {
            return Err(BackendError::UnknownProgram(program));
        }
        self.commands.push(Command::Draw {
            program,
            target: self.bound,
        });
        Ok(())
    }

    fn set_camera_planes(&mut self, near: f32, far: f32) {
        self.camera = (near, far);
    }

    fn camera_planes(&self) -> (f32, f32) {
        self.camera
    }

    fn max_texture_units(&self) -> usize {
        self.max_texture_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_draws() {
        let mut backend = HeadlessBackend::default();
        let program = backend
            .compile_program(&ProgramSource {
                vertex: "void main() {}".to_string(),
                fragment: "void main() {}".to_string(),
            })
            .unwrap();
        let target = backend.allocate_target(8, 8, true);
        assert!(target.depth.is_some());

        backend.bind_target(Some(&target));
        backend.clear();
        backend.draw_fullscreen_quad(program).unwrap();
        backend.bind_target(None);
        backend.draw_fullscreen_quad(program).unwrap();

        let draws: Vec<_> = backend.draws().collect();
        assert_eq!(draws, vec![(program, Some(target.id)), (program, None)]);
    }

    #[test]
    fn test_unknown_program_rejected() {
        let mut backend = HeadlessBackend::default();
        assert!(matches!(
            backend.draw_fullscreen_quad(ProgramId(99)),
            Err(BackendError::UnknownProgram(ProgramId(99)))
        ));
    }
}
