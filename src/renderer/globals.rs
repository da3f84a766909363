use glam::{Mat4, Vec4};
use std::collections::{BTreeMap, BTreeSet};

use super::commands::{RenderCommand, ShaderGlobal, ShadowKeyword};
use super::context::ShadowMapHandle;

/// Shader-visible global state after executing command lists. Values persist until overwritten,
/// keywords stay enabled until a command disables them.
#[derive(Debug, Clone, Default)]
pub struct ShaderGlobals {
    floats: BTreeMap<ShaderGlobal, f32>,
    vectors: BTreeMap<ShaderGlobal, Vec4>,
    vector_arrays: BTreeMap<ShaderGlobal, Vec<Vec4>>,
    matrix_arrays: BTreeMap<ShaderGlobal, Vec<Mat4>>,
    textures: BTreeMap<ShaderGlobal, ShadowMapHandle>,
    keywords: BTreeSet<ShadowKeyword>,
}

impl ShaderGlobals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a global-state command. Returns false for commands that do not touch globals.
    pub fn apply(&mut self, command: &RenderCommand) -> bool {
        match command {
            RenderCommand::SetFloat(global, value) => {
                self.floats.insert(*global, *value);
            }
            RenderCommand::SetVector(global, value) => {
                self.vectors.insert(*global, *value);
            }
            RenderCommand::SetVectorArray(global, values) => {
                self.vector_arrays.insert(*global, values.clone());
            }
            RenderCommand::SetMatrixArray(global, values) => {
                self.matrix_arrays.insert(*global, values.clone());
            }
            RenderCommand::SetTexture(global, texture) => {
                self.textures.insert(*global, *texture);
            }
            RenderCommand::SetKeyword(keyword, enabled) => {
                if *enabled {
                    self.keywords.insert(*keyword);
                } else {
                    self.keywords.remove(keyword);
                }
            }
            _ => return false,
        }
        true
    }

    pub fn float(&self, global: ShaderGlobal) -> Option<f32> {
        self.floats.get(&global).copied()
    }

    pub fn vector(&self, global: ShaderGlobal) -> Option<Vec4> {
        self.vectors.get(&global).copied()
    }

    pub fn vector_array(&self, global: ShaderGlobal) -> Option<&[Vec4]> {
        self.vector_arrays.get(&global).map(Vec::as_slice)
    }

    pub fn matrix_array(&self, global: ShaderGlobal) -> Option<&[Mat4]> {
        self.matrix_arrays.get(&global).map(Vec::as_slice)
    }

    pub fn texture(&self, global: ShaderGlobal) -> Option<ShadowMapHandle> {
        self.textures.get(&global).copied()
    }

    pub fn keyword_enabled(&self, keyword: ShadowKeyword) -> bool {
        self.keywords.contains(&keyword)
    }

    pub fn enabled_keywords(&self) -> impl Iterator<Item = ShadowKeyword> + '_ {
        self.keywords.iter().copied()
    }
}
