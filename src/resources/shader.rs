//! WGSL shaders and linked programs
//!
//! Shaders are compiled with naga up front so that syntax and validation
//! errors surface as log diagnostics instead of device errors. A [`Program`]
//! pairs a vertex and a fragment shader, reflects their bindings by name and
//! lazily builds one render pipeline per target configuration.

use crate::backend::*;
use crate::context::{ReleaseQueue, Released, RenderContext};
use crate::error::ShaderError;
use std::collections::HashMap;
use std::path::Path;

/// Vertex inputs a mesh can feed, in vertex-buffer block order
pub const VERTEX_STREAMS: [&str; 4] = ["in_position", "in_normal", "in_texcoord", "in_tangent"];

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";
/// Fragment entry writing color, normal and position to a geometry buffer
pub const GBUFFER_FRAGMENT_ENTRY: &str = "fs_gbuffer";

/// Bind group holding the per-draw `draw` uniform
pub const DRAW_GROUP: u32 = 0;
/// Bind group holding textures and samplers
pub const TEXTURE_GROUP: u32 = 1;
/// Bind group holding a pass-specific parameter uniform
pub const PARAMS_GROUP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// A single WGSL module
pub struct Shader {
    name: String,
    stage: ShaderStage,
    source: String,
    module: Option<naga::Module>,
}

impl Shader {
    /// Compile `source`. Failures are logged and leave the shader unusable.
    pub fn from_source(name: &str, stage: ShaderStage, source: &str) -> Self {
        let module = match compile(source) {
            Ok(module) => Some(module),
            Err(e) => {
                log::error!("errors occurred during compilation of {}:\n{}", name, e);
                None
            }
        };

        Self {
            name: name.to_string(),
            stage,
            source: source.to_string(),
            module,
        }
    }

    /// Read and compile a WGSL file
    pub fn from_file<P: AsRef<Path>>(path: P, stage: ShaderStage) -> Self {
        let path = path.as_ref();
        let name = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_source(&name, stage, &source),
            Err(source) => {
                let e = ShaderError::Io {
                    path: path.to_path_buf(),
                    source,
                };
                log::error!("errors occurred during compilation of {}:\n{}", name, e);
                Self {
                    name,
                    stage,
                    source: String::new(),
                    module: None,
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn is_compiled(&self) -> bool {
        self.module.is_some()
    }

    /// Whether the module declares an entry point `name` for its stage
    pub fn has_entry_point(&self, name: &str) -> bool {
        let stage = match self.stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        };
        self.module.as_ref().is_some_and(|m| {
            m.entry_points
                .iter()
                .any(|ep| ep.name == name && ep.stage == stage)
        })
    }
}

fn compile(source: &str) -> Result<naga::Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| ShaderError::Parse(e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| ShaderError::Validation(e.emit_to_string(source)))?;

    Ok(module)
}

/// What a reflected global binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Uniform,
    Texture,
    Sampler,
}

/// Location of a named global in the bind group layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalBinding {
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

fn reflect_globals(module: &naga::Module, out: &mut HashMap<String, GlobalBinding>) {
    for (_, var) in module.global_variables.iter() {
        let (Some(name), Some(resource)) = (&var.name, &var.binding) else {
            continue;
        };
        let kind = match module.types[var.ty].inner {
            naga::TypeInner::Image { .. } => BindingKind::Texture,
            naga::TypeInner::Sampler { .. } => BindingKind::Sampler,
            _ => BindingKind::Uniform,
        };
        out.insert(
            name.clone(),
            GlobalBinding {
                group: resource.group,
                binding: resource.binding,
                kind,
            },
        );
    }
}

fn reflect_vertex_inputs(module: &naga::Module) -> HashMap<String, u32> {
    let mut inputs = HashMap::new();
    let Some(entry) = module
        .entry_points
        .iter()
        .find(|ep| ep.name == VERTEX_ENTRY && ep.stage == naga::ShaderStage::Vertex)
    else {
        return inputs;
    };

    for arg in &entry.function.arguments {
        match &arg.binding {
            Some(naga::Binding::Location { location, .. }) => {
                if let Some(name) = &arg.name {
                    inputs.insert(name.clone(), *location);
                }
            }
            Some(naga::Binding::BuiltIn(_)) => {}
            None => {
                if let naga::TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                    for member in members {
                        if let (Some(name), Some(naga::Binding::Location { location, .. })) =
                            (&member.name, &member.binding)
                        {
                            inputs.insert(name.clone(), *location);
                        }
                    }
                }
            }
        }
    }
    inputs
}

/// Everything that selects a distinct pipeline for one program
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub depth_test: bool,
    pub blend: Option<BlendState>,
    pub fragment_entry: &'static str,
}

struct LinkedProgram {
    vertex_source: String,
    fragment_source: String,
    globals: HashMap<String, GlobalBinding>,
    vertex_inputs: HashMap<String, u32>,
    fragment_entries: Vec<String>,
    group_layouts: Vec<BindGroupLayoutHandle>,
    owned_layouts: Vec<BindGroupLayoutHandle>,
    pipelines: HashMap<PipelineKey, RenderPipelineHandle>,
}

/// A linked vertex + fragment shader pair
pub struct Program {
    name: String,
    vertex: Option<Shader>,
    fragment: Option<Shader>,
    linked: Option<LinkedProgram>,
    release: ReleaseQueue,
}

impl Program {
    /// An empty program; attach shaders and call [`Program::link`]
    pub fn new<B: GraphicsBackend>(ctx: &RenderContext<B>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertex: None,
            fragment: None,
            linked: None,
            release: ctx.release_queue(),
        }
    }

    /// Compile both stages from WGSL strings and link them
    pub fn from_sources<B: GraphicsBackend>(
        ctx: &mut RenderContext<B>,
        vertex: (&str, &str),
        fragment: (&str, &str),
    ) -> Self {
        let name = format!("{} + {}", vertex.0, fragment.0);
        let mut program = Self::new(ctx, &name);
        program.attach_shader(Shader::from_source(vertex.0, ShaderStage::Vertex, vertex.1));
        program.attach_shader(Shader::from_source(fragment.0, ShaderStage::Fragment, fragment.1));
        program.link(ctx);
        program
    }

    /// Compile both stages from WGSL files and link them
    pub fn from_files<B: GraphicsBackend, P: AsRef<Path>>(
        ctx: &mut RenderContext<B>,
        vertex: P,
        fragment: P,
    ) -> Self {
        let vertex = Shader::from_file(vertex, ShaderStage::Vertex);
        let fragment = Shader::from_file(fragment, ShaderStage::Fragment);
        let mut program = Self::new(ctx, &format!("{} + {}", vertex.name(), fragment.name()));
        program.attach_shader(vertex);
        program.attach_shader(fragment);
        program.link(ctx);
        program
    }

    pub fn attach_shader(&mut self, shader: Shader) {
        match shader.stage() {
            ShaderStage::Vertex => self.vertex = Some(shader),
            ShaderStage::Fragment => self.fragment = Some(shader),
        }
    }

    /// Link the attached shaders. Returns whether the program is usable.
    pub fn link<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>) -> bool {
        self.release_linked();

        let (Some(vertex), Some(fragment)) = (&self.vertex, &self.fragment) else {
            log::error!("program {} is missing a shader stage", self.name);
            return false;
        };
        let (Some(vertex_module), Some(fragment_module)) = (&vertex.module, &fragment.module) else {
            log::error!("program {} has shaders that failed to compile", self.name);
            return false;
        };
        if !vertex.has_entry_point(VERTEX_ENTRY) {
            log::error!("program {}: {}", self.name, ShaderError::MissingEntryPoint(VERTEX_ENTRY.into()));
            return false;
        }
        if !fragment.has_entry_point(FRAGMENT_ENTRY) {
            log::error!("program {}: {}", self.name, ShaderError::MissingEntryPoint(FRAGMENT_ENTRY.into()));
            return false;
        }

        let mut globals = HashMap::new();
        reflect_globals(vertex_module, &mut globals);
        reflect_globals(fragment_module, &mut globals);
        let vertex_inputs = reflect_vertex_inputs(vertex_module);
        let fragment_entries = fragment_module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Fragment)
            .map(|ep| ep.name.clone())
            .collect();

        let Some((group_layouts, owned_layouts)) = build_layouts(ctx, &globals) else {
            log::error!("program {}: failed to create bind group layouts", self.name);
            return false;
        };

        log::debug!(
            "linked program {} ({} globals, {} vertex inputs)",
            self.name,
            globals.len(),
            vertex_inputs.len()
        );

        self.linked = Some(LinkedProgram {
            vertex_source: vertex.source.clone(),
            fragment_source: fragment.source.clone(),
            globals,
            vertex_inputs,
            fragment_entries,
            group_layouts,
            owned_layouts,
            pipelines: HashMap::new(),
        });
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_usable(&self) -> bool {
        self.linked.is_some()
    }

    /// Reflected binding of a named global, `None` when the program lacks it
    pub fn binding(&self, name: &str) -> Option<GlobalBinding> {
        self.linked.as_ref()?.globals.get(name).copied()
    }

    /// Reflected location of a named vertex input
    pub fn vertex_input(&self, name: &str) -> Option<u32> {
        self.linked.as_ref()?.vertex_inputs.get(name).copied()
    }

    /// Whether any global lives in bind group `group`
    pub fn uses_group(&self, group: u32) -> bool {
        self.linked
            .as_ref()
            .is_some_and(|l| l.globals.values().any(|g| g.group == group))
    }

    pub fn has_fragment_entry(&self, entry: &str) -> bool {
        self.linked
            .as_ref()
            .is_some_and(|l| l.fragment_entries.iter().any(|e| e == entry))
    }

    /// Streams of [`VERTEX_STREAMS`] the vertex shader consumes, as
    /// `(stream index, location)` in block order. Slot `n` of a draw feeds the
    /// `n`-th entry.
    pub fn vertex_streams(&self) -> Vec<(usize, u32)> {
        VERTEX_STREAMS
            .iter()
            .enumerate()
            .filter_map(|(i, name)| self.vertex_input(name).map(|loc| (i, loc)))
            .collect()
    }

    /// Build a texture bind group from named views. Texture bindings with no
    /// matching name get the white default, samplers get `sampler` or the
    /// default material sampler.
    pub fn texture_bind_group<B: GraphicsBackend>(
        &self,
        ctx: &mut RenderContext<B>,
        views: &[(&str, TextureViewHandle)],
        sampler: Option<SamplerHandle>,
    ) -> Option<BindGroupHandle> {
        let linked = self.linked.as_ref()?;
        let layout = *linked.group_layouts.get(TEXTURE_GROUP as usize)?;

        let mut entries = Vec::new();
        for (name, global) in &linked.globals {
            if global.group != TEXTURE_GROUP {
                continue;
            }
            let entry = match global.kind {
                BindingKind::Texture => {
                    let view = views
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| *v)
                        .or_else(|| ctx.default_white_view())?;
                    BindGroupEntry::Texture(view)
                }
                BindingKind::Sampler => {
                    BindGroupEntry::Sampler(sampler.or_else(|| ctx.material_sampler())?)
                }
                BindingKind::Uniform => continue,
            };
            entries.push((global.binding, entry));
        }
        entries.sort_by_key(|(binding, _)| *binding);

        match ctx.backend_mut().create_bind_group(layout, &entries) {
            Ok(group) => Some(group),
            Err(e) => {
                log::warn!("program {}: texture bind group failed: {}", self.name, e);
                None
            }
        }
    }

    /// Pipeline for `key`, created on first use
    pub(crate) fn pipeline<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        key: &PipelineKey,
    ) -> Option<RenderPipelineHandle> {
        let linked = self.linked.as_mut()?;
        if let Some(pipeline) = linked.pipelines.get(key) {
            return Some(*pipeline);
        }
        if !linked.fragment_entries.iter().any(|e| e == key.fragment_entry) {
            log::warn!("program {} has no fragment entry {}", self.name, key.fragment_entry);
            return None;
        }

        let vertex_layouts = VERTEX_STREAMS
            .iter()
            .filter_map(|name| linked.vertex_inputs.get(*name))
            .map(|location| VertexBufferLayout {
                location: *location,
                components: 3,
            })
            .collect();

        let depth_stencil = key.depth_format.map(|format| DepthStencilState {
            format,
            depth_write_enabled: key.depth_test,
            depth_compare: if key.depth_test {
                CompareFunction::Less
            } else {
                CompareFunction::Always
            },
        });

        let descriptor = RenderPipelineDescriptor {
            label: Some(format!("{} [{}]", self.name, key.fragment_entry)),
            vertex_shader: linked.vertex_source.clone(),
            vertex_entry: VERTEX_ENTRY.to_string(),
            fragment_shader: linked.fragment_source.clone(),
            fragment_entry: key.fragment_entry.to_string(),
            vertex_layouts,
            bind_group_layouts: linked.group_layouts.clone(),
            depth_stencil,
            color_targets: key
                .color_formats
                .iter()
                .map(|format| ColorTargetState {
                    format: *format,
                    blend: key.blend,
                })
                .collect(),
        };

        match backend.create_render_pipeline(&descriptor) {
            Ok(pipeline) => {
                log::debug!("created pipeline {:?}", descriptor.label);
                linked.pipelines.insert(key.clone(), pipeline);
                Some(pipeline)
            }
            Err(e) => {
                log::warn!("program {}: {}", self.name, e);
                None
            }
        }
    }

    fn release_linked(&mut self) {
        if let Some(linked) = self.linked.take() {
            for pipeline in linked.pipelines.into_values() {
                self.release.push(Released::RenderPipeline(pipeline));
            }
            for layout in linked.owned_layouts {
                self.release.push(Released::BindGroupLayout(layout));
            }
        }
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.release_linked();
    }
}

/// One layout per group up to the highest one used. Uniform-only groups share
/// the context's uniform layout so arena slots bind directly.
fn build_layouts<B: GraphicsBackend>(
    ctx: &mut RenderContext<B>,
    globals: &HashMap<String, GlobalBinding>,
) -> Option<(Vec<BindGroupLayoutHandle>, Vec<BindGroupLayoutHandle>)> {
    let group_count = globals.values().map(|g| g.group + 1).max().unwrap_or(0);
    let mut layouts = Vec::new();
    let mut owned = Vec::new();

    for group in 0..group_count {
        let members: Vec<&GlobalBinding> = globals.values().filter(|g| g.group == group).collect();
        let uniform_only = !members.is_empty() && members.iter().all(|g| g.kind == BindingKind::Uniform);

        if uniform_only {
            layouts.push(ctx.uniform_layout()?);
            continue;
        }

        let filtering = members.iter().any(|g| g.kind == BindingKind::Sampler);
        let mut entries: Vec<BindGroupLayoutEntry> = members
            .iter()
            .map(|g| BindGroupLayoutEntry {
                binding: g.binding,
                ty: match g.kind {
                    BindingKind::Uniform => BindingType::UniformBuffer,
                    BindingKind::Texture => BindingType::Texture { filterable: filtering },
                    BindingKind::Sampler => BindingType::Sampler { filtering: true },
                },
            })
            .collect();
        entries.sort_by_key(|e| e.binding);

        let layout = ctx.backend_mut().create_bind_group_layout(&entries).ok()?;
        layouts.push(layout);
        owned.push(layout);
    }

    Some((layouts, owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"
struct Out { @builtin(position) pos: vec4<f32> }
@vertex
fn vs_main(@location(0) in_position: vec3<f32>, @location(3) in_tangent: vec3<f32>) -> Out {
    var out: Out;
    out.pos = vec4<f32>(in_position + in_tangent * 0.0, 1.0);
    return out;
}
"#;

    #[test]
    fn test_compile_failure_is_not_fatal() {
        let shader = Shader::from_source("broken", ShaderStage::Fragment, "fn fs_main( {");
        assert!(!shader.is_compiled());
        assert!(!shader.has_entry_point("fs_main"));
    }

    #[test]
    fn test_entry_point_lookup() {
        let shader = Shader::from_source("vertex", ShaderStage::Vertex, VERTEX);
        assert!(shader.is_compiled());
        assert!(shader.has_entry_point("vs_main"));
        assert!(!shader.has_entry_point("fs_main"));
    }

    #[test]
    fn test_vertex_input_reflection() {
        let module = compile(VERTEX).unwrap();
        let inputs = reflect_vertex_inputs(&module);
        assert_eq!(inputs.get("in_position"), Some(&0));
        assert_eq!(inputs.get("in_tangent"), Some(&3));
        assert_eq!(inputs.get("in_normal"), None);
    }

    #[test]
    fn test_global_reflection() {
        let source = r#"
@group(1) @binding(0) var colormap: texture_2d<f32>;
@group(1) @binding(2) var material_sampler: sampler;
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return textureSample(colormap, material_sampler, vec2<f32>(0.5, 0.5));
}
"#;
        let module = compile(source).unwrap();
        let mut globals = HashMap::new();
        reflect_globals(&module, &mut globals);
        assert_eq!(
            globals.get("colormap"),
            Some(&GlobalBinding { group: 1, binding: 0, kind: BindingKind::Texture })
        );
        assert_eq!(globals.get("material_sampler").map(|g| g.kind), Some(BindingKind::Sampler));
        assert!(globals.get("normalmap").is_none());
    }
}
