use std::collections::HashSet;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, Module, TypeInner};

use crate::error::{CompileError, ShaderStage};

/// Declarations every program stage is compiled against: the frame uniform
/// block, four texture channels and the interpolated vertex output.
pub const PRELUDE: &str = include_str!("../../shaders/prelude.wgsl");

/// Shared full-screen quad vertex stage.
pub const VERTEX_SOURCE: &str = include_str!("../../shaders/fullscreen.wgsl");

/// Starting point for new user programs.
pub const DEFAULT_TEMPLATE: &str = include_str!("../../shaders/template.wgsl");

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

const FRAME_GROUP: u32 = 0;
const CHANNEL_GROUP: u32 = 1;
const CHANNEL_BINDINGS: u32 = 8;

/// A stage that passed the WGSL front end and validator.
pub struct CompiledStage {
    pub source: String,
    pub module: Module,
}

/// A vertex/fragment pair whose interfaces agree with each other and with the
/// frame binding layout. Only linked programs reach the device.
pub struct LinkedProgram {
    pub vertex: CompiledStage,
    pub fragment: CompiledStage,
}

fn with_prelude(source: &str) -> String {
    let mut full = String::with_capacity(PRELUDE.len() + source.len() + 1);
    full.push_str(PRELUDE);
    full.push('\n');
    full.push_str(source);
    full
}

pub fn compile_stage(stage: ShaderStage, source: &str) -> Result<CompiledStage, CompileError> {
    let full = with_prelude(source);

    let module = naga::front::wgsl::parse_str(&full)
        .map_err(|e| CompileError::new(stage, e.emit_to_string(&full)))?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| CompileError::new(stage, e.emit_to_string(&full)))?;

    Ok(CompiledStage {
        source: full,
        module,
    })
}

/// Compile both stages and check that they fit together.
pub fn link_program(vertex_source: &str, fragment_source: &str) -> Result<LinkedProgram, CompileError> {
    let vertex = compile_stage(ShaderStage::Vertex, vertex_source)?;
    let fragment = compile_stage(ShaderStage::Fragment, fragment_source)?;

    let link_error = |message: String| CompileError::new(ShaderStage::Link, message);

    let vs = find_entry(&vertex.module, VERTEX_ENTRY, naga::ShaderStage::Vertex)
        .ok_or_else(|| link_error(format!("vertex stage has no @vertex fn {VERTEX_ENTRY}")))?;
    let fs = find_entry(&fragment.module, FRAGMENT_ENTRY, naga::ShaderStage::Fragment)
        .ok_or_else(|| link_error(format!("fragment stage has no @fragment fn {FRAGMENT_ENTRY}")))?;

    let color_output = fs
        .function
        .result
        .as_ref()
        .map(|result| locations(&fragment.module, result.ty, result.binding.as_ref()))
        .unwrap_or_default();
    if !color_output.contains(&0) {
        return Err(link_error(format!(
            "{FRAGMENT_ENTRY} must return a colour at @location(0)"
        )));
    }

    let produced: HashSet<u32> = vs
        .function
        .result
        .as_ref()
        .map(|result| locations(&vertex.module, result.ty, result.binding.as_ref()))
        .unwrap_or_default()
        .into_iter()
        .collect();

    for argument in &fs.function.arguments {
        for location in locations(&fragment.module, argument.ty, argument.binding.as_ref()) {
            if !produced.contains(&location) {
                return Err(link_error(format!(
                    "fragment input @location({location}) is not written by the vertex stage"
                )));
            }
        }
    }

    check_bindings(&vertex.module)?;
    check_bindings(&fragment.module)?;

    Ok(LinkedProgram { vertex, fragment })
}

fn find_entry<'a>(
    module: &'a Module,
    name: &str,
    stage: naga::ShaderStage,
) -> Option<&'a naga::EntryPoint> {
    module
        .entry_points
        .iter()
        .find(|entry| entry.name == name && entry.stage == stage)
}

/// User locations carried by a value, either directly or through struct members.
fn locations(module: &Module, ty: naga::Handle<naga::Type>, binding: Option<&Binding>) -> Vec<u32> {
    match binding {
        Some(Binding::Location { location, .. }) => vec![*location],
        Some(Binding::BuiltIn(_)) => Vec::new(),
        None => match &module.types[ty].inner {
            TypeInner::Struct { members, .. } => members
                .iter()
                .filter_map(|member| match &member.binding {
                    Some(Binding::Location { location, .. }) => Some(*location),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

fn check_bindings(module: &Module) -> Result<(), CompileError> {
    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };

        let allowed = match binding.group {
            FRAME_GROUP => binding.binding == 0,
            CHANNEL_GROUP => binding.binding < CHANNEL_BINDINGS,
            _ => false,
        };

        if !allowed {
            let name = global.name.as_deref().unwrap_or("<unnamed>");
            return Err(CompileError::new(
                ShaderStage::Link,
                format!(
                    "'{name}' uses @group({}) @binding({}), which is outside the frame layout",
                    binding.group, binding.binding
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_links() {
        assert!(link_program(VERTEX_SOURCE, DEFAULT_TEMPLATE).is_ok());
    }

    #[test]
    fn syntax_errors_are_fragment_stage_with_diagnostic() {
        let err = link_program(VERTEX_SOURCE, "@fragment fn fs_main( -> {").err().unwrap();
        assert_eq!(err.stage, ShaderStage::Fragment);
        assert!(!err.diagnostic.is_empty());
    }

    #[test]
    fn missing_entry_point_fails_to_link() {
        let source = "fn helper() -> f32 { return 1.0; }";
        let err = link_program(VERTEX_SOURCE, source).err().unwrap();
        assert_eq!(err.stage, ShaderStage::Link);
        assert!(err.diagnostic.contains("fs_main"));
    }

    #[test]
    fn unmatched_fragment_input_fails_to_link() {
        let source = r#"
struct Extra {
    @builtin(position) position: vec4<f32>,
    @location(3) tint: vec3<f32>,
}

@fragment
fn fs_main(in: Extra) -> @location(0) vec4<f32> {
    return vec4<f32>(in.tint, 1.0);
}
"#;
        let err = link_program(VERTEX_SOURCE, source).err().unwrap();
        assert_eq!(err.stage, ShaderStage::Link);
        assert!(err.diagnostic.contains("location(3)"));
    }

    #[test]
    fn foreign_bindings_are_rejected() {
        let source = r#"
@group(2) @binding(0) var<uniform> extra: vec4<f32>;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return extra;
}
"#;
        let err = link_program(VERTEX_SOURCE, source).err().unwrap();
        assert_eq!(err.stage, ShaderStage::Link);
        assert!(err.diagnostic.contains("extra"));
    }
}
