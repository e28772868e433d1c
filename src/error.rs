use std::fmt;

use thiserror::Error;

/// Which step of building a GPU program rejected the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
    Device,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Link => "link",
            ShaderStage::Device => "device",
        };
        f.write_str(name)
    }
}

/// A shader that failed to compile or link. The diagnostic is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} stage rejected shader: {diagnostic}")]
pub struct CompileError {
    pub stage: ShaderStage,
    pub diagnostic: String,
}

impl CompileError {
    pub fn new(stage: ShaderStage, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        let diagnostic = if diagnostic.trim().is_empty() {
            format!("unknown {stage} error")
        } else {
            diagnostic
        };
        Self { stage, diagnostic }
    }
}

/// Failure to build or run a CPU effect script.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: unknown name '{name}'")]
    UnknownName { line: usize, name: String },

    #[error("line {line}: '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        line: usize,
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown native effect '{0}'")]
    UnknownEffect(String),

    #[error("script defines no render block")]
    NotCallable,

    #[error("line {line}: {message}")]
    Runtime { line: usize, message: String },

    #[error("script exceeded its budget of {0} operations per frame")]
    BudgetExceeded(usize),
}

/// Errors surfaced by the visualizer registry and render engine.
#[derive(Debug, Error)]
pub enum VisualizerError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("'{0}' is a built-in visualizer and cannot be removed or overwritten")]
    ProtectedEntry(String),

    #[error("no visualizer registered under '{0}'")]
    UnknownMode(String),
}

pub type Result<T> = std::result::Result<T, VisualizerError>;

/// Why a texture could not be decoded. Never returned to callers: the cache
/// logs it and substitutes fallback pixels.
#[derive(Debug, Error)]
pub(crate) enum TextureLoadError {
    #[error("resource unavailable: {identifier}: {reason}")]
    ResourceUnavailable { identifier: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diagnostics_are_replaced() {
        let err = CompileError::new(ShaderStage::Link, "   ");
        assert_eq!(err.diagnostic, "unknown link error");
    }

    #[test]
    fn protected_entry_names_the_id() {
        let err = VisualizerError::ProtectedEntry("neural".into());
        assert!(err.to_string().contains("neural"));
    }
}
