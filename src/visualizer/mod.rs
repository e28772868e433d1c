pub mod builtin;
pub mod definition;
pub mod document;
pub mod registry;

pub use builtin::{builtins, SAFE_DEFAULT};
pub use definition::{Kind, Origin, TextureBindings, VisualizerDefinition};
pub use document::{Document, DocumentStore, JsonFileStore, MemoryStore, StoredVisualizer};
pub use registry::{DispatchTable, Renderer, VisualizerRegistry, PLACEHOLDER_NAME};
