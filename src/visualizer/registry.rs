use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::builtin::{builtins, SAFE_DEFAULT};
use super::definition::{Kind, Origin, TextureBindings, VisualizerDefinition};
use super::document::{Document, StoredVisualizer};
use crate::compositor::CpuProgram;
use crate::error::{Result, VisualizerError};
use crate::graphics::{ProgramGate, DEFAULT_TEMPLATE};

/// Display name given to a freshly created user visualizer.
pub const PLACEHOLDER_NAME: &str = "New Visualizer";
const UNTITLED: &str = "Untitled";
const USER_PREFIX: &str = "user_";

/// What the render loop calls for one mode.
#[derive(Debug, Clone)]
pub enum Renderer {
    Gpu {
        source: Arc<str>,
        textures: TextureBindings,
    },
    Cpu(CpuProgram),
}

impl Renderer {
    pub fn kind(&self) -> Kind {
        match self {
            Renderer::Gpu { .. } => Kind::Gpu,
            Renderer::Cpu(_) => Kind::Cpu,
        }
    }
}

/// Mode id to renderer. Replaced as a whole, never edited in place.
pub type DispatchTable = HashMap<String, Renderer>;

#[derive(Default)]
struct Overrides {
    gpu: BTreeMap<String, String>,
    textures: BTreeMap<String, TextureBindings>,
    cpu: BTreeMap<String, String>,
}

impl Overrides {
    fn drop_all(&mut self, id: &str) -> bool {
        let gpu = self.gpu.remove(id).is_some();
        let textures = self.textures.remove(id).is_some();
        let cpu = self.cpu.remove(id).is_some();
        gpu || textures || cpu
    }
}

/// Single owner of every visualizer definition.
///
/// Builtins are fixed; edits to them are kept as overrides next to the
/// builtin. User definitions can be added, renamed and removed. Every change
/// rebuilds the dispatch table off to the side and swaps it in, so a frame
/// always sees either the old table or the new one.
pub struct VisualizerRegistry {
    builtins: Vec<VisualizerDefinition>,
    users: BTreeMap<String, VisualizerDefinition>,
    overrides: Overrides,
    dispatch: Arc<DispatchTable>,
    active: String,
    revision: u64,
}

impl VisualizerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            builtins: builtins(),
            users: BTreeMap::new(),
            overrides: Overrides::default(),
            dispatch: Arc::new(DispatchTable::new()),
            active: SAFE_DEFAULT.to_string(),
            revision: 0,
        };
        registry.rebuild_dispatch();
        registry
    }

    pub fn len(&self) -> usize {
        self.builtins.len() + self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.builtin(id).is_some() || self.users.contains_key(id)
    }

    /// Bumped every time the dispatch table is replaced.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn active_mode(&self) -> &str {
        &self.active
    }

    /// The current dispatch table. Holding on to it keeps that snapshot
    /// alive even if the registry changes afterwards.
    pub fn dispatch(&self) -> Arc<DispatchTable> {
        Arc::clone(&self.dispatch)
    }

    /// Renderer bound to the active mode.
    pub fn active_renderer(&self) -> Option<&Renderer> {
        self.dispatch.get(&self.active)
    }

    /// Every definition as it currently renders, builtins first in catalogue
    /// order, then user definitions.
    pub fn definitions(&self) -> Vec<VisualizerDefinition> {
        self.builtins
            .iter()
            .map(|builtin| self.with_overrides(builtin))
            .chain(self.users.values().cloned())
            .collect()
    }

    /// The definition for `id` with any stored override applied.
    pub fn effective(&self, id: &str) -> Option<VisualizerDefinition> {
        if let Some(builtin) = self.builtin(id) {
            return Some(self.with_overrides(builtin));
        }
        self.users.get(id).cloned()
    }

    pub fn has_override(&self, id: &str) -> bool {
        self.overrides.gpu.contains_key(id)
            || self.overrides.textures.contains_key(id)
            || self.overrides.cpu.contains_key(id)
    }

    /// Insert or replace a user definition. Its source must build first.
    pub fn register(
        &mut self,
        mut definition: VisualizerDefinition,
        gate: &mut dyn ProgramGate,
    ) -> Result<()> {
        if self.builtin(&definition.id).is_some() {
            return Err(VisualizerError::ProtectedEntry(definition.id));
        }
        validate(definition.kind, &definition.source, gate)?;

        definition.origin = Origin::UserCreated;
        if definition.kind == Kind::Gpu {
            gate.invalidate(&definition.id);
        }
        info!("Registered visualizer '{}' ({})", definition.id, definition.display_name);
        self.users.insert(definition.id.clone(), definition);
        self.rebuild_dispatch();
        Ok(())
    }

    /// Delete a user definition and anything stored against its id.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        if self.builtin(id).is_some() {
            return Err(VisualizerError::ProtectedEntry(id.to_string()));
        }
        if self.users.remove(id).is_none() {
            return Err(VisualizerError::UnknownMode(id.to_string()));
        }
        self.overrides.drop_all(id);
        info!("Removed visualizer '{}'", id);

        if self.active == id {
            self.active = SAFE_DEFAULT.to_string();
            info!("Active mode reset to '{}'", SAFE_DEFAULT);
        }
        self.rebuild_dispatch();
        Ok(())
    }

    pub fn activate(&mut self, id: &str) -> Result<()> {
        if !self.dispatch.contains_key(id) {
            return Err(VisualizerError::UnknownMode(id.to_string()));
        }
        if self.active != id {
            info!("Active mode is now '{}'", id);
            self.active = id.to_string();
        }
        Ok(())
    }

    /// Replace the source (and, for GPU modes, the textures) of `id` once it
    /// has passed validation. Builtins get an override; user definitions are
    /// updated directly. Nothing changes when validation fails.
    pub fn compile_and_apply(
        &mut self,
        id: &str,
        source: &str,
        textures: TextureBindings,
        gate: &mut dyn ProgramGate,
    ) -> Result<()> {
        let kind = self
            .effective(id)
            .map(|definition| definition.kind)
            .ok_or_else(|| VisualizerError::UnknownMode(id.to_string()))?;
        validate(kind, source, gate)?;

        self.store_source(id, kind, source, textures);
        if kind == Kind::Gpu {
            gate.invalidate(id);
        }
        self.rebuild_dispatch();
        Ok(())
    }

    /// Editor "apply": like [`compile_and_apply`](Self::compile_and_apply),
    /// but a changed name either renames a still-unnamed user definition in
    /// place or forks a new user definition, leaving `id` untouched. Returns
    /// the id that received the edit, which also becomes the active mode.
    pub fn rename_and_apply(
        &mut self,
        id: &str,
        name: &str,
        source: &str,
        textures: TextureBindings,
        gate: &mut dyn ProgramGate,
    ) -> Result<String> {
        let current = self
            .effective(id)
            .ok_or_else(|| VisualizerError::UnknownMode(id.to_string()))?;
        validate(current.kind, source, gate)?;

        let name = match name.trim() {
            "" => UNTITLED,
            trimmed => trimmed,
        };

        let target = if name == current.display_name {
            id.to_string()
        } else if current.origin == Origin::UserCreated && current.display_name == PLACEHOLDER_NAME {
            if let Some(user) = self.users.get_mut(id) {
                user.display_name = name.to_string();
            }
            info!("Renamed '{}' to '{}'", id, name);
            id.to_string()
        } else {
            let fork = self.next_user_id();
            info!("Forked '{}' as '{}' ({})", id, fork, name);
            self.users.insert(
                fork.clone(),
                VisualizerDefinition {
                    id: fork.clone(),
                    display_name: name.to_string(),
                    kind: current.kind,
                    source: String::new(),
                    textures: TextureBindings::new(),
                    origin: Origin::UserCreated,
                },
            );
            fork
        };

        self.store_source(&target, current.kind, source, textures);
        if current.kind == Kind::Gpu {
            gate.invalidate(&target);
        }
        self.rebuild_dispatch();
        self.active = target.clone();
        Ok(target)
    }

    /// Drop the stored override of a builtin. For a user definition this is
    /// the same as [`remove`](Self::remove).
    pub fn revert(&mut self, id: &str, gate: &mut dyn ProgramGate) -> Result<()> {
        if self.builtin(id).is_none() {
            return self.remove(id);
        }
        if self.overrides.drop_all(id) {
            info!("Reverted '{}' to its built-in source", id);
            gate.invalidate(id);
            self.rebuild_dispatch();
        }
        Ok(())
    }

    /// New GPU user definition with the starter template. Returns its id.
    pub fn create_placeholder(&mut self) -> String {
        let id = self.next_user_id();
        self.users.insert(
            id.clone(),
            VisualizerDefinition {
                id: id.clone(),
                display_name: PLACEHOLDER_NAME.to_string(),
                kind: Kind::Gpu,
                source: DEFAULT_TEMPLATE.to_string(),
                textures: TextureBindings::new(),
                origin: Origin::UserCreated,
            },
        );
        info!("Created placeholder visualizer '{}'", id);
        self.rebuild_dispatch();
        id
    }

    /// Load a saved document on top of the current state. Entries that no
    /// longer build, or that do not fit the builtin they name, are skipped.
    /// Returns how many entries were taken.
    pub fn restore(&mut self, document: &Document, gate: &mut dyn ProgramGate) -> usize {
        let mut restored = 0;

        for (id, source) in &document.gl_customs {
            if !self.accepts_override(id, Kind::Gpu, source, gate) {
                continue;
            }
            self.overrides.gpu.insert(id.clone(), source.clone());
            gate.invalidate(id);
            restored += 1;
        }
        for (id, textures) in &document.gl_custom_textures {
            if self.builtin(id).map(|b| b.kind) != Some(Kind::Gpu) {
                warn!("Skipping texture override for unknown GPU mode '{}'", id);
                continue;
            }
            self.overrides.textures.insert(id.clone(), textures.clone());
            gate.invalidate(id);
        }
        for (id, source) in &document.v2d_customs {
            if !self.accepts_override(id, Kind::Cpu, source, gate) {
                continue;
            }
            self.overrides.cpu.insert(id.clone(), source.clone());
            restored += 1;
        }
        for (id, stored) in &document.user_visualizers {
            if self.builtin(id).is_some() {
                warn!("Skipping stored visualizer '{}': id belongs to a built-in", id);
                continue;
            }
            if let Err(e) = validate(stored.kind, &stored.source, gate) {
                warn!("Skipping stored visualizer '{}': {}", id, e);
                continue;
            }
            if stored.kind == Kind::Gpu {
                gate.invalidate(id);
            }
            self.users.insert(
                id.clone(),
                VisualizerDefinition {
                    id: id.clone(),
                    display_name: stored.name.clone(),
                    kind: stored.kind,
                    source: stored.source.clone(),
                    textures: stored.textures.clone(),
                    origin: Origin::UserCreated,
                },
            );
            restored += 1;
        }

        info!("Restored {} stored visualizer entries", restored);
        self.rebuild_dispatch();
        restored
    }

    /// Snapshot of everything that differs from the builtin catalogue.
    pub fn to_document(&self) -> Document {
        Document {
            gl_customs: self.overrides.gpu.clone(),
            gl_custom_textures: self.overrides.textures.clone(),
            v2d_customs: self.overrides.cpu.clone(),
            user_visualizers: self
                .users
                .iter()
                .map(|(id, user)| {
                    (
                        id.clone(),
                        StoredVisualizer {
                            kind: user.kind,
                            name: user.display_name.clone(),
                            source: user.source.clone(),
                            textures: user.textures.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn builtin(&self, id: &str) -> Option<&VisualizerDefinition> {
        self.builtins.iter().find(|builtin| builtin.id == id)
    }

    fn with_overrides(&self, builtin: &VisualizerDefinition) -> VisualizerDefinition {
        let mut definition = builtin.clone();
        let source = match builtin.kind {
            Kind::Gpu => self.overrides.gpu.get(&builtin.id),
            Kind::Cpu => self.overrides.cpu.get(&builtin.id),
        };
        if let Some(source) = source {
            definition.source = source.clone();
        }
        if let Some(textures) = self.overrides.textures.get(&builtin.id) {
            definition.textures = textures.clone();
        }
        definition
    }

    fn store_source(&mut self, id: &str, kind: Kind, source: &str, textures: TextureBindings) {
        if let Some(user) = self.users.get_mut(id) {
            user.source = source.to_string();
            if kind == Kind::Gpu {
                user.textures = textures;
            }
            return;
        }
        match kind {
            Kind::Gpu => {
                self.overrides.gpu.insert(id.to_string(), source.to_string());
                self.overrides.textures.insert(id.to_string(), textures);
            }
            Kind::Cpu => {
                self.overrides.cpu.insert(id.to_string(), source.to_string());
            }
        }
    }

    fn accepts_override(
        &self,
        id: &str,
        kind: Kind,
        source: &str,
        gate: &mut dyn ProgramGate,
    ) -> bool {
        if self.builtin(id).map(|b| b.kind) != Some(kind) {
            warn!("Skipping stored {} override for unknown mode '{}'", kind.label(), id);
            return false;
        }
        match validate(kind, source, gate) {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping stored override of '{}': {}", id, e);
                false
            }
        }
    }

    fn next_user_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let base = format!("{USER_PREFIX}{millis}");
        if !self.contains(&base) {
            return base;
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{base}_{suffix}");
            if !self.contains(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn rebuild_dispatch(&mut self) {
        let mut table = DispatchTable::with_capacity(self.len());
        for definition in self.definitions() {
            let renderer = match definition.kind {
                Kind::Gpu => Renderer::Gpu {
                    source: Arc::from(definition.source),
                    textures: definition.textures,
                },
                Kind::Cpu => match CpuProgram::parse(&definition.source) {
                    Ok(program) => Renderer::Cpu(program),
                    Err(e) => {
                        warn!("Visualizer '{}' left out of dispatch: {}", definition.id, e);
                        continue;
                    }
                },
            };
            table.insert(definition.id, renderer);
        }
        self.dispatch = Arc::new(table);
        self.revision += 1;
    }
}

impl Default for VisualizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(kind: Kind, source: &str, gate: &mut dyn ProgramGate) -> Result<()> {
    match kind {
        Kind::Gpu => gate.compile_candidate(source)?,
        Kind::Cpu => {
            CpuProgram::parse(source)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use crate::graphics::SourceValidator;

    const BROKEN_SHADER: &str = "@fragment fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> { return vec4<f32>(1.0 }";
    const RED_SHADER: &str = "@fragment fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> { return vec4<f32>(1.0, 0.0, 0.0, 1.0); }";
    const EMPTY_SCRIPT: &str = "render { }";

    fn user(id: &str, kind: Kind, source: &str) -> VisualizerDefinition {
        VisualizerDefinition {
            id: id.to_string(),
            display_name: id.to_string(),
            kind,
            source: source.to_string(),
            textures: TextureBindings::new(),
            origin: Origin::UserCreated,
        }
    }

    #[test]
    fn starts_with_builtins_and_the_safe_default() {
        let registry = VisualizerRegistry::new();
        assert_eq!(registry.len(), 12);
        assert_eq!(registry.active_mode(), SAFE_DEFAULT);
        assert_eq!(registry.dispatch().len(), 12);
        assert_eq!(registry.active_renderer().map(Renderer::kind), Some(Kind::Cpu));
    }

    #[test]
    fn builtins_cannot_be_removed() {
        let mut registry = VisualizerRegistry::new();
        let err = registry.remove("starnest").unwrap_err();
        assert!(matches!(err, VisualizerError::ProtectedEntry(id) if id == "starnest"));
        assert_eq!(registry.len(), 12);
    }

    #[test]
    fn builtin_ids_cannot_be_registered_over() {
        let mut registry = VisualizerRegistry::new();
        let err = registry
            .register(user("retro", Kind::Cpu, EMPTY_SCRIPT), &mut SourceValidator)
            .unwrap_err();
        assert!(matches!(err, VisualizerError::ProtectedEntry(_)));
    }

    #[test]
    fn activating_an_unknown_mode_keeps_the_current_one() {
        let mut registry = VisualizerRegistry::new();
        registry.activate("acid").unwrap();
        let err = registry.activate("nope").unwrap_err();
        assert!(matches!(err, VisualizerError::UnknownMode(_)));
        assert_eq!(registry.active_mode(), "acid");
    }

    #[test]
    fn removing_the_active_mode_falls_back() {
        let mut registry = VisualizerRegistry::new();
        registry
            .register(user("user_1", Kind::Cpu, EMPTY_SCRIPT), &mut SourceValidator)
            .unwrap();
        registry.activate("user_1").unwrap();
        registry.remove("user_1").unwrap();
        assert_eq!(registry.active_mode(), SAFE_DEFAULT);
        assert!(!registry.dispatch().contains_key("user_1"));
    }

    #[test]
    fn rejected_shader_changes_nothing() {
        let mut registry = VisualizerRegistry::new();
        let before = registry.dispatch();
        let err = registry
            .compile_and_apply("starnest", BROKEN_SHADER, TextureBindings::new(), &mut SourceValidator)
            .unwrap_err();
        assert!(matches!(err, VisualizerError::Compile(_)));
        assert!(Arc::ptr_eq(&before, &registry.dispatch()));
        assert!(!registry.has_override("starnest"));
    }

    #[test]
    fn broken_script_is_never_applied() {
        let mut registry = VisualizerRegistry::new();
        let err = registry
            .compile_and_apply("retro", "render { circle( }", TextureBindings::new(), &mut SourceValidator)
            .unwrap_err();
        assert!(matches!(err, VisualizerError::Script(_)));
        assert_eq!(registry.effective("retro").unwrap().source, "use retro");
    }

    #[test]
    fn builtin_edits_are_overrides_and_revert_cleanly() {
        let mut registry = VisualizerRegistry::new();
        let textures = TextureBindings::from_identifiers(["noise.png"]);
        registry
            .compile_and_apply("acid", RED_SHADER, textures.clone(), &mut SourceValidator)
            .unwrap();

        let edited = registry.effective("acid").unwrap();
        assert_eq!(edited.source, RED_SHADER);
        assert_eq!(edited.textures, textures);
        assert_eq!(edited.origin, Origin::Builtin);

        registry.revert("acid", &mut SourceValidator).unwrap();
        assert_ne!(registry.effective("acid").unwrap().source, RED_SHADER);
        assert!(registry.to_document().is_empty());
    }

    #[test]
    fn placeholder_rename_keeps_its_id() {
        let mut registry = VisualizerRegistry::new();
        let id = registry.create_placeholder();
        let target = registry
            .rename_and_apply(&id, "Red Room", RED_SHADER, TextureBindings::new(), &mut SourceValidator)
            .unwrap();

        assert_eq!(target, id);
        let renamed = registry.effective(&id).unwrap();
        assert_eq!(renamed.display_name, "Red Room");
        assert_eq!(renamed.source, RED_SHADER);
        assert_eq!(registry.len(), 13);
    }

    #[test]
    fn renaming_a_builtin_forks_it() {
        let mut registry = VisualizerRegistry::new();
        let fork = registry
            .rename_and_apply("spectrum", "  ", "use vortex", TextureBindings::new(), &mut SourceValidator)
            .unwrap();

        assert!(fork.starts_with(USER_PREFIX));
        assert_eq!(registry.active_mode(), fork);
        let forked = registry.effective(&fork).unwrap();
        assert_eq!(forked.display_name, UNTITLED);
        assert_eq!(forked.kind, Kind::Cpu);
        assert_eq!(registry.effective("spectrum").unwrap().source, "use spectrum");
    }

    #[test]
    fn renaming_a_named_user_entry_forks_it() {
        let mut registry = VisualizerRegistry::new();
        registry
            .register(user("user_1", Kind::Cpu, EMPTY_SCRIPT), &mut SourceValidator)
            .unwrap();
        let fork = registry
            .rename_and_apply("user_1", "Other", "use matrix", TextureBindings::new(), &mut SourceValidator)
            .unwrap();
        assert_ne!(fork, "user_1");
        assert_eq!(registry.effective("user_1").unwrap().source, EMPTY_SCRIPT);
    }

    #[test]
    fn placeholder_ids_are_unique() {
        let mut registry = VisualizerRegistry::new();
        let a = registry.create_placeholder();
        let b = registry.create_placeholder();
        assert_ne!(a, b);
    }

    #[test]
    fn restore_skips_entries_that_do_not_build() {
        let mut document = Document::default();
        document.gl_customs.insert("starnest".into(), RED_SHADER.into());
        document.gl_customs.insert("dusty".into(), BROKEN_SHADER.into());
        document.v2d_customs.insert("acid".into(), "use retro".into());
        document.user_visualizers.insert(
            "user_5".into(),
            StoredVisualizer {
                kind: Kind::Cpu,
                name: "Mine".into(),
                source: EMPTY_SCRIPT.into(),
                textures: TextureBindings::new(),
            },
        );
        document.user_visualizers.insert(
            "user_6".into(),
            StoredVisualizer {
                kind: Kind::Cpu,
                name: "Broken".into(),
                source: "render {".into(),
                textures: TextureBindings::new(),
            },
        );

        let mut registry = VisualizerRegistry::new();
        assert_eq!(registry.restore(&document, &mut SourceValidator), 2);
        assert_eq!(registry.effective("starnest").unwrap().source, RED_SHADER);
        assert!(!registry.has_override("dusty"));
        assert!(!registry.has_override("acid"));
        assert!(registry.contains("user_5"));
        assert!(!registry.contains("user_6"));

        let mut again = VisualizerRegistry::new();
        again.restore(&registry.to_document(), &mut SourceValidator);
        assert_eq!(again.to_document(), registry.to_document());
    }

    #[derive(Default)]
    struct RecordingGate {
        invalidated: Vec<String>,
    }

    impl ProgramGate for RecordingGate {
        fn compile_candidate(&mut self, fragment_source: &str) -> std::result::Result<(), CompileError> {
            SourceValidator.compile_candidate(fragment_source)
        }

        fn invalidate(&mut self, mode_id: &str) {
            self.invalidated.push(mode_id.to_string());
        }
    }

    #[test]
    fn restore_invalidates_every_restored_gpu_mode() {
        let mut document = Document::default();
        document.gl_customs.insert("starnest".into(), RED_SHADER.into());
        document.gl_customs.insert("dusty".into(), BROKEN_SHADER.into());
        document
            .gl_custom_textures
            .insert("dusty".into(), TextureBindings::from_identifiers(["dust.png"]));
        document.user_visualizers.insert(
            "user_3".into(),
            StoredVisualizer {
                kind: Kind::Gpu,
                name: "Red".into(),
                source: RED_SHADER.into(),
                textures: TextureBindings::new(),
            },
        );
        document.user_visualizers.insert(
            "user_4".into(),
            StoredVisualizer {
                kind: Kind::Gpu,
                name: "Broken".into(),
                source: BROKEN_SHADER.into(),
                textures: TextureBindings::new(),
            },
        );

        let mut gate = RecordingGate::default();
        let mut registry = VisualizerRegistry::new();
        registry.restore(&document, &mut gate);

        gate.invalidated.sort();
        assert_eq!(gate.invalidated, ["dusty", "starnest", "user_3"]);
    }
}
