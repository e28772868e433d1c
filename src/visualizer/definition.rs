use serde::{Deserialize, Serialize};

use crate::graphics::CHANNEL_COUNT;

/// Which backend renders a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "gl")]
    Gpu,
    #[serde(rename = "2d")]
    Cpu,
}

impl Kind {
    pub fn label(&self) -> &'static str {
        match self {
            Kind::Gpu => "gpu",
            Kind::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Builtin,
    UserCreated,
}

/// Up to four image identifiers bound to the texture channels of a GPU
/// program. Stored as four strings, empty meaning "no texture".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TextureBindings([Option<String>; CHANNEL_COUNT]);

impl TextureBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings from the given identifiers in channel order. Extra entries
    /// are dropped and blank ones leave their channel empty.
    pub fn from_identifiers<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut bindings = Self::new();
        for (slot, identifier) in bindings.0.iter_mut().zip(identifiers) {
            let identifier: String = identifier.into();
            let trimmed = identifier.trim();
            if !trimmed.is_empty() {
                *slot = Some(trimmed.to_string());
            }
        }
        bindings
    }

    pub fn slot(&self, channel: usize) -> Option<&str> {
        self.0.get(channel).and_then(|slot| slot.as_deref())
    }

    pub fn set(&mut self, channel: usize, identifier: Option<String>) {
        if let Some(slot) = self.0.get_mut(channel) {
            *slot = identifier.filter(|id| !id.trim().is_empty());
        }
    }

    pub fn slots(&self) -> &[Option<String>; CHANNEL_COUNT] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

impl From<Vec<String>> for TextureBindings {
    fn from(identifiers: Vec<String>) -> Self {
        Self::from_identifiers(identifiers)
    }
}

impl From<TextureBindings> for Vec<String> {
    fn from(bindings: TextureBindings) -> Self {
        bindings
            .0
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect()
    }
}

/// One selectable visual effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizerDefinition {
    pub id: String,
    pub display_name: String,
    pub kind: Kind,
    /// WGSL fragment source for GPU definitions, effect source for CPU ones.
    pub source: String,
    /// Only meaningful for GPU definitions.
    pub textures: TextureBindings,
    pub origin: Origin,
}

impl VisualizerDefinition {
    pub fn is_builtin(&self) -> bool {
        self.origin == Origin::Builtin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_serialize_as_four_strings() {
        let bindings = TextureBindings::from_identifiers(["a.png", "", " ", "d.jpg", "extra.png"]);
        assert_eq!(bindings.slot(0), Some("a.png"));
        assert_eq!(bindings.slot(1), None);
        assert_eq!(bindings.slot(3), Some("d.jpg"));

        let json = serde_json::to_string(&bindings).unwrap();
        assert_eq!(json, r#"["a.png","","","d.jpg"]"#);

        let short: TextureBindings = serde_json::from_str(r#"["only.png"]"#).unwrap();
        assert_eq!(short.slot(0), Some("only.png"));
        assert_eq!(short.slot(1), None);
    }

    #[test]
    fn kinds_use_the_stored_tags() {
        assert_eq!(serde_json::to_string(&Kind::Gpu).unwrap(), r#""gl""#);
        assert_eq!(serde_json::from_str::<Kind>(r#""2d""#).unwrap(), Kind::Cpu);
    }
}
