use super::definition::{Kind, Origin, TextureBindings, VisualizerDefinition};
use crate::compositor::EffectKind;

/// Mode the registry falls back to when the active one disappears.
pub const SAFE_DEFAULT: &str = "neural";

pub const CURSED_TEXTURE: &str = "assets/cursed_texture.jpg";
pub const DUSTY_TEXTURE: &str = "assets/dusty_texture.jpg";

const STARNEST: &str = include_str!("../../shaders/builtin/starnest.wgsl");
const INDUSTRIAL_3D: &str = include_str!("../../shaders/builtin/industrial_3d.wgsl");
const CURSED_4D: &str = include_str!("../../shaders/builtin/cursed_4d.wgsl");
const DUSTY: &str = include_str!("../../shaders/builtin/dusty.wgsl");
const SURVEILLANCE: &str = include_str!("../../shaders/builtin/surveillance.wgsl");
const ACID: &str = include_str!("../../shaders/builtin/acid.wgsl");

enum Body {
    Shader(&'static str, &'static [&'static str]),
    Effect(EffectKind),
}

/// Catalogue order is display order.
const CATALOGUE: [(&str, &str, Body); 12] = [
    ("neural", "Particle 9 (Neural Core)", Body::Effect(EffectKind::Neural)),
    ("starnest", "Star Nest (Deep Space)", Body::Shader(STARNEST, &[])),
    ("industrial_3d", "Industrial Engine (Masterpiece)", Body::Shader(INDUSTRIAL_3D, &[])),
    ("cursed_4d", "4D Machine (Cursed)", Body::Shader(CURSED_4D, &[CURSED_TEXTURE])),
    ("dusty", "Dusty Menger (Masterpiece)", Body::Shader(DUSTY, &[DUSTY_TEXTURE])),
    ("surveillance", "Surveillance (Legacy 4K)", Body::Shader(SURVEILLANCE, &[])),
    ("acid", "Liquid Acid (Psychedelic)", Body::Shader(ACID, &[])),
    ("industrial", "Industrial (Brutalist Machine)", Body::Effect(EffectKind::Industrial)),
    ("retro", "Synthwave (Grid & Sun)", Body::Effect(EffectKind::Retro)),
    ("spectrum", "Classic EQ Bars", Body::Effect(EffectKind::Spectrum)),
    ("matrix", "Digital Rain (The Matrix)", Body::Effect(EffectKind::Matrix)),
    ("vortex", "Vortex Tunnel (Warp Speed)", Body::Effect(EffectKind::Vortex)),
];

/// Every visualizer shipped with the engine.
pub fn builtins() -> Vec<VisualizerDefinition> {
    CATALOGUE
        .iter()
        .map(|(id, name, body)| {
            let (kind, source, textures) = match body {
                Body::Shader(source, textures) => (
                    Kind::Gpu,
                    source.to_string(),
                    TextureBindings::from_identifiers(textures.iter().copied()),
                ),
                Body::Effect(effect) => (Kind::Cpu, effect.source(), TextureBindings::new()),
            };
            VisualizerDefinition {
                id: id.to_string(),
                display_name: name.to_string(),
                kind,
                source,
                textures,
                origin: Origin::Builtin,
            }
        })
        .collect()
}

pub fn is_builtin(id: &str) -> bool {
    CATALOGUE.iter().any(|(builtin, _, _)| *builtin == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::CpuProgram;
    use crate::graphics::{link_program, shader::VERTEX_SOURCE};

    #[test]
    fn catalogue_has_twelve_unique_ids() {
        let all = builtins();
        assert_eq!(all.len(), 12);
        let mut ids: Vec<_> = all.iter().map(|def| def.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 12);
        assert!(is_builtin(SAFE_DEFAULT));
        assert!(!is_builtin("user_1"));
    }

    #[test]
    fn every_builtin_source_builds() {
        for def in builtins() {
            match def.kind {
                Kind::Gpu => {
                    if let Err(e) = link_program(VERTEX_SOURCE, &def.source) {
                        panic!("{} failed to link: {}", def.id, e);
                    }
                }
                Kind::Cpu => {
                    CpuProgram::parse(&def.source).unwrap();
                }
            }
        }
    }

    #[test]
    fn textured_builtins_bind_channel_zero() {
        let all = builtins();
        let dusty = all.iter().find(|def| def.id == "dusty").unwrap();
        assert_eq!(dusty.textures.slot(0), Some(DUSTY_TEXTURE));
        let starnest = all.iter().find(|def| def.id == "starnest").unwrap();
        assert!(starnest.textures.is_empty());
    }
}
