use std::time::Duration;

use particle9::audio::{audio_energy, FeatureExtractor, MAX_ENERGY};
use particle9::compositor::industrial::{IndustrialMachine, MAX_SPARKS};
use particle9::compositor::{Canvas, Compositor, Effect, EffectFrame, ParticlePool};
use particle9::graphics::texture::NOISE_SIZE;
use particle9::graphics::{HeadlessDevice, ResourceCache, SurfaceKind, TextureState};
use particle9::render_loop::{FrameOutcome, VisualizerContext};
use particle9::visualizer::{
    builtins, Kind, Origin, TextureBindings, VisualizerDefinition, VisualizerRegistry, PLACEHOLDER_NAME,
};
use particle9::VisualizerError;

const BROKEN_SHADER: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let glow = frame.audio_energy *;
    return vec4<f32>(glow, 0.0, 0.0, 1.0);
}
"#;

const PULSE_SHADER: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = frag_coord(in) / frame.resolution;
    let pulse = 0.5 + 0.5 * sin(frame.time * 4.0) * frame.audio_energy;
    return vec4<f32>(uv.x * pulse, uv.y, pulse, 1.0);
}
"#;

fn context() -> VisualizerContext<HeadlessDevice> {
    VisualizerContext::new(HeadlessDevice::new(200, 150), VisualizerRegistry::new())
        .unwrap()
        .with_compositor(Compositor::with_seed(200, 150, 42).unwrap())
}

fn loud_frame() -> Vec<f32> {
    (0..512).map(|i| 0.08 / (1.0 + i as f32 * 0.02)).collect()
}

#[test]
fn accepted_shaders_render_once_activated() {
    let mut ctx = context();
    let mut sources: Vec<String> = builtins()
        .into_iter()
        .filter(|definition| definition.kind == Kind::Gpu)
        .map(|definition| definition.source)
        .collect();
    sources.push(PULSE_SHADER.to_string());

    for source in sources {
        let id = ctx.edit(|registry, _| registry.create_placeholder());
        ctx.edit(|registry, gate| registry.compile_and_apply(&id, &source, TextureBindings::new(), gate))
            .unwrap();
        ctx.activate(&id).unwrap();

        let draws = ctx.gpu().device().draws().len();
        assert_eq!(ctx.render(&loud_frame()).unwrap(), FrameOutcome::Drawn(SurfaceKind::Gpu));
        assert_eq!(ctx.gpu().device().draws().len(), draws + 1);
        assert_eq!(ctx.gpu().active_mode(), Some(id.as_str()));
    }
}

#[test]
fn rejected_remix_keeps_the_builtin_program() {
    let mut ctx = context();
    ctx.activate("starnest").unwrap();
    ctx.render(&loud_frame()).unwrap();
    let handle = ctx.gpu().active_program();
    let program = ctx.gpu().device().last_draw().unwrap().program;

    let result = ctx.edit(|registry, gate| {
        registry.rename_and_apply("starnest", "Star Nest Remix", BROKEN_SHADER, TextureBindings::new(), gate)
    });
    match result {
        Err(VisualizerError::Compile(e)) => assert!(!e.diagnostic.is_empty()),
        other => panic!("expected a compile error, got {other:?}"),
    }

    assert_eq!(ctx.registry().active_mode(), "starnest");
    assert_eq!(ctx.registry().len(), 12);
    assert_eq!(ctx.gpu().active_program(), handle);

    ctx.render(&loud_frame()).unwrap();
    assert_eq!(ctx.gpu().device().last_draw().unwrap().program, program);
}

#[test]
fn rejected_edit_leaves_a_user_mode_untouched() {
    let mut ctx = context();
    let id = ctx.edit(|registry, _| registry.create_placeholder());
    ctx.activate(&id).unwrap();
    ctx.render(&loud_frame()).unwrap();
    let handle = ctx.gpu().active_program();

    let err = ctx
        .edit(|registry, gate| registry.compile_and_apply(&id, BROKEN_SHADER, TextureBindings::new(), gate))
        .unwrap_err();
    assert!(matches!(err, VisualizerError::Compile(_)));
    assert_eq!(ctx.registry().active_mode(), id);
    assert_eq!(ctx.gpu().active_program(), handle);
    assert_eq!(ctx.registry().effective(&id).unwrap().display_name, PLACEHOLDER_NAME);
}

#[test]
fn empty_frames_leave_the_picture_alone() {
    let mut ctx = context();
    let silent = VisualizerDefinition {
        id: "user_1".into(),
        display_name: "Silent".into(),
        kind: Kind::Cpu,
        source: "render { }".into(),
        textures: TextureBindings::new(),
        origin: Origin::UserCreated,
    };
    ctx.edit(|registry, gate| registry.register(silent, gate)).unwrap();

    // Something on screen first so "unchanged" means something.
    ctx.render(&loud_frame()).unwrap();
    ctx.activate("user_1").unwrap();
    let before = ctx.gpu().device().last_raster().unwrap().to_vec();
    let presented = ctx.gpu().device().raster_frames();

    for _ in 0..10 {
        assert_eq!(ctx.render(&[]).unwrap(), FrameOutcome::Skipped);
    }
    assert_eq!(ctx.gpu().device().raster_frames(), presented);
    assert_eq!(ctx.gpu().device().last_raster().unwrap(), &before[..]);
}

#[test]
fn missing_texture_becomes_noise() {
    let mut device = HeadlessDevice::new(64, 64);
    let mut cache = ResourceCache::<HeadlessDevice>::new();

    let handle = cache.get_texture(&mut device, "missing.png");
    let info = cache.texture_info(handle).unwrap();
    assert_eq!(info.state, TextureState::Loading);
    assert_eq!((info.width, info.height), (1, 1));

    assert!(cache.block_until_loaded(&mut device, Duration::from_secs(10)));
    let info = cache.texture_info(handle).unwrap();
    assert_eq!(info.state, TextureState::Fallback);
    assert_eq!((info.width, info.height), (NOISE_SIZE, NOISE_SIZE));
    assert_eq!(cache.get_texture(&mut device, "missing.png"), handle);
    assert_eq!(cache.texture_count(), 1);
}

fn settle_texture(device: &mut HeadlessDevice, identifier: &str) -> (TextureState, u32, u32) {
    let mut cache = ResourceCache::<HeadlessDevice>::new();
    let handle = cache.get_texture(device, identifier);
    assert!(cache.block_until_loaded(device, Duration::from_secs(10)));
    let info = cache.texture_info(handle).unwrap();
    (info.state, info.width, info.height)
}

#[test]
fn corrupt_or_truncated_files_become_noise() {
    let dir = std::env::temp_dir();
    let garbage = dir.join(format!("particle9_garbage_{}.png", std::process::id()));
    let truncated = dir.join(format!("particle9_truncated_{}.png", std::process::id()));
    std::fs::write(&garbage, b"not a png at all").unwrap();

    let mut encoded = Vec::new();
    image::RgbaImage::new(16, 16)
        .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(&truncated, &encoded[..encoded.len() / 2]).unwrap();

    let mut device = HeadlessDevice::new(64, 64);
    for path in [&garbage, &truncated] {
        let result = settle_texture(&mut device, &path.to_string_lossy());
        std::fs::remove_file(path).unwrap();
        assert_eq!(result, (TextureState::Fallback, NOISE_SIZE, NOISE_SIZE));
    }
}

#[test]
fn images_too_large_for_the_device_become_noise() {
    let path = std::env::temp_dir().join(format!("particle9_oversized_{}.png", std::process::id()));
    image::RgbaImage::new(NOISE_SIZE + 44, 2).save(&path).unwrap();

    let mut device = HeadlessDevice::new(64, 64).with_max_texture_dimension(NOISE_SIZE);
    let result = settle_texture(&mut device, &path.to_string_lossy());
    std::fs::remove_file(&path).unwrap();

    assert_eq!(result, (TextureState::Fallback, NOISE_SIZE, NOISE_SIZE));
    assert!(device.textures_created() >= 2);
}

#[test]
fn placeholder_rename_updates_in_place() {
    let mut ctx = context();
    let id = ctx.edit(|registry, _| registry.create_placeholder());
    let target = ctx
        .edit(|registry, gate| {
            registry.rename_and_apply(&id, "Pulse", PULSE_SHADER, TextureBindings::new(), gate)
        })
        .unwrap();

    assert_eq!(target, id);
    let definition = ctx.registry().effective(&id).unwrap();
    assert_eq!(definition.display_name, "Pulse");
    assert_eq!(definition.source, PULSE_SHADER);
    assert_eq!(ctx.registry().len(), 13);
}

#[test]
fn builtins_are_protected() {
    let mut registry = VisualizerRegistry::new();
    for definition in builtins() {
        assert!(matches!(registry.remove(&definition.id), Err(VisualizerError::ProtectedEntry(_))));
    }
    assert_eq!(registry.len(), 12);
}

#[test]
fn energy_is_always_bounded() {
    let inputs: Vec<Vec<f32>> = vec![
        Vec::new(),
        vec![0.0; 512],
        vec![f32::MAX; 512],
        vec![f32::INFINITY; 64],
        vec![f32::NAN; 64],
        vec![-1.0e9; 10],
        (0..512).map(|i| (i as f32).sin() * 1.0e6).collect(),
    ];
    for raw in &inputs {
        for sensitivity in [0.0, 1.0, 50.0] {
            let energy = audio_energy(raw, sensitivity);
            assert!((0.0..=MAX_ENERGY).contains(&energy), "{energy} out of range");
        }
    }
}

#[test]
fn pools_never_grow() {
    let mut pool = ParticlePool::new(3);
    let spawned = (0..10).filter(|&i| pool.spawn(i)).count();
    assert_eq!(spawned, 3);
    assert_eq!(pool.active_count(), 3);
    assert_eq!(pool.capacity(), 3);

    let mut machine = IndustrialMachine::new(7);
    let mut canvas = Canvas::new(320, 240).unwrap();
    let mut extractor = FeatureExtractor::new();
    for frame in 0..300 {
        let features = extractor.update(&[1.0; 512], 5.0, &machine.profile()).clone();
        machine.render(&EffectFrame::new(&features, frame as f32 / 60.0), &mut canvas);
        assert!(machine.active_sparks() <= MAX_SPARKS);
    }
}
