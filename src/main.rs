use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::fs;
use std::sync::Arc;
use winit::{
    event::{ElementState, Event, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

use particle9::audio::{AudioSource, CaptureSource, SignalSource, WavFileSource};
use particle9::config::{AppConfig, ApplyArgs, Cli, Command, HeadlessArgs};
use particle9::graphics::{GraphicsEngine, HeadlessDevice, RenderDevice, SourceValidator, SurfaceKind};
use particle9::render_loop::{FrameOutcome, RenderLoop, VisualizerContext};
use particle9::visualizer::{DocumentStore, JsonFileStore, TextureBindings, VisualizerRegistry};

const FRAME_RATE: f32 = 60.0;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = AppConfig::resolve(&cli)?;
    let store = JsonFileStore::new(&config.store_path);

    let result = match &cli.command {
        None | Some(Command::Run(_)) => run(&config, &store),
        Some(Command::Headless(args)) => headless(&config, &store, args),
        Some(Command::Devices) => {
            list_devices();
            Ok(())
        }
        Some(Command::List) => {
            list_visualizers(&store);
            Ok(())
        }
        Some(Command::Apply(args)) => apply(&store, args),
        Some(Command::Remove { id }) => edit_and_save(&store, |registry| registry.remove(id).map_err(Into::into)),
        Some(Command::Revert { id }) => edit_and_save(&store, |registry| {
            registry.revert(id, &mut SourceValidator).map_err(Into::into)
        }),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// Registry with the stored document restored through `context`'s gate.
fn restore_into<D: RenderDevice>(context: &mut VisualizerContext<D>, store: &impl DocumentStore) {
    match store.load() {
        Ok(Some(document)) => {
            context.edit(|registry, gate| registry.restore(&document, gate));
        }
        Ok(None) => info!("No stored visualizers, starting from the built-ins"),
        Err(e) => warn!("Ignoring stored visualizers: {:#}", e),
    }
}

fn offline_registry(store: &impl DocumentStore) -> Result<VisualizerRegistry> {
    let mut registry = VisualizerRegistry::new();
    if let Some(document) = store.load()? {
        registry.restore(&document, &mut SourceValidator);
    }
    Ok(registry)
}

fn prepare<D: RenderDevice>(
    device: D,
    config: &AppConfig,
    store: &impl DocumentStore,
) -> Result<VisualizerContext<D>> {
    let mut context = VisualizerContext::new(device, VisualizerRegistry::new())?;
    restore_into(&mut context, store);
    context.set_sensitivity(config.sensitivity);
    if let Err(e) = context.activate(&config.mode) {
        warn!("{}; staying on '{}'", e, context.registry().active_mode());
    }
    Ok(context)
}

fn run(config: &AppConfig, store: &JsonFileStore) -> Result<()> {
    info!("Starting Particle 9");

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Particle 9")
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height))
            .build(&event_loop)?,
    );

    let engine = pollster::block_on(GraphicsEngine::new(Arc::clone(&window)))?;
    let context = prepare(engine, config, store)?;
    let mut render_loop = RenderLoop::new(CaptureSource::new(), context);

    let input = match &config.input_device {
        Some(input) => input.clone(),
        None => CaptureSource::input_devices()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No audio input devices found"))?,
    };
    let output = config.output_device.clone();
    let status = pollster::block_on(render_loop.start(&input, output.as_deref())).clone();
    info!("{}", status);
    pollster::block_on(render_loop.set_volume(config.volume));

    let window_clone = Arc::clone(&window);
    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                elwt.exit();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => elwt.exit(),
                    PhysicalKey::Code(KeyCode::Space) => {
                        if render_loop.is_running() {
                            if let Err(e) = pollster::block_on(render_loop.stop()) {
                                error!("Stop failed: {:#}", e);
                            }
                        } else {
                            let status = pollster::block_on(render_loop.start(&input, output.as_deref()));
                            info!("{}", status);
                        }
                    }
                    PhysicalKey::Code(KeyCode::ArrowRight) => cycle_mode(render_loop.context_mut(), 1),
                    PhysicalKey::Code(KeyCode::ArrowLeft) => cycle_mode(render_loop.context_mut(), -1),
                    _ => {}
                }
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = render_loop.context_mut().resize(size.width, size.height) {
                    error!("Resize failed: {:#}", e);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = pollster::block_on(render_loop.step()) {
                    error!("Render error: {:#}", e);
                }
            }
            _ => {}
        },
        Event::AboutToWait => window_clone.request_redraw(),
        _ => {}
    })?;

    Ok(())
}

fn cycle_mode<D: RenderDevice>(context: &mut VisualizerContext<D>, step: isize) {
    let ids: Vec<String> = context
        .registry()
        .definitions()
        .into_iter()
        .map(|definition| definition.id)
        .collect();
    let current = ids
        .iter()
        .position(|id| id == context.registry().active_mode())
        .unwrap_or(0) as isize;
    let next = (current + step).rem_euclid(ids.len() as isize) as usize;
    if let Some(id) = ids.get(next) {
        if let Err(e) = context.activate(id) {
            warn!("{}", e);
        }
    }
}

fn headless(config: &AppConfig, store: &JsonFileStore, args: &HeadlessArgs) -> Result<()> {
    let device = HeadlessDevice::new(config.width, config.height);
    let context = prepare(device, config, store)?;

    let render_loop = match &args.wav {
        Some(path) => drive(WavFileSource::open(path, FRAME_RATE)?, context, args.frames)?,
        None => drive(SignalSource::new(44_100.0, FRAME_RATE), context, args.frames)?,
    };

    if let Some(path) = &args.snapshot {
        let context = render_loop.context();
        if context.surfaces().visible() != Some(SurfaceKind::Raster) {
            warn!("'{}' draws on the GPU surface; the snapshot only holds the raster canvas", context.registry().active_mode());
        }
        context
            .compositor()
            .canvas()
            .to_rgba_image()
            .save(path)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!("Snapshot written to {}", path.display());
    }
    Ok(())
}

fn drive<S: AudioSource>(
    source: S,
    context: VisualizerContext<HeadlessDevice>,
    frames: u32,
) -> Result<RenderLoop<S, HeadlessDevice>> {
    let mut render_loop = RenderLoop::new(source, context);
    pollster::block_on(async {
        let status = render_loop.start("headless", None).await;
        info!("{}", status);

        let (mut drawn, mut skipped) = (0u32, 0u32);
        for _ in 0..frames {
            match render_loop.step().await? {
                FrameOutcome::Drawn(_) => drawn += 1,
                FrameOutcome::Skipped | FrameOutcome::Idle => skipped += 1,
            }
        }
        info!(
            "Rendered {} frame(s) of '{}', {} skipped",
            drawn,
            render_loop.context().registry().active_mode(),
            skipped
        );
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(render_loop)
}

fn list_devices() {
    println!("Input devices:");
    for name in CaptureSource::input_devices() {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in CaptureSource::output_devices() {
        println!("  {name}");
    }
}

fn list_visualizers(store: &JsonFileStore) {
    let registry = match offline_registry(store) {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Ignoring stored visualizers: {:#}", e);
            VisualizerRegistry::new()
        }
    };
    for definition in registry.definitions() {
        let marker = if registry.has_override(&definition.id) { " (edited)" } else { "" };
        println!(
            "{:<24} {:<4} {}{}",
            definition.id,
            definition.kind.label(),
            definition.display_name,
            marker
        );
    }
}

fn apply(store: &JsonFileStore, args: &ApplyArgs) -> Result<()> {
    let source = fs::read_to_string(&args.source)
        .with_context(|| format!("Failed to read {}", args.source.display()))?;

    edit_and_save(store, |registry| {
        let current = registry
            .effective(&args.id)
            .ok_or_else(|| anyhow!("No visualizer registered under '{}'", args.id))?;
        let name = args.name.clone().unwrap_or(current.display_name);
        let textures = if args.textures.is_empty() {
            current.textures
        } else {
            TextureBindings::from_identifiers(args.textures.iter().cloned())
        };

        let target = registry.rename_and_apply(&args.id, &name, &source, textures, &mut SourceValidator)?;
        println!("Applied to {target}");
        Ok(())
    })
}

fn edit_and_save(
    store: &JsonFileStore,
    edit: impl FnOnce(&mut VisualizerRegistry) -> Result<()>,
) -> Result<()> {
    let mut registry = offline_registry(store)?;
    edit(&mut registry)?;
    store.save(&registry.to_document())
}
