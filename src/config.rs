use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::visualizer::SAFE_DEFAULT;

#[derive(Parser, Debug)]
#[command(name = "particle9")]
#[command(about = "Audio-reactive visualizer with GPU shaders and composited effects")]
pub struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Where user visualizers and overrides are stored
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a window and visualize live capture (default)
    Run(RunArgs),

    /// Render frames without a window, from a synthetic signal or a WAV file
    Headless(HeadlessArgs),

    /// List audio input and output devices
    Devices,

    /// List visualizers
    List,

    /// Validate a source file and apply it to a visualizer, forking on rename
    Apply(ApplyArgs),

    /// Delete a user visualizer
    Remove { id: String },

    /// Drop the stored override of a built-in visualizer
    Revert { id: String },
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Input device name
    #[arg(short, long)]
    pub input: Option<String>,

    /// Output device for passthrough
    #[arg(short, long)]
    pub output: Option<String>,

    /// Visualizer to start with
    #[arg(short, long)]
    pub mode: Option<String>,

    #[arg(short, long)]
    pub sensitivity: Option<f32>,

    /// Passthrough volume, 0.0 to 2.0
    #[arg(long)]
    pub volume: Option<f32>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct HeadlessArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Number of frames to render
    #[arg(short, long, default_value = "120")]
    pub frames: u32,

    /// WAV file to analyse instead of the synthetic signal
    #[arg(long)]
    pub wav: Option<PathBuf>,

    /// Write the last composited frame as a PNG
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Visualizer to edit
    pub id: String,

    /// File holding the new shader or effect source
    #[arg(long)]
    pub source: PathBuf,

    /// New display name; a changed name forks unless the entry is still unnamed
    #[arg(long)]
    pub name: Option<String>,

    /// Texture identifiers for channels 0..3, in order
    #[arg(long = "texture")]
    pub textures: Vec<String>,
}

/// Settings that persist between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub mode: String,
    pub sensitivity: f32,
    pub volume: f32,
    pub width: u32,
    pub height: u32,
    pub store_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            mode: SAFE_DEFAULT.to_string(),
            sensitivity: 1.0,
            volume: 1.0,
            width: 1280,
            height: 720,
            store_path: PathBuf::from("particle9_visualizers.json"),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Config file (if any) with command-line flags layered on top.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(store) = &cli.store {
            config.store_path = store.clone();
        }
        match &cli.command {
            Some(Command::Run(run)) => config.apply(run),
            Some(Command::Headless(headless)) => config.apply(&headless.run),
            _ => {}
        }
        Ok(config)
    }

    pub fn apply(&mut self, args: &RunArgs) {
        if let Some(input) = &args.input {
            self.input_device = Some(input.clone());
        }
        if let Some(output) = &args.output {
            self.output_device = Some(output.clone());
        }
        if let Some(mode) = &args.mode {
            self.mode = mode.clone();
        }
        if let Some(sensitivity) = args.sensitivity {
            self.sensitivity = sensitivity;
        }
        if let Some(volume) = args.volume {
            self.volume = volume;
        }
        if let Some(width) = args.width {
            self.width = width;
        }
        if let Some(height) = args.height {
            self.height = height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.mode, "neural");
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.store_path, PathBuf::from("particle9_visualizers.json"));
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{ "mode": "acid", "sensitivity": 2.5 }"#).unwrap();
        assert_eq!(config.mode, "acid");
        assert_eq!(config.sensitivity, 2.5);
        assert_eq!(config.volume, 1.0);
    }

    #[test]
    fn flags_override_the_file() {
        let cli = Cli::parse_from(["particle9", "--store", "x.json", "run", "--mode", "retro", "--width", "640"]);
        let config = AppConfig::resolve(&cli).unwrap();
        assert_eq!(config.mode, "retro");
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 720);
        assert_eq!(config.store_path, PathBuf::from("x.json"));
    }

    #[test]
    fn apply_collects_textures_in_order() {
        let cli = Cli::parse_from([
            "particle9", "apply", "dusty", "--source", "s.wgsl", "--texture", "a.png", "--texture", "b.png",
        ]);
        match cli.command {
            Some(Command::Apply(apply)) => assert_eq!(apply.textures, ["a.png", "b.png"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
