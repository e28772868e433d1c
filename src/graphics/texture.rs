use crossbeam_channel::{Receiver, Sender};
use image::imageops::flip_vertical_in_place;
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::error::TextureLoadError;

/// Side length of the noise pattern substituted for images that fail to load.
pub const NOISE_SIZE: u32 = 256;

/// Neutral grey shown while an image is still decoding.
const PLACEHOLDER_PIXEL: [u8; 4] = [128, 128, 128, 255];

/// Tightly packed RGBA8 pixels, rows bottom-up so that a `frag_coord`-based
/// lookup shows the image upright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureImage {
    pub fn placeholder() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: PLACEHOLDER_PIXEL.to_vec(),
        }
    }

    /// Opaque random pixels seeded by the identifier, so the same failed
    /// identifier always produces the same pattern.
    pub fn noise(identifier: &str) -> Self {
        let mut rng = fastrand::Rng::with_seed(fnv1a(identifier.as_bytes()));
        let mut pixels = vec![0u8; (NOISE_SIZE * NOISE_SIZE * 4) as usize];
        for pixel in pixels.chunks_exact_mut(4) {
            pixel[0] = rng.u8(..);
            pixel[1] = rng.u8(..);
            pixel[2] = rng.u8(..);
            pixel[3] = 255;
        }
        Self {
            width: NOISE_SIZE,
            height: NOISE_SIZE,
            pixels,
        }
    }

    pub fn decode(identifier: &str) -> Result<Self, TextureLoadError> {
        let unavailable = |reason: String| TextureLoadError::ResourceUnavailable {
            identifier: identifier.to_string(),
            reason,
        };

        let path = resolve_identifier(identifier).ok_or_else(|| {
            unavailable("only local paths and file:// identifiers can be loaded".into())
        })?;

        let image = image::open(&path).map_err(|e| unavailable(e.to_string()))?;
        let mut rgba = image.to_rgba8();
        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(unavailable(format!(
                "image has zero extent ({}x{})",
                rgba.width(),
                rgba.height()
            )));
        }
        flip_vertical_in_place(&mut rgba);

        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }
}

fn resolve_identifier(identifier: &str) -> Option<PathBuf> {
    if let Some(path) = identifier.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if identifier.contains("://") {
        return None;
    }
    Some(Path::new(identifier).to_path_buf())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// How a texture slot's current pixels came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    Loading,
    Loaded,
    Fallback,
}

pub struct DecodedTexture {
    pub identifier: String,
    pub image: TextureImage,
    pub state: TextureState,
}

/// Decodes images off the render thread. Finished images are collected with
/// [`TextureLoader::try_recv`].
pub struct TextureLoader {
    sender: Sender<DecodedTexture>,
    receiver: Receiver<DecodedTexture>,
}

impl TextureLoader {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn request(&self, identifier: &str) {
        let sender = self.sender.clone();
        let id = identifier.to_string();

        let spawned = std::thread::Builder::new()
            .name("texture-decode".into())
            .spawn(move || {
                let decoded = decode_or_fallback(id);
                // The cache may already be gone at shutdown.
                let _ = sender.send(decoded);
            });

        if let Err(e) = spawned {
            warn!("Could not start texture decode thread: {}", e);
            let _ = self.sender.send(DecodedTexture {
                identifier: identifier.to_string(),
                image: TextureImage::noise(identifier),
                state: TextureState::Fallback,
            });
        }
    }

    pub fn try_recv(&self) -> Option<DecodedTexture> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<DecodedTexture> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl Default for TextureLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_or_fallback(identifier: String) -> DecodedTexture {
    match TextureImage::decode(&identifier) {
        Ok(image) => {
            info!("Loaded texture {} ({}x{})", identifier, image.width, image.height);
            DecodedTexture {
                identifier,
                image,
                state: TextureState::Loaded,
            }
        }
        Err(e) => {
            warn!("{}; substituting noise", e);
            let image = TextureImage::noise(&identifier);
            DecodedTexture {
                identifier,
                image,
                state: TextureState::Fallback,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic_and_opaque() {
        let a = TextureImage::noise("missing.png");
        let b = TextureImage::noise("missing.png");
        let c = TextureImage::noise("other.png");
        assert_eq!(a, b);
        assert_ne!(a.pixels, c.pixels);
        assert_eq!(a.pixels.len(), (NOISE_SIZE * NOISE_SIZE * 4) as usize);
        assert!(a.pixels.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn remote_identifiers_are_unavailable() {
        assert!(TextureImage::decode("https://example.com/a.png").is_err());
        assert!(TextureImage::decode("missing.png").is_err());
    }

    #[test]
    fn decodes_png_bottom_up() {
        let path = std::env::temp_dir().join(format!("particle9_tex_{}.png", std::process::id()));
        let mut img = image::RgbaImage::new(1, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        img.save(&path).unwrap();

        let identifier = format!("file://{}", path.display());
        let decoded = TextureImage::decode(&identifier).unwrap();
        assert_eq!((decoded.width, decoded.height), (1, 2));
        assert_eq!(&decoded.pixels[..4], &[0, 0, 255, 255]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn loader_reports_fallback_for_missing_files() {
        let loader = TextureLoader::new();
        loader.request("definitely-missing.png");
        let decoded = loader
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(decoded.state, TextureState::Fallback);
        assert_eq!(decoded.image.width, NOISE_SIZE);
    }
}
