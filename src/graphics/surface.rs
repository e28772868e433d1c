use log::debug;

use crate::visualizer::Kind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Gpu,
    Raster,
}

impl From<Kind> for SurfaceKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Gpu => SurfaceKind::Gpu,
            Kind::Cpu => SurfaceKind::Raster,
        }
    }
}

/// The two drawable surfaces sharing the window: the GPU surface programs
/// draw into and the raster surface the compositor paints. At most one is
/// visible; both always share the same pixel size.
#[derive(Debug, Clone)]
pub struct DisplaySurfaces {
    width: u32,
    height: u32,
    visible: Option<SurfaceKind>,
}

impl DisplaySurfaces {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            visible: None,
        }
    }

    /// Make `kind` the visible surface. Returns true when visibility changed.
    pub fn show(&mut self, kind: SurfaceKind) -> bool {
        if self.visible == Some(kind) {
            return false;
        }
        debug!("Showing {:?} surface", kind);
        self.visible = Some(kind);
        true
    }

    pub fn hide_all(&mut self) {
        self.visible = None;
    }

    /// Apply new pixel dimensions. Zero-sized requests (minimised windows)
    /// are ignored. Returns true when the size actually changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return false;
        }
        self.width = width;
        self.height = height;
        true
    }

    pub fn visible(&self) -> Option<SurfaceKind> {
        self.visible
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_surface_is_visible() {
        let mut surfaces = DisplaySurfaces::new(640, 480);
        assert_eq!(surfaces.visible(), None);
        assert!(surfaces.show(SurfaceKind::Gpu));
        assert!(!surfaces.show(SurfaceKind::Gpu));
        assert!(surfaces.show(SurfaceKind::Raster));
        assert_eq!(surfaces.visible(), Some(SurfaceKind::Raster));
        surfaces.hide_all();
        assert_eq!(surfaces.visible(), None);
    }

    #[test]
    fn zero_sized_resize_is_ignored() {
        let mut surfaces = DisplaySurfaces::new(640, 480);
        assert!(!surfaces.resize(0, 100));
        assert!(!surfaces.resize(640, 480));
        assert!(surfaces.resize(800, 600));
        assert_eq!(surfaces.size(), (800, 600));
    }
}
