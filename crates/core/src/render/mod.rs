//! Hand-off of drawables to a drawing backend.

use tracing::{error, warn};

use crate::{entity::Drawable, palette::Color, PulseError, Result};

/// Failure reported by a [`Surface`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// The current operation failed but the surface remains usable.
    #[error("{0}")]
    Recoverable(String),
    /// The surface is gone; nothing more will be drawn on it.
    #[error("{0}")]
    Fatal(String),
}

/// Drawing backend. Called once per frame as `clear`, `draw` for every
/// live entity, then `present`.
pub trait Surface {
    fn clear(&mut self, background: Color) -> std::result::Result<(), SurfaceError>;
    fn draw(&mut self, drawable: &Drawable) -> std::result::Result<(), SurfaceError>;
    fn present(&mut self) -> std::result::Result<(), SurfaceError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub drawn: usize,
    pub failed: usize,
}

/// Drives a [`Surface`] and stops touching it after a fatal failure.
#[derive(Debug)]
pub struct Renderer<S> {
    surface: S,
    halted: Option<String>,
    frames: u64,
    recoverable: u64,
}

impl<S: Surface> Renderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            halted: None,
            frames: 0,
            recoverable: 0,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Frames presented successfully.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn recoverable_errors(&self) -> u64 {
        self.recoverable
    }

    /// Draws one frame. Recoverable failures are logged and counted; a
    /// fatal one halts the renderer and is returned as
    /// [`PulseError::Renderer`].
    pub fn render_frame(
        &mut self,
        background: Color,
        drawables: impl IntoIterator<Item = Drawable>,
    ) -> Result<FrameStats> {
        if let Some(reason) = &self.halted {
            return Err(PulseError::Renderer(format!("surface halted: {reason}")));
        }

        let mut stats = FrameStats::default();
        let cleared = self.surface.clear(background);
        self.check(cleared)?;

        for drawable in drawables {
            let drawn = self.surface.draw(&drawable);
            if self.check(drawn)? {
                stats.drawn += 1;
            } else {
                stats.failed += 1;
            }
        }

        let presented = self.surface.present();
        if self.check(presented)? {
            self.frames += 1;
        }
        Ok(stats)
    }

    /// `Ok(true)` on success, `Ok(false)` for a recoverable failure.
    fn check(&mut self, outcome: std::result::Result<(), SurfaceError>) -> Result<bool> {
        match outcome {
            Ok(()) => Ok(true),
            Err(SurfaceError::Recoverable(reason)) => {
                self.recoverable += 1;
                warn!(%reason, "surface error");
                Ok(false)
            }
            Err(SurfaceError::Fatal(reason)) => {
                error!(%reason, "surface failed; rendering stopped");
                self.halted = Some(reason.clone());
                Err(PulseError::Renderer(reason))
            }
        }
    }
}

/// Keeps the drawables of the last presented frame. Used for headless
/// runs.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    background: Color,
    pending: Vec<Drawable>,
    last_frame: Vec<Drawable>,
    presented: u64,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> &[Drawable] {
        &self.last_frame
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Surface for RecordingSurface {
    fn clear(&mut self, background: Color) -> std::result::Result<(), SurfaceError> {
        self.background = background;
        self.pending.clear();
        Ok(())
    }

    fn draw(&mut self, drawable: &Drawable) -> std::result::Result<(), SurfaceError> {
        self.pending.push(*drawable);
        Ok(())
    }

    fn present(&mut self) -> std::result::Result<(), SurfaceError> {
        std::mem::swap(&mut self.pending, &mut self.last_frame);
        self.pending.clear();
        self.presented += 1;
        Ok(())
    }
}

/// Darkened first palette colour, the backdrop behind every show.
pub fn background_for(palette: &crate::palette::Palette) -> Color {
    let [base, ..] = *palette;
    Color(base.r() / 8, base.g() / 8, base.b() / 8)
}
