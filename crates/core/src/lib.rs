//! Core library for the Pulsefield visualiser.
//!
//! Audio arrives through an [`audio::AudioSource`], is reduced to band
//! energies in the capture context and handed to the render loop as a
//! [`FeatureSnapshot`]. The render loop spawns, advances and expires
//! entities according to the active [`show::Show`] and hands the resulting
//! drawables to a [`render::Surface`].

pub mod analysis;
pub mod audio;
pub mod config;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod palette;
pub mod render;
pub mod runtime;
pub mod show;
pub mod spawn;
pub mod timeline;

pub use analysis::{AudioBlock, Band, BandEnergies, FeatureSnapshot};
pub use audio::{AudioSource, CaptureProcessor, SyntheticSource};
pub use config::{AppConfig, AudioConfig};
pub use entity::{Drawable, EntityKind, EntityStore};
pub use error::{PulseError, Result};
pub use palette::{Color, Palette};
pub use render::{Renderer, Surface, SurfaceError};
pub use runtime::{run_session, SessionOptions, SessionReport};
pub use show::{Show, ShowRegistry, VisualEngine};
