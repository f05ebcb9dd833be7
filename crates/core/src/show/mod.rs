//! Shows: named selections of entity variants run by the session loop.

mod engine;

use std::time::Instant;

use tracing::info;

use crate::{entity::EntityKind, FeatureSnapshot, PulseError, Result};

pub use engine::{TickStats, VisualEngine};

/// Lifecycle hooks the session loop drives for the active show.
pub trait Show {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Called once before the first tick.
    fn initialize(&mut self, engine: &mut VisualEngine) -> Result<()> {
        engine.clear();
        Ok(())
    }

    fn tick(
        &mut self,
        engine: &mut VisualEngine,
        dt: f64,
        now: Instant,
        features: &FeatureSnapshot,
    ) -> TickStats;

    /// Called once when the session ends or the show is replaced.
    fn cleanup(&mut self, engine: &mut VisualEngine) {
        engine.clear();
    }
}

/// A show that simply runs a fixed set of entity variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantShow {
    name: &'static str,
    description: &'static str,
    kinds: Vec<EntityKind>,
}

impl VariantShow {
    pub fn new(name: &'static str, description: &'static str, kinds: Vec<EntityKind>) -> Self {
        Self {
            name,
            description,
            kinds,
        }
    }

    pub fn kinds(&self) -> &[EntityKind] {
        &self.kinds
    }
}

impl Show for VariantShow {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn initialize(&mut self, engine: &mut VisualEngine) -> Result<()> {
        engine.clear();
        info!(show = self.name, kinds = ?self.kinds, "show started");
        Ok(())
    }

    fn tick(
        &mut self,
        engine: &mut VisualEngine,
        dt: f64,
        now: Instant,
        features: &FeatureSnapshot,
    ) -> TickStats {
        engine.tick(&self.kinds, dt, now, features)
    }
}

/// Every built-in show, looked up by name.
#[derive(Debug, Clone)]
pub struct ShowRegistry {
    shows: Vec<VariantShow>,
}

impl Default for ShowRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ShowRegistry {
    pub const DEFAULT_SHOW: &'static str = "particles";

    pub fn builtin() -> Self {
        use EntityKind::*;

        Self {
            shows: vec![
                VariantShow::new(
                    "particles",
                    "particles burst from the centre on bass",
                    vec![Particle],
                ),
                VariantShow::new(
                    "rings",
                    "rings expand outward with the bass",
                    vec![ExpandingRing],
                ),
                VariantShow::new(
                    "speaker_rings",
                    "rings collapse inward like a speaker cone",
                    vec![CollapsingRing],
                ),
                VariantShow::new(
                    "tunnel",
                    "expanding and collapsing rings together",
                    vec![ExpandingRing, CollapsingRing],
                ),
                VariantShow::new(
                    "stars",
                    "twinkling stars scatter from the centre",
                    vec![Star],
                ),
                VariantShow::new(
                    "bubbles",
                    "bubbles rise with the mids and speed up on treble",
                    vec![Bubble],
                ),
                VariantShow::new(
                    "shapes",
                    "shapes coloured by the dominant tone drift with the band balance",
                    vec![Shape],
                ),
                VariantShow::new(
                    "image_dance",
                    "a tiled image breathes apart on bass",
                    vec![ImageFragment],
                ),
            ],
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.shows.iter().map(|show| show.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariantShow> + '_ {
        self.shows.iter()
    }

    pub fn get(&self, name: &str) -> Result<VariantShow> {
        self.shows
            .iter()
            .find(|show| show.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| PulseError::UnknownShow(name.to_string()))
    }
}
