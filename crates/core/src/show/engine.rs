use std::time::Instant;

use rand::{rngs::SmallRng, SeedableRng};
use tracing::debug;

use crate::{
    config::AppConfig,
    entity::{Drawables, EntityKind, EntityStore, UpdateStats},
    palette::{PaletteRotator, PaletteState},
    spawn::EntitySpawner,
    FeatureSnapshot, Result,
};

/// What one [`VisualEngine::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub spawned: usize,
    pub expired: usize,
    pub alive: usize,
    pub palette_switched: bool,
}

/// Per-session simulation state: spawner, entity store, palette rotator
/// and the random source they share.
#[derive(Debug)]
pub struct VisualEngine {
    spawner: EntitySpawner,
    store: EntityStore,
    rotator: PaletteRotator,
    rng: SmallRng,
}

impl VisualEngine {
    pub fn new(config: &AppConfig, now: Instant) -> Result<Self> {
        Self::with_rng(config, now, SmallRng::from_entropy())
    }

    /// Deterministic engine for tests and reproducible runs.
    pub fn seeded(config: &AppConfig, now: Instant, seed: u64) -> Result<Self> {
        Self::with_rng(config, now, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(config: &AppConfig, now: Instant, mut rng: SmallRng) -> Result<Self> {
        let rotator = PaletteRotator::new(
            config.palette.table.clone(),
            config.palette.interval(),
            now,
            &mut rng,
        )?;
        Ok(Self {
            spawner: EntitySpawner::new(config.spawn.clone(), config.viewport),
            store: EntityStore::new(config.viewport, config.spawn.rate_scale),
            rotator,
            rng,
        })
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn palette(&self) -> &PaletteState {
        self.rotator.state()
    }

    pub fn drawables(&self) -> Drawables<'_> {
        self.store.drawables()
    }

    /// Spawns `kind` entities for the current features.
    pub fn spawn(&mut self, kind: EntityKind, features: &FeatureSnapshot) -> usize {
        self.spawner.spawn(
            kind,
            features,
            self.rotator.state(),
            &mut self.store,
            &mut self.rng,
        )
    }

    pub fn update(&mut self, dt: f64, features: &FeatureSnapshot) -> UpdateStats {
        self.store.update(dt, features, &mut self.rng)
    }

    pub fn rotate_palette(&mut self, now: Instant) -> bool {
        self.rotator.tick(now, &mut self.rng)
    }

    /// One simulation step for the `active` variants: spawn, advance and
    /// expire, then rotate the palette.
    pub fn tick(
        &mut self,
        active: &[EntityKind],
        dt: f64,
        now: Instant,
        features: &FeatureSnapshot,
    ) -> TickStats {
        self.spawner.observe(features);
        let spawned = active
            .iter()
            .map(|&kind| self.spawn(kind, features))
            .sum::<usize>();
        let UpdateStats { alive, expired } = self.update(dt, features);
        let palette_switched = self.rotate_palette(now);

        debug!(spawned, expired, alive, "tick");
        TickStats {
            spawned,
            expired,
            alive,
            palette_switched,
        }
    }

    /// Drops every entity.
    pub fn clear(&mut self) {
        self.store.clear();
    }
}
