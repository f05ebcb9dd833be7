use rand::RngCore;
use tracing::trace;

use super::{Drawable, Entity, EntityKind, UpdateContext};
use crate::{config::Viewport, FeatureSnapshot};

/// Outcome of one [`EntityStore::update`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub alive: usize,
    pub expired: usize,
}

/// Owns every live entity, one arena per [`EntityKind`].
///
/// Dead entities are dropped during [`update`](Self::update), so nothing
/// expired is ever visible to the spawner or the renderer.
#[derive(Debug, Clone)]
pub struct EntityStore {
    arenas: [Vec<Entity>; EntityKind::COUNT],
    viewport: Viewport,
    rate_scale: f64,
}

impl EntityStore {
    pub fn new(viewport: Viewport, rate_scale: f64) -> Self {
        Self {
            arenas: std::array::from_fn(|_| Vec::new()),
            viewport,
            rate_scale,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn rate_scale(&self) -> f64 {
        self.rate_scale
    }

    pub fn population(&self, kind: EntityKind) -> usize {
        self.arenas[kind.index()].len()
    }

    pub fn len(&self) -> usize {
        self.arenas.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.arenas.iter().all(Vec::is_empty)
    }

    pub fn iter(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> + '_ {
        self.arenas[kind.index()].iter()
    }

    pub fn insert(&mut self, entity: Entity) {
        self.arenas[entity.kind().index()].push(entity);
    }

    pub fn extend(&mut self, entities: impl IntoIterator<Item = Entity>) {
        for entity in entities {
            self.insert(entity);
        }
    }

    pub fn clear(&mut self) {
        self.arenas.iter_mut().for_each(Vec::clear);
    }

    pub fn clear_kind(&mut self, kind: EntityKind) {
        self.arenas[kind.index()].clear();
    }

    /// Advances every entity by `dt` seconds and drops the ones that died.
    /// Negative or non-finite `dt` is treated as zero.
    pub fn update(
        &mut self,
        dt: f64,
        features: &FeatureSnapshot,
        rng: &mut dyn RngCore,
    ) -> UpdateStats {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let mut ctx = UpdateContext {
            dt,
            features,
            viewport: self.viewport,
            rate_scale: self.rate_scale,
            rng,
        };

        let mut stats = UpdateStats::default();
        for (kind, arena) in EntityKind::ALL.iter().zip(self.arenas.iter_mut()) {
            let before = arena.len();
            arena.retain_mut(|entity| entity.update(&mut ctx));
            let expired = before - arena.len();
            if expired > 0 {
                trace!(%kind, expired, alive = arena.len(), "entities expired");
            }
            stats.expired += expired;
            stats.alive += arena.len();
        }
        stats
    }

    /// Draw order is arena order, oldest first within a kind. Call again to
    /// restart.
    pub fn drawables(&self) -> Drawables<'_> {
        Drawables {
            arenas: &self.arenas,
            kind: 0,
            index: 0,
        }
    }
}

/// Iterator over the store's live entities as [`Drawable`]s.
#[derive(Debug, Clone)]
pub struct Drawables<'a> {
    arenas: &'a [Vec<Entity>; EntityKind::COUNT],
    kind: usize,
    index: usize,
}

impl Iterator for Drawables<'_> {
    type Item = Drawable;

    fn next(&mut self) -> Option<Drawable> {
        while let Some(arena) = self.arenas.get(self.kind) {
            if let Some(entity) = arena.get(self.index) {
                self.index += 1;
                return Some(entity.drawable());
            }
            self.kind += 1;
            self.index = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::{
        entity::{Behavior, Point},
        palette::Color,
    };

    fn particle(lifetime: f64) -> Entity {
        Entity::new(
            Point::new(10.0, 10.0),
            lifetime,
            Color::WHITE,
            2.0,
            Behavior::Particle {
                velocity: Point::default(),
            },
        )
    }

    fn ring(radius: f64) -> Entity {
        let shrinking = Behavior::CollapsingRing { shrink: 2.0 };
        let center = Point::new(400.0, 240.0);
        Entity::new(center, 60.0, Color::WHITE, radius, shrinking)
    }

    #[test]
    fn update_drops_expired_entities() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        store.extend([particle(0.5), particle(1.0), particle(2.0), ring(10.0)]);
        assert_eq!(store.population(EntityKind::Particle), 3);
        assert_eq!(store.len(), 4);

        let quiet = FeatureSnapshot::silent(Instant::now());
        let stats = store.update(0.75, &quiet, &mut rng);
        assert_eq!(stats, UpdateStats { alive: 3, expired: 1 });

        let stats = store.update(0.75, &quiet, &mut rng);
        assert_eq!(stats.expired, 1);
        assert_eq!(store.population(EntityKind::Particle), 1);
        assert!(store.iter(EntityKind::Particle).all(|e| e.lifetime == 2.0));
    }

    #[test]
    fn collapsing_ring_leaves_the_store_once_its_radius_is_spent() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        store.insert(ring(10.0));
        let quiet = FeatureSnapshot::silent(Instant::now());

        let mut removed_at = None;
        for tick in 1..=6 {
            store.update(1.0, &quiet, &mut rng);
            if store.population(EntityKind::CollapsingRing) == 0 {
                removed_at = Some(tick);
                break;
            }
        }
        assert!(matches!(removed_at, Some(5) | Some(6)));
    }

    #[test]
    fn drawables_visit_every_live_entity_and_restart() {
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        store.extend([particle(1.0), ring(10.0), particle(1.0)]);

        let drawables = store.drawables();
        let kinds: Vec<_> = drawables.clone().map(|d| d.kind).collect();
        let expected = vec![
            EntityKind::Particle,
            EntityKind::Particle,
            EntityKind::CollapsingRing,
        ];
        assert_eq!(kinds, expected);
        assert_eq!(drawables.count(), 3);
        assert_eq!(store.drawables().count(), 3);

        store.clear_kind(EntityKind::Particle);
        assert_eq!(store.drawables().count(), 1);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn negative_dt_does_not_age_entities() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        store.insert(particle(1.0));
        store.update(-3.0, &FeatureSnapshot::silent(Instant::now()), &mut rng);
        let first = store.iter(EntityKind::Particle).next();
        assert_eq!(first.map(|e| e.age), Some(0.0));
    }
}
