//! Decides how many entities each variant gets per tick and builds them.

use rand::{seq::SliceRandom, Rng, RngCore};
use tracing::trace;

use crate::{
    config::{FragmentConfig, SpawnConfig, SpawnRule, Viewport},
    entity::{
        Behavior, Entity, EntityKind, EntityStore, FragmentMotion, Point, ShapeKind, ShapeMotion,
    },
    mapping::ColorMapper,
    palette::PaletteState,
    FeatureSnapshot,
};

/// Pixels of collapsing-ring start radius per unit of `1 + bass`.
pub const COLLAPSING_RADIUS_SCALE: f64 = 20.0;

const RING_RADIUS_PER_BASS: f64 = 0.25;
const RING_RATE_PER_BASS: f64 = 0.25;
const SHAPE_SIZE_PER_LOUDNESS: f64 = 100.0;
const SHAPE_DRIFT_DIVISOR: f64 = 10.0;

/// Number of entities to spawn for a driving value of `value` when
/// `population` already exist.
///
/// Monotone non-decreasing in `value`; never pushes the population past
/// `rule.ceiling`. A saturating rule treats `value` as an intensity in
/// `[0, 1]`.
pub fn spawn_count(rule: &SpawnRule, value: f64, population: usize) -> usize {
    if population >= rule.ceiling {
        return 0;
    }
    let value = if rule.saturate {
        value.max(0.0).min(1.0)
    } else {
        value.max(0.0)
    };
    let wanted = (rule.gain * value).floor() as usize;
    wanted.max(rule.minimum as usize).min(rule.ceiling - population)
}

/// Builds new entities from the latest features and the active palette.
#[derive(Debug, Clone)]
pub struct EntitySpawner {
    config: SpawnConfig,
    viewport: Viewport,
    mapper: ColorMapper,
}

impl EntitySpawner {
    pub fn new(config: SpawnConfig, viewport: Viewport) -> Self {
        Self {
            config,
            viewport,
            mapper: ColorMapper::new(),
        }
    }

    /// Feeds the colour normaliser. Call once per tick before spawning.
    pub fn observe(&mut self, features: &FeatureSnapshot) {
        self.mapper.observe(features);
    }

    /// Rule for an energy-driven variant. Image fragments are laid out as a
    /// grid instead and have none.
    pub fn rule(&self, kind: EntityKind) -> Option<&SpawnRule> {
        let spawn = &self.config;
        match kind {
            EntityKind::Particle => Some(&spawn.particle),
            EntityKind::ExpandingRing => Some(&spawn.expanding_ring),
            EntityKind::CollapsingRing => Some(&spawn.collapsing_ring),
            EntityKind::Star => Some(&spawn.star),
            EntityKind::Bubble => Some(&spawn.bubble),
            EntityKind::Shape => Some(&spawn.shape),
            EntityKind::ImageFragment => None,
        }
    }

    /// How many `kind` entities the next [`spawn`](Self::spawn) would add.
    pub fn planned(
        &self,
        kind: EntityKind,
        features: &FeatureSnapshot,
        population: usize,
    ) -> usize {
        match self.rule(kind) {
            Some(rule) => spawn_count(rule, features.band(rule.band), population),
            None if population == 0 => self.config.fragments.tile_count(),
            None => 0,
        }
    }

    /// Spawns this tick's `kind` entities into `store` and returns how many
    /// were added.
    pub fn spawn(
        &self,
        kind: EntityKind,
        features: &FeatureSnapshot,
        palette: &PaletteState,
        store: &mut EntityStore,
        rng: &mut dyn RngCore,
    ) -> usize {
        let count = self.planned(kind, features, store.population(kind));
        if count == 0 {
            return 0;
        }

        match self.rule(kind) {
            Some(rule) => {
                let entities: Vec<_> = (0..count)
                    .filter_map(|_| self.build(kind, rule, features, palette, rng))
                    .collect();
                store.extend(entities);
            }
            None => self.spawn_fragments(features, palette, store, rng),
        }
        trace!(%kind, count, population = store.population(kind), "spawned");
        count
    }

    fn build(
        &self,
        kind: EntityKind,
        rule: &SpawnRule,
        features: &FeatureSnapshot,
        palette: &PaletteState,
        rng: &mut dyn RngCore,
    ) -> Option<Entity> {
        let color = self.mapper.color_for(rule.color, &palette.current, features, rng);
        let lifetime = rule.lifetime + rng.gen::<f64>() * rule.lifetime_jitter;
        let rate = self.config.rate_scale;
        let (cx, cy) = self.viewport.center();
        let center = Point::new(cx, cy);

        let (position, size, behavior) = match kind {
            EntityKind::Particle | EntityKind::Star => {
                let speed = (1.0 + 2.0 * features.mid + 0.5 * features.treble) * rate;
                let velocity = Point::new(
                    rng.gen_range(-1.0..=1.0) * speed,
                    rng.gen_range(-1.0..=1.0) * speed,
                );
                if kind == EntityKind::Particle {
                    let size = f64::from(rng.gen_range(2u8..=5));
                    (center, size, Behavior::Particle { velocity })
                } else {
                    let size = f64::from(rng.gen_range(2u8..=10));
                    let points = rng.gen_range(5..=10);
                    (center, size, Behavior::Star { velocity, points })
                }
            }
            EntityKind::ExpandingRing => {
                let bass = features.bass.max(0.0);
                let growth = (1.0 + RING_RATE_PER_BASS * bass) * rate;
                (center, RING_RADIUS_PER_BASS * bass, Behavior::ExpandingRing { growth })
            }
            EntityKind::CollapsingRing => {
                let bass = features.bass.max(0.0);
                let shrink = (1.0 + RING_RATE_PER_BASS * bass) * rate;
                let radius = COLLAPSING_RADIUS_SCALE * (1.0 + bass);
                (center, radius, Behavior::CollapsingRing { shrink })
            }
            EntityKind::Bubble => {
                let x = rng.gen_range(0.0..=self.viewport.width);
                let position = Point::new(x, self.viewport.height);
                let speed = rng.gen_range(0.5..=1.5) * rate;
                (position, f64::from(rng.gen_range(5u8..=15)), Behavior::Bubble { speed })
            }
            EntityKind::Shape => {
                let position = Point::new(
                    rng.gen_range(0.0..self.viewport.width),
                    rng.gen_range(0.0..self.viewport.height),
                );
                let size = (features.loudness * SHAPE_SIZE_PER_LOUDNESS).max(1.0);
                (position, size, Behavior::Shape(self.shape_motion(features, rng)))
            }
            EntityKind::ImageFragment => return None,
        };

        Some(Entity::new(position, lifetime, color, size, behavior))
    }

    fn shape_motion(&self, features: &FeatureSnapshot, rng: &mut dyn RngCore) -> ShapeMotion {
        let kind = ShapeKind::ALL.choose(rng).copied().unwrap_or(ShapeKind::Circle);
        ShapeMotion {
            kind,
            velocity: shape_drift(features, self.config.rate_scale),
            angle: rng.gen_range(0.0..360.0),
            rotation_speed: rng.gen_range(30.0..=100.0),
            pulse: rng.gen_range(0.5..=1.5),
            twinkle_rate: rng.gen_range(5.0..=15.0),
        }
    }

    fn spawn_fragments(
        &self,
        features: &FeatureSnapshot,
        palette: &PaletteState,
        store: &mut EntityStore,
        rng: &mut dyn RngCore,
    ) {
        let fragments = &self.config.fragments;
        let layout = FragmentLayout::new(fragments, self.viewport);
        for row in 0..fragments.rows {
            for col in 0..fragments.cols {
                let home = layout.home(row, col);
                let color = self.mapper.color_for(fragments.color, &palette.current, features, rng);
                let motion = FragmentMotion {
                    row: row as u16,
                    col: col as u16,
                    home,
                    center: layout.center,
                    angle: 0.0,
                    expansion_factor: fragments.expansion_factor,
                    speed_factor: fragments.speed_factor,
                    rotate_factor: fragments.rotate_factor,
                };
                let behavior = Behavior::ImageFragment(motion);
                store.insert(Entity::new(home, fragments.lifetime, color, layout.tile, behavior));
            }
        }
    }
}

/// Drift from the band balance: a band louder than the other two combined
/// pushes the shape. Pixels per second.
fn shape_drift(features: &FeatureSnapshot, rate_scale: f64) -> Point {
    let bass = features.bass.max(0.0);
    let mid = features.mid.max(0.0);
    let treble = features.treble.max(0.0);
    let mut drift = Point::default();

    if treble > bass + mid {
        drift.y = -treble / SHAPE_DRIFT_DIVISOR;
    }
    if bass > mid + treble {
        drift.y = bass / SHAPE_DRIFT_DIVISOR;
    }
    if mid > bass + treble {
        let share = mid / (bass + mid + treble);
        drift.x = (if share < 0.5 { -mid } else { mid }) / SHAPE_DRIFT_DIVISOR;
    }

    Point::new(drift.x * rate_scale, drift.y * rate_scale)
}

/// Tile grid over the image rectangle, centred in the viewport.
#[derive(Debug, Clone, Copy)]
struct FragmentLayout {
    origin: Point,
    center: Point,
    tile_width: f64,
    tile_height: f64,
    tile: f64,
}

impl FragmentLayout {
    fn new(config: &FragmentConfig, viewport: Viewport) -> Self {
        let border_x = viewport.width * config.border;
        let border_y = viewport.height * config.border;
        let width = viewport.width - 2.0 * border_x;
        let height = viewport.height - 2.0 * border_y;
        let tile_width = width / config.cols as f64;
        let tile_height = height / config.rows as f64;
        let (cx, cy) = viewport.center();

        Self {
            origin: Point::new(border_x, border_y),
            center: Point::new(cx, cy),
            tile_width,
            tile_height,
            tile: tile_width.min(tile_height),
        }
    }

    fn home(&self, row: usize, col: usize) -> Point {
        Point::new(
            self.origin.x + (col as f64 + 0.5) * self.tile_width,
            self.origin.y + (row as f64 + 0.5) * self.tile_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::{
        analysis::{Band, BandEnergies},
        mapping::ColorSource,
        palette::{builtin_palettes, PaletteRotator},
    };

    fn rule(gain: f64, minimum: u32, ceiling: usize) -> SpawnRule {
        SpawnRule {
            band: Band::Bass,
            gain,
            saturate: false,
            minimum,
            ceiling,
            lifetime: 1.0,
            lifetime_jitter: 0.0,
            color: ColorSource::PaletteRandom,
        }
    }

    fn features(bass: f64, mid: f64, treble: f64) -> FeatureSnapshot {
        FeatureSnapshot::from_energies(
            &BandEnergies {
                loudness: 0.5,
                bass,
                mid,
                treble,
                dominant_hz: 440.0,
            },
            Instant::now(),
        )
    }

    fn palette(rng: &mut SmallRng) -> PaletteState {
        let interval = Duration::from_secs(30);
        PaletteRotator::new(builtin_palettes(), interval, Instant::now(), rng)
            .unwrap()
            .state()
            .clone()
    }

    #[test]
    fn spawn_count_is_monotone_and_respects_the_ceiling() {
        let rule = rule(1.0 / 3.0, 1, 300);
        let mut previous = 0;
        for step in 0..400 {
            let value = step as f64 * 0.75;
            let count = spawn_count(&rule, value, 10);
            assert!(count >= previous);
            assert!(count <= 290);
            previous = count;
        }
        assert_eq!(spawn_count(&rule, 0.0, 10), 1);
        assert_eq!(spawn_count(&rule, -5.0, 10), 1);
        assert_eq!(spawn_count(&rule, 31.0, 10), 10);
        assert_eq!(spawn_count(&rule, 1_000.0, 298), 2);
        assert_eq!(spawn_count(&rule, 1_000.0, 300), 0);
        assert_eq!(spawn_count(&rule, 1_000.0, 400), 0);
        assert_eq!(spawn_count(&rule, f64::NAN, 0), 1);
    }

    #[test]
    fn saturating_rule_caps_the_driving_value() {
        let bubbles = SpawnConfig::default().bubble;
        assert_eq!(spawn_count(&bubbles, 0.5, 0), 1);
        assert_eq!(spawn_count(&bubbles, 1.0, 0), 3);
        assert_eq!(spawn_count(&bubbles, 40.0, 0), 3);
        assert_eq!(spawn_count(&bubbles, f64::NAN, 0), 0);
    }

    #[test]
    fn spawning_stops_silently_at_the_ceiling() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut config = SpawnConfig::default();
        config.particle.ceiling = 25;
        let spawner = EntitySpawner::new(config, Viewport::default());
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        let palette = palette(&mut rng);
        let loud = features(40.0, 1.0, 1.0);

        let first = spawner.spawn(EntityKind::Particle, &loud, &palette, &mut store, &mut rng);
        let second = spawner.spawn(EntityKind::Particle, &loud, &palette, &mut store, &mut rng);
        assert_eq!(first, 25);
        assert_eq!(second, 0);
        assert_eq!(store.population(EntityKind::Particle), 25);
    }

    #[test]
    fn particles_start_at_the_centre_with_palette_colours() {
        let mut rng = SmallRng::seed_from_u64(2);
        let mut config = SpawnConfig::default();
        config.star.color = ColorSource::PaletteRandom;
        let spawner = EntitySpawner::new(config, Viewport::default());
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        let palette = palette(&mut rng);

        let bass = features(10.0, 0.0, 0.0);
        let added = spawner.spawn(EntityKind::Star, &bass, &palette, &mut store, &mut rng);
        assert_eq!(added, 5);
        for star in store.iter(EntityKind::Star) {
            assert_eq!(star.position, Point::new(400.0, 240.0));
            assert!(palette.current.contains(&star.color));
            assert!((2.0..=10.0).contains(&star.size));
            let Behavior::Star { points, velocity } = &star.behavior else {
                panic!("expected a star");
            };
            assert!((5..=10).contains(points));
            assert!(velocity.x.abs() <= 30.0 && velocity.y.abs() <= 30.0);
        }
    }

    #[test]
    fn collapsing_rings_start_with_a_positive_radius() {
        let mut rng = SmallRng::seed_from_u64(4);
        let spawner = EntitySpawner::new(SpawnConfig::default(), Viewport::default());
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        let palette = palette(&mut rng);

        let quiet = features(0.0, 0.0, 0.0);
        let kind = EntityKind::CollapsingRing;
        let added = spawner.spawn(kind, &quiet, &palette, &mut store, &mut rng);
        assert_eq!(added, 1);
        let ring = store.iter(EntityKind::CollapsingRing).next().unwrap();
        assert_eq!(ring.size, COLLAPSING_RADIUS_SCALE);
        assert_eq!(ring.behavior, Behavior::CollapsingRing { shrink: 30.0 });
    }

    #[test]
    fn image_fragments_fill_the_grid_only_when_empty() {
        let mut rng = SmallRng::seed_from_u64(8);
        let mut config = SpawnConfig::default();
        config.fragments.rows = 4;
        config.fragments.cols = 5;
        let spawner = EntitySpawner::new(config, Viewport::new(1000.0, 500.0));
        let mut store = EntityStore::new(Viewport::new(1000.0, 500.0), 30.0);
        let palette = palette(&mut rng);
        let quiet = features(0.0, 0.0, 0.0);

        let kind = EntityKind::ImageFragment;
        let filled = spawner.spawn(kind, &quiet, &palette, &mut store, &mut rng);
        let refilled = spawner.spawn(kind, &quiet, &palette, &mut store, &mut rng);
        assert_eq!(filled, 20);
        assert_eq!(refilled, 0);

        let first = store.iter(EntityKind::ImageFragment).next().unwrap();
        // 10 % border, 800 x 400 image split into 160 x 100 tiles
        assert_eq!(first.position, Point::new(180.0, 100.0));
        assert_eq!(first.size, 100.0);
        let Behavior::ImageFragment(motion) = &first.behavior else {
            panic!("expected a fragment");
        };
        assert_eq!(motion.center, Point::new(500.0, 250.0));
    }

    #[test]
    fn shape_drift_follows_the_dominant_band() {
        let treble = features(0.0, 0.0, 20.0);
        let bass = features(20.0, 0.0, 0.0);
        let mid = features(0.0, 20.0, 0.0);
        let even = features(5.0, 5.0, 5.0);
        assert_eq!(shape_drift(&treble, 1.0), Point::new(0.0, -2.0));
        assert_eq!(shape_drift(&bass, 1.0), Point::new(0.0, 2.0));
        assert_eq!(shape_drift(&mid, 30.0), Point::new(60.0, 0.0));
        assert_eq!(shape_drift(&even, 30.0), Point::default());
    }

    #[test]
    fn shapes_take_the_dominant_tone_colour() {
        let mut rng = SmallRng::seed_from_u64(6);
        let spawner = EntitySpawner::new(SpawnConfig::default(), Viewport::default());
        let mut store = EntityStore::new(Viewport::default(), 30.0);
        let palette = palette(&mut rng);

        let bassy = features(30.0, 10.0, 10.0);
        let added = spawner.spawn(EntityKind::Shape, &bassy, &palette, &mut store, &mut rng);
        assert_eq!(added, 5);
        for shape in store.iter(EntityKind::Shape) {
            assert_eq!(shape.color, crate::palette::Color(255, 99, 0));
            assert!((1.0..3.0).contains(&shape.lifetime));
            assert_eq!(shape.size, 50.0);
        }
    }
}
