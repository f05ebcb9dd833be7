//! Animated entities and their per-variant update rules.
//!
//! Every entity shares position, age, lifetime, colour and size; the
//! [`Behavior`] enum carries the variant-specific state and selects the
//! update rule. Entities move through `Spawned -> Aging -> Expired`, where
//! aging is split into the three [`Phase`]s of the alpha envelope.

mod store;

use std::fmt;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{config::Viewport, palette::Color, FeatureSnapshot};

pub use store::{Drawables, EntityStore, UpdateStats};

/// Slack applied to age comparisons so that a lifetime of `L` expires at
/// exactly `ceil(L / dt)` ticks despite float accumulation.
pub const LIFE_EPSILON: f64 = 1e-9;

const BUBBLE_MAX_SIZE: f64 = 150.0;
const BUBBLE_MIN_SIZE: f64 = 5.0;
const BUBBLE_GROWTH: f64 = 0.3;
const BUBBLE_SHRINK: f64 = 0.1;
const BUBBLE_QUIET_BASS: f64 = 0.1;
const BUBBLE_TREBLE_LIFT: f64 = 10.0;
const FRAGMENT_EASING: f64 = 0.2;
const ARROW_TURN_CHANCE: f64 = 0.05;
const RING_MAX_THICKNESS: f64 = 12.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Tag identifying an entity variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Particle,
    ExpandingRing,
    CollapsingRing,
    Star,
    Bubble,
    Shape,
    ImageFragment,
}

impl EntityKind {
    pub const COUNT: usize = 7;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Particle,
        Self::ExpandingRing,
        Self::CollapsingRing,
        Self::Star,
        Self::Bubble,
        Self::Shape,
        Self::ImageFragment,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Particle => "particle",
            Self::ExpandingRing => "expanding_ring",
            Self::CollapsingRing => "collapsing_ring",
            Self::Star => "star",
            Self::Bubble => "bubble",
            Self::Shape => "shape",
            Self::ImageFragment => "image_fragment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outline drawn for a [`Behavior::Shape`] entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Circle,
    Star,
    Snowflake,
    Polygon,
    Diamond,
    Spiral,
    Heart,
    Burst,
    Wave,
    Pentagon,
    Hexagon,
    Cross,
    Flower,
    Arrow,
    Gear,
    Cloud,
}

impl ShapeKind {
    pub const ALL: [Self; 16] = [
        Self::Circle,
        Self::Star,
        Self::Snowflake,
        Self::Polygon,
        Self::Diamond,
        Self::Spiral,
        Self::Heart,
        Self::Burst,
        Self::Wave,
        Self::Pentagon,
        Self::Hexagon,
        Self::Cross,
        Self::Flower,
        Self::Arrow,
        Self::Gear,
        Self::Cloud,
    ];

    /// Shapes whose rotation angle is applied when drawn.
    pub fn spins(self) -> bool {
        matches!(self, Self::Circle | Self::Spiral | Self::Wave | Self::Polygon)
    }
}

/// Motion state of a free-form shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMotion {
    pub kind: ShapeKind,
    /// Pixels per second.
    pub velocity: Point,
    /// Degrees.
    pub angle: f64,
    /// Degrees per second.
    pub rotation_speed: f64,
    /// Scale factor applied to the drawn size.
    pub pulse: f64,
    pub twinkle_rate: f64,
}

/// Motion state of one tile of the fragmented image.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentMotion {
    pub row: u16,
    pub col: u16,
    /// Resting centre of the tile.
    pub home: Point,
    /// Centre of the whole image; tiles push away from it on bass.
    pub center: Point,
    pub angle: f64,
    pub expansion_factor: f64,
    pub speed_factor: f64,
    pub rotate_factor: f64,
}

/// Variant-specific state. Rings use [`Entity::size`] as their radius.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Particle { velocity: Point },
    ExpandingRing { growth: f64 },
    CollapsingRing { shrink: f64 },
    Star { velocity: Point, points: u8 },
    Bubble { speed: f64 },
    Shape(ShapeMotion),
    ImageFragment(FragmentMotion),
}

impl Behavior {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Particle { .. } => EntityKind::Particle,
            Self::ExpandingRing { .. } => EntityKind::ExpandingRing,
            Self::CollapsingRing { .. } => EntityKind::CollapsingRing,
            Self::Star { .. } => EntityKind::Star,
            Self::Bubble { .. } => EntityKind::Bubble,
            Self::Shape(_) => EntityKind::Shape,
            Self::ImageFragment(_) => EntityKind::ImageFragment,
        }
    }
}

/// Stage of the three-part alpha envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FadeIn,
    Steady,
    FadeOut,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub position: Point,
    /// Seconds since spawn.
    pub age: f64,
    /// Seconds the entity may live.
    pub lifetime: f64,
    pub color: Color,
    pub size: f64,
    pub behavior: Behavior,
}

/// Everything an update rule may read besides the entity itself.
pub struct UpdateContext<'a> {
    pub dt: f64,
    pub features: &'a FeatureSnapshot,
    pub viewport: Viewport,
    /// Converts per-frame constants into per-second rates.
    pub rate_scale: f64,
    pub rng: &'a mut dyn RngCore,
}

impl UpdateContext<'_> {
    /// Elapsed time expressed in reference frames.
    fn frames(&self) -> f64 {
        self.dt * self.rate_scale
    }
}

impl Entity {
    pub fn new(
        position: Point,
        lifetime: f64,
        color: Color,
        size: f64,
        behavior: Behavior,
    ) -> Self {
        Self {
            position,
            age: 0.0,
            lifetime,
            color,
            size,
            behavior,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.behavior.kind()
    }

    /// Liveness predicate: still young enough and inside its geometric
    /// bound.
    pub fn is_alive(&self) -> bool {
        if self.age + LIFE_EPSILON >= self.lifetime {
            return false;
        }
        match &self.behavior {
            Behavior::CollapsingRing { .. } => self.size > 0.0,
            Behavior::Bubble { .. } => self.position.y + self.size >= 0.0,
            _ => true,
        }
    }

    pub fn phase(&self) -> Phase {
        if !self.is_alive() {
            return Phase::Expired;
        }
        let third = self.lifetime / 3.0;
        if self.age < third {
            Phase::FadeIn
        } else if self.age > 2.0 * third {
            Phase::FadeOut
        } else {
            Phase::Steady
        }
    }

    /// Opacity in `[0, 1]` from the fade-in / steady / fade-out envelope.
    pub fn alpha(&self) -> f64 {
        envelope(self.age, self.lifetime)
    }

    /// Advances the entity by one tick and reports whether it is still
    /// alive.
    pub fn update(&mut self, ctx: &mut UpdateContext<'_>) -> bool {
        let dt = ctx.dt;
        self.age += dt;

        match &mut self.behavior {
            Behavior::Particle { velocity } | Behavior::Star { velocity, .. } => {
                self.position.x += velocity.x * dt;
                self.position.y += velocity.y * dt;
            }
            Behavior::ExpandingRing { growth } => {
                self.size += *growth * dt;
            }
            Behavior::CollapsingRing { shrink } => {
                self.size -= *shrink * dt;
            }
            Behavior::Bubble { speed } => {
                let frames = ctx.frames();
                let bass = ctx.features.bass.clamp(0.0, 1.0);
                let treble = ctx.features.treble.clamp(0.0, 1.0);

                self.size = (self.size + bass * BUBBLE_GROWTH * frames).min(BUBBLE_MAX_SIZE);
                if bass < BUBBLE_QUIET_BASS {
                    self.size = (self.size - BUBBLE_SHRINK * frames).max(BUBBLE_MIN_SIZE);
                }
                self.position.y -= *speed * (1.0 + treble * BUBBLE_TREBLE_LIFT) * dt;
            }
            Behavior::Shape(motion) => {
                update_shape(motion, &mut self.position, self.age, ctx);
            }
            Behavior::ImageFragment(motion) => {
                update_fragment(motion, &mut self.position, ctx);
            }
        }

        self.is_alive()
    }

    /// Read-only view handed to the renderer.
    pub fn drawable(&self) -> Drawable {
        let (primitive, size, rotation) = match &self.behavior {
            Behavior::Particle { .. } => (Primitive::Disc, self.size, 0.0),
            Behavior::ExpandingRing { .. } | Behavior::CollapsingRing { .. } => {
                let remaining = (1.0 - self.age / self.lifetime).clamp(0.0, 1.0);
                let thickness = (RING_MAX_THICKNESS * remaining).max(1.0);
                (Primitive::Ring { thickness }, self.size.max(0.0), 0.0)
            }
            Behavior::Star { points, .. } => (Primitive::Star { points: *points }, self.size, 0.0),
            Behavior::Bubble { .. } => (Primitive::Bubble, self.size, 0.0),
            Behavior::Shape(motion) => {
                let rotation = if motion.kind.spins() { motion.angle } else { 0.0 };
                (Primitive::Shape(motion.kind), self.size * motion.pulse, rotation)
            }
            Behavior::ImageFragment(motion) => (
                Primitive::Fragment {
                    row: motion.row,
                    col: motion.col,
                },
                self.size,
                motion.angle,
            ),
        };

        Drawable {
            kind: self.kind(),
            primitive,
            position: self.position,
            size,
            rotation,
            color: self.color,
            alpha: self.alpha(),
        }
    }
}

fn update_shape(
    motion: &mut ShapeMotion,
    position: &mut Point,
    age: f64,
    ctx: &mut UpdateContext<'_>,
) {
    let dt = ctx.dt;
    let frames = ctx.frames();

    position.x = (position.x + motion.velocity.x * dt).rem_euclid(ctx.viewport.width);
    position.y = (position.y + motion.velocity.y * dt).rem_euclid(ctx.viewport.height);

    match motion.kind {
        ShapeKind::Circle | ShapeKind::Polygon | ShapeKind::Spiral => {
            motion.angle = (motion.angle + motion.rotation_speed * dt).rem_euclid(360.0);
        }
        ShapeKind::Arrow => {
            let turn_chance = 1.0 - (1.0 - ARROW_TURN_CHANCE).powf(frames);
            if ctx.rng.gen_bool(turn_chance.clamp(0.0, 1.0)) {
                motion.velocity = Point::new(
                    ctx.rng.gen_range(-2.0..=2.0) * ctx.rate_scale,
                    ctx.rng.gen_range(-2.0..=2.0) * ctx.rate_scale,
                );
            }
        }
        ShapeKind::Star => {
            motion.pulse = 0.9 + 0.1 * (age * motion.twinkle_rate).sin();
        }
        ShapeKind::Snowflake => {
            motion.velocity.x += ctx.rng.gen_range(-0.1..=0.1) * frames;
        }
        ShapeKind::Diamond => {
            motion.pulse = 0.8 + 0.2 * (age * 5.0).sin();
        }
        ShapeKind::Wave => {
            motion.angle = (motion.angle + 10.0 * (age * 3.0).sin() * frames).rem_euclid(360.0);
        }
        ShapeKind::Heart => {
            motion.pulse = 0.9 + 0.1 * (age * 2.0).sin();
        }
        ShapeKind::Burst => {
            motion.pulse = 0.8 + 0.2 * (age * 5.0).cos();
        }
        ShapeKind::Pentagon
        | ShapeKind::Hexagon
        | ShapeKind::Cross
        | ShapeKind::Flower
        | ShapeKind::Gear
        | ShapeKind::Cloud => {}
    }
}

fn update_fragment(motion: &mut FragmentMotion, position: &mut Point, ctx: &UpdateContext<'_>) {
    let features = ctx.features;
    let spacing = features.bass.max(0.0) * motion.expansion_factor;
    let boost = features.treble.max(0.0) * motion.speed_factor;

    let outward = Point::new(
        motion.home.x - motion.center.x,
        motion.home.y - motion.center.y,
    );
    let magnitude = outward.length().max(1.0);
    let target = Point::new(
        motion.home.x + spacing * outward.x / magnitude,
        motion.home.y + spacing * outward.y / magnitude + boost,
    );

    let ease = 1.0 - (1.0 - FRAGMENT_EASING).powf(ctx.frames());
    position.x += (target.x - position.x) * ease;
    position.y += (target.y - position.y) * ease;
    motion.angle = features.mid * motion.rotate_factor;
}

/// Fade in over the first third of `lifetime`, hold, fade out over the
/// last third.
pub fn envelope(age: f64, lifetime: f64) -> f64 {
    if lifetime <= 0.0 {
        return 0.0;
    }
    let third = lifetime / 3.0;
    let alpha = if age < third {
        age / third
    } else if age > 2.0 * third {
        (lifetime - age) / third
    } else {
        1.0
    };
    alpha.clamp(0.0, 1.0)
}

/// Geometry tag telling the renderer what to draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Disc,
    Ring { thickness: f64 },
    Star { points: u8 },
    Bubble,
    Shape(ShapeKind),
    Fragment { row: u16, col: u16 },
}

/// Snapshot of one live entity for drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawable {
    pub kind: EntityKind,
    pub primitive: Primitive,
    pub position: Point,
    pub size: f64,
    /// Degrees.
    pub rotation: f64,
    pub color: Color,
    pub alpha: f64,
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::analysis::BandEnergies;

    fn quiet() -> FeatureSnapshot {
        FeatureSnapshot::silent(Instant::now())
    }

    fn run(entity: &mut Entity, features: &FeatureSnapshot, dt: f64, rng: &mut SmallRng) -> bool {
        let mut ctx = UpdateContext {
            dt,
            features,
            viewport: Viewport::default(),
            rate_scale: 30.0,
            rng,
        };
        entity.update(&mut ctx)
    }

    fn particle(lifetime: f64) -> Entity {
        Entity::new(
            Point::new(400.0, 240.0),
            lifetime,
            Color::WHITE,
            3.0,
            Behavior::Particle {
                velocity: Point::new(30.0, -15.0),
            },
        )
    }

    #[test]
    fn expires_exactly_at_ceil_lifetime_over_dt() {
        let mut rng = SmallRng::seed_from_u64(1);
        let features = quiet();
        for (lifetime, dt) in [(1.0, 0.1), (2.5, 1.0 / 30.0), (1.0, 0.3), (5.0 / 3.0, 1.0 / 60.0)] {
            let mut entity = particle(lifetime);
            let expected = (lifetime / dt - LIFE_EPSILON).ceil() as usize;
            let mut ticks = 0;
            while run(&mut entity, &features, dt, &mut rng) {
                ticks += 1;
                assert!(ticks < 10_000);
            }
            assert_eq!(ticks + 1, expected, "lifetime {lifetime}, dt {dt}");
        }
    }

    #[test]
    fn particle_integrates_velocity() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut entity = particle(10.0);
        run(&mut entity, &quiet(), 0.5, &mut rng);
        assert_eq!(entity.position, Point::new(415.0, 232.5));
    }

    #[test]
    fn collapsing_ring_dies_when_radius_reaches_zero() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ring = Entity::new(
            Point::new(0.0, 0.0),
            100.0,
            Color::WHITE,
            10.0,
            Behavior::CollapsingRing { shrink: 2.0 },
        );

        let mut died_at = None;
        for tick in 1..=6 {
            if !run(&mut ring, &quiet(), 1.0, &mut rng) {
                died_at = Some(tick);
                break;
            }
        }
        assert!(ring.size <= 0.0);
        assert!(matches!(died_at, Some(5) | Some(6)));
    }

    #[test]
    fn envelope_has_three_phases() {
        assert_eq!(envelope(0.0, 3.0), 0.0);
        assert!((envelope(0.5, 3.0) - 0.5).abs() < 1e-12);
        assert_eq!(envelope(1.5, 3.0), 1.0);
        assert!((envelope(2.5, 3.0) - 0.5).abs() < 1e-12);
        assert_eq!(envelope(3.0, 3.0), 0.0);

        let mut entity = particle(3.0);
        assert_eq!(entity.phase(), Phase::FadeIn);
        entity.age = 1.5;
        assert_eq!(entity.phase(), Phase::Steady);
        entity.age = 2.5;
        assert_eq!(entity.phase(), Phase::FadeOut);
        entity.age = 3.0;
        assert_eq!(entity.phase(), Phase::Expired);
    }

    #[test]
    fn bubble_rises_faster_with_treble_and_leaves_the_top() {
        let mut rng = SmallRng::seed_from_u64(1);
        let start = Point::new(100.0, 480.0);
        let rising = Behavior::Bubble { speed: 30.0 };
        let mut calm = Entity::new(start, 1_000.0, Color::WHITE, 10.0, rising);
        let mut lively = calm.clone();

        let treble = FeatureSnapshot::from_energies(
            &BandEnergies {
                treble: 1.0,
                ..BandEnergies::ZERO
            },
            Instant::now(),
        );
        run(&mut calm, &quiet(), 0.1, &mut rng);
        run(&mut lively, &treble, 0.1, &mut rng);
        assert!(lively.position.y < calm.position.y);
        assert!(calm.size < 10.0, "quiet bass shrinks bubbles");

        let mut ticks = 0;
        while run(&mut lively, &treble, 0.1, &mut rng) {
            ticks += 1;
            assert!(ticks < 1_000);
        }
        assert!(lively.position.y + lively.size < 0.0);
    }

    #[test]
    fn bubble_growth_is_capped() {
        let mut rng = SmallRng::seed_from_u64(1);
        let bass = FeatureSnapshot::from_energies(
            &BandEnergies {
                bass: 5.0,
                ..BandEnergies::ZERO
            },
            Instant::now(),
        );
        let start = Point::new(100.0, 10_000.0);
        let slow = Behavior::Bubble { speed: 1.0 };
        let mut bubble = Entity::new(start, 1_000.0, Color::WHITE, 140.0, slow);
        run(&mut bubble, &bass, 2.0, &mut rng);
        assert_eq!(bubble.size, BUBBLE_MAX_SIZE);
    }

    #[test]
    fn shapes_wrap_inside_the_viewport_and_spin() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut shape = Entity::new(
            Point::new(795.0, 5.0),
            10.0,
            Color::WHITE,
            20.0,
            Behavior::Shape(ShapeMotion {
                kind: ShapeKind::Circle,
                velocity: Point::new(100.0, -100.0),
                angle: 350.0,
                rotation_speed: 90.0,
                pulse: 1.0,
                twinkle_rate: 10.0,
            }),
        );
        run(&mut shape, &quiet(), 0.1, &mut rng);

        assert!((shape.position.x - 5.0).abs() < 1e-9);
        assert!((shape.position.y - 475.0).abs() < 1e-9);
        let Behavior::Shape(motion) = &shape.behavior else { unreachable!() };
        assert!((motion.angle - 359.0).abs() < 1e-9);
        assert_eq!(shape.drawable().rotation, motion.angle);
    }

    #[test]
    fn fragments_push_outward_on_bass() {
        let mut rng = SmallRng::seed_from_u64(1);
        let home = Point::new(500.0, 240.0);
        let mut fragment = Entity::new(
            home,
            10.0,
            Color::WHITE,
            8.0,
            Behavior::ImageFragment(FragmentMotion {
                row: 0,
                col: 3,
                home,
                center: Point::new(400.0, 240.0),
                angle: 0.0,
                expansion_factor: 10.0,
                speed_factor: 0.0,
                rotate_factor: 25.0,
            }),
        );
        let bass = FeatureSnapshot::from_energies(
            &BandEnergies {
                bass: 2.0,
                mid: 1.0,
                ..BandEnergies::ZERO
            },
            Instant::now(),
        );

        for _ in 0..200 {
            run(&mut fragment, &bass, 1.0 / 30.0, &mut rng);
        }
        assert!((fragment.position.x - 520.0).abs() < 1e-3);
        assert!((fragment.position.y - 240.0).abs() < 1e-9);
        assert_eq!(fragment.drawable().rotation, 25.0);
        assert_eq!(
            fragment.drawable().primitive,
            Primitive::Fragment { row: 0, col: 3 }
        );
    }

    #[test]
    fn drawable_carries_envelope_and_ring_thickness() {
        let growing = Behavior::ExpandingRing { growth: 3.0 };
        let mut ring = Entity::new(Point::default(), 2.0, Color(200, 100, 50), 4.0, growing);
        ring.age = 1.0;
        let drawable = ring.drawable();
        assert_eq!(drawable.kind, EntityKind::ExpandingRing);
        assert_eq!(drawable.alpha, 1.0);
        assert_eq!(drawable.primitive, Primitive::Ring { thickness: 6.25 });

        ring.age = 0.5 * 2.0 / 3.0;
        let fading_in = ring.drawable();
        assert!((fading_in.alpha - 0.5).abs() < 1e-12);
        assert_eq!(fading_in.color, Color(200, 100, 50));
    }

    #[test]
    fn every_variant_eventually_expires() {
        let mut rng = SmallRng::seed_from_u64(9);
        let loud = FeatureSnapshot::from_energies(
            &BandEnergies {
                loudness: 1.0,
                bass: 40.0,
                mid: 20.0,
                treble: 5.0,
                dominant_hz: 440.0,
            },
            Instant::now(),
        );
        let motion = ShapeMotion {
            kind: ShapeKind::Arrow,
            velocity: Point::default(),
            angle: 0.0,
            rotation_speed: 0.0,
            pulse: 1.0,
            twinkle_rate: 5.0,
        };
        let behaviors = [
            Behavior::Particle { velocity: Point::default() },
            Behavior::ExpandingRing { growth: 1.0 },
            Behavior::CollapsingRing { shrink: 0.0 },
            Behavior::Star { velocity: Point::default(), points: 5 },
            Behavior::Bubble { speed: 0.0 },
            Behavior::Shape(motion),
            Behavior::ImageFragment(FragmentMotion {
                row: 0,
                col: 0,
                home: Point::default(),
                center: Point::default(),
                angle: 0.0,
                expansion_factor: 1.0,
                speed_factor: 1.0,
                rotate_factor: 1.0,
            }),
        ];

        for behavior in behaviors {
            let kind = behavior.kind();
            let mut entity = Entity::new(Point::new(10.0, 10.0), 3.0, Color::WHITE, 5.0, behavior);
            let mut ticks = 0;
            while run(&mut entity, &loud, 1.0 / 30.0, &mut rng) {
                ticks += 1;
                assert!(ticks <= 90, "{kind} outlived its lifetime");
            }
        }
    }
}
