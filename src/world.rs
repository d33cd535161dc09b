use crate::disc::Disc;
use crate::disc_type::{DiscType, DiscTypeRegistry};
use crate::error::ConfigError;
use crate::grid::SpatialGrid;
use crate::reaction::{select_reaction, Reaction, ReactionKey, ReactionKind, ReactionTable};
use cell_common::{
    clamp, BoundaryRule, DeltaMessage, DiscState, DiscTypeId, FrameMessage, SceneMessage, SimParams,
    SimulationConfig, UnimolecularRates, Vec2,
};
use log::{debug, info, trace, warn};
use rand::prelude::*;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Source of the uniform draws used to pick reactions.
pub trait DrawSource: Send {
    /// A value in [0, 1).
    fn next_draw(&mut self) -> f64;
}

/// Default draw source backed by a seeded RNG.
pub struct RngDraws {
    rng: StdRng,
}

impl RngDraws {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl DrawSource for RngDraws {
    fn next_draw(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

/// Always returns the same value. `FixedDraw(0.0)` fires the first candidate reaction.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub f64);

impl DrawSource for FixedDraw {
    fn next_draw(&mut self) -> f64 {
        self.0
    }
}

/// The disc population and everything needed to advance it.
///
/// Registry and reaction table are shared read-only. Ids stored in discs are
/// only valid for this registry, so rebuilding either means building a new world.
pub struct World {
    params: SimParams,
    registry: Arc<DiscTypeRegistry>,
    reactions: Arc<ReactionTable>,
    distribution: Vec<(DiscTypeId, u32)>,

    discs: Vec<Disc>,
    // Reaction products of the running update, appended during compaction
    spawned: Vec<Disc>,
    // Overlapping pairs (i < j) of the running update
    collisions: Vec<(usize, usize)>,
    // Indexed by type id
    collision_counts: Vec<u64>,

    grid: SpatialGrid,
    rng: StdRng,
    draws: Box<dyn DrawSource>,

    step_count: u64,
    simulation_time: f64,
}

impl World {
    /// Creates an empty world. Call [`reinitialize`](Self::reinitialize) to populate it.
    pub fn new(
        params: SimParams,
        reactions: Arc<ReactionTable>,
        distribution: Vec<(DiscTypeId, u32)>,
    ) -> Result<Self, ConfigError> {
        check_bounds(params.world_width, params.world_height)?;
        let registry = Arc::clone(reactions.registry());
        if let Some((id, _)) = distribution.iter().find(|(id, _)| !registry.contains(*id)) {
            return Err(ConfigError::UnknownDiscTypeId(id.0));
        }

        let grid = build_grid(&params, &registry);
        let collision_counts = vec![0; registry.len()];
        let rng = StdRng::seed_from_u64(params.seed);
        let draws: Box<dyn DrawSource> = Box::new(RngDraws::new(params.seed.wrapping_add(1)));

        Ok(Self {
            params,
            registry,
            reactions,
            distribution,
            discs: Vec::new(),
            spawned: Vec::new(),
            collisions: Vec::new(),
            collision_counts,
            grid,
            rng,
            draws,
            step_count: 0,
            simulation_time: 0.0,
        })
    }

    /// Builds registry, reaction table and world from a loaded configuration.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        let registry = Arc::new(DiscTypeRegistry::from_config(&config.disc_types)?);
        let reactions = Arc::new(ReactionTable::from_config(Arc::clone(&registry), &config.reactions)?);

        let distribution = config
            .initial_conditions
            .distribution
            .iter()
            .map(|(name, &count)| registry.id_for(name).map(|id| (id, count)))
            .collect::<Result<Vec<_>, _>>()?;

        for reaction in reactions.reactions() {
            debug!("Reaction {:?}: {} (p = {})", reaction.kind(), reaction.describe(&registry), reaction.probability());
        }

        Self::new(config.get_sim_params(), reactions, distribution)
    }

    pub fn params(&self) -> &SimParams { &self.params }
    pub fn registry(&self) -> &Arc<DiscTypeRegistry> { &self.registry }
    pub fn reactions(&self) -> &Arc<ReactionTable> { &self.reactions }
    pub fn discs(&self) -> &[Disc] { &self.discs }
    pub fn step_count(&self) -> u64 { self.step_count }
    pub fn simulation_time(&self) -> f64 { self.simulation_time }

    pub fn bounds(&self) -> Vec2 {
        Vec2::new(self.params.world_width, self.params.world_height)
    }

    pub fn set_draw_source(&mut self, draws: Box<dyn DrawSource>) {
        self.draws = draws;
    }

    /// Changes the bounds. Discs left outside are brought back by the next update.
    pub fn set_bounds(&mut self, width: f64, height: f64) -> Result<(), ConfigError> {
        check_bounds(width, height)?;
        self.params.world_width = width;
        self.params.world_height = height;
        self.grid = build_grid(&self.params, &self.registry);
        debug!("World bounds set to {} x {}.", width, height);
        Ok(())
    }

    /// Discards all discs and repopulates the world from the initial distribution.
    ///
    /// Start positions lie on a grid with spacing `max_radius + 1`, shuffled;
    /// discs that do not fit are dropped.
    pub fn reinitialize(&mut self) {
        self.discs.clear();
        self.spawned.clear();
        self.collisions.clear();
        self.collision_counts.iter_mut().for_each(|c| *c = 0);
        self.step_count = 0;
        self.simulation_time = 0.0;
        self.rng = StdRng::seed_from_u64(self.params.seed);

        let mut positions = self.start_positions();
        positions.shuffle(&mut self.rng);

        let requested: usize = self.distribution.iter().map(|&(_, count)| count as usize).sum();
        if requested > positions.len() {
            warn!(
                "Only {} of {} discs fit into {} x {}; the rest are dropped.",
                positions.len(),
                requested,
                self.params.world_width,
                self.params.world_height
            );
        }

        let max_speed = self.params.max_initial_speed;
        let registry = Arc::clone(&self.registry);
        let types = self
            .distribution
            .iter()
            .flat_map(|&(id, count)| std::iter::repeat(id).take(count as usize));

        for (type_id, position) in types.zip(positions) {
            let velocity = Vec2::new(
                self.rng.random_range(-max_speed..=max_speed),
                self.rng.random_range(-max_speed..=max_speed),
            );
            self.discs.push(Disc::new(registry.by_id(type_id), position, velocity));
        }

        info!("World initialized with {} discs.", self.discs.len());
    }

    fn start_positions(&self) -> Vec<Vec2> {
        let spacing = self.registry.max_radius() + 1.0;
        let (width, height) = (self.params.world_width, self.params.world_height);

        let mut positions = Vec::new();
        let mut x = spacing;
        while x + spacing <= width {
            let mut y = spacing;
            while y + spacing <= height {
                positions.push(Vec2::new(x, y));
                y += 2.0 * spacing;
            }
            x += 2.0 * spacing;
        }
        positions
    }

    /// Adds a disc directly, outside of any update. Returns its index.
    ///
    /// # Panics
    /// If `type_id` is not registered.
    pub fn add_disc(&mut self, type_id: DiscTypeId, position: Vec2, velocity: Vec2) -> usize {
        self.discs.push(Disc::new(self.registry.by_id(type_id), position, velocity));
        self.discs.len() - 1
    }

    /// Advances the world by `dt` seconds and returns what changed.
    pub fn update(&mut self, dt: f64) -> DeltaMessage {
        debug_assert!(dt > 0.0, "update needs a positive dt, got {}", dt);
        let start = Instant::now();

        self.integrate(dt);
        self.handle_boundaries();
        self.detect_collisions();
        self.resolve_collisions();
        self.apply_bimolecular_reactions();
        self.apply_unimolecular_reactions(dt);

        self.step_count += 1;
        self.simulation_time += dt;
        let delta = self.compact();

        trace!(
            "Step {} | {} discs | {} collisions | {:.3} ms",
            self.step_count,
            self.discs.len(),
            self.collisions.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        delta
    }

    fn integrate(&mut self, dt: f64) {
        let damping = (1.0 - self.params.friction * dt).max(0.0);

        self.discs.par_iter_mut().for_each(|disc| {
            disc.set_reacted(false);
            if damping < 1.0 {
                disc.scale_velocity(damping);
            }
            let velocity = disc.velocity();
            disc.move_by(velocity.scale(dt));
        });
    }

    fn handle_boundaries(&mut self) {
        let (width, height) = (self.params.world_width, self.params.world_height);
        let remove_outside = self.params.boundary == BoundaryRule::Remove;

        for disc in &mut self.discs {
            let position = disc.position();
            if remove_outside && (position.x < 0.0 || position.x > width || position.y < 0.0 || position.y > height) {
                disc.mark_destroyed();
                continue;
            }

            let radius = self.registry.by_id(disc.type_id()).radius();
            let velocity = disc.velocity();
            let (x, flip_x) = reflect_axis(position.x, velocity.x, radius, width);
            let (y, flip_y) = reflect_axis(position.y, velocity.y, radius, height);
            if flip_x {
                disc.negate_x_velocity();
            }
            if flip_y {
                disc.negate_y_velocity();
            }
            if x != position.x || y != position.y {
                disc.set_position(Vec2::new(x, y));
            }
        }
    }

    fn detect_collisions(&mut self) {
        self.collisions.clear();
        let positions: Vec<Vec2> = self.discs.iter().map(|d| d.position()).collect();
        self.grid.rebuild(&positions);

        let discs = &self.discs;
        let registry = &self.registry;
        let collisions = &mut self.collisions;

        for (i, disc) in discs.iter().enumerate() {
            if disc.is_destroyed() {
                continue;
            }
            let radius_i = registry.by_id(disc.type_id()).radius();

            self.grid.for_each_candidate(positions[i], |j| {
                if j > i && !discs[j].is_destroyed() {
                    let reach = radius_i + registry.by_id(discs[j].type_id()).radius();
                    if positions[i].distance_squared(positions[j]) < reach * reach {
                        collisions.push((i, j));
                    }
                }
                true
            });
        }
    }

    fn resolve_collisions(&mut self) {
        for &(i, j) in &self.collisions {
            let (a, b) = pair_mut(&mut self.discs, i, j);
            let reach = self.registry.by_id(a.type_id()).radius() + self.registry.by_id(b.type_id()).radius();
            resolve_elastic_collision(a, b, reach);

            self.collision_counts[a.type_id().index()] += 1;
            self.collision_counts[b.type_id().index()] += 1;
        }
    }

    fn apply_bimolecular_reactions(&mut self) {
        let reactions = Arc::clone(&self.reactions);
        if reactions.is_empty() {
            return;
        }

        for index in 0..self.collisions.len() {
            let (i, j) = self.collisions[index];
            let (a, b) = (&self.discs[i], &self.discs[j]);
            if a.is_destroyed() || b.is_destroyed() || a.has_reacted() || b.has_reacted() {
                continue;
            }

            let candidates = reactions.candidates_for(ReactionKey::pair(a.type_id(), b.type_id()));
            if candidates.is_empty() {
                continue;
            }
            let draw = self.draws.next_draw();
            if let Some(reaction) = select_reaction(candidates, draw, Reaction::probability) {
                match reaction.kind() {
                    ReactionKind::Combination => self.combine(i, j, reaction),
                    ReactionKind::Exchange => self.exchange(i, j, reaction),
                    kind => unreachable!("{:?} reaction keyed by a pair", kind),
                }
            }
        }
    }

    fn apply_unimolecular_reactions(&mut self, dt: f64) {
        let reactions = Arc::clone(&self.reactions);
        if reactions.is_empty() {
            return;
        }
        let per_second = self.params.unimolecular_rates == UnimolecularRates::PerSecond;

        // Products spawned here go to `spawned` and are not visited.
        for i in 0..self.discs.len() {
            let disc = &self.discs[i];
            if disc.is_destroyed() || disc.has_reacted() {
                continue;
            }

            let candidates = reactions.candidates_for(ReactionKey::Single(disc.type_id()));
            if candidates.is_empty() {
                continue;
            }
            let draw = self.draws.next_draw();
            if let Some(reaction) = select_reaction(candidates, draw, |r| r.step_probability(dt, per_second)) {
                match reaction.kind() {
                    ReactionKind::Transformation => self.transform(i, reaction),
                    ReactionKind::Decomposition => self.decompose(i, reaction),
                    kind => unreachable!("{:?} reaction keyed by a single type", kind),
                }
            }
        }
    }

    /// A -> B: the type changes in place, momentum is kept.
    fn transform(&mut self, i: usize, reaction: &Reaction) {
        let product = self.registry.by_id(reaction.product1());
        let disc = &mut self.discs[i];
        let mass_ratio = disc.mass() / product.mass();
        disc.set_type(product);
        disc.scale_velocity(mass_ratio);
        disc.set_reacted(true);
    }

    /// A -> B + C: the parent is replaced by two touching products around its
    /// position, moving apart perpendicular to the parent's velocity.
    fn decompose(&mut self, i: usize, reaction: &Reaction) {
        let registry = Arc::clone(&self.registry);
        let first = registry.by_id(reaction.product1());
        let second = registry.by_id(reaction.product2().unwrap_or(reaction.product1()));

        let parent = &mut self.discs[i];
        parent.mark_destroyed();
        parent.set_reacted(true);

        let (m1, m2) = (first.mass(), second.mass());
        let total_mass = m1 + m2;
        let centre_velocity = parent.momentum().scale(1.0 / total_mass);
        let tangent = parent.velocity().normalize().perp();

        let separation = first.radius() + second.radius();
        let position1 = parent.position().add(tangent.scale(separation * m2 / total_mass));
        let position2 = parent.position().sub(tangent.scale(separation * m1 / total_mass));

        let speed = centre_velocity.length();
        let velocity1 = centre_velocity.add(tangent.scale(speed * m2 / total_mass));
        let velocity2 = centre_velocity.sub(tangent.scale(speed * m1 / total_mass));

        for (disc_type, position, velocity) in [(first, position1, velocity1), (second, position2, velocity2)] {
            let position = self.clamp_inside(position, disc_type.radius());
            let mut product = Disc::new(disc_type, position, velocity);
            product.set_reacted(true);
            self.spawned.push(product);
        }
    }

    /// A + B -> C: the reactant closer in size to C becomes C at the pair's
    /// centre of mass with the pair's momentum; the other one is destroyed.
    fn combine(&mut self, i: usize, j: usize, reaction: &Reaction) {
        let registry = Arc::clone(&self.registry);
        let product = registry.by_id(reaction.product1());
        let (a, b) = pair_mut(&mut self.discs, i, j);

        let radius_a = registry.by_id(a.type_id()).radius();
        let radius_b = registry.by_id(b.type_id()).radius();
        let (kept, consumed) = if (radius_a - product.radius()).abs() <= (radius_b - product.radius()).abs() {
            (a, b)
        } else {
            (b, a)
        };

        let momentum = kept.momentum().add(consumed.momentum());
        let pair_mass = kept.mass() + consumed.mass();
        let centre = kept
            .position()
            .scale(kept.mass())
            .add(consumed.position().scale(consumed.mass()))
            .scale(1.0 / pair_mass);

        kept.set_type(product);
        kept.set_position(centre);
        kept.set_velocity(momentum.scale(1.0 / product.mass()));
        kept.set_reacted(true);

        consumed.mark_destroyed();
        consumed.set_reacted(true);
    }

    /// A + B -> C + D: both discs change type in place and keep their momentum.
    fn exchange(&mut self, i: usize, j: usize, reaction: &Reaction) {
        let registry = Arc::clone(&self.registry);
        let (a, b) = pair_mut(&mut self.discs, i, j);
        let (product_a, product_b) = reaction.exchange_products_for(a.type_id());

        for (disc, product) in [(a, registry.by_id(product_a)), (b, registry.by_id(product_b))] {
            retype_keeping_momentum(disc, product);
            disc.set_reacted(true);
        }
    }

    fn clamp_inside(&self, position: Vec2, radius: f64) -> Vec2 {
        Vec2::new(
            clamp_axis(position.x, radius, self.params.world_width),
            clamp_axis(position.y, radius, self.params.world_height),
        )
    }

    // Appends spawned discs, removes destroyed ones and collects type changes.
    fn compact(&mut self) -> DeltaMessage {
        let new_discs: Vec<DiscState> = self.spawned.iter().map(Disc::state).collect();
        self.discs.append(&mut self.spawned);

        let destroyed_indices: Vec<usize> = self
            .discs
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, disc)| disc.is_destroyed())
            .map(|(index, _)| index)
            .collect();
        if !destroyed_indices.is_empty() {
            self.discs.retain(|disc| !disc.is_destroyed());
        }

        let mut changed_discs = Vec::new();
        for (index, disc) in self.discs.iter_mut().enumerate() {
            if disc.is_changed() {
                changed_discs.push((index, disc.type_id()));
                disc.clear_changed();
            }
        }

        DeltaMessage {
            step: self.step_count,
            new_discs,
            destroyed_indices,
            changed_discs,
        }
    }

    /// Collisions per disc type since the previous call; resets the counters.
    pub fn get_and_reset_collision_counts(&mut self) -> BTreeMap<DiscTypeId, u64> {
        self.collision_counts
            .iter_mut()
            .enumerate()
            .map(|(index, count)| (DiscTypeId(index as u32), std::mem::take(count)))
            .collect()
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.discs.iter().map(|d| d.kinetic_energy()).sum()
    }

    pub fn momentum(&self) -> Vec2 {
        self.discs.iter().fold(Vec2::zero(), |total, d| total.add(d.momentum()))
    }

    pub fn frame(&self) -> FrameMessage {
        FrameMessage {
            step: self.step_count,
            simulation_time: self.simulation_time,
            positions: self.discs.iter().map(|d| d.position()).enumerate().collect(),
        }
    }

    pub fn scene(&self) -> SceneMessage {
        SceneMessage {
            step: self.step_count,
            bounds: self.bounds(),
            discs: self.discs.iter().map(Disc::state).collect(),
        }
    }
}

/// Elastic response of two overlapping discs along the line of centres.
///
/// The overlap is removed by moving both discs apart in inverse proportion to
/// their mass; velocities only change while the discs approach each other.
/// Returns `false` for coincident centres, where no normal exists.
pub fn resolve_elastic_collision(a: &mut Disc, b: &mut Disc, reach: f64) -> bool {
    let offset = b.position().sub(a.position());
    let distance = offset.length();
    if distance <= 0.0 {
        return false;
    }
    let normal = offset.scale(1.0 / distance);
    let (inv_a, inv_b) = (1.0 / a.mass(), 1.0 / b.mass());
    let inv_sum = inv_a + inv_b;

    let overlap = reach - distance;
    if overlap > 0.0 {
        a.move_by(normal.scale(-overlap * inv_a / inv_sum));
        b.move_by(normal.scale(overlap * inv_b / inv_sum));
    }

    let approach_speed = a.velocity().sub(b.velocity()).dot(normal);
    if approach_speed > 0.0 {
        let impulse = 2.0 * approach_speed / inv_sum;
        a.accelerate(normal.scale(-impulse * inv_a));
        b.accelerate(normal.scale(impulse * inv_b));
    }
    true
}

fn retype_keeping_momentum(disc: &mut Disc, product: &DiscType) {
    let mass_ratio = disc.mass() / product.mass();
    disc.set_type(product);
    disc.scale_velocity(mass_ratio);
}

fn pair_mut(discs: &mut [Disc], i: usize, j: usize) -> (&mut Disc, &mut Disc) {
    debug_assert!(i < j);
    let (left, right) = discs.split_at_mut(j);
    (&mut left[i], &mut right[0])
}

// Mirrors a penetration of [radius, extent - radius] back inside. The flag
// tells whether the velocity still points into the wall and must be negated.
fn reflect_axis(position: f64, velocity: f64, radius: f64, extent: f64) -> (f64, bool) {
    let (min, max) = (radius, extent - radius);
    if max < min {
        return (extent / 2.0, false);
    }
    if position < min {
        ((2.0 * min - position).min(max), velocity < 0.0)
    } else if position > max {
        ((2.0 * max - position).max(min), velocity > 0.0)
    } else {
        (position, false)
    }
}

fn clamp_axis(value: f64, radius: f64, extent: f64) -> f64 {
    if extent < 2.0 * radius {
        extent / 2.0
    } else {
        clamp(value, radius, extent - radius)
    }
}

fn check_bounds(width: f64, height: f64) -> Result<(), ConfigError> {
    if width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidBounds { width, height })
    }
}

fn build_grid(params: &SimParams, registry: &DiscTypeRegistry) -> SpatialGrid {
    SpatialGrid::new(params.world_width, params.world_height, 2.0 * registry.max_radius())
}
