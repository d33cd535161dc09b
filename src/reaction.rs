use crate::disc_type::DiscTypeRegistry;
use crate::error::ConfigError;
use cell_common::{DiscTypeId, ReactionConfig};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Slack allowed when summing probabilities for one reactant key.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// Classification of a reaction, derived from how many reactants and products it has.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReactionKind {
    /// A -> B
    Transformation,
    /// A -> B + C
    Decomposition,
    /// A + B -> C
    Combination,
    /// A + B -> C + D
    Exchange,
}

impl ReactionKind {
    /// Transformation and decomposition act on single discs, the others on colliding pairs.
    pub fn is_unimolecular(self) -> bool {
        matches!(self, ReactionKind::Transformation | ReactionKind::Decomposition)
    }
}

/// Lookup key of a reaction: its reactant type(s), pairs in ascending id order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReactionKey {
    Single(DiscTypeId),
    Pair(DiscTypeId, DiscTypeId),
}

impl ReactionKey {
    pub fn pair(a: DiscTypeId, b: DiscTypeId) -> Self {
        if a <= b { ReactionKey::Pair(a, b) } else { ReactionKey::Pair(b, a) }
    }
}

fn ordered(a: DiscTypeId, b: Option<DiscTypeId>) -> (DiscTypeId, Option<DiscTypeId>) {
    match b {
        Some(b) if b < a => (b, Some(a)),
        _ => (a, b),
    }
}

/// A probabilistic conversion rule between disc types.
///
/// Reactants and products are stored as declared; lookups and duplicate
/// detection use the canonical (ascending) order of two-element sides.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reaction {
    reactant1: DiscTypeId,
    reactant2: Option<DiscTypeId>,
    product1: DiscTypeId,
    product2: Option<DiscTypeId>,
    probability: f64,
}

impl Reaction {
    /// Creates a reaction with 1-2 reactants, 1-2 products and a probability in (0, 1].
    pub fn new(reactants: &[DiscTypeId], products: &[DiscTypeId], probability: f64) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidReaction {
            reaction: format!("{:?} -> {:?}", reactants, products),
            reason: reason.to_string(),
        };

        let (reactant1, reactant2) = match reactants {
            [a] => (*a, None),
            [a, b] => (*a, Some(*b)),
            _ => return Err(invalid("a reaction needs one or two reactants")),
        };
        let (product1, product2) = match products {
            [a] => (*a, None),
            [a, b] => (*a, Some(*b)),
            _ => return Err(invalid("a reaction needs one or two products")),
        };
        if !(probability > 0.0 && probability <= 1.0) {
            return Err(invalid(&format!("probability must be in (0, 1], got {}", probability)));
        }

        Ok(Self { reactant1, reactant2, product1, product2, probability })
    }

    pub fn kind(&self) -> ReactionKind {
        match (self.reactant2.is_some(), self.product2.is_some()) {
            (false, false) => ReactionKind::Transformation,
            (false, true) => ReactionKind::Decomposition,
            (true, false) => ReactionKind::Combination,
            (true, true) => ReactionKind::Exchange,
        }
    }

    pub fn key(&self) -> ReactionKey {
        match self.reactant2 {
            None => ReactionKey::Single(self.reactant1),
            Some(reactant2) => ReactionKey::pair(self.reactant1, reactant2),
        }
    }

    pub fn reactant1(&self) -> DiscTypeId { self.reactant1 }
    pub fn reactant2(&self) -> Option<DiscTypeId> { self.reactant2 }
    pub fn product1(&self) -> DiscTypeId { self.product1 }
    pub fn product2(&self) -> Option<DiscTypeId> { self.product2 }
    pub fn probability(&self) -> f64 { self.probability }

    pub fn canonical_products(&self) -> (DiscTypeId, Option<DiscTypeId>) {
        ordered(self.product1, self.product2)
    }

    /// Same reactants and products, ignoring declaration order and probability.
    pub fn same_rule(&self, other: &Reaction) -> bool {
        self.key() == other.key() && self.canonical_products() == other.canonical_products()
    }

    pub fn contains(&self, id: DiscTypeId) -> bool {
        self.reactant1 == id || self.reactant2 == Some(id) || self.product1 == id || self.product2 == Some(id)
    }

    /// For an exchange, the products in the order matching a reacting pair whose
    /// first disc has type `first`.
    pub fn exchange_products_for(&self, first: DiscTypeId) -> (DiscTypeId, DiscTypeId) {
        let product2 = self.product2.unwrap_or(self.product1);
        if first == self.reactant1 {
            (self.product1, product2)
        } else {
            (product2, self.product1)
        }
    }

    /// Probability that this reaction fires within one update of length `dt`.
    pub fn step_probability(&self, dt: f64, per_second: bool) -> f64 {
        if per_second && self.kind().is_unimolecular() {
            1.0 - (1.0 - self.probability).powf(dt)
        } else {
            self.probability
        }
    }

    /// Renders the reaction with type names, e.g. `A + B -> C`.
    pub fn describe(&self, registry: &DiscTypeRegistry) -> String {
        let mut result = registry.name_of(self.reactant1);
        if let Some(reactant2) = self.reactant2 {
            result += &format!(" + {}", registry.name_of(reactant2));
        }
        result += &format!(" -> {}", registry.name_of(self.product1));
        if let Some(product2) = self.product2 {
            result += &format!(" + {}", registry.name_of(product2));
        }
        result
    }
}

/// Walks `candidates` in insertion order accumulating probability mass and
/// returns the first reaction whose interval contains `draw` (in [0, 1)).
pub fn select_reaction<'a, F>(candidates: &'a [Reaction], draw: f64, mut probability_of: F) -> Option<&'a Reaction>
where
    F: FnMut(&Reaction) -> f64,
{
    let mut cumulative = 0.0;
    for reaction in candidates {
        cumulative += probability_of(reaction);
        if draw < cumulative {
            return Some(reaction);
        }
    }
    None
}

/// All reactions of one setup plus lookup maps per reaction kind.
///
/// Built once before a world starts and shared read-only afterwards.
#[derive(Debug)]
pub struct ReactionTable {
    registry: Arc<DiscTypeRegistry>,
    reactions: Vec<Reaction>,

    transformations: HashMap<DiscTypeId, Vec<Reaction>>,
    decompositions: HashMap<DiscTypeId, Vec<Reaction>>,
    combinations: HashMap<(DiscTypeId, DiscTypeId), Vec<Reaction>>,
    exchanges: HashMap<(DiscTypeId, DiscTypeId), Vec<Reaction>>,

    // All reactions sharing a key regardless of kind, in insertion order.
    candidates: HashMap<ReactionKey, Vec<Reaction>>,
}

impl ReactionTable {
    pub fn new(registry: Arc<DiscTypeRegistry>) -> Self {
        Self {
            registry,
            reactions: Vec::new(),
            transformations: HashMap::new(),
            decompositions: HashMap::new(),
            combinations: HashMap::new(),
            exchanges: HashMap::new(),
            candidates: HashMap::new(),
        }
    }

    /// Resolves reaction rules given by type names and adds them in order.
    pub fn from_config(registry: Arc<DiscTypeRegistry>, configs: &[ReactionConfig]) -> Result<Self, ConfigError> {
        let mut table = Self::new(registry);

        for config in configs {
            let reactants = config
                .reactants
                .iter()
                .map(|name| table.registry.id_for(name))
                .collect::<Result<Vec<_>, _>>()?;
            let products = config
                .products
                .iter()
                .map(|name| table.registry.id_for(name))
                .collect::<Result<Vec<_>, _>>()?;

            let reaction = Reaction::new(&reactants, &products, config.probability).map_err(|e| match e {
                ConfigError::InvalidReaction { reason, .. } => ConfigError::InvalidReaction {
                    reaction: format!("{} -> {}", config.reactants.join(" + "), config.products.join(" + ")),
                    reason,
                },
                other => other,
            })?;
            table.add_reaction(reaction)?;
        }

        debug!("Reaction table built with {} reactions.", table.reactions.len());
        Ok(table)
    }

    /// Adds a reaction and updates the lookup maps. On error the table is unchanged.
    pub fn add_reaction(&mut self, reaction: Reaction) -> Result<(), ConfigError> {
        for id in [Some(reaction.reactant1), reaction.reactant2, Some(reaction.product1), reaction.product2]
            .into_iter()
            .flatten()
        {
            if !self.registry.contains(id) {
                return Err(ConfigError::UnknownDiscTypeId(id.0));
            }
        }

        let key = reaction.key();
        let existing = self.candidates_for(key);
        if existing.iter().any(|r| r.same_rule(&reaction)) {
            return Err(ConfigError::DuplicateReaction(reaction.describe(&self.registry)));
        }

        let total = existing.iter().map(Reaction::probability).sum::<f64>() + reaction.probability;
        if total > 1.0 + PROBABILITY_TOLERANCE {
            return Err(ConfigError::ProbabilityBudgetExceeded {
                reaction: reaction.describe(&self.registry),
                total,
            });
        }

        match (reaction.kind(), key) {
            (ReactionKind::Transformation, ReactionKey::Single(id)) => {
                self.transformations.entry(id).or_default().push(reaction)
            }
            (ReactionKind::Decomposition, ReactionKey::Single(id)) => {
                self.decompositions.entry(id).or_default().push(reaction)
            }
            (ReactionKind::Combination, ReactionKey::Pair(a, b)) => {
                self.combinations.entry((a, b)).or_default().push(reaction)
            }
            (ReactionKind::Exchange, ReactionKey::Pair(a, b)) => {
                self.exchanges.entry((a, b)).or_default().push(reaction)
            }
            (kind, key) => unreachable!("reaction kind {:?} with key {:?}", kind, key),
        }
        self.candidates.entry(key).or_default().push(reaction);
        self.reactions.push(reaction);
        Ok(())
    }

    /// Reactions of one kind sharing `key`, in insertion order.
    pub fn reactions_for(&self, kind: ReactionKind, key: ReactionKey) -> &[Reaction] {
        let found = match (kind, key) {
            (ReactionKind::Transformation, ReactionKey::Single(id)) => self.transformations.get(&id),
            (ReactionKind::Decomposition, ReactionKey::Single(id)) => self.decompositions.get(&id),
            (ReactionKind::Combination, ReactionKey::Pair(a, b)) => self.combinations.get(&(a, b)),
            (ReactionKind::Exchange, ReactionKey::Pair(a, b)) => self.exchanges.get(&(a, b)),
            _ => None,
        };
        found.map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reactions of every kind sharing `key`, in insertion order.
    pub fn candidates_for(&self, key: ReactionKey) -> &[Reaction] {
        self.candidates.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Summed probability of all reactions sharing `key`.
    pub fn total_probability(&self, key: ReactionKey) -> f64 {
        self.candidates_for(key).iter().map(Reaction::probability).sum()
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn registry(&self) -> &Arc<DiscTypeRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc_type::DiscType;
    use cell_common::DiscColor;

    struct Fixture {
        registry: Arc<DiscTypeRegistry>,
        a: DiscTypeId,
        b: DiscTypeId,
        c: DiscTypeId,
    }

    fn fixture() -> Fixture {
        let mut registry = DiscTypeRegistry::new();
        registry
            .set_types(vec![
                DiscType::new("A", DiscColor::Red, 5.0, 1.0).unwrap(),
                DiscType::new("B", DiscColor::Green, 5.0, 1.0).unwrap(),
                DiscType::new("C", DiscColor::Blue, 5.0, 2.0).unwrap(),
            ])
            .unwrap();
        let a = registry.id_for("A").unwrap();
        let b = registry.id_for("B").unwrap();
        let c = registry.id_for("C").unwrap();
        Fixture { registry: Arc::new(registry), a, b, c }
    }

    #[test]
    fn test_kind_follows_arity() {
        let f = fixture();
        assert_eq!(Reaction::new(&[f.a], &[f.b], 1.0).unwrap().kind(), ReactionKind::Transformation);
        assert_eq!(Reaction::new(&[f.c], &[f.a, f.b], 1.0).unwrap().kind(), ReactionKind::Decomposition);
        assert_eq!(Reaction::new(&[f.a, f.b], &[f.c], 1.0).unwrap().kind(), ReactionKind::Combination);
        assert_eq!(Reaction::new(&[f.a, f.b], &[f.c, f.c], 1.0).unwrap().kind(), ReactionKind::Exchange);
    }

    #[test]
    fn test_rejects_bad_arity_and_probability() {
        let f = fixture();
        assert!(Reaction::new(&[], &[f.a], 0.5).is_err());
        assert!(Reaction::new(&[f.a, f.b, f.c], &[f.a], 0.5).is_err());
        assert!(Reaction::new(&[f.a], &[], 0.5).is_err());
        assert!(Reaction::new(&[f.a], &[f.b], 0.0).is_err());
        assert!(Reaction::new(&[f.a], &[f.b], 1.5).is_err());
        assert!(Reaction::new(&[f.a], &[f.b], f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_duplicates_of_every_kind() {
        let f = fixture();
        let reactions = [
            Reaction::new(&[f.a], &[f.b], 0.1).unwrap(),
            Reaction::new(&[f.c], &[f.a, f.b], 0.1).unwrap(),
            Reaction::new(&[f.a, f.b], &[f.c], 0.1).unwrap(),
            Reaction::new(&[f.c, f.b], &[f.c, f.a], 0.1).unwrap(),
        ];
        for reaction in reactions {
            let mut table = ReactionTable::new(f.registry.clone());
            table.add_reaction(reaction).unwrap();
            assert!(matches!(table.add_reaction(reaction), Err(ConfigError::DuplicateReaction(_))));
            assert_eq!(table.len(), 1);
        }
    }

    #[test]
    fn test_duplicate_detection_ignores_order() {
        let f = fixture();
        let mut table = ReactionTable::new(f.registry.clone());
        table.add_reaction(Reaction::new(&[f.a, f.b], &[f.c], 0.2).unwrap()).unwrap();
        let swapped = Reaction::new(&[f.b, f.a], &[f.c], 0.3).unwrap();
        assert!(matches!(table.add_reaction(swapped), Err(ConfigError::DuplicateReaction(_))));
    }

    #[test]
    fn test_probability_budget_is_inclusive() {
        let f = fixture();
        let r1 = Reaction::new(&[f.a], &[f.b], 0.6).unwrap();

        let mut table = ReactionTable::new(f.registry.clone());
        table.add_reaction(r1).unwrap();
        let too_much = Reaction::new(&[f.a], &[f.c], 0.5).unwrap();
        assert!(matches!(
            table.add_reaction(too_much),
            Err(ConfigError::ProbabilityBudgetExceeded { .. })
        ));
        assert_eq!(table.len(), 1);

        let exact = Reaction::new(&[f.a], &[f.c], 0.4).unwrap();
        table.add_reaction(exact).unwrap();
        assert!((table.total_probability(ReactionKey::Single(f.a)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_budget_is_shared_across_kinds_with_same_key() {
        let f = fixture();
        let mut table = ReactionTable::new(f.registry.clone());
        table.add_reaction(Reaction::new(&[f.c], &[f.a], 0.7).unwrap()).unwrap();
        let decomposition = Reaction::new(&[f.c], &[f.a, f.b], 0.4).unwrap();
        assert!(table.add_reaction(decomposition).is_err());
    }

    #[test]
    fn test_lookup_uses_canonical_pair_and_insertion_order() {
        let f = fixture();
        let mut table = ReactionTable::new(f.registry.clone());
        let first = Reaction::new(&[f.b, f.a], &[f.c], 0.3).unwrap();
        let second = Reaction::new(&[f.a, f.b], &[f.c, f.c], 0.2).unwrap();
        table.add_reaction(first).unwrap();
        table.add_reaction(second).unwrap();

        let key = ReactionKey::pair(f.b, f.a);
        assert_eq!(key, ReactionKey::pair(f.a, f.b));
        assert_eq!(table.reactions_for(ReactionKind::Combination, key), &[first]);
        assert_eq!(table.reactions_for(ReactionKind::Exchange, key), &[second]);
        assert_eq!(table.candidates_for(key), &[first, second]);
        assert!(table.reactions_for(ReactionKind::Transformation, key).is_empty());
    }

    #[test]
    fn test_rejects_ids_from_other_registry() {
        let f = fixture();
        let mut table = ReactionTable::new(f.registry.clone());
        let stray = Reaction::new(&[f.a], &[DiscTypeId(42)], 0.5).unwrap();
        assert_eq!(table.add_reaction(stray), Err(ConfigError::UnknownDiscTypeId(42)));
    }

    #[test]
    fn test_from_config_resolves_names() {
        let f = fixture();
        let configs = vec![
            ReactionConfig { reactants: vec!["C".into()], products: vec!["A".into(), "B".into()], probability: 0.5 },
            ReactionConfig { reactants: vec!["A".into(), "B".into()], products: vec!["C".into()], probability: 1.0 },
        ];
        let table = ReactionTable::from_config(f.registry.clone(), &configs).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.reactions()[0].describe(&f.registry), "C -> A + B");

        let unknown = vec![ReactionConfig { reactants: vec!["Q".into()], products: vec!["A".into()], probability: 0.5 }];
        assert_eq!(
            ReactionTable::from_config(f.registry.clone(), &unknown).unwrap_err(),
            ConfigError::NotFound("Q".to_string())
        );
    }

    #[test]
    fn test_select_walks_cumulative_intervals() {
        let f = fixture();
        let r1 = Reaction::new(&[f.a], &[f.b], 0.25).unwrap();
        let r2 = Reaction::new(&[f.a], &[f.c], 0.5).unwrap();
        let candidates = [r1, r2];

        assert_eq!(select_reaction(&candidates, 0.0, |r| r.probability()), Some(&r1));
        assert_eq!(select_reaction(&candidates, 0.2499, |r| r.probability()), Some(&r1));
        assert_eq!(select_reaction(&candidates, 0.25, |r| r.probability()), Some(&r2));
        assert_eq!(select_reaction(&candidates, 0.75, |r| r.probability()), None);
    }

    #[test]
    fn test_exchange_products_follow_reactant_order() {
        let f = fixture();
        let exchange = Reaction::new(&[f.a, f.b], &[f.c, f.a], 1.0).unwrap();
        assert_eq!(exchange.exchange_products_for(f.a), (f.c, f.a));
        assert_eq!(exchange.exchange_products_for(f.b), (f.a, f.c));
        assert!(exchange.contains(f.c));
        assert!(!Reaction::new(&[f.a], &[f.b], 1.0).unwrap().contains(f.c));
    }

    #[test]
    fn test_per_second_probability() {
        let f = fixture();
        let reaction = Reaction::new(&[f.a], &[f.b], 0.5).unwrap();
        let per_step = reaction.step_probability(0.001, true);
        assert!(per_step > 0.0 && per_step < 0.001);
        assert_eq!(reaction.step_probability(0.001, false), 0.5);
        let certain = Reaction::new(&[f.a], &[f.b], 1.0).unwrap();
        assert_eq!(certain.step_probability(0.001, true), 1.0);
    }
}
