use crate::error::ConfigError;
use cell_common::{DiscColor, DiscTypeConfig, DiscTypeId};
use log::debug;
use std::collections::HashMap;

/// Physical and visual properties shared by all discs of one kind.
///
/// Types are validated on construction and receive their id when handed to a
/// [`DiscTypeRegistry`]. Registered types compare by id.
#[derive(Debug, Clone)]
pub struct DiscType {
    name: String,
    color: DiscColor,
    radius: f64,
    mass: f64,
    id: Option<DiscTypeId>,
}

impl DiscType {
    /// Creates an unregistered disc type. Fails on an empty name or a non-positive radius/mass.
    pub fn new(name: impl Into<String>, color: DiscColor, radius: f64, mass: f64) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidDiscType { name, reason: "name must not be empty".to_string() });
        }
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(ConfigError::InvalidDiscType { name, reason: format!("radius must be positive, got {}", radius) });
        }
        if !(mass > 0.0) || !mass.is_finite() {
            return Err(ConfigError::InvalidDiscType { name, reason: format!("mass must be positive, got {}", mass) });
        }

        Ok(Self { name, color, radius, mass, id: None })
    }

    pub fn from_config(config: &DiscTypeConfig) -> Result<Self, ConfigError> {
        Self::new(config.name.clone(), config.color, config.radius, config.mass)
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn color(&self) -> DiscColor { self.color }
    pub fn radius(&self) -> f64 { self.radius }
    pub fn mass(&self) -> f64 { self.mass }

    /// Id assigned by the registry, `None` before registration.
    pub fn id(&self) -> Option<DiscTypeId> { self.id }
}

impl PartialEq for DiscType {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            // Unregistered types are only distinguishable by name
            _ => self.name == other.name,
        }
    }
}

/// Owns the disc types of one simulation setup and hands out stable ids.
///
/// Ids are dense indices into the backing storage. Replacing the type set with
/// [`set_types`](Self::set_types) invalidates every id issued before.
#[derive(Debug, Default)]
pub struct DiscTypeRegistry {
    types: Vec<DiscType>,
    name_to_id: HashMap<String, DiscTypeId>,
}

impl DiscTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configuration entries.
    pub fn from_config(configs: &[DiscTypeConfig]) -> Result<Self, ConfigError> {
        let types = configs.iter().map(DiscType::from_config).collect::<Result<Vec<_>, _>>()?;
        let mut registry = Self::new();
        registry.set_types(types)?;
        Ok(registry)
    }

    /// Replaces the full type set. Nothing changes if two types share a name.
    pub fn set_types(&mut self, types: Vec<DiscType>) -> Result<(), ConfigError> {
        let mut name_to_id = HashMap::with_capacity(types.len());
        for (index, disc_type) in types.iter().enumerate() {
            if name_to_id.insert(disc_type.name.clone(), DiscTypeId(index as u32)).is_some() {
                return Err(ConfigError::DuplicateName(disc_type.name.clone()));
            }
        }

        self.types = types
            .into_iter()
            .enumerate()
            .map(|(index, mut disc_type)| {
                disc_type.id = Some(DiscTypeId(index as u32));
                disc_type
            })
            .collect();
        self.name_to_id = name_to_id;
        debug!("Registered {} disc types.", self.types.len());
        Ok(())
    }

    /// Updates the properties of an existing type while keeping its id.
    pub fn replace_type(&mut self, id: DiscTypeId, mut disc_type: DiscType) -> Result<(), ConfigError> {
        let old_name = match self.types.get(id.index()) {
            Some(existing) => existing.name.clone(),
            None => return Err(ConfigError::UnknownDiscTypeId(id.0)),
        };
        if disc_type.name != old_name {
            if self.name_to_id.contains_key(&disc_type.name) {
                return Err(ConfigError::DuplicateName(disc_type.name));
            }
            self.name_to_id.remove(&old_name);
            self.name_to_id.insert(disc_type.name.clone(), id);
        }

        disc_type.id = Some(id);
        self.types[id.index()] = disc_type;
        Ok(())
    }

    pub fn id_for(&self, name: &str) -> Result<DiscTypeId, ConfigError> {
        self.name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    /// Returns the type for an id issued by this registry.
    ///
    /// # Panics
    /// If the id was not issued by this registry.
    pub fn by_id(&self, id: DiscTypeId) -> &DiscType {
        match self.types.get(id.index()) {
            Some(disc_type) => disc_type,
            None => panic!("disc type id {} out of range (registry holds {})", id, self.types.len()),
        }
    }

    pub fn get(&self, id: DiscTypeId) -> Option<&DiscType> {
        self.types.get(id.index())
    }

    pub fn contains(&self, id: DiscTypeId) -> bool {
        id.index() < self.types.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Largest radius of all registered types, 0 for an empty registry.
    pub fn max_radius(&self) -> f64 {
        self.types.iter().map(|t| t.radius).fold(0.0, f64::max)
    }

    /// Name of a type for messages; falls back to the raw id for unknown ids.
    pub fn name_of(&self, id: DiscTypeId) -> String {
        self.get(id).map(|t| t.name.clone()).unwrap_or_else(|| id.to_string())
    }
}
