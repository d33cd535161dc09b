use crate::disc_type::DiscType;
use crate::physical_object::PhysicalObject;
use cell_common::{DiscState, DiscTypeId, Vec2};
use std::ops::Deref;

/// A circular particle: a physical object bound to a registered disc type.
///
/// The mass is cached from the type and kept in sync by [`Disc::set_type`].
/// Read access to the kinematic state goes through `Deref<Target = PhysicalObject>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Disc {
    object: PhysicalObject,
    type_id: DiscTypeId,
    destroyed: bool,
    changed: bool,
    // Set when the disc took part in a reaction during the current update
    reacted: bool,
}

impl Disc {
    /// # Panics
    /// If `disc_type` has not been registered.
    pub fn new(disc_type: &DiscType, position: Vec2, velocity: Vec2) -> Self {
        let type_id = match disc_type.id() {
            Some(id) => id,
            None => panic!("disc type \"{}\" is not registered", disc_type.name()),
        };
        Self {
            object: PhysicalObject::new(position, velocity, disc_type.mass()),
            type_id,
            destroyed: false,
            changed: false,
            reacted: false,
        }
    }

    pub fn type_id(&self) -> DiscTypeId { self.type_id }

    pub fn is_destroyed(&self) -> bool { self.destroyed }

    /// Flags the disc for removal at the end of the current update.
    pub fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    pub fn is_changed(&self) -> bool { self.changed }

    /// Switches to another type, updating the cached mass. Velocity is left as is.
    pub fn set_type(&mut self, disc_type: &DiscType) {
        let Some(type_id) = disc_type.id() else {
            panic!("disc type \"{}\" is not registered", disc_type.name());
        };
        if type_id != self.type_id {
            self.changed = true;
        }
        self.type_id = type_id;
        self.object.set_mass(disc_type.mass());
    }

    pub(crate) fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub(crate) fn has_reacted(&self) -> bool { self.reacted }

    pub(crate) fn set_reacted(&mut self, reacted: bool) {
        self.reacted = reacted;
    }

    pub fn set_position(&mut self, position: Vec2) { self.object.set_position(position); }
    pub fn move_by(&mut self, distance: Vec2) { self.object.move_by(distance); }
    pub fn set_velocity(&mut self, velocity: Vec2) { self.object.set_velocity(velocity); }
    pub fn scale_velocity(&mut self, factor: f64) { self.object.scale_velocity(factor); }
    pub fn accelerate(&mut self, delta_v: Vec2) { self.object.accelerate(delta_v); }
    pub fn negate_x_velocity(&mut self) { self.object.negate_x_velocity(); }
    pub fn negate_y_velocity(&mut self) { self.object.negate_y_velocity(); }

    pub fn state(&self) -> DiscState {
        DiscState {
            type_id: self.type_id,
            position: self.object.position(),
            velocity: self.object.velocity(),
        }
    }
}

impl Deref for Disc {
    type Target = PhysicalObject;

    fn deref(&self) -> &PhysicalObject {
        &self.object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc_type::DiscTypeRegistry;
    use cell_common::DiscColor;

    fn registry() -> DiscTypeRegistry {
        let mut registry = DiscTypeRegistry::new();
        registry
            .set_types(vec![
                DiscType::new("A", DiscColor::Red, 1.0, 2.0).unwrap(),
                DiscType::new("B", DiscColor::Blue, 2.0, 8.0).unwrap(),
            ])
            .unwrap();
        registry
    }

    #[test]
    fn test_mass_follows_type() {
        let registry = registry();
        let a = registry.by_id(DiscTypeId(0));
        let b = registry.by_id(DiscTypeId(1));

        let mut disc = Disc::new(a, Vec2::zero(), Vec2::new(1.0, 0.0));
        assert_eq!(disc.mass(), 2.0);
        assert!(!disc.is_changed());

        disc.set_type(b);
        assert_eq!(disc.mass(), 8.0);
        assert_eq!(disc.type_id(), DiscTypeId(1));
        assert!(disc.is_changed());
        assert!((disc.kinetic_energy() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_destroy_flag() {
        let registry = registry();
        let mut disc = Disc::new(registry.by_id(DiscTypeId(0)), Vec2::zero(), Vec2::zero());
        assert!(!disc.is_destroyed());
        disc.mark_destroyed();
        assert!(disc.is_destroyed());
    }

    #[test]
    #[should_panic]
    fn test_unregistered_type_panics() {
        let loose = DiscType::new("Loose", DiscColor::Red, 1.0, 1.0).unwrap();
        let _ = Disc::new(&loose, Vec2::zero(), Vec2::zero());
    }
}
