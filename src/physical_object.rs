use cell_common::Vec2;

/// Kinematic state shared by everything that moves: position (px), velocity (px/s) and mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalObject {
    position: Vec2,
    velocity: Vec2,
    mass: f64,
}

impl PhysicalObject {
    /// # Panics
    /// If `mass` is not positive.
    pub fn new(position: Vec2, velocity: Vec2, mass: f64) -> Self {
        assert!(mass > 0.0, "mass must be positive, got {}", mass);
        Self { position, velocity, mass }
    }

    pub fn position(&self) -> Vec2 { self.position }
    pub fn velocity(&self) -> Vec2 { self.velocity }
    pub fn mass(&self) -> f64 { self.mass }

    /// mv
    pub fn momentum(&self) -> Vec2 {
        self.velocity.scale(self.mass)
    }

    /// |mv|
    pub fn absolute_momentum(&self) -> f64 {
        self.mass * self.velocity.length()
    }

    /// 1/2 m v^2
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.length_squared()
    }

    pub fn set_position(&mut self, position: Vec2) {
        debug_assert!(position.is_finite(), "invalid position {:?}", position);
        self.position = position;
    }

    /// Changes the position by `distance`.
    pub fn move_by(&mut self, distance: Vec2) {
        self.set_position(self.position.add(distance));
    }

    pub fn set_velocity(&mut self, velocity: Vec2) {
        debug_assert!(velocity.is_finite(), "invalid velocity {:?}", velocity);
        self.velocity = velocity;
    }

    pub fn scale_velocity(&mut self, factor: f64) {
        self.set_velocity(self.velocity.scale(factor));
    }

    /// Adds `delta_v` to the velocity.
    pub fn accelerate(&mut self, delta_v: Vec2) {
        self.set_velocity(self.velocity.add(delta_v));
    }

    pub fn negate_x_velocity(&mut self) {
        self.velocity.x = -self.velocity.x;
    }

    pub fn negate_y_velocity(&mut self) {
        self.velocity.y = -self.velocity.y;
    }

    /// # Panics
    /// If `mass` is not positive.
    pub fn set_mass(&mut self, mass: f64) {
        assert!(mass > 0.0, "mass must be positive, got {}", mass);
        self.mass = mass;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_rest_has_no_energy() {
        let object = PhysicalObject::new(Vec2::new(1.0, 2.0), Vec2::zero(), 3.0);
        assert_eq!(object.kinetic_energy(), 0.0);
        assert_eq!(object.momentum(), Vec2::zero());
    }

    #[test]
    fn test_derived_quantities() {
        let object = PhysicalObject::new(Vec2::zero(), Vec2::new(3.0, 4.0), 2.0);
        assert!((object.kinetic_energy() - 25.0).abs() < 1e-12);
        assert_eq!(object.momentum(), Vec2::new(6.0, 8.0));
        assert!((object.absolute_momentum() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_mutators() {
        let mut object = PhysicalObject::new(Vec2::zero(), Vec2::new(1.0, -2.0), 1.0);
        object.move_by(Vec2::new(2.0, 2.0));
        object.scale_velocity(2.0);
        object.accelerate(Vec2::new(1.0, 1.0));
        object.negate_x_velocity();
        object.negate_y_velocity();
        assert_eq!(object.position(), Vec2::new(2.0, 2.0));
        assert_eq!(object.velocity(), Vec2::new(-3.0, 3.0));
    }

    #[test]
    #[should_panic]
    fn test_rejects_zero_mass() {
        let mut object = PhysicalObject::new(Vec2::zero(), Vec2::zero(), 1.0);
        object.set_mass(0.0);
    }
}
