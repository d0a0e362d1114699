//! Minimal rigid-body world used by the game engine.
//!
//! Bodies are axis-aligned rectangles or circles that never rotate. The world
//! integrates velocities, reports overlaps and resolves contacts between
//! solid bodies with an impulse along the contact normal. Sensors are only
//! reported, never resolved. There is no gravity.

use serde::Serialize;
use shared::SessionId;

/// Penetration left in place after positional correction, so bodies that were
/// just resolved still register as touching for overlap queries.
const POSITION_SLOP: f32 = 0.05;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct Vector2 {
    ///Value along the x-axis.
    pub x: f32,
    ///Value along the y-axis.
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector, or zero for a zero vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns the difference of two vectors.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn dot(&self, other: &Vector2) -> f32 {
        self.x * other.x + self.y * other.y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Typed identity of a body. Collision handling dispatches on this tag, so a
/// session id can never be mistaken for a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Wall,
    DeadZone(Side),
    Paddle(SessionId),
    Ball,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Rect { width: f32, height: f32 },
    Circle { radius: f32 },
}

impl Shape {
    fn area(&self) -> f32 {
        match *self {
            Shape::Rect { width, height } => width * height,
            Shape::Circle { radius } => std::f32::consts::PI * radius * radius,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub kind: BodyKind,
    ///The positional center of the body.
    pub position: Vector2,
    pub velocity: Vector2,
    pub shape: Shape,
    /// Bounce elasticity; a contact uses the larger value of the two bodies.
    pub restitution: f32,
    /// Fraction of velocity removed after each step (1.0 stops the body).
    pub damping: f32,
    pub density: f32,
    pub is_static: bool,
    pub is_sensor: bool,
}

impl RigidBody {
    pub fn rect(kind: BodyKind, position: Vector2, width: f32, height: f32) -> Self {
        Self::with_shape(kind, position, Shape::Rect { width, height })
    }

    pub fn circle(kind: BodyKind, position: Vector2, radius: f32) -> Self {
        Self::with_shape(kind, position, Shape::Circle { radius })
    }

    fn with_shape(kind: BodyKind, position: Vector2, shape: Shape) -> Self {
        Self {
            kind,
            position,
            velocity: Vector2::ZERO,
            shape,
            restitution: 0.0,
            damping: 0.0,
            density: 1.0,
            is_static: false,
            is_sensor: false,
        }
    }

    pub fn fixed(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn sensor(mut self) -> Self {
        self.is_sensor = true;
        self
    }

    pub fn restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn damping(mut self, damping: f32) -> Self {
        self.damping = damping;
        self
    }

    pub fn density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    fn inverse_mass(&self) -> f32 {
        if self.is_static {
            0.0
        } else {
            1.0 / (self.shape.area() * self.density)
        }
    }
}

/// Reference to a body. A handle stays valid until its body is removed; the
/// slot may then be handed out again by a later `add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(usize);

/// Contact between two bodies. `normal` points from the first body to the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub normal: Vector2,
    pub depth: f32,
}

/// Computes the contact between two bodies, if they overlap.
pub fn contact(a: &RigidBody, b: &RigidBody) -> Option<Contact> {
    match (a.shape, b.shape) {
        (
            Shape::Rect {
                width: wa,
                height: ha,
            },
            Shape::Rect {
                width: wb,
                height: hb,
            },
        ) => {
            let d = b.position.sub(&a.position);
            let overlap_x = (wa + wb) / 2.0 - d.x.abs();
            let overlap_y = (ha + hb) / 2.0 - d.y.abs();
            if overlap_x <= 0.0 || overlap_y <= 0.0 {
                return None;
            }
            // Resolve along the axis of shallowest penetration
            if overlap_x < overlap_y {
                Some(Contact {
                    normal: Vector2::new(sign(d.x), 0.0),
                    depth: overlap_x,
                })
            } else {
                Some(Contact {
                    normal: Vector2::new(0.0, sign(d.y)),
                    depth: overlap_y,
                })
            }
        }
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => {
            let d = b.position.sub(&a.position);
            let distance = d.magnitude();
            let depth = ra + rb - distance;
            if depth <= 0.0 {
                return None;
            }
            let normal = if distance == 0.0 {
                Vector2::new(1.0, 0.0)
            } else {
                d.scale(1.0 / distance)
            };
            Some(Contact { normal, depth })
        }
        (Shape::Rect { width, height }, Shape::Circle { radius }) => {
            rect_circle(a.position, width, height, b.position, radius)
        }
        (Shape::Circle { .. }, Shape::Rect { .. }) => contact(b, a).map(|c| Contact {
            normal: c.normal.scale(-1.0),
            depth: c.depth,
        }),
    }
}

fn sign(v: f32) -> f32 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

fn rect_circle(
    rect_pos: Vector2,
    width: f32,
    height: f32,
    center: Vector2,
    radius: f32,
) -> Option<Contact> {
    let half_w = width / 2.0;
    let half_h = height / 2.0;
    let d = center.sub(&rect_pos);

    let inside = d.x.abs() < half_w && d.y.abs() < half_h;
    if inside {
        // Center is inside the rectangle: push out through the nearest face
        let to_x = half_w - d.x.abs();
        let to_y = half_h - d.y.abs();
        return if to_x < to_y {
            Some(Contact {
                normal: Vector2::new(sign(d.x), 0.0),
                depth: to_x + radius,
            })
        } else {
            Some(Contact {
                normal: Vector2::new(0.0, sign(d.y)),
                depth: to_y + radius,
            })
        };
    }

    let closest = Vector2::new(d.x.clamp(-half_w, half_w), d.y.clamp(-half_h, half_h));
    let offset = d.sub(&closest);
    let distance = offset.magnitude();
    if distance >= radius {
        return None;
    }
    Some(Contact {
        normal: offset.normalize(),
        depth: radius - distance,
    })
}

/// Owns every body of one room.
#[derive(Debug, Default)]
pub struct PhysicsWorld {
    bodies: Vec<Option<RigidBody>>,
    free: Vec<usize>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a body, reusing the slot of a removed one when there is any.
    pub fn add(&mut self, body: RigidBody) -> BodyHandle {
        match self.free.pop() {
            Some(index) => {
                self.bodies[index] = Some(body);
                BodyHandle(index)
            }
            None => {
                self.bodies.push(Some(body));
                BodyHandle(self.bodies.len() - 1)
            }
        }
    }

    /// Removes a body. Other handles stay valid.
    pub fn remove(&mut self, handle: BodyHandle) -> Option<RigidBody> {
        let body = self.bodies.get_mut(handle.0).and_then(Option::take)?;
        self.free.push(handle.0);
        Some(body)
    }

    pub fn get(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn set_position(&mut self, handle: BodyHandle, position: Vector2) {
        if let Some(body) = self.get_mut(handle) {
            body.position = position;
        }
    }

    pub fn set_velocity(&mut self, handle: BodyHandle, velocity: Vector2) {
        if let Some(body) = self.get_mut(handle) {
            body.velocity = velocity;
        }
    }

    /// Returns true if both bodies exist and overlap.
    pub fn overlap(&self, a: BodyHandle, b: BodyHandle) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(a), Some(b)) => contact(a, b).is_some(),
            _ => false,
        }
    }

    /// Number of live bodies.
    pub fn len(&self) -> usize {
        self.bodies.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advances the world by `dt` seconds: integrates moving bodies, then
    /// resolves solid contacts in registration order.
    pub fn step(&mut self, dt: f32) {
        for body in self.bodies.iter_mut().flatten() {
            if body.is_static {
                continue;
            }
            body.position = body.position.add(&body.velocity.scale(dt));
            body.velocity = body.velocity.scale((1.0 - body.damping).max(0.0));
        }

        for i in 0..self.bodies.len() {
            for j in (i + 1)..self.bodies.len() {
                self.resolve_pair(i, j);
            }
        }
    }

    fn resolve_pair(&mut self, i: usize, j: usize) {
        let (head, tail) = self.bodies.split_at_mut(j);
        let (Some(a), Some(b)) = (head[i].as_mut(), tail[0].as_mut()) else {
            return;
        };
        if a.is_sensor || b.is_sensor || (a.is_static && b.is_static) {
            return;
        }
        let Some(contact) = contact(a, b) else {
            return;
        };

        let inv_a = a.inverse_mass();
        let inv_b = b.inverse_mass();
        let inv_sum = inv_a + inv_b;
        if inv_sum == 0.0 {
            return;
        }

        let correction = (contact.depth - POSITION_SLOP).max(0.0) / inv_sum;
        a.position = a.position.sub(&contact.normal.scale(correction * inv_a));
        b.position = b.position.add(&contact.normal.scale(correction * inv_b));

        // Only bounce bodies that are approaching each other
        let relative = b.velocity.sub(&a.velocity).dot(&contact.normal);
        if relative >= 0.0 {
            return;
        }
        let restitution = a.restitution.max(b.restitution);
        let impulse = -(1.0 + restitution) * relative / inv_sum;
        a.velocity = a.velocity.sub(&contact.normal.scale(impulse * inv_a));
        b.velocity = b.velocity.add(&contact.normal.scale(impulse * inv_b));
    }
}
