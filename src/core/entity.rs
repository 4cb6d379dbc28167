/// Render handles tracked by the object store
use serde::{Deserialize, Serialize};

use crate::core::topic::Rgb;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Tag { id: u32 },
    Image { width: u32, height: u32 },
    Cube,
}

/// What the renderer needs to draw one scene object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntity {
    pub kind: EntityKind,
    pub position: Vec3,
    /// Euler angles in degrees: pitch (x), yaw (y), roll (z).
    pub rotation: Vec3,
    pub scale: f32,
    pub color: Rgb,
    pub label: Option<String>,
}

impl SceneEntity {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: 1.0,
            color: Rgb::WHITE,
            label: None,
        }
    }

    pub fn tag(id: u32, size: f32) -> Self {
        Self {
            scale: size,
            label: Some(id.to_string()),
            ..Self::new(EntityKind::Tag { id })
        }
    }

    pub fn cube(color: Rgb) -> Self {
        Self {
            color,
            ..Self::new(EntityKind::Cube)
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Applies a row-major 3x3 local-to-world rotation matrix.
    pub fn set_rotation_matrix(&mut self, r: &[f32; 9]) {
        self.rotation = euler_from_matrix(r);
    }
}

/// Decomposes `R = Rz(roll) Ry(yaw) Rx(pitch)` into degrees.
pub fn euler_from_matrix(r: &[f32; 9]) -> Vec3 {
    let at = |row: usize, col: usize| r[row * 3 + col];
    let pitch = (-at(2, 1)).atan2(at(2, 2));
    let yaw = at(2, 0).atan2((at(2, 1).powi(2) + at(2, 2).powi(2)).sqrt());
    let roll = (-at(0, 1)).atan2(at(1, 1));
    Vec3::new(pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
}
