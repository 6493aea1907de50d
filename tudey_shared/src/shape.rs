//! Collision shapes.
//!
//! Actors carry a local-space `Shape` in their config. Advancers cache the
//! world-space `TransformedShape` and recompute it whenever the pose changes.
//! Only the queries the environment needs are implemented: bounds,
//! intersection and penetration against axis-aligned boxes (tiles).

use serde::{Deserialize, Serialize};

use crate::math::{Rect, Vec2};

/// Local-space collision shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Point,
    Circle { radius: f32 },
    /// Axis-aligned rectangle; rotation does not turn it.
    Rect { half_width: f32, half_height: f32 },
}

impl Default for Shape {
    fn default() -> Self {
        Shape::Circle { radius: 0.5 }
    }
}

impl Shape {
    /// Places the shape at a pose.
    pub fn transform(&self, translation: Vec2, rotation: f32) -> TransformedShape {
        TransformedShape {
            shape: *self,
            center: translation,
            rotation,
        }
    }
}

/// World-space shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformedShape {
    shape: Shape,
    center: Vec2,
    rotation: f32,
}

impl TransformedShape {
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    /// Same shape moved by `offset`.
    pub fn translated(&self, offset: Vec2) -> TransformedShape {
        TransformedShape {
            center: self.center + offset,
            ..*self
        }
    }

    pub fn bounds(&self) -> Rect {
        let half = match self.shape {
            Shape::Point => Vec2::ZERO,
            Shape::Circle { radius } => Vec2::new(radius, radius),
            Shape::Rect {
                half_width,
                half_height,
            } => Vec2::new(half_width, half_height),
        };
        Rect::new(self.center - half, self.center + half)
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        self.penetration(rect).is_some()
    }

    /// Minimum translation that moves this shape out of `rect`, or `None` if
    /// the two do not overlap.
    pub fn penetration(&self, rect: &Rect) -> Option<Vec2> {
        match self.shape {
            Shape::Point => {
                if rect.contains(self.center) {
                    Some(push_out_of(rect, self.center, 0.0))
                } else {
                    None
                }
            }
            Shape::Circle { radius } => {
                let closest = rect.clamp_point(self.center);
                let offset = self.center - closest;
                let dist_sq = offset.len_sq();
                if dist_sq > 0.0 {
                    if dist_sq >= radius * radius {
                        return None;
                    }
                    let dist = dist_sq.sqrt();
                    Some(offset * ((radius - dist) / dist))
                } else {
                    // Center is inside the box.
                    Some(push_out_of(rect, self.center, radius))
                }
            }
            Shape::Rect { .. } => {
                let bounds = self.bounds();
                if !bounds.intersects(rect) {
                    return None;
                }
                let overlap_x = bounds.max.x.min(rect.max.x) - bounds.min.x.max(rect.min.x);
                let overlap_y = bounds.max.y.min(rect.max.y) - bounds.min.y.max(rect.min.y);
                let toward = self.center - rect.center();
                if overlap_x < overlap_y {
                    Some(Vec2::new(overlap_x.copysign(toward.x), 0.0))
                } else {
                    Some(Vec2::new(0.0, overlap_y.copysign(toward.y)))
                }
            }
        }
    }
}

/// Push for a point inside `rect` to the nearest edge, plus `margin`.
fn push_out_of(rect: &Rect, point: Vec2, margin: f32) -> Vec2 {
    let left = point.x - rect.min.x;
    let right = rect.max.x - point.x;
    let bottom = point.y - rect.min.y;
    let top = rect.max.y - point.y;
    let nearest = left.min(right).min(bottom).min(top);
    if nearest == left {
        Vec2::new(-(left + margin), 0.0)
    } else if nearest == right {
        Vec2::new(right + margin, 0.0)
    } else if nearest == bottom {
        Vec2::new(0.0, -(bottom + margin))
    } else {
        Vec2::new(0.0, top + margin)
    }
}
