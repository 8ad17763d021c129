// Minimal 3D geometry for portal culling.
//
// Points are `[f32; 3]` in world units. Slot `c` occupies the cube of edge
// `block_size` centered at `c * block_size`. A `Frustum` is an arbitrary set
// of planes whose positive half-spaces are "inside"; box tests are the usual
// conservative positive-vertex test, so a box may be reported visible when it
// is not, never the reverse.
//
// See also: `rooms.rs`, whose visibility traversal narrows a frustum at every
// portal it passes through.

use crate::types::{Coord, Direction};

pub type Vec3 = [f32; 3];

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: Vec3, s: f32) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn normalize(a: Vec3) -> Option<Vec3> {
    let len = dot(a, a).sqrt();
    (len > 1e-6).then(|| scale(a, 1.0 / len))
}

/// World-space center of the slot at `coord`.
pub fn cell_center(coord: Coord, block_size: f32) -> Vec3 {
    [
        coord.x as f32 * block_size,
        coord.y as f32 * block_size,
        coord.z as f32 * block_size,
    ]
}

/// The slot whose cube contains `point`.
pub fn cell_at(point: Vec3, block_size: f32) -> Coord {
    Coord::new(
        (point[0] / block_size).round() as i32,
        (point[1] / block_size).round() as i32,
        (point[2] / block_size).round() as i32,
    )
}

fn direction_vector(direction: Direction) -> Vec3 {
    let v = direction.vector();
    [v.x as f32, v.y as f32, v.z as f32]
}

// ---------------------------------------------------------------------------
// Boxes and planes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// The box covering slots `min ..= max`.
    pub fn for_cells(min: Coord, max: Coord, block_size: f32) -> Self {
        let half = block_size * 0.5;
        let lo = cell_center(min, block_size);
        let hi = cell_center(max, block_size);
        Self {
            min: [lo[0] - half, lo[1] - half, lo[2] - half],
            max: [hi[0] + half, hi[1] + half, hi[2] + half],
        }
    }

    pub fn center(&self) -> Vec3 {
        scale(add(self.min, self.max), 0.5)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }
}

/// Points with `dot(normal, p) + offset >= 0` are inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub offset: f32,
}

impl Plane {
    pub fn new(normal: Vec3, through: Vec3) -> Self {
        Self {
            normal,
            offset: -dot(normal, through),
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        dot(self.normal, point) + self.offset
    }

    /// Plane through three points, oriented so `inside` is on the positive
    /// side. `None` when the points are (nearly) collinear.
    pub fn through(a: Vec3, b: Vec3, c: Vec3, inside: Vec3) -> Option<Self> {
        let normal = normalize(cross(sub(b, a), sub(c, a)))?;
        let plane = Plane::new(normal, a);
        if plane.signed_distance(inside) >= 0.0 {
            Some(plane)
        } else {
            Some(Plane::new(scale(normal, -1.0), a))
        }
    }

    /// Whether any part of `aabb` is on the positive side.
    pub fn touches(&self, aabb: &Aabb) -> bool {
        let positive = std::array::from_fn(|i| {
            if self.normal[i] >= 0.0 {
                aabb.max[i]
            } else {
                aabb.min[i]
            }
        });
        self.signed_distance(positive) >= 0.0
    }
}

// ---------------------------------------------------------------------------
// Portal quads
// ---------------------------------------------------------------------------

/// The square face between two adjacent slots.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceQuad {
    pub center: Vec3,
    /// Corners in winding order.
    pub corners: [Vec3; 4],
    pub bounds: Aabb,
}

impl FaceQuad {
    /// The face of slot `coord` toward `direction`.
    pub fn new(coord: Coord, direction: Direction, block_size: f32) -> Self {
        let half = block_size * 0.5;
        let normal = direction_vector(direction);
        let center = add(cell_center(coord, block_size), scale(normal, half));
        let axis = direction.axis();
        let mut u = [0.0; 3];
        let mut v = [0.0; 3];
        u[(axis + 1) % 3] = half;
        v[(axis + 2) % 3] = half;
        let corner = |su: f32, sv: f32| add(center, add(scale(u, su), scale(v, sv)));
        let corners = [
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
        ];
        let mut min = center;
        let mut max = center;
        for c in &corners {
            for i in 0..3 {
                min[i] = min[i].min(c[i]);
                max[i] = max[i].max(c[i]);
            }
        }
        Self {
            center,
            corners,
            bounds: Aabb { min, max },
        }
    }
}

// ---------------------------------------------------------------------------
// Frustum
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frustum {
    pub planes: Vec<Plane>,
}

impl Frustum {
    /// A frustum with no planes: everything is inside.
    pub fn everything() -> Self {
        Self::default()
    }

    /// A symmetric perspective view from `eye` looking along `forward`.
    /// Returns `None` for a degenerate basis.
    pub fn perspective(
        eye: Vec3,
        forward: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        far: f32,
    ) -> Option<Self> {
        let forward = normalize(forward)?;
        let right = normalize(cross(forward, up))?;
        let up = cross(right, forward);
        let tan_y = (fov_y * 0.5).tan();
        let tan_x = tan_y * aspect;
        let side = |n: Vec3| normalize(n).map(|n| Plane::new(n, eye));
        let planes = vec![
            side(add(right, scale(forward, tan_x)))?,
            side(add(scale(right, -1.0), scale(forward, tan_x)))?,
            side(add(up, scale(forward, tan_y)))?,
            side(add(scale(up, -1.0), scale(forward, tan_y)))?,
            Plane::new(forward, eye),
            Plane::new(scale(forward, -1.0), add(eye, scale(forward, far))),
        ];
        Some(Self { planes })
    }

    pub fn intersects(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| plane.touches(aabb))
    }

    /// Restrict to what `eye` can see through `portal`, looking in
    /// `travel`: adds a plane through the eye and each portal edge, plus
    /// the portal's own plane so nothing on the near side survives.
    pub fn narrow_to_portal(&self, eye: Vec3, portal: &FaceQuad, travel: Direction) -> Self {
        let mut planes = self.planes.clone();
        let beyond = add(portal.center, direction_vector(travel));
        for i in 0..4 {
            let a = portal.corners[i];
            let b = portal.corners[(i + 1) % 4];
            if let Some(plane) = Plane::through(eye, a, b, beyond) {
                planes.push(plane);
            }
        }
        planes.push(Plane::new(direction_vector(travel), portal.center));
        Self { planes }
    }
}
