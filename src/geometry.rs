//! Geometry primitives needed by the projection kernels.
//!
//! Coordinates are `[x, y, z]` triples. After transformation with the voxel-coordinate affine,
//! integer coordinates are voxel centers, and voxel `(i, j, k)` covers the unit cube
//! `[i - 0.5, i + 0.5] x [j - 0.5, j + 0.5] x [k - 0.5, k + 0.5]`.

use std::cmp::Ordering;

pub type Point3 = [f64; 3];

/// Distance below which a point is considered to lie on a clipping plane.
const PLANE_EPS: f64 = 1e-9;


pub fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn add(a: Point3, b: Point3) -> Point3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn scale(a: Point3, s: f64) -> Point3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Point3, b: Point3) -> Point3 {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

pub fn norm(a: Point3) -> f64 {
    dot(a, a).sqrt()
}

/// Signed volume of the tetrahedron (a, b, c, d). Positive if d lies on the side that
/// `(b - a) x (c - a)` points to.
pub fn tetrahedron_volume(a: Point3, b: Point3, c: Point3, d: Point3) -> f64 {
    dot(cross(sub(b, a), sub(c, a)), sub(d, a)) / 6.0
}

fn centroid(points: &[Point3]) -> Point3 {
    let sum = points.iter().fold([0.0; 3], |acc, &p| add(acc, p));
    scale(sum, 1.0 / points.len() as f64)
}


/// A 4x4 affine transformation matrix, applied to column vectors `[x, y, z, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub matrix: [[f64; 4]; 4],
}

impl Affine {

    pub fn identity() -> Affine {
        let mut matrix = [[0.0; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Affine { matrix }
    }

    /// Scaling followed by a translation.
    pub fn from_scale_translation(scaling: Point3, translation: Point3) -> Affine {
        let mut affine = Affine::identity();
        for i in 0..3 {
            affine.matrix[i][i] = scaling[i];
            affine.matrix[i][3] = translation[i];
        }
        affine
    }

    pub fn apply(&self, p: Point3) -> Point3 {
        let m = &self.matrix;
        let mut out = [0.0; 3];
        for (i, o) in out.iter_mut().enumerate() {
            *o = m[i][0] * p[0] + m[i][1] * p[1] + m[i][2] * p[2] + m[i][3];
        }
        out
    }

    /// Transform all points, e.g., surface vertices from surface space into voxel-index space.
    pub fn transform(&self, points: &[Point3]) -> Vec<Point3> {
        points.iter().map(|&p| self.apply(p)).collect()
    }
}


/// A closed polyhedron given as a triangulated surface with consistently oriented faces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polyhedron {
    pub points: Vec<Point3>,
    pub faces: Vec<[usize; 3]>,
}

impl Polyhedron {

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() || self.faces.is_empty()
    }

    /// Axis-aligned bounding box as (min, max) corners.
    pub fn bounds(&self) -> (Point3, Point3) {
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for p in &self.points {
            for a in 0..3 {
                lo[a] = lo[a].min(p[a]);
                hi[a] = hi[a].max(p[a]);
            }
        }
        (lo, hi)
    }

    /// Decompose the enclosed volume into signed tetrahedra spanned by the vertex centroid and
    /// each face. The signed volumes sum to the enclosed volume (negative for inward-facing
    /// orientation), and the signed indicator functions sum to the indicator of the interior.
    pub fn signed_tetrahedra(&self) -> Vec<(f64, [Point3; 4])> {
        if self.is_empty() {
            return Vec::new();
        }
        let origin = centroid(&self.points);
        self.faces
            .iter()
            .map(|f| {
                let (a, b, c) = (self.points[f[0]], self.points[f[1]], self.points[f[2]]);
                (tetrahedron_volume(origin, a, b, c), [origin, a, b, c])
            })
            .collect()
    }

    /// Enclosed volume, positive for outward-facing triangles.
    pub fn signed_volume(&self) -> f64 {
        self.signed_tetrahedra().iter().map(|(v, _)| v).sum()
    }

    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// A triangulated axis-aligned box with outward-facing triangles.
    pub fn cuboid(lo: Point3, hi: Point3) -> Polyhedron {
        let mut points = Vec::with_capacity(8);
        for &z in &[lo[2], hi[2]] {
            for &y in &[lo[1], hi[1]] {
                for &x in &[lo[0], hi[0]] {
                    points.push([x, y, z]);
                }
            }
        }
        // Corner index bits: 1 = x, 2 = y, 4 = z.
        let faces = vec![
            [0, 2, 1], [1, 2, 3], // z = lo
            [4, 5, 6], [5, 7, 6], // z = hi
            [0, 1, 4], [1, 5, 4], // y = lo
            [2, 6, 3], [3, 6, 7], // y = hi
            [0, 4, 2], [2, 4, 6], // x = lo
            [1, 3, 5], [3, 7, 5], // x = hi
        ];
        Polyhedron { points, faces }
    }
}


/// Lazy, one-shot sequence of the cortical ribbon polyhedra of all vertices.
///
/// The polyhedron of a vertex is its barycentric dual cell on the pial surface (edge midpoints
/// and face centroids around the vertex), connected to the same cell on the white surface.
/// Vertices on a mesh boundary, or with a non-manifold neighborhood, get an empty polyhedron.
pub struct RibbonPolyhedra<'a> {
    pial: &'a [Point3],
    white: &'a [Point3],
    polys: &'a [[usize; 3]],
    incident: Vec<Vec<usize>>,
    next: usize,
}

/// Enumerate the per-vertex ribbon polyhedra between two surfaces with shared connectivity.
pub fn ribbon_polyhedra<'a>(pial: &'a [Point3], white: &'a [Point3], polys: &'a [[usize; 3]]) -> RibbonPolyhedra<'a> {
    let mut incident = vec![Vec::new(); pial.len()];
    for (fidx, face) in polys.iter().enumerate() {
        for &v in face {
            if v < incident.len() {
                incident[v].push(fidx);
            }
        }
    }
    RibbonPolyhedra { pial, white, polys, incident, next: 0 }
}

impl<'a> RibbonPolyhedra<'a> {

    /// The neighbors of `vertex` ordered along the orientation of the surrounding faces.
    fn ring(&self, vertex: usize) -> Option<Vec<usize>> {
        let faces = &self.incident[vertex];
        if faces.len() < 3 {
            return None;
        }
        let mut successor: Vec<(usize, usize)> = Vec::with_capacity(faces.len());
        for &f in faces {
            let face = self.polys[f];
            let pos = face.iter().position(|&v| v == vertex)?;
            successor.push((face[(pos + 1) % 3], face[(pos + 2) % 3]));
        }
        let start = successor[0].0;
        let mut ring = Vec::with_capacity(faces.len());
        let mut cur = start;
        loop {
            ring.push(cur);
            let (_, nxt) = *successor.iter().find(|(from, _)| *from == cur)?;
            cur = nxt;
            if cur == start {
                break;
            }
            if ring.len() > faces.len() {
                return None;
            }
        }
        if ring.len() == faces.len() { Some(ring) } else { None }
    }

    fn polyhedron(&self, vertex: usize) -> Polyhedron {
        if vertex >= self.white.len() {
            return Polyhedron::default();
        }
        let ring = match self.ring(vertex) {
            Some(ring) if ring.iter().all(|&r| r < self.pial.len() && r < self.white.len()) => ring,
            _ => return Polyhedron::default(),
        };
        let k = ring.len();
        let nq = 2 * k;

        let dual = |surf: &[Point3]| -> Vec<Point3> {
            let center = surf[vertex];
            let mut cell = Vec::with_capacity(nq);
            for i in 0..k {
                let a = surf[ring[i]];
                let b = surf[ring[(i + 1) % k]];
                cell.push(scale(add(center, a), 0.5));
                cell.push(scale(add(add(center, a), b), 1.0 / 3.0));
            }
            cell
        };

        let mut points = Vec::with_capacity(2 * nq + 2);
        points.push(self.pial[vertex]);
        points.extend(dual(self.pial));
        points.push(self.white[vertex]);
        points.extend(dual(self.white));

        let top = |i: usize| 1 + (i % nq);
        let bottom = |i: usize| nq + 2 + (i % nq);
        let mut faces = Vec::with_capacity(4 * nq);
        for i in 0..nq {
            faces.push([0, top(i), top(i + 1)]);
            faces.push([nq + 1, bottom(i + 1), bottom(i)]);
            faces.push([top(i + 1), top(i), bottom(i)]);
            faces.push([top(i + 1), bottom(i), bottom(i + 1)]);
        }
        Polyhedron { points, faces }
    }
}

impl<'a> Iterator for RibbonPolyhedra<'a> {
    type Item = Polyhedron;

    fn next(&mut self) -> Option<Polyhedron> {
        if self.next >= self.pial.len() {
            return None;
        }
        let poly = self.polyhedron(self.next);
        self.next += 1;
        Some(poly)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.pial.len() - self.next;
        (remaining, Some(remaining))
    }
}


/// The convex hull of a point set, stored as its supporting half-spaces `n · p <= d`.
#[derive(Debug, Clone)]
pub struct ConvexHull {
    halfspaces: Vec<(Point3, f64)>,
}

impl ConvexHull {

    /// Build the hull incrementally: start from a tetrahedron of extreme points, then add each
    /// remaining point that lies outside, replacing the facets it can see by a cone of new
    /// facets over their horizon. Coplanar, collinear or coincident point sets give an empty
    /// hull.
    pub fn new(points: &[Point3]) -> ConvexHull {
        let simplex = match initial_simplex(points) {
            Some(simplex) => simplex,
            None => return ConvexHull { halfspaces: Vec::new() },
        };
        let inner = centroid(&[points[simplex[0]], points[simplex[1]], points[simplex[2]], points[simplex[3]]]);
        let [a, b, c, d] = simplex;
        let mut facets: Vec<Facet> = [[a, b, c], [a, b, d], [a, c, d], [b, c, d]]
            .iter()
            .filter_map(|&tri| Facet::outward(points, tri, inner))
            .collect();

        for (i, &p) in points.iter().enumerate() {
            if simplex.contains(&i) {
                continue;
            }
            let visible: Vec<bool> = facets.iter().map(|f| f.distance(p) > PLANE_EPS).collect();
            if !visible.iter().any(|&v| v) {
                continue;
            }
            let edges: Vec<(usize, usize)> = facets
                .iter()
                .zip(visible.iter())
                .filter(|(_, &v)| v)
                .flat_map(|(f, _)| f.edges())
                .collect();
            let shared = |u: usize, v: usize| edges.iter().filter(|&&(x, y)| (x, y) == (u, v) || (x, y) == (v, u)).count() > 1;
            let horizon: Vec<(usize, usize)> = edges.iter().copied().filter(|&(u, v)| !shared(u, v)).collect();

            let mut kept: Vec<Facet> = facets.into_iter().zip(visible.into_iter()).filter(|(_, v)| !v).map(|(f, _)| f).collect();
            kept.extend(horizon.into_iter().filter_map(|(u, v)| Facet::outward(points, [u, v, i], inner)));
            facets = kept;
        }

        let mut halfspaces: Vec<(Point3, f64)> = Vec::with_capacity(facets.len());
        for f in facets {
            let known = halfspaces.iter().any(|(hn, hd)| norm(sub(*hn, f.normal)) < PLANE_EPS && (hd - f.offset).abs() < PLANE_EPS);
            if !known {
                halfspaces.push((f.normal, f.offset));
            }
        }
        ConvexHull { halfspaces }
    }

    pub fn num_facets(&self) -> usize {
        self.halfspaces.len()
    }

    /// Whether the point lies inside or on the hull. Degenerate hulls contain nothing.
    pub fn contains(&self, p: Point3) -> bool {
        !self.halfspaces.is_empty() && self.halfspaces.iter().all(|&(n, d)| dot(n, p) - d <= PLANE_EPS)
    }
}


/// A triangular hull facet with its outward unit normal.
#[derive(Debug, Clone, Copy)]
struct Facet {
    vertices: [usize; 3],
    normal: Point3,
    offset: f64,
}

impl Facet {

    /// The facet through `tri`, oriented away from the interior point `inner`. `None` for a
    /// degenerate triangle.
    fn outward(points: &[Point3], tri: [usize; 3], inner: Point3) -> Option<Facet> {
        let [a, b, c] = tri;
        let normal = cross(sub(points[b], points[a]), sub(points[c], points[a]));
        let len = norm(normal);
        if len < PLANE_EPS {
            return None;
        }
        let normal = scale(normal, 1.0 / len);
        let offset = dot(normal, points[a]);
        if dot(normal, inner) > offset {
            Some(Facet { vertices: [a, c, b], normal: scale(normal, -1.0), offset: -offset })
        } else {
            Some(Facet { vertices: tri, normal, offset })
        }
    }

    fn distance(&self, p: Point3) -> f64 {
        dot(self.normal, p) - self.offset
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
    }
}

/// Indices of four affinely independent extreme points, or `None` if the points are coplanar.
fn initial_simplex(points: &[Point3]) -> Option<[usize; 4]> {
    let first = *points.first()?;
    let farthest = |score: &dyn Fn(Point3) -> f64| -> Option<(usize, f64)> {
        points.iter().map(|&p| score(p)).enumerate().max_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(Ordering::Equal))
    };

    let (b, dist) = farthest(&|p: Point3| norm(sub(p, first)))?;
    if dist < PLANE_EPS {
        return None;
    }
    let axis = sub(points[b], first);
    let (c, dist) = farthest(&|p: Point3| norm(cross(axis, sub(p, first))) / norm(axis))?;
    if dist < PLANE_EPS {
        return None;
    }
    let normal = cross(axis, sub(points[c], first));
    let normal = scale(normal, 1.0 / norm(normal));
    let (d, dist) = farthest(&|p: Point3| dot(normal, sub(p, first)).abs())?;
    if dist < PLANE_EPS {
        return None;
    }
    Some([0, b, c, d])
}


/// A convex polytope as a list of outward-oriented planar polygons, which can be cut down by
/// half-spaces.
#[derive(Debug, Clone, Default)]
pub struct ConvexCell {
    faces: Vec<Vec<Point3>>,
}

impl ConvexCell {

    /// The cell of a tetrahedron, in either orientation.
    pub fn tetrahedron(a: Point3, b: Point3, c: Point3, d: Point3) -> ConvexCell {
        let (b, c) = if tetrahedron_volume(a, b, c, d) < 0.0 { (c, b) } else { (b, c) };
        ConvexCell {
            faces: vec![vec![a, c, b], vec![a, b, d], vec![a, d, c], vec![b, c, d]],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    fn vertices(&self) -> impl Iterator<Item = &Point3> {
        self.faces.iter().flat_map(|f| f.iter())
    }

    /// Keep only the part of the cell in the half-space `normal · p <= offset`, closing the cut
    /// with a cap polygon on the plane.
    pub fn clip(&mut self, normal: Point3, offset: f64) {
        let dist = |p: &Point3| {
            let d = dot(normal, *p) - offset;
            if d.abs() < PLANE_EPS { 0.0 } else { d }
        };
        if !self.vertices().any(|p| dist(p) > 0.0) {
            return;
        }
        if !self.vertices().any(|p| dist(p) < 0.0) {
            self.faces.clear();
            return;
        }

        let mut faces = Vec::with_capacity(self.faces.len() + 1);
        let mut cap: Vec<Point3> = Vec::new();
        for face in &self.faces {
            let n = face.len();
            let mut out = Vec::with_capacity(n + 1);
            for i in 0..n {
                let cur = face[i];
                let nxt = face[(i + 1) % n];
                let (dc, dn) = (dist(&cur), dist(&nxt));
                if dc <= 0.0 {
                    out.push(cur);
                    if dc == 0.0 {
                        cap.push(cur);
                    }
                }
                if (dc < 0.0 && dn > 0.0) || (dc > 0.0 && dn < 0.0) {
                    let t = dc / (dc - dn);
                    let p = add(cur, scale(sub(nxt, cur), t));
                    out.push(p);
                    cap.push(p);
                }
            }
            if out.len() >= 3 {
                faces.push(out);
            }
        }
        let cap = order_on_plane(cap, normal);
        if cap.len() >= 3 {
            faces.push(cap);
        }
        self.faces = faces;
    }

    /// Intersect the cell with an axis-aligned box by clipping against its six faces.
    pub fn clip_to_box(&mut self, lo: Point3, hi: Point3) {
        for axis in 0..3 {
            let mut n = [0.0; 3];
            n[axis] = 1.0;
            self.clip(n, hi[axis]);
            if self.is_empty() {
                return;
            }
            n[axis] = -1.0;
            self.clip(n, -lo[axis]);
            if self.is_empty() {
                return;
            }
        }
    }

    pub fn volume(&self) -> f64 {
        let reference = match self.faces.first().and_then(|f| f.first()) {
            Some(&p) => p,
            None => return 0.0,
        };
        let mut total = 0.0;
        for face in &self.faces {
            for i in 1..face.len().saturating_sub(1) {
                total += tetrahedron_volume(reference, face[0], face[i], face[i + 1]);
            }
        }
        total
    }
}


/// Deduplicate coplanar points and order them counter-clockwise around `normal`.
fn order_on_plane(points: Vec<Point3>, normal: Point3) -> Vec<Point3> {
    let mut unique: Vec<Point3> = Vec::with_capacity(points.len());
    for p in points {
        if !unique.iter().any(|&q| norm(sub(p, q)) < PLANE_EPS) {
            unique.push(p);
        }
    }
    if unique.len() < 3 {
        return unique;
    }
    let helper = if normal[0].abs() < 0.9 { [1.0, 0.0, 0.0] } else { [0.0, 1.0, 0.0] };
    let u = cross(normal, helper);
    let u = scale(u, 1.0 / norm(u));
    let w = cross(normal, u);
    let center = centroid(&unique);
    let angle = |p: &Point3| {
        let d = sub(*p, center);
        dot(d, w).atan2(dot(d, u))
    };
    unique.sort_by(|a, b| angle(a).partial_cmp(&angle(b)).unwrap_or(Ordering::Equal));
    unique
}
