use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Index, Mul, Sub};

#[cfg(feature = "json_export")]
use json::JsonValue;

/// Direction in parametric space
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParaDir {
    /// x-aligned
    U,
    /// y-aligned
    V,
}

#[cfg(feature = "json_export")]
impl From<ParaDir> for JsonValue {
    fn from(dir: ParaDir) -> Self {
        match dir {
            ParaDir::U => JsonValue::from("U"),
            ParaDir::V => JsonValue::from("V"),
        }
    }
}

/// A location in 2D real space. 1D problems use the `x` coordinate only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// A point on the real line
    pub const fn on_line(x: f64) -> Self {
        Self { x, y: 0.0 }
    }

    /// The midpoint between two points
    pub fn between(p0: &Self, p1: &Self) -> Self {
        Self {
            x: (p0.x + p1.x) / 2.0,
            y: (p0.y + p1.y) / 2.0,
        }
    }

    pub fn dist(&self, other: &Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Edges whose angle relative to the x-axis is below 45° are u-directed
    pub fn orientation_with(&self, other: &Self) -> ParaDir {
        if (other.x - self.x).abs() >= (other.y - self.y).abs() {
            ParaDir::U
        } else {
            ParaDir::V
        }
    }

    pub fn x_order(&self, other: &Self) -> Ordering {
        self.x.partial_cmp(&other.x).unwrap_or(Ordering::Equal)
    }

    pub fn y_order(&self, other: &Self) -> Ordering {
        self.y.partial_cmp(&other.y).unwrap_or(Ordering::Equal)
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        json::array![self.x, self.y]
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.x, self.y)
    }
}

/// A 2D vector (gradients of scalar solutions)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct V2D {
    inner: [f64; 2],
}

impl V2D {
    pub const fn from([x, y]: [f64; 2]) -> Self {
        Self { inner: [x, y] }
    }

    pub const fn zero() -> Self {
        Self { inner: [0.0; 2] }
    }

    pub fn x(&self) -> f64 {
        self.inner[0]
    }

    pub fn y(&self) -> f64 {
        self.inner[1]
    }

    pub fn dot_with(&self, other: &Self) -> f64 {
        self[0] * other[0] + self[1] * other[1]
    }

    pub fn norm_squared(&self) -> f64 {
        self.dot_with(self)
    }
}

impl Default for V2D {
    fn default() -> Self {
        Self::zero()
    }
}

impl Index<usize> for V2D {
    type Output = f64;
    fn index(&self, index: usize) -> &Self::Output {
        &self.inner[index]
    }
}

impl Add for V2D {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            inner: [self[0] + other[0], self[1] + other[1]],
        }
    }
}

impl Sub for V2D {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self {
            inner: [self[0] - other[0], self[1] - other[1]],
        }
    }
}

impl Mul<f64> for V2D {
    type Output = Self;
    fn mul(self, coefficient: f64) -> Self {
        Self {
            inner: [self[0] * coefficient, self[1] * coefficient],
        }
    }
}
