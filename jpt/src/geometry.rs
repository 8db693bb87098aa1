use std::cmp;
use std::fmt;

// Integer helpers used by the B.5 - B.7 geometry.

/// Ceiling of `a / b` for `b > 0`.
pub fn ceil_div(a: u32, b: u32) -> u32 {
    ((a as u64 + b as u64 - 1) / b as u64) as u32
}

/// Ceiling of `a / 2^power`.
pub fn ceil_div_pow2(a: u32, power: u32) -> u32 {
    if power >= 32 {
        return (a != 0) as u32;
    }
    ((a as u64 + (1u64 << power) - 1) >> power) as u32
}

/// Floor of `a / 2^power`.
pub fn floor_div_pow2(a: u32, power: u32) -> u32 {
    if power >= 32 {
        0
    } else {
        a >> power
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Point {
        Point { x, y }
    }
}

/// Half-open rectangle `[x0, x1) x [y0, y1)`.
///
/// The same type is used for canvas (reference grid), band-relative and
/// buffer-relative extents; which space a value lives in is up to the owner.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub const fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Rect {
        Rect { x0, y0, x1, y1 }
    }

    pub const fn from_size(width: u32, height: u32) -> Rect {
        Rect::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x0, self.y0)
    }

    pub fn is_valid(&self) -> bool {
        self.x0 <= self.x1 && self.y0 <= self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x0 && point.x < self.x1 && point.y >= self.y0 && point.y < self.y1
    }

    /// Intersection of two rectangles. Disjoint inputs give an empty rectangle
    /// anchored at the clamped corner rather than an inverted one.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x0 = cmp::max(self.x0, other.x0);
        let y0 = cmp::max(self.y0, other.y0);
        let x1 = cmp::min(self.x1, other.x1);
        let y1 = cmp::min(self.y1, other.y1);
        Rect::new(x0, y0, cmp::max(x0, x1), cmp::max(y0, y1))
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn grow(&self, boundary: u32) -> Rect {
        self.grow_xy(boundary, boundary)
    }

    pub fn grow_xy(&self, x: u32, y: u32) -> Rect {
        Rect::new(
            self.x0.saturating_sub(x),
            self.y0.saturating_sub(y),
            self.x1.saturating_add(x),
            self.y1.saturating_add(y),
        )
    }

    /// Translate by a signed offset, saturating at the origin.
    pub fn pan(&self, x: i64, y: i64) -> Rect {
        let shift = |value: u32, by: i64| -> u32 {
            (value as i64 + by).clamp(0, u32::MAX as i64) as u32
        };
        Rect::new(
            shift(self.x0, x),
            shift(self.y0, y),
            shift(self.x1, x),
            shift(self.y1, y),
        )
    }

    /// Restrict to `[0, width) x [0, height)`.
    pub fn clip(&self, width: u32, height: u32) -> Rect {
        self.intersection(&Rect::from_size(width, height))
    }

    pub fn ceil_div(&self, dx: u32, dy: u32) -> Rect {
        Rect::new(
            ceil_div(self.x0, dx),
            ceil_div(self.y0, dy),
            ceil_div(self.x1, dx),
            ceil_div(self.y1, dy),
        )
    }

    pub fn ceil_div_pow2(&self, power: u32) -> Rect {
        Rect::new(
            ceil_div_pow2(self.x0, power),
            ceil_div_pow2(self.y0, power),
            ceil_div_pow2(self.x1, power),
            ceil_div_pow2(self.y1, power),
        )
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({},{},{},{}) [{}x{}]",
            self.x0,
            self.y0,
            self.x1,
            self.y1,
            self.width(),
            self.height()
        )
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_div_pow2() {
        assert_eq!(ceil_div_pow2(0, 3), 0);
        assert_eq!(ceil_div_pow2(1, 3), 1);
        assert_eq!(ceil_div_pow2(8, 3), 1);
        assert_eq!(ceil_div_pow2(9, 3), 2);
        assert_eq!(ceil_div_pow2(u32::MAX, 1), 1 << 31);
        assert_eq!(floor_div_pow2(9, 3), 1);
        assert_eq!(ceil_div(7, 2), 4);
    }

    #[test]
    fn test_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 2, 20, 8);
        assert_eq!(a.intersection(&b), Rect::new(5, 2, 10, 8));

        let c = Rect::new(12, 12, 14, 14);
        let disjoint = a.intersection(&c);
        assert!(disjoint.is_empty());
        assert!(disjoint.is_valid());
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_grow_and_pan() {
        let r = Rect::new(1, 4, 10, 10);
        assert_eq!(r.grow(2), Rect::new(0, 2, 12, 12));
        assert_eq!(r.pan(-1, -4), Rect::new(0, 0, 9, 6));
        assert_eq!(r.pan(-5, 0), Rect::new(0, 4, 5, 10));
        assert_eq!(r.clip(8, 8), Rect::new(1, 4, 8, 8));
    }

    #[test]
    fn test_ceil_div_rect() {
        let r = Rect::new(3, 3, 17, 9);
        assert_eq!(r.ceil_div_pow2(1), Rect::new(2, 2, 9, 5));
        assert_eq!(r.ceil_div(2, 3), Rect::new(2, 1, 9, 3));
        assert_eq!(r.width(), 14);
        assert_eq!(r.area(), 84);
    }
}
