/// A point of the plane. `id` is an opaque handle the caller uses to find the
/// metadata of the point; equality only looks at the coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub id: u32,
    pub active: bool,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self::with_id(x, y, 0)
    }

    pub fn with_id(x: f64, y: f64, id: u32) -> Self {
        Point {
            x,
            y,
            id,
            active: true,
        }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

/// Axis-aligned rectangle, bounds included.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rectangle {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rectangle {
    pub const fn new(left_bottom: (f64, f64), right_top: (f64, f64)) -> Self {
        Rectangle {
            min_x: left_bottom.0,
            min_y: left_bottom.1,
            max_x: right_top.0,
            max_y: right_top.1,
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Splits the rectangle at `mid`, in the order NE, NW, SW, SE.
    pub fn split(&self, mid: &Point) -> [Rectangle; 4] {
        [
            Rectangle::new((mid.x, mid.y), (self.max_x, self.max_y)),
            Rectangle::new((self.min_x, mid.y), (mid.x, self.max_y)),
            Rectangle::new((self.min_x, self.min_y), (mid.x, mid.y)),
            Rectangle::new((mid.x, self.min_y), (self.max_x, mid.y)),
        ]
    }

    /// Smallest distance from `p` to a corner or to the centre of the rectangle.
    /// Used to order the best-first search.
    pub fn heuristic_distance(&self, p: &Point) -> f64 {
        let center = Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        );
        [
            center,
            Point::new(self.min_x, self.min_y),
            Point::new(self.max_x, self.min_y),
            Point::new(self.min_x, self.max_y),
            Point::new(self.max_x, self.max_y),
        ]
        .iter()
        .map(|corner| p.distance(corner))
        .fold(f64::INFINITY, f64::min)
    }
}
