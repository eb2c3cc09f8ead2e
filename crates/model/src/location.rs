#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub u32);

/// Exact position in layer coordinates. One unit is one layer cell.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    layer: LayerId,
    position: Point,
}

impl Location {
    pub fn new(layer: LayerId, position: Point) -> Self {
        Self { layer, position }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn set_layer(&mut self, layer: LayerId) {
        self.layer = layer;
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn set_position(&mut self, position: Point) {
        self.position = position;
    }

    /// Distance between the two positions; the layer is ignored.
    pub fn distance_to(&self, other: &Location) -> f64 {
        self.position.distance_to(other.position)
    }
}
