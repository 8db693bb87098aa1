use log::trace;
use std::collections::HashMap;
use std::fmt;

use crate::geometry::{ceil_div_pow2, floor_div_pow2, Point, Rect};

// Subband orientation, in the order the standard lists them. The index
// doubles as the (x, y) phase of the band: bit 0 is horizontal high-pass,
// bit 1 vertical high-pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BandOrientation {
    LL = 0,
    HL = 1,
    LH = 2,
    HH = 3,
}

impl BandOrientation {
    pub const HIGH_PASS: [BandOrientation; 3] =
        [BandOrientation::HL, BandOrientation::LH, BandOrientation::HH];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<BandOrientation> {
        match index {
            0 => Some(BandOrientation::LL),
            1 => Some(BandOrientation::HL),
            2 => Some(BandOrientation::LH),
            3 => Some(BandOrientation::HH),
            _ => None,
        }
    }

    /// Horizontal phase (xob in B-15).
    pub fn x_phase(self) -> u32 {
        self as u32 & 1
    }

    /// Vertical phase (yob in B-15).
    pub fn y_phase(self) -> u32 {
        self as u32 >> 1
    }
}

impl fmt::Display for BandOrientation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A precinct's share of one subband and the code-blocks it holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Precinct {
    index: u64,
    bounds: Rect,
    code_block_exponents: Point,
    code_block_grid_start: Point,
    code_block_grid_width: u32,
    code_block_grid_height: u32,
}

impl Precinct {
    fn new(index: u64, bounds: Rect, code_block_exponents: Point) -> Precinct {
        let (xcb, ycb) = (code_block_exponents.x, code_block_exponents.y);
        let (grid_width, grid_height) = if bounds.is_empty() {
            (0, 0)
        } else {
            (
                ceil_div_pow2(bounds.x1, xcb) - floor_div_pow2(bounds.x0, xcb),
                ceil_div_pow2(bounds.y1, ycb) - floor_div_pow2(bounds.y0, ycb),
            )
        };
        Precinct {
            index,
            bounds,
            code_block_exponents,
            code_block_grid_start: Point::new(
                floor_div_pow2(bounds.x0, xcb) << xcb,
                floor_div_pow2(bounds.y0, ycb) << ycb,
            ),
            code_block_grid_width: grid_width,
            code_block_grid_height: grid_height,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Canvas extent of the precinct inside its band.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn code_block_grid_width(&self) -> u32 {
        self.code_block_grid_width
    }

    pub fn code_block_grid_height(&self) -> u32 {
        self.code_block_grid_height
    }

    pub fn no_code_blocks(&self) -> u64 {
        self.code_block_grid_width as u64 * self.code_block_grid_height as u64
    }

    /// Canvas extent of code-block `index` (raster order within the
    /// precinct), clipped to the precinct.
    pub fn code_block_bounds(&self, index: u64) -> Option<Rect> {
        if index >= self.no_code_blocks() {
            return None;
        }
        let x = (index % self.code_block_grid_width as u64) as u32;
        let y = (index / self.code_block_grid_width as u64) as u32;
        let x0 = self.code_block_grid_start.x as u64 + ((x as u64) << self.code_block_exponents.x);
        let y0 = self.code_block_grid_start.y as u64 + ((y as u64) << self.code_block_exponents.y);
        let x1 = x0 + (1u64 << self.code_block_exponents.x);
        let y1 = y0 + (1u64 << self.code_block_exponents.y);
        Some(clamped_rect(x0, y0, x1, y1).intersection(&self.bounds))
    }

    pub fn code_blocks(&self) -> impl Iterator<Item = Rect> + '_ {
        (0..self.no_code_blocks()).filter_map(move |index| self.code_block_bounds(index))
    }
}

fn clamped_rect(x0: u64, y0: u64, x1: u64, y1: u64) -> Rect {
    let clamp = |value: u64| value.min(u32::MAX as u64) as u32;
    Rect::new(clamp(x0), clamp(y0), clamp(x1), clamp(y1))
}

/// One subband of one resolution, with its lazily built precincts.
#[derive(Clone, Debug)]
pub struct Subband {
    orientation: BandOrientation,
    resolution: u8,
    bounds: Rect,

    // Top-left of the precinct grid projected into this band, and the
    // precinct size in band samples.
    precinct_start: Point,
    precinct_exponents: Point,
    precinct_grid_width: u32,
    no_precincts: u64,
    code_block_exponents: Point,

    // Global precinct index -> slot in `precincts`.
    precinct_map: HashMap<u64, usize>,
    precincts: Vec<Precinct>,
}

impl Subband {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orientation: BandOrientation,
        resolution: u8,
        bounds: Rect,
        precinct_start: Point,
        precinct_exponents: Point,
        precinct_grid_width: u32,
        no_precincts: u64,
        code_block_exponents: Point,
    ) -> Subband {
        Subband {
            orientation,
            resolution,
            bounds,
            precinct_start,
            precinct_exponents,
            precinct_grid_width,
            no_precincts,
            code_block_exponents,
            precinct_map: HashMap::new(),
            precincts: Vec::new(),
        }
    }

    pub fn orientation(&self) -> BandOrientation {
        self.orientation
    }

    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn precinct_exponents(&self) -> Point {
        self.precinct_exponents
    }

    pub fn code_block_exponents(&self) -> Point {
        self.code_block_exponents
    }

    pub fn no_precincts(&self) -> u64 {
        self.no_precincts
    }

    /// Canvas bounds of precinct `precinct_index` within this band: the grid
    /// cell at (index mod grid width, index div grid width) clipped to the
    /// band. Empty when the cell misses the band.
    pub fn generate_precinct_bounds(&self, precinct_index: u64) -> Rect {
        if self.precinct_grid_width == 0 {
            return Rect::new(self.bounds.x0, self.bounds.y0, self.bounds.x0, self.bounds.y0);
        }
        let x = precinct_index % self.precinct_grid_width as u64;
        let y = precinct_index / self.precinct_grid_width as u64;
        let x0 = self.precinct_start.x as u64 + (x << self.precinct_exponents.x);
        let y0 = self.precinct_start.y as u64 + (y << self.precinct_exponents.y);
        let x1 = x0 + (1u64 << self.precinct_exponents.x);
        let y1 = y0 + (1u64 << self.precinct_exponents.y);
        clamped_rect(x0, y0, x1, y1).intersection(&self.bounds)
    }

    /// Existing precinct for the index, or a new one. Repeated calls return
    /// the same precinct. `None` for an index outside the precinct grid.
    pub fn create_precinct(&mut self, precinct_index: u64) -> Option<&mut Precinct> {
        if precinct_index >= self.no_precincts {
            return None;
        }
        let slot = match self.precinct_map.get(&precinct_index) {
            Some(&slot) => slot,
            None => {
                let bounds = self.generate_precinct_bounds(precinct_index);
                trace!(
                    "resolution {} band {}: precinct {} at {}",
                    self.resolution,
                    self.orientation,
                    precinct_index,
                    bounds
                );
                self.precincts
                    .push(Precinct::new(precinct_index, bounds, self.code_block_exponents));
                let slot = self.precincts.len() - 1;
                self.precinct_map.insert(precinct_index, slot);
                slot
            }
        };
        self.precincts.get_mut(slot)
    }

    pub fn try_get_precinct(&self, precinct_index: u64) -> Option<&Precinct> {
        self.precinct_map
            .get(&precinct_index)
            .and_then(|&slot| self.precincts.get(slot))
    }

    /// Precincts created so far, in creation order.
    pub fn precincts(&self) -> &[Precinct] {
        &self.precincts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band() -> Subband {
        // 40 x 24 band, 16 x 16 precincts starting at the origin, 8 x 8 code-blocks
        Subband::new(
            BandOrientation::HL,
            1,
            Rect::new(4, 2, 44, 26),
            Point::new(0, 0),
            Point::new(4, 4),
            3,
            6,
            Point::new(3, 3),
        )
    }

    #[test]
    fn test_precinct_bounds() {
        let band = band();
        assert_eq!(band.generate_precinct_bounds(0), Rect::new(4, 2, 16, 16));
        assert_eq!(band.generate_precinct_bounds(2), Rect::new(32, 2, 44, 16));
        assert_eq!(band.generate_precinct_bounds(4), Rect::new(16, 16, 32, 26));
    }

    #[test]
    fn test_create_precinct_is_idempotent() {
        let mut band = band();
        assert!(band.try_get_precinct(4).is_none());
        let first = band.create_precinct(4).unwrap().bounds();
        let second = band.create_precinct(4).unwrap().bounds();
        assert_eq!(first, second);
        assert_eq!(band.precincts().len(), 1);
        assert_eq!(band.try_get_precinct(4).unwrap().index(), 4);
        assert!(band.create_precinct(6).is_none());
    }

    #[test]
    fn test_code_blocks_cover_precinct() {
        let mut band = band();
        let precinct = band.create_precinct(0).unwrap();
        // x: 4..16 spans code-block columns 0 and 1, y: 2..16 rows 0 and 1
        assert_eq!(precinct.code_block_grid_width(), 2);
        assert_eq!(precinct.code_block_grid_height(), 2);
        let blocks: Vec<Rect> = precinct.code_blocks().collect();
        assert_eq!(blocks[0], Rect::new(4, 2, 8, 8));
        assert_eq!(blocks[3], Rect::new(8, 8, 16, 16));
        let area: u64 = blocks.iter().map(Rect::area).sum();
        assert_eq!(area, precinct.bounds().area());
    }

    #[test]
    fn test_orientation_phases() {
        assert_eq!(BandOrientation::LL.x_phase(), 0);
        assert_eq!(BandOrientation::HL.x_phase(), 1);
        assert_eq!(BandOrientation::LH.y_phase(), 1);
        assert_eq!(BandOrientation::HH.x_phase() + BandOrientation::HH.y_phase(), 2);
        assert_eq!(BandOrientation::from_index(2), Some(BandOrientation::LH));
        assert_eq!(BandOrientation::from_index(4), None);
    }
}
