// B.12 - Progression order
//
// Enumerates the packets of a tile in the nesting order of one of the five
// progressions, with an inclusion map guaranteeing each (component,
// resolution, precinct, layer) is produced once per tile.
use bitvec::prelude::*;
use log::{debug, trace};
use std::fmt;

use crate::error::{CodestreamError, Result};
use crate::geometry::Rect;
use crate::progression::{ProgressionBounds, ProgressionOrder, TilePartDivider};

// PPx, PPy upper bound (A.6.1)
const MAX_PRECINCT_EXPONENT: u32 = 15;
// NL upper bound (A.6.1), plus one
const MAX_RESOLUTIONS: usize = 33;

/// Precinct layout of one resolution as the iterator needs it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PiResolution {
    pub precinct_width_exponent: u32,
    pub precinct_height_exponent: u32,
    pub precinct_grid_width: u32,
    pub precinct_grid_height: u32,
}

impl PiResolution {
    pub fn no_precincts(&self) -> u64 {
        self.precinct_grid_width as u64 * self.precinct_grid_height as u64
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PiComponent {
    // XRsiz, YRsiz
    pub dx: u32,
    pub dy: u32,
    pub resolutions: Vec<PiResolution>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIterParams {
    // Tile bounds on the reference grid.
    pub tile_bounds: Rect,
    pub components: Vec<PiComponent>,
    pub no_layers: u16,
    pub progression_order: ProgressionOrder,
    pub tile_part_divider: Option<TilePartDivider>,
}

/// Identifies one packet of a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketCoordinate {
    pub component: u16,
    pub resolution: u8,
    pub precinct: u64,
    pub layer: u16,
}

impl fmt::Display for PacketCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "c={} r={} p={} l={}",
            self.component, self.resolution, self.precinct, self.layer
        )
    }
}

/// Packets already produced for a tile.
///
/// Layer → resolution → one bit per (component, precinct), the precinct
/// stride of a resolution being its largest precinct count over all
/// components. A (layer, resolution) bitmap is allocated the first time it
/// is touched.
#[derive(Clone, Debug, Default)]
pub struct IncludeTracker {
    no_components: u64,
    strides: Vec<u64>,
    layers: Vec<Vec<Option<BitVec<u8, Lsb0>>>>,
}

impl IncludeTracker {
    pub fn new(no_components: u16, strides: Vec<u64>) -> IncludeTracker {
        IncludeTracker {
            no_components: no_components as u64,
            strides,
            layers: Vec::new(),
        }
    }

    fn index(&self, coordinate: &PacketCoordinate) -> Option<(usize, usize)> {
        let stride = *self.strides.get(coordinate.resolution as usize)?;
        if coordinate.component as u64 >= self.no_components || coordinate.precinct >= stride {
            return None;
        }
        let bit = coordinate.component as u64 * stride + coordinate.precinct;
        Some((bit as usize, (self.no_components * stride) as usize))
    }

    /// Marks a packet as included. `true` only the first time a coordinate
    /// is marked; a coordinate outside the tile is never included.
    pub fn mark_and_test(&mut self, coordinate: &PacketCoordinate) -> bool {
        let (bit, len) = match self.index(coordinate) {
            Some(index) => index,
            None => return false,
        };
        let layer = coordinate.layer as usize;
        if self.layers.len() <= layer {
            self.layers.resize_with(layer + 1, Vec::new);
        }
        let resolutions = &mut self.layers[layer];
        if resolutions.is_empty() {
            resolutions.resize_with(self.strides.len(), || None);
        }
        let bits = resolutions[coordinate.resolution as usize]
            .get_or_insert_with(|| BitVec::repeat(false, len));
        if bits[bit] {
            false
        } else {
            bits.set(bit, true);
            true
        }
    }

    pub fn is_included(&self, coordinate: &PacketCoordinate) -> bool {
        let (bit, _) = match self.index(coordinate) {
            Some(index) => index,
            None => return false,
        };
        self.layers
            .get(coordinate.layer as usize)
            .and_then(|resolutions| resolutions.get(coordinate.resolution as usize))
            .and_then(Option::as_ref)
            .map_or(false, |bits| bits[bit])
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }

    /// Number of (layer, resolution) bitmaps allocated so far.
    pub fn no_allocated(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|resolutions| resolutions.iter())
            .filter(|bits| bits.is_some())
            .count()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Cursor {
    layer: u16,
    resolution: u8,
    component: u16,
    precinct: u64,
    x: u64,
    y: u64,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

// Next multiple of `step` strictly after `value`.
fn next_position(value: u64, step: u64) -> u64 {
    value + step - value % step
}

/// Packet iterator of one tile.
///
/// `advance` resumes the nested loops of the progression where the previous
/// call left them. The inclusion map persists across tile-parts and
/// progression changes of the tile, and is cleared by `reset`.
#[derive(Clone, Debug)]
pub struct PacketIter {
    params: PacketIterParams,
    order: ProgressionOrder,
    full_bounds: ProgressionBounds,
    base_bounds: ProgressionBounds,
    bounds: ProgressionBounds,
    include: IncludeTracker,
    cursor: Cursor,
    steps: Option<(u64, u64)>,
    started: bool,
    finished: bool,
    current: Option<PacketCoordinate>,
}

impl PacketIter {
    pub fn new(params: PacketIterParams) -> Result<PacketIter> {
        let full_bounds = Self::validate(&params)?;
        Self::with_bounds(params, full_bounds)
    }

    /// Iterator restricted to `bounds`, such as those of a POC record.
    pub fn with_bounds(params: PacketIterParams, bounds: ProgressionBounds) -> Result<PacketIter> {
        let full_bounds = Self::validate(&params)?;
        let max_resolutions = full_bounds.resolutions.end as usize;
        let no_components = params.components.len() as u16;

        let strides: Vec<u64> = (0..max_resolutions)
            .map(|r| {
                params
                    .components
                    .iter()
                    .filter_map(|component| component.resolutions.get(r))
                    .map(PiResolution::no_precincts)
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        for &stride in &strides {
            let bits = stride
                .checked_mul(no_components as u64)
                .filter(|&bits| bits <= isize::MAX as u64)
                .ok_or(CodestreamError::Allocation {
                    requested: usize::MAX,
                })?;
            trace!("inclusion stride {} ({} bits)", stride, bits);
        }

        debug!(
            "packet iterator: {} order, tile {}, {} components, {} resolutions, {} layers",
            params.progression_order,
            params.tile_bounds,
            no_components,
            max_resolutions,
            params.no_layers
        );

        Ok(PacketIter {
            order: params.progression_order,
            include: IncludeTracker::new(no_components, strides),
            params,
            full_bounds: full_bounds.clone(),
            base_bounds: bounds.clone(),
            bounds,
            cursor: Cursor::default(),
            steps: None,
            started: false,
            finished: false,
            current: None,
        })
    }

    fn validate(params: &PacketIterParams) -> Result<ProgressionBounds> {
        if params.components.is_empty() {
            return Err(CodestreamError::InvalidGeometry {
                error: "packet iterator without components".to_owned(),
            });
        }
        for (i, component) in params.components.iter().enumerate() {
            if component.dx == 0 || component.dy == 0 {
                return Err(CodestreamError::InvalidGeometry {
                    error: format!("component {} has zero sample separation", i),
                });
            }
            if component.resolutions.is_empty() || component.resolutions.len() > MAX_RESOLUTIONS {
                return Err(CodestreamError::InvalidGeometry {
                    error: format!(
                        "component {} has {} resolutions",
                        i,
                        component.resolutions.len()
                    ),
                });
            }
            if component.resolutions.iter().any(|resolution| {
                resolution.precinct_width_exponent > MAX_PRECINCT_EXPONENT
                    || resolution.precinct_height_exponent > MAX_PRECINCT_EXPONENT
            }) {
                return Err(CodestreamError::InvalidGeometry {
                    error: format!("component {} has a precinct exponent above 15", i),
                });
            }
        }
        let max_resolutions = params
            .components
            .iter()
            .map(|component| component.resolutions.len())
            .max()
            .unwrap_or(0) as u8;
        Ok(ProgressionBounds::full(
            params.no_layers,
            max_resolutions,
            params.components.len() as u16,
        ))
    }

    pub fn params(&self) -> &PacketIterParams {
        &self.params
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.order
    }

    pub fn bounds(&self) -> &ProgressionBounds {
        &self.bounds
    }

    pub fn include_tracker(&self) -> &IncludeTracker {
        &self.include
    }

    /// Current packet, after a successful `advance`.
    pub fn coordinate(&self) -> Option<PacketCoordinate> {
        self.current
    }

    fn rewind(&mut self) {
        self.cursor = Cursor::default();
        self.steps = None;
        self.started = false;
        self.finished = false;
        self.current = None;
    }

    /// Prepares the iterator for a new tile: full bounds, COD progression and
    /// an empty inclusion map.
    pub fn reset(&mut self) {
        self.include.clear();
        self.order = self.params.progression_order;
        self.base_bounds = self.full_bounds.clone();
        self.bounds = self.full_bounds.clone();
        self.rewind();
    }

    /// Continues the tile with new bounds and order, as a POC record does.
    /// Packets already produced stay excluded.
    pub fn set_bounds(&mut self, bounds: ProgressionBounds, order: ProgressionOrder) {
        debug!(
            "progression {} over layers {:?}, resolutions {:?}, components {:?}",
            order, bounds.layers, bounds.resolutions, bounds.components
        );
        self.order = order;
        self.base_bounds = bounds.clone();
        self.bounds = bounds;
        self.rewind();
    }

    /// Number of tile-parts the divider splits the current bounds into.
    pub fn no_tile_parts(&self) -> u32 {
        let bounds = &self.base_bounds;
        match self.params.tile_part_divider {
            None => 1,
            Some(TilePartDivider::Layer) => bounds.layers.len() as u32,
            Some(TilePartDivider::Resolution) => bounds.resolutions.len() as u32,
            Some(TilePartDivider::Component) => bounds.components.len() as u32,
        }
    }

    /// Restricts iteration to the packets of tile-part `tile_part_index`.
    pub fn begin_tile_part(&mut self, tile_part_index: u32) -> Result<()> {
        let no_tile_parts = self.no_tile_parts();
        if tile_part_index >= no_tile_parts {
            return Err(CodestreamError::InvalidGeometry {
                error: format!(
                    "tile-part {} of {} requested from packet iterator",
                    tile_part_index, no_tile_parts
                ),
            });
        }
        let mut bounds = self.base_bounds.clone();
        match self.params.tile_part_divider {
            None => {}
            Some(TilePartDivider::Layer) => {
                let layer = bounds.layers.start + tile_part_index as u16;
                bounds.layers = layer..layer + 1;
            }
            Some(TilePartDivider::Resolution) => {
                let resolution = bounds.resolutions.start + tile_part_index as u8;
                bounds.resolutions = resolution..resolution + 1;
            }
            Some(TilePartDivider::Component) => {
                let component = bounds.components.start + tile_part_index as u16;
                bounds.components = component..component + 1;
            }
        }
        debug!("tile-part {} of {}", tile_part_index, no_tile_parts);
        self.bounds = bounds;
        self.rewind();
        Ok(())
    }

    /// Moves to the next packet; `false` once the progression is exhausted.
    pub fn advance(&mut self) -> bool {
        if self.finished {
            return false;
        }
        let next = match self.order {
            ProgressionOrder::Lrcp => self.next_lrcp(),
            ProgressionOrder::Rlcp => self.next_rlcp(),
            ProgressionOrder::Rpcl => self.next_rpcl(),
            ProgressionOrder::Pcrl => self.next_pcrl(),
            ProgressionOrder::Cprl => self.next_cprl(),
        };
        self.current = next;
        if next.is_none() {
            self.finished = true;
        }
        next.is_some()
    }

    fn no_precincts(&self, component: u16, resolution: u8) -> u64 {
        self.params
            .components
            .get(component as usize)
            .and_then(|component| component.resolutions.get(resolution as usize))
            .map_or(0, PiResolution::no_precincts)
            .min(self.bounds.precinct_end)
    }

    fn emit(
        &mut self,
        component: u16,
        resolution: u8,
        precinct: u64,
        layer: u16,
    ) -> Option<PacketCoordinate> {
        let coordinate = PacketCoordinate {
            component,
            resolution,
            precinct,
            layer,
        };
        if !self.include.mark_and_test(&coordinate) {
            return None;
        }
        self.cursor.component = component;
        self.cursor.resolution = resolution;
        self.cursor.precinct = precinct;
        self.cursor.layer = layer;
        trace!("packet {}", coordinate);
        Some(coordinate)
    }

    // B.12.1.1 Layer-resolution level-component-position progression
    fn next_lrcp(&mut self) -> Option<PacketCoordinate> {
        let bounds = self.bounds.clone();
        let mut resume = self.started;
        self.started = true;

        let mut layer = if resume { self.cursor.layer } else { bounds.layers.start };
        while layer < bounds.layers.end {
            let mut resolution = if resume {
                self.cursor.resolution
            } else {
                bounds.resolutions.start
            };
            while resolution < bounds.resolutions.end {
                let mut component = if resume {
                    self.cursor.component
                } else {
                    bounds.components.start
                };
                while component < bounds.components.end {
                    let no_precincts = self.no_precincts(component, resolution);
                    let mut precinct = if resume {
                        resume = false;
                        self.cursor.precinct + 1
                    } else {
                        0
                    };
                    while precinct < no_precincts {
                        if let Some(coordinate) = self.emit(component, resolution, precinct, layer) {
                            return Some(coordinate);
                        }
                        precinct += 1;
                    }
                    component += 1;
                }
                resolution += 1;
            }
            layer += 1;
        }
        None
    }

    // B.12.1.2 Resolution level-layer-component-position progression
    fn next_rlcp(&mut self) -> Option<PacketCoordinate> {
        let bounds = self.bounds.clone();
        let mut resume = self.started;
        self.started = true;

        let mut resolution = if resume {
            self.cursor.resolution
        } else {
            bounds.resolutions.start
        };
        while resolution < bounds.resolutions.end {
            let mut layer = if resume { self.cursor.layer } else { bounds.layers.start };
            while layer < bounds.layers.end {
                let mut component = if resume {
                    self.cursor.component
                } else {
                    bounds.components.start
                };
                while component < bounds.components.end {
                    let no_precincts = self.no_precincts(component, resolution);
                    let mut precinct = if resume {
                        resume = false;
                        self.cursor.precinct + 1
                    } else {
                        0
                    };
                    while precinct < no_precincts {
                        if let Some(coordinate) = self.emit(component, resolution, precinct, layer) {
                            return Some(coordinate);
                        }
                        precinct += 1;
                    }
                    component += 1;
                }
                layer += 1;
            }
            resolution += 1;
        }
        None
    }

    // Canvas pitch of the precincts of (component, resolution), or `None`
    // when the resolution has no precincts.
    fn precinct_pitch(&self, component: u16, resolution: u8) -> Option<(u64, u64)> {
        let pi_component = self.params.components.get(component as usize)?;
        let pi_resolution = pi_component.resolutions.get(resolution as usize)?;
        if pi_resolution.no_precincts() == 0 {
            return None;
        }
        let level = (pi_component.resolutions.len() - 1 - resolution as usize) as u32;
        Some((
            (pi_component.dx as u64) << (pi_resolution.precinct_width_exponent + level),
            (pi_component.dy as u64) << (pi_resolution.precinct_height_exponent + level),
        ))
    }

    // Position step covering every precinct corner of the given pairs.
    fn position_steps(
        &self,
        components: std::ops::Range<u16>,
        resolutions: std::ops::Range<u8>,
    ) -> Option<(u64, u64)> {
        let mut steps: Option<(u64, u64)> = None;
        for component in components {
            for resolution in resolutions.clone() {
                if let Some((x, y)) = self.precinct_pitch(component, resolution) {
                    steps = Some(match steps {
                        Some((sx, sy)) => (gcd(sx, x), gcd(sy, y)),
                        None => (x, y),
                    });
                }
            }
        }
        steps
    }

    // B.12.1.3
    //
    // The precinct of (component, resolution) whose top-left corner, mapped
    // to the reference grid, is (x, y). The first precinct column and row
    // start at the tile origin when the grid is not aligned to it.
    fn precinct_at(&self, component: u16, resolution: u8, x: u64, y: u64) -> Option<u64> {
        let pi_component = self.params.components.get(component as usize)?;
        let pi_resolution = pi_component.resolutions.get(resolution as usize)?;
        if pi_resolution.no_precincts() == 0 {
            return None;
        }
        let level = (pi_component.resolutions.len() - 1 - resolution as usize) as u32;
        let tile = &self.params.tile_bounds;
        let (dx, dy) = (pi_component.dx as u64, pi_component.dy as u64);
        let (ppx, ppy) = (
            pi_resolution.precinct_width_exponent,
            pi_resolution.precinct_height_exponent,
        );

        let trx0 = ceil_div(tile.x0 as u64, dx << level);
        let try0 = ceil_div(tile.y0 as u64, dy << level);
        let trx1 = ceil_div(tile.x1 as u64, dx << level);
        let try1 = ceil_div(tile.y1 as u64, dy << level);
        if trx0 == trx1 || try0 == try1 {
            return None;
        }

        let (rpx, rpy) = (ppx + level, ppy + level);
        let x_aligned = x % (dx << rpx) == 0
            || (x == tile.x0 as u64 && (trx0 << level) % (1u64 << rpx) != 0);
        let y_aligned = y % (dy << rpy) == 0
            || (y == tile.y0 as u64 && (try0 << level) % (1u64 << rpy) != 0);
        if !x_aligned || !y_aligned {
            return None;
        }

        let prci = (ceil_div(x, dx << level) >> ppx) - (trx0 >> ppx);
        let prcj = (ceil_div(y, dy << level) >> ppy) - (try0 >> ppy);
        if prci >= pi_resolution.precinct_grid_width as u64
            || prcj >= pi_resolution.precinct_grid_height as u64
        {
            return None;
        }
        let precinct = prci + prcj * pi_resolution.precinct_grid_width as u64;
        if precinct >= self.bounds.precinct_end {
            return None;
        }
        Some(precinct)
    }

    fn steps(&mut self) -> Option<(u64, u64)> {
        if self.steps.is_none() {
            self.steps = self.position_steps(
                self.bounds.components.clone(),
                self.bounds.resolutions.clone(),
            );
        }
        self.steps
    }

    // B.12.1.3 Resolution level-position-component-layer progression
    fn next_rpcl(&mut self) -> Option<PacketCoordinate> {
        let bounds = self.bounds.clone();
        let (step_x, step_y) = self.steps()?;
        let tile = self.params.tile_bounds;
        let mut resume = self.started;
        self.started = true;

        let mut resolution = if resume {
            self.cursor.resolution
        } else {
            bounds.resolutions.start
        };
        while resolution < bounds.resolutions.end {
            let mut y = if resume { self.cursor.y } else { tile.y0 as u64 };
            while y < tile.y1 as u64 {
                let mut x = if resume { self.cursor.x } else { tile.x0 as u64 };
                while x < tile.x1 as u64 {
                    let mut component = if resume {
                        self.cursor.component
                    } else {
                        bounds.components.start
                    };
                    while component < bounds.components.end {
                        if let Some(precinct) = self.precinct_at(component, resolution, x, y) {
                            let mut layer = if resume {
                                resume = false;
                                self.cursor.layer + 1
                            } else {
                                bounds.layers.start
                            };
                            while layer < bounds.layers.end {
                                if let Some(coordinate) =
                                    self.emit(component, resolution, precinct, layer)
                                {
                                    self.cursor.x = x;
                                    self.cursor.y = y;
                                    return Some(coordinate);
                                }
                                layer += 1;
                            }
                        }
                        component += 1;
                    }
                    x = next_position(x, step_x);
                }
                y = next_position(y, step_y);
            }
            resolution += 1;
        }
        None
    }

    // B.12.1.4 Position-component-resolution level-layer progression
    fn next_pcrl(&mut self) -> Option<PacketCoordinate> {
        let bounds = self.bounds.clone();
        let (step_x, step_y) = self.steps()?;
        let tile = self.params.tile_bounds;
        let mut resume = self.started;
        self.started = true;

        let mut y = if resume { self.cursor.y } else { tile.y0 as u64 };
        while y < tile.y1 as u64 {
            let mut x = if resume { self.cursor.x } else { tile.x0 as u64 };
            while x < tile.x1 as u64 {
                let mut component = if resume {
                    self.cursor.component
                } else {
                    bounds.components.start
                };
                while component < bounds.components.end {
                    let no_resolutions = self
                        .params
                        .components
                        .get(component as usize)
                        .map_or(0, |component| component.resolutions.len());
                    let resolution_end = bounds.resolutions.end.min(no_resolutions as u8);
                    let mut resolution = if resume {
                        self.cursor.resolution
                    } else {
                        bounds.resolutions.start
                    };
                    while resolution < resolution_end {
                        if let Some(precinct) = self.precinct_at(component, resolution, x, y) {
                            let mut layer = if resume {
                                resume = false;
                                self.cursor.layer + 1
                            } else {
                                bounds.layers.start
                            };
                            while layer < bounds.layers.end {
                                if let Some(coordinate) =
                                    self.emit(component, resolution, precinct, layer)
                                {
                                    self.cursor.x = x;
                                    self.cursor.y = y;
                                    return Some(coordinate);
                                }
                                layer += 1;
                            }
                        }
                        resolution += 1;
                    }
                    component += 1;
                }
                x = next_position(x, step_x);
            }
            y = next_position(y, step_y);
        }
        None
    }

    // B.12.1.5 Component-position-resolution level-layer progression
    fn next_cprl(&mut self) -> Option<PacketCoordinate> {
        let bounds = self.bounds.clone();
        let tile = self.params.tile_bounds;
        let mut resume = self.started;
        self.started = true;

        let mut component = if resume {
            self.cursor.component
        } else {
            bounds.components.start
        };
        while component < bounds.components.end {
            let no_resolutions = self
                        .params
                        .components
                        .get(component as usize)
                        .map_or(0, |component| component.resolutions.len());
            let resolution_end = bounds.resolutions.end.min(no_resolutions as u8);
            let steps =
                self.position_steps(component..component + 1, bounds.resolutions.start..resolution_end);
            if let Some((step_x, step_y)) = steps {
                let mut y = if resume { self.cursor.y } else { tile.y0 as u64 };
                while y < tile.y1 as u64 {
                    let mut x = if resume { self.cursor.x } else { tile.x0 as u64 };
                    while x < tile.x1 as u64 {
                        let mut resolution = if resume {
                            self.cursor.resolution
                        } else {
                            bounds.resolutions.start
                        };
                        while resolution < resolution_end {
                            if let Some(precinct) = self.precinct_at(component, resolution, x, y) {
                                let mut layer = if resume {
                                    resume = false;
                                    self.cursor.layer + 1
                                } else {
                                    bounds.layers.start
                                };
                                while layer < bounds.layers.end {
                                    if let Some(coordinate) =
                                        self.emit(component, resolution, precinct, layer)
                                    {
                                        self.cursor.x = x;
                                        self.cursor.y = y;
                                        return Some(coordinate);
                                    }
                                    layer += 1;
                                }
                            }
                            resolution += 1;
                        }
                        x = next_position(x, step_x);
                    }
                    y = next_position(y, step_y);
                }
            }
            component += 1;
        }
        None
    }
}

impl Iterator for PacketIter {
    type Item = PacketCoordinate;

    fn next(&mut self) -> Option<PacketCoordinate> {
        if self.advance() {
            self.current
        } else {
            None
        }
    }
}
