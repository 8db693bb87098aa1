// Tile, tile-component, resolution and subband geometry (B.3 - B.7).
use log::debug;

use crate::error::{CodestreamError, Result};
use crate::geometry::{ceil_div_pow2, floor_div_pow2, Point, Rect};
use crate::header::{CodingStyleMarkerSegment, ImageAndTileSizeMarkerSegment};
use crate::packet_iter::{PacketCoordinate, PacketIter, PacketIterParams, PiComponent, PiResolution};
use crate::progression::{ProgressionBounds, ProgressionChange, ProgressionOrder, TilePartDivider};
use crate::subband::{BandOrientation, Subband};
use crate::window::{tile_comp_band_window, TileComponentWindowBuffer, WindowParams};

/// One resolution level of a tile-component.
#[derive(Clone, Debug)]
pub struct Resolution {
    index: u8,
    bounds: Rect,

    // PPx, PPy
    precinct_exponents: Point,
    precinct_start: Point,
    precinct_grid_width: u32,
    precinct_grid_height: u32,
    bands: Vec<Subband>,
}

impl Resolution {
    /// Resolution `index` of a tile-component with `no_resolutions` levels.
    pub fn new(
        tile_comp: &Rect,
        no_resolutions: u8,
        index: u8,
        precinct_exponents: (u8, u8),
        code_block_exponents: (u8, u8),
    ) -> Resolution {
        let level = (no_resolutions - 1 - index) as u32;

        // B-14
        // trx0 = ⌈tcx0 / 2^(NL - r)⌉ and likewise for the other edges
        let bounds = tile_comp.ceil_div_pow2(level);
        let (ppx, ppy) = (precinct_exponents.0 as u32, precinct_exponents.1 as u32);

        // B-16
        // numprecinctswide = ⌈trx1 / 2^PPx⌉ - ⌊trx0 / 2^PPx⌋
        // numprecinctshigh = ⌈try1 / 2^PPy⌉ - ⌊try0 / 2^PPy⌋
        let (grid_width, grid_height) = if bounds.is_empty() {
            (0, 0)
        } else {
            (
                ceil_div_pow2(bounds.x1, ppx) - floor_div_pow2(bounds.x0, ppx),
                ceil_div_pow2(bounds.y1, ppy) - floor_div_pow2(bounds.y0, ppy),
            )
        };
        let precinct_start = Point::new(
            floor_div_pow2(bounds.x0, ppx) << ppx,
            floor_div_pow2(bounds.y0, ppy) << ppy,
        );
        let no_precincts = grid_width as u64 * grid_height as u64;

        // Above resolution 0 a precinct covers half as many samples in each
        // band as in the resolution (B.6).
        let (band_start, band_exponents) = if index == 0 {
            (precinct_start, Point::new(ppx, ppy))
        } else {
            (
                Point::new(
                    ceil_div_pow2(precinct_start.x, 1),
                    ceil_div_pow2(precinct_start.y, 1),
                ),
                Point::new(ppx.saturating_sub(1), ppy.saturating_sub(1)),
            )
        };

        // B.7
        // xcb' = min(xcb, PPx - 1) above resolution 0, min(xcb, PPx) at 0
        let code_blocks = Point::new(
            (code_block_exponents.0 as u32).min(band_exponents.x),
            (code_block_exponents.1 as u32).min(band_exponents.y),
        );

        let orientations: &[BandOrientation] = if index == 0 {
            &[BandOrientation::LL]
        } else {
            &BandOrientation::HIGH_PASS
        };
        let bands = orientations
            .iter()
            .map(|&orientation| {
                let band_bounds = if index == 0 {
                    bounds
                } else {
                    tile_comp_band_window(no_resolutions - index, orientation, tile_comp)
                };
                Subband::new(
                    orientation,
                    index,
                    band_bounds,
                    band_start,
                    band_exponents,
                    grid_width,
                    no_precincts,
                    code_blocks,
                )
            })
            .collect();

        Resolution {
            index,
            bounds,
            precinct_exponents: Point::new(ppx, ppy),
            precinct_start,
            precinct_grid_width: grid_width,
            precinct_grid_height: grid_height,
            bands,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }

    pub fn precinct_exponents(&self) -> Point {
        self.precinct_exponents
    }

    pub fn precinct_grid_width(&self) -> u32 {
        self.precinct_grid_width
    }

    pub fn precinct_grid_height(&self) -> u32 {
        self.precinct_grid_height
    }

    pub fn no_precincts(&self) -> u64 {
        self.precinct_grid_width as u64 * self.precinct_grid_height as u64
    }

    /// Precinct `index` in resolution coordinates, clipped to the resolution.
    pub fn precinct_bounds(&self, index: u64) -> Option<Rect> {
        if index >= self.no_precincts() {
            return None;
        }
        let x = index % self.precinct_grid_width as u64;
        let y = index / self.precinct_grid_width as u64;
        let (ppx, ppy) = (self.precinct_exponents.x, self.precinct_exponents.y);
        let x0 = self.precinct_start.x as u64 + (x << ppx);
        let y0 = self.precinct_start.y as u64 + (y << ppy);
        let clamp = |value: u64| value.min(u32::MAX as u64) as u32;
        Some(
            Rect::new(
                clamp(x0),
                clamp(y0),
                clamp(x0 + (1u64 << ppx)),
                clamp(y0 + (1u64 << ppy)),
            )
            .intersection(&self.bounds),
        )
    }

    pub fn bands(&self) -> &[Subband] {
        &self.bands
    }

    pub fn bands_mut(&mut self) -> &mut [Subband] {
        &mut self.bands
    }

    pub fn band(&self, orientation: BandOrientation) -> Option<&Subband> {
        self.bands.iter().find(|band| band.orientation() == orientation)
    }

    pub fn band_mut(&mut self, orientation: BandOrientation) -> Option<&mut Subband> {
        self.bands
            .iter_mut()
            .find(|band| band.orientation() == orientation)
    }
}

/// One component of a tile.
#[derive(Clone, Debug)]
pub struct TileComponent {
    component_index: u16,
    dx: u32,
    dy: u32,
    bounds: Rect,
    resolutions: Vec<Resolution>,
}

impl TileComponent {
    pub fn component_index(&self) -> u16 {
        self.component_index
    }

    pub fn horizontal_separation(&self) -> u32 {
        self.dx
    }

    pub fn vertical_separation(&self) -> u32 {
        self.dy
    }

    /// B-12
    ///
    /// tcx0 = ⌈tx0 / XRsiz⌉, tcy0 = ⌈ty0 / YRsiz⌉, tcx1 = ⌈tx1 / XRsiz⌉,
    /// tcy1 = ⌈ty1 / YRsiz⌉
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn no_resolutions(&self) -> u8 {
        self.resolutions.len() as u8
    }

    pub fn resolutions(&self) -> &[Resolution] {
        &self.resolutions
    }

    pub fn resolutions_mut(&mut self) -> &mut [Resolution] {
        &mut self.resolutions
    }

    pub fn resolution(&self, index: u8) -> Option<&Resolution> {
        self.resolutions.get(index as usize)
    }

    pub fn no_packets_per_layer(&self) -> u64 {
        self.resolutions.iter().map(Resolution::no_precincts).sum()
    }
}

/// Geometry of one tile, derived from the main header.
#[derive(Clone, Debug)]
pub struct TileGeometry {
    tile_index: u16,
    bounds: Rect,
    components: Vec<TileComponent>,
    no_layers: u16,
    progression_order: ProgressionOrder,
    progression_changes: Vec<ProgressionChange>,
    lossless: bool,
}

impl TileGeometry {
    pub fn new(
        siz: &ImageAndTileSizeMarkerSegment,
        cod: &CodingStyleMarkerSegment,
        tile_index: u16,
    ) -> Result<TileGeometry> {
        let bounds = siz
            .tile_bounds(tile_index as u32)
            .ok_or(CodestreamError::InvalidTileIndex {
                tile_index,
                no_tiles: siz.no_tiles(),
            })?;
        let parameters = cod.coding_style_parameters();
        let no_resolutions = parameters.no_resolutions();
        let code_block_exponents = parameters.code_block_exponents();

        let components = siz
            .components()
            .iter()
            .enumerate()
            .map(|(i, component)| {
                let dx = component.horizontal_separation() as u32;
                let dy = component.vertical_separation() as u32;
                let tile_comp = bounds.ceil_div(dx, dy);
                let resolutions = (0..no_resolutions)
                    .map(|r| {
                        Resolution::new(
                            &tile_comp,
                            no_resolutions,
                            r,
                            parameters.precinct_exponents(r),
                            code_block_exponents,
                        )
                    })
                    .collect();
                TileComponent {
                    component_index: i as u16,
                    dx,
                    dy,
                    bounds: tile_comp,
                    resolutions,
                }
            })
            .collect();

        debug!(
            "tile {} at {}: {} components, {} resolutions",
            tile_index,
            bounds,
            siz.no_components(),
            no_resolutions
        );

        Ok(TileGeometry {
            tile_index,
            bounds,
            components,
            no_layers: cod.no_layers(),
            progression_order: cod.progression_order(),
            progression_changes: Vec::new(),
            lossless: parameters.is_reversible(),
        })
    }

    /// Replaces the COD progression with a chain of POC records.
    pub fn with_progression_changes(mut self, changes: Vec<ProgressionChange>) -> TileGeometry {
        self.progression_changes = changes;
        self
    }

    pub fn tile_index(&self) -> u16 {
        self.tile_index
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn components(&self) -> &[TileComponent] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [TileComponent] {
        &mut self.components
    }

    pub fn component(&self, index: u16) -> Option<&TileComponent> {
        self.components.get(index as usize)
    }

    pub fn no_layers(&self) -> u16 {
        self.no_layers
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.progression_order
    }

    pub fn progression_changes(&self) -> &[ProgressionChange] {
        &self.progression_changes
    }

    pub fn is_lossless(&self) -> bool {
        self.lossless
    }

    pub fn max_resolutions(&self) -> u8 {
        self.components
            .iter()
            .map(TileComponent::no_resolutions)
            .max()
            .unwrap_or(0)
    }

    /// Number of packets in the tile: layers × Σ precincts over every
    /// component and resolution.
    pub fn no_packets(&self) -> u64 {
        let per_layer: u64 = self
            .components
            .iter()
            .map(TileComponent::no_packets_per_layer)
            .sum();
        per_layer * self.no_layers as u64
    }

    pub fn packet_iter_params(&self, tile_part_divider: Option<TilePartDivider>) -> PacketIterParams {
        PacketIterParams {
            tile_bounds: self.bounds,
            components: self
                .components
                .iter()
                .map(|component| PiComponent {
                    dx: component.dx,
                    dy: component.dy,
                    resolutions: component
                        .resolutions
                        .iter()
                        .map(|resolution| PiResolution {
                            precinct_width_exponent: resolution.precinct_exponents.x,
                            precinct_height_exponent: resolution.precinct_exponents.y,
                            precinct_grid_width: resolution.precinct_grid_width,
                            precinct_grid_height: resolution.precinct_grid_height,
                        })
                        .collect(),
                })
                .collect(),
            no_layers: self.no_layers,
            progression_order: self.progression_order,
            tile_part_divider,
        }
    }

    pub fn packet_iter(&self) -> Result<PacketIter> {
        PacketIter::new(self.packet_iter_params(None))
    }

    /// Full packet sequence of the tile: the COD progression, or each POC
    /// record in turn with packets already emitted by earlier records
    /// skipped.
    pub fn packet_sequence(&self) -> Result<Vec<PacketCoordinate>> {
        let mut iter = self.packet_iter()?;
        if self.progression_changes.is_empty() {
            return Ok(iter.by_ref().collect());
        }
        let mut packets = Vec::new();
        for change in &self.progression_changes {
            let bounds = ProgressionBounds::from_change(
                change,
                self.no_layers,
                self.max_resolutions(),
                self.components.len() as u16,
            );
            iter.set_bounds(bounds, change.progression_order);
            packets.extend(iter.by_ref());
        }
        Ok(packets)
    }

    /// Window buffer of one tile-component. `window` is an unreduced canvas
    /// region of the component for decompression; `None` decompresses the
    /// whole tile. `reduce` discards that many of the highest resolutions.
    pub fn window_buffer<T: Copy + Default>(
        &self,
        component: u16,
        window: Option<Rect>,
        reduce: u8,
        compress: bool,
    ) -> Result<TileComponentWindowBuffer<T>> {
        let tile_comp = self
            .component(component)
            .ok_or_else(|| CodestreamError::InvalidGeometry {
                error: format!(
                    "tile {} has no component {}",
                    self.tile_index, component
                ),
            })?;
        let no_resolutions = tile_comp.no_resolutions();
        if reduce >= no_resolutions {
            return Err(CodestreamError::InvalidGeometry {
                error: format!(
                    "cannot discard {} of {} resolutions",
                    reduce, no_resolutions
                ),
            });
        }
        let params = WindowParams {
            compress,
            lossless: self.lossless,
            whole_tile: window.is_none(),
            tile_comp_unreduced: tile_comp.bounds,
            tile_comp_reduced: tile_comp.bounds.ceil_div_pow2(reduce as u32),
            window_unreduced: window.unwrap_or(tile_comp.bounds),
            no_resolutions,
            reduced_no_resolutions: no_resolutions - reduce,
        };
        TileComponentWindowBuffer::new(&params, &tile_comp.resolutions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{CodingStyleParameters, ComponentSize};

    fn geometry(precincts: Option<Vec<(u8, u8)>>) -> TileGeometry {
        let siz = ImageAndTileSizeMarkerSegment::new(
            Rect::new(0, 0, 100, 80),
            (64, 64),
            (0, 0),
            vec![ComponentSize::new(8, false, 1, 1), ComponentSize::new(8, false, 2, 2)],
        )
        .unwrap();
        let cod = CodingStyleMarkerSegment::new(
            ProgressionOrder::Lrcp,
            2,
            CodingStyleParameters::new(2, (4, 4), true, precincts),
        );
        TileGeometry::new(&siz, &cod, 1).unwrap()
    }

    #[test]
    fn test_tile_component_bounds() {
        let geometry = geometry(None);
        assert_eq!(geometry.bounds(), Rect::new(64, 0, 100, 64));
        assert_eq!(geometry.component(0).unwrap().bounds(), Rect::new(64, 0, 100, 64));
        assert_eq!(geometry.component(1).unwrap().bounds(), Rect::new(32, 0, 50, 32));
        let resolution = geometry.component(0).unwrap().resolution(1).unwrap();
        assert_eq!(resolution.bounds(), Rect::new(32, 0, 50, 32));
        assert_eq!(resolution.bands().len(), 3);
        // B-15 with nb = 2
        assert_eq!(
            resolution.band(BandOrientation::HL).unwrap().bounds(),
            Rect::new(16, 0, 25, 16)
        );
        assert_eq!(
            resolution.band(BandOrientation::LH).unwrap().bounds(),
            Rect::new(16, 0, 25, 16)
        );
        // B-15 with nb = 1
        let resolution = geometry.component(0).unwrap().resolution(2).unwrap();
        assert_eq!(
            resolution.band(BandOrientation::HL).unwrap().bounds(),
            Rect::new(32, 0, 50, 32)
        );
        assert!(resolution.band(BandOrientation::LL).is_none());
    }

    #[test]
    fn test_precinct_grid() {
        let geometry = geometry(Some(vec![(3, 3), (4, 4), (4, 4)]));
        let component = geometry.component(0).unwrap();
        // resolution 2 spans x 64..100, y 0..64 with 16 x 16 precincts
        let resolution = component.resolution(2).unwrap();
        assert_eq!(resolution.precinct_grid_width(), 3);
        assert_eq!(resolution.precinct_grid_height(), 4);
        assert_eq!(resolution.precinct_bounds(2), Some(Rect::new(96, 0, 100, 16)));
        assert_eq!(resolution.precinct_bounds(12), None);
        // code-blocks are limited to half a precinct above resolution 0
        let band = resolution.band(BandOrientation::HH).unwrap();
        assert_eq!(band.code_block_exponents(), Point::new(3, 3));
        assert_eq!(band.precinct_exponents(), Point::new(3, 3));
        let resolution = component.resolution(0).unwrap();
        assert_eq!(resolution.bounds(), Rect::new(16, 0, 25, 16));
        assert_eq!(resolution.no_precincts(), 2 * 2);
        assert_eq!(
            geometry.no_packets(),
            2 * geometry
                .components()
                .iter()
                .map(TileComponent::no_packets_per_layer)
                .sum::<u64>()
        );
    }

    #[test]
    fn test_invalid_tile_index() {
        let siz = ImageAndTileSizeMarkerSegment::new(
            Rect::new(0, 0, 100, 80),
            (64, 64),
            (0, 0),
            vec![ComponentSize::new(8, false, 1, 1)],
        )
        .unwrap();
        let cod = CodingStyleMarkerSegment::new(
            ProgressionOrder::Lrcp,
            1,
            CodingStyleParameters::new(0, (4, 4), true, None),
        );
        assert!(matches!(
            TileGeometry::new(&siz, &cod, 4),
            Err(CodestreamError::InvalidTileIndex {
                tile_index: 4,
                no_tiles: 4
            })
        ));
    }
}
