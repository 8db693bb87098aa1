// Main header marker segments the tile engine needs: SIZ for the tile grid,
// COD for the coding parameters, POC for progression changes.
use log::info;
use std::cmp;

use crate::error::{CodestreamError, Result};
use crate::geometry::{ceil_div, Rect};
use crate::marker::{MARKER_SYMBOL_COD, MARKER_SYMBOL_POC, MARKER_SYMBOL_SIZ};
use crate::progression::{ProgressionChange, ProgressionOrder};
use crate::stream::{StreamRead, StreamWrite};

// Rsiz capabilities, Csiz upper bound, etc.
const MAX_COMPONENTS: u16 = 16384;
const MAX_DECOMPOSITION_LEVELS: u8 = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComponentSize {
    // Ssiz: Precision (depth) in bits and sign of the ith component samples.
    //
    // The low seven bits hold precision minus one; the high bit is set for
    // signed samples.
    precision: u8,

    // XRsiz: Horizontal separation of a sample of ith component
    // with respect to the reference grid.
    horizontal_separation: u8,

    // YRsiz: Vertical separation of a sample of ith component
    // with respect to the reference grid.
    vertical_separation: u8,
}

impl ComponentSize {
    pub fn new(precision: u8, signed: bool, dx: u8, dy: u8) -> ComponentSize {
        ComponentSize {
            precision: (precision.saturating_sub(1) & 0x7F) | if signed { 0x80 } else { 0 },
            horizontal_separation: dx,
            vertical_separation: dy,
        }
    }

    pub fn precision(&self) -> u8 {
        (self.precision & 0x7F) + 1
    }

    pub fn values_are_signed(&self) -> bool {
        self.precision & 0x80 != 0
    }

    pub fn horizontal_separation(&self) -> u8 {
        self.horizontal_separation
    }

    pub fn vertical_separation(&self) -> u8 {
        self.vertical_separation
    }
}

// A.5.1
//
// Image and tile size (SIZ)
//
// Function: Provides information about the uncompressed image such as the
// width and height of the reference grid, the width and height of the tiles,
// the number of components, component bit depth, and the separation of
// component samples with respect to the reference grid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageAndTileSizeMarkerSegment {
    offset: u64,
    length: u16,

    // Rsiz: Denotes capabilities that a decoder needs to properly decode the
    // codestream.
    decoder_capabilities: u16,

    // Xsiz, Ysiz: Width and height of the reference grid.
    reference_grid_width: u32,
    reference_grid_height: u32,

    // XOsiz, YOsiz: Offset from the origin of the reference grid to the
    // image area.
    image_horizontal_offset: u32,
    image_vertical_offset: u32,

    // XTsiz, YTsiz: Size of one reference tile with respect to the reference
    // grid.
    reference_tile_width: u32,
    reference_tile_height: u32,

    // XTOsiz, YTOsiz: Offset from the origin of the reference grid to the
    // first tile.
    tile_horizontal_offset: u32,
    tile_vertical_offset: u32,

    // Csiz entries, one per component.
    components: Vec<ComponentSize>,
}

impl ImageAndTileSizeMarkerSegment {
    pub fn new(
        image: Rect,
        tile_size: (u32, u32),
        tile_offset: (u32, u32),
        components: Vec<ComponentSize>,
    ) -> Result<ImageAndTileSizeMarkerSegment> {
        let mut segment = ImageAndTileSizeMarkerSegment {
            offset: 0,
            length: 0,
            decoder_capabilities: 0,
            reference_grid_width: image.x1,
            reference_grid_height: image.y1,
            image_horizontal_offset: image.x0,
            image_vertical_offset: image.y0,
            reference_tile_width: tile_size.0,
            reference_tile_height: tile_size.1,
            tile_horizontal_offset: tile_offset.0,
            tile_vertical_offset: tile_offset.1,
            components,
        };
        segment.validate()?;
        // Lsiz, Csiz is at most 16384 once validated
        segment.length = 38 + 3 * segment.no_components();
        Ok(segment)
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn decoder_capabilities(&self) -> u16 {
        self.decoder_capabilities
    }

    pub fn reference_grid_width(&self) -> u32 {
        self.reference_grid_width
    }

    pub fn reference_grid_height(&self) -> u32 {
        self.reference_grid_height
    }

    pub fn image_horizontal_offset(&self) -> u32 {
        self.image_horizontal_offset
    }

    pub fn image_vertical_offset(&self) -> u32 {
        self.image_vertical_offset
    }

    pub fn reference_tile_width(&self) -> u32 {
        self.reference_tile_width
    }

    pub fn reference_tile_height(&self) -> u32 {
        self.reference_tile_height
    }

    pub fn tile_horizontal_offset(&self) -> u32 {
        self.tile_horizontal_offset
    }

    pub fn tile_vertical_offset(&self) -> u32 {
        self.tile_vertical_offset
    }

    pub fn no_components(&self) -> u16 {
        self.components.len() as u16
    }

    pub fn components(&self) -> &[ComponentSize] {
        &self.components
    }

    pub fn component(&self, i: usize) -> Option<&ComponentSize> {
        self.components.get(i)
    }

    pub fn image_area(&self) -> Rect {
        Rect::new(
            self.image_horizontal_offset,
            self.image_vertical_offset,
            self.reference_grid_width,
            self.reference_grid_height,
        )
    }

    // The number of tiles in the X direction (numXtiles) and the Y direction
    // (numYtiles) is the following
    //
    // numXtiles = ⌈(Xsiz - XTOsiz) / XTsiz⌉
    // numYtiles = ⌈(Ysiz - YTOsiz) / YTsiz⌉
    pub fn no_x_tiles(&self) -> u32 {
        ceil_div(
            self.reference_grid_width - self.tile_horizontal_offset,
            self.reference_tile_width,
        )
    }

    pub fn no_y_tiles(&self) -> u32 {
        ceil_div(
            self.reference_grid_height - self.tile_vertical_offset,
            self.reference_tile_height,
        )
    }

    pub fn no_tiles(&self) -> u32 {
        self.no_x_tiles().saturating_mul(self.no_y_tiles())
    }

    // Let p be the horizontal index of a tile, ranging from 0 to numXtiles -1
    // and q the vertical index, ranging from 0 to numYtiles -1
    // p = mod(t, numXtiles), q = ⌊t / numXtiles⌋
    //
    // tx0(p, q) = max(XTOsiz + p · XTsiz, XOsiz)
    // ty0(p, q) = max(YTOsiz + q · YTsiz, YOsiz)
    // tx1(p, q) = min(XTOsiz + (p + 1) · XTsiz, Xsiz)
    // ty1(p, q) = min(YTOsiz + (q + 1) · YTsiz, Ysiz)
    pub fn tile_bounds(&self, t: u32) -> Option<Rect> {
        if t >= self.no_tiles() {
            return None;
        }
        let p = (t % self.no_x_tiles()) as u64;
        let q = (t / self.no_x_tiles()) as u64;
        let tile_width = self.reference_tile_width as u64;
        let tile_height = self.reference_tile_height as u64;
        let x0 = cmp::max(
            self.tile_horizontal_offset as u64 + p * tile_width,
            self.image_horizontal_offset as u64,
        );
        let y0 = cmp::max(
            self.tile_vertical_offset as u64 + q * tile_height,
            self.image_vertical_offset as u64,
        );
        let x1 = cmp::min(
            self.tile_horizontal_offset as u64 + (p + 1) * tile_width,
            self.reference_grid_width as u64,
        );
        let y1 = cmp::min(
            self.tile_vertical_offset as u64 + (q + 1) * tile_height,
            self.reference_grid_height as u64,
        );
        Some(Rect::new(x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }

    fn validate(&self) -> Result<()> {
        if self.reference_tile_width == 0
            || self.reference_tile_height == 0
            || self.reference_grid_width <= self.image_horizontal_offset
            || self.reference_grid_height <= self.image_vertical_offset
        {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_SIZ,
                error: format!(
                    "empty image area or tile: Xsiz = {}, Ysiz = {}, XOsiz = {}, YOsiz = {}, XTsiz = {}, YTsiz = {}",
                    self.reference_grid_width,
                    self.reference_grid_height,
                    self.image_horizontal_offset,
                    self.image_vertical_offset,
                    self.reference_tile_width,
                    self.reference_tile_height
                ),
            });
        }

        // The tile grid offsets (XTOsiz, YTOsiz) are constrained to be no
        // greater than the image area offsets. This is expressed by the
        // following ranges
        // 0 ≤ XTOsiz ≤ XOsiz
        // 0 ≤ YTOsiz ≤ YOsiz
        if self.tile_horizontal_offset > self.image_horizontal_offset
            || self.tile_vertical_offset > self.image_vertical_offset
        {
            return Err(CodestreamError::TileGridOffsetOverflow {
                tile_horizontal_offset: self.tile_horizontal_offset,
                image_horizontal_offset: self.image_horizontal_offset,
                tile_vertical_offset: self.tile_vertical_offset,
                image_vertical_offset: self.image_vertical_offset,
            });
        }

        // Also, the tile size plus the tile offset shall be greater than the
        // image area offset. This ensures that the first tile (tile 0) will
        // contain at least one reference grid point from the image area.
        //
        // XTsiz + XTOsiz > XOsiz
        // YTsiz + YTOsiz > YOsiz
        if (self.reference_tile_width as u64 + self.tile_horizontal_offset as u64)
            <= self.image_horizontal_offset as u64
            || (self.reference_tile_height as u64 + self.tile_vertical_offset as u64)
                <= self.image_vertical_offset as u64
        {
            return Err(CodestreamError::TileSizeOverflow {
                reference_tile_width: self.reference_tile_width,
                tile_horizontal_offset: self.tile_horizontal_offset,
                image_horizontal_offset: self.image_horizontal_offset,
                reference_tile_height: self.reference_tile_height,
                tile_vertical_offset: self.tile_vertical_offset,
                image_vertical_offset: self.image_vertical_offset,
            });
        }

        if self.components.is_empty() || self.components.len() > MAX_COMPONENTS as usize {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_SIZ,
                error: format!("invalid number of components {}", self.components.len()),
            });
        }
        if let Some(i) = self
            .components
            .iter()
            .position(|c| c.horizontal_separation == 0 || c.vertical_separation == 0)
        {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_SIZ,
                error: format!("component {} has zero sample separation", i),
            });
        }
        Ok(())
    }

    pub fn write<W: StreamWrite + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_marker(MARKER_SYMBOL_SIZ)?;
        writer.write_u16(38 + 3 * self.no_components())?;
        writer.write_u16(self.decoder_capabilities)?;
        writer.write_u32(self.reference_grid_width)?;
        writer.write_u32(self.reference_grid_height)?;
        writer.write_u32(self.image_horizontal_offset)?;
        writer.write_u32(self.image_vertical_offset)?;
        writer.write_u32(self.reference_tile_width)?;
        writer.write_u32(self.reference_tile_height)?;
        writer.write_u32(self.tile_horizontal_offset)?;
        writer.write_u32(self.tile_vertical_offset)?;
        writer.write_u16(self.no_components())?;
        for component in &self.components {
            writer.write_u8(component.precision)?;
            writer.write_u8(component.horizontal_separation)?;
            writer.write_u8(component.vertical_separation)?;
        }
        Ok(())
    }
}

pub fn decode_siz<R: StreamRead + ?Sized>(reader: &mut R) -> Result<ImageAndTileSizeMarkerSegment> {
    let offset = reader.tell()?.saturating_sub(2);
    info!("SIZ start at byte offset {}", offset);
    let length = reader.read_u16()?;
    if length < 41 || (length - 38) % 3 != 0 {
        return Err(CodestreamError::InvalidMarkerLength {
            marker: MARKER_SYMBOL_SIZ,
            offset,
            length,
        });
    }

    let mut segment = ImageAndTileSizeMarkerSegment {
        offset,
        length,
        decoder_capabilities: reader.read_u16()?,
        reference_grid_width: reader.read_u32()?,
        reference_grid_height: reader.read_u32()?,
        image_horizontal_offset: reader.read_u32()?,
        image_vertical_offset: reader.read_u32()?,
        reference_tile_width: reader.read_u32()?,
        reference_tile_height: reader.read_u32()?,
        tile_horizontal_offset: reader.read_u32()?,
        tile_vertical_offset: reader.read_u32()?,
        components: Vec::new(),
    };

    let no_components = reader.read_u16()?;
    if no_components as usize * 3 + 38 != length as usize {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SIZ,
            error: format!(
                "Csiz = {} does not match segment length {}",
                no_components, length
            ),
        });
    }
    segment.components = Vec::with_capacity(no_components as usize);
    for _ in 0..no_components {
        segment.components.push(ComponentSize {
            precision: reader.read_u8()?,
            horizontal_separation: reader.read_u8()?,
            vertical_separation: reader.read_u8()?,
        });
    }
    segment.validate()?;

    info!("SIZ end at byte offset {}", reader.tell()?);
    Ok(segment)
}

// A.6.1
//
// Coding style default (COD)
//
// Function: Describes the coding style, number of decomposition levels,
// and layering that is the default used for compressing all components of
// an image (if in the main header) or a tile (if in the tile-part header).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodingStyleMarkerSegment {
    offset: u64,
    length: u16,

    // Scod: Coding style for all components
    coding_style: u8,

    // SGcod: Progression order
    progression_order: ProgressionOrder,

    // SGcod: Number of layers
    no_layers: u16,

    // SGcod: Multiple component transformation
    multiple_component_transformation: u8,

    // SPcod
    parameters: CodingStyleParameters,
}

// A.6.1 Table A.15 - Coding style parameter values of the SPcod and SPcoc
// parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodingStyleParameters {
    // Number of decomposition levels, NL, Zero implies no transformation.
    no_decomposition_levels: u8,

    // Code-block width and height exponent offset value, xcb and ycb.
    //
    // The code-block size is 2^(value + 2).
    code_block_width: u8,
    code_block_height: u8,

    // Style of the code-block coding passes.
    code_block_style: u8,

    // Wavelet transformation used: 0 for 9-7 irreversible, 1 for 5-3
    // reversible.
    transformation: u8,

    // If Scod or Scoc = xxxx xxx0, this parameter is not present, otherwise
    // this indicates precinct width and height. The first parameter (8 bits)
    // corresponds to the NLLL sub-band. Each successive parameter corresponds
    // to each successive resolution level in order.
    //
    // 4 LSBs are the precinct width exponent, PPx = value.
    // 4 MSBs are the precinct height exponent PPy = value.
    precinct_sizes: Vec<u8>,
}

impl CodingStyleParameters {
    pub fn new(
        no_decomposition_levels: u8,
        code_block_exponents: (u8, u8),
        reversible: bool,
        precinct_exponents: Option<Vec<(u8, u8)>>,
    ) -> CodingStyleParameters {
        CodingStyleParameters {
            no_decomposition_levels,
            code_block_width: code_block_exponents.0.saturating_sub(2),
            code_block_height: code_block_exponents.1.saturating_sub(2),
            code_block_style: 0,
            transformation: reversible as u8,
            precinct_sizes: precinct_exponents
                .unwrap_or_default()
                .into_iter()
                .map(|(ppx, ppy)| (ppx & 0x0F) | (ppy << 4))
                .collect(),
        }
    }

    pub fn no_decomposition_levels(&self) -> u8 {
        self.no_decomposition_levels
    }

    pub fn no_resolutions(&self) -> u8 {
        self.no_decomposition_levels + 1
    }

    /// Code-block width and height exponents (xcb', ycb' in B.7).
    pub fn code_block_exponents(&self) -> (u8, u8) {
        (self.code_block_width + 2, self.code_block_height + 2)
    }

    pub fn code_block_style(&self) -> u8 {
        self.code_block_style
    }

    pub fn is_reversible(&self) -> bool {
        self.transformation == 1
    }

    pub fn has_defined_precinct_size(&self) -> bool {
        !self.precinct_sizes.is_empty()
    }

    /// Precinct exponents (PPx, PPy) of a resolution level; 15 when the
    /// default maximal precincts are used.
    pub fn precinct_exponents(&self, resolution: u8) -> (u8, u8) {
        match self.precinct_sizes.get(resolution as usize) {
            Some(value) => (value & 0x0F, value >> 4),
            None => (15, 15),
        }
    }
}

impl CodingStyleMarkerSegment {
    pub fn new(
        progression_order: ProgressionOrder,
        no_layers: u16,
        parameters: CodingStyleParameters,
    ) -> CodingStyleMarkerSegment {
        let coding_style = parameters.has_defined_precinct_size() as u8;
        CodingStyleMarkerSegment {
            offset: 0,
            length: 12 + parameters.precinct_sizes.len() as u16,
            coding_style,
            progression_order,
            no_layers,
            multiple_component_transformation: 0,
            parameters,
        }
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn coding_style(&self) -> u8 {
        self.coding_style
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.progression_order
    }

    pub fn no_layers(&self) -> u16 {
        self.no_layers
    }

    pub fn multiple_component_transformation(&self) -> u8 {
        self.multiple_component_transformation
    }

    pub fn coding_style_parameters(&self) -> &CodingStyleParameters {
        &self.parameters
    }

    pub fn write<W: StreamWrite + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_marker(MARKER_SYMBOL_COD)?;
        writer.write_u16(12 + self.parameters.precinct_sizes.len() as u16)?;
        writer.write_u8(self.coding_style)?;
        writer.write_u8(self.progression_order.value())?;
        writer.write_u16(self.no_layers)?;
        writer.write_u8(self.multiple_component_transformation)?;
        writer.write_u8(self.parameters.no_decomposition_levels)?;
        writer.write_u8(self.parameters.code_block_width)?;
        writer.write_u8(self.parameters.code_block_height)?;
        writer.write_u8(self.parameters.code_block_style)?;
        writer.write_u8(self.parameters.transformation)?;
        for &size in &self.parameters.precinct_sizes {
            writer.write_u8(size)?;
        }
        Ok(())
    }
}

pub fn decode_cod<R: StreamRead + ?Sized>(reader: &mut R) -> Result<CodingStyleMarkerSegment> {
    let offset = reader.tell()?.saturating_sub(2);
    info!("COD start at byte offset {}", offset);
    let length = reader.read_u16()?;
    if length < 12 {
        return Err(CodestreamError::InvalidMarkerLength {
            marker: MARKER_SYMBOL_COD,
            offset,
            length,
        });
    }

    let coding_style = reader.read_u8()?;
    let progression_order = ProgressionOrder::new(reader.read_u8()?)?;
    let no_layers = reader.read_u16()?;
    let multiple_component_transformation = reader.read_u8()?;

    let mut parameters = CodingStyleParameters {
        no_decomposition_levels: reader.read_u8()?,
        code_block_width: reader.read_u8()?,
        code_block_height: reader.read_u8()?,
        code_block_style: reader.read_u8()?,
        transformation: reader.read_u8()?,
        precinct_sizes: Vec::new(),
    };

    if no_layers == 0 {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_COD,
            error: "number of layers is zero".to_owned(),
        });
    }
    if parameters.no_decomposition_levels > MAX_DECOMPOSITION_LEVELS {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_COD,
            error: format!(
                "{} decomposition levels exceed {}",
                parameters.no_decomposition_levels, MAX_DECOMPOSITION_LEVELS
            ),
        });
    }
    // xcb + ycb ≤ 12 with both exponents in 2..=10
    let (xcb, ycb) = parameters.code_block_exponents();
    if xcb > 10 || ycb > 10 || xcb + ycb > 12 {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_COD,
            error: format!("invalid code-block size 2^{} x 2^{}", xcb, ycb),
        });
    }

    if coding_style & 0b0000_0001 != 0 {
        let no_resolutions = parameters.no_decomposition_levels as usize + 1;
        if length as usize != 12 + no_resolutions {
            return Err(CodestreamError::InvalidMarkerLength {
                marker: MARKER_SYMBOL_COD,
                offset,
                length,
            });
        }
        parameters.precinct_sizes = vec![0; no_resolutions];
        reader.read_exact(&mut parameters.precinct_sizes)?;
    } else if length > 12 {
        reader.skip(length as i64 - 12)?;
    }

    info!("COD end at byte offset {}", reader.tell()?);
    Ok(CodingStyleMarkerSegment {
        offset,
        length,
        coding_style,
        progression_order,
        no_layers,
        multiple_component_transformation,
        parameters,
    })
}

// A.6.6
//
// Progression order change (POC)
//
// Function: Describes the bounds and progression order for any progression
// order other than that specified in the COD marker segments in the
// codestream.
pub fn decode_poc<R: StreamRead + ?Sized>(
    reader: &mut R,
    no_components: u16,
) -> Result<Vec<ProgressionChange>> {
    let offset = reader.tell()?.saturating_sub(2);
    info!("POC start at byte offset {}", offset);
    let length = reader.read_u16()?;

    // Component indices are 8 or 16 bits depending on Csiz.
    let wide = no_components >= 257;
    let record_size = if wide { 9 } else { 7 };
    if length < 2 + record_size || (length - 2) % record_size != 0 {
        return Err(CodestreamError::InvalidMarkerLength {
            marker: MARKER_SYMBOL_POC,
            offset,
            length,
        });
    }

    let read_component = |reader: &mut R| -> Result<u16> {
        if wide {
            Ok(reader.read_u16()?)
        } else {
            Ok(reader.read_u8()? as u16)
        }
    };

    let no_progression_order_change = (length - 2) / record_size;
    let mut changes = Vec::with_capacity(no_progression_order_change as usize);
    for _ in 0..no_progression_order_change {
        let resolution_start = reader.read_u8()?;
        let component_start = read_component(&mut *reader)?;
        let layer_end = reader.read_u16()?;
        let resolution_end = reader.read_u8()?;
        let component_end = match read_component(&mut *reader)? {
            0 if !wide => 256,
            value => value,
        };
        let progression_order = ProgressionOrder::new(reader.read_u8()?)?;
        changes.push(ProgressionChange {
            resolution_start,
            component_start,
            layer_end,
            resolution_end,
            component_end,
            progression_order,
        });
    }
    info!("POC end at byte offset {}", reader.tell()?);
    Ok(changes)
}

pub fn write_poc<W: StreamWrite + ?Sized>(
    writer: &mut W,
    changes: &[ProgressionChange],
    no_components: u16,
) -> Result<()> {
    let wide = no_components >= 257;
    let record_size = if wide { 9 } else { 7 };
    writer.write_marker(MARKER_SYMBOL_POC)?;
    writer.write_u16(2 + record_size * changes.len() as u16)?;
    for change in changes {
        writer.write_u8(change.resolution_start)?;
        if wide {
            writer.write_u16(change.component_start)?;
        } else {
            writer.write_u8(change.component_start as u8)?;
        }
        writer.write_u16(change.layer_end)?;
        writer.write_u8(change.resolution_end)?;
        if wide {
            writer.write_u16(change.component_end)?;
        } else {
            // 256 wraps to the reserved encoding 0
            writer.write_u8(change.component_end as u8)?;
        }
        writer.write_u8(change.progression_order.value())?;
    }
    Ok(())
}
