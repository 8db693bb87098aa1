// Per-resolution sample storage for one tile-component.
//
// Three coordinate systems are in play:
//
// 1) Canvas coordinates: the reference grid, with component sub-sampling
//    applied.
// 2) Band coordinates: relative to the owning subband's origin.
// 3) Buffer coordinates: every resolution translated to a common (0, 0)
//    origin. In full-tile mode a code-block placed relative to the origin of
//    its resolution lands directly in the shared top-level buffer.
//
// Window bounds held here are band or buffer relative unless a method says
// canvas.
use log::{debug, trace};
use std::mem;

use crate::error::{CodestreamError, Result};
use crate::geometry::{ceil_div_pow2, Point, Rect};
use crate::subband::BandOrientation;
use crate::tile::Resolution;

/// Synthesis filter support: 1 for the reversible 5-3 filter, 2 for the
/// irreversible 9-7 filter.
pub fn filter_pad(lossless: bool) -> u32 {
    if lossless {
        1
    } else {
        2
    }
}

// B-15
//
// Maps an unreduced tile-component window to the band window of the given
// orientation after `num_decomps` decompositions.
//
// tbx0 = ⌈(tcx0 - 2^(nb-1) · xob) / 2^nb⌉
// tby0 = ⌈(tcy0 - 2^(nb-1) · yob) / 2^nb⌉
// tbx1 = ⌈(tcx1 - 2^(nb-1) · xob) / 2^nb⌉
// tby1 = ⌈(tcy1 - 2^(nb-1) · yob) / 2^nb⌉
pub fn tile_comp_band_window(
    num_decomps: u8,
    orientation: BandOrientation,
    window: &Rect,
) -> Rect {
    if num_decomps == 0 {
        return *window;
    }
    let n = num_decomps as u32;
    let x_shift = (orientation.x_phase() as u64) << (n - 1);
    let y_shift = (orientation.y_phase() as u64) << (n - 1);
    let map = |edge: u32, shift: u64| -> u32 {
        if edge as u64 <= shift {
            0
        } else {
            ceil_div_pow2((edge as u64 - shift) as u32, n)
        }
    };
    Rect::new(
        map(window.x0, x_shift),
        map(window.y0, y_shift),
        map(window.x1, x_shift),
        map(window.y1, y_shift),
    )
}

/// Band window grown by `padding` samples at every decomposition step.
///
/// Computed one level at a time: the window and the tile-component are both
/// taken to one fewer decomposition, the window is grown by twice the padding
/// and clipped to the tile there, and the last step maps it into the band.
pub fn padded_tile_comp_band_window(
    num_decomps: u8,
    orientation: BandOrientation,
    window: &Rect,
    tile_comp: &Rect,
    padding: u32,
) -> Rect {
    if num_decomps == 0 {
        return window.grow(padding).intersection(tile_comp);
    }
    let (one_less_window, one_less_tile) = if num_decomps > 1 {
        (
            tile_comp_band_window(num_decomps - 1, BandOrientation::LL, window),
            tile_comp_band_window(num_decomps - 1, BandOrientation::LL, tile_comp),
        )
    } else {
        (*window, *tile_comp)
    };
    tile_comp_band_window(
        1,
        orientation,
        &one_less_window
            .grow(padding.saturating_mul(2))
            .intersection(&one_less_tile),
    )
}

/// Lower (L) and upper (H) halves produced by the horizontal pass of the
/// inverse transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitOrientation {
    L = 0,
    H = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Placement {
    arena: usize,
    offset: usize,
    stride: usize,
}

/// A rectangle of samples and, once allocated, where it lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    bounds: Rect,
    placement: Option<Placement>,
}

impl Window {
    fn new(bounds: Rect) -> Window {
        Window {
            bounds,
            placement: None,
        }
    }

    /// Relative bounds (band or buffer coordinates).
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }

    pub fn is_allocated(&self) -> bool {
        self.placement.is_some()
    }

    pub fn stride(&self) -> Option<usize> {
        self.placement.map(|placement| placement.stride)
    }

    fn attach(&mut self, arena: usize, offset: usize, stride: usize) {
        self.placement = Some(Placement {
            arena,
            offset,
            stride,
        });
    }

    fn span(&self, stride: usize) -> usize {
        let (width, height) = (self.width() as usize, self.height() as usize);
        if width == 0 || height == 0 {
            0
        } else {
            (height - 1) * stride + width
        }
    }
}

/// Read-only view of a window's samples.
pub struct WindowRef<'a, T> {
    data: &'a [T],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a, T: Copy> WindowRef<'a, T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.stride + x).copied()
    }

    pub fn row(&self, y: usize) -> Option<&'a [T]> {
        if y >= self.height {
            return None;
        }
        self.data.get(y * self.stride..y * self.stride + self.width)
    }
}

/// Mutable view of a window's samples.
pub struct WindowMut<'a, T> {
    data: &'a mut [T],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a, T: Copy> WindowMut<'a, T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.stride + x).copied()
    }

    /// Writes one sample; `false` when (x, y) is outside the window.
    pub fn set(&mut self, x: usize, y: usize, value: T) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        match self.data.get_mut(y * self.stride + x) {
            Some(sample) => {
                *sample = value;
                true
            }
            None => false,
        }
    }

    pub fn row_mut(&mut self, y: usize) -> Option<&mut [T]> {
        if y >= self.height {
            return None;
        }
        let start = y * self.stride;
        self.data.get_mut(start..start + self.width)
    }

    pub fn fill(&mut self, value: T) {
        for y in 0..self.height {
            if let Some(row) = self.row_mut(y) {
                row.iter_mut().for_each(|sample| *sample = value);
            }
        }
    }
}

/// Windows of one resolution.
#[derive(Clone, Debug)]
pub struct ResWindow {
    // Canvas coordinates; only present for windowed decompression.
    padded_band_windows: Vec<Rect>,

    // LL, HL, LH, HH above resolution 0; LL is the lower resolution.
    band_windows: Vec<Window>,

    // Buffer coordinates; only above resolution 0.
    split_windows: Option<[Window; 2]>,

    // Buffer coordinates.
    res_window: Window,
}

impl ResWindow {
    pub fn padded_band_windows(&self) -> &[Rect] {
        &self.padded_band_windows
    }

    pub fn band_windows(&self) -> &[Window] {
        &self.band_windows
    }

    pub fn split_windows(&self) -> Option<&[Window; 2]> {
        self.split_windows.as_ref()
    }

    pub fn res_window(&self) -> &Window {
        &self.res_window
    }
}

/// Construction parameters for a [`TileComponentWindowBuffer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowParams {
    pub compress: bool,
    pub lossless: bool,
    pub whole_tile: bool,
    pub tile_comp_unreduced: Rect,
    pub tile_comp_reduced: Rect,
    // Unreduced canvas window for decompression; ignored for compression.
    pub window_unreduced: Rect,
    pub no_resolutions: u8,
    pub reduced_no_resolutions: u8,
}

/// Resolution sample buffers of one tile-component.
///
/// In full-tile mode (compression, or decompression of the whole tile) every
/// window attaches into one top-level arena the size of the highest
/// resolution: the HL band sits at the lower resolution's width, LH at its
/// height, HH at both. Windowed decompression gives every window its own
/// arena.
#[derive(Debug)]
pub struct TileComponentWindowBuffer<T> {
    // decompress: unreduced / reduced window of the tile-component
    // compress: unreduced / reduced tile-component
    unreduced_bounds: Rect,
    bounds: Rect,
    resolutions: Vec<Rect>,
    bands: Vec<Vec<Rect>>,
    res_windows: Vec<ResWindow>,
    windowed: bool,
    compress: bool,
    no_resolutions: u8,
    arenas: Vec<Vec<T>>,
    allocated: bool,
}

impl<T: Copy + Default> TileComponentWindowBuffer<T> {
    pub fn new(params: &WindowParams, resolutions: &[Resolution]) -> Result<TileComponentWindowBuffer<T>> {
        let reduced = params.reduced_no_resolutions;
        if reduced == 0
            || reduced > params.no_resolutions
            || reduced as usize > resolutions.len()
        {
            return Err(CodestreamError::InvalidGeometry {
                error: format!(
                    "{} of {} resolutions requested with {} available",
                    reduced,
                    params.no_resolutions,
                    resolutions.len()
                ),
            });
        }

        let (bounds, unreduced_bounds) = if params.compress {
            (params.tile_comp_reduced, params.tile_comp_unreduced)
        } else {
            (
                params
                    .window_unreduced
                    .ceil_div_pow2((params.no_resolutions - reduced) as u32)
                    .intersection(&params.tile_comp_reduced),
                params
                    .window_unreduced
                    .intersection(&params.tile_comp_unreduced),
            )
        };

        let windowed = !params.compress && !params.whole_tile;
        let padding = if windowed {
            2 * filter_pad(params.lossless)
        } else {
            0
        };

        let resolutions = &resolutions[..reduced as usize];
        let res_rects: Vec<Rect> = resolutions.iter().map(Resolution::bounds).collect();
        let band_rects: Vec<Vec<Rect>> = resolutions
            .iter()
            .map(|resolution| resolution.bands().iter().map(|band| band.bounds()).collect())
            .collect();

        let mut res_windows = Vec::with_capacity(reduced as usize);
        for resno in 0..reduced {
            // the resolution window is the next resolution's LL band window
            let dims = if resno + 1 == reduced {
                bounds
            } else {
                tile_comp_band_window(
                    params.no_resolutions - 1 - resno,
                    BandOrientation::LL,
                    &unreduced_bounds,
                )
            };
            let res_window = Rect::from_size(dims.width(), dims.height());
            let res_window = if windowed {
                Self::windowed_res_window(
                    resno,
                    params.no_resolutions,
                    res_window,
                    &unreduced_bounds,
                    &params.tile_comp_unreduced,
                    padding,
                    &res_rects,
                    &band_rects,
                )?
            } else {
                Self::full_res_window(resno, res_window, &res_rects, &band_rects)
            };
            res_windows.push(res_window);
        }

        debug!(
            "window buffer: bounds {}, unreduced {}, {} resolutions, windowed {}",
            bounds, unreduced_bounds, reduced, windowed
        );

        Ok(TileComponentWindowBuffer {
            unreduced_bounds,
            bounds,
            resolutions: res_rects,
            bands: band_rects,
            res_windows,
            windowed,
            compress: params.compress,
            no_resolutions: params.no_resolutions,
            arenas: Vec::new(),
            allocated: false,
        })
    }

    fn full_res_window(
        resno: u8,
        res_window: Rect,
        res_rects: &[Rect],
        band_rects: &[Vec<Rect>],
    ) -> ResWindow {
        if resno == 0 {
            return ResWindow {
                padded_band_windows: Vec::new(),
                band_windows: vec![Window::new(res_window)],
                split_windows: None,
                res_window: Window::new(res_window),
            };
        }
        let lower = res_rects[resno as usize - 1];
        let mut band_windows = vec![Window::new(Rect::from_size(lower.width(), lower.height()))];
        band_windows.extend(
            band_rects[resno as usize]
                .iter()
                .map(|band| Window::new(Rect::from_size(band.width(), band.height()))),
        );
        let split_low = Rect::new(0, 0, res_window.width(), lower.height());
        let split_high = Rect::new(0, lower.height(), res_window.width(), res_window.height());
        ResWindow {
            padded_band_windows: Vec::new(),
            band_windows,
            split_windows: Some([Window::new(split_low), Window::new(split_high)]),
            res_window: Window::new(res_window),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn windowed_res_window(
        resno: u8,
        no_resolutions: u8,
        res_window: Rect,
        unreduced_window: &Rect,
        tile_comp_unreduced: &Rect,
        padding: u32,
        res_rects: &[Rect],
        band_rects: &[Vec<Rect>],
    ) -> Result<ResWindow> {
        // Table F-1
        let num_decomps = if resno == 0 {
            no_resolutions - 1
        } else {
            no_resolutions - resno
        };
        let orientations: &[BandOrientation] = if resno == 0 {
            &[BandOrientation::LL]
        } else {
            &[
                BandOrientation::LL,
                BandOrientation::HL,
                BandOrientation::LH,
                BandOrientation::HH,
            ]
        };
        let padded_band_windows: Vec<Rect> = orientations
            .iter()
            .map(|&orientation| {
                padded_tile_comp_band_window(
                    num_decomps,
                    orientation,
                    unreduced_window,
                    tile_comp_unreduced,
                    padding,
                )
            })
            .collect();

        if resno == 0 {
            return Ok(ResWindow {
                padded_band_windows,
                band_windows: vec![Window::new(res_window)],
                split_windows: None,
                res_window: Window::new(res_window),
            });
        }

        let lower = res_rects[resno as usize - 1];
        let mut band_windows = Vec::with_capacity(4);
        for (&orientation, padded) in orientations.iter().zip(padded_band_windows.iter()) {
            let band = match orientation {
                BandOrientation::LL => lower,
                _ => *band_rects[resno as usize]
                    .get(orientation.index() - 1)
                    .ok_or_else(|| CodestreamError::InvalidGeometry {
                        error: format!("resolution {} has no {} band", resno, orientation),
                    })?,
            };
            band_windows.push(Window::new(padded.pan(-(band.x0 as i64), -(band.y0 as i64))));
        }

        // Low-pass samples sit at even positions of the resolution, high-pass
        // at odd ones.
        let low = band_windows[BandOrientation::LL.index()].bounds();
        let high = band_windows[BandOrientation::HL.index()].bounds();
        let x0 = (2 * low.x0 as u64).min(2 * high.x0 as u64 + 1);
        let x1 = (2 * low.x1 as u64).max(2 * high.x1 as u64 + 1);
        let high = band_windows[BandOrientation::LH.index()].bounds();
        let y0 = (2 * low.y0 as u64).min(2 * high.y0 as u64 + 1);
        let y1 = (2 * low.y1 as u64).max(2 * high.y1 as u64 + 1);
        let clamp = |value: u64| value.min(u32::MAX as u64) as u32;
        let resolution = res_rects[resno as usize];
        let res_window = Rect::new(clamp(x0), clamp(y0), clamp(x1), clamp(y1))
            .clip(resolution.width(), resolution.height());

        let split_low = Rect::new(res_window.x0, low.y0, res_window.x1, low.y1);
        let split_high = Rect::new(
            res_window.x0,
            high.y0.saturating_add(lower.height()),
            res_window.x1,
            high.y1.saturating_add(lower.height()),
        );
        trace!(
            "resolution {}: window {}, split {} / {}",
            resno,
            res_window,
            split_low,
            split_high
        );

        Ok(ResWindow {
            padded_band_windows,
            band_windows,
            split_windows: Some([Window::new(split_low), Window::new(split_high)]),
            res_window: Window::new(res_window),
        })
    }

    /// Allocates the sample storage. Calling it again is a no-op.
    pub fn alloc(&mut self) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        if self.windowed {
            self.alloc_windowed()?;
        } else {
            self.alloc_full()?;
        }
        self.allocated = true;
        Ok(())
    }

    fn alloc_full(&mut self) -> Result<()> {
        let top = match self.res_windows.last() {
            Some(top) => top.res_window,
            None => return Ok(()),
        };
        let stride = top.width() as usize;
        let len = stride
            .checked_mul(top.height() as usize)
            .ok_or(CodestreamError::Allocation { requested: usize::MAX })?;
        self.arenas.push(allocate_arena(len)?);

        for resno in 0..self.res_windows.len() {
            let lower = match resno {
                0 => None,
                _ => Some(self.res_windows[resno - 1].res_window),
            };
            let res_window = &mut self.res_windows[resno];
            res_window.res_window.attach(0, 0, stride);
            match lower {
                None => res_window.band_windows[0].attach(0, 0, stride),
                Some(lower) => {
                    let (width, height) = (lower.width() as usize, lower.height() as usize);
                    for (index, window) in res_window.band_windows.iter_mut().enumerate() {
                        let offset = match BandOrientation::from_index(index) {
                            Some(BandOrientation::HL) => width,
                            Some(BandOrientation::LH) => height * stride,
                            Some(BandOrientation::HH) => width + height * stride,
                            _ => 0,
                        };
                        window.attach(0, offset, stride);
                    }
                    if let Some(split) = res_window.split_windows.as_mut() {
                        split[SplitOrientation::L as usize].attach(0, 0, stride);
                        split[SplitOrientation::H as usize].attach(0, height * stride, stride);
                    }
                }
            }
        }
        debug!("allocated {} samples for full tile", len);
        Ok(())
    }

    fn alloc_windowed(&mut self) -> Result<()> {
        let mut arenas = Vec::new();
        let mut attach = |window: &mut Window| -> Result<()> {
            let stride = window.width() as usize;
            let len = stride
                .checked_mul(window.height() as usize)
                .ok_or(CodestreamError::Allocation { requested: usize::MAX })?;
            arenas.push(allocate_arena::<T>(len)?);
            window.attach(arenas.len() - 1, 0, stride);
            Ok(())
        };
        for res_window in &mut self.res_windows {
            attach(&mut res_window.res_window)?;
            for window in &mut res_window.band_windows {
                attach(window)?;
            }
            if let Some(split) = res_window.split_windows.as_mut() {
                for window in split.iter_mut() {
                    attach(window)?;
                }
            }
        }
        debug!("allocated {} windowed buffers", arenas.len());
        self.arenas = arenas;
        Ok(())
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn is_windowed(&self) -> bool {
        self.windowed
    }

    /// decompress: reduced canvas bounds of the window
    /// compress: reduced canvas bounds of the tile-component
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn unreduced_bounds(&self) -> Rect {
        self.unreduced_bounds
    }

    pub fn no_resolutions(&self) -> u8 {
        self.no_resolutions
    }

    pub fn reduced_no_resolutions(&self) -> u8 {
        self.res_windows.len() as u8
    }

    pub fn res_windows(&self) -> &[ResWindow] {
        &self.res_windows
    }

    fn res_window_at(&self, resno: u8) -> Result<&ResWindow> {
        self.res_windows
            .get(resno as usize)
            .ok_or_else(|| CodestreamError::InvalidGeometry {
                error: format!(
                    "resolution {} outside window buffer of {} resolutions",
                    resno,
                    self.res_windows.len()
                ),
            })
    }

    /// Band window in band coordinates. At resolution 0 this is the
    /// resolution window.
    pub fn band_window(&self, resno: u8, orientation: BandOrientation) -> Result<&Window> {
        let res_window = self.res_window_at(resno)?;
        if resno == 0 {
            return Ok(&res_window.res_window);
        }
        res_window
            .band_windows
            .get(orientation.index())
            .ok_or_else(|| CodestreamError::InvalidGeometry {
                error: format!("resolution {} has no {} band window", resno, orientation),
            })
    }

    /// Padded band window in canvas coordinates, for windowed decompression.
    pub fn padded_band_window(&self, resno: u8, orientation: BandOrientation) -> Option<Rect> {
        let res_window = self.res_windows.get(resno as usize)?;
        let index = if resno == 0 { 0 } else { orientation.index() };
        res_window.padded_band_windows.get(index).copied()
    }

    pub fn split_window(&self, resno: u8, orientation: SplitOrientation) -> Result<&Window> {
        self.res_window_at(resno)?
            .split_windows
            .as_ref()
            .map(|split| &split[orientation as usize])
            .ok_or_else(|| CodestreamError::InvalidGeometry {
                error: format!("resolution {} has no split windows", resno),
            })
    }

    /// Resolution window in buffer coordinates.
    pub fn res_window(&self, resno: u8) -> Result<&Window> {
        Ok(&self.res_window_at(resno)?.res_window)
    }

    /// Highest resolution window, the output of the inverse transform.
    pub fn top_level_window(&self) -> Result<&Window> {
        self.res_windows
            .last()
            .map(|res_window| &res_window.res_window)
            .ok_or_else(|| CodestreamError::InvalidGeometry {
                error: "window buffer has no resolutions".to_owned(),
            })
    }

    /// Whether code-blocks above resolution 0 are placed in buffer
    /// coordinates (the shared top-level arena) rather than band
    /// coordinates.
    pub fn uses_buffer_coordinates(&self) -> bool {
        !self.windowed
    }

    /// Converts a code-block offset from canvas coordinates to band
    /// coordinates, or to buffer coordinates when the bands alias into the
    /// top-level buffer.
    pub fn to_relative_coordinates(
        &self,
        resno: u8,
        orientation: BandOrientation,
        x: u32,
        y: u32,
    ) -> Result<Point> {
        let bands = self
            .bands
            .get(resno as usize)
            .ok_or_else(|| CodestreamError::InvalidGeometry {
                error: format!("resolution {} outside window buffer", resno),
            })?;
        let index = if resno == 0 { 0 } else { orientation.index() - 1 };
        let band = bands.get(index).ok_or_else(|| CodestreamError::InvalidGeometry {
            error: format!("resolution {} has no {} band", resno, orientation),
        })?;
        let (mut x, mut y) = match (x.checked_sub(band.x0), y.checked_sub(band.y0)) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(CodestreamError::InvalidGeometry {
                    error: format!(
                        "offset ({}, {}) precedes {} band at {}",
                        x, y, orientation, band
                    ),
                })
            }
        };
        if self.uses_buffer_coordinates() && resno > 0 {
            let lower = self.resolutions[resno as usize - 1];
            if orientation.x_phase() == 1 {
                x += lower.width();
            }
            if orientation.y_phase() == 1 {
                y += lower.height();
            }
        }
        Ok(Point::new(x, y))
    }

    /// Window a code-block of the band is written to (decompress) or read
    /// from (compress).
    pub fn code_block_dest_window(&self, resno: u8, orientation: BandOrientation) -> Result<&Window> {
        if self.uses_buffer_coordinates() {
            self.top_level_window()
        } else {
            self.band_window(resno, orientation)
        }
    }

    fn view_range(&self, window: &Window) -> Result<(usize, std::ops::Range<usize>, usize)> {
        let placement = window.placement.ok_or_else(|| CodestreamError::InvalidGeometry {
            error: format!("window {} is not allocated", window.bounds),
        })?;
        let len = window.span(placement.stride);
        let end = placement.offset + len;
        match self.arenas.get(placement.arena) {
            Some(arena) if end <= arena.len() => {
                Ok((placement.arena, placement.offset..end, placement.stride))
            }
            _ => Err(CodestreamError::InvalidGeometry {
                error: format!("window {} exceeds its buffer", window.bounds),
            }),
        }
    }

    pub fn view(&self, window: &Window) -> Result<WindowRef<'_, T>> {
        let (arena, range, stride) = self.view_range(window)?;
        Ok(WindowRef {
            data: &self.arenas[arena][range],
            width: window.width() as usize,
            height: window.height() as usize,
            stride,
        })
    }

    pub fn view_mut(&mut self, window: &Window) -> Result<WindowMut<'_, T>> {
        let (arena, range, stride) = self.view_range(window)?;
        Ok(WindowMut {
            data: &mut self.arenas[arena][range],
            width: window.width() as usize,
            height: window.height() as usize,
            stride,
        })
    }

    /// Strided area of the output buffer in samples.
    pub fn strided_area(&self) -> u64 {
        match self.top_level_window() {
            Ok(window) => window.stride().unwrap_or(window.width() as usize) as u64 * self.bounds.height() as u64,
            Err(_) => 0,
        }
    }

    /// Hands the output samples to the caller, leaving the buffer
    /// unallocated.
    pub fn take_output(&mut self) -> Result<(Vec<T>, usize)> {
        let window = *self.top_level_window()?;
        let placement = window.placement.ok_or_else(|| CodestreamError::InvalidGeometry {
            error: "output window is not allocated".to_owned(),
        })?;
        let samples = match self.arenas.get_mut(placement.arena) {
            Some(arena) => mem::take(arena),
            None => Vec::new(),
        };
        self.arenas.clear();
        for res_window in &mut self.res_windows {
            res_window.res_window.placement = None;
            res_window.band_windows.iter_mut().for_each(|w| w.placement = None);
            if let Some(split) = res_window.split_windows.as_mut() {
                split.iter_mut().for_each(|w| w.placement = None);
            }
        }
        self.allocated = false;
        Ok((samples, placement.stride))
    }

    pub fn is_compress(&self) -> bool {
        self.compress
    }
}

fn allocate_arena<T: Copy + Default>(len: usize) -> Result<Vec<T>> {
    let mut arena = Vec::new();
    arena
        .try_reserve_exact(len)
        .map_err(|_| CodestreamError::Allocation { requested: len })?;
    arena.resize(len, T::default());
    Ok(arena)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_window_phases() {
        let window = Rect::new(5, 7, 30, 21);
        // LL: ⌈x / 2⌉
        assert_eq!(
            tile_comp_band_window(1, BandOrientation::LL, &window),
            Rect::new(3, 4, 15, 11)
        );
        // HL: ⌈(x - 1) / 2⌉ horizontally
        assert_eq!(
            tile_comp_band_window(1, BandOrientation::HL, &window),
            Rect::new(2, 4, 15, 11)
        );
        assert_eq!(
            tile_comp_band_window(2, BandOrientation::HH, &window),
            Rect::new(1, 2, 7, 5)
        );
        // edges at or before the shift collapse to 0
        assert_eq!(
            tile_comp_band_window(3, BandOrientation::HH, &Rect::new(0, 2, 4, 40)),
            Rect::new(0, 0, 0, 5)
        );
    }

    #[test]
    fn test_padded_band_window_is_clipped_to_tile() {
        let tile = Rect::new(0, 0, 64, 64);
        let window = Rect::new(0, 0, 8, 8);
        let padded = padded_tile_comp_band_window(1, BandOrientation::LL, &window, &tile, 2);
        // grown by 4 then clipped at the tile origin
        assert_eq!(padded, Rect::new(0, 0, 6, 6));
        assert_eq!(
            padded_tile_comp_band_window(0, BandOrientation::LL, &window, &tile, 3),
            Rect::new(0, 0, 11, 11)
        );
    }

    #[test]
    fn test_filter_pad() {
        assert_eq!(filter_pad(true), 1);
        assert_eq!(filter_pad(false), 2);
    }

    #[test]
    fn test_window_views() {
        let mut buffer: TileComponentWindowBuffer<i32> = TileComponentWindowBuffer {
            unreduced_bounds: Rect::from_size(4, 3),
            bounds: Rect::from_size(4, 3),
            resolutions: vec![Rect::from_size(4, 3)],
            bands: vec![vec![Rect::from_size(4, 3)]],
            res_windows: vec![TileComponentWindowBuffer::<i32>::full_res_window(
                0,
                Rect::from_size(4, 3),
                &[Rect::from_size(4, 3)],
                &[vec![Rect::from_size(4, 3)]],
            )],
            windowed: false,
            compress: true,
            no_resolutions: 1,
            arenas: Vec::new(),
            allocated: false,
        };
        buffer.alloc().unwrap();
        let window = *buffer.top_level_window().unwrap();
        {
            let mut view = buffer.view_mut(&window).unwrap();
            view.fill(7);
            assert!(view.set(3, 2, -1));
            assert!(!view.set(4, 0, 1));
        }
        let view = buffer.view(&window).unwrap();
        assert_eq!(view.row(2).unwrap(), &[7, 7, 7, -1]);
        assert_eq!(view.get(0, 3), None);
        assert_eq!(buffer.strided_area(), 12);
        let (samples, stride) = buffer.take_output().unwrap();
        assert_eq!((samples.len(), stride), (12, 4));
        assert!(!buffer.is_allocated());
    }
}
