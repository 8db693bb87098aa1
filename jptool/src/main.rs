use clap::Parser;
use log::info;
use std::error;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::str::FromStr;

use jpt::codestream::{index_codestream, CodestreamIndex, ScanOptions};
use jpt::geometry::Rect;
use jpt::parallel::for_each_tile;
use jpt::window::SplitOrientation;

#[derive(Debug)]
enum JptoolError {
    IndexingCodestream { error: String },
    InvalidRegion { region: String },
    TileUnavailable { tile_index: u16, error: String },
}

impl error::Error for JptoolError {}
impl fmt::Display for JptoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IndexingCodestream { error } => {
                write!(f, "error indexing codestream {}", error)
            }
            Self::InvalidRegion { region } => {
                write!(f, "invalid region {:?}, expected x0,y0,x1,y1", region)
            }
            Self::TileUnavailable { tile_index, error } => {
                write!(f, "tile {} unavailable {}", tile_index, error)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region(Rect);

impl FromStr for Region {
    type Err = JptoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || JptoolError::InvalidRegion {
            region: value.to_owned(),
        };
        let coordinates = value
            .split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| invalid())?;
        match coordinates[..] {
            [x0, y0, x1, y1] if x0 <= x1 && y0 <= y1 => Ok(Region(Rect::new(x0, y0, x1, y1))),
            _ => Err(invalid()),
        }
    }
}

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Index a raw codestream and dump its markers and tile-parts
    Index(Index),

    /// Seek directly to a tile and print its tile-parts
    Tile(Tile),

    /// Print the packet sequence of a tile
    Packets(Packets),

    /// Print the per-resolution windows of a tile-component buffer
    Window(Window),

    /// Per-tile packet counts
    Summary(Summary),
}

#[derive(Parser)]
struct Index {
    /// Path to .j2c / .jpc codestream
    path: String,

    /// Stop at the first tile-part error instead of skipping the tile-part
    #[clap(long)]
    strict: bool,
}

#[derive(Parser)]
struct Tile {
    /// Path to .j2c / .jpc codestream
    path: String,

    /// Tile index (Isot)
    tile: u16,
}

#[derive(Parser)]
struct Packets {
    /// Path to .j2c / .jpc codestream
    path: String,

    #[clap(short, long, default_value = "0")]
    tile: u16,

    /// Print at most this many packets
    #[clap(short, long)]
    limit: Option<usize>,
}

#[derive(Parser)]
struct Window {
    /// Path to .j2c / .jpc codestream
    path: String,

    #[clap(short, long, default_value = "0")]
    tile: u16,

    #[clap(short, long, default_value = "0")]
    component: u16,

    /// Canvas region of the component, x0,y0,x1,y1; whole tile if omitted
    #[clap(long)]
    region: Option<Region>,

    /// Number of highest resolutions to discard
    #[clap(long, default_value = "0")]
    reduce: u8,
}

#[derive(Parser)]
struct Summary {
    /// Path to .j2c / .jpc codestream
    path: String,
}

fn open_index(path: &str, options: ScanOptions) -> Result<(BufReader<File>, CodestreamIndex), Box<dyn Error>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let index = match index_codestream(&mut reader, options) {
        Ok(index) => index,
        Err(error) => {
            return Err(JptoolError::IndexingCodestream {
                error: error.to_string(),
            }
            .into())
        }
    };
    info!(
        "indexed {}: {} tiles, {} tile errors",
        path,
        index.info().no_tiles(),
        index.tile_errors().len()
    );
    Ok((reader, index))
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match opts.subcommand {
        SubCommand::Index(c) => {
            let (_, index) = open_index(&c.path, ScanOptions { strict: c.strict })?;
            let siz = index.header().siz();
            writeln!(
                out,
                "image {} tiles {}x{} components {}",
                siz.image_area(),
                siz.no_x_tiles(),
                siz.no_y_tiles(),
                siz.no_components()
            )?;
            if let Some(cod) = index.header().cod() {
                writeln!(
                    out,
                    "progression {} layers {} resolutions {}",
                    cod.progression_order(),
                    cod.no_layers(),
                    cod.coding_style_parameters().no_resolutions()
                )?;
            }
            for comment in index.header().comments() {
                writeln!(out, "comment {:?}", comment)?;
            }
            index.info().dump(&mut out)?;
            for tile_error in index.tile_errors() {
                writeln!(
                    out,
                    "error tile {} tile-part {}: {}",
                    tile_error.tile_index, tile_error.tile_part_index, tile_error.error
                )?;
            }
        }
        SubCommand::Tile(c) => {
            let (mut reader, mut index) = open_index(&c.path, ScanOptions::default())?;
            if let Err(error) = index.seek_to_tile(&mut reader, c.tile) {
                return Err(JptoolError::TileUnavailable {
                    tile_index: c.tile,
                    error: error.to_string(),
                }
                .into());
            }
            let tile = match index.info().tile_info(c.tile) {
                Some(tile) => tile,
                None => {
                    return Err(JptoolError::TileUnavailable {
                        tile_index: c.tile,
                        error: "no tile-parts indexed".to_owned(),
                    }
                    .into())
                }
            };
            let geometry = index.tile_geometry(c.tile)?;
            writeln!(out, "tile {} bounds {}", c.tile, geometry.bounds())?;
            for (i, tile_part) in tile.tile_parts().iter().enumerate() {
                writeln!(
                    out,
                    "tile-part {} start {} header end {} end {} data {}",
                    i,
                    tile_part.start_position(),
                    tile_part.end_header_position(),
                    tile_part.end_position(),
                    tile_part.data_length()
                )?;
            }
            if !tile.packet_lengths().is_empty() {
                writeln!(out, "{} packet lengths", tile.packet_lengths().len())?;
            }
        }
        SubCommand::Packets(c) => {
            let (_, index) = open_index(&c.path, ScanOptions::default())?;
            let geometry = index.tile_geometry(c.tile)?;
            let packets = geometry.packet_sequence()?;
            writeln!(
                out,
                "tile {} {} order, {} packets",
                c.tile,
                geometry.progression_order(),
                packets.len()
            )?;
            let limit = c.limit.unwrap_or(packets.len());
            for packet in packets.iter().take(limit) {
                writeln!(out, "{}", packet)?;
            }
        }
        SubCommand::Window(c) => {
            let (_, index) = open_index(&c.path, ScanOptions::default())?;
            let geometry = index.tile_geometry(c.tile)?;
            let region = c.region.map(|Region(rect)| rect);
            let mut buffer = geometry.window_buffer::<i32>(c.component, region, c.reduce, false)?;
            buffer.alloc()?;
            writeln!(
                out,
                "tile {} component {} bounds {} unreduced {} windowed {}",
                c.tile,
                c.component,
                buffer.bounds(),
                buffer.unreduced_bounds(),
                buffer.is_windowed()
            )?;
            for (resno, res_window) in buffer.res_windows().iter().enumerate() {
                writeln!(out, "resolution {} window {}", resno, res_window.res_window().bounds())?;
                for (band, window) in res_window.band_windows().iter().enumerate() {
                    writeln!(out, "  band {} window {}", band, window.bounds())?;
                }
                for (band, padded) in res_window.padded_band_windows().iter().enumerate() {
                    writeln!(out, "  band {} padded {}", band, padded)?;
                }
                if let Some(split) = res_window.split_windows() {
                    writeln!(
                        out,
                        "  split {:?} {} {:?} {}",
                        SplitOrientation::L,
                        split[0].bounds(),
                        SplitOrientation::H,
                        split[1].bounds()
                    )?;
                }
            }
        }
        SubCommand::Summary(c) => {
            let (_, index) = open_index(&c.path, ScanOptions::default())?;
            let tiles: Vec<u16> = index.info().tiles().map(|tile| tile.tile_index()).collect();
            let results = for_each_tile(&tiles, |tile_index| {
                let geometry = index.tile_geometry(tile_index)?;
                Ok((geometry.no_packets(), geometry.packet_sequence()?.len()))
            });
            for (tile_index, result) in results {
                match result {
                    Ok((expected, iterated)) => writeln!(
                        out,
                        "tile {} packets {} iterated {}",
                        tile_index, expected, iterated
                    )?,
                    Err(error) => writeln!(out, "tile {} error {}", tile_index, error)?,
                }
            }
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => {
            return Err(e.to_string().into());
        }
        Ok(_) => Ok(()),
    }
}
