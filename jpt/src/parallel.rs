// Per-tile dispatch. Tiles are independent once the codestream is indexed,
// so each closure gets its own tile and owns everything it allocates.
use log::debug;

use crate::error::Result;

/// Run `f` for every tile index and collect the outcomes in input order.
///
/// Uses the rayon thread pool when the `rayon` feature is enabled and runs
/// sequentially otherwise. A failing tile does not stop the others.
pub fn for_each_tile<T, F>(tiles: &[u16], f: F) -> Vec<(u16, Result<T>)>
where
    T: Send,
    F: Fn(u16) -> Result<T> + Sync + Send,
{
    debug!("dispatching {} tiles", tiles.len());

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        tiles
            .par_iter()
            .map(|&tile_index| (tile_index, f(tile_index)))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    {
        tiles
            .iter()
            .map(|&tile_index| (tile_index, f(tile_index)))
            .collect()
    }
}
