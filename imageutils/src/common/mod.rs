pub mod buffer2;
pub(crate) mod filter;

pub use buffer2::Buffer2;

use rayon::prelude::*;

/// Rows handed to one rayon task by the row-parallel helpers.
pub(crate) const ROWS_PER_CHUNK: usize = 16;

/// Fills `out` in parallel, calling `f(y, row)` once per output row.
///
/// Every row is written by exactly one call, so the result does not depend on
/// scheduling.
pub(crate) fn par_fill_rows<T, F>(out: &mut Buffer2<T>, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    let width = out.width();
    if width == 0 {
        return;
    }
    out.pixels_mut()
        .par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let y0 = chunk_idx * ROWS_PER_CHUNK;
            for (dy, row) in chunk.chunks_mut(width).enumerate() {
                f(y0 + dy, row);
            }
        });
}

/// Allocates a `width x height` buffer and fills it with [`par_fill_rows`].
pub(crate) fn par_buffer<T, F>(width: usize, height: usize, f: F) -> Buffer2<T>
where
    T: Default + Clone + Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    let mut out = Buffer2::new_default(width, height);
    par_fill_rows(&mut out, f);
    out
}
