//! Mutable spectrogram buffer and the 2D operations the detection path
//! chains together: kernel convolution, per-column percentile filtering,
//! binarisation, 4-connected component labelling and small-area deletion.
//!
//! Every operation takes a column range and clamps it to the buffer, so the
//! callers can express "the window around an instant" without bounds
//! bookkeeping. Writes go into the backing buffer in place.

use crate::util::{Interpolation, median, percentile, variance};
use ndarray::{Array2, ArrayView2, s};
use std::ops::Range;

/// Fill for cells below a column percentile.
pub const PERCENTILE_FILL: f64 = 0.001;
/// Fill for cells below the low-signal threshold.
pub const LOW_FILL: f64 = 1e-6;
/// Fill for deleted small components.
pub const DELETED_FILL: f64 = 1e-7;
/// Binarisation threshold used when labelling components.
pub const COMPONENT_THRESHOLD: f64 = 0.01;

/// Bounding box of a labelled component, rows and columns as half-open
/// ranges on the spectrogram grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Component {
    pub fn height(&self) -> usize {
        self.rows.end - self.rows.start
    }

    pub fn width(&self) -> usize {
        self.cols.end - self.cols.start
    }
}

pub struct Workbench {
    data: Array2<f64>,
}

impl Workbench {
    pub fn new(data: Array2<f64>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[[row, col]] = value;
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn all(&self) -> Range<usize> {
        0..self.cols()
    }

    fn clamp(&self, range: &Range<usize>) -> Range<usize> {
        let end = range.end.min(self.cols());
        range.start.min(end)..end
    }

    /// Convolve the column range with `kernel`, `repeat` times, with
    /// zero-extension outside the range. The origin of an even-sized kernel
    /// is at `(rows/2, cols/2)`.
    pub fn convolve(&mut self, kernel: &Array2<f64>, repeat: usize, range: Range<usize>) {
        let range = self.clamp(&range);
        if range.is_empty() || kernel.is_empty() {
            return;
        }
        let mut src = self.data.slice(s![.., range.clone()]).to_owned();
        for _ in 0..repeat {
            src = convolve2d(&src, kernel);
        }
        self.data.slice_mut(s![.., range]).assign(&src);
    }

    /// Per-column percentile gate: cells strictly below the column's p-th
    /// percentile become `PERCENTILE_FILL`.
    pub fn filter_by_percentile(&mut self, p: f64, range: Range<usize>) {
        let range = self.clamp(&range);
        for col in range {
            let values: Vec<f64> = self.data.column(col).to_vec();
            let cutoff = percentile(&values, p, Interpolation::Linear);
            for v in self.data.column_mut(col) {
                if *v < cutoff {
                    *v = PERCENTILE_FILL;
                }
            }
        }
    }

    /// Cells strictly below `min_value` become `LOW_FILL`.
    pub fn filter_low(&mut self, min_value: f64, range: Range<usize>) {
        let range = self.clamp(&range);
        for v in self.data.slice_mut(s![.., range]) {
            if *v < min_value {
                *v = LOW_FILL;
            }
        }
    }

    /// Cells strictly above `max_value` are clamped to the normalised
    /// ceiling. Tames saturating interference before kernel passes.
    pub fn filter_high(&mut self, max_value: f64, range: Range<usize>) {
        let range = self.clamp(&range);
        for v in self.data.slice_mut(s![.., range]) {
            if *v > max_value {
                *v = 1.0;
            }
        }
    }

    /// 0/1 matrix over the column range, 1 where the cell exceeds
    /// `threshold`.
    pub fn binarize(&self, threshold: f64, range: Range<usize>) -> Array2<u8> {
        let range = self.clamp(&range);
        self.data
            .slice(s![.., range])
            .mapv(|v| u8::from(v > threshold))
    }

    /// Label 4-connected components above `threshold` within the column
    /// range. Column coordinates of the returned boxes are absolute.
    pub fn label_components(&self, threshold: f64, range: Range<usize>) -> Vec<Component> {
        let range = self.clamp(&range);
        let offset = range.start;
        let mask = self.binarize(threshold, range);
        label_mask(&mask)
            .into_iter()
            .map(|c| Component {
                rows: c.rows,
                cols: c.cols.start + offset..c.cols.end + offset,
            })
            .collect()
    }

    /// Erase every component whose bounding box is shorter than
    /// `min_height`: the whole box is set to `DELETED_FILL`.
    pub fn delete_short_components(&mut self, min_height: usize, range: Range<usize>) {
        let components = self.label_components(COMPONENT_THRESHOLD, range);
        for c in components {
            if c.height() < min_height {
                self.data
                    .slice_mut(s![c.rows.clone(), c.cols.clone()])
                    .fill(DELETED_FILL);
            }
        }
    }

    pub fn slice(&self, range: Range<usize>) -> ArrayView2<'_, f64> {
        let range = self.clamp(&range);
        self.data.slice(s![.., range])
    }

    pub fn slice_owned(&self, range: Range<usize>) -> Array2<f64> {
        self.slice(range).to_owned()
    }

    /// Default low-signal threshold, estimated from the quietest part of the
    /// given row band: split the band into 3x10 blocks, drop the
    /// high-variance half, take the block with the strongest 95th
    /// percentile, smooth it with a 5x5 mean kernel and report its 97th
    /// percentile. Returns `None` when the band is too small to split.
    pub fn estimate_low_threshold(&self, rows: Range<usize>) -> Option<f64> {
        const BLOCK_ROWS: usize = 3;
        const BLOCK_COLS: usize = 10;

        let rows = rows.start.min(self.rows())..rows.end.min(self.rows());
        let band = self.data.slice(s![rows, ..]);
        let rows_per_block = band.nrows() / BLOCK_ROWS;
        let cols_per_block = band.ncols() / BLOCK_COLS;
        if rows_per_block == 0 || cols_per_block == 0 {
            return None;
        }

        struct BlockInfo {
            variance: f64,
            percentile_95: f64,
            index: (usize, usize),
        }

        let mut blocks = Vec::with_capacity(BLOCK_ROWS * BLOCK_COLS);
        for br in 0..BLOCK_ROWS {
            for bc in 0..BLOCK_COLS {
                let block = band.slice(s![
                    br * rows_per_block..(br + 1) * rows_per_block,
                    bc * cols_per_block..(bc + 1) * cols_per_block
                ]);
                let values: Vec<f64> = block.iter().copied().collect();
                blocks.push(BlockInfo {
                    variance: variance(&values),
                    percentile_95: percentile(&values, 95.0, Interpolation::Linear),
                    index: (br, bc),
                });
            }
        }

        let var_median = median(&blocks.iter().map(|b| b.variance).collect::<Vec<_>>());
        blocks.retain(|b| b.variance < var_median);
        let best = blocks
            .iter()
            .max_by(|a, b| a.percentile_95.total_cmp(&b.percentile_95))?;

        let (br, bc) = best.index;
        let block = band
            .slice(s![
                br * rows_per_block..(br + 1) * rows_per_block,
                bc * cols_per_block..(bc + 1) * cols_per_block
            ])
            .to_owned();
        let smoothed = convolve2d_symm(&block, &mean_kernel(5));
        let values: Vec<f64> = smoothed.iter().copied().collect();
        Some(percentile(&values, 97.0, Interpolation::Linear))
    }
}

pub fn mean_kernel(size: usize) -> Array2<f64> {
    Array2::from_elem((size, size), 1.0 / (size * size) as f64)
}

/// True 2D convolution (kernel flipped), zero outside the input.
fn convolve2d(input: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = input.dim();
    let (krows, kcols) = kernel.dim();
    let (cr, cc) = (krows as isize / 2, kcols as isize / 2);

    let mut out = Array2::<f64>::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            let mut acc = 0.0;
            for u in 0..krows {
                let ii = i as isize + cr - u as isize;
                if ii < 0 || ii >= rows as isize {
                    continue;
                }
                for v in 0..kcols {
                    let jj = j as isize + cc - v as isize;
                    if jj < 0 || jj >= cols as isize {
                        continue;
                    }
                    acc += kernel[[u, v]] * input[[ii as usize, jj as usize]];
                }
            }
            out[[i, j]] = acc;
        }
    }
    out
}

// Same, but with reflected (symmetric) boundaries; only used for the small
// threshold-estimation block.
fn convolve2d_symm(input: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = input.dim();
    let (krows, kcols) = kernel.dim();
    let (cr, cc) = (krows as isize / 2, kcols as isize / 2);

    let reflect = |idx: isize, len: usize| -> usize {
        let len = len as isize;
        let mut i = idx;
        if i < 0 {
            i = -i - 1;
        }
        if i >= len {
            i = 2 * len - i - 1;
        }
        i.clamp(0, len - 1) as usize
    };

    let mut out = Array2::<f64>::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            let mut acc = 0.0;
            for u in 0..krows {
                let ii = reflect(i as isize + cr - u as isize, rows);
                for v in 0..kcols {
                    let jj = reflect(j as isize + cc - v as isize, cols);
                    acc += kernel[[u, v]] * input[[ii, jj]];
                }
            }
            out[[i, j]] = acc;
        }
    }
    out
}

/// 4-connected labelling of a binary mask, components in scan order.
fn label_mask(mask: &Array2<u8>) -> Vec<Component> {
    let (rows, cols) = mask.dim();
    let mut visited = Array2::<u8>::zeros((rows, cols));
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            if mask[[r, c]] == 0 || visited[[r, c]] != 0 {
                continue;
            }
            let (mut r0, mut r1, mut c0, mut c1) = (r, r, c, c);
            stack.push((r, c));
            visited[[r, c]] = 1;
            while let Some((pr, pc)) = stack.pop() {
                r0 = r0.min(pr);
                r1 = r1.max(pr);
                c0 = c0.min(pc);
                c1 = c1.max(pc);
                let mut push = |nr: usize, nc: usize| {
                    if mask[[nr, nc]] != 0 && visited[[nr, nc]] == 0 {
                        visited[[nr, nc]] = 1;
                        stack.push((nr, nc));
                    }
                };
                if pr > 0 {
                    push(pr - 1, pc);
                }
                if pr + 1 < rows {
                    push(pr + 1, pc);
                }
                if pc > 0 {
                    push(pr, pc - 1);
                }
                if pc + 1 < cols {
                    push(pr, pc + 1);
                }
            }
            components.push(Component {
                rows: r0..r1 + 1,
                cols: c0..c1 + 1,
            });
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn bench(data: Array2<f64>) -> Workbench {
        Workbench::new(data)
    }

    #[test]
    fn identity_convolution_is_a_noop() {
        let data = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let mut wb = bench(data.clone());
        let identity = array![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        wb.convolve(&identity, 3, 0..3);
        for (a, b) in wb.data().iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn vertical_mean_kernel_averages_neighbours() {
        let mut wb = bench(array![[0.0, 0.0], [3.0, 3.0], [0.0, 0.0], [0.0, 0.0]]);
        let kernel = array![[1.0 / 3.0], [1.0 / 3.0], [1.0 / 3.0]];
        let all = wb.all();
        wb.convolve(&kernel, 1, all);
        // The bright row spreads one row up and down.
        assert!((wb.data()[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((wb.data()[[1, 0]] - 1.0).abs() < 1e-12);
        assert!((wb.data()[[2, 0]] - 1.0).abs() < 1e-12);
        assert!(wb.data()[[3, 0]].abs() < 1e-12);
    }

    #[test]
    fn convolution_outside_range_is_untouched() {
        let mut wb = bench(Array2::from_elem((4, 6), 1.0));
        let kernel = mean_kernel(3);
        wb.convolve(&kernel, 1, 2..4);
        for col in [0, 1, 4, 5] {
            assert!(wb.data().column(col).iter().all(|&v| v == 1.0));
        }
        // Range edges see zero-extension, so corners drop below 1.
        assert!(wb.data()[[0, 2]] < 1.0);
    }

    #[test]
    fn percentile_zero_passes_everything() {
        let data = Array2::from_shape_fn((10, 4), |(i, j)| (i * 4 + j) as f64 + 1.0);
        let mut wb = bench(data.clone());
        wb.filter_by_percentile(0.0, 0..4);
        assert_eq!(wb.data(), &data);
    }

    #[test]
    fn percentile_filter_fills_below_cutoff() {
        let mut wb = bench(Array2::from_shape_fn((100, 2), |(i, _)| i as f64));
        wb.filter_by_percentile(95.0, 0..2);
        // Rows 0..94 fall below the 95th percentile (94.05).
        assert_eq!(wb.data()[[0, 0]], PERCENTILE_FILL);
        assert_eq!(wb.data()[[94, 0]], PERCENTILE_FILL);
        assert_eq!(wb.data()[[95, 1]], 95.0);
        assert_eq!(wb.data()[[99, 1]], 99.0);
    }

    #[test]
    fn filter_low_uses_the_small_fill() {
        let mut wb = bench(array![[0.5, 0.01], [0.2, 0.9]]);
        wb.filter_low(0.3, 0..2);
        assert_eq!(wb.data()[[0, 1]], LOW_FILL);
        assert_eq!(wb.data()[[1, 0]], LOW_FILL);
        assert_eq!(wb.data()[[0, 0]], 0.5);
    }

    #[test]
    fn filter_high_clamps_to_the_ceiling() {
        let mut wb = bench(array![[0.5, 3.0], [0.2, 12.0]]);
        wb.filter_high(2.0, 0..2);
        assert_eq!(wb.data()[[0, 1]], 1.0);
        assert_eq!(wb.data()[[1, 1]], 1.0);
        assert_eq!(wb.data()[[0, 0]], 0.5);
    }

    #[test]
    fn binarize_marks_cells_above_threshold() {
        let wb = bench(array![[0.5, 0.005], [0.02, 0.0]]);
        let mask = wb.binarize(0.01, 0..2);
        assert_eq!(mask, array![[1u8, 0], [1, 0]]);
    }

    #[test]
    fn labelling_is_four_connected() {
        // Two cells touching only diagonally are distinct components.
        let wb = bench(array![
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 1.0],
            [0.0, 0.0, 1.0]
        ]);
        let components = wb.label_components(0.5, 0..3);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].rows, 0..1);
        assert_eq!(components[0].cols, 0..1);
        assert_eq!(components[1].rows, 1..3);
        assert_eq!(components[1].cols, 1..3);
    }

    #[test]
    fn label_columns_are_absolute() {
        let mut data = Array2::<f64>::zeros((4, 8));
        data[[1, 5]] = 1.0;
        data[[2, 5]] = 1.0;
        let components = bench(data).label_components(0.5, 4..8);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].cols, 5..6);
        assert_eq!(components[0].rows, 1..3);
    }

    #[test]
    fn delete_short_components_clears_whole_region() {
        let mut wb = bench(Array2::from_elem((6, 5), 0.5));
        wb.delete_short_components(7, 0..5);
        assert!(wb.data().iter().all(|&v| v == DELETED_FILL));
    }

    #[test]
    fn delete_keeps_tall_components() {
        let mut data = Array2::<f64>::zeros((10, 3));
        for r in 0..8 {
            data[[r, 1]] = 1.0;
        }
        data[[9, 0]] = 1.0;
        let mut wb = bench(data);
        wb.delete_short_components(3, 0..3);
        assert_eq!(wb.data()[[0, 1]], 1.0);
        assert_eq!(wb.data()[[9, 0]], DELETED_FILL);
    }

    #[test]
    fn slices_view_and_copy_the_backing_buffer() {
        let data = Array2::from_shape_fn((3, 6), |(i, j)| (i * 6 + j) as f64);
        let mut wb = bench(data);
        let copy = wb.slice_owned(2..4);
        assert_eq!(copy.dim(), (3, 2));
        assert_eq!(copy[[0, 0]], 2.0);

        wb.filter_low(1e9, 2..4);
        // The view reflects the mutation, the earlier copy does not.
        assert_eq!(wb.slice(2..4)[[0, 0]], LOW_FILL);
        assert_eq!(copy[[0, 0]], 2.0);
        assert_eq!(wb.slice(4..999).dim(), (3, 2));
    }

    #[test]
    fn ranges_are_clamped() {
        let mut wb = bench(Array2::from_elem((3, 4), 1.0));
        wb.filter_by_percentile(50.0, 2..100);
        wb.filter_low(0.5, 50..60);
        assert_eq!(wb.label_components(0.5, 0..999).len(), 1);
    }

    #[test]
    fn threshold_estimate_prefers_the_brightest_quiet_block() {
        // Left half: loud, high-variance clutter. Right half: quiet floor
        // with one slightly brighter block in the top-right corner.
        let data = Array2::from_shape_fn((30, 40), |(i, j)| {
            if j < 20 {
                if (i + j) % 2 == 0 { 0.01 } else { 0.0 }
            } else if i < 10 && j >= 36 {
                0.0015
            } else {
                0.001
            }
        });
        let wb = bench(data);
        let threshold = wb.estimate_low_threshold(0..30).unwrap();
        assert!((threshold - 0.0015).abs() < 1e-9, "got {threshold}");

        // Too small to split into 3x10 blocks.
        assert!(
            bench(Array2::zeros((2, 5)))
                .estimate_low_threshold(0..2)
                .is_none()
        );
    }
}
