//! Raw frame representation for the encode pipeline.
//!
//! A [`Raster`] is one decoded input frame in planar 4:2:0 layout: a
//! full-resolution luma plane plus two half-resolution chroma planes.
//! Rasters are shared by reference count ([`RasterHandle`]) — a raster
//! lives only long enough to seed one generation of encode jobs, but
//! several jobs may hold it at once.
//!
//! [`Plane`] is the 2-D container underneath: a contiguous row-major
//! buffer with an index helper and a neighbour-aware iteration helper.
//! The codec's spatial predictor consumes cells together with their
//! already-visited `above` / `left` neighbours.

use std::sync::Arc;

/// Cheap shared handle to an immutable raster.
pub type RasterHandle = Arc<Raster>;

// ── Plane ────────────────────────────────────────────────────────

/// Contiguous row-major 2-D buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane<T: Copy> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

/// One cell visited in raster order, with its causal neighbours.
///
/// `above` and `left` are `None` on the top row / left column.
#[derive(Debug, Clone, Copy)]
pub struct CellContext<T: Copy> {
    pub column: usize,
    pub row: usize,
    pub value: T,
    pub above: Option<T>,
    pub left: Option<T>,
}

impl<T: Copy + Default> Plane<T> {
    /// Create a plane filled with `T::default()`.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "plane dimensions must be nonzero");
        Self {
            width,
            height,
            cells: vec![T::default(); width * height],
        }
    }
}

impl<T: Copy> Plane<T> {
    /// Wrap an existing row-major buffer.
    ///
    /// # Panics
    ///
    /// Panics if `cells.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, cells: Vec<T>) -> Self {
        assert_eq!(cells.len(), width * height, "buffer does not match dimensions");
        Self {
            width,
            height,
            cells,
        }
    }

    /// Width in cells.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in cells.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Index helper for the row-major layout.
    #[inline]
    pub fn at(&self, column: usize, row: usize) -> T {
        debug_assert!(column < self.width && row < self.height);
        self.cells[row * self.width + column]
    }

    /// Mutable access to a single cell.
    #[inline]
    pub fn at_mut(&mut self, column: usize, row: usize) -> &mut T {
        debug_assert!(column < self.width && row < self.height);
        &mut self.cells[row * self.width + column]
    }

    /// One row as a slice.
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.width;
        &self.cells[start..start + self.width]
    }

    /// The whole backing buffer in row-major order.
    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    /// Visit every cell in raster order together with its causal
    /// neighbours (the cell above and the cell to the left).
    pub fn contexts(&self) -> impl Iterator<Item = CellContext<T>> + '_ {
        (0..self.height).flat_map(move |row| {
            (0..self.width).map(move |column| CellContext {
                column,
                row,
                value: self.at(column, row),
                above: (row > 0).then(|| self.at(column, row - 1)),
                left: (column > 0).then(|| self.at(column - 1, row)),
            })
        })
    }
}

// ── Raster ───────────────────────────────────────────────────────

/// One decoded input frame in planar YUV 4:2:0 layout.
///
/// Chroma planes are `ceil(w/2) × ceil(h/2)`; odd display dimensions
/// round up, matching the YUV4MPEG convention.
#[derive(Debug, Clone)]
pub struct Raster {
    width: usize,
    height: usize,
    y: Plane<u8>,
    u: Plane<u8>,
    v: Plane<u8>,
}

impl Raster {
    /// Assemble a raster from its three planes.
    ///
    /// # Panics
    ///
    /// Panics if any plane's dimensions disagree with `width`/`height`.
    pub fn new(width: usize, height: usize, y: Plane<u8>, u: Plane<u8>, v: Plane<u8>) -> Self {
        assert_eq!((y.width(), y.height()), (width, height));
        let (cw, ch) = Self::chroma_dimensions(width, height);
        assert_eq!((u.width(), u.height()), (cw, ch));
        assert_eq!((v.width(), v.height()), (cw, ch));
        Self {
            width,
            height,
            y,
            u,
            v,
        }
    }

    /// Chroma plane dimensions for a given display size (4:2:0).
    pub fn chroma_dimensions(width: usize, height: usize) -> (usize, usize) {
        (width.div_ceil(2), height.div_ceil(2))
    }

    /// Display width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Display height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Luma plane.
    pub fn y(&self) -> &Plane<u8> {
        &self.y
    }

    /// First chroma plane.
    pub fn u(&self) -> &Plane<u8> {
        &self.u
    }

    /// Second chroma plane.
    pub fn v(&self) -> &Plane<u8> {
        &self.v
    }

    /// Total byte size across all three planes.
    pub fn byte_len(&self) -> usize {
        self.y.as_slice().len() + self.u.as_slice().len() + self.v.as_slice().len()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_indexing_is_row_major() {
        let p = Plane::from_vec(3, 2, vec![0u8, 1, 2, 10, 11, 12]);
        assert_eq!(p.at(0, 0), 0);
        assert_eq!(p.at(2, 0), 2);
        assert_eq!(p.at(0, 1), 10);
        assert_eq!(p.at(2, 1), 12);
        assert_eq!(p.row(1), &[10, 11, 12]);
    }

    #[test]
    fn contexts_expose_causal_neighbours() {
        let p = Plane::from_vec(2, 2, vec![1u8, 2, 3, 4]);
        let ctx: Vec<_> = p.contexts().collect();
        assert_eq!(ctx.len(), 4);

        // Top-left corner: no neighbours.
        assert_eq!(ctx[0].value, 1);
        assert!(ctx[0].above.is_none());
        assert!(ctx[0].left.is_none());

        // Top row: left only.
        assert_eq!(ctx[1].left, Some(1));
        assert!(ctx[1].above.is_none());

        // Left column: above only.
        assert_eq!(ctx[2].above, Some(1));
        assert!(ctx[2].left.is_none());

        // Interior: both.
        assert_eq!(ctx[3].above, Some(2));
        assert_eq!(ctx[3].left, Some(3));
    }

    #[test]
    fn chroma_dimensions_round_up() {
        assert_eq!(Raster::chroma_dimensions(640, 480), (320, 240));
        assert_eq!(Raster::chroma_dimensions(641, 481), (321, 241));
    }

    #[test]
    fn raster_byte_len() {
        let y = Plane::new(4, 4);
        let u = Plane::new(2, 2);
        let v = Plane::new(2, 2);
        let r = Raster::new(4, 4, y, u, v);
        assert_eq!(r.byte_len(), 16 + 4 + 4);
    }

    #[test]
    #[should_panic(expected = "buffer does not match dimensions")]
    fn from_vec_rejects_mismatched_buffer() {
        let _ = Plane::from_vec(3, 3, vec![0u8; 8]);
    }
}
