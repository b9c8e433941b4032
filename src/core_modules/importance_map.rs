// THEORY:
// The `ImportanceMap` is the input to every decision the ablation pipeline makes.
// It is a "dumb" data container: a 2D grid of per-pixel scores produced by an
// external saliency method for exactly one image. It knows its own shape and how
// to hand out its scores in row-major order, nothing more.
//
// Key architectural principles:
// 1.  **Validated Once**: A map is checked on construction (non-empty, rectangular,
//     finite). Downstream modules (`ranking`, `selection`) can then assume a
//     well-formed grid and never re-check it.
// 2.  **Immutable**: Nothing mutates a map after it is built. One map serves every
//     removal level for its image.
// 3.  **Coordinates, not offsets**: Callers speak in `Coordinate { row, col }`. The
//     flat row-major index only appears where a total order is needed (tie-breaks).

use crate::error::{AblationError, Result};
use ndarray::{Array2, ArrayView2};

/// A (row, column) position inside an image or importance map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub row: usize,
    pub col: usize,
}

impl Coordinate {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Flat offset of this coordinate in a row-major grid of the given width.
    #[inline]
    pub fn row_major_index(&self, width: usize) -> usize {
        self.row * width + self.col
    }
}

/// Per-pixel importance scores for a single image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportanceMap {
    scores: Array2<f32>,
}

impl ImportanceMap {
    /// Wraps an existing grid after checking that it is non-empty and finite.
    pub fn new(scores: Array2<f32>) -> Result<Self> {
        let (height, width) = scores.dim();
        if height == 0 || width == 0 {
            return Err(AblationError::EmptyMap { height, width });
        }
        if let Some(((row, col), _)) = scores.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(AblationError::NonFiniteScore { row, col });
        }
        Ok(Self { scores })
    }

    /// Builds a map from row-major scores.
    pub fn from_shape_vec(height: usize, width: usize, scores: Vec<f32>) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(AblationError::EmptyMap { height, width });
        }
        let len = scores.len();
        let grid = Array2::from_shape_vec((height, width), scores)
            .map_err(|_| AblationError::MapShape { height, width, len })?;
        Self::new(grid)
    }

    pub fn height(&self) -> usize {
        self.scores.nrows()
    }

    pub fn width(&self) -> usize {
        self.scores.ncols()
    }

    /// Number of scored pixels (height * width).
    pub fn total_pixels(&self) -> usize {
        self.scores.len()
    }

    pub fn score(&self, coordinate: Coordinate) -> f32 {
        self.scores[[coordinate.row, coordinate.col]]
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.scores.view()
    }
}
