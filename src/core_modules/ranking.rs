// THEORY:
// Ranking turns an `ImportanceMap` into a single total order over its pixels.
// Both removal protocols read from this one ordering: ROAR from its head, pixel
// perturbation from its tail. Sorting the full map once per image is therefore
// cheaper than running a separate partial selection for each protocol and level.
//
// The order must be reproducible across runs and platforms, so equal scores are
// broken by row-major position (earlier pixels first). The sort is stable and the
// input is enumerated in row-major order, which gives that tie-break for free.

use crate::core_modules::importance_map::{Coordinate, ImportanceMap};

/// Returns every coordinate of `map`, highest score first.
/// Equal scores keep row-major order.
pub fn rank(map: &ImportanceMap) -> Vec<Coordinate> {
    let mut scored: Vec<(f32, Coordinate)> = map
        .view()
        .indexed_iter()
        .map(|((row, col), &score)| (score, Coordinate::new(row, col)))
        .collect();

    // Maps are finite by construction; total_cmp keeps -0.0 below 0.0 consistently.
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored.into_iter().map(|(_, coordinate)| coordinate).collect()
}
