// THEORY:
// Selection slices a full ranking into the set of pixels to destroy. It performs no
// rounding and no scoring: the count arrives already resolved by `RemovalLevel`,
// and the ranking arrives already sorted by `ranking::rank`. The only decision made
// here is which end of the ranking to read from.

use crate::core_modules::importance_map::Coordinate;
use crate::core_modules::removal_level::Protocol;
use crate::error::{AblationError, Result};

/// The ordered set of coordinates chosen for replacement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    coordinates: Vec<Coordinate>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Coordinate> {
        self.coordinates.iter()
    }

    pub fn as_slice(&self) -> &[Coordinate] {
        &self.coordinates
    }
}

impl<'a> IntoIterator for &'a Selection {
    type Item = &'a Coordinate;
    type IntoIter = std::slice::Iter<'a, Coordinate>;

    fn into_iter(self) -> Self::IntoIter {
        self.coordinates.iter()
    }
}

/// Takes `count` coordinates from the head (most important) or the tail
/// (least important) of `ranked`.
pub fn select(ranked: &[Coordinate], protocol: Protocol, count: usize) -> Result<Selection> {
    let total = ranked.len();
    if count > total {
        return Err(AblationError::CountExceedsPixels { count, total });
    }

    let coordinates = match protocol {
        Protocol::MostImportant => ranked[..count].to_vec(),
        Protocol::LeastImportant => ranked[total - count..].to_vec(),
    };

    Ok(Selection { coordinates })
}
