// THEORY:
// Replacement is the destructive step of the pipeline. It writes a neutral value into
// every selected coordinate, in every channel, directly into the caller's buffer.
// No copy is made; callers that need the original must clone before calling.
//
// The channel-mean rule is computed from the whole image *before* the first write.
// Computing it afterwards would pull the mean toward the fill value itself.

use crate::core_modules::image_tensor::{Image, RGB_CHANNELS};
use crate::core_modules::removal_level::FillRule;
use crate::core_modules::selection::Selection;
use crate::error::{AblationError, Result};

/// Overwrites the selected pixels of `image` according to `fill_rule`.
/// Returns the same image for chaining.
pub fn replace<'a>(
    image: &'a mut Image,
    selection: &Selection,
    fill_rule: FillRule,
) -> Result<&'a mut Image> {
    let (height, width) = (image.height(), image.width());
    if let Some(outside) = selection
        .iter()
        .find(|c| c.row >= height || c.col >= width)
    {
        return Err(AblationError::CoordinateOutOfBounds {
            row: outside.row,
            col: outside.col,
            height,
            width,
        });
    }

    let fill: Vec<f32> = match fill_rule {
        FillRule::Zero => vec![0.0; image.channels()],
        FillRule::ChannelMean => {
            if image.channels() != RGB_CHANNELS {
                return Err(AblationError::ChannelCount {
                    expected: RGB_CHANNELS,
                    actual: image.channels(),
                });
            }
            image.channel_means()
        }
    };

    let data = image.data_mut();
    for coordinate in selection {
        for (channel, value) in fill.iter().enumerate() {
            data[[channel, coordinate.row, coordinate.col]] = *value;
        }
    }

    Ok(image)
}
