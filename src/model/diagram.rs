//! PNG rendering of a network's layer stack.

use std::path::Path;

use image::{Rgb, RgbImage};

use super::Architecture;
use crate::{Error, Result};

const WIDTH: u32 = 320;
const BAR_HEIGHT: u32 = 24;
const GAP: u32 = 12;
const MARGIN: u32 = 16;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const INPUT: Rgb<u8> = Rgb([120, 120, 120]);
const HIDDEN: Rgb<u8> = Rgb([52, 101, 164]);
const OUTPUT: Rgb<u8> = Rgb([204, 0, 0]);

/// Draw one horizontal bar per layer (input first), with bar width growing
/// logarithmically with the layer's unit count, and save it as PNG.
///
/// # Errors
///
/// Returns [`Error::StorageFault`] if the image cannot be written.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn render_diagram(architecture: &Architecture, path: &Path) -> Result<()> {
    let widths: Vec<usize> = std::iter::once(architecture.input_dim)
        .chain(architecture.layers.iter().map(|l| l.units))
        .collect();
    let bars = widths.len() as u32;
    let height = 2 * MARGIN + bars * BAR_HEIGHT + bars.saturating_sub(1) * GAP;
    let mut img = RgbImage::from_pixel(WIDTH, height, BACKGROUND);

    let widest = widths
        .iter()
        .map(|&u| (u as f64 + 1.0).ln())
        .fold(f64::MIN_POSITIVE, f64::max);
    let usable = f64::from(WIDTH - 2 * MARGIN);

    for (i, &units) in widths.iter().enumerate() {
        let bar = ((units as f64 + 1.0).ln() / widest * usable).max(2.0) as u32;
        let x0 = (WIDTH - bar) / 2;
        let y0 = MARGIN + i as u32 * (BAR_HEIGHT + GAP);
        let color = match i {
            0 => INPUT,
            _ if i == widths.len() - 1 => OUTPUT,
            _ => HIDDEN,
        };
        for y in y0..y0 + BAR_HEIGHT {
            for x in x0..x0 + bar {
                img.put_pixel(x, y, color);
            }
        }
    }

    img.save(path).map_err(|e| Error::storage(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkFactory;

    #[test]
    fn test_renders_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.png");
        render_diagram(NetworkFactory::baseline().architecture(), &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.width(), WIDTH);
        // input + 4 layers
        assert_eq!(img.height(), 2 * MARGIN + 5 * BAR_HEIGHT + 4 * GAP);
    }

    #[test]
    fn test_unwritable_path_is_storage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("model.png");
        let err = render_diagram(NetworkFactory::baseline().architecture(), &path).unwrap_err();
        assert!(matches!(err, Error::StorageFault { .. }));
    }
}
