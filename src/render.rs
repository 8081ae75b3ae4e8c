use image::RgbaImage;
use rayon::prelude::*;

use crate::grid::{Coord, GRID_SIZE, GridSnapshot};
use crate::selection::Selection;

/// Unowned cells draw lighter than the stored "gray" so owned art stands out.
pub const UNOWNED_DISPLAY: [u8; 3] = [0xD3, 0xD3, 0xD3];
/// Semi-transparent blue laid over selected cells.
const SELECTION_TINT: [u8; 3] = [0, 122, 255];
const SELECTION_ALPHA: f32 = 0.3;

/// An upload placed on the grid with its top-left pixel at `origin`, shown
/// before checkout so the buyer can see the result.
#[derive(Clone, Copy)]
pub struct Preview<'a> {
    pub image: &'a RgbaImage,
    pub origin: Coord,
}

impl Preview<'_> {
    /// Upload pixel over `coord`, if the image covers it.
    fn sample(&self, coord: Coord) -> Option<[u8; 4]> {
        let col = coord.x.checked_sub(self.origin.x)? as u32;
        let row = coord.y.checked_sub(self.origin.y)? as u32;
        (col < self.image.width() && row < self.image.height())
            .then(|| self.image.get_pixel(col, row).0)
    }
}

/// Draw the whole grid, one image pixel per cell.
///
/// Layers, bottom to top: cell colors, the selection tint, then the preview
/// upload alpha-composited over both. Preview pixels falling off the grid are
/// dropped.
pub fn render(
    snapshot: &GridSnapshot,
    selection: Option<&Selection>,
    preview: Option<Preview<'_>>,
) -> RgbaImage {
    let size = GRID_SIZE as u32;
    let row_len = size as usize * 4;
    let mut image = RgbaImage::new(size, size);

    image.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let coord = Coord::new(x as u16, y as u16);
            let mut rgb = snapshot.color(coord).unwrap_or(UNOWNED_DISPLAY);
            if selection.is_some_and(|s| s.contains(coord)) {
                rgb = blend(rgb, SELECTION_TINT, SELECTION_ALPHA);
            }
            if let Some([r, g, b, a]) = preview.and_then(|p| p.sample(coord)) {
                rgb = blend(rgb, [r, g, b], a as f32 / 255.0);
            }
            px.copy_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
    });
    image
}

fn blend(base: [u8; 3], over: [u8; 3], alpha: f32) -> [u8; 3] {
    let mix = |b: u8, o: u8| (b as f32 * (1.0 - alpha) + o as f32 * alpha).round() as u8;
    [mix(base[0], over[0]), mix(base[1], over[1]), mix(base[2], over[2])]
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::grid::Cell;
    use crate::selection::SelectionRect;

    #[test]
    fn owned_unowned_and_selected_cells() {
        let mut owned = Cell::unowned(Coord::new(3, 7));
        owned.owner = Some("o".into());
        owned.is_owned = true;
        owned.color = "#102030".into();
        let snapshot = GridSnapshot::from_cells([&owned]);
        let selection = Selection::clipped(
            SelectionRect::spanning(Coord::new(0, 0), Coord::new(1, 0)),
            &snapshot,
        );

        let image = render(&snapshot, Some(&selection), None);
        assert_eq!(image.dimensions(), (1000, 1000));
        assert_eq!(image.get_pixel(3, 7).0, [0x10, 0x20, 0x30, 255]);
        assert_eq!(image.get_pixel(500, 500).0, [0xD3, 0xD3, 0xD3, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [148, 184, 224, 255]);
    }

    #[test]
    fn preview_upload_is_drawn_over_the_selection() {
        let snapshot = GridSnapshot::empty();
        let selection = Selection::clipped(
            SelectionRect::spanning(Coord::new(10, 20), Coord::new(11, 20)),
            &snapshot,
        );
        let mut upload = RgbaImage::new(2, 1);
        upload.put_pixel(0, 0, Rgba([200, 10, 30, 255]));
        upload.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        let preview = Preview { image: &upload, origin: Coord::new(10, 20) };

        let image = render(&snapshot, Some(&selection), Some(preview));
        // Opaque pixel replaces the tinted cell.
        assert_eq!(image.get_pixel(10, 20).0, [200, 10, 30, 255]);
        // Transparent pixel leaves the tint visible.
        assert_eq!(image.get_pixel(11, 20).0, [148, 184, 224, 255]);
        // Outside the upload nothing changes.
        assert_eq!(image.get_pixel(12, 20).0, [0xD3, 0xD3, 0xD3, 255]);
        assert_eq!(image.get_pixel(9, 20).0, [0xD3, 0xD3, 0xD3, 255]);
    }

    #[test]
    fn preview_past_the_grid_edge_is_clipped() {
        let upload = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let preview = Preview { image: &upload, origin: Coord::new(998, 998) };
        let image = render(&GridSnapshot::empty(), None, Some(preview));
        assert_eq!(image.get_pixel(999, 999).0, [1, 2, 3, 255]);
        assert_eq!(image.get_pixel(997, 999).0, [0xD3, 0xD3, 0xD3, 255]);
    }
}
