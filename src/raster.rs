//! Upload → per-cell color writes.
//!
//! Pixel `(col, row)` of the upload lands on cell
//! `(min_x + col, min_y + row)` of the selection. Output is row-major and
//! skips cells the selection clipped out, so a full rectangle yields exactly
//! `width * height` entries.

use std::path::Path;

use image::RgbaImage;
use rayon::prelude::*;
use thiserror::Error;

use crate::claim::{ClaimCell, ClaimRequest};
use crate::color;
use crate::grid::Coord;
use crate::selection::Selection;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("nothing is selected")]
    EmptySelection,
    #[error("image is {image_w}x{image_h} pixels but the selection is {sel_w}x{sel_h} cells")]
    SizeMismatch {
        image_w: u32,
        image_h: u32,
        sel_w: u32,
        sel_h: u32,
    },
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode uploaded bytes (any format the `image` crate recognizes).
pub fn decode_upload(bytes: &[u8]) -> Result<RgbaImage, RasterError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

pub fn load_upload(path: &Path) -> Result<RgbaImage, RasterError> {
    Ok(image::open(path)?.to_rgba8())
}

/// Fail fast unless the image matches the selection's bounding rectangle.
pub fn check_dimensions(selection: &Selection, image: &RgbaImage) -> Result<(), RasterError> {
    if selection.is_empty() {
        return Err(RasterError::EmptySelection);
    }
    let (sel_w, sel_h) = (selection.width(), selection.height());
    if image.dimensions() != (sel_w, sel_h) {
        return Err(RasterError::SizeMismatch {
            image_w: image.width(),
            image_h: image.height(),
            sel_w,
            sel_h,
        });
    }
    Ok(())
}

pub fn rasterize(selection: &Selection, image: &RgbaImage) -> Result<Vec<ClaimCell>, RasterError> {
    check_dimensions(selection, image)?;
    let origin = selection.origin();
    let width = image.width();

    // Rows are converted in parallel; collecting keeps them in order.
    let rows: Vec<Vec<ClaimCell>> = (0..image.height())
        .into_par_iter()
        .map(|row| {
            (0..width)
                .filter_map(|col| {
                    let coord = Coord::new(origin.x + col as u16, origin.y + row as u16);
                    if !selection.contains(coord) {
                        return None;
                    }
                    Some(ClaimCell {
                        x: coord.x as i64,
                        y: coord.y as i64,
                        color: color::transport(image.get_pixel(col, row).0),
                    })
                })
                .collect()
        })
        .collect();

    Ok(rows.into_iter().flatten().collect())
}

/// Rasterize and wrap the result as the request sent at checkout.
pub fn build_claim(
    selection: &Selection,
    image: &RgbaImage,
    owner_id: &str,
    image_url: Option<String>,
    link_url: Option<String>,
) -> Result<ClaimRequest, RasterError> {
    Ok(ClaimRequest {
        owner_id: owner_id.to_string(),
        cells: rasterize(selection, image)?,
        image_url,
        link_url,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::Rgba;

    use super::*;
    use crate::grid::GridSnapshot;
    use crate::selection::SelectionRect;

    fn select(snapshot: &GridSnapshot, a: (u16, u16), b: (u16, u16)) -> Selection {
        Selection::clipped(
            SelectionRect::spanning(Coord::new(a.0, a.1), Coord::new(b.0, b.1)),
            snapshot,
        )
    }

    #[test]
    fn three_by_two_maps_row_major_with_hex_colors() {
        let selection = select(&GridSnapshot::empty(), (10, 20), (12, 21));
        let pixels = [
            [255, 0, 0, 255],
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            [17, 34, 51, 128],
            [255, 255, 255, 0],
            [1, 2, 3, 255],
        ];
        let mut image = RgbaImage::new(3, 2);
        for (i, p) in pixels.iter().enumerate() {
            image.put_pixel(i as u32 % 3, i as u32 / 3, Rgba(*p));
        }

        let cells = rasterize(&selection, &image).unwrap();
        assert_eq!(cells.len(), 6);

        let coords: Vec<(i64, i64)> = cells.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(
            coords,
            vec![(10, 20), (11, 20), (12, 20), (10, 21), (11, 21), (12, 21)]
        );

        let hex: Vec<String> = cells.iter().map(|c| color::normalize(&c.color).unwrap()).collect();
        assert_eq!(
            hex,
            vec!["#ff0000", "#00ff00", "#0000ff", "#112233", "#ffffff", "#010203"]
        );
    }

    #[test]
    fn mismatched_dimensions_fail_before_anything_is_built() {
        let selection = select(&GridSnapshot::empty(), (0, 0), (2, 1));
        let err = rasterize(&selection, &RgbaImage::new(2, 3)).unwrap_err();
        assert!(matches!(
            err,
            RasterError::SizeMismatch { image_w: 2, image_h: 3, sel_w: 3, sel_h: 2 }
        ));
    }

    #[test]
    fn clipped_cells_are_skipped() {
        let mut owned = crate::grid::Cell::unowned(Coord::new(1, 0));
        owned.owner = Some("x".into());
        owned.is_owned = true;
        let snapshot = Arc::new(GridSnapshot::from_cells([&owned]));
        let selection = select(&snapshot, (0, 0), (1, 1));

        let cells = rasterize(&selection, &RgbaImage::new(2, 2)).unwrap();
        let coords: Vec<(i64, i64)> = cells.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(coords, vec![(0, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn decode_roundtrips_a_png_upload() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(1, 0, Rgba([9, 8, 7, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();

        let decoded = decode_upload(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.get_pixel(1, 0).0, [9, 8, 7, 255]);
        assert!(matches!(decode_upload(b"not an image"), Err(RasterError::Decode(_))));
    }

    #[test]
    fn build_claim_carries_owner_and_urls() {
        let selection = select(&GridSnapshot::empty(), (0, 0), (0, 0));
        let req = build_claim(
            &selection,
            &RgbaImage::new(1, 1),
            "buyer-7",
            Some("https://img".into()),
            None,
        )
        .unwrap();
        assert_eq!(req.owner_id, "buyer-7");
        assert_eq!(req.cells.len(), 1);
        assert_eq!(req.image_url.as_deref(), Some("https://img"));
    }
}
