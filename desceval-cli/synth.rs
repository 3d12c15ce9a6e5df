//! Synthetic HPatches-style scenes: one reference warped through fixed homographies.

use std::path::{Path, PathBuf};

use desceval_core::Image;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use nalgebra::Matrix3;

use crate::error::{CliResult, SourceError};

/// Five viewpoint-like transforms about the image centre, increasing in strength
pub fn synthetic_homographies(width: usize, height: usize) -> Vec<Matrix3<f64>> {
    let (cx, cy) = (width as f64 * 0.5, height as f64 * 0.5);
    let to_origin = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let back = Matrix3::new(1.0, 0.0, cx, 0.0, 1.0, cy, 0.0, 0.0, 1.0);
    let scale = (width.max(height) as f64).max(1.0);

    [
        (0.03, 1.00, 0.00, 0.0, 2.0),
        (0.08, 0.95, 0.03, 0.05, -4.0),
        (0.15, 1.08, -0.05, 0.10, 6.0),
        (-0.20, 0.88, 0.06, 0.15, -8.0),
        (0.30, 1.15, -0.08, 0.20, 10.0),
    ]
    .iter()
    .map(|&(angle, s, shear, perspective, shift)| {
        let (sin, cos) = f64::sin_cos(angle);
        let core = Matrix3::new(
            s * cos,
            -s * sin + shear,
            shift,
            s * sin,
            s * cos,
            -shift * 0.5,
            perspective / scale,
            -perspective * 0.5 / scale,
            1.0,
        );
        back * core * to_origin
    })
    .collect()
}

/// Resample `img` so that reference pixel `p` lands at `project(h, p)`.
/// Pixels with no source are black. `None` when `h` is not invertible.
pub fn warp_image(img: &Image, h: &Matrix3<f64>) -> Option<Image> {
    let gray = GrayImage::from_raw(img.width as u32, img.height as u32, img.pixels.clone())?;
    let mut row_major = [0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            row_major[r * 3 + c] = h[(r, c)] as f32;
        }
    }
    let projection = Projection::from_matrix(row_major)?;
    let warped = warp(&gray, &projection, Interpolation::Bilinear, Luma([0u8]));
    Image::new(img.width, img.height, warped.into_raw()).ok()
}

/// Targets `2`..`6` with their homographies
pub fn synthetic_targets(reference: &Image) -> Vec<(String, Image, Matrix3<f64>)> {
    synthetic_homographies(reference.width, reference.height)
        .into_iter()
        .enumerate()
        .filter_map(|(i, h)| warp_image(reference, &h).map(|img| ((i + 2).to_string(), img, h)))
        .collect()
}

fn format_homography(h: &Matrix3<f64>) -> String {
    (0..3)
        .map(|r| format!("{:e} {:e} {:e}\n", h[(r, 0)], h[(r, 1)], h[(r, 2)]))
        .collect()
}

fn save_ppm(img: &Image, path: &Path) -> CliResult<()> {
    let gray = GrayImage::from_raw(img.width as u32, img.height as u32, img.pixels.clone()).ok_or_else(|| {
        SourceError::Image {
            path: path.display().to_string(),
            message: "pixel buffer does not match dimensions".to_string(),
        }
    })?;
    DynamicImage::ImageLuma8(gray).to_rgb8().save(path)?;
    Ok(())
}

/// Write `<out>/<scene>/{1..6}.ppm` and `H_1_{2..6}`, returning the scene directory
pub fn write_scene(reference: &Image, out: &Path, scene: &str) -> CliResult<PathBuf> {
    let dir = out.join(scene);
    std::fs::create_dir_all(&dir)?;
    save_ppm(reference, &dir.join("1.ppm"))?;
    for (id, img, h) in synthetic_targets(reference) {
        save_ppm(&img, &dir.join(format!("{}.ppm", id)))?;
        std::fs::write(dir.join(format!("H_1_{}", id)), format_homography(&h))?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{parse_homography, HPatchesDataset, ImageSource};
    use crate::test_support::textured_image;
    use tempfile::TempDir;
    use approx::assert_relative_eq;
    use desceval_match::project;

    #[test]
    fn test_homographies_keep_centre_nearby() {
        for h in synthetic_homographies(200, 100) {
            let [x, y] = project(&h, 100.0, 50.0);
            assert!((x - 100.0).abs() < 15.0 && (y - 50.0).abs() < 15.0, "{} {}", x, y);
            assert!(h.determinant().abs() > 0.1);
        }
    }

    #[test]
    fn test_identity_warp_preserves_image() {
        let img = textured_image(64, 48, 5);
        let warped = warp_image(&img, &Matrix3::identity()).unwrap();
        assert_eq!((warped.width, warped.height), (64, 48));
        // Bilinear lookups at the last row and column fall outside the source
        for y in 1..47 {
            for x in 1..63 {
                assert!((warped.get(x, y) as i32 - img.get(x, y) as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_warp_moves_content_forward() {
        let img = Image::from_fn(40, 40, |x, y| if x == 10 && y == 12 { 255 } else { 0 });
        let shift = Matrix3::new(1.0, 0.0, 5.0, 0.0, 1.0, 3.0, 0.0, 0.0, 1.0);
        let warped = warp_image(&img, &shift).unwrap();
        assert!(warped.get(15, 15) > 200);
        assert!(warped.get(10, 12) < 50);
    }

    #[test]
    fn test_homography_text_roundtrip() {
        let h = synthetic_homographies(320, 240)[3];
        let parsed = parse_homography(&format_homography(&h)).unwrap();
        assert_relative_eq!(parsed, h, epsilon = 1e-9);
    }

    #[test]
    fn test_written_scene_is_readable() {
        let dir = TempDir::new().unwrap();
        let img = textured_image(96, 80, 11);
        let scene_dir = write_scene(&img, dir.path(), "v_synth").unwrap();
        assert!(scene_dir.join("H_1_6").is_file());

        let dataset = HPatchesDataset::new(dir.path());
        assert_eq!(dataset.scenes().unwrap(), vec!["v_synth"]);
        assert_eq!(dataset.images("v_synth").unwrap(), vec!["1", "2", "3", "4", "5", "6"]);
        assert_eq!(dataset.load("v_synth", "1").unwrap(), img);
        assert!(dataset.ground_truth("v_synth", "4").is_some());
    }
}
