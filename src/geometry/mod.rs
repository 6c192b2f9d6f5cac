use nalgebra::Vector2;

/// Generate a grid of pixel coordinates evenly distributed across an image.
///
/// The grid has roughly `n` points, split between the two axes according to
/// the image aspect ratio, with each point at the center of its cell so no
/// sample lands exactly on the image border.
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Vector2<f64>> {
    let cells_x = ((n as f64 * width / height).sqrt().round() as usize).max(1);
    let cells_y = ((n as f64 * height / width).sqrt().round() as usize).max(1);

    let cell_width = width / cells_x as f64;
    let cell_height = height / cells_y as f64;

    let mut points = Vec::with_capacity(cells_x * cells_y);
    for row in 0..cells_y {
        for col in 0..cells_x {
            points.push(Vector2::new(
                (col as f64 + 0.5) * cell_width,
                (row as f64 + 0.5) * cell_height,
            ));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_points_count_and_bounds() {
        let width = 800.0;
        let height = 600.0;
        let n = 100;

        let points = sample_points(width, height, n);

        // The rounding of the cell counts can move the total a little
        assert!(
            (80..=120).contains(&points.len()),
            "expected around {} points, got {}",
            n,
            points.len()
        );

        for point in &points {
            assert!(point.x > 0.0 && point.x < width);
            assert!(point.y > 0.0 && point.y < height);
        }
    }

    #[test]
    fn test_sample_points_small_request() {
        // Never returns an empty grid, even for tiny n
        let points = sample_points(640.0, 480.0, 1);
        assert!(!points.is_empty());
    }
}
