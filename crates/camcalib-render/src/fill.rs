//! Flat polygon fill and detection overlays on RGB frames.

use camcalib_core::RgbImage;
use nalgebra::Point2;

/// Per-row colours for a completely detected board.
const ROW_COLORS: [[u8; 3]; 7] = [
    [255, 0, 0],
    [255, 128, 0],
    [200, 200, 0],
    [0, 255, 0],
    [0, 200, 200],
    [0, 0, 255],
    [255, 0, 255],
];

const MISSING_COLOR: [u8; 3] = [255, 0, 0];

/// Longest coordinate, in pixels, a line endpoint may have.
const MAX_LINE_COORD: i64 = 1 << 20;

/// Even-odd scanline fill. Vertices are rounded to the pixel grid first;
/// a pixel is painted when its centre lies inside, with the usual half-open
/// rule on each edge's vertical extent. Polygons with a non-finite vertex
/// are skipped.
pub fn fill_polygon(img: &mut RgbImage, polygon: &[Point2<f64>], color: [u8; 3]) {
    if polygon.len() < 3 || img.width == 0 || img.height == 0 {
        return;
    }
    if polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return;
    }
    // edge math stays in f64 so far-away vertices cannot overflow
    let verts: Vec<(f64, f64)> = polygon.iter().map(|p| (p.x.round(), p.y.round())).collect();
    let y_lo = verts.iter().map(|v| v.1).fold(f64::INFINITY, f64::min);
    let y_hi = verts.iter().map(|v| v.1).fold(f64::NEG_INFINITY, f64::max);
    if y_hi < 0.0 || y_lo > (img.height - 1) as f64 {
        return;
    }
    let y_min = y_lo.max(0.0) as i64;
    let y_max = y_hi.min((img.height - 1) as f64) as i64;
    let x_limit = (img.width - 1) as f64;

    let mut xs: Vec<f64> = Vec::with_capacity(verts.len());
    for y in y_min..=y_max {
        let yf = y as f64;
        xs.clear();
        for (k, &(x0, y0)) in verts.iter().enumerate() {
            let (x1, y1) = verts[(k + 1) % verts.len()];
            if (y0 <= yf && yf < y1) || (y1 <= yf && yf < y0) {
                let t = (yf - y0) / (y1 - y0);
                xs.push(x0 + t * (x1 - x0));
            }
        }
        xs.sort_by(|a, b| a.total_cmp(b));
        for span in xs.chunks_exact(2) {
            if !(span[0].is_finite() && span[1].is_finite()) {
                continue;
            }
            let start = span[0].ceil().max(0.0);
            let end = span[1].floor().min(x_limit);
            if start > end {
                continue;
            }
            for x in start as i64..=end as i64 {
                img.put(x, y, color);
            }
        }
    }
}

/// Bresenham line; pixels outside the frame are skipped, and so is a line
/// with an endpoint further than 2^20 pixels out.
pub fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: [u8; 3]) {
    if [from.0, from.1, to.0, to.1]
        .iter()
        .any(|v| v.unsigned_abs() > MAX_LINE_COORD as u64)
    {
        return;
    }
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        img.put(x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Midpoint circle outline.
pub fn draw_circle(img: &mut RgbImage, center: (i64, i64), radius: i64, color: [u8; 3]) {
    let (cx, cy) = center;
    let (mut x, mut y) = (radius, 0);
    let mut err = 1 - radius;
    while x >= y {
        for (dx, dy) in [
            (x, y),
            (y, x),
            (-y, x),
            (-x, y),
            (-x, -y),
            (-y, -x),
            (y, -x),
            (x, -y),
        ] {
            img.put(cx + dx, cy + dy, color);
        }
        y += 1;
        if err < 0 {
            err += 2 * y + 1;
        } else {
            x -= 1;
            err += 2 * (y - x) + 1;
        }
    }
}

fn round(p: &Point2<f64>) -> (i64, i64) {
    (p.x.round() as i64, p.y.round() as i64)
}

/// Draw detected corners: a row-coloured polyline through the ordered
/// corners when the board is complete (`cols` per row), red markers
/// otherwise.
pub fn draw_corners(img: &mut RgbImage, corners: &[Point2<f64>], cols: usize, complete: bool) {
    if !complete || cols == 0 {
        for p in corners {
            let c = round(p);
            draw_circle(img, c, 4, MISSING_COLOR);
            draw_line(img, (c.0 - 3, c.1 - 3), (c.0 + 3, c.1 + 3), MISSING_COLOR);
            draw_line(img, (c.0 - 3, c.1 + 3), (c.0 + 3, c.1 - 3), MISSING_COLOR);
        }
        return;
    }

    let mut prev: Option<(i64, i64)> = None;
    for (k, p) in corners.iter().enumerate() {
        let color = ROW_COLORS[(k / cols) % ROW_COLORS.len()];
        let c = round(p);
        draw_circle(img, c, 4, color);
        if let Some(q) = prev {
            draw_line(img, q, c, color);
        }
        prev = Some(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(img: &RgbImage, color: [u8; 3]) -> usize {
        img.data.chunks_exact(3).filter(|p| *p == color).count()
    }

    #[test]
    fn fills_axis_aligned_square() {
        let mut img = RgbImage::new(20, 20);
        let square = [
            Point2::new(2.0, 3.0),
            Point2::new(12.0, 3.0),
            Point2::new(12.0, 13.0),
            Point2::new(2.0, 13.0),
        ];
        fill_polygon(&mut img, &square, [9, 9, 9]);
        // half-open in y: rows 3..13, columns 2..=12
        assert_eq!(count(&img, [9, 9, 9]), 10 * 11);
        assert_eq!(img.get(2, 3), [9, 9, 9]);
        assert_eq!(img.get(12, 12), [9, 9, 9]);
        assert_eq!(img.get(1, 5), [0, 0, 0]);
    }

    #[test]
    fn bowtie_fills_only_its_lobes() {
        // a bow-tie has two lobes; the crossing point separates them
        let mut img = RgbImage::new(30, 30);
        let bowtie = [
            Point2::new(0.0, 0.0),
            Point2::new(20.0, 20.0),
            Point2::new(20.0, 0.0),
            Point2::new(0.0, 20.0),
        ];
        fill_polygon(&mut img, &bowtie, [1, 2, 3]);
        assert_eq!(img.get(2, 10), [1, 2, 3]);
        assert_eq!(img.get(18, 10), [1, 2, 3]);
        assert_eq!(img.get(10, 3), [0, 0, 0]);
    }

    #[test]
    fn clips_to_frame() {
        let mut img = RgbImage::new(10, 10);
        let big = [
            Point2::new(-50.0, -50.0),
            Point2::new(50.0, -50.0),
            Point2::new(50.0, 50.0),
            Point2::new(-50.0, 50.0),
        ];
        fill_polygon(&mut img, &big, [7, 7, 7]);
        assert_eq!(count(&img, [7, 7, 7]), 100);
    }

    #[test]
    fn huge_vertices_do_not_overflow() {
        let mut img = RgbImage::new(16, 12);
        let spike = [
            Point2::new(1e30, 0.0),
            Point2::new(-1e30, 5.0),
            Point2::new(0.0, 10.0),
        ];
        fill_polygon(&mut img, &spike, [4, 4, 4]);
        // rows 0..5 lie right of the frame, rows 5..10 cover it
        assert_eq!(count(&img, [4, 4, 4]), 5 * 16);
        assert_eq!(img.get(0, 2), [0, 0, 0]);
        assert_eq!(img.get(15, 9), [4, 4, 4]);
        assert_eq!(img.get(0, 10), [0, 0, 0]);
    }

    #[test]
    fn non_finite_vertices_skip_the_polygon() {
        let mut img = RgbImage::new(8, 8);
        let bad = [
            Point2::new(1.0, 1.0),
            Point2::new(f64::NAN, 6.0),
            Point2::new(6.0, 6.0),
        ];
        fill_polygon(&mut img, &bad, [4, 4, 4]);
        let inf = [
            Point2::new(1.0, 1.0),
            Point2::new(f64::INFINITY, 6.0),
            Point2::new(6.0, 6.0),
        ];
        fill_polygon(&mut img, &inf, [4, 4, 4]);
        assert_eq!(count(&img, [4, 4, 4]), 0);
    }

    #[test]
    fn far_line_endpoints_are_ignored() {
        let mut img = RgbImage::new(8, 8);
        draw_line(&mut img, (1, 1), (i64::MAX, 3), [5, 5, 5]);
        draw_line(&mut img, (i64::MIN, 0), (2, 2), [5, 5, 5]);
        assert_eq!(count(&img, [5, 5, 5]), 0);
    }

    #[test]
    fn line_hits_both_endpoints() {
        let mut img = RgbImage::new(10, 10);
        draw_line(&mut img, (1, 1), (8, 5), [5, 5, 5]);
        assert_eq!(img.get(1, 1), [5, 5, 5]);
        assert_eq!(img.get(8, 5), [5, 5, 5]);
    }

    #[test]
    fn complete_board_uses_row_colours() {
        let mut img = RgbImage::new(60, 60);
        let corners: Vec<_> = (0..2)
            .flat_map(|r| (0..3).map(move |c| Point2::new(10.0 + 15.0 * c as f64, 15.0 + 25.0 * r as f64)))
            .collect();
        draw_corners(&mut img, &corners, 3, true);
        assert!(count(&img, ROW_COLORS[0]) > 0);
        assert!(count(&img, ROW_COLORS[1]) > 0);
    }
}
