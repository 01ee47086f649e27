//! Medial-axis extraction from a rasterised outline.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::morphology::{close, dilate, erode, open};
use imageproc::point::Point as PixelPoint;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::debug;

use crate::io::geometry::{nearest_index_in, Contour};
use crate::io::input::Point;

/// Border around the outline's bounding box when rasterising.
pub const MASK_PADDING: i32 = 20;
/// 5x5 square applied three times when merging gaps.
const GAP_RADIUS: u8 = 6;
/// 3x3 square closed twice.
const CLOSE_RADIUS: u8 = 2;
/// 3x3 square opened once to drop speckle.
const OPEN_RADIUS: u8 = 1;

const FOREGROUND: Luma<u8> = Luma([255]);
const BACKGROUND: Luma<u8> = Luma([0]);

/// Binary mask of an outline plus the image coordinates of its top-left pixel.
pub struct BodyMask {
    pub image: GrayImage,
    pub origin: (i32, i32),
}

impl BodyMask {
    /// Fills the polygon inside its padded bounding box.
    pub fn rasterize(contour: &Contour) -> Option<BodyMask> {
        let (min, max) = contour.bounding_box();
        let x0 = (min.x as i32 - MASK_PADDING).max(0);
        let y0 = (min.y as i32 - MASK_PADDING).max(0);
        let x1 = max.x as i32 + MASK_PADDING;
        let y1 = max.y as i32 + MASK_PADDING;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let mut poly: Vec<PixelPoint<i32>> = Vec::with_capacity(contour.len());
        for p in contour.points() {
            let px = PixelPoint::new(p.x as i32 - x0, p.y as i32 - y0);
            if poly.last() != Some(&px) {
                poly.push(px);
            }
        }
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        if poly.len() < 3 {
            return None;
        }

        let mut image = GrayImage::new((x1 - x0) as u32, (y1 - y0) as u32);
        draw_polygon_mut(&mut image, &poly, FOREGROUND);
        Some(BodyMask {
            image,
            origin: (x0, y0),
        })
    }

    /// Closes gaps, removes speckle and fills enclosed holes.
    pub fn clean(&mut self) {
        let merged = erode(&dilate(&self.image, Norm::LInf, GAP_RADIUS), Norm::LInf, GAP_RADIUS);
        let closed = close(&merged, Norm::LInf, CLOSE_RADIUS);
        self.image = open(&closed, Norm::LInf, OPEN_RADIUS);
        fill_holes(&mut self.image);
    }

    /// Keeps only the largest 8-connected component. Returns false when the
    /// mask is empty.
    pub fn keep_largest_component(&mut self) -> bool {
        let labels = connected_components(&self.image, Connectivity::Eight, BACKGROUND);
        let mut areas: Vec<usize> = Vec::new();
        for Luma([l]) in labels.pixels() {
            let l = *l as usize;
            if l == 0 {
                continue;
            }
            if areas.len() < l {
                areas.resize(l, 0);
            }
            areas[l - 1] += 1;
        }

        let mut best: Option<(usize, usize)> = None;
        for (i, &a) in areas.iter().enumerate() {
            if a > best.map_or(0, |(_, b)| b) {
                best = Some((i + 1, a));
            }
        }
        let Some((keep, _)) = best else {
            return false;
        };

        for (x, y, Luma([l])) in labels.enumerate_pixels() {
            let v = if *l as usize == keep { FOREGROUND } else { BACKGROUND };
            self.image.put_pixel(x, y, v);
        }
        true
    }

    /// One-pixel-wide skeleton in image coordinates, row-major order.
    pub fn skeleton_points(&self) -> Vec<Point> {
        let (w, h) = self.image.dimensions();
        let (w, h) = (w as usize, h as usize);
        let mut grid: Vec<bool> = self.image.pixels().map(|p| p[0] > 0).collect();
        thin(&mut grid, w, h);

        let (ox, oy) = self.origin;
        let mut points = Vec::new();
        for y in 0..h {
            for x in 0..w {
                if grid[y * w + x] {
                    points.push(Point::new((x as i32 + ox) as f64, (y as i32 + oy) as f64));
                }
            }
        }
        points
    }
}

/// Turns every background region that does not reach the image border into foreground.
fn fill_holes(image: &mut GrayImage) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let regions = connected_components(&*image, Connectivity::Four, FOREGROUND);

    let mut outside = std::collections::HashSet::new();
    for x in 0..w {
        outside.insert(regions.get_pixel(x, 0)[0]);
        outside.insert(regions.get_pixel(x, h - 1)[0]);
    }
    for y in 0..h {
        outside.insert(regions.get_pixel(0, y)[0]);
        outside.insert(regions.get_pixel(w - 1, y)[0]);
    }

    for (x, y, Luma([l])) in regions.enumerate_pixels() {
        if *l != 0 && !outside.contains(l) {
            image.put_pixel(x, y, FOREGROUND);
        }
    }
}

/// Zhang-Suen thinning in place. Pixels on the grid border are left untouched.
fn thin(grid: &mut [bool], w: usize, h: usize) {
    if w < 3 || h < 3 {
        return;
    }
    let mut to_clear: Vec<usize> = Vec::new();
    loop {
        let mut changed = false;
        for pass in 0..2 {
            to_clear.clear();
            for y in 1..h - 1 {
                for x in 1..w - 1 {
                    let idx = y * w + x;
                    if !grid[idx] {
                        continue;
                    }
                    // p2..p9 clockwise starting north
                    let n = [
                        grid[idx - w],
                        grid[idx - w + 1],
                        grid[idx + 1],
                        grid[idx + w + 1],
                        grid[idx + w],
                        grid[idx + w - 1],
                        grid[idx - 1],
                        grid[idx - w - 1],
                    ];
                    let b = n.iter().filter(|&&v| v).count();
                    if !(2..=6).contains(&b) {
                        continue;
                    }
                    let a = (0..8).filter(|&k| !n[k] && n[(k + 1) % 8]).count();
                    if a != 1 {
                        continue;
                    }
                    let (p2, p4, p6, p8) = (n[0], n[2], n[4], n[6]);
                    let keep = if pass == 0 {
                        (p2 && p4 && p6) || (p4 && p6 && p8)
                    } else {
                        (p2 && p4 && p8) || (p2 && p6 && p8)
                    };
                    if !keep {
                        to_clear.push(idx);
                    }
                }
            }
            for &idx in &to_clear {
                grid[idx] = false;
            }
            changed |= !to_clear.is_empty();
        }
        if !changed {
            break;
        }
    }
}

/// Skeleton pixels of the outline's cleaned mask, `None` when nothing survives.
pub fn extract_skeleton(contour: &Contour) -> Option<Vec<Point>> {
    let mut mask = BodyMask::rasterize(contour)?;
    mask.clean();
    if !mask.keep_largest_component() {
        debug!("contour {}: mask empty after cleaning", contour.id);
        return None;
    }
    Some(mask.skeleton_points())
}

/// Orders skeleton points from the one nearest `head` towards `tail`.
///
/// Greedy walk: step to the nearest unvisited point within `max_step`;
/// across a larger gap jump straight to the point nearest `tail` if it is
/// still unvisited, else stop. The walk also stops on reaching that point.
/// Branching skeletons can produce zig-zag paths.
pub fn order_greedy(points: &[Point], head: &Point, tail: &Point, max_step: f64) -> Vec<Point> {
    let (Some(start), Some(end)) = (nearest_index_in(points, head), nearest_index_in(points, tail))
    else {
        return Vec::new();
    };

    let mut visited = vec![false; points.len()];
    visited[start] = true;
    let mut ordered = vec![points[start]];
    let mut current = start;

    while ordered.len() < points.len() {
        let mut nearest: Option<(usize, f64)> = None;
        for (i, p) in points.iter().enumerate() {
            if visited[i] {
                continue;
            }
            let d = p.distance_to(&points[current]);
            if nearest.map_or(true, |(_, best)| d < best) {
                nearest = Some((i, d));
            }
        }
        let Some((candidate, dist)) = nearest else {
            break;
        };

        let next = if dist > max_step {
            if visited[end] {
                break;
            }
            end
        } else {
            candidate
        };

        visited[next] = true;
        ordered.push(points[next]);
        current = next;
        if next == end {
            break;
        }
    }
    ordered
}
