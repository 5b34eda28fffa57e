//! Tiling: split oversized or panoramic pages into overlapping crops.
//!
//! Vision models downsample large inputs aggressively, and a wide BPMN lane
//! rendered into one frame turns node labels into mush. Splitting the page
//! into overlapping tiles keeps each crop within the model's useful
//! resolution budget while the overlap guarantees no label is fully severed
//! at a tile boundary.
//!
//! Decision rule, in order:
//! 1. near-degenerate dimensions → single tile (never divide by zero);
//! 2. aspect ratio above the panorama threshold → 1-D strips along the
//!    long axis;
//! 3. pixel area above the area threshold → 2-D grid;
//! 4. otherwise → a single tile equal to the whole page (the common case).
//!
//! Tiling is pure and deterministic: identical input and thresholds always
//! produce the identical tile sequence, which keeps end-to-end runs
//! reproducible under test.

use crate::config::AnalysisConfig;
use image::DynamicImage;
use tracing::debug;

/// A rectangular crop of a page plus its placement within it.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Origin within the parent page, in pixels.
    pub x: u32,
    pub y: u32,
    pub image: DynamicImage,
}

impl Tile {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Minimum page dimension considered meaningful; below this the aspect and
/// area heuristics are noise and the page ships as one tile.
const MIN_DIMENSION: u32 = 8;

/// Strips aim for tiles about 1.5× as long as the page is tall (or wide);
/// grid cells aim comfortably below the area threshold even with overlap.
const STRIP_ELONGATION: f64 = 1.5;
const GRID_TARGET_FILL: f64 = 0.70;

/// Split a page into its tile sequence, ordered left-to-right then
/// top-to-bottom.
pub fn tile(page: &DynamicImage, config: &AnalysisConfig) -> Vec<Tile> {
    let (w, h) = (page.width(), page.height());

    if w < MIN_DIMENSION || h < MIN_DIMENSION {
        return vec![whole_page(page)];
    }

    let aspect = w.max(h) as f64 / w.min(h) as f64;
    let area = w as u64 * h as u64;
    let cap = config.max_tiles_per_axis;
    let overlap = config.tile_overlap as f64;

    let (cols, rows) = if aspect > config.panorama_ratio as f64 {
        // 1-D strips along the long axis.
        let long = w.max(h) as f64;
        let short = w.min(h) as f64;
        // `cap` can legally be 1, which forbids splitting at all.
        let n = ((long / (short * STRIP_ELONGATION)).ceil() as u32).clamp(2.min(cap), cap);
        if w >= h {
            (n, 1)
        } else {
            (1, n)
        }
    } else if area > config.tile_area_threshold {
        // 2-D grid: target cell side chosen so cells stay below the area
        // threshold even after overlap inflation. The cap grows the cells
        // rather than letting tile count proliferate.
        let target = (config.tile_area_threshold as f64).sqrt() * GRID_TARGET_FILL;
        let cols = ((w as f64 / target).ceil() as u32).clamp(1, cap);
        let rows = ((h as f64 / target).ceil() as u32).clamp(1, cap);
        if cols == 1 && rows == 1 {
            // Area says split, rounding says no: force one split on the
            // longer axis so the rule is not a no-op.
            if w >= h {
                (2.min(cap).max(1), 1)
            } else {
                (1, 2.min(cap).max(1))
            }
        } else {
            (cols, rows)
        }
    } else {
        (1, 1)
    };

    if cols == 1 && rows == 1 {
        return vec![whole_page(page)];
    }

    let xs = axis_spans(w, cols, overlap);
    let ys = axis_spans(h, rows, overlap);
    debug!(
        "Tiling {}x{} page into {}x{} tiles (overlap {:.0}%)",
        w,
        h,
        cols,
        rows,
        overlap * 100.0
    );

    let mut tiles = Vec::with_capacity((cols * rows) as usize);
    for &(y, th) in &ys {
        for &(x, tw) in &xs {
            tiles.push(Tile {
                x,
                y,
                image: page.crop_imm(x, y, tw, th),
            });
        }
    }
    tiles
}

fn whole_page(page: &DynamicImage) -> Tile {
    Tile {
        x: 0,
        y: 0,
        image: page.clone(),
    }
}

/// Split one axis of length `len` into `n` spans of equal extent, each
/// sharing `overlap` of its extent with its neighbour. Returns
/// `(offset, extent)` pairs; the last span is clamped flush to the end so
/// the union always covers `[0, len)`.
fn axis_spans(len: u32, n: u32, overlap: f64) -> Vec<(u32, u32)> {
    debug_assert!(n >= 1);
    if n <= 1 {
        return vec![(0, len)];
    }

    // n spans of extent t with pairwise overlap f·t cover n·t − (n−1)·f·t.
    let nf = n as f64;
    let extent = len as f64 / (nf - (nf - 1.0) * overlap);
    let stride = extent * (1.0 - overlap);
    let extent_px = (extent.ceil() as u32).clamp(1, len);

    (0..n)
        .map(|i| {
            let offset = ((i as f64 * stride).round() as u32).min(len - extent_px);
            (offset, extent_px)
        })
        .collect()
}
