//! Contrast-limited adaptive histogram equalization.
//!
//! The image is split into a `tiles x tiles` grid. Each tile gets its own
//! clipped histogram and lookup table, and every output pixel is bilinearly
//! interpolated between the four nearest tile tables so tile seams don't show.

use image::{GrayImage, Luma};

const BINS: usize = 256;

pub fn equalize(image: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let tiles_x = tiles.clamp(1, width.max(1));
    let tiles_y = tiles.clamp(1, height.max(1));
    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    // Tiles partition the image exactly; every tile holds at least one pixel.
    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let (y0, y1) = tile_span(ty, tiles_y, height);
        for tx in 0..tiles_x {
            let (x0, x1) = tile_span(tx, tiles_x, width);
            luts.push(tile_lut(image, x0, y0, x1, y1, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

    GrayImage::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y).0[0] as usize;

        // Position relative to tile centres.
        let gx = (x as f32 + 0.5) / tile_w - 0.5;
        let gy = (y as f32 + 0.5) / tile_h - 0.5;
        let tx0 = gx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
        let ty0 = gy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = (gx - tx0 as f32).clamp(0.0, 1.0);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        let top = lut_at(tx0, ty0)[value] * (1.0 - fx) + lut_at(tx1, ty0)[value] * fx;
        let bottom = lut_at(tx0, ty1)[value] * (1.0 - fx) + lut_at(tx1, ty1)[value] * fx;
        let mapped = top * (1.0 - fy) + bottom * fy;

        Luma([mapped.round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_span(index: u32, tiles: u32, extent: u32) -> (u32, u32) {
    let start = (index as u64 * extent as u64 / tiles as u64) as u32;
    let end = ((index as u64 + 1) * extent as u64 / tiles as u64) as u32;
    (start, end)
}

fn tile_lut(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [f32; BINS] {
    let mut hist = [0u32; BINS];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[image.get_pixel(x, y).0[0] as usize] += 1;
        }
    }

    let area = ((x1 - x0) * (y1 - y0)).max(1);
    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);
        let mut excess = 0u32;
        for count in hist.iter_mut() {
            if *count > limit {
                excess += *count - limit;
                *count = limit;
            }
        }
        let share = excess / BINS as u32;
        let remainder = (excess % BINS as u32) as usize;
        for (i, count) in hist.iter_mut().enumerate() {
            *count += share + u32::from(i < remainder);
        }
    }

    let mut lut = [0f32; BINS];
    let mut cumulative = 0u32;
    let scale = 255.0 / area as f32;
    for (i, count) in hist.iter().enumerate() {
        cumulative += count;
        lut[i] = cumulative as f32 * scale;
    }
    lut
}
