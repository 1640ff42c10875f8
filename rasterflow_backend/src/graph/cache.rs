//! Tile-indexed per-node result cache.
//!
//! Stored regions are broken into fixed-size tiles; a lookup hits only when
//! every overlapping tile still covers its share of the queried region.
//! Invalidation drops whole tiles, so anything overlapping an invalidated
//! region is guaranteed to miss and recompute.

use crate::buffer::PixelBuffer;
use crate::format::Format;
use crate::rect::Rect;
use utils::map::HashMap;

pub(crate) const TILE_SIZE: i32 = 64;

#[derive(Debug)]
struct Tile {
    /// Row-major pixels covering the full tile rect; only `valid` holds data.
    data: Vec<u8>,
    valid: Rect,
}

#[derive(derive_more::Debug)]
pub struct NodeCache {
    format: Format,
    #[debug("(...)")]
    tiles: HashMap<(i32, i32), Tile>,
}

impl NodeCache {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            tiles: HashMap::default(),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Copies `region` of `buffer` into the cache.
    pub fn store(&mut self, buffer: &PixelBuffer, region: Rect) {
        let bpp = self.format.bytes_per_pixel();
        for key in tiles_over(region) {
            let tile_rect = tile_rect(key);
            let covered = tile_rect.intersect(&region);
            let tile = self.tiles.entry(key).or_insert_with(|| Tile {
                data: vec![0; tile_rect.area() * bpp],
                valid: Rect::ZERO,
            });

            for y in covered.y..covered.bottom() {
                let row = Rect::new(covered.x, y, covered.width, 1);
                let offset = byte_offset(tile_rect, covered.x, y, bpp);
                buffer.get(
                    1.0,
                    row,
                    self.format,
                    &mut tile.data[offset..offset + covered.width as usize * bpp],
                    0,
                );
            }

            // track coverage conservatively: keep the larger of old and new
            // unless the new store subsumes the old
            tile.valid = if covered.contains_rect(&tile.valid) {
                covered
            } else if tile.valid.contains_rect(&covered) {
                tile.valid
            } else {
                covered
            };
        }
    }

    /// Whether `region` can be served entirely from cache.
    pub fn contains(&self, region: Rect) -> bool {
        if region.is_empty() {
            return true;
        }
        tiles_over(region).all(|key| {
            let needed = tile_rect(key).intersect(&region);
            self.tiles
                .get(&key)
                .is_some_and(|tile| tile.valid.contains_rect(&needed))
        })
    }

    /// The cached pixels for `region`, or `None` on a (partial) miss.
    pub fn get(&self, region: Rect) -> Option<PixelBuffer> {
        if !self.contains(region) {
            return None;
        }
        Some(self.read(region))
    }

    /// Assembles `region` from whatever tiles are present; missing pixels
    /// read as zeros (the dirty-blit path).
    pub fn read(&self, region: Rect) -> PixelBuffer {
        let out = PixelBuffer::new(self.format, region);
        let bpp = self.format.bytes_per_pixel();
        for key in tiles_over(region) {
            let Some(tile) = self.tiles.get(&key) else {
                continue;
            };
            let covered = tile_rect(key).intersect(&region).intersect(&tile.valid);
            for y in covered.y..covered.bottom() {
                let offset = byte_offset(tile_rect(key), covered.x, y, bpp);
                out.set(
                    Rect::new(covered.x, y, covered.width, 1),
                    self.format,
                    &tile.data[offset..offset + covered.width as usize * bpp],
                    0,
                );
            }
        }
        out
    }

    /// Drops every tile overlapping `region`.
    pub fn invalidate(&mut self, region: Rect) {
        if region.is_empty() {
            return;
        }
        self.tiles.retain(|key, _| !tile_rect(*key).intersects(&region));
    }
}

fn tile_rect((tx, ty): (i32, i32)) -> Rect {
    Rect::new(tx * TILE_SIZE, ty * TILE_SIZE, TILE_SIZE, TILE_SIZE)
}

fn byte_offset(tile: Rect, x: i32, y: i32, bpp: usize) -> usize {
    ((y - tile.y) as usize * TILE_SIZE as usize + (x - tile.x) as usize) * bpp
}

fn tiles_over(region: Rect) -> impl Iterator<Item = (i32, i32)> {
    let x0 = region.x.div_euclid(TILE_SIZE);
    let y0 = region.y.div_euclid(TILE_SIZE);
    let x1 = (region.right() - 1).div_euclid(TILE_SIZE);
    let y1 = (region.bottom() - 1).div_euclid(TILE_SIZE);
    (y0..=y1).flat_map(move |ty| (x0..=x1).map(move |tx| (tx, ty)))
}
