//! ラスタのタイル分割と再構成

use ndarray::{s, Array2, Array3, ArrayView2};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{Tile, TilePosition};

/// 画像を重なりのない正方形タイルに分割する
///
/// 行優先で左上から切り出す。右端・下端でタイル1枚に満たない領域は捨てる。
pub fn create_tiles(image: &Array3<u8>, tile_size: usize, source: &Path) -> Vec<Tile> {
    if tile_size == 0 {
        return Vec::new();
    }

    let (height, width, _) = image.dim();
    let mut tiles = Vec::with_capacity((height / tile_size) * (width / tile_size));

    for row in (0..height / tile_size).map(|i| i * tile_size) {
        for col in (0..width / tile_size).map(|j| j * tile_size) {
            let pixels = image
                .slice(s![row..row + tile_size, col..col + tile_size, ..])
                .to_owned();
            tiles.push(Tile::new(pixels, TilePosition::new(row, col), source));
        }
    }

    log::debug!(
        "{} を {} 枚のタイルに分割しました ({}x{}, tile {})",
        source.display(),
        tiles.len(),
        height,
        width,
        tile_size
    );
    tiles
}

/// 位置付きタイルを (height, width) の画像に配置する
///
/// タイルで覆われない画素は `T::default()`（ビットマップなら0）のまま残る。
/// 画像の範囲をはみ出すタイルはエラー。
pub fn image_from_tiles<'a, T, I>(
    tiles: I,
    tile_size: usize,
    shape: (usize, usize),
) -> PipelineResult<Array2<T>>
where
    T: Copy + Default + 'a,
    I: IntoIterator<Item = (ArrayView2<'a, T>, TilePosition)>,
{
    let (height, width) = shape;
    let mut image = Array2::from_elem(shape, T::default());

    for (index, (pixels, position)) in tiles.into_iter().enumerate() {
        if pixels.dim() != (tile_size, tile_size) {
            return Err(PipelineError::TileShape {
                index,
                actual: pixels.shape().to_vec(),
                expected: vec![tile_size, tile_size],
            });
        }

        let TilePosition { row, col } = position;
        if row + tile_size > height || col + tile_size > width {
            return Err(PipelineError::TileOutOfBounds {
                row,
                col,
                tile_size,
                height,
                width,
            });
        }

        image
            .slice_mut(s![row..row + tile_size, col..col + tile_size])
            .assign(&pixels);
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;
    use std::path::PathBuf;

    fn gradient(height: usize, width: usize) -> Array3<u8> {
        Array3::from_shape_fn((height, width, 1), |(r, c, _)| (r * width + c) as u8)
    }

    #[test]
    fn test_create_tiles_positions() {
        let image = gradient(4, 4);
        let tiles = create_tiles(&image, 2, Path::new("scene.tif"));

        let positions: Vec<_> = tiles.iter().map(|t| (t.position.row, t.position.col)).collect();
        assert_eq!(positions, vec![(0, 0), (0, 2), (2, 0), (2, 2)]);
        assert!(tiles.iter().all(|t| t.source == PathBuf::from("scene.tif")));
        assert_eq!(tiles[1].pixels[[0, 0, 0]], 2);
        assert_eq!(tiles[2].pixels[[1, 1, 0]], 13);
    }

    #[test]
    fn test_create_tiles_skips_ragged_edge() {
        let image = gradient(5, 7);
        let tiles = create_tiles(&image, 2, Path::new("a.tif"));
        assert_eq!(tiles.len(), 2 * 3);
        assert!(create_tiles(&image, 0, Path::new("a.tif")).is_empty());
        assert!(create_tiles(&image, 8, Path::new("a.tif")).is_empty());
    }

    #[test]
    fn test_roundtrip_reproduces_image() {
        let image = gradient(6, 4);
        let tiles = create_tiles(&image, 2, Path::new("a.tif"));

        let rebuilt = image_from_tiles(
            tiles
                .iter()
                .map(|t| (t.pixels.index_axis(Axis(2), 0), t.position)),
            2,
            (6, 4),
        )
        .unwrap();

        assert_eq!(rebuilt, image.index_axis(Axis(2), 0));
    }

    #[test]
    fn test_uncovered_pixels_are_default() {
        let ones = Array2::<u8>::ones((2, 2));
        let rebuilt =
            image_from_tiles([(ones.view(), TilePosition::new(0, 0))], 2, (3, 3)).unwrap();

        assert_eq!(rebuilt.slice(s![0..2, 0..2]).sum(), 4);
        assert_eq!(rebuilt.row(2).sum(), 0);
        assert_eq!(rebuilt.column(2).sum(), 0);
    }

    #[test]
    fn test_out_of_bounds_tile() {
        let ones = Array2::<u8>::ones((2, 2));
        let result = image_from_tiles([(ones.view(), TilePosition::new(2, 1))], 2, (4, 2));
        assert!(matches!(
            result,
            Err(PipelineError::TileOutOfBounds { row: 2, col: 1, .. })
        ));
    }

    #[test]
    fn test_wrong_tile_size() {
        let block = Array2::<u8>::ones((3, 2));
        let result = image_from_tiles([(block.view(), TilePosition::new(0, 0))], 2, (4, 4));
        assert!(matches!(result, Err(PipelineError::TileShape { index: 0, .. })));
    }
}
