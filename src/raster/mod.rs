pub mod geotiff;
pub mod tiling;

pub use geotiff::{overlay_bitmap, read_bitmap, read_geotiff, read_raster_info, GeoRaster, GeoReference, RasterInfo};
pub use tiling::{create_tiles, image_from_tiles};
