//! GeoTIFFの読み書き
//!
//! 画素値の読み込み、コンパニオンラスタの形状と地理参照タグの取得、
//! 推論結果ビットマップの単バンドGeoTIFF書き出しを行います。

use ndarray::{Array2, Array3, Axis};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{PipelineError, PipelineResult};

/// GeoTIFFの地理参照タグ
///
/// 存在するタグのみ保持し、書き出し時にそのままコピーする。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoReference {
    pub pixel_scale: Option<Vec<f64>>,
    pub tiepoints: Option<Vec<f64>>,
    pub transformation: Option<Vec<f64>>,
    pub geo_key_directory: Option<Vec<u16>>,
    pub geo_double_params: Option<Vec<f64>>,
    pub geo_ascii_params: Option<String>,
}

impl GeoReference {
    fn read<R: Read + Seek>(decoder: &mut Decoder<R>) -> PipelineResult<Self> {
        let f64_tag = |decoder: &mut Decoder<R>, tag: Tag| -> PipelineResult<Option<Vec<f64>>> {
            Ok(decoder.find_tag(tag)?.map(|v| v.into_f64_vec()).transpose()?)
        };

        Ok(Self {
            pixel_scale: f64_tag(decoder, Tag::ModelPixelScaleTag)?,
            tiepoints: f64_tag(decoder, Tag::ModelTiepointTag)?,
            transformation: f64_tag(decoder, Tag::ModelTransformationTag)?,
            geo_key_directory: decoder.find_tag_unsigned_vec::<u16>(Tag::GeoKeyDirectoryTag)?,
            geo_double_params: f64_tag(decoder, Tag::GeoDoubleParamsTag)?,
            geo_ascii_params: decoder
                .find_tag(Tag::GeoAsciiParamsTag)?
                .map(|v| v.into_string())
                .transpose()?,
        })
    }

    /// 地理参照タグが1つもないか
    pub fn is_empty(&self) -> bool {
        self.pixel_scale.is_none()
            && self.tiepoints.is_none()
            && self.transformation.is_none()
            && self.geo_key_directory.is_none()
    }
}

/// 画素値と地理参照を持つラスタ
#[derive(Debug, Clone)]
pub struct GeoRaster {
    /// (height, width, channels)
    pub pixels: Array3<u8>,
    pub georef: GeoReference,
}

/// 画素値を読まずに取得したラスタ情報
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub height: usize,
    pub width: usize,
    pub georef: GeoReference,
}

impl RasterInfo {
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

fn open_decoder(path: &Path) -> PipelineResult<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(Decoder::new(BufReader::new(file))?)
}

fn channel_count(path: &Path, color: ColorType) -> PipelineResult<usize> {
    match color {
        ColorType::Gray(8) => Ok(1),
        ColorType::GrayA(8) => Ok(2),
        ColorType::RGB(8) => Ok(3),
        ColorType::RGBA(8) => Ok(4),
        other => Err(PipelineError::UnsupportedRaster {
            path: path.to_path_buf(),
            reason: format!("color type {:?} (8-bit samples required)", other),
        }),
    }
}

/// ラスタの形状と地理参照のみを読み込む
///
/// コンパニオンラスタの読み込みに使うため、ファイルが無い場合は `CompanionNotFound`。
pub fn read_raster_info(path: &Path) -> PipelineResult<RasterInfo> {
    let mut decoder = open_decoder(path).map_err(|e| match e {
        PipelineError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            PipelineError::CompanionNotFound(path.to_path_buf())
        }
        other => other,
    })?;
    let (width, height) = decoder.dimensions()?;
    let georef = GeoReference::read(&mut decoder)?;

    Ok(RasterInfo {
        height: height as usize,
        width: width as usize,
        georef,
    })
}

/// 8bitのGeoTIFFを (height, width, channels) の配列として読み込む
pub fn read_geotiff(path: &Path) -> PipelineResult<GeoRaster> {
    let mut decoder = open_decoder(path)?;
    let (width, height) = decoder.dimensions()?;
    let channels = channel_count(path, decoder.colortype()?)?;
    let georef = GeoReference::read(&mut decoder)?;

    let data = match decoder.read_image()? {
        DecodingResult::U8(data) => data,
        _ => {
            return Err(PipelineError::UnsupportedRaster {
                path: path.to_path_buf(),
                reason: "sample format is not u8".to_string(),
            })
        }
    };

    let pixels = Array3::from_shape_vec((height as usize, width as usize, channels), data)
        .map_err(|e| PipelineError::UnsupportedRaster {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    log::debug!(
        "GeoTIFFを読み込みました: {} ({}x{}, {}ch)",
        path.display(),
        width,
        height,
        channels
    );

    Ok(GeoRaster { pixels, georef })
}

/// 単バンドのマスクを読み込み、0以外を1とした2値ビットマップを返す
pub fn read_bitmap(path: &Path) -> PipelineResult<Array2<u8>> {
    let raster = read_geotiff(path)?;
    if raster.pixels.dim().2 != 1 {
        return Err(PipelineError::UnsupportedRaster {
            path: path.to_path_buf(),
            reason: format!("expected 1 band, found {}", raster.pixels.dim().2),
        });
    }
    Ok(raster
        .pixels
        .index_axis_move(Axis(2), 0)
        .mapv(|v| u8::from(v != 0)))
}

/// ビットマップを単バンド8bitのGeoTIFFとして書き出す
///
/// `georef` の地理参照タグをコピーし、コンパニオンラスタと位置を揃える。
pub fn overlay_bitmap(bitmap: &Array2<u8>, georef: &GeoReference, path: &Path) -> PipelineResult<()> {
    let (height, width) = bitmap.dim();
    let data: Vec<u8> = bitmap.iter().copied().collect();

    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut image = encoder.new_image::<colortype::Gray8>(width as u32, height as u32)?;

    {
        let dir = image.encoder();
        if let Some(values) = &georef.pixel_scale {
            dir.write_tag(Tag::ModelPixelScaleTag, values.as_slice())?;
        }
        if let Some(values) = &georef.tiepoints {
            dir.write_tag(Tag::ModelTiepointTag, values.as_slice())?;
        }
        if let Some(values) = &georef.transformation {
            dir.write_tag(Tag::ModelTransformationTag, values.as_slice())?;
        }
        if let Some(values) = &georef.geo_key_directory {
            dir.write_tag(Tag::GeoKeyDirectoryTag, values.as_slice())?;
        }
        if let Some(values) = &georef.geo_double_params {
            dir.write_tag(Tag::GeoDoubleParamsTag, values.as_slice())?;
        }
        if let Some(text) = &georef.geo_ascii_params {
            dir.write_tag(Tag::GeoAsciiParamsTag, text.as_str())?;
        }
    }

    image.write_data(&data)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// テスト用の地理参照（WGS84、左上 (10.0, 50.0)、0.001度/ピクセル）
    pub fn sample_georef() -> GeoReference {
        GeoReference {
            pixel_scale: Some(vec![0.001, 0.001, 0.0]),
            tiepoints: Some(vec![0.0, 0.0, 0.0, 10.0, 50.0, 0.0]),
            transformation: None,
            geo_key_directory: Some(vec![1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326]),
            geo_double_params: None,
            geo_ascii_params: Some("WGS 84|".to_string()),
        }
    }

    /// RGBのGeoTIFFを書き出す
    pub fn write_rgb(path: &Path, pixels: &Array3<u8>, georef: &GeoReference) {
        let (height, width, channels) = pixels.dim();
        assert_eq!(channels, 3);
        let data: Vec<u8> = pixels.iter().copied().collect();
        let file = BufWriter::new(File::create(path).unwrap());
        let mut encoder = TiffEncoder::new(file).unwrap();
        let mut image = encoder
            .new_image::<colortype::RGB8>(width as u32, height as u32)
            .unwrap();
        if let Some(values) = &georef.pixel_scale {
            image
                .encoder()
                .write_tag(Tag::ModelPixelScaleTag, values.as_slice())
                .unwrap();
        }
        if let Some(values) = &georef.tiepoints {
            image
                .encoder()
                .write_tag(Tag::ModelTiepointTag, values.as_slice())
                .unwrap();
        }
        image.write_data(&data).unwrap();
    }
}
