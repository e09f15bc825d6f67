use anyhow::Result;
use ndarray::{s, Array2, Array4, Axis};
use std::path::Path;

use water_detector_lib::model::AppConfig;
use water_detector_lib::pipeline::metrics::load_curve_pickle;
use water_detector_lib::raster::{overlay_bitmap, read_bitmap, read_raster_info, GeoReference};
use water_detector_lib::{
    evaluate_model, load_tile_pairs, train_model, ImagePair, TrainingRun, WaterPredictor,
};

/// 入力の第1チャネルをそのまま確率として返す予測器
#[derive(Default)]
struct EchoPredictor {
    fitted_tiles: usize,
}

impl WaterPredictor for EchoPredictor {
    fn fit(mut self, features: &Array4<f32>, _labels: &Array2<u8>, _run: &TrainingRun) -> Result<Self> {
        self.fitted_tiles = features.dim().0;
        Ok(self)
    }

    fn predict(&self, features: &Array4<f32>) -> Result<Array2<f32>> {
        let (n, height, width, _) = features.dim();
        Ok(features
            .index_axis(Axis(3), 0)
            .to_owned()
            .into_shape_with_order((n, height * width))?)
    }
}

fn georef() -> GeoReference {
    GeoReference {
        pixel_scale: Some(vec![0.5, 0.5, 0.0]),
        tiepoints: Some(vec![0.0, 0.0, 0.0, 135.0, 35.0, 0.0]),
        ..Default::default()
    }
}

/// 画像・マスク・コンパニオンの3点を書き出す
fn write_scene(dir: &Path, name: &str, water: &Array2<u8>) -> ImagePair {
    let image = dir.join(format!("{}.tif", name));
    let mask = dir.join(format!("{}_mask.tif", name));
    let wgs84_dir = dir.join("wgs84");
    std::fs::create_dir_all(&wgs84_dir).unwrap();

    overlay_bitmap(&water.mapv(|v| v * 255), &GeoReference::default(), &image).unwrap();
    overlay_bitmap(water, &GeoReference::default(), &mask).unwrap();
    overlay_bitmap(
        &Array2::zeros(water.dim()),
        &georef(),
        &wgs84_dir.join(format!("{}_wgs84.tif", name)),
    )
    .unwrap();

    ImagePair { image, mask }
}

#[test]
fn test_train_and_evaluate_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let lake = Array2::from_shape_fn((4, 6), |(r, _)| u8::from(r < 2));
    let river = Array2::from_elem((5, 5), 1u8);

    let pairs = vec![
        write_scene(dir.path(), "lake", &lake),
        write_scene(dir.path(), "river", &river),
    ];

    let mut config = AppConfig::default();
    config.tile_size = 2;
    config.paths.wgs84_dir = dir.path().join("wgs84");
    config.paths.tensorboard_dir = dir.path().join("tensorboard");

    let (features, labels) = load_tile_pairs(&pairs, config.tile_size).unwrap();
    // lake: 2x3, river: 2x2 (端の1画素は切り捨て)
    assert_eq!(features.len(), 10);

    let model = train_model(
        EchoPredictor::default(),
        &features,
        &labels,
        config.tile_size,
        "e2e",
        &config,
    )
    .unwrap();
    assert_eq!(model.fitted_tiles, 10);

    let out_dir = dir.path().join("out");
    let report = evaluate_model(&model, &features, &labels, config.tile_size, &out_dir, &config)
        .unwrap();

    assert_eq!(report.raster_paths.len(), 2);
    assert_eq!(report.labeled_water_pixels, 12 + 16);
    assert_eq!(report.predicted_water_pixels, 12 + 16);
    approx::assert_relative_eq!(report.average_precision, 1.0, epsilon = 1e-9);

    let lake_out = read_bitmap(&out_dir.join("lake.tif")).unwrap();
    assert_eq!(lake_out, lake);

    let river_out = read_bitmap(&out_dir.join("river.tif")).unwrap();
    assert_eq!(river_out.dim(), (5, 5));
    assert!(river_out.slice(s![..4, ..4]).iter().all(|v| *v == 1));
    assert!(river_out.row(4).iter().all(|v| *v == 0));
    assert!(river_out.column(4).iter().all(|v| *v == 0));

    let info = read_raster_info(&out_dir.join("river.tif")).unwrap();
    assert_eq!(info.georef.pixel_scale, georef().pixel_scale);
    assert_eq!(info.georef.tiepoints, georef().tiepoints);

    assert!(report.plot_path.exists());
    let curve = load_curve_pickle(&report.pickle_path).unwrap();
    assert_eq!(curve, report.curve);
}

#[test]
fn test_evaluate_without_companion_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pair = write_scene(dir.path(), "pond", &Array2::from_elem((2, 2), 1u8));

    let mut config = AppConfig::default();
    config.tile_size = 2;
    config.paths.wgs84_dir = dir.path().join("missing");

    let (features, labels) = load_tile_pairs(&[pair], 2).unwrap();
    let result = evaluate_model(
        &EchoPredictor::default(),
        &features,
        &labels,
        2,
        &dir.path().join("out"),
        &config,
    );
    assert!(result.is_err());
}
