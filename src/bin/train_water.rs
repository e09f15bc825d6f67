//! 水域予測モデルの学習と評価を一括で行うバイナリ
//!
//! Usage: train_water [config.json] <run_id>
//!
//! 設定ファイルを省略した場合は `config.json` を読み、無ければデフォルト設定を使います。

#![recursion_limit = "256"]
#[cfg(feature = "ml")]
fn main() {
    use env_logger::Env;
    use water_detector_lib::model::{AppConfig, DeviceType};

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let (config, run_id) = match args.as_slice() {
        [_, run_id] => (AppConfig::load_or_default(AppConfig::default_path()), run_id),
        [_, config_path, run_id, ..] => match AppConfig::load(config_path) {
            Ok(c) => (c, run_id),
            Err(err) => {
                eprintln!("設定ファイルの読み込みエラー: {:#}", err);
                std::process::exit(1);
            }
        },
        _ => {
            eprintln!("Usage: train_water [config.json] <run_id>");
            std::process::exit(2);
        }
    };
    config.display();

    let result = match config.device_type {
        DeviceType::Wgpu => {
            use burn::backend::{Autodiff, Wgpu};
            run::<Autodiff<Wgpu>>(&config, run_id, burn_wgpu::WgpuDevice::default())
        }
        DeviceType::Cpu => {
            use burn::backend::Autodiff;
            use burn_ndarray::{NdArray, NdArrayDevice};
            run::<Autodiff<NdArray<f32>>>(&config, run_id, NdArrayDevice::Cpu)
        }
    };

    if let Err(err) = result {
        log::error!("処理に失敗しました: {:#}", err);
        std::process::exit(1);
    }
}

#[cfg(feature = "ml")]
fn run<B: burn::tensor::backend::AutodiffBackend>(
    config: &water_detector_lib::model::AppConfig,
    run_id: &str,
    device: B::Device,
) -> anyhow::Result<()> {
    use water_detector_lib::ml::{save_predictor, BurnWaterPredictor, ModelConfig};
    use water_detector_lib::model::{load_metadata, print_metadata_info};
    use water_detector_lib::{evaluate_model, load_tile_pairs, train_model};

    let tile_size = config.tile_size;
    let (train_features, train_labels) = load_tile_pairs(&config.dataset.train, tile_size)?;
    let (test_features, test_labels) = load_tile_pairs(&config.dataset.test, tile_size)?;

    let model_config = ModelConfig::new(tile_size).with_num_channels(config.model.num_channels);
    let predictor = BurnWaterPredictor::<B>::new(model_config, config.training.clone(), device)?;

    let predictor = train_model(predictor, &train_features, &train_labels, tile_size, run_id, config)?;
    let saved = save_predictor(&predictor, &config.model.model_path, run_id)?;
    log::info!("モデルを保存しました: {}", saved.display());
    print_metadata_info(&load_metadata(&saved)?);

    let out_path = config.paths.output_dir.join(run_id);
    let report = evaluate_model(&predictor, &test_features, &test_labels, tile_size, &out_path, config)?;

    println!("Evaluation finished:");
    println!("  rasters: {}", report.raster_paths.len());
    println!("  average precision: {:.4}", report.average_precision);
    println!(
        "  water pixels: predicted {} / labeled {}",
        report.predicted_water_pixels, report.labeled_water_pixels
    );
    println!("  curve: {}", report.pickle_path.display());
    println!("  plot: {}", report.plot_path.display());
    Ok(())
}

#[cfg(not(feature = "ml"))]
fn main() {
    println!("ML機能が有効化されていません (--features ml でビルドしてください)");
}
