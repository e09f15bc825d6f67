//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、学習パラメータ、入出力ディレクトリをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::ImagePair;

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習済みモデルの保存先
    pub model_path: PathBuf,
    /// 入力画像のチャネル数
    pub num_channels: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/water_net.tar.gz"),
            num_channels: 3,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率（初期値）
    pub learning_rate: f64,
    /// 学習率の減衰率。`lr_decay_steps` ステップで学習率にこの値が掛かる（0で減衰なし）
    #[serde(default = "default_lr_decay")]
    pub lr_decay: f64,
    /// 減衰の単位ステップ数
    #[serde(default = "default_lr_decay_steps")]
    pub lr_decay_steps: usize,
    /// モーメンタム
    pub momentum: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証用に取り分けるサンプルの割合
    pub validation_ratio: f32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 128,
            num_workers: 0,
            learning_rate: 0.005,
            lr_decay: default_lr_decay(),
            lr_decay_steps: default_lr_decay_steps(),
            momentum: 0.9,
            seed: 42,
            validation_ratio: 0.1,
        }
    }
}

fn default_lr_decay() -> f64 {
    0.002
}

fn default_lr_decay_steps() -> usize {
    100
}

impl TrainingSettings {
    /// 1ステップごとに学習率へ掛ける係数
    ///
    /// `lr(step) = learning_rate * lr_decay ^ (step / lr_decay_steps)` を連続的に適用する。
    pub fn lr_gamma(&self) -> anyhow::Result<f64> {
        if self.lr_decay == 0.0 {
            return Ok(1.0);
        }
        if !(self.lr_decay > 0.0 && self.lr_decay <= 1.0) || self.lr_decay_steps == 0 {
            anyhow::bail!(
                "学習率の減衰設定が不正です: lr_decay {}, lr_decay_steps {}",
                self.lr_decay,
                self.lr_decay_steps
            );
        }
        Ok(self.lr_decay.powf(1.0 / self.lr_decay_steps as f64))
    }

    /// `step` 回更新した後の学習率
    pub fn learning_rate_at(&self, step: usize) -> anyhow::Result<f64> {
        Ok(self.learning_rate * self.lr_gamma()?.powf(step as f64))
    }
}

/// 入出力ディレクトリ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// 学習ログ（実行IDごとのサブディレクトリ）の出力先
    pub tensorboard_dir: PathBuf,
    /// WGS84に再投影済みのコンパニオンラスタ置き場
    pub wgs84_dir: PathBuf,
    /// 評価結果の出力先
    pub output_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            tensorboard_dir: PathBuf::from("data/tensorboard"),
            wgs84_dir: PathBuf::from("data/wgs84"),
            output_dir: PathBuf::from("data/output"),
        }
    }
}

/// 学習・評価に使う画像の一覧
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSettings {
    #[serde(default)]
    pub train: Vec<ImagePair>,
    #[serde(default)]
    pub test: Vec<ImagePair>,
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// タイルサイズ（正方形、ピクセル）
    pub tile_size: usize,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// ディレクトリ設定
    pub paths: PathSettings,
    /// データセット
    #[serde(default)]
    pub dataset: DatasetSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            tile_size: 64,
            model: ModelSettings::default(),
            training: TrainingSettings::default(),
            paths: PathSettings::default(),
            dataset: DatasetSettings::default(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    log::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    log::warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            log::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 実行IDに対応する学習ログディレクトリ
    pub fn run_log_dir(&self, run_id: &str) -> PathBuf {
        self.paths.tensorboard_dir.join(run_id)
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        log::info!("=== アプリケーション設定 ===");
        log::info!("計算デバイス: {}", self.device_type);
        log::info!("タイルサイズ: {}x{}", self.tile_size, self.tile_size);
        log::info!("モデルパス: {}", self.model.model_path.display());
        log::info!("チャネル数: {}", self.model.num_channels);
        log::info!("--- トレーニング設定 ---");
        log::info!("エポック数: {}", self.training.num_epochs);
        log::info!("バッチサイズ: {}", self.training.batch_size);
        log::info!(
            "学習率: {} (momentum {}, {} ステップごとに x{})",
            self.training.learning_rate,
            self.training.momentum,
            self.training.lr_decay_steps,
            self.training.lr_decay
        );
        log::info!("検証データ割合: {}", self.training.validation_ratio);
        log::info!("--- ディレクトリ ---");
        log::info!("ログ: {}", self.paths.tensorboard_dir.display());
        log::info!("WGS84: {}", self.paths.wgs84_dir.display());
        log::info!("出力: {}", self.paths.output_dir.display());
        log::info!(
            "学習画像: {} 枚, 評価画像: {} 枚",
            self.dataset.train.len(),
            self.dataset.test.len()
        );
    }
}
