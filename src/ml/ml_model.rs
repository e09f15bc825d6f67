//! 水域予測用CNNモデルの定義
//!
//! 畳み込み1層の浅いCNNで、タイルの各画素が水域である確率を出力します。

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::BinaryCrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
    train::RegressionOutput,
};

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 入力タイルサイズ（正方形）
    pub tile_size: usize,
    /// 入力チャネル数
    #[config(default = 3)]
    pub num_channels: usize,
    /// 畳み込みフィルタ数
    #[config(default = 64)]
    pub filters: usize,
    /// 畳み込みカーネルサイズ
    #[config(default = 12)]
    pub kernel_size: usize,
    /// 畳み込みストライド
    #[config(default = 4)]
    pub stride: usize,
    /// プーリングサイズ（ストライド同じ）
    #[config(default = 3)]
    pub pool_size: usize,
}

impl ModelConfig {
    /// プーリング後の特徴マップの一辺
    ///
    /// Conv (padding無し): (size - kernel) / stride + 1
    /// Pool: conv / pool_size (切り捨て)
    pub fn feature_map_size(&self) -> Result<usize> {
        if self.tile_size < self.kernel_size || self.stride == 0 || self.pool_size == 0 {
            anyhow::bail!(
                "タイルサイズが小さすぎます: {} (カーネル {})",
                self.tile_size,
                self.kernel_size
            );
        }
        let after_conv = (self.tile_size - self.kernel_size) / self.stride + 1;
        let after_pool = after_conv / self.pool_size;
        if after_pool == 0 {
            anyhow::bail!(
                "タイルサイズが小さすぎます: {} (Conv後 {}x{}, Pool {})",
                self.tile_size,
                after_conv,
                after_conv,
                self.pool_size
            );
        }
        Ok(after_pool)
    }

    /// 出力次元（タイルの画素数）
    pub fn num_outputs(&self) -> usize {
        self.tile_size * self.tile_size
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<WaterNet<B>> {
        let feature_map_size = self.feature_map_size()?;
        let d = self.filters * feature_map_size * feature_map_size;

        log::debug!(
            "[Model] 入力 {}x{}x{}, Pool後 {}x{}, FC {} -> {}",
            self.tile_size,
            self.tile_size,
            self.num_channels,
            feature_map_size,
            feature_map_size,
            d,
            self.num_outputs()
        );

        Ok(WaterNet {
            conv: Conv2dConfig::new([self.num_channels, self.filters], [self.kernel_size, self.kernel_size])
                .with_stride([self.stride, self.stride])
                .init(device),
            pool: MaxPool2dConfig::new([self.pool_size, self.pool_size])
                .with_strides([self.pool_size, self.pool_size])
                .init(),
            fc: LinearConfig::new(d, self.num_outputs()).init(device),
            activation: Relu::new(),
        })
    }
}

/// 水域予測CNN
///
/// # アーキテクチャ
/// - Conv 12x12 stride 4 (64ch) + ReLU
/// - MaxPool 3x3
/// - Flatten
/// - FC: d -> tile_size * tile_size（シグモイドで画素ごとの確率）
#[derive(Module, Debug)]
pub struct WaterNet<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
    fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> WaterNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, channels, size, size]
    ///
    /// # 戻り値
    /// - 画素ごとのロジット [batch_size, size * size]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        self.fc.forward(x)
    }

    /// 画素ごとの水域確率 [batch_size, size * size]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(images))
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, channels, size, size]
    /// - `targets`: 0/1 マスク [batch_size, size * size]
    pub fn forward_regression(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 2, Int>,
    ) -> RegressionOutput<B> {
        let logits = self.forward(images);
        let loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&logits.device())
            .forward(logits.clone(), targets.clone());

        RegressionOutput::new(loss, sigmoid(logits), targets.float())
    }
}
