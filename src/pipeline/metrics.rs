//! 適合率-再現率曲線の計算と保存

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

pub const PICKLE_FILE_NAME: &str = "precision_recall.pickle";
pub const PLOT_FILE_NAME: &str = "precision_recall.png";

/// 適合率-再現率曲線
///
/// `thresholds` は昇順。`precision` と `recall` は閾値ごとの値の後に
/// (1, 0) の終点を持つため、`thresholds` より1つ長い。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecisionRecallCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub thresholds: Vec<f64>,
}

impl PrecisionRecallCurve {
    /// 平均適合率 Σ (R_n - R_{n+1}) * P_n
    pub fn average_precision(&self) -> f64 {
        self.recall
            .windows(2)
            .zip(&self.precision)
            .map(|(r, p)| (r[0] - r[1]) * p)
            .sum()
    }
}

/// 正解ラベル (0/1) と予測スコアから適合率-再現率曲線を求める
///
/// スコアの異なる値それぞれを閾値とし、`score >= threshold` を陽性とみなす。
/// 陽性サンプルが1つもない場合、再現率はすべて1とする。
pub fn precision_recall_curve(y_true: &[u8], scores: &[f32]) -> PipelineResult<PrecisionRecallCurve> {
    if y_true.len() != scores.len() {
        return Err(PipelineError::InvalidCurveInput(format!(
            "{} labels but {} scores",
            y_true.len(),
            scores.len()
        )));
    }
    if y_true.is_empty() {
        return Err(PipelineError::InvalidCurveInput("no samples".to_string()));
    }
    if scores.iter().any(|s| s.is_nan()) {
        return Err(PipelineError::InvalidCurveInput("NaN score".to_string()));
    }

    // スコア降順。同点は安定ソートで元の順序を保つ
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut tps: Vec<f64> = Vec::new();
    let mut fps: Vec<f64> = Vec::new();
    let mut thresholds: Vec<f64> = Vec::new();
    let mut tp = 0.0;
    for (rank, &idx) in order.iter().enumerate() {
        if y_true[idx] != 0 {
            tp += 1.0;
        }
        let last_of_value = order
            .get(rank + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if last_of_value {
            tps.push(tp);
            fps.push((rank + 1) as f64 - tp);
            thresholds.push(f64::from(scores[idx]));
        }
    }

    let total_positives = tp;
    let mut precision: Vec<f64> = tps
        .iter()
        .zip(&fps)
        .map(|(tp, fp)| if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 })
        .collect();
    let mut recall: Vec<f64> = if total_positives > 0.0 {
        tps.iter().map(|tp| tp / total_positives).collect()
    } else {
        log::warn!("正解ラベルに陽性が含まれていないため、再現率はすべて1になります");
        vec![1.0; tps.len()]
    };

    precision.reverse();
    recall.reverse();
    thresholds.reverse();
    precision.push(1.0);
    recall.push(0.0);

    Ok(PrecisionRecallCurve {
        precision,
        recall,
        thresholds,
    })
}

/// 曲線データを pickle (キー: precision, recall, thresholds) として保存する
pub fn save_curve_pickle(curve: &PrecisionRecallCurve, path: &Path) -> PipelineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_pickle::to_writer(&mut writer, curve, serde_pickle::SerOptions::new())?;
    Ok(())
}

/// pickle から曲線データを読み込む
pub fn load_curve_pickle(path: &Path) -> PipelineResult<PrecisionRecallCurve> {
    let reader = std::io::BufReader::new(File::open(path)?);
    Ok(serde_pickle::from_reader(reader, serde_pickle::DeOptions::new())?)
}

const PLOT_WIDTH: u32 = 640;
const PLOT_HEIGHT: u32 = 480;
const PLOT_MARGIN: u32 = 48;
const PRECISION_AXIS_MAX: f64 = 1.05;
const TICK_LENGTH: f32 = 5.0;
const LEGEND_WIDTH: u32 = 120;
const LEGEND_HEIGHT: u32 = 28;
const LEGEND_INSET: u32 = 12;

/// 再現率 (x, [0, 1]) と適合率 (y, [0, 1.05]) を画像座標に変換する
fn to_canvas(recall: f64, precision: f64) -> (f32, f32) {
    let inner_w = f64::from(PLOT_WIDTH - 2 * PLOT_MARGIN);
    let inner_h = f64::from(PLOT_HEIGHT - 2 * PLOT_MARGIN);
    let x = f64::from(PLOT_MARGIN) + recall.clamp(0.0, 1.0) * inner_w;
    let y = f64::from(PLOT_HEIGHT - PLOT_MARGIN)
        - precision.clamp(0.0, PRECISION_AXIS_MAX) / PRECISION_AXIS_MAX * inner_h;
    (x as f32, y as f32)
}

/// 適合率-再現率曲線の折れ線グラフを描画する
pub fn render_curve(curve: &PrecisionRecallCurve) -> RgbImage {
    let background = Rgb([229u8, 229, 229]);
    let grid = Rgb([255u8, 255, 255]);
    let axis = Rgb([80u8, 80, 80]);
    let line = Rgb([226u8, 74, 51]);

    let mut canvas = RgbImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, Rgb([255, 255, 255]));
    let plot_area = Rect::at(PLOT_MARGIN as i32, PLOT_MARGIN as i32)
        .of_size(PLOT_WIDTH - 2 * PLOT_MARGIN, PLOT_HEIGHT - 2 * PLOT_MARGIN);
    for y in PLOT_MARGIN..PLOT_HEIGHT - PLOT_MARGIN {
        for x in PLOT_MARGIN..PLOT_WIDTH - PLOT_MARGIN {
            canvas.put_pixel(x, y, background);
        }
    }

    for step in 1..5 {
        let v = f64::from(step) * 0.25;
        draw_line_segment_mut(&mut canvas, to_canvas(v, 0.0), to_canvas(v, PRECISION_AXIS_MAX), grid);
        draw_line_segment_mut(&mut canvas, to_canvas(0.0, v), to_canvas(1.0, v), grid);
    }
    draw_hollow_rect_mut(&mut canvas, plot_area, axis);

    // 目盛り (0.25刻み)。x軸が再現率、y軸が適合率
    for step in 0..5 {
        let v = f64::from(step) * 0.25;
        let (x, bottom) = to_canvas(v, 0.0);
        draw_line_segment_mut(&mut canvas, (x, bottom), (x, bottom + TICK_LENGTH), axis);
        let (left, y) = to_canvas(0.0, v);
        draw_line_segment_mut(&mut canvas, (left - TICK_LENGTH, y), (left, y), axis);
    }

    let points: Vec<(f32, f32)> = curve
        .recall
        .iter()
        .zip(&curve.precision)
        .map(|(r, p)| to_canvas(*r, *p))
        .collect();
    for pair in points.windows(2) {
        // 線幅2px
        draw_line_segment_mut(&mut canvas, pair[0], pair[1], line);
        draw_line_segment_mut(
            &mut canvas,
            (pair[0].0, pair[0].1 + 1.0),
            (pair[1].0, pair[1].1 + 1.0),
            line,
        );
    }

    draw_legend(&mut canvas, line, axis);
    canvas
}

/// 凡例の位置 (プロット領域の左下)
fn legend_rect() -> Rect {
    Rect::at(
        (PLOT_MARGIN + LEGEND_INSET) as i32,
        (PLOT_HEIGHT - PLOT_MARGIN - LEGEND_INSET - LEGEND_HEIGHT) as i32,
    )
    .of_size(LEGEND_WIDTH, LEGEND_HEIGHT)
}

/// 曲線の線見本を枠付きで描く
fn draw_legend(canvas: &mut RgbImage, line: Rgb<u8>, border: Rgb<u8>) {
    let rect = legend_rect();
    draw_filled_rect_mut(canvas, rect, Rgb([255, 255, 255]));
    draw_hollow_rect_mut(canvas, rect, border);

    let y = (rect.top() + rect.height() as i32 / 2) as f32;
    let x0 = (rect.left() + 8) as f32;
    let x1 = x0 + 32.0;
    draw_line_segment_mut(canvas, (x0, y), (x1, y), line);
    draw_line_segment_mut(canvas, (x0, y + 1.0), (x1, y + 1.0), line);
}

/// 曲線データ (pickle) とグラフ (png) を出力ディレクトリに保存する
pub fn save_precision_recall(
    curve: &PrecisionRecallCurve,
    out_dir: &Path,
) -> PipelineResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(out_dir)?;

    let pickle_path = out_dir.join(PICKLE_FILE_NAME);
    save_curve_pickle(curve, &pickle_path)?;

    let plot_path = out_dir.join(PLOT_FILE_NAME);
    render_curve(curve).save(&plot_path)?;

    log::info!(
        "適合率-再現率曲線を保存しました: {}, {}",
        pickle_path.display(),
        plot_path.display()
    );
    Ok((pickle_path, plot_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_all_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
        for (a, e) in actual.iter().zip(expected) {
            assert_relative_eq!(*a, *e, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_reference_curve() {
        let curve = precision_recall_curve(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();

        assert_all_close(&curve.precision, &[0.5, 2.0 / 3.0, 0.5, 1.0, 1.0]);
        assert_all_close(&curve.recall, &[1.0, 1.0, 0.5, 0.5, 0.0]);
        assert_all_close(&curve.thresholds, &[0.1, 0.35, 0.4, 0.8]);
    }

    #[test]
    fn test_recall_is_non_increasing() {
        let y_true = [1, 0, 1, 1, 0, 0, 1, 0, 1, 0];
        let scores = [0.9, 0.8, 0.8, 0.3, 0.65, 0.1, 0.5, 0.5, 0.99, 0.0];
        let curve = precision_recall_curve(&y_true, &scores).unwrap();

        assert_eq!(curve.precision.len(), curve.thresholds.len() + 1);
        assert_eq!(curve.recall.len(), curve.thresholds.len() + 1);
        assert!(curve.recall.windows(2).all(|w| w[0] >= w[1]));
        assert!(curve.thresholds.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(curve.thresholds.len(), 8);
    }

    #[test]
    fn test_ties_share_one_threshold() {
        let curve = precision_recall_curve(&[1, 0, 1], &[0.5, 0.5, 0.5]).unwrap();
        assert_all_close(&curve.thresholds, &[0.5]);
        assert_all_close(&curve.precision, &[2.0 / 3.0, 1.0]);
        assert_all_close(&curve.recall, &[1.0, 0.0]);
    }

    #[test]
    fn test_no_positives() {
        let curve = precision_recall_curve(&[0, 0], &[0.2, 0.7]).unwrap();
        assert_all_close(&curve.recall, &[1.0, 1.0, 0.0]);
        assert_all_close(&curve.precision, &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_invalid_input() {
        assert!(precision_recall_curve(&[0, 1], &[0.1]).is_err());
        assert!(precision_recall_curve(&[], &[]).is_err());
        assert!(precision_recall_curve(&[1], &[f32::NAN]).is_err());
    }

    #[test]
    fn test_average_precision() {
        let curve = precision_recall_curve(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        // 0*0.5 + 0.5*(2/3) + 0*0.5 + 0.5*1
        assert_relative_eq!(curve.average_precision(), 0.5 / 1.5 + 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_save_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let curve = precision_recall_curve(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();

        let (pickle_path, plot_path) = save_precision_recall(&curve, dir.path()).unwrap();
        assert_eq!(pickle_path, dir.path().join("precision_recall.pickle"));
        assert_eq!(load_curve_pickle(&pickle_path).unwrap(), curve);

        let plot = image::open(&plot_path).unwrap();
        assert_eq!((plot.width(), plot.height()), (PLOT_WIDTH, PLOT_HEIGHT));
    }

    #[test]
    fn test_pickle_is_a_dict_with_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.pickle");
        let curve = precision_recall_curve(&[1, 0], &[0.9, 0.2]).unwrap();
        save_curve_pickle(&curve, &path).unwrap();

        let value: serde_pickle::Value = serde_pickle::value_from_reader(
            File::open(&path).unwrap(),
            serde_pickle::DeOptions::new(),
        )
        .unwrap();
        let serde_pickle::Value::Dict(map) = value else {
            panic!("expected dict");
        };
        for key in ["precision", "recall", "thresholds"] {
            assert!(map.contains_key(&serde_pickle::HashableValue::String(key.to_string())));
        }
    }

    #[test]
    fn test_canvas_axes() {
        assert_eq!(to_canvas(0.0, 0.0), (48.0, 432.0));
        assert_eq!(to_canvas(1.0, 1.05), (592.0, 48.0));
    }

    #[test]
    fn test_plot_has_ticks_and_legend() {
        let curve = PrecisionRecallCurve {
            precision: vec![1.0, 1.0],
            recall: vec![1.0, 0.0],
            thresholds: vec![0.5],
        };
        let canvas = render_curve(&curve);
        let axis = Rgb([80u8, 80, 80]);
        let line = Rgb([226u8, 74, 51]);

        // recall 0.5 の目盛り (x軸の下)
        assert_eq!(*canvas.get_pixel(320, 435), axis);
        // precision 0 の目盛り (y軸の左)
        assert_eq!(*canvas.get_pixel(45, 432), axis);

        let legend = legend_rect();
        assert_eq!((legend.left(), legend.top()), (60, 392));
        assert_eq!(*canvas.get_pixel(60, 392), axis);
        assert_eq!(*canvas.get_pixel(80, 406), line);
        assert_eq!(*canvas.get_pixel(150, 400), Rgb([255, 255, 255]));
    }
}
