//! 色板提取：对单张图像做 k-means 聚类，并把聚类中心吸附到图像中真实存在的颜色上

use image::{DynamicImage, GenericImageView};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::color::{rgb_distance, to_hex, RgbF};
use crate::error::Result;
use crate::shot_features::list_frame_files;

/// 缩略图最长边
const MAX_SIDE: u32 = 200;
/// k-means 最大迭代次数
const MAX_ITERATIONS: usize = 32;

/// 一张图像的色板（长度恒为请求的 k）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub colors: Vec<[u8; 3]>,
    pub hex: Vec<String>,
}

impl Palette {
    fn from_colors(colors: Vec<[u8; 3]>) -> Self {
        let hex = colors.iter().map(|c| to_hex(*c)).collect();
        Self { colors, hex }
    }

    /// 全黑色板，用于解码失败或没有颜色的图像
    pub fn black(size: usize) -> Self {
        Self::from_colors(vec![[0, 0, 0]; size])
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// 图像中出现过的颜色（按首次出现顺序）及其像素数
#[derive(Debug, Clone, Default)]
pub struct ColorSample {
    counts: IndexMap<[u8; 3], u64>,
}

impl ColorSample {
    /// 统计图像的颜色（逐行扫描）
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let mut counts: IndexMap<[u8; 3], u64> = IndexMap::new();
        for pixel in rgb.pixels() {
            *counts.entry(pixel.0).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn distinct(&self) -> Vec<[u8; 3]> {
        self.counts.keys().copied().collect()
    }

    pub fn distinct_count(&self) -> usize {
        self.counts.len()
    }

    pub fn pixel_count(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// 色板中某个颜色覆盖的像素占比
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteShare {
    pub hex: String,
    pub pixels: u64,
    pub percent: f64,
}

/// 某一帧的色板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePalette {
    pub frame_file: String,
    pub palette: Palette,
}

/// 色板提取器
#[derive(Debug, Clone, Copy)]
pub struct PaletteExtractor {
    size: usize,
}

impl PaletteExtractor {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 统一方向并缩小，限制参与聚类的颜色数量
    pub fn prepare(img: &DynamicImage) -> DynamicImage {
        let rotated = img.rotate90();
        let (w, h) = rotated.dimensions();
        if w.max(h) > MAX_SIDE {
            rotated.thumbnail(MAX_SIDE, MAX_SIDE)
        } else {
            rotated
        }
    }

    /// 读取图片并统计颜色；解码失败时返回 `None`
    pub fn load_sample(path: &Path) -> Option<ColorSample> {
        match image::open(path) {
            Ok(img) => Some(ColorSample::from_image(&Self::prepare(&img))),
            Err(e) => {
                warn!("[色板] 图片解码失败，使用黑色色板: {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 从已经解码的图像提取色板
    pub fn extract_from_image(&self, img: &DynamicImage) -> Palette {
        let sample = ColorSample::from_image(&Self::prepare(img));
        self.extract_from_sample(&sample)
    }

    /// 从图片文件提取色板
    pub fn extract_from_path(&self, path: &Path) -> Palette {
        match Self::load_sample(path) {
            Some(sample) => self.extract_from_sample(&sample),
            None => Palette::black(self.size),
        }
    }

    pub fn extract_from_sample(&self, sample: &ColorSample) -> Palette {
        let colors = sample.distinct();
        if colors.is_empty() {
            return Palette::black(self.size);
        }

        let cluster_count = self.size.min(colors.len());
        let points: Vec<RgbF> = colors.iter().map(|c| to_f64(*c)).collect();
        let centers = kmeans(&points, cluster_count);

        let snapped: Vec<[u8; 3]> = centers
            .iter()
            .map(|center| snap_to_real_color(&center.map(f64::trunc), &colors))
            .collect();

        Palette::from_colors(normalize_count(snapped, self.size))
    }

    /// 把每个像素量化到最近的色板颜色，统计各颜色覆盖的像素
    pub fn composition(&self, sample: &ColorSample, palette: &Palette) -> Vec<PaletteShare> {
        let mut pixels = vec![0u64; palette.len()];
        let centers: Vec<RgbF> = palette.colors.iter().map(|c| to_f64(*c)).collect();

        for (color, count) in &sample.counts {
            if let Some(idx) = nearest_index(&to_f64(*color), &centers) {
                pixels[idx] += count;
            }
        }

        let total = sample.pixel_count().max(1) as f64;
        palette
            .hex
            .iter()
            .zip(pixels)
            .map(|(hex, pixels)| PaletteShare {
                hex: hex.clone(),
                pixels,
                percent: pixels as f64 * 100.0 / total,
            })
            .collect()
    }

    /// 对目录下所有帧并行提取色板，输出顺序与文件名排序一致
    pub fn extract_frames(&self, frame_dir: &Path) -> Result<Vec<FramePalette>> {
        let files = list_frame_files(frame_dir)?;
        debug!("[色板] 开始提取 {} 帧的色板", files.len());

        let palettes = files
            .into_par_iter()
            .map(|frame_file| {
                let palette = self.extract_from_path(&frame_dir.join(&frame_file));
                FramePalette {
                    frame_file,
                    palette,
                }
            })
            .collect();

        Ok(palettes)
    }
}

fn to_f64(c: [u8; 3]) -> RgbF {
    [c[0] as f64, c[1] as f64, c[2] as f64]
}

fn nearest_index(point: &RgbF, centers: &[RgbF]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, center) in centers.iter().enumerate() {
        let d = rgb_distance(point, center);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((idx, d));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Lloyd 迭代的 k-means。初始中心从颜色列表中等距选取，空簇会被丢弃，
/// 因此返回的中心数可能少于 `k`。
fn kmeans(points: &[RgbF], k: usize) -> Vec<RgbF> {
    if points.is_empty() || k == 0 {
        return Vec::new();
    }

    let k = k.min(points.len());
    let mut centers: Vec<RgbF> = (0..k).map(|i| points[i * points.len() / k]).collect();
    let mut assignment: Vec<usize> = vec![usize::MAX; points.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (point, slot) in points.iter().zip(assignment.iter_mut()) {
            let idx = nearest_index(point, &centers).unwrap_or(0);
            if *slot != idx {
                *slot = idx;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        let mut sums = vec![[0.0f64; 3]; centers.len()];
        let mut members = vec![0usize; centers.len()];
        for (point, &idx) in points.iter().zip(assignment.iter()) {
            for c in 0..3 {
                sums[idx][c] += point[c];
            }
            members[idx] += 1;
        }

        let mut remap = vec![usize::MAX; centers.len()];
        let mut next = Vec::with_capacity(centers.len());
        for (idx, (sum, count)) in sums.iter().zip(members.iter()).enumerate() {
            if *count > 0 {
                remap[idx] = next.len();
                next.push(sum.map(|s| s / *count as f64));
            }
        }
        for slot in assignment.iter_mut() {
            *slot = remap[*slot];
        }
        centers = next;
    }

    centers
}

/// 把聚类中心吸附到最近的真实颜色
///
/// 初始上界为中心到原点的距离；没有颜色优于上界时退化为全量最近搜索。
fn snap_to_real_color(center: &RgbF, colors: &[[u8; 3]]) -> [u8; 3] {
    let mut bound = rgb_distance(center, &[0.0, 0.0, 0.0]);
    let mut picked: Option<[u8; 3]> = None;

    for color in colors {
        let d = rgb_distance(&to_f64(*color), center);
        if d < bound {
            bound = d;
            picked = Some(*color);
        }
    }

    picked.unwrap_or_else(|| {
        let candidates: Vec<RgbF> = colors.iter().map(|c| to_f64(*c)).collect();
        nearest_index(center, &candidates)
            .map(|idx| colors[idx])
            .unwrap_or([0, 0, 0])
    })
}

/// 补齐或截断到 `size` 个颜色；不足时重复第一个颜色
fn normalize_count(mut colors: Vec<[u8; 3]>, size: usize) -> Vec<[u8; 3]> {
    if colors.is_empty() {
        return vec![[0, 0, 0]; size];
    }
    let first = colors[0];
    colors.resize(size, first);
    colors
}
