use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::collaborators::ShotBoundaryDetector;
use crate::metadata::ShotSpan;
use crate::video_processor::VideoProcessor;

/// 帧差分析用的灰度缩略图边长
const ANALYSIS_SIDE: u32 = 64;

/// 基于帧差的镜头切分
///
/// 按采样率解码视频，相邻采样帧的差异度超过阈值即视为切点。
/// 第二遍解码时把每个镜头中间的采样帧写入 `frame/` 目录。
pub struct FrameDiffShotDetector {
    /// 每秒采样帧数
    sample_rate: f64,
}

impl FrameDiffShotDetector {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }

    /// 缩小并转为灰度，降低帧差计算量
    fn analysis_gray(img: &DynamicImage) -> GrayImage {
        img.resize_exact(ANALYSIS_SIDE, ANALYSIS_SIDE, FilterType::Triangle)
            .to_luma8()
    }

    /// 两帧之间的差异度（0.0-1.0），直方图差异与像素差异加权
    pub fn frame_difference(a: &GrayImage, b: &GrayImage) -> f64 {
        histogram_difference(a, b) * 0.6 + pixel_difference(a, b) * 0.4
    }

    /// 第一遍：找出切点，返回 (切点帧序号, 全部采样帧序号, 总帧数)
    fn find_cuts(&self, processor: &VideoProcessor, threshold: f64) -> Result<(Vec<u64>, Vec<u64>, u64)> {
        let mut cuts = Vec::new();
        let mut sampled = Vec::new();
        let mut prev: Option<GrayImage> = None;

        let total = processor.for_each_sample(self.sample_rate, |frame| {
            let gray = Self::analysis_gray(&frame.image);
            if let Some(prev) = &prev {
                let diff = Self::frame_difference(prev, &gray);
                if diff > threshold {
                    debug!("[镜头检测] 帧 {} 差异度 {:.3}，判定为切点", frame.index, diff);
                    cuts.push(frame.index);
                }
            }
            prev = Some(gray);
            sampled.push(frame.index);
            Ok(())
        })?;

        Ok((cuts, sampled, total))
    }
}

/// 由切点生成镜头区间，结束帧为下一个镜头的起始帧
pub fn spans_from_cuts(cuts: &[u64], total_frames: u64) -> Vec<ShotSpan> {
    if total_frames == 0 {
        return Vec::new();
    }

    let mut starts = vec![0u64];
    starts.extend(cuts.iter().copied().filter(|&c| c > 0 && c < total_frames));
    starts.dedup();

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(total_frames);
            ShotSpan::new(start, end, end - start)
        })
        .collect()
}

/// 每个镜头选取位于中间的采样帧
pub fn representative_indices(spans: &[ShotSpan], sampled: &[u64]) -> Vec<u64> {
    spans
        .iter()
        .map(|span| {
            let inside: Vec<u64> = sampled
                .iter()
                .copied()
                .filter(|&idx| idx >= span.start_frame && idx < span.end_frame)
                .collect();
            inside.get(inside.len() / 2).copied().unwrap_or(span.start_frame)
        })
        .collect()
}

fn histogram_difference(a: &GrayImage, b: &GrayImage) -> f64 {
    let mut hist1 = [0u32; 256];
    let mut hist2 = [0u32; 256];
    for pixel in a.pixels() {
        hist1[pixel[0] as usize] += 1;
    }
    for pixel in b.pixels() {
        hist2[pixel[0] as usize] += 1;
    }

    let total1 = (a.width() * a.height()).max(1) as f64;
    let total2 = (b.width() * b.height()).max(1) as f64;
    let diff: f64 = hist1
        .iter()
        .zip(hist2.iter())
        .map(|(&h1, &h2)| (h1 as f64 / total1 - h2 as f64 / total2).abs())
        .sum();

    diff / 2.0
}

fn pixel_difference(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 1.0;
    }
    let total = (a.width() * a.height()).max(1) as f64;
    let diff_sum: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(p1, p2)| (p1[0] as i32 - p2[0] as i32).unsigned_abs() as u64)
        .sum();

    diff_sum as f64 / (total * 255.0)
}

impl ShotBoundaryDetector for FrameDiffShotDetector {
    fn detect(&self, video: &Path, out_dir: &Path, threshold: f64) -> Result<Vec<ShotSpan>> {
        let start = Instant::now();
        let frame_dir = out_dir.join("frame");
        std::fs::create_dir_all(&frame_dir)
            .with_context(|| format!("创建帧目录失败: {}", frame_dir.display()))?;

        let processor = VideoProcessor::new(video)?;
        let (cuts, sampled, total) = self.find_cuts(&processor, threshold)?;
        let spans = spans_from_cuts(&cuts, total);
        info!(
            "[镜头检测] 采样 {} 帧，检测到 {} 个镜头，耗时 {:.2}秒",
            sampled.len(),
            spans.len(),
            start.elapsed().as_secs_f64()
        );

        let wanted: HashSet<u64> = representative_indices(&spans, &sampled).into_iter().collect();
        processor.for_each_sample(self.sample_rate, |frame| {
            if wanted.contains(&frame.index) {
                let path = frame_dir.join(format!("{:08}.jpg", frame.index));
                frame.image.save(&path)
                    .with_context(|| format!("保存代表帧失败: {}", path.display()))?;
            }
            Ok(())
        })?;

        Ok(spans)
    }
}
