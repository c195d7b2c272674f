use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregator::{PropSignals, SceneAggregator};
use crate::collaborators::Collaborators;
use crate::color::round_to;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::metadata::{
    AnalysisResult, GlobalMetrics, OutputPaths, Shot, ShotScale, VideoInfo, VideoMeta,
};
use crate::palette::PaletteExtractor;
use crate::report;
use crate::scene_detector::{mean, SceneDetector};
use crate::shot_features::{
    average_rgb, frame_id_from_name, list_frame_files, ShotFeatureExtractor,
};

static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_]+").expect("valid regex"));

/// 由原始文件名生成目录名：去掉扩展名，非字母数字替换为 `_`
pub fn slugify(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let slug = UNSAFE_CHARS_RE.replace_all(&stem, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "video".to_string()
    } else {
        slug.to_string()
    }
}

/// 一次分析请求
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// 待分析的视频文件（通常是上传后的临时文件）
    pub video_path: PathBuf,
    /// 用户上传时的原始文件名
    pub original_filename: String,
    pub scene_sensitivity: i64,
    pub shot_threshold: f64,
    pub include_object_detection: bool,
    pub include_shot_scale: bool,
}

impl AnalysisRequest {
    /// 使用配置中的默认参数构造请求
    pub fn new(video_path: impl Into<PathBuf>, original_filename: impl Into<String>, config: &AnalysisConfig) -> Self {
        Self {
            video_path: video_path.into(),
            original_filename: original_filename.into(),
            scene_sensitivity: config.scene_sensitivity as i64,
            shot_threshold: config.shot_threshold,
            include_object_detection: config.include_object_detection,
            include_shot_scale: config.include_shot_scale,
        }
    }

    fn clamped_sensitivity(&self) -> u8 {
        self.scene_sensitivity.clamp(1, 10) as u8
    }

    fn clamped_threshold(&self) -> f64 {
        if self.shot_threshold.is_nan() {
            return AnalysisConfig::default().shot_threshold;
        }
        self.shot_threshold.clamp(0.05, 0.95)
    }
}

/// 镜头检测没有输出时，用整段视频构造一个镜头
fn synthetic_shot(info: &VideoInfo, frame_dir: &Path, frame_file: &str) -> Shot {
    Shot {
        shot_id: 1,
        start_frame: 0,
        end_frame: info.frame_count,
        length_frames: info.frame_count,
        start_sec: 0.0,
        end_sec: info.duration_sec,
        duration_sec: info.duration_sec,
        frame_file: frame_file.to_string(),
        frame_id: frame_id_from_name(frame_file),
        avg_rgb: average_rgb(&frame_dir.join(frame_file)),
        shot_scale: ShotScale::Unknown,
        shot_scale_raw: ShotScale::Unknown.as_str().to_string(),
    }
}

/// 运行物体检测并读取结果表；任何失败都降级为空表
fn detect_objects(collaborators: &Collaborators, image_base: &Path) -> HashMap<u64, String> {
    let Some(detector) = collaborators.objects.as_deref() else {
        debug!("[视频分析] 未配置物体检测，使用规则推断道具");
        return HashMap::new();
    };

    if let Err(e) = detector.detect(image_base) {
        warn!("[视频分析] 物体检测失败，使用规则推断道具: {:#}", e);
        return HashMap::new();
    }

    let objects_csv = image_base.join(report::OBJECTS_CSV);
    if !objects_csv.exists() {
        warn!("[视频分析] 物体检测没有生成 {}", objects_csv.display());
        return HashMap::new();
    }

    match report::read_object_labels(&objects_csv) {
        Ok(labels) => labels,
        Err(e) => {
            warn!("[视频分析] 读取物体检测结果失败: {}", e);
            HashMap::new()
        }
    }
}

fn global_metrics(shots: &[Shot], scene_durations: &[f64]) -> GlobalMetrics {
    let shot_durations: Vec<f64> = shots.iter().map(|s| s.duration_sec).collect();
    let scene_count = scene_durations.len();
    GlobalMetrics {
        shot_count: shots.len(),
        scene_count,
        average_shot_length_sec: mean(&shot_durations),
        average_scene_length_sec: mean(scene_durations),
        average_shots_per_scene: if scene_count > 0 {
            shots.len() as f64 / scene_count as f64
        } else {
            0.0
        },
    }
}

/// 分析一个视频：镜头切分 → 镜头特征 → 场景切分 → 场景统计 → 全局统计
///
/// 整个流程是阻塞的，在异步环境中应放到 `spawn_blocking` 中执行。
pub fn analyze_video(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
    collaborators: &Collaborators,
) -> Result<AnalysisResult> {
    let total_start = Instant::now();
    let sensitivity = request.clamped_sensitivity();
    let shot_threshold = request.clamped_threshold();
    let slug = slugify(&request.original_filename);

    info!("[视频分析] 开始分析: {} ({})", request.original_filename, request.video_path.display());
    info!(
        "  • 场景灵敏度: {}，镜头阈值: {:.2}，物体检测: {}，景别分类: {}",
        sensitivity, shot_threshold, request.include_object_detection, request.include_shot_scale
    );

    let image_base = config.output_root.join(&slug);
    std::fs::create_dir_all(&image_base)?;
    // 同名视频再次分析时，上一次的代表帧会混入本次的帧列表
    let frame_dir = image_base.join("frame");
    if frame_dir.exists() {
        debug!("[视频分析] 清理上一次的代表帧: {}", frame_dir.display());
        std::fs::remove_dir_all(&frame_dir)?;
    }

    // 1. 读取视频信息
    let info = collaborators
        .metadata
        .read(&request.video_path)
        .map_err(|e| {
            error!("[视频分析] 读取视频信息失败: {:#}", e);
            AnalysisError::collaborator("读取视频信息", e)
        })?;
    info!(
        "  • 分辨率: {}x{}，帧率: {:.2} fps，帧数: {}，时长: {:.2}秒",
        info.width, info.height, info.fps, info.frame_count, info.duration_sec
    );

    // 2. 镜头切分
    let detect_start = Instant::now();
    let spans = collaborators
        .shots
        .detect(&request.video_path, &image_base, shot_threshold)
        .map_err(|e| {
            error!("[视频分析] 镜头检测失败: {:#}", e);
            AnalysisError::collaborator("镜头检测", e)
        })?;
    info!(
        "[视频分析] 镜头检测完成，{} 个镜头，耗时: {:.2}秒",
        spans.len(),
        detect_start.elapsed().as_secs_f64()
    );

    if !frame_dir.is_dir() {
        error!("[视频分析] 帧目录不存在: {}", frame_dir.display());
        return Err(AnalysisError::frame_dir_missing(frame_dir));
    }
    let frame_files = list_frame_files(&frame_dir)?;
    let Some(first_frame) = frame_files.first() else {
        error!("[视频分析] 没有生成任何镜头代表帧");
        return Err(AnalysisError::NoShotFrames);
    };

    // 3. 镜头特征
    let feature_start = Instant::now();
    let classifier = if request.include_shot_scale {
        collaborators.scale.as_deref()
    } else {
        None
    };
    let extractor = ShotFeatureExtractor::new(info.fps, classifier);
    let last_frame = frame_files.len() - 1;
    let mut shots: Vec<Shot> = spans
        .iter()
        .enumerate()
        .map(|(i, span)| extractor.build_shot(i, *span, &frame_dir, &frame_files[i.min(last_frame)]))
        .collect();

    if shots.is_empty() {
        warn!("[视频分析] 镜头检测没有输出，按整段视频处理");
        shots.push(synthetic_shot(&info, &frame_dir, first_frame));
    }
    info!(
        "[视频分析] 镜头特征提取完成，耗时: {:.2}秒",
        feature_start.elapsed().as_secs_f64()
    );

    // 4. 场景切分
    let scene_spans = SceneDetector::new(sensitivity).detect_scenes(&shots);
    info!("[视频分析] 场景切分完成，{} 个场景", scene_spans.len());

    // 5. 物体检测与场景统计
    let labels = if request.include_object_detection {
        let object_start = Instant::now();
        let labels = detect_objects(collaborators, &image_base);
        info!(
            "[视频分析] 物体检测完成，{} 帧有标签，耗时: {:.2}秒",
            labels.len(),
            object_start.elapsed().as_secs_f64()
        );
        labels
    } else {
        HashMap::new()
    };

    let aggregator = SceneAggregator::new(&labels, PropSignals::default());
    let scenes: Vec<_> = scene_spans
        .iter()
        .map(|span| aggregator.aggregate(span, &shots))
        .collect();
    let scene_durations: Vec<f64> = scenes.iter().map(|s| s.duration_sec).collect();
    let global = global_metrics(&shots, &scene_durations);

    // 6. 产出文件
    let (shotlen_csv, shotlen_png) = report::write_shot_lengths(&image_base, &shots)?;

    let (colors_csv, colors_png) = if config.include_palette {
        let palette_start = Instant::now();
        let extractor = PaletteExtractor::new(config.palette_size);
        let palettes = extractor.extract_frames(&frame_dir)?;
        let (csv, png) = report::write_colors(&image_base, &palettes, extractor.size())?;
        info!(
            "[视频分析] 色板分析完成，{} 帧，耗时: {:.2}秒",
            palettes.len(),
            palette_start.elapsed().as_secs_f64()
        );
        (Some(csv), Some(png))
    } else {
        (None, None)
    };

    let result = AnalysisResult {
        meta: VideoMeta {
            id: slug,
            filename: request.original_filename.clone(),
            duration_sec: info.duration_sec,
            width: info.width,
            height: info.height,
            frame_count_estimated: info.frame_count,
            fps_estimated: round_to(info.fps, 3),
        },
        global,
        shots,
        scenes,
        outputs: OutputPaths {
            objects_csv: image_base.join(report::OBJECTS_CSV),
            frame_dir,
            shotlen_csv,
            shotlen_png,
            colors_csv,
            colors_png,
            image_base,
        },
    };

    info!(
        "[视频分析] 分析完成: {} 个镜头，{} 个场景，总耗时: {:.2}秒",
        result.global.shot_count,
        result.global.scene_count,
        total_start.elapsed().as_secs_f64()
    );

    Ok(result)
}
