use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::color::RgbF;

/// 归一化后的景别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShotScale {
    Long,
    Medium,
    #[serde(rename = "Close-Up")]
    CloseUp,
    Unknown,
}

impl ShotScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShotScale::Long => "Long",
            ShotScale::Medium => "Medium",
            ShotScale::CloseUp => "Close-Up",
            ShotScale::Unknown => "Unknown",
        }
    }
}

/// 镜头检测器输出的一条记录：(起始帧, 结束帧, 帧数)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotSpan {
    pub start_frame: u64,
    pub end_frame: u64,
    pub length_frames: u64,
}

impl ShotSpan {
    pub fn new(start_frame: u64, end_frame: u64, length_frames: u64) -> Self {
        Self {
            start_frame,
            end_frame,
            length_frames,
        }
    }
}

/// 元数据读取器的输出
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub duration_sec: f64,
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

/// 单个镜头
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shot {
    /// 镜头编号（从 1 开始）
    pub shot_id: usize,
    pub start_frame: u64,
    pub end_frame: u64,
    pub length_frames: u64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub duration_sec: f64,
    /// 代表帧文件名
    pub frame_file: String,
    /// 从代表帧文件名解析出的帧标识
    pub frame_id: u64,
    pub avg_rgb: RgbF,
    pub shot_scale: ShotScale,
    pub shot_scale_raw: String,
}

/// 景别构成（各自独立取整，不保证和为 100）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleComposition {
    pub long_pct: u32,
    pub medium_pct: u32,
    pub close_pct: u32,
}

/// 场景内的道具/内容标签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prop {
    pub label: String,
    pub score: f64,
    pub count: usize,
}

/// 场景切分结果（镜头下标区间，闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSpan {
    /// 场景编号（从 1 开始）
    pub scene_id: usize,
    pub shot_start_index: usize,
    pub shot_end_index: usize,
    pub start_sec: f64,
    pub end_sec: f64,
}

impl SceneSpan {
    pub fn shot_count(&self) -> usize {
        self.shot_end_index + 1 - self.shot_start_index
    }
}

/// 单个场景的统计信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub scene_id: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub start_tc: String,
    pub end_tc: String,
    pub duration_sec: f64,
    pub shot_count: usize,
    pub average_shot_length_sec: f64,
    pub shot_scale_composition: ScaleComposition,
    pub dominant_rgb: RgbF,
    pub dominant_hue: f64,
    pub props: Vec<Prop>,
    pub shots: Vec<Shot>,
    pub motion_proxy: f64,
    pub focus_proxy: f64,
}

/// 结果中的视频信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMeta {
    /// 由原始文件名生成的安全标识
    pub id: String,
    pub filename: String,
    pub duration_sec: f64,
    pub width: u32,
    pub height: u32,
    pub frame_count_estimated: u64,
    pub fps_estimated: f64,
}

/// 全局统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    pub shot_count: usize,
    pub scene_count: usize,
    pub average_shot_length_sec: f64,
    pub average_scene_length_sec: f64,
    pub average_shots_per_scene: f64,
}

/// 产出文件路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPaths {
    pub image_base: PathBuf,
    pub frame_dir: PathBuf,
    pub shotlen_csv: PathBuf,
    pub shotlen_png: PathBuf,
    pub objects_csv: PathBuf,
    pub colors_csv: Option<PathBuf>,
    pub colors_png: Option<PathBuf>,
}

/// 一次分析请求的完整结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub meta: VideoMeta,
    pub global: GlobalMetrics,
    pub shots: Vec<Shot>,
    pub scenes: Vec<Scene>,
    pub outputs: OutputPaths,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shot_serializes_camel_case() {
        let shot = Shot {
            shot_id: 1,
            start_frame: 0,
            end_frame: 24,
            length_frames: 24,
            start_sec: 0.0,
            end_sec: 1.0,
            duration_sec: 1.0,
            frame_file: "000012.jpg".to_string(),
            frame_id: 12,
            avg_rgb: [1.0, 2.0, 3.0],
            shot_scale: ShotScale::CloseUp,
            shot_scale_raw: "close-up".to_string(),
        };

        let json = serde_json::to_value(&shot).unwrap();
        assert_eq!(json["shotScale"], "Close-Up");
        assert_eq!(json["frameId"], 12);
        assert_eq!(json["avgRgb"][2], 3.0);
        assert!(json.get("shot_id").is_none());
    }

    #[test]
    fn test_scene_span_shot_count() {
        let span = SceneSpan {
            scene_id: 1,
            shot_start_index: 8,
            shot_end_index: 15,
            start_sec: 0.0,
            end_sec: 1.0,
        };
        assert_eq!(span.shot_count(), 8);
    }
}
