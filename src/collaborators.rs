//! 外部协作组件接口：元数据读取、镜头切分、物体检测、景别分类
//!
//! 分析流程只依赖这里的 trait。默认实现：
//! - 元数据读取与镜头切分基于 FFmpeg 解码（见 `video_processor` 和 `shot_detector`）
//! - 物体检测与景别分类调用配置中的外部程序（通常是模型推理脚本）

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::metadata::{ShotSpan, VideoInfo};
use crate::shot_detector::FrameDiffShotDetector;
use crate::video_processor::FfmpegMetadataReader;

/// 读取视频基础信息
pub trait MetadataReader: Send + Sync {
    fn read(&self, video: &Path) -> Result<VideoInfo>;
}

/// 镜头边界检测
///
/// 返回按时间排序的镜头区间，并在 `out_dir/frame/` 下为每个镜头写入一张代表帧。
pub trait ShotBoundaryDetector: Send + Sync {
    fn detect(&self, video: &Path, out_dir: &Path, threshold: f64) -> Result<Vec<ShotSpan>>;
}

/// 物体/道具检测
///
/// 读取 `image_base/frame/` 下的代表帧，在 `image_base/objects.csv` 写入
/// `FrameId,Top1-Objects` 表。
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image_base: &Path) -> Result<()>;
}

/// 景别分类，返回原始标签（例如 "extreme long shot"）
pub trait ShotScaleClassifier: Send + Sync {
    fn classify(&self, image: &Path) -> Result<String>;
}

/// 一次分析用到的全部协作组件
pub struct Collaborators {
    pub metadata: Box<dyn MetadataReader>,
    pub shots: Box<dyn ShotBoundaryDetector>,
    pub objects: Option<Box<dyn ObjectDetector>>,
    pub scale: Option<Box<dyn ShotScaleClassifier>>,
}

impl Collaborators {
    /// 按配置组装默认实现；未配置外部程序的可选组件视为关闭
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            metadata: Box::new(FfmpegMetadataReader),
            shots: Box::new(FrameDiffShotDetector::new(config.sample_rate)),
            objects: config
                .object_detector_cmd
                .as_deref()
                .and_then(CommandObjectDetector::parse)
                .map(|d| Box::new(d) as Box<dyn ObjectDetector>),
            scale: config
                .shot_scale_cmd
                .as_deref()
                .and_then(CommandScaleClassifier::parse)
                .map(|c| Box::new(c) as Box<dyn ShotScaleClassifier>),
        }
    }
}

/// 外部程序及其固定参数
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    /// 按空白切分命令行，空串返回 `None`
    fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    fn run(&self, target: &Path) -> Result<String> {
        debug!("[外部程序] {} {:?} {}", self.program, self.args, target.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(target)
            .output()
            .with_context(|| format!("执行外部程序失败: {}", self.program))?;

        if !output.status.success() {
            anyhow::bail!(
                "外部程序 {} 退出码 {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// 调用外部程序完成物体检测
#[derive(Debug, Clone)]
pub struct CommandObjectDetector {
    command: ExternalCommand,
}

impl CommandObjectDetector {
    pub fn parse(command_line: &str) -> Option<Self> {
        ExternalCommand::parse(command_line).map(|command| Self { command })
    }
}

impl ObjectDetector for CommandObjectDetector {
    fn detect(&self, image_base: &Path) -> Result<()> {
        self.command.run(image_base).map(|_| ())
    }
}

/// 调用外部程序完成景别分类，标准输出即原始标签
#[derive(Debug, Clone)]
pub struct CommandScaleClassifier {
    command: ExternalCommand,
}

impl CommandScaleClassifier {
    pub fn parse(command_line: &str) -> Option<Self> {
        ExternalCommand::parse(command_line).map(|command| Self { command })
    }
}

impl ShotScaleClassifier for CommandScaleClassifier {
    fn classify(&self, image: &Path) -> Result<String> {
        let label = self.command.run(image)?;
        if label.is_empty() {
            anyhow::bail!("景别分类程序没有输出标签");
        }
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let cmd = ExternalCommand::parse("  python3 detect.py --top 1 ").unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["detect.py", "--top", "1"]);
        assert!(ExternalCommand::parse("   ").is_none());
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let classifier = CommandScaleClassifier::parse("cine-metrics-no-such-program").unwrap();
        assert!(classifier.classify(Path::new("frame.png")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_classifier_reads_stdout() {
        let classifier = CommandScaleClassifier::parse("echo medium").unwrap();
        let label = classifier.classify(Path::new("000001.png")).unwrap();
        assert_eq!(label, "medium 000001.png");
    }

    #[test]
    fn test_from_config_without_commands() {
        let config = AnalysisConfig::default();
        let collaborators = Collaborators::from_config(&config);
        assert!(collaborators.objects.is_none());
        assert!(collaborators.scale.is_none());
    }
}
