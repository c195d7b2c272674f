//! 镜头特征：平均颜色、景别归一化、时间换算

use image::DynamicImage;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

use crate::collaborators::ShotScaleClassifier;
use crate::color::RgbF;
use crate::metadata::{Shot, ShotScale, ShotSpan};

/// 帧率无效时使用的默认帧率
pub const DEFAULT_FPS: f64 = 24.0;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

static FRAME_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// 从文件名中取第一段数字作为帧标识，没有数字时为 0
pub fn frame_id_from_name(filename: &str) -> u64 {
    FRAME_ID_RE
        .find(filename)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// 列出目录下的图片文件名，按帧标识排序，帧标识相同再按文件名
pub fn list_frame_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut files: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort_by(|a, b| {
        frame_id_from_name(a)
            .cmp(&frame_id_from_name(b))
            .then_with(|| a.cmp(b))
    });
    Ok(files)
}

/// 帧率不大于 0 时按 24 fps 处理
pub fn normalize_fps(fps: f64) -> f64 {
    if fps > 0.0 {
        fps
    } else {
        DEFAULT_FPS
    }
}

/// 图像所有像素各通道的算术平均
pub fn average_rgb_of(img: &DynamicImage) -> RgbF {
    let rgb = img.to_rgb8();
    let total = rgb.width() as u64 * rgb.height() as u64;
    if total == 0 {
        return [0.0; 3];
    }

    let mut sums = [0u64; 3];
    for pixel in rgb.pixels() {
        for c in 0..3 {
            sums[c] += pixel[c] as u64;
        }
    }
    sums.map(|s| s as f64 / total as f64)
}

/// 读取图片并计算平均颜色，解码失败时返回黑色
pub fn average_rgb(path: &Path) -> RgbF {
    match image::open(path) {
        Ok(img) => average_rgb_of(&img),
        Err(e) => {
            warn!("[镜头特征] 图片解码失败，平均颜色按黑色处理: {}: {}", path.display(), e);
            [0.0; 3]
        }
    }
}

/// 把分类器输出的原始景别标签归一化为四类
pub fn classify_scale_label(raw: &str) -> ShotScale {
    let label = raw.to_lowercase();
    if label.contains("long") || label.contains("full") {
        ShotScale::Long
    } else if label.contains("medium") {
        ShotScale::Medium
    } else if label.contains("close") {
        ShotScale::CloseUp
    } else if label.contains("empty") {
        ShotScale::Long
    } else {
        ShotScale::Unknown
    }
}

/// 单镜头特征提取
pub struct ShotFeatureExtractor<'a> {
    fps: f64,
    classifier: Option<&'a dyn ShotScaleClassifier>,
}

impl<'a> ShotFeatureExtractor<'a> {
    pub fn new(fps: f64, classifier: Option<&'a dyn ShotScaleClassifier>) -> Self {
        Self {
            fps: normalize_fps(fps),
            classifier,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// 景别分类；分类器缺失或失败时降级为 Unknown
    fn scale_of(&self, frame_path: &Path) -> (ShotScale, String) {
        let Some(classifier) = self.classifier else {
            return (ShotScale::Unknown, ShotScale::Unknown.as_str().to_string());
        };

        match classifier.classify(frame_path) {
            Ok(raw) => (classify_scale_label(&raw), raw),
            Err(e) => {
                warn!("[镜头特征] 景别分类失败，按 Unknown 处理: {}: {:#}", frame_path.display(), e);
                (ShotScale::Unknown, ShotScale::Unknown.as_str().to_string())
            }
        }
    }

    /// 由检测器输出和代表帧构建镜头
    pub fn build_shot(&self, index: usize, span: ShotSpan, frame_dir: &Path, frame_file: &str) -> Shot {
        let frame_path = frame_dir.join(frame_file);
        let (shot_scale, shot_scale_raw) = self.scale_of(&frame_path);

        Shot {
            shot_id: index + 1,
            start_frame: span.start_frame,
            end_frame: span.end_frame,
            length_frames: span.length_frames,
            start_sec: span.start_frame as f64 / self.fps,
            end_sec: span.end_frame as f64 / self.fps,
            duration_sec: span.length_frames as f64 / self.fps,
            frame_file: frame_file.to_string(),
            frame_id: frame_id_from_name(frame_file),
            avg_rgb: average_rgb(&frame_path),
            shot_scale,
            shot_scale_raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    struct FixedClassifier(&'static str);

    impl ShotScaleClassifier for FixedClassifier {
        fn classify(&self, _image: &Path) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenClassifier;

    impl ShotScaleClassifier for BrokenClassifier {
        fn classify(&self, image: &Path) -> anyhow::Result<String> {
            anyhow::bail!("模型未加载: {}", image.display())
        }
    }

    fn write_frame(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        ImageBuffer::from_pixel(4, 4, Rgb(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_frame_id_from_name() {
        assert_eq!(frame_id_from_name("frame000123.png"), 123);
        assert_eq!(frame_id_from_name("12_shot_99.jpg"), 12);
        assert_eq!(frame_id_from_name("poster.jpg"), 0);
    }

    #[test]
    fn test_scale_label_rules() {
        assert_eq!(classify_scale_label("Extreme Long Shot"), ShotScale::Long);
        assert_eq!(classify_scale_label("full shot"), ShotScale::Long);
        assert_eq!(classify_scale_label("MEDIUM"), ShotScale::Medium);
        assert_eq!(classify_scale_label("medium close-up"), ShotScale::Medium);
        assert_eq!(classify_scale_label("Close-Up"), ShotScale::CloseUp);
        assert_eq!(classify_scale_label("empty"), ShotScale::Long);
        assert_eq!(classify_scale_label("insert"), ShotScale::Unknown);
        assert_eq!(classify_scale_label(""), ShotScale::Unknown);
    }

    #[test]
    fn test_average_rgb_of_mixed_image() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([200, 0, 100])
            } else {
                Rgb([0, 100, 100])
            }
        }));
        assert_eq!(average_rgb_of(&img), [100.0, 50.0, 100.0]);
    }

    #[test]
    fn test_average_rgb_missing_file_is_black() {
        assert_eq!(average_rgb(Path::new("/nonexistent/000001.png")), [0.0; 3]);
    }

    #[test]
    fn test_normalize_fps() {
        assert_eq!(normalize_fps(0.0), DEFAULT_FPS);
        assert_eq!(normalize_fps(-3.0), DEFAULT_FPS);
        assert_eq!(normalize_fps(25.0), 25.0);
    }

    #[test]
    fn test_list_frame_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "000020.png", [1, 2, 3]);
        write_frame(dir.path(), "000003.jpg", [1, 2, 3]);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = list_frame_files(dir.path()).unwrap();
        assert_eq!(files, vec!["000003.jpg".to_string(), "000020.png".to_string()]);
    }

    #[test]
    fn test_list_frame_files_orders_by_frame_id_past_padding() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "1000010.jpg", [1, 2, 3]);
        write_frame(dir.path(), "999990.jpg", [1, 2, 3]);
        write_frame(dir.path(), "000050.jpg", [1, 2, 3]);

        let files = list_frame_files(dir.path()).unwrap();
        assert_eq!(files, vec!["000050.jpg", "999990.jpg", "1000010.jpg"]);
    }

    #[test]
    fn test_build_shot_times_and_scale() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "000048.png", [30, 60, 90]);
        let classifier = FixedClassifier("medium shot");
        let extractor = ShotFeatureExtractor::new(24.0, Some(&classifier));

        let shot = extractor.build_shot(2, ShotSpan::new(24, 72, 48), dir.path(), "000048.png");

        assert_eq!(shot.shot_id, 3);
        assert_eq!(shot.frame_id, 48);
        assert_eq!(shot.start_sec, 1.0);
        assert_eq!(shot.end_sec, 3.0);
        assert_eq!(shot.duration_sec, 2.0);
        assert_eq!(shot.avg_rgb, [30.0, 60.0, 90.0]);
        assert_eq!(shot.shot_scale, ShotScale::Medium);
        assert_eq!(shot.shot_scale_raw, "medium shot");
    }

    #[test]
    fn test_classifier_failure_degrades_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "000001.png", [0, 0, 0]);
        let classifier = BrokenClassifier;
        let extractor = ShotFeatureExtractor::new(0.0, Some(&classifier));

        let shot = extractor.build_shot(0, ShotSpan::new(0, 12, 12), dir.path(), "000001.png");

        assert_eq!(extractor.fps(), DEFAULT_FPS);
        assert_eq!(shot.duration_sec, 0.5);
        assert_eq!(shot.shot_scale, ShotScale::Unknown);
        assert_eq!(shot.shot_scale_raw, "Unknown");
    }
}
