use tracing::debug;

use crate::color::rgb_distance;
use crate::metadata::{SceneSpan, Shot};

/// 节奏项权重：相邻镜头时长差（秒）的放大系数
const RHYTHM_WEIGHT: f64 = 7.0;
/// 普通切分要求的最少镜头数
const MIN_SHOTS_PER_SCENE: usize = 2;
/// 单个场景的镜头数上限，达到后强制切分
const MAX_SHOTS_PER_SCENE: usize = 8;
/// 阈值倍数的下限
const MIN_MULTIPLIER: f64 = 0.45;

/// 场景检测器，把有序的镜头序列切分为连续的场景
pub struct SceneDetector {
    /// 灵敏度（1-10），越大切分出的场景越多
    sensitivity: u8,
}

impl SceneDetector {
    pub fn new(sensitivity: u8) -> Self {
        Self {
            sensitivity: sensitivity.clamp(1, 10),
        }
    }

    /// 相邻镜头的差异度：平均颜色距离 + 时长差 × 7
    ///
    /// 第 i 个元素对应镜头 i 与镜头 i+1 之间的差异。
    pub fn cue_scores(shots: &[Shot]) -> Vec<f64> {
        shots
            .windows(2)
            .map(|pair| {
                let (prev, cur) = (&pair[0], &pair[1]);
                let drift = rgb_distance(&prev.avg_rgb, &cur.avg_rgb);
                let rhythm = (prev.duration_sec - cur.duration_sec).abs() * RHYTHM_WEIGHT;
                drift + rhythm
            })
            .collect()
    }

    /// 自适应阈值：均值 + 标准差 × max(0.45, 1.35 - 0.08 × 灵敏度)
    pub fn threshold(&self, cues: &[f64]) -> f64 {
        let multiplier = (1.35 - 0.08 * self.sensitivity as f64).max(MIN_MULTIPLIER);
        mean(cues) + population_std(cues) * multiplier
    }

    /// 检测场景边界
    pub fn detect_scenes(&self, shots: &[Shot]) -> Vec<SceneSpan> {
        if shots.is_empty() {
            return Vec::new();
        }

        let cues = Self::cue_scores(shots);
        let threshold = self.threshold(&cues);

        let mut boundaries = vec![0usize];
        for i in 1..shots.len() {
            let last = *boundaries.last().unwrap_or(&0);
            let shots_since = i - last;
            let cue = cues[i - 1];
            if (cue >= threshold && shots_since >= MIN_SHOTS_PER_SCENE)
                || shots_since >= MAX_SHOTS_PER_SCENE
            {
                boundaries.push(i);
            }
        }
        boundaries.push(shots.len());

        debug!(
            "[场景检测] 灵敏度 {}，阈值 {:.3}，{} 个镜头切分为 {} 个场景",
            self.sensitivity,
            threshold,
            shots.len(),
            boundaries.len() - 1
        );

        boundaries
            .windows(2)
            .enumerate()
            .map(|(idx, pair)| {
                let (start, end) = (pair[0], pair[1] - 1);
                SceneSpan {
                    scene_id: idx + 1,
                    shot_start_index: start,
                    shot_end_index: end,
                    start_sec: shots[start].start_sec,
                    end_sec: shots[end].end_sec,
                }
            })
            .collect()
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// 总体标准差，少于两个值时为 0
fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ShotScale;

    fn shot(index: usize, red: f64, duration: f64) -> Shot {
        let start = index as f64 * duration;
        Shot {
            shot_id: index + 1,
            start_frame: (start * 24.0) as u64,
            end_frame: ((start + duration) * 24.0) as u64,
            length_frames: (duration * 24.0) as u64,
            start_sec: start,
            end_sec: start + duration,
            duration_sec: duration,
            frame_file: format!("{:06}.jpg", index),
            frame_id: index as u64,
            avg_rgb: [red, 40.0, 40.0],
            shot_scale: ShotScale::Unknown,
            shot_scale_raw: "Unknown".to_string(),
        }
    }

    fn assert_partition(scenes: &[SceneSpan], shot_count: usize) {
        assert_eq!(scenes[0].shot_start_index, 0);
        assert_eq!(scenes.last().unwrap().shot_end_index, shot_count - 1);
        for pair in scenes.windows(2) {
            assert_eq!(pair[0].shot_end_index + 1, pair[1].shot_start_index);
        }
        for (idx, scene) in scenes.iter().enumerate() {
            assert_eq!(scene.scene_id, idx + 1);
            assert!(scene.shot_start_index <= scene.shot_end_index);
        }
        assert!(scenes.len() <= shot_count);
    }

    /// 相邻差异依次为 10, 45, 60, 10, 45, 60, ...
    fn varied_shots() -> Vec<Shot> {
        let reds = [0.0, 10.0, 55.0, 115.0, 105.0, 60.0, 0.0, 10.0, 55.0, 115.0, 105.0, 60.0];
        reds.iter().enumerate().map(|(i, r)| shot(i, *r, 2.0)).collect()
    }

    #[test]
    fn test_empty_input_has_no_scenes() {
        assert!(SceneDetector::new(6).detect_scenes(&[]).is_empty());
    }

    #[test]
    fn test_single_shot_single_scene() {
        let shots = vec![shot(0, 10.0, 3.0)];
        let scenes = SceneDetector::new(6).detect_scenes(&shots);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].start_sec, 0.0);
        assert_eq!(scenes[0].end_sec, 3.0);
    }

    #[test]
    fn test_cue_score_includes_rhythm() {
        let shots = vec![shot(0, 10.0, 1.0), shot(1, 15.0, 2.0)];
        let cues = SceneDetector::cue_scores(&shots);
        assert_eq!(cues.len(), 1);
        assert!((cues[0] - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_multiplier_floor() {
        let cues = [0.0, 10.0];
        // 均值 5，标准差 5
        assert!((SceneDetector::new(1).threshold(&cues) - (5.0 + 5.0 * 1.27)).abs() < 1e-9);
        assert!((SceneDetector::new(10).threshold(&cues) - (5.0 + 5.0 * 0.55)).abs() < 1e-9);
        assert_eq!(SceneDetector::new(6).threshold(&[3.0]), 3.0);
    }

    #[test]
    fn test_hard_cap_splits_every_eight_shots() {
        // 只有第 0、1 个镜头之间差异很大，但刚开场时不足两个镜头，不会切分
        let mut shots: Vec<Shot> = (0..20).map(|i| shot(i, 120.0, 2.0)).collect();
        shots[0] = shot(0, 20.0, 2.0);

        let scenes = SceneDetector::new(6).detect_scenes(&shots);

        let starts: Vec<usize> = scenes.iter().map(|s| s.shot_start_index).collect();
        assert_eq!(starts, vec![0, 8, 16]);
        assert_eq!(scenes[2].shot_end_index, 19);
        assert_partition(&scenes, 20);
    }

    #[test]
    fn test_partition_covers_all_shots() {
        let shots = varied_shots();
        for sensitivity in 1..=10 {
            let scenes = SceneDetector::new(sensitivity).detect_scenes(&shots);
            assert_partition(&scenes, shots.len());
            for scene in &scenes {
                assert!(scene.shot_count() <= MAX_SHOTS_PER_SCENE);
            }
        }
    }

    #[test]
    fn test_higher_sensitivity_never_reduces_scenes() {
        let shots = varied_shots();
        let counts: Vec<usize> = (1..=10)
            .map(|s| SceneDetector::new(s).detect_scenes(&shots).len())
            .collect();

        for pair in counts.windows(2) {
            assert!(pair[1] >= pair[0], "{counts:?}");
        }
        assert_eq!(counts[0], 2);
        assert_eq!(counts[9], 4);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let shots = varied_shots();
        let detector = SceneDetector::new(7);
        assert_eq!(detector.detect_scenes(&shots), detector.detect_scenes(&shots));
    }
}
