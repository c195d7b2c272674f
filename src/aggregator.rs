//! 场景统计：景别构成、主色调、道具标签（检测结果或规则推断）

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::color::{luminance, rgb_to_hue, round_to, RgbF};
use crate::metadata::{Prop, ScaleComposition, Scene, SceneSpan, Shot, ShotScale};

/// 每个场景最多保留的道具数
const MAX_PROPS: usize = 4;

/// 规则推断道具时使用的辅助信号
///
/// 运动强度目前没有真实的测量来源，缺省按 0 处理，相应规则不会触发。
/// 对焦信号缺省由景别构成推算。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropSignals {
    pub motion: Option<f64>,
    pub focus: Option<f64>,
}

impl PropSignals {
    pub fn motion_proxy(&self) -> f64 {
        self.motion.unwrap_or(0.0)
    }

    /// 对焦信号；未提供时取 0.62 × 特写占比 + 0.5 × 中景占比
    pub fn focus_proxy(&self, composition: &ScaleComposition) -> f64 {
        self.focus.unwrap_or_else(|| {
            0.62 * (composition.close_pct as f64 / 100.0)
                + 0.5 * (composition.medium_pct as f64 / 100.0)
        })
    }
}

/// 秒数格式化为 `MM:SS`，超过一小时为 `HH:MM:SS`
pub fn format_timecode(sec: f64) -> String {
    let total = sec.max(0.0).round_ties_even() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * count as f64 / total as f64).round_ties_even() as u32
}

/// 景别构成百分比，各类独立取整
pub fn scale_composition(shots: &[Shot]) -> ScaleComposition {
    let count = |scale: ShotScale| shots.iter().filter(|s| s.shot_scale == scale).count();
    ScaleComposition {
        long_pct: percent(count(ShotScale::Long), shots.len()),
        medium_pct: percent(count(ShotScale::Medium), shots.len()),
        close_pct: percent(count(ShotScale::CloseUp), shots.len()),
    }
}

/// 各镜头平均颜色的逐通道均值
pub fn dominant_rgb(shots: &[Shot]) -> RgbF {
    if shots.is_empty() {
        return [0.0; 3];
    }
    let n = shots.len() as f64;
    let mut sums = [0.0f64; 3];
    for shot in shots {
        for c in 0..3 {
            sums[c] += shot.avg_rgb[c];
        }
    }
    sums.map(|s| s / n)
}

/// 根据检测器标签统计道具，场景内没有任何标签时返回空列表
pub fn detected_props(shots: &[Shot], labels: &HashMap<u64, String>) -> Vec<Prop> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for shot in shots {
        if let Some(label) = labels.get(&shot.frame_id).filter(|l| !l.is_empty()) {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(MAX_PROPS)
        .map(|(label, count)| Prop {
            label: label.to_string(),
            score: if shots.is_empty() {
                0.0
            } else {
                round_to(count as f64 / shots.len() as f64, 2)
            },
            count,
        })
        .collect()
}

/// 没有检测标签时，按主色调和辅助信号推断可能出现的道具
pub fn infer_props_fallback(rgb: &RgbF, motion_proxy: f64, focus_proxy: f64) -> Vec<Prop> {
    let [r, g, b] = *rgb;
    let mut picks: Vec<(&str, f64)> = Vec::new();

    if r > g + 15.0 && r > b + 15.0 {
        picks.extend([("interior furniture", 0.76), ("wooden surfaces", 0.68)]);
    }
    if g > r + 12.0 && g > b + 12.0 {
        picks.extend([("foliage/plants", 0.78), ("textile details", 0.61)]);
    }
    if b > r + 10.0 && b > g + 10.0 {
        picks.extend([("screens/sky/water", 0.74), ("metal props", 0.57)]);
    }
    if luminance(rgb) < 72.0 {
        picks.push(("lamps/practical lights", 0.64));
    }
    if motion_proxy > 55.0 {
        picks.push(("vehicles/moving crowd", 0.63));
    }
    if focus_proxy >= 0.62 {
        picks.push(("hand props/facial accessories", 0.58));
    }
    if picks.is_empty() {
        picks.extend([("set decoration", 0.55), ("background signage", 0.49)]);
    }

    picks.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut props: Vec<Prop> = Vec::new();
    for (label, score) in picks {
        if props.iter().any(|p| p.label == label) {
            continue;
        }
        props.push(Prop {
            label: label.to_string(),
            score: round_to(score, 2),
            count: 1,
        });
        if props.len() >= MAX_PROPS {
            break;
        }
    }
    props
}

/// 场景聚合器
pub struct SceneAggregator<'a> {
    labels: &'a HashMap<u64, String>,
    signals: PropSignals,
}

impl<'a> SceneAggregator<'a> {
    pub fn new(labels: &'a HashMap<u64, String>, signals: PropSignals) -> Self {
        Self { labels, signals }
    }

    /// 计算单个场景的统计信息；`shots` 为完整镜头序列
    pub fn aggregate(&self, span: &SceneSpan, shots: &[Shot]) -> Scene {
        let scene_shots = &shots[span.shot_start_index..=span.shot_end_index];
        let shot_count = scene_shots.len();
        let duration = (span.end_sec - span.start_sec).max(0.0);
        let average_shot_length_sec = if shot_count > 0 {
            duration / shot_count as f64
        } else {
            0.0
        };

        let composition = scale_composition(scene_shots);
        let dominant = dominant_rgb(scene_shots);
        let motion_proxy = self.signals.motion_proxy();
        let focus_proxy = self.signals.focus_proxy(&composition);

        let mut props = detected_props(scene_shots, self.labels);
        if props.is_empty() {
            props = infer_props_fallback(&dominant, motion_proxy, focus_proxy);
        }

        Scene {
            scene_id: span.scene_id,
            start_sec: span.start_sec,
            end_sec: span.end_sec,
            start_tc: format_timecode(span.start_sec),
            end_tc: format_timecode(span.end_sec),
            duration_sec: duration,
            shot_count,
            average_shot_length_sec,
            shot_scale_composition: composition,
            dominant_rgb: dominant,
            dominant_hue: rgb_to_hue(&dominant),
            props,
            shots: scene_shots.to_vec(),
            motion_proxy,
            focus_proxy,
        }
    }
}
