//! 分析产出文件：镜头时长表与柱状图、色板表与三维散点图、物体检测表读取

use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::metadata::Shot;
use crate::palette::FramePalette;

pub const SHOTLEN_CSV: &str = "shotlen.csv";
pub const SHOTLEN_PNG: &str = "shotlen.png";
pub const COLORS_CSV: &str = "colors.csv";
pub const COLORS_PNG: &str = "colors.png";
pub const OBJECTS_CSV: &str = "objects.csv";

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
const FOREGROUND: Rgb<u8> = Rgb([200, 200, 200]);

/// CSV 字段转义：包含逗号、引号或换行时加引号
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// 把 CSV 文本拆成记录，引号内的逗号和换行属于字段内容
fn parse_csv_records(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                records.push(std::mem::take(&mut fields));
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() || !fields.is_empty() {
        fields.push(current);
        records.push(fields);
    }

    records.retain(|r| r.iter().any(|f| !f.trim().is_empty()));
    records
}

/// 写出镜头时长表和柱状图
pub fn write_shot_lengths(dir: &Path, shots: &[Shot]) -> Result<(PathBuf, PathBuf)> {
    let mut csv = String::from("ShotId,StartFrame,EndFrame,LengthFrames\n");
    for shot in shots {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            shot.shot_id, shot.start_frame, shot.end_frame, shot.length_frames
        ));
    }
    let csv_path = dir.join(SHOTLEN_CSV);
    std::fs::write(&csv_path, csv)?;

    let png_path = dir.join(SHOTLEN_PNG);
    render_shot_lengths(shots).save(&png_path)?;

    Ok((csv_path, png_path))
}

/// 镜头时长柱状图，每个镜头一根柱子
fn render_shot_lengths(shots: &[Shot]) -> RgbImage {
    const WIDTH: u32 = 800;
    const HEIGHT: u32 = 300;
    const MARGIN: u32 = 20;

    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    let baseline = HEIGHT - MARGIN;
    draw_line(&mut img, (MARGIN as i64, baseline as i64), ((WIDTH - MARGIN) as i64, baseline as i64), FOREGROUND);

    let max_len = shots.iter().map(|s| s.length_frames).max().unwrap_or(0);
    if shots.is_empty() || max_len == 0 {
        return img;
    }

    let plot_width = WIDTH - 2 * MARGIN;
    let plot_height = HEIGHT - 2 * MARGIN;
    let bar_width = (plot_width / shots.len() as u32).max(1);

    for (i, shot) in shots.iter().enumerate() {
        let x = MARGIN + (i as u64 * plot_width as u64 / shots.len() as u64) as u32;
        let h = (shot.length_frames as f64 / max_len as f64 * plot_height as f64).round() as u32;
        let color = Rgb(shot.avg_rgb.map(|c| c.clamp(0.0, 255.0) as u8));
        let w = if bar_width > 2 { bar_width - 1 } else { bar_width };
        fill_rect(&mut img, x, baseline.saturating_sub(h), w, h, color);
    }
    img
}

/// 写出每帧的色板表和 RGB 三维散点图
pub fn write_colors(dir: &Path, palettes: &[FramePalette], size: usize) -> Result<(PathBuf, PathBuf)> {
    let mut csv = String::from("FrameFile");
    for i in 1..=size {
        csv.push_str(&format!(",R{i},G{i},B{i}"));
    }
    csv.push('\n');

    for frame in palettes {
        csv.push_str(&csv_field(&frame.frame_file));
        let mut flat: Vec<u8> = frame.palette.colors.iter().flatten().copied().collect();
        flat.resize(3 * size, 0);
        for value in flat {
            csv.push_str(&format!(",{value}"));
        }
        csv.push('\n');
    }

    let csv_path = dir.join(COLORS_CSV);
    std::fs::write(&csv_path, csv)?;

    let png_path = dir.join(COLORS_PNG);
    render_color_scatter(palettes).save(&png_path)?;

    Ok((csv_path, png_path))
}

/// RGB 立方体的等轴测投影
fn project(rgb: [f64; 3]) -> (i64, i64) {
    const SCALE: f64 = 1.1;
    const CX: f64 = 300.0;
    const CY: f64 = 420.0;
    let (cos30, sin30) = (30f64.to_radians().cos(), 0.5);
    let x = CX + (rgb[0] - rgb[1]) * cos30 * SCALE;
    let y = CY + (rgb[0] + rgb[1]) * sin30 * SCALE - rgb[2] * SCALE;
    (x.round() as i64, y.round() as i64)
}

/// 所有色板颜色在 RGB 立方体中的散点图，点的颜色即其本身
fn render_color_scatter(palettes: &[FramePalette]) -> RgbImage {
    let mut img = RgbImage::from_pixel(600, 720, BACKGROUND);

    let corners = [
        [0.0, 0.0, 0.0],
        [255.0, 0.0, 0.0],
        [0.0, 255.0, 0.0],
        [255.0, 255.0, 0.0],
        [0.0, 0.0, 255.0],
        [255.0, 0.0, 255.0],
        [0.0, 255.0, 255.0],
        [255.0, 255.0, 255.0],
    ];
    // 立方体的 12 条棱：两端点只有一个坐标不同
    for (i, a) in corners.iter().enumerate() {
        for b in corners.iter().skip(i + 1) {
            let differing = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
            if differing == 1 {
                draw_line(&mut img, project(*a), project(*b), Rgb([90, 90, 90]));
            }
        }
    }

    for frame in palettes {
        for color in &frame.palette.colors {
            let (x, y) = project(color.map(|c| c as f64));
            let (x, y) = ((x - 3).max(0) as u32, (y - 3).max(0) as u32);
            fill_rect(&mut img, x, y, 7, 7, Rgb(*color));
        }
    }
    img
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    for py in y..(y + h).min(img.height()) {
        for px in x..(x + w).min(img.width()) {
            img.put_pixel(px, py, color);
        }
    }
}

/// Bresenham 直线
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if x0 >= 0 && y0 >= 0 && (x0 as u32) < img.width() && (y0 as u32) < img.height() {
            img.put_pixel(x0 as u32, y0 as u32, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// 读取物体检测表（`FrameId`, `Top1-Objects` 两列），忽略空标签和无法解析的行
pub fn read_object_labels(path: &Path) -> Result<HashMap<u64, String>> {
    let content = std::fs::read_to_string(path)?;
    let mut records = parse_csv_records(content.trim_start_matches('\u{feff}')).into_iter();

    let Some(header) = records.next() else {
        return Ok(HashMap::new());
    };
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
    let column = |name: &str| header.iter().position(|h| h == name);
    let (Some(id_col), Some(label_col)) = (column("FrameId"), column("Top1-Objects")) else {
        warn!("[物体检测] 表头缺少 FrameId 或 Top1-Objects: {}", path.display());
        return Ok(HashMap::new());
    };

    let mut labels = HashMap::new();
    for fields in records {
        let raw_id = fields.get(id_col).map(|s| s.trim()).unwrap_or("");
        let frame_id = if raw_id.is_empty() {
            0
        } else {
            match raw_id.parse::<u64>() {
                Ok(id) => id,
                Err(_) => {
                    warn!("[物体检测] 无法解析 FrameId: {}", raw_id);
                    continue;
                }
            }
        };
        let label = fields.get(label_col).map(|s| s.trim()).unwrap_or("");
        if !label.is_empty() {
            labels.insert(frame_id, label.to_string());
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ShotScale;
    use crate::palette::Palette;

    fn shot(index: usize, length: u64) -> Shot {
        Shot {
            shot_id: index + 1,
            start_frame: index as u64 * 10,
            end_frame: index as u64 * 10 + length,
            length_frames: length,
            start_sec: 0.0,
            end_sec: 0.0,
            duration_sec: 0.0,
            frame_file: String::new(),
            frame_id: 0,
            avg_rgb: [10.0, 20.0, 30.0],
            shot_scale: ShotScale::Unknown,
            shot_scale_raw: "Unknown".to_string(),
        }
    }

    #[test]
    fn test_parse_csv_records_with_quotes() {
        assert_eq!(parse_csv_records("1,\"cup, mug\",x"), vec![vec!["1", "cup, mug", "x"]]);
        assert_eq!(parse_csv_records("2,\"say \"\"hi\"\"\"\n"), vec![vec!["2", "say \"hi\""]]);
        assert_eq!(
            parse_csv_records("a,b\r\n\r\n3,\"two\nlines\"\r\n"),
            vec![vec!["a", "b"], vec!["3", "two\nlines"]]
        );
        assert_eq!(csv_field("a,b"), "\"a,b\"");
    }

    #[test]
    fn test_write_shot_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let shots = vec![shot(0, 10), shot(1, 10), shot(2, 15)];

        let (csv, png) = write_shot_lengths(dir.path(), &shots).unwrap();

        let content = std::fs::read_to_string(csv).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "ShotId,StartFrame,EndFrame,LengthFrames");
        assert_eq!(lines[3], "3,20,35,15");
        assert!(png.exists());
    }

    #[test]
    fn test_write_colors_pads_rows() {
        let dir = tempfile::tempdir().unwrap();
        let palettes = vec![FramePalette {
            frame_file: "000001.jpg".to_string(),
            palette: Palette::black(2),
        }];

        let (csv, png) = write_colors(dir.path(), &palettes, 3).unwrap();

        let content = std::fs::read_to_string(csv).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "FrameFile,R1,G1,B1,R2,G2,B2,R3,G3,B3");
        assert_eq!(lines[1].split(',').count(), 10);
        assert!(png.exists());
    }

    #[test]
    fn test_read_object_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OBJECTS_CSV);
        std::fs::write(
            &path,
            "FrameId,Top1-Objects,Score\n12,chair,0.9\n30,\"cup, mug\",0.5\n31,,0.1\nbad,car,0.3\n",
        )
        .unwrap();

        let labels = read_object_labels(&path).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&12], "chair");
        assert_eq!(labels[&30], "cup, mug");
    }

    #[test]
    fn test_read_object_labels_keeps_multiline_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OBJECTS_CSV);
        std::fs::write(&path, "FrameId,Top1-Objects\n5,\"desk\nlamp\"\n6,book\n").unwrap();

        let labels = read_object_labels(&path).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&5], "desk\nlamp");
        assert_eq!(labels[&6], "book");
    }

    #[test]
    fn test_read_object_labels_without_expected_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OBJECTS_CSV);
        std::fs::write(&path, "frame,label\n1,cup\n").unwrap();
        assert!(read_object_labels(&path).unwrap().is_empty());
    }
}
