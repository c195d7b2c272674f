//! RGB 颜色工具函数：色相、亮度、距离、十六进制编码

/// RGB 三通道浮点均值（0-255）
pub type RgbF = [f64; 3];

/// RGB 转色相（0-360）
///
/// 最大通道与最小通道相等时色相无定义，按 0 处理。
pub fn rgb_to_hue(rgb: &RgbF) -> f64 {
    let [r, g, b] = rgb.map(|c| c.clamp(0.0, 255.0) / 255.0);

    let max = r.max(g.max(b));
    let min = r.min(g.min(b));
    let delta = max - min;

    if delta == 0.0 {
        return 0.0;
    }

    let h = if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };

    let h = if h < 0.0 { h + 360.0 } else { h };
    if h >= 360.0 {
        h - 360.0
    } else {
        h
    }
}

/// 感知亮度（Rec. 709 系数）
pub fn luminance(rgb: &RgbF) -> f64 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// 两个颜色之间的欧氏距离
pub fn rgb_distance(a: &RgbF, b: &RgbF) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// 编码为 `#RRGGBB`（大写）
pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

/// 四舍六入五成双，保留 `decimals` 位小数
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}
