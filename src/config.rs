use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 分析参数配置
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// 产出文件根目录，每个视频在其下按文件名建子目录
    pub output_root: PathBuf,
    /// 场景切分灵敏度（1-10）
    pub scene_sensitivity: u8,
    /// 镜头检测阈值（0.05-0.95）
    pub shot_threshold: f64,
    /// 每帧色板颜色数
    pub palette_size: usize,
    pub include_object_detection: bool,
    pub include_shot_scale: bool,
    /// 是否对代表帧做色板分析并输出 colors.csv / colors.png
    pub include_palette: bool,
    /// 内置镜头检测的帧采样率（每秒采样多少帧）
    pub sample_rate: f64,
    /// 物体检测外部程序
    pub object_detector_cmd: Option<String>,
    /// 景别分类外部程序
    pub shot_scale_cmd: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./output"),
            scene_sensitivity: 6,
            shot_threshold: 0.35,
            palette_size: 5,
            include_object_detection: true,
            include_shot_scale: true,
            include_palette: true,
            sample_rate: 4.0,
            object_detector_cmd: None,
            shot_scale_cmd: None,
        }
    }
}

/// 扩展配置（分析参数 + 服务与日志配置）
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedConfig {
    pub analysis: AnalysisConfig,
    /// HTTP 监听地址
    pub bind: String,
    /// 上传文件大小上限（MB）
    pub max_upload_mb: usize,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for ExtendedConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            bind: "0.0.0.0:9000".to_string(),
            max_upload_mb: 1024,
            log_level: "info".to_string(),
        }
    }
}

/// 单一来源（命令行、环境变量或配置文件）给出的配置项，未设置的为 `None`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub output_root: Option<PathBuf>,
    pub scene_sensitivity: Option<u8>,
    pub shot_threshold: Option<f64>,
    pub palette_size: Option<usize>,
    pub include_object_detection: Option<bool>,
    pub include_shot_scale: Option<bool>,
    pub include_palette: Option<bool>,
    pub sample_rate: Option<f64>,
    pub object_detector_cmd: Option<String>,
    pub shot_scale_cmd: Option<String>,
    pub bind: Option<String>,
    pub max_upload_mb: Option<usize>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// 逐项合并：自身已设置的值优先，其余取 `lower`
    fn or(self, lower: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            output_root: self.output_root.or(lower.output_root),
            scene_sensitivity: self.scene_sensitivity.or(lower.scene_sensitivity),
            shot_threshold: self.shot_threshold.or(lower.shot_threshold),
            palette_size: self.palette_size.or(lower.palette_size),
            include_object_detection: self.include_object_detection.or(lower.include_object_detection),
            include_shot_scale: self.include_shot_scale.or(lower.include_shot_scale),
            include_palette: self.include_palette.or(lower.include_palette),
            sample_rate: self.sample_rate.or(lower.sample_rate),
            object_detector_cmd: self.object_detector_cmd.or(lower.object_detector_cmd),
            shot_scale_cmd: self.shot_scale_cmd.or(lower.shot_scale_cmd),
            bind: self.bind.or(lower.bind),
            max_upload_mb: self.max_upload_mb.or(lower.max_upload_mb),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    /// 未设置的项使用默认值
    fn resolve(self) -> ExtendedConfig {
        let defaults = ExtendedConfig::default();
        let analysis = AnalysisConfig {
            output_root: self.output_root.unwrap_or(defaults.analysis.output_root),
            scene_sensitivity: self
                .scene_sensitivity
                .unwrap_or(defaults.analysis.scene_sensitivity)
                .clamp(1, 10),
            shot_threshold: self
                .shot_threshold
                .filter(|t| t.is_finite())
                .unwrap_or(defaults.analysis.shot_threshold)
                .clamp(0.05, 0.95),
            palette_size: self.palette_size.unwrap_or(defaults.analysis.palette_size).max(1),
            include_object_detection: self
                .include_object_detection
                .unwrap_or(defaults.analysis.include_object_detection),
            include_shot_scale: self.include_shot_scale.unwrap_or(defaults.analysis.include_shot_scale),
            include_palette: self.include_palette.unwrap_or(defaults.analysis.include_palette),
            sample_rate: self
                .sample_rate
                .filter(|r| *r > 0.0)
                .unwrap_or(defaults.analysis.sample_rate),
            object_detector_cmd: self.object_detector_cmd,
            shot_scale_cmd: self.shot_scale_cmd,
        };

        ExtendedConfig {
            analysis,
            bind: self.bind.unwrap_or(defaults.bind),
            max_upload_mb: self.max_upload_mb.unwrap_or(defaults.max_upload_mb),
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}

/// 解析布尔值，接受 true/false、1/0、yes/no、on/off（不区分大小写）
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_opt<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    ///
    /// 显式指定的配置文件不存在时报错；未指定时依次尝试默认位置，都没有就跳过。
    pub fn load_extended_config(
        config_file: Option<&Path>,
        cli: ConfigOverrides,
    ) -> Result<ExtendedConfig> {
        // 1. 配置文件
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations()?.unwrap_or_default(),
        };

        // 2. 环境变量
        let env_config = Self::load_from_env(|key| env::var(key).ok());

        // 3. 合并
        Ok(cli.or(env_config).or(file_config).resolve())
    }

    /// 只需要分析参数时的便捷入口
    pub fn load_config(config_file: Option<&Path>, cli: ConfigOverrides) -> Result<AnalysisConfig> {
        Ok(Self::load_extended_config(config_file, cli)?.analysis)
    }

    /// 从环境变量加载配置；`lookup` 便于测试时替换环境
    fn load_from_env<F>(lookup: F) -> ConfigOverrides
    where
        F: Fn(&str) -> Option<String>,
    {
        ConfigOverrides {
            output_root: lookup("CINE_METRICS_OUTPUT_ROOT").and_then(non_empty).map(PathBuf::from),
            scene_sensitivity: parse_opt(lookup("CINE_METRICS_SCENE_SENSITIVITY")),
            shot_threshold: parse_opt(lookup("CINE_METRICS_SHOT_THRESHOLD")),
            palette_size: parse_opt(lookup("CINE_METRICS_PALETTE_SIZE")),
            include_object_detection: lookup("CINE_METRICS_INCLUDE_OBJECT_DETECTION")
                .and_then(|v| parse_bool(&v)),
            include_shot_scale: lookup("CINE_METRICS_INCLUDE_SHOT_SCALE").and_then(|v| parse_bool(&v)),
            include_palette: lookup("CINE_METRICS_INCLUDE_PALETTE").and_then(|v| parse_bool(&v)),
            sample_rate: parse_opt(lookup("CINE_METRICS_SAMPLE_RATE")),
            object_detector_cmd: lookup("CINE_METRICS_OBJECT_DETECTOR_CMD").and_then(non_empty),
            shot_scale_cmd: lookup("CINE_METRICS_SHOT_SCALE_CMD").and_then(non_empty),
            bind: lookup("CINE_METRICS_BIND").and_then(non_empty),
            max_upload_mb: parse_opt(lookup("CINE_METRICS_MAX_UPLOAD_MB")),
            log_level: lookup("LOG_LEVEL").and_then(non_empty),
        }
    }

    /// 从 INI 配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<ConfigOverrides> {
        if !config_path.exists() {
            anyhow::bail!("配置文件不存在: {}", config_path.display());
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &configparser::ini::Ini) -> ConfigOverrides {
        let get = |section: &str, key: &str| ini.get(section, key).and_then(non_empty);
        let flag = |key: &str| get("analysis", key).and_then(|v| parse_bool(&v));

        ConfigOverrides {
            output_root: get("analysis", "output_root").map(PathBuf::from),
            scene_sensitivity: parse_opt(get("analysis", "scene_sensitivity")),
            shot_threshold: parse_opt(get("analysis", "shot_threshold")),
            palette_size: parse_opt(get("analysis", "palette_size")),
            include_object_detection: flag("include_object_detection"),
            include_shot_scale: flag("include_shot_scale"),
            include_palette: flag("include_palette"),
            sample_rate: parse_opt(get("analysis", "sample_rate")),
            object_detector_cmd: get("collaborators", "object_detector_cmd"),
            shot_scale_cmd: get("collaborators", "shot_scale_cmd"),
            bind: get("server", "bind"),
            max_upload_mb: parse_opt(get("server", "max_upload_mb")),
            log_level: get("logging", "level"),
        }
    }

    /// 默认位置：./cine-metrics.ini、./.cine-metrics.ini、~/.cine-metrics.ini、/etc/cine-metrics.ini
    fn load_from_default_locations() -> Result<Option<ConfigOverrides>> {
        let mut candidates = vec![
            PathBuf::from("cine-metrics.ini"),
            PathBuf::from(".cine-metrics.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".cine-metrics.ini"));
        }
        candidates.push(PathBuf::from("/etc/cine-metrics.ini"));

        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load_from_file(path).map(Some),
            None => Ok(None),
        }
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = ExtendedConfig::default();
        let analysis = &defaults.analysis;

        let mut ini = configparser::ini::Ini::new();
        ini.set("analysis", "output_root", Some(analysis.output_root.display().to_string()));
        ini.set("analysis", "scene_sensitivity", Some(analysis.scene_sensitivity.to_string()));
        ini.set("analysis", "shot_threshold", Some(analysis.shot_threshold.to_string()));
        ini.set("analysis", "palette_size", Some(analysis.palette_size.to_string()));
        ini.set(
            "analysis",
            "include_object_detection",
            Some(analysis.include_object_detection.to_string()),
        );
        ini.set("analysis", "include_shot_scale", Some(analysis.include_shot_scale.to_string()));
        ini.set("analysis", "include_palette", Some(analysis.include_palette.to_string()));
        ini.set("analysis", "sample_rate", Some(analysis.sample_rate.to_string()));
        ini.set("collaborators", "object_detector_cmd", Some(String::new()));
        ini.set("collaborators", "shot_scale_cmd", Some(String::new()));
        ini.set("server", "bind", Some(defaults.bind.clone()));
        ini.set("server", "max_upload_mb", Some(defaults.max_upload_mb.to_string()));
        ini.set("logging", "level", Some(defaults.log_level.clone()));

        ini.write(config_path)
            .with_context(|| format!("写入配置文件失败: {}", config_path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ConfigOverrides::default().resolve();
        assert_eq!(config, ExtendedConfig::default());
        assert_eq!(config.analysis.scene_sensitivity, 6);
        assert_eq!(config.analysis.shot_threshold, 0.35);
        assert_eq!(config.bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cine-metrics.ini");
        std::fs::write(
            &path,
            "[analysis]\nscene_sensitivity = 9\ninclude_palette = false\noutput_root = /data/out\n\
             [collaborators]\nshot_scale_cmd = python3 scale.py\nobject_detector_cmd =\n\
             [server]\nbind = 127.0.0.1:8000\n",
        )
        .unwrap();

        let layer = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(layer.scene_sensitivity, Some(9));
        assert_eq!(layer.include_palette, Some(false));
        assert_eq!(layer.output_root, Some(PathBuf::from("/data/out")));
        assert_eq!(layer.shot_scale_cmd.as_deref(), Some("python3 scale.py"));
        assert_eq!(layer.object_detector_cmd, None);
        assert_eq!(layer.bind.as_deref(), Some("127.0.0.1:8000"));
        assert_eq!(layer.shot_threshold, None);
    }

    #[test]
    fn test_priority_cli_over_env_over_file() {
        let file = ConfigOverrides {
            scene_sensitivity: Some(3),
            shot_threshold: Some(0.5),
            palette_size: Some(8),
            ..Default::default()
        };
        let vars: HashMap<&str, &str> = [
            ("CINE_METRICS_SCENE_SENSITIVITY", "7"),
            ("CINE_METRICS_SHOT_THRESHOLD", "0.2"),
            ("LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let env_layer = ConfigLoader::load_from_env(|key| vars.get(key).map(|v| v.to_string()));
        let cli = ConfigOverrides {
            scene_sensitivity: Some(10),
            ..Default::default()
        };

        let config = cli.or(env_layer).or(file).resolve();
        assert_eq!(config.analysis.scene_sensitivity, 10);
        assert_eq!(config.analysis.shot_threshold, 0.2);
        assert_eq!(config.analysis.palette_size, 8);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_resolve_clamps_values() {
        let config = ConfigOverrides {
            scene_sensitivity: Some(0),
            shot_threshold: Some(2.0),
            palette_size: Some(0),
            sample_rate: Some(-1.0),
            ..Default::default()
        }
        .resolve();

        assert_eq!(config.analysis.scene_sensitivity, 1);
        assert_eq!(config.analysis.shot_threshold, 0.95);
        assert_eq!(config.analysis.palette_size, 1);
        assert_eq!(config.analysis.sample_rate, 4.0);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = ConfigLoader::load_extended_config(
            Some(Path::new("/nonexistent/cine-metrics.ini")),
            ConfigOverrides::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_create_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cine-metrics.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let layer = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(layer.clone().resolve(), ExtendedConfig::default());
        assert_eq!(layer.palette_size, Some(5));
        assert_eq!(layer.object_detector_cmd, None);
    }
}
