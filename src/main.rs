use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cine_metrics::{
    analyze_video, handler, AnalysisRequest, Collaborators, ConfigLoader, ConfigOverrides, ExtendedConfig,
    PaletteExtractor,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// 视频场景分析工具 - 镜头切分、场景分组、色彩与景别统计
#[derive(Parser, Debug)]
#[command(name = "cine-metrics")]
#[command(about = "视频场景分析：镜头切分、场景分组、色板提取、场景统计", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 分析本地视频文件，输出 JSON 结果
    Analyze {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 结果 JSON 输出路径（不指定则打印到标准输出）
        #[arg(short, long)]
        json: Option<PathBuf>,

        /// 产出文件根目录
        #[arg(long)]
        output_root: Option<PathBuf>,

        /// 场景切分灵敏度 (1-10)，越大场景越多
        #[arg(long)]
        scene_sensitivity: Option<u8>,

        /// 镜头检测阈值 (0.05-0.95)
        #[arg(long)]
        shot_threshold: Option<f64>,

        /// 每帧色板颜色数
        #[arg(long)]
        palette_size: Option<usize>,

        /// 镜头检测帧采样率（每秒采样多少帧）
        #[arg(long)]
        sample_rate: Option<f64>,

        /// 关闭物体检测
        #[arg(long)]
        no_object_detection: bool,

        /// 关闭景别分类
        #[arg(long)]
        no_shot_scale: bool,

        /// 不输出色板文件
        #[arg(long)]
        no_palette: bool,
    },
    /// 提取单张图片的色板及各颜色占比
    Palette {
        /// 图片路径
        #[arg(short, long)]
        input: PathBuf,

        /// 颜色数
        #[arg(short = 'k', long)]
        size: Option<usize>,
    },
    /// Web 服务模式：启动 HTTP 服务器
    Serve {
        /// 监听地址（默认 0.0.0.0:9000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 产出文件根目录
        #[arg(long)]
        output_root: Option<PathBuf>,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "cine-metrics.ini")]
        path: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = match &args.command {
        Commands::Analyze {
            output_root,
            scene_sensitivity,
            shot_threshold,
            palette_size,
            sample_rate,
            no_object_detection,
            no_shot_scale,
            no_palette,
            ..
        } => ConfigOverrides {
            output_root: output_root.clone(),
            scene_sensitivity: *scene_sensitivity,
            shot_threshold: *shot_threshold,
            palette_size: *palette_size,
            sample_rate: *sample_rate,
            include_object_detection: no_object_detection.then_some(false),
            include_shot_scale: no_shot_scale.then_some(false),
            include_palette: no_palette.then_some(false),
            ..Default::default()
        },
        Commands::Palette { size, .. } => ConfigOverrides {
            palette_size: *size,
            ..Default::default()
        },
        Commands::Serve { bind, output_root } => ConfigOverrides {
            bind: bind.clone(),
            output_root: output_root.clone(),
            ..Default::default()
        },
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(path)?;
            println!("已生成配置文件: {}", path.display());
            return Ok(());
        }
    };

    let config = ConfigLoader::load_extended_config(args.config.as_deref(), overrides)
        .context("加载配置失败")?;
    init_logging(&config.log_level);

    match args.command {
        Commands::Analyze { input, json, .. } => run_analyze(&config, input, json).await?,
        Commands::Palette { input, .. } => run_palette(&config, &input)?,
        Commands::Serve { .. } => start_web_server(config).await?,
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

async fn run_analyze(config: &ExtendedConfig, input: PathBuf, json_path: Option<PathBuf>) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("视频文件不存在: {}", input.display());
    }

    let analysis = config.analysis.clone();
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "video.mp4".to_string());

    let result = tokio::task::spawn_blocking(move || {
        let collaborators = Collaborators::from_config(&analysis);
        let request = AnalysisRequest::new(&input, filename, &analysis);
        analyze_video(&request, &analysis, &collaborators)
    })
    .await
    .context("分析任务异常退出")?
    .context("分析视频失败")?;

    let output = serde_json::to_string_pretty(&result)?;
    match json_path {
        Some(path) => {
            std::fs::write(&path, output).with_context(|| format!("写入结果失败: {}", path.display()))?;
            println!("结果已写入: {}", path.display());
        }
        None => println!("{output}"),
    }
    Ok(())
}

fn run_palette(config: &ExtendedConfig, input: &Path) -> Result<()> {
    let extractor = PaletteExtractor::new(config.analysis.palette_size);
    let sample = PaletteExtractor::load_sample(input)
        .with_context(|| format!("无法读取图片: {}", input.display()))?;
    let palette = extractor.extract_from_sample(&sample);
    let composition = extractor.composition(&sample, &palette);

    let output = json!({
        "image": input.display().to_string(),
        "palette": palette,
        "composition": composition,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn start_web_server(config: ExtendedConfig) -> Result<()> {
    std::fs::create_dir_all(&config.analysis.output_root)
        .with_context(|| format!("创建输出目录失败: {}", config.analysis.output_root.display()))?;

    let bind = config.bind.clone();
    let max_upload_bytes = config.max_upload_mb.saturating_mul(1024 * 1024);
    let state = Arc::new(handler::AppState::new(config.analysis));
    let app = handler::build_router(state, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/api/health", bind);
    tracing::info!("  • 接口说明: GET  http://{}/api/contract", bind);
    tracing::info!("  • 视频分析: POST http://{}/api/analyze", bind);
    tracing::info!("  • 产出文件: GET  http://{}/outputs/<id>/...", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
