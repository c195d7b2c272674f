use std::path::PathBuf;

/// 分析流程中的错误
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// 镜头检测后没有生成帧目录
    #[error("帧目录不存在: {path}（上级目录内容: [{listing}]）")]
    FrameDirNotFound { path: PathBuf, listing: String },

    /// 镜头检测没有产出任何代表帧
    #[error("没有生成任何镜头代表帧")]
    NoShotFrames,

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("图像处理失败: {0}")]
    Image(#[from] image::ImageError),

    /// 外部协作组件（元数据读取、镜头检测）失败
    #[error("{stage} 失败: {source}")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("序列化失败: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    pub(crate) fn collaborator(stage: &'static str, source: anyhow::Error) -> Self {
        Self::Collaborator { stage, source }
    }

    /// 构造帧目录缺失错误，并附带上级目录的内容列表便于排查
    pub(crate) fn frame_dir_missing(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let listing = path
            .parent()
            .and_then(|parent| std::fs::read_dir(parent).ok())
            .map(|entries| {
                let mut names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect();
                names.sort();
                names.join(", ")
            })
            .unwrap_or_default();
        Self::FrameDirNotFound { path, listing }
    }
}
