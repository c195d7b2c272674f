use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{error, info, info_span};

use crate::collaborators::Collaborators;
use crate::config::{parse_bool, AnalysisConfig};
use crate::metadata::AnalysisResult;
use crate::processor::{analyze_video, AnalysisRequest};

/// 服务共享状态
pub struct AppState {
    pub config: AnalysisConfig,
    pub collaborators: Collaborators,
}

impl AppState {
    pub fn new(config: AnalysisConfig) -> Self {
        let collaborators = Collaborators::from_config(&config);
        Self {
            config,
            collaborators,
        }
    }
}

/// 接口错误，响应体为 `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// 构建路由
pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let outputs = ServeDir::new(&state.config.output_root);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/contract", get(contract))
        .route("/api/analyze", post(analyze))
        .nest_service("/outputs", outputs)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查 Handler
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 接口说明
pub async fn contract() -> Json<Value> {
    Json(json!({
        "endpoint": "POST /api/analyze",
        "request": {
            "multipart/form-data": {
                "video": "binary file",
                "scene_sensitivity": "int 1..10",
                "shot_threshold": "float 0.05..0.95",
                "include_object_detection": "bool",
                "include_shot_scale": "bool",
            }
        },
        "response_keys": ["meta", "global", "shots", "scenes", "outputs"],
    }))
}

/// 上传的表单内容
struct AnalyzeForm {
    filename: Option<String>,
    video: Vec<u8>,
    scene_sensitivity: Option<i64>,
    shot_threshold: Option<f64>,
    include_object_detection: Option<bool>,
    include_shot_scale: Option<bool>,
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid value for {name}: {value}")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ApiError> {
    parse_bool(value).ok_or_else(|| ApiError::bad_request(format!("Invalid value for {name}: {value}")))
}

async fn read_form(mut multipart: Multipart) -> Result<AnalyzeForm, ApiError> {
    let mut form = AnalyzeForm {
        filename: None,
        video: Vec::new(),
        scene_sensitivity: None,
        shot_threshold: None,
        include_object_detection: None,
        include_shot_scale: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "video" {
            form.filename = field.file_name().map(str::to_string);
            form.video = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.to_string()))?
                .to_vec();
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        match name.as_str() {
            "scene_sensitivity" => form.scene_sensitivity = Some(parse_field(&name, &value)?),
            "shot_threshold" => form.shot_threshold = Some(parse_field(&name, &value)?),
            "include_object_detection" => form.include_object_detection = Some(parse_flag(&name, &value)?),
            "include_shot_scale" => form.include_shot_scale = Some(parse_flag(&name, &value)?),
            _ => {}
        }
    }

    Ok(form)
}

/// 把上传内容写入临时文件后执行分析；临时文件随函数返回删除
fn run_analysis(state: &AppState, filename: &str, video: &[u8], form: &AnalyzeForm) -> anyhow::Result<AnalysisResult> {
    let suffix = Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| ".mp4".to_string());
    let mut upload = tempfile::Builder::new()
        .prefix("cine-metrics-")
        .suffix(&suffix)
        .tempfile()?;
    upload.write_all(video)?;
    upload.flush()?;

    let mut request = AnalysisRequest::new(upload.path(), filename, &state.config);
    if let Some(v) = form.scene_sensitivity {
        request.scene_sensitivity = v;
    }
    if let Some(v) = form.shot_threshold {
        request.shot_threshold = v;
    }
    if let Some(v) = form.include_object_detection {
        request.include_object_detection = v;
    }
    if let Some(v) = form.include_shot_scale {
        request.include_shot_scale = v;
    }

    Ok(analyze_video(&request, &state.config, &state.collaborators)?)
}

/// 上传视频并分析
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<AnalysisResult>, ApiError> {
    let mut form = read_form(multipart).await?;
    let filename = match form.filename.take() {
        Some(name) if !name.is_empty() => name,
        _ => return Err(ApiError::bad_request("Missing video filename.")),
    };

    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("analyze", %request_id);
    span.in_scope(|| info!("收到分析请求: {} ({} 字节)", filename, form.video.len()));

    let result = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        let video = std::mem::take(&mut form.video);
        run_analysis(&state, &filename, &video, &form).map_err(|e| {
            error!("分析失败: {:#}", e);
            e
        })
    })
    .await
    .map_err(|e| ApiError::internal(format!("Analysis failed: {e}")))?
    .map_err(|e| ApiError::internal(format!("Analysis failed: {e}")))?;

    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MetadataReader, ShotBoundaryDetector};
    use crate::metadata::{ShotSpan, VideoInfo};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use image::{ImageBuffer, Rgb};
    use tower::ServiceExt;

    const BOUNDARY: &str = "cine-metrics-boundary";

    struct FixedMetadata;

    impl MetadataReader for FixedMetadata {
        fn read(&self, _video: &Path) -> anyhow::Result<VideoInfo> {
            Ok(VideoInfo {
                duration_sec: 4.0,
                fps: 25.0,
                frame_count: 100,
                width: 640,
                height: 360,
            })
        }
    }

    struct TwoShots;

    impl ShotBoundaryDetector for TwoShots {
        fn detect(&self, _video: &Path, out_dir: &Path, _threshold: f64) -> anyhow::Result<Vec<ShotSpan>> {
            let frame_dir = out_dir.join("frame");
            std::fs::create_dir_all(&frame_dir)?;
            ImageBuffer::from_pixel(8, 8, Rgb([20u8, 120, 30])).save(frame_dir.join("000025.png"))?;
            ImageBuffer::from_pixel(8, 8, Rgb([20u8, 40, 160])).save(frame_dir.join("000075.png"))?;
            Ok(vec![ShotSpan::new(0, 50, 50), ShotSpan::new(50, 100, 50)])
        }
    }

    fn app(output_root: &Path) -> Router {
        let state = AppState {
            config: AnalysisConfig {
                output_root: output_root.to_path_buf(),
                ..Default::default()
            },
            collaborators: Collaborators {
                metadata: Box::new(FixedMetadata),
                shots: Box::new(TwoShots),
                objects: None,
                scale: None,
            },
        };
        build_router(Arc::new(state), 16 * 1024 * 1024)
    }

    fn multipart_body(fields: &[(&str, &str)], video: Option<&str>) -> Body {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        if let Some(filename) = video {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"{filename}\"\r\n\
                 Content-Type: video/mp4\r\n\r\nnot really a video\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Body::from(body)
    }

    fn analyze_request(body: Body) -> Request<Body> {
        Request::post("/api/analyze")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(body)
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_contract_lists_response_keys() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::get("/api/contract").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["endpoint"], "POST /api/analyze");
        assert_eq!(json["response_keys"], json!(["meta", "global", "shots", "scenes", "outputs"]));
    }

    #[tokio::test]
    async fn test_missing_video_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(analyze_request(multipart_body(&[("scene_sensitivity", "5")], None)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "Missing video filename.");
    }

    #[tokio::test]
    async fn test_invalid_number_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(analyze_request(multipart_body(&[("shot_threshold", "high")], Some("a.mp4"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_returns_result_keys() {
        let dir = tempfile::tempdir().unwrap();
        let fields = [("scene_sensitivity", "42"), ("include_shot_scale", "false")];
        let response = app(dir.path())
            .oneshot(analyze_request(multipart_body(&fields, Some("My Clip.mp4"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 5);
        for key in ["meta", "global", "shots", "scenes", "outputs"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["meta"]["id"], "My_Clip");
        assert_eq!(json["global"]["shotCount"], 2);
        assert_eq!(json["shots"][1]["durationSec"], 2.0);
        assert!(dir.path().join("My_Clip").join("shotlen.csv").exists());
    }
}
