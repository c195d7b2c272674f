pub mod aggregator;
pub mod collaborators;
pub mod color;
pub mod config;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod palette;
pub mod processor;
pub mod report;
pub mod scene_detector;
pub mod shot_detector;
pub mod shot_features;
pub mod video_processor;

pub use aggregator::{PropSignals, SceneAggregator};
pub use collaborators::Collaborators;
pub use config::{AnalysisConfig, ConfigLoader, ConfigOverrides, ExtendedConfig};
pub use error::{AnalysisError, Result};
pub use metadata::{AnalysisResult, Scene, Shot, ShotScale};
pub use palette::{Palette, PaletteExtractor};
pub use processor::{analyze_video, AnalysisRequest};
pub use scene_detector::SceneDetector;
pub use video_processor::VideoProcessor;
