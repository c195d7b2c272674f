use ffmpeg_next as ffmpeg;
use image::DynamicImage;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::collaborators::MetadataReader;
use crate::metadata::VideoInfo;

/// 按采样间隔取出的一帧
pub struct SampledFrame {
    /// 帧序号（解码顺序，从 0 开始）
    pub index: u64,
    pub image: DynamicImage,
}

/// 视频处理器，负责读取视频信息并解码帧
pub struct VideoProcessor {
    input_path: PathBuf,
}

fn rational_to_f64(rate: ffmpeg::Rational) -> f64 {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    }
}

impl VideoProcessor {
    pub fn new(input_path: impl AsRef<Path>) -> Result<Self> {
        ffmpeg::init().context("初始化 FFmpeg 失败")?;

        // 只输出 FFmpeg 的错误日志
        unsafe {
            ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
        }

        Ok(Self {
            input_path: input_path.as_ref().to_path_buf(),
        })
    }

    /// 获取视频信息：时长、帧率、帧数、分辨率
    ///
    /// 帧率读不到时为 0，由调用方决定默认值；时长优先用 帧数 / 帧率，
    /// 其次使用容器记录的时长。
    pub fn read_info(&self) -> Result<VideoInfo> {
        let ictx = ffmpeg::format::input(&self.input_path)
            .with_context(|| format!("无法打开视频文件: {}", self.input_path.display()))?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("未找到视频流")?;

        let decoder_context = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .context("无法创建解码器上下文")?;
        let decoder = decoder_context.decoder()
            .video()
            .context("无法创建视频解码器")?;

        let fps = rational_to_f64(video_stream.avg_frame_rate());
        let container_duration = (ictx.duration().max(0) as f64) / ffmpeg::ffi::AV_TIME_BASE as f64;

        let mut frame_count = video_stream.frames().max(0) as u64;
        if frame_count == 0 && fps > 0.0 {
            frame_count = (container_duration * fps).round() as u64;
        }

        let duration_sec = if fps > 0.0 && frame_count > 0 {
            frame_count as f64 / fps
        } else {
            container_duration
        };

        Ok(VideoInfo {
            duration_sec,
            fps,
            frame_count,
            width: decoder.width(),
            height: decoder.height(),
        })
    }

    /// 顺序解码视频，每隔若干帧回调一次
    ///
    /// `sample_rate` 为每秒采样帧数。返回解码到的总帧数。
    pub fn for_each_sample<F>(&self, sample_rate: f64, mut on_frame: F) -> Result<u64>
    where
        F: FnMut(SampledFrame) -> Result<()>,
    {
        let mut ictx = ffmpeg::format::input(&self.input_path)
            .with_context(|| format!("无法打开视频文件: {}", self.input_path.display()))?;

        let (stream_index, fps, parameters) = {
            let stream = ictx
                .streams()
                .best(ffmpeg::media::Type::Video)
                .context("未找到视频流")?;
            (stream.index(), rational_to_f64(stream.avg_frame_rate()), stream.parameters())
        };

        let decoder_context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .context("无法创建解码器上下文")?;
        let mut decoder = decoder_context.decoder()
            .video()
            .context("无法创建视频解码器")?;

        let mut scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        ).context("无法创建缩放器")?;

        let interval = if fps > 0.0 && sample_rate > 0.0 {
            ((fps / sample_rate).round() as u64).max(1)
        } else {
            1
        };

        let mut index = 0u64;
        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            decoder.send_packet(&packet).context("发送数据包失败")?;
            self.drain(&mut decoder, &mut scaler, interval, &mut index, &mut on_frame)?;
        }

        decoder.send_eof().context("发送 EOF 失败")?;
        self.drain(&mut decoder, &mut scaler, interval, &mut index, &mut on_frame)?;

        Ok(index)
    }

    fn drain<F>(
        &self,
        decoder: &mut ffmpeg::decoder::Video,
        scaler: &mut ffmpeg::software::scaling::Context,
        interval: u64,
        index: &mut u64,
        on_frame: &mut F,
    ) -> Result<()>
    where
        F: FnMut(SampledFrame) -> Result<()>,
    {
        let mut decoded = ffmpeg::frame::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            if *index % interval == 0 {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                scaler.run(&decoded, &mut rgb_frame)
                    .context("缩放帧失败")?;
                on_frame(SampledFrame {
                    index: *index,
                    image: self.frame_to_image(&rgb_frame),
                })?;
            }
            *index += 1;
        }
        Ok(())
    }

    /// 将 RGB24 格式的 FFmpeg 帧转换为 DynamicImage
    fn frame_to_image(&self, frame: &ffmpeg::frame::Video) -> DynamicImage {
        let width = frame.width();
        let height = frame.height();
        let stride = frame.stride(0);
        let data = frame.data(0);

        let mut img_buf = image::RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let idx = y as usize * stride + x as usize * 3;
                if idx + 2 < data.len() {
                    img_buf.put_pixel(x, y, image::Rgb([data[idx], data[idx + 1], data[idx + 2]]));
                }
            }
        }

        DynamicImage::ImageRgb8(img_buf)
    }
}

/// 基于 FFmpeg 的元数据读取
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegMetadataReader;

impl MetadataReader for FfmpegMetadataReader {
    fn read(&self, video: &Path) -> Result<VideoInfo> {
        VideoProcessor::new(video)?.read_info()
    }
}
