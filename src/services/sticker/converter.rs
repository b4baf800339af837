// GIF 转换器 - 动图/静图检测与多方案转换
//
// 转换方案是按顺序尝试的策略列表，共享同一个 attempt 能力，
// 动图和静图各有一条策略链：
// - 动图：逐帧重编码（保持动画）→ 输入本身是 GIF 时原样复制
// - 静图：白底合成（透明/调色板来源的颜色处理最好）→ 通用解码重编码
// 编码全部在内存中完成，只有成功后才写目标文件，
// 失败的尝试不会留下会被缓存检查误认的半成品

use async_trait::async_trait;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{
    AnimationDecoder, ColorType, Delay, Frame, GenericImageView, ImageFormat, Rgb, RgbImage,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, warn};

use crate::config::ImageConfig;
use crate::services::sticker::error::ConversionError;

/// 按扩展名判定为动图的格式（检测失败时的退路）
const ANIMATED_EXTENSIONS: &[&str] = &["gif", "webp", "apng"];

/// 转换参数
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    /// 最大图片尺寸（两边都不超过），超出按比例缩放
    pub max_dimension: u32,
    /// 输出 GIF 帧率
    pub gif_fps: u32,
}

impl From<&ImageConfig> for ConvertOptions {
    fn from(config: &ImageConfig) -> Self {
        Self {
            max_dimension: config.max_image_size,
            gif_fps: config.gif_fps.max(1),
        }
    }
}

/// 计算调整后的尺寸，保持宽高比
///
/// 两边都不超过 max_size 时不缩放；否则按
/// `min(max/width, max/height)` 统一缩放并截断到整数像素
pub fn resize_dimensions(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width <= max_size && height <= max_size {
        return (width, height);
    }

    let scale = f64::min(
        max_size as f64 / width as f64,
        max_size as f64 / height as f64,
    );
    let new_width = (width as f64 * scale) as u32;
    let new_height = (height as f64 * scale) as u32;
    (new_width.max(1), new_height.max(1))
}

/// 检测是否为动图
///
/// 解码器能打开时按真实帧数判断；
/// 打开失败时退化为按来源扩展名判断
pub fn detect_animated(data: &[u8], source_ext: Option<&str>) -> bool {
    match probe_animation(data) {
        Ok(animated) => animated,
        Err(e) => {
            warn!("动图检测失败，使用文件扩展名判断: {}", e);
            source_ext
                .map(|ext| ANIMATED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        }
    }
}

fn probe_animation(data: &[u8]) -> Result<bool, ConversionError> {
    let format = image::guess_format(data)
        .map_err(|e| ConversionError::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Gif => {
            let decoder = GifDecoder::new(Cursor::new(data))
                .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?;
            Ok(count_frames_capped(decoder, 2) > 1)
        }
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(data))
                .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?;
            Ok(count_frames_capped(decoder, 2) > 1)
        }
        ImageFormat::Png => {
            let decoder = PngDecoder::new(Cursor::new(data))
                .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?;
            Ok(decoder.is_apng())
        }
        _ => Ok(false),
    }
}

/// 数到第二帧就停，不把整段动画解进内存
fn count_frames_capped<'a>(decoder: impl AnimationDecoder<'a>, cap: usize) -> usize {
    decoder
        .into_frames()
        .take(cap)
        .take_while(|frame| frame.is_ok())
        .count()
}

/// 单个转换方案
///
/// 除返回编码结果外无副作用，目标文件由调用方统一写入
pub trait ConvertStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 尝试把输入图片编码为 GIF 字节
    fn attempt(&self, input: &[u8], opts: &ConvertOptions) -> Result<Vec<u8>, ConversionError>;
}

/// 动图逐帧重编码方案
///
/// 保留每一帧，按缩放策略调整尺寸，以配置的帧率写出 GIF
pub struct AnimatedReencode;

impl ConvertStrategy for AnimatedReencode {
    fn name(&self) -> &'static str {
        "animated-reencode"
    }

    fn attempt(&self, input: &[u8], opts: &ConvertOptions) -> Result<Vec<u8>, ConversionError> {
        let frames = decode_frames(input)?;
        if frames.len() < 2 {
            return Err(ConversionError::DecodeFailed("不足两帧，不是动图".to_string()));
        }

        let delay = Delay::from_numer_denom_ms(1000, opts.gif_fps);
        let mut buffer = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buffer);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| ConversionError::EncodeFailed(e.to_string()))?;

            for frame in frames {
                let resized = resize_frame(frame, opts.max_dimension, delay);
                encoder
                    .encode_frame(resized)
                    .map_err(|e| ConversionError::EncodeFailed(e.to_string()))?;
            }
        }

        Ok(buffer)
    }
}

/// GIF 原样复制方案
///
/// 仅当输入本身就是 GIF 时可用，作为逐帧重编码失败后的退路
pub struct GifPassthrough;

impl ConvertStrategy for GifPassthrough {
    fn name(&self) -> &'static str {
        "gif-passthrough"
    }

    fn attempt(&self, input: &[u8], _opts: &ConvertOptions) -> Result<Vec<u8>, ConversionError> {
        match image::guess_format(input) {
            Ok(ImageFormat::Gif) => Ok(input.to_vec()),
            _ => Err(ConversionError::UnsupportedFormat("输入不是 GIF".to_string())),
        }
    }
}

/// 静图白底合成方案
///
/// 带透明通道或调色板的来源先合成到不透明白色背景，
/// 压平为三通道后再缩放编码
pub struct WhiteBackgroundFlatten;

impl ConvertStrategy for WhiteBackgroundFlatten {
    fn name(&self) -> &'static str {
        "white-background"
    }

    fn attempt(&self, input: &[u8], opts: &ConvertOptions) -> Result<Vec<u8>, ConversionError> {
        let img = image::load_from_memory(input)
            .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?;

        let (width, height) = img.dimensions();
        let (new_width, new_height) = resize_dimensions(width, height, opts.max_dimension);
        let img = if (new_width, new_height) != (width, height) {
            debug!("尺寸压缩: {}x{} -> {}x{}", width, height, new_width, new_height);
            img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
        } else {
            img
        };

        let rgb = if img.color().has_alpha() {
            flatten_onto_white(&img.to_rgba8())
        } else {
            img.to_rgb8()
        };

        let mut buffer = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buffer);
            encoder
                .encode(rgb.as_raw(), new_width, new_height, ColorType::Rgb8)
                .map_err(|e| ConversionError::EncodeFailed(e.to_string()))?;
        }
        Ok(buffer)
    }
}

/// 静图通用重编码方案
pub struct GenericReencode;

impl ConvertStrategy for GenericReencode {
    fn name(&self) -> &'static str {
        "generic-reencode"
    }

    fn attempt(&self, input: &[u8], opts: &ConvertOptions) -> Result<Vec<u8>, ConversionError> {
        let img = image::load_from_memory(input)
            .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?;

        let (width, height) = img.dimensions();
        let (new_width, new_height) = resize_dimensions(width, height, opts.max_dimension);
        let img = if (new_width, new_height) != (width, height) {
            img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
        } else {
            img
        };

        let rgba = img.to_rgba8();
        let mut buffer = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buffer);
            encoder
                .encode(rgba.as_raw(), new_width, new_height, ColorType::Rgba8)
                .map_err(|e| ConversionError::EncodeFailed(e.to_string()))?;
        }
        Ok(buffer)
    }
}

/// 按来源格式解码全部动画帧
fn decode_frames(input: &[u8]) -> Result<Vec<Frame>, ConversionError> {
    let format = image::guess_format(input)
        .map_err(|e| ConversionError::UnsupportedFormat(e.to_string()))?;

    let frames = match format {
        ImageFormat::Gif => GifDecoder::new(Cursor::new(input))
            .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?
            .into_frames(),
        ImageFormat::WebP => WebPDecoder::new(Cursor::new(input))
            .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?
            .into_frames(),
        ImageFormat::Png => PngDecoder::new(Cursor::new(input))
            .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?
            .apng()
            .into_frames(),
        other => {
            return Err(ConversionError::UnsupportedFormat(format!("{:?}", other)));
        }
    };

    frames
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConversionError::DecodeFailed(e.to_string()))
}

/// 按缩放策略调整单帧，并统一为配置的帧间隔
fn resize_frame(frame: Frame, max_size: u32, delay: Delay) -> Frame {
    let buffer = frame.into_buffer();
    let (width, height) = buffer.dimensions();
    let (new_width, new_height) = resize_dimensions(width, height, max_size);

    let buffer = if (new_width, new_height) != (width, height) {
        image::imageops::resize(
            &buffer,
            new_width,
            new_height,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        buffer
    };

    Frame::from_parts(buffer, 0, 0, delay)
}

/// 把带透明通道的图片合成到白色背景上
fn flatten_onto_white(rgba: &image::RgbaImage) -> RgbImage {
    let (width, height) = rgba.dimensions();
    let mut background = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let out = background.get_pixel_mut(x, y);
        for c in 0..3 {
            out[c] = ((pixel[c] as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        }
    }

    background
}

/// GIF 转换接口
#[async_trait]
pub trait GifConverter: Send + Sync {
    /// 把本地文件转换为 GIF 写到目标路径
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;
}

/// 基于策略链的转换器
pub struct StrategyConverter {
    options: ConvertOptions,
    animated_chain: Arc<Vec<Box<dyn ConvertStrategy>>>,
    static_chain: Arc<Vec<Box<dyn ConvertStrategy>>>,
}

impl StrategyConverter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            animated_chain: Arc::new(vec![
                Box::new(AnimatedReencode) as Box<dyn ConvertStrategy>,
                Box::new(GifPassthrough),
            ]),
            static_chain: Arc::new(vec![
                Box::new(WhiteBackgroundFlatten) as Box<dyn ConvertStrategy>,
                Box::new(GenericReencode),
            ]),
        }
    }

    /// 在阻塞线程池上按顺序跑一条策略链
    async fn run_chain(
        chain: Arc<Vec<Box<dyn ConvertStrategy>>>,
        data: Vec<u8>,
        options: ConvertOptions,
    ) -> Result<Vec<u8>, ConversionError> {
        task::spawn_blocking(move || {
            let mut last_error = String::new();
            for strategy in chain.iter() {
                match strategy.attempt(&data, &options) {
                    Ok(encoded) => {
                        debug!("{} 转换成功", strategy.name());
                        return Ok(encoded);
                    }
                    Err(e) => {
                        debug!("{} 转换失败: {}", strategy.name(), e);
                        last_error = e.to_string();
                    }
                }
            }
            Err(ConversionError::AllStrategiesFailed(last_error))
        })
        .await
        .map_err(|e| ConversionError::TaskFailed(e.to_string()))?
    }
}

#[async_trait]
impl GifConverter for StrategyConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let data = tokio::fs::read(input).await?;
        let ext = input
            .extension()
            .map(|e| e.to_string_lossy().into_owned());

        let options = self.options;
        let probe_data = data.clone();
        let animated = task::spawn_blocking(move || {
            detect_animated(&probe_data, ext.as_deref())
        })
        .await
        .map_err(|e| ConversionError::TaskFailed(e.to_string()))?;

        let chain = if animated {
            Arc::clone(&self.animated_chain)
        } else {
            Arc::clone(&self.static_chain)
        };

        let encoded = Self::run_chain(chain, data, options).await?;

        // 成功后才落盘：先写同目录临时文件再原子改名
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = output.with_extension("gif.part");
        tokio::fs::write(&staging, &encoded).await?;
        if let Err(e) = tokio::fs::rename(&staging, output).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(ConversionError::Io(e));
        }

        Ok(())
    }
}
