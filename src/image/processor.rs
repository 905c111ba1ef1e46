use super::{scale_to_fit, ResizeService, ResizedImage};
use crate::models::{Dimensions, EmoteKind, OutputFormat};
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::{WebPDecoder, WebPEncoder};
use image::error::{DecodingError, EncodingError, ImageFormatHint};
use image::imageops::{self, FilterType};
use image::{
    AnimationDecoder, Delay, ExtendedColorType, Frame, ImageEncoder, ImageError, ImageFormat,
    RgbaImage,
};
use std::io::Cursor;
use tracing::debug;
use webp_animation::{AnimParams, EncoderOptions, EncodingConfig, EncodingType};

/// GIF encoder speed: 1 is the slowest and best-quality quantizer.
const GIF_ENCODER_SPEED: i32 = 1;

/// libwebp compression effort, 0 (fast) to 6 (small).
const WEBP_METHOD: usize = 4;

/// Stateless resize engine backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    fn resize_sync(
        data: &[u8],
        target: Dimensions,
        kind: EmoteKind,
        prefer_webp: bool,
    ) -> Result<ResizedImage> {
        match kind {
            EmoteKind::Static => Self::resize_static(data, target, prefer_webp),
            EmoteKind::Animated => Self::resize_animated(data, target, prefer_webp),
        }
    }

    fn resize_static(data: &[u8], target: Dimensions, prefer_webp: bool) -> Result<ResizedImage> {
        let image = image::load_from_memory(data)?;
        let size = scale_to_fit(Dimensions::new(image.width(), image.height()), target);

        let resized = image
            .resize_exact(size.width, size.height, FilterType::Lanczos3)
            .to_rgba8();

        let (bytes, format) = if prefer_webp {
            (encode_webp(&resized)?, OutputFormat::Webp)
        } else {
            (encode_png(&resized)?, OutputFormat::Png)
        };

        Ok(ResizedImage {
            bytes,
            format,
            dimensions: size,
        })
    }

    fn resize_animated(
        data: &[u8],
        target: Dimensions,
        prefer_webp: bool,
    ) -> Result<ResizedImage> {
        let animation = decode_animation(data)?;
        let first = animation.frames.first().ok_or_else(|| {
            Error::Encode(ImageError::Decoding(DecodingError::new(
                ImageFormatHint::Unknown,
                "animation contains no frames",
            )))
        })?;
        let size = scale_to_fit(
            Dimensions::new(first.buffer().width(), first.buffer().height()),
            target,
        );

        // Box-like filter per frame; frame delays carry over unchanged
        let resized: Vec<Frame> = animation
            .frames
            .into_iter()
            .map(|frame| {
                let delay = frame.delay();
                let buffer =
                    imageops::resize(frame.buffer(), size.width, size.height, FilterType::Triangle);
                Frame::from_parts(buffer, 0, 0, delay)
            })
            .collect();

        debug!(
            "Encoding {} frames at {} (repeat {:?})",
            resized.len(),
            size,
            animation.repeat
        );

        let (bytes, format) = if prefer_webp {
            (
                encode_animated_webp(&resized, animation.repeat)?,
                OutputFormat::Webp,
            )
        } else {
            (encode_gif(resized, animation.repeat)?, OutputFormat::Gif)
        };

        Ok(ResizedImage {
            bytes,
            format,
            dimensions: size,
        })
    }
}

/// Frames of an animated source and how often it plays.
struct Animation {
    frames: Vec<Frame>,
    repeat: Repeat,
}

/// Decode every frame of an animated source. Formats without animation
/// support decode to a single frame.
fn decode_animation(data: &[u8]) -> Result<Animation> {
    let format = image::guess_format(data)?;
    let frames = match format {
        ImageFormat::Gif => GifDecoder::new(Cursor::new(data))?
            .into_frames()
            .collect_frames()?,
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(data))?;
            if decoder.has_animation() {
                decoder.into_frames().collect_frames()?
            } else {
                vec![Frame::new(image::load_from_memory(data)?.to_rgba8())]
            }
        }
        _ => vec![Frame::new(image::load_from_memory(data)?.to_rgba8())],
    };

    // WebP sources do not expose their loop count through `image`
    let repeat = match format {
        ImageFormat::Gif => gif_repeat(data),
        _ => Repeat::Infinite,
    };

    Ok(Animation { frames, repeat })
}

/// Loop setting from a GIF's NETSCAPE extension. No extension reads as
/// `Finite(0)`, a single play.
fn gif_repeat(data: &[u8]) -> Repeat {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);

    // The extension sits ahead of the first image descriptor
    let repeat = options.read_info(Cursor::new(data)).and_then(|mut decoder| {
        decoder.next_frame_info()?;
        Ok(decoder.repeat())
    });

    match repeat {
        Ok(gif::Repeat::Finite(count)) => Repeat::Finite(count),
        Ok(gif::Repeat::Infinite) => Repeat::Infinite,
        Err(e) => {
            debug!("Could not read GIF loop count, looping forever: {}", e);
            Repeat::Infinite
        }
    }
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, PngFilter::Adaptive)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )?;
    Ok(bytes)
}

fn encode_webp(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    WebPEncoder::new_lossless(&mut bytes).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(bytes)
}

fn encode_gif(frames: Vec<Frame>, repeat: Repeat) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, GIF_ENCODER_SPEED);
        encoder.set_repeat(repeat)?;
        encoder.encode_frames(frames)?;
    }
    Ok(bytes)
}

fn encode_animated_webp(frames: &[Frame], repeat: Repeat) -> Result<Vec<u8>> {
    let first = frames.first().ok_or_else(|| webp_error("no frames to encode"))?;

    let options = EncoderOptions {
        anim_params: AnimParams {
            loop_count: webp_loop_count(repeat),
        },
        encoding_config: Some(EncodingConfig {
            encoding_type: EncodingType::Lossless,
            quality: 100.0,
            method: WEBP_METHOD,
        }),
        ..Default::default()
    };
    let mut encoder = webp_animation::Encoder::new_with_options(first.buffer().dimensions(), options)
        .map_err(|e| webp_error(format!("{:?}", e)))?;

    let mut timestamp_ms: i32 = 0;
    for frame in frames {
        encoder
            .add_frame(frame.buffer().as_raw(), timestamp_ms)
            .map_err(|e| webp_error(format!("{:?}", e)))?;
        timestamp_ms = timestamp_ms.saturating_add(frame_duration_ms(frame.delay()));
    }

    let data = encoder
        .finalize(timestamp_ms)
        .map_err(|e| webp_error(format!("{:?}", e)))?;
    Ok(data.to_vec())
}

/// WebP counts plays (0 = forever); GIF counts repeats after the first play.
fn webp_loop_count(repeat: Repeat) -> i32 {
    match repeat {
        Repeat::Infinite => 0,
        Repeat::Finite(count) => i32::from(count) + 1,
    }
}

/// Frame timestamps must strictly increase, so every frame lasts at least 1ms.
fn frame_duration_ms(delay: Delay) -> i32 {
    let (numer, denom) = delay.numer_denom_ms();
    let millis = numer / denom.max(1);
    i32::try_from(millis).unwrap_or(i32::MAX).max(1)
}

fn webp_error(message: impl Into<String>) -> Error {
    let message: String = message.into();
    Error::Encode(ImageError::Encoding(EncodingError::new(
        ImageFormatHint::Exact(ImageFormat::WebP),
        message,
    )))
}

#[async_trait]
impl ResizeService for ImageProcessor {
    async fn resize(
        &self,
        image_data: &[u8],
        target: Dimensions,
        kind: EmoteKind,
        prefer_webp: bool,
    ) -> Result<ResizedImage> {
        let data = image_data.to_vec();
        tokio::task::spawn_blocking(move || Self::resize_sync(&data, target, kind, prefer_webp))
            .await
            .map_err(|e| Error::Invariant(format!("Resize task join error: {}", e)))?
    }
}
