//! Background images for rendered clips.

use async_trait::async_trait;
use image::{imageops::FilterType, ImageBuffer, Rgb};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use narrate_models::{BackgroundMode, ProjectConfig, Resolution};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// File name of the generated title card.
pub const DEFAULT_BACKGROUND_FILE: &str = "background.png";
/// File name of the resized custom image.
pub const CUSTOM_BACKGROUND_FILE: &str = "custom_background.png";

/// Title font size as a share of the frame height.
const TITLE_FONT_RATIO: f64 = 0.08;

/// Produces the still image shown behind the narration.
#[async_trait]
pub trait BackgroundProvider: Send + Sync {
    /// Black canvas with `title` centred in white.
    async fn generate(&self, title: &str, resolution: Resolution, output: &Path)
        -> MediaResult<PathBuf>;

    /// `source` resized to exactly `resolution`.
    async fn resize_custom(
        &self,
        source: &Path,
        resolution: Resolution,
        output: &Path,
    ) -> MediaResult<PathBuf>;

    /// Background for a project, written under `dir`.
    ///
    /// A custom image that cannot be read falls back to the generated card.
    async fn prepare(
        &self,
        project_name: &str,
        config: &ProjectConfig,
        dir: &Path,
    ) -> MediaResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        if config.background == BackgroundMode::Custom {
            if let Some(source) = &config.custom_background_path {
                match self
                    .resize_custom(source, config.resolution, &dir.join(CUSTOM_BACKGROUND_FILE))
                    .await
                {
                    Ok(path) => return Ok(path),
                    Err(e) => error!(
                        "Custom background {} unusable, using default: {}",
                        source.display(),
                        e
                    ),
                }
            }
        }

        self.generate(project_name, config.resolution, &dir.join(DEFAULT_BACKGROUND_FILE))
            .await
    }
}

/// [`BackgroundProvider`] drawing the title with ffmpeg's `drawtext`.
///
/// Without a usable font (ffmpeg built without libfreetype/fontconfig) the
/// card degrades to a plain black canvas.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackground {
    runner: FfmpegRunner,
}

impl FfmpegBackground {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackgroundProvider for FfmpegBackground {
    async fn generate(
        &self,
        title: &str,
        resolution: Resolution,
        output: &Path,
    ) -> MediaResult<PathBuf> {
        let cmd = title_card_command(title, resolution, output);
        match self.runner.run(&cmd).await {
            Ok(()) => {
                info!("Generated background image: {}", output.display());
                Ok(output.to_path_buf())
            }
            Err(e) => {
                warn!("Title card rendering failed, using plain canvas: {}", e);
                plain_canvas(resolution, output).await
            }
        }
    }

    async fn resize_custom(
        &self,
        source: &Path,
        resolution: Resolution,
        output: &Path,
    ) -> MediaResult<PathBuf> {
        if !source.exists() {
            return Err(MediaError::FileNotFound(source.to_path_buf()));
        }
        let source = source.to_path_buf();
        let target = output.to_path_buf();
        tokio::task::spawn_blocking(move || -> MediaResult<PathBuf> {
            let img = image::open(&source)?;
            img.resize_exact(resolution.width, resolution.height, FilterType::Lanczos3)
                .save(&target)?;
            Ok(target)
        })
        .await
        .map_err(|e| MediaError::internal(format!("resize task failed: {}", e)))?
    }
}

fn title_card_command(title: &str, resolution: Resolution, output: &Path) -> FfmpegCommand {
    let font_size = (f64::from(resolution.height) * TITLE_FONT_RATIO).round() as u32;
    let filter = format!(
        "drawtext=text='{}':fontcolor=white:fontsize={}:x=(w-text_w)/2:y=(h-text_h)/2",
        escape_drawtext(title),
        font_size.max(1)
    );
    FfmpegCommand::new(output)
        .input_with_args(
            ["-f".to_string(), "lavfi".to_string()],
            format!("color=c=black:s={}", resolution),
        )
        .video_filter(filter)
        .single_frame()
}

/// Escape text for a single-quoted `drawtext` value inside a filter graph.
fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str(r"\\\\"),
            '\'' => out.push_str(r"'\\\''"),
            ':' => out.push_str(r"\:"),
            '%' => out.push_str(r"\%"),
            '\n' | '\r' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

async fn plain_canvas(resolution: Resolution, output: &Path) -> MediaResult<PathBuf> {
    let target = output.to_path_buf();
    tokio::task::spawn_blocking(move || -> MediaResult<PathBuf> {
        let canvas: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(resolution.width, resolution.height, Rgb([0, 0, 0]));
        canvas.save(&target)?;
        Ok(target)
    })
    .await
    .map_err(|e| MediaError::internal(format!("canvas task failed: {}", e)))?
}
