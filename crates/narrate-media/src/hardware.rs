//! Hardware-aware encoder recommendations.
//!
//! Clips are a still image over speech, so encoding is cheap per frame and the
//! main risks are oversubscribing small machines and wasting bitrate. The
//! advice is best-effort: any detection failure yields the fixed defaults.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use narrate_models::{EncodingConfig, Resolution};

use crate::command::check_ffmpeg;

const MIN_BITRATE_K: f64 = 500.0;
const MAX_BITRATE_K: f64 = 5000.0;
/// Still backgrounds need well under the usual bits per pixel.
const STILL_IMAGE_FACTOR: f64 = 0.6;

/// Hardware encoder usable through ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuEncoder {
    Nvenc,
    VideoToolbox,
}

/// What the advisor knows about the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareProfile {
    pub logical_cores: usize,
    pub physical_cores: usize,
    /// Total memory, if it could be read
    pub memory_gb: Option<f64>,
    pub gpu: Option<GpuEncoder>,
}

impl HardwareProfile {
    /// Inspect the current host.
    pub async fn detect() -> Self {
        let logical_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let physical_cores = read_physical_cores().unwrap_or((logical_cores / 2).max(1));
        let memory_gb = read_memory_gb();
        let gpu = detect_gpu_encoder().await;

        let profile = Self {
            logical_cores,
            physical_cores,
            memory_gb,
            gpu,
        };
        info!(
            "Hardware: {} logical / {} physical cores, memory {:?} GB, gpu {:?}",
            profile.logical_cores, profile.physical_cores, profile.memory_gb, profile.gpu
        );
        profile
    }

    /// Encoder settings for clips at `resolution` and `fps`.
    pub fn advise(&self, resolution: Resolution, fps: u32) -> EncodingConfig {
        let cores = self.physical_cores.max(1);
        let mut config = EncodingConfig::default();

        // Memory tier decides how lean the rate-control buffer is
        let memory_efficient = self.memory_gb.is_some_and(|gb| gb < 8.0);

        // Core count decides threads and preset
        let (threads, preset) = match cores {
            0..=2 => (1, "ultrafast"),
            3..=4 => (2, "ultrafast"),
            5..=8 => ((cores - 1).clamp(2, 4), "superfast"),
            _ => ((cores - 2).clamp(4, 8), "faster"),
        };
        config = config.with_threads(threads as u32).with_preset(preset);

        let bitrate_k = recommended_bitrate_k(resolution, fps, self.memory_gb);
        config = config.with_bitrate(format!("{}k", bitrate_k));
        if memory_efficient {
            config = config.with_buffer_size(format!("{}k", bitrate_k * 2));
        }

        match self.gpu {
            Some(GpuEncoder::Nvenc) => config.with_nvenc(),
            Some(GpuEncoder::VideoToolbox) => config.with_videotoolbox(),
            None => config,
        }
    }
}

/// Bitrate in kbit/s for a static background, clamped to 500-5000.
fn recommended_bitrate_k(resolution: Resolution, fps: u32, memory_gb: Option<f64>) -> u32 {
    let mut bitrate = resolution.pixels() as f64 * f64::from(fps) / 1000.0 * STILL_IMAGE_FACTOR;
    if memory_gb.is_some_and(|gb| gb < 4.0) {
        bitrate *= 0.8;
    }
    bitrate.clamp(MIN_BITRATE_K, MAX_BITRATE_K) as u32
}

/// Recommend encoding settings for this host, or the fixed defaults
/// (with the project's `bitrate`) when detection is disabled.
pub async fn recommend_encoding(
    resolution: Resolution,
    fps: u32,
    bitrate: &str,
    detect: bool,
) -> EncodingConfig {
    if !detect {
        return EncodingConfig::default().with_bitrate(bitrate);
    }
    let config = HardwareProfile::detect().await.advise(resolution, fps);
    info!(
        "Encoder: codec={}, preset={}, threads={}, bitrate={}",
        config.codec, config.preset, config.threads, config.bitrate
    );
    config
}

/// Count distinct (physical id, core id) pairs in /proc/cpuinfo.
fn read_physical_cores() -> Option<usize> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_physical_cores(&cpuinfo)
}

fn parse_physical_cores(cpuinfo: &str) -> Option<usize> {
    let mut cores = std::collections::HashSet::new();
    let mut physical_id = None;
    for line in cpuinfo.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "physical id" => physical_id = value.trim().parse::<u32>().ok(),
            "core id" => {
                if let Ok(core) = value.trim().parse::<u32>() {
                    cores.insert((physical_id.unwrap_or(0), core));
                }
            }
            _ => {}
        }
    }
    (!cores.is_empty()).then_some(cores.len())
}

fn read_memory_gb() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_gb(&meminfo)
}

fn parse_meminfo_gb(meminfo: &str) -> Option<f64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / (1024.0 * 1024.0))
}

/// Hardware encoder that ffmpeg lists and the host can drive.
async fn detect_gpu_encoder() -> Option<GpuEncoder> {
    check_ffmpeg().ok()?;

    let wanted = if cfg!(target_os = "macos") {
        GpuEncoder::VideoToolbox
    } else if which::which("nvidia-smi").is_ok() {
        GpuEncoder::Nvenc
    } else {
        return None;
    };

    let output = match Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!("Could not list ffmpeg encoders: {}", e);
            return None;
        }
    };
    let listing = String::from_utf8_lossy(&output.stdout);
    let name = match wanted {
        GpuEncoder::Nvenc => "h264_nvenc",
        GpuEncoder::VideoToolbox => "h264_videotoolbox",
    };
    listing.contains(name).then_some(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(physical_cores: usize, memory_gb: Option<f64>) -> HardwareProfile {
        HardwareProfile {
            logical_cores: physical_cores * 2,
            physical_cores,
            memory_gb,
            gpu: None,
        }
    }

    #[test]
    fn test_core_tiers() {
        let hd = Resolution::new(1920, 1080);
        let small = profile(2, Some(16.0)).advise(hd, 30);
        assert_eq!((small.threads, small.preset.as_str()), (1, "ultrafast"));

        let quad = profile(4, Some(16.0)).advise(hd, 30);
        assert_eq!((quad.threads, quad.preset.as_str()), (2, "ultrafast"));

        let eight = profile(8, Some(16.0)).advise(hd, 30);
        assert_eq!((eight.threads, eight.preset.as_str()), (4, "superfast"));

        let big = profile(32, Some(64.0)).advise(hd, 30);
        assert_eq!((big.threads, big.preset.as_str()), (8, "faster"));
    }

    #[test]
    fn test_bitrate_is_clamped() {
        assert_eq!(recommended_bitrate_k(Resolution::new(1920, 1080), 30, Some(16.0)), 5000);
        assert_eq!(recommended_bitrate_k(Resolution::new(320, 240), 10, Some(16.0)), 500);
        // 640*360*24/1000*0.6 = 3317.76
        assert_eq!(recommended_bitrate_k(Resolution::new(640, 360), 24, Some(16.0)), 3317);
        assert_eq!(recommended_bitrate_k(Resolution::new(640, 360), 24, Some(2.0)), 2654);
    }

    #[test]
    fn test_low_memory_sets_buffer() {
        let config = profile(4, Some(3.0)).advise(Resolution::new(1280, 720), 30);
        assert!(config.buffer_size.is_some());
        let config = profile(4, None).advise(Resolution::new(1280, 720), 30);
        assert!(config.buffer_size.is_none());
    }

    #[test]
    fn test_gpu_overrides_codec() {
        let mut p = profile(8, Some(16.0));
        p.gpu = Some(GpuEncoder::Nvenc);
        let config = p.advise(Resolution::default(), 30);
        assert_eq!(config.codec, "h264_nvenc");
        assert!(config.hardware);
    }

    #[test]
    fn test_proc_parsers() {
        let cpuinfo = "processor\t: 0\nphysical id\t: 0\ncore id\t: 0\n\n\
                       processor\t: 1\nphysical id\t: 0\ncore id\t: 0\n\n\
                       processor\t: 2\nphysical id\t: 0\ncore id\t: 1\n";
        assert_eq!(parse_physical_cores(cpuinfo), Some(2));
        assert_eq!(parse_physical_cores("processor: 0\n"), None);

        let meminfo = "MemTotal:       16384000 kB\nMemFree:  1 kB\n";
        let gb = parse_meminfo_gb(meminfo).unwrap();
        assert!((gb - 15.625).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_defaults_without_detection() {
        let config = recommend_encoding(Resolution::default(), 30, "1500k", false).await;
        assert_eq!(config.bitrate, "1500k");
        assert_eq!(config.codec, "libx264");
    }
}
