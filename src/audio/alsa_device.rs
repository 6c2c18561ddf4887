//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording) with float samples.
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, period_size, "Capture")
}

/// Open a PCM device for playback with float samples.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::FloatLE)
            .with_context(|| format!("{} device '{}' does not accept float samples", dir_name, device))?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if period_size > 0 {
            hwp.set_period_size_near(period_size as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    // The pipeline does not resample, so the rate has to match exactly
    if actual_rate != sample_rate {
        anyhow::bail!(
            "{} device '{}' negotiated {} Hz, {} Hz required (try a plughw: device)",
            dir_name,
            device,
            actual_rate,
            sample_rate
        );
    }

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}
