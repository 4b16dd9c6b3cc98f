use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use log::{info, warn};

use super::error::{AnalysisError, Result};
use super::spectrum::SampleFeed;

/// Default input device streaming mono samples into a [`SampleFeed`].
///
/// The stream stops when this value is dropped.
pub struct LiveCapture {
    #[allow(dead_code)]
    stream: Stream,
    sample_rate: u32,
    device_name: String,
}

impl LiveCapture {
    pub fn start(feed: SampleFeed) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AnalysisError::source_failed("no input device available"))?;

        let config = device
            .default_input_config()
            .map_err(|e| AnalysisError::source_failed(format!("failed to get default input config: {e}")))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio device: {}", device_name);
        info!("Audio config: {:?}", config);

        let sample_rate = config.sample_rate().0;
        let stream = Self::create_input_stream(&device, &config.into(), feed)?;
        stream
            .play()
            .map_err(|e| AnalysisError::source_failed(format!("failed to start input stream: {e}")))?;

        Ok(Self {
            stream,
            sample_rate,
            device_name,
        })
    }

    fn create_input_stream(device: &Device, config: &StreamConfig, feed: SampleFeed) -> Result<Stream> {
        let channels = config.channels as usize;

        info!(
            "Creating input stream with {} channels at {} Hz",
            channels, config.sample_rate.0
        );

        device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    };

                    if !feed.push(mono) {
                        warn!("Spectrum source gone, dropping captured audio");
                    }
                },
                |err| {
                    warn!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AnalysisError::source_failed(format!("failed to build input stream: {e}")))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}
