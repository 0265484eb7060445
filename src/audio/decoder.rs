extern crate ffmpeg_next;

use std::path::Path;

use crate::{Error, Result};

/// Decoded mono PCM audio.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PcmAudio {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration of the audio, in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    fn index_of(&self, secs: f64) -> usize {
        let idx = (secs.max(0.0) * self.sample_rate as f64).round() as usize;
        idx.min(self.samples.len())
    }

    /// Returns the samples in `[start, end)`, clamped to the bounds of the audio.
    pub fn slice(&self, start: f64, end: f64) -> &[i16] {
        let (start, end) = (self.index_of(start), self.index_of(end));
        if start >= end {
            return &[];
        }
        &self.samples[start..end]
    }
}

/// Produces mono PCM from a media file.
pub trait AudioSource {
    fn decode(&self, path: &Path) -> Result<PcmAudio>;
}

/// Thin wrapper around the native `FFmpeg` audio decoder.
struct Decoder {
    decoder: ffmpeg_next::codec::decoder::Audio,
}

impl Decoder {
    fn build_threading_config() -> ffmpeg_next::codec::threading::Config {
        let mut config = ffmpeg_next::codec::threading::Config::default();
        config.count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        config.kind = ffmpeg_next::codec::threading::Type::Frame;
        config
    }

    fn from_stream(stream: ffmpeg_next::format::stream::Stream, threaded: bool) -> Result<Self> {
        let ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let mut decoder = ctx.decoder();

        if threaded {
            decoder.set_threading(Self::build_threading_config());
        }

        let decoder = decoder.audio()?;

        Ok(Self { decoder })
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::packet::Packet) -> Result<()> {
        Ok(self.decoder.send_packet(packet)?)
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(self.decoder.send_eof()?)
    }

    fn receive_frame(&mut self, frame: &mut ffmpeg_next::frame::Audio) -> Result<()> {
        Ok(self.decoder.receive_frame(frame)?)
    }
}

fn build_resampler(
    frame: &ffmpeg_next::frame::Audio,
    sample_rate: u32,
) -> Result<ffmpeg_next::software::resampling::Context> {
    Ok(frame.resampler(
        ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
        ffmpeg_next::ChannelLayout::MONO,
        sample_rate,
    )?)
}

fn append_samples(frame: &ffmpeg_next::frame::Audio, out: &mut Vec<i16>) {
    // Mono S16, so each sample is exactly two bytes. Note that `data` is a fixed-size buffer;
    // only the first `samples * 2` bytes are valid.
    let raw = &frame.data(0)[..frame.samples() * 2];
    out.extend(raw.chunks_exact(2).map(|b| i16::from_ne_bytes([b[0], b[1]])));
}

/// Decodes the best audio stream of any FFmpeg-supported container into mono S16 PCM at a
/// fixed sample rate.
#[derive(Clone, Debug)]
pub struct FfmpegSource {
    sample_rate: u32,
    threaded_decoding: bool,
}

impl FfmpegSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            threaded_decoding: false,
        }
    }

    /// Returns a new [FfmpegSource] with `threaded_decoding` set to the provided value.
    pub fn with_threaded_decoding(mut self, threaded_decoding: bool) -> Self {
        self.threaded_decoding = threaded_decoding;
        self
    }

    fn drain_decoder(
        &self,
        decoder: &mut Decoder,
        resampler: &mut Option<ffmpeg_next::software::resampling::Context>,
        samples: &mut Vec<i16>,
    ) -> Result<()> {
        let mut frame = ffmpeg_next::frame::Audio::empty();
        let mut frame_resampled = ffmpeg_next::frame::Audio::empty();

        while decoder.receive_frame(&mut frame).is_ok() {
            if resampler.is_none() {
                *resampler = Some(build_resampler(&frame, self.sample_rate)?);
            }
            let mut delay = match resampler.as_mut() {
                Some(r) => match r.run(&frame, &mut frame_resampled) {
                    Ok(v) => v,
                    // The input format changed mid-stream, so rebuild the resampler.
                    Err(ffmpeg_next::Error::InputChanged) => {
                        let mut local_resampler = build_resampler(&frame, self.sample_rate)?;
                        let delay = local_resampler.run(&frame, &mut frame_resampled)?;
                        *resampler = Some(local_resampler);
                        delay
                    }
                    Err(e) => return Err(e.into()),
                },
                None => unreachable!("resampler is initialized above"),
            };

            loop {
                append_samples(&frame_resampled, samples);
                if delay.is_none() {
                    break;
                }
                delay = match resampler.as_mut() {
                    Some(r) => r.flush(&mut frame_resampled)?,
                    None => None,
                };
            }
        }

        Ok(())
    }
}

impl AudioSource for FfmpegSource {
    fn decode(&self, path: &Path) -> Result<PcmAudio> {
        let span = tracing::span!(tracing::Level::TRACE, "decode");
        let _enter = span.enter();

        let mut ctx = ffmpeg_next::format::input(&path)?;
        let stream = super::util::find_best_audio_stream(&ctx)
            .ok_or_else(|| Error::NoAudioStream(path.to_owned()))?;
        let stream_idx = stream.index();
        let mut decoder = Decoder::from_stream(stream, self.threaded_decoding)?;

        tracing::debug!("starting audio decode for {}", path.display());

        let mut samples = Vec::new();
        let mut resampler = None;

        let audio_packets = ctx
            .packets()
            .filter(|(s, _)| s.index() == stream_idx)
            .map(|(_, p)| p);

        for p in audio_packets {
            if p.pts().map(|pts| pts < 0).unwrap_or(false) {
                // Skip packets with an invalid PTS. This can happen if, e.g., the
                // file was trimmed.
                // See: https://stackoverflow.com/a/41032346/845275
                continue;
            }
            decoder.send_packet(&p)?;
            self.drain_decoder(&mut decoder, &mut resampler, &mut samples)?;
        }

        decoder.send_eof()?;
        self.drain_decoder(&mut decoder, &mut resampler, &mut samples)?;

        let audio = PcmAudio::new(samples, self.sample_rate);

        tracing::debug!(
            samples = audio.samples().len(),
            duration = audio.duration(),
            "completed audio decode for {}",
            path.display(),
        );

        Ok(audio)
    }
}
