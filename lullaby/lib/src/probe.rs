//! Audio duration probing.

use std::path::Path;
use std::time::Duration;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::errors::EngineError;

/// Reads the playable length of an audio file.
pub trait MediaProbe: Send + Sync {
    /// Decode enough of `path` to know its duration.
    fn duration(&self, path: &Path) -> Result<Duration, EngineError>;
}

/// [`MediaProbe`] backed by `symphonia` container demuxers.
///
/// Uses the frame count from the container header when present and falls
/// back to summing packet durations (demux only, no decode) otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaProbe;

impl MediaProbe for SymphoniaProbe {
    fn duration(&self, path: &Path) -> Result<Duration, EngineError> {
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::MissingResource {
                path: path.to_path_buf(),
            },
            _ => EngineError::Io(e),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| decode_error(path, e))?;

        let track = probed
            .format
            .default_track()
            .ok_or_else(|| EngineError::Decode {
                path: path.to_path_buf(),
                reason: "no audio track found".into(),
            })?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let frames = match params.n_frames {
            Some(frames) => frames,
            None => {
                debug!(path = %path.display(), "No frame count in header, scanning packets");
                let mut frames = 0u64;
                while let Ok(packet) = probed.format.next_packet() {
                    if packet.track_id() == track_id {
                        frames += packet.dur;
                    }
                }
                frames
            }
        };

        let seconds = if let Some(time_base) = params.time_base {
            frames as f64 * f64::from(time_base.numer) / f64::from(time_base.denom)
        } else if let Some(rate) = params.sample_rate {
            frames as f64 / f64::from(rate)
        } else {
            0.0
        };

        if !(seconds > 0.0) {
            return Err(EngineError::Decode {
                path: path.to_path_buf(),
                reason: "could not determine duration".into(),
            });
        }

        debug!(path = %path.display(), seconds, "Probed audio duration");
        Duration::try_from_secs_f64(seconds).map_err(|e| EngineError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

fn decode_error(path: &Path, e: symphonia::core::errors::Error) -> EngineError {
    EngineError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
