use thiserror::Error;

use crate::format::SampleType;

/// Errors produced by an audio decoder. Any decoder failure is fatal for
/// the owning file source, which transitions to source-done.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to open audio stream: {0}")]
    Open(#[from] std::io::Error),
    #[error("unsupported audio format")]
    UnsupportedFormat,
    #[error("audio decode error: {0}")]
    Decode(String),
    #[error("audio seek error: {0}")]
    Seek(String),
}

/// Stream information reported by a decoder after a successful open.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DecoderInfo {
    pub channels: u32,
    pub sample_rate: u32,
    /// Total number of frames in the stream.
    pub frames: u64,
    pub seconds: f32,
    /// Size of the encoded stream in bytes.
    pub compressed_bytes: u64,
}

/// A blocking PCM frame provider wrapping some encoded audio stream.
///
/// Decoders produce frames of the sample type negotiated at open time;
/// [`Decoder::read_frames`] writes little-endian samples of that type.
pub trait Decoder: Send {
    fn info(&self) -> DecoderInfo;

    /// The sample type of the frames written by `read_frames`.
    fn sample_type(&self) -> SampleType;

    /// Decode up to `frames` frames into `dst`. Returns the number of
    /// frames actually produced; fewer than requested means end of
    /// stream.
    fn read_frames(&mut self, dst: &mut [u8], frames: usize) -> Result<usize, DecoderError>;

    /// Seek to an absolute frame index.
    fn seek(&mut self, frame: u64) -> Result<(), DecoderError>;
}

#[cfg(feature = "wav")]
pub mod wav {
    use super::{Decoder, DecoderError, DecoderInfo};
    use crate::dsp::Sample;
    use crate::format::SampleType;
    use crate::loader::SourceStream;

    /// WAV decoder backed by `hound`, converting to the requested output
    /// sample type.
    pub struct WavDecoder {
        reader: hound::WavReader<Box<dyn SourceStream>>,
        out_type: SampleType,
        info: DecoderInfo,
        scratch: Vec<f32>,
    }

    impl WavDecoder {
        pub fn new(
            stream: Box<dyn SourceStream>,
            requested: SampleType,
        ) -> Result<Self, DecoderError> {
            let reader =
                hound::WavReader::new(stream).map_err(|e| DecoderError::Decode(e.to_string()))?;
            let spec = reader.spec();
            if spec.channels == 0 || spec.sample_rate == 0 {
                return Err(DecoderError::UnsupportedFormat);
            }
            if spec.sample_format == hound::SampleFormat::Int && spec.bits_per_sample > 32 {
                return Err(DecoderError::UnsupportedFormat);
            }
            let frames = u64::from(reader.duration());
            let info = DecoderInfo {
                channels: u32::from(spec.channels),
                sample_rate: spec.sample_rate,
                frames,
                seconds: frames as f32 / spec.sample_rate as f32,
                compressed_bytes: frames
                    * u64::from(spec.channels)
                    * u64::from(spec.bits_per_sample / 8),
            };
            let out_type = match requested {
                SampleType::NotSet => SampleType::Int16,
                other => other,
            };
            Ok(Self {
                reader,
                out_type,
                info,
                scratch: Vec::new(),
            })
        }

        fn fill_scratch(&mut self, wanted_samples: usize) -> Result<(), DecoderError> {
            self.scratch.clear();
            let spec = self.reader.spec();
            match spec.sample_format {
                hound::SampleFormat::Float => {
                    for sample in self.reader.samples::<f32>().take(wanted_samples) {
                        let sample = sample.map_err(|e| DecoderError::Decode(e.to_string()))?;
                        self.scratch.push(sample);
                    }
                }
                hound::SampleFormat::Int => {
                    let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                    for sample in self.reader.samples::<i32>().take(wanted_samples) {
                        let sample = sample.map_err(|e| DecoderError::Decode(e.to_string()))?;
                        self.scratch.push(sample as f32 * scale);
                    }
                }
            }
            Ok(())
        }
    }

    fn write_samples<S: Sample>(dst: &mut [u8], samples: &[f32]) {
        for (chunk, &value) in dst.chunks_exact_mut(S::BYTES).zip(samples) {
            S::from_f32(value).write(chunk);
        }
    }

    impl Decoder for WavDecoder {
        fn info(&self) -> DecoderInfo {
            self.info
        }

        fn sample_type(&self) -> SampleType {
            self.out_type
        }

        fn read_frames(&mut self, dst: &mut [u8], frames: usize) -> Result<usize, DecoderError> {
            let channels = self.info.channels as usize;
            self.fill_scratch(frames * channels)?;

            // an incomplete trailing frame is dropped.
            let got_frames = self.scratch.len() / channels;
            let samples = &self.scratch[..got_frames * channels];
            match self.out_type {
                SampleType::Int16 => write_samples::<i16>(dst, samples),
                SampleType::Int32 => write_samples::<i32>(dst, samples),
                SampleType::Float32 => write_samples::<f32>(dst, samples),
                SampleType::NotSet => return Err(DecoderError::UnsupportedFormat),
            }
            Ok(got_frames)
        }

        fn seek(&mut self, frame: u64) -> Result<(), DecoderError> {
            self.reader
                .seek(frame as u32)
                .map_err(|e| DecoderError::Seek(e.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn write_test_wav(path: &std::path::Path, frames: u32) {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(path, spec).unwrap();
            for i in 0..frames {
                writer.write_sample((i % 100) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        fn open_decoder(path: &std::path::Path, requested: SampleType) -> WavDecoder {
            let file = std::fs::File::open(path).unwrap();
            let stream: Box<dyn crate::loader::SourceStream> =
                Box::new(std::io::BufReader::new(file));
            WavDecoder::new(stream, requested).unwrap()
        }

        #[test]
        fn info_and_frames() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("tone.wav");
            write_test_wav(&path, 800);

            let mut decoder = open_decoder(&path, SampleType::Int16);
            let info = decoder.info();
            assert_eq!(info.channels, 1);
            assert_eq!(info.sample_rate, 8000);
            assert_eq!(info.frames, 800);

            let mut dst = vec![0u8; 100 * 2];
            assert_eq!(decoder.read_frames(&mut dst, 100).unwrap(), 100);
            // every sample survives the normalize/denormalize round trip
            // to within one quantization step.
            for (i, chunk) in dst.chunks_exact(2).enumerate() {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                assert!((i32::from(sample) - (i as i32 % 100)).abs() <= 1);
            }
        }

        #[test]
        fn short_read_at_end_of_stream() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("short.wav");
            write_test_wav(&path, 10);

            let mut decoder = open_decoder(&path, SampleType::Int16);
            let mut dst = vec![0u8; 64 * 2];
            assert_eq!(decoder.read_frames(&mut dst, 64).unwrap(), 10);
            assert_eq!(decoder.read_frames(&mut dst, 64).unwrap(), 0);

            decoder.seek(0).unwrap();
            assert_eq!(decoder.read_frames(&mut dst, 64).unwrap(), 10);
        }

        #[test]
        fn converts_to_float() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("f32.wav");
            write_test_wav(&path, 8);

            let mut decoder = open_decoder(&path, SampleType::Float32);
            assert_eq!(decoder.sample_type(), SampleType::Float32);
            let mut dst = vec![0u8; 8 * 4];
            assert_eq!(decoder.read_frames(&mut dst, 8).unwrap(), 8);
            let first = f32::from_le_bytes([dst[0], dst[1], dst[2], dst[3]]);
            assert_eq!(first, 0.0);
        }
    }
}
