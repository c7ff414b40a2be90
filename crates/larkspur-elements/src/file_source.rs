use std::io::{Cursor, Read};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use larkspur_core::{
    random_string, AudioCaches, BufferAllocator, Decoder, DecoderError, Element, EventQueue,
    FileInfo, Format, Loader, PcmBuffer, Port, PrepareParams, SampleType, SourceStream,
};

/// How the file source reads its backing file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IOStrategy {
    /// Whatever the loader hands back.
    #[default]
    Default,
    /// Read the whole file into memory up front and decode from there.
    Memory,
    /// Decode incrementally from the stream.
    Stream,
    /// Open the decoder on a background task; the source produces
    /// nothing until the open completes.
    Async,
}

struct OpenTask {
    receiver: mpsc::Receiver<Result<Box<dyn Decoder>, DecoderError>>,
    join: Option<JoinHandle<()>>,
}

/// Cached compressed file contents exposed as a seekable stream.
struct SharedFileBuffer(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedFileBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A source element wrapping an audio file decoder.
///
/// Decoded frames are produced at the file's native rate and channel
/// count with the requested sample type; any rate or channel conversion
/// is the job of adjacent elements. On end of stream the play count
/// increments and, while it stays below the loop count, the decoder
/// seeks back to the start. Decoder failures are fatal and mark the
/// source done.
pub struct FileSource {
    name: String,
    id: String,
    file: String,
    sample_type: SampleType,
    loop_count: u32,
    enable_pcm_caching: bool,
    enable_file_caching: bool,
    io_strategy: IOStrategy,
    decoder: Option<Box<dyn Decoder>>,
    pcm_buffer: Option<Arc<PcmBuffer>>,
    open_task: Option<OpenTask>,
    cache_accum: Option<Vec<u8>>,
    caches: Option<AudioCaches>,
    format: Format,
    frames_read: u64,
    play_count: u32,
    done: bool,
    output: Port,
}

impl FileSource {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self::with_id(name, random_string(10), file)
    }

    pub fn with_id(
        name: impl Into<String>,
        id: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            file: file.into(),
            sample_type: SampleType::Int16,
            loop_count: 1,
            enable_pcm_caching: false,
            enable_file_caching: false,
            io_strategy: IOStrategy::Default,
            decoder: None,
            pcm_buffer: None,
            open_task: None,
            cache_accum: None,
            caches: None,
            format: Format::default(),
            frames_read: 0,
            play_count: 0,
            done: false,
            output: Port::new("out"),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file
    }

    pub fn set_file_name(&mut self, file: impl Into<String>) {
        self.file = file.into();
    }

    pub fn set_sample_type(&mut self, sample_type: SampleType) {
        self.sample_type = sample_type;
    }

    pub fn set_loop_count(&mut self, count: u32) {
        self.loop_count = count.max(1);
    }

    pub fn enable_pcm_caching(&mut self, on_off: bool) {
        self.enable_pcm_caching = on_off;
    }

    pub fn enable_file_caching(&mut self, on_off: bool) {
        self.enable_file_caching = on_off;
    }

    pub fn set_io_strategy(&mut self, strategy: IOStrategy) {
        self.io_strategy = strategy;
    }

    /// Read the stream parameters of an audio file without decoding it,
    /// consulting and filling the process-wide file info cache.
    pub fn probe_file(
        loader: &dyn Loader,
        caches: &AudioCaches,
        file: &str,
    ) -> Result<FileInfo, DecoderError> {
        if let Some(info) = caches.find_file_info(file) {
            return Ok(info);
        }
        let stream = loader.open_audio_stream(file)?;
        let decoder = make_decoder(file, stream, SampleType::Int16)?;
        let info = decoder.info();
        let info = FileInfo {
            channels: info.channels,
            frames: info.frames,
            sample_rate: info.sample_rate,
            seconds: info.seconds,
            bytes: info.compressed_bytes,
        };
        caches.store_file_info(file, info);
        Ok(info)
    }

    fn effective_sample_type(&self) -> SampleType {
        match self.sample_type {
            SampleType::NotSet => SampleType::Int16,
            other => other,
        }
    }

    fn open_stream(
        &self,
        loader: &dyn Loader,
        caches: &AudioCaches,
    ) -> Result<Box<dyn SourceStream>, DecoderError> {
        if self.enable_file_caching {
            if let Some(bytes) = caches.find_file_buffer(&self.file) {
                return Ok(Box::new(Cursor::new(SharedFileBuffer(bytes))));
            }
            let mut stream = loader.open_audio_stream(&self.file)?;
            let mut data = Vec::new();
            stream.read_to_end(&mut data)?;
            let bytes = Arc::new(data);
            caches.store_file_buffer(&self.file, bytes.clone());
            return Ok(Box::new(Cursor::new(SharedFileBuffer(bytes))));
        }
        let stream = loader.open_audio_stream(&self.file)?;
        if self.io_strategy == IOStrategy::Memory {
            let mut stream = stream;
            let mut data = Vec::new();
            stream.read_to_end(&mut data)?;
            return Ok(Box::new(Cursor::new(data)));
        }
        Ok(stream)
    }

    fn read_cached(&mut self, dst: &mut larkspur_core::Buffer, wanted: usize) -> usize {
        let frame_size = self.format.frame_size() as usize;
        let pcm = self.pcm_buffer.clone().expect("cached pcm buffer");
        let total_frames = (pcm.data.len() / frame_size) as u64;
        let mut produced = 0;
        while produced < wanted && !self.done {
            if total_frames == 0 {
                self.done = true;
                break;
            }
            let available = (total_frames - self.frames_read) as usize;
            let count = available.min(wanted - produced);
            let src = self.frames_read as usize * frame_size;
            let dst_off = produced * frame_size;
            dst.as_bytes_mut()[dst_off..dst_off + count * frame_size]
                .copy_from_slice(&pcm.data[src..src + count * frame_size]);
            self.frames_read += count as u64;
            produced += count;
            // the done flag must flip on the same tick that serves the
            // final frames, so the provenance tag on the last buffer
            // already says so.
            if self.frames_read >= total_frames {
                self.play_count += 1;
                if self.play_count >= self.loop_count {
                    self.done = true;
                    break;
                }
                self.frames_read = 0;
            }
        }
        produced
    }

    fn read_decoded(&mut self, dst: &mut larkspur_core::Buffer, wanted: usize) -> usize {
        let Some(mut decoder) = self.decoder.take() else {
            return 0;
        };
        let total_frames = decoder.info().frames;
        let frame_size = self.format.frame_size() as usize;
        let mut produced = 0;
        while produced < wanted && !self.done {
            let request = wanted - produced;
            let dst_off = produced * frame_size;
            let got = match decoder.read_frames(&mut dst.as_bytes_mut()[dst_off..], request) {
                Ok(got) => got,
                Err(error) => {
                    log::error!(
                        "file source '{}' decoder read failed. [file={}, error={}]",
                        self.name,
                        self.file,
                        error
                    );
                    self.done = true;
                    break;
                }
            };
            if got > 0 {
                if self.play_count == 0 {
                    if let Some(accum) = &mut self.cache_accum {
                        accum.extend_from_slice(
                            &dst.as_bytes()[dst_off..dst_off + got * frame_size],
                        );
                    }
                }
                produced += got;
                self.frames_read += got as u64;
            }
            // when the stream length is known the end is detected on
            // the same tick that yields the final frames, so the done
            // flag makes it onto that buffer's provenance tag.
            if got < request || (total_frames > 0 && self.frames_read >= total_frames) {
                // end of stream.
                self.play_count += 1;
                if self.play_count == 1 {
                    if let (Some(accum), Some(caches)) =
                        (self.cache_accum.take(), self.caches.as_ref())
                    {
                        log::debug!(
                            "file source '{}' caching decoded pcm. [file={}, bytes={}]",
                            self.name,
                            self.file,
                            accum.len()
                        );
                        caches.store_pcm_buffer(
                            &self.file,
                            Arc::new(PcmBuffer {
                                format: self.format,
                                data: accum,
                            }),
                        );
                    }
                }
                if self.play_count >= self.loop_count {
                    self.done = true;
                    break;
                }
                if let Err(error) = decoder.seek(0) {
                    log::error!(
                        "file source '{}' decoder seek failed. [file={}, error={}]",
                        self.name,
                        self.file,
                        error
                    );
                    self.done = true;
                    break;
                }
                self.frames_read = 0;
            }
        }
        self.decoder = Some(decoder);
        produced
    }
}

fn make_decoder(
    file: &str,
    stream: Box<dyn SourceStream>,
    sample_type: SampleType,
) -> Result<Box<dyn Decoder>, DecoderError> {
    if file.to_ascii_lowercase().ends_with(".wav") {
        return Ok(Box::new(larkspur_core::WavDecoder::new(
            stream,
            sample_type,
        )?));
    }
    Err(DecoderError::UnsupportedFormat)
}

impl Element for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "FileSource"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        self.done
    }

    fn prepare(&mut self, loader: &dyn Loader, params: &PrepareParams) -> bool {
        self.caches = Some(params.caches.clone());
        let caching = self.enable_pcm_caching && params.enable_pcm_caching;

        if caching {
            if let Some(pcm) = params.caches.find_pcm_buffer(&self.file) {
                log::debug!(
                    "file source '{}' using cached pcm. [file={}]",
                    self.name,
                    self.file
                );
                self.format = pcm.format;
                self.pcm_buffer = Some(pcm);
                self.output.set_format(self.format);
                return true;
            }
        }

        match self.io_strategy {
            IOStrategy::Async => {
                // the format must be known for negotiation before the
                // background open finishes; a header probe is cheap.
                let info = match Self::probe_file(loader, &params.caches, &self.file) {
                    Ok(info) => info,
                    Err(error) => {
                        log::error!(
                            "file source '{}' failed to probe file. [file={}, error={}]",
                            self.name,
                            self.file,
                            error
                        );
                        return false;
                    }
                };
                self.format = Format::new(
                    self.effective_sample_type(),
                    info.sample_rate,
                    info.channels,
                );
                let stream = match self.open_stream(loader, &params.caches) {
                    Ok(stream) => stream,
                    Err(error) => {
                        log::error!(
                            "file source '{}' failed to open file. [file={}, error={}]",
                            self.name,
                            self.file,
                            error
                        );
                        return false;
                    }
                };
                let (sender, receiver) = mpsc::channel();
                let file = self.file.clone();
                let sample_type = self.sample_type;
                let join = std::thread::spawn(move || {
                    let _ = sender.send(make_decoder(&file, stream, sample_type));
                });
                self.open_task = Some(OpenTask {
                    receiver,
                    join: Some(join),
                });
            }
            _ => {
                let stream = match self.open_stream(loader, &params.caches) {
                    Ok(stream) => stream,
                    Err(error) => {
                        log::error!(
                            "file source '{}' failed to open file. [file={}, error={}]",
                            self.name,
                            self.file,
                            error
                        );
                        return false;
                    }
                };
                let decoder = match make_decoder(&self.file, stream, self.sample_type) {
                    Ok(decoder) => decoder,
                    Err(error) => {
                        log::error!(
                            "file source '{}' failed to open decoder. [file={}, error={}]",
                            self.name,
                            self.file,
                            error
                        );
                        return false;
                    }
                };
                let info = decoder.info();
                params.caches.store_file_info(
                    &self.file,
                    FileInfo {
                        channels: info.channels,
                        frames: info.frames,
                        sample_rate: info.sample_rate,
                        seconds: info.seconds,
                        bytes: info.compressed_bytes,
                    },
                );
                self.format =
                    Format::new(decoder.sample_type(), info.sample_rate, info.channels);
                self.decoder = Some(decoder);
            }
        }

        if !self.format.is_valid() {
            log::error!(
                "file source '{}' has an invalid stream format. [file={}, format={}]",
                self.name,
                self.file,
                self.format
            );
            return false;
        }
        if caching {
            self.cache_accum = Some(Vec::new());
        }
        self.output.set_format(self.format);
        true
    }

    fn process(&mut self, allocator: &mut BufferAllocator, _events: &mut EventQueue, ms: u32) {
        if self.done {
            return;
        }
        if self.open_task.is_some() {
            let result = self
                .open_task
                .as_mut()
                .unwrap()
                .receiver
                .try_recv();
            match result {
                Ok(opened) => {
                    let mut task = self.open_task.take().unwrap();
                    if let Some(join) = task.join.take() {
                        let _ = join.join();
                    }
                    match opened {
                        Ok(decoder) => self.decoder = Some(decoder),
                        Err(error) => {
                            log::error!(
                                "file source '{}' async open failed. [file={}, error={}]",
                                self.name,
                                self.file,
                                error
                            );
                            self.done = true;
                            return;
                        }
                    }
                }
                // still opening, produce nothing this tick.
                Err(mpsc::TryRecvError::Empty) => return,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.open_task = None;
                    self.done = true;
                    return;
                }
            }
        }

        let frame_size = self.format.frame_size() as usize;
        let wanted = (self.format.sample_rate / 1000) as usize * ms as usize;
        if wanted == 0 || frame_size == 0 {
            return;
        }
        let mut handle = allocator.allocate(wanted * frame_size);
        Arc::make_mut(&mut handle).set_format(self.format);
        let produced = if self.pcm_buffer.is_some() {
            self.read_cached(Arc::make_mut(&mut handle), wanted)
        } else {
            self.read_decoded(Arc::make_mut(&mut handle), wanted)
        };
        if produced == 0 {
            allocator.recycle(handle);
            return;
        }
        Arc::make_mut(&mut handle).set_byte_size(produced * frame_size);
        self.output.push_buffer(handle);
    }

    fn shutdown(&mut self) {
        // drop the channel; a pending open thread finishes on its own.
        self.open_task = None;
        self.decoder = None;
        self.pcm_buffer = None;
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&self, index: usize) -> &Port {
        assert!(index == 0, "no such output port");
        &self.output
    }

    fn output_port_mut(&mut self, index: usize) -> &mut Port {
        assert!(index == 0, "no such output port");
        &mut self.output
    }
}
