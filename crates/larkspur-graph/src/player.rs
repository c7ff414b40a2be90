use std::collections::VecDeque;

use ahash::AHashMap;
use thiserror::Error;

use larkspur_core::ElementEvent;

use crate::source::{Source, SourceCommand, SourceError};

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("audio source failed to prepare: {0}")]
    Source(#[from] SourceError),
    #[error("audio device failed to open stream: {0}")]
    Device(String),
}

/// Outcome of a stream's playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Playing,
    Paused,
    Complete,
    Error,
}

/// An event reported by the player about one of its streams.
#[derive(Debug)]
pub enum PlayerEvent {
    /// The stream finished (successfully or not) and was retired.
    SourceComplete { id: u64, status: TrackStatus },
    /// An element event surfaced from inside the stream's source.
    SourceEvent { id: u64, event: ElementEvent },
}

/// One playing stream on a device. The stream owns its source and
/// forwards control traffic to it.
///
/// Streams are thread-affine (platform audio handles usually are);
/// they live and die on the thread that owns the player.
pub trait DeviceStream {
    fn state(&self) -> StreamState;
    fn pause(&mut self);
    fn resume(&mut self);
    /// Give the stream a chance to make progress. Callback-driven
    /// devices ignore this; poll-driven devices pull audio here.
    fn poll(&mut self) {}
    fn send_command(&mut self, cmd: SourceCommand);
    fn next_event(&mut self) -> Option<ElementEvent>;
    fn shutdown(&mut self);
}

/// A playback device capable of consuming byte-pull sources. The
/// concrete platform device lives behind this seam.
pub trait Device {
    fn open_stream(
        &mut self,
        source: Box<dyn Source>,
        buffer_size_ms: u32,
    ) -> Result<Box<dyn DeviceStream>, PlayerError>;
}

struct StreamEntry {
    stream: Box<dyn DeviceStream>,
    complete_reported: bool,
}

/// Owns the playback device and the set of playing streams, routes
/// commands to them and surfaces their events.
pub struct Player {
    device: Box<dyn Device>,
    buffer_size_ms: u32,
    streams: AHashMap<u64, StreamEntry>,
    next_id: u64,
    events: VecDeque<PlayerEvent>,
}

impl Player {
    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            device,
            buffer_size_ms: 20,
            streams: AHashMap::new(),
            next_id: 1,
            events: VecDeque::new(),
        }
    }

    /// Set the per-stream buffering in milliseconds. Applies to
    /// streams started after the call.
    pub fn set_buffer_size(&mut self, millisecs: u32) {
        self.buffer_size_ms = millisecs;
    }

    /// Start playing a source. Returns the stream id used to address
    /// the stream in subsequent calls.
    pub fn play(&mut self, mut source: Box<dyn Source>) -> Result<u64, PlayerError> {
        source.prepare(self.buffer_size_ms)?;
        let stream = self.device.open_stream(source, self.buffer_size_ms)?;
        let id = self.next_id;
        self.next_id += 1;
        self.streams.insert(
            id,
            StreamEntry {
                stream,
                complete_reported: false,
            },
        );
        log::debug!("audio player started stream. [id={id}]");
        Ok(id)
    }

    pub fn pause(&mut self, id: u64) {
        if let Some(entry) = self.streams.get_mut(&id) {
            entry.stream.pause();
        }
    }

    pub fn resume(&mut self, id: u64) {
        if let Some(entry) = self.streams.get_mut(&id) {
            entry.stream.resume();
        }
    }

    /// Stop a stream and discard its queued buffers and events.
    pub fn cancel(&mut self, id: u64) {
        if let Some(mut entry) = self.streams.remove(&id) {
            entry.stream.shutdown();
            log::debug!("audio player cancelled stream. [id={id}]");
        }
    }

    /// Route a command to the named element inside the stream's graph.
    pub fn send_command(&mut self, id: u64, cmd: SourceCommand) {
        match self.streams.get_mut(&id) {
            Some(entry) => entry.stream.send_command(cmd),
            None => log::warn!("audio player has no such stream. [id={id}]"),
        }
    }

    /// Poll every stream once and collect pending events.
    pub fn process_once(&mut self) {
        let mut retired = Vec::new();
        for (&id, entry) in self.streams.iter_mut() {
            entry.stream.poll();
            while let Some(event) = entry.stream.next_event() {
                self.events.push_back(PlayerEvent::SourceEvent { id, event });
            }
            let state = entry.stream.state();
            if (state == StreamState::Complete || state == StreamState::Error)
                && !entry.complete_reported
            {
                entry.complete_reported = true;
                let status = if state == StreamState::Complete {
                    TrackStatus::Success
                } else {
                    TrackStatus::Failure
                };
                self.events
                    .push_back(PlayerEvent::SourceComplete { id, status });
                retired.push(id);
            }
        }
        for id in retired {
            if let Some(mut entry) = self.streams.remove(&id) {
                entry.stream.shutdown();
            }
        }
    }

    /// Get the next pending player event, if any.
    pub fn poll_event(&mut self) -> Option<PlayerEvent> {
        self.events.pop_front()
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        for (_, mut entry) in self.streams.drain() {
            entry.stream.shutdown();
        }
    }
}

/// A headless device that pulls audio synchronously whenever its
/// streams are polled. Useful for tests and machines without audio.
pub struct NullDevice {
    /// how much audio one poll consumes, in milliseconds.
    chunk_ms: u32,
}

impl NullDevice {
    pub fn new(chunk_ms: u32) -> Self {
        Self { chunk_ms }
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Device for NullDevice {
    fn open_stream(
        &mut self,
        source: Box<dyn Source>,
        _buffer_size_ms: u32,
    ) -> Result<Box<dyn DeviceStream>, PlayerError> {
        let bytes = source.format().millisecond_bytes() as usize * self.chunk_ms as usize;
        if bytes == 0 {
            return Err(PlayerError::Device(format!(
                "source '{}' has no valid format",
                source.name()
            )));
        }
        Ok(Box::new(NullStream {
            source,
            scratch: vec![0; bytes],
            state: StreamState::Playing,
            bytes_read: 0,
        }))
    }
}

struct NullStream {
    source: Box<dyn Source>,
    scratch: Vec<u8>,
    state: StreamState,
    bytes_read: u64,
}

impl DeviceStream for NullStream {
    fn state(&self) -> StreamState {
        self.state
    }

    fn pause(&mut self) {
        if self.state == StreamState::Playing {
            self.state = StreamState::Paused;
        }
    }

    fn resume(&mut self) {
        if self.state == StreamState::Paused {
            self.state = StreamState::Playing;
        }
    }

    fn poll(&mut self) {
        if self.state != StreamState::Playing {
            return;
        }
        match self.source.fill_buffer(&mut self.scratch) {
            Ok(0) => {
                if !self.source.has_more(self.bytes_read) {
                    self.state = StreamState::Complete;
                }
            }
            Ok(count) => self.bytes_read += count as u64,
            Err(error) => {
                log::error!("audio stream failed. [error={error}]");
                self.state = StreamState::Error;
            }
        }
    }

    fn send_command(&mut self, cmd: SourceCommand) {
        self.source.recv_command(cmd);
    }

    fn next_event(&mut self) -> Option<ElementEvent> {
        self.source.next_event()
    }

    fn shutdown(&mut self) {
        self.source.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use larkspur_core::{Format, SampleType};

    struct FiniteSource {
        remaining: usize,
    }

    impl Source for FiniteSource {
        fn name(&self) -> &str {
            "finite"
        }
        fn format(&self) -> Format {
            Format::new(SampleType::Int16, 8000, 1)
        }
        fn fill_buffer(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
            let count = dst.len().min(self.remaining);
            dst[..count].fill(0);
            self.remaining -= count;
            Ok(count)
        }
        fn has_more(&self, _bytes: u64) -> bool {
            self.remaining > 0
        }
        fn recv_command(&mut self, _cmd: SourceCommand) {}
    }

    #[test]
    fn stream_completes_and_is_retired() {
        let mut player = Player::new(Box::new(NullDevice::new(10)));
        let id = player
            .play(Box::new(FiniteSource { remaining: 16 * 25 }))
            .unwrap();
        assert_eq!(player.num_streams(), 1);

        let mut complete = None;
        for _ in 0..100 {
            player.process_once();
            while let Some(event) = player.poll_event() {
                if let PlayerEvent::SourceComplete { id, status } = event {
                    complete = Some((id, status));
                }
            }
            if complete.is_some() {
                break;
            }
        }
        let (done_id, status) = complete.expect("stream should complete");
        assert_eq!(done_id, id);
        assert_eq!(status, TrackStatus::Success);
        assert_eq!(player.num_streams(), 0);
    }

    #[test]
    fn paused_stream_makes_no_progress() {
        let mut player = Player::new(Box::new(NullDevice::new(10)));
        let id = player
            .play(Box::new(FiniteSource { remaining: 16 * 100 }))
            .unwrap();
        player.pause(id);
        for _ in 0..50 {
            player.process_once();
        }
        assert!(player.poll_event().is_none());
        assert_eq!(player.num_streams(), 1);

        player.resume(id);
        let mut complete = false;
        for _ in 0..100 {
            player.process_once();
            while let Some(event) = player.poll_event() {
                if matches!(event, PlayerEvent::SourceComplete { .. }) {
                    complete = true;
                }
            }
        }
        assert!(complete);
    }

    #[test]
    fn cancel_removes_the_stream() {
        let mut player = Player::new(Box::new(NullDevice::new(10)));
        let id = player
            .play(Box::new(FiniteSource { remaining: 16 * 100 }))
            .unwrap();
        player.cancel(id);
        assert_eq!(player.num_streams(), 0);
    }
}
