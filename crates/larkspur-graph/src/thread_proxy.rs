use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use larkspur_core::{ElementEvent, Format};

use crate::source::{Source, SourceCommand, SourceError};

/// Number of exchange buffers in the pool.
const NUM_BUFFERS: usize = 3;
/// How long the device may wait for the very first buffer.
const FIRST_BUFFER_WAIT: Duration = Duration::from_millis(1000);
/// Bounded wait for subsequent buffers; past this the device gets
/// silence instead of stalling inside the stream callback.
const BUFFER_WAIT: Duration = Duration::from_millis(100);

struct ProxyBuffer {
    data: Vec<u8>,
    len: usize,
    offset: usize,
}

#[derive(Default)]
struct State {
    empty: VecDeque<ProxyBuffer>,
    fill: VecDeque<ProxyBuffer>,
    commands: VecDeque<SourceCommand>,
    events: VecDeque<ElementEvent>,
    error: Option<SourceError>,
    shutdown: bool,
    source_done: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

/// Runs a [`Source`] on its own thread, decoupling graph execution
/// (which may block on decoder I/O) from the device stream callback.
///
/// The worker and the device thread exchange a small fixed pool of
/// byte buffers through two bounded queues guarded by one mutex and
/// one condvar: the worker pops an empty buffer, fills it from the
/// inner source and pushes it onto the fill queue; the device pops
/// filled buffers and returns consumed ones. Commands travel
/// device-to-worker and are applied before the next fill; events
/// travel worker-to-device. A failure inside the worker is captured
/// and re-raised from the device side on the next fill.
pub struct ThreadProxySource {
    name: String,
    format: Format,
    shared: Arc<Shared>,
    /// inner source, present until the worker takes it at prepare time.
    source: Option<Box<dyn Source>>,
    thread: Option<JoinHandle<()>>,
    first_buffer: bool,
}

impl ThreadProxySource {
    pub fn new(source: Box<dyn Source>) -> Self {
        let name = source.name().to_owned();
        let format = source.format();
        Self {
            name,
            format,
            shared: Arc::new(Shared::default()),
            source: Some(source),
            thread: None,
            first_buffer: true,
        }
    }

    fn shutdown_worker(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let mut state = self.shared.state.lock().unwrap();
        state.empty.clear();
        state.fill.clear();
        state.commands.clear();
        state.events.clear();
    }
}

fn worker_loop(mut source: Box<dyn Source>, shared: Arc<Shared>) {
    loop {
        // wait until there is an empty buffer to fill or we're told to
        // go away.
        let mut buffer = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    drop(state);
                    source.shutdown();
                    return;
                }
                if let Some(buffer) = state.empty.pop_front() {
                    break buffer;
                }
                state = shared.cond.wait(state).unwrap();
            }
        };

        // apply pending commands outside the lock, before the fill, so
        // a command never lands mid-tick.
        let commands: Vec<SourceCommand> = {
            let mut state = shared.state.lock().unwrap();
            state.commands.drain(..).collect()
        };
        for command in commands {
            source.recv_command(command);
        }

        // this may block on decoder I/O or cache fills; no locks held.
        buffer.offset = 0;
        let result = source.fill_buffer(&mut buffer.data);

        let mut state = shared.state.lock().unwrap();
        let mut done = false;
        match result {
            Ok(0) => {
                done = true;
                state.empty.push_back(buffer);
            }
            Ok(count) => {
                buffer.len = count;
                state.fill.push_back(buffer);
            }
            Err(error) => {
                log::error!(
                    "audio worker source error. [source={}, error={}]",
                    source.name(),
                    error
                );
                done = true;
                state.error = Some(error);
                state.empty.push_back(buffer);
            }
        }
        while let Some(event) = source.next_event() {
            state.events.push_back(event);
        }
        if done {
            state.source_done = true;
        }
        shared.cond.notify_all();
        if done {
            drop(state);
            source.shutdown();
            return;
        }
    }
}

impl Source for ThreadProxySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> Format {
        self.format
    }

    fn prepare(&mut self, buffer_size_ms: u32) -> Result<(), SourceError> {
        let Some(mut source) = self.source.take() else {
            return Ok(());
        };
        source.prepare(buffer_size_ms)?;

        let bytes = self.format.millisecond_bytes() as usize * buffer_size_ms as usize;
        if bytes == 0 {
            return Err(SourceError::Failed(format!(
                "audio proxy source '{}' has no valid format",
                self.name
            )));
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            for _ in 0..NUM_BUFFERS {
                state.empty.push_back(ProxyBuffer {
                    data: vec![0; bytes],
                    len: 0,
                    offset: 0,
                });
            }
        }
        let shared = self.shared.clone();
        let thread = std::thread::Builder::new()
            .name(format!("audio-{}", self.name))
            .spawn(move || worker_loop(source, shared))
            .map_err(|e| SourceError::Failed(e.to_string()))?;
        self.thread = Some(thread);
        log::debug!(
            "audio proxy source started. [source={}, buffer={}ms]",
            self.name,
            buffer_size_ms
        );
        Ok(())
    }

    fn fill_buffer(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(error) = state.error.take() {
            return Err(error);
        }

        let timeout = if self.first_buffer {
            FIRST_BUFFER_WAIT
        } else {
            BUFFER_WAIT
        };
        let deadline = Instant::now() + timeout;
        while state.fill.is_empty() {
            if state.source_done || state.shutdown {
                if let Some(error) = state.error.take() {
                    return Err(error);
                }
                return Ok(0);
            }
            let now = Instant::now();
            if now >= deadline {
                // the worker is late; report the underrun and keep the
                // device going with silence.
                log::warn!("audio buffer underrun. [source={}]", self.name);
                dst.fill(0);
                return Ok(dst.len());
            }
            let (guard, _) = self
                .shared
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            if let Some(error) = state.error.take() {
                return Err(error);
            }
        }
        self.first_buffer = false;

        let buffer = state.fill.front_mut().expect("filled buffer");
        let available = buffer.len - buffer.offset;
        let count = available.min(dst.len());
        dst[..count].copy_from_slice(&buffer.data[buffer.offset..buffer.offset + count]);
        buffer.offset += count;
        if buffer.offset == buffer.len {
            let buffer = state.fill.pop_front().expect("filled buffer");
            state.empty.push_back(buffer);
            self.shared.cond.notify_all();
        }
        Ok(count)
    }

    fn has_more(&self, _bytes_read: u64) -> bool {
        let state = self.shared.state.lock().unwrap();
        !state.fill.is_empty() || !state.source_done
    }

    fn shutdown(&mut self) {
        self.shutdown_worker();
    }

    fn recv_command(&mut self, cmd: SourceCommand) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.commands.push_back(cmd);
        }
        self.shared.cond.notify_all();
    }

    fn next_event(&mut self) -> Option<ElementEvent> {
        self.shared.state.lock().unwrap().events.pop_front()
    }
}

impl Drop for ThreadProxySource {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown_worker();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larkspur_core::SampleType;

    /// Deterministic byte source: produces `total` sequential bytes.
    struct CountingSource {
        format: Format,
        produced: usize,
        total: usize,
    }

    impl CountingSource {
        fn new(total: usize) -> Self {
            Self {
                format: Format::new(SampleType::Int16, 8000, 1),
                produced: 0,
                total,
            }
        }
    }

    impl Source for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }
        fn format(&self) -> Format {
            self.format
        }
        fn fill_buffer(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
            let count = dst.len().min(self.total - self.produced);
            for (i, byte) in dst[..count].iter_mut().enumerate() {
                *byte = ((self.produced + i) % 251) as u8;
            }
            self.produced += count;
            Ok(count)
        }
        fn has_more(&self, _bytes: u64) -> bool {
            self.produced < self.total
        }
        fn recv_command(&mut self, _cmd: SourceCommand) {}
    }

    struct FailingSource {
        format: Format,
    }

    impl Source for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }
        fn format(&self) -> Format {
            self.format
        }
        fn fill_buffer(&mut self, _dst: &mut [u8]) -> Result<usize, SourceError> {
            Err(SourceError::Failed("broken stream".into()))
        }
        fn has_more(&self, _bytes: u64) -> bool {
            true
        }
        fn recv_command(&mut self, _cmd: SourceCommand) {}
    }

    #[test]
    fn bytes_stay_in_producer_order() {
        // 10 ms buffers at 16 bytes/ms.
        let total = 16 * 10 * 4;
        let mut proxy = ThreadProxySource::new(Box::new(CountingSource::new(total)));
        proxy.prepare(10).unwrap();

        let mut collected = Vec::new();
        let mut chunk = vec![0u8; 64];
        loop {
            let count = proxy.fill_buffer(&mut chunk).unwrap();
            if count == 0 {
                break;
            }
            collected.extend_from_slice(&chunk[..count]);
        }
        assert_eq!(collected.len(), total);
        for (i, &byte) in collected.iter().enumerate() {
            assert_eq!(byte, (i % 251) as u8);
        }
        proxy.shutdown();
    }

    #[test]
    fn worker_error_reaches_the_device_thread() {
        let mut proxy = ThreadProxySource::new(Box::new(FailingSource {
            format: Format::new(SampleType::Int16, 8000, 1),
        }));
        proxy.prepare(10).unwrap();

        let mut chunk = vec![0u8; 64];
        let mut saw_error = false;
        for _ in 0..100 {
            match proxy.fill_buffer(&mut chunk) {
                Err(SourceError::Failed(message)) => {
                    assert_eq!(message, "broken stream");
                    saw_error = true;
                    break;
                }
                Err(other) => panic!("unexpected error {other}"),
                Ok(0) => break,
                Ok(_) => {}
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(saw_error);
        proxy.shutdown();
    }

    #[test]
    fn shutdown_joins_and_drains() {
        let mut proxy = ThreadProxySource::new(Box::new(CountingSource::new(1 << 20)));
        proxy.prepare(10).unwrap();
        let mut chunk = vec![0u8; 32];
        let _ = proxy.fill_buffer(&mut chunk).unwrap();
        proxy.shutdown();

        let state = proxy.shared.state.lock().unwrap();
        assert!(state.shutdown);
        assert!(state.fill.is_empty());
        assert!(state.empty.is_empty());
    }
}
