use thiserror::Error;

use larkspur_core::{Command, DecoderError, ElementEvent, Format};

/// A stream-level failure, transportable across the worker thread
/// boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("audio decoder failure: {0}")]
    Decoder(#[from] DecoderError),
    #[error("audio source failure: {0}")]
    Failed(String),
    #[error("audio worker thread is gone")]
    WorkerGone,
}

/// An element command wrapped with its destination element name, routed
/// from the player through a source into a graph.
pub struct SourceCommand {
    pub dest: String,
    pub command: Command,
}

impl SourceCommand {
    pub fn new(dest: impl Into<String>, command: Command) -> Self {
        Self {
            dest: dest.into(),
            command,
        }
    }
}

/// A pull-style producer of PCM bytes for a playback device.
///
/// The device invokes [`Source::fill_buffer`] from its stream callback;
/// implementations must not block beyond the bounded waits documented
/// on the thread proxy. Control traffic flows the other way through
/// [`Source::recv_command`] and [`Source::next_event`].
pub trait Source: Send {
    /// The name of the stream, e.g. for the OS-level mixer display.
    fn name(&self) -> &str;

    /// The PCM format of the produced bytes.
    fn format(&self) -> Format;

    /// Called once before playback starts with the device's buffer
    /// size in milliseconds.
    fn prepare(&mut self, _buffer_size_ms: u32) -> Result<(), SourceError> {
        Ok(())
    }

    /// Produce up to `dst.len()` bytes of PCM. Returning 0 signals end
    /// of stream.
    fn fill_buffer(&mut self, dst: &mut [u8]) -> Result<usize, SourceError>;

    /// Whether more audio can be expected after `bytes_read` bytes.
    fn has_more(&self, bytes_read: u64) -> bool;

    /// Release resources. Called when the stream goes away.
    fn shutdown(&mut self) {}

    /// Deliver a routed element command. Takes effect on a following
    /// processing tick, never the one in flight.
    fn recv_command(&mut self, cmd: SourceCommand);

    /// Drain the next pending element event, if any.
    fn next_event(&mut self) -> Option<ElementEvent> {
        None
    }
}
