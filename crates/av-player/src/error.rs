//! Error taxonomy shared by every stage of a playback session.

/// Errors surfaced by the playback engine.
///
/// Only [`PlayerError::ResourceUnavailable`] and [`PlayerError::NoStream`] are fatal; they
/// abort session setup. [`PlayerError::Decode`] is isolated to a single unit or frame and
/// [`PlayerError::QueueAborted`] is the cooperative shutdown signal, not a failure.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// A thread or synchronization resource could not be created.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    /// The decoder rejected a unit or produced an unusable frame.
    #[error("decode error: {0}")]
    Decode(String),
    /// Quit was raised while waiting on a queue.
    #[error("queue aborted")]
    QueueAborted,
    /// The source has no stream of the requested kind.
    #[error("no {0} stream in source")]
    NoStream(&'static str),
    /// The container could not be read.
    #[error("demux error: {0}")]
    Demux(String),
    /// The audio output device could not be opened or driven.
    #[error("output error: {0}")]
    Output(String),
}

impl PlayerError {
    /// Whether this error is the shutdown signal rather than a real failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, PlayerError::QueueAborted)
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
