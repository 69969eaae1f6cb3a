//! Error taxonomy for engine, stream, and backend operations.

use thiserror::Error;

pub type AudioResult<T> = Result<T, AudioError>;

#[derive(Debug, Error)]
pub enum AudioError {
    /// The named source could not be opened.
    #[error("audio source not found: {0}")]
    NotFound(String),

    /// The byte stream is not a container/codec this engine decodes.
    #[error("unsupported audio data: {0}")]
    Unsupported(String),

    /// No backend level could be brought up.
    #[error("audio backend init failed: {0}")]
    BackendInitFailed(String),

    /// A fixed table (groups, voices) is full.
    #[error("out of audio resources: {0}")]
    OutOfResources(&'static str),

    /// Operation on an engine or handle in the wrong lifecycle state.
    #[error("invalid audio state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_subject() {
        let e = AudioError::NotFound("music/intro.ogg".into());
        assert!(e.to_string().contains("music/intro.ogg"));
        let e = AudioError::Unsupported("no known magic".into());
        assert!(e.to_string().contains("unsupported"));
        let e = AudioError::OutOfResources("group table");
        assert!(e.to_string().contains("group table"));
    }

    #[test]
    fn io_errors_convert() {
        fn fails() -> AudioResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(AudioError::Io(_))));
    }
}
