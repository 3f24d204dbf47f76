use thiserror::Error;

/// Why a received frame could not be turned into a snapshot.
///
/// Both variants are expected operational noise: the frame is dropped, the
/// session keeps receiving, and nothing is published.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The frame's hex projection is not the length of any known layout.
    #[error("unrecognized frame size: {0} hex chars")]
    UnrecognizedFrameSize(usize),

    /// A field slice failed to parse. Either a malformed frame or an
    /// out-of-date field table for this firmware.
    #[error("failed to extract field {field} at [{start},{end}): {source}")]
    FieldExtraction {
        field: &'static str,
        start: usize,
        end: usize,
        #[source]
        source: std::num::ParseIntError,
    },
}

#[derive(Error, Debug)]
pub enum ListenerError {
    /// Fatal to startup; surfaced to the caller and never retried internally.
    #[error("failed to bind TCP listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
