//! Errors raised while serializing an image.

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("IR verification failed: {0}")]
    Verification(String),
    #[error("failed to write image to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
