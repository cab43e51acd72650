use thiserror::Error;

#[derive(Debug, Error)]
pub enum SvpgError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Particle architectures drifted apart; element-wise gradient pairing
    /// would be meaningless, so this aborts before the coupling step.
    #[error("particle parameter vectors differ in length ({0} vs {1})")]
    ParameterMismatch(i64, i64),

    #[error("value portrait needs at least two observation dimensions, got {0}")]
    PortraitDims(usize),

    #[error(transparent)]
    Tch(#[from] tch::TchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}
