use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// No descriptor is registered for the requested syscall.
  NotFound,
  /// The caller passed an argument the current invocation cannot satisfy.
  InvalidParameter(&'static str),
  /// The syscall is known by number but its parameters are not described.
  DetailsUnknown,
  /// The operation is not supported on this platform.
  FeatureNotAvailable,
  /// The operation is not valid at this point of the invocation.
  InvalidCall,
}

impl Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::NotFound => f.write_str("syscall not found"),
      Error::InvalidParameter(what) => write!(f, "invalid parameter: {what}"),
      Error::DetailsUnknown => f.write_str("syscall details unknown"),
      Error::FeatureNotAvailable => f.write_str("feature not available"),
      Error::InvalidCall => f.write_str("invalid call for the current syscall phase"),
    }
  }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
