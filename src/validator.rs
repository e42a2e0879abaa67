//! Well-formedness checks applied to every candidate response.

use crate::error::InvalidResponse;
use crate::response::Response;

/// Check that `candidate` can be handed to a caller or written to a partition.
///
/// Pure: the candidate is only read.
pub fn validate(candidate: Option<&Response>) -> Result<(), InvalidResponse> {
  let response = candidate.ok_or(InvalidResponse::Missing)?;

  if !(100..=599).contains(&response.status) {
    return Err(InvalidResponse::StatusOutOfRange(response.status));
  }

  if let Some(declared) = response.declared_length() {
    let declared = declared
      .trim()
      .parse::<u64>()
      .map_err(|_| InvalidResponse::MalformedLength(declared.to_string()))?;
    let actual = response.body.len() as u64;
    if declared != actual {
      return Err(InvalidResponse::LengthMismatch { declared, actual });
    }
  }

  Ok(())
}

/// Convenience for call sites that hold an owned candidate.
pub fn is_valid(response: &Response) -> bool {
  validate(Some(response)).is_ok()
}
