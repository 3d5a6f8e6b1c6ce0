use crate::value::Value;

/// Errors produced by the embedding layer and by host callbacks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
  /// The heap has exceeded its configured memory limit.
  #[error("out of memory")]
  OutOfMemory,

  /// A GC handle was used after the underlying allocation was freed (or the handle is otherwise
  /// malformed).
  #[error("invalid handle")]
  InvalidHandle,

  /// A GC handle allocated by a different context group was passed to this group.
  #[error("handle belongs to a different context group")]
  ForeignHandle,

  /// An attempted prototype mutation would introduce a cycle, or a traversal found one.
  #[error("prototype cycle")]
  PrototypeCycle,

  /// A prototype chain traversal exceeded a hard upper bound.
  #[error("prototype chain too deep")]
  PrototypeChainTooDeep,

  /// A class definition was rejected when building a [`Class`](crate::Class).
  #[error("invalid class definition: {0}")]
  InvalidClassDefinition(String),

  /// A thread-affine operation was attempted on a thread other than the group's bound thread.
  #[error("operation must run on the context group's bound thread")]
  WrongThread,

  #[error("type error: {0}")]
  TypeError(&'static str),

  /// Attempted to call a non-callable value.
  #[error("value is not callable")]
  NotCallable,

  /// Attempted to construct a non-constructable value.
  #[error("value is not a constructor")]
  NotConstructable,

  /// A JavaScript exception raised by a callback. This is catchable from JS.
  #[error("uncaught exception")]
  Throw(Value),
}

impl VmError {
  /// Returns `true` for script-level exceptions (as opposed to contract violations).
  pub fn is_throw(&self) -> bool {
    matches!(self, VmError::Throw(_))
  }
}

/// Discards a script exception, producing `T::default()` instead.
///
/// This is the "no exception sink" mode: callers that are not interested in script exceptions can
/// drop them without turning them into fatal errors. Contract violations still propagate.
pub fn swallow_exception<T: Default>(result: Result<T, VmError>) -> Result<T, VmError> {
  match result {
    Err(VmError::Throw(value)) => {
      tracing::trace!(?value, "discarding script exception");
      Ok(T::default())
    }
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn swallow_only_discards_throws() {
    let thrown: Result<bool, VmError> = Err(VmError::Throw(Value::from("boom")));
    assert!(matches!(swallow_exception(thrown), Ok(false)));

    let oom: Result<bool, VmError> = Err(VmError::OutOfMemory);
    assert!(matches!(swallow_exception(oom), Err(VmError::OutOfMemory)));
  }
}
