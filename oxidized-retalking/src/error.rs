use std::error::Error;

/// Alias for boxed errors that can be sent across threads.
///
/// Used for errors of collaborators, such as network constructors and
/// checkpoint repositories.
pub type BoxedError = Box<dyn Error + Send + Sync>;
