//! Error types for the logic crate

use thiserror::Error;
use world::UserError;

/// Result type alias for rule parsing and evaluation
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a conditions run
#[derive(Debug, Error)]
pub enum Error {
    /// A mapper-facing problem with the map itself
    #[error(transparent)]
    User(#[from] Box<UserError>),

    /// Flag name not known to the registry
    #[error("\"{0}\" is not a valid condition flag")]
    UnknownFlag(String),

    /// Result name not known to the registry
    #[error("\"{0}\" is not a valid condition result")]
    UnknownAction(String),

    /// Malformed condition block
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// A known result with unusable parameters
    #[error("Invalid \"{name}\" result: {reason}")]
    InvalidAction { name: String, reason: String },

    /// Failure inside the map-wide state (templates, connections)
    #[error(transparent)]
    World(world::Error),

    /// Malformed rule or map text
    #[error("Map error: {0}")]
    Map(#[from] vmf::Error),
}

impl Error {
    pub(crate) fn invalid_action(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidAction {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// The mapper-facing error, if this is one
    pub fn user_error(&self) -> Option<&UserError> {
        match self {
            Error::User(err) => Some(err),
            Error::World(world::Error::User(err)) => Some(err),
            _ => None,
        }
    }

    /// What the diagnostic viewer shows for this error
    ///
    /// Mapper-facing errors pass through unchanged. Everything else is a
    /// problem with the rules or configuration and is reported under the
    /// `Configuration` context.
    pub fn to_user_error(&self) -> UserError {
        match self.user_error() {
            Some(user) => user.clone(),
            None => UserError::new(self.to_string()).with_context("Configuration"),
        }
    }
}

impl From<world::Error> for Error {
    fn from(err: world::Error) -> Self {
        match err {
            world::Error::User(user) => Error::User(user),
            other => Error::World(other),
        }
    }
}

impl From<UserError> for Error {
    fn from(err: UserError) -> Self {
        Error::User(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_user_error_is_lifted() {
        let err: Error = world::Error::from(UserError::new("Leak")).into();
        assert!(matches!(err, Error::User(_)));
        assert_eq!(err.user_error().map(|u| u.message.as_str()), Some("Leak"));

        let err: Error = world::Error::UnknownTemplate("X".into()).into();
        assert!(err.user_error().is_none());
        assert_eq!(err.to_string(), "Unknown template \"X\"");
    }

    #[test]
    fn test_configuration_errors_reach_the_viewer() {
        let user = Error::UnknownFlag("Bogus".into()).to_user_error();
        assert_eq!(user.context, "Configuration");
        assert!(user.message.contains("Bogus"));

        let leak = UserError::new("Leak").with_context("Tiles");
        assert_eq!(Error::from(leak.clone()).to_user_error(), leak);
    }
}
