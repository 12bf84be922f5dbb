//! Hand-off of map errors to the external viewer

use crate::output::write_atomic;
use std::path::Path;
use tracing::{error, info};
use world::UserError;

/// Write a map error as JSON for the viewer to display
pub fn write_user_error(path: &Path, err: &UserError) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(err)?;
    write_atomic(path, &json)?;
    info!(path = %path.display(), "Wrote error diagnostics");
    Ok(())
}

/// Report a failed compile to the viewer
///
/// Map errors keep their markers and tile snapshot; rule and configuration
/// problems are written with the `Configuration` context.
pub fn report_compile_error(path: &Path, err: &logic::Error) -> anyhow::Result<UserError> {
    let user = err.to_user_error();
    error!("{}", user.message);
    write_user_error(path, &user)?;
    Ok(user)
}

/// A failure before compiling starts, such as an unreadable rules file
pub fn configuration_error(err: &anyhow::Error) -> UserError {
    UserError::new(format!("{err:#}")).with_context("Configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmf::glam::DVec3;

    #[test]
    fn test_error_round_trips_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compile_error.json");
        let err = UserError::new("Item connects to itself")
            .with_context("connections")
            .with_points([DVec3::new(128.0, 0.0, 64.0)])
            .with_text_list(["button_1".to_string()]);

        write_user_error(&path, &err).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let back: UserError = serde_json::from_str(&text).unwrap();
        assert_eq!(back, err);
        assert!(text.contains("Item connects to itself"));
    }

    #[test]
    fn test_load_failures_become_configuration_errors() {
        let err = anyhow::anyhow!("missing file").context("Failed to read rules rules.txt");
        let user = configuration_error(&err);
        assert_eq!(user.context, "Configuration");
        assert_eq!(user.message, "Failed to read rules rules.txt: missing file");
    }
}
