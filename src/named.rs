use crate::error::ConfigurationError;

const RESERVED: &[&str] = &["none", "all"];

/// Anything registered with the driver under a user-chosen name: a PV,
/// interaction, integrator, bouncer, wall, belonging checker, or plugin.
pub trait Named {
    fn name(&self) -> &str;
}

/// Reject duplicate, empty, underscore-prefixed, or reserved (`none`/`all`)
/// names at registration time (spec.md §4.7 phase 1).
pub fn validate_name(name: &str, already_used: impl Iterator<Item = String>) -> Result<(), ConfigurationError> {
    if name.is_empty() || name.starts_with('_') || RESERVED.contains(&name) {
        return Err(ConfigurationError::ReservedName(name.to_string()));
    }
    for used in already_used {
        if used == name {
            return Err(ConfigurationError::DuplicateName(name.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_and_empty() {
        assert!(validate_name("none", std::iter::empty()).is_err());
        assert!(validate_name("all", std::iter::empty()).is_err());
        assert!(validate_name("", std::iter::empty()).is_err());
        assert!(validate_name("_hidden", std::iter::empty()).is_err());
        assert!(validate_name("water", std::iter::empty()).is_ok());
    }

    #[test]
    fn rejects_duplicates() {
        let used = vec!["water".to_string(), "walls".to_string()];
        assert!(validate_name("water", used.into_iter()).is_err());
    }
}
