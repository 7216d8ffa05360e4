//! Layered configuration trait

use crate::Result;

/// Configuration that can be loaded from the environment, merged and validated
///
/// Layering order used by [`ConfigBuilder::from_env_with_defaults`]: values
/// found in the environment win, anything left unset keeps its default.
pub trait ConfigBuilder: Default + Clone {
    /// Reject values the framework cannot run with.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Start from defaults and apply every `{prefix}{FIELD}` variable that is set.
    fn from_env(prefix: &str) -> Result<Self>;

    /// Overlay `other` on top of `self`.
    fn merge(&mut self, other: Self) -> &mut Self;

    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    fn from_env_with_defaults(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.merge(Self::from_env(prefix)?);
        config.validate()?;
        Ok(config)
    }
}
