use crate::error::Result;
use crate::results::ResultSet;
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// Constants listed per fragment by an earlier run.
///
/// When a fragment has known constants they are appended to its
/// description, so the class listing can take them into account.
#[derive(Debug, Clone, Default)]
pub struct ConstantCatalog {
    results: ResultSet,
}

impl ConstantCatalog {
    /// Loads the catalog from a constants results file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let results = ResultSet::load(path, None)?;
        debug!(
            "Loaded constants for {} fragment(s) from {}",
            results.len(),
            path.display()
        );
        Ok(Self { results })
    }

    /// Wraps an already loaded result set.
    #[must_use]
    pub const fn from_results(results: ResultSet) -> Self {
        Self { results }
    }

    /// Returns the fragment content, extended with its known constants.
    #[must_use]
    pub fn augment(&self, full_title: &str, content: &str) -> String {
        let constants = self.results.get_data(full_title);
        if constants.is_empty() {
            return content.to_string();
        }

        let mut out = String::with_capacity(content.len() + 16 * constants.len());
        out.push_str(content);
        out.push_str("\n\nConstants:");
        for name in constants {
            let _ = write!(out, "\n- {name}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_augment_appends_constants() {
        let catalog = ConstantCatalog::from_results(ResultSet::parse(
            "# Services > Payment\n[\"MAX_AMOUNT\", \"CURRENCY\"]\n",
        ));

        let out = catalog.augment("Services > Payment", "Charges cards.");
        assert_eq!(out, "Charges cards.\n\nConstants:\n- MAX_AMOUNT\n- CURRENCY");
    }

    #[test]
    fn test_augment_without_constants_is_identity() {
        let catalog = ConstantCatalog::default();
        assert_eq!(catalog.augment("Anything", "body"), "body");
    }

    #[test]
    fn test_load_from_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("consts_constants.md");
        file.write_str("# Services > Mail\n[\"SMTP_PORT\"]\n").unwrap();

        let catalog = ConstantCatalog::load(file.path()).unwrap();
        assert!(catalog.augment("Services > Mail", "x").contains("- SMTP_PORT"));
    }
}
