use crate::{
    config::Config,
    error::{Error, Result},
};
use serde::Serialize;
use std::path::Path;
use tera::{Context, Tera};

const SYSTEM_TEMPLATE: &str = "system";
const USER_TEMPLATE: &str = "user";

/// Values substituted into the prompt templates.
#[derive(Debug, Clone, Serialize)]
pub struct PromptParams<'a> {
    /// Project name (title of the first section)
    pub project_name: &'a str,
    /// Development stack (body of the second section)
    pub dev_stack: &'a str,
    /// Title of the fragment being analysed
    pub feature_title: &'a str,
    /// Fragment body, possibly extended with constants
    pub feature_description: &'a str,
}

/// A rendered system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System message
    pub system: String,
    /// User message
    pub user: String,
}

/// Renders prompts from the built-in or user-supplied templates.
pub struct PromptEngine {
    tera: Tera,
}

impl PromptEngine {
    /// Creates an engine, applying any template overrides from the config.
    ///
    /// # Errors
    ///
    /// Returns an error if a template fails to parse or cannot be read.
    pub fn new(config: &Config) -> Result<Self> {
        let mut tera = Tera::default();

        tera.add_raw_template(SYSTEM_TEMPLATE, include_str!("../templates/system.tera"))
            .map_err(|e| Error::template(SYSTEM_TEMPLATE, &e))?;
        tera.add_raw_template(USER_TEMPLATE, include_str!("../templates/user.tera"))
            .map_err(|e| Error::template(USER_TEMPLATE, &e))?;

        if let Some(path) = &config.system_template {
            Self::override_template(&mut tera, SYSTEM_TEMPLATE, path)?;
        }
        if let Some(path) = &config.user_template {
            Self::override_template(&mut tera, USER_TEMPLATE, path)?;
        }

        Ok(Self { tera })
    }

    fn override_template(tera: &mut Tera, name: &str, path: &Path) -> Result<()> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        tera.add_raw_template(name, &source)
            .map_err(|e| Error::template(name, &e))?;
        tracing::debug!("Using {} template from {}", name, path.display());
        Ok(())
    }

    /// Renders the system and user messages for one fragment.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub fn render(&self, params: &PromptParams<'_>) -> Result<Prompt> {
        let context = Context::from_serialize(params)?;

        let system = self
            .tera
            .render(SYSTEM_TEMPLATE, &context)
            .map_err(|e| Error::template(SYSTEM_TEMPLATE, &e))?;
        let user = self
            .tera
            .render(USER_TEMPLATE, &context)
            .map_err(|e| Error::template(USER_TEMPLATE, &e))?;

        Ok(Prompt {
            system: system.trim_end().to_string(),
            user: user.trim_end().to_string(),
        })
    }
}
