use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::token::{DEFAULT_MAX_COMPLETION_TOKENS, TokenizerKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_OUTPUT_STEM: &str = "output";
const DEFAULT_SECTION_FILTER: &str = "services";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const OUTPUT_SUFFIX: &str = "_classes.md";

/// Configuration for a class-listing run.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Project document: a `.md` path, or the markdown text itself
    pub input: String,

    /// Constants results file used to extend fragment descriptions
    pub constants_path: Option<PathBuf>,

    /// Output file stem; the file is `<stem>_classes.md`
    pub output_stem: String,

    /// Directory the output file is written to
    pub output_dir: PathBuf,

    /// Skip fragments already present in the output file and append
    pub resume: bool,

    /// Back up an existing output file before truncating it
    pub backup_existing: bool,

    /// Only fragments whose full title contains this text are sent
    pub section_filter: String,

    /// Default chat model
    pub model: String,

    /// Per-fragment model overrides, keyed by full title
    pub model_overrides: HashMap<String, String>,

    /// Base URL of the chat-completion API
    pub api_base: String,

    /// API key sent as a bearer token
    pub api_key: Option<String>,

    /// HTTP request timeout
    pub request_timeout: Duration,

    /// Retry behaviour for failed API calls
    pub retry: RetryPolicy,

    /// Upper bound for the requested completion length
    pub max_completion_tokens: usize,

    /// Tokenizer used to size prompts
    pub tokenizer: TokenizerKind,

    /// Replacement for the built-in system prompt template
    pub system_template: Option<PathBuf>,

    /// Replacement for the built-in user prompt template
    pub user_template: Option<PathBuf>,

    /// Render prompts without calling the API or writing output
    pub dry_run: bool,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use class_lister::Config;
    ///
    /// let config = Config::builder()
    ///     .input("# Shop\nAn online shop\n# Stack\nrust\n")
    ///     .dry_run(true)
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The input is empty, or names a missing `.md` file
    /// - The constants file or a template override doesn't exist
    /// - Model, section filter or completion cap are empty/zero
    /// - No API key is set outside dry run mode
    pub fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(Error::config("input must not be empty"));
        }

        if self.input.ends_with(".md") && !Path::new(&self.input).is_file() {
            return Err(Error::config(format!(
                "Input file does not exist: {}",
                self.input
            )));
        }

        if let Some(ref path) = self.constants_path {
            if !path.is_file() {
                return Err(Error::config(format!(
                    "Constants file does not exist: {}",
                    path.display()
                )));
            }
        }

        for path in [&self.system_template, &self.user_template].into_iter().flatten() {
            if !path.is_file() {
                return Err(Error::config(format!(
                    "Template file does not exist: {}",
                    path.display()
                )));
            }
        }

        if self.output_stem.trim().is_empty() {
            return Err(Error::config("output stem must not be empty"));
        }

        if self.model.trim().is_empty() {
            return Err(Error::config("model must not be empty"));
        }

        if self.section_filter.trim().is_empty() {
            return Err(Error::config("section filter must not be empty"));
        }

        if self.max_completion_tokens == 0 {
            return Err(Error::config("max_completion_tokens must be greater than 0"));
        }

        if self.retry.max_attempts == Some(0) {
            return Err(Error::config("max_attempts must be greater than 0"));
        }

        if !self.dry_run && self.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(Error::config(
                "An API key is required. Set OPENAI_API_KEY or pass --api-key",
            ));
        }

        Ok(())
    }

    /// Path of the output file.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}{OUTPUT_SUFFIX}", self.output_stem))
    }

    /// Model to use for a fragment, honouring per-title overrides.
    #[must_use]
    pub fn model_for(&self, full_title: &str) -> &str {
        self.model_overrides
            .get(full_title.trim())
            .map_or(self.model.as_str(), String::as_str)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: String::new(),
            constants_path: None,
            output_stem: DEFAULT_OUTPUT_STEM.to_string(),
            output_dir: PathBuf::from("."),
            resume: true,
            backup_existing: true,
            section_filter: DEFAULT_SECTION_FILTER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            model_overrides: HashMap::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            tokenizer: TokenizerKind::Enhanced,
            system_template: None,
            user_template: None,
            dry_run: false,
        }
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    input: Option<String>,
    constants_path: Option<PathBuf>,
    output_stem: Option<String>,
    output_dir: Option<PathBuf>,
    resume: Option<bool>,
    backup_existing: Option<bool>,
    section_filter: Option<String>,
    model: Option<String>,
    model_overrides: HashMap<String, String>,
    api_base: Option<String>,
    api_key: Option<String>,
    request_timeout: Option<Duration>,
    retry_delay: Option<Duration>,
    max_attempts: Option<u32>,
    max_completion_tokens: Option<usize>,
    tokenizer: Option<TokenizerKind>,
    system_template: Option<PathBuf>,
    user_template: Option<PathBuf>,
    dry_run: bool,
}

impl ConfigBuilder {
    /// Sets the project document (a `.md` path or markdown text).
    #[must_use]
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Sets the constants results file.
    #[must_use]
    pub fn constants_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.constants_path = Some(path.into());
        self
    }

    /// Sets the output file stem.
    #[must_use]
    pub fn output_stem(mut self, stem: impl Into<String>) -> Self {
        self.output_stem = Some(stem.into());
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Enables or disables resuming from an existing output file.
    #[must_use]
    pub fn resume(mut self, enabled: bool) -> Self {
        self.resume = Some(enabled);
        self
    }

    /// Enables or disables backups before truncating the output file.
    #[must_use]
    pub fn backup_existing(mut self, enabled: bool) -> Self {
        self.backup_existing = Some(enabled);
        self
    }

    /// Sets the text a fragment's full title must contain to be processed.
    #[must_use]
    pub fn section_filter(mut self, filter: impl Into<String>) -> Self {
        self.section_filter = Some(filter.into());
        self
    }

    /// Sets the default chat model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Uses `model` for the fragment with the given full title.
    #[must_use]
    pub fn model_override(mut self, full_title: impl Into<String>, model: impl Into<String>) -> Self {
        self.model_overrides
            .insert(full_title.into().trim().to_string(), model.into());
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the pause between failed API calls.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Limits the number of API attempts per fragment.
    ///
    /// Without a limit, failed calls are retried until they succeed.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the upper bound for the requested completion length.
    #[must_use]
    pub fn max_completion_tokens(mut self, tokens: usize) -> Self {
        self.max_completion_tokens = Some(tokens);
        self
    }

    /// Sets the tokenizer implementation.
    #[must_use]
    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.tokenizer = Some(kind);
        self
    }

    /// Replaces the built-in system prompt template with a Tera file.
    #[must_use]
    pub fn system_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.system_template = Some(path.into());
        self
    }

    /// Replaces the built-in user prompt template with a Tera file.
    #[must_use]
    pub fn user_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_template = Some(path.into());
        self
    }

    /// Enables dry run mode (no API calls, no file writes).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<Config> {
        let defaults = Config::default();
        let retry = RetryPolicy {
            delay: self.retry_delay.unwrap_or(defaults.retry.delay),
            max_attempts: self.max_attempts.or(defaults.retry.max_attempts),
        };

        let config = Config {
            input: self.input.unwrap_or_default(),
            constants_path: self.constants_path,
            output_stem: self.output_stem.unwrap_or(defaults.output_stem),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            resume: self.resume.unwrap_or(defaults.resume),
            backup_existing: self.backup_existing.unwrap_or(defaults.backup_existing),
            section_filter: self.section_filter.unwrap_or(defaults.section_filter),
            model: self.model.unwrap_or(defaults.model),
            model_overrides: self.model_overrides,
            api_base: self.api_base.unwrap_or(defaults.api_base),
            api_key: self.api_key,
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            retry,
            max_completion_tokens: self
                .max_completion_tokens
                .unwrap_or(defaults.max_completion_tokens),
            tokenizer: self.tokenizer.unwrap_or(defaults.tokenizer),
            system_template: self.system_template,
            user_template: self.user_template,
            dry_run: self.dry_run,
        };

        config.validate()?;
        Ok(config)
    }
}
