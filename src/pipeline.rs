use crate::{
    client::{ChatClient, ChatMessage, ChatRequest, OpenAiClient},
    config::Config,
    constants::ConstantCatalog,
    error::{Error, Result},
    fragment::{Fragment, Project},
    prompt::{PromptEngine, PromptParams},
    results::ResultSet,
    token::{TokenEstimator, completion_budget},
    writer::ResultWriter,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Statistics collected during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Fragments in the project document
    pub total_fragments: usize,

    /// Candidate fragments (everything after description and stack)
    pub candidates: usize,

    /// Candidates skipped because they have no body
    pub skipped_empty: usize,

    /// Candidates skipped because the output already has them
    pub skipped_existing: usize,

    /// Candidates skipped by the section filter
    pub skipped_filtered: usize,

    /// Fragments a prompt was built for
    pub prompted: usize,

    /// Responses appended to the output file
    pub collected: usize,

    /// Calls that returned no usable content
    pub no_response: usize,

    /// API attempts, retries included
    pub api_attempts: usize,

    /// Estimated prompt tokens across all prompts
    pub prompt_tokens: usize,

    /// Output file path
    pub output_path: String,

    /// Lines appended to the output during this run
    pub entries: Vec<String>,

    /// Whether the run was a dry run
    pub dry_run: bool,

    /// Local time the run started
    pub started_at: String,

    /// Total execution time
    pub duration: Duration,
}

impl PipelineStats {
    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        if self.dry_run {
            println!("║                 Dry Run Summary                       ║");
        } else {
            println!("║            Class Listing Summary                      ║");
        }
        println!("╠═══════════════════════════════════════════════════════╣");
        println!(
            "║ Fragments:            {:>8}                        ║",
            self.total_fragments
        );
        println!(
            "║   - Candidates:       {:>8}                        ║",
            self.candidates
        );
        println!(
            "║   - Empty:            {:>8}                        ║",
            self.skipped_empty
        );
        println!(
            "║   - Already done:     {:>8}                        ║",
            self.skipped_existing
        );
        println!(
            "║   - Filtered out:     {:>8}                        ║",
            self.skipped_filtered
        );
        println!("║                                                       ║");
        println!(
            "║ Prompts built:        {:>8}                        ║",
            self.prompted
        );
        println!(
            "║ Prompt tokens:        {:>8}                        ║",
            self.prompt_tokens
        );
        println!(
            "║ API attempts:         {:>8}                        ║",
            self.api_attempts
        );
        println!(
            "║ Responses collected:  {:>8}                        ║",
            self.collected
        );
        println!(
            "║ Empty responses:      {:>8}                        ║",
            self.no_response
        );
        println!("║ Output file:                                          ║");
        println!(
            "║   {}                                              ║",
            self.output_path
        );
        println!(
            "║ Started:              {:>19}             ║",
            self.started_at
        );
        println!(
            "║ Total time:           {:>8.2}s                     ║",
            self.duration.as_secs_f64()
        );
        if self.dry_run {
            println!("║ ⚠ No API calls were made (dry run mode)               ║");
        }
        println!("╚═══════════════════════════════════════════════════════╝\n");
    }
}

/// Why a candidate fragment was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Empty,
    Existing,
    Filtered,
}

/// Sends each service fragment of a project to the model and collects the
/// class lists it returns.
pub struct Pipeline {
    config: Config,
    // None in dry run mode
    client: Option<Arc<dyn ChatClient>>,
    prompts: PromptEngine,
    tokenizer: Arc<dyn TokenEstimator>,
}

impl Pipeline {
    /// Creates a pipeline that talks to the configured API.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a template cannot
    /// be loaded or the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client: Option<Arc<dyn ChatClient>> = if config.dry_run {
            None
        } else {
            Some(Arc::new(OpenAiClient::from_config(&config)?))
        };
        Self::build(config, client)
    }

    /// Creates a pipeline with a custom chat backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a template
    /// cannot be loaded.
    pub fn with_client(config: Config, client: Arc<dyn ChatClient>) -> Result<Self> {
        Self::build(config, Some(client))
    }

    fn build(config: Config, client: Option<Arc<dyn ChatClient>>) -> Result<Self> {
        config.validate()?;
        let prompts = PromptEngine::new(&config)?;
        let tokenizer = config.tokenizer.create();

        Ok(Self {
            config,
            client,
            prompts,
            tokenizer,
        })
    }

    /// Loads the project and processes it.
    ///
    /// # Process
    ///
    /// 1. **Load**: split the document, read existing results and constants
    /// 2. **Process**: prompt the model for every pending service fragment
    ///
    /// # Errors
    ///
    /// Returns an error if the document or an existing file cannot be read,
    /// the output cannot be written, or an API call fails for good.
    #[instrument(skip(self), fields(output_stem = %self.config.output_stem))]
    pub fn run(&self) -> Result<PipelineStats> {
        info!("Loading project");
        let project = Project::load(&self.config.input)?;
        info!(
            "Project '{}' has {} fragments",
            project.name(),
            project.fragments().len()
        );

        let constants = match &self.config.constants_path {
            Some(path) => ConstantCatalog::load(path)?,
            None => ConstantCatalog::default(),
        };

        let output_path = self.config.output_path();
        let existing = if self.config.resume {
            ResultSet::load(&output_path, None)?
        } else {
            ResultSet::default()
        };
        if !existing.is_empty() {
            info!("Found {} processed fragment(s) in {}", existing.len(), output_path.display());
        }

        self.process(&project, &constants, &existing)
    }

    /// Processes an already loaded project.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written or an API call
    /// fails for good.
    pub fn process(
        &self,
        project: &Project,
        constants: &ConstantCatalog,
        existing: &ResultSet,
    ) -> Result<PipelineStats> {
        let start = Instant::now();
        let output_path = self.config.output_path();

        let mut stats = PipelineStats {
            total_fragments: project.fragments().len(),
            candidates: project.candidates().len(),
            output_path: output_path.display().to_string(),
            dry_run: self.config.dry_run,
            started_at: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            ..PipelineStats::default()
        };

        let (client, mut writer) = if self.config.dry_run {
            warn!("Dry run mode enabled - no API calls, no file writes");
            (None, None)
        } else {
            let client = self
                .client
                .as_deref()
                .ok_or_else(|| Error::config("No chat client configured"))?;
            let writer = ResultWriter::open(
                &output_path,
                self.config.resume,
                self.config.backup_existing,
            )?;
            (Some(client), Some(writer))
        };

        info!("Rendering results");
        for fragment in project.candidates() {
            if let Some(reason) = self.skip_reason(fragment, existing) {
                debug!("Skipping '{}' ({reason:?})", fragment.full_title);
                match reason {
                    Skip::Empty => stats.skipped_empty += 1,
                    Skip::Existing => stats.skipped_existing += 1,
                    Skip::Filtered => stats.skipped_filtered += 1,
                }
                continue;
            }

            let request = self.build_request(project, fragment, constants, &mut stats)?;

            let (Some(client), Some(writer)) = (client, writer.as_mut()) else {
                info!(
                    "[dry run] would send '{}' to {} (max_tokens {})",
                    fragment.full_title, request.model, request.max_tokens
                );
                continue;
            };

            info!("Listing classes for '{}'", fragment.full_title);
            let reply = self.config.retry.run(|attempt| {
                stats.api_attempts += 1;
                debug!("Attempt {attempt} for '{}'", fragment.full_title);
                client.complete(&request)
            })?;

            let Some(text) = reply else {
                warn!("No response for '{}'", fragment.full_title);
                stats.no_response += 1;
                continue;
            };
            writer.collect(&fragment.full_title, &text)?;
            stats.collected += 1;
        }

        if let Some(writer) = writer {
            debug!("Appended {} line(s)", writer.entries().len());
            stats.entries = writer.into_entries();
        }
        stats.duration = start.elapsed();

        info!(
            "✓ Done in {:.2}s: {} response(s) collected, check {} for the results",
            stats.duration.as_secs_f64(),
            stats.collected,
            stats.output_path
        );

        Ok(stats)
    }

    fn skip_reason(&self, fragment: &Fragment, existing: &ResultSet) -> Option<Skip> {
        if fragment.is_empty() {
            return Some(Skip::Empty);
        }
        if self.config.resume && existing.has_fragment(&fragment.full_title) {
            return Some(Skip::Existing);
        }
        let filter = self.config.section_filter.to_lowercase();
        if !fragment.full_title.to_lowercase().contains(&filter) {
            return Some(Skip::Filtered);
        }
        None
    }

    fn build_request(
        &self,
        project: &Project,
        fragment: &Fragment,
        constants: &ConstantCatalog,
        stats: &mut PipelineStats,
    ) -> Result<ChatRequest> {
        let description = constants.augment(&fragment.full_title, &fragment.content);
        let prompt = self.prompts.render(&PromptParams {
            project_name: project.name(),
            dev_stack: project.dev_stack(),
            feature_title: &fragment.title,
            feature_description: &description,
        })?;

        let prompt_tokens = self
            .tokenizer
            .estimate_all(&[prompt.system.as_str(), prompt.user.as_str()]);
        debug!("{prompt_tokens} tokens in prompt for '{}'", fragment.full_title);
        trace!("System prompt:\n{}", prompt.system);
        trace!("User prompt:\n{}", prompt.user);

        stats.prompt_tokens += prompt_tokens;
        stats.prompted += 1;

        let max_tokens = completion_budget(prompt_tokens, self.config.max_completion_tokens);

        Ok(ChatRequest::new(
            self.config.model_for(&fragment.full_title),
            vec![ChatMessage::system(prompt.system), ChatMessage::user(prompt.user)],
            max_tokens,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedClient;
    use crate::error::Error;
    use assert_fs::prelude::*;
    use std::path::Path;

    const DOC: &str = "\
# Shop
An online shop.

## Dev stack
- rust
- postgres

## Components
### Cart view
Shows the cart.

## Services
### Payment service
Charges the customer.

### Mail service
Sends receipts.

### Empty service
";

    fn config(dir: &Path) -> crate::config::ConfigBuilder {
        Config::builder()
            .input(DOC)
            .output_dir(dir)
            .api_key("sk-test")
            .retry_delay(Duration::ZERO)
    }

    fn pipeline(config: Config, client: &Arc<ScriptedClient>) -> Pipeline {
        let client: Arc<dyn ChatClient> = client.clone();
        Pipeline::with_client(config, client).unwrap()
    }

    #[test]
    fn test_only_service_fragments_are_sent() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::always("[\"A\"]"));

        let stats = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();

        assert_eq!(stats.total_fragments, 8);
        assert_eq!(stats.candidates, 6);
        assert_eq!(stats.skipped_empty, 3);
        assert_eq!(stats.skipped_filtered, 1);
        assert_eq!(stats.collected, 2);
        assert_eq!(client.requests().len(), 2);

        temp.child("output_classes.md").assert(
            "# Shop > Services > Payment service\n[\"A\"]\n# Shop > Services > Mail service\n[\"A\"]\n",
        );
    }

    #[test]
    fn test_request_contents() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::always("[]"));
        let config = config(temp.path())
            .model("small")
            .model_override("Shop > Services > Mail service", "large")
            .build()
            .unwrap();

        pipeline(config, &client).run().unwrap();

        let requests = client.requests();
        let payment = &requests[0];
        assert_eq!(payment.model, "small");
        assert_eq!(requests[1].model, "large");
        assert!(payment.temperature.abs() < f32::EPSILON);
        assert!(payment.max_tokens > 0);
        assert!(payment.max_tokens <= crate::token::DEFAULT_MAX_COMPLETION_TOKENS);
        assert!(payment.messages[0].content.contains("application called 'Shop'"));
        assert!(payment.messages[0].content.contains("- postgres"));
        assert!(payment.messages[1].content.contains("'Payment service'"));
        assert!(payment.messages[1].content.contains("Charges the customer."));
    }

    #[test]
    fn test_resume_skips_existing_fragments() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("output_classes.md")
            .write_str("# Shop > Services > Payment service\n[\"Old\"]\n")
            .unwrap();
        let client = Arc::new(ScriptedClient::always("[\"New\"]"));

        let stats = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();

        assert_eq!(stats.skipped_existing, 1);
        assert_eq!(stats.collected, 1);
        temp.child("output_classes.md").assert(
            "# Shop > Services > Payment service\n[\"Old\"]\n# Shop > Services > Mail service\n[\"New\"]\n",
        );
    }

    #[test]
    fn test_resume_after_unterminated_last_line() {
        let temp = assert_fs::TempDir::new().unwrap();
        let out = temp.child("output_classes.md");
        out.write_str("# Shop > Services > Payment service\n[\"Old\"]").unwrap();
        let client = Arc::new(ScriptedClient::always("[\"New\"]"));

        let first = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();
        let second = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();

        assert_eq!(first.skipped_existing, 1);
        assert_eq!(first.collected, 1);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(second.collected, 0);
        assert_eq!(client.requests().len(), 1);
        out.assert(
            "# Shop > Services > Payment service\n[\"Old\"]\n# Shop > Services > Mail service\n[\"New\"]\n",
        );
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::always("[\"A\"]"));

        pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();
        let stats = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();

        assert_eq!(stats.skipped_existing, 2);
        assert_eq!(stats.collected, 0);
        assert_eq!(client.requests().len(), 2);
    }

    #[test]
    fn test_overwrite_file_counts_as_processed() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("output_classes_overwrite.md")
            .write_str("# Shop > Services > Mail service\n[\"Manual\"]\n")
            .unwrap();
        let client = Arc::new(ScriptedClient::always("[]"));

        let stats = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();

        assert_eq!(stats.skipped_existing, 1);
        assert_eq!(stats.collected, 1);
    }

    #[test]
    fn test_no_resume_truncates_and_reprocesses() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("output_classes.md")
            .write_str("# Shop > Services > Payment service\n[\"Old\"]\n")
            .unwrap();
        let client = Arc::new(ScriptedClient::always("[\"New\"]"));
        let config = config(temp.path())
            .resume(false)
            .backup_existing(false)
            .build()
            .unwrap();

        let stats = pipeline(config, &client).run().unwrap();

        assert_eq!(stats.skipped_existing, 0);
        assert_eq!(stats.collected, 2);
        assert_eq!(stats.entries.len(), 4);
        let written = std::fs::read_to_string(temp.child("output_classes.md").path()).unwrap();
        assert!(!written.contains("Old"));
    }

    #[test]
    fn test_retries_then_collects() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new(vec![
            Err(Error::api(503, "overloaded")),
            Err(Error::http("reset")),
            Ok(Some("[\"Paid\"]".into())),
            Ok(Some("[\"Mailer\"]".into())),
        ]));

        let stats = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();

        assert_eq!(stats.api_attempts, 4);
        assert_eq!(stats.collected, 2);
        let written = std::fs::read_to_string(temp.child("output_classes.md").path()).unwrap();
        assert!(written.contains("[\"Paid\"]"));
    }

    #[test]
    fn test_empty_reply_is_not_written() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new(vec![Ok(None), Ok(Some("[]".into()))]));

        let stats = pipeline(config(temp.path()).build().unwrap(), &client)
            .run()
            .unwrap();

        assert_eq!(stats.no_response, 1);
        assert_eq!(stats.collected, 1);
        temp.child("output_classes.md")
            .assert("# Shop > Services > Mail service\n[]\n");
    }

    #[test]
    fn test_exhausted_retries_keep_earlier_results() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(Some("[\"Paid\"]".into())),
            Err(Error::api(500, "down")),
            Err(Error::api(500, "down")),
        ]));
        let config = config(temp.path()).max_attempts(2).build().unwrap();

        let err = pipeline(config, &client).run().unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
        temp.child("output_classes.md")
            .assert("# Shop > Services > Payment service\n[\"Paid\"]\n");
    }

    #[test]
    fn test_custom_section_filter() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::always("[]"));
        let config = config(temp.path()).section_filter("COMPONENTS").build().unwrap();

        let stats = pipeline(config, &client).run().unwrap();

        assert_eq!(stats.collected, 1);
        assert!(client.requests()[0].messages[1].content.contains("'Cart view'"));
    }

    #[test]
    fn test_constants_extend_description() {
        let temp = assert_fs::TempDir::new().unwrap();
        let constants = temp.child("shop_constants.md");
        constants
            .write_str("# Shop > Services > Payment service\n[\"MAX_AMOUNT\"]\n")
            .unwrap();
        let client = Arc::new(ScriptedClient::always("[]"));
        let config = config(temp.path())
            .constants_path(constants.path())
            .build()
            .unwrap();

        pipeline(config, &client).run().unwrap();

        let requests = client.requests();
        assert!(requests[0].messages[1].content.contains("Constants:\n- MAX_AMOUNT"));
        assert!(!requests[1].messages[1].content.contains("Constants:"));
    }

    #[test]
    fn test_dry_run_calls_nothing_and_writes_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = Config::builder()
            .input(DOC)
            .output_dir(temp.path())
            .dry_run(true)
            .build()
            .unwrap();

        let stats = Pipeline::new(config).unwrap().run().unwrap();

        assert!(stats.dry_run);
        assert_eq!(stats.started_at.len(), 19);
        assert_eq!(stats.prompted, 2);
        assert!(stats.prompt_tokens > 0);
        assert_eq!(stats.api_attempts, 0);
        assert!(!temp.child("output_classes.md").exists());
    }

    #[test]
    fn test_dry_run_with_client_never_calls_it() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new(vec![]));
        let config = config(temp.path()).dry_run(true).build().unwrap();

        let stats = pipeline(config, &client).run().unwrap();

        assert_eq!(stats.prompted, 2);
        assert!(client.requests().is_empty());
        assert!(!temp.child("output_classes.md").exists());
    }

    #[test]
    fn test_prompt_tokens_cover_both_messages() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::always("[]"));
        let config = config(temp.path())
            .tokenizer(crate::token::TokenizerKind::Simple)
            .build()
            .unwrap();

        let stats = pipeline(config, &client).run().unwrap();

        let estimator = crate::token::TokenizerKind::Simple.create();
        let expected: usize = client
            .requests()
            .iter()
            .map(|r| {
                let parts: Vec<&str> = r.messages.iter().map(|m| m.content.as_str()).collect();
                estimator.estimate_all(&parts)
            })
            .sum();
        assert_eq!(stats.prompt_tokens, expected);
    }

    #[test]
    fn test_document_without_stack_fails() {
        let temp = assert_fs::TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::always("[]"));
        let config = config(temp.path()).input("# Only\n").build().unwrap();

        let err = pipeline(config, &client).run().unwrap_err();
        assert!(matches!(err, Error::Project { .. }));
    }
}
