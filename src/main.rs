use anyhow::Context;
use clap::Parser;
use class_lister::{Config, Pipeline, TokenizerKind};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "class-lister",
    version,
    about = "List the classes each service of a project spec needs, using an LLM",
    long_about = "Split a markdown project spec into sections and ask a chat model to list \
    the custom classes every service section implies.\n\n\
    The first section of the document describes the project, the second one the \
    development stack. Replies are appended to <OUT>_classes.md; sections already \
    present there (or in <OUT>_classes_overwrite.md) are skipped.\n\n\
    USAGE EXAMPLES:\n  \
      # Process a spec, writing output_classes.md\n  \
      class-lister project.md\n\n  \
      # Use earlier constants results and a custom output name\n  \
      class-lister project.md --constants shop_constants.md --out shop\n\n  \
      # Preview prompts without calling the API\n  \
      class-lister project.md --dry-run -v"
)]
struct Cli {
    /// Project spec: a .md file, or the markdown text itself
    #[arg(value_name = "INPUT")]
    input: String,

    /// Constants results file whose entries extend each section description
    #[arg(short, long, value_name = "FILE")]
    constants: Option<PathBuf>,

    /// Output name; results go to <OUT>_classes.md
    #[arg(short, long, default_value = "output", value_name = "NAME")]
    out: String,

    /// Directory for the output file
    #[arg(long, default_value = ".", value_name = "PATH")]
    out_dir: PathBuf,

    /// Start over instead of skipping sections already in the output
    #[arg(long)]
    no_resume: bool,

    /// Don't back up the output file before starting over
    #[arg(long)]
    no_backup: bool,

    /// Only sections whose heading path contains this text are processed
    #[arg(long, default_value = "services")]
    filter: String,

    /// Chat model
    #[arg(short, long, env = "CLASS_LISTER_MODEL", default_value = "gpt-3.5-turbo")]
    model: String,

    /// Model for one section, as SECTION=MODEL (can be used multiple times)
    ///
    /// SECTION is the full heading path, e.g. "Shop > Services > Billing".
    #[arg(long = "model-for", value_name = "SECTION=MODEL")]
    model_for: Vec<String>,

    /// API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    api_base: String,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Seconds to wait before retrying a failed API call
    #[arg(long, default_value_t = 30)]
    retry_delay: u64,

    /// Give up after this many attempts per section (default: retry forever)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Upper bound for the completion length
    #[arg(long, default_value_t = 2_048)]
    max_tokens: usize,

    /// Tokenizer used to size prompts
    #[arg(long, value_enum, default_value = "enhanced")]
    tokenizer: CliTokenizer,

    /// Tera template replacing the built-in system prompt
    #[arg(long, value_name = "FILE")]
    system_template: Option<PathBuf>,

    /// Tera template replacing the built-in user prompt
    #[arg(long, value_name = "FILE")]
    user_template: Option<PathBuf>,

    /// Render prompts only (no API calls, no file writes)
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliTokenizer {
    Simple,
    Enhanced,
}

impl From<CliTokenizer> for TokenizerKind {
    fn from(t: CliTokenizer) -> Self {
        match t {
            CliTokenizer::Simple => Self::Simple,
            CliTokenizer::Enhanced => Self::Enhanced,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose);

    let mut builder = Config::builder()
        .input(cli.input)
        .output_stem(cli.out)
        .output_dir(cli.out_dir)
        .resume(!cli.no_resume)
        .backup_existing(!cli.no_backup)
        .section_filter(cli.filter)
        .model(cli.model)
        .api_base(cli.api_base)
        .request_timeout(Duration::from_secs(cli.timeout))
        .retry_delay(Duration::from_secs(cli.retry_delay))
        .max_completion_tokens(cli.max_tokens)
        .tokenizer(cli.tokenizer.into())
        .dry_run(cli.dry_run);

    if let Some(path) = cli.constants {
        builder = builder.constants_path(path);
    }

    if let Some(key) = cli.api_key {
        builder = builder.api_key(key);
    }

    if let Some(attempts) = cli.max_attempts {
        builder = builder.max_attempts(attempts);
    }

    if let Some(path) = cli.system_template {
        builder = builder.system_template(path);
    }

    if let Some(path) = cli.user_template {
        builder = builder.user_template(path);
    }

    for item in cli.model_for {
        if let Some((section, model)) = item.rsplit_once('=') {
            builder = builder.model_override(section, model.trim());
        } else {
            tracing::warn!("Invalid --model-for value '{item}', expected SECTION=MODEL");
        }
    }

    let config = builder.build().context("Failed to build configuration")?;

    let stats = Pipeline::new(config)
        .context("Failed to create pipeline")?
        .run()
        .context("Class listing failed")?;

    stats.print_summary();

    Ok(())
}

fn setup_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => EnvFilter::new("class_lister=info"),
        1 => EnvFilter::new("class_lister=debug"),
        _ => EnvFilter::new("class_lister=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .init();
}
