use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Result, bail};
use arkwiki_core::cache::{compare_caches, load_cache_map};
use arkwiki_core::config::{DEFAULT_CONFIG_FILENAME, SessionConfig, load_config};
use arkwiki_core::edit::WikiEdit;
use arkwiki_core::items::{DEFAULT_ITEMS_FILE, load_titles};
use arkwiki_core::page::fetch_page;
use arkwiki_core::query::{DEFAULT_SECTION_FORMAT, WikiQuery};
use arkwiki_core::run::{DEFAULT_CACHE_DIR, RunOptions, RunOutcome, run_item_list};
use arkwiki_core::session::{LoginStatus, WikiSession};
use arkwiki_core::template::{render_item_list, unsafe_template_titles};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{Level, warn};
use tracing_subscriber::FmtSubscriber;

const LOGIN_FAILED_MESSAGE: &str = "Login Failed";

#[derive(Debug, Parser)]
#[command(
    name = "arkwiki",
    version,
    about = "Bot client that caches ARK wiki item pages and renders {{ItemList}}"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Bot config (TOML)")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log every API request")]
    verbose: bool,
    #[arg(short, long, global = true, conflicts_with = "verbose", help = "Only log errors")]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Rebuild both page caches and print the ItemList template")]
    Run(RunArgs),
    #[command(about = "Fetch one page and print its cached fields")]
    Page(PageArgs),
    #[command(about = "Print the extracted text of a page")]
    Text(TextArgs),
    #[command(about = "Render the ItemList template from the item list without the wiki")]
    Render(RenderArgs),
    #[command(about = "Append text to the end of a page")]
    Append(AppendArgs),
    #[command(about = "Create a page that does not exist yet")]
    Create(CreateArgs),
    #[command(name = "cache-diff", about = "Compare a page cache against a fast cache")]
    CacheDiff(CacheDiffArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, value_name = "PATH", default_value = DEFAULT_ITEMS_FILE)]
    items: PathBuf,
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,
    #[arg(long, help = "Skip the batched pages_fast.json cache")]
    skip_fast: bool,
}

#[derive(Debug, Args)]
struct PageArgs {
    title: String,
}

#[derive(Debug, Args)]
struct TextArgs {
    title: String,
    #[arg(long, help = "Strip markup from the extract")]
    plain: bool,
    #[arg(long, value_name = "FORMAT", default_value = DEFAULT_SECTION_FORMAT)]
    section_format: String,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(long, value_name = "PATH", default_value = DEFAULT_ITEMS_FILE)]
    items: PathBuf,
}

#[derive(Debug, Args)]
struct AppendArgs {
    title: String,
    text: String,
    #[arg(long)]
    summary: String,
    #[arg(long, help = "Fail instead of creating the page when it is missing")]
    no_create: bool,
}

#[derive(Debug, Args)]
struct CreateArgs {
    title: String,
    text: String,
    #[arg(long)]
    summary: String,
}

#[derive(Debug, Args)]
struct CacheDiffArgs {
    authoritative: PathBuf,
    fast: PathBuf,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;

    match cli.command {
        Some(Commands::Run(args)) => run_items(cli.config.as_deref(), args, !cli.quiet),
        Some(Commands::Page(args)) => run_page(cli.config.as_deref(), args),
        Some(Commands::Text(args)) => run_text(cli.config.as_deref(), args),
        Some(Commands::Render(args)) => run_render(args),
        Some(Commands::Append(args)) => run_append(cli.config.as_deref(), args),
        Some(Commands::Create(args)) => run_create(cli.config.as_deref(), args),
        Some(Commands::CacheDiff(args)) => run_cache_diff(args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn initialize_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run_items(config: Option<&Path>, args: RunArgs, verbose: bool) -> Result<ExitCode> {
    let session_config = resolve_session_config(config)?;
    let options = RunOptions {
        items_path: args.items,
        cache_dir: args.cache_dir,
        skip_fast: args.skip_fast,
        verbose,
    };

    match run_item_list(&session_config, &options)? {
        RunOutcome::LoginFailed(_) => {
            println!("{LOGIN_FAILED_MESSAGE}");
            Ok(ExitCode::FAILURE)
        }
        RunOutcome::Rendered(report) => {
            println!("{}", report.template);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_page(config: Option<&Path>, args: PageArgs) -> Result<ExitCode> {
    let Some(session) = connect(config)? else {
        return Ok(ExitCode::FAILURE);
    };
    let record = fetch_page(&session.query(), &args.title)?;
    println!("{}", record.summary());
    println!("status: {record}");
    Ok(ExitCode::SUCCESS)
}

fn run_text(config: Option<&Path>, args: TextArgs) -> Result<ExitCode> {
    let Some(session) = connect(config)? else {
        return Ok(ExitCode::FAILURE);
    };
    let text = session
        .query()
        .get_text(&args.title, args.plain, &args.section_format)?;
    println!("{text}");
    Ok(ExitCode::SUCCESS)
}

fn run_render(args: RenderArgs) -> Result<ExitCode> {
    let titles = load_titles(&args.items)?;
    for title in unsafe_template_titles(&titles) {
        warn!(%title, "title contains template syntax and will corrupt the ItemList output");
    }
    println!("{}", render_item_list(&titles));
    Ok(ExitCode::SUCCESS)
}

fn run_append(config: Option<&Path>, args: AppendArgs) -> Result<ExitCode> {
    if args.summary.trim().is_empty() {
        bail!("append requires a non-empty summary");
    }
    let Some(session) = connect(config)? else {
        return Ok(ExitCode::FAILURE);
    };
    let response = session.edit().append_to_page(
        &args.title,
        &args.text,
        &args.summary,
        args.no_create,
    )?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(ExitCode::SUCCESS)
}

fn run_create(config: Option<&Path>, args: CreateArgs) -> Result<ExitCode> {
    if args.summary.trim().is_empty() {
        bail!("create requires a non-empty summary");
    }
    let Some(session) = connect(config)? else {
        return Ok(ExitCode::FAILURE);
    };
    let outcome = session
        .edit()
        .create_page(&args.title, &args.text, &args.summary)?;
    println!("title: {}", args.title);
    println!("result: {outcome}");
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_cache_diff(args: CacheDiffArgs) -> Result<ExitCode> {
    let authoritative = load_cache_map(&args.authoritative)?;
    let fast = load_cache_map(&args.fast)?;
    let comparison = compare_caches(&authoritative, &fast);

    println!("cache diff");
    println!("authoritative: {}", normalize_path(&args.authoritative));
    println!("fast: {}", normalize_path(&args.fast));
    println!("compared: {}", comparison.compared);
    println!("mismatches.count: {}", comparison.mismatches.len());
    for mismatch in &comparison.mismatches {
        println!(
            "mismatches.title: {} (info: {}, content: {})",
            mismatch.title,
            format_flag(mismatch.info_differs),
            format_flag(mismatch.content_differs)
        );
    }
    for title in &comparison.only_in_authoritative {
        println!("only_authoritative.title: {title}");
    }
    for title in &comparison.only_in_fast {
        println!("only_fast.title: {title}");
    }
    println!(
        "category_warnings.count: {}",
        comparison.category_warnings.len()
    );
    for title in &comparison.category_warnings {
        println!("category_warnings.title: {title}");
    }

    Ok(if comparison.is_consistent() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Log in with the configured bot account. `None` means the wiki rejected
/// the credentials; the failure message has already been printed.
fn connect(config: Option<&Path>) -> Result<Option<WikiSession>> {
    let session_config = resolve_session_config(config)?;
    let (session, status) = WikiSession::connect(session_config)?;
    if status.is_success() {
        Ok(Some(session))
    } else {
        report_login_failure(&status);
        Ok(None)
    }
}

fn report_login_failure(status: &LoginStatus) {
    warn!(
        result = %status.result,
        reason = status.reason.as_deref().unwrap_or("<none>"),
        "login failed"
    );
    println!("{LOGIN_FAILED_MESSAGE}");
}

fn resolve_session_config(config: Option<&Path>) -> Result<SessionConfig> {
    dotenvy::dotenv().ok();
    let config_path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    load_config(&config_path)?.resolve()
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
