use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use confsync_core::config::{ClientOptions, Credentials, SiteSettings, load_site_config};
use confsync_core::discover::{
    SeedOptions, discover_children, load_inventory, seed_plan, write_inventory,
};
use confsync_core::matcher::{FuzzyPolicy, TitleMatcher};
use confsync_core::plan::{PageType, load_plan, load_tasks, validate_plan, write_plan};
use confsync_core::reconcile::{ReconcileOptions, ReconcileReport, reconcile_plan};
use confsync_core::render::ContentRenderer;
use confsync_core::store::{BodyFormat, ConfluenceClient, PageStore};

const DEFAULT_CONFIG_PATH: &str = "confluence.toml";

#[derive(Debug, Parser)]
#[command(
    name = "confsync",
    version,
    about = "Publish a declarative page plan into a Confluence space"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Site config TOML (default confluence.toml)"
    )]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Publish(PublishArgs),
    Validate(ValidateArgs),
    Resolve(ResolveArgs),
    Discover(DiscoverArgs),
    Seed(SeedArgs),
}

#[derive(Debug, Args)]
struct PublishArgs {
    #[arg(long, value_name = "PATH", help = "Plan JSON file")]
    plan: PathBuf,
    #[arg(long, value_name = "PATH", help = "Mapped tasks CSV")]
    tasks: Option<PathBuf>,
    #[arg(long, value_name = "KEY", help = "Space key override")]
    space: Option<String>,
    #[arg(long, value_name = "TITLE", help = "Root parent page title override")]
    root: Option<String>,
    #[arg(long, value_name = "ID", help = "Root parent page id override")]
    root_id: Option<String>,
    #[arg(long, help = "Report intended actions without writing")]
    dry_run: bool,
    #[arg(long, help = "Update pages that already exist")]
    update: bool,
    #[arg(
        long,
        value_delimiter = ',',
        value_name = "TYPES",
        help = "Restrict to page types (Subcomponent,Option,Tasks)"
    )]
    only_types: Vec<String>,
    #[arg(long, default_value_t = 0, value_name = "N", help = "Stop after N pages (0 = no limit)")]
    limit: usize,
    #[arg(long, help = "Render task tables from the tasks CSV")]
    inject_tasks: bool,
    #[arg(
        long,
        default_value = "storage",
        value_name = "FORMAT",
        help = "Body format: storage or adf"
    )]
    format: String,
    #[arg(long, help = "Skip updates whose rendered body is unchanged")]
    skip_unchanged: bool,
    #[arg(long, help = "Attach body diffs to update records")]
    diff: bool,
    #[arg(long, help = "Fuzzy matches must equal the title exactly")]
    strict_titles: bool,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[arg(long, value_name = "PATH", help = "Plan JSON file")]
    plan: PathBuf,
    #[arg(long, help = "Emit the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    title: String,
    #[arg(long, help = "List ranked fuzzy candidates instead of the single pick")]
    candidates: bool,
    #[arg(long, help = "Fuzzy matches must equal the title exactly")]
    strict_titles: bool,
    #[arg(long, value_name = "KEY", help = "Space key override")]
    space: Option<String>,
}

#[derive(Debug, Args)]
struct DiscoverArgs {
    #[arg(
        long = "component",
        value_name = "TITLE",
        help = "Component page title to inventory (repeatable)"
    )]
    components: Vec<String>,
    #[arg(long, value_name = "PATH", help = "Write the inventory JSON here")]
    out: Option<PathBuf>,
    #[arg(long, value_name = "KEY", help = "Space key override")]
    space: Option<String>,
    #[arg(long, help = "Fuzzy matches must equal the title exactly")]
    strict_titles: bool,
}

#[derive(Debug, Args)]
struct SeedArgs {
    #[arg(long, value_name = "PATH", help = "Inventory JSON from `discover --out`")]
    inventory: PathBuf,
    #[arg(long, value_name = "PATH", help = "Write the seeded plan here")]
    out: PathBuf,
    #[arg(
        long,
        default_value_t = 3,
        value_name = "N",
        help = "Options to seed per subcomponent"
    )]
    options_per_subcomponent: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Publish(args)) => run_publish(cli.config.as_deref(), args),
        Some(Commands::Validate(args)) => run_validate(args),
        Some(Commands::Resolve(args)) => run_resolve(cli.config.as_deref(), args),
        Some(Commands::Discover(args)) => run_discover(cli.config.as_deref(), args),
        Some(Commands::Seed(args)) => run_seed(args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        env::var("CONFSYNC_LOG").unwrap_or_else(|_| "confsync=info,confsync_core=info".into()),
    );
    // Diagnostics go to stderr; stdout carries only the reports.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_publish(config: Option<&Path>, args: PublishArgs) -> Result<()> {
    let format = parse_body_format(&args.format)?;
    let only_types = parse_only_types(&args.only_types)?;
    let context = resolve_site_context(
        config,
        args.space.as_deref(),
        args.root.as_deref(),
        args.root_id.as_deref(),
    )?;

    let plan = load_plan(&args.plan)?;

    let renderer = match (&args.tasks, args.inject_tasks) {
        (Some(path), true) => ContentRenderer::with_tasks(format, load_tasks(path)?),
        (None, true) => bail!("--inject-tasks requires --tasks <PATH>"),
        _ => ContentRenderer::new(format),
    };

    let matcher = TitleMatcher::new(fuzzy_policy(args.strict_titles));
    let options = ReconcileOptions {
        root_title: context.settings.root_title.clone(),
        root_id: context.settings.root_id.clone(),
        update: args.update,
        dry_run: args.dry_run,
        only_types,
        limit: args.limit,
        skip_unchanged: args.skip_unchanged,
        show_diff: args.diff,
    };

    let mut store = ConfluenceClient::new(&context.settings, context.credentials, context.options)?;
    let report = reconcile_plan(&mut store, matcher, &renderer, &plan.pages, &options);

    print_reconcile_report(&report, plan.rows_without_title);
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let plan = load_plan(&args.plan)?;
    let report = validate_plan(&plan);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("plan check");
    println!("total_pages: {}", report.total_pages);
    println!("rows_without_title: {}", report.rows_without_title);
    println!("clean: {}", format_flag(report.is_clean()));
    if !report.duplicate_titles.is_empty() {
        println!("duplicate_titles:");
        for (title, count) in &report.duplicate_titles {
            println!("  - {title} ({count} rows)");
        }
    }
    if !report.parents_outside_plan.is_empty() {
        println!("parents_outside_plan:");
        for parent in &report.parents_outside_plan {
            println!("  - {parent}");
        }
    }
    if !report.parent_child_counts.is_empty() {
        println!("children_per_parent:");
        for (parent, count) in &report.parent_child_counts {
            println!("  {parent}: {count}");
        }
    }
    Ok(())
}

fn run_resolve(config: Option<&Path>, args: ResolveArgs) -> Result<()> {
    let context = resolve_site_context(config, args.space.as_deref(), None, None)?;
    let matcher = TitleMatcher::new(fuzzy_policy(args.strict_titles));
    let mut store = ConfluenceClient::new(&context.settings, context.credentials, context.options)?;

    if args.candidates {
        let hits = matcher.fuzzy_candidates(&mut store, &args.title)?;
        println!("candidates: {}", hits.len());
        for page in &hits {
            println!("  {} {}", page.id, page.title);
        }
        println!("requests: {}", store.request_count());
        return Ok(());
    }

    match matcher.resolve(&mut store, &args.title)? {
        Some(page) => {
            println!("id: {}", page.id);
            println!("title: {}", page.title);
            println!("version: {}", page.version);
        }
        None => println!("not found"),
    }
    println!("requests: {}", store.request_count());
    Ok(())
}

fn run_discover(config: Option<&Path>, args: DiscoverArgs) -> Result<()> {
    if args.components.is_empty() {
        bail!("at least one --component title is required");
    }
    let context = resolve_site_context(config, args.space.as_deref(), None, None)?;
    let matcher = TitleMatcher::new(fuzzy_policy(args.strict_titles));
    let mut store = ConfluenceClient::new(&context.settings, context.credentials, context.options)?;

    let report = discover_children(&mut store, matcher, &args.components)?;

    println!("discover");
    println!("components_found: {}", report.components_found);
    if !report.components_missing.is_empty() {
        println!("components_missing:");
        for missing in &report.components_missing {
            println!("  - {missing}");
        }
    }
    println!("children: {}", report.children.len());
    for child in &report.children {
        println!("  {} {} (id {})", child.child_code, child.child_title, child.child_id);
    }
    println!("requests: {}", report.request_count);

    if let Some(out) = &args.out {
        write_inventory(out, &report.children)?;
        println!("inventory: {}", out.display());
    }
    Ok(())
}

fn run_seed(args: SeedArgs) -> Result<()> {
    let children = load_inventory(&args.inventory)?;
    let pages = seed_plan(
        &children,
        &SeedOptions {
            options_per_subcomponent: args.options_per_subcomponent,
        },
    );
    write_plan(&args.out, &pages)?;

    println!("seeded_pages: {}", pages.len());
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for page in &pages {
        *counts.entry(page.page_type.as_str()).or_default() += 1;
    }
    for (page_type, count) in &counts {
        println!("  {page_type}: {count}");
    }
    println!("plan: {}", args.out.display());
    Ok(())
}

struct SiteContext {
    settings: SiteSettings,
    credentials: Credentials,
    options: ClientOptions,
}

// Flag > environment > config file precedence for every site coordinate.
fn resolve_site_context(
    config_path: Option<&Path>,
    space: Option<&str>,
    root: Option<&str>,
    root_id: Option<&str>,
) -> Result<SiteContext> {
    dotenvy::dotenv().ok();

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let file = load_site_config(&path)?;
    let section = &file.confluence;

    let settings = SiteSettings {
        base_url: resolve_value(None, "CONFLUENCE_BASE_URL", section.base_url.as_deref())
            .unwrap_or_default(),
        space_key: resolve_value(space, "CONFLUENCE_SPACE_KEY", section.space_key.as_deref())
            .unwrap_or_default(),
        root_title: resolve_value(root, "CONFLUENCE_ROOT_PARENT", section.root_title.as_deref())
            .unwrap_or_default(),
        root_id: resolve_value(root_id, "CONFLUENCE_ROOT_ID", section.root_id.as_deref()),
    };
    settings.validate()?;

    let credentials = Credentials {
        email: env_string("CONFLUENCE_EMAIL").unwrap_or_default(),
        api_token: env_string("CONFLUENCE_API_TOKEN").unwrap_or_default(),
    };
    credentials.validate()?;

    let mut options = ClientOptions {
        user_agent: file.user_agent(),
        ..ClientOptions::default()
    };
    if let Some(timeout) = env_parse::<u64>("CONFSYNC_HTTP_TIMEOUT_MS")? {
        options.timeout_ms = timeout;
    }
    if let Some(retries) = env_parse::<usize>("CONFSYNC_HTTP_RETRIES")? {
        options.max_retries = retries;
    }
    if let Some(retries) = env_parse::<usize>("CONFSYNC_HTTP_WRITE_RETRIES")? {
        options.max_write_retries = retries;
    }
    if let Some(delay) = env_parse::<u64>("CONFSYNC_HTTP_RETRY_DELAY_MS")? {
        options.retry_delay_ms = delay;
    }
    if let Some(pause) = env_parse::<u64>("CONFSYNC_RATE_LIMIT_READ_MS")? {
        options.rate_limit_read_ms = pause;
    }
    if let Some(pause) = env_parse::<u64>("CONFSYNC_RATE_LIMIT_WRITE_MS")? {
        options.rate_limit_write_ms = pause;
    }

    Ok(SiteContext {
        settings,
        credentials,
        options,
    })
}

fn resolve_value(flag: Option<&str>, env_key: &str, file_value: Option<&str>) -> Option<String> {
    flag.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .or_else(|| env_string(env_key))
        .or_else(|| {
            file_value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        })
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(value) = env_string(key) else {
        return Ok(None);
    };
    match value.parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(error) => bail!("invalid {key} '{value}': {error}"),
    }
}

fn fuzzy_policy(strict: bool) -> FuzzyPolicy {
    if strict {
        FuzzyPolicy::ExactOnly
    } else {
        FuzzyPolicy::FirstHit
    }
}

fn parse_body_format(value: &str) -> Result<BodyFormat> {
    match value.trim().to_lowercase().as_str() {
        "storage" => Ok(BodyFormat::Storage),
        "adf" | "atlas_doc_format" => Ok(BodyFormat::AtlasDocFormat),
        other => bail!("unknown body format '{other}' (expected storage or adf)"),
    }
}

fn parse_only_types(values: &[String]) -> Result<Vec<PageType>> {
    values
        .iter()
        .map(|value| match PageType::parse(value) {
            Some(page_type) => Ok(page_type),
            None => bail!("unknown page type '{value}' (expected Subcomponent, Option, or Tasks)"),
        })
        .collect()
}

fn print_reconcile_report(report: &ReconcileReport, rows_without_title: usize) {
    println!("publish{}", if report.dry_run { " (dry run)" } else { "" });
    println!("planned: {}", report.planned);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    if rows_without_title > 0 {
        println!("rows_without_title: {rows_without_title}");
    }
    println!("requests: {}", report.request_count);
    println!("success: {}", format_flag(report.success));
    if !report.pages.is_empty() {
        println!("pages:");
        for record in &report.pages {
            println!("  {}: {}", record.action, record.title);
            if let Some(detail) = &record.detail {
                for line in detail.lines() {
                    println!("      {line}");
                }
            }
        }
    }
    if !report.warnings.is_empty() {
        println!("warnings:");
        for warning in &report.warnings {
            println!("  - {warning}");
        }
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
