//! admin-e2e - run Django admin permission scenarios from the command line

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use admin_e2e::browser::{BrowserKind, WebDriverConfig};
use admin_e2e::harness::{Harness, HarnessConfig};
use admin_e2e::runner::RunnerOptions;
use admin_e2e::server::ServerConfig;
use admin_e2e::store::ManagePy;
use admin_e2e::wait::WaitPolicy;
use admin_e2e::E2eResult;

#[derive(Parser, Debug)]
#[command(name = "admin-e2e")]
#[command(author, version, about = "Permission E2E scenarios for the Django admin")]
struct Args {
    /// Directory of YAML scenarios
    #[arg(short, long, default_value = "scenarios", env = "ADMIN_E2E_SCENARIOS")]
    scenarios: PathBuf,

    /// Run only scenarios carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    name: Option<String>,

    /// Path to the project's manage.py
    #[arg(long, default_value = "manage.py", env = "ADMIN_E2E_MANAGE_PY")]
    manage_py: PathBuf,

    /// Python interpreter used to run manage.py
    #[arg(long, default_value = "python3", env = "ADMIN_E2E_PYTHON")]
    python: PathBuf,

    /// DJANGO_SETTINGS_MODULE for manage.py
    #[arg(long, env = "DJANGO_SETTINGS_MODULE")]
    settings: Option<String>,

    /// Use a running site instead of spawning runserver
    #[arg(long, env = "ADMIN_E2E_BASE_URL")]
    base_url: Option<String>,

    /// Port to run the server on (0 = auto)
    #[arg(long, default_value = "0")]
    port: u16,

    /// Skip `manage.py migrate` before starting the server
    #[arg(long)]
    no_migrate: bool,

    /// WebDriver endpoint (geckodriver / chromedriver)
    #[arg(long, default_value = "http://localhost:4444", env = "ADMIN_E2E_WEBDRIVER")]
    webdriver: String,

    /// Browser to use (firefox, chrome)
    #[arg(long, default_value = "firefox")]
    browser: BrowserKind,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Seconds each wait may take
    #[arg(long, default_value = "15")]
    timeout: u64,

    /// Fail instead of narrowing permissions the UI over-assigned
    #[arg(long)]
    no_narrow: bool,

    /// Extra case-insensitive denial markers (repeatable)
    #[arg(long = "denial-marker")]
    denial_markers: Vec<String>,

    /// Output directory for results and failure screenshots
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("admin-e2e v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let mut runner = RunnerOptions {
        wait: WaitPolicy {
            timeout: Duration::from_secs(args.timeout),
            ..Default::default()
        },
        narrow_permissions: !args.no_narrow,
        screenshot_dir: Some(args.output.join("screenshots")),
        ..Default::default()
    };
    runner.denial_markers.extend(args.denial_markers);

    let config = HarnessConfig {
        server: ServerConfig {
            project: ManagePy {
                python: args.python,
                manage_py: args.manage_py,
                settings_module: args.settings,
            },
            port: if args.port == 0 { None } else { Some(args.port) },
            migrate: !args.no_migrate,
            ..Default::default()
        },
        base_url: args.base_url,
        webdriver: WebDriverConfig {
            url: args.webdriver,
            browser: args.browser,
            headless: !args.headed,
            ..Default::default()
        },
        runner,
        scenarios_dir: args.scenarios,
        output_dir: args.output,
    };

    let mut harness = Harness::with_config(config);

    let outcome = if let Some(name) = args.name {
        harness.run_named(&name).await
    } else if let Some(tag) = args.tag {
        harness.run_tagged(&tag).await
    } else {
        harness.run_all().await
    };

    let shutdown = harness.shutdown().await;
    let results = outcome?;
    shutdown?;

    harness.write_results(&results)?;

    Ok(results.failed == 0)
}
