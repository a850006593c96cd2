use clap::{Arg, Command};
use cvgate::admin::{AdminApi, StaticTokenAuthenticator};
use cvgate::config::Config;
use cvgate::pipeline::Pipeline;
use cvgate::rate_limit::SystemClock;
use cvgate::server::Server;
use cvgate::store::{LeadStore, Origin};
use cvgate::transport::FileSpoolTransport;
use cvgate::validator::Submission;
use log::LevelFilter;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("cvgate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Gated CV delivery and lead capture service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/cvgate.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .help("Run a sample submission through the pipeline and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config_path = matches.get_one::<String>("config").unwrap();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        match validate_config(&config) {
            Ok(()) => {
                println!("Configuration OK");
                println!("  socket: {}", config.socket_path);
                println!("  database: {}", config.database_path);
                println!(
                    "  rate limit: {} requests per {}s",
                    config.rate_limit.max_requests, config.rate_limit.window_seconds
                );
                println!("  dispatch workers: {}", config.dispatch.workers);
                println!("  admin tokens: {}", config.admin_tokens.len());
            }
            Err(e) => {
                eprintln!("Configuration invalid: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("demo") {
        if let Err(e) = run_demo(&config).await {
            eprintln!("Demo failed: {e}");
            process::exit(1);
        }
        return;
    }

    log::info!("Starting cvgate...");

    if let Err(e) = run_daemon(config).await {
        log::error!("cvgate error: {e}");
        process::exit(1);
    }
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(LeadStore::open(
        &config.database_path,
        config.dedup_window_seconds,
    )?);
    let transport = Arc::new(FileSpoolTransport::new(&config.email.outbox_dir)?);
    let clock = Arc::new(SystemClock);

    let pipeline = Arc::new(Pipeline::new(&config, store.clone(), transport, clock.clone()));
    let admin = Arc::new(AdminApi::new(
        store,
        Arc::new(StaticTokenAuthenticator::new(&config.admin_tokens)),
        clock,
    ));

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;

    let server = Server::new(pipeline.clone(), admin);
    tokio::select! {
        result = server.run(&config.socket_path) => result?,
        _ = shutdown_rx.recv() => {
            log::info!("Received shutdown signal, draining dispatch queue...");
        }
    }

    pipeline.shutdown().await;
    if std::path::Path::new(&config.socket_path).exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    log::info!("Shutdown complete");
    Ok(())
}

/// Exercises the full pipeline against an in-memory store so a deployment
/// can be sanity-checked without touching the production database.
async fn run_demo(config: &Config) -> anyhow::Result<()> {
    println!("Running demo submission...");

    let store = Arc::new(LeadStore::open_in_memory(config.dedup_window_seconds)?);
    let outbox = tempdir_path()?;
    let transport = Arc::new(FileSpoolTransport::new(&outbox)?);
    let pipeline = Pipeline::new(config, store.clone(), transport, Arc::new(SystemClock));

    let submission = Submission {
        name: "Demo Requester".to_string(),
        email: "demo@example.com".to_string(),
        phone: "+15550102345".to_string(),
        company: Some("Example Corp".to_string()),
        role: Some("Hiring Manager".to_string()),
        purpose: Some("Evaluating for a senior role".to_string()),
        consent: true,
        website: String::new(),
    };
    let origin = Origin {
        ip_address: Some("127.0.0.1".to_string()),
        user_agent: Some("cvgate-demo".to_string()),
    };

    let response = pipeline.handle_intake(&submission, &origin)?;
    println!("  lead created: {}", response.request_id);
    println!("  message: {}", response.message);

    // Give the dispatch workers a moment to spool the emails
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let status = pipeline.request_status(response.request_id)?;
    println!("  lead status: {}", status.status);
    if let Some(email_status) = status.email_status {
        println!("  cv email: {}", email_status.as_str());
    }
    println!("  spooled mail in: {outbox}");

    pipeline.shutdown().await;
    Ok(())
}

fn tempdir_path() -> anyhow::Result<String> {
    let dir = std::env::temp_dir().join(format!("cvgate-demo-{}", process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir.to_string_lossy().into_owned())
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn validate_config(config: &Config) -> anyhow::Result<()> {
    if config.dispatch.workers == 0 {
        anyhow::bail!("dispatch.workers must be at least 1");
    }
    if config.dispatch.queue_depth == 0 {
        anyhow::bail!("dispatch.queue_depth must be at least 1");
    }
    if config.rate_limit.max_requests == 0 {
        anyhow::bail!("rate_limit.max_requests must be at least 1");
    }
    if config.rate_limit.window_seconds == 0 {
        anyhow::bail!("rate_limit.window_seconds must be at least 1");
    }
    if config.dedup_window_seconds == 0 {
        anyhow::bail!("dedup_window_seconds must be at least 1");
    }
    Ok(())
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}
