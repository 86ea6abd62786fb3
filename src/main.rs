//! bookarr server entry point.

use bookarr::{
    config::{Cli, Command, Config},
    db::Database,
    server::{self, AppState},
};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::Search {
            query,
            mode,
            author,
            max_results,
        }) => cmd_search(config, query, mode, author, max_results).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookarr=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    // Initialize database
    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then set a Google Books API key under Settings > API Keys, or in [providers.google_books].");

    Ok(())
}

/// One-off metadata search, printed as a table.
async fn cmd_search(
    config: Config,
    query: String,
    mode: String,
    author: Option<String>,
    max_results: u32,
) -> anyhow::Result<()> {
    init_tracing();

    let mut params = HashMap::from([
        ("q".to_string(), query),
        ("type".to_string(), mode),
        ("maxResults".to_string(), max_results.to_string()),
    ]);
    if let Some(author) = author {
        params.insert("author".to_string(), author);
    }
    let query = server::search_query_from_params(&params)?;

    let referer = config.providers.referer.clone();
    let db = Database::open(&config.database.path)?;
    let state = AppState::new(config, db)?;
    let page = state.aggregator()?.search(&query, &referer).await?;

    for warning in &page.warnings {
        eprintln!("warning: {} ({}): {}", warning.provider, warning.status, warning.message);
    }

    if page.candidates.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("{:<40} {:<25} {:<15} SOURCE", "TITLE", "AUTHOR", "ISBN");
    println!("{}", "-".repeat(95));
    for candidate in &page.candidates {
        let isbn = candidate
            .isbn13
            .as_deref()
            .or(candidate.isbn10.as_deref())
            .unwrap_or("-");
        println!(
            "{:<40} {:<25} {:<15} {}",
            truncate(&candidate.title, 40),
            truncate(candidate.primary_author().unwrap_or("-"), 25),
            isbn,
            candidate.qualified_id()
        );
    }
    println!(
        "\n{} shown, about {} total{}",
        page.candidates.len(),
        page.total_estimate,
        if page.has_more { ", more available" } else { "" }
    );

    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    init_tracing();

    // Open database
    let db = Database::open(&config.database.path)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        google_books = config.providers.google_books.enabled,
        open_library = config.providers.open_library.enabled,
        "Starting bookarr server"
    );

    // Create application state
    let state = AppState::new(config.clone(), db)?;

    if state.google_books_key()?.is_none() && config.providers.google_books.enabled {
        tracing::warn!("Google Books API key not configured; set it under Settings > API Keys");
    }

    // Create router
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
