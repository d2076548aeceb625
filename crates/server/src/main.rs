//! Coin Scanner: technical-analysis scanner for crypto markets
//!
//! Usage:
//!   coin-scanner serve --port 3001           Launch the HTTP API
//!   coin-scanner scan --mode quick           Run a market scan from CLI
//!   coin-scanner analyze --symbol BTCUSDT    Full indicator report
//!   coin-scanner watch --symbol BTCUSDT      Stream live ticker updates

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::api::{subscribe_ticker, DEFAULT_BASE_URL};
use engine::{
    analyze_instrument, run_claimed_scan, run_scan, BinanceClient, Indicator, Leaderboard, PricePoint, ScanCache,
    ScanMode, ScanProgress, ScanStatus, Signal, SqliteScanCache,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "coin-scanner", version = APP_VERSION)]
#[command(about = "Technical-analysis scanner for crypto markets", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
        /// Optional directory of static files served at `/`
        #[arg(long)]
        static_dir: Option<String>,
    },
    /// Run a market scan from CLI (no web server)
    Scan {
        /// Scan mode: quick, detailed, high-leverage
        #[arg(long, default_value = "quick")]
        mode: ScanMode,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Print the full indicator analysis for one symbol
    Analyze {
        /// Pair symbol, e.g. BTCUSDT
        #[arg(long)]
        symbol: String,
        /// Kline interval
        #[arg(long, default_value = "4h")]
        interval: String,
        /// Number of candles
        #[arg(long, default_value_t = 250)]
        limit: usize,
    },
    /// Stream live 24h ticker updates until Ctrl+C
    Watch {
        /// Pair symbol, e.g. BTCUSDT
        #[arg(long)]
        symbol: String,
    },
    /// Remove every cached market-data entry
    CacheClear,
}

#[derive(Clone)]
struct AppState {
    binance: Arc<BinanceClient>,
    cache: Arc<SqliteScanCache>,
    progress: Arc<ScanProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,coin_scanner=debug")
    } else {
        EnvFilter::new("info,engine=info,coin_scanner=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn cache_db_path() -> String {
    std::env::var("SCANNER_CACHE_DB_PATH").unwrap_or_else(|_| "data/cache.db".to_string())
}

fn binance_client() -> BinanceClient {
    let base_url =
        std::env::var("BINANCE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    BinanceClient::with_base_url(base_url)
}

async fn open_cache(db_path: &str) -> anyhow::Result<SqliteScanCache> {
    let db = persistence::Database::new(db_path).await.map_err(|e| {
        error!("Failed to initialize cache database: {}", e);
        anyhow::anyhow!("Cache database initialization failed: {}", e)
    })?;
    let cache = SqliteScanCache::new(db);
    let purged = cache.purge_expired().await;
    info!(path = db_path, purged, "Cache database ready");
    Ok(cache)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve {
            host,
            port,
            static_dir,
        } => {
            cmd_serve(&host, port, static_dir).await?;
        }
        Commands::Scan { mode, export } => {
            cmd_scan(mode, export).await?;
        }
        Commands::Analyze {
            symbol,
            interval,
            limit,
        } => {
            cmd_analyze(&symbol, &interval, limit).await?;
        }
        Commands::Watch { symbol } => {
            cmd_watch(&symbol).await?;
        }
        Commands::CacheClear => {
            let cache = open_cache(&cache_db_path()).await?;
            cache.clear().await;
            println!("Cache cleared");
        }
    }

    Ok(())
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16, static_dir: Option<String>) -> anyhow::Result<()> {
    info!("Coin Scanner v{} starting...", APP_VERSION);

    let db_path = cache_db_path();
    let cache = open_cache(&db_path).await?;

    let state = AppState {
        binance: Arc::new(binance_client()),
        cache: Arc::new(cache),
        progress: Arc::new(ScanProgress::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/scan", post(api_start_scan))
        .route("/scan/status", get(api_scan_status))
        .route("/analyze", get(api_analyze))
        .route("/cache/clear", post(api_clear_cache))
        .with_state(state);

    let mut app = Router::new().nest("/api", api_routes);
    if let Some(dir) = &static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    let app = app.layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Coin Scanner v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  POST /api/scan                - Start a market scan");
    println!("  GET  /api/scan/status         - Poll scan progress");
    println!("  GET  /api/analyze             - Analyze one symbol");
    println!("  POST /api/cache/clear         - Clear market-data cache");
    println!("\n  Cache: {}", db_path);
    if let Some(dir) = &static_dir {
        println!("  Static files: {}", dir);
    }
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Scan command: CLI mode (no web server)
// ============================================================================

async fn cmd_scan(mode: ScanMode, export: Option<String>) -> anyhow::Result<()> {
    println!("\n=== Coin Scanner v{} ===", APP_VERSION);

    let db_path = cache_db_path();
    let cache = Arc::new(open_cache(&db_path).await?);
    let binance = Arc::new(binance_client());
    let progress = Arc::new(ScanProgress::new());

    let preset = mode.preset();
    println!(
        "Mode: {} | Instruments: {} | Lookback: {} days",
        mode, preset.instruments, preset.lookback_days
    );
    println!("Cache: {}\n", db_path);

    let scan_progress = progress.clone();
    let handle = tokio::spawn(async move {
        run_scan(&*binance, &*cache, &scan_progress, mode).await
    });

    // Progress display loop
    while !handle.is_finished() {
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        let status = *progress.status.read().unwrap();
        let analyzed = progress.analyzed.load(Ordering::Relaxed);
        let total = progress.total.load(Ordering::Relaxed);
        let current = progress.current_instrument.read().unwrap().clone();

        match status {
            ScanStatus::FetchingInstruments => {
                print!("\r  Fetching instruments...                                      ");
            }
            ScanStatus::Analyzing => {
                let pct = if total > 0 { analyzed * 100 / total } else { 0 };
                let bar_len = 30;
                let filled = (pct as usize * bar_len) / 100;
                let bar: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
                print!(
                    "\r  [{}] {:>3}% ({}/{}) {:<12}   ",
                    bar, pct, analyzed, total, current
                );
            }
            _ => {}
        }
    }
    println!();

    let leaderboard = match handle.await? {
        Ok(leaderboard) => leaderboard,
        Err(e) => {
            println!("  Error: {}", e.user_message());
            return Err(e.into());
        }
    };

    print_leaderboard(&leaderboard);

    if let Some(export_path) = export {
        let json = serde_json::to_string_pretty(&leaderboard)?;
        std::fs::write(&export_path, &json)?;
        println!("\nLeaderboard exported to {}", export_path);
    }

    Ok(())
}

fn print_signals(title: &str, signals: &[Signal]) {
    println!("\n{}:", title);
    if signals.is_empty() {
        println!("  (none)");
        return;
    }
    println!(
        "  {:>3}  {:<12} {:<6} {:>6} {:>14}  {}",
        "#", "Symbol", "Side", "Score", "Price", "Reasons"
    );
    println!("  {}", "-".repeat(75));
    for (i, s) in signals.iter().enumerate() {
        println!(
            "  {:>3}  {:<12} {:<6} {:>6} {:>14.6}  {}",
            i + 1,
            s.instrument.symbol,
            s.direction.label(),
            s.score,
            s.price,
            s.reasons.join(", "),
        );
        if let (Some(pattern), Some(stop)) = (&s.pattern, s.stop_price) {
            println!("       pattern: {} | stop: {:.6}", pattern, stop);
        }
    }
}

fn print_leaderboard(leaderboard: &Leaderboard) {
    println!(
        "\nAnalyzed {}/{} instruments ({} mode)",
        leaderboard.analyzed, leaderboard.total, leaderboard.mode
    );
    print_signals("Top longs", &leaderboard.longs);
    print_signals("Top shorts", &leaderboard.shorts);
    if leaderboard.mode != ScanMode::HighLeverage {
        print_signals("Top overall", &leaderboard.top);
    }
}

// ============================================================================
// Analyze command
// ============================================================================

fn close_series(candles: &[engine::Candle]) -> Vec<PricePoint> {
    candles
        .iter()
        .map(|c| PricePoint {
            time: c.time,
            value: c.close,
        })
        .collect()
}

async fn cmd_analyze(symbol: &str, interval: &str, limit: usize) -> anyhow::Result<()> {
    let binance = binance_client();
    let symbol = symbol.to_uppercase();
    let candles = binance.get_klines(&symbol, interval, limit).await?;
    let analysis = analyze_instrument(&candles, &close_series(&candles));

    println!("\n=== {} ({} x {}) ===", symbol, candles.len(), interval);
    match binance.get_24h_stats(&symbol).await {
        Ok(stats) => println!(
            "Price: {:.6} | 24h {:+.2}% | H {:.6} L {:.6} | Vol {}",
            stats.last_price,
            stats.price_change_percent,
            stats.high_price,
            stats.low_price,
            engine::indicators::format_volume(stats.quote_volume),
        ),
        Err(_) => println!("Price: {:.6}", analysis.price),
    }

    let ind = &analysis.indicators;
    let rows: [(&str, Option<&dyn Indicator>); 8] = [
        ("RSI", ind.rsi.as_ref().map(|r| r as &dyn Indicator)),
        ("Stoch RSI", ind.stoch_rsi.as_ref().map(|r| r as &dyn Indicator)),
        ("MACD", ind.macd.as_ref().map(|r| r as &dyn Indicator)),
        ("MA200", ind.ma200.as_ref().map(|r| r as &dyn Indicator)),
        ("Bollinger", ind.bollinger.as_ref().map(|r| r as &dyn Indicator)),
        ("Volume", ind.volume.as_ref().map(|r| r as &dyn Indicator)),
        ("Patterns", ind.patterns.as_ref().map(|r| r as &dyn Indicator)),
        ("ADX", ind.adx.as_ref().map(|r| r as &dyn Indicator)),
    ];
    println!();
    for (name, reading) in rows.iter() {
        if let Some(r) = reading {
            println!("  {:<10} {:<8} {}", name, r.bias().label(), r.description());
        }
    }
    println!("  {:<10} {:<8} {}", "OBV", analysis.obv.bias().label(), analysis.obv.description);
    println!(
        "  {:<10} {:<8} {}",
        "S/R",
        analysis.support_resistance.bias().label(),
        analysis.support_resistance.description
    );
    println!(
        "  {:<10} {:<8} {}",
        "Fibonacci",
        analysis.fibonacci.bias().label(),
        analysis.fibonacci.description
    );
    let p = analysis.pivots.get();
    println!(
        "  {:<10} P {:.4} | R1 {:.4} R2 {:.4} R3 {:.4} | S1 {:.4} S2 {:.4} S3 {:.4}",
        "Pivots", p.pp, p.r1, p.r2, p.r3, p.s1, p.s2, p.s3
    );

    let o = &analysis.overall;
    println!(
        "\nOverall: {} (bullish {:.0}%, bearish {:.0}%, confidence {:.1})",
        o.recommendation.label(),
        o.bullish_percent,
        o.bearish_percent,
        o.confidence
    );

    Ok(())
}

// ============================================================================
// Watch command: live ticker
// ============================================================================

async fn cmd_watch(symbol: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, closing stream...");
        shutdown_tx.send(true).ok();
    });

    let stream_symbol = symbol.to_string();
    let handle =
        tokio::spawn(async move { subscribe_ticker(&stream_symbol, tx, shutdown_rx).await });

    println!("Watching {} (Ctrl+C to stop)\n", symbol.to_uppercase());
    while let Some(update) = rx.recv().await {
        println!(
            "  {} {:>14.6}  {:>+7.2}%  H {:.6}  L {:.6}  Vol {}",
            update.symbol,
            update.price,
            update.price_change_percent,
            update.high_24h,
            update.low_24h,
            engine::indicators::format_volume(update.quote_volume),
        );
    }

    handle.await??;
    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "coin-scanner",
        "version": APP_VERSION,
    }))
}

#[derive(Deserialize)]
struct ScanRequest {
    mode: ScanMode,
}

/// POST /api/scan: start a market scan in the background
async fn api_start_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Json<serde_json::Value> {
    let claim = match state.progress.claim() {
        Ok(claim) => claim,
        Err(_) => {
            let analyzed = state.progress.analyzed.load(Ordering::Relaxed);
            let total = state.progress.total.load(Ordering::Relaxed);
            return Json(serde_json::json!({
                "success": false,
                "message": format!("A scan is already running ({}/{} analyzed)", analyzed, total),
            }));
        }
    };

    let mode = request.mode;
    info!(mode = %mode, "Starting scan via API");

    let binance = state.binance.clone();
    let cache = state.cache.clone();
    tokio::spawn(async move {
        if let Err(e) = run_claimed_scan(&*binance, &*cache, claim, mode).await {
            error!(mode = %mode, error = %e, "Scan failed");
        }
    });

    Json(serde_json::json!({
        "success": true,
        "message": format!("{} scan started", mode),
        "mode": mode,
    }))
}

/// GET /api/scan/status: poll scan progress
async fn api_scan_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let progress = &state.progress;
    let status = *progress.status.read().unwrap();
    let mode = *progress.mode.read().unwrap();
    let current_instrument = progress.current_instrument.read().unwrap().clone();
    let total = progress.total.load(Ordering::Relaxed);
    let analyzed = progress.analyzed.load(Ordering::Relaxed);
    let leaderboard = progress.leaderboard.read().unwrap().clone();
    let error = progress.error_message.read().unwrap().clone();
    let started_at = *progress.started_at.read().unwrap();

    Json(serde_json::json!({
        "status": status,
        "mode": mode,
        "running": progress.is_running(),
        "current_instrument": current_instrument,
        "analyzed": analyzed,
        "total": total,
        "leaderboard": leaderboard,
        "error": error,
        "started_at": started_at,
    }))
}

/// GET /api/analyze: full indicator analysis for one symbol
async fn api_analyze(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let symbol = params
        .get("symbol")
        .map(|s| s.to_uppercase())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let interval = params
        .get("interval")
        .cloned()
        .unwrap_or_else(|| "4h".to_string());
    let limit: usize = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(250);

    match state.binance.get_klines(&symbol, &interval, limit).await {
        Ok(candles) => {
            let analysis = analyze_instrument(&candles, &close_series(&candles));
            let ticker = state.binance.get_24h_stats(&symbol).await.ok();
            Ok(Json(serde_json::json!({
                "success": true,
                "symbol": symbol,
                "interval": interval,
                "count": candles.len(),
                "ticker": ticker,
                "analysis": analysis,
            })))
        }
        Err(e) => {
            error!(symbol = %symbol, "Analyze fetch error: {}", e);
            let message = if e.is_rate_limited() {
                "Exchange rate limit reached, wait a minute and retry."
            } else {
                "Connection problem, please try again."
            };
            Ok(Json(serde_json::json!({
                "success": false,
                "message": message,
            })))
        }
    }
}

/// POST /api/cache/clear
async fn api_clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.cache.clear().await;
    info!("Cache cleared via API");
    Json(serde_json::json!({
        "success": true,
        "message": "Cache cleared",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state() -> AppState {
        let db = persistence::Database::in_memory().await.unwrap();
        AppState {
            // nothing listens here; scans fail fast on the listing call
            binance: Arc::new(BinanceClient::with_base_url("http://127.0.0.1:9")),
            cache: Arc::new(SqliteScanCache::new(db)),
            progress: Arc::new(ScanProgress::new()),
        }
    }

    fn scan_request(mode: ScanMode) -> Json<ScanRequest> {
        Json(ScanRequest { mode })
    }

    #[tokio::test]
    async fn test_start_scan_rejected_while_claimed() {
        let state = test_state().await;
        let _claim = state.progress.claim().unwrap();

        let Json(body) = api_start_scan(State(state.clone()), scan_request(ScanMode::Quick)).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_back_to_back_starts_only_one_succeeds() {
        let state = test_state().await;

        let Json(first) = api_start_scan(State(state.clone()), scan_request(ScanMode::Quick)).await;
        let Json(second) =
            api_start_scan(State(state.clone()), scan_request(ScanMode::Detailed)).await;

        assert_eq!(first["success"], true);
        assert_eq!(second["success"], false);
        assert!(state.progress.is_running());
    }

    #[tokio::test]
    async fn test_health_reports_build_version() {
        let Json(body) = api_health().await;
        assert_eq!(body["version"], APP_VERSION);
        assert!(APP_VERSION.ends_with(env!("GIT_HASH")));
    }

    #[test]
    fn test_version_flag_prints_build_version() {
        let err = match Cli::try_parse_from(["coin-scanner", "--version"]) {
            Ok(_) => panic!("--version should short-circuit parsing"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(APP_VERSION));
    }
}
