use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::core::pension::{PensionEstimate, estimate_csrs, estimate_fers};
use crate::core::rmd::{calculate_rmd, get_distribution_period, rmd_start_age};
use crate::core::social_security::{
    SocialSecurityEstimate, benefit_from_pia, calculate_pia,
};
use crate::core::tax::{
    FilingStatus, ProgressiveTaxResult, calculate_progressive_tax, federal_table, resolve_state,
};
use crate::core::{
    BacktestConfig, BacktestSummary, EngineError, FALLBACK_FAILURE_MESSAGE, MonteCarloConfig,
    MonteCarloSummary, PlanInputs, SimulationYear, WithdrawalStrategy, run_backtest,
    run_monte_carlo, run_simulation,
};

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Retirement planner: yearly cash-flow simulation, Monte Carlo and historical backtests"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run the deterministic single-path simulation for a plan file.
    Simulate {
        #[arg(long, help = "Path to a JSON plan (accounts, incomes, expenses, assumptions)")]
        plan: PathBuf,
    },
    /// Run a Monte Carlo simulation for a plan file.
    MonteCarlo(MonteCarloArgs),
    /// Replay withdrawals over every historical window.
    Backtest(BacktestArgs),
}

#[derive(Args, Debug)]
pub struct MonteCarloArgs {
    #[arg(long)]
    pub plan: PathBuf,
    #[arg(long, default_value_t = 1000)]
    pub scenarios: u32,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    #[arg(long, default_value_t = 7.0, help = "Mean annual return in percent")]
    pub return_mean: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Annual return standard deviation in percent"
    )]
    pub return_std_dev: f64,
}

impl From<&MonteCarloArgs> for MonteCarloConfig {
    fn from(args: &MonteCarloArgs) -> Self {
        MonteCarloConfig {
            num_scenarios: args.scenarios,
            seed: args.seed,
            return_mean: args.return_mean,
            return_std_dev: args.return_std_dev,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliWithdrawalStrategy {
    FixedReal,
    FixedPercentage,
    GuytonKlinger,
}

#[derive(Args, Debug)]
pub struct BacktestArgs {
    #[arg(long, default_value_t = 30)]
    pub years: u32,
    #[arg(long, default_value_t = 1_000_000.0)]
    pub balance: f64,
    #[arg(long, default_value_t = 40_000.0, help = "First-year withdrawal")]
    pub withdrawal: f64,
    #[arg(long, default_value_t = 60.0, help = "Stock allocation in percent")]
    pub stock_allocation: f64,
    #[arg(long, value_enum, default_value_t = CliWithdrawalStrategy::FixedReal)]
    pub strategy: CliWithdrawalStrategy,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Fixed-percentage withdrawal rate in percent"
    )]
    pub withdrawal_rate: f64,
    #[arg(long, default_value_t = 6.0, help = "Guyton-Klinger upper guardrail in percent")]
    pub upper_guardrail: f64,
    #[arg(long, default_value_t = 4.0, help = "Guyton-Klinger lower guardrail in percent")]
    pub lower_guardrail: f64,
    #[arg(long, default_value_t = 10.0, help = "Guardrail spending adjustment in percent")]
    pub adjustment: f64,
    #[arg(long, default_value_t = 3.0, help = "Annual inflation in percent")]
    pub inflation: f64,
}

impl From<&BacktestArgs> for BacktestConfig {
    fn from(args: &BacktestArgs) -> Self {
        let withdrawal_strategy = match args.strategy {
            CliWithdrawalStrategy::FixedReal => WithdrawalStrategy::FixedReal,
            CliWithdrawalStrategy::FixedPercentage => WithdrawalStrategy::FixedPercentage {
                rate: args.withdrawal_rate / 100.0,
            },
            CliWithdrawalStrategy::GuytonKlinger => WithdrawalStrategy::GuytonKlinger {
                upper_guardrail: args.upper_guardrail / 100.0,
                lower_guardrail: args.lower_guardrail / 100.0,
                adjustment: args.adjustment / 100.0,
            },
        };
        BacktestConfig {
            retirement_years: args.years,
            starting_balance: args.balance,
            annual_withdrawal: args.withdrawal,
            stock_allocation: args.stock_allocation,
            withdrawal_strategy,
            inflation_rate: args.inflation / 100.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid plan JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("server error: {0}")]
    Server(std::io::Error),
}

fn load_plan(path: &Path) -> Result<PlanInputs, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await.map_err(CliError::Server),
        Command::Simulate { plan } => {
            let plan = load_plan(&plan)?;
            print_json(&SimulateResponse {
                years: run_simulation(&plan)?,
            })
        }
        Command::MonteCarlo(args) => {
            let plan = load_plan(&args.plan)?;
            let config = MonteCarloConfig::from(&args);
            let mut report = |percent: f64| debug!(percent, "monte carlo progress");
            print_json(&run_monte_carlo(&plan, &config, Some(&mut report))?)
        }
        Command::Backtest(args) => print_json(&run_backtest(&BacktestConfig::from(&args))?),
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{}", FALLBACK_FAILURE_MESSAGE)]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::InvalidInput { .. })
            | ApiError::Engine(EngineError::UnknownAccount { .. })
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(EngineError::Computation(_)) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.status(), &self.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    years: Vec<SimulationYear>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonteCarloRequest {
    plan: PlanInputs,
    #[serde(default)]
    config: MonteCarloConfig,
}

pub fn router() -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/backtest", post(backtest_handler))
        .route("/api/lookup/rmd", get(rmd_lookup_handler))
        .route("/api/lookup/tax", get(tax_lookup_handler))
        .route("/api/lookup/social-security", get(social_security_lookup_handler))
        .route("/api/lookup/fers", get(fers_lookup_handler))
        .route("/api/lookup/csrs", get(csrs_lookup_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "nestegg HTTP API listening");
    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(plan): Json<PlanInputs>) -> Result<Response, ApiError> {
    let years = run_simulation(&plan)?;
    Ok(json_response(StatusCode::OK, SimulateResponse { years }))
}

async fn monte_carlo_handler(
    Json(request): Json<MonteCarloRequest>,
) -> Result<Response, ApiError> {
    let summary = run_monte_carlo_blocking(request).await?;
    Ok(json_response(StatusCode::OK, summary))
}

async fn run_monte_carlo_blocking(request: MonteCarloRequest) -> Result<MonteCarloSummary, ApiError> {
    tokio::task::spawn_blocking(move || run_monte_carlo(&request.plan, &request.config, None))
        .await
        .map_err(|_| ApiError::Internal)?
        .map_err(ApiError::from)
}

async fn backtest_handler(Json(config): Json<BacktestConfig>) -> Result<Response, ApiError> {
    let summary: BacktestSummary = run_backtest(&config)?;
    Ok(json_response(StatusCode::OK, summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RmdQuery {
    age: u32,
    balance: f64,
    birth_year: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RmdLookup {
    age: u32,
    distribution_period: f64,
    required_distribution: f64,
    start_age: Option<u32>,
}

fn rmd_lookup(query: &RmdQuery) -> RmdLookup {
    let start_age = query.birth_year.map(rmd_start_age);
    let required = if start_age.is_some_and(|start| query.age < start) {
        0.0
    } else {
        calculate_rmd(query.balance, query.age)
    };
    RmdLookup {
        age: query.age,
        distribution_period: get_distribution_period(query.age),
        required_distribution: required,
        start_age,
    }
}

async fn rmd_lookup_handler(Query(query): Query<RmdQuery>) -> Response {
    json_response(StatusCode::OK, rmd_lookup(&query))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaxQuery {
    gross_income: f64,
    #[serde(default)]
    pre_tax_deductions: f64,
    #[serde(default)]
    filing_status: FilingStatus,
    state: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaxLookup {
    federal: ProgressiveTaxResult,
    state_tax: f64,
}

fn tax_lookup(query: &TaxQuery) -> Result<TaxLookup, ApiError> {
    let table = federal_table(query.filing_status);
    let federal = calculate_progressive_tax(
        query.gross_income,
        query.pre_tax_deductions,
        table.brackets,
        table.standard_deduction,
        None,
        0.0,
    );
    let state_tax = match query.state.as_deref() {
        Some(code) => resolve_state(code)?.tax(
            federal.adjusted_gross_income,
            query.filing_status,
            1.0,
        ),
        None => 0.0,
    };
    Ok(TaxLookup { federal, state_tax })
}

async fn tax_lookup_handler(Query(query): Query<TaxQuery>) -> Result<Response, ApiError> {
    Ok(json_response(StatusCode::OK, tax_lookup(&query)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialSecurityQuery {
    birth_year: i32,
    claim_age: u32,
    #[serde(default)]
    claim_month: u32,
    pia: Option<f64>,
    aime: Option<f64>,
}

const MAX_CLAIM_AGE: u32 = 120;

fn social_security_lookup(query: &SocialSecurityQuery) -> Result<SocialSecurityEstimate, ApiError> {
    if query.claim_month > 11 {
        return Err(ApiError::BadRequest("claimMonth must be within 0..=11".to_string()));
    }
    if query.claim_age > MAX_CLAIM_AGE {
        return Err(ApiError::BadRequest(format!(
            "claimAge must be at most {MAX_CLAIM_AGE}"
        )));
    }
    let claim_months = query.claim_age * 12 + query.claim_month;
    match (query.pia, query.aime) {
        (Some(pia), _) => Ok(benefit_from_pia(pia, query.birth_year, claim_months)),
        (None, Some(aime)) => {
            let pia = calculate_pia(aime, query.birth_year);
            Ok(SocialSecurityEstimate {
                aime,
                ..benefit_from_pia(pia, query.birth_year, claim_months)
            })
        }
        (None, None) => Err(ApiError::BadRequest(
            "either pia or aime is required".to_string(),
        )),
    }
}

async fn social_security_lookup_handler(
    Query(query): Query<SocialSecurityQuery>,
) -> Result<Response, ApiError> {
    Ok(json_response(StatusCode::OK, social_security_lookup(&query)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PensionQuery {
    age: u32,
    years_of_service: f64,
    high3: f64,
    birth_year: Option<i32>,
    #[serde(default)]
    ss_monthly_at62: f64,
}

fn fers_lookup(query: &PensionQuery) -> Result<PensionEstimate, ApiError> {
    let birth_year = query
        .birth_year
        .ok_or_else(|| ApiError::BadRequest("birthYear is required for FERS".to_string()))?;
    Ok(estimate_fers(
        query.age,
        query.years_of_service,
        birth_year,
        query.high3,
        query.ss_monthly_at62,
    ))
}

async fn fers_lookup_handler(Query(query): Query<PensionQuery>) -> Result<Response, ApiError> {
    Ok(json_response(StatusCode::OK, fers_lookup(&query)?))
}

async fn csrs_lookup_handler(Query(query): Query<PensionQuery>) -> Response {
    json_response(
        StatusCode::OK,
        estimate_csrs(query.age, query.years_of_service, query.high3),
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
