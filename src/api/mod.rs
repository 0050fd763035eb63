use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::{
    DEFAULT_RENT_GROWTH_RATE, DeductionPolicy, FEDERAL_INTEREST_CAP_BASE, Inputs,
    MAX_LOAN_TERM_YEARS, Projection, ProjectionError, STATE_INTEREST_CAP_BASE, ScheduleRow,
    SummaryResult, YearRecord, amortization_schedule, compute_fixed_payment, project,
};

const DEFAULT_PORT: u16 = 8080;
const CSV_FILENAME: &str = "homeownership.csv";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Parser, Debug)]
#[command(
    name = "homecalc",
    about = "Buy-vs-rent projection: mortgage amortization against renting and investing the difference"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON/CSV HTTP API
    Serve {
        #[arg(default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Print a year-by-year projection
    Project {
        #[command(flatten)]
        params: ProjectArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Print the monthly amortization schedule of the loan
    Schedule {
        #[command(flatten)]
        params: ProjectArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Args, Debug, Clone)]
struct ProjectArgs {
    #[arg(long, help = "Total purchase price of the home")]
    purchase_price: f64,
    #[arg(long, default_value_t = 0.0)]
    down_payment: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual mortgage rate in percent")]
    interest_rate: f64,
    #[arg(long, default_value_t = 30)]
    loan_term_years: u32,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual home price appreciation in percent"
    )]
    appreciation_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual property tax amount")]
    property_tax: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual home insurance amount")]
    insurance: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual maintenance amount")]
    maintenance: f64,
    #[arg(long, default_value_t = 0.0, help = "Rent avoided by owning, per month")]
    monthly_rent: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_RENT_GROWTH_RATE,
        help = "Annual rent growth in percent"
    )]
    rent_growth_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual return of the alternative investment in percent"
    )]
    investment_return_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Federal marginal tax bracket in percent"
    )]
    federal_tax_bracket: f64,
    #[arg(long, default_value_t = 0.0, help = "State marginal tax bracket in percent")]
    state_tax_bracket: f64,
    #[arg(long, default_value_t = 10, help = "Years of ownership to project")]
    ownership_years: u32,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Closing costs at purchase in percent of the price"
    )]
    closing_cost_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Broker and closing costs at sale in percent of the sale price"
    )]
    selling_cost_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Combined capital gains tax rate on a sale gain in percent"
    )]
    capital_gains_tax_rate: f64,
    #[arg(
        long,
        default_value_t = FEDERAL_INTEREST_CAP_BASE,
        help = "Mortgage principal whose interest is federally deductible"
    )]
    federal_interest_cap_base: f64,
    #[arg(
        long,
        default_value_t = STATE_INTEREST_CAP_BASE,
        help = "Mortgage principal whose interest is deductible for state tax"
    )]
    state_interest_cap_base: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    purchase_price: Option<f64>,
    down_payment: Option<f64>,
    interest_rate: Option<f64>,
    #[serde(alias = "loanTerm")]
    loan_term_years: Option<u32>,
    appreciation_rate: Option<f64>,
    property_tax: Option<f64>,
    insurance: Option<f64>,
    maintenance: Option<f64>,
    monthly_rent: Option<f64>,
    #[serde(alias = "rentGrowth")]
    rent_growth_rate: Option<f64>,
    #[serde(alias = "investmentReturn")]
    investment_return_rate: Option<f64>,
    #[serde(alias = "taxBracket")]
    federal_tax_bracket: Option<f64>,
    state_tax_bracket: Option<f64>,
    ownership_years: Option<u32>,
    #[serde(alias = "buyClosing")]
    closing_cost_rate: Option<f64>,
    #[serde(alias = "sellCost")]
    selling_cost_rate: Option<f64>,
    capital_gains_tax_rate: Option<f64>,
    federal_interest_cap_base: Option<f64>,
    state_interest_cap_base: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    inputs: Inputs,
    yearly: Vec<YearRecord>,
    summary: SummaryResult,
}

impl ProjectResponse {
    fn new(inputs: Inputs, projection: Projection) -> Self {
        Self {
            inputs,
            yearly: projection.yearly,
            summary: projection.summary,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    loan_amount: f64,
    monthly_payment: f64,
    rows: Vec<ScheduleRow>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_inputs(args: ProjectArgs) -> Result<Inputs, ProjectionError> {
    let inputs = build_loan_inputs(args)?;

    if inputs.ownership_years == 0 {
        return Err(ProjectionError::invalid("--ownership-years", "must be > 0"));
    }

    if inputs.ownership_years > inputs.loan_term_years {
        return Err(ProjectionError::invalid(
            "--ownership-years",
            "must be <= --loan-term-years",
        ));
    }

    Ok(inputs)
}

/// Validates everything but the ownership horizon. Schedules cover the whole
/// loan term and never read it.
fn build_loan_inputs(args: ProjectArgs) -> Result<Inputs, ProjectionError> {
    for (name, value) in [
        ("--purchase-price", args.purchase_price),
        ("--down-payment", args.down_payment),
        ("--interest-rate", args.interest_rate),
        ("--appreciation-rate", args.appreciation_rate),
        ("--property-tax", args.property_tax),
        ("--insurance", args.insurance),
        ("--maintenance", args.maintenance),
        ("--monthly-rent", args.monthly_rent),
        ("--rent-growth-rate", args.rent_growth_rate),
        ("--investment-return-rate", args.investment_return_rate),
        ("--federal-tax-bracket", args.federal_tax_bracket),
        ("--state-tax-bracket", args.state_tax_bracket),
        ("--closing-cost-rate", args.closing_cost_rate),
        ("--selling-cost-rate", args.selling_cost_rate),
        ("--capital-gains-tax-rate", args.capital_gains_tax_rate),
        ("--federal-interest-cap-base", args.federal_interest_cap_base),
        ("--state-interest-cap-base", args.state_interest_cap_base),
    ] {
        if !value.is_finite() {
            return Err(ProjectionError::invalid(name, "must be a finite number"));
        }
    }

    for (name, value) in [
        ("--purchase-price", args.purchase_price),
        ("--down-payment", args.down_payment),
        ("--interest-rate", args.interest_rate),
        ("--property-tax", args.property_tax),
        ("--insurance", args.insurance),
        ("--maintenance", args.maintenance),
        ("--monthly-rent", args.monthly_rent),
        ("--federal-interest-cap-base", args.federal_interest_cap_base),
        ("--state-interest-cap-base", args.state_interest_cap_base),
    ] {
        if value < 0.0 {
            return Err(ProjectionError::invalid(name, "must be >= 0"));
        }
    }

    if args.loan_term_years == 0 {
        return Err(ProjectionError::invalid("--loan-term-years", "must be > 0"));
    }

    if args.loan_term_years > MAX_LOAN_TERM_YEARS {
        return Err(ProjectionError::invalid(
            "--loan-term-years",
            format!("must be <= {MAX_LOAN_TERM_YEARS}"),
        ));
    }

    for (name, rate) in [
        ("--appreciation-rate", args.appreciation_rate),
        ("--rent-growth-rate", args.rent_growth_rate),
        ("--investment-return-rate", args.investment_return_rate),
    ] {
        if rate <= -100.0 {
            return Err(ProjectionError::invalid(name, "must be > -100"));
        }
    }

    for (name, rate) in [
        ("--federal-tax-bracket", args.federal_tax_bracket),
        ("--state-tax-bracket", args.state_tax_bracket),
        ("--closing-cost-rate", args.closing_cost_rate),
        ("--selling-cost-rate", args.selling_cost_rate),
        ("--capital-gains-tax-rate", args.capital_gains_tax_rate),
    ] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(ProjectionError::invalid(name, "must be between 0 and 100"));
        }
    }

    Ok(Inputs {
        purchase_price: args.purchase_price,
        down_payment: args.down_payment,
        interest_rate: args.interest_rate,
        loan_term_years: args.loan_term_years,
        appreciation_rate: args.appreciation_rate,
        property_tax: args.property_tax,
        insurance: args.insurance,
        maintenance: args.maintenance,
        monthly_rent: args.monthly_rent,
        rent_growth_rate: args.rent_growth_rate,
        investment_return_rate: args.investment_return_rate,
        federal_tax_bracket: args.federal_tax_bracket,
        state_tax_bracket: args.state_tax_bracket,
        ownership_years: args.ownership_years,
        closing_cost_rate: args.closing_cost_rate,
        selling_cost_rate: args.selling_cost_rate,
        capital_gains_tax_rate: args.capital_gains_tax_rate,
        deduction_policy: DeductionPolicy {
            federal_interest_cap_base: args.federal_interest_cap_base,
            state_interest_cap_base: args.state_interest_cap_base,
        },
    })
}

/// Installs the global `tracing` subscriber. Logs go to stderr so CLI output
/// on stdout stays machine-readable; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Fails only when a global subscriber is already set, e.g. by an embedding
    // binary or an earlier test; the existing one keeps receiving events.
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        debug!("tracing subscriber already installed");
    }
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await?,
        Command::Project { params, format } => {
            println!("{}", render_projection(params, format)?);
        }
        Command::Schedule { params, format } => {
            println!("{}", render_schedule(params, format)?);
        }
    }
    Ok(())
}

fn render_projection(params: ProjectArgs, format: OutputFormat) -> Result<String, AppError> {
    let inputs = build_inputs(params)?;
    let projection = project(&inputs)?;
    log_projection(&inputs, &projection.summary);

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&ProjectResponse::new(
            inputs, projection,
        ))?),
        OutputFormat::Csv => to_csv(&projection.yearly),
    }
}

fn render_schedule(params: ProjectArgs, format: OutputFormat) -> Result<String, AppError> {
    let inputs = build_loan_inputs(params)?;
    let schedule = build_schedule(&inputs)?;
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&schedule)?),
        OutputFormat::Csv => to_csv(&schedule.rows),
    }
}

fn build_schedule(inputs: &Inputs) -> Result<ScheduleResponse, ProjectionError> {
    let loan_amount = inputs.loan_amount();
    Ok(ScheduleResponse {
        loan_amount,
        monthly_payment: compute_fixed_payment(
            loan_amount,
            inputs.interest_rate,
            inputs.loan_term_years,
        )?,
        rows: amortization_schedule(loan_amount, inputs.interest_rate, inputs.loan_term_years)?,
    })
}

fn to_csv<T: Serialize>(rows: &[T]) -> Result<String, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn log_projection(inputs: &Inputs, summary: &SummaryResult) {
    info!(
        purchase_price = inputs.purchase_price,
        down_payment = inputs.down_payment,
        ownership_years = inputs.ownership_years,
        final_home_value = summary.final_home_value,
        equity_built = summary.equity_built,
        net_return = summary.net_return,
        annual_roi = ?summary.annual_roi,
        "projection computed"
    );
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route("/api/project.csv", get(project_csv_handler))
        .route("/api/schedule", get(schedule_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "homecalc HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/project");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(Query(payload): Query<ProjectPayload>) -> Response {
    project_handler_impl(payload).await
}

async fn project_post_handler(Json(payload): Json<ProjectPayload>) -> Response {
    project_handler_impl(payload).await
}

async fn project_handler_impl(payload: ProjectPayload) -> Response {
    let (inputs, projection) = match projection_from_payload(payload) {
        Ok(result) => result,
        Err(err) => return rejected(err),
    };
    json_response(StatusCode::OK, ProjectResponse::new(inputs, projection))
}

async fn project_csv_handler(Query(payload): Query<ProjectPayload>) -> Response {
    let (_, projection) = match projection_from_payload(payload) {
        Ok(result) => result,
        Err(err) => return rejected(err),
    };

    match to_csv(&projection.yearly) {
        Ok(body) => with_cache_control((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{CSV_FILENAME}\""),
                ),
            ],
            body,
        )),
        Err(err) => {
            warn!(error = %err, "failed to encode projection CSV");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

async fn schedule_handler(Query(payload): Query<ProjectPayload>) -> Response {
    let schedule = build_loan_inputs(args_from_payload(payload))
        .and_then(|inputs| build_schedule(&inputs));
    match schedule {
        Ok(schedule) => json_response(StatusCode::OK, schedule),
        Err(err) => rejected(err),
    }
}

fn projection_from_payload(
    payload: ProjectPayload,
) -> Result<(Inputs, Projection), ProjectionError> {
    let inputs = api_request_from_payload(payload)?;
    let projection = project(&inputs)?;
    log_projection(&inputs, &projection.summary);
    Ok((inputs, projection))
}

fn rejected(err: ProjectionError) -> Response {
    warn!(error = %err, "rejected request");
    error_response(StatusCode::BAD_REQUEST, &err.to_string())
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<Inputs, ProjectionError> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| ProjectionError::invalid("payload", format!("is not valid JSON: {e}")))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: ProjectPayload) -> Result<Inputs, ProjectionError> {
    build_inputs(args_from_payload(payload))
}

fn args_from_payload(payload: ProjectPayload) -> ProjectArgs {
    let mut args = default_args_for_api();

    if let Some(v) = payload.purchase_price {
        args.purchase_price = v;
    }
    if let Some(v) = payload.down_payment {
        args.down_payment = v;
    }
    if let Some(v) = payload.interest_rate {
        args.interest_rate = v;
    }
    if let Some(v) = payload.loan_term_years {
        args.loan_term_years = v;
    }
    if let Some(v) = payload.appreciation_rate {
        args.appreciation_rate = v;
    }

    if let Some(v) = payload.property_tax {
        args.property_tax = v;
    }
    if let Some(v) = payload.insurance {
        args.insurance = v;
    }
    if let Some(v) = payload.maintenance {
        args.maintenance = v;
    }

    if let Some(v) = payload.monthly_rent {
        args.monthly_rent = v;
    }
    if let Some(v) = payload.rent_growth_rate {
        args.rent_growth_rate = v;
    }
    if let Some(v) = payload.investment_return_rate {
        args.investment_return_rate = v;
    }

    if let Some(v) = payload.federal_tax_bracket {
        args.federal_tax_bracket = v;
    }
    if let Some(v) = payload.state_tax_bracket {
        args.state_tax_bracket = v;
    }
    if let Some(v) = payload.ownership_years {
        args.ownership_years = v;
    }

    if let Some(v) = payload.closing_cost_rate {
        args.closing_cost_rate = v;
    }
    if let Some(v) = payload.selling_cost_rate {
        args.selling_cost_rate = v;
    }
    if let Some(v) = payload.capital_gains_tax_rate {
        args.capital_gains_tax_rate = v;
    }
    if let Some(v) = payload.federal_interest_cap_base {
        args.federal_interest_cap_base = v;
    }
    if let Some(v) = payload.state_interest_cap_base {
        args.state_interest_cap_base = v;
    }

    args
}

// Missing request fields default to zero, apart from the loan term, the
// horizon and the policy values.
fn default_args_for_api() -> ProjectArgs {
    ProjectArgs {
        purchase_price: 0.0,
        down_payment: 0.0,
        interest_rate: 0.0,
        loan_term_years: 30,
        appreciation_rate: 0.0,
        property_tax: 0.0,
        insurance: 0.0,
        maintenance: 0.0,
        monthly_rent: 0.0,
        rent_growth_rate: DEFAULT_RENT_GROWTH_RATE,
        investment_return_rate: 0.0,
        federal_tax_bracket: 0.0,
        state_tax_bracket: 0.0,
        ownership_years: 10,
        closing_cost_rate: 0.0,
        selling_cost_rate: 0.0,
        capital_gains_tax_rate: 0.0,
        federal_interest_cap_base: FEDERAL_INTEREST_CAP_BASE,
        state_interest_cap_base: STATE_INTEREST_CAP_BASE,
    }
}
