mod amortization;
mod engine;
mod error;
mod types;

pub use amortization::{
    LoanState, MonthStep, amortization_schedule, compute_fixed_payment, step_month,
};
pub use engine::project;
pub use error::ProjectionError;
pub use types::{
    DEFAULT_RENT_GROWTH_RATE, DeductionPolicy, FEDERAL_INTEREST_CAP_BASE, Inputs,
    MAX_LOAN_TERM_YEARS, Projection, STATE_INTEREST_CAP_BASE, ScheduleRow, SummaryResult,
    YearRecord,
};
