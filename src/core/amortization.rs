use super::error::ProjectionError;
use super::types::{MAX_LOAN_TERM_YEARS, ScheduleRow};

const MONTHS_PER_YEAR: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthStep {
    pub interest: f64,
    pub principal: f64,
    pub new_balance: f64,
}

/// Outstanding loan carried month to month by the projection loop.
#[derive(Debug, Clone, Copy)]
pub struct LoanState {
    pub remaining_balance: f64,
    pub fixed_monthly_payment: f64,
}

impl LoanState {
    pub fn new(
        principal: f64,
        annual_rate_percent: f64,
        term_years: u32,
    ) -> Result<Self, ProjectionError> {
        let fixed_monthly_payment =
            compute_fixed_payment(principal, annual_rate_percent, term_years)?;
        Ok(Self {
            remaining_balance: principal,
            fixed_monthly_payment,
        })
    }

    pub fn step(&mut self, annual_rate_percent: f64) -> MonthStep {
        let step = step_month(
            self.remaining_balance,
            annual_rate_percent,
            self.fixed_monthly_payment,
        );
        self.remaining_balance = step.new_balance;
        step
    }
}

fn monthly_rate(annual_rate_percent: f64) -> f64 {
    annual_rate_percent / 100.0 / 12.0
}

fn term_months(term_years: u32) -> Result<u32, ProjectionError> {
    if term_years == 0 {
        return Err(ProjectionError::invalid("loan_term_years", "must be > 0"));
    }
    term_years
        .checked_mul(MONTHS_PER_YEAR)
        .ok_or_else(|| ProjectionError::invalid("loan_term_years", "is too large"))
}

pub fn compute_fixed_payment(
    principal: f64,
    annual_rate_percent: f64,
    term_years: u32,
) -> Result<f64, ProjectionError> {
    let n = f64::from(term_months(term_years)?);
    let r = monthly_rate(annual_rate_percent);
    if r == 0.0 {
        return Ok(principal / n);
    }

    let growth = (1.0 + r).powf(n);
    Ok(principal * r * growth / (growth - 1.0))
}

/// Splits one payment into interest and principal. A payment below the
/// month's interest yields a negative principal and a growing balance.
pub fn step_month(balance: f64, annual_rate_percent: f64, payment: f64) -> MonthStep {
    let interest = balance * monthly_rate(annual_rate_percent);
    let principal = payment - interest;
    MonthStep {
        interest,
        principal,
        new_balance: (balance - principal).max(0.0),
    }
}

pub fn amortization_schedule(
    principal: f64,
    annual_rate_percent: f64,
    term_years: u32,
) -> Result<Vec<ScheduleRow>, ProjectionError> {
    if term_years > MAX_LOAN_TERM_YEARS {
        return Err(ProjectionError::invalid(
            "loan_term_years",
            format!("must be <= {MAX_LOAN_TERM_YEARS} for a schedule"),
        ));
    }
    let mut loan = LoanState::new(principal, annual_rate_percent, term_years)?;
    let months = term_months(term_years)?;

    let mut rows = Vec::with_capacity(months as usize);
    for month in 1..=months {
        let step = loan.step(annual_rate_percent);
        rows.push(ScheduleRow {
            month,
            payment: loan.fixed_monthly_payment,
            interest: step.interest,
            principal: step.principal,
            balance: step.new_balance,
        });
    }
    Ok(rows)
}
