use serde::Serialize;

/// Mortgage principal eligible for the federal interest deduction.
pub const FEDERAL_INTEREST_CAP_BASE: f64 = 750_000.0;
/// Mortgage principal eligible for the state interest deduction.
pub const STATE_INTEREST_CAP_BASE: f64 = 1_000_000.0;
/// Annual rent growth in percent applied to the avoided rent.
pub const DEFAULT_RENT_GROWTH_RATE: f64 = 2.0;
/// Longest loan term accepted for schedules and projections.
pub const MAX_LOAN_TERM_YEARS: u32 = 100;

/// Legislated thresholds for the mortgage-interest deduction. Only interest on
/// debt up to each cap base is deductible in that jurisdiction.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductionPolicy {
    pub federal_interest_cap_base: f64,
    pub state_interest_cap_base: f64,
}

impl Default for DeductionPolicy {
    fn default() -> Self {
        Self {
            federal_interest_cap_base: FEDERAL_INTEREST_CAP_BASE,
            state_interest_cap_base: STATE_INTEREST_CAP_BASE,
        }
    }
}

/// Projection inputs. Rates are annual percentages (`6.0` means 6 %).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inputs {
    pub purchase_price: f64,
    pub down_payment: f64,
    pub interest_rate: f64,
    pub loan_term_years: u32,
    pub appreciation_rate: f64,
    pub property_tax: f64,
    pub insurance: f64,
    pub maintenance: f64,
    pub monthly_rent: f64,
    pub rent_growth_rate: f64,
    pub investment_return_rate: f64,
    pub federal_tax_bracket: f64,
    pub state_tax_bracket: f64,
    pub ownership_years: u32,
    pub closing_cost_rate: f64,
    pub selling_cost_rate: f64,
    pub capital_gains_tax_rate: f64,
    pub deduction_policy: DeductionPolicy,
}

impl Inputs {
    pub fn loan_amount(&self) -> f64 {
        self.purchase_price - self.down_payment
    }

    /// Cash leaving the buyer's pocket at purchase: down payment plus closing costs.
    pub fn upfront_cash(&self) -> f64 {
        self.down_payment + self.purchase_price * self.closing_cost_rate / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub year: u32,
    pub principal_paid: f64,
    pub interest_paid: f64,
    pub tax_savings: f64,
    pub rent_saved: f64,
    pub home_value: f64,
    pub remaining_balance: f64,
    pub equity: f64,
    pub year_costs: f64,
    pub year_benefits: f64,
    pub year_net_cash_flow: f64,
    /// Opportunity cost minus upfront cash, for charting against the home side.
    pub cumulative_investment_alternative_value: f64,
    /// Equity minus upfront cash.
    pub cumulative_home_net_value: f64,
    pub cumulative_return: f64,
    pub net_sale_proceeds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    pub loan_amount: f64,
    pub monthly_payment: f64,
    pub final_home_value: f64,
    pub total_interest_paid: f64,
    pub total_principal_paid: f64,
    pub total_costs: f64,
    pub total_benefits: f64,
    pub equity_built: f64,
    pub net_return: f64,
    /// `None` when the equity base or the horizon is zero.
    #[serde(rename = "annualROI")]
    pub annual_roi: Option<f64>,
    pub net_sale_proceeds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub yearly: Vec<YearRecord>,
    pub summary: SummaryResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub month: u32,
    pub payment: f64,
    pub interest: f64,
    pub principal: f64,
    pub balance: f64,
}
