use tracing::debug;

use super::amortization::LoanState;
use super::error::ProjectionError;
use super::types::{
    DeductionPolicy, Inputs, MAX_LOAN_TERM_YEARS, Projection, SummaryResult, YearRecord,
};

const MONTHS_PER_YEAR: u32 = 12;

#[derive(Debug, Default, Clone, Copy)]
struct RunningTotals {
    principal: f64,
    interest: f64,
    costs: f64,
    benefits: f64,
}

#[derive(Debug, Clone, Copy)]
struct LoanYear {
    principal: f64,
    interest: f64,
}

pub fn project(inputs: &Inputs) -> Result<Projection, ProjectionError> {
    let mut loan = LoanState::new(
        inputs.loan_amount(),
        inputs.interest_rate,
        inputs.loan_term_years,
    )?;
    let annual_payment = loan.fixed_monthly_payment * f64::from(MONTHS_PER_YEAR);
    let upfront_cash = inputs.upfront_cash();
    let investment_growth = 1.0 + inputs.investment_return_rate / 100.0;
    let rent_growth = 1.0 + inputs.rent_growth_rate / 100.0;

    let mut totals = RunningTotals::default();
    let mut opportunity_cost = upfront_cash;
    let mut monthly_rent_saved = inputs.monthly_rent;
    let mut yearly = Vec::with_capacity(inputs.ownership_years.min(MAX_LOAN_TERM_YEARS) as usize);

    for year in 1..=inputs.ownership_years {
        let paid = run_loan_year(&mut loan, inputs.interest_rate);
        totals.principal += paid.principal;
        totals.interest += paid.interest;

        let tax_savings = interest_tax_savings(
            paid.interest,
            inputs.interest_rate,
            inputs.federal_tax_bracket,
            inputs.state_tax_bracket,
            &inputs.deduction_policy,
        );

        let rent_saved = monthly_rent_saved * f64::from(MONTHS_PER_YEAR);
        monthly_rent_saved *= rent_growth;

        let home_value = home_value_at(inputs.purchase_price, inputs.appreciation_rate, year);
        let equity = home_value - loan.remaining_balance;

        let year_costs =
            inputs.property_tax + inputs.insurance + inputs.maintenance + annual_payment;
        let year_benefits = rent_saved + tax_savings;
        let year_net_cash_flow = year_costs - year_benefits;
        totals.costs += year_costs;
        totals.benefits += year_benefits;

        // Prior balance plus this year's cash difference, reinvested at the alternative return.
        opportunity_cost = (opportunity_cost + year_net_cash_flow) * investment_growth;

        yearly.push(YearRecord {
            year,
            principal_paid: paid.principal,
            interest_paid: paid.interest,
            tax_savings,
            rent_saved,
            home_value,
            remaining_balance: loan.remaining_balance,
            equity,
            year_costs,
            year_benefits,
            year_net_cash_flow,
            cumulative_investment_alternative_value: opportunity_cost - upfront_cash,
            cumulative_home_net_value: equity - upfront_cash,
            cumulative_return: equity - opportunity_cost,
            net_sale_proceeds: net_sale_proceeds(inputs, home_value, loan.remaining_balance),
        });
    }

    let final_home_value = home_value_at(
        inputs.purchase_price,
        inputs.appreciation_rate,
        inputs.ownership_years,
    );
    let net_return = yearly.last().map_or(0.0, |record| record.cumulative_return);
    let summary = SummaryResult {
        loan_amount: inputs.loan_amount(),
        monthly_payment: loan.fixed_monthly_payment,
        final_home_value,
        total_interest_paid: totals.interest,
        total_principal_paid: totals.principal,
        total_costs: totals.costs,
        total_benefits: totals.benefits,
        equity_built: final_home_value - loan.remaining_balance,
        net_return,
        annual_roi: annual_roi(
            net_return,
            inputs.down_payment + totals.principal,
            inputs.ownership_years,
        ),
        net_sale_proceeds: net_sale_proceeds(inputs, final_home_value, loan.remaining_balance),
    };

    debug!(
        years = yearly.len(),
        monthly_payment = summary.monthly_payment,
        net_return = summary.net_return,
        "projection finished"
    );

    Ok(Projection { yearly, summary })
}

fn run_loan_year(loan: &mut LoanState, annual_rate_percent: f64) -> LoanYear {
    let mut paid = LoanYear {
        principal: 0.0,
        interest: 0.0,
    };
    for _ in 0..MONTHS_PER_YEAR {
        let step = loan.step(annual_rate_percent);
        paid.principal += step.principal;
        paid.interest += step.interest;
    }
    paid
}

/// Deductible interest is capped per jurisdiction at the interest that the
/// policy's principal cap would accrue at the loan rate.
fn interest_tax_savings(
    year_interest: f64,
    interest_rate: f64,
    federal_tax_bracket: f64,
    state_tax_bracket: f64,
    policy: &DeductionPolicy,
) -> f64 {
    let federal_cap = policy.federal_interest_cap_base * interest_rate / 100.0;
    let state_cap = policy.state_interest_cap_base * interest_rate / 100.0;
    let federal_deductible = year_interest.min(federal_cap);
    let state_deductible = year_interest.min(state_cap);
    federal_deductible * federal_tax_bracket / 100.0 + state_deductible * state_tax_bracket / 100.0
}

// Absolute exponent from the purchase price; a running multiply drifts.
fn home_value_at(purchase_price: f64, appreciation_rate: f64, year: u32) -> f64 {
    purchase_price * (1.0 + appreciation_rate / 100.0).powf(f64::from(year))
}

fn net_sale_proceeds(inputs: &Inputs, home_value: f64, remaining_balance: f64) -> f64 {
    let selling_costs = home_value * inputs.selling_cost_rate / 100.0;
    let gain = home_value - inputs.purchase_price;
    let capital_gains_tax = if gain > 0.0 {
        gain * inputs.capital_gains_tax_rate / 100.0
    } else {
        0.0
    };
    home_value - selling_costs - remaining_balance - capital_gains_tax
}

fn annual_roi(net_return: f64, equity_base: f64, years: u32) -> Option<f64> {
    if equity_base == 0.0 || years == 0 {
        return None;
    }
    let roi = net_return / equity_base * 100.0 / f64::from(years);
    roi.is_finite().then_some(roi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_inputs() -> Inputs {
        Inputs {
            purchase_price: 500_000.0,
            down_payment: 100_000.0,
            interest_rate: 6.5,
            loan_term_years: 30,
            appreciation_rate: 3.0,
            property_tax: 6_000.0,
            insurance: 1_500.0,
            maintenance: 5_000.0,
            monthly_rent: 2_500.0,
            rent_growth_rate: 2.0,
            investment_return_rate: 7.0,
            federal_tax_bracket: 24.0,
            state_tax_bracket: 9.3,
            ownership_years: 10,
            closing_cost_rate: 0.0,
            selling_cost_rate: 0.0,
            capital_gains_tax_rate: 0.0,
            deduction_policy: DeductionPolicy::default(),
        }
    }

    // Zero-rate loan of 120k over 10 years: exactly 1,000 a month.
    fn straight_line_inputs() -> Inputs {
        Inputs {
            purchase_price: 120_000.0,
            down_payment: 0.0,
            interest_rate: 0.0,
            loan_term_years: 10,
            appreciation_rate: 0.0,
            property_tax: 0.0,
            insurance: 0.0,
            maintenance: 0.0,
            monthly_rent: 500.0,
            rent_growth_rate: 0.0,
            investment_return_rate: 0.0,
            federal_tax_bracket: 0.0,
            state_tax_bracket: 0.0,
            ownership_years: 1,
            closing_cost_rate: 0.0,
            selling_cost_rate: 0.0,
            capital_gains_tax_rate: 0.0,
            deduction_policy: DeductionPolicy::default(),
        }
    }

    #[test]
    fn straight_line_year_matches_hand_calculation() {
        let projection = project(&straight_line_inputs()).expect("valid inputs");
        assert_eq!(projection.yearly.len(), 1);

        let year = &projection.yearly[0];
        assert_eq!(year.year, 1);
        assert_approx(year.principal_paid, 12_000.0);
        assert_approx(year.interest_paid, 0.0);
        assert_approx(year.rent_saved, 6_000.0);
        assert_approx(year.home_value, 120_000.0);
        assert_approx(year.remaining_balance, 108_000.0);
        assert_approx(year.equity, 12_000.0);
        assert_approx(year.year_costs, 12_000.0);
        assert_approx(year.year_benefits, 6_000.0);
        assert_approx(year.year_net_cash_flow, 6_000.0);
        assert_approx(year.cumulative_investment_alternative_value, 6_000.0);
        assert_approx(year.cumulative_home_net_value, 12_000.0);
        assert_approx(year.cumulative_return, 6_000.0);

        let summary = &projection.summary;
        assert_approx(summary.monthly_payment, 1_000.0);
        assert_approx(summary.net_return, 6_000.0);
        assert_approx(summary.equity_built, 12_000.0);
        assert_approx(summary.annual_roi.expect("non-zero base"), 50.0);
    }

    #[test]
    fn opportunity_cost_compounds_prior_balance_and_cash_difference() {
        let mut inputs = straight_line_inputs();
        inputs.ownership_years = 2;
        inputs.investment_return_rate = 10.0;

        let projection = project(&inputs).expect("valid inputs");
        assert_approx(projection.yearly[0].cumulative_investment_alternative_value, 6_600.0);
        assert_approx(projection.yearly[1].cumulative_investment_alternative_value, 13_860.0);
        assert_approx(projection.yearly[1].equity, 24_000.0);
        assert_approx(projection.yearly[1].cumulative_return, 10_140.0);
        assert_approx(projection.summary.net_return, 10_140.0);
    }

    #[test]
    fn fully_paid_home_has_no_loan_activity() {
        let mut inputs = sample_inputs();
        inputs.down_payment = inputs.purchase_price;

        let projection = project(&inputs).expect("valid inputs");
        assert_eq!(projection.summary.monthly_payment, 0.0);
        assert_eq!(projection.summary.loan_amount, 0.0);
        assert_eq!(projection.summary.total_interest_paid, 0.0);
        for year in &projection.yearly {
            assert_eq!(year.equity, year.home_value);
            assert_eq!(year.remaining_balance, 0.0);
        }
        assert_eq!(projection.summary.equity_built, projection.summary.final_home_value);
    }

    #[test]
    fn single_year_without_appreciation_keeps_purchase_price() {
        let mut inputs = sample_inputs();
        inputs.ownership_years = 1;
        inputs.appreciation_rate = 0.0;

        let projection = project(&inputs).expect("valid inputs");
        assert_eq!(projection.yearly[0].home_value, inputs.purchase_price);
        assert_eq!(projection.summary.final_home_value, inputs.purchase_price);
    }

    #[test]
    fn home_value_uses_absolute_exponent() {
        let inputs = sample_inputs();
        let projection = project(&inputs).expect("valid inputs");
        for year in &projection.yearly {
            let expected = 500_000.0 * (1.0 + 3.0 / 100.0_f64).powf(f64::from(year.year));
            assert_eq!(year.home_value, expected);
        }
    }

    #[test]
    fn repeated_projections_are_identical() {
        let inputs = sample_inputs();
        let first = project(&inputs).expect("valid inputs");
        let second = project(&inputs).expect("valid inputs");
        assert_eq!(first, second);
        for (a, b) in first.yearly.iter().zip(&second.yearly) {
            assert_eq!(a.cumulative_return.to_bits(), b.cumulative_return.to_bits());
        }
    }

    #[test]
    fn roi_is_none_without_equity_base() {
        let mut inputs = straight_line_inputs();
        inputs.purchase_price = 0.0;
        inputs.down_payment = 0.0;
        inputs.monthly_rent = 1_000.0;

        let projection = project(&inputs).expect("valid inputs");
        assert_eq!(projection.summary.total_principal_paid, 0.0);
        assert_eq!(projection.summary.annual_roi, None);
        assert!(projection.summary.net_return.is_finite());
    }

    #[test]
    fn zero_ownership_years_yields_empty_series() {
        let mut inputs = sample_inputs();
        inputs.ownership_years = 0;

        let projection = project(&inputs).expect("valid inputs");
        assert!(projection.yearly.is_empty());
        assert_eq!(projection.summary.net_return, 0.0);
        assert_eq!(projection.summary.annual_roi, None);
        assert_eq!(projection.summary.final_home_value, inputs.purchase_price);
    }

    #[test]
    fn zero_loan_term_is_rejected() {
        let mut inputs = sample_inputs();
        inputs.loan_term_years = 0;
        let err = project(&inputs).expect_err("zero term must fail");
        assert!(err.to_string().contains("loan_term_years"));
    }

    #[test]
    fn overflowing_loan_term_is_rejected() {
        let mut inputs = sample_inputs();
        inputs.loan_term_years = 400_000_000;
        inputs.ownership_years = 2;
        let err = project(&inputs).expect_err("term overflows months");
        assert!(err.to_string().contains("loan_term_years"));
    }

    #[test]
    fn interest_deduction_is_capped_per_jurisdiction() {
        let policy = DeductionPolicy::default();
        // Caps at 6 %: federal 45,000, state 60,000.
        assert_approx(interest_tax_savings(100_000.0, 6.0, 24.0, 10.0, &policy), 16_800.0);
        assert_approx(interest_tax_savings(10_000.0, 6.0, 24.0, 10.0, &policy), 3_400.0);
        assert_approx(interest_tax_savings(50_000.0, 6.0, 0.0, 0.0, &policy), 0.0);
    }

    #[test]
    fn custom_deduction_policy_changes_caps() {
        let policy = DeductionPolicy {
            federal_interest_cap_base: 100_000.0,
            state_interest_cap_base: 200_000.0,
        };
        assert_approx(interest_tax_savings(50_000.0, 5.0, 20.0, 10.0, &policy), 2_000.0);
    }

    #[test]
    fn rent_saved_grows_each_year() {
        let inputs = sample_inputs();
        let projection = project(&inputs).expect("valid inputs");
        assert_approx(projection.yearly[0].rent_saved, 30_000.0);
        assert_approx(projection.yearly[1].rent_saved, 30_600.0);
        assert_approx(projection.yearly[2].rent_saved, 31_212.0);
    }

    #[test]
    fn sale_proceeds_subtract_costs_balance_and_gains_tax() {
        let mut inputs = sample_inputs();
        inputs.selling_cost_rate = 6.0;
        inputs.capital_gains_tax_rate = 20.0;

        assert_approx(net_sale_proceeds(&inputs, 600_000.0, 300_000.0), 244_000.0);
        // No gains tax on a loss.
        assert_approx(net_sale_proceeds(&inputs, 450_000.0, 300_000.0), 123_000.0);
    }

    #[test]
    fn closing_costs_raise_upfront_cash() {
        let mut inputs = sample_inputs();
        inputs.closing_cost_rate = 2.0;
        let with_closing = project(&inputs).expect("valid inputs");
        inputs.closing_cost_rate = 0.0;
        let without = project(&inputs).expect("valid inputs");

        let a = &with_closing.yearly[0];
        let b = &without.yearly[0];
        assert_approx(a.equity, b.equity);
        assert_approx(a.cumulative_home_net_value, b.cumulative_home_net_value - 10_000.0);
        assert!(a.cumulative_return < b.cumulative_return);
    }

    #[test]
    fn summary_totals_match_yearly_sums() {
        let projection = project(&sample_inputs()).expect("valid inputs");
        let interest: f64 = projection.yearly.iter().map(|y| y.interest_paid).sum();
        let principal: f64 = projection.yearly.iter().map(|y| y.principal_paid).sum();
        let costs: f64 = projection.yearly.iter().map(|y| y.year_costs).sum();
        assert_approx(projection.summary.total_interest_paid, interest);
        assert_approx(projection.summary.total_principal_paid, principal);
        assert_approx(projection.summary.total_costs, costs);
        let last = projection.yearly.last().expect("ten years");
        assert_eq!(projection.summary.net_sale_proceeds, last.net_sale_proceeds);
        assert_approx(
            projection.summary.equity_built,
            last.home_value - last.remaining_balance,
        );
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(40))]

        #[test]
        fn prop_projection_is_finite_and_consistent(
            purchase_price in 50_000u32..3_000_000,
            down_pct in 0u32..101,
            rate_bp in 0u32..1200,
            loan_term_years in 1u32..41,
            ownership_offset in 0u32..40,
            appreciation_bp in 0u32..800,
            monthly_rent in 0u32..10_000,
            investment_bp in 0u32..1200,
            federal_bracket in 0u32..40,
            state_bracket in 0u32..14
        ) {
            let mut inputs = sample_inputs();
            inputs.purchase_price = purchase_price as f64;
            inputs.down_payment = inputs.purchase_price * down_pct as f64 / 100.0;
            inputs.interest_rate = rate_bp as f64 / 100.0;
            inputs.loan_term_years = loan_term_years;
            inputs.ownership_years = 1 + ownership_offset % loan_term_years;
            inputs.appreciation_rate = appreciation_bp as f64 / 100.0;
            inputs.monthly_rent = monthly_rent as f64;
            inputs.investment_return_rate = investment_bp as f64 / 100.0;
            inputs.federal_tax_bracket = federal_bracket as f64;
            inputs.state_tax_bracket = state_bracket as f64;

            let projection = project(&inputs).expect("valid inputs");
            prop_assert_eq!(projection.yearly.len(), inputs.ownership_years as usize);

            let mut previous_balance = inputs.loan_amount();
            for (idx, year) in projection.yearly.iter().enumerate() {
                prop_assert_eq!(year.year as usize, idx + 1);
                prop_assert!(year.remaining_balance.is_finite());
                prop_assert!(year.remaining_balance >= 0.0);
                prop_assert!(year.remaining_balance <= previous_balance + 1e-6);
                prop_assert!(year.interest_paid >= 0.0);
                prop_assert!(year.tax_savings >= 0.0);
                prop_assert!(year.cumulative_return.is_finite());
                let equity = year.home_value - year.remaining_balance;
                prop_assert!((year.equity - equity).abs() <= 1e-6);
                previous_balance = year.remaining_balance;
            }

            let summary = &projection.summary;
            prop_assert!(summary.net_return.is_finite());
            if let Some(roi) = summary.annual_roi {
                prop_assert!(roi.is_finite());
            }
        }
    }
}
