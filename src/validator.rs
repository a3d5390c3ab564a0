// Consistency checks over assembled statements
use crate::model::*;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::time::Instant;

const TOTAL_ASSETS: [&str; 3] = ["資産合計", "総資産", "資産の部合計"];
const LIABILITIES_AND_NET_ASSETS: [&str; 3] = ["負債純資産合計", "負債及び純資産合計", "負債資本合計"];
const NET_ASSETS: [&str; 3] = ["純資産合計", "純資産", "資本合計"];
const REVENUE: [&str; 3] = ["売上高", "営業収益", "経常収益"];
const COST_OF_SALES: [&str; 2] = ["売上原価", "営業費用"];
const GROSS_PROFIT: [&str; 2] = ["売上総利益", "売上総損失"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    BalanceSheetImbalance {
        total_assets: f64,
        liabilities_and_net_assets: f64,
        difference: f64,
    },
    GrossProfitMismatch {
        gross_profit: f64,
        expected: f64,
        difference: f64,
    },
    NegativeTotalAssets { value: f64 },
    NegativeNetAssets { value: f64 },
    MissingRevenue,
    MissingTotalAssets,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::BalanceSheetImbalance {
                total_assets,
                liabilities_and_net_assets,
                difference,
            } => write!(
                f,
                "balance sheet imbalance: total assets {total_assets}, liabilities and net assets {liabilities_and_net_assets}, difference {difference}"
            ),
            ValidationWarning::GrossProfitMismatch {
                gross_profit,
                expected,
                difference,
            } => write!(
                f,
                "gross profit {gross_profit} differs from revenue minus cost of sales {expected} by {difference}"
            ),
            ValidationWarning::NegativeTotalAssets { value } => {
                write!(f, "negative total assets: {value}")
            }
            ValidationWarning::NegativeNetAssets { value } => {
                write!(f, "negative net assets: {value}")
            }
            ValidationWarning::MissingRevenue => f.write_str("no revenue line item in income statement"),
            ValidationWarning::MissingTotalAssets => f.write_str("no total assets line item in balance sheet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationProfile {
    /// Report every finding as a warning.
    #[default]
    Generic,
    /// Fail validation when any finding is reported.
    Strict,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationStats {
    pub items_checked: usize,
    pub duration_us: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub warnings: Vec<ValidationWarning>,
    pub stats: ValidationStats,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

type Rule = Box<dyn Fn(&FilingStatements) -> Vec<ValidationWarning> + Send + Sync>;

pub struct StatementValidator {
    profile: ValidationProfile,
    tolerance: f64,
    check_balance: bool,
    check_gross_profit: bool,
    check_signs: bool,
    check_required: bool,
    custom_rules: Vec<Rule>,
}

impl Default for StatementValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementValidator {
    pub fn new() -> Self {
        Self {
            profile: ValidationProfile::Generic,
            tolerance: 1_000.0,
            check_balance: true,
            check_gross_profit: true,
            check_signs: true,
            check_required: true,
            custom_rules: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: ValidationProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn strict(self) -> Self {
        self.with_profile(ValidationProfile::Strict)
    }

    /// Absolute difference tolerated by the equation checks.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn without_required_items(mut self) -> Self {
        self.check_required = false;
        self
    }

    pub fn add_rule<F>(&mut self, rule: F)
    where
        F: Fn(&FilingStatements) -> Vec<ValidationWarning> + Send + Sync + 'static,
    {
        self.custom_rules.push(Box::new(rule));
    }

    pub fn validate(&self, statements: &FilingStatements) -> Result<ValidationReport> {
        let start = Instant::now();
        let mut warnings = Vec::new();

        if self.check_balance {
            warnings.extend(self.balance_sheet_equation(&statements.balance_sheet));
        }
        if self.check_gross_profit {
            warnings.extend(self.gross_profit_consistency(&statements.income_statement));
        }
        if self.check_signs {
            warnings.extend(negative_totals(&statements.balance_sheet));
        }
        if self.check_required {
            warnings.extend(missing_items(statements));
        }
        for rule in &self.custom_rules {
            warnings.extend(rule(statements));
        }

        if self.profile == ValidationProfile::Strict && !warnings.is_empty() {
            let summary: Vec<String> = warnings.iter().map(ToString::to_string).collect();
            return Err(Error::Validation(format!(
                "{} finding(s): {}",
                warnings.len(),
                summary.join("; ")
            )));
        }

        Ok(ValidationReport {
            warnings,
            stats: ValidationStats {
                items_checked: statements.balance_sheet.len()
                    + statements.income_statement.len()
                    + statements.cash_flow.len(),
                duration_us: start.elapsed().as_micros() as u64,
            },
        })
    }

    fn balance_sheet_equation(&self, bs: &StatementData) -> Option<ValidationWarning> {
        let total_assets = current(bs, &TOTAL_ASSETS)?;
        let liabilities_and_net_assets = current(bs, &LIABILITIES_AND_NET_ASSETS)?;
        let difference = (total_assets - liabilities_and_net_assets).abs();
        (difference > self.tolerance).then_some(ValidationWarning::BalanceSheetImbalance {
            total_assets,
            liabilities_and_net_assets,
            difference,
        })
    }

    fn gross_profit_consistency(&self, pl: &StatementData) -> Option<ValidationWarning> {
        let revenue = current(pl, &REVENUE)?;
        let cost_of_sales = current(pl, &COST_OF_SALES)?;
        let gross_profit = current(pl, &GROSS_PROFIT)?;
        let expected = revenue - cost_of_sales;
        let difference = (gross_profit - expected).abs();
        (difference > self.tolerance).then_some(ValidationWarning::GrossProfitMismatch {
            gross_profit,
            expected,
            difference,
        })
    }
}

/// Current-period value of the first label present.
fn current(data: &StatementData, labels: &[&str]) -> Option<f64> {
    labels
        .iter()
        .find_map(|label| data.get(label))
        .and_then(PeriodValues::current)
        .map(Amount::as_f64)
}

fn negative_totals(bs: &StatementData) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    if let Some(value) = current(bs, &TOTAL_ASSETS).filter(|v| *v < 0.0) {
        warnings.push(ValidationWarning::NegativeTotalAssets { value });
    }
    if let Some(value) = current(bs, &NET_ASSETS).filter(|v| *v < 0.0) {
        warnings.push(ValidationWarning::NegativeNetAssets { value });
    }
    warnings
}

fn missing_items(statements: &FilingStatements) -> Vec<ValidationWarning> {
    let has_any = |data: &StatementData, labels: &[&str]| labels.iter().any(|l| data.get(l).is_some());
    let mut warnings = Vec::new();
    if !has_any(&statements.income_statement, &REVENUE) {
        warnings.push(ValidationWarning::MissingRevenue);
    }
    if !has_any(&statements.balance_sheet, &TOTAL_ASSETS) {
        warnings.push(ValidationWarning::MissingTotalAssets);
    }
    warnings
}
