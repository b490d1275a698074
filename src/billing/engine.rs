use serde::{Deserialize, Serialize};

/// Default unit price applied when the caller supplies no usable hint.
pub const DEFAULT_UNIT_PRICE_CENTS: i64 = 4000;

/// Upper clamp for the unit-price hint ($10,000.00 per lead). Keeps the
/// 40-lead package charge well inside `i64` no matter what the caller sends.
pub const MAX_UNIT_PRICE_CENTS: i64 = 1_000_000;

/// Fixed card-verification charge for the perpetual pay-per-lead model,
/// independent of the unit price.
pub const CARD_VERIFICATION_CHARGE_CENTS: i64 = 100;

/// Closed set of pricing/commitment schemes. Not persisted as an entity;
/// defaults are computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    #[serde(rename = "package_40_paid_in_full")]
    Package40PaidInFull,
    #[serde(rename = "commitment_40_with_10_upfront")]
    Commitment40With10Upfront,
    PayPerLeadPerpetual,
    #[serde(rename = "pay_per_lead_40_first_lead")]
    PayPerLead40FirstLead,
}

impl BillingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingModel::Package40PaidInFull => "package_40_paid_in_full",
            BillingModel::Commitment40With10Upfront => "commitment_40_with_10_upfront",
            BillingModel::PayPerLeadPerpetual => "pay_per_lead_perpetual",
            BillingModel::PayPerLead40FirstLead => "pay_per_lead_40_first_lead",
        }
    }

    /// Unknown or missing model strings normalize to the system default
    /// rather than erroring. Deliberate leniency for legacy data; the warn
    /// log is what makes a typo visible at all.
    pub fn parse(raw: Option<&str>) -> BillingModel {
        match raw.map(str::trim) {
            Some("package_40_paid_in_full") => BillingModel::Package40PaidInFull,
            Some("commitment_40_with_10_upfront") => BillingModel::Commitment40With10Upfront,
            Some("pay_per_lead_perpetual") => BillingModel::PayPerLeadPerpetual,
            Some("pay_per_lead_40_first_lead") => BillingModel::PayPerLead40FirstLead,
            Some(other) if !other.is_empty() => {
                tracing::warn!(model = other, "unknown billing model, using default");
                BillingModel::Commitment40With10Upfront
            }
            _ => BillingModel::Commitment40With10Upfront,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingModelDefaults {
    pub lead_unit_price_cents: i64,
    pub lead_charge_threshold: i64,
    pub prepaid_lead_credits: i64,
    pub lead_commitment_total: Option<i64>,
    pub initial_charge_cents: i64,
}

/// Pure mapping from a billing model and unit-price hint to its pricing
/// defaults. The hint is clamped into `1..=MAX_UNIT_PRICE_CENTS`,
/// defaulting to $40.00 when absent or invalid.
pub fn defaults_for(model: BillingModel, unit_price_cents_hint: Option<i64>) -> BillingModelDefaults {
    let unit = unit_price_cents_hint
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_UNIT_PRICE_CENTS)
        .min(MAX_UNIT_PRICE_CENTS);

    match model {
        BillingModel::Package40PaidInFull => BillingModelDefaults {
            lead_unit_price_cents: unit,
            lead_charge_threshold: 10,
            prepaid_lead_credits: 40,
            lead_commitment_total: Some(40),
            initial_charge_cents: unit * 40,
        },
        BillingModel::Commitment40With10Upfront => BillingModelDefaults {
            lead_unit_price_cents: unit,
            lead_charge_threshold: 10,
            prepaid_lead_credits: 10,
            lead_commitment_total: Some(40),
            initial_charge_cents: unit * 10,
        },
        BillingModel::PayPerLeadPerpetual => BillingModelDefaults {
            lead_unit_price_cents: unit,
            lead_charge_threshold: 1,
            prepaid_lead_credits: 0,
            lead_commitment_total: None,
            initial_charge_cents: CARD_VERIFICATION_CHARGE_CENTS,
        },
        BillingModel::PayPerLead40FirstLead => BillingModelDefaults {
            lead_unit_price_cents: unit,
            lead_charge_threshold: 1,
            prepaid_lead_credits: 1,
            lead_commitment_total: None,
            initial_charge_cents: unit,
        },
    }
}
