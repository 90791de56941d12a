//! Billing events pushed by the subscription provider and the plan catalog
//! that maps plan codes to packages.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::{BillingModel, PackageType};
use crate::credits::Credits;

/// Subscription change pushed by the billing provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillingEvent {
    pub user_id: String,
    pub plan_code: String,
    pub renewable_credits: Credits,
    pub billing_model: BillingModel,
    /// Provider event id. Redeliveries of the same id are applied once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// How an allowance grant changes the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceMode {
    /// Balance becomes exactly the granted amount (subscription renewal).
    Replace,
    /// Granted amount is added to the balance (one-time purchase).
    TopUp,
}

impl AllowanceMode {
    pub fn for_billing_model(model: BillingModel) -> Self {
        match model {
            BillingModel::Monthly => AllowanceMode::Replace,
            BillingModel::OneTime => AllowanceMode::TopUp,
        }
    }

    /// Balance after applying `amount` to `current`.
    pub fn apply(&self, current: Credits, amount: Credits) -> Option<Credits> {
        match self {
            AllowanceMode::Replace => Some(amount),
            AllowanceMode::TopUp => current.checked_add(amount),
        }
    }
}

/// A resolved allowance change ready to be written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowanceGrant {
    /// Id the ledger records the grant under; derived from the provider
    /// event id when there is one.
    pub transaction_id: String,
    pub amount: Credits,
    pub mode: AllowanceMode,
    pub package_type: PackageType,
    pub billing_model: BillingModel,
    pub plan_code: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

impl AllowanceGrant {
    /// Subscription changes move the account onto the plan. One-time
    /// purchases only add credits and leave the plan alone.
    pub fn updates_plan(&self) -> bool {
        self.mode == AllowanceMode::Replace
    }
}

/// Ledger transaction id for a provider event.
pub fn billing_transaction_id(event_id: &str) -> String {
    // Firestore document ids cannot contain '/'
    format!("billing-{}", event_id.trim().replace('/', "_"))
}

/// One row of the plan catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanEntry {
    pub package_type: PackageType,
    /// Credits granted per period when the event carries none.
    pub default_credits: Credits,
}

#[derive(Debug, Error)]
pub enum PlanCatalogError {
    #[error("invalid plan catalog: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Mapping from billing plan code to package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanCatalog {
    plans: HashMap<String, PlanEntry>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let mut plans = HashMap::new();
        plans.insert(
            "starter-monthly".to_string(),
            PlanEntry {
                package_type: PackageType::Starter,
                default_credits: Credits::whole(50),
            },
        );
        plans.insert(
            "pro-monthly".to_string(),
            PlanEntry {
                package_type: PackageType::Pro,
                default_credits: Credits::whole(200),
            },
        );
        plans.insert(
            "business-monthly".to_string(),
            PlanEntry {
                package_type: PackageType::Business,
                default_credits: Credits::whole(1000),
            },
        );
        plans.insert(
            "credits-pack".to_string(),
            PlanEntry {
                package_type: PackageType::Starter,
                default_credits: Credits::whole(25),
            },
        );
        Self { plans }
    }
}

impl PlanCatalog {
    pub fn new(plans: HashMap<String, PlanEntry>) -> Self {
        Self { plans }
    }

    /// Parse a JSON object of `planCode -> {package_type, default_credits}`.
    pub fn from_json(json: &str) -> Result<Self, PlanCatalogError> {
        let plans: HashMap<String, PlanEntry> = serde_json::from_str(json)?;
        Ok(Self { plans })
    }

    pub fn get(&self, plan_code: &str) -> Option<&PlanEntry> {
        self.plans.get(plan_code)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Resolve a billing event into an allowance grant.
    ///
    /// Returns `None` for plan codes missing from the catalog.
    pub fn resolve(&self, event: &BillingEvent) -> Option<AllowanceGrant> {
        let entry = self.get(&event.plan_code)?;
        let amount = if event.renewable_credits.is_zero() {
            entry.default_credits
        } else {
            event.renewable_credits
        };
        let mode = AllowanceMode::for_billing_model(event.billing_model);

        let mut metadata = HashMap::new();
        metadata.insert("plan_code".to_string(), event.plan_code.clone());
        metadata.insert("billing_model".to_string(), event.billing_model.as_str().to_string());
        if let Some(event_id) = &event.event_id {
            metadata.insert("event_id".to_string(), event_id.clone());
        }

        let description = match mode {
            AllowanceMode::Replace => format!("{} allowance set to {}", event.plan_code, amount),
            AllowanceMode::TopUp => format!("{} purchase added {}", event.plan_code, amount),
        };

        let transaction_id = event
            .event_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(billing_transaction_id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Some(AllowanceGrant {
            transaction_id,
            amount,
            mode,
            package_type: entry.package_type,
            billing_model: event.billing_model,
            plan_code: event.plan_code.clone(),
            description,
            metadata,
        })
    }
}
