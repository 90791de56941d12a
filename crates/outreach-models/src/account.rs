//! Account and plan classification models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::credits::Credits;

/// Package an account is on. Set by the billing provider, never by credit operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    #[default]
    Free,
    Starter,
    Pro,
    Business,
}

impl PackageType {
    /// Parse from string (case-insensitive). Unknown values map to `Free`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "starter" => PackageType::Starter,
            "pro" => PackageType::Pro,
            "business" => PackageType::Business,
            _ => PackageType::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Free => "free",
            PackageType::Starter => "starter",
            PackageType::Pro => "pro",
            PackageType::Business => "business",
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, PackageType::Free)
    }
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the account's allowance is renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    /// Allowance is renewed every billing period.
    #[default]
    Monthly,
    /// Credits bought once; they do not renew.
    OneTime,
}

impl BillingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingModel::Monthly => "monthly",
            BillingModel::OneTime => "one_time",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(BillingModel::Monthly),
            "one_time" => Some(BillingModel::OneTime),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's credit account.
///
/// `credits_remaining` is a cached projection of the transaction log:
/// it always equals `opening_balance` plus the signed sum of every
/// transaction recorded for the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Account {
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub credits_remaining: Credits,

    /// Balance the account was created with (signup grant).
    pub opening_balance: Credits,

    pub package_type: PackageType,

    pub billing_model: BillingModel,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_code: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// New free-tier account holding the signup grant.
    pub fn new_free(user_id: impl Into<String>, email: Option<String>, signup_credits: Credits) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            email,
            credits_remaining: signup_credits,
            opening_balance: signup_credits,
            package_type: PackageType::Free,
            billing_model: BillingModel::Monthly,
            plan_code: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_type_from_string() {
        assert_eq!(PackageType::from_str("free"), PackageType::Free);
        assert_eq!(PackageType::from_str("Starter"), PackageType::Starter);
        assert_eq!(PackageType::from_str("PRO"), PackageType::Pro);
        assert_eq!(PackageType::from_str("business"), PackageType::Business);
        assert_eq!(PackageType::from_str("unknown"), PackageType::Free);
    }

    #[test]
    fn test_billing_model_round_trip_names() {
        assert_eq!(BillingModel::from_str("monthly"), Some(BillingModel::Monthly));
        assert_eq!(BillingModel::from_str("one_time"), Some(BillingModel::OneTime));
        assert_eq!(BillingModel::from_str("yearly"), None);
        assert_eq!(
            serde_json::to_string(&BillingModel::OneTime).unwrap(),
            "\"one_time\""
        );
    }

    #[test]
    fn test_new_free_account() {
        let account = Account::new_free("u1", Some("a@b.co".into()), Credits::whole(7));
        assert!(account.package_type.is_free());
        assert_eq!(account.credits_remaining, Credits::whole(7));
        assert_eq!(account.opening_balance, account.credits_remaining);
    }
}
