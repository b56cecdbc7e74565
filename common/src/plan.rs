use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Effectively unlimited usage, used for the enterprise message allowance.
pub const UNLIMITED: i64 = i64::MAX;

/// Usage fraction at which a user is warned that the limit is near.
pub const WARN_USER_LIMIT: f64 = 0.9;

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "plan", rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn is_paid(&self) -> bool {
        match self {
            Plan::Free => false,
            Plan::Starter | Plan::Pro | Plan::Enterprise => true,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(AppError::InvalidPlan(other.to_string())),
        }
    }
}

/// Metered resource a request consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Message,
    UploadCredit,
}

impl UsageKind {
    /// Billing meter event name the usage is reported under.
    pub fn meter_event(&self) -> &'static str {
        match self {
            UsageKind::Message => "jarvas_chat_messages",
            UsageKind::UploadCredit => "jarvas_file_uploads",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UsageKind::Message => "Messaging",
            UsageKind::UploadCredit => "File Upload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub upload_credits: i64,
    pub messages: i64,
}

impl PlanLimits {
    pub fn for_kind(&self, kind: UsageKind) -> i64 {
        match kind {
            UsageKind::Message => self.messages,
            UsageKind::UploadCredit => self.upload_credits,
        }
    }
}

/// Per-plan allowances. Built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLimitsTable {
    pub free: PlanLimits,
    pub starter: PlanLimits,
    pub pro: PlanLimits,
    pub enterprise: PlanLimits,
}

impl Default for PlanLimitsTable {
    fn default() -> Self {
        PlanLimitsTable {
            free: PlanLimits {
                upload_credits: 1_000,
                messages: 50,
            },
            starter: PlanLimits {
                upload_credits: 50_000,
                messages: 2_500,
            },
            pro: PlanLimits {
                upload_credits: 125_000,
                messages: 10_000,
            },
            enterprise: PlanLimits {
                upload_credits: 500_000,
                messages: UNLIMITED,
            },
        }
    }
}

impl PlanLimitsTable {
    pub fn limits(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Free => self.free,
            Plan::Starter => self.starter,
            Plan::Pro => self.pro,
            Plan::Enterprise => self.enterprise,
        }
    }

    pub fn limit(&self, plan: Plan, kind: UsageKind) -> i64 {
        self.limits(plan).for_kind(kind)
    }
}

/// Semantic role of a billing line item, independent of the plan it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRole {
    Base,
    Uploads,
    Messages,
}

/// Provider price ids that make up one paid plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingItems {
    /// Flat subscription fee.
    pub base: String,
    /// Metered upload credits.
    pub uploads: String,
    /// Metered chat messages.
    pub messages: String,
}

impl BillingItems {
    pub fn price_for(&self, role: ItemRole) -> &str {
        match role {
            ItemRole::Base => &self.base,
            ItemRole::Uploads => &self.uploads,
            ItemRole::Messages => &self.messages,
        }
    }

    pub fn role_of(&self, price_id: &str) -> Option<ItemRole> {
        if price_id == self.base {
            Some(ItemRole::Base)
        } else if price_id == self.uploads {
            Some(ItemRole::Uploads)
        } else if price_id == self.messages {
            Some(ItemRole::Messages)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    pub starter: BillingItems,
    pub pro: BillingItems,
    pub enterprise: BillingItems,
}

impl PlanCatalog {
    /// Items of a paid plan. The free plan has no billing items.
    pub fn items_for(&self, plan: Plan) -> Option<&BillingItems> {
        match plan {
            Plan::Free => None,
            Plan::Starter => Some(&self.starter),
            Plan::Pro => Some(&self.pro),
            Plan::Enterprise => Some(&self.enterprise),
        }
    }

    /// Role of a price id from any paid plan.
    pub fn role_of(&self, price_id: &str) -> Option<ItemRole> {
        [&self.starter, &self.pro, &self.enterprise]
            .into_iter()
            .find_map(|items| items.role_of(price_id))
    }

    /// Paid plan that owns the given price id, whatever its role.
    pub fn plan_of(&self, price_id: &str) -> Option<Plan> {
        [Plan::Starter, Plan::Pro, Plan::Enterprise]
            .into_iter()
            .find(|plan| {
                self.items_for(*plan)
                    .is_some_and(|items| items.role_of(price_id).is_some())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        let items = |p: &str| BillingItems {
            base: format!("price_{p}_base"),
            uploads: format!("price_{p}_pages"),
            messages: format!("price_{p}_msgs"),
        };
        PlanCatalog {
            starter: items("starter"),
            pro: items("pro"),
            enterprise: items("enterprise"),
        }
    }

    #[test]
    fn parses_known_plans_and_rejects_others() {
        assert_eq!("pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert_eq!("free".parse::<Plan>().unwrap(), Plan::Free);
        assert!(matches!(
            "platinum".parse::<Plan>(),
            Err(AppError::InvalidPlan(p)) if p == "platinum"
        ));
    }

    #[test]
    fn enterprise_messages_are_unlimited() {
        let table = PlanLimitsTable::default();
        assert_eq!(table.limit(Plan::Enterprise, UsageKind::Message), UNLIMITED);
        assert_eq!(table.limit(Plan::Free, UsageKind::Message), 50);
        assert_eq!(table.limit(Plan::Pro, UsageKind::UploadCredit), 125_000);
    }

    #[test]
    fn roles_resolve_across_plans() {
        let catalog = catalog();
        assert_eq!(catalog.role_of("price_pro_msgs"), Some(ItemRole::Messages));
        assert_eq!(catalog.role_of("price_starter_base"), Some(ItemRole::Base));
        assert_eq!(catalog.role_of("price_unknown"), None);
        assert_eq!(catalog.plan_of("price_enterprise_base"), Some(Plan::Enterprise));
        assert_eq!(catalog.plan_of("price_starter_msgs"), Some(Plan::Starter));
        assert_eq!(catalog.plan_of("price_unknown"), None);
        assert!(catalog.items_for(Plan::Free).is_none());
    }
}
