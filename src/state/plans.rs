use serde::{Deserialize, Serialize};

/// Yearly billing discount, in basis points (2_000 = 20%).
const YEARLY_DISCOUNT_BPS: u64 = 2_000;
const BPS_MAX: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

/// A purchasable plan as presented on the paywall.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub monthly_price_cents: u64,
    /// Listed yearly price; `None` derives it from the monthly price
    #[serde(default)]
    pub yearly_price_cents: Option<u64>,
    pub features: Vec<String>,
}

impl SubscriptionPlan {
    /// Price for one billing interval, in cents.
    ///
    /// A listed yearly price wins. Otherwise the yearly price is twelve
    /// months less `YEARLY_DISCOUNT_BPS`, rounded down.
    pub fn price_cents(&self, interval: BillingInterval) -> u64 {
        match interval {
            BillingInterval::Monthly => self.monthly_price_cents,
            BillingInterval::Yearly => {
                if let Some(listed) = self.yearly_price_cents {
                    return listed;
                }
                let full = self.monthly_price_cents.saturating_mul(12);
                full.saturating_mul(BPS_MAX - YEARLY_DISCOUNT_BPS) / BPS_MAX
            }
        }
    }
}

/// Plans offered by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCatalog {
    pub plans: Vec<SubscriptionPlan>,
}

impl PlanCatalog {
    pub fn default_catalog() -> Self {
        let plan = |id: &str, name: &str, cents: u64, yearly: Option<u64>, features: &[&str]| SubscriptionPlan {
            id: id.to_string(),
            name: name.to_string(),
            monthly_price_cents: cents,
            yearly_price_cents: yearly,
            features: features.iter().map(|f| f.to_string()).collect(),
        };

        PlanCatalog {
            plans: vec![
                plan(
                    "basic",
                    "Basic",
                    499,
                    None,
                    &["ai_explanations", "limited_languages", "basic_skills"],
                ),
                plan(
                    "pro",
                    "Pro",
                    999,
                    Some(9599),
                    &[
                        "unlimited_explanations",
                        "all_languages",
                        "advanced_skills",
                        "business_tools",
                        "cultural_content",
                        "offline_access",
                        "priority_support",
                    ],
                ),
                plan(
                    "premium",
                    "Premium",
                    1999,
                    None,
                    &[
                        "unlimited_explanations",
                        "all_languages",
                        "advanced_skills",
                        "business_tools",
                        "cultural_content",
                        "offline_access",
                        "priority_support",
                    ],
                ),
            ],
        }
    }

    pub fn get(&self, plan_id: &str) -> Option<&SubscriptionPlan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    pub fn contains(&self, plan_id: &str) -> bool {
        self.get(plan_id).is_some()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        PlanCatalog::default_catalog()
    }
}
