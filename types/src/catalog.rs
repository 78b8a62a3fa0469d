//! Shop catalog
//!
//! Static configuration for everything purchasable: consumable items, roles,
//! and the temporary effects items can be spent on. Loaded once at startup
//! (TOML) and injected into components as an immutable value; nothing here
//! changes at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::wallet::CurrencyKind;
use crate::{CrumbError, CrumbResult};

/// A consumable item offer, priced in the primary currency.
/// The price doubles as the item's unit value for net-worth math and resale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOffer {
    pub name: String,
    pub price: u64,
}

/// A role offer. The granting itself happens through the external capability
/// layer; the catalog only knows the price and the platform-side role id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOffer {
    pub name: String,
    pub price: u64,
    /// Currency the price is charged in (primary unless configured)
    #[serde(default)]
    pub currency: CurrencyKind,
    /// Platform-side role identifier
    pub role_id: String,
    /// Permanent display marker applied best-effort after purchase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

/// A temporary effect backed by a consumable item: spending `cost` units
/// grants the marker for 24 hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryItem {
    pub cost: u64,
    pub marker: String,
}

/// The full shop catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub items: BTreeMap<CurrencyKind, ItemOffer>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleOffer>,
    #[serde(default)]
    pub temporary: BTreeMap<CurrencyKind, TemporaryItem>,
}

impl Default for Catalog {
    fn default() -> Self {
        let mut items = BTreeMap::new();
        items.insert(
            CurrencyKind::new("milk"),
            ItemOffer { name: "Glass of Milk".to_string(), price: 10 },
        );
        items.insert(
            CurrencyKind::new("coffee"),
            ItemOffer { name: "Cup of Coffee".to_string(), price: 25 },
        );
        items.insert(
            CurrencyKind::new("matcha"),
            ItemOffer { name: "Matcha Latte".to_string(), price: 50 },
        );

        let mut roles = BTreeMap::new();
        roles.insert(
            "bronze".to_string(),
            RoleOffer {
                name: "Bronze Role".to_string(),
                price: 100,
                currency: CurrencyKind::primary(),
                role_id: "100000000000000001".to_string(),
                marker: Some("🥉".to_string()),
            },
        );
        roles.insert(
            "silver".to_string(),
            RoleOffer {
                name: "Silver Role".to_string(),
                price: 500,
                currency: CurrencyKind::primary(),
                role_id: "100000000000000002".to_string(),
                marker: Some("🥈".to_string()),
            },
        );
        roles.insert(
            "gold".to_string(),
            RoleOffer {
                name: "Gold Role".to_string(),
                price: 1000,
                currency: CurrencyKind::primary(),
                role_id: "100000000000000003".to_string(),
                marker: Some("🥇".to_string()),
            },
        );

        let mut temporary = BTreeMap::new();
        temporary.insert(
            CurrencyKind::new("milk"),
            TemporaryItem { cost: 5, marker: "🥛".to_string() },
        );
        temporary.insert(
            CurrencyKind::new("coffee"),
            TemporaryItem { cost: 5, marker: "☕".to_string() },
        );
        temporary.insert(
            CurrencyKind::new("matcha"),
            TemporaryItem { cost: 5, marker: "🍵".to_string() },
        );

        Self { items, roles, temporary }
    }
}

impl Catalog {
    /// Load a catalog from a TOML file
    pub fn load(path: impl AsRef<Path>) -> CrumbResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CrumbError::Storage(format!("read catalog: {}", e)))?;
        let catalog: Catalog = toml::from_str(&content)
            .map_err(|e| CrumbError::Corrupt(format!("parse catalog: {}", e)))?;
        Ok(catalog)
    }

    pub fn item(&self, kind: &CurrencyKind) -> Option<&ItemOffer> {
        self.items.get(kind)
    }

    pub fn role(&self, key: &str) -> Option<&RoleOffer> {
        self.roles.get(key)
    }

    pub fn temporary(&self, kind: &CurrencyKind) -> Option<&TemporaryItem> {
        self.temporary.get(kind)
    }

    /// Every currency kind a schema-complete wallet must carry:
    /// the primary currency plus one slot per item offer.
    pub fn currency_kinds(&self) -> impl Iterator<Item = CurrencyKind> + '_ {
        std::iter::once(CurrencyKind::primary()).chain(self.items.keys().cloned())
    }

    /// Derive the value table used for net-worth aggregation: the primary
    /// currency at 1, each item at its catalog price. Never persisted.
    pub fn currency_values(&self) -> CurrencyValues {
        let mut values = BTreeMap::new();
        values.insert(CurrencyKind::primary(), 1);
        for (kind, offer) in &self.items {
            values.insert(kind.clone(), offer.price);
        }
        CurrencyValues(values)
    }
}

/// Mapping from currency kind to its value in primary-currency units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyValues(BTreeMap<CurrencyKind, u64>);

impl CurrencyValues {
    /// Value of one unit of `kind`; unknown kinds are worthless
    pub fn value_of(&self, kind: &CurrencyKind) -> u64 {
        self.0.get(kind).copied().unwrap_or(0)
    }
}
