use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Pharmacy, Product, ProductStatus, UserProfile};

#[async_trait]
pub trait ReferenceData: Send + Sync {
    /// The whole catalog, inactive products included.
    async fn products(&self) -> Result<Vec<Product>, StoreError>;
    async fn pharmacies(&self) -> Result<Vec<Pharmacy>, StoreError>;
    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
    /// Sales reps whose `assignedPharmacies` include `pharmacy_id`.
    async fn sales_reps_for(&self, pharmacy_id: &str) -> Result<Vec<UserProfile>, StoreError>;
}

/// Reference data for one scan. Lookups are exact-string only.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    pub products: Vec<Product>,
    pub pharmacies: Vec<Pharmacy>,
    pub user: Option<UserProfile>,
}

impl ReferenceSnapshot {
    pub async fn load(gateway: &dyn ReferenceData, user_id: &str) -> Result<Self, StoreError> {
        Ok(Self {
            products: gateway.products().await?,
            pharmacies: gateway.pharmacies().await?,
            user: gateway.user(user_id).await?,
        })
    }

    pub fn active_product_names(&self) -> Vec<&str> {
        self.products
            .iter()
            .filter(|p| p.status == ProductStatus::Active)
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn pharmacy_names(&self) -> Vec<&str> {
        self.pharmacies.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn product_named(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.name == name)
    }

    pub fn pharmacy_named(&self, name: &str) -> Option<&Pharmacy> {
        self.pharmacies.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, status: ProductStatus) -> Product {
        Product {
            id: name.to_lowercase(),
            name: name.to_string(),
            keywords: vec![],
            line: None,
            commission: 0.0,
            points: 1,
            status,
        }
    }

    #[test]
    fn prompt_names_exclude_inactive_products() {
        let snap = ReferenceSnapshot {
            products: vec![
                product("Aspirina", ProductStatus::Active),
                product("Jarabe Viejo", ProductStatus::Inactive),
            ],
            ..Default::default()
        };
        assert_eq!(snap.active_product_names(), vec!["Aspirina"]);
        assert!(snap.product_named("Jarabe Viejo").is_some());
    }

    #[test]
    fn lookups_are_exact() {
        let snap = ReferenceSnapshot {
            products: vec![product("Aspirina", ProductStatus::Active)],
            pharmacies: vec![Pharmacy {
                id: "ph1".into(),
                name: "Farmacia Carol".into(),
                ..Default::default()
            }],
            user: None,
        };
        assert!(snap.product_named("aspirina").is_none());
        assert!(snap.pharmacy_named("Farmacia Carol ").is_none());
        assert_eq!(snap.pharmacy_named("Farmacia Carol").map(|p| p.id.as_str()), Some("ph1"));
    }
}
