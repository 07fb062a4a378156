//! The `dish` namespace: a menu item served from a fixed catalogue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::loader::{Cacheable, DataLoader};

/// A menu item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub id: i64,
    pub name: String,
    pub taste: i32,
    pub price: f64,
    pub comment: String,
}

impl Cacheable for Dish {
    const NAMESPACE: &'static str = "dish";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Loads dishes from the built-in catalogue; unknown keys fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct DishLoader;

#[async_trait]
impl DataLoader for DishLoader {
    type Value = Dish;

    async fn load(&self, key: &str) -> anyhow::Result<Dish> {
        match key {
            "1" => Ok(Dish {
                id: 1,
                name: "GongBaoJiDing".to_string(),
                taste: 1,
                price: 40.0,
                comment: "awesome".to_string(),
            }),
            "2" => Ok(Dish {
                id: 2,
                name: "GongBaoJiDing".to_string(),
                taste: 0,
                price: 100.0,
                comment: "excellent".to_string(),
            }),
            _ => anyhow::bail!("dish [{}] not found", key),
        }
    }
}
