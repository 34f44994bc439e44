use async_trait::async_trait;
use kiosk_events::Product;

use crate::error::KioskResult;

/// Products returned by a catalog lookup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProductsResponse {
    pub products: Vec<Product>,
    /// Requested ids the storefront does not know.
    pub invalid_ids: Vec<String>,
}

/// The platform storefront's product lookup.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn fetch_products(&self, product_ids: &[String]) -> KioskResult<ProductsResponse>;
}

/// Catalog over a fixed product list.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    products: Vec<Product>,
}

impl StaticCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn fetch_products(&self, product_ids: &[String]) -> KioskResult<ProductsResponse> {
        let mut response = ProductsResponse::default();
        for id in product_ids {
            match self.products.iter().find(|p| &p.product_id == id) {
                Some(product) => response.products.push(product.clone()),
                None => response.invalid_ids.push(id.clone()),
            }
        }
        Ok(response)
    }
}
