use super::models::{Category, Id, Product, Variant};
use crate::endpoint::ErrorDetail;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// JoinIndex associates fetched rows with their parents by foreign key,
/// because the endpoint can't join them for us. It's built fresh for
/// every report.
#[derive(Debug, Default)]
pub struct JoinIndex {
    categories: BTreeMap<Id, Category>,
    variants: BTreeMap<Id, Vec<Variant>>,
}

/// ProductListing is a product and its attached variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductListing {
    pub product: Product,
    pub variants: Vec<Variant>,
    /// Set if the product's variants couldn't be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl JoinIndex {
    pub fn new(categories: &[Category]) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|category| (category.id.clone(), category.clone()))
                .collect(),
            variants: BTreeMap::new(),
        }
    }

    /// Find a category by its id, or failing that by its case-insensitive name.
    pub fn find_category(&self, selector: &str) -> Option<&Category> {
        selector
            .parse()
            .ok()
            .and_then(|id| self.categories.get(&Id::Int(id)))
            .or_else(|| self.categories.get(&Id::Text(selector.to_string())))
            .or_else(|| {
                self.categories
                    .values()
                    .find(|category| category.name.eq_ignore_ascii_case(selector))
            })
    }

    /// Index `variants` under their product. Variants of a product are kept
    /// in `size` order, and variants of equal size keep their fetch order.
    pub fn index_variants(&mut self, variants: impl IntoIterator<Item = Variant>) {
        for variant in variants {
            self.variants
                .entry(variant.product_id.clone())
                .or_default()
                .push(variant);
        }
        for variants in self.variants.values_mut() {
            variants.sort_by(|l, r| l.size.cmp(&r.size));
        }
    }

    /// Attach indexed variants to each of `products`, in product order.
    /// Products in `failed` carry their fetch error rather than variants.
    /// Also returns the number of indexed variants which belong to none of
    /// `products`: they remain indexed, but aren't attached anywhere.
    pub fn attach(
        &self,
        products: Vec<Product>,
        failed: &BTreeMap<Id, ErrorDetail>,
    ) -> (Vec<ProductListing>, usize) {
        let ids: BTreeSet<&Id> = products.iter().map(|product| &product.id).collect();

        let dangling = self
            .variants
            .iter()
            .filter(|(product_id, _)| !ids.contains(product_id))
            .map(|(_, variants)| variants.len())
            .sum();

        let listings = products
            .into_iter()
            .map(|product| ProductListing {
                variants: self
                    .variants
                    .get(&product.id)
                    .cloned()
                    .unwrap_or_default(),
                error: failed.get(&product.id).cloned(),
                product,
            })
            .collect();

        (listings, dangling)
    }
}
