use serde::{Deserialize, Serialize};

/// Id is an opaque row identifier, which may be textual (such as a UUID)
/// or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Text(String),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Int(id) => write!(f, "{id}"),
            Id::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub base_price: f64,
    #[serde(default)]
    pub sale_price: Option<f64>,
    // Not enforced by the endpoint: it may reference no category we know of.
    #[serde(default)]
    pub category_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub product_id: Id,
    pub size: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    pub stock_quantity: u64,
}

pub const CATEGORY_COLUMNS: &str = "id,name";
pub const PRODUCT_COLUMNS: &str =
    "id,name,slug,description,base_price,sale_price,category_id";
pub const VARIANT_COLUMNS: &str = "product_id,size,color,sku,stock_quantity";
