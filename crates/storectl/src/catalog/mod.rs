use crate::endpoint::{Endpoint, ErrorDetail, Select, Selected};
use crate::output::{self, CliOutput, OutputType};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

mod join;
mod models;

pub use join::{JoinIndex, ProductListing};
pub use models::{Category, Id, Product, Variant};
use models::{CATEGORY_COLUMNS, PRODUCT_COLUMNS, VARIANT_COLUMNS};

pub const CATEGORIES: &str = "categories";
pub const PRODUCTS: &str = "products";
pub const VARIANTS: &str = "product_variants";

// Maximum number of product ids in a single variants request,
// which bounds the length of its URL.
const VARIANTS_CHUNK: usize = 100;

#[derive(Debug, clap::Args)]
#[clap(rename_all = "kebab-case")]
pub struct Catalog {
    /// List the products of this category, by id or name, with their variants.
    #[clap(long)]
    category: Option<String>,
    /// Maximum number of count or variant requests to have in flight at once.
    #[clap(long, default_value_t = 1)]
    concurrency: usize,
}

impl Catalog {
    pub async fn run(&self, ctx: &mut crate::CliContext) -> anyhow::Result<()> {
        let client = ctx.client()?;
        let options = ReportOptions {
            category: self.category.clone(),
            concurrency: self.concurrency,
        };
        let report = build_catalog_report(&client, &options).await?;

        print_report(ctx.output_type(), &report)?;
        eprint!("{}", Summary(&report));

        Ok(())
    }
}

// Print the whole report as one document, or as tables of its categories
// and products.
fn print_report(ty: OutputType, report: &CatalogReport) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();

    match ty {
        OutputType::Json => output::write_json(&mut stdout, report),
        OutputType::Yaml => output::write_yaml(&mut stdout, report),
        OutputType::Table => {
            output::write_table(&mut stdout, report.categories.iter().cloned())?;
            if let Some(detail) = &report.detail {
                writeln!(stdout, "Products of {}:", detail.category.name)?;
                output::write_table(&mut stdout, detail.products.iter().cloned())?;
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Category, by id or name, whose products are listed with their variants.
    pub category: Option<String>,
    /// Maximum number of independent requests to have in flight at once.
    pub concurrency: usize,
}

/// CatalogReport aggregates categories, products, and variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogReport {
    /// Product count of each category, ordered by category name.
    pub categories: Vec<CategoryTally>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ProductDetail>,
    /// Count of all products, regardless of category.
    pub total_products: Tally,
    /// Sum of the successful per-category counts.
    pub categorized: u64,
    /// Products counted in the total but by no category, such as those
    /// with a missing or dangling category. Unknown if the total is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unassigned: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTally {
    pub id: Id,
    pub name: String,
    pub products: Tally,
}

/// Tally is a count, or the reason it couldn't be taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tally {
    Count(u64),
    Error(ErrorDetail),
}

impl Tally {
    pub fn count(&self) -> Option<u64> {
        match self {
            Tally::Count(count) => Some(*count),
            Tally::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductDetail {
    pub category: Category,
    pub products: Vec<ProductListing>,
    /// Set if the category's products couldn't be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Number of fetched variants belonging to no listed product.
    pub dangling_variants: usize,
}

/// Build a report of the catalog. Only a failure to fetch categories, or a
/// selected category which doesn't exist, fails the report as a whole.
/// Every other failure is recorded against the affected entry.
#[tracing::instrument(skip(endpoint), err)]
pub async fn build_catalog_report<E>(
    endpoint: &E,
    options: &ReportOptions,
) -> Result<CatalogReport, crate::Error>
where
    E: Endpoint + ?Sized,
{
    let concurrency = options.concurrency.max(1);

    let categories: Vec<Category> = endpoint
        .select(
            &Select::from(CATEGORIES)
                .columns(CATEGORY_COLUMNS)
                .order("name,id"),
        )
        .await
        .and_then(Selected::decode)
        .map_err(|detail| crate::Error::Fetch {
            what: "categories",
            detail,
        })?;

    tracing::info!(categories = categories.len(), "fetched categories");

    let index = JoinIndex::new(&categories);
    let target = match &options.category {
        Some(selector) => Some(index.find_category(selector).cloned().ok_or_else(|| {
            crate::Error::UnknownCategory {
                selector: selector.clone(),
            }
        })?),
        None => None,
    };

    let tallies = count_by_category(endpoint, &categories, concurrency).await;

    let detail = match target {
        Some(category) => Some(fetch_detail(endpoint, index, category, concurrency).await),
        None => None,
    };

    let total_products = count(
        endpoint,
        Select::from(PRODUCTS).columns("id").head(),
    )
    .await;
    if let Tally::Error(error) = &total_products {
        tracing::warn!(%error, "failed to count all products");
    }

    let categorized = tallies.iter().filter_map(|t| t.products.count()).sum();
    let unassigned = total_products
        .count()
        .map(|total| total.saturating_sub(categorized));

    Ok(CatalogReport {
        categories: tallies,
        detail,
        total_products,
        categorized,
        unassigned,
    })
}

async fn count<E>(endpoint: &E, request: Select) -> Tally
where
    E: Endpoint + ?Sized,
{
    match endpoint
        .select(&request)
        .await
        .and_then(|selected| selected.require_count())
    {
        Ok(count) => Tally::Count(count),
        Err(error) => Tally::Error(error),
    }
}

// Count products of each category. Counts may run concurrently, but the
// tallies are returned in the order of `categories`.
async fn count_by_category<E>(
    endpoint: &E,
    categories: &[Category],
    concurrency: usize,
) -> Vec<CategoryTally>
where
    E: Endpoint + ?Sized,
{
    let counts: Vec<BoxFuture<'_, CategoryTally>> = categories
        .iter()
        .map(|category| count_category(endpoint, category).boxed())
        .collect();

    futures::stream::iter(counts)
        .buffered(concurrency)
        .collect()
        .await
}

async fn count_category<E>(endpoint: &E, category: &Category) -> CategoryTally
where
    E: Endpoint + ?Sized,
{
    let products = count(
        endpoint,
        Select::from(PRODUCTS)
            .columns("id")
            .eq("category_id", category.id.to_string())
            .head(),
    )
    .await;

    match &products {
        Tally::Count(count) => {
            tracing::debug!(category = %category.name, count, "counted products")
        }
        Tally::Error(error) => {
            tracing::warn!(category = %category.name, %error, "failed to count products")
        }
    }
    CategoryTally {
        id: category.id.clone(),
        name: category.name.clone(),
        products,
    }
}

async fn fetch_detail<E>(
    endpoint: &E,
    mut index: JoinIndex,
    category: Category,
    concurrency: usize,
) -> ProductDetail
where
    E: Endpoint + ?Sized,
{
    let products: Vec<Product> = match endpoint
        .select(
            &Select::from(PRODUCTS)
                .columns(PRODUCT_COLUMNS)
                .eq("category_id", category.id.to_string())
                .order("id"),
        )
        .await
        .and_then(Selected::decode)
    {
        Ok(products) => products,
        Err(error) => {
            tracing::warn!(category = %category.name, %error, "failed to fetch products");
            return ProductDetail {
                category,
                products: Vec::new(),
                error: Some(error),
                dangling_variants: 0,
            };
        }
    };
    tracing::info!(category = %category.name, products = products.len(), "fetched products");

    let chunks: Vec<Vec<Id>> = products
        .chunks(VARIANTS_CHUNK)
        .map(|chunk| chunk.iter().map(|product| product.id.clone()).collect())
        .collect();

    let fetches: Vec<BoxFuture<'_, VariantsChunk>> = chunks
        .into_iter()
        .map(|ids| fetch_variants(endpoint, ids).boxed())
        .collect();
    let fetched: Vec<VariantsChunk> = futures::stream::iter(fetches)
        .buffered(concurrency)
        .collect()
        .await;

    let mut failed = BTreeMap::new();
    for (ids, variants) in fetched {
        match variants {
            Ok(variants) => index.index_variants(variants),
            Err(error) => {
                tracing::warn!(products = ids.len(), %error, "failed to fetch variants");
                failed.extend(ids.into_iter().map(|id| (id, error.clone())));
            }
        }
    }

    let (products, dangling_variants) = index.attach(products, &failed);
    if dangling_variants != 0 {
        tracing::debug!(dangling_variants, "excluded variants of unknown products");
    }

    ProductDetail {
        category,
        products,
        error: None,
        dangling_variants,
    }
}

// Product ids of a variants request, and its outcome.
type VariantsChunk = (Vec<Id>, Result<Vec<Variant>, ErrorDetail>);

// Fetch variants of the products `ids`. The variants of a product are
// ordered by size, and then by sku so that pages of equal sizes are stable.
async fn fetch_variants<E>(endpoint: &E, ids: Vec<Id>) -> VariantsChunk
where
    E: Endpoint + ?Sized,
{
    let variants = endpoint
        .select(
            &Select::from(VARIANTS)
                .columns(VARIANT_COLUMNS)
                .in_("product_id", ids.iter().map(ToString::to_string))
                .order("product_id,size,sku"),
        )
        .await
        .and_then(Selected::decode);

    (ids, variants)
}

// Summary is a human-readable account of a report.
struct Summary<'r>(&'r CatalogReport);

impl std::fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let report = self.0;
        let failed: Vec<(&str, &ErrorDetail)> = report
            .categories
            .iter()
            .filter_map(|tally| match &tally.products {
                Tally::Error(error) => Some((tally.name.as_str(), error)),
                Tally::Count(_) => None,
            })
            .collect();

        writeln!(
            f,
            "Counted {} categories: {} succeeded, {} failed.",
            report.categories.len(),
            report.categories.len() - failed.len(),
            failed.len(),
        )?;
        for (name, error) in failed {
            writeln!(f, "  {name}: {error}")?;
        }

        match &report.total_products {
            Tally::Count(total) => writeln!(
                f,
                "Total products: {total} ({} categorized, {} unassigned).",
                report.categorized,
                report.unassigned.unwrap_or_default(),
            )?,
            Tally::Error(error) => writeln!(f, "Total products: unknown: {error}")?,
        }

        if let Some(detail) = &report.detail {
            match &detail.error {
                Some(error) => writeln!(f, "Products of {}: {error}", detail.category.name)?,
                None => writeln!(
                    f,
                    "Listed {} products of {}, with {} variants.",
                    detail.products.len(),
                    detail.category.name,
                    detail.products.iter().map(|l| l.variants.len()).sum::<usize>(),
                )?,
            }
            for listing in &detail.products {
                if let Some(error) = &listing.error {
                    writeln!(f, "  variants of {}: {error}", listing.product.name)?;
                }
            }
        }
        Ok(())
    }
}

impl CliOutput for CategoryTally {
    fn table_headers() -> Vec<&'static str> {
        vec!["ID", "Category", "Products"]
    }

    fn into_table_row(self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.name,
            match self.products {
                Tally::Count(count) => count.to_string(),
                Tally::Error(error) => format!("error: {error}"),
            },
        ]
    }
}

impl CliOutput for ProductListing {
    fn table_headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Slug", "Price", "Sale Price", "Variants"]
    }

    fn into_table_row(self) -> Vec<String> {
        use itertools::Itertools;

        let variants = match &self.error {
            Some(error) => format!("error: {error}"),
            None => self
                .variants
                .iter()
                .map(|v| {
                    format!(
                        "{} {} {} ({} in stock)",
                        v.size,
                        v.color.as_deref().unwrap_or("-"),
                        v.sku.as_deref().unwrap_or("-"),
                        v.stock_quantity,
                    )
                })
                .join("\n"),
        };

        vec![
            self.product.id.to_string(),
            self.product.name,
            self.product.slug.unwrap_or_default(),
            self.product.base_price.to_string(),
            self.product
                .sale_price
                .map(|price| price.to_string())
                .unwrap_or_default(),
            variants,
        ]
    }
}
