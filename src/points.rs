// Per-line points from commission on the sale value or the legacy flat rate.

use crate::model::{ExtractedProduct, Product, ProductFound, ProductStatus};
use crate::reference::ReferenceSnapshot;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointsTally {
    pub total_points: i64,
    pub products_found: Vec<ProductFound>,
}

/// Points for one line item.
///
/// Commission applies when both the price and the commission are positive. A zero
/// commission falls back to `quantity * product.points`. A positive commission with
/// no price earns nothing. Inactive products always earn zero.
pub fn line_points(product: &Product, quantity: f64, unit_price: f64) -> i64 {
    if product.status == ProductStatus::Inactive {
        return 0;
    }
    if unit_price > 0.0 && product.commission > 0.0 {
        (unit_price * quantity * product.commission / 100.0).round() as i64
    } else if product.commission == 0.0 {
        (quantity * product.points as f64).round() as i64
    } else {
        0
    }
}

fn positive_or(value: Option<f64>, fallback: f64) -> f64 {
    value.filter(|v| *v > 0.0).unwrap_or(fallback)
}

/// Prices every extracted item that names a catalog product; unknown names are skipped.
pub fn tally(items: &[ExtractedProduct], reference: &ReferenceSnapshot, default_line: &str) -> PointsTally {
    let mut tally = PointsTally::default();
    for item in items {
        let Some(product) = reference.product_named(&item.name) else {
            continue;
        };
        let quantity = positive_or(item.quantity, 1.0);
        let unit_price = positive_or(item.unit_price, 0.0);
        let points = line_points(product, quantity, unit_price);

        tally.total_points += points;
        tally.products_found.push(ProductFound {
            name: product.name.clone(),
            quantity,
            unit_price,
            commission_pct: product.commission,
            points,
            line: product
                .line
                .as_deref()
                .filter(|l| !l.trim().is_empty())
                .unwrap_or(default_line)
                .to_string(),
        });
    }
    tally
}
