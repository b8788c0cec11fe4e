use crate::errors::ServiceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// A single product line in a customer's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: i64,
    pub supplier_id: i64,
    pub quantity: i32,
    pub unit_price: i64,
}

impl CartLine {
    pub fn line_total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

/// Minimum-order and delivery terms a supplier applies to one cart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplierTerms {
    pub min_order_amount: i64,
    pub free_delivery_amount: i64,
    pub delivery_fee: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierGroup {
    pub supplier_id: i64,
    pub terms: SupplierTerms,
    pub lines: Vec<CartLine>,
}

impl SupplierGroup {
    pub fn new(supplier_id: i64, terms: SupplierTerms) -> Self {
        Self {
            supplier_id,
            terms,
            lines: Vec::new(),
        }
    }

    /// Σ(unit_price * quantity); overflow is an invalid cart, never a wrap.
    pub fn subtotal(&self) -> Result<i64, ServiceError> {
        self.lines.iter().try_fold(0i64, |acc, line| {
            line.line_total()
                .and_then(|total| acc.checked_add(total))
                .ok_or_else(|| {
                    ServiceError::InvalidCart(format!(
                        "supplier {}: line total overflows",
                        self.supplier_id
                    ))
                })
        })
    }

    /// Free once the subtotal reaches the supplier's free-delivery amount.
    pub fn delivery_charge(&self, subtotal: i64) -> i64 {
        if subtotal >= self.terms.free_delivery_amount {
            0
        } else {
            self.terms.delivery_fee
        }
    }

    /// Checks positivity of every line and the minimum order amount, returning the subtotal.
    pub fn validate(&self) -> Result<i64, ServiceError> {
        for line in &self.lines {
            if line.supplier_id != self.supplier_id {
                return Err(ServiceError::InvalidCart(format!(
                    "supplier {}: product {} belongs to supplier {}",
                    self.supplier_id, line.product_id, line.supplier_id
                )));
            }
            if line.quantity <= 0 {
                return Err(ServiceError::InvalidCart(format!(
                    "supplier {}: product {} has non-positive quantity {}",
                    self.supplier_id, line.product_id, line.quantity
                )));
            }
            if line.unit_price <= 0 {
                return Err(ServiceError::InvalidCart(format!(
                    "supplier {}: product {} has non-positive price {}",
                    self.supplier_id, line.product_id, line.unit_price
                )));
            }
        }

        let sum = self.subtotal()?;
        if sum < self.terms.min_order_amount {
            return Err(ServiceError::InvalidCart(format!(
                "supplier {}: order total {} is below the minimum of {}",
                self.supplier_id, sum, self.terms.min_order_amount
            )));
        }
        Ok(sum)
    }
}

/// Supplier groups in first-seen order with O(1) lookup by supplier id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SupplierGroup>", into = "Vec<SupplierGroup>")]
pub struct SupplierGroups {
    groups: Vec<SupplierGroup>,
    index: HashMap<i64, usize>,
}

impl SupplierGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the group for `supplier_id`, appending it with `terms` when absent.
    pub fn entry(&mut self, supplier_id: i64, terms: SupplierTerms) -> &mut SupplierGroup {
        let idx = match self.index.get(&supplier_id) {
            Some(idx) => *idx,
            None => {
                self.groups.push(SupplierGroup::new(supplier_id, terms));
                let idx = self.groups.len() - 1;
                self.index.insert(supplier_id, idx);
                idx
            }
        };
        &mut self.groups[idx]
    }

    pub fn get(&self, supplier_id: i64) -> Option<&SupplierGroup> {
        self.index.get(&supplier_id).map(|idx| &self.groups[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SupplierGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.groups.iter().map(|g| g.lines.len()).sum()
    }
}

impl From<Vec<SupplierGroup>> for SupplierGroups {
    fn from(groups: Vec<SupplierGroup>) -> Self {
        let mut out = SupplierGroups::new();
        for group in groups {
            let terms = group.terms;
            out.entry(group.supplier_id, terms).lines.extend(group.lines);
        }
        out
    }
}

impl From<SupplierGroups> for Vec<SupplierGroup> {
    fn from(groups: SupplierGroups) -> Self {
        groups.groups
    }
}

impl IntoIterator for SupplierGroups {
    type Item = SupplierGroup;
    type IntoIter = std::vec::IntoIter<SupplierGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub customer_id: i64,
    pub groups: SupplierGroups,
}

impl Cart {
    pub fn new(customer_id: i64) -> Self {
        Self {
            customer_id,
            groups: SupplierGroups::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.line_count() == 0
    }

    /// Per-supplier subtotal, delivery and total plus the grand total.
    pub fn summary(&self) -> Result<CartSummary, ServiceError> {
        let mut groups = Vec::with_capacity(self.groups.len());
        let mut total = 0i64;
        for group in self.groups.iter() {
            let subtotal = group.subtotal()?;
            let delivery = group.delivery_charge(subtotal);
            let group_total = subtotal.checked_add(delivery).ok_or_else(|| {
                ServiceError::InvalidCart(format!("supplier {}: total overflows", group.supplier_id))
            })?;
            total = total
                .checked_add(group_total)
                .ok_or_else(|| ServiceError::InvalidCart("cart total overflows".to_string()))?;
            groups.push(GroupSummary {
                supplier_id: group.supplier_id,
                line_count: group.lines.len(),
                subtotal,
                delivery,
                total: group_total,
                meets_minimum: subtotal >= group.terms.min_order_amount,
            });
        }
        Ok(CartSummary { groups, total })
    }

    /// Validates every group and converts the cart into one order per supplier,
    /// in first-added order. Any invalid group fails the whole cart.
    pub fn into_new_orders(self, order_date: DateTime<Utc>) -> Result<Vec<NewOrder>, ServiceError> {
        if self.is_empty() {
            return Err(ServiceError::InvalidCart(format!(
                "cart for customer {} has no lines",
                self.customer_id
            )));
        }
        for group in self.groups.iter() {
            group.validate()?;
        }

        let customer_id = self.customer_id;
        Ok(self
            .groups
            .into_iter()
            .filter(|group| !group.lines.is_empty())
            .map(|group| NewOrder {
                customer_id,
                supplier_id: group.supplier_id,
                order_date,
                lines: group
                    .lines
                    .into_iter()
                    .map(|line| NewOrderLine {
                        product_id: line.product_id,
                        quantity: line.quantity,
                        price: line.unit_price,
                    })
                    .collect(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub supplier_id: i64,
    pub line_count: usize,
    pub subtotal: i64,
    pub delivery: i64,
    pub total: i64,
    pub meets_minimum: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSummary {
    pub groups: Vec<GroupSummary>,
    pub total: i64,
}

/// Order about to be persisted, one per supplier group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: i64,
    pub supplier_id: i64,
    pub order_date: DateTime<Utc>,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: i64,
    pub quantity: i32,
    pub price: i64,
}

/// Request to set a cart line's quantity and price.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddCartLine {
    pub product_id: i64,
    pub supplier_id: i64,
    #[validate(range(min = 1, message = "quantity must be positive"))]
    pub quantity: i32,
    #[validate(range(min = 1, message = "price must be positive"))]
    pub price: i64,
}

/// Request to take `quantity` units of a product out of the cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RemoveCartLine {
    pub product_id: i64,
    pub supplier_id: i64,
    #[validate(range(min = 1, message = "quantity to remove must be positive"))]
    pub quantity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn line(product_id: i64, supplier_id: i64, quantity: i32, unit_price: i64) -> CartLine {
        CartLine {
            product_id,
            supplier_id,
            quantity,
            unit_price,
        }
    }

    fn group(min: i64, lines: Vec<CartLine>) -> SupplierGroup {
        let supplier_id = lines.first().map(|l| l.supplier_id).unwrap_or(1);
        SupplierGroup {
            supplier_id,
            terms: SupplierTerms {
                min_order_amount: min,
                free_delivery_amount: 5_000,
                delivery_fee: 250,
            },
            lines,
        }
    }

    #[rstest]
    #[case(1000, 1000, true)]
    #[case(999, 1000, false)]
    #[case(1200, 1000, true)]
    fn minimum_order_boundary(#[case] total: i64, #[case] min: i64, #[case] ok: bool) {
        let g = group(min, vec![line(1, 1, 1, total)]);
        assert_eq!(g.validate().is_ok(), ok);
    }

    #[test]
    fn non_positive_quantity_names_the_rule() {
        let g = group(0, vec![line(7, 3, 0, 100)]);
        assert_matches!(g.validate(), Err(ServiceError::InvalidCart(msg)) if msg.contains("non-positive quantity"));
    }

    #[test]
    fn overflow_is_invalid_cart() {
        let g = group(0, vec![line(1, 1, 2, i64::MAX)]);
        assert_matches!(g.subtotal(), Err(ServiceError::InvalidCart(_)));
    }

    #[test]
    fn delivery_is_free_above_threshold() {
        let g = group(0, vec![line(1, 1, 1, 100)]);
        assert_eq!(g.delivery_charge(4_999), 250);
        assert_eq!(g.delivery_charge(5_000), 0);
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let mut groups = SupplierGroups::new();
        for supplier in [30, 10, 20, 10, 30] {
            groups
                .entry(supplier, SupplierTerms::default())
                .lines
                .push(line(supplier * 100, supplier, 1, 10));
        }
        let order: Vec<i64> = groups.iter().map(|g| g.supplier_id).collect();
        assert_eq!(order, vec![30, 10, 20]);
        assert_eq!(groups.get(10).map(|g| g.lines.len()), Some(2));
        assert_eq!(groups.line_count(), 5);
    }

    #[test]
    fn one_bad_group_fails_the_whole_cart() {
        let mut cart = Cart::new(1);
        let terms = SupplierTerms {
            min_order_amount: 1000,
            ..Default::default()
        };
        cart.groups.entry(1, terms).lines.push(line(1, 1, 2, 600));
        cart.groups.entry(2, terms).lines.push(line(2, 2, 1, 999));
        assert_matches!(cart.into_new_orders(Utc::now()), Err(ServiceError::InvalidCart(_)));
    }

    #[test]
    fn valid_cart_becomes_one_order_per_supplier() {
        let mut cart = Cart::new(1);
        let terms = SupplierTerms {
            min_order_amount: 1000,
            ..Default::default()
        };
        cart.groups.entry(2, terms).lines.push(line(5, 2, 1, 1000));
        cart.groups.entry(1, terms).lines.push(line(1, 1, 2, 600));
        let orders = cart.into_new_orders(Utc::now()).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].supplier_id, 2);
        assert_eq!(
            orders[1].lines,
            vec![NewOrderLine {
                product_id: 1,
                quantity: 2,
                price: 600
            }]
        );
        assert!(orders.iter().all(|o| o.customer_id == 1));
    }

    #[test]
    fn summary_adds_delivery_below_threshold() {
        let mut cart = Cart::new(1);
        cart.groups
            .entry(
                1,
                SupplierTerms {
                    min_order_amount: 0,
                    free_delivery_amount: 2000,
                    delivery_fee: 300,
                },
            )
            .lines
            .push(line(1, 1, 2, 600));
        let summary = cart.summary().unwrap();
        assert_eq!(summary.groups[0].subtotal, 1200);
        assert_eq!(summary.groups[0].delivery, 300);
        assert_eq!(summary.total, 1500);
    }

    #[test]
    fn add_line_rejects_non_positive_input() {
        let req = AddCartLine {
            product_id: 1,
            supplier_id: 1,
            quantity: 0,
            price: 10,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("quantity"));
        assert_matches!(ServiceError::from(errors), ServiceError::ValidationError(_));

        let req = AddCartLine {
            quantity: 1,
            price: 0,
            ..req
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("price"));
        assert!(AddCartLine { price: 1, ..req }.validate().is_ok());
    }

    #[test]
    fn remove_line_needs_a_positive_quantity() {
        let req = RemoveCartLine {
            product_id: 1,
            supplier_id: 1,
            quantity: -2,
        };
        assert!(req.validate().unwrap_err().field_errors().contains_key("quantity"));
        assert!(RemoveCartLine { quantity: 1, ..req }.validate().is_ok());
    }
}
