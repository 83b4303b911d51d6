//! 销售智能体：商品 / 数量抽取与可售性、下单校验

use regex::Regex;

use super::extract::FactExtractor;
use super::Rejection;
use crate::policies::sales::{can_create_order, is_product_available};

/// 可识别的商品词表
pub const KNOWN_PRODUCTS: &[&str] = &["Limited Edition Sneakers", "Premium Plan", "Rare Collectible Watch"];

/// 未识别商品时用于下单校验的占位名
pub const UNKNOWN_PRODUCT: &str = "Unknown Product";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesFacts {
    pub product: Option<String>,
    /// 文本中第一个独立整数，缺省 1
    pub quantity: u32,
    pub mentions_order: bool,
}

/// 词边界匹配商品名（大小写不敏感），数量取第一个独立整数
pub struct KeywordSalesExtractor {
    products: Vec<(String, Regex)>,
    quantity: Regex,
}

impl KeywordSalesExtractor {
    pub fn new(products: &[&str]) -> Self {
        let products = products
            .iter()
            .map(|p| {
                let pattern = format!(r"\b{}\b", regex::escape(&p.to_lowercase()));
                (p.to_string(), Regex::new(&pattern).expect("escaped product pattern"))
            })
            .collect();
        Self {
            products,
            quantity: Regex::new(r"\b(\d+)\b").expect("static quantity pattern"),
        }
    }
}

impl Default for KeywordSalesExtractor {
    fn default() -> Self {
        Self::new(KNOWN_PRODUCTS)
    }
}

impl FactExtractor for KeywordSalesExtractor {
    type Facts = SalesFacts;

    fn extract(&self, user_input: &str) -> SalesFacts {
        let lower = user_input.to_lowercase();
        let product = self
            .products
            .iter()
            .find(|(_, re)| re.is_match(&lower))
            .map(|(name, _)| name.clone());
        // 超出 u32 的数字按最大值处理，交由数量上限拦截
        let quantity = self
            .quantity
            .captures(user_input)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().parse::<u32>().unwrap_or(u32::MAX))
            .unwrap_or(1);
        SalesFacts {
            product,
            quantity,
            mentions_order: lower.contains("order"),
        }
    }
}

pub const CLARIFICATION: &str = "I'm happy to assist! Could you clarify what product you're interested in?";

/// 按固定顺序校验：商品可售 -> 下单数量
pub fn evaluate(facts: &SalesFacts) -> Option<Rejection> {
    if let Some(product) = &facts.product {
        if !is_product_available(product) {
            return Some(Rejection::new(
                "product_unavailable",
                format!("{} is currently unavailable.", product),
            ));
        }
    }

    let product = facts.product.as_deref().unwrap_or(UNKNOWN_PRODUCT);
    if facts.mentions_order && !can_create_order(product, facts.quantity) {
        return Some(Rejection::new(
            "order_invalid",
            "Cannot place this order. Ensure quantity is valid and product is in stock.",
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_product_and_quantity() {
        let facts = KeywordSalesExtractor::default().extract("I want to order 3 rare collectible watch");
        assert_eq!(facts.product.as_deref(), Some("Rare Collectible Watch"));
        assert_eq!(facts.quantity, 3);
        assert!(facts.mentions_order);
    }

    #[test]
    fn test_extract_defaults() {
        let facts = KeywordSalesExtractor::default().extract("Tell me about your deals");
        assert_eq!(facts.product, None);
        assert_eq!(facts.quantity, 1);
        assert!(!facts.mentions_order);
    }

    #[test]
    fn test_product_requires_word_boundary() {
        let facts = KeywordSalesExtractor::default().extract("premium planner stickers");
        assert_eq!(facts.product, None);
    }

    #[test]
    fn test_quantity_is_first_standalone_integer() {
        let extractor = KeywordSalesExtractor::default();
        assert_eq!(extractor.extract("order 12 Premium Plan, not 2").quantity, 12);
        assert_eq!(extractor.extract("model X200 please").quantity, 1);
        assert_eq!(extractor.extract("order 99999999999 plans").quantity, u32::MAX);
    }

    #[test]
    fn test_unavailable_product_rejected_regardless_of_quantity() {
        for qty in [1, 3, 10, 50] {
            let facts = SalesFacts {
                product: Some("Rare Collectible Watch".to_string()),
                quantity: qty,
                mentions_order: true,
            };
            assert_eq!(evaluate(&facts).unwrap().rule, "product_unavailable");
        }
    }

    #[test]
    fn test_order_quantity_checked_only_when_ordering() {
        let mut facts = SalesFacts {
            product: Some("Premium Plan".to_string()),
            quantity: 11,
            mentions_order: true,
        };
        assert_eq!(evaluate(&facts).unwrap().rule, "order_invalid");
        facts.mentions_order = false;
        assert!(evaluate(&facts).is_none());
        facts.mentions_order = true;
        facts.quantity = 10;
        assert!(evaluate(&facts).is_none());
    }

    #[test]
    fn test_unknown_product_order_uses_quantity_only() {
        let facts = SalesFacts {
            product: None,
            quantity: 0,
            mentions_order: true,
        };
        assert_eq!(evaluate(&facts).unwrap().rule, "order_invalid");
    }
}
