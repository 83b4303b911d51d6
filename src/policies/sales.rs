//! 销售规则：商品可售性与下单数量

/// 当前不可售商品
pub const UNAVAILABLE_PRODUCTS: &[&str] = &["Limited Edition Sneakers", "Rare Collectible Watch"];

/// 单笔订单最大数量
pub const MAX_STOCK: u32 = 10;

/// 商品名不在不可售集合中（精确匹配）
pub fn is_product_available(product_name: &str) -> bool {
    !UNAVAILABLE_PRODUCTS.contains(&product_name)
}

/// 可售且数量在 [1, MAX_STOCK]
pub fn can_create_order(product_name: &str, quantity: u32) -> bool {
    is_product_available(product_name) && (1..=MAX_STOCK).contains(&quantity)
}
