//! 客户支持规则：取消、追踪、退款、用语

use super::contains_any;

/// 订单号固定前缀
pub const ORDER_PREFIX: &str = "ORD";

const NON_CANCELLABLE_STATUSES: &[&str] = &["shipped", "delivered"];

const REFUND_PHRASES: &[&str] = &[
    "i want a refund",
    "can i return",
    "exchange my product",
    "request a refund",
];

const OFFENSIVE_WORDS: &[&str] = &["scam", "fraud", "stupid", "idiot"];

/// 已发货 / 已送达的订单不可取消（状态大小写不敏感）
pub fn can_cancel_order(order_status: &str) -> bool {
    !NON_CANCELLABLE_STATUSES.contains(&order_status.to_lowercase().as_str())
}

/// 订单号格式：ORD 后跟一位或多位数字，别无其他
pub fn can_track_order(order_number: &str) -> bool {
    order_number
        .strip_prefix(ORDER_PREFIX)
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// 是否为明确的退款 / 退换请求（需要订单号）
pub fn requires_order_number(user_input: &str) -> bool {
    contains_any(user_input, REFUND_PHRASES)
}

/// 不含冒犯用语
pub fn is_request_appropriate(user_input: &str) -> bool {
    !contains_any(user_input, OFFENSIVE_WORDS)
}
