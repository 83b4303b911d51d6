//! 客户支持智能体：用语、取消、追踪、退款

use super::extract::{trim_token, FactExtractor};
use super::Rejection;
use crate::policies::customer_support::{
    can_cancel_order, can_track_order, is_request_appropriate, requires_order_number,
};

const CANCEL_PHRASES: &[&str] = &["cancel order", "cancel my order"];
const TRACK_PHRASES: &[&str] = &["track order", "track my order"];
const KNOWN_STATUSES: &[&str] = &["shipped", "delivered", "processing", "pending"];

/// 文本未提及状态时假定的订单状态（无订单查询服务）
pub const ASSUMED_ORDER_STATUS: &str = "shipped";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerSupportFacts {
    pub user_input: String,
    pub wants_cancel: bool,
    pub wants_track: bool,
    /// 以 ORD 开头（大小写不敏感）且含数字的第一个 token
    pub order_number: Option<String>,
    pub order_status: String,
}

#[derive(Debug)]
pub struct KeywordCustomerSupportExtractor {
    assumed_status: String,
}

impl KeywordCustomerSupportExtractor {
    pub fn with_assumed_status(status: impl Into<String>) -> Self {
        Self {
            assumed_status: status.into(),
        }
    }
}

impl Default for KeywordCustomerSupportExtractor {
    fn default() -> Self {
        Self::with_assumed_status(ASSUMED_ORDER_STATUS)
    }
}

fn looks_like_order_number(token: &str) -> bool {
    token.len() > 3
        && token.is_char_boundary(3)
        && token[..3].eq_ignore_ascii_case("ord")
        && token.chars().any(|c| c.is_ascii_digit())
}

impl FactExtractor for KeywordCustomerSupportExtractor {
    type Facts = CustomerSupportFacts;

    fn extract(&self, user_input: &str) -> CustomerSupportFacts {
        let lower = user_input.to_lowercase();
        CustomerSupportFacts {
            user_input: user_input.to_string(),
            wants_cancel: CANCEL_PHRASES.iter().any(|p| lower.contains(p)),
            wants_track: TRACK_PHRASES.iter().any(|p| lower.contains(p)),
            order_number: user_input
                .split_whitespace()
                .map(trim_token)
                .find(|t| looks_like_order_number(t))
                .map(String::from),
            order_status: KNOWN_STATUSES
                .iter()
                .find(|s| lower.contains(*s))
                .map(|s| s.to_string())
                .unwrap_or_else(|| self.assumed_status.clone()),
        }
    }
}

pub const CLARIFICATION: &str = "I'm here to assist! Could you provide more details?";

/// 按固定顺序校验：用语 -> 取消 -> 追踪 -> 退款需订单号
pub fn evaluate(facts: &CustomerSupportFacts) -> Option<Rejection> {
    if !is_request_appropriate(&facts.user_input) {
        return Some(Rejection::new(
            "inappropriate_language",
            "Please keep our conversation respectful so we can help you.",
        ));
    }
    if facts.wants_cancel && !can_cancel_order(&facts.order_status) {
        return Some(Rejection::new(
            "order_not_cancellable",
            "Your order has already been shipped and cannot be canceled.",
        ));
    }
    if facts.wants_track {
        if let Some(number) = &facts.order_number {
            if !can_track_order(number) {
                return Some(Rejection::new(
                    "invalid_order_number",
                    "Invalid order number format. Please check and try again.",
                ));
            }
        }
    }
    if requires_order_number(&facts.user_input) && facts.order_number.is_none() {
        return Some(Rejection::new(
            "order_number_required",
            "Please include your order number (e.g., ORD1234) so we can process your request.",
        ));
    }
    None
}
