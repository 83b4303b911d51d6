//! 技术支持智能体：敏感操作鉴权、上门预约、邮箱校验

use regex::Regex;

use super::extract::{trim_token, FactExtractor};
use super::Rejection;
use crate::policies::tech_support::{
    can_schedule_technician, is_valid_email, sensitive_action, SCHEDULABLE_ISSUES,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechSupportFacts {
    /// 命中的敏感操作短语
    pub sensitive_action: Option<&'static str>,
    pub technician_request: bool,
    pub issue: Option<&'static str>,
    /// 第一个形如 local@domain 的 token；单独的 @ 或 @handle 不算
    pub email: Option<String>,
}

pub struct KeywordTechSupportExtractor {
    email: Regex,
}

impl KeywordTechSupportExtractor {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[^\s@]+@[^\s@]+").expect("static email pattern"),
        }
    }
}

impl Default for KeywordTechSupportExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FactExtractor for KeywordTechSupportExtractor {
    type Facts = TechSupportFacts;

    fn extract(&self, user_input: &str) -> TechSupportFacts {
        let lower = user_input.to_lowercase();
        TechSupportFacts {
            sensitive_action: sensitive_action(user_input),
            technician_request: lower.contains("technician"),
            issue: SCHEDULABLE_ISSUES.iter().copied().find(|i| lower.contains(i)),
            email: self
                .email
                .find_iter(user_input)
                .map(|m| trim_token(m.as_str()))
                .find(|t| !t.starts_with('@') && !t.ends_with('@'))
                .map(String::from),
        }
    }
}

pub const CLARIFICATION: &str = "I'm happy to assist! Could you clarify your technical issue?";

fn authentication_message(action: &str) -> String {
    let what = match action {
        "reset my password" => "resetting a password",
        "change my email" => "changing your email",
        _ => "recovering an account",
    };
    format!(
        "Authentication is required before {}. Please verify your identity first.",
        what
    )
}

/// 按固定顺序校验：敏感操作 -> 技术员预约 -> 邮箱格式
pub fn evaluate(facts: &TechSupportFacts) -> Option<Rejection> {
    if let Some(action) = facts.sensitive_action {
        return Some(Rejection::new("authentication_required", authentication_message(action)));
    }
    if facts.technician_request && !facts.issue.map(can_schedule_technician).unwrap_or(false) {
        return Some(Rejection::new(
            "technician_not_schedulable",
            "Technician visits can only be scheduled for internet installation, router issues, or slow speed.",
        ));
    }
    if let Some(email) = &facts.email {
        if !is_valid_email(email) {
            return Some(Rejection::new(
                "invalid_email",
                "The email address provided appears to be invalid. Please check and try again.",
            ));
        }
    }
    None
}
