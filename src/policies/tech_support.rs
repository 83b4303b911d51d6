//! 技术支持规则：敏感操作鉴权、上门预约、邮箱格式

use super::{contains_any, first_match};

pub const SENSITIVE_REQUESTS: &[&str] = &["reset my password", "change my email", "account recovery"];

pub const SCHEDULABLE_ISSUES: &[&str] = &["internet installation", "router issue", "slow speed"];

/// 邮箱格式：含 @，且最后一个 @ 之后的域名部分含 .
pub fn is_valid_email(email: &str) -> bool {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.contains('.'))
        .unwrap_or(false)
}

/// 仅允许为预定义问题类型预约技术员
pub fn can_schedule_technician(issue_type: &str) -> bool {
    SCHEDULABLE_ISSUES.contains(&issue_type.to_lowercase().as_str())
}

/// 含敏感操作短语时需要先鉴权
pub fn requires_authentication(user_input: &str) -> bool {
    contains_any(user_input, SENSITIVE_REQUESTS)
}

/// 命中的第一个敏感操作短语
pub fn sensitive_action(user_input: &str) -> Option<&'static str> {
    first_match(user_input, SENSITIVE_REQUESTS)
}
