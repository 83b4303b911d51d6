//! 事实抽取接口：从自由文本中抽取规则所需的结构化字段
//!
//! 每个智能体一个实现；默认实现均为朴素的关键词 / 子串匹配，可整体替换而不影响分派逻辑。

/// 从用户原文抽取结构化事实
pub trait FactExtractor: Send + Sync {
    type Facts;

    fn extract(&self, user_input: &str) -> Self::Facts;
}

/// 去掉 token 首尾的标点（保留字母、数字、@ 与内部字符）
pub(crate) fn trim_token(token: &str) -> &str {
    token.trim_matches(|c: char| !(c.is_alphanumeric() || c == '@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_token() {
        assert_eq!(trim_token("(ORD123),"), "ORD123");
        assert_eq!(trim_token("jane@example.com."), "jane@example.com");
        assert_eq!(trim_token("..."), "");
    }
}
