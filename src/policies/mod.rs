//! 业务规则集：按智能体划分的纯谓词函数
//!
//! 所有关键词匹配均为朴素的小写子串匹配（不分词、不做词干），嵌入在更长单词里的关键词同样命中。

pub mod customer_support;
pub mod sales;
pub mod tech_support;

/// 小写子串匹配：text 是否包含任一短语
pub(crate) fn contains_any(text: &str, phrases: &[&str]) -> bool {
    first_match(text, phrases).is_some()
}

/// 返回第一个（按 phrases 顺序）命中的短语
pub(crate) fn first_match<'a>(text: &str, phrases: &[&'a str]) -> Option<&'a str> {
    let lower = text.to_lowercase();
    phrases.iter().copied().find(|p| lower.contains(p))
}
