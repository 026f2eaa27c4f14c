//! Guardrail：生成后的结构性校验（非空、引用）
//!
//! 每个 Guardrail 返回问题列表，空表示通过；是否重试由 guardrail_route 与 retry 上限决定。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::TaskState;

pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, draft: &str, state: &TaskState) -> Vec<String>;
}

pub struct NonEmptyGuardrail;

impl Guardrail for NonEmptyGuardrail {
    fn name(&self) -> &str {
        "non_empty"
    }

    fn check(&self, draft: &str, _state: &TaskState) -> Vec<String> {
        if draft.trim().is_empty() {
            vec!["answer is empty".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// 有检索命中时要求答案至少引用一条，且引用必须来自本次检索结果
pub struct CitationGuardrail {
    rag_tools: HashSet<String>,
}

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 字面量正则，编译不会失败
    RE.get_or_init(|| Regex::new(r"\[([^\[\]\s]+)\]").unwrap())
}

impl CitationGuardrail {
    pub fn new<I, S>(rag_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rag_tools: rag_tools.into_iter().map(Into::into).collect(),
        }
    }

    /// 本次运行中检索类工具（含前置预取）返回的全部引用标记（如 "[doc-1]"）
    fn known_citations(&self, state: &TaskState) -> HashSet<String> {
        state
            .citable_results()
            .filter(|r| self.rag_tools.contains(&r.tool))
            .filter_map(|r| r.data.as_ref())
            .filter_map(|d| d.get("hits").and_then(Value::as_array))
            .flatten()
            .filter_map(|hit| {
                hit.get("citation")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| hit.get("id").and_then(Value::as_str).map(|id| format!("[{id}]")))
            })
            .collect()
    }
}

impl Guardrail for CitationGuardrail {
    fn name(&self) -> &str {
        "citation"
    }

    fn check(&self, draft: &str, state: &TaskState) -> Vec<String> {
        let known = self.known_citations(state);
        if known.is_empty() {
            return Vec::new();
        }
        let cited: Vec<String> = citation_re()
            .find_iter(draft)
            .map(|m| m.as_str().to_string())
            .collect();
        if cited.is_empty() {
            let mut options: Vec<&String> = known.iter().collect();
            options.sort();
            let options: Vec<&str> = options.into_iter().map(String::as_str).collect();
            return vec![format!(
                "missing citation: cite at least one retrieved source ({})",
                options.join(", ")
            )];
        }
        let mut errors: Vec<String> = cited
            .into_iter()
            .filter(|c| !known.contains(c))
            .map(|c| format!("unknown citation {c}: not among the retrieved sources"))
            .collect();
        errors.sort();
        errors.dedup();
        errors
    }
}
