//! 知识库检索工具（RAG 族）
//!
//! 内存文档集上的关键词重叠打分，返回带引用标记（`[doc-id]`）的片段，供 Generate 引用、Guardrail 校验。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{Tool, ToolFamily, ToolOutput};

/// 片段最大字符数
const SNIPPET_CHARS: usize = 300;
const DEFAULT_TOP_K: usize = 3;

/// 一篇文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
        }
    }
}

pub struct KnowledgeSearchTool {
    docs: Vec<Document>,
}

impl KnowledgeSearchTool {
    pub const NAME: &'static str = "knowledge_search";

    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    fn search(&self, query: &str, top_k: usize) -> Vec<(usize, &Document)> {
        let terms = tokenize(query);
        let mut scored: Vec<(usize, &Document)> = self
            .docs
            .iter()
            .map(|d| {
                let haystack = tokenize(&format!("{} {}", d.title, d.text));
                let score = terms.iter().filter(|t| haystack.contains(t)).count();
                (score, d)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        // 分数降序，同分按 id 保证稳定
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.truncate(top_k);
        scored
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search the knowledge base. Args: {\"query\": \"text\", \"top_k\": 3}. Cite hits as [doc-id]."
    }

    fn family(&self) -> ToolFamily {
        ToolFamily::Rag
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "top_k": { "type": "integer", "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolOutput::err("missing argument: query");
        };
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|k| k.max(1) as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let hits: Vec<Value> = self
            .search(query, top_k)
            .into_iter()
            .map(|(score, d)| {
                serde_json::json!({
                    "id": d.id,
                    "title": d.title,
                    "snippet": d.text.chars().take(SNIPPET_CHARS).collect::<String>(),
                    "score": score,
                    "citation": format!("[{}]", d.id),
                })
            })
            .collect();
        ToolOutput::ok(serde_json::json!({ "query": query, "hits": hits }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> KnowledgeSearchTool {
        KnowledgeSearchTool::new(vec![
            Document::new("refund-policy", "Refund policy", "Refunds are issued within 14 days of purchase."),
            Document::new("shipping", "Shipping", "Orders ship within 2 business days."),
            Document::new("returns", "Returns", "Returns and refunds require a receipt."),
        ])
    }

    #[tokio::test]
    async fn test_ranked_hits_with_citations() {
        let out = tool().execute(json!({"query": "refund policy"})).await;
        assert!(out.success);
        let data = out.data.unwrap();
        let hits = data["hits"].as_array().unwrap();
        assert_eq!(hits[0]["id"], "refund-policy");
        assert_eq!(hits[0]["citation"], "[refund-policy]");
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_query_is_error() {
        let out = tool().execute(json!({})).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn test_top_k_limits_hits() {
        let out = tool().execute(json!({"query": "refunds returns", "top_k": 1})).await;
        assert_eq!(out.data.unwrap()["hits"].as_array().unwrap().len(), 1);
    }
}
