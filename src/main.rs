//! Hive 命令行入口
//!
//! `hive "<question>"`：加载配置、构建网关与参考工具，运行一次并以 JSON 输出答案与诊断信息。

use std::path::PathBuf;

use anyhow::Context;
use hive::config::{load_config, AppConfig};
use hive::core::{create_llm_from_config, AgentBuilder};
use hive::tools::{Document, EchoTool, KnowledgeSearchTool, ToolRegistry};

fn sample_documents() -> Vec<Document> {
    vec![
        Document::new(
            "engine-limits",
            "Engine limits",
            "Each run is bounded: at most 10 tool iterations, 2 replans and 2 guardrail retries by default.",
        ),
        Document::new(
            "tool-rounds",
            "Tool rounds",
            "Tools selected in the same round run concurrently and their results are merged in completion order.",
        ),
        Document::new(
            "retry-policy",
            "Retry policy",
            "Rate limits and server faults are retried with exponential backoff; invalid requests are not retried.",
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut question = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(PathBuf::from(
                args.next().context("--config requires a path")?,
            ));
        } else {
            question.push(arg);
        }
    }
    let question = question.join(" ");
    if question.trim().is_empty() {
        anyhow::bail!("usage: hive [--config <file>] \"<question>\"");
    }

    let cfg = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(KnowledgeSearchTool::new(sample_documents()));

    let llm = create_llm_from_config(&cfg).context("failed to create llm client")?;
    let agent = AgentBuilder::new(cfg, llm, tools).build();

    let output = agent
        .run(&question, None)
        .await
        .context("agent run failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to serialize run output")?
    );
    Ok(())
}
