//! Helpdesk 命令行
//!
//! - `helpdesk load-policies [--reload]`：加载（或重建）策略向量索引
//! - `helpdesk retrieve <query>`：查询相关策略
//! - `helpdesk chat <agent_type> [conversation_id]`：逐行读取 stdin 进行对话，输入 exit 退出

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};

use helpdesk::config::{load_config, AppConfig};
use helpdesk::retrieval::{read_policy_dir, LoadReport, PolicyLookup};
use helpdesk::{build_service, AgentKind, SupportService};

const USAGE: &str = "Usage:
  helpdesk load-policies [--reload]
  helpdesk retrieve <query>
  helpdesk chat <agent_type> [conversation_id]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    helpdesk::observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed, using defaults: {}", e);
        AppConfig::default()
    });
    let service = build_service(&cfg).context("Failed to build service")?;

    match command.as_str() {
        "load-policies" => load_policies(&cfg, &service, args.iter().any(|a| a == "--reload")).await,
        "retrieve" => {
            let query = args[1..].join(" ");
            retrieve(&service, &query).await
        }
        "chat" => {
            let agent_type = args.get(1).map(String::as_str).unwrap_or("customer_support");
            let conversation_id = args
                .get(2)
                .cloned()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat(&service, agent_type, &conversation_id).await
        }
        other => bail!("Unknown command: {}\n{}", other, USAGE),
    }
}

async fn load_policies(cfg: &AppConfig, service: &SupportService, reload: bool) -> anyhow::Result<()> {
    let dir = &cfg.retrieval.policy_dir;
    let documents = read_policy_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    let retriever = service.retriever();
    let report = if reload {
        retriever.reload_corpus(documents).await?
    } else {
        retriever.load_corpus(documents).await?
    };
    match report {
        LoadReport::Inserted { count } => println!("Loaded {} policy documents.", count),
        LoadReport::AlreadyPopulated { existing } => {
            println!("Index already holds {} documents; use --reload to rebuild.", existing)
        }
    }
    Ok(())
}

async fn retrieve(service: &SupportService, query: &str) -> anyhow::Result<()> {
    match service.retrieve_policies(query).await? {
        PolicyLookup::Found(hits) => {
            for hit in hits {
                println!("[{:.3}] {}: {}", hit.score, hit.id, hit.text);
            }
        }
        other => {
            for text in other.texts() {
                println!("{}", text);
            }
        }
    }
    Ok(())
}

async fn chat(service: &SupportService, agent_type: &str, conversation_id: &str) -> anyhow::Result<()> {
    let kind: AgentKind = agent_type.parse()?;
    println!("Conversation {} with {} agent. Type 'exit' to quit.", conversation_id, kind);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        match service.handle_turn(conversation_id, kind.as_str(), line).await {
            Ok(outcome) => println!("{}: {}", outcome.agent, outcome.reply.response),
            Err(e) => eprintln!("{}", e),
        }
    }
    Ok(())
}
