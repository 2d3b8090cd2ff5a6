//! # qy — QUARRY command line
//!
//! Talks to a running `qy-hub` over HTTP.
//!
//! - `qy ask "<question>"` — translate, run and summarize.
//! - `qy generate "<question>"` — show the pipeline without running it.
//! - `qy raw '<pipeline json>'` — run a hand-written pipeline once.
//! - `qy sample`, `qy stats`, `qy health` — inspect the collection and hub.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tabled::builder::Builder;
use tabled::settings::Style;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Ask a document collection questions in plain language.
#[derive(Parser)]
#[command(name = "qy", version, about, long_about = None)]
struct Cli {
    /// Hub base URL.
    #[arg(long, env = "QY_BASE_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question: records plus a short summary.
    Ask {
        question: String,
        /// Execution attempts, including repairs.
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Print the raw response instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Translate a question and print the pipeline.
    Generate { question: String },

    /// Run a pipeline given as a JSON array.
    Raw {
        pipeline: String,
        #[arg(long)]
        json: bool,
    },

    /// Show the first documents of the collection.
    Sample {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Collection statistics.
    Stats,

    /// Hub health.
    Health {
        /// Also probe the reasoning service.
        #[arg(long)]
        deep: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Ask {
            question,
            max_attempts,
            json,
        } => {
            let mut payload = json!({ "question": question });
            if let Some(n) = max_attempts {
                payload["max_attempts"] = json!(n);
            }
            let resp = post(&client, &format!("{}/api/query", base), &payload).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
                return Ok(());
            }
            if let Some(summary) = resp.get("summary").and_then(Value::as_str) {
                println!("{}\n", summary);
            }
            print_rows(resp.get("results"));
            print_footer(&resp);
        }

        Commands::Generate { question } => {
            let payload = json!({ "question": question });
            let resp = post(&client, &format!("{}/api/query/generate", base), &payload).await?;
            println!("{}", serde_json::to_string_pretty(&resp["query"])?);
        }

        Commands::Raw { pipeline, json } => {
            let pipeline: Value = serde_json::from_str(&pipeline)?;
            let payload = json!({ "pipeline": pipeline });
            let resp = post(&client, &format!("{}/api/query/raw", base), &payload).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                print_rows(resp.get("results"));
                print_footer(&resp);
            }
        }

        Commands::Sample { limit } => {
            let resp = get(&client, &format!("{}/api/sample?limit={}", base, limit)).await?;
            print_rows(Some(&resp));
        }

        Commands::Stats => {
            let resp = get(&client, &format!("{}/api/stats", base)).await?;
            println!(
                "{}: {} documents, {} bytes",
                resp["collection"].as_str().unwrap_or("?"),
                resp["count"],
                resp["size_bytes"]
            );
            let fields: Vec<Value> = resp["fields"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|f| {
                    let types: Vec<&str> = f["types"]
                        .as_array()
                        .map(|t| t.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();
                    json!({ "field": f["name"], "types": types.join(", "), "present_in": f["present_in"] })
                })
                .collect();
            print_rows(Some(&Value::Array(fields)));
        }

        Commands::Health { deep } => {
            let url = if deep {
                format!("{}/api/health?deep=true", base)
            } else {
                format!("{}/api/health", base)
            };
            let resp = get(&client, &url).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
    }
    Ok(())
}

async fn get(client: &reqwest::Client, url: &str) -> CliResult<Value> {
    read(client.get(url).send().await?).await
}

async fn post(client: &reqwest::Client, url: &str, payload: &Value) -> CliResult<Value> {
    read(client.post(url).json(payload).send().await?).await
}

async fn read(resp: reqwest::Response) -> CliResult<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(body);
    }
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| status.to_string());
    Err(format!("{} ({})", message, status.as_u16()).into())
}

fn print_footer(resp: &Value) {
    let total = resp.get("total").and_then(Value::as_u64).unwrap_or(0);
    if resp.get("truncated").and_then(Value::as_bool) == Some(true) {
        let shown = resp["results"].as_array().map_or(0, Vec::len);
        println!("Showing {} of {} records.", shown, total);
    } else {
        println!("{} record(s).", total);
    }
}

fn print_rows(rows: Option<&Value>) {
    match rows.and_then(Value::as_array) {
        Some(rows) if !rows.is_empty() => println!("{}", render_table(rows)),
        _ => println!("(no records)"),
    }
}

/// One column per key seen in any row, in first-seen order.
fn render_table(rows: &[Value]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        if let Some(obj) = row.as_object() {
            for key in obj.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut builder = Builder::default();
    builder.push_record(columns.clone());
    for row in rows {
        builder.push_record(columns.iter().map(|c| cell(row.get(c))));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) if obj.len() == 1 && obj.contains_key("$date") => {
            obj["$date"].as_str().unwrap_or_default().to_string()
        }
        Some(other) => other.to_string(),
    }
}
