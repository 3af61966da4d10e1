use clap::{Parser, Subcommand};
use serde_json::Value;

use service_gateway::proxy::ServiceStats;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Inspect a running service gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Print raw JSON instead of a table.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall and per-service health
    Health,
    /// Instance state and retry counters, for every service or one
    Stats { service: Option<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            // 503 still carries the report
            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Stats { service } => {
            let path = match &service {
                Some(name) => format!("{}/stats/{}", cli.url, name),
                None => format!("{}/stats", cli.url),
            };
            let res = client.get(path).send().await?;
            if !res.status().is_success() {
                eprintln!("Error: gateway returned status {}", res.status());
                if let Ok(text) = res.text().await {
                    eprintln!("Response: {}", text);
                }
                std::process::exit(1);
            }

            let json: Value = res.json().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&json)?);
                return Ok(());
            }

            let stats: Vec<ServiceStats> = match service {
                Some(_) => vec![serde_json::from_value(json)?],
                None => serde_json::from_value(json["services"].clone())?,
            };
            for s in &stats {
                print_service(s);
            }
        }
    }

    Ok(())
}

fn print_service(stats: &ServiceStats) {
    println!(
        "{} ({}): {}/{} healthy, {} requests, {} retries, {} exhausted",
        stats.service,
        stats.strategy,
        stats.healthy_instances,
        stats.total_instances,
        stats.retries.requests,
        stats.retries.retries,
        stats.retries.exhausted,
    );
    println!("  {:<16} {:<8} {:<10} {:>6} {:>8}  URL", "INSTANCE", "HEALTHY", "CIRCUIT", "ACTIVE", "FAILURES");
    for i in &stats.instances {
        println!(
            "  {:<16} {:<8} {:<10} {:>6} {:>8}  {}",
            i.id,
            i.healthy,
            i.circuit_state.to_string(),
            i.active_connections,
            i.consecutive_failures,
            i.url
        );
    }
}
