use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the gateway admission core", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081", env = "GATEWAY_ADMIN_URL")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Inspect or control circuit breakers
    Breaker {
        #[command(subcommand)]
        action: BreakerAction,
    },
    /// List registered instances
    Services,
    /// Register an instance
    Register {
        name: String,
        address: String,
        port: u16,
        #[arg(long, default_value_t = 1)]
        weight: u32,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        id: Option<String>,
    },
    /// Refresh an instance's TTL
    Heartbeat { id: String },
    /// Remove an instance
    Deregister { id: String },
    /// Mark an instance active, inactive or draining
    SetStatus { id: String, status: String },
    /// Pick an endpoint the way the gateway would
    Endpoint {
        service: String,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        key: Option<String>,
    },
    /// Rate limiter statistics
    Limits,
    /// Set the adaptive load factor
    LoadFactor { factor: f64 },
}

#[derive(Subcommand)]
enum BreakerAction {
    /// List every breaker
    List,
    /// Show one breaker
    Show { name: String },
    /// Reset to closed with fresh counts
    Reset { name: String },
    /// Force open
    Open { name: String },
    /// Force closed
    Close { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path, body) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Breaker { action } => match action {
            BreakerAction::List => (Method::GET, "/admin/breakers".to_string(), None),
            BreakerAction::Show { name } => (Method::GET, format!("/admin/breakers/{name}"), None),
            BreakerAction::Reset { name } => {
                (Method::POST, format!("/admin/breakers/{name}/reset"), None)
            }
            BreakerAction::Open { name } => (Method::POST, format!("/admin/breakers/{name}/open"), None),
            BreakerAction::Close { name } => {
                (Method::POST, format!("/admin/breakers/{name}/close"), None)
            }
        },
        Commands::Services => (Method::GET, "/admin/services".to_string(), None),
        Commands::Register {
            name,
            address,
            port,
            weight,
            tags,
            id,
        } => (
            Method::POST,
            "/admin/services".to_string(),
            Some(json!({
                "id": id.unwrap_or_default(),
                "name": name,
                "address": address,
                "port": port,
                "weight": weight,
                "tags": tags,
            })),
        ),
        Commands::Heartbeat { id } => (Method::PUT, format!("/admin/services/{id}/heartbeat"), None),
        Commands::Deregister { id } => (Method::DELETE, format!("/admin/services/{id}"), None),
        Commands::SetStatus { id, status } => (
            Method::PUT,
            format!("/admin/services/{id}/status"),
            Some(json!({ "status": status })),
        ),
        Commands::Endpoint {
            service,
            strategy,
            key,
        } => {
            let mut query = Vec::new();
            if let Some(strategy) = strategy {
                query.push(format!("strategy={strategy}"));
            }
            if let Some(key) = key {
                query.push(format!("key={key}"));
            }
            let suffix = if query.is_empty() {
                String::new()
            } else {
                format!("?{}", query.join("&"))
            };
            (
                Method::GET,
                format!("/admin/discovery/{service}/endpoint{suffix}"),
                None,
            )
        }
        Commands::Limits => (Method::GET, "/admin/rate-limits".to_string(), None),
        Commands::LoadFactor { factor } => (
            Method::PUT,
            "/admin/rate-limits/load-factor".to_string(),
            Some(json!({ "factor": factor })),
        ),
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
