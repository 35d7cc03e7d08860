use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-smoke")]
#[command(about = "Smoke tests for the observe-relay front service", long_about = None)]
struct Cli {
    #[arg(short, long, env = "BASE_URL", default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Run every check in order, stopping at the first failure
    All,
    /// GET /health
    Health,
    /// GET /api/users
    Users,
    /// POST /api/process
    Process,
    /// GET /api/metrics-demo
    Metrics,
    /// POST /api/logs-to-lambda
    Logs,
}

const CHECKS: [Commands; 5] = [
    Commands::Health,
    Commands::Users,
    Commands::Process,
    Commands::Metrics,
    Commands::Logs,
];

impl Commands {
    fn title(self) -> &'static str {
        match self {
            Commands::All => "all checks",
            Commands::Health => "health endpoint",
            Commands::Users => "users endpoint",
            Commands::Process => "process endpoint",
            Commands::Metrics => "metrics demo",
            Commands::Logs => "logs to Lambda",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let checks: &[Commands] = match cli.command {
        Commands::All => &CHECKS[..],
        ref single => std::slice::from_ref(single),
    };

    for (i, check) in checks.iter().enumerate() {
        println!("{}. Testing {}...", i + 1, check.title());
        if let Err(e) = run_check(&client, &cli.url, *check).await {
            eprintln!("Test failed: {e}");
            std::process::exit(1);
        }
        println!();
    }

    if cli.command == Commands::All {
        println!("All tests passed!");
    }
    Ok(())
}

async fn run_check(
    client: &reqwest::Client,
    base: &str,
    check: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = match check {
        Commands::All => return Ok(()),
        Commands::Health => client.get(format!("{base}/health")),
        Commands::Users => client.get(format!("{base}/api/users")),
        Commands::Process => client
            .post(format!("{base}/api/process"))
            .json(&json!({ "data": ["item1", "item2", "item3"] })),
        Commands::Metrics => client.get(format!("{base}/api/metrics-demo")),
        Commands::Logs => client.post(format!("{base}/api/logs-to-lambda")).json(&json!({
            "message": "Test log from smoke test",
            "level": "info",
            "metadata": { "testId": "123", "source": "relay-smoke" },
        })),
    };

    let res = request.send().await?;
    let status = res.status();
    if !status.is_success() {
        let text = res.text().await.unwrap_or_default();
        return Err(format!("{} returned status {status}: {text}", check.title()).into());
    }

    let body: Value = res.json().await?;
    let shown = match check {
        Commands::Users => json!({ "success": body["success"], "count": body["count"] }),
        _ => body,
    };
    println!("✓ {} passed:", check.title());
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
