//! agent-tree - builds the tree, runs the demonstration scenarios and prints
//! a summary.

use agent_tree::{config::Config, scenarios, Node, RootOrchestrator};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let all_passed = runtime.block_on(async_main())?;
    if !all_passed {
        std::process::exit(1);
    }
    Ok(())
}

async fn async_main() -> anyhow::Result<bool> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_tree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: budget={}, parallel_fanout={}",
        config.total_budget, config.parallel_fanout
    );

    let root = RootOrchestrator::build(&config)?;
    if !root.initialize_system().await {
        warn!("System initialization failed, running scenarios anyway");
    }

    let outcomes = scenarios::run_all(&root).await;
    println!("{}", scenarios::render_table(&outcomes));

    let status = root.process(serde_json::json!({"action": "status"})).await;
    let summary = serde_json::json!({
        "token_utilization": root.utilization_report(),
        "workflows": root.workflow_history(),
        "status_ok": status.success,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(outcomes.iter().all(|o| o.passed))
}
