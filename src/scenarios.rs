//! The ten demonstration scenarios run by the `agent-tree` binary.
//!
//! Each scenario is one request sent to the root together with the outcome
//! it is expected to produce.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{json, Value};

use crate::agents::orchestrator::RootOrchestrator;
use crate::agents::{Node, NodeResult};

/// What a scenario counts as a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Success,
    /// The request must fail with an error text containing the fragment
    FailureMentioning(&'static str),
}

pub struct Scenario {
    pub id: u8,
    pub name: &'static str,
    /// Nodes the request is expected to traverse
    pub path: &'static str,
    pub expect: Expectation,
    pub request: Value,
}

fn route(target: &str, request: Value) -> Value {
    json!({"action": "route_request", "target": target, "request": request})
}

/// The scenario table, in execution order.
pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            id: 1,
            name: "Config Load",
            path: "M111 -> M110 -> M100 -> M000",
            expect: Expectation::Success,
            request: route("M100", json!({"action": "get_tenant_data", "include_config": true})),
        },
        Scenario {
            id: 2,
            name: "Tenant Query",
            path: "M122 -> M120 -> M100 -> M000",
            expect: Expectation::Success,
            request: route("M100", json!({"action": "get_tenant_data", "source": "database"})),
        },
        Scenario {
            id: 3,
            name: "Spreadsheet Import",
            path: "M121 -> M120 -> M100 -> M000",
            expect: Expectation::Success,
            request: route("M100", json!({"action": "get_tenant_data", "source": "excel"})),
        },
        Scenario {
            id: 4,
            name: "Tool Call",
            path: "M000 -> M200 -> M210 -> M211",
            expect: Expectation::Success,
            request: route(
                "M200",
                json!({"action": "execute_tool", "tool": "get_tenant_info", "params": {"tenant_id": 1}}),
            ),
        },
        Scenario {
            id: 5,
            name: "PDF Generation",
            path: "M000 -> M200 -> M220 -> M222",
            expect: Expectation::Success,
            request: route(
                "M200",
                json!({
                    "action": "generate_report",
                    "report_type": "tenant_statement",
                    "data": {"id": 1, "name": "John Doe", "unit": "101", "rent": 1500},
                }),
            ),
        },
        Scenario {
            id: 6,
            name: "Web API Request",
            path: "M221 -> M220 -> M200 -> M000",
            expect: Expectation::Success,
            request: route(
                "M200",
                json!({"action": "process_request", "request_type": "api", "method": "GET", "url": "/api/tenants"}),
            ),
        },
        Scenario {
            id: 7,
            name: "Hierarchical Merge",
            path: "M110 + M120 -> M100",
            expect: Expectation::Success,
            request: route(
                "M100",
                json!({"action": "get_tenant_data", "source": "both", "include_config": true}),
            ),
        },
        Scenario {
            id: 8,
            name: "Error Propagation",
            path: "M122 -> M120 -> M100",
            expect: Expectation::FailureMentioning("999"),
            request: route("M100", json!({"action": "get_tenant_data", "tenant_id": 999})),
        },
        Scenario {
            id: 9,
            name: "Load Rebalancing",
            path: "M000 -> all leaves",
            expect: Expectation::Success,
            request: json!({"action": "rebalance", "type": "full"}),
        },
        Scenario {
            id: 10,
            name: "Full Pipeline",
            path: "M111 -> M122 -> M211 -> M222",
            expect: Expectation::Success,
            request: json!({"action": "full_workflow", "workflow_type": "full_pipeline", "data": {"tenant_id": 1}}),
        },
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub id: u8,
    pub name: &'static str,
    pub path: &'static str,
    pub passed: bool,
    pub tokens_used: u64,
    pub error: Option<String>,
}

fn passed(expect: Expectation, result: &NodeResult) -> bool {
    match expect {
        Expectation::Success => result.success,
        Expectation::FailureMentioning(fragment) => {
            !result.success && result.error_text().contains(fragment)
        }
    }
}

/// Run every scenario in order against `root`.
pub async fn run_all(root: &RootOrchestrator) -> Vec<ScenarioOutcome> {
    let scenarios = scenarios();
    let mut outcomes = Vec::with_capacity(scenarios.len());

    for scenario in scenarios {
        let result = root.process(scenario.request).await;
        let passed = passed(scenario.expect, &result);

        if passed {
            tracing::info!(id = scenario.id, name = scenario.name, tokens = result.tokens_used, "Scenario passed");
        } else {
            tracing::warn!(id = scenario.id, name = scenario.name, error = result.error_text(), "Scenario failed");
        }

        outcomes.push(ScenarioOutcome {
            id: scenario.id,
            name: scenario.name,
            path: scenario.path,
            passed,
            tokens_used: result.tokens_used,
            error: result.error,
        });
    }

    outcomes
}

/// Markdown summary table of a run.
pub fn render_table(outcomes: &[ScenarioOutcome]) -> String {
    let mut out = String::from("| # | Scenario | Path | Result | Tokens |\n|---|---|---|---|---|\n");
    for o in outcomes {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            o.id,
            o.name,
            o.path,
            if o.passed { "PASS" } else { "FAIL" },
            o.tokens_used
        );
    }

    let passed = outcomes.iter().filter(|o| o.passed).count();
    let tokens: u64 = outcomes.iter().map(|o| o.tokens_used).sum();
    let _ = writeln!(
        out,
        "\n**{}/{} passed**, {} tokens used",
        passed,
        outcomes.len(),
        tokens
    );
    out
}
