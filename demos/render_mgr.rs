//! Render the manager descriptors of a cluster as a multi-document YAML stream
//!
//! render-mgr --file demos/cluster.yaml [--active b] [--alerts]
use anyhow::{Context, Result};
use clap::Parser;
use rook_mgr::{
    config::{APP_NAME, EXTERNAL_MGR_APP_NAME},
    parameterize_alert_rules, AlertRuleOverride, ClusterInfo, ClusterSpec, MgrAssembler,
    SERVICE_METRICS_PORT_NAME,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct App {
    /// YAML file holding `cluster`, `spec` and optional `alerts` overrides
    #[clap(long, short)]
    file: PathBuf,
    /// Daemon id of the active manager the services select
    #[clap(long, default_value = "a")]
    active: String,
    /// Render the metrics service of an external cluster instead
    #[clap(long)]
    external: bool,
    /// Also print the parameterized alert rules
    #[clap(long)]
    alerts: bool,
}

#[derive(Deserialize)]
struct Input {
    cluster: ClusterInfo,
    #[serde(default)]
    spec: ClusterSpec,
    #[serde(default)]
    alerts: BTreeMap<String, AlertRuleOverride>,
}

fn print(doc: &impl Serialize) -> Result<()> {
    println!("---\n{}", serde_yaml::to_string(doc)?.trim_end());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let app = App::parse();

    let raw = std::fs::read_to_string(&app.file).with_context(|| format!("reading {:?}", app.file))?;
    let input: Input = serde_yaml::from_str(&raw).context("parsing cluster input")?;
    let assembler = MgrAssembler::new(&input.spec, &input.cluster);

    if app.external {
        print(&assembler.metrics_service(EXTERNAL_MGR_APP_NAME, "", SERVICE_METRICS_PORT_NAME)?)?;
    } else {
        for deployment in assembler.deployments()? {
            print(&deployment)?;
        }
        print(&assembler.metrics_service(APP_NAME, &app.active, SERVICE_METRICS_PORT_NAME)?)?;
        if input.spec.dashboard.enabled {
            print(&assembler.dashboard_service(APP_NAME, &app.active)?)?;
        }
    }

    if app.alerts {
        let rules = parameterize_alert_rules(&input.alerts)?;
        info!(alerts = rules.alerts.len(), "rendering alert rules");
        print(&rules)?;
    }
    Ok(())
}
