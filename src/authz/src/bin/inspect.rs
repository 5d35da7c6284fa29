//! # authz-inspect
//!
//! Offline tool for checking a policy bundle before it is deployed.
//!
//! ## Usage
//!
//! ```text
//! authz-inspect validate  <bundle.json>
//! authz-inspect check     <bundle.json> <principal> <action> [--group G]... [--label K=V]... [--type T]
//! authz-inspect effective <bundle.json> <principal> [--group G]...
//! ```
//!
//! Principals are written with their namespace (`user:alice`, `sa:ci`).
//! `RUST_LOG` controls log output (default: info).

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stategate_authz::action::RESOURCE_STATE;
use stategate_authz::engine::MemoryAuditSink;
use stategate_authz::{
    AccessRequest, AuthenticatedPrincipal, Authorizer, EngineConfig, InMemoryPolicyStore,
    InMemoryRevocationRegistry, Labels, PolicyBundle, Principal,
};

struct Args {
    command: String,
    bundle: String,
    positional: Vec<String>,
    groups: Vec<String>,
    labels: Labels,
    resource_type: String,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args> {
    let command = raw.next().context("missing command (validate | check | effective)")?;
    let bundle = raw.next().context("missing bundle path")?;

    let mut args = Args {
        command,
        bundle,
        positional: Vec::new(),
        groups: Vec::new(),
        labels: Labels::new(),
        resource_type: RESOURCE_STATE.to_string(),
    };

    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--group" => args.groups.push(raw.next().context("--group needs a value")?),
            "--label" => {
                let pair = raw.next().context("--label needs KEY=VALUE")?;
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("label '{}' is not KEY=VALUE", pair))?;
                args.labels.insert(key.to_string(), value.to_string());
            }
            "--type" => args.resource_type = raw.next().context("--type needs a value")?,
            other if other.starts_with("--") => bail!("unknown option '{}'", other),
            _ => args.positional.push(arg),
        }
    }

    Ok(args)
}

async fn load(bundle_path: &str) -> Result<Authorizer> {
    let bundle = PolicyBundle::from_file(bundle_path)
        .with_context(|| format!("failed to read bundle {}", bundle_path))?;

    let config = EngineConfig {
        enable_audit: false,
        ..EngineConfig::from_env()
    };

    let authorizer = Authorizer::from_config(
        config,
        Arc::new(InMemoryPolicyStore::new()),
        Arc::new(InMemoryRevocationRegistry::new()),
    )
    .await?
    .with_audit_sink(Arc::new(MemoryAuditSink::new()));

    let summary = authorizer.repository().import_bundle(bundle).await?;
    info!(
        roles = summary.roles_created,
        bindings = summary.bindings_applied,
        "Loaded bundle"
    );

    Ok(authorizer)
}

fn principal_arg(args: &Args, index: usize) -> Result<Principal> {
    let raw = args
        .positional
        .get(index)
        .context("missing principal (e.g. user:alice)")?;
    Ok(Principal::parse(raw)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    match args.command.as_str() {
        "validate" => {
            let authorizer = load(&args.bundle).await?;
            let snapshot = authorizer.repository().load_snapshot();
            println!("ok: {} role(s)", snapshot.role_count());
        }
        "check" => {
            let principal = principal_arg(&args, 0)?;
            let action = args.positional.get(1).context("missing action")?;

            let authorizer = load(&args.bundle).await?;
            let who = AuthenticatedPrincipal::new(principal).with_groups(args.groups.clone());
            let request = AccessRequest::new(action.as_str(), args.resource_type.as_str())
                .with_labels(args.labels.clone());

            let decision = authorizer.authorize(&who, &request).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        "effective" => {
            let principal = principal_arg(&args, 0)?;

            let authorizer = load(&args.bundle).await?;
            let permissions = authorizer.effective_permissions(&principal, &args.groups);
            println!("{}", serde_json::to_string_pretty(&permissions)?);
        }
        other => bail!("unknown command '{}'", other),
    }

    Ok(())
}
