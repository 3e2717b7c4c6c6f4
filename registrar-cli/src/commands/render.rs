//! Dry-run a policy against saved `docker inspect` output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use registrar_core::{Config, Container, ContainerId, ContainerState, InstanceName};
use registrar_policy::{builtin, Evaluation, Policy, PolicyContext};

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Builtin policy to evaluate.
    #[arg(long)]
    pub policy: String,

    /// JSON or YAML file holding inspect documents: a list, or a map keyed
    /// by container id.
    #[arg(long)]
    pub containers: PathBuf,

    /// Instance config document; the instance is named after the file stem.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "NODE")]
    path: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

#[derive(Serialize)]
struct RenderJson<'a> {
    policy: &'a str,
    instance: Option<&'a str>,
    nodes: &'a registrar_core::NodeMap,
    conflicts: Vec<ConflictJson<'a>>,
}

#[derive(Serialize)]
struct ConflictJson<'a> {
    path: &'a str,
    container: &'a str,
    previous: &'a str,
    offered: &'a str,
    kept: &'a str,
}

impl RenderArgs {
    pub fn run(self) -> Result<()> {
        let policy = builtin::select(std::slice::from_ref(&self.policy))?
            .into_iter()
            .next()
            .context("no policy selected")?;
        let config = match &self.config {
            Some(path) => Some(Arc::new(load_config(&policy, path)?)),
            None => None,
        };
        let state = load_containers(&self.containers)?;
        let instance = config.as_ref().map(|c| c.name().0.clone());

        let context = PolicyContext::new(policy, config)?;
        let evaluation = context.apply_all(&state);

        if self.json {
            print_json(&self.policy, instance.as_deref(), &evaluation)
        } else {
            print_table(&self.policy, instance.as_deref(), state.len(), &evaluation);
            Ok(())
        }
    }
}

fn load_config(policy: &Policy, path: &Path) -> Result<Config> {
    let Some(schema) = policy.schema() else {
        bail!("policy {} does not take a config", policy.name());
    };
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .context("config file has no usable name")?;
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let document: Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(schema.parse(&InstanceName::from(name), &document)?)
}

/// Accepts a list of inspect documents (ids from `Id`, or the position) or a
/// map of id to document.
fn load_containers(path: &Path) -> Result<ContainerState> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let document: Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;

    let containers: Vec<Container> = match document {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, attributes)| {
                let id = attributes
                    .get("Id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| index.to_string());
                Container::from_inspect(ContainerId::from(id), attributes)
            })
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(id, attributes)| Container::from_inspect(ContainerId::from(id), attributes))
            .collect(),
        Value::Null => Vec::new(),
        _ => bail!(
            "{}: expected a list or map of inspect documents",
            path.display()
        ),
    };
    Ok(containers.into_iter().collect())
}

fn print_table(policy: &str, instance: Option<&str>, containers: usize, evaluation: &Evaluation) {
    let label = match instance {
        Some(instance) => format!("{policy}:{instance}"),
        None => policy.to_string(),
    };
    println!(
        "{} {} ({} containers, {} nodes)",
        "Rendered".bold(),
        label.cyan(),
        containers,
        evaluation.nodes.len()
    );

    if evaluation.nodes.is_empty() {
        println!("{}", "No nodes.".dimmed());
    } else {
        let rows: Vec<NodeRow> = evaluation
            .nodes
            .iter()
            .map(|(path, value)| NodeRow {
                path: path.clone(),
                value: value.clone(),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    for conflict in &evaluation.conflicts {
        println!(
            "{} {} from {}: kept {} over {}",
            "conflict".yellow().bold(),
            conflict.path,
            conflict.container,
            conflict.kept,
            if conflict.kept == conflict.offered {
                &conflict.previous
            } else {
                &conflict.offered
            },
        );
    }
}

fn print_json(policy: &str, instance: Option<&str>, evaluation: &Evaluation) -> Result<()> {
    let out = RenderJson {
        policy,
        instance,
        nodes: &evaluation.nodes,
        conflicts: evaluation
            .conflicts
            .iter()
            .map(|c| ConflictJson {
                path: &c.path,
                container: &c.container.0,
                previous: &c.previous,
                offered: &c.offered,
                kept: &c.kept,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&out).context("serializing render output")?
    );
    Ok(())
}
