use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use registrar_policy::{builtin, ConfigSource, Policy};

#[derive(Args, Debug)]
pub struct PoliciesArgs {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "POLICY")]
    name: String,
    #[tabled(rename = "CONFIG")]
    source: String,
    #[tabled(rename = "FIELDS")]
    fields: String,
}

#[derive(Serialize)]
struct PolicyJson {
    name: String,
    config: &'static str,
    store_path: Option<String>,
    fields: Vec<FieldJson>,
}

#[derive(Serialize)]
struct FieldJson {
    name: String,
    kind: String,
    required: bool,
    default: Option<serde_json::Value>,
}

impl PoliciesArgs {
    pub fn run(self) -> Result<()> {
        let policies = builtin::all();

        if self.json {
            let out: Vec<PolicyJson> = policies.iter().map(|p| to_json(p)).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&out).context("serializing policies")?
            );
            return Ok(());
        }

        println!("{}", "Builtin policies".bold());
        let rows: Vec<PolicyRow> = policies.iter().map(|p| to_row(p)).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}

fn source_label(policy: &Policy) -> String {
    match policy.config_source() {
        ConfigSource::None => "none".to_string(),
        ConfigSource::Static => "static".to_string(),
        ConfigSource::Store(prefix) => format!("static + store {prefix}"),
    }
}

fn to_row(policy: &Policy) -> PolicyRow {
    let fields = policy
        .schema()
        .map(|schema| {
            schema
                .fields()
                .iter()
                .map(|field| {
                    let mut label = format!("{}: {}", field.name, field.kind);
                    if field.required {
                        label.push_str(" (required)");
                    }
                    if let Some(default) = &field.default {
                        label.push_str(&format!(" = {default}"));
                    }
                    label
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| "-".to_string());

    PolicyRow {
        name: policy.name().to_string(),
        source: source_label(policy),
        fields,
    }
}

fn to_json(policy: &Policy) -> PolicyJson {
    let (config, store_path) = match policy.config_source() {
        ConfigSource::None => ("none", None),
        ConfigSource::Static => ("static", None),
        ConfigSource::Store(prefix) => ("store", Some(prefix.to_string())),
    };
    let fields = policy
        .schema()
        .map(|schema| {
            schema
                .fields()
                .iter()
                .map(|field| FieldJson {
                    name: field.name.clone(),
                    kind: field.kind.to_string(),
                    required: field.required,
                    default: field.default.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    PolicyJson {
        name: policy.name().to_string(),
        config,
        store_path,
        fields,
    }
}
