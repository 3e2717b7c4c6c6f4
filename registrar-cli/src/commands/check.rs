use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use registrar_core::static_config::{list_policy_dirs_at, read_instances_at};
use registrar_policy::builtin;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Static config directory (one subdirectory per policy).
    pub dir: PathBuf,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let policies = builtin::all();
        let mut valid = 0usize;
        let mut invalid = 0usize;

        for name in list_policy_dirs_at(&self.dir)? {
            let Some(policy) = policies.iter().find(|p| *p.name() == name) else {
                println!("{} {}/: no such policy", "skip".yellow(), name);
                continue;
            };
            let Some(schema) = policy.schema() else {
                println!("{} {}/: policy takes no config", "skip".yellow(), name);
                continue;
            };

            for result in read_instances_at(&self.dir, &name, schema)? {
                match result {
                    Ok(config) => {
                        valid += 1;
                        println!("{} {}:{}", "ok".green(), name, config.name());
                    }
                    Err((path, err)) => {
                        invalid += 1;
                        println!("{} {}: {}", "invalid".red().bold(), path.display(), err);
                    }
                }
            }
        }

        println!();
        println!("{} valid, {} invalid", valid, invalid);
        if invalid > 0 {
            bail!("{invalid} invalid config document(s)");
        }
        Ok(())
    }
}
