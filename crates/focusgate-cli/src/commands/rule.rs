use clap::Subcommand;

use focusgate_core::RuleKind;

use super::{open_engine, CliResult};

#[derive(Subcommand)]
pub enum RuleAction {
    /// Add a permanent rule
    Add {
        /// Substring matched case-insensitively against the target
        pattern: String,
        /// whitelist (allow) or blacklist (block)
        #[arg(long, default_value = "blacklist")]
        kind: String,
    },
    /// List live rules as JSON
    List,
    /// Remove a rule by id
    Remove { id: i64 },
    /// Temporarily whitelist a pattern
    AllowTemp {
        pattern: String,
        /// Minutes until the rule expires
        #[arg(long, default_value_t = 15)]
        minutes: u32,
    },
}

pub async fn run(action: RuleAction) -> CliResult {
    let (engine, _db) = open_engine()?;

    match action {
        RuleAction::Add { pattern, kind } => {
            let kind: RuleKind = kind.parse()?;
            let rule = engine.add_rule(&pattern, kind).await?;
            println!("Rule created: {}", rule.id);
            println!("{}", serde_json::to_string_pretty(&rule)?);
        }
        RuleAction::List => {
            let rules = engine.list_rules().await?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        RuleAction::Remove { id } => {
            if !engine.remove_rule(id).await? {
                return Err(format!("no rule with id {id}").into());
            }
            println!("Rule removed: {id}");
        }
        RuleAction::AllowTemp { pattern, minutes } => {
            let rule = engine.add_temporary_whitelist(&pattern, minutes).await?;
            println!("Rule created: {}", rule.id);
            println!("{}", serde_json::to_string_pretty(&rule)?);
        }
    }
    Ok(())
}
