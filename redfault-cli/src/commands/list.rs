use clap::{Args, ValueEnum};
use comfy_table::{ContentArrangement, Table, presets};
use redfault::{ActionKind, actions};

use crate::cli::{GlobalFlags, OutputFormat};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Attack,
    Check,
}

impl KindFilter {
    fn matches(self, kind: ActionKind) -> bool {
        matches!(
            (self, kind),
            (KindFilter::Attack, ActionKind::Attack) | (KindFilter::Check, ActionKind::Check)
        )
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show attacks or only checks
    #[arg(long, value_enum)]
    pub kind: Option<KindFilter>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

pub async fn execute(args: ListArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let (engine, _) = global.create_engine()?;
    let descriptors: Vec<_> = actions::catalog(&engine)
        .iter()
        .map(|a| a.descriptor())
        .filter(|d| args.kind.is_none_or(|k| k.matches(d.kind)))
        .collect();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&descriptors)?),
        OutputFormat::Text => {
            let mut table = Table::new();
            table
                .load_preset(presets::NOTHING)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "KIND", "LABEL", "DESCRIPTION"]);
            for d in &descriptors {
                let kind = match d.kind {
                    ActionKind::Attack => "attack",
                    ActionKind::Check => "check",
                };
                table.add_row(vec![d.id, kind, d.label, d.description]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}
