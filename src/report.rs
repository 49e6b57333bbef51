//! One-shot CLI reports.
//!
//! `ctxcache scan` shows what the cache would hold right now, `render`
//! prints the exact document bytes, and `health` checks the inference
//! engine. None of them watch the workspace or prime the engine.

use anyhow::Result;

use crate::config::Config;
use crate::engine::{InferenceEngine, OpenAiEngine};
use crate::manager::TierEntry;
use crate::models::Tier;
use crate::service::scan_workspace;

/// Run the scan command: index the workspace once and print the tiers.
pub fn run_scan(config: &Config, json: bool) -> Result<()> {
    let (manager, outcome) = scan_workspace(config)?;
    let rows = manager.listing();

    if json {
        let report = serde_json::json!({
            "root": config.workspace.root,
            "tracked": outcome.tracked,
            "excluded": outcome.excluded,
            "budget": manager.budget(),
            "document_bytes": outcome.document.len(),
            "fingerprint": outcome.document.fingerprint,
            "dropped": outcome.dropped,
            "warning": outcome.warning,
            "files": rows,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("scan {}", config.workspace.root.display());
    println!("  tracked:   {}", outcome.tracked);
    for tier in Tier::RENDERED {
        println!(
            "  {:<9}  {}/{}",
            format!("{}:", tier),
            manager.tiers().members(tier).len(),
            manager.tiers().capacity(tier)
        );
    }
    println!("  excluded:  {}", outcome.excluded);
    println!(
        "  document:  {} of {} ({})",
        format_bytes(outcome.document.len() as u64),
        format_bytes(manager.budget() as u64),
        outcome.document.fingerprint.short()
    );
    if let Some(warning) = &outcome.warning {
        println!("  warning:   {}", warning);
    }

    let rendered: Vec<&TierEntry> = rows.iter().filter(|r| r.tier != Tier::Excluded).collect();
    if !rendered.is_empty() {
        println!();
        println!("  {:<9} {:>7} {:>9}   {}", "TIER", "SCORE", "SIZE", "PATH");
        println!("  {}", "-".repeat(60));
        for row in rendered {
            let marker = if outcome.dropped.contains(&row.path) {
                " (over budget)"
            } else {
                ""
            };
            println!(
                "  {:<9} {:>7.2} {:>9}   {}{}",
                row.tier.as_str(),
                row.score.unwrap_or_default(),
                format_bytes(row.size_bytes),
                row.path,
                marker
            );
        }
    }

    println!("ok");
    Ok(())
}

/// Run the render command: print the assembled document exactly.
pub fn run_render(config: &Config) -> Result<()> {
    let (_, outcome) = scan_workspace(config)?;
    print!("{}", outcome.document.text);
    Ok(())
}

/// Run the health command. Returns `false` when the engine is unhealthy.
pub async fn run_health(config: &Config) -> Result<bool> {
    let engine = OpenAiEngine::new(&config.engine)?;
    println!("health {}", engine.endpoint());

    if let Err(e) = engine.health().await {
        println!("  health:  FAILED ({})", e);
        return Ok(false);
    }
    println!("  health:  ok");

    match engine.model_info().await {
        Ok(model) => {
            println!("  model:   {}", model.id);
            println!("  window:  {} tokens", model.max_model_len);
            println!("ok");
            Ok(true)
        }
        Err(e) => {
            println!("  model:   FAILED ({})", e);
            Ok(false)
        }
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
