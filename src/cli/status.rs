// src/cli/status.rs — Show persisted state: config, weights, memory, last runs

use crate::core::continuous::LiveRecord;
use crate::core::state;
use crate::core::summary::ClosedLoopSummary;
use crate::infra::paths::{self, ArtifactPaths};
use crate::memory::{JsonMemoryStore, JsonWeightStore, MemoryStore, WeightStore};

pub async fn show_status(verbose: bool) -> anyhow::Result<()> {
    let paths = ArtifactPaths::from_env();

    println!("fusionloop v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config_path = paths::config_file_path();
    if config_path.exists() {
        println!("  Config:     {} (loaded)", config_path.display());
    } else {
        println!("  Config:     (using defaults)");
    }
    println!("  State dir:  {}", paths.root().display());

    match JsonWeightStore::new(paths.strategy_weights()).load() {
        Ok(Some(file)) => {
            let list: Vec<String> = file
                .weights
                .iter()
                .map(|(id, w)| format!("{}={:.3}", id, w))
                .collect();
            println!("  Weights:    {}", list.join(" "));
            if verbose {
                if let Some(tuned) = &file.fusion {
                    println!("  Tuned:      {:?}", tuned);
                }
            }
        }
        Ok(None) => println!("  Weights:    (dynamic, not tuned)"),
        Err(e) => println!("  Weights:    (unreadable: {})", e),
    }

    match JsonMemoryStore::new(paths.memory()).load() {
        Ok(memory) if !memory.is_empty() => {
            let top: Vec<String> = memory
                .top_primary(if verbose { 12 } else { 6 })
                .into_iter()
                .map(|(n, v)| format!("{:02}:{:.3}", n, v))
                .collect();
            println!("  Memory:     {}", top.join(" "));
        }
        Ok(_) => println!("  Memory:     (empty)"),
        Err(e) => println!("  Memory:     (unreadable: {})", e),
    }

    if let Some(summary) = ClosedLoopSummary::load(&paths.closed_loop_summary()) {
        println!();
        println!("  Last run:   {}", summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!(
            "    Issues:   {} ({} matched, {:.1}%)",
            summary.total_issues,
            summary.total_matches,
            summary.match_rate() * 100.0
        );
        println!("    Attempts: {}", summary.total_attempts);
        if verbose {
            for (id, s) in &summary.strategy_stats {
                println!("    {:<10} {:>8} / {:<4}", id, s.attempts, s.matches);
            }
        }
    }

    if let Some(latest) = state::read_snapshot::<LiveRecord>(&paths.live_latest()) {
        println!();
        println!(
            "  Live:       tick {} issue {} → {}",
            latest.tick, latest.virtual_issue, latest.fused
        );
    }

    Ok(())
}
