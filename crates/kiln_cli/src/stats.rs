//! `kiln stats`: show the statistics and configuration digest of a target.

use kiln_cache::config_digest::to_base36;
use kiln_cache::target_stats::CONFIGURATION_DIGEST_KEY;
use kiln_cache::{
    ConfigurationCategory, ConfigurationDigestContainer, RebuildHeuristic, TargetStatistic,
    TargetStatsStore,
};
use kiln_common::SchemaEnum;
use kiln_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticRenderer, TerminalRenderer};

use crate::project::load_project;
use crate::{GlobalArgs, StatsArgs};

/// Runs the `kiln stats` command.
///
/// Returns exit code 1 if the file is unreadable, 0 otherwise. A missing
/// file is an error; the command never creates one.
pub fn run(args: &StatsArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    if !args.file.is_file() {
        return Err(format!("no target stats at {}", args.file.display()).into());
    }
    let project = load_project(global)?;
    let heuristic = RebuildHeuristic::new(project.config.rebuild.threshold_percent);

    let store = match TargetStatsStore::open_with_threshold(
        &args.file,
        project.config.stats.compaction_threshold,
    ) {
        Ok(store) => store,
        Err(e) => {
            let code = if e.is_corruption() {
                DiagnosticCode::TARGET_STATS_CORRUPTED
            } else {
                DiagnosticCode::STATE_IO
            };
            let diag = Diagnostic::error(code, e.to_string()).with_file(&args.file);
            eprint!("{}", TerminalRenderer.render(&diag));
            return Ok(1);
        }
    };

    print!("{}", render(&store, &heuristic));
    Ok(0)
}

fn render(store: &TargetStatsStore, heuristic: &RebuildHeuristic) -> String {
    let mut out = format!("{}\n", store.log().path().display());

    let state = store.load_target_state();
    for &stat in TargetStatistic::ALL {
        out.push_str(&format!("  {stat} = {} ms\n", state.get(stat)));
    }
    match state
        .last_successful_rebuild_duration()
        .and_then(|last| heuristic.threshold_ms(last))
    {
        Some(threshold) => out.push_str(&format!(
            "  full rebuild threshold ({}%) = {threshold} ms\n",
            heuristic.threshold_percent()
        )),
        None => out.push_str("  full rebuild threshold: no clean rebuild recorded\n"),
    }

    out.push_str("configuration digest\n");
    match store.log().get(CONFIGURATION_DIGEST_KEY) {
        None => out.push_str("  (none stored)\n"),
        Some(record) if record.len() != ConfigurationCategory::COUNT + 1 => {
            out.push_str(&format!("  (unreadable: {} slots)\n", record.len()));
        }
        Some(record) => {
            for (&category, &value) in ConfigurationCategory::ALL.iter().zip(record) {
                out.push_str(&format!("  {category} = {}\n", to_base36(value as u64)));
            }
            let version = record[ConfigurationCategory::COUNT] as u64;
            if version != ConfigurationDigestContainer::version_digest() {
                out.push_str("  (written by a different configuration layout)\n");
            }
        }
    }
    out
}
