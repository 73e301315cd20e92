//! info command: JSON summary of the discovered repositories and their caches.

use repohist::HistoryOrchestrator;

pub fn cmd_info_json(orch: &HistoryOrchestrator) -> serde_json::Value {
    let config = orch.config();
    let markers = orch.cache_markers();

    let repositories: Vec<serde_json::Value> = orch
        .get_repositories()
        .into_iter()
        .map(|info| {
            let latest = markers.get(&info.directory_relative).cloned().flatten();
            let mut value = serde_json::json!({
                "type": info.kind,
                "root": info.directory_relative,
                "directory": info.directory.display().to_string(),
                "working": info.working,
                "remote": info.remote,
                "historyEnabled": info.history_enabled,
                "directoryHistory": info.history_for_directories,
                "latestCachedRevision": latest,
            });
            if let Some(parent) = &info.parent {
                value["parent"] = serde_json::json!(parent);
            }
            if let Some(branch) = &info.branch {
                value["branch"] = serde_json::json!(branch);
            }
            if let Some(version) = &info.current_version {
                value["currentVersion"] = serde_json::json!(version);
            }
            value
        })
        .collect();

    serde_json::json!({
        "sourceRoot": config.source_root().display().to_string(),
        "dataRoot": config.data_root.display().to_string(),
        "historyCache": orch.history_cache().is_some(),
        "annotationCache": orch.annotation_cache().is_some(),
        "repositories": repositories,
    })
}
