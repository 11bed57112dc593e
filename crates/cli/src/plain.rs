//! Non-interactive rendering for `--plain`: the same cluster grid the
//! viewer shows, as aligned text without colour.

use flowgrid_engine::constraint::ClusterInfo;
use flowgrid_engine::DataStats;

use crate::tui::data::ClusterView;
use crate::util;

/// One cluster as a header line plus an aligned table.
pub fn render_cluster(info: Option<&ClusterInfo>, view: &ClusterView) -> String {
    let mut out = String::new();
    match info {
        Some(info) => out.push_str(&info.to_string()),
        None => out.push_str(&format!("Cluster {}", view.cluster_id)),
    }
    out.push('\n');

    let header: Vec<String> = view
        .columns
        .iter()
        .zip(&view.col_widths)
        .map(|(name, &w)| util::pad_right(name, w))
        .collect();
    out.push_str(header.join(" ").trim_end());
    out.push('\n');

    for row in &view.rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&view.col_widths)
            .map(|(cell, &w)| {
                let text = if cell.bold { format!("*{}", cell.text) } else { cell.text.clone() };
                if cell.numeric {
                    util::pad_left(&text, w)
                } else {
                    util::pad_right(&text, w)
                }
            })
            .collect();
        out.push_str(cells.join(" ").trim_end());
        out.push('\n');
    }
    out
}

pub fn render_stats(path: &str, sheets: &[String], stats: &DataStats) -> String {
    format!(
        "file:        {}\nsheets:      {} ({})\nactive:      {}\nconstraints: {}\nclusters:    {}\n",
        path,
        stats.total_sheets,
        sheets.join(", "),
        stats.active_sheet.as_deref().unwrap_or("-"),
        stats.total_constraints,
        stats.unique_clusters,
    )
}
