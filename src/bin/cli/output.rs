//! Table and JSON rendering of analysis results.

use owo_colors::OwoColorize;
use serde_json::json;
use tabled::builder::Builder;
use tabled::settings::Style as TableStyle;
use tabled::{Table, Tabled};

use compset_rs::tasks::ReportState;
use compset_rs::{AnalysisContext, PipelineStatus, Report, SummaryTable};

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn summary_as_table(summary: &SummaryTable) -> Table {
    let mut builder = Builder::default();
    builder.set_header(summary.headers());
    for row in &summary.rows {
        builder.push_record(SummaryTable::cells(row));
    }
    let mut table = builder.build();
    table.with(TableStyle::rounded());
    table
}

/// Human-readable output.
pub fn print_tables(context: &AnalysisContext, status: &PipelineStatus, report: &Report) {
    println!("{} {}", "Status:".bold(), status.to_string().green());
    println!();

    if let Some(outcome) = context.outcome() {
        let stats_rows = vec![
            StatsRow {
                metric: "Items analysed".to_string(),
                value: outcome.n_items().to_string(),
            },
            StatsRow {
                metric: "Attributes".to_string(),
                value: outcome.prepared.attributes.join(", "),
            },
            StatsRow {
                metric: "Segments".to_string(),
                value: format!("{} ({:?})", outcome.n_clusters(), outcome.clustering.method),
            },
            StatsRow {
                metric: "MDS stress".to_string(),
                value: format!("{:.4}", outcome.projection.stress),
            },
            StatsRow {
                metric: "Computed at".to_string(),
                value: outcome.computed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            },
            StatsRow {
                metric: "Naming".to_string(),
                value: format!("{:?}", context.naming().status()),
            },
        ];
        let mut table = Table::new(stats_rows);
        table.with(TableStyle::rounded());
        println!("{table}");
        println!();
    }

    if let Some(summary) = context.summary_table() {
        println!("{}", "Segments".bright_blue().bold());
        println!("{}", summary_as_table(&summary));
        println!();
    }

    println!("{}", "Report".bright_blue().bold());
    match report.state {
        ReportState::Ready => println!("{}", report.text),
        ReportState::Failed => println!("{}", report.text.yellow()),
        ReportState::Regenerating | ReportState::Empty => println!("{}", report.text.dimmed()),
    }
}

/// One JSON document on stdout.
pub fn print_json(context: &AnalysisContext, status: &PipelineStatus) -> anyhow::Result<()> {
    let document = json!({
        "status": status.to_string(),
        "computed_at": context.outcome().map(|o| o.computed_at.to_rfc3339()),
        "plot": context.plot(),
        "names": context.names(),
        "summary": context.summary_table().map(|s| s.rows),
        "summary_delimited": context.summary_table().map(|s| s.to_delimited()),
        "naming_status": context.naming().status(),
        "report": context.report(),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
