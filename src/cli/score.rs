//! Quality scoring command: `score`

use circulate_core::{
    calculate_quality, compare_scores, error::Result, QualityMetrics, QualityScore,
};
use serde_json::json;

use super::helpers::{print_json, OutputFormat};

fn print_score(score: &QualityScore) {
    println!("Overall: {:.1}/10", score.overall);
    println!("  Efficiency:            {}", score.breakdown.efficiency);
    println!("  Reliability:           {}", score.breakdown.reliability);
    println!("  Knowledge utilization: {}", score.breakdown.knowledge_utilization);
    println!("  Completeness:          {}", score.breakdown.completeness);
    for line in &score.feedback {
        println!("  - {}", line);
    }
}

/// Handle `score`; with `baseline`, also compares against the baseline score
pub fn handle(metrics: QualityMetrics, baseline: Option<f64>, format: OutputFormat) -> Result<()> {
    let score = calculate_quality(&metrics);
    let comparison = baseline.map(|overall| {
        let before = QualityScore {
            overall,
            ..score.clone()
        };
        compare_scores(&before, &score)
    });

    match format {
        OutputFormat::Json => print_json(&json!({
            "score": score,
            "comparison": comparison,
        })),
        OutputFormat::Text => {
            print_score(&score);
            if let Some(comparison) = comparison {
                println!();
                println!("{}", comparison.message);
            }
            Ok(())
        }
    }
}
