//! Task quality scoring
//!
//! Pure functions: four banded sub-scores, each driven by a single metric,
//! averaged into a 0-10 overall score with fixed feedback strings.

use serde::{Deserialize, Serialize};

/// Raw metrics of one task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Milliseconds
    pub execution_time_ms: u64,
    pub error_count: u32,
    pub knowledge_used: u32,
    pub output_length: usize,
    pub has_tests: bool,
    pub has_documentation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub efficiency: u8,
    pub reliability: u8,
    pub knowledge_utilization: u8,
    pub completeness: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Mean of the breakdown, one decimal
    pub overall: f64,
    pub breakdown: QualityBreakdown,
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComparison {
    pub improvement: f64,
    pub message: String,
}

const MS_PER_MINUTE: f64 = 60_000.0;

/// Map execution metrics to a [`QualityScore`]
pub fn calculate_quality(metrics: &QualityMetrics) -> QualityScore {
    let breakdown = QualityBreakdown {
        efficiency: score_efficiency(metrics.execution_time_ms),
        reliability: score_reliability(metrics.error_count),
        knowledge_utilization: score_knowledge_use(metrics.knowledge_used),
        completeness: score_completeness(metrics),
    };

    let overall = (f64::from(breakdown.efficiency)
        + f64::from(breakdown.reliability)
        + f64::from(breakdown.knowledge_utilization)
        + f64::from(breakdown.completeness))
        * 0.25;

    QualityScore {
        overall: (overall * 10.0).round() / 10.0,
        feedback: generate_feedback(&breakdown),
        breakdown,
    }
}

/// <1 min: 10, <5: 8, <15: 6, <30: 4, else 2
pub fn score_efficiency(execution_time_ms: u64) -> u8 {
    let minutes = execution_time_ms as f64 / MS_PER_MINUTE;
    if minutes < 1.0 {
        10
    } else if minutes < 5.0 {
        8
    } else if minutes < 15.0 {
        6
    } else if minutes < 30.0 {
        4
    } else {
        2
    }
}

/// 0 errors: 10, 1-2: 7, 3-5: 4, 6+: 1
pub fn score_reliability(error_count: u32) -> u8 {
    match error_count {
        0 => 10,
        1..=2 => 7,
        3..=5 => 4,
        _ => 1,
    }
}

/// 3+ items: 10, 2: 8, 1: 6, none: 3
pub fn score_knowledge_use(knowledge_used: u32) -> u8 {
    match knowledge_used {
        0 => 3,
        1 => 6,
        2 => 8,
        _ => 10,
    }
}

pub fn score_completeness(metrics: &QualityMetrics) -> u8 {
    let mut score: u8 = 5;

    if metrics.output_length > 1000 {
        score += 2;
    } else if metrics.output_length > 500 {
        score += 1;
    }
    if metrics.has_tests {
        score += 2;
    }
    if metrics.has_documentation {
        score += 1;
    }

    score.min(10)
}

fn generate_feedback(breakdown: &QualityBreakdown) -> Vec<String> {
    let checks = [
        (
            breakdown.efficiency < 6,
            "Consider optimizing execution time. Look for inefficient loops or API calls.",
        ),
        (
            breakdown.reliability < 7,
            "High error count detected. Review error handling and edge cases.",
        ),
        (
            breakdown.knowledge_utilization < 6,
            "Low knowledge usage. Try searching for relevant past solutions.",
        ),
        (
            breakdown.completeness < 7,
            "Output could be more complete. Consider adding tests and documentation.",
        ),
        (breakdown.efficiency >= 8, "Excellent execution efficiency!"),
        (
            breakdown.reliability == 10,
            "Perfect reliability - zero errors!",
        ),
        (
            breakdown.knowledge_utilization >= 8,
            "Great knowledge utilization!",
        ),
    ];

    checks
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, message)| message.to_string())
        .collect()
}

/// Change in overall score from `before` to `after`
pub fn compare_scores(before: &QualityScore, after: &QualityScore) -> ScoreComparison {
    let improvement = after.overall - before.overall;
    let percentage = if before.overall == 0.0 {
        0.0
    } else {
        improvement / before.overall * 100.0
    };

    let message = if improvement > 1.0 {
        format!(
            "Significant improvement: +{:.1} points ({:.1}%)",
            improvement, percentage
        )
    } else if improvement > 0.0 {
        format!(
            "Slight improvement: +{:.1} points ({:.1}%)",
            improvement, percentage
        )
    } else if improvement == 0.0 {
        "No change in quality score".to_string()
    } else {
        format!(
            "Quality decreased: {:.1} points ({:.1}%)",
            improvement, percentage
        )
    };

    ScoreComparison {
        improvement,
        message,
    }
}
