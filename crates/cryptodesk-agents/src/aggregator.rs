use chrono::{DateTime, Utc};
use cryptodesk_models::analysis::{AggregatedRecommendation, AnalysisResult, Verdict, VerdictWeights};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("No viable analysis: {total} agents reported, none produced a usable verdict")]
    NoViableAnalysis { total: usize },
}

/// Combine per-agent results into one recommendation by confidence-weighted vote.
///
/// Failed and abstaining results stay in `contributions` but carry no weight.
/// Bullish or bearish wins only with strictly more weight than each other
/// bucket; every tie resolves to neutral. The combined confidence is the mean
/// confidence of the winning voters (of all viable voters when neutral wins a
/// tie without any neutral votes).
pub fn aggregate(
    symbol: &str,
    results: Vec<AnalysisResult>,
    decided_at: DateTime<Utc>,
) -> Result<AggregatedRecommendation, AggregateError> {
    let viable: Vec<&AnalysisResult> = results.iter().filter(|r| r.is_viable()).collect();
    if viable.is_empty() {
        warn!(symbol, agents = results.len(), "No viable analysis to aggregate");
        return Err(AggregateError::NoViableAnalysis {
            total: results.len(),
        });
    }

    let mut weights = VerdictWeights::default();
    for result in &viable {
        match result.verdict {
            Verdict::Bullish => weights.bullish += result.confidence,
            Verdict::Bearish => weights.bearish += result.confidence,
            Verdict::Neutral => weights.neutral += result.confidence,
            Verdict::Abstain => {}
        }
    }

    let verdict = if weights.bullish > weights.bearish && weights.bullish > weights.neutral {
        Verdict::Bullish
    } else if weights.bearish > weights.bullish && weights.bearish > weights.neutral {
        Verdict::Bearish
    } else {
        Verdict::Neutral
    };

    let winners: Vec<Decimal> = viable
        .iter()
        .filter(|r| r.verdict == verdict)
        .map(|r| r.confidence)
        .collect();
    let confidence = if winners.is_empty() {
        mean(viable.iter().map(|r| r.confidence))
    } else {
        mean(winners.into_iter())
    };

    info!(
        symbol,
        verdict = %verdict,
        confidence = %confidence,
        bullish = %weights.bullish,
        bearish = %weights.bearish,
        neutral = %weights.neutral,
        viable = viable.len(),
        "Aggregated recommendation"
    );

    Ok(AggregatedRecommendation {
        symbol: symbol.to_string(),
        verdict,
        confidence,
        weights,
        contributions: results,
        decided_at,
    })
}

fn mean(values: impl Iterator<Item = Decimal>) -> Decimal {
    let (sum, count) = values.fold((Decimal::ZERO, 0u32), |(sum, n), v| (sum + v, n + 1));
    if count == 0 {
        return Decimal::ZERO;
    }
    (sum / Decimal::from(count)).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptodesk_models::analysis::{AgentFailureKind, AgentKind};
    use rust_decimal_macros::dec;

    fn vote(kind: AgentKind, verdict: Verdict, confidence: Decimal) -> AnalysisResult {
        AnalysisResult::success(kind, kind.as_str(), verdict, confidence, "test", 5).unwrap()
    }

    fn failed(kind: AgentKind) -> AnalysisResult {
        AnalysisResult::failed(kind, kind.as_str(), AgentFailureKind::Timeout, "slow", 45_000)
    }

    #[test]
    fn bullish_majority_wins_with_mean_of_winners() {
        let results = vec![
            vote(AgentKind::Technical, Verdict::Bullish, dec!(0.8)),
            vote(AgentKind::Financial, Verdict::Bullish, dec!(0.6)),
            vote(AgentKind::Legal, Verdict::Bearish, dec!(0.3)),
            vote(AgentKind::Strategist, Verdict::Abstain, dec!(0.0)),
        ];

        let rec = aggregate("BTC", results, Utc::now()).unwrap();
        assert_eq!(rec.verdict, Verdict::Bullish);
        assert_eq!(rec.confidence, dec!(0.7));
        assert_eq!(rec.weights.bullish, dec!(1.4));
        assert_eq!(rec.weights.bearish, dec!(0.3));
        assert_eq!(rec.contributions.len(), 4);
        assert_eq!(rec.viable_count(), 3);
    }

    #[test]
    fn failed_results_carry_no_weight_but_are_kept() {
        let results = vec![
            failed(AgentKind::Technical),
            vote(AgentKind::Financial, Verdict::Bearish, dec!(0.55)),
        ];

        let rec = aggregate("ETH", results, Utc::now()).unwrap();
        assert_eq!(rec.verdict, Verdict::Bearish);
        assert_eq!(rec.confidence, dec!(0.55));
        assert_eq!(rec.contributions.len(), 2);
        assert!(rec.contributions[0].is_failed());
    }

    #[test]
    fn zero_viable_is_an_error() {
        let results = vec![
            failed(AgentKind::Technical),
            vote(AgentKind::Legal, Verdict::Abstain, dec!(0.0)),
        ];
        assert_eq!(
            aggregate("BTC", results, Utc::now()).unwrap_err(),
            AggregateError::NoViableAnalysis { total: 2 }
        );
        assert!(aggregate("BTC", vec![], Utc::now()).is_err());
    }

    #[test]
    fn directional_tie_resolves_to_neutral() {
        let results = vec![
            vote(AgentKind::Technical, Verdict::Bullish, dec!(0.6)),
            vote(AgentKind::Financial, Verdict::Bearish, dec!(0.6)),
        ];

        let rec = aggregate("BTC", results, Utc::now()).unwrap();
        assert_eq!(rec.verdict, Verdict::Neutral);
        // No neutral voters: mean over all viable results.
        assert_eq!(rec.confidence, dec!(0.6));
    }

    #[test]
    fn tie_with_neutral_resolves_to_neutral() {
        let results = vec![
            vote(AgentKind::Technical, Verdict::Bullish, dec!(0.5)),
            vote(AgentKind::Financial, Verdict::Neutral, dec!(0.5)),
            vote(AgentKind::Legal, Verdict::Bearish, dec!(0.2)),
        ];

        let rec = aggregate("BTC", results, Utc::now()).unwrap();
        assert_eq!(rec.verdict, Verdict::Neutral);
        assert_eq!(rec.confidence, dec!(0.5));
    }

    #[test]
    fn neutral_majority() {
        let results = vec![
            vote(AgentKind::Technical, Verdict::Neutral, dec!(0.9)),
            vote(AgentKind::Financial, Verdict::Bullish, dec!(0.4)),
        ];

        let rec = aggregate("SOL", results, Utc::now()).unwrap();
        assert_eq!(rec.verdict, Verdict::Neutral);
        assert_eq!(rec.confidence, dec!(0.9));
    }

    #[test]
    fn mean_is_exact_for_thirds() {
        let results = vec![
            vote(AgentKind::Technical, Verdict::Bullish, dec!(0.9)),
            vote(AgentKind::Financial, Verdict::Bullish, dec!(0.6)),
            vote(AgentKind::Legal, Verdict::Bullish, dec!(0.6)),
        ];

        let rec = aggregate("BTC", results, Utc::now()).unwrap();
        assert_eq!(rec.confidence, dec!(0.7));
    }
}
