const BASE_CONFIDENCE: f64 = 0.6;
const AGREEMENT_WEIGHT: f64 = 0.3;
const QUALITY_BONUS_PER_KIND: f64 = 0.1;

/// `min(1, 0.6 + 0.3 * agreement_ratio + 0.1 * distinct high-quality source kinds)`.
pub fn confidence_score(agreement_ratio: f64, high_quality_kinds: usize) -> f64 {
    let ratio = agreement_ratio.clamp(0.0, 1.0);
    let quality_bonus = QUALITY_BONUS_PER_KIND * high_quality_kinds as f64;
    (BASE_CONFIDENCE + AGREEMENT_WEIGHT * ratio + quality_bonus).min(1.0)
}
