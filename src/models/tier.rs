use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One OCR engine in the configured cascade.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    Tesseract,
    Easyocr,
    Paddleocr,
    AppleVision,
    LlmLocal,
    LlmCloud,
}

/// Full cascade in default order, cheapest engines first.
pub const DEFAULT_TIER_ORDER: [Tier; 6] = [
    Tier::Tesseract,
    Tier::Easyocr,
    Tier::Paddleocr,
    Tier::AppleVision,
    Tier::LlmLocal,
    Tier::LlmCloud,
];

#[derive(Debug, thiserror::Error)]
#[error("unknown OCR tier: '{0}'")]
pub struct UnknownTier(String);

/// Parse an `OCR_ENABLED_TIERS`-style comma list, preserving the configured
/// order and dropping duplicates.
pub fn parse_tier_list(spec: &str) -> Result<Vec<Tier>, UnknownTier> {
    let mut tiers = Vec::new();
    for name in spec.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let tier: Tier = name.parse().map_err(|_| UnknownTier(name.to_string()))?;
        if !tiers.contains(&tier) {
            tiers.push(tier);
        }
    }
    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_configured_order() {
        let tiers = parse_tier_list("apple_vision, tesseract").unwrap();
        assert_eq!(tiers, vec![Tier::AppleVision, Tier::Tesseract]);
    }

    #[test]
    fn dedupes_and_skips_blank_entries() {
        let tiers = parse_tier_list("tesseract,,tesseract, llm_cloud").unwrap();
        assert_eq!(tiers, vec![Tier::Tesseract, Tier::LlmCloud]);
    }

    #[test]
    fn rejects_unknown_names() {
        let err = parse_tier_list("tesseract,magic_ocr").unwrap_err();
        assert!(err.to_string().contains("magic_ocr"));
    }

    #[test]
    fn tier_names_round_trip() {
        for tier in DEFAULT_TIER_ORDER {
            let name = tier.to_string();
            assert_eq!(name.parse::<Tier>().unwrap(), tier);
        }
        assert_eq!(Tier::AppleVision.to_string(), "apple_vision");
    }
}
