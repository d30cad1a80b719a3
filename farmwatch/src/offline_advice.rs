//! Canned farming advice served when the hosted model is unavailable.
//!
//! Rules are checked top to bottom against the words of the user's message
//! and the first match wins. A rule matches a word equal to one of its
//! `keywords` or containing one of its `stems`, so "topsoil" and "watering"
//! hit the soil rule while "phone" stays clear of the pH one.

struct Rule {
    keywords: &'static [&'static str],
    stems: &'static [&'static str],
    advice: &'static str,
}

impl Rule {
    fn matches(&self, word: &str) -> bool {
        self.keywords.contains(&word) || self.stems.iter().any(|stem| word.contains(stem))
    }
}

const RULES: &[Rule] = &[
    Rule {
        keywords: &["ph", "lime", "sulfur", "sulphur"],
        stems: &["acid", "alkalin"],
        advice: "pH management:\n\
            - Most vegetables do best between pH 6.0 and 7.0.\n\
            - Below 5.5, work in agricultural lime a little at a time and re-test after two weeks.\n\
            - Above 7.5, use elemental sulfur or acidifying fertilizers such as ammonium sulfate.\n\
            - Calibrate the pH probe with buffer solutions before trusting a sudden jump.",
    },
    Rule {
        keywords: &["ec", "salt", "salts", "feed", "feeding"],
        stems: &["conductiv", "nutrient", "fertili", "salin"],
        advice: "Nutrients and EC:\n\
            - Aim for an EC of 1.0 to 1.8 mS/cm for most crops.\n\
            - Below 0.8, plants are underfed; increase fertilizer strength gradually.\n\
            - Above 2.0, flush with clean water to wash out excess salts.\n\
            - Check EC at the same time of day, since temperature shifts the reading.",
    },
    Rule {
        keywords: &["dry", "wet", "drainage"],
        stems: &["soil", "moist", "water", "irrigat"],
        advice: "Soil and water:\n\
            - Keep soil moisture between 40% and 60% for most crops.\n\
            - Below 30%, water deeply in the early morning rather than little and often.\n\
            - Above 70%, hold off irrigation and check drainage to avoid root rot.\n\
            - Mulch helps keep moisture steady between waterings.",
    },
    Rule {
        keywords: &["temp", "heat", "hot", "cold", "cool", "warm"],
        stems: &["temperatur", "frost"],
        advice: "Temperature:\n\
            - 18 to 30 °C suits most crops.\n\
            - In heat above 35 °C, use shade cloth and water in the morning.\n\
            - Below 15 °C, cover seedlings at night and delay transplanting.",
    },
    Rule {
        keywords: &["bug", "bugs", "disease", "mold", "mould"],
        stems: &["pest", "insect", "fung", "aphid"],
        advice: "Pests and disease:\n\
            - Inspect the undersides of leaves weekly.\n\
            - Remove infected plants early and do not compost them.\n\
            - Encourage beneficial insects and rotate crops each season.\n\
            - Avoid overhead watering late in the day to limit fungal growth.",
    },
    Rule {
        keywords: &["rain", "wind", "uv", "sun"],
        stems: &["weather", "storm", "forecast", "sunlight"],
        advice: "Weather:\n\
            - Delay fertilizing before heavy rain to avoid runoff.\n\
            - Stake tall plants ahead of strong wind.\n\
            - On high-UV days, young transplants benefit from partial shade.",
    },
];

const DEFAULT_ADVICE: &str = "General farm care:\n\
    - Check your sensor dashboard daily and act on anything outside the green band.\n\
    - Keep soil moisture, pH and EC steady rather than correcting in large swings.\n\
    - Record what you change so you can see what worked.";

fn words(message: &str) -> Vec<String> {
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Returns the first matching advice block, or the general one.
pub fn advice_for(message: &str) -> &'static str {
    let words = words(message);
    RULES
        .iter()
        .find(|rule| words.iter().any(|w| rule.matches(w)))
        .map(|rule| rule.advice)
        .unwrap_or(DEFAULT_ADVICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soil_question_gets_soil_block() {
        let advice = advice_for("How often should I check the soil?");
        assert!(advice.starts_with("Soil and water:"));
        assert!(advice.contains("between 40% and 60%"));
    }

    #[test]
    fn test_words_containing_soil_get_soil_block() {
        for message in ["How are my soils doing?", "Should I add topsoil?", "Is the subsoil compacted", "Irrigating daily ok?"] {
            assert!(advice_for(message).starts_with("Soil and water:"), "{}", message);
        }
    }

    #[test]
    fn test_first_rule_wins() {
        // pH precedes soil in the table.
        assert!(advice_for("my soil pH is 5").starts_with("pH management:"));
    }

    #[test]
    fn test_short_keywords_match_whole_words_only() {
        // "phone" must not trigger the pH rule, nor "check" the EC rule.
        assert_eq!(advice_for("I lost my phone, check later"), DEFAULT_ADVICE);
    }

    #[test]
    fn test_case_insensitive() {
        assert!(advice_for("EC too HIGH?").starts_with("Nutrients and EC:"));
    }

    #[test]
    fn test_default_catch_all() {
        assert_eq!(advice_for("hello"), DEFAULT_ADVICE);
        assert_eq!(advice_for(""), DEFAULT_ADVICE);
    }
}
