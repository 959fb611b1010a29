//! Prompt templates for the market desk assistant
//!
//! All model-facing text lives here so behavior tuning never touches the
//! orchestrator. Prompts carry the current UTC date and quarter, the
//! response language, and the verbosity hint.

use crate::models::{Citation, GenerationConfig, Verbosity};
use chrono::{Datelike, Utc};

/// System prompt for the research loop: persona, domain boundaries,
/// non-advice rules, and tool usage guidance.
pub fn system_prompt(config: &GenerationConfig) -> String {
    let now = Utc::now();
    let date = now.format("%Y-%m-%d");
    let day = now.format("%A");
    let quarter = (now.month0() / 3) + 1;

    let style_hint = match config.verbosity {
        Verbosity::Concise => "Be concise and to the point.",
        Verbosity::Detailed => {
            "Explain with more detail and step-by-step reasoning, but stay focused."
        }
    };

    format!(
        "You are an AI market research assistant helping a retail investor.\n\
         You have access to tools for up-to-date market data and a curated knowledge base.\n\
         Today's date is {day} {date} (UTC), {year}'Q{quarter}.\n\
         Your domain is:\n\
         - Macro context (rates, inflation, growth, USD)\n\
         - Market regime (risk-on / risk-off, yields, volatility)\n\
         - Equity sectors and ETFs (especially U.S. markets)\n\
         - Individual stocks at a high level (no personalized advice)\n\
         \n\
         Core behavior:\n\
         - Respond in {language}, no matter the input language.\n\
         - {style_hint}\n\
         - Use structured tool data (regime, sector performance, snapshots) as the main source of truth.\n\
         - Keep any numbers you mention consistent with the tool results.\n\
         - If a question is ambiguous, briefly state what you will assume.\n\
         \n\
         Safety and non-advice rules:\n\
         - Stay on market topics; politely decline unrelated subjects.\n\
         - Do NOT give personalized investment advice or say what the user should buy, sell, or hold.\n\
         - Never imply guaranteed outcomes or certainty.\n\
         - Encourage the user to do their own research.\n\
         \n\
         Tool usage guidelines:\n\
         - If information seems missing or outdated, use the available tools rather than guessing.\n\
         - Treat tool output as fresh but not infallible.\n\
         - Mention data freshness only when it is clearly included in the results.",
        day = day,
        date = date,
        year = now.year(),
        quarter = quarter,
        language = config.language,
        style_hint = style_hint,
    )
}

/// Instruction appended for the final synthesis round, after tool results
/// have been gathered.
pub fn synthesis_instruction(citations: &[Citation]) -> String {
    let mut text = String::from(
        "Synthesize the tool results above into a single answer.\n\
         Acknowledge errors or limitations present in the results instead of papering over them.\n\
         Focus on being helpful while maintaining accuracy.",
    );

    if !citations.is_empty() {
        let listed = citations
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str("\nCite knowledge-base sources inline where used. Available sources: ");
        text.push_str(&listed);
        text.push('.');
    }
    text
}

//
// ================= Knowledge-base query templates =================
//

/// Canned retrieval query for market regime and rotation context.
pub fn market_pulse_query() -> &'static str {
    "Explain USD/rates effect on equities, commodities and sector rotation \
     in risk-on vs risk-off."
}

/// Retrieval query for sector-specific performance drivers.
pub fn sector_analysis_query(sector: &str) -> String {
    format!(
        "Explain {sector} sector performance drivers and key factors affecting {sector} stocks"
    )
}

/// Retrieval query for single-ticker fundamentals in its sector context.
pub fn ticker_fundamentals_query(ticker: &str, sector: &str) -> String {
    format!(
        "Analyze {ticker} stock fundamentals, valuation metrics and positioning \
         within the {sector} sector"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FreshnessTier, RespondLanguage};

    #[test]
    fn test_system_prompt_carries_language_and_style() {
        let mut cfg = GenerationConfig::default();
        cfg.language = RespondLanguage::Spanish;
        cfg.verbosity = Verbosity::Detailed;

        let prompt = system_prompt(&cfg);
        assert!(prompt.contains("Respond in Spanish"));
        assert!(prompt.contains("step-by-step"));
        assert!(prompt.contains("Today's date is"));
    }

    #[test]
    fn test_synthesis_lists_sources() {
        let citations = vec![Citation {
            source: "macro_drivers.md".to_string(),
            chunk: Some(1),
            freshness: FreshnessTier::Evergreen,
        }];
        let text = synthesis_instruction(&citations);
        assert!(text.contains("macro_drivers.md (chunk 1)"));

        let bare = synthesis_instruction(&[]);
        assert!(!bare.contains("Available sources"));
    }

    #[test]
    fn test_kb_query_templates() {
        assert!(market_pulse_query().contains("sector rotation"));
        assert!(sector_analysis_query("Energy").contains("Energy sector performance"));
        let q = ticker_fundamentals_query("AAPL", "Technology");
        assert!(q.contains("AAPL"));
        assert!(q.contains("Technology"));
    }

}
