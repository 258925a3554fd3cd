use crate::agents::Agent;
use crate::models::Horizon;

const ANALYSIS_PROMPT: &str = r#"You are a world-class trading analyst specializing in technical analysis of financial charts.
Your task is to analyze the provided trading chart image and return a structured JSON object with your findings.

The JSON object must conform to the following structure:
{
    "direction": "long" | "short",
    "entry": [entry_low, entry_high],
    "stop": stop_loss_price,
    "takeProfits": [tp1, tp2],
    "rr": risk_reward_ratio,
    "confidence": 0.0 to 1.0,
    "reasoning": ["short bullet-point justification", "..."],
    "timeframe": "1h" | "4h" | "1d" | ...
}

RULES:
1. "entry" is a range of exactly two numbers, low first.
2. "takeProfits" holds one or two numbers.
3. "rr" is the risk/reward ratio computed against the first take profit.
4. "confidence" is your confidence in this setup, between 0 and 1.
5. "timeframe" is your best guess of the chart's candle timeframe.

Return only the JSON object. Do not include any other text, greetings, markdown or explanations.
The user's trading horizon is: "#;

/// Reads a chart image and answers with a trade plan for one horizon.
pub struct ChartAnalyst {
    pub horizon: Horizon,
}

impl ChartAnalyst {
    pub fn new(horizon: Horizon) -> Self {
        Self { horizon }
    }
}

impl Agent for ChartAnalyst {
    fn name(&self) -> &str {
        "Chart-Analyst"
    }

    fn system_prompt(&self) -> String {
        format!("{}{}", ANALYSIS_PROMPT, self.horizon.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_horizon() {
        let scalp = ChartAnalyst::new(Horizon::Scalp).system_prompt();
        assert!(scalp.ends_with("scalp (1-2h)"));

        let long = ChartAnalyst::new(Horizon::LongTerm).system_prompt();
        assert!(long.ends_with("long-term"));
        assert!(long.contains("\"takeProfits\""));
    }
}
