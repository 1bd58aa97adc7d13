// src/prompts.rs
use crate::models::{PortfolioContext, Position};
use crate::portfolio::daily_pct;

pub fn movement_explanation(symbol: &str) -> String {
    format!(
        "Explain today's price move for {} in two sentences with citations.",
        symbol
    )
}

pub fn stock_analysis(symbol: &str) -> String {
    format!(
        r#"Analyze {symbol} stock and provide 3 key risks. For each claim you make, use actual URLs as sources. Format as JSON:
{{
  "movementExplanation": "Why did the stock move this week? Explain simply in 3-4 sentences and reference sources like [1], [2]. Don't mention the movement number, price or dates",
  "movementSources": ["https://example.com/source1", "https://example.com/source2"],
  "riskHighlights": [
    {{
      "text": "Risk 1 - explain in simple terms, 2 sentences",
      "sources": ["https://example.com/risk1source1", "https://example.com/risk1source2"]
    }},
    {{
      "text": "Risk 2 - explain in simple terms, 2 sentences",
      "sources": ["https://example.com/risk2source1", "https://example.com/risk2source2"]
    }},
    {{
      "text": "Risk 3 - explain in simple terms, 2 sentences",
      "sources": ["https://example.com/risk3source1", "https://example.com/risk3source2"]
    }}
  ],
  "similarStocks": [
    {{
      "ticker": "EXAMPLE1",
      "reason": "Why this stock is similar in under 9 words"
    }},
    {{
      "ticker": "EXAMPLE2",
      "reason": "Why this stock is similar in under 9 words"
    }},
    {{
      "ticker": "EXAMPLE3",
      "reason": "Why this stock is similar in under 9 words"
    }}
  ]
}}"#
    )
}

pub fn portfolio_review(positions: &[Position]) -> String {
    let holdings = serde_json::to_string_pretty(positions).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are an AI investment coach. Given these portfolio holdings:
{holdings}
Assign an investor personality, give a 3-4 sentence overall review of strengths and risks with citations, and suggest three tickers to improve diversification. Don't use any financial jargon. This should be educational for new investors.

IMPORTANT: Respond with ONLY a valid JSON object in this exact format (no backticks, no markdown, just pure JSON):
{{
  "personality": "string describing investor type max 4 words keep it fun and engaging",
  "review": "3-4 sentence review, if there are citation references that apply, use them like [1], [2], only if you have the link",
  "citations": [{{"title": "source title", "url": "source url"}}],
  "diversify": ["TICKER1","TICKER2","TICKER3"]
}}"#
    )
}

const QNA_INSTRUCTION: &str = "You are a helpful financial advisor. Answer this question in a clear, educational way for a beginner investor.";

const QNA_RULES: &str = "CRITICAL FORMATTING RULES - FOLLOW EXACTLY:
- NEVER use any markdown formatting whatsoever (no **, __, *, _, ##, etc.)
- Write in plain text only - no special characters for emphasis
- Use simple paragraph breaks for structure
- Do NOT use bullet points, numbered lists, or any special formatting
- Write naturally and conversationally without any text styling
- Do not use any special characters or formatting for emphasis
- Keep responses short and concise, no more than 6 sentences paragraphs

CONTENT GUIDELINES:
- ALWAYS check the portfolio context above first before answering
- If the user asks about buying/investing in a stock they already own, acknowledge their existing position and discuss adding to it rather than treating it as a new investment
- If they ask about a stock not in their portfolio, then discuss it as a potential new addition
- Only provide general educational guidance, not specific investment recommendations
- Do not cite specific statistics, yields, or price targets unless you are absolutely certain they are current and accurate
- Do NOT create numbered citations like [1], [2], [3] - the system will handle citations automatically
- Avoid recommending specific brokers or platforms
- Focus on educational concepts rather than specific actionable advice
- If you're uncertain about current data, acknowledge this limitation
- Keep responses conversational and helpful without overly specific claims
- Use clear, simple language suitable for a beginner investor";

fn signed(v: f64) -> &'static str {
    if v >= 0.0 {
        "+"
    } else {
        ""
    }
}

/// `-100.0` -> `"-$100"`, `2500.0` -> `"+$2,500"`.
fn signed_dollars(v: f64) -> String {
    let sign = if v < 0.0 { "-" } else { "+" };
    format!("{}${}", sign, format_thousands(v.abs()))
}

fn holding_line(p: &Position) -> String {
    let vs_previous = if p.current_price > 0.0 {
        daily_pct(p.current_price, p.previous_price)
    } else {
        0.0
    };
    format!(
        "{}: {} shares, ${} value ({}{:.1}% vs previous price), {}{:.1}% today",
        p.symbol,
        format_thousands(p.shares),
        format_thousands(p.value),
        signed(vs_previous),
        vs_previous,
        signed(p.daily_pct),
        p.daily_pct
    )
}

fn portfolio_context(ctx: &PortfolioContext) -> String {
    let holdings = ctx
        .positions
        .iter()
        .map(holding_line)
        .collect::<Vec<_>>()
        .join("; ");
    let o = &ctx.overview;
    format!(
        "Portfolio Context: \n- Holdings: {}\n- Portfolio Overview: ${} total value, {} ({}{:.1}%) total gain/loss, {} total holdings\n\n",
        holdings,
        format_thousands(o.total_value),
        signed_dollars(o.total_gain_loss),
        signed(o.total_gain_pct),
        o.total_gain_pct,
        o.holdings_count
    )
}

pub fn qna(question: &str, portfolio: Option<&PortfolioContext>) -> String {
    let context = portfolio
        .filter(|p| !p.positions.is_empty())
        .map(portfolio_context)
        .unwrap_or_default();
    format!(
        "{} {}\n\nQuestion: {}\n\n{}",
        QNA_INSTRUCTION, context, question, QNA_RULES
    )
}

/// `1234567.891` -> `"1,234,567.89"`; trailing fraction zeros are dropped.
pub fn format_thousands(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let frac = frac_part.trim_end_matches('0');
    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    if frac.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac)
    }
}
