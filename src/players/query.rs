//! Free-text prop queries.
//!
//! Handles phrasing like:
//!   "Tatum 30+ pts and 8+ reb on 2025-11-03"
//!   "LeBron over 7.5 ast tonight"
//!   "Curry 4+ threes & 25+ points"
//!
//! The text is split into words, numbers, dates and separators, then walked
//! left to right: words build up a player name, a number opens a leg for the
//! most recent name, and a stat word closes it. A leg with no name reuses the
//! previous leg's player. Names are resolved to ids by the player cache.

use chrono::{Duration, NaiveDate};

use crate::props::Metric;

/// One "player threshold stat" phrase, player still unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LegMention {
    pub player: String,
    pub metric: Metric,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub mentions: Vec<LegMention>,
    /// Explicit `YYYY-MM-DD` if present, else today/tonight/tomorrow.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Date(NaiveDate),
    Break,
}

/// Words that end the current name.
const SEPARATOR_WORDS: &[&str] = &["and", "also", "plus", "then"];

/// Words skipped without touching the name being built.
const FILLER_WORDS: &[&str] = &[
    "a", "an", "at", "least", "or", "more", "over", "o", "on", "in", "for", "vs", "against",
    "the", "what", "whats", "is", "are", "does", "do", "will", "would", "can", "could", "chance",
    "chances", "odds", "probability", "prob", "of", "that", "to", "get", "gets", "score",
    "scores", "record", "records", "have", "has", "put", "puts", "up", "hit", "hits", "game",
    "me", "tell", "how", "likely", "with",
];

pub fn parse_query(text: &str, today: NaiveDate) -> ParsedQuery {
    let mut mentions = Vec::new();
    let mut explicit_date: Option<NaiveDate> = None;
    let mut relative_date: Option<NaiveDate> = None;

    let mut name: Vec<String> = Vec::new();
    let mut last_player: Option<String> = None;
    let mut pending: Option<(f64, Option<String>)> = None;

    for token in tokenize(text) {
        match token {
            Token::Date(d) => {
                explicit_date.get_or_insert(d);
                name.clear();
            }
            Token::Break => name.clear(),
            Token::Number(n) => {
                let player = if name.is_empty() {
                    last_player.clone()
                } else {
                    Some(name.join(" "))
                };
                name.clear();
                pending = Some((n, player));
            }
            Token::Word(word) => {
                let lower = word.to_lowercase();
                if let Some(metric) = Metric::from_alias(&lower) {
                    if let Some((threshold, Some(player))) = pending.take() {
                        last_player = Some(player.clone());
                        mentions.push(LegMention {
                            player,
                            metric,
                            threshold,
                        });
                    }
                    name.clear();
                    continue;
                }
                match lower.as_str() {
                    "today" | "tonight" => {
                        relative_date.get_or_insert(today);
                        name.clear();
                    }
                    "tomorrow" => {
                        relative_date.get_or_insert(today + Duration::days(1));
                        name.clear();
                    }
                    w if SEPARATOR_WORDS.contains(&w) => name.clear(),
                    w if FILLER_WORDS.contains(&w) => {}
                    _ => name.push(word),
                }
            }
        }
    }

    ParsedQuery {
        mentions,
        date: explicit_date.or(relative_date),
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for chunk in text.split_whitespace() {
        let bare = chunk.trim_matches(|c: char| !c.is_alphanumeric());
        if let Ok(d) = NaiveDate::parse_from_str(bare, "%Y-%m-%d") {
            tokens.push(Token::Date(d));
            if ends_clause(chunk) {
                tokens.push(Token::Break);
            }
            continue;
        }
        // "3pm", "3pt" start with a digit but are stat words
        if bare.starts_with(|c: char| c.is_ascii_digit()) && Metric::from_alias(bare).is_some() {
            tokens.push(Token::Word(bare.to_string()));
            if ends_clause(chunk) {
                tokens.push(Token::Break);
            }
            continue;
        }
        scan_chunk(chunk, &mut tokens);
    }
    tokens
}

fn ends_clause(chunk: &str) -> bool {
    chunk.ends_with([',', ';', '?', '!', '&'])
}

fn scan_chunk(chunk: &str, tokens: &mut Vec<Token>) {
    let chars: Vec<char> = chunk.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            let start = i;
            let mut seen_dot = false;
            while i < chars.len() {
                if chars[i].is_ascii_digit() {
                    i += 1;
                } else if chars[i] == '.'
                    && !seen_dot
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
                {
                    seen_dot = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let digits: String = chars[start..i].iter().collect();
            if let Ok(n) = digits.parse::<f64>() {
                tokens.push(Token::Number(n));
            }
        } else if c.is_alphabetic() {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphabetic() || matches!(chars[i], '.' | '\'' | '’' | '-'))
            {
                i += 1;
            }
            let raw: String = chars[start..i].iter().collect();
            let raw = raw.trim_end_matches(['.', '\'', '’', '-']);
            let word = raw
                .strip_suffix("'s")
                .or_else(|| raw.strip_suffix("’s"))
                .unwrap_or(raw);
            tokens.push(Token::Word(word.to_string()));
        } else {
            if matches!(c, ',' | ';' | '&' | '?' | '!' | '/') {
                tokens.push(Token::Break);
            }
            i += 1;
        }
    }
}
