//! Query matching and ranking over listing entries.
//!
//! Candidate entries (typically FTS hits or a directory listing) are
//! scored against the query and the user's region/language preferences.
//! The score model favors full-phrase matches, then per-token hits, and
//! nudges releases toward the preferred region and language while pushing
//! non-retail variants (demos, kiosks, betas) to the bottom.

use tracing::debug;

use crate::client::Entry;

/// Tokens shorter than this carry no signal ("a", "3").
const MIN_TOKEN_LEN: usize = 2;

/// Words stripped from queries before matching.
const STOPWORDS: &[&str] = &["a", "an", "the", "of", "and", "film", "game"];

/// Two-letter tags recognized as language markers inside release names.
const KNOWN_LANGUAGE_TAGS: &[&str] = &[
    "en", "de", "fr", "es", "it", "nl", "ja", "ko", "zh", "ru", "pt", "sv", "no", "da", "fi",
    "pl", "cs", "hu",
];

/// Parenthesized markers for non-retail releases.
const NON_RETAIL_MARKERS: &[&str] = &["(demo", "(kiosk", "(beta", "(video"];

/// The subset of non-retail markers that carries a ranking penalty.
/// Promotional videos are only filtered, never penalized, so a video
/// release still ranks when it is the only match.
const RANK_PENALTY_MARKERS: &[&str] = &["(demo", "(kiosk", "(beta"];

const SCORE_TOKEN_HIT: i64 = 10;
const SCORE_PHRASE: i64 = 20;
const SCORE_ALL_TOKENS: i64 = 12;
const SCORE_REGION: i64 = 30;
const SCORE_LANGUAGE_BASE: i64 = 18;
const SCORE_LANGUAGE_STEP: i64 = 4;
const SCORE_LANGUAGE_FLOOR: i64 = 4;
const PENALTY_FOREIGN_ONLY: i64 = 4;
const PENALTY_NON_RETAIL: i64 = 50;
const PENALTY_VIRTUAL_CONSOLE: i64 = 10;

/// Ranking preferences, independent of any one query.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    /// Preferred release region ("europe", or an alias like "eu", "us",
    /// "na", "jp"), matched against the name's parenthesized region tag.
    pub region: Option<String>,
    /// Preferred languages in priority order, as two-letter codes.
    pub languages: Vec<String>,
}

/// Splits a query or name into lowercase match tokens.
///
/// Splits on whitespace and the separator characters common in release
/// names, then drops stopwords and tokens below the minimum length.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| {
            c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '-' | '_' | ',' | '.' | '/')
        })
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Whether a release name carries a non-retail marker (demo, kiosk,
/// beta, promotional video).
#[must_use]
pub fn is_non_retail(name: &str) -> bool {
    let lower = name.to_lowercase();
    NON_RETAIL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Normalizes user-supplied language names to two-letter codes.
///
/// Entries may themselves be comma-separated lists. Unrecognized
/// entries are passed through lowercased so an exact tag match still
/// works for codes this table does not know. Duplicates are dropped,
/// keeping first-occurrence order.
#[must_use]
pub fn parse_preferred_languages(raw: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for lang in raw.iter().flat_map(|r| r.split(',')) {
        let l = lang.trim().to_lowercase();
        let code = match l.as_str() {
            "english" | "eng" => "en".to_string(),
            "german" | "deutsch" | "deu" | "ger" => "de".to_string(),
            "french" | "francais" | "fra" | "fre" => "fr".to_string(),
            "spanish" | "espanol" | "spa" => "es".to_string(),
            "italian" | "ita" => "it".to_string(),
            "dutch" | "nld" | "dut" => "nl".to_string(),
            "japanese" | "jpn" => "ja".to_string(),
            "korean" | "kor" => "ko".to_string(),
            "chinese" | "zho" | "chi" => "zh".to_string(),
            "russian" | "rus" => "ru".to_string(),
            "portuguese" | "por" => "pt".to_string(),
            "swedish" | "swe" => "sv".to_string(),
            "norwegian" | "nor" => "no".to_string(),
            "danish" | "dan" => "da".to_string(),
            "finnish" | "fin" => "fi".to_string(),
            "polish" | "pol" => "pl".to_string(),
            "czech" | "ces" | "cze" => "cs".to_string(),
            "hungarian" | "hun" => "hu".to_string(),
            _ => l,
        };
        if !code.is_empty() && !seen.contains(&code) {
            seen.push(code);
        }
    }
    seen
}

/// Ranks `entries` against `query`, best first.
///
/// Directories are never ranked; only file entries qualify. Admission
/// requires either the full query phrase or enough token hits (one for
/// single-token queries, two otherwise); with `exact` only the phrase
/// qualifies. Admitted entries with a non-positive score are still
/// dropped, so penalties can disqualify weak matches. Ties are broken by
/// name so results are stable across runs.
#[must_use]
pub fn rank(entries: &[Entry], query: &str, prefs: &Preferences, exact: bool) -> Vec<Entry> {
    let phrase = query.trim().to_lowercase();
    let tokens = tokenize(query);
    if phrase.is_empty() && tokens.is_empty() {
        return Vec::new();
    }
    let required_hits = if tokens.len() <= 1 { 1 } else { 2 };

    let mut scored: Vec<(i64, &Entry)> = entries
        .iter()
        .filter_map(|entry| {
            let score = score_entry(entry, &phrase, &tokens, required_hits, prefs, exact)?;
            Some((score, entry))
        })
        .collect();

    scored.sort_by(|(sa, ea), (sb, eb)| sb.cmp(sa).then_with(|| ea.name.cmp(&eb.name)));
    debug!(candidates = entries.len(), admitted = scored.len(), "ranked entries");
    scored.into_iter().map(|(_, e)| e.clone()).collect()
}

fn score_entry(
    entry: &Entry,
    phrase: &str,
    tokens: &[String],
    required_hits: usize,
    prefs: &Preferences,
    exact: bool,
) -> Option<i64> {
    if entry.is_dir {
        return None;
    }
    let name = entry.name.to_lowercase();

    // Token hits are whole-token matches against the tokenized name and
    // the phrase must sit on word boundaries, so "mario" never hits
    // "Marionette".
    let phrase_hit = !phrase.is_empty() && contains_phrase(&name, phrase);
    let name_tokens = tokenize(&entry.name);
    let hits = tokens
        .iter()
        .filter(|t| name_tokens.iter().any(|n| n == *t))
        .count();

    if exact {
        if !phrase_hit {
            return None;
        }
    } else if !phrase_hit && (tokens.is_empty() || hits < required_hits) {
        return None;
    }

    let mut score = hits as i64 * SCORE_TOKEN_HIT;
    if phrase_hit {
        score += SCORE_PHRASE;
    }
    if !tokens.is_empty() && hits == tokens.len() {
        score += SCORE_ALL_TOKENS;
    }

    if let Some(region) = &prefs.region {
        if name.contains(region_marker(region).as_str()) {
            score += SCORE_REGION;
        }
    }

    score += language_score(&name, &prefs.languages);

    if RANK_PENALTY_MARKERS.iter().any(|m| name.contains(m)) {
        score -= PENALTY_NON_RETAIL;
    }
    if name.contains("wii u virtual console") {
        score -= PENALTY_VIRTUAL_CONSOLE;
    }

    (score > 0).then_some(score)
}

/// Whether `name` contains `phrase` with no alphanumeric character
/// touching either end of the occurrence.
fn contains_phrase(name: &str, phrase: &str) -> bool {
    let mut start = 0;
    while let Some(offset) = name[start..].find(phrase) {
        let begin = start + offset;
        let end = begin + phrase.len();
        let open = !name[..begin]
            .chars()
            .next_back()
            .is_some_and(char::is_alphanumeric);
        let close = !name[end..].chars().next().is_some_and(char::is_alphanumeric);
        if open && close {
            return true;
        }
        start = end;
    }
    false
}

/// Maps a region preference onto the opening of its parenthesized name
/// tag, folding the common short forms into the canonical region names.
fn region_marker(region: &str) -> String {
    match region.to_lowercase().as_str() {
        "eu" | "europe" => "(europe".to_string(),
        "us" | "usa" | "na" => "(usa".to_string(),
        "jp" | "japan" => "(japan".to_string(),
        other => format!("({other}"),
    }
}

/// Language contribution: a descending bonus for the highest-priority
/// preferred language present, or a small penalty when the name carries
/// language tags but none of the preferred ones.
fn language_score(name: &str, preferred: &[String]) -> i64 {
    if preferred.is_empty() {
        return 0;
    }
    for (i, lang) in preferred.iter().enumerate() {
        if has_language_tag(name, lang) {
            let step = i as i64 * SCORE_LANGUAGE_STEP;
            return (SCORE_LANGUAGE_BASE - step).max(SCORE_LANGUAGE_FLOOR);
        }
    }
    if KNOWN_LANGUAGE_TAGS.iter().any(|t| has_language_tag(name, t)) {
        return -PENALTY_FOREIGN_ONLY;
    }
    0
}

/// Whether `name` (lowercased) carries the language code as a tag, e.g.
/// `(en)`, `(en,fr)` or `(de,en)`. Spaces after commas are tolerated.
fn has_language_tag(name: &str, code: &str) -> bool {
    let compact: String = name.chars().filter(|c| *c != ' ').collect();
    [
        format!("({code})"),
        format!("({code},"),
        format!(",{code},"),
        format!(",{code})"),
    ]
    .iter()
    .any(|pat| compact.contains(pat.as_str()))
}
