//! Receipt date selection.
//!
//! Every date-shaped string in the OCR text is a candidate. Candidates just
//! after a date label score +10; a year within [`YEAR_WINDOW`] of the current
//! year scores +5, otherwise -5. Ties go to the earliest position.

use chrono::Datelike;

use super::{char_pos, re};

const DATE_LABELS: &[&str] = &["日付", "利用日", "乗車日", "発行日", "領収日", "年月日"];

/// Maximum characters between the end of a label and a labelled date.
const LABEL_REACH: usize = 30;

/// Years either side of the current year considered plausible.
pub const YEAR_WINDOW: i32 = 2;

/// Reiwa year 1 is 2019.
const REIWA_OFFSET: i32 = 2018;

const LABEL_BONUS: i32 = 10;
const YEAR_BONUS: i32 = 5;
const YEAR_PENALTY: i32 = -5;

re!(re_date_numeric, r"([0-9０-９]{4})[/\-]([0-9０-９]{1,2})[/\-]([0-9０-９]{1,2})");
re!(re_date_kanji, r"([0-9０-９]{4})年([0-9０-９]{1,2})月([0-9０-９]{1,2})日");
re!(re_date_reiwa, r"令和\s*([0-9０-９]{1,2})年([0-9０-９]{1,2})月([0-9０-９]{1,2})日");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateNotation {
    Numeric,
    Kanji,
    Reiwa,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateCandidate {
    /// `YYYY/MM/DD`
    pub date: String,
    pub year: i32,
    pub score: i32,
    /// Character offset of the match in the OCR text.
    pub position: usize,
    pub notation: DateNotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateExtraction {
    pub date: String,
    pub trace: String,
    pub needs_review: bool,
}

/// The local calendar year, used as the scoring reference.
pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

fn year_plausible(year: i32, current_year: i32) -> bool {
    (current_year - YEAR_WINDOW..=current_year + YEAR_WINDOW).contains(&year)
}

/// All valid dates in `text`, scored, best first.
pub fn date_candidates(text: &str, current_year: i32) -> Vec<DateCandidate> {
    let label_ends: Vec<usize> = DATE_LABELS
        .iter()
        .flat_map(|label| {
            text.match_indices(*label)
                .map(move |(i, _)| char_pos(text, i + label.len()))
        })
        .collect();

    let patterns = [
        (re_date_numeric(), DateNotation::Numeric),
        (re_date_kanji(), DateNotation::Kanji),
        (re_date_reiwa(), DateNotation::Reiwa),
    ];

    let mut candidates = Vec::new();
    for (re, notation) in patterns {
        for caps in re.captures_iter(text) {
            let field = |i: usize| caps.get(i).and_then(|m| parse_digits(m.as_str()));
            let (Some(y), Some(month), Some(day)) = (field(1), field(2), field(3)) else {
                continue;
            };
            let year = match notation {
                DateNotation::Reiwa => REIWA_OFFSET + y,
                _ => y,
            };
            if !(1..=12).contains(&month) || !(1..=31).contains(&day) || !(2000..=2099).contains(&year) {
                continue;
            }

            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let position = char_pos(text, start);
            let mut score = 0;
            if label_ends
                .iter()
                .any(|&end| position >= end && position - end <= LABEL_REACH)
            {
                score += LABEL_BONUS;
            }
            score += if year_plausible(year, current_year) { YEAR_BONUS } else { YEAR_PENALTY };

            candidates.push(DateCandidate {
                date: format!("{year:04}/{month:02}/{day:02}"),
                year,
                score,
                position,
                notation,
            });
        }
    }

    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.position.cmp(&b.position)));
    candidates
}

/// Pick the receipt date from `ocr_text`, falling back to the backend's
/// `ai_date` when the text has no recognizable date.
pub fn extract_best_date(ocr_text: &str, ai_date: &str, current_year: i32) -> DateExtraction {
    let candidates = date_candidates(ocr_text, current_year);

    let Some(best) = candidates.first() else {
        let ai_year = ai_date
            .trim()
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|s| s.parse::<i32>().ok());
        let needs_review = match ai_year {
            _ if ai_date.trim().is_empty() => true,
            Some(y) => !year_plausible(y, current_year),
            None => false,
        };
        let mut trace = format!("no date in OCR text, using backend value {ai_date:?}");
        if needs_review {
            trace.push_str(" (needs review)");
        }
        return DateExtraction { date: ai_date.to_string(), trace, needs_review };
    };

    let mut trace = format!(
        "{} candidate(s); best {} (score {})",
        candidates.len(),
        best.date,
        best.score
    );
    if !ai_date.is_empty() && ai_date != best.date {
        trace.push_str(&format!("; overrides backend value {ai_date:?}"));
    }
    DateExtraction {
        date: best.date.clone(),
        trace,
        needs_review: !year_plausible(best.year, current_year),
    }
}

/// Parse a run of ASCII or full-width digits.
fn parse_digits(s: &str) -> Option<i32> {
    s.chars().try_fold(0i32, |acc, c| {
        let d = match c {
            '0'..='9' => c as u32 - '0' as u32,
            '０'..='９' => c as u32 - '０' as u32,
            _ => return None,
        };
        acc.checked_mul(10)?.checked_add(d as i32)
    })
}
