//! Question file import.
//!
//! Three formats are understood, chosen by file extension:
//!
//! * `.json` - an array of `{text, kind, options, correctIndex, correctBool}` objects.
//! * `.txt` - blocks separated by blank lines, three lines each: the question,
//!   `YESNO` or `;`-separated options, and the correct answer.
//! * `.xlsx` - the first sheet, one question per row in columns A, B and C,
//!   read like a TXT block. Rows with an empty column A are skipped.
//!
//! A single bad block fails the whole import.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use calamine::{Data, Reader, Xlsx};
use serde::Deserialize;

use crate::error::ImportError;
use crate::models::{Question, QuestionKind};

/// JSON row as written in question files.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRecord {
    text: String,
    kind: QuestionKind,
    #[serde(default)]
    options: Vec<String>,
    correct_index: Option<usize>,
    correct_bool: Option<bool>,
}

/// Read a question file from disk and parse it according to its extension.
pub fn load_questions_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Question>, ImportError> {
    let path = path.as_ref();

    let bytes = fs::read(path).map_err(|source| ImportError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let hint = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    parse_questions(&bytes, &hint)
}

/// Parse question file contents. `filename_hint` selects the format.
pub fn parse_questions(bytes: &[u8], filename_hint: &str) -> Result<Vec<Question>, ImportError> {
    let lower = filename_hint.to_lowercase();

    let questions = if lower.ends_with(".json") {
        parse_json(bytes)?
    } else if lower.ends_with(".txt") {
        let text = std::str::from_utf8(bytes).map_err(|_| ImportError::Encoding)?;
        parse_txt(text)?
    } else if lower.ends_with(".xlsx") {
        parse_xlsx(bytes)?
    } else {
        return Err(ImportError::UnsupportedFormat(filename_hint.to_string()));
    };

    if questions.is_empty() {
        return Err(ImportError::Empty);
    }

    tracing::info!("Imported {} questions from {}", questions.len(), filename_hint);
    Ok(questions)
}

fn parse_json(bytes: &[u8]) -> Result<Vec<Question>, ImportError> {
    let records: Vec<QuestionRecord> = serde_json::from_slice(bytes)?;

    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            let index = i + 1;
            match record.kind {
                QuestionKind::YesNo => {
                    let correct = record
                        .correct_bool
                        .ok_or_else(|| malformed(index, "YESNO question needs correctBool"))?;
                    Ok(Question::yes_no(record.text, correct))
                }
                QuestionKind::Multi => {
                    let correct = record
                        .correct_index
                        .ok_or_else(|| malformed(index, "MULTI question needs correctIndex"))?;
                    Question::multi(record.text, record.options, correct).ok_or_else(|| {
                        malformed(index, "MULTI question needs at least 2 options and a valid correctIndex")
                    })
                }
            }
        })
        .collect()
}

fn parse_txt(text: &str) -> Result<Vec<Question>, ImportError> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
        .iter()
        .enumerate()
        .map(|(i, block)| parse_block(i + 1, block))
        .collect()
}

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<Question>, ImportError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))?;
    let Some(sheet) = workbook.worksheet_range_at(0) else {
        return Err(ImportError::Empty);
    };
    let sheet = sheet?;

    sheet
        .rows()
        .map(|row| (cell(row, 0), cell(row, 1), cell(row, 2)))
        .filter(|(text, _, _)| !text.is_empty())
        .enumerate()
        .map(|(i, (text, second, third))| parse_row(i + 1, &text, &second, &third))
        .collect()
}

/// Cell text, trimmed. Numbers keep their plain form, so `3.0` reads as `3`.
fn cell(row: &[Data], column: usize) -> String {
    row.get(column)
        .map(|c| c.to_string().trim().to_string())
        .unwrap_or_default()
}

fn parse_block(index: usize, block: &[&str]) -> Result<Question, ImportError> {
    let [text, second, third, ..] = block else {
        return Err(malformed(index, "block must have at least 3 lines"));
    };
    parse_row(index, text, second, third)
}

/// Question text, answer layout and correct answer, as in a TXT block.
fn parse_row(index: usize, text: &str, second: &str, third: &str) -> Result<Question, ImportError> {
    let layout = second.to_lowercase();
    if layout == "yesno" || layout.contains("да") || layout.contains("нет") {
        let correct = parse_bool(third).ok_or_else(|| malformed(index, format!("cannot read yes/no answer '{third}'")))?;
        return Ok(Question::yes_no(text, correct));
    }

    let options: Vec<String> = second
        .split(';')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect();
    if options.len() < 2 {
        return Err(malformed(index, "multiple choice needs at least 2 options"));
    }

    let correct = parse_correct_index(third, &options).map_err(|reason| malformed(index, reason))?;
    Question::multi(text, options, correct).ok_or_else(|| malformed(index, "invalid multiple choice question"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "да" | "yes" | "true" | "1" => Some(true),
        "нет" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Accepts a 1-based index or the text of one of the options.
fn parse_correct_index(value: &str, options: &[String]) -> Result<usize, String> {
    let value = value.trim();

    if let Ok(n) = value.parse::<usize>() {
        return match n.checked_sub(1) {
            Some(idx) if idx < options.len() => Ok(idx),
            _ => Err(format!("correct index {n} is out of range")),
        };
    }

    let lowered = value.to_lowercase();
    options
        .iter()
        .position(|o| o.to_lowercase() == lowered)
        .ok_or_else(|| format!("correct answer '{value}' is not one of the options"))
}

fn malformed(index: usize, reason: impl Into<String>) -> ImportError {
    ImportError::Malformed {
        index,
        reason: reason.into(),
    }
}
