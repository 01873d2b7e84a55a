//! Small text normalizers shared by the grid and calendar parsers.

use regex::Regex;
use std::sync::LazyLock;

static ROOM_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:ауд|комп)\.\s+").unwrap());
static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapses runs of whitespace and trims.
pub fn normalize_space(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

/// Converts "Surname Name Patronymic" to "Surname N.P.".
///
/// Names with fewer than three parts (including already abbreviated ones) are kept.
pub fn abbreviate_name(full_name: &str) -> String {
    let parts: Vec<&str> = full_name.split_whitespace().collect();
    if parts.len() < 3 {
        return parts.join(" ");
    }
    let initial = |part: &str| part.chars().next().map(String::from).unwrap_or_default();
    format!("{} {}.{}.", parts[0], initial(parts[1]), initial(parts[2]))
}

/// Splits a teacher cell listing several names by comma, semicolon or line break.
pub fn split_names(cell: &str) -> Vec<String> {
    cell.split([',', ';', '\n'])
        .map(normalize_space)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Splits a grid room cell such as `"ауд. А-419 (В-78)"` into room and campus.
///
/// Only the first token is the room; the second, without parentheses, is the campus.
pub fn split_grid_room(cell: &str) -> (Vec<String>, String) {
    let cleaned = ROOM_PREFIX_REGEX.replace_all(cell, "");
    let mut tokens = cleaned.split_whitespace();
    let rooms = tokens.next().map(|room| vec![room.to_string()]).unwrap_or_default();
    let campus = tokens
        .next()
        .map(|token| token.replace(['(', ')'], ""))
        .unwrap_or_default();
    (rooms, campus)
}

/// Splits a calendar location like `"А-419 (В-78) Б-102 (С-20)"` into rooms and campuses.
///
/// Each bare token is a room; a parenthesized token right after it is that room's
/// campus. Campuses are returned deduplicated in room order.
pub fn split_location(location: &str) -> (Vec<String>, Vec<String>) {
    let tokens: Vec<&str> = location.split_whitespace().collect();
    let mut rooms = Vec::new();
    let mut campuses: Vec<String> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token.starts_with('(') {
            i += 1;
            continue;
        }
        rooms.push(token.to_string());
        match tokens.get(i + 1) {
            Some(next) if next.starts_with('(') => {
                let campus = next.replace(['(', ')'], "");
                if !campus.is_empty() && !campuses.contains(&campus) {
                    campuses.push(campus);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    (rooms, campuses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_name() {
        assert_eq!(abbreviate_name("Иванов Иван Иванович"), "Иванов И.И.");
        assert_eq!(abbreviate_name("Иванов И.И."), "Иванов И.И.");
        assert_eq!(abbreviate_name("  Smith   John  "), "Smith John");
    }

    #[test]
    fn test_split_names() {
        assert_eq!(
            split_names("Иванов И.И., Петров  П.П.\nСидоров С.С."),
            vec!["Иванов И.И.", "Петров П.П.", "Сидоров С.С."]
        );
        assert!(split_names(" , ").is_empty());
    }

    #[test]
    fn test_split_grid_room() {
        let (rooms, campus) = split_grid_room("ауд. А-419 (В-78)");
        assert_eq!(rooms, vec!["А-419"]);
        assert_eq!(campus, "В-78");

        let (rooms, campus) = split_grid_room("комп. ИВЦ-101");
        assert_eq!(rooms, vec!["ИВЦ-101"]);
        assert_eq!(campus, "");

        let (rooms, campus) = split_grid_room("");
        assert!(rooms.is_empty());
        assert!(campus.is_empty());
    }

    #[test]
    fn test_split_location_multi_room() {
        let (rooms, campuses) = split_location("А-419 (В-78) Б-102 (В-78) ИВЦ-2 (С-20)");
        assert_eq!(rooms, vec!["А-419", "Б-102", "ИВЦ-2"]);
        assert_eq!(campuses, vec!["В-78", "С-20"]);

        let (rooms, campuses) = split_location("Дистанционно");
        assert_eq!(rooms, vec!["Дистанционно"]);
        assert!(campuses.is_empty());
    }
}
