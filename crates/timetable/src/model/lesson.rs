use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single lesson in a nominal slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LessonData {
    pub subject: String,
    /// Abbreviated teacher names in source order
    #[serde(default)]
    pub teachers: Vec<String>,
    #[serde(default)]
    pub rooms: Vec<String>,
    #[serde(default)]
    pub campus: String,
    pub lesson_type: String,
    pub lesson_type_id: u8,
    /// Concrete date for calendar-sourced lessons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl LessonData {
    /// A slot only counts as a lesson when it has a subject.
    pub fn is_real(&self) -> bool {
        !self.subject.trim().is_empty()
    }

    pub fn teacher_display(&self) -> String {
        self.teachers.join(", ")
    }

    pub fn room_display(&self) -> String {
        self.rooms.join(", ")
    }
}

/// A lesson kind such as lecture or lab, identified by its short code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonType {
    pub code: String,
    pub id: u8,
}

/// Registry of known lesson-type codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonTypes {
    pub types: Vec<LessonType>,
    /// Code applied when a summary carries no recognizable prefix
    pub default_code: String,
}

impl LessonTypes {
    /// Exact code lookup, ignoring surrounding whitespace.
    pub fn lookup(&self, code: &str) -> Option<&LessonType> {
        let code = code.trim();
        self.types.iter().find(|t| t.code == code)
    }

    pub fn by_id(&self, id: u8) -> Option<&LessonType> {
        self.types.iter().find(|t| t.id == id)
    }

    pub fn default_type(&self) -> LessonType {
        self.lookup(&self.default_code)
            .cloned()
            .unwrap_or_else(|| LessonType {
                code: self.default_code.clone(),
                id: 0,
            })
    }

    /// Splits a leading type code off a summary like `"ЛК Математический анализ"`.
    ///
    /// The longest matching code wins and must be followed by whitespace or end the
    /// string. Returns the matched type and the remaining subject text.
    pub fn strip_prefix<'a>(&self, summary: &'a str) -> Option<(&LessonType, &'a str)> {
        let summary = summary.trim_start();
        let mut candidates: Vec<&LessonType> = self.types.iter().collect();
        candidates.sort_by(|a, b| b.code.chars().count().cmp(&a.code.chars().count()));

        candidates.into_iter().find_map(|lesson_type| {
            let rest = summary.strip_prefix(lesson_type.code.as_str())?;
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                Some((lesson_type, rest.trim()))
            } else {
                None
            }
        })
    }
}

impl Default for LessonTypes {
    fn default() -> Self {
        let types = [("ЛК", 1), ("ПР", 2), ("ЛАБ", 3)]
            .into_iter()
            .map(|(code, id)| LessonType {
                code: code.to_string(),
                id,
            })
            .collect();
        Self {
            types,
            default_code: "ПР".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_prefix() {
        let types = LessonTypes::default();
        let (lesson_type, subject) = types.strip_prefix("ЛАБ Физика").unwrap();
        assert_eq!(lesson_type.code, "ЛАБ");
        assert_eq!(lesson_type.id, 3);
        assert_eq!(subject, "Физика");

        assert!(types.strip_prefix("ЛКФизика").is_none());
        assert!(types.strip_prefix("Физика").is_none());
    }

    #[test]
    fn test_default_type() {
        let types = LessonTypes::default();
        assert_eq!(types.default_type().code, "ПР");
        assert_eq!(types.default_type().id, 2);
        assert_eq!(types.lookup(" ЛК ").map(|t| t.id), Some(1));
    }

    #[test]
    fn test_display_joins_lists() {
        let lesson = LessonData {
            subject: "Алгебра".to_string(),
            teachers: vec!["Иванов И.И.".to_string(), "Петров П.П.".to_string()],
            rooms: vec!["А-101".to_string()],
            ..Default::default()
        };
        assert!(lesson.is_real());
        assert_eq!(lesson.teacher_display(), "Иванов И.И., Петров П.П.");
        assert_eq!(lesson.room_display(), "А-101");
        assert!(!LessonData::default().is_real());
    }
}
