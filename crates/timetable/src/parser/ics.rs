//! iCalendar feed decoding.
//!
//! Each feed describes one group. Events are expanded through their recurrence rules
//! into dated occurrences and placed by week number, counted from the anchor Monday.

use super::text::{abbreviate_name, split_location};
use crate::calendar::{week_number, AnchorPolicy, PairTimes};
use crate::error::TimetableError;
use crate::model::{GroupSchedules, LessonData, LessonTypes, ScheduleResult, Weekday};
use chrono::{Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, info};

/// Hard stop for runaway recurrence rules.
const MAX_OCCURRENCES: usize = 1000;

const WEEK_MARKER: &str = "неделя";
const SINGLE_TEACHER_LABEL: &str = "Преподаватель:";
const MULTI_TEACHER_LABEL: &str = "Преподаватели:";

/// A property line after unfolding, e.g. `DTSTART;TZID=Europe/Moscow:20240902T090000`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContentLine {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl ContentLine {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Start or exception timestamp of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timestamp {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Timestamp {
    fn date(self) -> NaiveDate {
        match self {
            Timestamp::Date(date) => date,
            Timestamp::DateTime(dt) => dt.date(),
        }
    }

    /// Whether an occurrence at `at` is cancelled by this exception date.
    fn excludes(self, at: NaiveDateTime) -> bool {
        match self {
            Timestamp::Date(date) => date == at.date(),
            Timestamp::DateTime(dt) => dt == at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Recurrence {
    frequency: Frequency,
    interval: u32,
    until: Option<Timestamp>,
    count: Option<u32>,
}

#[derive(Debug, Default)]
struct RawEvent {
    start: Option<Timestamp>,
    summary: String,
    description: String,
    location: String,
    rule: Option<String>,
    exdates: Vec<Timestamp>,
}

/// Decodes calendar feeds into nominal schedules spanning the whole semester.
#[derive(Debug, Clone)]
pub struct CalendarParser {
    lesson_types: LessonTypes,
    pair_times: PairTimes,
    total_weeks: u8,
    anchor_policy: AnchorPolicy,
    utc_offset: Duration,
}

impl CalendarParser {
    pub fn new(lesson_types: LessonTypes, pair_times: PairTimes, total_weeks: u8) -> Self {
        Self {
            lesson_types,
            pair_times,
            total_weeks,
            anchor_policy: AnchorPolicy::default(),
            utc_offset: Duration::minutes(180),
        }
    }

    pub fn with_anchor_policy(mut self, policy: AnchorPolicy) -> Self {
        self.anchor_policy = policy;
        self
    }

    /// Offset added to UTC (`Z`) timestamps to get local wall-clock time.
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset = Duration::minutes(minutes as i64);
        self
    }

    /// Parses a feed, naming the group after its `X-WR-CALNAME`.
    pub fn parse(&self, bytes: &[u8]) -> Result<GroupSchedules, TimetableError> {
        self.parse_inner(bytes, None, None)
    }

    /// Parses a feed, naming the group `group_name` whatever the feed calls itself.
    pub fn parse_as(&self, bytes: &[u8], group_name: &str) -> Result<GroupSchedules, TimetableError> {
        self.parse_inner(bytes, Some(group_name), None)
    }

    /// Parses a feed, using `fallback` only when the feed carries no `X-WR-CALNAME`.
    pub fn parse_or_named(
        &self,
        bytes: &[u8],
        fallback: &str,
    ) -> Result<GroupSchedules, TimetableError> {
        self.parse_inner(bytes, None, Some(fallback))
    }

    fn parse_inner(
        &self,
        bytes: &[u8],
        name_override: Option<&str>,
        fallback: Option<&str>,
    ) -> Result<GroupSchedules, TimetableError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| TimetableError::parse("ics", format!("not valid UTF-8: {}", e)))?;
        let text = text.trim_start_matches('\u{feff}');
        let lines: Vec<ContentLine> = unfold(text)
            .iter()
            .filter_map(|line| parse_content_line(line))
            .collect();

        if !lines
            .iter()
            .any(|l| l.name == "BEGIN" && l.value.eq_ignore_ascii_case("VCALENDAR"))
        {
            return Err(TimetableError::parse("ics", "missing BEGIN:VCALENDAR"));
        }

        let (calendar_name, events) = self.collect_events(&lines);
        let group_name = name_override
            .map(str::to_string)
            .or(calendar_name)
            .or_else(|| fallback.map(str::to_string))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| TimetableError::parse("ics", "calendar has no X-WR-CALNAME"))?;

        let earliest = events
            .iter()
            .filter_map(|event| match event.start {
                Some(Timestamp::DateTime(dt)) => Some(dt.date()),
                _ => None,
            })
            .min();
        let Some(earliest) = earliest else {
            debug!(group = %group_name, "Calendar has no timed events");
            return Ok(GroupSchedules::new());
        };
        let anchor = self
            .anchor_policy
            .resolve(Some(earliest))
            .unwrap_or(earliest);

        let mut schedule = ScheduleResult::new(group_name.clone());
        schedule.anchor = Some(anchor);
        let mut skipped = 0usize;
        for event in &events {
            if !self.add_event(event, anchor, &mut schedule)? {
                skipped += 1;
            }
        }

        info!(
            group = %group_name,
            anchor = %anchor,
            events = events.len(),
            skipped,
            lessons = schedule.lesson_count(),
            "Parsed calendar feed"
        );

        let mut groups = GroupSchedules::new();
        groups.insert(group_name, schedule);
        Ok(groups)
    }

    /// Splits the line stream into the calendar name and its VEVENTs.
    fn collect_events(&self, lines: &[ContentLine]) -> (Option<String>, Vec<RawEvent>) {
        let mut calendar_name = None;
        let mut events = Vec::new();
        let mut current: Option<RawEvent> = None;
        // Depth of components nested inside the current event (e.g. VALARM)
        let mut nested = 0usize;

        for line in lines {
            match (line.name.as_str(), current.as_mut()) {
                ("BEGIN", None) if line.value.eq_ignore_ascii_case("VEVENT") => {
                    current = Some(RawEvent::default());
                    nested = 0;
                }
                ("BEGIN", Some(_)) => nested += 1,
                ("END", Some(_)) if nested > 0 => nested -= 1,
                ("END", Some(_)) if line.value.eq_ignore_ascii_case("VEVENT") => {
                    if let Some(event) = current.take() {
                        events.push(event);
                    }
                }
                ("X-WR-CALNAME", None) => calendar_name = Some(unescape_text(&line.value)),
                (_, Some(event)) if nested == 0 => self.apply_property(event, line),
                _ => {}
            }
        }
        (calendar_name, events)
    }

    fn apply_property(&self, event: &mut RawEvent, line: &ContentLine) {
        match line.name.as_str() {
            "DTSTART" => event.start = self.parse_timestamp(line),
            "SUMMARY" => event.summary = unescape_text(&line.value),
            "DESCRIPTION" => event.description = unescape_text(&line.value),
            "LOCATION" => event.location = unescape_text(&line.value),
            "RRULE" => event.rule = Some(line.value.clone()),
            "EXDATE" => {
                for value in line.value.split(',') {
                    let single = ContentLine {
                        value: value.to_string(),
                        ..line.clone()
                    };
                    if let Some(ts) = self.parse_timestamp(&single) {
                        event.exdates.push(ts);
                    }
                }
            }
            _ => {}
        }
    }

    fn parse_timestamp(&self, line: &ContentLine) -> Option<Timestamp> {
        let value = line.value.trim();
        let date_only = line
            .param("VALUE")
            .map(|v| v.eq_ignore_ascii_case("DATE"))
            .unwrap_or(false);
        parse_timestamp_value(value, date_only, self.utc_offset)
    }

    /// Places every occurrence of one event. Returns false if the event was skipped.
    fn add_event(
        &self,
        event: &RawEvent,
        anchor: NaiveDate,
        schedule: &mut ScheduleResult,
    ) -> Result<bool, TimetableError> {
        let Some(Timestamp::DateTime(start)) = event.start else {
            return Ok(false);
        };

        let summary = event.summary.trim();
        if summary.contains(WEEK_MARKER) && summary.split_whitespace().count() <= 2 {
            return Ok(false);
        }

        let Some(pair) = self.pair_times.pair_for_start(start.time()) else {
            debug!(summary = %summary, time = %start.time(), "Event start matches no pair");
            return Ok(false);
        };

        let (lesson_type, subject) = match self.lesson_types.strip_prefix(summary) {
            Some((lesson_type, subject)) => (lesson_type.clone(), subject.to_string()),
            None => (self.lesson_types.default_type(), summary.to_string()),
        };
        if subject.is_empty() {
            return Ok(false);
        }

        let (rooms, campuses) = split_location(&event.location);
        let teachers = extract_teachers(&event.description);
        let rule = event.rule.as_deref().map(parse_rule).transpose()?;

        for at in self.occurrences(start, rule.as_ref(), &event.exdates, anchor) {
            let week = week_number(anchor, at.date());
            if week < 1 || week > self.total_weeks as i64 {
                continue;
            }
            let lesson = LessonData {
                subject: subject.clone(),
                teachers: teachers.clone(),
                rooms: rooms.clone(),
                campus: campuses.join(", "),
                lesson_type: lesson_type.code.clone(),
                lesson_type_id: lesson_type.id,
                date: Some(at.date()),
            };
            schedule.insert(week as u8, Weekday::from_date(at.date()), pair, lesson);
        }
        Ok(true)
    }

    /// Expands an event into its occurrence timestamps, minus exception dates.
    ///
    /// Without an UNTIL the series stops `total_weeks` weeks after the anchor.
    fn occurrences(
        &self,
        start: NaiveDateTime,
        rule: Option<&Recurrence>,
        exdates: &[Timestamp],
        anchor: NaiveDate,
    ) -> Vec<NaiveDateTime> {
        let keep = |at: &NaiveDateTime| !exdates.iter().any(|ex| ex.excludes(*at));

        let Some(rule) = rule else {
            return [start].into_iter().filter(keep).collect();
        };

        let limit = match rule.until {
            Some(Timestamp::DateTime(dt)) => dt,
            Some(Timestamp::Date(date)) => date.and_time(NaiveTime::MIN) + Duration::days(1)
                - Duration::seconds(1),
            None => (anchor + Duration::weeks(self.total_weeks as i64)).and_time(start.time()),
        };

        let mut result = Vec::new();
        for step in 0..MAX_OCCURRENCES as u32 {
            if rule.count.is_some_and(|count| step >= count) {
                break;
            }
            let Some(at) = advance(start, rule.frequency, step.saturating_mul(rule.interval)) else {
                break;
            };
            if at > limit {
                break;
            }
            if keep(&at) {
                result.push(at);
            }
        }
        result
    }
}

/// `start` moved forward by `steps` units of `frequency`.
fn advance(start: NaiveDateTime, frequency: Frequency, steps: u32) -> Option<NaiveDateTime> {
    match frequency {
        Frequency::Daily => start.checked_add_signed(Duration::days(steps as i64)),
        Frequency::Weekly => start.checked_add_signed(Duration::weeks(steps as i64)),
        Frequency::Monthly => start.checked_add_months(Months::new(steps)),
        Frequency::Yearly => start.checked_add_months(Months::new(steps.checked_mul(12)?)),
    }
}

fn parse_rule(value: &str) -> Result<Recurrence, TimetableError> {
    let mut rule = Recurrence {
        frequency: Frequency::Weekly,
        interval: 1,
        until: None,
        count: None,
    };

    for part in value.split(';') {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        let val = val.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "FREQ" => {
                rule.frequency = match val.to_ascii_uppercase().as_str() {
                    "DAILY" => Frequency::Daily,
                    "MONTHLY" => Frequency::Monthly,
                    "YEARLY" => Frequency::Yearly,
                    _ => Frequency::Weekly,
                }
            }
            "INTERVAL" => {
                rule.interval = val
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| TimetableError::parse("ics", format!("bad INTERVAL {:?}", val)))?
            }
            "COUNT" => {
                rule.count = Some(val.parse().map_err(|_| {
                    TimetableError::parse("ics", format!("bad COUNT {:?}", val))
                })?)
            }
            "UNTIL" => {
                let date_only = !val.contains('T');
                // UNTIL is compared in wall-clock time like DTSTART
                rule.until = Some(
                    parse_timestamp_value(val, date_only, Duration::zero()).ok_or_else(|| {
                        TimetableError::parse("ics", format!("bad UNTIL {:?}", val))
                    })?,
                );
            }
            _ => {}
        }
    }
    Ok(rule)
}

fn parse_timestamp_value(value: &str, date_only: bool, utc_offset: Duration) -> Option<Timestamp> {
    if date_only || !value.contains('T') {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .map(Timestamp::Date);
    }
    match value.strip_suffix('Z') {
        Some(utc) => NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|dt| Timestamp::DateTime(dt + utc_offset)),
        None => NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
            .ok()
            .map(Timestamp::DateTime),
    }
}

/// Reads teacher names from the event description and abbreviates them.
fn extract_teachers(description: &str) -> Vec<String> {
    if let Some((_, rest)) = description.split_once(SINGLE_TEACHER_LABEL) {
        let name = rest.lines().next().unwrap_or("").trim();
        return if name.is_empty() {
            Vec::new()
        } else {
            vec![abbreviate_name(name)]
        };
    }
    if let Some((_, rest)) = description.split_once(MULTI_TEACHER_LABEL) {
        let section = rest.split("\n\n").next().unwrap_or("");
        return section
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(abbreviate_name)
            .collect();
    }
    Vec::new()
}

/// Joins folded lines (continuations start with a space or tab).
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(continuation) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(continuation);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

fn parse_content_line(line: &str) -> Option<ContentLine> {
    let mut in_quotes = false;
    let mut colon = None;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(index);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts
        .filter_map(|part| part.split_once('='))
        .map(|(key, val)| (key.trim().to_ascii_uppercase(), val.trim_matches('"').to_string()))
        .collect();

    Some(ContentLine {
        name,
        params,
        value: value.to_string(),
    })
}

/// Reverses TEXT escaping (`\n`, `\,`, `\;`, `\\`).
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
