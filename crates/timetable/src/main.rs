//! `timetable` command-line front end. Every command prints JSON to stdout.

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timetable::calendar::{self, AnchorPolicy, SemesterCode};
use timetable::model::GroupSchedules;
use timetable::parser::{self, ParseOptions, SourceFormat};
use timetable::query::{EntityRef, ScheduleQueries};
use timetable::{Importer, ScheduleDiffEngine, ScheduleDownloader, ScheduleStore, TimetableConfig};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "timetable", version, about = "Normalize, expand and compare university timetables")]
struct Cli {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding the configured path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse an .xlsx or .ics file and print the nominal schedules
    Parse {
        file: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Parse a file, store it and rebuild the semester occurrences of its groups
    Import {
        file: PathBuf,
        #[arg(long)]
        semester: SemesterCode,
        #[arg(long, default_value_t = 1)]
        version: i64,
        /// Store as an official schedule
        #[arg(long)]
        official: bool,
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Compare a file against an older file, or against what is stored
    Compare {
        /// Newer version
        file: PathBuf,
        /// Older version; when omitted, stored occurrences of `--semester` are used
        #[arg(long)]
        before: Option<PathBuf>,
        #[arg(long, required_unless_present = "before")]
        semester: Option<SemesterCode>,
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Lessons of a group, teacher or room between two dates
    Schedule {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        entity: EntityArgs,
    },

    /// Pairs a group, teacher or room has free between two dates
    FreeSlots {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        entity: EntityArgs,
    },

    /// Search groups, teachers, disciplines and rooms by substring
    Search {
        term: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Week number and parity for a date (today by default)
    Week {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Download group calendars from the schedule service
    Download {
        #[arg(required = true)]
        groups: Vec<String>,
        /// Store each group as it arrives
        #[arg(long, requires = "semester")]
        import: bool,
        #[arg(long)]
        semester: Option<SemesterCode>,
        #[arg(long, default_value_t = 1)]
        version: i64,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Override the format guessed from the file extension
    #[arg(long)]
    format: Option<String>,
    /// Group name for calendars without X-WR-CALNAME
    #[arg(long)]
    group_name: Option<String>,
    /// Number calendar weeks from this semester's institutional start
    #[arg(long)]
    institutional: Option<SemesterCode>,
}

#[derive(Args)]
struct RangeArgs {
    #[arg(long)]
    semester: SemesterCode,
    /// First date (defaults to the semester start)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last date (defaults to the semester end)
    #[arg(long)]
    to: Option<NaiveDate>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct EntityArgs {
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    teacher: Option<String>,
    #[arg(long)]
    room: Option<String>,
}

impl EntityArgs {
    fn entity(&self) -> anyhow::Result<EntityRef> {
        match (&self.group, &self.teacher, &self.room) {
            (Some(group), _, _) => Ok(EntityRef::Group(group.clone())),
            (_, Some(teacher), _) => Ok(EntityRef::Teacher(teacher.clone())),
            (_, _, Some(room)) => Ok(EntityRef::Room(room.clone())),
            _ => bail!("one of --group, --teacher or --room is required"),
        }
    }
}

impl RangeArgs {
    fn dates(&self, total_weeks: u8) -> (NaiveDate, NaiveDate) {
        let (start, end) = calendar::semester_bounds(self.semester, total_weeks);
        (self.from.unwrap_or(start), self.to.unwrap_or(end))
    }
}

impl SourceArgs {
    fn options(&self, config: &TimetableConfig) -> ParseOptions {
        let mut options = ParseOptions::from_config(config);
        if let Some(semester) = self.institutional {
            options = options.with_anchor_policy(AnchorPolicy::Institutional(semester));
        }
        if let Some(name) = &self.group_name {
            options = options.with_fallback_group_name(name.clone());
        }
        options
    }

    fn extension(&self, file: &Path) -> anyhow::Result<String> {
        match &self.format {
            Some(format) => Ok(format.clone()),
            None => Ok(SourceFormat::from_path(file)?.as_str().to_string()),
        }
    }

    fn parse(&self, file: &Path, config: &TimetableConfig) -> anyhow::Result<GroupSchedules> {
        let bytes = std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
        let parsed = parser::convert(&bytes, &self.extension(file)?, &self.options(config))
            .with_context(|| format!("cannot parse {}", file.display()))?;
        Ok(parsed.groups)
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Turns the first Ctrl-C into a cancellation signal.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining downloads");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = TimetableConfig::load_or_default(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    let open_store = |config: &TimetableConfig| -> anyhow::Result<Arc<ScheduleStore>> {
        let store = ScheduleStore::open(&config.database_path)
            .with_context(|| format!("cannot open {}", config.database_path.display()))?;
        Ok(Arc::new(store))
    };

    match cli.command {
        Command::Parse { file, source } => {
            let groups = source.parse(&file, &config)?;
            print_json(&groups)?;
        }

        Command::Import {
            file,
            semester,
            version,
            official,
            source,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let importer = Importer::new(open_store(&config)?, &config).with_options(source.options(&config));
            let result = importer
                .import_bytes(&bytes, &source.extension(&file)?, semester, version, official)
                .await?;
            print_json(&result)?;
        }

        Command::Compare {
            file,
            before,
            semester,
            source,
        } => {
            let after = source.parse(&file, &config)?;
            let before = match (before, semester) {
                (Some(path), _) => source.parse(&path, &config)?,
                (None, Some(semester)) => {
                    let store = open_store(&config)?;
                    let queries = ScheduleQueries::new(&store, &config.lesson_types, config.total_weeks);
                    let (start, end) = calendar::semester_bounds(semester, config.total_weeks);
                    let mut stored = GroupSchedules::new();
                    for name in after.keys() {
                        match queries.nominal_from_occurrences(semester, name, start, end) {
                            Ok(schedule) => {
                                stored.insert(name.clone(), schedule);
                            }
                            Err(timetable::TimetableError::NotFound { .. }) => {
                                info!(group = %name, "Group has nothing stored yet");
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    stored
                }
                (None, None) => bail!("either --before or --semester is required"),
            };
            let report = ScheduleDiffEngine::new().compare(&before, &after);
            print_json(&report)?;
        }

        Command::Schedule { range, entity } => {
            let store = open_store(&config)?;
            let queries = ScheduleQueries::new(&store, &config.lesson_types, config.total_weeks);
            let (from, to) = range.dates(config.total_weeks);
            let views = queries.schedule_for(range.semester, from, to, &entity.entity()?)?;
            print_json(&views)?;
        }

        Command::FreeSlots { range, entity } => {
            let store = open_store(&config)?;
            let queries = ScheduleQueries::new(&store, &config.lesson_types, config.total_weeks);
            let (from, to) = range.dates(config.total_weeks);
            let free = queries.free_slots(range.semester, from, to, &entity.entity()?)?;
            print_json(&free)?;
        }

        Command::Search { term, limit } => {
            let store = open_store(&config)?;
            let queries = ScheduleQueries::new(&store, &config.lesson_types, config.total_weeks);
            print_json(&queries.search(&term, limit)?)?;
        }

        Command::Week { date } => {
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let semester = SemesterCode::current(today);
            print_json(&calendar::week_info(semester, today, config.total_weeks))?;
        }

        Command::Download {
            groups,
            import,
            semester,
            version,
        } => {
            let downloader = ScheduleDownloader::new(config.download.clone())?;
            let cancel = cancel_on_ctrl_c();
            match semester.filter(|_| import) {
                Some(semester) => {
                    let importer = Importer::new(open_store(&config)?, &config);
                    let report = importer
                        .bulk_import(&downloader, &groups, semester, version, cancel)
                        .await?;
                    print_json(&report)?;
                }
                None => {
                    let parser = ParseOptions::from_config(&config).calendar_parser();
                    let report = downloader.download_all(&groups, &parser, cancel).await?;
                    print_json(&report)?;
                }
            }
        }
    }

    Ok(())
}
