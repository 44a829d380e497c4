use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::database::KeyValueStore;
use crate::history;
use crate::models::{ResetPolicy, Task};
use crate::preferences::{Theme, TimeFormat};
use crate::scheduler::{ResetOutcome, ResetPlan, ResetScheduler};
use crate::store::{StateStore, StoreError};
use crate::utils::{ParseError, parse_interval, parse_time_of_day};

#[derive(Parser)]
#[command(name = "checkloop")]
#[command(about = "Recurring checklists whose tasks reset themselves")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show categories and tasks (default if no subcommand)
    List,
    /// Create a category
    AddCategory {
        /// Category name (unique, case-insensitive)
        name: String,
    },
    /// Delete a category and all of its tasks
    DeleteCategory {
        /// Category name or id
        category: String,
    },
    /// Add a task to a category
    AddTask {
        /// Category name or id
        category: String,
        /// Task text (unique within the category, case-insensitive)
        text: String,
        /// Reset this long after completion, e.g. 30m, 2h, 1d
        #[arg(long, conflicts_with = "at")]
        every: Option<String>,
        /// Reset at this local time of day (HH:MM)
        #[arg(long)]
        at: Option<String>,
        /// Interval tasks never reset; time-of-day tasks are removed instead
        #[arg(long)]
        one_time: bool,
    },
    /// Delete a task
    DeleteTask {
        /// Category name or id
        category: String,
        /// Task text or id
        task: String,
    },
    /// Mark a task as done
    Check {
        /// Category name or id
        category: String,
        /// Task text or id
        task: String,
    },
    /// Mark a task as not done
    Uncheck {
        /// Category name or id
        category: String,
        /// Task text or id
        task: String,
    },
    /// Set the task order of a category
    Reorder {
        /// Category name or id
        category: String,
        /// Every task of the category (text or id), in the new order
        #[arg(required = true)]
        tasks: Vec<String>,
    },
    /// Show the completion history grouped by category
    History {
        /// Remove the entry with this number (and any identical entries)
        #[arg(long)]
        remove: Option<usize>,
    },
    /// Show or change display preferences
    Prefs {
        /// day or night
        #[arg(long)]
        theme: Option<String>,
        /// 12h or 24h
        #[arg(long)]
        time_format: Option<String>,
    },
    /// Keep running and reset tasks as they fall due
    Watch,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    StoreError(#[from] StoreError),
    #[error("{0}")]
    ParseError(#[from] ParseError),
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Handle the list command
pub fn handle_list<S: KeyValueStore>(
    store: &StateStore<S>,
    scheduler: &ResetScheduler,
    now: DateTime<Utc>,
) -> Result<(), CliError> {
    let time_format = store.preferences()?.time_format;
    if store.categories().is_empty() {
        println!("No categories yet. Create one with `checkloop add-category <name>`.");
        return Ok(());
    }

    for category in store.categories() {
        println!("{} ({})", category.name, category.id);
        if category.tasks.is_empty() {
            println!("  (no tasks)");
        }
        for task in &category.tasks {
            let mark = if task.completed { "x" } else { " " };
            let mut line = format!("  [{}] {}  {}", mark, task.text, task.badge());
            if let ResetPlan::Arm { due } = scheduler.compute_next_reset(task, now) {
                let verb = if task.is_removed_on_reset() { "removed" } else { "resets" };
                line.push_str(&format!(
                    "  ({} {})",
                    verb,
                    time_format.timestamp(&due.with_timezone(&Local))
                ));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

/// Handle the add-category command
pub fn handle_add_category<S: KeyValueStore>(
    name: String,
    store: &mut StateStore<S>,
) -> Result<(), CliError> {
    let category = store.create_category(&name)?;
    println!("Category created successfully (ID: {})", category.id);
    Ok(())
}

/// Handle the delete-category command
pub fn handle_delete_category<S: KeyValueStore>(
    category: String,
    store: &mut StateStore<S>,
) -> Result<(), CliError> {
    let category_id = resolve_category(store, &category)?;
    store.delete_category(&category_id)?;
    println!("Category deleted ({})", category_id);
    Ok(())
}

/// Handle the add-task command
pub fn handle_add_task<S: KeyValueStore>(
    category: String,
    text: String,
    every: Option<String>,
    at: Option<String>,
    one_time: bool,
    default_interval_ms: u64,
    store: &mut StateStore<S>,
) -> Result<(), CliError> {
    let category_id = resolve_category(store, &category)?;
    let policy = policy_from_args(every.as_deref(), at.as_deref(), default_interval_ms)?;
    let task = store.add_task(&category_id, &text, policy, one_time)?;
    println!("Task created successfully (ID: {}) {}", task.id, task.badge());
    Ok(())
}

/// Handle the delete-task command
pub fn handle_delete_task<S: KeyValueStore>(
    category: String,
    task: String,
    store: &mut StateStore<S>,
) -> Result<(), CliError> {
    let (category_id, task_id) = resolve_task(store, &category, &task)?;
    store.delete_task(&category_id, &task_id)?;
    println!("Task deleted ({})", task_id);
    Ok(())
}

/// Handle the check command: complete the task and arm its reset
pub fn handle_check<S: KeyValueStore>(
    category: String,
    task: String,
    store: &mut StateStore<S>,
    scheduler: &mut ResetScheduler,
    now: DateTime<Utc>,
) -> Result<(), CliError> {
    let (category_id, task_id) = resolve_task(store, &category, &task)?;
    let Some(updated) = store.set_completed(&category_id, &task_id, true, now)? else {
        println!("Already done: {}", task);
        return Ok(());
    };

    let time_format = store.preferences()?.time_format;
    match scheduler.schedule(store, &category_id, &task_id, now)? {
        ResetPlan::Arm { due } => println!(
            "Done: {} ({} {})",
            updated.text,
            if updated.is_removed_on_reset() { "removed" } else { "resets" },
            time_format.timestamp(&due.with_timezone(&Local))
        ),
        ResetPlan::Idle | ResetPlan::Overdue => println!("Done: {}", updated.text),
    }
    Ok(())
}

/// Handle the uncheck command
pub fn handle_uncheck<S: KeyValueStore>(
    category: String,
    task: String,
    store: &mut StateStore<S>,
    now: DateTime<Utc>,
) -> Result<(), CliError> {
    let (category_id, task_id) = resolve_task(store, &category, &task)?;
    match store.set_completed(&category_id, &task_id, false, now)? {
        Some(updated) => println!("Not done: {}", updated.text),
        None => println!("Already not done: {}", task),
    }
    Ok(())
}

/// Handle the reorder command
pub fn handle_reorder<S: KeyValueStore>(
    category: String,
    tasks: Vec<String>,
    store: &mut StateStore<S>,
) -> Result<(), CliError> {
    let category_id = resolve_category(store, &category)?;
    let ordered_ids = tasks
        .iter()
        .map(|t| resolve_task(store, &category_id, t).map(|(_, task_id)| task_id))
        .collect::<Result<Vec<_>, _>>()?;

    if store.reorder_tasks(&category_id, &ordered_ids)? {
        println!("Order updated");
    } else {
        println!("Order unchanged: list every task of the category exactly once");
    }
    Ok(())
}

/// Handle the history command
pub fn handle_history<S: KeyValueStore>(
    remove: Option<usize>,
    store: &mut StateStore<S>,
) -> Result<(), CliError> {
    let records = store.history()?;

    if let Some(number) = remove {
        let record = number
            .checked_sub(1)
            .and_then(|i| records.get(i))
            .ok_or_else(|| CliError::InvalidArgument(format!("no history entry #{}", number)))?;
        let removed = store.remove_history_entry(record)?;
        println!("Removed {} history entr{}", removed, if removed == 1 { "y" } else { "ies" });
        return Ok(());
    }

    if records.is_empty() {
        println!("No completed tasks yet.");
        return Ok(());
    }

    let time_format = store.preferences()?.time_format;
    for (category, group) in history::group_by_category(&records) {
        println!("{}", category);
        for record in &group {
            let number = records.iter().position(|r| r == record).map_or(0, |i| i + 1);
            println!(
                "  #{:<3} {}  {}",
                number,
                record.task,
                time_format.timestamp(&record.completed_at.with_timezone(&Local))
            );
        }
    }
    Ok(())
}

/// Handle the prefs command
pub fn handle_prefs<S: KeyValueStore>(
    theme: Option<String>,
    time_format: Option<String>,
    store: &mut StateStore<S>,
) -> Result<(), CliError> {
    if let Some(theme) = theme {
        let theme: Theme = theme.parse().map_err(CliError::InvalidArgument)?;
        store.set_theme(theme)?;
    }
    if let Some(time_format) = time_format {
        let time_format: TimeFormat = time_format.parse().map_err(CliError::InvalidArgument)?;
        store.set_time_format(time_format)?;
    }

    let prefs = store.preferences()?;
    println!("theme = {}", prefs.theme);
    println!("time format = {}", prefs.time_format);
    Ok(())
}

/// Handle the watch command. Runs until the process is interrupted.
pub fn handle_watch<S: KeyValueStore>(
    store: &mut StateStore<S>,
    scheduler: &mut ResetScheduler,
    tick: Duration,
) -> Result<(), CliError> {
    println!("Watching for resets ({} armed). Press Ctrl+C to stop.", scheduler.pending());
    scheduler.run(store, tick, |outcomes| {
        for outcome in outcomes {
            match outcome {
                ResetOutcome::Reset { task_id, .. } => println!("Reset {}", task_id),
                ResetOutcome::Removed { task_id, .. } => println!("Removed {}", task_id),
                ResetOutcome::Stale { .. } => {}
            }
        }
        true
    })?;
    Ok(())
}

/// Build a reset policy from the `--every` / `--at` flags
pub fn policy_from_args(
    every: Option<&str>,
    at: Option<&str>,
    default_interval_ms: u64,
) -> Result<ResetPolicy, CliError> {
    match (every, at) {
        (Some(_), Some(_)) => Err(CliError::InvalidArgument(
            "use either --every or --at, not both".to_string(),
        )),
        (None, Some(at)) => {
            let (hour, minute) = parse_time_of_day(at)?;
            Ok(ResetPolicy::time_of_day(hour, minute))
        }
        (Some(every), None) => Ok(ResetPolicy::interval_ms(parse_interval(every)?)),
        (None, None) => Ok(ResetPolicy::interval_ms(default_interval_ms)),
    }
}

fn resolve_category<S: KeyValueStore>(
    store: &StateStore<S>,
    id_or_name: &str,
) -> Result<String, CliError> {
    store
        .find_category(id_or_name)
        .map(|c| c.id.clone())
        .ok_or_else(|| StoreError::CategoryNotFound(id_or_name.to_string()).into())
}

fn resolve_task<S: KeyValueStore>(
    store: &StateStore<S>,
    category: &str,
    id_or_text: &str,
) -> Result<(String, String), CliError> {
    let category = store
        .find_category(category)
        .ok_or_else(|| StoreError::CategoryNotFound(category.to_string()))?;
    let task: &Task = category
        .find_task(id_or_text)
        .ok_or_else(|| StoreError::TaskNotFound(id_or_text.to_string()))?;
    Ok((category.id.clone(), task.id.clone()))
}
