//! Canonical category/task collection and the only code path that mutates it.
//!
//! Every mutation rewrites the whole `categories` key before returning. When
//! that write fails the in-memory collection keeps the change and stays the
//! source of truth; the next successful persist (or [`StateStore::reload`])
//! flushes it.

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::database::{DatabaseError, KeyValueStore};
use crate::history;
use crate::models::{Category, CompletionRecord, ResetPolicy, Task, eq_ignore_case};
use crate::preferences::{Preferences, Theme, TimeFormat};

pub const CATEGORIES_KEY: &str = "categories";
/// High-water mark of issued id suffixes, kept so ids survive deletion plus restart.
pub const ID_SEQUENCE_KEY: &str = "idSequence";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Category already exists: {0}")]
    DuplicateCategory(String),
    #[error("Task already exists in category '{category}': {text}")]
    DuplicateTask { category: String, text: String },
    #[error("Category not found: {0}")]
    CategoryNotFound(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Category name must not be empty")]
    EmptyCategoryName,
    #[error("Task text must not be empty")]
    EmptyTaskText,
    #[error("Invalid reset policy: {0}")]
    InvalidResetPolicy(String),
    #[error("Failed to persist state: {0}")]
    Persistence(#[from] DatabaseError),
    #[error("Stored value for '{key}' is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Receives notifications after the store changes.
pub trait StateObserver {
    fn on_state_changed(&mut self, _categories: &[Category]) {}
    fn on_history_appended(&mut self, _record: &CompletionRecord) {}
}

pub struct StateStore<S: KeyValueStore> {
    kv: S,
    categories: Vec<Category>,
    observers: Vec<Box<dyn StateObserver>>,
    last_id: i64,
    dirty: bool,
}

impl<S: KeyValueStore> StateStore<S> {
    /// Load the category collection from `kv`. A missing key is an empty collection.
    pub fn load(kv: S) -> Result<Self, StoreError> {
        let categories: Vec<Category> = read_json(&kv, CATEGORIES_KEY)?;
        let stored_sequence: i64 = read_json(&kv, ID_SEQUENCE_KEY)?;
        let last_id = stored_sequence.max(highest_id_suffix(&categories));
        info!(
            "event=store_loaded module=store categories={} tasks={}",
            categories.len(),
            categories.iter().map(|c| c.tasks.len()).sum::<usize>()
        );
        Ok(Self {
            kv,
            categories,
            observers: Vec::new(),
            last_id,
            dirty: false,
        })
    }

    /// Re-read the collection from storage so edits made by other processes are seen.
    ///
    /// If an earlier persist failed, the in-memory state is written first; when
    /// that write fails again the in-memory state is kept and the error returned.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        if self.dirty {
            self.persist()?;
        }
        self.categories = read_json(&self.kv, CATEGORIES_KEY)?;
        let stored_sequence: i64 = read_json(&self.kv, ID_SEQUENCE_KEY)?;
        self.last_id = self
            .last_id
            .max(stored_sequence)
            .max(highest_id_suffix(&self.categories));
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Box<dyn StateObserver>) {
        self.observers.push(observer);
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == category_id)
    }

    /// Look a category up by id, then by case-insensitive name.
    pub fn find_category(&self, id_or_name: &str) -> Option<&Category> {
        self.category(id_or_name).or_else(|| {
            self.categories
                .iter()
                .find(|c| eq_ignore_case(&c.name, id_or_name))
        })
    }

    pub fn task(&self, category_id: &str, task_id: &str) -> Option<&Task> {
        self.category(category_id).and_then(|c| c.task(task_id))
    }

    /// `(category_id, task_id)` of every completed task, in collection order.
    pub fn completed_tasks(&self) -> Vec<(String, String)> {
        self.categories
            .iter()
            .flat_map(|c| {
                c.tasks
                    .iter()
                    .filter(|t| t.completed)
                    .map(move |t| (c.id.clone(), t.id.clone()))
            })
            .collect()
    }

    /// Whether the last persist failed and in-memory state is ahead of storage.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn create_category(&mut self, name: &str) -> Result<Category, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyCategoryName);
        }
        if self.categories.iter().any(|c| eq_ignore_case(&c.name, name)) {
            return Err(StoreError::DuplicateCategory(name.to_string()));
        }

        let category = Category::new(self.next_id("cat"), name.to_string());
        self.categories.push(category.clone());
        info!(
            "event=category_created module=store category_id={}",
            category.id
        );
        self.persist()?;
        Ok(category)
    }

    /// Remove a category and all of its tasks. Returns `false` if the id was unknown.
    pub fn delete_category(&mut self, category_id: &str) -> Result<bool, StoreError> {
        let before = self.categories.len();
        self.categories.retain(|c| c.id != category_id);
        if self.categories.len() == before {
            return Ok(false);
        }
        info!("event=category_deleted module=store category_id={}", category_id);
        self.persist()?;
        Ok(true)
    }

    pub fn add_task(
        &mut self,
        category_id: &str,
        text: &str,
        reset_policy: ResetPolicy,
        one_time: bool,
    ) -> Result<Task, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::EmptyTaskText);
        }
        reset_policy
            .validate()
            .map_err(StoreError::InvalidResetPolicy)?;

        let index = self
            .category_index(category_id)
            .ok_or_else(|| StoreError::CategoryNotFound(category_id.to_string()))?;
        if self.categories[index].has_task_text(text) {
            return Err(StoreError::DuplicateTask {
                category: self.categories[index].name.clone(),
                text: text.to_string(),
            });
        }

        let task = Task::new(self.next_id("task"), text.to_string(), reset_policy, one_time);
        self.categories[index].tasks.push(task.clone());
        info!(
            "event=task_added module=store category_id={} task_id={} policy={} one_time={}",
            category_id, task.id, task.reset_policy, task.one_time
        );
        self.persist()?;
        Ok(task)
    }

    /// Remove a task. Returns `false` if the category or task was unknown.
    pub fn delete_task(&mut self, category_id: &str, task_id: &str) -> Result<bool, StoreError> {
        let Some(index) = self.category_index(category_id) else {
            return Ok(false);
        };
        let tasks = &mut self.categories[index].tasks;
        let before = tasks.len();
        tasks.retain(|t| t.id != task_id);
        if tasks.len() == before {
            return Ok(false);
        }
        info!(
            "event=task_deleted module=store category_id={} task_id={}",
            category_id, task_id
        );
        self.persist()?;
        Ok(true)
    }

    /// Check or uncheck a task.
    ///
    /// Returns the updated task when the state changed and `None` when it was
    /// already in the requested state. Checking a task records `now` as its
    /// completion time and appends a completion record to the history.
    pub fn set_completed(
        &mut self,
        category_id: &str,
        task_id: &str,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, StoreError> {
        let index = self
            .category_index(category_id)
            .ok_or_else(|| StoreError::CategoryNotFound(category_id.to_string()))?;
        let category = &mut self.categories[index];
        let category_name = category.name.clone();
        let task = category
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        if task.completed == completed {
            return Ok(None);
        }

        task.completed = completed;
        task.completed_at = completed.then_some(now);
        let updated = task.clone();

        if !completed {
            debug!(
                "event=task_unchecked module=store category_id={} task_id={}",
                category_id, task_id
            );
            self.persist()?;
            return Ok(Some(updated));
        }

        info!(
            "event=task_completed module=store category_id={} task_id={} completed_at={}",
            category_id,
            task_id,
            now.to_rfc3339()
        );
        let record = CompletionRecord {
            task: updated.text.clone(),
            completed_at: now,
            category: category_name,
        };
        let persisted = self.persist();
        let appended = self.append_history(&record);
        persisted?;
        appended?;
        Ok(Some(updated))
    }

    /// Replace the task order of a category.
    ///
    /// `ordered_ids` must be a permutation of the category's task ids; anything
    /// else (unknown category, missing, extra or repeated ids) leaves the order
    /// untouched and returns `false`.
    pub fn reorder_tasks(
        &mut self,
        category_id: &str,
        ordered_ids: &[String],
    ) -> Result<bool, StoreError> {
        let Some(index) = self.category_index(category_id) else {
            return Ok(false);
        };
        let tasks = &self.categories[index].tasks;
        if ordered_ids.len() != tasks.len() {
            return Ok(false);
        }

        let mut reordered = Vec::with_capacity(tasks.len());
        for id in ordered_ids {
            if reordered.iter().any(|t: &Task| &t.id == id) {
                return Ok(false);
            }
            match tasks.iter().find(|t| &t.id == id) {
                Some(task) => reordered.push(task.clone()),
                None => return Ok(false),
            }
        }

        self.categories[index].tasks = reordered;
        debug!("event=tasks_reordered module=store category_id={}", category_id);
        self.persist()?;
        Ok(true)
    }

    pub fn history(&self) -> Result<Vec<CompletionRecord>, StoreError> {
        history::load(&self.kv)
    }

    /// Delete every history record equal to `record`. Returns how many were removed.
    pub fn remove_history_entry(&mut self, record: &CompletionRecord) -> Result<usize, StoreError> {
        history::remove_entry(&mut self.kv, record)
    }

    pub fn preferences(&self) -> Result<Preferences, StoreError> {
        Ok(Preferences::load(&self.kv)?)
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<(), StoreError> {
        Ok(Preferences::save_theme(&mut self.kv, theme)?)
    }

    pub fn set_time_format(&mut self, time_format: TimeFormat) -> Result<(), StoreError> {
        Ok(Preferences::save_time_format(&mut self.kv, time_format)?)
    }

    /// Give back the underlying storage, e.g. to reopen it as a fresh store.
    pub fn into_inner(self) -> S {
        self.kv
    }

    fn category_index(&self, category_id: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.id == category_id)
    }

    fn append_history(&mut self, record: &CompletionRecord) -> Result<(), StoreError> {
        history::append(&mut self.kv, record)?;
        for observer in self.observers.iter_mut() {
            observer.on_history_appended(record);
        }
        Ok(())
    }

    /// Write the whole collection, then notify observers either way.
    fn persist(&mut self) -> Result<(), StoreError> {
        let result = write_json(&mut self.kv, CATEGORIES_KEY, &self.categories)
            .and_then(|()| write_json(&mut self.kv, ID_SEQUENCE_KEY, &self.last_id));
        match &result {
            Ok(()) => self.dirty = false,
            Err(e) => {
                self.dirty = true;
                error!("event=persist_failed module=store error={}", e);
            }
        }
        for observer in self.observers.iter_mut() {
            observer.on_state_changed(&self.categories);
        }
        result
    }

    /// Identifiers carry a strictly increasing numeric suffix so a deleted id is never handed out again.
    fn next_id(&mut self, prefix: &str) -> String {
        self.last_id = Utc::now().timestamp_millis().max(self.last_id + 1);
        format!("{}-{}", prefix, self.last_id)
    }
}

fn highest_id_suffix(categories: &[Category]) -> i64 {
    categories
        .iter()
        .flat_map(|c| std::iter::once(&c.id).chain(c.tasks.iter().map(|t| &t.id)))
        .filter_map(|id| id.rsplit('-').next()?.parse::<i64>().ok())
        .max()
        .unwrap_or(0)
}

pub(crate) fn read_json<T, S>(kv: &S, key: &str) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
    S: KeyValueStore + ?Sized,
{
    match kv.get(key)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        }),
        None => Ok(T::default()),
    }
}

pub(crate) fn write_json<T, S>(kv: &mut S, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })?;
    kv.set(key, &raw)?;
    Ok(())
}
