//! Ordered, uniquely-identified records of one entity kind, written through to
//! the persistence adapter after every mutation.

use crate::aggregate::{count_by_categories, CategoryCount};
use crate::db::{merge_json, Persistence};
use crate::errors::{AppError, AppResult};
use crate::ids::IdGenerator;
use crate::models::{FieldErrors, SortOrder, TransitionPolicy};
use crate::status::{check_transition, HasStatus, Lifecycle};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

pub trait Entity: Clone + Serialize + DeserializeOwned {
    type Draft: Draft<Output = Self>;

    const KIND: &'static str;
    const ID_PREFIX: &'static str;

    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;

    /// Required-field checks run before a create or update is accepted.
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

/// Form input for a new record: required fields are constructor arguments,
/// optional ones carry defaults.
pub trait Draft: DeserializeOwned {
    type Output;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Self::Output;
}

pub struct Collection<T: Entity> {
    key: String,
    records: Vec<T>,
    ids: IdGenerator,
    persistence: Persistence,
    fresh: bool,
}

impl<T: Entity> Collection<T> {
    pub fn open(persistence: Persistence, key: impl Into<String>) -> Self {
        let key = key.into();
        let loaded = persistence.load::<Vec<T>>(&key);
        let fresh = loaded.is_none();
        let mut ids = IdGenerator::new(T::ID_PREFIX);
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for record in loaded.unwrap_or_default() {
            if seen.insert(record.id().to_string()) {
                ids.observe(record.id());
                records.push(record);
            } else {
                tracing::warn!(%key, id = record.id(), "dropping duplicate stored record");
            }
        }
        debug!(%key, count = records.len(), fresh, "collection opened");
        Self {
            key,
            records,
            ids,
            persistence,
            fresh,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True until the collection has been written at least once.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }

    pub fn persist(&mut self) -> bool {
        let ok = self.persistence.save(&self.key, &self.records);
        if ok {
            self.fresh = false;
        }
        ok
    }

    pub fn create(&mut self, draft: T::Draft) -> AppResult<T> {
        let id = self.ids.next_id();
        let record = draft.build(id, Utc::now());
        record.validate()?;
        self.records.push(record.clone());
        debug!(key = %self.key, id = record.id(), "record created");
        self.persist();
        Ok(record)
    }

    /// Builds a record from a JSON payload shaped like the entity's draft.
    pub fn create_from_json(&mut self, payload: Value) -> AppResult<T> {
        let draft: T::Draft = serde_json::from_value(payload).map_err(invalid_payload)?;
        self.create(draft)
    }

    /// Deep-merges `patch` into the stored record. `id` and `createdAt` in the
    /// patch are ignored.
    pub fn update(&mut self, id: &str, patch: Value) -> AppResult<T> {
        let index = self.position(id).ok_or_else(|| not_found::<T>(id))?;
        let updated = self.merged(index, patch)?;
        Ok(self.commit(index, updated))
    }

    /// Replaces a whole record by id, keeping the stored id and creation time.
    pub fn replace(&mut self, record: T) -> AppResult<T> {
        let id = record.id().to_string();
        let patch = serde_json::to_value(&record)?;
        self.update(&id, patch)
    }

    /// Removes the record if present. Deleting an unknown id is a no-op.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.records.remove(index);
        debug!(key = %self.key, %id, "record deleted");
        self.persist();
        true
    }

    pub fn delete_where(&mut self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        let (removed, kept): (Vec<T>, Vec<T>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|record| predicate(record));
        self.records = kept;
        if !removed.is_empty() {
            debug!(key = %self.key, count = removed.len(), "records deleted");
            self.persist();
        }
        removed
    }

    /// Applies `mutator` to every matching record with a single write-through.
    pub fn update_where(&mut self, predicate: impl Fn(&T) -> bool, mut mutator: impl FnMut(&mut T)) -> usize {
        let mut changed = 0usize;
        for record in self.records.iter_mut().filter(|record| predicate(record)) {
            mutator(record);
            changed += 1;
        }
        if changed > 0 {
            debug!(key = %self.key, changed, "records updated");
            self.persist();
        }
        changed
    }

    pub fn find(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|record| record.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<&T> {
        self.records.iter().filter(|record| predicate(record)).collect()
    }

    /// Stable sort on a serialized field. Missing or null values sort last in
    /// either direction.
    pub fn sort_by(&self, field: &str, order: SortOrder) -> Vec<&T> {
        let mut keyed: Vec<(Value, &T)> = self
            .records
            .iter()
            .map(|record| (field_value(record, field), record))
            .collect();
        keyed.sort_by(|left, right| compare_field_values(&left.0, &right.0, order));
        keyed.into_iter().map(|(_, record)| record).collect()
    }

    /// Swaps in a full set of records, e.g. from an import. Duplicate ids are
    /// rejected before anything changes.
    pub fn replace_all(&mut self, records: Vec<T>) -> AppResult<()> {
        ensure_unique_ids(&self.key, &records)?;
        for record in &records {
            self.ids.observe(record.id());
        }
        self.records = records;
        debug!(key = %self.key, count = self.records.len(), "collection replaced");
        self.persist();
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|record| record.id() == id)
    }

    /// The record at `index` with `patch` merged in and validated. Nothing is
    /// stored.
    fn merged(&self, index: usize, patch: Value) -> AppResult<T> {
        let Value::Object(mut patch) = patch else {
            let mut errors = FieldErrors::new();
            errors.push("patch", "must be an object");
            return Err(AppError::Validation(errors));
        };
        patch.remove("id");
        patch.remove("createdAt");

        let mut merged = serde_json::to_value(&self.records[index])?;
        merge_json(&mut merged, Value::Object(patch));
        let updated: T = serde_json::from_value(merged).map_err(invalid_payload)?;
        updated.validate()?;
        Ok(updated)
    }

    fn commit(&mut self, index: usize, updated: T) -> T {
        self.records[index] = updated.clone();
        debug!(key = %self.key, id = updated.id(), "record updated");
        self.persist();
        updated
    }
}

impl<T: HasStatus> Collection<T> {
    pub fn set_status(&mut self, id: &str, to: T::Status, policy: TransitionPolicy) -> AppResult<T> {
        let index = self.position(id).ok_or_else(|| not_found::<T>(id))?;
        let from = self.records[index].status();
        check_transition(T::KIND, from, to, policy)?;
        self.records[index].set_status(to);
        let updated = self.records[index].clone();
        debug!(key = %self.key, %id, from = from.as_str(), to = to.as_str(), "status changed");
        self.persist();
        Ok(updated)
    }

    /// [`Collection::update`] for status-bearing records: a status carried by
    /// the patch must be a transition `policy` allows.
    pub fn update_with_policy(&mut self, id: &str, patch: Value, policy: TransitionPolicy) -> AppResult<T> {
        let index = self.position(id).ok_or_else(|| not_found::<T>(id))?;
        let from = self.records[index].status();
        let updated = self.merged(index, patch)?;
        check_transition(T::KIND, from, updated.status(), policy)?;
        Ok(self.commit(index, updated))
    }

    /// Record counts for every status, including those with no records.
    pub fn status_counts(&self) -> Vec<CategoryCount<T::Status>> {
        count_by_categories(&self.records, |record| Some(record.status()), T::Status::ALL)
    }
}

pub(crate) fn ensure_unique_ids<T: Entity>(key: &str, records: &[T]) -> AppResult<()> {
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.id()) {
            return Err(AppError::InvalidImport(format!(
                "duplicate id {} in {}",
                record.id(),
                key
            )));
        }
    }
    Ok(())
}

fn not_found<T: Entity>(id: &str) -> AppError {
    AppError::NotFound(format!("{} {} not found", T::KIND, id))
}

fn invalid_payload(error: serde_json::Error) -> AppError {
    let mut errors = FieldErrors::new();
    errors.push("payload", error.to_string());
    AppError::Validation(errors)
}

fn field_value<T: Serialize>(record: &T, field: &str) -> Value {
    serde_json::to_value(record)
        .ok()
        .and_then(|value| value.get(field).cloned())
        .unwrap_or(Value::Null)
}

fn compare_field_values(left: &Value, right: &Value, order: SortOrder) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = compare_present(left, right);
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        }
    }
}

fn compare_present(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{Collection, Draft, Entity};
    use crate::db::{KvStore, MemoryKvStore, Persistence};
    use crate::errors::AppError;
    use crate::models::{FieldErrors, SortOrder, TransitionPolicy};
    use crate::status::{HasStatus, Lifecycle};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::HashSet;
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum NoteState {
        Open,
        Done,
    }

    impl Lifecycle for NoteState {
        const ALL: &'static [Self] = &[Self::Open, Self::Done];

        fn as_str(self) -> &'static str {
            match self {
                Self::Open => "open",
                Self::Done => "done",
            }
        }

        fn next_states(self) -> &'static [Self] {
            match self {
                Self::Open => &[Self::Done],
                Self::Done => &[],
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Note {
        pub id: String,
        pub title: String,
        pub priority: Option<u32>,
        pub state: NoteState,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct NoteDraft {
        pub title: String,
        #[serde(default)]
        pub priority: Option<u32>,
    }

    impl Draft for NoteDraft {
        type Output = Note;

        fn build(self, id: String, created_at: DateTime<Utc>) -> Note {
            Note {
                id,
                title: self.title,
                priority: self.priority,
                state: NoteState::Open,
                created_at,
            }
        }
    }

    impl Entity for Note {
        type Draft = NoteDraft;
        const KIND: &'static str = "note";
        const ID_PREFIX: &'static str = "note";

        fn id(&self) -> &str {
            &self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }

        fn validate(&self) -> Result<(), FieldErrors> {
            let mut errors = FieldErrors::new();
            errors.require("title", &self.title);
            errors.into_result()
        }
    }

    impl HasStatus for Note {
        type Status = NoteState;

        fn status(&self) -> NoteState {
            self.state
        }

        fn set_status(&mut self, status: NoteState) {
            self.state = status;
        }
    }

    fn draft(title: &str, priority: Option<u32>) -> NoteDraft {
        NoteDraft {
            title: title.to_string(),
            priority,
        }
    }

    #[test]
    fn create_assigns_distinct_ids_and_writes_through() {
        let persistence = Persistence::in_memory();
        let mut notes = Collection::<Note>::open(persistence.clone(), "test.notes");
        assert!(notes.is_fresh());

        let ids: HashSet<String> = (0..50)
            .map(|index| notes.create(draft(&format!("note {index}"), None)).expect("create").id)
            .collect();
        assert_eq!(ids.len(), 50);
        assert!(!notes.is_fresh());

        let stored: Vec<Note> = persistence.load("test.notes").expect("persisted");
        assert_eq!(stored.len(), 50);
        assert_eq!(stored, notes.records());
    }

    #[test]
    fn create_rejects_blank_required_fields() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let error = notes.create(draft("   ", None)).expect_err("blank title");
        match error {
            AppError::Validation(errors) => assert_eq!(errors.fields(), vec!["title"]),
            other => panic!("unexpected error {other}"),
        }
        assert!(notes.is_empty());
        assert!(notes.is_fresh());
    }

    #[test]
    fn update_merges_patch_and_keeps_identity() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let created = notes.create(draft("first", Some(1))).expect("create");

        let updated = notes
            .update(
                &created.id,
                serde_json::json!({ "id": "hijack", "createdAt": "2000-01-01T00:00:00Z", "priority": 5 }),
            )
            .expect("update");
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.priority, Some(5));
        assert_eq!(updated.title, "first");

        let cleared = notes
            .update(&created.id, serde_json::json!({ "priority": null }))
            .expect("clear priority");
        assert_eq!(cleared.priority, None);
    }

    #[test]
    fn update_of_unknown_id_is_not_found() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let error = notes
            .update("note-1", serde_json::json!({ "title": "x" }))
            .expect_err("missing");
        assert!(error.is_not_found());
    }

    #[test]
    fn update_that_blanks_required_field_is_rejected() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let created = notes.create(draft("keep", None)).expect("create");
        assert!(notes.update(&created.id, serde_json::json!({ "title": "" })).is_err());
        assert!(notes.update(&created.id, serde_json::json!({ "priority": "high" })).is_err());
        assert_eq!(notes.find(&created.id).map(|note| note.title.as_str()), Some("keep"));
    }

    #[test]
    fn replace_swaps_whole_record() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let created = notes.create(draft("old", Some(2))).expect("create");
        let mut edited = created.clone();
        edited.title = "new".to_string();
        edited.priority = None;
        let replaced = notes.replace(edited).expect("replace");
        assert_eq!(replaced.title, "new");
        assert_eq!(replaced.priority, None);
        assert_eq!(replaced.created_at, created.created_at);
    }

    #[test]
    fn delete_is_idempotent() {
        let persistence = Persistence::in_memory();
        let mut notes = Collection::<Note>::open(persistence.clone(), "test.notes");
        let keep = notes.create(draft("keep", None)).expect("create");
        let gone = notes.create(draft("gone", None)).expect("create");

        assert!(notes.delete(&gone.id));
        let after_first: Vec<Note> = notes.records().to_vec();
        assert!(!notes.delete(&gone.id));
        assert_eq!(notes.records(), after_first.as_slice());
        assert_eq!(notes.len(), 1);
        assert!(notes.contains(&keep.id));

        let stored: Vec<Note> = persistence.load("test.notes").expect("persisted");
        assert_eq!(stored, after_first);
    }

    #[test]
    fn filter_and_sort_do_not_mutate() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        notes.create(draft("b", Some(2))).expect("create");
        notes.create(draft("a", None)).expect("create");
        notes.create(draft("c", Some(1))).expect("create");

        let asc: Vec<&str> = notes
            .sort_by("priority", SortOrder::Asc)
            .into_iter()
            .map(|note| note.title.as_str())
            .collect();
        assert_eq!(asc, vec!["c", "b", "a"]);

        let desc: Vec<&str> = notes
            .sort_by("priority", SortOrder::Desc)
            .into_iter()
            .map(|note| note.title.as_str())
            .collect();
        assert_eq!(desc, vec!["b", "c", "a"]);

        let by_title: Vec<&str> = notes
            .sort_by("title", SortOrder::Asc)
            .into_iter()
            .map(|note| note.title.as_str())
            .collect();
        assert_eq!(by_title, vec!["a", "b", "c"]);

        assert_eq!(notes.filter(|note| note.priority.is_some()).len(), 2);
        let order: Vec<&str> = notes.iter().map(|note| note.title.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn reopening_restores_records_and_never_reuses_ids() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let persistence = Persistence::new(store);
        let deleted_id = {
            let mut notes = Collection::<Note>::open(persistence.clone(), "test.notes");
            notes.create(draft("one", None)).expect("create");
            let two = notes.create(draft("two", None)).expect("create");
            notes.delete(&two.id);
            two.id
        };

        let mut notes = Collection::<Note>::open(persistence, "test.notes");
        assert!(!notes.is_fresh());
        assert_eq!(notes.len(), 1);
        let three = notes.create(draft("three", None)).expect("create");
        assert_ne!(three.id, deleted_id);
        assert!(three.id > deleted_id || three.id.len() > deleted_id.len());
    }

    #[test]
    fn status_changes_respect_policy() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let note = notes.create(draft("task", None)).expect("create");
        notes
            .set_status(&note.id, NoteState::Done, TransitionPolicy::Enforced)
            .expect("open -> done");
        let error = notes
            .set_status(&note.id, NoteState::Open, TransitionPolicy::Enforced)
            .expect_err("done is terminal");
        assert!(matches!(error, AppError::InvalidTransition { .. }));
        assert_eq!(notes.find(&note.id).map(|note| note.state), Some(NoteState::Done));

        notes
            .set_status(&note.id, NoteState::Open, TransitionPolicy::Unrestricted)
            .expect("unrestricted");
        let counts = notes.status_counts();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].count, 1);
        assert_eq!(counts[1].count, 0);
    }

    #[test]
    fn status_in_a_patch_obeys_policy() {
        let persistence = Persistence::in_memory();
        let mut notes = Collection::<Note>::open(persistence.clone(), "test.notes");
        let note = notes.create(draft("task", None)).expect("create");
        notes
            .set_status(&note.id, NoteState::Done, TransitionPolicy::Enforced)
            .expect("open -> done");

        let error = notes
            .update_with_policy(
                &note.id,
                serde_json::json!({ "state": "open", "priority": 3 }),
                TransitionPolicy::Enforced,
            )
            .expect_err("done is terminal");
        assert!(matches!(error, AppError::InvalidTransition { .. }));
        let stored = notes.find(&note.id).expect("note");
        assert_eq!(stored.state, NoteState::Done);
        assert_eq!(stored.priority, None);
        let persisted: Vec<Note> = persistence.load("test.notes").expect("persisted");
        assert_eq!(persisted[0].state, NoteState::Done);

        let edited = notes
            .update_with_policy(&note.id, serde_json::json!({ "priority": 3 }), TransitionPolicy::Enforced)
            .expect("no status change");
        assert_eq!(edited.priority, Some(3));

        let reopened = notes
            .update_with_policy(&note.id, serde_json::json!({ "state": "open" }), TransitionPolicy::Unrestricted)
            .expect("unrestricted");
        assert_eq!(reopened.state, NoteState::Open);
    }

    #[test]
    fn update_where_and_delete_where_write_once() {
        let persistence = Persistence::in_memory();
        let mut notes = Collection::<Note>::open(persistence.clone(), "test.notes");
        for title in ["a", "b", "c"] {
            notes.create(draft(title, Some(1))).expect("create");
        }
        let changed = notes.update_where(|note| note.title != "b", |note| note.priority = None);
        assert_eq!(changed, 2);
        let removed = notes.delete_where(|note| note.priority.is_none());
        assert_eq!(removed.len(), 2);
        let stored: Vec<Note> = persistence.load("test.notes").expect("persisted");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "b");
    }

    #[test]
    fn replace_all_rejects_duplicates_without_changes() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let original = notes.create(draft("a", None)).expect("create");
        let mut duplicate = original.clone();
        duplicate.title = "dup".to_string();
        assert!(notes.replace_all(vec![original.clone(), duplicate]).is_err());
        assert_eq!(notes.records(), &[original]);
    }

    #[test]
    fn create_from_json_reports_shape_errors() {
        let mut notes = Collection::<Note>::open(Persistence::in_memory(), "test.notes");
        let created = notes
            .create_from_json(serde_json::json!({ "title": "from ai", "priority": 3 }))
            .expect("create");
        assert_eq!(created.priority, Some(3));
        assert!(notes.create_from_json(serde_json::json!({ "priority": 3 })).is_err());
    }
}
