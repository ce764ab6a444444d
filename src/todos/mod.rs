use strum::{Display, EnumString};
use time::{OffsetDateTime, UtcOffset};

use crate::notify::{DeletedItem, Reminder, UndoLedger};
use crate::storage::{Priority, StorageHandle, TodoRecord};
use crate::text;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TodoFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl TodoFilter {
    pub fn matches(self, todo: &TodoRecord) -> bool {
        match self {
            TodoFilter::All => true,
            TodoFilter::Active => !todo.completed,
            TodoFilter::Completed => todo.completed,
        }
    }

    pub fn empty_message(self) -> &'static str {
        match self {
            TodoFilter::All => "No tasks yet. Add your first task!",
            TodoFilter::Active => "No active tasks. All done!",
            TodoFilter::Completed => "No completed tasks yet.",
        }
    }
}

/// Which record a form submission applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FormMode {
    #[default]
    Create,
    Edit(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoForm {
    pub title: String,
    pub priority: Priority,
    pub date: String,
    pub time: String,
}

impl From<&TodoRecord> for TodoForm {
    fn from(todo: &TodoRecord) -> Self {
        Self {
            title: todo.title.clone(),
            priority: todo.priority,
            date: todo.date.clone(),
            time: todo.time.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(TodoRecord),
    Updated(TodoRecord),
}

impl SubmitOutcome {
    pub fn record(&self) -> &TodoRecord {
        match self {
            SubmitOutcome::Created(todo) | SubmitOutcome::Updated(todo) => todo,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            SubmitOutcome::Created(_) => "Task added successfully",
            SubmitOutcome::Updated(_) => "Task updated successfully",
        }
    }

    /// Reminder to schedule for the submitted task, if it has a future slot.
    pub fn reminder(&self, offset: UtcOffset, now: OffsetDateTime) -> Option<Reminder> {
        Reminder::for_todo(self.record(), offset).filter(|r| r.delay_from(now).is_some())
    }
}

/// Task list with a single form. `submit` dispatches on the current
/// [`FormMode`] instead of swapping handlers.
pub struct TodoList {
    storage: StorageHandle,
    ledger: UndoLedger,
    mode: FormMode,
}

impl TodoList {
    pub fn new(storage: StorageHandle, ledger: UndoLedger) -> Self {
        Self {
            storage,
            ledger,
            mode: FormMode::Create,
        }
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn todos(&self) -> Vec<TodoRecord> {
        self.storage.load_todos()
    }

    pub fn visible(&self, filter: TodoFilter) -> Vec<TodoRecord> {
        self.todos()
            .into_iter()
            .filter(|todo| filter.matches(todo))
            .collect()
    }

    pub fn begin_create(&mut self) -> TodoForm {
        self.mode = FormMode::Create;
        TodoForm::default()
    }

    /// Switches the form to editing `id` and returns it pre-filled. Unknown
    /// ids leave the mode untouched.
    pub fn begin_edit(&mut self, id: &str) -> Option<TodoForm> {
        let todo = self.todos().into_iter().find(|todo| todo.id == id)?;
        self.mode = FormMode::Edit(todo.id.clone());
        Some(TodoForm::from(&todo))
    }

    pub fn cancel(&mut self) {
        self.mode = FormMode::Create;
    }

    /// Applies the form. Blank titles, unknown edit targets and failed
    /// writes yield `None`; the mode stays as it was in those cases.
    pub fn submit(&mut self, form: TodoForm, now: OffsetDateTime) -> Option<SubmitOutcome> {
        let title = form.title.trim();
        if title.is_empty() {
            return None;
        }
        let mut todos = self.todos();
        let stamp = text::timestamp(now);

        let outcome = match &self.mode {
            FormMode::Create => {
                let todo = TodoRecord {
                    id: text::generate_id(),
                    title: title.to_string(),
                    priority: form.priority,
                    date: form.date.trim().to_string(),
                    time: form.time.trim().to_string(),
                    completed: false,
                    created_at: stamp,
                    updated_at: None,
                };
                todos.insert(0, todo.clone());
                SubmitOutcome::Created(todo)
            }
            FormMode::Edit(id) => {
                let todo = todos.iter_mut().find(|todo| &todo.id == id)?;
                todo.title = title.to_string();
                todo.priority = form.priority;
                todo.date = form.date.trim().to_string();
                todo.time = form.time.trim().to_string();
                todo.updated_at = Some(stamp);
                SubmitOutcome::Updated(todo.clone())
            }
        };

        if !self.storage.save_todos(&todos) {
            return None;
        }
        self.mode = FormMode::Create;
        Some(outcome)
    }

    pub fn toggle_complete(&self, id: &str) -> Option<bool> {
        let mut todos = self.todos();
        let todo = todos.iter_mut().find(|todo| todo.id == id)?;
        todo.completed = !todo.completed;
        let completed = todo.completed;
        self.storage.save_todos(&todos).then_some(completed)
    }

    pub fn delete(&self, id: &str, now: OffsetDateTime) -> bool {
        let mut todos = self.todos();
        let Some(index) = todos.iter().position(|todo| todo.id == id) else {
            return false;
        };
        let removed = todos.remove(index);
        let todo_id = removed.id.clone();
        if !self.ledger.push(DeletedItem::Todo(removed), index, now) {
            tracing::warn!(%todo_id, "could not record undo, task kept");
            return false;
        }
        if !self.storage.save_todos(&todos) {
            self.ledger.discard();
            return false;
        }
        tracing::info!(%todo_id, "deleted task");
        true
    }

    pub fn reminders(&self, offset: UtcOffset, now: OffsetDateTime) -> Vec<Reminder> {
        self.todos()
            .iter()
            .filter(|todo| !todo.completed)
            .filter_map(|todo| Reminder::for_todo(todo, offset))
            .filter(|reminder| reminder.delay_from(now).is_some())
            .collect()
    }
}

pub fn is_overdue(todo: &TodoRecord, now: OffsetDateTime, offset: UtcOffset) -> bool {
    if todo.completed {
        return false;
    }
    text::due_instant(&todo.date, &todo.time, offset)
        .map(|due| due < now)
        .unwrap_or(false)
}
